//! Hand-written collaborators with call recorders.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::constraints::ConstraintEvaluator;
use crate::core::{
    DeliveryArtifact, DeliveryConfig, Environment, LaunchedTask, Resource, ResourceDiff, ResourceKind,
    ARTIFACT_VERSION_KEY,
};
use crate::errors::{HandlerError, Result};
use crate::resources::{DesiredState, HandlerResult, ResourceHandler};
use crate::veto::{Veto, VetoResponse};

#[derive(Debug, Default)]
struct HandlerScript {
    current: Option<Value>,
    artifact_version: Option<String>,
    desired_error: Option<String>,
    current_error: Option<String>,
    unresolvable: Option<String>,
    in_progress: bool,
    delays: BTreeMap<String, Duration>,
}

/// A resource handler whose current state is set by the test.
///
/// The desired state is the resource's own spec. Created and updated
/// resource ids are recorded.
#[derive(Debug)]
pub struct MockResourceHandler {
    kind: ResourceKind,
    script: Mutex<HandlerScript>,
    created: Mutex<Vec<String>>,
    updated: Mutex<Vec<String>>,
}

impl MockResourceHandler {
    /// Creates a handler for `kind` whose resources do not exist yet.
    #[must_use]
    pub fn new(kind: &str) -> Self {
        Self {
            kind: ResourceKind::from(kind),
            script: Mutex::new(HandlerScript::default()),
            created: Mutex::new(Vec::new()),
            updated: Mutex::new(Vec::new()),
        }
    }

    /// Sets the current state returned for every resource.
    pub fn set_current(&self, current: Option<Value>) {
        self.script.lock().current = current;
    }

    /// Makes resolved resources carry this artifact version.
    pub fn set_artifact_version(&self, version: impl Into<String>) {
        self.script.lock().artifact_version = Some(version.into());
    }

    /// Makes `desired` fail.
    pub fn fail_desired(&self, message: impl Into<String>) {
        self.script.lock().desired_error = Some(message.into());
    }

    /// Makes `current` fail.
    pub fn fail_current(&self, message: impl Into<String>) {
        self.script.lock().current_error = Some(message.into());
    }

    /// Makes `desired` report the resource as currently unresolvable.
    pub fn set_unresolvable(&self, message: impl Into<String>) {
        self.script.lock().unresolvable = Some(message.into());
    }

    /// Sets whether actuation is in progress.
    pub fn set_in_progress(&self, in_progress: bool) {
        self.script.lock().in_progress = in_progress;
    }

    /// Makes `current` take `delay` for one resource.
    pub fn set_delay(&self, resource_id: impl Into<String>, delay: Duration) {
        self.script.lock().delays.insert(resource_id.into(), delay);
    }

    /// Ids passed to `create`.
    #[must_use]
    pub fn created(&self) -> Vec<String> {
        self.created.lock().clone()
    }

    /// Ids passed to `update`.
    #[must_use]
    pub fn updated(&self) -> Vec<String> {
        self.updated.lock().clone()
    }

    fn task(&self, verb: &str, resource: &Resource) -> LaunchedTask {
        LaunchedTask {
            id: format!("{verb}-{}", resource.id),
            name: format!("{verb} {}", resource.id),
        }
    }
}

#[async_trait]
impl ResourceHandler for MockResourceHandler {
    fn name(&self) -> &str {
        "mock"
    }

    fn supported_kind(&self) -> ResourceKind {
        self.kind.clone()
    }

    async fn desired(&self, resource: &Resource) -> HandlerResult<DesiredState> {
        let script = self.script.lock();
        if let Some(message) = &script.unresolvable {
            return Err(HandlerError::CurrentlyUnresolvable(message.clone()));
        }
        if let Some(message) = &script.desired_error {
            return Err(HandlerError::failed(message.clone()));
        }
        let mut resolved = resource.clone();
        if let (Some(version), Some(spec)) = (&script.artifact_version, resolved.spec.as_object_mut()) {
            spec.insert(ARTIFACT_VERSION_KEY.to_string(), Value::String(version.clone()));
        }
        Ok(DesiredState {
            spec: resource.spec.clone(),
            resolved,
        })
    }

    async fn current(&self, resource: &Resource) -> HandlerResult<Option<Value>> {
        let delay = self.script.lock().delays.get(&resource.id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let script = self.script.lock();
        if let Some(message) = &script.current_error {
            return Err(HandlerError::failed(message.clone()));
        }
        Ok(script.current.clone())
    }

    async fn create(&self, resource: &Resource, _diff: &ResourceDiff) -> HandlerResult<Vec<LaunchedTask>> {
        self.created.lock().push(resource.id.clone());
        Ok(vec![self.task("create", resource)])
    }

    async fn update(&self, resource: &Resource, _diff: &ResourceDiff) -> HandlerResult<Vec<LaunchedTask>> {
        self.updated.lock().push(resource.id.clone());
        Ok(vec![self.task("update", resource)])
    }

    async fn actuation_in_progress(&self, _resource: &Resource) -> HandlerResult<bool> {
        Ok(self.script.lock().in_progress)
    }
}

/// A veto that always gives the same answer.
#[derive(Debug)]
pub struct StaticVeto {
    name: String,
    response: VetoResponse,
    priority: i32,
    checks: Mutex<usize>,
}

impl StaticVeto {
    /// A veto that allows everything.
    #[must_use]
    pub fn allowing(name: &str) -> Self {
        Self::with_response(name, VetoResponse::allowed(name))
    }

    /// A veto that denies everything and asks for the artifact to be vetoed.
    #[must_use]
    pub fn denying(name: &str, message: &str) -> Self {
        Self::with_response(name, VetoResponse::denied(name, message))
    }

    fn with_response(name: &str, response: VetoResponse) -> Self {
        Self {
            name: name.to_string(),
            response,
            priority: 0,
            checks: Mutex::new(0),
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets whether a denial asks for the artifact to be vetoed.
    #[must_use]
    pub fn with_veto_artifact(mut self, veto_artifact: bool) -> Self {
        self.response = self.response.with_veto_artifact(veto_artifact);
        self
    }

    /// Number of checks made.
    #[must_use]
    pub fn checks(&self) -> usize {
        *self.checks.lock()
    }
}

#[async_trait]
impl Veto for StaticVeto {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn check(&self, _resource: &Resource) -> Result<VetoResponse> {
        *self.checks.lock() += 1;
        Ok(self.response.clone())
    }
}

/// A constraint evaluator that passes a fixed set of versions and records
/// every version it is asked about.
#[derive(Debug)]
pub struct ScriptedConstraintEvaluator {
    constraint_type: String,
    stateful: bool,
    implicit: bool,
    passing: BTreeSet<String>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
}

impl ScriptedConstraintEvaluator {
    /// A stateless evaluator for `constraint_type` that passes nothing.
    #[must_use]
    pub fn stateless(constraint_type: &str) -> Self {
        Self {
            constraint_type: constraint_type.to_string(),
            stateful: false,
            implicit: false,
            passing: BTreeSet::new(),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A stateful evaluator for `constraint_type` that passes nothing.
    #[must_use]
    pub fn stateful(constraint_type: &str) -> Self {
        Self {
            stateful: true,
            ..Self::stateless(constraint_type)
        }
    }

    /// Applies to every environment.
    #[must_use]
    pub fn implicit(mut self) -> Self {
        self.implicit = true;
        self
    }

    /// Versions that pass.
    #[must_use]
    pub fn passing<'a>(mut self, versions: impl IntoIterator<Item = &'a str>) -> Self {
        self.passing = versions.into_iter().map(str::to_string).collect();
        self
    }

    /// Makes every evaluation take `delay`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Versions evaluated so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ConstraintEvaluator for ScriptedConstraintEvaluator {
    fn supported_type(&self) -> &str {
        &self.constraint_type
    }

    fn is_implicit(&self) -> bool {
        self.implicit
    }

    fn is_stateful(&self) -> bool {
        self.stateful
    }

    async fn can_promote(
        &self,
        _artifact: &DeliveryArtifact,
        version: &str,
        _config: &DeliveryConfig,
        _environment: &Environment,
    ) -> Result<bool> {
        self.calls.lock().push(version.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.passing.contains(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_handler_scripts_state() {
        let handler = MockResourceHandler::new(fixtures::CLUSTER_KIND);
        let resource = fixtures::resource("test");

        assert_eq!(handler.current(&resource).await.unwrap(), None);
        handler.set_current(Some(json!({"capacity": 1})));
        assert_eq!(handler.current(&resource).await.unwrap(), Some(json!({"capacity": 1})));

        handler.set_artifact_version("keeldemo-1.0.1-h1.abc");
        let desired = handler.desired(&resource).await.unwrap();
        assert_eq!(desired.spec, resource.spec);
        assert_eq!(desired.resolved.artifact_version(), Some("keeldemo-1.0.1-h1.abc"));

        handler.set_unresolvable("not baked");
        assert!(matches!(
            handler.desired(&resource).await,
            Err(HandlerError::CurrentlyUnresolvable(_))
        ));
    }
}
