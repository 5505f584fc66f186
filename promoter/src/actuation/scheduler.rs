//! Fixed-delay check loops for every category of work.

use super::{EnvironmentPromotionChecker, ResourceActuator};
use crate::artifacts::ArtifactHandler;
use crate::cancellation::{CancellationToken, SupervisedTaskGroup, TaskOutcome, TaskReport};
use crate::config::EngineConfig;
use crate::core::{DeliveryEvent, ResourceRef};
use crate::errors::Result;
use crate::events::{publish, EventSink};
use crate::observability::{CheckSpanAttributes, SpanTimer};
use crate::persistence::Repositories;
use crate::utils::generate_owner_id;
use crate::verification::VerificationRunner;
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A periodic job that must run on one instance at a time.
#[async_trait]
pub trait ScheduledAgent: Send + Sync {
    /// Lock name and log label.
    fn name(&self) -> &str;

    /// How long the lock is held once taken.
    fn lock_timeout(&self) -> Duration;

    /// Does the work.
    async fn invoke(&self) -> Result<()>;
}

/// Picks due work and dispatches it in bounded, isolated batches.
///
/// Nothing runs until [`start`](Self::start) is called. Each `check_*`
/// method runs one tick: it leases a batch of stale items, runs one task per
/// item under its own deadline, and returns once the whole batch is done.
/// A timed-out item is reported on its own and never affects its siblings.
pub struct CheckScheduler {
    repositories: Repositories,
    actuator: Arc<ResourceActuator>,
    promotion: Arc<EnvironmentPromotionChecker>,
    verifications: Arc<VerificationRunner>,
    artifact_handlers: Vec<Arc<dyn ArtifactHandler>>,
    agents: Vec<Arc<dyn ScheduledAgent>>,
    config: EngineConfig,
    events: Arc<dyn EventSink>,
    enabled: AtomicBool,
    owner: String,
}

impl CheckScheduler {
    /// Creates a disabled scheduler.
    #[must_use]
    pub fn new(
        repositories: Repositories,
        actuator: Arc<ResourceActuator>,
        promotion: Arc<EnvironmentPromotionChecker>,
        verifications: Arc<VerificationRunner>,
        config: EngineConfig,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            repositories,
            actuator,
            promotion,
            verifications,
            artifact_handlers: Vec::new(),
            agents: Vec::new(),
            config,
            events,
            enabled: AtomicBool::new(false),
            owner: generate_owner_id("scheduler"),
        }
    }

    /// Adds a handler run for every due artifact.
    #[must_use]
    pub fn with_artifact_handler(mut self, handler: Arc<dyn ArtifactHandler>) -> Self {
        self.artifact_handlers.push(handler);
        self
    }

    /// Adds a scheduled agent.
    #[must_use]
    pub fn with_agent(mut self, agent: Arc<dyn ScheduledAgent>) -> Self {
        self.agents.push(agent);
        self
    }

    /// Enables checks.
    pub fn start(&self) {
        info!(owner = %self.owner, "Application up, enabling scheduled checks");
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Disables checks. Batches already running finish normally.
    pub fn stop(&self) {
        info!(owner = %self.owner, "Application down, disabling scheduled checks");
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Whether ticks do any work.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// The lease owner id of this instance.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Runs every category on its own ticker until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: &CancellationToken) {
        info!(owner = %self.owner, "Check scheduler running");
        tokio::join!(
            every(self.config.resource_check.frequency(), shutdown, || self.check_resources()),
            every(self.config.environment_check.check.frequency(), shutdown, || {
                self.check_environments()
            }),
            every(self.config.artifact_check.frequency(), shutdown, || self.check_artifacts()),
            every(self.config.environment_verification.frequency(), shutdown, || {
                self.check_verifications()
            }),
            every(self.config.agents.frequency(), shutdown, || self.check_agents()),
        );
        info!(owner = %self.owner, reason = ?shutdown.reason(), "Check scheduler stopped");
    }

    /// One resource tick. Returns the number of resources checked.
    pub async fn check_resources(&self) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        let timer = SpanTimer::start("resource_check");
        let settings = &self.config.resource_check;
        let resources = match self
            .repositories
            .resources
            .resources_due_for_check(settings.min_age(), settings.batch_size)
            .await
        {
            Ok(resources) => resources,
            Err(e) => {
                error!(error = %e, "Failed to load resources due for check");
                self.publish(DeliveryEvent::ResourceLoadFailed { error: e.to_string() })
                    .await;
                return 0;
            }
        };

        let group = self.group();
        for resource in &resources {
            let actuator = self.actuator.clone();
            let resource = resource.clone();
            group.spawn(resource.id.clone(), settings.timeout(), async move {
                actuator.check_resource(&resource).await.map(|_| ())
            });
        }

        for (resource, report) in resources.iter().zip(group.wait().await) {
            record_check("resource", &resource.id, Some(resource.application()), &report);
            match report.outcome {
                TaskOutcome::TimedOut => {
                    error!(resource_id = %resource.id, "Timed out checking resource");
                    self.publish(DeliveryEvent::ResourceCheckTimedOut {
                        resource: ResourceRef::from(resource),
                    })
                    .await;
                }
                TaskOutcome::Completed => {
                    self.publish(DeliveryEvent::ResourceCheckCompleted {
                        duration_ms: timer.elapsed_ms(),
                    })
                    .await;
                }
                TaskOutcome::Failed(_) | TaskOutcome::Panicked(_) => {}
            }
        }
        resources.len()
    }

    /// One environment tick. Each leased config is released when its task ends,
    /// whatever the outcome.
    pub async fn check_environments(&self) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        let settings = &self.config.environment_check;
        let configs = match self
            .repositories
            .delivery_configs
            .delivery_configs_due_for_check(
                &self.owner,
                settings.check.min_age(),
                settings.lease_staleness(),
                settings.check.batch_size,
            )
            .await
        {
            Ok(configs) => configs,
            Err(e) => {
                error!(error = %e, "Failed to load delivery configs due for check");
                return 0;
            }
        };

        let group = self.group();
        for config in &configs {
            let environments = u32::try_from(config.environments.len().max(1)).unwrap_or(u32::MAX);
            let timeout = settings.check.timeout().saturating_mul(environments);
            let promotion = self.promotion.clone();
            let config = config.clone();
            group.spawn(config.name.clone(), timeout, async move {
                promotion.check_environments(&config).await
            });
        }

        for (config, report) in configs.iter().zip(group.wait().await) {
            record_check("environment", &config.name, Some(&config.application), &report);
            if report.outcome == TaskOutcome::TimedOut {
                error!(application = %config.application, delivery_config = %config.name, "Timed out checking environments");
                self.publish(DeliveryEvent::EnvironmentsCheckTimedOut {
                    application: config.application.clone(),
                    delivery_config: config.name.clone(),
                })
                .await;
            }
            match self
                .repositories
                .delivery_configs
                .mark_delivery_config_check_complete(&self.owner, config)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!(delivery_config = %config.name, owner = %self.owner, "Delivery config lease was reclaimed before the check finished");
                }
                Err(e) => {
                    warn!(delivery_config = %config.name, error = %e, "Failed to release delivery config lease");
                }
            }
        }
        configs.len()
    }

    /// One artifact tick: every handler runs for every due artifact.
    pub async fn check_artifacts(&self) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        let timer = SpanTimer::start("artifact_check");
        let settings = &self.config.artifact_check;
        let artifacts = match self
            .repositories
            .artifacts
            .artifacts_due_for_check(settings.min_age(), settings.batch_size)
            .await
        {
            Ok(artifacts) => artifacts,
            Err(e) => {
                error!(error = %e, "Failed to load artifacts due for check");
                return 0;
            }
        };

        let group = self.group();
        for artifact in &artifacts {
            let handlers = self.artifact_handlers.clone();
            let artifact = artifact.clone();
            group.spawn(artifact.name.clone(), settings.timeout(), async move {
                for handler in &handlers {
                    if let Err(e) = handler.handle(&artifact).await {
                        warn!(handler = handler.name(), artifact = %artifact.name, error = %e, "Artifact handler failed");
                    }
                }
                Ok(())
            });
        }

        for (artifact, report) in artifacts.iter().zip(group.wait().await) {
            record_check("artifact", &artifact.name, None, &report);
            if report.outcome == TaskOutcome::TimedOut {
                error!(artifact = %artifact.name, delivery_config = %artifact.config_name(), "Timed out checking artifact");
                self.publish(DeliveryEvent::ArtifactCheckTimedOut {
                    name: artifact.name.clone(),
                    delivery_config: artifact.config_name().to_string(),
                })
                .await;
            }
        }
        self.publish(DeliveryEvent::ArtifactCheckComplete {
            duration_ms: timer.finish(),
        })
        .await;
        artifacts.len()
    }

    /// One verification tick.
    pub async fn check_verifications(&self) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        let timer = SpanTimer::start("verification_check");
        let settings = &self.config.environment_verification;
        let targets = match self
            .verifications
            .next_environments_for_verification(settings.min_age(), settings.batch_size)
            .await
        {
            Ok(targets) => targets,
            Err(e) => {
                error!(error = %e, "Failed to load environments due for verification");
                return 0;
            }
        };

        let group = self.group();
        for target in &targets {
            let runner = self.verifications.clone();
            let target = target.clone();
            let name = format!("{}/{}", target.environment.name, target.version);
            group.spawn(name, settings.timeout(), async move {
                runner.run_verifications_for(&target).await
            });
        }

        for (target, report) in targets.iter().zip(group.wait().await) {
            record_check("verification", &report.name, Some(&target.config.application), &report);
            if report.outcome == TaskOutcome::TimedOut {
                error!(
                    application = %target.config.application,
                    environment = %target.environment.name,
                    version = %target.version,
                    "Timed out verifying"
                );
                self.publish(DeliveryEvent::VerificationTimedOut {
                    application: target.config.application.clone(),
                    environment: target.environment.name.clone(),
                    version: target.version.clone(),
                })
                .await;
            }
        }
        self.publish(DeliveryEvent::VerificationCheckComplete {
            duration_ms: timer.finish(),
        })
        .await;
        targets.len()
    }

    /// Invokes each agent whose lock this instance can take. Returns the number invoked.
    pub async fn check_agents(&self) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        let timer = SpanTimer::start("agents");
        let mut invoked = 0;
        for agent in &self.agents {
            match self
                .repositories
                .agent_locks
                .try_acquire_lock(agent.name(), agent.lock_timeout())
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!(agent = agent.name(), "Agent lock held elsewhere");
                    continue;
                }
                Err(e) => {
                    warn!(agent = agent.name(), error = %e, "Failed to acquire agent lock");
                    continue;
                }
            }
            if let Err(e) = agent.invoke().await {
                error!(agent = agent.name(), error = %e, "Agent invocation failed");
            }
            invoked += 1;
            self.publish(DeliveryEvent::AgentInvocationComplete {
                duration_ms: timer.elapsed_ms(),
                agent: agent.name().to_string(),
            })
            .await;
        }
        invoked
    }

    fn group(&self) -> SupervisedTaskGroup {
        SupervisedTaskGroup::new(self.config.max_concurrency)
    }

    async fn publish(&self, event: DeliveryEvent) {
        publish(self.events.as_ref(), &event).await;
    }
}

impl std::fmt::Debug for CheckScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckScheduler")
            .field("owner", &self.owner)
            .field("enabled", &self.is_enabled())
            .field("artifact_handlers", &self.artifact_handlers.len())
            .field("agents", &self.agents.len())
            .finish_non_exhaustive()
    }
}

fn record_check(category: &str, item_id: &str, application: Option<&str>, report: &TaskReport) {
    let mut attributes = CheckSpanAttributes::new(category, item_id)
        .with_outcome(report.outcome.label())
        .with_duration_ms(u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX));
    if let Some(application) = application {
        attributes = attributes.with_application(application);
    }
    attributes.record();
}

/// Runs `tick` with `period` between the end of one run and the start of the next.
async fn every<F, Fut, T>(period: Duration, shutdown: &CancellationToken, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = T>,
{
    while !shutdown.is_cancelled() {
        tick().await;
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(period) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuation::ResourcePersister;
    use crate::config::CheckConfig;
    use crate::constraints::{ConstraintEvaluator, DependsOnConstraintEvaluator, EnvironmentConstraintRunner};
    use crate::core::DeliveryArtifact;
    use crate::events::CollectingEventSink;
    use crate::resources::{ResourceHandler, ResourceHandlerRegistry};
    use crate::testing::{fixtures, MockResourceHandler, MutableClock, ScriptedConstraintEvaluator};
    use crate::veto::VetoEnforcer;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    struct Fixture {
        scheduler: CheckScheduler,
        repositories: Repositories,
        persister: ResourcePersister,
        handler: Arc<MockResourceHandler>,
        events: Arc<CollectingEventSink>,
        clock: Arc<MutableClock>,
    }

    fn batch(size: usize) -> CheckConfig {
        CheckConfig::default().with_batch_size(size)
    }

    fn engine_config() -> EngineConfig {
        EngineConfig::default()
            .with_resource_check(batch(10))
            .with_environment_check(batch(10))
            .with_artifact_check(batch(10).with_timeout(0.05))
            .with_environment_verification(batch(10))
    }

    fn scheduler_on(repositories: &Repositories, events: Arc<CollectingEventSink>) -> (CheckScheduler, Arc<MockResourceHandler>) {
        let evaluators: Vec<Arc<dyn ConstraintEvaluator>> = vec![Arc::new(DependsOnConstraintEvaluator::new(
            repositories.artifacts.clone(),
            repositories.delivery_configs.clone(),
        ))];
        scheduler_with(repositories, events, engine_config(), evaluators)
    }

    fn scheduler_with(
        repositories: &Repositories,
        events: Arc<CollectingEventSink>,
        config: EngineConfig,
        evaluators: Vec<Arc<dyn ConstraintEvaluator>>,
    ) -> (CheckScheduler, Arc<MockResourceHandler>) {
        let handler = Arc::new(MockResourceHandler::new(fixtures::CLUSTER_KIND));
        let handlers = Arc::new(ResourceHandlerRegistry::with_handlers([handler.clone() as Arc<dyn ResourceHandler>]));
        let actuator = Arc::new(ResourceActuator::new(
            repositories.clone(),
            handlers,
            Arc::new(VetoEnforcer::new()),
            events.clone(),
        ));
        let runner = EnvironmentConstraintRunner::new(
            repositories.artifacts.clone(),
            repositories.delivery_configs.clone(),
            evaluators,
        );
        let promotion = Arc::new(EnvironmentPromotionChecker::new(
            repositories.artifacts.clone(),
            repositories.delivery_configs.clone(),
            runner,
            events.clone(),
        ));
        let verifications = Arc::new(VerificationRunner::new(
            repositories.artifacts.clone(),
            repositories.delivery_configs.clone(),
            Vec::new(),
        ));
        let scheduler = CheckScheduler::new(
            repositories.clone(),
            actuator,
            promotion,
            verifications,
            config,
            events,
        );
        (scheduler, handler)
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(MutableClock::new(Utc.with_ymd_and_hms(2020, 3, 25, 12, 0, 0).unwrap()));
        let repositories = Repositories::in_memory(clock.clone());
        let events = Arc::new(CollectingEventSink::new());
        let (scheduler, handler) = scheduler_on(&repositories, events.clone());
        let persister = ResourcePersister::new(
            repositories.clone(),
            Arc::new(ResourceHandlerRegistry::with_handlers([handler.clone() as Arc<dyn ResourceHandler>])),
            events.clone(),
        );
        persister.upsert(&fixtures::submitted_delivery_config()).await.unwrap();
        events.clear();
        Fixture {
            scheduler,
            repositories,
            persister,
            handler,
            events,
            clock,
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl ArtifactHandler for SlowHandler {
        fn name(&self) -> &str {
            "slow"
        }

        async fn handle(&self, _artifact: &DeliveryArtifact) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingAgent {
        invocations: AtomicUsize,
    }

    #[async_trait]
    impl ScheduledAgent for CountingAgent {
        fn name(&self) -> &str {
            "counting-agent"
        }

        fn lock_timeout(&self) -> Duration {
            Duration::from_secs(60)
        }

        async fn invoke(&self) -> Result<()> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_disabled_scheduler_does_nothing() {
        let f = fixture().await;
        assert_eq!(f.scheduler.check_resources().await, 0);
        assert_eq!(f.scheduler.check_environments().await, 0);
        assert_eq!(f.scheduler.check_artifacts().await, 0);
        assert!(f.handler.created().is_empty());
        assert!(f.events.is_empty());
    }

    #[tokio::test]
    async fn test_resource_tick_checks_each_due_resource_once() {
        let f = fixture().await;
        f.scheduler.start();

        assert_eq!(f.scheduler.check_resources().await, 3);
        assert_eq!(f.handler.created().len(), 3);
        assert_eq!(f.events.count_of("resource.check_completed"), 3);

        assert_eq!(f.scheduler.check_resources().await, 0);

        f.scheduler.stop();
        assert!(!f.scheduler.is_enabled());
    }

    #[tokio::test]
    async fn test_environment_tick_approves_and_releases_lease() {
        let f = fixture().await;
        f.repositories
            .artifacts
            .store_version(&fixtures::deb_version("keeldemo-1.0.1-h1.a1b2c3d"))
            .await
            .unwrap();
        f.scheduler.start();

        assert_eq!(f.scheduler.check_environments().await, 1);
        let config = f.persister.upsert(&fixtures::submitted_delivery_config()).await.unwrap();
        let approved = f
            .repositories
            .artifacts
            .latest_version_approved_in(&config, &config.artifacts[0], "test")
            .await
            .unwrap();
        assert_eq!(approved.as_deref(), Some("keeldemo-1.0.1-h1.a1b2c3d"));
        assert_eq!(f.events.count_of("artifact.version_approved"), 1);
    }

    #[tokio::test]
    async fn test_artifact_timeout_is_reported_per_item() {
        let f = fixture().await;
        let (scheduler, _) = scheduler_on(&f.repositories, f.events.clone());
        let scheduler = scheduler.with_artifact_handler(Arc::new(SlowHandler));
        scheduler.start();

        assert_eq!(scheduler.check_artifacts().await, 1);
        assert_eq!(f.events.count_of("artifact.check_timed_out"), 1);
        assert_eq!(f.events.count_of("artifact.check_complete"), 1);
    }

    fn slow_environment_scheduler(
        f: &Fixture,
        per_environment_timeout: f64,
        delay: Duration,
    ) -> (CheckScheduler, Arc<ScriptedConstraintEvaluator>) {
        let evaluator = Arc::new(ScriptedConstraintEvaluator::stateless("slow").implicit().with_delay(delay));
        let config = engine_config().with_environment_check(batch(10).with_timeout(per_environment_timeout));
        let (scheduler, _) = scheduler_with(
            &f.repositories,
            f.events.clone(),
            config,
            vec![evaluator.clone() as Arc<dyn ConstraintEvaluator>],
        );
        (scheduler, evaluator)
    }

    async fn store_deb_version(f: &Fixture) {
        f.repositories
            .artifacts
            .store_version(&fixtures::deb_version("keeldemo-1.0.1-h1.a1b2c3d"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_environment_timeout_scales_with_environment_count() {
        let f = fixture().await;
        store_deb_version(&f).await;
        // Three environments at 120ms each exceed one environment's 200ms
        // but fit the 600ms the whole config gets.
        let (scheduler, evaluator) = slow_environment_scheduler(&f, 0.2, Duration::from_millis(120));
        scheduler.start();

        assert_eq!(scheduler.check_environments().await, 1);
        assert_eq!(evaluator.calls().len(), 3);
        assert_eq!(f.events.count_of("environment.check_timed_out"), 0);
    }

    #[tokio::test]
    async fn test_environment_timeout_is_reported_and_lease_released() {
        let f = fixture().await;
        store_deb_version(&f).await;
        let (scheduler, evaluator) = slow_environment_scheduler(&f, 0.05, Duration::from_secs(5));
        scheduler.start();

        assert_eq!(scheduler.check_environments().await, 1);
        assert_eq!(f.events.count_of("environment.check_timed_out"), 1);
        assert_eq!(evaluator.calls().len(), 1);

        // Past the minimum age but well inside the lease staleness window: only
        // a released lease lets another instance pick the config up.
        f.clock.advance(Duration::from_secs(61));
        f.scheduler.start();
        assert_eq!(f.scheduler.check_environments().await, 1);
        assert_eq!(f.events.count_of("environment.check_timed_out"), 1);
    }

    #[tokio::test]
    async fn test_resource_timeout_leaves_siblings_to_finish() {
        let f = fixture().await;
        let config = engine_config().with_resource_check(batch(10).with_timeout(0.1));
        let (scheduler, handler) = scheduler_with(&f.repositories, f.events.clone(), config, Vec::new());
        handler.set_delay(fixtures::resource_id("staging"), Duration::from_secs(5));
        scheduler.start();

        assert_eq!(scheduler.check_resources().await, 3);
        assert_eq!(f.events.count_of("resource.check_timed_out"), 1);
        assert_eq!(f.events.count_of("resource.check_completed"), 2);
        let mut created = handler.created();
        created.sort();
        let mut expected = vec![fixtures::resource_id("production"), fixtures::resource_id("test")];
        expected.sort();
        assert_eq!(created, expected);
    }

    #[tokio::test]
    async fn test_agent_runs_only_where_lock_is_taken() {
        let f = fixture().await;
        let agent = Arc::new(CountingAgent::default());
        let (first, _) = scheduler_on(&f.repositories, f.events.clone());
        let (second, _) = scheduler_on(&f.repositories, f.events.clone());
        let first = first.with_agent(agent.clone());
        let second = second.with_agent(agent.clone());
        first.start();
        second.start();

        assert_eq!(first.check_agents().await, 1);
        assert_eq!(second.check_agents().await, 0);
        assert_eq!(agent.invocations.load(Ordering::SeqCst), 1);
        assert_eq!(f.events.count_of("agent.invocation_complete"), 1);
        assert_ne!(first.owner(), second.owner());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture().await;
        let scheduler = Arc::new(f.scheduler);
        scheduler.start();
        let shutdown = Arc::new(CancellationToken::new());

        let running = {
            let scheduler = scheduler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { scheduler.run(&shutdown).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel("test over");

        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(f.handler.created().len(), 3);
    }
}
