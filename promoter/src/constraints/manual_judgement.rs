//! Manual judgement: a human approves each version.

use super::{ConstraintEvaluator, StatefulConstraintSupport};
use crate::core::{
    judgement_timeout, ConstraintStatus, DeliveryArtifact, DeliveryConfig, Environment, MANUAL_JUDGEMENT,
};
use crate::errors::Result;
use async_trait::async_trait;
use tracing::{debug, info};

/// Passes once a user approves the version; fails if rejected or left pending too long.
#[derive(Debug, Clone)]
pub struct ManualJudgementConstraintEvaluator {
    support: StatefulConstraintSupport,
}

impl ManualJudgementConstraintEvaluator {
    /// Creates the evaluator.
    #[must_use]
    pub fn new(support: StatefulConstraintSupport) -> Self {
        Self { support }
    }
}

#[async_trait]
impl ConstraintEvaluator for ManualJudgementConstraintEvaluator {
    fn supported_type(&self) -> &str {
        MANUAL_JUDGEMENT
    }

    fn is_stateful(&self) -> bool {
        true
    }

    async fn can_promote(
        &self,
        artifact: &DeliveryArtifact,
        version: &str,
        config: &DeliveryConfig,
        environment: &Environment,
    ) -> Result<bool> {
        let state = self
            .support
            .get_or_create(MANUAL_JUDGEMENT, artifact, version, config, &environment.name)
            .await?;

        if state.status.fails() {
            return Ok(false);
        }

        let timeout = environment.constraint(MANUAL_JUDGEMENT).and_then(judgement_timeout);
        if let Some(timeout) = timeout {
            if state.timed_out(timeout, self.support.clock().now()) {
                info!(
                    environment = %environment.name,
                    version = %version,
                    "Manual judgement timed out"
                );
                let previous = state.status;
                let mut failed = state;
                failed.status = ConstraintStatus::Fail;
                failed.comment = Some(format!("Timed out after {timeout:?}"));
                self.support.store(Some(previous), &failed).await?;
                return Ok(false);
            }
        }

        debug!(environment = %environment.name, version = %version, status = %state.status, "Manual judgement");
        Ok(state.status.passes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::persistence::{DeliveryConfigRepository, InMemoryDeliveryConfigRepository};
    use crate::testing::{fixtures, MutableClock};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        evaluator: ManualJudgementConstraintEvaluator,
        support: StatefulConstraintSupport,
        repository: Arc<InMemoryDeliveryConfigRepository>,
        events: Arc<CollectingEventSink>,
        clock: Arc<MutableClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(MutableClock::new(Utc.with_ymd_and_hms(2020, 3, 25, 12, 0, 0).unwrap()));
        let repository = Arc::new(InMemoryDeliveryConfigRepository::with_clock(clock.clone()));
        let events = Arc::new(CollectingEventSink::new());
        let support = StatefulConstraintSupport::new(repository.clone(), events.clone(), clock.clone());
        Fixture {
            evaluator: ManualJudgementConstraintEvaluator::new(support.clone()),
            support,
            repository,
            events,
            clock,
        }
    }

    #[tokio::test]
    async fn test_first_check_creates_pending_state() {
        let f = fixture();
        let config = fixtures::delivery_config();
        let production = config.environment("production").unwrap();

        assert!(!f
            .evaluator
            .can_promote(&fixtures::keeldemo_deb(), "v1", &config, production)
            .await
            .unwrap());

        let state = f
            .repository
            .get_constraint_state(&config.name, "production", "v1", MANUAL_JUDGEMENT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.status, ConstraintStatus::Pending);
        assert_eq!(f.events.count_of("constraint.state_changed"), 1);
    }

    #[tokio::test]
    async fn test_approval_passes_and_rejection_fails() {
        let f = fixture();
        let config = fixtures::delivery_config();
        let production = config.environment("production").unwrap();
        let artifact = fixtures::keeldemo_deb();

        f.support
            .judge(&config, "production", &artifact, "v1", MANUAL_JUDGEMENT, ConstraintStatus::OverridePass, "someone", None)
            .await
            .unwrap();
        assert!(f.evaluator.can_promote(&artifact, "v1", &config, production).await.unwrap());

        f.support
            .judge(&config, "production", &artifact, "v2", MANUAL_JUDGEMENT, ConstraintStatus::Fail, "someone", None)
            .await
            .unwrap();
        assert!(!f.evaluator.can_promote(&artifact, "v2", &config, production).await.unwrap());
    }

    #[tokio::test]
    async fn test_pending_judgement_times_out() {
        let f = fixture();
        let config = fixtures::delivery_config();
        let production = config.environment("production").unwrap();
        let artifact = fixtures::keeldemo_deb();

        assert!(!f.evaluator.can_promote(&artifact, "v1", &config, production).await.unwrap());
        f.clock.advance(Duration::from_secs(3601));
        assert!(!f.evaluator.can_promote(&artifact, "v1", &config, production).await.unwrap());

        let state = f
            .repository
            .get_constraint_state(&config.name, "production", "v1", MANUAL_JUDGEMENT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.status, ConstraintStatus::Fail);
        assert!(state.comment.unwrap().starts_with("Timed out after"));
        assert_eq!(f.events.count_of("constraint.state_changed"), 2);
    }
}
