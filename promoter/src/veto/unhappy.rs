//! Stops the engine from flapping on a resource it cannot fix.

use super::{Veto, VetoResponse};
use crate::config::UnhappyVetoConfig;
use crate::core::Resource;
use crate::errors::Result;
use crate::persistence::{DiffFingerprintRepository, UnhappyVetoRepository};
use crate::utils::{saturating_add, Clock, Timestamp};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const NAME: &str = "UnhappyVeto";

/// Denies checks of a resource once the same diff has survived more than
/// `max_diff_count` corrective actions, letting one check through every
/// `waiting_time`. A zero waiting time blocks until the diff changes.
pub struct UnhappyVeto {
    fingerprints: Arc<dyn DiffFingerprintRepository>,
    unhappy: Arc<dyn UnhappyVetoRepository>,
    config: UnhappyVetoConfig,
    clock: Arc<dyn Clock>,
}

impl UnhappyVeto {
    /// Creates the veto.
    #[must_use]
    pub fn new(
        fingerprints: Arc<dyn DiffFingerprintRepository>,
        unhappy: Arc<dyn UnhappyVetoRepository>,
        config: UnhappyVetoConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fingerprints,
            unhappy,
            config,
            clock,
        }
    }

    fn recheck_time(&self) -> Option<Timestamp> {
        let wait = self.config.waiting_time();
        (!wait.is_zero()).then(|| saturating_add(self.clock.now(), wait))
    }

    fn message(&self) -> String {
        let max = self.config.max_diff_count;
        let wait = self.config.waiting_time();
        if wait.is_zero() {
            format!(
                "Resource is unhappy and our {max} actions have not fixed it. Resource will remain paused \
                 until the diff changes or the resource is manually unpaused."
            )
        } else {
            format!(
                "Resource is unhappy and our {max} actions have not fixed it. We will try again after \
                 {wait:?}, or if the diff changes."
            )
        }
    }
}

#[async_trait]
impl Veto for UnhappyVeto {
    fn name(&self) -> &str {
        NAME
    }

    async fn check(&self, resource: &Resource) -> Result<VetoResponse> {
        if self.fingerprints.action_taken_count(&resource.id).await? <= self.config.max_diff_count {
            self.unhappy.mark_happy(&resource.id).await?;
            return Ok(VetoResponse::allowed(NAME));
        }

        let Some(record) = self.unhappy.get(&resource.id).await? else {
            self.unhappy
                .mark_unhappy(&resource.id, resource.application(), self.recheck_time())
                .await?;
            debug!(resource_id = %resource.id, "Resource is unhappy; denying check");
            return Ok(VetoResponse::denied(NAME, self.message()));
        };

        match record.recheck_time {
            Some(recheck) if recheck <= self.clock.now() => {
                debug!(resource_id = %resource.id, "Recheck time passed; allowing one check");
                self.unhappy
                    .mark_unhappy(&resource.id, resource.application(), self.recheck_time())
                    .await?;
                Ok(VetoResponse::allowed(NAME))
            }
            _ => {
                debug!(resource_id = %resource.id, recheck = ?record.recheck_time, "Resource is unhappy; denying check");
                Ok(VetoResponse::denied(NAME, self.message()))
            }
        }
    }

    async fn current_rejections(&self) -> Result<Vec<String>> {
        Ok(self
            .unhappy
            .get_all()
            .await?
            .into_iter()
            .map(|record| record.resource_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ResourceDiff;
    use crate::persistence::{InMemoryDiffFingerprintRepository, InMemoryUnhappyVetoRepository};
    use crate::testing::{fixtures, MutableClock};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        veto: UnhappyVeto,
        fingerprints: Arc<InMemoryDiffFingerprintRepository>,
        clock: Arc<MutableClock>,
        resource: Resource,
    }

    async fn fixture(waiting_time_seconds: f64) -> Fixture {
        let clock = Arc::new(MutableClock::new(Utc.with_ymd_and_hms(2020, 3, 25, 12, 0, 0).unwrap()));
        let fingerprints = Arc::new(InMemoryDiffFingerprintRepository::new());
        let unhappy = Arc::new(InMemoryUnhappyVetoRepository::new());
        let config = UnhappyVetoConfig {
            max_diff_count: 2,
            waiting_time_seconds,
        };
        let resource = fixtures::resource("test");
        let diff = ResourceDiff::new(json!({"max": 3}), Some(json!({"max": 2})));
        fingerprints.store(&resource.id, &diff).await.unwrap();
        Fixture {
            veto: UnhappyVeto::new(fingerprints.clone(), unhappy, config, clock.clone()),
            fingerprints,
            clock,
            resource,
        }
    }

    impl Fixture {
        async fn act(&self, times: usize) {
            for _ in 0..times {
                self.fingerprints.mark_action_taken(&self.resource.id).await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_allows_until_too_many_actions() {
        let f = fixture(600.0).await;
        f.act(2).await;
        assert!(f.veto.check(&f.resource).await.unwrap().allowed);

        f.act(1).await;
        let response = f.veto.check(&f.resource).await.unwrap();
        assert!(!response.allowed);
        assert!(response.veto_artifact);
        assert_eq!(f.veto.current_rejections().await.unwrap(), vec![f.resource.id.clone()]);
    }

    #[tokio::test]
    async fn test_allows_one_check_after_waiting_time() {
        let f = fixture(600.0).await;
        f.act(3).await;
        assert!(!f.veto.check(&f.resource).await.unwrap().allowed);

        f.clock.advance(Duration::from_secs(300));
        assert!(!f.veto.check(&f.resource).await.unwrap().allowed);

        f.clock.advance(Duration::from_secs(301));
        assert!(f.veto.check(&f.resource).await.unwrap().allowed);
        assert!(!f.veto.check(&f.resource).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_zero_wait_blocks_until_diff_changes() {
        let f = fixture(0.0).await;
        f.act(3).await;
        assert!(!f.veto.check(&f.resource).await.unwrap().allowed);
        f.clock.advance(Duration::from_secs(86_400));
        let response = f.veto.check(&f.resource).await.unwrap();
        assert!(!response.allowed);
        assert!(response.message.unwrap().contains("until the diff changes"));

        let changed = ResourceDiff::new(json!({"max": 4}), Some(json!({"max": 2})));
        f.fingerprints.store(&f.resource.id, &changed).await.unwrap();
        assert!(f.veto.check(&f.resource).await.unwrap().allowed);
        assert!(f.veto.current_rejections().await.unwrap().is_empty());
    }
}
