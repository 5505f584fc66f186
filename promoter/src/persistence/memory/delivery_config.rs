//! In-memory delivery config repository.

use crate::core::{ConstraintState, ConstraintStatus, DeliveryConfig, VerificationStatus};
use crate::errors::{NotFoundError, Result};
use crate::persistence::{DeliveryConfigRepository, VerificationContext, VerificationState};
use crate::utils::{saturating_sub, Clock, SystemClock, Timestamp};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// (config, environment, version, constraint type)
type StateKey = (String, String, String, String);
/// (config, environment, reference)
type QueueKey = (String, String, String);

#[derive(Debug, Default, Clone)]
struct CheckLease {
    last_checked_at: Option<Timestamp>,
    leased_by: Option<String>,
    leased_at: Option<Timestamp>,
}

#[derive(Debug, Default)]
struct Tables {
    configs: BTreeMap<String, DeliveryConfig>,
    leases: HashMap<String, CheckLease>,
    constraint_states: BTreeMap<StateKey, ConstraintState>,
    queued: BTreeMap<QueueKey, BTreeSet<String>>,
    verification_checks: HashMap<(String, String), Timestamp>,
    verification_states: HashMap<(VerificationContext, String), VerificationState>,
}

impl Tables {
    fn remove_config(&mut self, name: &str) -> bool {
        let existed = self.configs.remove(name).is_some();
        self.leases.remove(name);
        self.constraint_states.retain(|(c, _, _, _), _| c != name);
        self.queued.retain(|(c, _, _), _| c != name);
        self.verification_checks.retain(|(c, _), _| c != name);
        self.verification_states
            .retain(|(context, _), _| context.delivery_config_name != name);
        existed
    }
}

/// Delivery config repository backed by process memory.
#[derive(Debug)]
pub struct InMemoryDeliveryConfigRepository {
    tables: Mutex<Tables>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryDeliveryConfigRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDeliveryConfigRepository {
    /// Creates an empty repository on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty repository on the given clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            clock,
        }
    }
}

#[async_trait]
impl DeliveryConfigRepository for InMemoryDeliveryConfigRepository {
    async fn store(&self, config: &DeliveryConfig) -> Result<()> {
        let mut tables = self.tables.lock();
        tables.configs.insert(config.name.clone(), config.clone());
        tables.leases.entry(config.name.clone()).or_default();
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<DeliveryConfig> {
        self.tables.lock().configs.get(name).cloned().ok_or_else(|| {
            NotFoundError::NoSuchDeliveryConfig {
                name: name.to_string(),
            }
            .into()
        })
    }

    async fn get_by_application(&self, application: &str) -> Result<DeliveryConfig> {
        self.tables
            .lock()
            .configs
            .values()
            .find(|c| c.application == application)
            .cloned()
            .ok_or_else(|| {
                NotFoundError::NoDeliveryConfigForApplication {
                    application: application.to_string(),
                }
                .into()
            })
    }

    async fn delivery_config_for_resource(&self, resource_id: &str) -> Result<DeliveryConfig> {
        self.tables
            .lock()
            .configs
            .values()
            .find(|c| c.environment_of_resource(resource_id).is_some())
            .cloned()
            .ok_or_else(|| {
                NotFoundError::OrphanedResource {
                    id: resource_id.to_string(),
                }
                .into()
            })
    }

    async fn delete_by_name(&self, name: &str) -> Result<()> {
        if self.tables.lock().remove_config(name) {
            debug!(delivery_config = %name, "Deleted delivery config");
            Ok(())
        } else {
            Err(NotFoundError::NoSuchDeliveryConfig {
                name: name.to_string(),
            }
            .into())
        }
    }

    async fn delete_by_application(&self, application: &str) -> Result<()> {
        let name = self.get_by_application(application).await?.name;
        self.delete_by_name(&name).await
    }

    async fn store_constraint_state(&self, state: &ConstraintState) -> Result<()> {
        let key = (
            state.delivery_config_name.clone(),
            state.environment_name.clone(),
            state.artifact_version.clone(),
            state.constraint_type.clone(),
        );
        self.tables.lock().constraint_states.insert(key, state.clone());
        Ok(())
    }

    async fn get_constraint_state(
        &self,
        delivery_config_name: &str,
        environment: &str,
        version: &str,
        constraint_type: &str,
    ) -> Result<Option<ConstraintState>> {
        let key = (
            delivery_config_name.to_string(),
            environment.to_string(),
            version.to_string(),
            constraint_type.to_string(),
        );
        Ok(self.tables.lock().constraint_states.get(&key).cloned())
    }

    async fn pending_constraint_versions(
        &self,
        delivery_config_name: &str,
        environment: &str,
        reference: &str,
    ) -> Result<Vec<String>> {
        let versions: BTreeSet<String> = self
            .tables
            .lock()
            .constraint_states
            .values()
            .filter(|s| {
                s.delivery_config_name == delivery_config_name
                    && s.environment_name == environment
                    && s.artifact_reference == reference
                    && s.status == ConstraintStatus::Pending
            })
            .map(|s| s.artifact_version.clone())
            .collect();
        Ok(versions.into_iter().collect())
    }

    async fn queue_approval(
        &self,
        delivery_config_name: &str,
        reference: &str,
        version: &str,
        environment: &str,
    ) -> Result<()> {
        let key = (
            delivery_config_name.to_string(),
            environment.to_string(),
            reference.to_string(),
        );
        self.tables
            .lock()
            .queued
            .entry(key)
            .or_default()
            .insert(version.to_string());
        Ok(())
    }

    async fn queued_approvals(
        &self,
        delivery_config_name: &str,
        reference: &str,
        environment: &str,
    ) -> Result<Vec<String>> {
        let key = (
            delivery_config_name.to_string(),
            environment.to_string(),
            reference.to_string(),
        );
        Ok(self
            .tables
            .lock()
            .queued
            .get(&key)
            .map(|versions| versions.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_queued_approval(
        &self,
        delivery_config_name: &str,
        reference: &str,
        version: &str,
        environment: &str,
    ) -> Result<()> {
        let key = (
            delivery_config_name.to_string(),
            environment.to_string(),
            reference.to_string(),
        );
        if let Some(versions) = self.tables.lock().queued.get_mut(&key) {
            versions.remove(version);
        }
        Ok(())
    }

    async fn delivery_configs_due_for_check(
        &self,
        owner: &str,
        min_age: Duration,
        lease_staleness: Duration,
        limit: usize,
    ) -> Result<Vec<DeliveryConfig>> {
        let now = self.clock.now();
        let check_cutoff = saturating_sub(now, min_age);
        let lease_cutoff = saturating_sub(now, lease_staleness);
        let mut tables = self.tables.lock();

        let mut due: Vec<(Option<Timestamp>, String)> = tables
            .configs
            .keys()
            .filter_map(|name| {
                let lease = tables.leases.get(name).cloned().unwrap_or_default();
                let stale = lease.last_checked_at.map_or(true, |at| at <= check_cutoff);
                let free = lease.leased_at.map_or(true, |at| at <= lease_cutoff);
                (stale && free).then(|| (lease.last_checked_at, name.clone()))
            })
            .collect();
        due.sort();
        due.truncate(limit);

        let mut result = Vec::with_capacity(due.len());
        for (_, name) in due {
            let lease = tables.leases.entry(name.clone()).or_default();
            if let Some(previous) = lease.leased_by.replace(owner.to_string()) {
                debug!(delivery_config = %name, previous_owner = %previous, owner = %owner, "Reclaiming stale lease");
            }
            lease.leased_at = Some(now);
            if let Some(config) = tables.configs.get(&name) {
                result.push(config.clone());
            }
        }
        Ok(result)
    }

    async fn mark_delivery_config_check_complete(&self, owner: &str, config: &DeliveryConfig) -> Result<bool> {
        let now = self.clock.now();
        let mut tables = self.tables.lock();
        let lease = tables.leases.entry(config.name.clone()).or_default();
        if lease.leased_by.as_deref() != Some(owner) {
            debug!(
                delivery_config = %config.name,
                owner = %owner,
                holder = ?lease.leased_by,
                "Lease no longer held, leaving it in place"
            );
            return Ok(false);
        }
        lease.last_checked_at = Some(now);
        lease.leased_by = None;
        lease.leased_at = None;
        Ok(true)
    }

    async fn environments_due_for_verification(
        &self,
        min_age: Duration,
        limit: usize,
    ) -> Result<Vec<(DeliveryConfig, String)>> {
        let now = self.clock.now();
        let cutoff = saturating_sub(now, min_age);
        let mut tables = self.tables.lock();

        let mut due: Vec<(Option<Timestamp>, (String, String))> = tables
            .configs
            .values()
            .flat_map(|config| {
                config
                    .environments
                    .iter()
                    .filter(|e| !e.verify_with.is_empty())
                    .map(move |e| (config.name.clone(), e.name.clone()))
            })
            .map(|key| (tables.verification_checks.get(&key).copied(), key))
            .filter(|(checked, _)| checked.map_or(true, |at| at <= cutoff))
            .collect();
        due.sort();
        due.truncate(limit);

        let mut result = Vec::with_capacity(due.len());
        for (_, key) in due {
            tables.verification_checks.insert(key.clone(), now);
            if let Some(config) = tables.configs.get(&key.0) {
                result.push((config.clone(), key.1));
            }
        }
        Ok(result)
    }

    async fn get_verification_state(
        &self,
        context: &VerificationContext,
        verification_id: &str,
    ) -> Result<Option<VerificationState>> {
        Ok(self
            .tables
            .lock()
            .verification_states
            .get(&(context.clone(), verification_id.to_string()))
            .cloned())
    }

    async fn update_verification_state(
        &self,
        context: &VerificationContext,
        verification_id: &str,
        status: VerificationStatus,
        metadata: Value,
    ) -> Result<()> {
        let now = self.clock.now();
        let ended_at = status.is_complete().then_some(now);
        self.tables
            .lock()
            .verification_states
            .entry((context.clone(), verification_id.to_string()))
            .and_modify(|state| {
                state.status = status;
                state.ended_at = ended_at;
                state.metadata = metadata.clone();
            })
            .or_insert_with(|| VerificationState {
                status,
                started_at: now,
                ended_at,
                metadata,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PromoterError;
    use crate::testing::{fixtures, MutableClock};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn repository() -> (InMemoryDeliveryConfigRepository, Arc<MutableClock>) {
        let clock = Arc::new(MutableClock::new(Utc.with_ymd_and_hms(2020, 3, 25, 12, 0, 0).unwrap()));
        (InMemoryDeliveryConfigRepository::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_lookups() {
        let (repository, _) = repository();
        let config = fixtures::delivery_config();
        repository.store(&config).await.unwrap();

        assert_eq!(repository.get(&config.name).await.unwrap(), config);
        assert_eq!(repository.get_by_application("keeldemo").await.unwrap().name, config.name);

        let resource_id = fixtures::resource_id("staging");
        assert_eq!(
            repository.delivery_config_for_resource(&resource_id).await.unwrap().name,
            config.name
        );
        let err = repository.delivery_config_for_resource("orphan").await.unwrap_err();
        assert!(matches!(
            err,
            PromoterError::NotFound(NotFoundError::OrphanedResource { .. })
        ));
        assert_eq!(repository.get("missing").await.unwrap_err().status_code(), 404);
    }

    #[tokio::test]
    async fn test_late_completion_keeps_reclaimed_lease() {
        let (repository, clock) = repository();
        let config = fixtures::delivery_config();
        repository.store(&config).await.unwrap();

        let min_age = Duration::from_secs(60);
        let staleness = Duration::from_secs(300);
        repository
            .delivery_configs_due_for_check("slow", min_age, staleness, 10)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(301));
        let reclaimed = repository
            .delivery_configs_due_for_check("fresh", min_age, staleness, 10)
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);

        assert!(!repository.mark_delivery_config_check_complete("slow", &config).await.unwrap());
        clock.advance(Duration::from_secs(120));
        assert!(repository
            .delivery_configs_due_for_check("other", min_age, staleness, 10)
            .await
            .unwrap()
            .is_empty());

        assert!(repository.mark_delivery_config_check_complete("fresh", &config).await.unwrap());
    }

    #[tokio::test]
    async fn test_lease_blocks_other_owners_until_stale() {
        let (repository, clock) = repository();
        let config = fixtures::delivery_config();
        repository.store(&config).await.unwrap();

        let min_age = Duration::from_secs(60);
        let staleness = Duration::from_secs(300);

        let first = repository
            .delivery_configs_due_for_check("a", min_age, staleness, 10)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        clock.advance(Duration::from_secs(120));
        assert!(repository
            .delivery_configs_due_for_check("b", min_age, staleness, 10)
            .await
            .unwrap()
            .is_empty());

        clock.advance(Duration::from_secs(200));
        let reclaimed = repository
            .delivery_configs_due_for_check("b", min_age, staleness, 10)
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);

        assert!(repository.mark_delivery_config_check_complete("b", &config).await.unwrap());
        clock.advance(Duration::from_secs(30));
        assert!(repository
            .delivery_configs_due_for_check("a", min_age, staleness, 10)
            .await
            .unwrap()
            .is_empty());
        clock.advance(Duration::from_secs(31));
        assert_eq!(
            repository
                .delivery_configs_due_for_check("a", min_age, staleness, 10)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_constraint_states_and_queue() {
        let (repository, clock) = repository();
        let config = fixtures::delivery_config();
        repository.store(&config).await.unwrap();

        let state = ConstraintState::pending(&config.name, "production", "keeldemo-deb", "v1", "manual-judgement", clock.now());
        repository.store_constraint_state(&state).await.unwrap();
        assert_eq!(
            repository
                .pending_constraint_versions(&config.name, "production", "keeldemo-deb")
                .await
                .unwrap(),
            vec!["v1".to_string()]
        );

        let passed = state.judged(ConstraintStatus::Pass, "someone", clock.now(), None);
        repository.store_constraint_state(&passed).await.unwrap();
        assert!(repository
            .pending_constraint_versions(&config.name, "production", "keeldemo-deb")
            .await
            .unwrap()
            .is_empty());

        repository.queue_approval(&config.name, "keeldemo-deb", "v1", "production").await.unwrap();
        repository.queue_approval(&config.name, "keeldemo-deb", "v1", "production").await.unwrap();
        assert_eq!(
            repository.queued_approvals(&config.name, "keeldemo-deb", "production").await.unwrap(),
            vec!["v1".to_string()]
        );
        repository
            .delete_queued_approval(&config.name, "keeldemo-deb", "v1", "production")
            .await
            .unwrap();
        assert!(repository
            .queued_approvals(&config.name, "keeldemo-deb", "production")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let (repository, clock) = repository();
        let config = fixtures::delivery_config();
        repository.store(&config).await.unwrap();
        let state = ConstraintState::pending(&config.name, "production", "keeldemo-deb", "v1", "manual-judgement", clock.now());
        repository.store_constraint_state(&state).await.unwrap();
        repository.queue_approval(&config.name, "keeldemo-deb", "v1", "production").await.unwrap();

        repository.delete_by_application("keeldemo").await.unwrap();

        assert!(repository.get(&config.name).await.is_err());
        assert_eq!(
            repository
                .get_constraint_state(&config.name, "production", "v1", "manual-judgement")
                .await
                .unwrap(),
            None
        );
        assert!(repository
            .queued_approvals(&config.name, "keeldemo-deb", "production")
            .await
            .unwrap()
            .is_empty());
        assert!(repository.delete_by_name(&config.name).await.is_err());
    }

    #[tokio::test]
    async fn test_verification_state_lifecycle() {
        let (repository, clock) = repository();
        let config = fixtures::delivery_config_with_verification();
        repository.store(&config).await.unwrap();

        let due = repository
            .environments_due_for_verification(Duration::from_secs(60), 10)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].1, "test");

        let context = VerificationContext {
            delivery_config_name: config.name.clone(),
            environment: "test".to_string(),
            artifact_reference: "keeldemo-deb".to_string(),
            version: "v1".to_string(),
        };
        repository
            .update_verification_state(&context, "smoke", VerificationStatus::Running, Value::Null)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(5));
        repository
            .update_verification_state(&context, "smoke", VerificationStatus::Pass, Value::Null)
            .await
            .unwrap();

        let state = repository.get_verification_state(&context, "smoke").await.unwrap().unwrap();
        assert_eq!(state.status, VerificationStatus::Pass);
        assert!(state.ended_at.is_some_and(|ended| ended > state.started_at));
    }
}
