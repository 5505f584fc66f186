//! In-memory stores for diff fingerprints, unhappy resources, pauses and agent locks.

use crate::core::ResourceDiff;
use crate::errors::Result;
use crate::persistence::{
    AgentLockRepository, DiffFingerprintRepository, PausedRepository, UnhappyRecord,
    UnhappyVetoRepository,
};
use crate::utils::{saturating_add, Clock, SystemClock, Timestamp};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Fingerprint {
    hash: String,
    count: u64,
}

/// Tracks how many corrective actions were taken against the same diff.
#[derive(Debug, Default)]
pub struct InMemoryDiffFingerprintRepository {
    fingerprints: DashMap<String, Fingerprint>,
}

impl InMemoryDiffFingerprintRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DiffFingerprintRepository for InMemoryDiffFingerprintRepository {
    async fn store(&self, resource_id: &str, diff: &ResourceDiff) -> Result<()> {
        let hash = diff.fingerprint();
        self.fingerprints
            .entry(resource_id.to_string())
            .and_modify(|existing| {
                if existing.hash != hash {
                    existing.hash.clone_from(&hash);
                    existing.count = 0;
                }
            })
            .or_insert_with(|| Fingerprint {
                hash: hash.clone(),
                count: 0,
            });
        Ok(())
    }

    async fn action_taken_count(&self, resource_id: &str) -> Result<u64> {
        Ok(self.fingerprints.get(resource_id).map_or(0, |f| f.count))
    }

    async fn mark_action_taken(&self, resource_id: &str) -> Result<()> {
        if let Some(mut fingerprint) = self.fingerprints.get_mut(resource_id) {
            fingerprint.count += 1;
        }
        Ok(())
    }

    async fn clear(&self, resource_id: &str) -> Result<()> {
        self.fingerprints.remove(resource_id);
        Ok(())
    }
}

/// Unhappy resources.
#[derive(Debug, Default)]
pub struct InMemoryUnhappyVetoRepository {
    records: DashMap<String, UnhappyRecord>,
}

impl InMemoryUnhappyVetoRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UnhappyVetoRepository for InMemoryUnhappyVetoRepository {
    async fn mark_unhappy(&self, resource_id: &str, application: &str, recheck_time: Option<Timestamp>) -> Result<()> {
        self.records.insert(
            resource_id.to_string(),
            UnhappyRecord {
                resource_id: resource_id.to_string(),
                application: application.to_string(),
                recheck_time,
            },
        );
        Ok(())
    }

    async fn mark_happy(&self, resource_id: &str) -> Result<()> {
        self.records.remove(resource_id);
        Ok(())
    }

    async fn get(&self, resource_id: &str) -> Result<Option<UnhappyRecord>> {
        Ok(self.records.get(resource_id).map(|r| r.clone()))
    }

    async fn get_all(&self) -> Result<Vec<UnhappyRecord>> {
        let mut records: Vec<UnhappyRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        Ok(records)
    }
}

/// Paused applications and resources.
#[derive(Debug, Default)]
pub struct InMemoryPausedRepository {
    applications: DashSet<String>,
    resources: DashSet<String>,
}

impl InMemoryPausedRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PausedRepository for InMemoryPausedRepository {
    async fn pause_application(&self, application: &str) -> Result<()> {
        self.applications.insert(application.to_string());
        Ok(())
    }

    async fn resume_application(&self, application: &str) -> Result<()> {
        self.applications.remove(application);
        Ok(())
    }

    async fn is_application_paused(&self, application: &str) -> Result<bool> {
        Ok(self.applications.contains(application))
    }

    async fn pause_resource(&self, resource_id: &str) -> Result<()> {
        self.resources.insert(resource_id.to_string());
        Ok(())
    }

    async fn resume_resource(&self, resource_id: &str) -> Result<()> {
        self.resources.remove(resource_id);
        Ok(())
    }

    async fn is_resource_paused(&self, resource_id: &str) -> Result<bool> {
        Ok(self.resources.contains(resource_id))
    }

    async fn paused_applications(&self) -> Result<Vec<String>> {
        let mut applications: Vec<String> = self.applications.iter().map(|a| a.key().clone()).collect();
        applications.sort();
        Ok(applications)
    }
}

/// Expiring named locks.
#[derive(Debug)]
pub struct InMemoryAgentLockRepository {
    locks: Mutex<HashMap<String, Timestamp>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryAgentLockRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAgentLockRepository {
    /// Creates a lock table on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a lock table on the given clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

#[async_trait]
impl AgentLockRepository for InMemoryAgentLockRepository {
    async fn try_acquire_lock(&self, name: &str, timeout: Duration) -> Result<bool> {
        let now = self.clock.now();
        let mut locks = self.locks.lock();
        if locks.get(name).is_some_and(|expires| *expires > now) {
            return Ok(false);
        }
        locks.insert(name.to_string(), saturating_add(now, timeout));
        Ok(true)
    }
}
