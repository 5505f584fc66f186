//! In-memory resource repository with event history.

use crate::core::{DeliveryEvent, Resource, ResourceHistoryKind};
use crate::errors::{NotFoundError, Result};
use crate::persistence::{ResourceHistoryEntry, ResourceRepository};
use crate::utils::{saturating_sub, Clock, SystemClock, Timestamp};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct StoredResource {
    resource: Resource,
    last_checked: Option<Timestamp>,
}

/// Resource repository backed by process memory.
#[derive(Debug)]
pub struct InMemoryResourceRepository {
    resources: Mutex<HashMap<String, StoredResource>>,
    history: DashMap<String, Vec<ResourceHistoryEntry>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryResourceRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryResourceRepository {
    /// Creates an empty repository on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty repository on the given clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            resources: Mutex::new(HashMap::new()),
            history: DashMap::new(),
            clock,
        }
    }
}

#[async_trait]
impl ResourceRepository for InMemoryResourceRepository {
    async fn store(&self, resource: &Resource) -> Result<()> {
        let mut resources = self.resources.lock();
        let last_checked = resources.get(&resource.id).and_then(|r| r.last_checked);
        resources.insert(
            resource.id.clone(),
            StoredResource {
                resource: resource.clone(),
                last_checked,
            },
        );
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Resource> {
        self.resources
            .lock()
            .get(id)
            .map(|r| r.resource.clone())
            .ok_or_else(|| NotFoundError::NoSuchResource { id: id.to_string() }.into())
    }

    async fn has(&self, id: &str) -> Result<bool> {
        Ok(self.resources.lock().contains_key(id))
    }

    async fn get_by_application(&self, application: &str) -> Result<Vec<Resource>> {
        let mut found: Vec<Resource> = self
            .resources
            .lock()
            .values()
            .filter(|r| r.resource.application() == application)
            .map(|r| r.resource.clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if self.resources.lock().remove(id).is_none() {
            return Err(NotFoundError::NoSuchResource { id: id.to_string() }.into());
        }
        self.history.remove(id);
        Ok(())
    }

    async fn resources_due_for_check(&self, min_age: Duration, limit: usize) -> Result<Vec<Resource>> {
        let now = self.clock.now();
        let cutoff = saturating_sub(now, min_age);
        let mut resources = self.resources.lock();

        let mut due: Vec<(Option<Timestamp>, String)> = resources
            .values()
            .filter(|r| r.last_checked.map_or(true, |at| at <= cutoff))
            .map(|r| (r.last_checked, r.resource.id.clone()))
            .collect();
        due.sort();
        due.truncate(limit);

        Ok(due
            .into_iter()
            .filter_map(|(_, id)| {
                let stored = resources.get_mut(&id)?;
                stored.last_checked = Some(now);
                Some(stored.resource.clone())
            })
            .collect())
    }

    async fn append_history(&self, event: &DeliveryEvent) -> Result<()> {
        let Some((id, kind)) = event.history_entry() else {
            return Ok(());
        };
        let entry = ResourceHistoryEntry {
            kind,
            at: self.clock.now(),
            event: event.to_data(),
        };
        self.history.entry(id.to_string()).or_default().push(entry);
        Ok(())
    }

    async fn event_history(&self, id: &str, limit: usize) -> Result<Vec<ResourceHistoryEntry>> {
        if !self.has(id).await? {
            return Err(NotFoundError::NoSuchResource { id: id.to_string() }.into());
        }
        Ok(self
            .history
            .get(id)
            .map(|entries| entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn last_event(&self, id: &str) -> Result<Option<ResourceHistoryKind>> {
        Ok(self
            .history
            .get(id)
            .and_then(|entries| entries.last().map(|e| e.kind)))
    }
}
