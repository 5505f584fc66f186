//! In-memory artifact store.

use crate::core::{
    ActionMetadata, ArtifactSummaryInEnvironment, ArtifactType, ArtifactVersionStatus,
    ArtifactVersions, DeliveryArtifact, DeliveryConfig, EnvironmentArtifactPin,
    EnvironmentArtifactVeto, EnvironmentArtifactVetoes, EnvironmentSummary, PromotionStatus,
    PublishedArtifact, VersionSorter,
};
use crate::errors::{NotFoundError, PromoterError, Result};
use crate::persistence::ArtifactRepository;
use crate::utils::{saturating_sub, Clock, SystemClock, Timestamp};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// (name, type, delivery config, reference)
type ArtifactKey = (String, ArtifactType, String, String);
/// (delivery config, environment, reference)
type EnvKey = (String, String, String);

#[derive(Debug, Clone)]
struct PromotionRow {
    status: PromotionStatus,
    approved_at: Option<Timestamp>,
    deployed_at: Option<Timestamp>,
    deploy_seq: u64,
    replaced_by: Option<String>,
    replaced_at: Option<Timestamp>,
    promotion_reference: Option<String>,
}

impl PromotionRow {
    fn new(status: PromotionStatus) -> Self {
        Self {
            status,
            approved_at: None,
            deployed_at: None,
            deploy_seq: 0,
            replaced_by: None,
            replaced_at: None,
            promotion_reference: None,
        }
    }

    fn replace(&mut self, status: PromotionStatus, by: &str, at: Timestamp) {
        self.status = status;
        self.replaced_by = Some(by.to_string());
        self.replaced_at = Some(at);
    }
}

#[derive(Debug, Clone)]
struct VetoRecord {
    vetoed_at: Timestamp,
    vetoed_by: Option<String>,
    comment: Option<String>,
}

#[derive(Debug, Default)]
struct Tables {
    artifacts: BTreeMap<ArtifactKey, DeliveryArtifact>,
    last_checked: HashMap<ArtifactKey, Timestamp>,
    versions: HashMap<(String, ArtifactType), BTreeMap<String, PublishedArtifact>>,
    promotions: HashMap<EnvKey, BTreeMap<String, PromotionRow>>,
    pins: BTreeMap<EnvKey, EnvironmentArtifactPin>,
    vetoes: BTreeMap<EnvKey, BTreeMap<String, VetoRecord>>,
    deploy_seq: u64,
}

fn artifact_key(artifact: &DeliveryArtifact) -> ArtifactKey {
    (
        artifact.name.clone(),
        artifact.artifact_type,
        artifact.config_name().to_string(),
        artifact.reference.clone(),
    )
}

fn no_such_artifact(name: &str, artifact_type: ArtifactType) -> PromoterError {
    NotFoundError::NoSuchArtifact {
        name: name.to_string(),
        artifact_type: artifact_type.to_string(),
    }
    .into()
}

fn artifact_not_found(reference: &str, delivery_config: &str) -> PromoterError {
    NotFoundError::ArtifactNotFound {
        reference: reference.to_string(),
        delivery_config: delivery_config.to_string(),
    }
    .into()
}

impl Tables {
    fn by_reference(&self, delivery_config: &str, reference: &str) -> Result<&DeliveryArtifact> {
        self.artifacts
            .values()
            .find(|a| a.config_name() == delivery_config && a.reference == reference)
            .ok_or_else(|| artifact_not_found(reference, delivery_config))
    }

    fn env_key(&self, config: &DeliveryConfig, reference: &str, environment: &str) -> Result<EnvKey> {
        if config.environment(environment).is_none() {
            return Err(NotFoundError::NoSuchEnvironment {
                delivery_config: config.name.clone(),
                environment: environment.to_string(),
            }
            .into());
        }
        self.by_reference(&config.name, reference)?;
        Ok((config.name.clone(), environment.to_string(), reference.to_string()))
    }

    fn published(&self, artifact: &DeliveryArtifact, version: &str) -> PublishedArtifact {
        self.versions
            .get(&(artifact.name.clone(), artifact.artifact_type))
            .and_then(|versions| versions.get(version))
            .cloned()
            .unwrap_or_else(|| PublishedArtifact::new(&artifact.name, artifact.artifact_type, version))
    }

    /// Versions passing the artifact's filters, newest first.
    fn sorted_versions(&self, artifact: &DeliveryArtifact) -> Result<Vec<PublishedArtifact>> {
        let known = self
            .versions
            .get(&(artifact.name.clone(), artifact.artifact_type))
            .ok_or_else(|| no_such_artifact(&artifact.name, artifact.artifact_type))?;
        let sorter = VersionSorter::for_strategy(&artifact.versioning)?;
        let candidates = known.values().filter(|v| artifact.accepts(v)).cloned().collect();
        Ok(sorter.sort(candidates))
    }

    fn newest<'a>(
        &self,
        artifact: &DeliveryArtifact,
        versions: impl IntoIterator<Item = &'a String>,
    ) -> Result<Option<String>> {
        let sorter = VersionSorter::for_strategy(&artifact.versioning)?;
        let published = versions.into_iter().map(|v| self.published(artifact, v)).collect();
        Ok(sorter.sort(published).into_iter().next().map(|p| p.version))
    }

    fn rows(&self, key: &EnvKey) -> Option<&BTreeMap<String, PromotionRow>> {
        self.promotions.get(key)
    }

    fn row(&self, key: &EnvKey, version: &str) -> Option<&PromotionRow> {
        self.rows(key).and_then(|rows| rows.get(version))
    }
}

/// Artifact repository backed by process memory.
///
/// All tables sit behind one lock, so every operation is a single atomic
/// read-modify-write and concurrent checks of the same (environment,
/// artifact) pair cannot interleave.
#[derive(Debug)]
pub struct InMemoryArtifactRepository {
    tables: Mutex<Tables>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryArtifactRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryArtifactRepository {
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
impl ArtifactRepository for InMemoryArtifactRepository {
    async fn register(&self, artifact: &DeliveryArtifact) -> Result<()> {
        if artifact.delivery_config_name.is_none() {
            return Err(PromoterError::internal(format!(
                "Cannot register artifact with no delivery config name: {artifact}"
            )));
        }
        // Rejects strategies whose regex cannot compile before anything is stored.
        VersionSorter::for_strategy(&artifact.versioning)?;

        let mut tables = self.tables.lock();
        let key = artifact_key(artifact);
        if tables.artifacts.insert(key, artifact.clone()).is_some() {
            info!(artifact = %artifact, "Artifact registration: updating");
        } else {
            info!(artifact = %artifact, "Artifact registration: creating");
        }
        tables
            .versions
            .entry((artifact.name.clone(), artifact.artifact_type))
            .or_default();
        Ok(())
    }

    async fn get(
        &self,
        name: &str,
        artifact_type: ArtifactType,
        delivery_config_name: &str,
        reference: &str,
    ) -> Result<DeliveryArtifact> {
        let key = (
            name.to_string(),
            artifact_type,
            delivery_config_name.to_string(),
            reference.to_string(),
        );
        self.tables
            .lock()
            .artifacts
            .get(&key)
            .cloned()
            .ok_or_else(|| artifact_not_found(reference, delivery_config_name))
    }

    async fn get_by_reference(&self, delivery_config_name: &str, reference: &str) -> Result<DeliveryArtifact> {
        self.tables
            .lock()
            .by_reference(delivery_config_name, reference)
            .cloned()
    }

    async fn get_all(&self) -> Result<Vec<DeliveryArtifact>> {
        Ok(self.tables.lock().artifacts.values().cloned().collect())
    }

    async fn is_registered(&self, name: &str, artifact_type: ArtifactType) -> Result<bool> {
        Ok(self
            .tables
            .lock()
            .versions
            .contains_key(&(name.to_string(), artifact_type)))
    }

    async fn delete(&self, artifact: &DeliveryArtifact) -> Result<()> {
        let mut tables = self.tables.lock();
        let key = artifact_key(artifact);
        tables.artifacts.remove(&key);
        tables.last_checked.remove(&key);

        let config = artifact.config_name().to_string();
        let matches = |k: &EnvKey| k.0 == config && k.2 == artifact.reference;
        tables.promotions.retain(|k, _| !matches(k));
        tables.pins.retain(|k, _| !matches(k));
        tables.vetoes.retain(|k, _| !matches(k));

        let still_used = tables
            .artifacts
            .values()
            .any(|a| a.name == artifact.name && a.artifact_type == artifact.artifact_type);
        if !still_used {
            tables
                .versions
                .remove(&(artifact.name.clone(), artifact.artifact_type));
        }
        Ok(())
    }

    async fn store_version(&self, version: &PublishedArtifact) -> Result<bool> {
        let mut tables = self.tables.lock();
        let known = tables
            .versions
            .get_mut(&(version.name.clone(), version.artifact_type))
            .ok_or_else(|| no_such_artifact(&version.name, version.artifact_type))?;
        if known.contains_key(&version.version) {
            return Ok(false);
        }
        known.insert(version.version.clone(), version.clone());
        Ok(true)
    }

    async fn get_artifact_version(
        &self,
        artifact: &DeliveryArtifact,
        version: &str,
    ) -> Result<Option<PublishedArtifact>> {
        Ok(self
            .tables
            .lock()
            .versions
            .get(&(artifact.name.clone(), artifact.artifact_type))
            .and_then(|versions| versions.get(version))
            .cloned())
    }

    async fn versions(&self, artifact: &DeliveryArtifact) -> Result<Vec<String>> {
        let tables = self.tables.lock();
        Ok(tables
            .sorted_versions(artifact)?
            .into_iter()
            .map(|v| v.version)
            .collect())
    }

    async fn approve_version_for(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> Result<bool> {
        let now = self.clock.now();
        let mut tables = self.tables.lock();
        let key = tables.env_key(config, &artifact.reference, environment)?;
        let rows = tables.promotions.entry(key).or_default();
        if rows.contains_key(version) {
            return Ok(false);
        }
        let mut row = PromotionRow::new(PromotionStatus::Approved);
        row.approved_at = Some(now);
        rows.insert(version.to_string(), row);
        Ok(true)
    }

    async fn is_approved_for(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> Result<bool> {
        let tables = self.tables.lock();
        let key = tables.env_key(config, &artifact.reference, environment)?;
        Ok(tables
            .row(&key, version)
            .is_some_and(|row| row.approved_at.is_some() && row.status != PromotionStatus::Vetoed))
    }

    async fn mark_as_deploying_to(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut tables = self.tables.lock();
        let key = tables.env_key(config, &artifact.reference, environment)?;
        let rows = tables.promotions.entry(key).or_default();

        let stuck: Vec<String> = rows
            .iter()
            .filter(|(v, row)| row.status == PromotionStatus::Deploying && v.as_str() != version)
            .map(|(v, _)| v.clone())
            .collect();
        if !stuck.is_empty() {
            error!(
                stuck = ?stuck,
                artifact = %artifact.reference,
                delivery_config = %config.name,
                version = %version,
                "Stuck deploying versions found when deploying a newer version"
            );
        }
        for stuck_version in &stuck {
            if let Some(row) = rows.get_mut(stuck_version) {
                row.replace(PromotionStatus::Skipped, version, now);
            }
        }

        rows.entry(version.to_string())
            .or_insert_with(|| PromotionRow::new(PromotionStatus::Deploying))
            .status = PromotionStatus::Deploying;
        Ok(())
    }

    async fn was_successfully_deployed_to(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> Result<bool> {
        let tables = self.tables.lock();
        let key = tables.env_key(config, &artifact.reference, environment)?;
        Ok(tables
            .row(&key, version)
            .is_some_and(|row| row.status.was_deployed()))
    }

    async fn is_currently_deployed_to(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> Result<bool> {
        let tables = self.tables.lock();
        let key = tables.env_key(config, &artifact.reference, environment)?;
        Ok(tables
            .row(&key, version)
            .is_some_and(|row| row.status == PromotionStatus::Current))
    }

    async fn current_version_in(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        environment: &str,
    ) -> Result<Option<String>> {
        let tables = self.tables.lock();
        let key = tables.env_key(config, &artifact.reference, environment)?;
        Ok(tables.rows(&key).and_then(|rows| {
            rows.iter()
                .find(|(_, row)| row.status == PromotionStatus::Current)
                .map(|(v, _)| v.clone())
        }))
    }

    async fn mark_as_successfully_deployed_to(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut tables = self.tables.lock();
        let key = tables.env_key(config, &artifact.reference, environment)?;

        let sorter = VersionSorter::for_strategy(&artifact.versioning)?;
        let deployed = tables.published(artifact, version);
        let approved_but_old: Vec<String> = tables
            .rows(&key)
            .map(|rows| {
                rows.iter()
                    .filter(|(_, row)| row.status == PromotionStatus::Approved)
                    .filter(|(v, _)| sorter.is_older(&tables.published(artifact, v), &deployed))
                    .map(|(v, _)| v.clone())
                    .collect()
            })
            .unwrap_or_default();

        tables.deploy_seq += 1;
        let seq = tables.deploy_seq;
        let rows = tables.promotions.entry(key).or_default();

        for (v, row) in rows.iter_mut() {
            if v == version {
                continue;
            }
            match row.status {
                PromotionStatus::Current => row.replace(PromotionStatus::Previous, version, now),
                PromotionStatus::Deploying => row.replace(PromotionStatus::Skipped, version, now),
                _ => {}
            }
        }
        for old in &approved_but_old {
            if let Some(row) = rows.get_mut(old) {
                row.replace(PromotionStatus::Skipped, version, now);
            }
        }

        let row = rows
            .entry(version.to_string())
            .or_insert_with(|| PromotionRow::new(PromotionStatus::Current));
        row.status = PromotionStatus::Current;
        row.deployed_at = Some(now);
        row.deploy_seq = seq;
        Ok(())
    }

    async fn latest_version_approved_in(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        environment: &str,
    ) -> Result<Option<String>> {
        let tables = self.tables.lock();
        let key = tables.env_key(config, &artifact.reference, environment)?;
        if let Some(pin) = tables.pins.get(&key) {
            return Ok(Some(pin.version.clone()));
        }
        let Some(rows) = tables.rows(&key) else {
            return Ok(None);
        };
        let approved = rows
            .iter()
            .filter(|(_, row)| row.approved_at.is_some() && row.status != PromotionStatus::Vetoed)
            .map(|(v, _)| v);
        tables.newest(artifact, approved)
    }

    async fn mark_as_vetoed_in(
        &self,
        config: &DeliveryConfig,
        veto: &EnvironmentArtifactVeto,
        force: bool,
    ) -> Result<bool> {
        let now = self.clock.now();
        let mut tables = self.tables.lock();
        let key = tables.env_key(config, &veto.reference, &veto.target_environment)?;

        if tables.pins.get(&key).is_some_and(|pin| pin.version == veto.version) {
            warn!(
                delivery_config = %config.name,
                environment = %veto.target_environment,
                version = %veto.version,
                "Pinned artifact version cannot be vetoed"
            );
            return Ok(false);
        }

        if let Some(reference) = tables
            .row(&key, &veto.version)
            .and_then(|row| row.promotion_reference.as_ref())
        {
            if !force {
                warn!(
                    delivery_config = %config.name,
                    environment = %veto.target_environment,
                    version = %veto.version,
                    prior_version_reference = %reference,
                    "Not vetoing artifact version as it appears to have already been an automated rollback target"
                );
                return Ok(false);
            }
        }

        let prior = tables.rows(&key).and_then(|rows| {
            rows.iter()
                .filter(|(v, row)| {
                    v.as_str() != veto.version
                        && row.deployed_at.is_some()
                        && row.status != PromotionStatus::Vetoed
                })
                .max_by_key(|(_, row)| (row.deployed_at, row.deploy_seq))
                .map(|(v, _)| v.clone())
        });

        let rows = tables.promotions.entry(key.clone()).or_default();
        let row = rows
            .entry(veto.version.clone())
            .or_insert_with(|| PromotionRow::new(PromotionStatus::Vetoed));
        row.status = PromotionStatus::Vetoed;
        row.promotion_reference = Some(prior.clone().unwrap_or_else(|| veto.version.clone()));

        if let Some(prior) = &prior {
            if let Some(prior_row) = rows.get_mut(prior) {
                prior_row.promotion_reference = Some(veto.version.clone());
            }
        }

        tables.vetoes.entry(key).or_default().insert(
            veto.version.clone(),
            VetoRecord {
                vetoed_at: now,
                vetoed_by: veto.vetoed_by.clone(),
                comment: veto.comment.clone(),
            },
        );
        Ok(true)
    }

    async fn delete_veto(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut tables = self.tables.lock();
        let key = tables.env_key(config, &artifact.reference, environment)?;

        let reference = tables
            .row(&key, version)
            .and_then(|row| row.promotion_reference.clone());
        let points_back = reference
            .as_ref()
            .and_then(|r| tables.row(&key, r))
            .and_then(|row| row.promotion_reference.as_deref())
            == Some(version);

        if let Some(rows) = tables.promotions.get_mut(&key) {
            if let Some(row) = rows.get_mut(version) {
                row.status = PromotionStatus::Approved;
                row.promotion_reference = None;
                row.approved_at.get_or_insert(now);
            }
            if points_back {
                if let Some(linked) = reference.as_ref().and_then(|r| rows.get_mut(r)) {
                    linked.promotion_reference = None;
                }
            }
        }
        if let Some(vetoes) = tables.vetoes.get_mut(&key) {
            vetoes.remove(version);
        }
        Ok(())
    }

    async fn vetoed_environment_versions(&self, config: &DeliveryConfig) -> Result<Vec<EnvironmentArtifactVetoes>> {
        let tables = self.tables.lock();
        Ok(tables
            .vetoes
            .iter()
            .filter(|((c, _, _), versions)| *c == config.name && !versions.is_empty())
            .map(|((_, environment, reference), versions)| EnvironmentArtifactVetoes {
                target_environment: environment.clone(),
                reference: reference.clone(),
                versions: versions.keys().cloned().collect(),
            })
            .collect())
    }

    async fn mark_as_skipped(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
        superseded_by: &str,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut tables = self.tables.lock();
        let key = tables.env_key(config, &artifact.reference, environment)?;
        tables
            .promotions
            .entry(key)
            .or_default()
            .entry(version.to_string())
            .or_insert_with(|| PromotionRow::new(PromotionStatus::Skipped))
            .replace(PromotionStatus::Skipped, superseded_by, now);
        Ok(())
    }

    async fn get_environment_summaries(&self, config: &DeliveryConfig) -> Result<Vec<EnvironmentSummary>> {
        let tables = self.tables.lock();
        let mut summaries = Vec::with_capacity(config.environments.len());

        for environment in &config.environments {
            let mut artifacts = Vec::with_capacity(config.artifacts.len());
            for declared in &config.artifacts {
                let artifact = tables.by_reference(&config.name, &declared.reference)?;
                let key = (config.name.clone(), environment.name.clone(), artifact.reference.clone());
                let sorter = VersionSorter::for_strategy(&artifact.versioning)?;
                let known = tables.sorted_versions(artifact)?;

                let statuses = known.iter().filter_map(|v| v.status).collect();
                let mut buckets: BTreeMap<PromotionStatus, Vec<&PublishedArtifact>> = BTreeMap::new();
                for published in &known {
                    let status = tables
                        .row(&key, &published.version)
                        .map_or(PromotionStatus::Pending, |row| row.status);
                    buckets.entry(status).or_default().push(published);
                }

                let first = |status: PromotionStatus| {
                    buckets
                        .get(&status)
                        .and_then(|versions| versions.first())
                        .copied()
                };
                let names = |status: PromotionStatus| -> Vec<String> {
                    buckets
                        .get(&status)
                        .map(|versions| versions.iter().map(|v| v.version.clone()).collect())
                        .unwrap_or_default()
                };

                let current = first(PromotionStatus::Current);
                // Pending versions older than the current one can never be promoted.
                let (pending, stale): (Vec<&PublishedArtifact>, Vec<&PublishedArtifact>) = buckets
                    .get(&PromotionStatus::Pending)
                    .map(|pending| {
                        pending
                            .iter()
                            .copied()
                            .partition(|v| current.map_or(true, |c| !sorter.is_older(v, c)))
                    })
                    .unwrap_or_default();

                let mut skipped: Vec<String> = stale.iter().map(|v| v.version.clone()).collect();
                skipped.extend(names(PromotionStatus::Skipped));

                artifacts.push(ArtifactVersions {
                    name: artifact.name.clone(),
                    artifact_type: artifact.artifact_type,
                    reference: artifact.reference.clone(),
                    statuses,
                    versions: ArtifactVersionStatus {
                        current: current.map(|v| v.version.clone()),
                        deploying: first(PromotionStatus::Deploying).map(|v| v.version.clone()),
                        pending: pending.iter().map(|v| v.version.clone()).collect(),
                        approved: names(PromotionStatus::Approved),
                        previous: names(PromotionStatus::Previous),
                        vetoed: names(PromotionStatus::Vetoed),
                        skipped,
                    },
                    pinned_version: tables.pins.get(&key).map(|pin| pin.version.clone()),
                });
            }

            summaries.push(EnvironmentSummary {
                name: environment.name.clone(),
                resources: environment.resources.iter().map(|r| r.id.clone()).collect(),
                artifacts,
            });
        }
        Ok(summaries)
    }

    async fn pin_environment(&self, config: &DeliveryConfig, pin: &EnvironmentArtifactPin) -> Result<()> {
        let now = self.clock.now();
        let mut tables = self.tables.lock();
        let key = tables.env_key(config, &pin.reference, &pin.target_environment)?;

        let mut stored = pin.clone();
        stored.pinned_at = Some(now);
        stored.pinned_by.get_or_insert_with(|| "anonymous".to_string());
        tables.pins.insert(key.clone(), stored);

        tables
            .promotions
            .entry(key)
            .or_default()
            .entry(pin.version.clone())
            .or_insert_with(|| {
                let mut row = PromotionRow::new(PromotionStatus::Approved);
                row.approved_at = Some(now);
                row
            });
        Ok(())
    }

    async fn pinned_environments(&self, config: &DeliveryConfig) -> Result<Vec<EnvironmentArtifactPin>> {
        Ok(self
            .tables
            .lock()
            .pins
            .iter()
            .filter(|((c, _, _), _)| *c == config.name)
            .map(|(_, pin)| pin.clone())
            .collect())
    }

    async fn delete_pin(&self, config: &DeliveryConfig, environment: &str, reference: Option<&str>) -> Result<()> {
        self.tables.lock().pins.retain(|(c, e, r), _| {
            !(*c == config.name && e == environment && reference.map_or(true, |reference| r == reference))
        });
        Ok(())
    }

    async fn get_artifact_summary_in_environment(
        &self,
        config: &DeliveryConfig,
        environment: &str,
        reference: &str,
        version: &str,
    ) -> Result<Option<ArtifactSummaryInEnvironment>> {
        let tables = self.tables.lock();
        if config.artifact(reference).is_none() {
            return Err(artifact_not_found(reference, &config.name));
        }
        let key = tables.env_key(config, reference, environment)?;
        let Some(row) = tables.row(&key, version) else {
            return Ok(None);
        };

        let vetoed = tables
            .vetoes
            .get(&key)
            .and_then(|vetoes| vetoes.get(version))
            .map(|record| ActionMetadata {
                at: record.vetoed_at,
                by: record.vetoed_by.clone(),
                comment: record.comment.clone(),
            });
        // A version can't be both vetoed and pinned.
        let pinned = if vetoed.is_none() {
            tables
                .pins
                .get(&key)
                .filter(|pin| pin.version == version)
                .and_then(|pin| {
                    pin.pinned_at.map(|at| ActionMetadata {
                        at,
                        by: pin.pinned_by.clone(),
                        comment: pin.comment.clone(),
                    })
                })
        } else {
            None
        };

        Ok(Some(ArtifactSummaryInEnvironment {
            environment: environment.to_string(),
            version: version.to_string(),
            state: row.status.state_name(),
            deployed_at: row.deployed_at,
            replaced_at: row.replaced_at,
            replaced_by: row.replaced_by.clone(),
            pinned,
            vetoed,
        }))
    }

    async fn artifacts_due_for_check(&self, min_age: Duration, limit: usize) -> Result<Vec<DeliveryArtifact>> {
        let now = self.clock.now();
        let cutoff = saturating_sub(now, min_age);
        let mut tables = self.tables.lock();

        let mut due: Vec<(Option<Timestamp>, ArtifactKey)> = tables
            .artifacts
            .keys()
            .map(|key| (tables.last_checked.get(key).copied(), key.clone()))
            .filter(|(checked, _)| checked.map_or(true, |at| at <= cutoff))
            .collect();
        due.sort();
        due.truncate(limit);

        let mut result = Vec::with_capacity(due.len());
        for (_, key) in due {
            tables.last_checked.insert(key.clone(), now);
            if let Some(artifact) = tables.artifacts.get(&key) {
                result.push(artifact.clone());
            }
        }
        Ok(result)
    }

    async fn delete_delivery_config_state(&self, delivery_config_name: &str) -> Result<()> {
        let mut tables = self.tables.lock();
        tables.artifacts.retain(|(_, _, c, _), _| c != delivery_config_name);
        tables.last_checked.retain(|(_, _, c, _), _| c != delivery_config_name);
        tables.promotions.retain(|(c, _, _), _| c != delivery_config_name);
        tables.pins.retain(|(c, _, _), _| c != delivery_config_name);
        tables.vetoes.retain(|(c, _, _), _| c != delivery_config_name);

        let live: BTreeSet<(String, ArtifactType)> = tables
            .artifacts
            .values()
            .map(|a| (a.name.clone(), a.artifact_type))
            .collect();
        tables.versions.retain(|key, _| live.contains(key));
        Ok(())
    }
}
