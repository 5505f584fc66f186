//! Pins, vetoes, constraint judgements and environment summaries.

use super::artifact::{ArtifactStatus, ArtifactType};
use super::status::ConstraintStatus;
use crate::utils::{saturating_add, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;

/// A manual override fixing an environment to one artifact version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentArtifactPin {
    /// The pinned environment.
    pub target_environment: String,
    /// The artifact reference.
    pub reference: String,
    /// The pinned version.
    pub version: String,
    /// Who pinned it.
    #[serde(default)]
    pub pinned_by: Option<String>,
    /// Why.
    #[serde(default)]
    pub comment: Option<String>,
    /// When; stamped by the store.
    #[serde(default)]
    pub pinned_at: Option<Timestamp>,
}

impl EnvironmentArtifactPin {
    /// Creates a pin.
    #[must_use]
    pub fn new(
        target_environment: impl Into<String>,
        reference: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            target_environment: target_environment.into(),
            reference: reference.into(),
            version: version.into(),
            pinned_by: None,
            comment: None,
            pinned_at: None,
        }
    }

    /// Records who pinned the version and why.
    #[must_use]
    pub fn by(mut self, user: impl Into<String>, comment: impl Into<String>) -> Self {
        self.pinned_by = Some(user.into());
        self.comment = Some(comment.into());
        self
    }
}

/// A request to bar a version from an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentArtifactVeto {
    /// The environment.
    pub target_environment: String,
    /// The artifact reference.
    pub reference: String,
    /// The version to bar.
    pub version: String,
    /// Who vetoed it; automated vetoes use the veto name.
    #[serde(default)]
    pub vetoed_by: Option<String>,
    /// Why.
    #[serde(default)]
    pub comment: Option<String>,
}

impl EnvironmentArtifactVeto {
    /// Creates a veto request.
    #[must_use]
    pub fn new(
        target_environment: impl Into<String>,
        reference: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            target_environment: target_environment.into(),
            reference: reference.into(),
            version: version.into(),
            vetoed_by: None,
            comment: None,
        }
    }

    /// Records who vetoed the version and why.
    #[must_use]
    pub fn by(mut self, user: impl Into<String>, comment: impl Into<String>) -> Self {
        self.vetoed_by = Some(user.into());
        self.comment = Some(comment.into());
        self
    }
}

/// All vetoed versions for one (environment, artifact).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentArtifactVetoes {
    /// Environment.
    pub target_environment: String,
    /// Artifact reference.
    pub reference: String,
    /// Vetoed versions.
    pub versions: BTreeSet<String>,
}

/// A persisted judgement of a stateful constraint for one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintState {
    /// Owning config.
    pub delivery_config_name: String,
    /// Environment.
    pub environment_name: String,
    /// Version judged.
    pub artifact_version: String,
    /// Artifact reference.
    pub artifact_reference: String,
    /// Constraint type tag.
    #[serde(rename = "type")]
    pub constraint_type: String,
    /// Current judgement.
    pub status: ConstraintStatus,
    /// When the state was first created.
    pub created_at: Timestamp,
    /// Who judged it.
    #[serde(default)]
    pub judged_by: Option<String>,
    /// When it was judged.
    #[serde(default)]
    pub judged_at: Option<Timestamp>,
    /// Free-form comment.
    #[serde(default)]
    pub comment: Option<String>,
    /// Evaluator-specific attributes.
    #[serde(default)]
    pub attributes: Value,
}

impl ConstraintState {
    /// Creates a pending state.
    #[must_use]
    pub fn pending(
        delivery_config_name: impl Into<String>,
        environment_name: impl Into<String>,
        artifact_reference: impl Into<String>,
        artifact_version: impl Into<String>,
        constraint_type: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            delivery_config_name: delivery_config_name.into(),
            environment_name: environment_name.into(),
            artifact_version: artifact_version.into(),
            artifact_reference: artifact_reference.into(),
            constraint_type: constraint_type.into(),
            status: ConstraintStatus::Pending,
            created_at,
            judged_by: None,
            judged_at: None,
            comment: None,
            attributes: Value::Null,
        }
    }

    /// Returns a copy with a new judgement.
    #[must_use]
    pub fn judged(
        mut self,
        status: ConstraintStatus,
        judged_by: impl Into<String>,
        judged_at: Timestamp,
        comment: Option<String>,
    ) -> Self {
        self.status = status;
        self.judged_by = Some(judged_by.into());
        self.judged_at = Some(judged_at);
        self.comment = comment;
        self
    }

    /// True if the state is still pending after `timeout`.
    #[must_use]
    pub fn timed_out(&self, timeout: Duration, now: Timestamp) -> bool {
        self.status == ConstraintStatus::Pending && saturating_add(self.created_at, timeout) < now
    }
}

/// Versions of one artifact in one environment, bucketed by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactVersionStatus {
    /// The deployed version.
    pub current: Option<String>,
    /// The version being deployed.
    pub deploying: Option<String>,
    /// Versions awaiting approval.
    pub pending: Vec<String>,
    /// Approved but not yet deployed.
    pub approved: Vec<String>,
    /// Formerly current.
    pub previous: Vec<String>,
    /// Barred.
    pub vetoed: Vec<String>,
    /// Superseded or moot.
    pub skipped: Vec<String>,
}

/// One artifact's versions within an environment summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactVersions {
    /// Artifact name.
    pub name: String,
    /// Artifact type.
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    /// Artifact reference.
    pub reference: String,
    /// Accepted release statuses.
    pub statuses: BTreeSet<ArtifactStatus>,
    /// Bucketed versions.
    pub versions: ArtifactVersionStatus,
    /// The pinned version, if any.
    pub pinned_version: Option<String>,
}

/// The state of every artifact in one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSummary {
    /// Environment name.
    pub name: String,
    /// Resource ids in the environment.
    pub resources: BTreeSet<String>,
    /// Per-artifact version buckets.
    pub artifacts: Vec<ArtifactVersions>,
}

impl EnvironmentSummary {
    /// Returns true if the version appears in any non-skipped bucket for the artifact.
    #[must_use]
    pub fn has_artifact_version(&self, reference: &str, version: &str) -> bool {
        self.artifacts
            .iter()
            .filter(|a| a.reference == reference)
            .any(|a| {
                let v = &a.versions;
                v.current.as_deref() == Some(version)
                    || v.deploying.as_deref() == Some(version)
                    || [&v.previous, &v.approved, &v.pending, &v.vetoed]
                        .iter()
                        .any(|bucket| bucket.iter().any(|x| x == version))
            })
    }
}

/// Who did something, when, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMetadata {
    /// When.
    pub at: Timestamp,
    /// Who.
    pub by: Option<String>,
    /// Why.
    pub comment: Option<String>,
}

/// The state of one version in one environment, for API callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSummaryInEnvironment {
    /// Environment name.
    pub environment: String,
    /// The version.
    pub version: String,
    /// Lower-case promotion status.
    pub state: String,
    /// When it became current.
    pub deployed_at: Option<Timestamp>,
    /// When it was replaced.
    pub replaced_at: Option<Timestamp>,
    /// What replaced it.
    pub replaced_by: Option<String>,
    /// Pin details, if this version is pinned.
    pub pinned: Option<ActionMetadata>,
    /// Veto details, if this version is vetoed.
    pub vetoed: Option<ActionMetadata>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_constraint_state_timeout() {
        let created = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let state = ConstraintState::pending("config", "prod", "deb", "v1", "manual-judgement", created);

        assert!(!state.timed_out(Duration::from_secs(3600), created + chrono::Duration::minutes(30)));
        assert!(state.timed_out(Duration::from_secs(3600), created + chrono::Duration::minutes(61)));

        let passed = state.judged(ConstraintStatus::Pass, "someone", created, None);
        assert!(!passed.timed_out(Duration::from_secs(3600), created + chrono::Duration::days(2)));
    }

    #[test]
    fn test_has_artifact_version_ignores_skipped() {
        let summary = EnvironmentSummary {
            name: "test".to_string(),
            resources: BTreeSet::new(),
            artifacts: vec![ArtifactVersions {
                name: "keeldemo".to_string(),
                artifact_type: ArtifactType::Deb,
                reference: "keeldemo".to_string(),
                statuses: BTreeSet::new(),
                versions: ArtifactVersionStatus {
                    current: Some("v2".to_string()),
                    skipped: vec!["v1".to_string()],
                    ..ArtifactVersionStatus::default()
                },
                pinned_version: None,
            }],
        };

        assert!(summary.has_artifact_version("keeldemo", "v2"));
        assert!(!summary.has_artifact_version("keeldemo", "v1"));
        assert!(!summary.has_artifact_version("other", "v2"));
    }
}
