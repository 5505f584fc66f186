//! Delivery artifacts and their published versions.

use super::versioning::{NetflixVersion, VersioningStrategy};
use crate::utils::Timestamp;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The packaging format of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    /// A Debian package.
    Deb,
    /// A container image.
    Docker,
    /// An npm package.
    Npm,
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deb => write!(f, "deb"),
            Self::Docker => write!(f, "docker"),
            Self::Npm => write!(f, "npm"),
        }
    }
}

/// Release status attached to a published version by CI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactStatus {
    /// Development build.
    Snapshot,
    /// Pre-release build.
    Prerelease,
    /// Release candidate.
    Candidate,
    /// Release build.
    Release,
    /// Final build.
    Final,
}

/// Source-control details of a published version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitMetadata {
    /// Commit hash.
    pub commit: String,
    /// Branch the version was built from.
    #[serde(default)]
    pub branch: Option<String>,
    /// Pull request number, if built from one.
    #[serde(default)]
    pub pull_request: Option<String>,
    /// Commit author.
    #[serde(default)]
    pub author: Option<String>,
}

/// CI build details of a published version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMetadata {
    /// Build number.
    pub id: u64,
    /// CI job name.
    #[serde(default)]
    pub job: Option<String>,
    /// Build status reported by CI.
    #[serde(default)]
    pub status: Option<String>,
}

/// Branch constraint on which versions are eligible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchFilter {
    /// Exact branch name.
    #[serde(default)]
    pub name: Option<String>,
    /// Branch prefix.
    #[serde(default)]
    pub starts_with: Option<String>,
    /// Branch pattern.
    #[serde(default)]
    pub regex: Option<String>,
}

impl BranchFilter {
    /// Returns true if the branch satisfies every configured rule.
    #[must_use]
    pub fn matches(&self, branch: &str) -> bool {
        if self.name.as_deref().is_some_and(|name| name != branch) {
            return false;
        }
        if self
            .starts_with
            .as_deref()
            .is_some_and(|prefix| !branch.starts_with(prefix))
        {
            return false;
        }
        match self.regex.as_deref() {
            Some(pattern) => Regex::new(pattern).is_ok_and(|re| re.is_match(branch)),
            None => true,
        }
    }
}

/// Where eligible versions must come from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactOriginFilter {
    /// Branch rules.
    #[serde(default)]
    pub branch: Option<BranchFilter>,
    /// Only accept versions built from a pull request.
    #[serde(default)]
    pub pull_request_only: bool,
}

/// An artifact tracked by a delivery config.
///
/// Identity is (name, type, delivery config, reference); the versioning
/// strategy and filters are metadata that re-registration may change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryArtifact {
    /// Package or image name.
    pub name: String,
    /// Packaging format.
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    /// Reference used by resources and constraints within the config.
    pub reference: String,
    /// The owning delivery config, stamped on persist.
    #[serde(default)]
    pub delivery_config_name: Option<String>,
    /// Version ordering.
    #[serde(default)]
    pub versioning: VersioningStrategy,
    /// Accepted release statuses; empty accepts everything.
    #[serde(default)]
    pub statuses: BTreeSet<ArtifactStatus>,
    /// Branch and pull-request rules.
    #[serde(default)]
    pub from: Option<ArtifactOriginFilter>,
}

impl DeliveryArtifact {
    /// Creates a Debian artifact using netflix semver ordering.
    #[must_use]
    pub fn debian(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            artifact_type: ArtifactType::Deb,
            reference: reference.into(),
            delivery_config_name: None,
            versioning: VersioningStrategy::NetflixSemver,
            statuses: BTreeSet::new(),
            from: None,
        }
    }

    /// Creates a docker artifact using a tag strategy.
    #[must_use]
    pub fn docker(
        name: impl Into<String>,
        reference: impl Into<String>,
        strategy: super::TagVersionStrategy,
    ) -> Self {
        Self {
            name: name.into(),
            artifact_type: ArtifactType::Docker,
            reference: reference.into(),
            delivery_config_name: None,
            versioning: VersioningStrategy::DockerTag {
                strategy,
                capture_group_regex: None,
            },
            statuses: BTreeSet::new(),
            from: None,
        }
    }

    /// Sets the owning delivery config.
    #[must_use]
    pub fn with_delivery_config(mut self, name: impl Into<String>) -> Self {
        self.delivery_config_name = Some(name.into());
        self
    }

    /// Sets the accepted release statuses.
    #[must_use]
    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = ArtifactStatus>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    /// Sets the versioning strategy.
    #[must_use]
    pub fn with_versioning(mut self, versioning: VersioningStrategy) -> Self {
        self.versioning = versioning;
        self
    }

    /// Sets the origin filter.
    #[must_use]
    pub fn with_origin(mut self, from: ArtifactOriginFilter) -> Self {
        self.from = Some(from);
        self
    }

    /// The owning config name, or an empty string if not yet stamped.
    #[must_use]
    pub fn config_name(&self) -> &str {
        self.delivery_config_name.as_deref().unwrap_or_default()
    }

    /// Returns true if the published version passes the status, branch and PR filters.
    #[must_use]
    pub fn accepts(&self, version: &PublishedArtifact) -> bool {
        if !self.statuses.is_empty()
            && !version
                .status
                .is_some_and(|status| self.statuses.contains(&status))
        {
            return false;
        }

        let Some(from) = &self.from else {
            return true;
        };
        let git = version.git_metadata.as_ref();

        if let Some(branch_filter) = &from.branch {
            let branch = git.and_then(|g| g.branch.as_deref());
            if !branch.is_some_and(|b| branch_filter.matches(b)) {
                return false;
            }
        }
        if from.pull_request_only && git.and_then(|g| g.pull_request.as_ref()).is_none() {
            return false;
        }
        true
    }
}

impl fmt::Display for DeliveryArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} ({}/{})",
            self.artifact_type,
            self.name,
            self.config_name(),
            self.reference
        )
    }
}

/// One known version of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedArtifact {
    /// Artifact name.
    pub name: String,
    /// Packaging format.
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    /// Opaque version string.
    pub version: String,
    /// Release status.
    #[serde(default)]
    pub status: Option<ArtifactStatus>,
    /// When the version was published.
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    /// Source-control metadata.
    #[serde(default)]
    pub git_metadata: Option<GitMetadata>,
    /// CI metadata.
    #[serde(default)]
    pub build_metadata: Option<BuildMetadata>,
}

impl PublishedArtifact {
    /// Creates a version with no metadata.
    #[must_use]
    pub fn new(name: impl Into<String>, artifact_type: ArtifactType, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            artifact_type,
            version: version.into(),
            status: None,
            created_at: None,
            git_metadata: None,
            build_metadata: None,
        }
    }

    /// Sets the release status.
    #[must_use]
    pub fn with_status(mut self, status: ArtifactStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the publish time.
    #[must_use]
    pub fn with_created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Sets source-control metadata.
    #[must_use]
    pub fn with_git(mut self, git: GitMetadata) -> Self {
        self.git_metadata = Some(git);
        self
    }

    /// Sets CI metadata.
    #[must_use]
    pub fn with_build(mut self, build: BuildMetadata) -> Self {
        self.build_metadata = Some(build);
        self
    }

    /// Short display name, e.g. `1.0.2` for `keeldemo-1.0.2-h12.2b2b2b2`.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self.artifact_type {
            ArtifactType::Deb => NetflixVersion::parse(&self.version)
                .map_or_else(|| self.version.clone(), |v| v.version),
            _ => self.version.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(version: &str) -> PublishedArtifact {
        PublishedArtifact::new("keeldemo", ArtifactType::Deb, version).with_status(ArtifactStatus::Release)
    }

    #[test]
    fn test_status_filter() {
        let artifact = DeliveryArtifact::debian("keeldemo", "keeldemo").with_statuses([ArtifactStatus::Release]);

        assert!(artifact.accepts(&release("keeldemo-1.0.1-h11.1a1a1a1")));
        assert!(!artifact.accepts(
            &PublishedArtifact::new("keeldemo", ArtifactType::Deb, "keeldemo-1.0.1-h11.1a1a1a1")
                .with_status(ArtifactStatus::Snapshot)
        ));
        assert!(!artifact.accepts(&PublishedArtifact::new("keeldemo", ArtifactType::Deb, "x")));
    }

    #[test]
    fn test_empty_status_filter_accepts_everything() {
        let artifact = DeliveryArtifact::debian("keeldemo", "keeldemo");
        assert!(artifact.accepts(&PublishedArtifact::new("keeldemo", ArtifactType::Deb, "x")));
    }

    #[test]
    fn test_branch_filter() {
        let artifact = DeliveryArtifact::debian("keeldemo", "keeldemo").with_origin(ArtifactOriginFilter {
            branch: Some(BranchFilter {
                starts_with: Some("feature/".to_string()),
                ..BranchFilter::default()
            }),
            pull_request_only: false,
        });

        let on_branch = |branch: &str| {
            release("keeldemo-1.0.0-h1.abc").with_git(GitMetadata {
                commit: "abc".to_string(),
                branch: Some(branch.to_string()),
                ..GitMetadata::default()
            })
        };

        assert!(artifact.accepts(&on_branch("feature/login")));
        assert!(!artifact.accepts(&on_branch("main")));
        assert!(!artifact.accepts(&release("keeldemo-1.0.0-h1.abc")));
    }

    #[test]
    fn test_pull_request_filter() {
        let artifact = DeliveryArtifact::debian("keeldemo", "keeldemo").with_origin(ArtifactOriginFilter {
            branch: None,
            pull_request_only: true,
        });
        let from_pr = release("keeldemo-1.0.0-h1.abc").with_git(GitMetadata {
            commit: "abc".to_string(),
            pull_request: Some("42".to_string()),
            ..GitMetadata::default()
        });

        assert!(artifact.accepts(&from_pr));
        assert!(!artifact.accepts(&release("keeldemo-1.0.0-h1.abc")));
    }

    #[test]
    fn test_branch_filter_regex() {
        let filter = BranchFilter {
            regex: Some("^release-\\d+$".to_string()),
            ..BranchFilter::default()
        };
        assert!(filter.matches("release-12"));
        assert!(!filter.matches("release-x"));
    }

    #[test]
    fn test_display_name() {
        assert_eq!(release("keeldemo-1.0.2-h12.2b2b2b2").display_name(), "1.0.2");
        let docker = PublishedArtifact::new("org/image", ArtifactType::Docker, "master-h12.4ea8a9d");
        assert_eq!(docker.display_name(), "master-h12.4ea8a9d");
    }

    #[test]
    fn test_artifact_serialization() {
        let artifact = DeliveryArtifact::debian("keeldemo", "my-deb").with_delivery_config("keeldemo-manifest");
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["type"], "deb");
        assert_eq!(json["versioning"]["type"], "netflix-semver");

        let back: DeliveryArtifact = serde_json::from_value(json).unwrap();
        assert_eq!(back, artifact);
    }
}
