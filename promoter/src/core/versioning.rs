//! Version ordering strategies.
//!
//! Every strategy sorts newest-first. Versions a strategy cannot interpret
//! either sort last (netflix semver, branch+commit) or are excluded entirely
//! (docker tags that do not match the tag strategy).

use super::artifact::PublishedArtifact;
use crate::errors::{PromoterError, Result};
use crate::utils::Timestamp;
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;
use tracing::warn;

const NETFLIX_VERSION_PATTERN: &str =
    r"(\d+\.\d+\.\d+(?:-rc(?:\.\d+)?)?)(?:-h?(\d+))?(?:[.-](\w+))?";

fn netflix_version_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(NETFLIX_VERSION_PATTERN).ok()).as_ref()
}

/// The parts of a netflix-style package version, e.g. `keeldemo-1.0.2-h12.2b2b2b2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetflixVersion {
    /// The semantic version portion (`1.0.2`).
    pub version: String,
    /// The CI build number (`12`).
    pub build: Option<u64>,
    /// The abbreviated commit hash (`2b2b2b2`).
    pub commit: Option<String>,
}

impl NetflixVersion {
    /// Extracts the version parts from a full package version string.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let captures = netflix_version_regex()?.captures(input)?;
        Some(Self {
            version: captures.get(1)?.as_str().to_string(),
            build: captures.get(2).and_then(|m| m.as_str().parse().ok()),
            commit: captures.get(3).map(|m| m.as_str().to_string()),
        })
    }
}

/// How docker tags are compared once extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortType {
    /// Numeric, larger is newer.
    Increasing,
    /// Semantic version, higher is newer.
    Semver,
}

/// Named strategies for ordering docker image tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagVersionStrategy {
    /// Tags are plain increasing integers.
    IncreasingTag,
    /// Tags are semantic versions, optionally prefixed with `v`.
    SemverTag,
    /// `master-h<build>...`, ordered by build number.
    BranchJobCommitByJob,
    /// `v<semver>-h<build>...`, ordered by build number.
    SemverJobCommitByJob,
    /// `v<semver>-h<build>...`, ordered by semver.
    SemverJobCommitBySemver,
}

impl TagVersionStrategy {
    /// The extraction pattern. Patterns without a capture group use the whole match.
    #[must_use]
    pub fn regex(&self) -> &'static str {
        match self {
            Self::IncreasingTag | Self::SemverTag => r"^.*$",
            Self::BranchJobCommitByJob => r"^master-h(\d+).*$",
            Self::SemverJobCommitByJob => r"^v.*-h(\d+).*$",
            Self::SemverJobCommitBySemver => r"^v(.*)-h\d+.*$",
        }
    }

    /// How extracted values are compared.
    #[must_use]
    pub fn sort_type(&self) -> SortType {
        match self {
            Self::IncreasingTag | Self::BranchJobCommitByJob | Self::SemverJobCommitByJob => {
                SortType::Increasing
            }
            Self::SemverTag | Self::SemverJobCommitBySemver => SortType::Semver,
        }
    }
}

impl fmt::Display for TagVersionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IncreasingTag => "INCREASING_TAG",
            Self::SemverTag => "SEMVER_TAG",
            Self::BranchJobCommitByJob => "BRANCH_JOB_COMMIT_BY_JOB",
            Self::SemverJobCommitByJob => "SEMVER_JOB_COMMIT_BY_JOB",
            Self::SemverJobCommitBySemver => "SEMVER_JOB_COMMIT_BY_SEMVER",
        };
        write!(f, "{name}")
    }
}

/// The ordering strategy attached to a delivery artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum VersioningStrategy {
    /// Debian-style `name-x.y.z-h<build>.<commit>` versions.
    NetflixSemver,
    /// Docker tags interpreted through a tag strategy.
    DockerTag {
        /// The named strategy.
        strategy: TagVersionStrategy,
        /// Overrides the strategy's extraction pattern.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capture_group_regex: Option<String>,
    },
    /// Ordered by creation time; for branch+commit style versions.
    BranchCommit,
}

impl Default for VersioningStrategy {
    fn default() -> Self {
        Self::NetflixSemver
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SortKey {
    Semver(Version, Option<u64>),
    Number(u64),
    Time(Timestamp),
    Unparseable,
}

impl SortKey {
    /// Newer keys order first.
    fn newest_first(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Semver(a, ab), Self::Semver(b, bb)) => b.cmp(a).then_with(|| bb.cmp(ab)),
            (Self::Number(a), Self::Number(b)) => b.cmp(a),
            (Self::Time(a), Self::Time(b)) => b.cmp(a),
            (Self::Unparseable, Self::Unparseable) => Ordering::Equal,
            (Self::Unparseable, _) => Ordering::Greater,
            (_, Self::Unparseable) => Ordering::Less,
            _ => Ordering::Equal,
        }
    }
}

fn parse_semver(input: &str) -> Option<Version> {
    Version::parse(input.trim_start_matches('v')).ok()
}

#[derive(Debug, Clone)]
enum SorterKind {
    NetflixSemver,
    Tag { regex: Regex, sort_type: SortType },
    CreatedAt,
}

/// A compiled comparator for one versioning strategy.
#[derive(Debug, Clone)]
pub struct VersionSorter {
    kind: SorterKind,
}

impl VersionSorter {
    /// Compiles the comparator for a strategy.
    ///
    /// Fails if a custom capture-group regex does not compile.
    pub fn for_strategy(strategy: &VersioningStrategy) -> Result<Self> {
        let kind = match strategy {
            VersioningStrategy::NetflixSemver => SorterKind::NetflixSemver,
            VersioningStrategy::BranchCommit => SorterKind::CreatedAt,
            VersioningStrategy::DockerTag {
                strategy,
                capture_group_regex,
            } => {
                let pattern = capture_group_regex.as_deref().unwrap_or_else(|| strategy.regex());
                let regex = Regex::new(pattern).map_err(|e| {
                    PromoterError::internal(format!("Invalid tag regex {pattern}: {e}"))
                })?;
                if regex.captures_len() > 2 {
                    return Err(PromoterError::internal(format!(
                        "Tag regex {pattern} must have at most one capture group"
                    )));
                }
                SorterKind::Tag {
                    regex,
                    sort_type: strategy.sort_type(),
                }
            }
        };
        Ok(Self { kind })
    }

    fn extract<'a>(regex: &Regex, tag: &'a str) -> Option<&'a str> {
        let captures = regex.captures(tag)?;
        captures
            .get(1)
            .or_else(|| captures.get(0))
            .map(|m| m.as_str())
    }

    fn key(&self, artifact: &PublishedArtifact) -> SortKey {
        match &self.kind {
            SorterKind::NetflixSemver => match NetflixVersion::parse(&artifact.version) {
                Some(parsed) => parse_semver(&parsed.version)
                    .map_or(SortKey::Unparseable, |v| SortKey::Semver(v, parsed.build)),
                None => {
                    warn!(version = %artifact.version, "Unparseable artifact version; it will sort last");
                    SortKey::Unparseable
                }
            },
            SorterKind::Tag { regex, sort_type } => {
                let Some(value) = Self::extract(regex, &artifact.version) else {
                    return SortKey::Unparseable;
                };
                match sort_type {
                    SortType::Increasing => value.parse().map_or(SortKey::Unparseable, SortKey::Number),
                    SortType::Semver => parse_semver(value).map_or(SortKey::Unparseable, |v| SortKey::Semver(v, None)),
                }
            }
            SorterKind::CreatedAt => artifact.created_at.map_or(SortKey::Unparseable, SortKey::Time),
        }
    }

    /// Returns false for docker tags the strategy cannot interpret.
    #[must_use]
    pub fn includes(&self, artifact: &PublishedArtifact) -> bool {
        match self.kind {
            SorterKind::Tag { .. } => self.key(artifact) != SortKey::Unparseable,
            _ => true,
        }
    }

    /// Compares two versions, newest first.
    ///
    /// Ties on the strategy's key fall back to the version string so the
    /// ordering is strict.
    #[must_use]
    pub fn compare(&self, a: &PublishedArtifact, b: &PublishedArtifact) -> Ordering {
        self.key(a)
            .newest_first(&self.key(b))
            .then_with(|| b.version.cmp(&a.version))
    }

    /// Returns true if `a` is strictly older than `b`.
    #[must_use]
    pub fn is_older(&self, a: &PublishedArtifact, b: &PublishedArtifact) -> bool {
        self.compare(a, b) == Ordering::Greater
    }

    /// Filters out uninterpretable tags and sorts newest first.
    #[must_use]
    pub fn sort(&self, mut versions: Vec<PublishedArtifact>) -> Vec<PublishedArtifact> {
        versions.retain(|v| self.includes(v));
        // Keys are recomputed per comparison; version lists are short.
        versions.sort_by(|a, b| self.compare(a, b));
        versions
    }
}
