//! Promotion and constraint status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The status of one artifact version in one environment.
///
/// Scoped to a unique (environment, artifact, version) triple. At most one
/// version per (environment, artifact) is `Current` and at most one is
/// `Deploying`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromotionStatus {
    /// Known but not yet approved.
    Pending,
    /// Passed all constraints; may be deployed.
    Approved,
    /// A deployment is in progress.
    Deploying,
    /// Running in the environment.
    Current,
    /// Was current, replaced by a newer version.
    Previous,
    /// Superseded before it ever became current.
    Skipped,
    /// Barred from the environment.
    Vetoed,
}

impl Default for PromotionStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for PromotionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Approved => write!(f, "APPROVED"),
            Self::Deploying => write!(f, "DEPLOYING"),
            Self::Current => write!(f, "CURRENT"),
            Self::Previous => write!(f, "PREVIOUS"),
            Self::Skipped => write!(f, "SKIPPED"),
            Self::Vetoed => write!(f, "VETOED"),
        }
    }
}

impl PromotionStatus {
    /// Returns the lower-case state name used in summaries.
    #[must_use]
    pub fn state_name(&self) -> String {
        self.to_string().to_lowercase()
    }

    /// Returns true if the version has been deployed at some point.
    #[must_use]
    pub fn was_deployed(&self) -> bool {
        matches!(self, Self::Current | Self::Previous)
    }
}

/// The judgement recorded for a constraint on one version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintStatus {
    /// The constraint has never been evaluated.
    NotEvaluated,
    /// Waiting on a judgement.
    Pending,
    /// The constraint passed.
    Pass,
    /// The constraint failed.
    Fail,
    /// A user forced a pass.
    OverridePass,
    /// A user forced a failure.
    OverrideFail,
}

impl fmt::Display for ConstraintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotEvaluated => write!(f, "NOT_EVALUATED"),
            Self::Pending => write!(f, "PENDING"),
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
            Self::OverridePass => write!(f, "OVERRIDE_PASS"),
            Self::OverrideFail => write!(f, "OVERRIDE_FAIL"),
        }
    }
}

impl ConstraintStatus {
    /// Returns true if the status allows promotion.
    #[must_use]
    pub fn passes(&self) -> bool {
        matches!(self, Self::Pass | Self::OverridePass)
    }

    /// Returns true if the status blocks promotion permanently.
    #[must_use]
    pub fn fails(&self) -> bool {
        matches!(self, Self::Fail | Self::OverrideFail)
    }

    /// Returns true if the status is final.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.passes() || self.fails()
    }
}

/// The state of one verification run against a deployed version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    /// Launched and not yet finished.
    Running,
    /// Finished successfully.
    Pass,
    /// Finished unsuccessfully.
    Fail,
}

impl VerificationStatus {
    /// Returns true once the verification has finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promotion_status_display() {
        assert_eq!(PromotionStatus::Current.to_string(), "CURRENT");
        assert_eq!(PromotionStatus::Vetoed.state_name(), "vetoed");
    }

    #[test]
    fn test_promotion_status_serialize() {
        let json = serde_json::to_string(&PromotionStatus::Deploying).unwrap();
        assert_eq!(json, r#""DEPLOYING""#);

        let back: PromotionStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PromotionStatus::Deploying);
    }

    #[test]
    fn test_was_deployed() {
        assert!(PromotionStatus::Current.was_deployed());
        assert!(PromotionStatus::Previous.was_deployed());
        assert!(!PromotionStatus::Deploying.was_deployed());
        assert!(!PromotionStatus::Approved.was_deployed());
    }

    #[test]
    fn test_constraint_status_is_terminal() {
        assert!(ConstraintStatus::Pass.is_terminal());
        assert!(ConstraintStatus::OverrideFail.is_terminal());
        assert!(!ConstraintStatus::Pending.is_terminal());
        assert!(!ConstraintStatus::NotEvaluated.is_terminal());
    }

    #[test]
    fn test_constraint_status_serialize() {
        let json = serde_json::to_string(&ConstraintStatus::OverridePass).unwrap();
        assert_eq!(json, r#""OVERRIDE_PASS""#);
    }
}
