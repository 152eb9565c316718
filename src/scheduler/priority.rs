//! Claim purposes, partition fallback order and sort strategies.
//!
//! A purpose decides three things:
//! - which partitions are searched, and in what order
//! - which staleness column makes a row eligible (and is stamped on claim)
//! - how long a claimed row stays ineligible for everyone else
//!
//! The sort strategy only picks one row among the eligible ones.

use std::time::Duration;

use crate::store::{SubjectKind, SubjectStatus};

/// Review claims skip anything viewed in the last 10 minutes.
pub const REVIEW_STALENESS: Duration = Duration::from_secs(10 * 60);
/// Re-scan claims skip anything scanned in the last 24 hours.
pub const RESCAN_STALENESS: Duration = Duration::from_secs(24 * 60 * 60);
/// Ban-check claims skip anything checked in the last 24 hours.
pub const BAN_CHECK_STALENESS: Duration = Duration::from_secs(24 * 60 * 60);

/// Why a caller wants a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimPurpose {
    /// Interactive review, preferring `target` and falling back through the
    /// remaining partitions.
    Review { kind: SubjectKind, target: SubjectStatus },
    /// Re-run detection against the platform.
    Rescan { kind: SubjectKind },
    /// Check whether the platform has already banned/locked the subject.
    BanCheck { kind: SubjectKind },
}

impl ClaimPurpose {
    /// Subject kind this purpose searches.
    pub fn kind(&self) -> SubjectKind {
        match self {
            ClaimPurpose::Review { kind, .. } | ClaimPurpose::Rescan { kind } | ClaimPurpose::BanCheck { kind } => {
                *kind
            }
        }
    }

    /// Partitions to search, highest priority first.
    pub fn partitions(&self) -> Vec<SubjectStatus> {
        match self {
            ClaimPurpose::Review { target, .. } => {
                let mut order = vec![*target];
                order.extend(SubjectStatus::ALL.into_iter().filter(|s| s != target));
                order
            }
            ClaimPurpose::Rescan { .. } => vec![SubjectStatus::Flagged, SubjectStatus::Confirmed],
            ClaimPurpose::BanCheck { .. } => {
                vec![SubjectStatus::Confirmed, SubjectStatus::Flagged, SubjectStatus::Cleared]
            }
        }
    }

    /// Staleness column checked for eligibility and stamped on claim.
    pub fn stamp_column(&self) -> &'static str {
        match self {
            ClaimPurpose::Review { .. } => "last_viewed",
            ClaimPurpose::Rescan { .. } => "last_scanned",
            ClaimPurpose::BanCheck { .. } => "last_ban_check",
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            ClaimPurpose::Review { .. } => "review",
            ClaimPurpose::Rescan { .. } => "rescan",
            ClaimPurpose::BanCheck { .. } => "ban-check",
        }
    }
}

/// Which eligible row a claim picks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortStrategy {
    /// Uniform random pick, spreads reviewers across large pools
    #[default]
    Random,
    HighestConfidence,
    OldestUpdated,
    WorstReputation,
}

impl SortStrategy {
    /// SQL `ORDER BY` expression implementing this strategy.
    pub fn order_by(&self) -> &'static str {
        match self {
            SortStrategy::Random => "RANDOM()",
            SortStrategy::HighestConfidence => "confidence DESC, id ASC",
            SortStrategy::OldestUpdated => "last_updated ASC, id ASC",
            SortStrategy::WorstReputation => "(upvotes - downvotes) ASC, downvotes DESC, id ASC",
        }
    }

    /// Parse from a CLI/config name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "random" => Some(SortStrategy::Random),
            "confidence" | "highest-confidence" => Some(SortStrategy::HighestConfidence),
            "updated" | "oldest-updated" => Some(SortStrategy::OldestUpdated),
            "reputation" | "worst-reputation" => Some(SortStrategy::WorstReputation),
            _ => None,
        }
    }
}

/// Eligibility windows per purpose.
#[derive(Debug, Clone)]
pub struct StalenessConfig {
    pub review: Duration,
    pub rescan: Duration,
    pub ban_check: Duration,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            review: REVIEW_STALENESS,
            rescan: RESCAN_STALENESS,
            ban_check: BAN_CHECK_STALENESS,
        }
    }
}

impl StalenessConfig {
    /// Window for a purpose.
    pub fn window(&self, purpose: &ClaimPurpose) -> Duration {
        match purpose {
            ClaimPurpose::Review { .. } => self.review,
            ClaimPurpose::Rescan { .. } => self.rescan,
            ClaimPurpose::BanCheck { .. } => self.ban_check,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_fallback_starts_with_target() {
        let purpose = ClaimPurpose::Review {
            kind: SubjectKind::User,
            target: SubjectStatus::Cleared,
        };
        assert_eq!(
            purpose.partitions(),
            vec![
                SubjectStatus::Cleared,
                SubjectStatus::Flagged,
                SubjectStatus::Confirmed,
                SubjectStatus::Banned
            ]
        );
    }

    #[test]
    fn test_review_fallback_from_flagged() {
        let purpose = ClaimPurpose::Review {
            kind: SubjectKind::Group,
            target: SubjectStatus::Flagged,
        };
        assert_eq!(purpose.partitions(), SubjectStatus::ALL.to_vec());
        assert_eq!(purpose.kind(), SubjectKind::Group);
    }

    #[test]
    fn test_stamp_columns() {
        let kind = SubjectKind::User;
        assert_eq!(
            ClaimPurpose::Review {
                kind,
                target: SubjectStatus::Flagged
            }
            .stamp_column(),
            "last_viewed"
        );
        assert_eq!(ClaimPurpose::Rescan { kind }.stamp_column(), "last_scanned");
        assert_eq!(ClaimPurpose::BanCheck { kind }.stamp_column(), "last_ban_check");
    }

    #[test]
    fn test_ban_check_never_searches_banned() {
        let purpose = ClaimPurpose::BanCheck { kind: SubjectKind::User };
        assert!(!purpose.partitions().contains(&SubjectStatus::Banned));
    }

    #[test]
    fn test_sort_strategy_parse() {
        assert_eq!(SortStrategy::parse("random"), Some(SortStrategy::Random));
        assert_eq!(SortStrategy::parse("worst-reputation"), Some(SortStrategy::WorstReputation));
        assert_eq!(SortStrategy::parse("newest"), None);
        assert_eq!(SortStrategy::default(), SortStrategy::Random);
    }

    #[test]
    fn test_staleness_defaults() {
        let config = StalenessConfig::default();
        let kind = SubjectKind::User;
        assert_eq!(config.window(&ClaimPurpose::Rescan { kind }), Duration::from_secs(86_400));
        assert_eq!(
            config.window(&ClaimPurpose::Review {
                kind,
                target: SubjectStatus::Flagged
            }),
            Duration::from_secs(600)
        );
    }
}
