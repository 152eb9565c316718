//! Subject record types for the SubjectStore.
//!
//! A subject's lifecycle state is not a column: it is the partition table the
//! row currently lives in. `SubjectStatus` names those partitions, and a subject
//! found in none of them is unflagged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::id::{generate_uuid, now_ms};

/// Which family of partitions a subject belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    User,
    Group,
}

impl SubjectKind {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "user",
            SubjectKind::Group => "group",
        }
    }

    /// Parse from the string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" | "users" => Some(SubjectKind::User),
            "group" | "groups" => Some(SubjectKind::Group),
            _ => None,
        }
    }

    /// Every partition table for this kind, in `SubjectStatus::ALL` order.
    pub fn tables(&self) -> [&'static str; 4] {
        SubjectStatus::ALL.map(|status| status.table(*self))
    }
}

impl std::fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle partitions a subject can live in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SubjectStatus {
    /// Picked up by detection, awaiting review
    Flagged,
    /// Reviewed and found inappropriate
    Confirmed,
    /// Reviewed and found appropriate
    Cleared,
    /// Banned (users) or locked (groups) on the platform
    Banned,
}

impl SubjectStatus {
    /// Fixed partition order, also the review fallback order.
    pub const ALL: [SubjectStatus; 4] = [
        SubjectStatus::Flagged,
        SubjectStatus::Confirmed,
        SubjectStatus::Cleared,
        SubjectStatus::Banned,
    ];

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectStatus::Flagged => "flagged",
            SubjectStatus::Confirmed => "confirmed",
            SubjectStatus::Cleared => "cleared",
            SubjectStatus::Banned => "banned",
        }
    }

    /// Parse from the string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "flagged" => Some(SubjectStatus::Flagged),
            "confirmed" => Some(SubjectStatus::Confirmed),
            "cleared" => Some(SubjectStatus::Cleared),
            "banned" | "locked" => Some(SubjectStatus::Banned),
            _ => None,
        }
    }

    /// Partition table holding subjects of `kind` in this state.
    pub fn table(&self, kind: SubjectKind) -> &'static str {
        match (kind, self) {
            (SubjectKind::User, SubjectStatus::Flagged) => "flagged_users",
            (SubjectKind::User, SubjectStatus::Confirmed) => "confirmed_users",
            (SubjectKind::User, SubjectStatus::Cleared) => "cleared_users",
            (SubjectKind::User, SubjectStatus::Banned) => "banned_users",
            (SubjectKind::Group, SubjectStatus::Flagged) => "flagged_groups",
            (SubjectKind::Group, SubjectStatus::Confirmed) => "confirmed_groups",
            (SubjectKind::Group, SubjectStatus::Cleared) => "cleared_groups",
            (SubjectKind::Group, SubjectStatus::Banned) => "locked_groups",
        }
    }

    /// Column stamped when a subject enters this partition.
    pub fn stamp_column(&self) -> Option<&'static str> {
        match self {
            SubjectStatus::Flagged => None,
            SubjectStatus::Confirmed => Some("verified_at"),
            SubjectStatus::Cleared => Some("cleared_at"),
            SubjectStatus::Banned => Some("purged_at"),
        }
    }

    /// Check whether the state machine allows moving from `self` to `next`.
    ///
    /// Same-state moves are not listed here; they resolve to a no-op.
    pub fn can_transition_to(&self, next: SubjectStatus) -> bool {
        use SubjectStatus::*;
        matches!(
            (self, next),
            (Flagged, Confirmed)
                | (Flagged, Cleared)
                | (Flagged, Banned)
                | (Confirmed, Cleared)
                | (Confirmed, Flagged)
                | (Confirmed, Banned)
                | (Cleared, Confirmed)
                | (Cleared, Flagged)
                | (Cleared, Banned)
                | (Banned, Flagged)
        )
    }

    /// Terminal review outcome, if entering this state decides one.
    ///
    /// `Some(true)` means the subject was judged inappropriate.
    pub fn review_outcome(&self) -> Option<bool> {
        match self {
            SubjectStatus::Confirmed => Some(true),
            SubjectStatus::Cleared => Some(false),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A reviewable user or group as stored in its partition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subject {
    /// Platform-assigned numeric id
    pub id: i64,
    /// Stable secondary identity
    pub uuid: String,
    pub name: String,
    /// Detection confidence, 0.0 to 1.0
    pub confidence: f64,
    /// Free-text summary of why the subject was flagged
    pub reason: String,
    /// Structured evidence keyed by source (e.g. "profile", "friends")
    pub reasons: BTreeMap<String, String>,
    pub upvotes: i64,
    pub downvotes: i64,

    // Staleness timestamps (Unix ms)
    pub last_scanned: Option<i64>,
    pub last_updated: i64,
    pub last_viewed: Option<i64>,
    pub last_ban_check: Option<i64>,

    // Destination stamps
    pub verified_at: Option<i64>,
    pub cleared_at: Option<i64>,
    pub purged_at: Option<i64>,
}

impl Subject {
    /// Create a freshly detected subject.
    pub fn new(id: i64, name: &str, confidence: f64, reason: &str) -> Self {
        Self {
            id,
            uuid: generate_uuid(),
            name: name.to_string(),
            confidence,
            reason: reason.to_string(),
            reasons: BTreeMap::new(),
            upvotes: 0,
            downvotes: 0,
            last_scanned: None,
            last_updated: now_ms(),
            last_viewed: None,
            last_ban_check: None,
            verified_at: None,
            cleared_at: None,
            purged_at: None,
        }
    }

    /// Attach a piece of structured evidence.
    pub fn with_reason(mut self, source: &str, detail: &str) -> Self {
        self.reasons.insert(source.to_string(), detail.to_string());
        self
    }

    /// Reputation score derived from votes.
    pub fn score(&self) -> i64 {
        self.upvotes - self.downvotes
    }
}
