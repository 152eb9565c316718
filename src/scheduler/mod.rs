//! Scheduler module: exclusive work claiming across concurrent consumers.
//!
//! This module provides:
//! - **Purposes**: review, re-scan and ban-check claims, each with its own
//!   partition fallback order and staleness window.
//! - **Sort strategies**: which single eligible row a claim picks.
//! - **Scheduler**: `claim_next` for interactive reviewers, `claim_batch` for
//!   fleet-wide background jobs.
//!
//! # Architecture
//!
//! Claims are pull-based:
//! 1. A reviewer or worker builds a `ClaimRequest`
//! 2. The Scheduler opens one write transaction and walks the partitions
//! 3. The first eligible row is stamped and returned
//! 4. The caller later commits an outcome through the transition engine
//!
//! # Example
//!
//! ```ignore
//! use modqueue::scheduler::{ClaimPurpose, ClaimRequest, Scheduler, SortStrategy};
//! use modqueue::store::{SubjectKind, SubjectStatus};
//!
//! let scheduler = Scheduler::new(store);
//! let request = ClaimRequest::new(ClaimPurpose::Review {
//!     kind: SubjectKind::User,
//!     target: SubjectStatus::Flagged,
//! })
//! .with_sort(SortStrategy::HighestConfidence)
//! .for_reviewer(reviewer_id);
//!
//! match scheduler.claim_next(&request)? {
//!     Some(subject) => show(subject),
//!     None => println!("No items available"),
//! }
//! ```

mod priority;
mod select;

pub use priority::{
    BAN_CHECK_STALENESS, ClaimPurpose, REVIEW_STALENESS, RESCAN_STALENESS, SortStrategy, StalenessConfig,
};
pub use select::{ClaimRequest, DEFAULT_HISTORY_SIZE, Scheduler};
