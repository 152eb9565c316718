//! modqueue - moderation review queue backend
//!
//! Flagged users and groups move through a review lifecycle while many
//! reviewers and background workers pull work concurrently:
//! - **scheduler**: hands each subject to exactly one claimer at a time
//! - **transition**: lifecycle state is the partition table a subject lives in
//! - **ratelimit**: one shared per-second ceiling on platform calls
//! - **votes**: reviewer votes, verification and leaderboards
//! - **worker**: background ban-check sweep

pub mod error;
pub mod id;
pub mod ratelimit;
pub mod scheduler;
pub mod store;
pub mod transition;
pub mod votes;
pub mod worker;

pub use error::{ModqueueError, Result};
