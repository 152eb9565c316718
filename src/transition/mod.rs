//! State-transition engine.
//!
//! Lifecycle state is partition membership, so every transition is a row
//! move between partition tables:
//!
//! ```text
//! Flagged   -> Confirmed | Cleared | Banned
//! Confirmed -> Cleared | Flagged | Banned
//! Cleared   -> Confirmed | Flagged | Banned
//! Banned    -> Flagged
//! ```
//!
//! Moving into Confirmed or Cleared decides the review outcome and verifies
//! the subject's votes after the move commits.

mod engine;

pub use engine::{TransitionEngine, TransitionOutcome, Verification};
