//! Vote ledger and leaderboards.
//!
//! Reviewers vote on flagged subjects. Once a subject's outcome is decided
//! (confirmed or cleared), each vote is verified exactly once and feeds the
//! per-period leaderboards.

mod leaderboard;
mod ledger;
mod verifier;

pub use leaderboard::{
    DEFAULT_REFRESH_LEASE, Leaderboard, LeaderboardCursor, LeaderboardEntry, LeaderboardPage, LeaderboardPeriod,
    VoterStats,
};
pub use ledger::{Vote, VoteLedger};
pub use verifier::{DEFAULT_VERIFY_QUEUE, VerifyRequest, spawn_verifier};
