//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - flag / show: put subjects into the queue and inspect them
//! - claim: hand out the next subject to review, or a background batch
//! - transition / vote / verify: record review outcomes
//! - leaderboard: voter rankings
//! - sweep: ban-check worker

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// modqueue - moderation review queue backend
#[derive(Parser, Debug)]
#[command(name = "modqueue")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Flag a newly detected subject for review
    Flag {
        /// Subject kind (user, group)
        kind: String,

        /// Platform id
        id: i64,

        /// Display name
        #[arg(short, long, default_value = "")]
        name: String,

        /// Detection confidence in [0, 1]
        #[arg(long, default_value_t = 0.5)]
        confidence: f64,

        /// Primary flag reason
        #[arg(short, long, default_value = "manual")]
        reason: String,
    },

    /// Claim the next subject to work on
    Claim {
        /// Subject kind (user, group)
        kind: String,

        /// Claim purpose (review, rescan, ban-check)
        #[arg(short, long, default_value = "review")]
        purpose: String,

        /// Preferred partition for review claims (flagged, confirmed, cleared, banned)
        #[arg(short, long, default_value = "flagged")]
        target: String,

        /// Sort strategy (random, confidence, updated, reputation)
        #[arg(short, long)]
        sort: Option<String>,

        /// Reviewer id, excludes their recently reviewed subjects
        #[arg(long)]
        reviewer: Option<i64>,

        /// Ids to skip
        #[arg(short, long, value_delimiter = ',')]
        exclude: Vec<i64>,

        /// Claim up to N ids at once (background purposes)
        #[arg(short, long)]
        batch: Option<usize>,
    },

    /// Move subjects to a new lifecycle state
    Transition {
        /// Subject kind (user, group)
        kind: String,

        /// Destination state (flagged, confirmed, cleared, banned)
        to: String,

        /// One or more subject ids
        #[arg(required = true, num_args = 1..)]
        ids: Vec<i64>,
    },

    /// Record a vote on a flagged subject
    Vote {
        /// Subject kind (user, group)
        kind: String,

        /// Subject id
        id: i64,

        /// Voter id
        #[arg(long)]
        voter: i64,

        /// Vote that the subject is inappropriate
        #[arg(short, long)]
        down: bool,
    },

    /// Verify outstanding votes against a decided outcome
    Verify {
        /// Subject kind (user, group)
        kind: String,

        /// Subject id
        id: i64,

        /// The subject was judged inappropriate
        #[arg(short, long)]
        inappropriate: bool,
    },

    /// Show voter rankings
    Leaderboard {
        /// Period (daily, weekly, biweekly, monthly, biannually, annually, all_time)
        #[arg(default_value = "weekly")]
        period: String,

        /// Continue after a cursor printed by a previous page
        #[arg(long)]
        cursor: Option<String>,

        /// Page size
        #[arg(short, long)]
        limit: Option<usize>,

        /// Show one voter's standing instead of a page
        #[arg(long)]
        voter: Option<i64>,
    },

    /// Show a subject and its votes
    Show {
        /// Subject kind (user, group)
        kind: String,

        /// Subject id
        id: i64,
    },

    /// Move subjects the platform already banned into the banned state
    Sweep {
        /// Subject kind (user, group, all)
        kind: String,

        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },
}
