use clap::Parser;
use colored::*;
use eyre::{Context, Result, bail, eyre};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod cli;
mod config;

use cli::{Cli, Commands};
use config::{Config, RateLimitBackend};
use modqueue::id::generate_uuid;
use modqueue::ratelimit::{MemoryWindowStore, RateLimiter, RedisWindowStore, SqliteWindowStore, WindowStore};
use modqueue::scheduler::{ClaimPurpose, ClaimRequest, Scheduler, SortStrategy};
use modqueue::store::{Subject, SubjectKind, SubjectStatus, SubjectStore};
use modqueue::transition::{TransitionEngine, TransitionOutcome, Verification};
use modqueue::votes::{Leaderboard, LeaderboardCursor, LeaderboardPeriod, VoteLedger, spawn_verifier};
use modqueue::worker::{BanSweep, HttpPlatformApi, RateLimitedApi, SweepReport};

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("modqueue")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("modqueue.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn parse_kind(kind: &str) -> Result<SubjectKind> {
    SubjectKind::parse(kind).ok_or_else(|| eyre!("Unknown subject kind '{}' (expected user or group)", kind))
}

fn parse_status(status: &str) -> Result<SubjectStatus> {
    SubjectStatus::parse(status).ok_or_else(|| eyre!("Unknown state '{}'", status))
}

fn open_store(config: &Config) -> Result<Arc<SubjectStore>> {
    let store = SubjectStore::open_with_timeout(&config.database.path, config.database.busy_timeout())
        .context(format!("Failed to open database {}", config.database.path.display()))?;
    Ok(Arc::new(store))
}

fn build_limiter(config: &Config) -> Result<RateLimiter> {
    let store: Arc<dyn WindowStore> = match config.rate_limit.backend {
        RateLimitBackend::Memory => Arc::new(MemoryWindowStore::new()),
        RateLimitBackend::Sqlite => Arc::new(
            SqliteWindowStore::open(config.rate_limit_db(), config.database.busy_timeout())
                .context("Failed to open rate limit database")?,
        ),
        RateLimitBackend::Redis => {
            let url = config
                .rate_limit
                .redis_url
                .as_deref()
                .ok_or_else(|| eyre!("rate_limit.redis_url is not set"))?;
            Arc::new(RedisWindowStore::connect(url).context("Failed to create Redis pool")?)
        }
    };
    Ok(RateLimiter::new(store, config.rate_limit.requests_per_second)
        .with_retry_interval(Duration::from_millis(config.rate_limit.retry_interval_ms)))
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    let store = open_store(config)?;

    match &cli.command {
        Commands::Flag {
            kind,
            id,
            name,
            confidence,
            reason,
        } => handle_flag_command(&store, parse_kind(kind)?, *id, name, *confidence, reason),
        Commands::Claim {
            kind,
            purpose,
            target,
            sort,
            reviewer,
            exclude,
            batch,
        } => {
            let kind = parse_kind(kind)?;
            let purpose = match purpose.as_str() {
                "review" => ClaimPurpose::Review {
                    kind,
                    target: parse_status(target)?,
                },
                "rescan" => ClaimPurpose::Rescan { kind },
                "ban-check" | "ban_check" => ClaimPurpose::BanCheck { kind },
                other => bail!("Unknown claim purpose '{}'", other),
            };
            let sort = match sort {
                Some(s) => SortStrategy::parse(s).ok_or_else(|| eyre!("Unknown sort strategy '{}'", s))?,
                None => config.scheduler.sort(),
            };
            let scheduler = Scheduler::new(store)
                .with_staleness(config.scheduler.staleness())
                .with_history_size(config.scheduler.history_size);

            match batch {
                Some(limit) => handle_claim_batch_command(&scheduler, purpose, *limit),
                None => {
                    let mut request = ClaimRequest::new(purpose)
                        .with_sort(sort)
                        .excluding(exclude.iter().copied());
                    if let Some(reviewer) = reviewer {
                        request = request.for_reviewer(*reviewer);
                    }
                    handle_claim_command(&scheduler, &request)
                }
            }
        }
        Commands::Transition { kind, to, ids } => {
            handle_transition_command(&store, parse_kind(kind)?, parse_status(to)?, ids)
        }
        Commands::Vote { kind, id, voter, down } => handle_vote_command(&store, parse_kind(kind)?, *id, *voter, !*down),
        Commands::Verify { kind, id, inappropriate } => {
            handle_verify_command(&store, parse_kind(kind)?, *id, *inappropriate)
        }
        Commands::Leaderboard {
            period,
            cursor,
            limit,
            voter,
        } => {
            let period =
                LeaderboardPeriod::parse(period).ok_or_else(|| eyre!("Unknown leaderboard period '{}'", period))?;
            let mut board = Leaderboard::new(store).with_lease(Duration::from_secs(config.leaderboard.refresh_lease_secs));
            for (p, staleness) in config.leaderboard_staleness() {
                board = board.with_staleness(p, staleness);
            }
            match voter {
                Some(voter) => handle_voter_stats_command(&board, *voter, period),
                None => handle_leaderboard_command(
                    &board,
                    period,
                    cursor.as_deref(),
                    limit.unwrap_or(config.leaderboard.page_size),
                ),
            }
        }
        Commands::Show { kind, id } => handle_show_command(&store, parse_kind(kind)?, *id),
        Commands::Sweep { kind, once } => {
            let kinds = match kind.as_str() {
                "all" => vec![SubjectKind::User, SubjectKind::Group],
                other => vec![parse_kind(other)?],
            };
            handle_sweep_command(store, config, &kinds, *once).await
        }
    }
}

fn handle_flag_command(
    store: &SubjectStore,
    kind: SubjectKind,
    id: i64,
    name: &str,
    confidence: f64,
    reason: &str,
) -> Result<()> {
    if !(0.0..=1.0).contains(&confidence) {
        bail!("Confidence must be within [0, 1], got {}", confidence);
    }
    let subject = Subject::new(id, name, confidence, reason);
    if store.flag(kind, &subject)? {
        println!("{} {} {} ({})", "Flagged:".green(), kind, id, subject.uuid);
    } else {
        let status = store.status_of(kind, id)?.map(|s| s.to_string()).unwrap_or_default();
        println!("{} {} {} is already {}", "Skipped:".yellow(), kind, id, status);
    }
    Ok(())
}

fn handle_claim_command(scheduler: &Scheduler, request: &ClaimRequest) -> Result<()> {
    match scheduler.claim_next(request)? {
        Some(subject) => print_subject(&subject),
        None => println!("{}", "No items available".yellow()),
    }
    Ok(())
}

fn handle_claim_batch_command(scheduler: &Scheduler, purpose: ClaimPurpose, limit: usize) -> Result<()> {
    let ids = scheduler.claim_batch(purpose, limit)?;
    if ids.is_empty() {
        println!("{}", "No items available".yellow());
    }
    for id in ids {
        println!("{}", id);
    }
    Ok(())
}

fn handle_transition_command(store: &Arc<SubjectStore>, kind: SubjectKind, to: SubjectStatus, ids: &[i64]) -> Result<()> {
    let engine = TransitionEngine::new(store.clone());

    if let [id] = ids {
        match engine.transition(kind, *id, to)? {
            TransitionOutcome::Applied {
                from, verification, ..
            } => {
                println!("{} {} {}: {} -> {}", "Moved:".green(), kind, id, from, to);
                match verification {
                    Verification::Completed(n) => println!("  Verified {} votes", n),
                    Verification::Failed(e) => println!("  {} {}", "Vote verification failed:".red(), e),
                    Verification::Queued | Verification::NotApplicable => {}
                }
            }
            TransitionOutcome::NoOp { status } => {
                println!("{} {} {} is already {}", "Unchanged:".yellow(), kind, id, status);
            }
        }
        return Ok(());
    }

    let moved = engine.bulk_transition(kind, ids, to)?;
    println!("{} {} of {} {}s to {}", "Moved:".green(), moved, ids.len(), kind, to);
    Ok(())
}

fn handle_vote_command(store: &Arc<SubjectStore>, kind: SubjectKind, id: i64, voter: i64, is_upvote: bool) -> Result<()> {
    let ledger = VoteLedger::new(store.clone());
    if ledger.record_vote(kind, id, voter, is_upvote)? {
        println!("{} {} on {} {}", "Recorded:".green(), if is_upvote { "upvote" } else { "downvote" }, kind, id);
    } else {
        println!("{} vote on {} {} is already verified", "Unchanged:".yellow(), kind, id);
    }
    Ok(())
}

fn handle_verify_command(store: &Arc<SubjectStore>, kind: SubjectKind, id: i64, inappropriate: bool) -> Result<()> {
    let ledger = VoteLedger::new(store.clone());
    let verified = ledger.verify_votes(kind, id, inappropriate)?;
    println!("{} {} votes on {} {}", "Verified:".green(), verified, kind, id);
    Ok(())
}

fn handle_leaderboard_command(
    board: &Leaderboard,
    period: LeaderboardPeriod,
    cursor: Option<&str>,
    limit: usize,
) -> Result<()> {
    let cursor = cursor
        .map(LeaderboardCursor::decode)
        .transpose()
        .context("Invalid cursor")?;
    let page = board.page(period, cursor.as_ref(), limit)?;

    println!("{}", format!("{} leaderboard", period).bold());
    if page.entries.is_empty() {
        println!("{}", "No verified votes yet".yellow());
    }
    for entry in &page.entries {
        println!(
            "  {:>10}  {:>5} correct / {:<5} {:>6.1}%",
            entry.voter_id,
            entry.correct_votes,
            entry.total_votes,
            entry.accuracy * 100.0
        );
    }
    if let Some(next) = page.next_cursor {
        println!("{} '{}'", "Next page: --cursor".dimmed(), next.encode()?);
    }
    Ok(())
}

fn handle_voter_stats_command(board: &Leaderboard, voter: i64, period: LeaderboardPeriod) -> Result<()> {
    match board.voter_stats(voter, period)? {
        Some(stats) => println!(
            "{} #{} in {} with {} of {} correct ({:.1}%)",
            format!("Voter {}:", voter).green(),
            stats.rank,
            period,
            stats.entry.correct_votes,
            stats.entry.total_votes,
            stats.entry.accuracy * 100.0
        ),
        None => println!("{} no verified votes for {} in {}", "Voter:".yellow(), voter, period),
    }
    Ok(())
}

fn handle_show_command(store: &Arc<SubjectStore>, kind: SubjectKind, id: i64) -> Result<()> {
    let Some((status, subject)) = store.get(kind, id)? else {
        println!("{} {} {} is not flagged", "Unflagged:".yellow(), kind, id);
        return Ok(());
    };

    println!("{} {}", "State:".green(), status);
    print_subject(&subject);

    let votes = VoteLedger::new(store.clone()).votes_for(kind, id)?;
    for vote in votes {
        let verdict = if !vote.is_verified {
            "pending".dimmed()
        } else if vote.is_correct {
            "correct".green()
        } else {
            "wrong".red()
        };
        println!(
            "  voter {} {} ({})",
            vote.voter_id,
            if vote.is_upvote { "up" } else { "down" },
            verdict
        );
    }
    Ok(())
}

fn print_subject(subject: &Subject) {
    println!(
        "{} {} {:?} confidence {:.2} score {}",
        "Subject:".cyan(),
        subject.id,
        subject.name,
        subject.confidence,
        subject.score()
    );
    println!("  {}", subject.reason);
    for (source, detail) in &subject.reasons {
        println!("  {}: {}", source.dimmed(), detail);
    }
}

async fn handle_sweep_command(store: Arc<SubjectStore>, config: &Config, kinds: &[SubjectKind], once: bool) -> Result<()> {
    let shutdown = CancellationToken::new();
    let limiter = build_limiter(config)?;
    let api_key = std::env::var(&config.sweep.api_key_env).ok();
    let http = HttpPlatformApi::new(
        config.sweep.platform_url.clone(),
        api_key,
        Duration::from_millis(config.sweep.timeout_ms),
    )?;
    let api = Arc::new(RateLimitedApi::new(http, limiter, shutdown.clone()));

    let ledger = Arc::new(VoteLedger::new(store.clone()));
    let (verify_tx, verifier) = spawn_verifier(ledger, config.sweep.verify_queue);
    let engine = TransitionEngine::new(store.clone()).with_verify_queue(verify_tx);
    let scheduler = Scheduler::new(store)
        .with_staleness(config.scheduler.staleness())
        .with_history_size(config.scheduler.history_size);

    let sweep = BanSweep::new(Arc::new(scheduler), Arc::new(engine), api)
        .with_batch_size(config.sweep.batch_size)
        .with_interval(Duration::from_secs(config.sweep.interval_secs));

    let report = if once {
        let mut total = SweepReport::default();
        for kind in kinds {
            let report = sweep.run_once(*kind).await?;
            total.checked += report.checked;
            total.banned += report.banned;
        }
        total
    } else {
        let signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping sweep");
                signal.cancel();
            }
        });
        println!("{}", "Sweeping, press Ctrl-C to stop".cyan());
        sweep.run_all(kinds, shutdown).await
    };

    // Dropping the sweep closes the verify queue so the verifier drains and exits
    drop(sweep);
    verifier.await.context("Verifier task failed")?;

    println!("{} checked {}, banned {}", "Sweep:".green(), report.checked, report.banned);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!(
        "Starting {} ({}) with config from: {:?}",
        env!("CARGO_PKG_NAME"),
        generate_uuid(),
        cli.config
    );

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
