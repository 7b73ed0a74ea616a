//! Command-line front end for credibility-weighted quorum voting.
//!
//! `simulate` runs attack simulations, `evaluate` decides on a file of votes,
//! and `verify-journal` audits an outcome journal.

use clap::{Parser, Subcommand};
use credence::{
    append_records, read_journal, run_batch, CredibilityTable, JournalRecord, KittyShare,
    QuorumConfig, QuorumError, QuorumService, Scenario, SettlementPolicy, SimulationSettings,
    StaticCredibility, Submission,
};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "credence", version, about = "Credibility-weighted quorum voting")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Simulate a worker population voting on many tasks.
    Simulate {
        /// ideal | good-attackers | coordinated-attackers | bad-app | bad-app-attack
        #[arg(long, default_value = "coordinated-attackers")]
        scenario: String,
        /// Fraction of the population controlled by attackers.
        #[arg(long, default_value_t = 0.2)]
        attackers: f64,
        /// Probability that a buggy application returns garbage.
        #[arg(long, default_value_t = 0.03)]
        bad_ratio: f64,
        /// Number of simulated tasks.
        #[arg(long, default_value_t = 1000)]
        samples: usize,
        /// Acceptance threshold.
        #[arg(long, default_value_t = 0.999)]
        threshold: f64,
        /// Credibility assigned to honest workers.
        #[arg(long, default_value_t = 0.8)]
        credibility: f64,
        /// Credibility assigned to attackers (defaults to --credibility).
        #[arg(long)]
        attacker_credibility: Option<f64>,
        /// Stake bonded by every voter.
        #[arg(long, default_value_t = 0.5)]
        stake: f64,
        /// Fee paid by the task submitter.
        #[arg(long, default_value_t = 1.0)]
        fee: f64,
        /// Share the kitty by vote weight -ln(1 - cr) instead of credibility.
        #[arg(long)]
        weighted_share: bool,
        /// Base seed; run i uses seed + i.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Decide on every task of a JSON vote file.
    Evaluate {
        /// JSON array of {"task", "voter", "result"} objects.
        #[arg(long)]
        votes: PathBuf,
        /// Quorum configuration (JSON); defaults when missing.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Credibility table: {"default": 0.8, "scores": {"voter": 0.9}};
        /// without "default", the configured default credibility applies.
        #[arg(long)]
        credibility: Option<PathBuf>,
        /// Append the reports to this journal.
        #[arg(long)]
        journal: Option<PathBuf>,
    },
    /// Verify every digest of an outcome journal.
    VerifyJournal {
        /// Journal file.
        path: PathBuf,
    },
}

#[derive(Debug, Deserialize)]
struct VoteEntry {
    task: String,
    voter: String,
    result: String,
}

fn fatal(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Simulate {
            scenario,
            attackers,
            bad_ratio,
            samples,
            threshold,
            credibility,
            attacker_credibility,
            stake,
            fee,
            weighted_share,
            seed,
        } => {
            let settings = SimulationSettings {
                target: threshold,
                honest_credibility: credibility,
                attacker_credibility: attacker_credibility.unwrap_or(credibility),
                settlement: SettlementPolicy {
                    task_fee: fee,
                    stake,
                    share: if weighted_share {
                        KittyShare::VoteWeight
                    } else {
                        KittyShare::Credibility
                    },
                },
                ..SimulationSettings::default()
            };
            cmd_simulate(&scenario, attackers, bad_ratio, &settings, samples, seed)
        }
        Command::Evaluate {
            votes,
            config,
            credibility,
            journal,
        } => cmd_evaluate(
            &votes,
            config.as_deref(),
            credibility.as_deref(),
            journal.as_deref(),
        ),
        Command::VerifyJournal { path } => cmd_verify_journal(&path),
    };
    if let Err(err) = outcome {
        fatal(&format!("credence: {err}"));
    }
}

fn cmd_simulate(
    name: &str,
    attackers: f64,
    bad_ratio: f64,
    settings: &SimulationSettings,
    samples: usize,
    seed: u64,
) -> Result<(), QuorumError> {
    let scenario = Scenario::by_name(name, attackers, bad_ratio)?;
    let summary = run_batch(&scenario, settings, samples, seed)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn load_provider(
    path: Option<&Path>,
    config: &QuorumConfig,
) -> Result<StaticCredibility<String>, QuorumError> {
    let Some(path) = path else {
        return StaticCredibility::for_config(config);
    };
    let table: CredibilityTable<String> = serde_json::from_slice(&fs::read(path)?)?;
    table.into_provider(config)
}

fn cmd_evaluate(
    votes_path: &Path,
    config_path: Option<&Path>,
    credibility_path: Option<&Path>,
    journal_path: Option<&Path>,
) -> Result<(), QuorumError> {
    let config = match config_path {
        Some(path) => QuorumConfig::load(path)?,
        None => QuorumConfig::default(),
    };
    let provider = Arc::new(load_provider(credibility_path, &config)?);
    let service = QuorumService::new(config, provider)?;

    let entries: Vec<VoteEntry> = serde_json::from_slice(&fs::read(votes_path)?)?;
    let mut rejected = 0usize;
    for entry in entries {
        match service.submit_vote(entry.task.clone(), entry.voter.clone(), entry.result) {
            Ok(Submission::AlreadyVoted) => {
                info!(task = %entry.task, voter = %entry.voter, "duplicate vote ignored")
            }
            Ok(_) => {}
            Err(err) => {
                warn!(task = %entry.task, voter = %entry.voter, %err, "vote rejected");
                rejected += 1;
            }
        }
    }

    // Records carry metrics ranked by value, tasks are ordered by name.
    let mut records = service
        .compute_all()
        .into_iter()
        .map(|(task, report)| report.map(|report| JournalRecord::from_report(&task, &report)))
        .collect::<Result<Vec<_>, _>>()?;
    records.sort_by(|a, b| a.task.cmp(&b.task));
    println!("{}", serde_json::to_string_pretty(&records)?);

    if let Some(path) = journal_path {
        let written = append_records(path, &records)?;
        info!(written, path = %path.display(), "journal updated");
    }
    if rejected > 0 {
        warn!(rejected, "some votes were rejected");
    }
    Ok(())
}

fn cmd_verify_journal(path: &Path) -> Result<(), QuorumError> {
    let records = read_journal(path)?;
    for record in &records {
        let total = record.total();
        if record.residual.is_some() && (total - 1.0).abs() > 1e-9 {
            return Err(QuorumError::Journal(format!(
                "task {} metrics sum to {total}",
                record.task
            )));
        }
    }
    println!("{} record(s) verified", records.len());
    Ok(())
}
