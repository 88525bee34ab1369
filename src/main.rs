use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;

use ambient_intents::{
    logging, AppError, Category, Confidence, Intention, IntentionRepository, IntentionSource,
    StoreConfig,
};

#[derive(Debug, Parser)]
#[command(name = "ambient-intents", version, about = "Private, encrypted intention log")]
struct Cli {
    /// TOML config file (defaults to <config dir>/ambient-intents/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Record a new intention
    Add {
        text: String,
        #[arg(long, default_value = "manual")]
        source: IntentionSource,
        #[arg(long, default_value = "general")]
        category: Category,
        /// Recognizer confidence for voice captures, e.g. 0.87 or "87%"
        #[arg(long)]
        confidence: Option<String>,
        /// Capture time in epoch milliseconds (defaults to now)
        #[arg(long)]
        timestamp: Option<i64>,
    },
    /// List intentions, newest first
    List {
        #[arg(long)]
        source: Option<IntentionSource>,
        #[arg(long)]
        category: Option<Category>,
        /// Inclusive lower bound, epoch milliseconds
        #[arg(long)]
        since: Option<i64>,
        /// Inclusive upper bound, epoch milliseconds
        #[arg(long)]
        until: Option<i64>,
    },
    /// Show one intention
    Show { id: i64 },
    /// Replace the text (and optionally category) of an intention
    Edit {
        id: i64,
        text: String,
        #[arg(long)]
        category: Option<Category>,
    },
    /// Delete one intention
    Delete { id: i64 },
    /// Write a decrypted JSON backup to a file or stdout
    Export {
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Counts per category, read from the plaintext index only
    Stats,
    /// Check that index columns agree with encrypted payloads
    Verify,
    /// Delete every stored intention (the key is kept)
    Reset {
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match StoreConfig::load(path) {
            Ok(cfg) => cfg,
            Err(e) => return report(&e),
        },
        None => StoreConfig::load_or_default(default_config_path()),
    };

    let log_dir = config.log_to_file.then(|| config.log_dir());
    let _log_guard = logging::init(log_dir.as_deref());

    match run(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(&e),
    }
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ambient-intents")
        .join("config.toml")
}

fn report(err: &AppError) -> ExitCode {
    match serde_json::to_string(err) {
        Ok(json) => eprintln!("{json}"),
        Err(_) => eprintln!("{err}"),
    }
    ExitCode::FAILURE
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::Internal(format!("Failed to render output: {e}")))?;
    println!("{json}");
    Ok(())
}

fn parse_confidence(raw: &str) -> Confidence {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(Confidence::Score)
        .unwrap_or_else(|| Confidence::Label(raw.to_string()))
}

fn run(command: Command, config: StoreConfig) -> Result<(), AppError> {
    let repo = IntentionRepository::new(config)?;
    repo.initialize()?;

    match command {
        Command::Add {
            text,
            source,
            category,
            confidence,
            timestamp,
        } => {
            let intention = Intention {
                text,
                timestamp: timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
                source,
                category,
                confidence: confidence.as_deref().map(parse_confidence),
            };
            let id = repo.save(&intention)?;
            print_json(&serde_json::json!({ "storageId": id }))
        }
        Command::List {
            source,
            category,
            since,
            until,
        } => {
            let mut items = match category {
                Some(c) => repo.get_by_category(c)?,
                None => repo.get_by_date_range(since.unwrap_or(0), until.unwrap_or(i64::MAX))?,
            };
            if category.is_some() {
                let (lo, hi) = (since.unwrap_or(0), until.unwrap_or(i64::MAX));
                items.retain(|i| (lo..=hi).contains(&i.intention.timestamp));
            }
            if let Some(s) = source {
                items.retain(|i| i.intention.source == s);
            }
            print_json(&items)
        }
        Command::Show { id } => print_json(&repo.get_by_id(id)?),
        Command::Edit { id, text, category } => {
            let current = repo.get_by_id(id)?;
            let intention = Intention {
                text,
                category: category.unwrap_or(current.intention.category),
                ..current.intention
            };
            print_json(&repo.update(id, &intention)?)
        }
        Command::Delete { id } => {
            let removed = repo.delete(id)?;
            print_json(&serde_json::json!({ "storageId": id, "removed": removed }))
        }
        Command::Export { output } => {
            let snapshot = repo.export_all()?;
            let json = snapshot.to_json_pretty()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    tracing::info!(path = %path.display(), count = snapshot.intentions_count, "Export written");
                    Ok(())
                }
                None => {
                    println!("{json}");
                    Ok(())
                }
            }
        }
        Command::Stats => {
            let total = repo.count()?;
            let by_category = repo.category_counts()?;
            print_json(&serde_json::json!({ "total": total, "byCategory": by_category }))
        }
        Command::Verify => {
            let report = repo.verify_index_consistency()?;
            print_json(&report)?;
            if report.mismatches.is_empty() && report.undecryptable.is_empty() {
                Ok(())
            } else {
                Err(AppError::Internal(format!(
                    "{} index mismatches, {} undecryptable rows",
                    report.mismatches.len(),
                    report.undecryptable.len()
                )))
            }
        }
        Command::Reset { yes } => {
            if !yes {
                return Err(AppError::Validation(
                    "reset deletes every intention; pass --yes to confirm".into(),
                ));
            }
            let removed = repo.clear_all()?;
            print_json(&serde_json::json!({ "removed": removed }))
        }
    }
}
