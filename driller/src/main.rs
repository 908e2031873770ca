//! Vul-Driller Entry Point
//!
//! Commands:
//! - drill: refresh the repository and run one incremental crawl
//! - find / normalize: run the identifier registry on ad hoc text
//! - summary: print the earliest sightings from the persisted dataset
//! - metasploit: extract references from Metasploit module metadata

use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vul_driller::config::CheckpointKind;
use vul_driller::drill::refresh_repository;
use vul_driller::git_mining::{GitCommitSource, GitExecutor, GitTagCheckpointStore};
use vul_driller::merge::{self, KeyScope};
use vul_driller::{metasploit, DrillConfig, DrillError, DrillOptions, Driller, FamilyTag, IdentifierRegistry};
use vul_driller_store::{CheckpointStore, FileCheckpointStore, JsonDatasetStore, SightingStore};

#[derive(Parser)]
#[command(name = "vul-driller")]
#[command(about = "Find vulnerability identifiers in git history")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl commits added since the last run and merge them into the dataset
    Drill {
        /// Repository path (overrides repo_path)
        #[arg(long)]
        repo: Option<PathBuf>,

        /// Output directory (overrides output_path)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Worker count, 0 for one per CPU (overrides workers)
        #[arg(long)]
        workers: Option<usize>,

        /// Use the repository as is, without cloning or pulling
        #[arg(long)]
        no_refresh: bool,
    },
    /// Print canonical identifiers found in TEXT (or stdin)
    Find { text: Vec<String> },
    /// Print the canonical form of each raw identifier
    Normalize {
        #[arg(required = true)]
        raw: Vec<String>,
    },
    /// Print the earliest sightings from the persisted dataset
    Summary {
        /// Key for earliest-wins: file or reference
        #[arg(long, default_value = "reference")]
        scope: KeyScope,

        /// Only rows of this family
        #[arg(long)]
        family: Option<FamilyTag>,

        /// Print at most N rows
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Extract references from Metasploit's module metadata
    Metasploit {
        /// Metasploit Framework checkout (defaults to repo_path)
        #[arg(long)]
        repo: Option<PathBuf>,

        /// Output directory (overrides output_path)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Only print CVE rows of modules changed in the last N days
        #[arg(long)]
        recent_days: Option<i64>,
    },
}

fn init_logging(verbose: bool, log_file: Option<PathBuf>) -> std::io::Result<()> {
    let log_filter = if verbose {
        "vul_driller=debug,vul_driller_store=debug"
    } else {
        "vul_driller=info,vul_driller_store=info"
    };

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::File::create(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match DrillConfig::load_or_default(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("vul-driller: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = init_logging(args.verbose, config.log_path()) {
        eprintln!("vul-driller: cannot open log file: {e}");
        std::process::exit(2);
    }

    let result = match args.command {
        Command::Drill {
            repo,
            output,
            workers,
            no_refresh,
        } => {
            if let Some(repo) = repo {
                config.repo_path = repo.to_string_lossy().into_owned();
            }
            if let Some(output) = output {
                config.output_path = output.to_string_lossy().into_owned();
            }
            if let Some(workers) = workers {
                config.workers = workers;
            }
            drill(config, no_refresh).await
        }
        Command::Find { text } => find(&config, text),
        Command::Normalize { raw } => normalize(&config, &raw),
        Command::Summary {
            scope,
            family,
            limit,
        } => summary(&config, scope, family, limit),
        Command::Metasploit {
            repo,
            output,
            recent_days,
        } => {
            if let Some(output) = output {
                config.output_path = output.to_string_lossy().into_owned();
            }
            let repo = repo.unwrap_or_else(|| config.repo_dir());
            run_metasploit(&config, repo, recent_days)
        }
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn registry(config: &DrillConfig) -> Result<IdentifierRegistry, DrillError> {
    Ok(IdentifierRegistry::with_families(&config.family_tags()?)?)
}

async fn drill(config: DrillConfig, no_refresh: bool) -> Result<(), DrillError> {
    let repo_dir = config.repo_dir();
    tracing::info!("Repository: {}", repo_dir.display());

    let executor = if no_refresh {
        GitExecutor::new(&repo_dir)?
    } else {
        refresh_repository(&repo_dir, config.clone_url.as_deref(), config.refresh_after())?
    };

    let output_dir = config.output_dir();
    let dataset = Arc::new(JsonDatasetStore::new(&output_dir, config.outfile_basename.as_str())?);
    let checkpoint: Arc<dyn CheckpointStore> = match config.checkpoint.kind {
        CheckpointKind::Tag => Arc::new(GitTagCheckpointStore::new(
            executor.clone(),
            config.checkpoint.name.as_str(),
        )),
        CheckpointKind::File => Arc::new(FileCheckpointStore::new(
            output_dir.join(&config.checkpoint.name),
        )),
    };

    let options = DrillOptions {
        data_source: config.data_source(),
        workers: config.workers,
        key_scope: config.key_scope,
        exclude_paths: config.exclude_paths.clone(),
        track_file_origins: config.track_file_origins,
        lock: config.lock_policy(),
    };

    let mut driller = Driller::new(
        Arc::new(GitCommitSource::new(executor.clone())),
        dataset,
        checkpoint,
        Arc::new(registry(&config)?),
        options,
    );
    if config.tag_references {
        driller = driller.with_tagger(Arc::new(executor));
    }

    let report = driller.run().await?;
    println!("{report}");
    Ok(())
}

fn find(config: &DrillConfig, text: Vec<String>) -> Result<(), DrillError> {
    let registry = registry(config)?;
    let text = if text.is_empty() {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        text.join(" ")
    };
    for id in registry.find(&text) {
        println!("{id}");
    }
    Ok(())
}

fn normalize(config: &DrillConfig, raw: &[String]) -> Result<(), DrillError> {
    let registry = registry(config)?;
    for r in raw {
        println!("{}", registry.normalize(r));
    }
    Ok(())
}

fn summary(
    config: &DrillConfig,
    scope: KeyScope,
    family: Option<FamilyTag>,
    limit: Option<usize>,
) -> Result<(), DrillError> {
    let registry = IdentifierRegistry::new()?;
    let store = JsonDatasetStore::new(config.output_dir(), config.outfile_basename.as_str())?;
    let rows = merge::earliest_per_key(store.read_all()?, scope).rows;

    let mut shown = 0usize;
    for row in rows
        .iter()
        .filter(|r| family.is_none() || registry.family_of(&r.reference) == family)
        .take(limit.unwrap_or(usize::MAX))
    {
        println!(
            "{}\t{}\t{}\t{}",
            row.reference,
            row.author_date.to_rfc3339(),
            row.commit_hash,
            row.origin_path
        );
        shown += 1;
    }
    println!("{shown} of {} rows ({scope} scope)", rows.len());
    Ok(())
}

fn run_metasploit(
    config: &DrillConfig,
    repo: PathBuf,
    recent_days: Option<i64>,
) -> Result<(), DrillError> {
    let registry = registry(config)?;
    let rows = metasploit::load_metadata(&repo, &registry)?;
    metasploit::write_references(&rows, &config.output_dir())?;

    let since = match recent_days {
        Some(days) => Some(
            metasploit::recent_cutoff(chrono::Utc::now(), days)
                .ok_or_else(|| DrillError::config(format!("--recent-days {days} is out of range")))?,
        ),
        None => None,
    };
    for row in metasploit::cve_rows(&rows, &registry, since) {
        println!(
            "{}\t{}\t{}",
            row.reference,
            row.mod_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
            row.path
        );
    }
    Ok(())
}
