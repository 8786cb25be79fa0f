//! Browse directories through a speculative metadata prefetcher.
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use preload_fs::expand::ExpandReport;
use preload_fs::{FolderPrefetcher, Prefetcher};
use tokio::task::JoinHandle;
use tracing::{Instrument as _, debug, error, info, info_span};

mod app_config;
mod meta;
mod trc;

use crate::app_config::Config;
use crate::meta::{EntryKind, EntryMeta};
use crate::trc::Trc;

#[derive(Parser)]
#[command(version, about = "Prefetches directory metadata ahead of navigation.")]
struct Args {
    #[arg(
        short,
        long,
        value_parser,
        help = "Optional path to a preload-fs config TOML."
    )]
    config_path: Option<PathBuf>,

    #[arg(long, help = "Disable progress spinners and log plain lines.")]
    plain: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List a directory, prefetching its neighbourhood.
    Ls {
        /// Directory to list.
        dir: PathBuf,
    },

    /// Descend through a tree depth-first and report how often the cache was warm.
    Walk {
        /// Directory to start from.
        dir: PathBuf,

        /// How many levels below `dir` to visit.
        #[arg(short, long, default_value_t = 2)]
        depth: usize,

        /// Time spent "reading" each listing before moving on, in milliseconds.
        #[arg(long, default_value_t = 0)]
        dwell_ms: u64,
    },

    /// Prefetch around a directory, wait for the queue to drain, and print cache statistics.
    Stats {
        /// Directory to prefetch around.
        dir: PathBuf,
    },

    /// Print the effective configuration.
    Config,
}

/// How warm the cache was when a directory was visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Hit,
    Warm,
    Miss,
}

impl Visit {
    fn of(prefetcher: &FolderPrefetcher<EntryMeta>, dir: &Path) -> Self {
        match prefetcher.peek(dir) {
            Some(cached) if cached.complete => Self::Hit,
            Some(_) => Self::Warm,
            None => Self::Miss,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Hit => "hit ",
            Self::Warm => "warm",
            Self::Miss => "miss",
        }
    }
}

/// Main entry point for the application.
fn main() {
    let args = Args::parse();

    // Errors use eprintln since tracing isn't initialized yet.
    let config = Config::load_or_default(args.config_path.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });

    let trc = if args.plain {
        Trc::default().plain()
    } else {
        Trc::default()
    };
    if let Err(e) = trc.init() {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create Tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    let prefetcher = Prefetcher::new(&config.prefetch, runtime.handle().clone());
    debug!(?prefetcher, "prefetcher ready");
    let entries = prefetcher.for_records(EntryMeta::fetch);

    match args.command {
        Command::Ls { dir } => runtime.block_on(ls(&entries, &dir)),
        Command::Walk {
            dir,
            depth,
            dwell_ms,
        } => runtime.block_on(walk(&entries, dir, depth, Duration::from_millis(dwell_ms))),
        Command::Stats { dir } => runtime.block_on(stats(&prefetcher, &entries, &dir)),
        Command::Config => match config.to_toml() {
            Ok(toml) => print!("{toml}"),
            Err(e) => {
                error!("Failed to render configuration: {e}");
                std::process::exit(1);
            }
        },
    }
}

async fn expansion(handle: JoinHandle<ExpandReport>) -> ExpandReport {
    handle.await.unwrap_or_else(|e| {
        error!("Expansion failed: {e}");
        ExpandReport::default()
    })
}

async fn ls(entries: &FolderPrefetcher<EntryMeta>, dir: &Path) {
    let report = expansion(entries.preload_wide(dir)).await;
    debug!(?report, "expanded");

    let mut records = entries.load(dir).await;
    records.sort_by(|a, b| a.path.cmp(&b.path));
    for record in records {
        println!("{}", record.render());
    }
}

async fn walk(entries: &FolderPrefetcher<EntryMeta>, root: PathBuf, depth: usize, dwell: Duration) {
    let mut stack = vec![(root, 0usize)];
    let (mut hits, mut warm, mut misses) = (0usize, 0usize, 0usize);

    while let Some((dir, level)) = stack.pop() {
        let span = info_span!("visit", dir = %dir.display());
        let records = async {
            let visit = Visit::of(entries, &dir);
            match visit {
                Visit::Hit => hits += 1,
                Visit::Warm => warm += 1,
                Visit::Miss => misses += 1,
            }
            expansion(entries.preload(&dir)).await;
            let records = entries.load(&dir).await;
            println!("{} {:>6}  {}", visit.label(), records.len(), dir.display());
            if !dwell.is_zero() {
                tokio::time::sleep(dwell).await;
            }
            records
        }
        .instrument(span)
        .await;

        if level < depth {
            let mut children: Vec<PathBuf> = records
                .iter()
                .filter(|record| record.kind == EntryKind::Dir)
                .map(|record| record.path.clone())
                .collect();
            // Reverse so the stack pops children in name order.
            children.sort_unstable_by(|a, b| b.cmp(a));
            stack.extend(children.into_iter().map(|child| (child, level + 1)));
        }
    }

    let visits = hits + warm + misses;
    info!(visits, hits, warm, misses, "walk finished");
    println!("visited {visits}: {hits} hit, {warm} warm, {misses} miss");
}

async fn stats(prefetcher: &Prefetcher, entries: &FolderPrefetcher<EntryMeta>, dir: &Path) {
    let report = expansion(entries.preload_wide(dir)).await;
    while !entries.is_idle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let registry = prefetcher.registry();
    println!("folders created:   {}", report.folders_created);
    println!("tasks submitted:   {}", report.tasks_submitted);
    println!("folders cached:    {}", registry.folder_count());
    println!("records cached:    {}", prefetcher.all_records().len());
    println!("workers:           {}", prefetcher.scheduler().workers());
}
