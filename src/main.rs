use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

use playlist_transfer::cache::ResultCache;
use playlist_transfer::config::{default_data_dir, DataPaths, Settings};
use playlist_transfer::local::{import_index, JsonSourceCatalog, SqliteTargetCatalog};
use playlist_transfer::matcher::Matcher;
use playlist_transfer::models::{RunSummary, TrackResult};
use playlist_transfer::overrides::OverrideStore;
use playlist_transfer::progress::{format_duration, set_log_only};
use playlist_transfer::safety::validate_store_paths;
use playlist_transfer::scoring::{scorer_for, ScoringMode};
use playlist_transfer::transfer::{remove_playlists, PlaylistOptions, PlaylistReport, SearchReport, TrackPipeline, Transfer};

#[derive(Parser)]
#[command(name = "playlist-transfer")]
#[command(about = "Transfer playlists from a source catalog to a target catalog with fuzzy track matching")]
struct Args {
    /// Directory holding settings.toml, the result cache and overrides
    #[arg(long, global = true, env = "PLAYLIST_TRANSFER_DIR")]
    data_dir: Option<PathBuf>,

    /// Source library export (JSON)
    #[arg(long, global = true, env = "PLAYLIST_TRANSFER_SOURCE")]
    source: Option<PathBuf>,

    /// Target catalog index (SQLite)
    #[arg(long, global = true, env = "PLAYLIST_TRANSFER_TARGET")]
    target: Option<PathBuf>,

    /// Settings file (defaults to <data-dir>/settings.toml)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Parallel catalog queries
    #[arg(long, global = true, default_value = "1")]
    workers: usize,

    /// Log-only mode: hide progress bars, print periodic progress lines
    #[arg(long, global = true)]
    log_only: bool,

    /// Write the run report as JSON
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Clone, Copy)]
struct MatchArgs {
    /// Score with fuzzy token ratios instead of plain edit distance
    #[arg(long)]
    extended_search: bool,

    /// Minimum score (0-1) for an automatic match
    #[arg(long, value_parser = parse_confidence)]
    confidence: Option<f64>,

    /// Reuse and record decisions in the result cache
    #[arg(long)]
    use_cached: bool,
}

#[derive(clap::Args)]
struct PlaylistArgs {
    /// Name of the created playlist (defaults to the source name)
    #[arg(short, long)]
    name: Option<String>,

    /// Description of the created playlist
    #[arg(short, long)]
    info: Option<String>,

    /// Append the current date to the playlist name
    #[arg(short, long)]
    date: bool,

    /// Make the created playlist public
    #[arg(short, long)]
    public: bool,

    /// Like every matched track
    #[arg(short, long)]
    like: bool,
}

impl PlaylistArgs {
    fn options(&self) -> PlaylistOptions {
        PlaylistOptions {
            name: self.name.clone(),
            description: self.info.clone(),
            append_date: self.date,
            public: self.public,
            like: self.like,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Create a target playlist from a source playlist
    Create {
        /// Playlist id or link
        playlist: String,
        #[command(flatten)]
        playlist_args: PlaylistArgs,
        #[command(flatten)]
        matching: MatchArgs,
    },
    /// Create a target playlist from liked tracks
    Liked {
        #[command(flatten)]
        playlist_args: PlaylistArgs,
        #[command(flatten)]
        matching: MatchArgs,
    },
    /// Refill an existing target playlist from a source playlist
    Update {
        /// Playlist id or link
        playlist: String,
        /// Name of the existing target playlist
        name: String,
        /// Keep current items and append
        #[arg(long)]
        append: bool,
        #[command(flatten)]
        matching: MatchArgs,
    },
    /// Transfer every public playlist of a source user
    All {
        user: String,
        /// Like every matched track
        #[arg(short, long)]
        like: bool,
        #[command(flatten)]
        matching: MatchArgs,
    },
    /// Delete target playlists whose names match a regex
    Remove { pattern: String },
    /// Show candidates, scores and the decision for one source track
    Search {
        /// Track id or link
        track: String,
        #[command(flatten)]
        matching: MatchArgs,
    },
    /// Remove every cached decision
    CacheClear,
    /// Always replace target <existing_id> with <new_id>
    FixMatch { existing_id: String, new_id: String },
    /// Build the target index from a JSON dump of catalog tracks
    ImportIndex { dump: PathBuf },
}

fn parse_confidence(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|_| format!("'{}' is not a number", s))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("confidence must be between 0 and 1, got {}", value))
    }
}

fn initialize_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn require<'a>(path: &'a Option<PathBuf>, flag: &str) -> Result<&'a Path> {
    match path {
        Some(p) => Ok(p.as_path()),
        None => bail!("{} is required for this command", flag),
    }
}

fn build_matcher(settings: &Settings, matching: &MatchArgs) -> Result<Matcher> {
    let mode = if matching.extended_search {
        ScoringMode::Extended
    } else {
        ScoringMode::Default
    };
    let threshold = settings.threshold(matching.confidence)?;
    info!("matching with {:?} scorer, confidence {}", mode, threshold);
    Ok(Matcher::new(scorer_for(mode, settings.matching.weights), threshold, settings.retry))
}

fn write_report<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write report {}", path.display()))?;
    Ok(())
}

fn print_summary(report: &PlaylistReport) {
    let s: &RunSummary = &report.summary;
    println!("\n{:=<60}", "");
    println!("Transfer complete: {} ({})", report.name, report.playlist_id);
    println!("  Tracks: {}", s.total);
    println!(
        "  Matched: {} ({} overridden, {} from cache)",
        s.accepted + s.overridden,
        s.overridden,
        s.cache_hits
    );
    println!("  Below threshold: {}", s.below_threshold);
    println!("  No candidates: {}", s.no_candidates);
    println!("  Failed: {}", s.failed);
    println!("  Skipped: {}", s.skipped);
    println!("  Added: {} (liked {}, {} mutation failures)", report.added, report.liked, report.mutation_failures);
    println!("  Match rate: {:.1}%", s.match_rate());
    println!("  Elapsed: {}", format_duration(Duration::from_secs_f64(s.elapsed_seconds)));
    println!("{:=<60}", "");

    let unmatched: Vec<_> = s.outcomes.iter().filter(|o| o.accepted_target().is_none()).collect();
    if !unmatched.is_empty() {
        println!("\nNot transferred:");
        for outcome in unmatched {
            let why = match &outcome.result {
                TrackResult::Decided { decision, .. } => {
                    format!("{} (score {:.2})", decision.reason.as_str(), decision.score)
                }
                TrackResult::Failed { error } => format!("FAILED: {}", error),
                TrackResult::Skipped { reason } => format!("SKIPPED: {}", reason),
            };
            println!("  #{:<4} {} - {}", outcome.position + 1, outcome.track, why);
        }
    }
}

fn print_search(report: &SearchReport) {
    println!("\nCandidates for '{}':", report.track.label());
    println!("{:-<80}", "");
    if report.candidates.is_empty() {
        println!("No results found.");
    }
    for scored in &report.candidates {
        let c = &scored.candidate;
        println!(
            "[{}] {:.3} {} - {} ({}) [{}]",
            c.target_id,
            scored.score,
            c.artists.join(", "),
            c.title,
            c.album.as_deref().unwrap_or("Unknown"),
            c.duration.map(|d| format!("{}s", d)).unwrap_or_else(|| "?".to_string())
        );
    }
    let d = &report.decision;
    println!("{:-<80}", "");
    println!(
        "Decision: {} target={} score={:.3}{}",
        d.reason.as_str(),
        d.target_id.as_deref().unwrap_or("-"),
        d.score,
        if report.from_cache { " (cached)" } else { "" }
    );
}

fn run_transfer(args: &Args, paths: &DataPaths, settings: &Settings, matching: &MatchArgs) -> Result<()> {
    let source_path = require(&args.source, "--source")?;
    let target_path = require(&args.target, "--target")?;
    let matcher = build_matcher(settings, matching)?;

    let source = JsonSourceCatalog::open(source_path).context("Failed to open source catalog")?;
    let target =
        SqliteTargetCatalog::open(target_path, settings.search.limit).context("Failed to open target catalog")?;
    let overrides = OverrideStore::load(&paths.overrides);
    let cache = matching
        .use_cached
        .then(|| Mutex::new(ResultCache::load(&paths.cache)));

    let transfer = Transfer {
        pipeline: TrackPipeline {
            matcher: &matcher,
            target: &target,
            cache: cache.as_ref(),
            overrides: &overrides,
        },
        source: &source,
        retry: settings.retry,
        workers: args.workers,
    };

    match &args.command {
        Command::Create {
            playlist,
            playlist_args,
            ..
        } => {
            let report = transfer.create(playlist, &playlist_args.options())?;
            print_summary(&report);
            if let Some(path) = &args.report {
                write_report(path, &report)?;
            }
        }
        Command::Liked { playlist_args, .. } => {
            let report = transfer.liked(&playlist_args.options())?;
            print_summary(&report);
            if let Some(path) = &args.report {
                write_report(path, &report)?;
            }
        }
        Command::Update {
            playlist,
            name,
            append,
            ..
        } => {
            let report = transfer.update(playlist, name, *append)?;
            print_summary(&report);
            if let Some(path) = &args.report {
                write_report(path, &report)?;
            }
        }
        Command::All { user, like, .. } => {
            let reports = transfer.all(user, *like)?;
            for report in &reports {
                print_summary(report);
            }
            if let Some(path) = &args.report {
                write_report(path, &reports)?;
            }
        }
        Command::Search { track, .. } => {
            let report = transfer.search(track)?;
            print_search(&report);
            if let Some(path) = &args.report {
                write_report(path, &report)?;
            }
        }
        _ => bail!("not a matching command"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    initialize_logging();
    set_log_only(args.log_only);

    let start = Instant::now();
    let paths = DataPaths::new(args.data_dir.clone().unwrap_or_else(default_data_dir));
    let settings_path = args.settings.clone().unwrap_or_else(|| paths.settings.clone());
    let settings = Settings::load(&settings_path)
        .with_context(|| format!("Invalid settings file {}", settings_path.display()))?;

    let inputs: Vec<&Path> = [args.source.as_deref(), args.target.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    validate_store_paths(&paths.cache, &paths.overrides, &inputs)?;

    match &args.command {
        Command::Create { matching, .. }
        | Command::Liked { matching, .. }
        | Command::Update { matching, .. }
        | Command::All { matching, .. }
        | Command::Search { matching, .. } => {
            let matching = *matching;
            run_transfer(&args, &paths, &settings, &matching)?;
        }
        Command::Remove { pattern } => {
            let regex = Regex::new(pattern).with_context(|| format!("Invalid pattern '{}'", pattern))?;
            let target = SqliteTargetCatalog::open(require(&args.target, "--target")?, settings.search.limit)
                .context("Failed to open target catalog")?;
            let removed = remove_playlists(&target, &settings.retry, &regex)?;
            println!("Removed {} playlist(s)", removed.len());
            for playlist in &removed {
                println!("  {} ({})", playlist.name, playlist.id);
            }
        }
        Command::CacheClear => {
            let removed = ResultCache::load(&paths.cache).clear()?;
            println!("Cleared {} cached decision(s) from {}", removed, paths.cache.display());
        }
        Command::FixMatch { existing_id, new_id } => {
            let mut overrides = OverrideStore::load(&paths.overrides);
            overrides.set_override(existing_id, new_id)?;
            println!("Override saved: {} -> {} ({} total)", existing_id, new_id, overrides.len());
        }
        Command::ImportIndex { dump } => {
            let target = require(&args.target, "--target")?;
            if target == dump.as_path() {
                bail!("Safety check failed: index '{}' cannot be the dump file", target.display());
            }
            let count = import_index(target, dump).context("Failed to build target index")?;
            println!("\n{:=<60}", "");
            println!("Import complete!");
            println!("  Tracks: {}", count);
            println!("  Index: {}", target.display());
            println!("{:=<60}", "");
        }
    }

    info!("done in {}", format_duration(start.elapsed()));
    Ok(())
}
