use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use simrs::core::{
    CancellationToken, CandidateDiscovery, RankOutcome, RankProgress, SimilarityConfig,
    SimilarityRanker,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "simrs", version, about = "Find visually similar images")]
struct Cli {
    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// JSON file with `resize`, `threshold_percent` and `weights`
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Thumbnail side length used for fingerprints (default: 32)
    #[arg(long, value_name = "PX")]
    resize: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Rank the images in a directory by similarity to a reference image
    Similar {
        /// Image to compare against
        #[arg(short, long, value_name = "FILE")]
        reference: PathBuf,
        /// Directory to search
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Only report images scoring above this percentage (default: 90)
        #[arg(short, long, value_name = "PERCENT")]
        threshold: Option<f64>,
        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Compare two images feature by feature
    Compare {
        first: PathBuf,
        second: PathBuf,
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Print the fingerprint of an image as JSON
    Fingerprint {
        image: PathBuf,
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Similar {
            reference,
            path,
            threshold,
            json,
            config,
        } => {
            let config = load_config(&config, threshold)?;
            run_similar(&reference, &path, config, json).await?;
        }

        Commands::Compare {
            first,
            second,
            config,
        } => {
            let ranker = SimilarityRanker::new(load_config(&config, None)?)?;
            let a = ranker
                .extract(&first)
                .await
                .with_context(|| format!("Failed to process {}", first.display()))?;
            let b = ranker
                .extract(&second)
                .await
                .with_context(|| format!("Failed to process {}", second.display()))?;
            let breakdown = ranker.scorer().breakdown(&a, &b)?;

            println!("▶ {} ↔ {}", first.display(), second.display());
            println!("   perceptual hash  {:>7.2}%", breakdown.perceptual);
            println!("   difference hash  {:>7.2}%", breakdown.difference);
            println!("   color histogram  {:>7.2}%", breakdown.color);
            println!("   edge hash        {:>7.2}%", breakdown.edge);
            println!("   combined         {:>7.2}%", breakdown.combined);
        }

        Commands::Fingerprint { image, config } => {
            let ranker = SimilarityRanker::new(load_config(&config, None)?)?;
            let features = ranker
                .extract(&image)
                .await
                .with_context(|| format!("Failed to process {}", image.display()))?;
            println!("{}", serde_json::to_string_pretty(&features)?);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

/// Defaults, then the config file, then command-line flags.
fn load_config(args: &ConfigArgs, threshold: Option<f64>) -> Result<SimilarityConfig> {
    let mut config = match &args.config {
        Some(path) => SimilarityConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => SimilarityConfig::default(),
    };

    if let Some(resize) = args.resize {
        config.resize = resize;
    }
    if let Some(threshold) = threshold {
        config.threshold_percent = threshold;
    }

    config.validate().context("Invalid similarity configuration")?;
    Ok(config)
}

async fn run_similar(
    reference: &Path,
    dir: &Path,
    config: SimilarityConfig,
    json: bool,
) -> Result<()> {
    println!("▶ Searching {} for images like {}", dir.display(), reference.display());
    let candidates = scan_directory(dir)?;
    if candidates.is_empty() {
        println!("No images found in {}", dir.display());
        return Ok(());
    }

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<RankProgress>();
    let ranker = SimilarityRanker::new(config)?.with_progress_sender(progress_tx);

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel();
        }
    });

    let bar = ProgressBar::new(candidates.len() as u64);
    bar.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )?);
    let bar_handle = bar.clone();
    let progress_task = tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            bar_handle.set_position(progress.processed as u64);
            bar_handle.set_message(format!(
                "Comparing images ({}/{})",
                progress.processed, progress.total
            ));
        }
    });

    let start = Instant::now();
    let outcome = ranker.rank(reference, &candidates, &cancel).await?;
    let elapsed = start.elapsed();

    // Closes the progress channel so the forwarding task finishes
    drop(ranker);
    progress_task.await?;
    bar.finish_and_clear();
    println!("⏱ comparing {} images took {:.2?}", candidates.len(), elapsed);

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

fn print_outcome(outcome: &RankOutcome) {
    if outcome.matches.is_empty() {
        println!("No similar images found.");
    } else {
        println!("Found {} similar image(s):", outcome.matches.len());
        for result in &outcome.matches {
            println!(
                "   {:>7.2}%  {}",
                result.similarity_percent,
                result.path.display()
            );
        }
    }

    if !outcome.skipped.is_empty() {
        println!("\n⚠️  Skipped {} unreadable image(s):", outcome.skipped.len());
        for skipped in &outcome.skipped {
            println!("   {} ({})", skipped.path.display(), skipped.reason);
        }
    }

    if outcome.cancelled {
        println!(
            "\n⚠️  Cancelled after {}/{} images; results are incomplete.",
            outcome.processed, outcome.total
        );
    }
}

/// Recursively walk `dir`, returning a sorted Vec of image file paths.
fn scan_directory(dir: &Path) -> Result<Vec<PathBuf>> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message("Scanning for images…");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let images = CandidateDiscovery::new()
        .discover(dir)
        .with_context(|| format!("Failed to scan {}", dir.display()))?;

    spinner.finish_with_message(format!("Scan complete: {} image(s)", images.len()));
    Ok(images)
}
