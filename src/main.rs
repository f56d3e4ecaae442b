use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tour_engine::state::progress::ProgressTracker;
use tour_engine::thumbs::{Delivery, SurfaceId, ThumbnailCache, ThumbnailKey, ThumbnailRequest};
use tour_engine::{EngineConfig, LoadedTour, ProgressState, SessionStore, TourCatalog};

/// Inspect tours, saved follow sessions and thumbnails
#[derive(Debug, Parser)]
#[command(name = "tour-engine", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the tours found in the tours directory
    List {
        /// Directory to scan instead of the configured one
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Show a tour's items and the progress of its saved session
    Show {
        /// Path to a tour file
        tour: PathBuf,
    },
    /// Forget the saved session of a tour
    Reset {
        /// Path to a tour file
        tour: PathBuf,
    },
    /// Decode an image the way the tour UI would display it
    Thumbnail {
        image: PathBuf,
        #[arg(long, default_value_t = 256)]
        width: u32,
        #[arg(long, default_value_t = 256)]
        height: u32,
        /// Where to write the decoded thumbnail
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::try_from_env()?;
    let catalog = TourCatalog::new(config.default_item_range);

    match cli.command {
        Command::List { dir } => {
            let dir = dir.unwrap_or_else(|| config.tours_dir.clone());
            list_tours(&catalog, &config, &dir)
        }
        Command::Show { tour } => show_tour(&catalog, &config, &tour),
        Command::Reset { tour } => {
            let loaded = catalog.load(&tour)?;
            let store = SessionStore::open(&config.session_db)?;
            if store.clear(loaded.tour.name())? {
                println!("🔄 Cleared saved progress for '{}'", loaded.tour.name());
            } else {
                println!("No saved progress for '{}'", loaded.tour.name());
            }
            Ok(())
        }
        Command::Thumbnail {
            image,
            width,
            height,
            out,
        } => make_thumbnail(&config, image, width, height, out).await,
    }
}

fn list_tours(catalog: &TourCatalog, config: &EngineConfig, dir: &Path) -> Result<()> {
    println!("🔍 Scanning folder: {}", dir.display());

    let tours = catalog.discover(dir);
    if tours.is_empty() {
        println!("No tours found.");
        return Ok(());
    }

    let store = SessionStore::open(&config.session_db)?;
    for loaded in &tours {
        let tracker = restore_tracker(&store, loaded)?;
        let tour = &loaded.tour;
        println!(
            "📍 {} ({} items, {}{}) - {}/{} visited",
            tour.name(),
            tour.len(),
            if tour.enforce_order() { "ordered" } else { "free roam" },
            if tour.gps_enabled() { ", GPS" } else { "" },
            tracker.visited_count(),
            tour.len()
        );
    }
    Ok(())
}

fn show_tour(catalog: &TourCatalog, config: &EngineConfig, path: &Path) -> Result<()> {
    let loaded = catalog.load(path)?;
    for warning in &loaded.warnings {
        println!("⚠️  Skipped item #{}: {}", warning.index, warning.reason);
    }

    let store = SessionStore::open(&config.session_db)?;
    let tracker = restore_tracker(&store, &loaded)?;
    let tour = &loaded.tour;

    println!("📍 {}", tour.name());
    println!(
        "   GPS filtering: {} (range {} m), order enforced: {}",
        tour.gps_enabled(),
        tour.item_range(),
        tour.enforce_order()
    );

    for item in tour.items() {
        let marker = if tracker.current() == Some(item.id()) {
            "▶"
        } else if tracker.is_visited(item.id()) {
            "✓"
        } else {
            " "
        };
        println!("   {} {} {}", marker, item.id(), item.name());
    }

    match tracker.state() {
        ProgressState::NotStarted => println!("Not started."),
        ProgressState::Complete => println!("✅ Tour complete!"),
        ProgressState::InProgress if tour.enforce_order() => {
            if let Some(next) = tracker.next_item().and_then(|id| tour.item(id)) {
                println!("Next: {}", next.name());
                if !next.directions().is_empty() {
                    println!("   {}", next.directions());
                }
            }
        }
        ProgressState::InProgress => {
            println!("{} items remaining.", tracker.remaining().len());
        }
    }
    Ok(())
}

fn restore_tracker(store: &SessionStore, loaded: &LoadedTour) -> Result<ProgressTracker> {
    let saved = store
        .load(loaded.tour.name())
        .with_context(|| format!("reading saved session for '{}'", loaded.tour.name()))?;

    Ok(match saved {
        Some(saved) => ProgressTracker::restore(&loaded.tour, &saved.snapshot),
        None => ProgressTracker::new(&loaded.tour),
    })
}

async fn make_thumbnail(
    config: &EngineConfig,
    image: PathBuf,
    width: u32,
    height: u32,
    out: Option<PathBuf>,
) -> Result<()> {
    let cache = ThumbnailCache::new(config.thumbnail_capacity);
    let key = ThumbnailKey::new(image, width, height);

    let delivery = match cache.request(SurfaceId(0), key.clone()) {
        ThumbnailRequest::Ready(thumbnail) => Delivery::Delivered(thumbnail),
        ThumbnailRequest::Pending(pending) => pending.wait().await,
    };

    let thumbnail = match delivery {
        Delivery::Delivered(thumbnail) => thumbnail,
        Delivery::Unavailable(e) => return Err(e.into()),
        Delivery::Superseded => bail!("thumbnail request was superseded"),
    };

    println!(
        "📸 {} -> {}x{}",
        key.source.display(),
        thumbnail.width(),
        thumbnail.height()
    );

    if let Some(out) = out {
        thumbnail
            .save(&out)
            .with_context(|| format!("writing {}", out.display()))?;
        println!("💾 Saved thumbnail: {}", out.display());
    }
    Ok(())
}
