use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use idxv::models::{ScanConfig, SourceCollection};
use idxv::{DefaultFactory, LoaderConfig, ViewSession, ViewUpdate};

/// Stop once nothing has happened for this long.
const IDLE_TIMEOUT: Duration = Duration::from_secs(2);

struct Args {
    path: PathBuf,
    /// Step through every image once.
    walk: bool,
    squared: bool,
}

fn parse_args() -> Result<Args> {
    let mut path = None;
    let mut walk = false;
    let mut squared = false;
    for arg in std::env::args_os().skip(1) {
        match arg.to_str() {
            Some("--walk") => walk = true,
            Some("--squared") => squared = true,
            _ if path.is_none() => path = Some(PathBuf::from(arg)),
            _ => bail!("Unexpected argument {:?}", arg),
        }
    }
    let Some(path) = path else {
        bail!("Usage: idxv [--walk] [--squared] <image-or-directory>");
    };
    Ok(Args {
        path,
        walk,
        squared,
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("idxv=info".parse().context("Invalid log directive")?),
        )
        .init();

    let args = parse_args()?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;
    runtime.block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
    let (dir, file) = if args.path.is_dir() {
        (args.path.clone(), None)
    } else {
        let dir = args
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        (dir, Some(args.path.clone()))
    };

    let collection = SourceCollection::scan(dir.clone(), ScanConfig::default()).await?;
    if collection.is_empty() {
        bail!("No images found in {:?}", dir);
    }
    let start = match &file {
        Some(file) => collection
            .position_of(file)
            .with_context(|| format!("Not a supported image: {:?}", file))?,
        None => 0,
    };
    let len = collection.len();

    let config = LoaderConfig::from_env().with_default_thumbnail_dir()?;
    let mut session = ViewSession::new(Arc::new(DefaultFactory::new()), config);
    log_update(&session.open_collection(collection, start)?);

    let requested = session.request_thumbnails(0..len, args.squared);
    info!(requested, "Requested thumbnails");

    let mut remaining_steps = if args.walk { len.saturating_sub(1) } else { 0 };
    if remaining_steps > 0 {
        remaining_steps -= 1;
        session.next()?;
    }
    // animation ticks do not count as progress
    let mut last_progress = Instant::now();
    loop {
        let wait = IDLE_TIMEOUT.saturating_sub(last_progress.elapsed());
        match tokio::time::timeout(wait, session.next_update()).await {
            Ok(Some(ViewUpdate::FrameAdvanced { .. })) => continue,
            Ok(Some(update)) => {
                last_progress = Instant::now();
                log_update(&update);
                if matches!(update, ViewUpdate::Displayed { .. } | ViewUpdate::LoadFailed { .. })
                    && remaining_steps > 0
                {
                    remaining_steps -= 1;
                    session.next()?;
                }
            }
            Ok(None) => break,
            Err(_) if remaining_steps > 0 => {
                warn!("No progress, skipping ahead");
                last_progress = Instant::now();
                remaining_steps -= 1;
                session.next()?;
            }
            Err(_) => break,
        }
    }

    info!(
        loaded = session.cache().loaded_count(),
        thumbnails_pending = session.thumbnails().pending_count(),
        "Done"
    );
    Ok(())
}

fn log_update(update: &ViewUpdate) {
    match update {
        ViewUpdate::Displayed {
            index,
            dimensions,
            animated,
        } => info!(index, ?dimensions, animated, "Displayed"),
        ViewUpdate::LoadFailed { index, error } => warn!(index, %error, "Load failed"),
        ViewUpdate::FrameAdvanced { index } => tracing::trace!(index, "Frame advanced"),
        ViewUpdate::Thumbnail { index, thumbnail } => {
            info!(index, width = thumbnail.width(), height = thumbnail.height(), "Thumbnail ready")
        }
        ViewUpdate::ThumbnailFailed { index, error } => {
            warn!(index, %error, "Thumbnail failed")
        }
        ViewUpdate::CollectionChanged { len } => info!(len, "Collection loaded"),
    }
}
