use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use reqwest::Url;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tumblr_archiver::accumulator::{AccumulateError, ImageAccumulator};
use tumblr_archiver::config;
use tumblr_archiver::manifest::Manifest;
use tumblr_archiver::model::TransferItem;
use tumblr_archiver::pagination::PaginationState;
use tumblr_archiver::progress::LoggingObserver;
use tumblr_archiver::resume::{self, ResumePoint};
use tumblr_archiver::transfer::{self, BatchTransferEngine, DirectorySink, HttpFetcher};
use tumblr_archiver::tumblr::{Listing, TumblrClient};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ListingArg {
    Likes,
    Posts,
}

impl From<ListingArg> for Listing {
    fn from(arg: ListingArg) -> Self {
        match arg {
            ListingArg::Likes => Listing::Likes,
            ListingArg::Posts => Listing::Posts,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Collect images from a Tumblr blog's likes or posts and download them"
)]
struct Args {
    /// Blog name or host, e.g. `staff` or `staff.tumblr.com`
    blog: String,

    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Which listing to walk
    #[arg(long, value_enum, default_value = "likes")]
    listing: ListingArg,

    /// Number of images to collect (overrides extraction.target_count)
    #[arg(long)]
    target: Option<usize>,

    /// Start at this offset (mutually exclusive with --before)
    #[arg(long)]
    offset: Option<u32>,

    /// Start with posts older than this unix timestamp (mutually exclusive with --offset)
    #[arg(long)]
    before: Option<i64>,

    /// Continue from the pagination state saved by the previous run
    #[arg(long)]
    resume: bool,

    /// Output directory (default: {data_dir}/media/{blog})
    #[arg(long)]
    out: Option<PathBuf>,

    /// Only collect and print the image list; do not download
    #[arg(long)]
    collect_only: bool,

    /// Replace files that already exist in the output directory
    #[arg(long)]
    overwrite: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let data_dir = cfg.app.resolved_data_dir();
    let listing = Listing::from(args.listing);
    let state_path = resume::state_path(&data_dir, &args.blog, listing.as_str());

    let ResumePoint { state: start, pending } = match (args.offset, args.before) {
        (None, None) if args.resume => resume::load_state(&state_path)
            .await?
            .unwrap_or_default(),
        (None, None) => ResumePoint::default(),
        (offset, before) => ResumePoint {
            state: PaginationState::from_parts(offset, before)?,
            pending: Vec::new(),
        },
    };
    if !start.has_more() && pending.is_empty() {
        info!(blog = %args.blog, "saved state says the listing is exhausted; nothing to do");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing current item");
            ctrl_c.cancel();
        }
    });

    let base_url = Url::parse(&cfg.tumblr.base_url).context("invalid tumblr.base_url")?;
    let client = TumblrClient::with_base_url(cfg.tumblr.api_key.clone(), base_url)?
        .listing(listing)
        .rate_limit(cfg.rate_limit_policy());

    let mut options = cfg.accumulator_options();
    if let Some(target) = args.target {
        options.target_count = target;
    }

    let accumulator = ImageAccumulator::new(&client, options);
    let observer = LoggingObserver::new("collect");
    let (collected, interrupted) =
        match accumulator.run_from(&args.blog, start, pending, &cancel, &observer).await {
            Ok(acc) => (acc, None),
            Err(AccumulateError::Interrupted { partial, source }) => {
                error!(
                    error = %source,
                    kept = partial.items.len(),
                    "listing interrupted; keeping partial result"
                );
                (*partial, Some(source))
            }
            Err(err) => return Err(err.into()),
        };

    let resume_point = ResumePoint {
        state: collected.state,
        pending: collected.overflow.clone(),
    };
    resume::save_state(&state_path, &resume_point).await?;
    info!(
        blog = %args.blog,
        images = collected.items.len(),
        carried_over = collected.overflow.len(),
        pages = collected.pages_fetched,
        total = ?collected.total_source_count,
        "collected images"
    );

    if args.collect_only {
        println!("{}", serde_json::to_string_pretty(&collected.items)?);
    } else {
        let out_dir = args
            .out
            .clone()
            .unwrap_or_else(|| data_dir.join("media").join(&args.blog));
        let items: Vec<TransferItem> = collected
            .items
            .iter()
            .map(TransferItem::for_media)
            .collect();

        let fetcher = HttpFetcher::new(cfg.request_timeout())?;
        let engine = BatchTransferEngine::new(fetcher, cfg.transfer_options());
        let sink = DirectorySink::new(&out_dir).overwrite(args.overwrite);
        let (downloaded, saved) = transfer::download_to(
            &engine,
            &sink,
            items,
            &cancel,
            &LoggingObserver::new("download"),
            &LoggingObserver::new("save"),
        )
        .await;

        let mut manifest = Manifest::new(
            &args.blog,
            listing.as_str(),
            collected.items.clone(),
            collected.total_source_count,
        );
        manifest.record_transfer(&downloaded);
        manifest.record_persist(&saved);
        let manifest_path = manifest.write(&out_dir).await?;

        info!(
            succeeded = downloaded.succeeded,
            failed = downloaded.failed + saved.failed,
            saved = saved.saved,
            cancelled = downloaded.cancelled || saved.cancelled,
            manifest = %manifest_path.display(),
            "{} succeeded, {} failed",
            saved.saved,
            downloaded.failed + saved.failed
        );
    }

    if let Some(err) = interrupted {
        return Err(err).context("listing did not complete; rerun with --resume to continue");
    }
    Ok(())
}
