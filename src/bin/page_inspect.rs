use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use std::path::PathBuf;

use tumblr_archiver::accumulator::PostSource;
use tumblr_archiver::config;
use tumblr_archiver::extract::extract_media;
use tumblr_archiver::pagination::PageRequest;
use tumblr_archiver::tumblr::{Listing, TumblrClient};

#[derive(Debug, Parser)]
#[command(author, version, about = "Fetch one listing page and print the images found on it")]
struct Args {
    blog: String,

    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Read the blog's own posts instead of its likes
    #[arg(long)]
    posts: bool,

    #[arg(long, default_value = "20")]
    limit: u32,

    #[arg(long)]
    offset: Option<u32>,

    #[arg(long)]
    before: Option<i64>,
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

    let offset = match (args.offset, args.before) {
        (None, None) => Some(0),
        (offset, _) => offset,
    };
    let request = PageRequest::from_params(args.limit, offset, args.before)?;

    let listing = if args.posts { Listing::Posts } else { Listing::Likes };
    let base_url = Url::parse(&cfg.tumblr.base_url).context("invalid tumblr.base_url")?;
    let client = TumblrClient::with_base_url(cfg.tumblr.api_key.clone(), base_url)?
        .listing(listing)
        .rate_limit(cfg.rate_limit_policy());

    let page = client.fetch_page(&args.blog, &request).await?;
    println!(
        "status={} posts={} total={:?}",
        page.meta.status,
        page.posts.len(),
        page.total_count
    );
    for post in &page.posts {
        let media = extract_media(post);
        println!(
            "{} {} ts={} images={}",
            post.post_id(),
            post.kind.as_str(),
            post.cursor_timestamp(),
            media.len()
        );
        for item in media {
            println!("  {} {}x{} {}", item.id, item.width, item.height, item.url);
        }
    }
    Ok(())
}
