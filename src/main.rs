use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use feedstream::{ClientConfig, FileConfig, LogDetail, StreamClient, StreamEvent};

#[derive(Parser)]
#[command(name = "feedstream", version, about = "Print a live social feed to stdout")]
struct Args {
    /// Path to the TOML config carrying the credential keys
    #[arg(long)]
    config: Option<PathBuf>,

    /// Track keywords on the filter stream instead of sampling
    #[arg(long)]
    track: Option<String>,

    /// Log request/response headers
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug {
        "feedstream=debug"
    } else {
        "feedstream=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => match FileConfig::from_env() {
            Some(cfg) => cfg,
            None => {
                let path = FileConfig::default_path()
                    .ok_or_else(|| anyhow!("no config directory available on this platform"))?;
                FileConfig::load(&path)?
            }
        },
    };

    let config = ClientConfig {
        log_detail: if args.debug {
            LogDetail::Headers
        } else {
            LogDetail::None
        },
        ..ClientConfig::default()
    };

    let client = StreamClient::new(file.keys(), file.endpoints(), config)?;
    let mut subscription = match &args.track {
        Some(track) => client.connect_filter(track).await?,
        None => client.connect_sample().await?,
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                subscription.cancel();
                break;
            }
            event = subscription.recv() => match event {
                Some(StreamEvent::Tweet(tweet)) => {
                    let author = tweet.author.as_deref().unwrap_or("?");
                    println!("@{author}: {}", tweet.text);
                }
                Some(StreamEvent::Invalid(e)) => warn!("skipping message unit: {e}"),
                Some(StreamEvent::Interrupted(e)) => {
                    return Err(anyhow!("stream interrupted: {e}"));
                }
                None => break,
            },
        }
    }

    Ok(())
}
