//! Uploads one file and prints its events as JSON lines on stdout.
//!
//! ```bash
//! S3UP_TOKEN=... S3UP_IDENTITY_ID=us-east-1:... \
//!     s3up --bucket my-bucket --folder images --region us-east-1 \
//!     --provider-name login.example.com ./a.jpg
//! ```
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `info`).
//! Ctrl-C cancels the upload.

use s3up::UploadOrchestrator;
use s3up::config::{StaticConfigProvider, UploaderConfig};
use s3up::credential::CognitoIdentityBroker;
use s3up::request::StartUploadArgs;

use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version)]
struct Opt {
    /// Local file to upload.
    source: PathBuf,

    #[arg(long)]
    bucket: String,

    /// Folder (key prefix) to upload into.
    #[arg(long)]
    folder: String,

    /// Object name inside the folder. Defaults to the source file name.
    #[arg(long)]
    file_name: Option<String>,

    #[arg(long)]
    region: String,

    /// Upload id reported in events. Defaults to a random UUID.
    #[arg(long)]
    upload_id: Option<String>,

    /// Developer-authenticated identity token.
    #[arg(long, env = "S3UP_TOKEN", hide_env_values = true)]
    token: String,

    #[arg(long, env = "S3UP_IDENTITY_ID")]
    identity_id: String,

    #[arg(long)]
    provider_name: String,

    #[arg(long)]
    identity_pool_id: Option<String>,

    #[arg(long)]
    content_type: Option<String>,

    /// Multipart part size in bytes.
    #[arg(long, default_value_t = 8 * 1024 * 1024)]
    part_size: u64,

    /// Parts in flight at once.
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Custom endpoint for S3-compatible services.
    #[arg(long)]
    endpoint_url: Option<String>,

    #[arg(long)]
    force_path_style: bool,

    /// Custom endpoint for the identity service.
    #[arg(long)]
    identity_endpoint_url: Option<String>,
}

impl Opt {
    fn uploader_config(&self) -> UploaderConfig {
        let mut config = UploaderConfig::default();
        config.part_size = self.part_size;
        config.max_concurrent_parts = self.concurrency;
        config.endpoint_url.clone_from(&self.endpoint_url);
        config.force_path_style = self.force_path_style;
        config
    }

    fn start_args(self) -> Result<StartUploadArgs> {
        let file_name = match self.file_name {
            Some(name) => name,
            None => self
                .source
                .file_name()
                .and_then(|s| s.to_str())
                .map(str::to_owned)
                .with_context(|| format!("cannot derive a file name from {}", self.source.display()))?,
        };
        Ok(StartUploadArgs {
            upload_id: self.upload_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            bucket: self.bucket,
            source_path: self.source.to_string_lossy().into_owned(),
            file_name,
            upload_folder: self.folder,
            region: self.region,
            identity_pool_id: self.identity_pool_id,
            token: self.token,
            identity_id: self.identity_id,
            provider_name: self.provider_name,
            content_type: self.content_type,
        })
    }
}

fn setup_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let enable_color = io::stderr().is_terminal();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(enable_color)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();
    setup_tracing();
    run(opt).await
}

async fn run(opt: Opt) -> Result<()> {
    let config = opt.uploader_config();
    let mut broker = CognitoIdentityBroker::new();
    if let Some(url) = &opt.identity_endpoint_url {
        broker = broker.with_endpoint_url(url);
    }

    let orchestrator = {
        let mut b = UploadOrchestrator::builder();
        b.set_broker(broker);
        b.set_config(Arc::new(StaticConfigProvider::new(Arc::new(config))));
        b.build()
    };

    let mut events = orchestrator.events().channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => error!(%err, "failed to encode event"),
            }
        }
    });

    let request = opt.start_args()?.into_request()?;
    let mut pending = orchestrator.start(request)?;
    let upload_id = pending.upload_id().to_owned();

    let result = tokio::select! {
        res = &mut pending => res,
        _ = tokio::signal::ctrl_c() => {
            warn!(%upload_id, "interrupted, cancelling upload");
            orchestrator.cancel(&upload_id);
            pending.await
        }
    };

    orchestrator.events().unsubscribe();
    printer.await?;

    match result {
        Ok(url) => {
            info!(%upload_id, %url, "upload completed");
            Ok(())
        }
        Err(err) => bail!("{}: {err}", err.code()),
    }
}
