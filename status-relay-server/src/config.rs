use anyhow::{bail, Context};
use clap::Parser;
use serde::Deserialize;
use status_relay::{ChannelConfig, TerminalPolicy};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the `status-relay-server` binary.
///
/// Every flag can also be set through the environment variable named next
/// to it. The topic table and the bucket name have no defaults: the service
/// cannot hand work to the processing worker without them.
#[derive(Parser, Debug, Clone)]
#[command(name = "status-relay-server")]
#[command(about = "Upload intake with live processing status over WebSocket")]
pub struct CliArgs {
    /// Host to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// JSON routing table for outbound topics, e.g. `{"NewImage": "arn:..."}`
    #[arg(long, env = "COPILOT_SNS_TOPIC_ARNS")]
    pub sns_topic_arns: String,

    /// Bucket that receives uploaded artifacts
    #[arg(long, env = "RECEIPTUPLOADS_NAME")]
    pub bucket: String,

    /// Local directory backing the artifact store
    #[arg(long, env = "STORAGE_ROOT")]
    pub storage_root: Option<PathBuf>,

    /// Deployment stage; `prod` turns on static file serving
    #[arg(long, env = "STAGE")]
    pub stage: Option<String>,

    /// Directory served under `/static` in prod
    #[arg(long, env = "STATIC_DIR", default_value = "/var/www/html")]
    pub static_dir: PathBuf,

    /// Comma-separated status labels that end a lifecycle
    #[arg(long, env = "TERMINAL_STATUSES", default_value = "Accepted")]
    pub terminal_statuses: String,

    /// Undelivered statuses buffered per upload
    #[arg(long, env = "CHANNEL_CAPACITY", default_value_t = 3)]
    pub channel_capacity: usize,

    /// How long a webhook waits on a full buffer before dropping the oldest status
    #[arg(long, env = "PUBLISH_TIMEOUT_MS", default_value_t = 250)]
    pub publish_timeout_ms: u64,

    /// Lifetime of a status channel that never sees a terminal status
    #[arg(long, env = "CHANNEL_TTL_SECS", default_value_t = 900)]
    pub channel_ttl_secs: u64,

    /// How often expired channels are swept
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 30)]
    pub sweep_interval_secs: u64,

    /// HTTP endpoint that accepts outbound publish requests; logs only when unset
    #[arg(long, env = "PUBLISH_ENDPOINT")]
    pub publish_endpoint: Option<String>,

    /// Largest accepted upload body in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    /// Enable CORS for all origins
    #[arg(long)]
    pub cors: bool,
}

/// Outbound topic routing table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnsTopics {
    pub new_image: String,
}

impl SnsTopics {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let topics: SnsTopics =
            serde_json::from_str(raw).context("COPILOT_SNS_TOPIC_ARNS is not a valid topic table")?;
        if topics.new_image.trim().is_empty() {
            bail!("COPILOT_SNS_TOPIC_ARNS has an empty NewImage topic");
        }
        Ok(topics)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub topics: SnsTopics,
    pub bucket: String,
    pub storage_root: PathBuf,
    pub static_dir: Option<PathBuf>,
    pub terminal_policy: TerminalPolicy,
    pub channel: ChannelConfig,
    pub channel_ttl: Duration,
    pub sweep_interval: Duration,
    pub publish_endpoint: Option<String>,
    pub max_upload_bytes: usize,
    pub cors: bool,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let topics = SnsTopics::parse(&args.sns_topic_arns)?;

        let bucket = args.bucket.trim().to_string();
        if bucket.is_empty() {
            bail!("RECEIPTUPLOADS_NAME must not be empty");
        }
        if bucket.contains(['/', '\\']) || bucket == "." || bucket == ".." {
            bail!("RECEIPTUPLOADS_NAME is not a valid bucket name: {bucket}");
        }

        let terminal_policy = TerminalPolicy::new(args.terminal_statuses.split(','))
            .context("TERMINAL_STATUSES must name at least one status")?;

        if args.channel_capacity == 0 {
            bail!("CHANNEL_CAPACITY must be greater than 0");
        }
        if args.sweep_interval_secs == 0 {
            bail!("SWEEP_INTERVAL_SECS must be greater than 0");
        }
        if args.channel_ttl_secs == 0 {
            bail!("CHANNEL_TTL_SECS must be greater than 0");
        }

        let storage_root = args
            .storage_root
            .unwrap_or_else(|| std::env::temp_dir().join("status-relay"));

        let static_dir = match args.stage.as_deref() {
            Some("prod") => Some(args.static_dir),
            _ => None,
        };

        Ok(Self {
            host: args.host,
            port: args.port,
            topics,
            bucket,
            storage_root,
            static_dir,
            terminal_policy,
            channel: ChannelConfig {
                capacity: args.channel_capacity,
                publish_timeout: Duration::from_millis(args.publish_timeout_ms),
            },
            channel_ttl: Duration::from_secs(args.channel_ttl_secs),
            sweep_interval: Duration::from_secs(args.sweep_interval_secs),
            publish_endpoint: args.publish_endpoint.filter(|s| !s.trim().is_empty()),
            max_upload_bytes: args.max_upload_bytes,
            cors: args.cors,
        })
    }
}
