//! Startup configuration (Ambient §4, §6 "Environment"). Parses process
//! arguments and falls back to the documented environment variables, in the
//! style of `wallet/src/config.rs` / `wallet/src/main.rs`'s `clap::Parser`
//! derives with `#[clap(long, env = "...")]` fields.

use clap::Parser;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "GroupsIO mailing-list control plane")]
pub struct Config {
    /// HTTP bind address for the REST API.
    #[clap(long, env = "BIND_ADDRESS", default_value = DEFAULT_BIND_ADDRESS)]
    pub bind_address: String,

    /// NATS server URL for the event bus.
    #[clap(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// Path to NATS credentials file, if the deployment requires auth.
    #[clap(long, env = "NATS_CREDENTIALS")]
    pub nats_credentials: Option<String>,

    /// Shared secret used to verify `x-groupsio-signature` on inbound webhooks.
    #[clap(long, env = "GROUPSIO_WEBHOOK_SECRET")]
    pub groupsio_webhook_secret: String,

    /// Log level filter (error, warn, info, debug, trace).
    #[clap(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// When set, disables JWT verification and treats every request as this
    /// principal. Mock/local development only (§6 "Environment").
    #[clap(long, env = "JWT_AUTH_DISABLED_MOCK_LOCAL_PRINCIPAL")]
    pub jwt_auth_disabled_mock_local_principal: Option<String>,

    /// Number of HTTP worker threads.
    #[clap(long, default_value_t = num_cpus())]
    pub http_workers: usize,
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

impl Config {
    pub fn load() -> Self {
        Config::parse()
    }
}
