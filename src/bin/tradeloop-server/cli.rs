use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Demo/ops CLI for the discovery engine's thin `axum` surface.
/// Not the core library's public API — that's `TenantRuntime` itself.
#[derive(clap::Parser, Clone)]
#[clap(version = tradeloop_engine::build_version())]
pub(crate) struct Opt {
    #[clap(long, short)]
    pub(crate) verbose: bool,
    #[clap(long, default_value = "127.0.0.1:8080", env = "TRADELOOP_BIND")]
    pub(crate) bind: SocketAddr,
    /// Directory for the JSON-per-tenant `FileStore`. Omit to run with an
    /// in-memory `Store` that doesn't survive a restart.
    #[clap(long, env = "TRADELOOP_STORE_DIR")]
    pub(crate) store_dir: Option<PathBuf>,
    /// Optional base TOML config file layered under `TRADELOOP_`-prefixed
    /// env vars (see `config::TenantConfig::load`).
    #[clap(long, env = "TRADELOOP_CONFIG_FILE")]
    pub(crate) config_file: Option<PathBuf>,
}

impl Opt {
    pub(crate) fn init_logger(&self) -> Result<()> {
        let env_directive = if self.verbose {
            format!("{}=debug,tradeloop_engine=debug,info", env!("CARGO_CRATE_NAME")).parse()?
        } else {
            Level::INFO.into()
        };

        tracing_subscriber::registry()
            .with(fmt::Layer::default().log_internal_errors(true).and_then(EnvFilter::from_default_env().add_directive(env_directive)))
            .init();
        Ok(())
    }
}
