use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tradeloop_engine::config::TenantConfig;
use tradeloop_engine::store::{FileStore, InMemoryStore, Store};
use tradeloop_engine::webhook::ReqwestTransport;

mod cli;
mod routes;
mod state;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
    let opt = cli::Opt::parse();
    opt.init_logger()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?
        .block_on(run(opt))
}

async fn run(opt: cli::Opt) -> Result<()> {
    let config = TenantConfig::load(opt.config_file.as_deref()).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let store: Arc<dyn Store> = match &opt.store_dir {
        Some(dir) => Arc::new(FileStore::new(dir.clone())),
        None => Arc::new(InMemoryStore::new()),
    };

    let state = state::AppState::new(store, Arc::new(ReqwestTransport::new()), config);
    let router = routes::router(state);

    let listener = TcpListener::bind(opt.bind)
        .await
        .with_context(|| format!("binding {}", opt.bind))?;
    tracing::info!(bind = %opt.bind, "tradeloop-server: listening");
    axum::serve(listener, router).await.context("serving http")?;
    Ok(())
}
