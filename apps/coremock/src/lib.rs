#![forbid(unsafe_code)]

use std::future::Future;

use anyhow::Result;
use chrono::Utc;
use tokio::net::TcpListener;
use tracing::info;

use crate::{
    config::Config,
    server::{AppState, build_router},
};

pub mod apps;
pub mod config;
pub mod events;
pub mod faults;
pub mod lists;
pub mod runtime_config;
pub mod server;

/// Wall-clock Unix time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[must_use]
pub fn build_state(config: Config) -> AppState {
    AppState::new(config)
}

#[must_use]
pub fn build_app(config: Config) -> axum::Router {
    build_router(build_state(config))
}

pub async fn serve(
    config: Config,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(
        service = %config.service_name,
        bind_addr = %listener.local_addr()?,
        timeout_delay_ms = config.timeout_delay_ms,
        "core mock listening"
    );
    axum::serve(listener, build_app(config))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("core mock stopped");
    Ok(())
}
