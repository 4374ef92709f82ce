// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! amond: the Amon daemon binary.

use amon_adapters::{NullChatModel, ToolRegistry};
use amon_core::DataDir;
use amon_daemon::daemon::Daemon;
use amon_daemon::{http, jobs};
use amon_runtime::RuntimeDeps;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn default_data_dir() -> std::path::PathBuf {
    dirs::data_dir().unwrap_or_else(|| std::path::PathBuf::from(".")).join("amon")
}

fn init_tracing(data: &DataDir) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let logs_dir = data.logs_dir();
    if std::fs::create_dir_all(&logs_dir).is_err() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        return None;
    }
    let appender = tracing_appender::rolling::never(&logs_dir, "amon.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Some(guard)
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let data = DataDir::from_env_or(default_data_dir());
    let _log_guard = init_tracing(&data);

    let port: u16 = std::env::var("AMON_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8787);

    if std::env::var("OPENAI_API_KEY").is_err() {
        tracing::warn!("no provider key configured; model calls will fail with MODEL_AUTH_FAILED");
    }
    let deps = RuntimeDeps {
        model: Arc::new(NullChatModel),
        tools: ToolRegistry::new(),
        sandbox: None,
    };

    let daemon = match Daemon::new(data, deps) {
        Ok(daemon) => daemon,
        Err(e) => {
            eprintln!("amond: {e}");
            return std::process::ExitCode::from(1);
        }
    };

    let background = match jobs::start_background(&daemon) {
        Ok(background) => background,
        Err(e) => {
            eprintln!("amond: {e}");
            return std::process::ExitCode::from(1);
        }
    };

    let cancel = background.cancel.clone();
    let serve = tokio::spawn(http::serve(Arc::clone(&daemon), port, cancel.clone()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "signal handler failed"),
    }

    background.shutdown().await;
    match serve.await {
        Ok(Ok(())) => std::process::ExitCode::SUCCESS,
        Ok(Err(e)) => {
            eprintln!("amond: {e}");
            std::process::ExitCode::from(1)
        }
        Err(e) => {
            eprintln!("amond: {e}");
            std::process::ExitCode::from(1)
        }
    }
}
