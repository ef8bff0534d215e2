mod cli;
mod render;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use lanxfer_core::{
    CancelToken, Listener, SessionState, Session, TracingLogger, TransferConfig, TransferLogger,
    hash_file,
};
use tracing::info;

use crate::cli::{Cli, Command, HashArgs, ReceiveArgs, SendArgs};
use crate::render::{Dashboard, print_error, print_report};

/// Exit status when the run was interrupted with Ctrl+C.
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lanxfer=info,lanxfer_core=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = TransferConfig::from_env().context("invalid LANXFER_* configuration")?;

    let cancel = CancelToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    match cli.command {
        Command::Send(args) => send(args, config, cancel, !cli.no_progress).await,
        Command::Receive(args) => receive(args, config, cancel, !cli.no_progress).await,
        Command::Hash(args) => hash(args, config).await,
    }
}

async fn send(
    args: SendArgs,
    mut config: TransferConfig,
    cancel: CancelToken,
    show_progress: bool,
) -> anyhow::Result<ExitCode> {
    if let Some(port) = args.port {
        config.port = port;
    }
    let target = SocketAddr::new(args.to, config.port);
    let dashboard = show_progress.then(|| Dashboard::spawn(config.progress_interval));
    let logger = logger_for(dashboard.as_ref());

    let bind = args.bind;
    let paths = args.paths;
    let token = cancel.clone();
    let results = tokio::task::spawn_blocking(move || {
        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            if token.is_cancelled() {
                break;
            }
            let result = Session::new(config.clone(), token.clone())
                .with_logger(logger.clone())
                .send(&path, target, bind);
            results.push((path, result));
        }
        results
    })
    .await
    .context("send worker panicked")?;

    if let Some(dashboard) = dashboard {
        dashboard.finish();
    }

    let mut ok = true;
    for (path, result) in &results {
        match result {
            Ok(report) => {
                print_report(report);
                ok &= report.is_verified();
            }
            Err(err) => {
                print_error(&path.display().to_string(), err);
                ok = false;
            }
        }
    }
    Ok(exit_code(ok, &cancel))
}

async fn receive(
    args: ReceiveArgs,
    mut config: TransferConfig,
    cancel: CancelToken,
    show_progress: bool,
) -> anyhow::Result<ExitCode> {
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(dir) = args.dir {
        config.received_dir = dir;
    }
    let dashboard = show_progress.then(|| Dashboard::spawn(config.progress_interval));

    let received_dir = config.received_dir.clone();
    let listener = Listener::bind(args.bind, config)
        .with_context(|| format!("cannot listen on {}", args.bind))?
        .with_logger(logger_for(dashboard.as_ref()));
    info!(
        "Listening on {} (saving to {}), Ctrl+C to stop",
        listener.local_addr(),
        received_dir.display()
    );

    // Ctrl+C also cancels a session that is mid-transfer.
    let token = cancel.clone();
    let summary = tokio::task::spawn_blocking(move || listener.run(&token))
        .await
        .context("listener worker panicked")??;

    if let Some(dashboard) = dashboard {
        dashboard.finish();
    }

    let mut ok = true;
    for session in &summary.sessions {
        match &session.result {
            Ok(report) => {
                print_report(report);
                ok &= report.is_verified() || report.state == SessionState::Cancelled;
            }
            Err(err) => {
                print_error(&session.peer.to_string(), err);
                ok = false;
            }
        }
    }
    println!("{} session(s) received", summary.sessions.len());
    // Stopping the listener is the normal way out; only failed sessions count.
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn hash(args: HashArgs, config: TransferConfig) -> anyhow::Result<ExitCode> {
    let algorithm = args.algorithm.unwrap_or(config.hash_algorithm);
    let path = args.file.clone();
    let digest = tokio::task::spawn_blocking(move || {
        hash_file(&path, algorithm, config.hash_chunk_size)
    })
    .await
    .context("hash worker panicked")?
    .with_context(|| format!("cannot hash {}", args.file.display()))?;

    println!("{}  {}", digest, args.file.display());
    Ok(ExitCode::SUCCESS)
}

fn logger_for(dashboard: Option<&Dashboard>) -> Arc<dyn TransferLogger> {
    match dashboard {
        Some(dashboard) => dashboard.logger(),
        None => Arc::new(TracingLogger),
    }
}

fn exit_code(ok: bool, cancel: &CancelToken) -> ExitCode {
    if cancel.is_cancelled() {
        ExitCode::from(EXIT_CANCELLED)
    } else if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn cancel_on_signal(cancel: CancelToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, cancelling..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, cancelling..."),
                }
            }
            Err(_) => {
                if ctrl_c.await.is_err() {
                    return;
                }
                info!("Received Ctrl+C, cancelling...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if ctrl_c.await.is_err() {
            return;
        }
        info!("Received Ctrl+C, cancelling...");
    }
    cancel.cancel();
}
