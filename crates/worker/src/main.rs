use std::process::ExitCode;
use std::sync::Arc;

use easel_comfyui::{Connection, TransportError};
use easel_core::Image;
use easel_generation::MessageRouter;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use easel_worker::{session, CanvasDocument, WorkerConfig, WorkerError, WorkerHost};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "easel_worker=debug,easel_generation=debug,easel_comfyui=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Worker failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), WorkerError> {
    // --- Configuration ---
    let config = WorkerConfig::from_env()?;
    tracing::info!(api_url = %config.client.api_url, "Loaded worker configuration");

    // --- Document ---
    let background = match &config.source_image {
        Some(path) => Image::from_encoded(&tokio::fs::read(path).await?)?,
        None => Image::blank(config.canvas),
    };
    let document = Arc::new(CanvasDocument::new(
        background,
        config.selection,
        config.output_dir.clone(),
    ));
    let host = Arc::new(WorkerHost::new(Arc::clone(&document)));

    // --- Router ---
    let connection = Arc::new(Connection::new());
    let router = MessageRouter::new(
        Arc::clone(&connection),
        host,
        config.workflow.clone(),
        config.router.clone(),
    );
    router.start();

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    // --- Connect ---
    match connection
        .connect(config.client.clone(), &config.reconnect, &cancel)
        .await
    {
        Ok(()) => {}
        Err(TransportError::Interrupted) => {
            router.shutdown().await;
            return Ok(());
        }
        Err(e) => {
            router.shutdown().await;
            return Err(e.into());
        }
    }

    let result = process_prompts(&router, &document, config.strength, &cancel).await;

    router.shutdown().await;
    connection.disconnect();
    tracing::info!("Worker stopped");
    result
}

/// Generate one job per non-empty line of standard input.
async fn process_prompts(
    router: &Arc<MessageRouter>,
    document: &CanvasDocument,
    strength: f64,
    cancel: &CancellationToken,
) -> Result<(), WorkerError> {
    let coordinator = router
        .coordinator_for_active_document()
        .ok_or(WorkerError::NoDocument)?;
    coordinator.set_strength(strength)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                coordinator.cancel().await?;
                break;
            }
            outcome = session::generate(&coordinator, prompt) => outcome,
        };

        match outcome {
            Ok(job) => {
                let written = session::apply_results(&coordinator, document, &job)?;
                tracing::info!(job_id = %job.id(), files = written.len(), "Prompt done");
            }
            Err(WorkerError::Rejected(message)) => {
                tracing::warn!(prompt, "{message}");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Wait for Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
