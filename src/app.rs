use crate::{
    chatbot::FaqBook,
    config::Config,
    server::{HttpServer, SharedState},
    service::{ClassificationService, DetectionService},
    telemetry::Metrics,
};
use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let classifier = match ClassificationService::from_config(&config.classification) {
        Ok(service) => service,
        Err(e) => {
            tracing::error!("Failed to initialize classification service: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let detector = match config.detection.as_ref().map(DetectionService::from_config) {
        Some(Ok(service)) => Some(service),
        Some(Err(e)) => {
            tracing::error!("Failed to initialize detection service: {:?}", e);
            return Err(Box::new(e));
        }
        None => None,
    };

    let faqs = match config.chatbot.as_ref().map(|c| FaqBook::from_file(&c.faqs_file)) {
        Some(Ok(book)) => Some(Arc::new(book)),
        Some(Err(e)) => {
            tracing::error!("Failed to load chatbot FAQs: {:?}", e);
            return Err(Box::new(e));
        }
        None => None,
    };

    let metrics = Arc::new(Metrics::new()?);

    let app_state = SharedState {
        classifier,
        detector,
        faqs,
        metrics,
    };
    let server = HttpServer::new(app_state, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe())?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    server_handle.await??;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
