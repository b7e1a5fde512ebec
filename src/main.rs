use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relaykit::application::actors::{ConnectionManager, EventCollector};
use relaykit::config::{BatchConfig, LinkConfig};
use relaykit::domain::repositories::batch_sink::BatchSink;
use relaykit::domain::value_objects::analytics_event::{new_session_id, AnalyticsEvent};
use relaykit::infrastructure::{HttpBatchSink, TungsteniteTransport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to load .env: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relaykit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let link_config = LinkConfig::from_env()?;
    let batch_config = BatchConfig::from_env();
    info!("Connecting to {}", link_config.url);

    let transport = Arc::new(TungsteniteTransport::from_config(&link_config));
    let manager = ConnectionManager::new(link_config, transport);

    let session_id = new_session_id();
    let collector = match &batch_config.endpoint {
        Some(endpoint) => {
            let sink: Arc<dyn BatchSink<AnalyticsEvent>> =
                Arc::new(HttpBatchSink::new(endpoint.clone())?);
            info!("Analytics enabled, posting to {}", endpoint);
            Some(EventCollector::new(batch_config.clone(), sink))
        }
        None => {
            info!("RELAYKIT_ANALYTICS_URL not set, analytics disabled");
            None
        }
    };

    let handler_collector = collector.clone();
    let handler_session = session_id.clone();
    let _registration = manager.add_message_handler(move |message| {
        info!("<- {}", message.kind);
        if let Some(collector) = &handler_collector {
            collector.collect(
                AnalyticsEvent::new("message_received")
                    .with_property("type", message.kind.clone())
                    .with_session(&handler_session),
            );
        }
    });

    let mut state_changes = manager.subscribe_state_changes();
    let state_collector = collector.clone();
    let state_session = session_id.clone();
    tokio::spawn(async move {
        loop {
            match state_changes.recv().await {
                Ok(change) => {
                    if let Some(collector) = &state_collector {
                        collector.collect(
                            AnalyticsEvent::new("connection_state")
                                .with_property("from", change.from_state.to_string())
                                .with_property("to", change.to_state.to_string())
                                .with_property("reason", change.trigger_reason.clone())
                                .with_session(&state_session),
                        );
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("State change listener lagged, skipped {} events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    manager.connect();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down");
    manager.disconnect();
    if let Some(collector) = collector {
        if let Err(e) = collector.shutdown().await {
            warn!("Final analytics flush did not complete: {}", e);
        }
    }

    let info = manager.info();
    info!(
        "Session {} done: {} messages sent, {} received",
        session_id, info.statistics.messages_sent, info.statistics.messages_received
    );

    Ok(())
}
