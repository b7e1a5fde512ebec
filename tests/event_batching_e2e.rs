use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use relaykit::application::actors::EventCollector;
use relaykit::config::BatchConfig;
use relaykit::domain::errors::BatchSendError;
use relaykit::domain::repositories::batch_sink::BatchSink;
use relaykit::domain::value_objects::analytics_event::AnalyticsEvent;
use relaykit::infrastructure::HttpBatchSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use url::Url;

#[derive(Clone)]
struct EndpointState {
    status: StatusCode,
    bodies: mpsc::UnboundedSender<serde_json::Value>,
}

async fn receive_events(
    State(state): State<EndpointState>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    let _ = state.bodies.send(body);
    state.status
}

/// Analytics endpoint that answers every POST with `status` and forwards
/// each request body to the test.
async fn start_endpoint(status: u16) -> (Url, mpsc::UnboundedReceiver<serde_json::Value>) {
    let (body_tx, body_rx) = mpsc::unbounded_channel();
    let state = EndpointState {
        status: StatusCode::from_u16(status).unwrap(),
        bodies: body_tx,
    };
    let app = Router::new()
        .route("/events", post(receive_events))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let url = Url::parse(&format!("http://{}/events", addr)).unwrap();
    (url, body_rx)
}

#[tokio::test]
async fn test_http_sink_posts_json_array() {
    let (endpoint, mut bodies) = start_endpoint(200).await;
    let sink = HttpBatchSink::new(endpoint).unwrap();

    let batch = vec![
        AnalyticsEvent::new("page_view").with_property("path", "/home"),
        AnalyticsEvent::new("click").with_session("abc123"),
    ];
    sink.send_batch(batch).await.unwrap();

    let body = bodies.recv().await.unwrap();
    let events = body.as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["name"], "page_view");
    assert_eq!(events[0]["properties"]["path"], "/home");
    assert_eq!(events[1]["session_id"], "abc123");
}

#[tokio::test]
async fn test_http_sink_maps_error_status() {
    let (endpoint, _bodies) = start_endpoint(503).await;
    let sink = HttpBatchSink::new(endpoint).unwrap();

    let result = sink.send_batch(vec![AnalyticsEvent::new("click")]).await;
    assert_eq!(result, Err(BatchSendError::Rejected { status: 503 }));
}

#[tokio::test]
async fn test_http_sink_reports_unreachable_endpoint() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let endpoint = Url::parse(&format!("http://{}/events", addr)).unwrap();
    let sink = HttpBatchSink::new(endpoint).unwrap();

    let result = sink.send_batch(vec![AnalyticsEvent::new("click")]).await;
    assert!(matches!(result, Err(BatchSendError::Network(_))));
}

#[tokio::test]
async fn test_collector_ships_through_http_sink() {
    let (endpoint, mut bodies) = start_endpoint(200).await;
    let sink: Arc<dyn BatchSink<AnalyticsEvent>> = Arc::new(HttpBatchSink::new(endpoint).unwrap());
    let config = BatchConfig {
        max_batch_size: 5,
        flush_interval: Duration::from_millis(50),
        ..BatchConfig::default()
    };
    let collector = EventCollector::new(config, sink);

    for i in 0..5 {
        collector.collect(AnalyticsEvent::new("tick").with_property("index", i));
    }
    // Let the size-triggered flush take its batch before the next event.
    tokio::task::yield_now().await;
    collector.collect(AnalyticsEvent::new("straggler"));

    let first = tokio::time::timeout(Duration::from_secs(5), bodies.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.as_array().unwrap().len(), 5);

    let second = tokio::time::timeout(Duration::from_secs(5), bodies.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.as_array().unwrap().len(), 1);
    assert_eq!(second[0]["name"], "straggler");

    collector.shutdown().await.unwrap();
}
