use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use status_relay_server::publisher::{EventPublisher, HttpEventPublisher, PublishError};

type Captured = Arc<Mutex<Vec<Value>>>;

async fn accept(State(captured): State<Captured>, Json(body): Json<Value>) -> Json<Value> {
    captured.lock().unwrap().push(body);
    Json(json!({ "MessageId": "m-42" }))
}

async fn refuse() -> StatusCode {
    StatusCode::SERVICE_UNAVAILABLE
}

async fn start_stub() -> (SocketAddr, Captured) {
    let captured: Captured = Arc::default();
    let app = Router::new()
        .route("/publish", post(accept))
        .route("/down", post(refuse))
        .with_state(captured.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, captured)
}

#[tokio::test]
async fn test_http_publisher_posts_topic_and_message() {
    let (addr, captured) = start_stub().await;
    let publisher = HttpEventPublisher::new(format!("http://{addr}/publish"));

    let message_id = publisher
        .publish("arn:aws:sns:us-east-1:123456789012:new-image", "file:///tmp/x.png")
        .await
        .unwrap();

    assert_eq!(message_id, "m-42");
    let bodies = captured.lock().unwrap().clone();
    assert_eq!(
        bodies,
        vec![json!({
            "TopicArn": "arn:aws:sns:us-east-1:123456789012:new-image",
            "Message": "file:///tmp/x.png"
        })]
    );
}

#[tokio::test]
async fn test_http_publisher_reports_rejection() {
    let (addr, _captured) = start_stub().await;
    let publisher = HttpEventPublisher::new(format!("http://{addr}/down"));

    let err = publisher.publish("topic", "message").await.unwrap_err();
    assert!(
        matches!(
            err,
            PublishError::Rejected(status) if status == reqwest::StatusCode::SERVICE_UNAVAILABLE
        ),
        "unexpected error: {err}"
    );
}
