//! Integration tests for the signalling surface
//!
//! These start the HTTP server on a loopback port. Every request here is
//! rejected before a peer connection is created, so no ICE traffic happens.
//!
//! Run with: cargo test -p minisfu-server --test integration_tests

use minisfu_protocol::{ErrorBody, RelayState, RelayStatus, SessionDescriptionMessage};
use minisfu_server::sfu::SinkFailurePolicy;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;

/// Test server wrapper
struct TestServer {
    addr: std::net::SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    async fn start() -> anyhow::Result<Self> {
        let config = minisfu_server::state::Config {
            bind_address: "127.0.0.1:0".to_string(),
            stun_servers: vec![],
            ice_disconnected_timeout_ms: 5000,
            ice_failed_timeout_ms: 25000,
            ice_keepalive_interval_ms: 2000,
            ice_include_loopback: true,
            codec: "VP8".to_string(),
            keyframe_interval_ms: 3000,
            mtu: 1400,
            sink_failure_policy: SinkFailurePolicy::Terminate,
        };

        let router = minisfu_server::create_app(config);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .ok();
        });

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(50)).await;

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn start_test_server() -> TestServer {
    TestServer::start().await.expect("Failed to start test server")
}

fn offer(video_section: &str) -> SessionDescriptionMessage {
    SessionDescriptionMessage::offer(format!(
        "v=0\r\n\
         o=- 1 2 IN IP4 127.0.0.1\r\n\
         s=-\r\n\
         t=0 0\r\n\
         {}",
        video_section
    ))
}

fn vp8_offer() -> SessionDescriptionMessage {
    offer(
        "m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
         c=IN IP4 0.0.0.0\r\n\
         a=rtpmap:96 VP8/90000\r\n",
    )
}

async fn post_offer(
    client: &Client,
    url: String,
    body: &SessionDescriptionMessage,
) -> (StatusCode, ErrorBody) {
    let response = client.post(url).json(body).send().await.unwrap();
    let status = response.status();
    let error: ErrorBody = response.json().await.unwrap();
    (status, error)
}

#[tokio::test]
async fn test_health_and_initial_status() {
    let server = start_test_server().await;
    let client = Client::new();

    let health = client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(health.text().await.unwrap(), "OK");

    let status: RelayStatus = client
        .get(server.url("/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status.state, RelayState::AwaitingPublisher);
    assert_eq!(status.subscribers, 0);
    assert_eq!(status.packets_forwarded, 0);
    assert!(status.ssrc.is_none());
}

#[tokio::test]
async fn test_subscriber_before_publisher_is_refused() {
    let server = start_test_server().await;
    let client = Client::new();

    let (status, error) = post_offer(&client, server.url("/subscribe"), &vp8_offer()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(error.error.contains("No publisher"));
}

#[tokio::test]
async fn test_publish_rejects_unusable_offers() {
    let server = start_test_server().await;
    let client = Client::new();

    let (status, error) = post_offer(
        &client,
        server.url("/publish"),
        &SessionDescriptionMessage::offer("not a session description"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error.error.contains("Invalid session description"));

    let malformed = offer(
        "m=video 9 UDP/TLS/RTP/SAVPF 96 x\r\n\
         c=IN IP4 0.0.0.0\r\n\
         a=rtpmap:96 VP8/90000\r\n",
    );
    let (status, error) = post_offer(&client, server.url("/publish"), &malformed).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error.error.contains("Malformed"));

    let h264_only = offer(
        "m=video 9 UDP/TLS/RTP/SAVPF 102\r\n\
         c=IN IP4 0.0.0.0\r\n\
         a=rtpmap:102 H264/90000\r\n",
    );
    let (status, error) = post_offer(&client, server.url("/publish"), &h264_only).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(error.error.contains("VP8"));
}

#[tokio::test]
async fn test_publish_requires_offer_type() {
    let server = start_test_server().await;
    let client = Client::new();

    let response = client
        .post(server.url("/publish"))
        .json(&json!({ "type": "answer", "sdp": vp8_offer().sdp }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Relay state is untouched by a rejected offer
    let status: RelayStatus = client
        .get(server.url("/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status.state, RelayState::AwaitingPublisher);
}
