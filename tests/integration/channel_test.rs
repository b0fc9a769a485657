//! Integration Tests for the control channel over a real socket
//!
//! The worker side is a plain length-delimited TCP peer, so these tests
//! exercise the wire format rather than the in-memory mock.

use anyhow::Context;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use mediactl_config::{AppConfig, ChannelConfig, DEFAULT_MAX_MESSAGE_SIZE};
use mediactl_types::{Internal, Method, Notification, Request, Response};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use worker_channel::{Channel, RequestError};

type WorkerSocket = Framed<TcpStream, LengthDelimitedCodec>;

async fn connect(config: &ChannelConfig) -> (Channel, WorkerSocket) {
    mediactl_logging::init_test_logging();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());

    let channel = Channel::new(client.unwrap(), config);
    let (socket, _) = accepted.unwrap();
    (channel, Framed::new(socket, LengthDelimitedCodec::new()))
}

async fn read_request(socket: &mut WorkerSocket) -> Request {
    let frame = socket.next().await.unwrap().unwrap();
    serde_json::from_slice(&frame).unwrap()
}

async fn send(socket: &mut WorkerSocket, payload: Vec<u8>) {
    socket.send(Bytes::from(payload)).await.unwrap();
}

#[tokio::test]
async fn test_request_round_trip_over_tcp() -> anyhow::Result<()> {
    let config = AppConfig::default();
    assert_eq!(config.channel.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
    let (channel, mut socket) = connect(&config.channel).await;

    let (result, served) = tokio::join!(
        channel.request(Method::RouterDump, Internal::router("r1"), None),
        async {
            let frame = socket.next().await.context("socket closed")??;
            let raw: Value = serde_json::from_slice(&frame)?;
            assert_eq!(raw["method"], "router.dump");
            assert_eq!(raw["internal"]["routerId"], "r1");
            assert!(raw["internal"].get("transportId").is_none());

            let request: Request = serde_json::from_slice(&frame)?;
            let response = Response::accepted(request.id, Some(json!({ "id": "r1" })));
            socket.send(Bytes::from(serde_json::to_vec(&response)?)).await?;
            anyhow::Ok(())
        }
    );
    served?;

    assert_eq!(result?, Some(json!({ "id": "r1" })));
    assert_eq!(channel.pending_requests(), 0);
    Ok(())
}

#[tokio::test]
async fn test_notification_reaches_subscriber_over_tcp() {
    let (channel, mut socket) = connect(&ChannelConfig::default()).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = channel.subscribe("t1", move |notification: &Notification| {
        let _ = tx.send(notification.event.clone());
    });

    for (target, event) in [("other", "ignored"), ("t1", "icestatechange")] {
        let notification = Notification::new(target, event, Some(json!({ "iceState": "connected" })));
        send(&mut socket, serde_json::to_vec(&notification).unwrap()).await;
    }

    let event = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
    assert_eq!(event.as_deref(), Some("icestatechange"));
}

#[tokio::test]
async fn test_frame_above_configured_limit_closes_channel() {
    let config = ChannelConfig { max_message_size: 64 };
    let (channel, mut socket) = connect(&config).await;

    send(&mut socket, vec![b' '; 128]).await;

    timeout(Duration::from_secs(1), channel.closed()).await.unwrap();
    assert!(channel.is_closed());
    assert_eq!(
        channel
            .request(Method::WorkerDump, Internal::default(), None)
            .await,
        Err(RequestError::ChannelClosed)
    );
}

#[tokio::test]
async fn test_socket_close_fails_pending_request() {
    let (channel, mut socket) = connect(&ChannelConfig::default()).await;

    let (result, _) = tokio::join!(
        channel.request(Method::WorkerDump, Internal::default(), None),
        async move {
            read_request(&mut socket).await;
            drop(socket);
        }
    );

    assert_eq!(result, Err(RequestError::ChannelClosed));
    assert_eq!(channel.pending_requests(), 0);
}
