//! Integration Tests for the entity tree
//!
//! Each test drives a full worker / router / transport tree against an
//! in-process mock worker.

use media_router::{
    ConnectParameters, ConsumerEvent, MediaError, RtpObserverEvent, TransportKind,
};
use mediactl_tests::{Harness, ObserverLog};
use mediactl_types::{ConsumerLayers, Method};
use parking_lot::Mutex;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use worker_channel::testing::MockWorker;

/// Run `call` while the mock accepts one `method` request
async fn acked<F: Future>(mock: &mut MockWorker, method: Method, call: F) -> F::Output {
    let (output, _) = tokio::join!(call, async {
        let request = mock.expect_request(method).await;
        mock.accept(&request, None).await;
    });
    output
}

#[tokio::test]
async fn test_pause_fails_when_channel_closes_mid_request() {
    let mut h = Harness::new().await;
    let transport = h.webrtc_transport().await;
    h.produce(&transport, "p1").await;
    let consumer = h.consume(&transport, "p1").await;

    let Harness { mut mock, .. } = h;
    let (result, _) = tokio::join!(consumer.pause(), async move {
        mock.expect_request(Method::ConsumerPause).await;
        mock.hang_up();
    });

    assert_eq!(result, Err(MediaError::ChannelClosed));
    assert!(!consumer.paused());
}

#[tokio::test]
async fn test_producer_pause_while_paused_is_silent_on_observer() {
    let mut h = Harness::new().await;
    let log = ObserverLog::attach(h.router.observer());
    let transport = h.webrtc_transport().await;
    h.produce(&transport, "p1").await;
    let consumer = h.consume(&transport, "p1").await;

    acked(&mut h.mock, Method::ConsumerPause, consumer.pause())
        .await
        .unwrap();
    assert_eq!(log.count(consumer.id(), "pause"), 1);

    let producer_pauses = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&producer_pauses);
    consumer.on("producerpause", move |_: &ConsumerEvent| *counter.lock() += 1);

    h.mock.notify(consumer.id(), "producerpause", None).await;
    h.sync().await;

    assert!(consumer.producer_paused());
    assert_eq!(*producer_pauses.lock(), 1);
    assert_eq!(log.count(consumer.id(), "pause"), 1);
}

#[tokio::test]
async fn test_volumes_skip_closed_producers_in_order() {
    let mut h = Harness::new().await;
    let transport = h.webrtc_transport().await;
    for id in ["p1", "p2", "p3"] {
        h.produce(&transport, id).await;
    }
    let observer = h.audio_level_observer().await;

    h.router
        .resolve_producer("p2")
        .expect("p2 is registered")
        .close();
    h.mock.expect_request(Method::ProducerClose).await;
    assert!(h.router.resolve_producer("p2").is_none());

    let volumes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&volumes);
    observer.on("volumes", move |event| {
        if let RtpObserverEvent::Volumes(entries) = event {
            sink.lock().extend(
                entries
                    .iter()
                    .map(|v| (v.producer.id().to_string(), v.volume)),
            );
        }
    });

    h.mock
        .notify(
            observer.id(),
            "volumes",
            Some(json!([
                { "producerId": "p1", "volume": -10 },
                { "producerId": "p2", "volume": -20 },
                { "producerId": "p3", "volume": -30 }
            ])),
        )
        .await;
    h.sync().await;

    assert_eq!(
        *volumes.lock(),
        vec![("p1".to_string(), -10), ("p3".to_string(), -30)]
    );
}

#[tokio::test]
async fn test_volumes_with_nothing_resolvable_emit_nothing() {
    let mut h = Harness::new().await;
    let log = ObserverLog::attach(h.router.observer());
    let observer = h.audio_level_observer().await;

    h.mock
        .notify(
            observer.id(),
            "volumes",
            Some(json!([{ "producerId": "ghost", "volume": -50 }])),
        )
        .await;
    h.mock
        .notify(observer.id(), "dominantspeaker", Some(json!({ "producerId": "ghost" })))
        .await;
    h.mock.notify(observer.id(), "silence", None).await;
    h.sync().await;

    assert_eq!(log.names_for(observer.id()), vec!["silence"]);
}

#[tokio::test]
async fn test_close_twice_sends_one_request_and_one_event() {
    let mut h = Harness::new().await;
    let log = ObserverLog::attach(h.router.observer());
    let transport = h.webrtc_transport().await;
    h.produce(&transport, "p1").await;
    let consumer = h.consume(&transport, "p1").await;

    let closes = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&closes);
    consumer.on("close", move |_| *counter.lock() += 1);

    consumer.close();
    consumer.close();

    h.mock.expect_request(Method::ConsumerClose).await;
    assert!(h
        .mock
        .try_next_request(Duration::from_millis(50))
        .await
        .is_none());
    assert_eq!(*closes.lock(), 1);
    assert_eq!(log.count(consumer.id(), "close"), 1);
    assert!(transport.consumers().is_empty());
}

#[tokio::test]
async fn test_effective_pause_transitions() {
    let mut h = Harness::new().await;
    let log = ObserverLog::attach(h.router.observer());
    let transport = h.webrtc_transport().await;
    h.produce(&transport, "p1").await;
    let consumer = h.consume(&transport, "p1").await;
    let id = consumer.id().to_string();

    // paused: false -> true
    acked(&mut h.mock, Method::ConsumerPause, consumer.pause())
        .await
        .unwrap();
    // still effectively paused
    h.mock.notify(&id, "producerpause", None).await;
    h.sync().await;
    acked(&mut h.mock, Method::ConsumerResume, consumer.resume())
        .await
        .unwrap();
    // true -> false
    h.mock.notify(&id, "producerresume", None).await;
    h.sync().await;
    // redundant resume still reaches the worker
    acked(&mut h.mock, Method::ConsumerResume, consumer.resume())
        .await
        .unwrap();
    // false -> true -> false through the producer only
    h.mock.notify(&id, "producerpause", None).await;
    h.mock.notify(&id, "producerpause", None).await;
    h.mock.notify(&id, "producerresume", None).await;
    h.sync().await;

    let transitions: Vec<_> = log
        .names_for(&id)
        .into_iter()
        .filter(|name| *name == "pause" || *name == "resume")
        .collect();
    assert_eq!(transitions, vec!["pause", "resume", "pause", "resume"]);
    assert!(!consumer.paused());
    assert!(!consumer.producer_paused());
}

#[tokio::test]
async fn test_closed_consumer_ignores_late_notifications() {
    let mut h = Harness::new().await;
    let transport = h.webrtc_transport().await;
    h.produce(&transport, "p1").await;
    let consumer = h.consume(&transport, "p1").await;

    consumer.close();
    h.mock.expect_request(Method::ConsumerClose).await;

    h.mock.notify(consumer.id(), "producerpause", None).await;
    h.mock
        .notify(
            consumer.id(),
            "score",
            Some(json!({ "score": 10, "producerScore": 10, "producerScores": [10] })),
        )
        .await;
    h.mock
        .notify(
            consumer.id(),
            "layerschange",
            Some(json!({ "spatialLayer": 2, "temporalLayer": 1 })),
        )
        .await;
    h.sync().await;

    assert!(consumer.closed());
    assert!(!consumer.producer_paused());
    assert_eq!(consumer.score().score, 0);
    assert_eq!(consumer.current_layers(), None::<ConsumerLayers>);
}

#[tokio::test]
async fn test_wrong_connect_shape_is_rejected_locally() {
    let mut h = Harness::new().await;
    let transport = h.webrtc_transport().await;
    assert_eq!(transport.kind(), TransportKind::WebRtc);

    let result = transport
        .connect(ConnectParameters::Plain {
            ip: Some("10.0.0.1".to_string()),
            port: Some(5004),
            rtcp_port: None,
            srtp_parameters: None,
        })
        .await;

    assert!(matches!(result, Err(MediaError::TypeMismatch { .. })));
    assert!(h
        .mock
        .try_next_request(Duration::from_millis(50))
        .await
        .is_none());
}

#[tokio::test]
async fn test_rejection_reaches_caller() {
    let mut h = Harness::new().await;
    let transport = h.webrtc_transport().await;
    h.produce(&transport, "p1").await;
    let consumer = h.consume(&transport, "p1").await;

    let (result, _) = tokio::join!(consumer.set_priority(7), async {
        let request = h.mock.expect_request(Method::ConsumerSetPriority).await;
        assert_eq!(request.data, Some(json!({ "priority": 7 })));
        h.mock.reject(&request, "invalid priority").await;
    });

    assert_eq!(
        result,
        Err(MediaError::RequestRejected {
            reason: "invalid priority".to_string()
        })
    );
    assert_eq!(consumer.priority(), media_router::DEFAULT_PRIORITY);
}

#[tokio::test]
async fn test_producer_close_notification_closes_consumer() {
    let mut h = Harness::new().await;
    let transport = h.webrtc_transport().await;
    h.produce(&transport, "p1").await;
    let consumer = h.consume(&transport, "p1").await;

    h.mock.notify(consumer.id(), "producerclose", None).await;
    h.sync().await;

    assert!(consumer.closed());
    assert!(transport.consumers().is_empty());
    assert!(h
        .mock
        .try_next_request(Duration::from_millis(50))
        .await
        .is_none());
}

#[tokio::test]
async fn test_router_close_cascades_through_tree() {
    let mut h = Harness::new().await;
    let log = ObserverLog::attach(h.router.observer());
    let transport = h.webrtc_transport().await;
    let producer = h.produce(&transport, "p1").await;
    let consumer = h.consume(&transport, "p1").await;
    let observer = h.audio_level_observer().await;
    log.clear();

    h.router.close();
    h.router.close();

    h.mock.expect_request(Method::RouterClose).await;
    assert!(h
        .mock
        .try_next_request(Duration::from_millis(50))
        .await
        .is_none());

    for closed in [transport.closed(), producer.closed(), consumer.closed(), observer.closed()] {
        assert!(closed);
    }
    assert!(h.router.resolve_producer("p1").is_none());
    assert_eq!(h.router.registry().producer_count(), 0);
    assert!(h.worker.routers().is_empty());

    for id in [h.router.id(), transport.id(), producer.id(), consumer.id(), observer.id()] {
        assert_eq!(log.count(id, "close"), 1, "close events for {id}");
    }
}

#[tokio::test]
async fn test_worker_hang_up_closes_tree() {
    let mut h = Harness::new().await;
    let transport = h.webrtc_transport().await;
    let producer = h.produce(&transport, "p1").await;

    let Harness {
        mock,
        worker,
        router,
        ..
    } = h;
    mock.hang_up();

    tokio::time::timeout(Duration::from_secs(1), async {
        while !worker.closed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("worker notices the hang up");

    assert!(router.closed());
    assert!(transport.closed());
    assert!(producer.closed());
    assert_eq!(producer.dump().await, Err(MediaError::ChannelClosed));
}
