//! Load Tests for request correlation
//!
//! Many callers share one channel; the mock worker answers in an order
//! unrelated to submission.
//!
//! Run with: cargo test --test load_test --release

use futures::future::join_all;
use media_router::{ConsumerOptions, DataConsumerOptions};
use mediactl_tests::Harness;
use mediactl_types::{Internal, Method, Response, RtpParameters};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use worker_channel::testing::MockWorker;

#[tokio::test]
async fn test_concurrent_requests_complete_exactly_once() {
    let (channel, mut worker) = MockWorker::pair();
    let num_requests = 500;

    let start = Instant::now();
    let callers = (0..num_requests).map(|n| {
        let channel = channel.clone();
        tokio::spawn(async move {
            let data = channel
                .request(Method::RouterDump, Internal::router("r1"), Some(json!({ "n": n })))
                .await
                .expect("request accepted");
            (n, data)
        })
    });
    let callers: Vec<_> = callers.collect();

    let mut requests = Vec::with_capacity(num_requests);
    for _ in 0..num_requests {
        requests.push(worker.next_request().await.expect("request arrives"));
    }
    assert_eq!(channel.pending_requests(), num_requests);

    // Answer from the back, echoing each caller's payload
    for request in requests.iter().rev() {
        worker.accept(request, request.data.clone()).await;
    }

    for caller in join_all(callers).await {
        let (n, data) = caller.expect("caller task");
        assert_eq!(data, Some(json!({ "n": n })));
    }
    assert_eq!(channel.pending_requests(), 0);

    println!(
        "{} correlated requests in {:?}",
        num_requests,
        start.elapsed()
    );
}

#[tokio::test]
async fn test_unmatched_responses_leave_pending_requests_alone() {
    let (channel, mut worker) = MockWorker::pair();

    let caller = {
        let channel = channel.clone();
        tokio::spawn(async move {
            channel
                .request(Method::WorkerDump, Internal::default(), None)
                .await
        })
    };
    let request = worker.next_request().await.expect("request arrives");

    for id in 1..=200u32 {
        if id != request.id {
            worker
                .respond(Response::accepted(id, Some(json!("stray"))))
                .await;
        }
    }
    worker.sync(&channel).await;
    assert_eq!(channel.pending_requests(), 1);
    assert!(!caller.is_finished());

    worker.accept(&request, Some(json!("mine"))).await;
    let result = tokio::time::timeout(Duration::from_secs(1), caller)
        .await
        .expect("caller completes")
        .expect("caller task");
    assert_eq!(result, Ok(Some(json!("mine"))));
}

#[tokio::test]
async fn test_concurrent_consumers_on_one_transport() {
    let mut h = Harness::new().await;
    let transport = h.webrtc_transport().await;
    let producer = h.produce(&transport, "p1").await;
    let num_consumers = 100;

    let transport = Arc::new(transport);
    let creations = (0..num_consumers).map(|_| {
        let transport = Arc::clone(&transport);
        let producer_id = producer.id().to_string();
        tokio::spawn(async move {
            transport
                .consume(ConsumerOptions::new(producer_id, RtpParameters::default()))
                .await
        })
    });
    let creations: Vec<_> = creations.collect();

    let mut requests = Vec::with_capacity(num_consumers);
    for _ in 0..num_consumers {
        requests.push(h.mock.expect_request(Method::TransportConsume).await);
    }
    for request in requests.iter().rev() {
        h.mock
            .accept(request, Some(json!({ "paused": false, "producerPaused": true })))
            .await;
    }

    let mut ids = Vec::new();
    for creation in join_all(creations).await {
        let consumer = creation.expect("creation task").expect("consumer created");
        assert!(consumer.producer_paused());
        ids.push(consumer.id().to_string());
    }
    ids.sort();
    ids.dedup();

    assert_eq!(ids.len(), num_consumers);
    assert_eq!(transport.consumers().len(), num_consumers);
}

#[tokio::test]
async fn test_concurrent_data_consumers_get_distinct_stream_ids() {
    let mut h = Harness::new().await;
    let transport = h.data_transport().await;
    h.produce_data(&transport, "dp1").await;
    let num_consumers = 64;

    let transport = Arc::new(transport);
    let creations = (0..num_consumers).map(|_| {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move { transport.consume_data(DataConsumerOptions::new("dp1")).await })
    });
    let creations: Vec<_> = creations.collect();

    let mut requests = Vec::with_capacity(num_consumers);
    for _ in 0..num_consumers {
        requests.push(h.mock.expect_request(Method::TransportConsumeData).await);
    }
    let wire_ids: HashSet<u64> = requests
        .iter()
        .map(|r| {
            r.data.as_ref().expect("request data")["sctpStreamParameters"]["streamId"]
                .as_u64()
                .expect("stream id on the wire")
        })
        .collect();
    assert_eq!(wire_ids, (0..num_consumers as u64).collect());

    for request in requests.iter().rev() {
        h.mock.accept(request, None).await;
    }

    let mut ids = HashSet::new();
    for creation in join_all(creations).await {
        let data_consumer = creation
            .expect("creation task")
            .expect("data consumer created");
        let stream_id = data_consumer
            .sctp_stream_parameters()
            .expect("sctp stream parameters")
            .stream_id;
        assert!(ids.insert(stream_id), "stream id {stream_id} handed out twice");
    }
    assert_eq!(ids.len(), num_consumers);
    assert_eq!(transport.data_consumers().len(), num_consumers);
}
