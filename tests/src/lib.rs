//! Shared fixtures for the integration and load suites
//!
//! Every helper drives a [`MockWorker`] alongside the call under test, so a
//! suite can build a worker / router / transport tree in a few lines.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use media_router::{
    AudioLevelObserverOptions, ConsumerOptions, DataProducerOptions, EntityKind, EventName,
    ListenIp, Observer, ObserverEvent, ProducerOptions, RouterOptions, WebRtcTransportOptions,
};
use media_router::{Consumer, DataProducer, Producer, Router, RtpObserver, Transport, Worker};
use mediactl_types::{MediaKind, Method, RtpParameters, SctpStreamParameters};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use worker_channel::testing::MockWorker;
use worker_channel::Channel;

/// Worker, router and the mock on the other end of their channel
pub struct Harness {
    pub channel: Channel,
    pub mock: MockWorker,
    pub worker: Worker,
    pub router: Router,
}

impl Harness {
    pub async fn new() -> Self {
        mediactl_logging::init_test_logging();

        let (channel, mut mock) = MockWorker::pair();
        let worker = Worker::new(channel.clone());

        let (router, _) = tokio::join!(worker.create_router(RouterOptions::default()), async {
            let request = mock.expect_request(Method::WorkerCreateRouter).await;
            mock.accept(&request, None).await;
        });

        Self {
            channel,
            mock,
            worker,
            router: router.expect("router creation"),
        }
    }

    pub async fn webrtc_transport(&mut self) -> Transport {
        self.create_webrtc_transport(webrtc_transport_data()).await
    }

    /// WebRTC transport with SCTP enabled
    pub async fn data_transport(&mut self) -> Transport {
        let mut data = webrtc_transport_data();
        data["sctpParameters"] = json!({ "port": 5000, "OS": 1024, "MIS": 1024, "maxMessageSize": 262144 });
        data["sctpState"] = json!("new");
        self.create_webrtc_transport(data).await
    }

    async fn create_webrtc_transport(&mut self, response: Value) -> Transport {
        let router = self.router.clone();
        let (transport, _) = tokio::join!(
            router.create_webrtc_transport(WebRtcTransportOptions::new(vec![ListenIp::new(
                "127.0.0.1"
            )])),
            async {
                let request = self
                    .mock
                    .expect_request(Method::RouterCreateWebRtcTransport)
                    .await;
                self.mock.accept(&request, Some(response)).await;
            }
        );
        transport.expect("transport creation")
    }

    pub async fn produce(&mut self, transport: &Transport, id: &str) -> Producer {
        let mut options = ProducerOptions::new(MediaKind::Audio, RtpParameters::default());
        options.id = Some(id.to_string());

        let (producer, _) = tokio::join!(transport.produce(options), async {
            let request = self.mock.expect_request(Method::TransportProduce).await;
            self.mock
                .accept(&request, Some(json!({ "type": "simple" })))
                .await;
        });
        producer.expect("producer creation")
    }

    pub async fn produce_data(&mut self, transport: &Transport, id: &str) -> DataProducer {
        let options = DataProducerOptions {
            id: Some(id.to_string()),
            sctp_stream_parameters: Some(SctpStreamParameters {
                stream_id: 0,
                ordered: Some(true),
                max_packet_life_time: None,
                max_retransmits: None,
            }),
            label: "chat".to_string(),
            ..Default::default()
        };

        let (data_producer, _) = tokio::join!(transport.produce_data(options), async {
            let request = self.mock.expect_request(Method::TransportProduceData).await;
            self.mock.accept(&request, None).await;
        });
        data_producer.expect("data producer creation")
    }

    pub async fn consume(&mut self, transport: &Transport, producer_id: &str) -> Consumer {
        let (consumer, _) = tokio::join!(
            transport.consume(ConsumerOptions::new(producer_id, RtpParameters::default())),
            async {
                let request = self.mock.expect_request(Method::TransportConsume).await;
                self.mock
                    .accept(
                        &request,
                        Some(json!({ "paused": false, "producerPaused": false })),
                    )
                    .await;
            }
        );
        consumer.expect("consumer creation")
    }

    pub async fn audio_level_observer(&mut self) -> RtpObserver {
        let router = self.router.clone();
        let (observer, _) = tokio::join!(
            router.create_audio_level_observer(AudioLevelObserverOptions::default()),
            async {
                let request = self
                    .mock
                    .expect_request(Method::RouterCreateAudioLevelObserver)
                    .await;
                self.mock.accept(&request, None).await;
            }
        );
        observer.expect("observer creation")
    }

    /// Wait until every notification sent so far has been processed
    pub async fn sync(&mut self) {
        self.mock.sync(&self.channel).await;
    }
}

/// Minimal `router.createWebRtcTransport` response
pub fn webrtc_transport_data() -> Value {
    json!({
        "iceRole": "controlled",
        "iceParameters": { "usernameFragment": "uf", "password": "pw", "iceLite": true },
        "iceCandidates": [{
            "foundation": "udpcandidate",
            "priority": 1076302079,
            "ip": "127.0.0.1",
            "protocol": "udp",
            "port": 40000,
            "type": "host"
        }],
        "iceState": "new",
        "dtlsParameters": {
            "role": "auto",
            "fingerprints": [{ "algorithm": "sha-256", "value": "AB:CD" }]
        },
        "dtlsState": "new"
    })
}

/// Observer events recorded as `(entity kind, entity id, event name)`
#[derive(Clone, Default)]
pub struct ObserverLog {
    events: Arc<Mutex<Vec<(EntityKind, String, &'static str)>>>,
}

impl ObserverLog {
    pub fn attach(observer: &Observer) -> Self {
        let log = Self::default();
        let sink = Arc::clone(&log.events);
        observer.on_any(move |event: &ObserverEvent| {
            sink.lock()
                .push((event.entity_kind, event.entity_id.clone(), event.name()));
        });
        log
    }

    /// Event names emitted by one entity, in order
    pub fn names_for(&self, entity_id: &str) -> Vec<&'static str> {
        self.events
            .lock()
            .iter()
            .filter(|(_, id, _)| id == entity_id)
            .map(|(_, _, name)| *name)
            .collect()
    }

    pub fn count(&self, entity_id: &str, name: &str) -> usize {
        self.names_for(entity_id)
            .into_iter()
            .filter(|n| *n == name)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}
