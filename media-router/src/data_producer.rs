//! DataProducer: an inbound SCTP data stream
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


use mediactl_types::{Method, Notification, SctpStreamParameters};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::entity::{log_dropped, unknown_event, EntityCore};
use crate::error::MediaResult;
use crate::event_emitter::{EventEmitter, EventName, HandlerId};
use crate::observer::{EntityKind, ObserverEventKind, ObserverHandle};

#[derive(Debug, Clone)]
pub enum DataProducerEvent {
    InternalClose,
    Close,
    TransportClose,
}

impl EventName for DataProducerEvent {
    fn name(&self) -> &'static str {
        match self {
            DataProducerEvent::InternalClose => "@close",
            DataProducerEvent::Close => "close",
            DataProducerEvent::TransportClose => "transportclose",
        }
    }
}

pub(crate) struct DataProducerInit {
    pub id: String,
    pub sctp_stream_parameters: Option<SctpStreamParameters>,
    pub label: String,
    pub protocol: String,
    pub app_data: Value,
}

struct DataProducerInner {
    id: String,
    sctp_stream_parameters: Option<SctpStreamParameters>,
    label: String,
    protocol: String,
    app_data: Value,
    core: EntityCore,
    observer: ObserverHandle,
    events: EventEmitter<DataProducerEvent>,
    closed: Mutex<bool>,
}

#[derive(Clone)]
pub struct DataProducer {
    inner: Arc<DataProducerInner>,
}

impl DataProducer {
    pub(crate) fn new(init: DataProducerInit, core: EntityCore, observer: ObserverHandle) -> Self {
        let inner = Arc::new(DataProducerInner {
            id: init.id,
            sctp_stream_parameters: init.sctp_stream_parameters,
            label: init.label,
            protocol: init.protocol,
            app_data: init.app_data,
            core,
            observer,
            events: EventEmitter::new(),
            closed: Mutex::new(false),
        });

        // The worker sends no data producer notifications; anything that
        // arrives is logged
        let id = inner.id.clone();
        inner.core.subscribe(&inner.id, move |notification: &Notification| {
            log_dropped(EntityKind::DataProducer, &id, &unknown_event(notification));
        });

        Self { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn sctp_stream_parameters(&self) -> Option<&SctpStreamParameters> {
        self.inner.sctp_stream_parameters.as_ref()
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn protocol(&self) -> &str {
        &self.inner.protocol
    }

    pub fn app_data(&self) -> &Value {
        &self.inner.app_data
    }

    pub fn closed(&self) -> bool {
        *self.inner.closed.lock()
    }

    pub fn on<F>(&self, event: &'static str, handler: F) -> HandlerId
    where
        F: Fn(&DataProducerEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(event, handler)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.events.off(id)
    }

    pub fn close(&self) {
        if !self.mark_closed() {
            return;
        }
        debug!(data_producer_id = %self.inner.id, "close()");

        self.inner.core.request_detached(Method::DataProducerClose, None);

        self.inner.events.emit(&DataProducerEvent::InternalClose);
        self.inner.events.emit(&DataProducerEvent::Close);
        self.inner.observer.emit(ObserverEventKind::Close);
    }

    pub fn transport_closed(&self) {
        if !self.mark_closed() {
            return;
        }
        debug!(data_producer_id = %self.inner.id, "transport_closed()");

        self.inner.events.emit(&DataProducerEvent::TransportClose);
        self.inner.observer.emit(ObserverEventKind::Close);
    }

    fn mark_closed(&self) -> bool {
        let mut closed = self.inner.closed.lock();
        if *closed {
            return false;
        }
        *closed = true;
        self.inner.core.shutdown();
        true
    }

    pub async fn dump(&self) -> MediaResult<Value> {
        debug!(data_producer_id = %self.inner.id, "dump()");
        self.inner.core.request_value(Method::DataProducerDump, None).await
    }

    pub async fn get_stats(&self) -> MediaResult<Value> {
        debug!(data_producer_id = %self.inner.id, "get_stats()");
        self.inner.core.request_value(Method::DataProducerGetStats, None).await
    }
}

impl std::fmt::Debug for DataProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataProducer")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("closed", &self.closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MediaError;
    use crate::observer::Observer;
    use mediactl_types::Internal;
    use serde_json::json;
    use std::time::Duration;
    use worker_channel::testing::MockWorker;
    use worker_channel::Channel;

    fn data_producer(channel: &Channel) -> DataProducer {
        DataProducer::new(
            DataProducerInit {
                id: "dp1".to_string(),
                sctp_stream_parameters: None,
                label: "chat".to_string(),
                protocol: String::new(),
                app_data: Value::Null,
            },
            EntityCore::new(
                channel.clone(),
                Internal::router("r1").with_transport("t1").with_data_producer("dp1"),
            ),
            ObserverHandle::new(Arc::new(Observer::new()), EntityKind::DataProducer, "dp1"),
        )
    }

    #[tokio::test]
    async fn test_dump_returns_worker_payload() {
        let (channel, mut worker) = MockWorker::pair();
        let data_producer = data_producer(&channel);

        let (dump, _) = tokio::join!(data_producer.dump(), async {
            let request = worker.expect_request(Method::DataProducerDump).await;
            assert_eq!(request.internal.data_producer_id.as_deref(), Some("dp1"));
            worker.accept(&request, Some(json!({ "id": "dp1", "label": "chat" }))).await;
        });

        assert_eq!(dump.unwrap()["label"], "chat");
    }

    #[tokio::test]
    async fn test_transport_closed_is_silent_toward_worker() {
        let (channel, mut worker) = MockWorker::pair();
        let data_producer = data_producer(&channel);

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        for name in ["close", "transportclose"] {
            let sink = Arc::clone(&sink);
            data_producer.on(name, move |e: &DataProducerEvent| sink.lock().push(e.name()));
        }

        data_producer.transport_closed();
        data_producer.close();

        assert!(data_producer.closed());
        assert_eq!(*events.lock(), vec!["transportclose"]);
        assert!(worker
            .try_next_request(Duration::from_millis(50))
            .await
            .is_none());
        assert_eq!(data_producer.get_stats().await, Err(MediaError::ChannelClosed));
        assert_eq!(channel.subscribed_targets(), 0);
    }
}
