//! DataConsumer: an outbound SCTP data stream fed by a data producer
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


use mediactl_types::notifications::BufferedAmountLowData;
use mediactl_types::{Method, Notification, SctpStreamParameters};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::entity::{log_dropped, notification_data, unknown_event, EntityCore};
use crate::error::{MediaResult, NotificationError};
use crate::event_emitter::{EventEmitter, EventName, HandlerId};
use crate::observer::{EntityKind, ObserverEventKind, ObserverHandle};

#[derive(Debug, Clone)]
pub enum DataConsumerEvent {
    InternalClose,
    InternalDataProducerClose,
    Close,
    TransportClose,
    DataProducerClose,
    SctpSendBufferFull,
    BufferedAmountLow { buffered_amount: u32 },
}

impl EventName for DataConsumerEvent {
    fn name(&self) -> &'static str {
        match self {
            DataConsumerEvent::InternalClose => "@close",
            DataConsumerEvent::InternalDataProducerClose => "@dataproducerclose",
            DataConsumerEvent::Close => "close",
            DataConsumerEvent::TransportClose => "transportclose",
            DataConsumerEvent::DataProducerClose => "dataproducerclose",
            DataConsumerEvent::SctpSendBufferFull => "sctpsendbufferfull",
            DataConsumerEvent::BufferedAmountLow { .. } => "bufferedamountlow",
        }
    }
}

enum DataConsumerNotification {
    DataProducerClose,
    SctpSendBufferFull,
    BufferedAmountLow(BufferedAmountLowData),
    Unknown,
}

impl DataConsumerNotification {
    fn parse(notification: &Notification) -> Result<Self, NotificationError> {
        Ok(match notification.event.as_str() {
            "dataproducerclose" => Self::DataProducerClose,
            "sctpsendbufferfull" => Self::SctpSendBufferFull,
            "bufferedamountlow" => Self::BufferedAmountLow(notification_data(notification)?),
            _ => Self::Unknown,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BufferedAmountResponse {
    buffered_amount: u32,
}

pub(crate) struct DataConsumerInit {
    pub id: String,
    pub data_producer_id: String,
    pub sctp_stream_parameters: Option<SctpStreamParameters>,
    pub label: String,
    pub protocol: String,
    pub app_data: Value,
}

struct DataConsumerState {
    closed: bool,
    buffered_amount_low_threshold: u32,
}

struct DataConsumerInner {
    id: String,
    data_producer_id: String,
    sctp_stream_parameters: Option<SctpStreamParameters>,
    label: String,
    protocol: String,
    app_data: Value,
    core: EntityCore,
    observer: ObserverHandle,
    events: EventEmitter<DataConsumerEvent>,
    state: Mutex<DataConsumerState>,
}

#[derive(Clone)]
pub struct DataConsumer {
    inner: Arc<DataConsumerInner>,
}

impl DataConsumer {
    pub(crate) fn new(init: DataConsumerInit, core: EntityCore, observer: ObserverHandle) -> Self {
        let inner = Arc::new(DataConsumerInner {
            id: init.id,
            data_producer_id: init.data_producer_id,
            sctp_stream_parameters: init.sctp_stream_parameters,
            label: init.label,
            protocol: init.protocol,
            app_data: init.app_data,
            core,
            observer,
            events: EventEmitter::new(),
            state: Mutex::new(DataConsumerState {
                closed: false,
                buffered_amount_low_threshold: 0,
            }),
        });

        let weak = Arc::downgrade(&inner);
        inner.core.subscribe(&inner.id, move |notification| {
            if let Some(inner) = weak.upgrade() {
                DataConsumer { inner }.handle_notification(notification);
            }
        });

        Self { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn data_producer_id(&self) -> &str {
        &self.inner.data_producer_id
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
        self.inner.state.lock().closed
    }

    pub fn buffered_amount_low_threshold(&self) -> u32 {
        self.inner.state.lock().buffered_amount_low_threshold
    }

    pub fn on<F>(&self, event: &'static str, handler: F) -> HandlerId
    where
        F: Fn(&DataConsumerEvent) + Send + Sync + 'static,
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
        debug!(data_consumer_id = %self.inner.id, "close()");

        self.inner.core.request_detached(Method::DataConsumerClose, None);

        self.inner.events.emit(&DataConsumerEvent::InternalClose);
        self.inner.events.emit(&DataConsumerEvent::Close);
        self.inner.observer.emit(ObserverEventKind::Close);
    }

    pub fn transport_closed(&self) {
        if !self.mark_closed() {
            return;
        }
        debug!(data_consumer_id = %self.inner.id, "transport_closed()");

        self.inner.events.emit(&DataConsumerEvent::TransportClose);
        self.inner.observer.emit(ObserverEventKind::Close);
    }

    fn mark_closed(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        self.inner.core.shutdown();
        true
    }

    pub async fn dump(&self) -> MediaResult<Value> {
        debug!(data_consumer_id = %self.inner.id, "dump()");
        self.inner.core.request_value(Method::DataConsumerDump, None).await
    }

    pub async fn get_stats(&self) -> MediaResult<Value> {
        debug!(data_consumer_id = %self.inner.id, "get_stats()");
        self.inner.core.request_value(Method::DataConsumerGetStats, None).await
    }

    /// Bytes queued in the SCTP send buffer
    pub async fn get_buffered_amount(&self) -> MediaResult<u32> {
        debug!(data_consumer_id = %self.inner.id, "get_buffered_amount()");
        let response: BufferedAmountResponse = self
            .inner
            .core
            .request_as(
                Method::DataConsumerGetBufferedAmount,
                self.inner.core.internal().clone(),
                None,
            )
            .await?;
        Ok(response.buffered_amount)
    }

    /// Threshold below which `bufferedamountlow` fires
    pub async fn set_buffered_amount_low_threshold(&self, threshold: u32) -> MediaResult<()> {
        debug!(data_consumer_id = %self.inner.id, threshold, "set_buffered_amount_low_threshold()");
        self.inner
            .core
            .request_void(
                Method::DataConsumerSetBufferedAmountLowThreshold,
                Some(json!({ "threshold": threshold })),
            )
            .await?;

        let mut state = self.inner.state.lock();
        if !state.closed {
            state.buffered_amount_low_threshold = threshold;
        }
        Ok(())
    }

    fn handle_notification(&self, notification: &Notification) {
        let parsed = match DataConsumerNotification::parse(notification) {
            Ok(parsed) => parsed,
            Err(e) => {
                log_dropped(EntityKind::DataConsumer, &self.inner.id, &e);
                return;
            }
        };

        match parsed {
            DataConsumerNotification::DataProducerClose => {
                if !self.mark_closed() {
                    return;
                }
                debug!(data_consumer_id = %self.inner.id, "Data producer closed");

                self.inner.events.emit(&DataConsumerEvent::InternalDataProducerClose);
                self.inner.events.emit(&DataConsumerEvent::DataProducerClose);
                self.inner.observer.emit(ObserverEventKind::Close);
            }
            DataConsumerNotification::SctpSendBufferFull => {
                if self.closed() {
                    return;
                }
                self.inner.events.emit(&DataConsumerEvent::SctpSendBufferFull);
            }
            DataConsumerNotification::BufferedAmountLow(data) => {
                if self.closed() {
                    return;
                }
                self.inner.events.emit(&DataConsumerEvent::BufferedAmountLow {
                    buffered_amount: data.buffered_amount,
                });
            }
            DataConsumerNotification::Unknown => {
                log_dropped(EntityKind::DataConsumer, &self.inner.id, &unknown_event(notification));
            }
        }
    }
}

impl std::fmt::Debug for DataConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataConsumer")
            .field("id", &self.inner.id)
            .field("data_producer_id", &self.inner.data_producer_id)
            .field("closed", &self.closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::Observer;
    use mediactl_types::Internal;
    use worker_channel::testing::MockWorker;
    use worker_channel::Channel;

    fn data_consumer(channel: &Channel) -> DataConsumer {
        DataConsumer::new(
            DataConsumerInit {
                id: "dc1".to_string(),
                data_producer_id: "dp1".to_string(),
                sctp_stream_parameters: None,
                label: "chat".to_string(),
                protocol: String::new(),
                app_data: Value::Null,
            },
            EntityCore::new(
                channel.clone(),
                Internal::router("r1")
                    .with_transport("t1")
                    .with_data_consumer("dc1")
                    .with_data_producer("dp1"),
            ),
            ObserverHandle::new(Arc::new(Observer::new()), EntityKind::DataConsumer, "dc1"),
        )
    }

    #[tokio::test]
    async fn test_buffered_amount_round_trip() {
        let (channel, mut worker) = MockWorker::pair();
        let data_consumer = data_consumer(&channel);

        let (amount, _) = tokio::join!(data_consumer.get_buffered_amount(), async {
            let request = worker.expect_request(Method::DataConsumerGetBufferedAmount).await;
            worker.accept(&request, Some(json!({ "bufferedAmount": 2048 }))).await;
        });
        assert_eq!(amount.unwrap(), 2048);

        let (result, _) = tokio::join!(data_consumer.set_buffered_amount_low_threshold(512), async {
            let request = worker
                .expect_request(Method::DataConsumerSetBufferedAmountLowThreshold)
                .await;
            assert_eq!(request.data, Some(json!({ "threshold": 512 })));
            worker.accept(&request, None).await;
        });
        result.unwrap();
        assert_eq!(data_consumer.buffered_amount_low_threshold(), 512);
    }

    #[tokio::test]
    async fn test_buffered_amount_low_notification() {
        let (channel, mut worker) = MockWorker::pair();
        let data_consumer = data_consumer(&channel);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        data_consumer.on("bufferedamountlow", move |e| {
            if let DataConsumerEvent::BufferedAmountLow { buffered_amount } = e {
                sink.lock().push(*buffered_amount);
            }
        });

        worker
            .notify("dc1", "bufferedamountlow", Some(json!({ "bufferedAmount": 100 })))
            .await;
        worker
            .notify("dc1", "bufferedamountlow", Some(json!({ "bufferedAmount": "lots" })))
            .await;
        worker.sync(&channel).await;

        assert_eq!(*seen.lock(), vec![100]);
    }

    #[tokio::test]
    async fn test_data_producer_close_notification() {
        let (channel, mut worker) = MockWorker::pair();
        let data_consumer = data_consumer(&channel);

        worker.notify("dc1", "dataproducerclose", None).await;
        worker.sync(&channel).await;

        assert!(data_consumer.closed());
        assert_eq!(channel.subscribed_targets(), 0);
    }

    #[tokio::test]
    async fn test_send_buffer_notifications_leave_threshold_alone() {
        let (channel, mut worker) = MockWorker::pair();
        let data_consumer = data_consumer(&channel);

        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in ["sctpsendbufferfull", "bufferedamountlow"] {
            let sink = Arc::clone(&seen);
            data_consumer.on(name, move |e: &DataConsumerEvent| sink.lock().push(e.name()));
        }

        worker.notify("dc1", "sctpsendbufferfull", None).await;
        worker
            .notify("dc1", "bufferedamountlow", Some(json!({ "bufferedAmount": 0 })))
            .await;
        worker.notify("dc1", "bufferedamountlow", None).await;
        worker.sync(&channel).await;

        assert_eq!(*seen.lock(), vec!["sctpsendbufferfull", "bufferedamountlow"]);
        assert_eq!(data_consumer.buffered_amount_low_threshold(), 0);

        data_consumer.close();
        worker.expect_request(Method::DataConsumerClose).await;
        worker.notify("dc1", "sctpsendbufferfull", None).await;
        worker.sync(&channel).await;
        assert_eq!(seen.lock().len(), 2);
    }
}
