//! Control channel wire messages
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


use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MessageError;

/// Worker method identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Method {
    // Worker
    WorkerDump,
    WorkerCreateRouter,

    // Router
    RouterClose,
    RouterDump,
    RouterCreateWebRtcTransport,
    RouterCreatePlainTransport,
    RouterCreateAudioLevelObserver,
    RouterCreateActiveSpeakerObserver,

    // Transport
    TransportClose,
    TransportDump,
    TransportGetStats,
    TransportConnect,
    TransportRestartIce,
    TransportSetMaxIncomingBitrate,
    TransportEnableTraceEvent,
    TransportProduce,
    TransportConsume,
    TransportProduceData,
    TransportConsumeData,

    // Producer
    ProducerClose,
    ProducerDump,
    ProducerGetStats,
    ProducerPause,
    ProducerResume,
    ProducerEnableTraceEvent,

    // Consumer
    ConsumerClose,
    ConsumerDump,
    ConsumerGetStats,
    ConsumerPause,
    ConsumerResume,
    ConsumerSetPreferredLayers,
    ConsumerSetPriority,
    ConsumerRequestKeyFrame,
    ConsumerEnableTraceEvent,

    // DataProducer
    DataProducerClose,
    DataProducerDump,
    DataProducerGetStats,

    // DataConsumer
    DataConsumerClose,
    DataConsumerDump,
    DataConsumerGetStats,
    DataConsumerGetBufferedAmount,
    DataConsumerSetBufferedAmountLowThreshold,

    // RtpObserver
    RtpObserverClose,
    RtpObserverPause,
    RtpObserverResume,
    RtpObserverAddProducer,
    RtpObserverRemoveProducer,
}

impl Method {
    /// Every method, in declaration order
    pub const ALL: &'static [Method] = &[
        Method::WorkerDump,
        Method::WorkerCreateRouter,
        Method::RouterClose,
        Method::RouterDump,
        Method::RouterCreateWebRtcTransport,
        Method::RouterCreatePlainTransport,
        Method::RouterCreateAudioLevelObserver,
        Method::RouterCreateActiveSpeakerObserver,
        Method::TransportClose,
        Method::TransportDump,
        Method::TransportGetStats,
        Method::TransportConnect,
        Method::TransportRestartIce,
        Method::TransportSetMaxIncomingBitrate,
        Method::TransportEnableTraceEvent,
        Method::TransportProduce,
        Method::TransportConsume,
        Method::TransportProduceData,
        Method::TransportConsumeData,
        Method::ProducerClose,
        Method::ProducerDump,
        Method::ProducerGetStats,
        Method::ProducerPause,
        Method::ProducerResume,
        Method::ProducerEnableTraceEvent,
        Method::ConsumerClose,
        Method::ConsumerDump,
        Method::ConsumerGetStats,
        Method::ConsumerPause,
        Method::ConsumerResume,
        Method::ConsumerSetPreferredLayers,
        Method::ConsumerSetPriority,
        Method::ConsumerRequestKeyFrame,
        Method::ConsumerEnableTraceEvent,
        Method::DataProducerClose,
        Method::DataProducerDump,
        Method::DataProducerGetStats,
        Method::DataConsumerClose,
        Method::DataConsumerDump,
        Method::DataConsumerGetStats,
        Method::DataConsumerGetBufferedAmount,
        Method::DataConsumerSetBufferedAmountLowThreshold,
        Method::RtpObserverClose,
        Method::RtpObserverPause,
        Method::RtpObserverResume,
        Method::RtpObserverAddProducer,
        Method::RtpObserverRemoveProducer,
    ];

    /// Dotted method name as understood by the worker
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::WorkerDump => "worker.dump",
            Method::WorkerCreateRouter => "worker.createRouter",
            Method::RouterClose => "router.close",
            Method::RouterDump => "router.dump",
            Method::RouterCreateWebRtcTransport => "router.createWebRtcTransport",
            Method::RouterCreatePlainTransport => "router.createPlainTransport",
            Method::RouterCreateAudioLevelObserver => "router.createAudioLevelObserver",
            Method::RouterCreateActiveSpeakerObserver => "router.createActiveSpeakerObserver",
            Method::TransportClose => "transport.close",
            Method::TransportDump => "transport.dump",
            Method::TransportGetStats => "transport.getStats",
            Method::TransportConnect => "transport.connect",
            Method::TransportRestartIce => "transport.restartIce",
            Method::TransportSetMaxIncomingBitrate => "transport.setMaxIncomingBitrate",
            Method::TransportEnableTraceEvent => "transport.enableTraceEvent",
            Method::TransportProduce => "transport.produce",
            Method::TransportConsume => "transport.consume",
            Method::TransportProduceData => "transport.produceData",
            Method::TransportConsumeData => "transport.consumeData",
            Method::ProducerClose => "producer.close",
            Method::ProducerDump => "producer.dump",
            Method::ProducerGetStats => "producer.getStats",
            Method::ProducerPause => "producer.pause",
            Method::ProducerResume => "producer.resume",
            Method::ProducerEnableTraceEvent => "producer.enableTraceEvent",
            Method::ConsumerClose => "consumer.close",
            Method::ConsumerDump => "consumer.dump",
            Method::ConsumerGetStats => "consumer.getStats",
            Method::ConsumerPause => "consumer.pause",
            Method::ConsumerResume => "consumer.resume",
            Method::ConsumerSetPreferredLayers => "consumer.setPreferredLayers",
            Method::ConsumerSetPriority => "consumer.setPriority",
            Method::ConsumerRequestKeyFrame => "consumer.requestKeyFrame",
            Method::ConsumerEnableTraceEvent => "consumer.enableTraceEvent",
            Method::DataProducerClose => "dataProducer.close",
            Method::DataProducerDump => "dataProducer.dump",
            Method::DataProducerGetStats => "dataProducer.getStats",
            Method::DataConsumerClose => "dataConsumer.close",
            Method::DataConsumerDump => "dataConsumer.dump",
            Method::DataConsumerGetStats => "dataConsumer.getStats",
            Method::DataConsumerGetBufferedAmount => "dataConsumer.getBufferedAmount",
            Method::DataConsumerSetBufferedAmountLowThreshold => {
                "dataConsumer.setBufferedAmountLowThreshold"
            }
            Method::RtpObserverClose => "rtpObserver.close",
            Method::RtpObserverPause => "rtpObserver.pause",
            Method::RtpObserverResume => "rtpObserver.resume",
            Method::RtpObserverAddProducer => "rtpObserver.addProducer",
            Method::RtpObserverRemoveProducer => "rtpObserver.removeProducer",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .iter()
            .copied()
            .find(|method| method.as_str() == s)
            .ok_or_else(|| MessageError::UnknownMethod(s.to_string()))
    }
}

impl TryFrom<String> for Method {
    type Error = MessageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Method> for &'static str {
    fn from(method: Method) -> Self {
        method.as_str()
    }
}

/// Entity identifiers carried in every request
///
/// Only the identifiers relevant to the target entity are serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Internal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_producer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_consumer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtp_observer_id: Option<String>,
}

impl Internal {
    /// Identifiers for a router-scoped request
    pub fn router(router_id: impl Into<String>) -> Self {
        Self {
            router_id: Some(router_id.into()),
            ..Default::default()
        }
    }

    pub fn with_transport(mut self, transport_id: impl Into<String>) -> Self {
        self.transport_id = Some(transport_id.into());
        self
    }

    pub fn with_producer(mut self, producer_id: impl Into<String>) -> Self {
        self.producer_id = Some(producer_id.into());
        self
    }

    pub fn with_consumer(mut self, consumer_id: impl Into<String>) -> Self {
        self.consumer_id = Some(consumer_id.into());
        self
    }

    pub fn with_data_producer(mut self, data_producer_id: impl Into<String>) -> Self {
        self.data_producer_id = Some(data_producer_id.into());
        self
    }

    pub fn with_data_consumer(mut self, data_consumer_id: impl Into<String>) -> Self {
        self.data_consumer_id = Some(data_consumer_id.into());
        self
    }

    pub fn with_rtp_observer(mut self, rtp_observer_id: impl Into<String>) -> Self {
        self.rtp_observer_id = Some(rtp_observer_id.into());
        self
    }
}

/// Outbound request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, unique among outstanding requests
    pub id: u32,
    pub method: Method,
    pub internal: Internal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Worker reply to a [`Request`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u32,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Response {
    /// Build an accepted response
    pub fn accepted(id: u32, data: Option<Value>) -> Self {
        Self {
            id,
            accepted: true,
            data,
            error: None,
            reason: None,
        }
    }

    /// Build a rejected response
    pub fn rejected(id: u32, reason: impl Into<String>) -> Self {
        Self {
            id,
            accepted: false,
            data: None,
            error: Some("Error".to_string()),
            reason: Some(reason.into()),
        }
    }

    /// Human readable rejection reason, falling back to the error name
    pub fn rejection_reason(&self) -> String {
        self.reason
            .clone()
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| "unknown reason".to_string())
    }
}

/// Unsolicited worker message addressed to one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "targetId")]
    pub target_id: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Notification {
    pub fn new(target_id: impl Into<String>, event: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            target_id: target_id.into(),
            event: event.into(),
            data,
        }
    }
}

/// Any frame the worker may send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InboundMessage {
    Response(Response),
    Notification(Notification),
}
