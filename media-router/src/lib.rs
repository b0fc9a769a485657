//! Media Router control plane
//!
//! Typed handles for the entities living inside a media worker process:
//! workers, routers, transports, producers, consumers, data producers, data
//! consumers and RTP observers. Each handle mirrors the worker-side state from
//! request responses and notifications delivered over a
//! [`worker_channel::Channel`], exposes typed events, and reports to the
//! owning router's [`Observer`].
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


pub mod consumer;
pub mod data_consumer;
pub mod data_producer;
mod entity;
pub mod error;
pub mod event_emitter;
pub mod observer;
pub mod options;
pub mod producer;
pub mod registry;
pub mod router;
pub mod rtp_observer;
pub mod transport;
pub mod worker;

// Re-export main types
pub use consumer::{Consumer, ConsumerEvent, DEFAULT_PRIORITY};
pub use data_consumer::{DataConsumer, DataConsumerEvent};
pub use data_producer::{DataProducer, DataProducerEvent};
pub use error::{MediaError, MediaResult, NotificationError};
pub use event_emitter::{EventEmitter, EventName, HandlerId};
pub use observer::{EntityKind, Observer, ObserverEvent, ObserverEventKind};
pub use options::{
    ActiveSpeakerObserverOptions, AudioLevelObserverOptions, ConnectParameters, ConsumerOptions,
    DataConsumerOptions, DataProducerOptions, ListenIp, NumSctpStreams, PlainTransportOptions,
    ProducerOptions, RouterOptions, WebRtcTransportOptions,
};
pub use producer::{Producer, ProducerEvent};
pub use registry::EntityRegistry;
pub use router::{Router, RouterEvent};
pub use rtp_observer::{AudioVolume, RtpObserver, RtpObserverEvent, RtpObserverKind};
pub use transport::{Transport, TransportEvent, TransportKind};
pub use worker::{Worker, WorkerEvent};
