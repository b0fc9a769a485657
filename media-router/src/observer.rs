//! Router-scoped observer feed
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


use mediactl_types::{
    ConsumerLayers, ConsumerScore, DtlsState, IceState, ProducerScore, SctpState,
    TraceEventData, TransportTuple, VideoOrientation,
};
use std::sync::Arc;

use crate::consumer::Consumer;
use crate::data_consumer::DataConsumer;
use crate::data_producer::DataProducer;
use crate::event_emitter::{EventEmitter, EventName};
use crate::producer::Producer;
use crate::rtp_observer::{AudioVolume, RtpObserver};
use crate::transport::Transport;

/// Kind of entity an observer event originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Router,
    Transport,
    Producer,
    Consumer,
    DataProducer,
    DataConsumer,
    RtpObserver,
}

/// Normalized event delivered to the Router's observer
#[derive(Debug, Clone)]
pub struct ObserverEvent {
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub kind: ObserverEventKind,
}

#[derive(Debug, Clone)]
pub enum ObserverEventKind {
    Close,
    Pause,
    Resume,

    // Children created
    NewTransport(Transport),
    NewRtpObserver(RtpObserver),
    NewProducer(Producer),
    NewConsumer(Consumer),
    NewDataProducer(DataProducer),
    NewDataConsumer(DataConsumer),

    // Transport state
    IceStateChange(IceState),
    IceSelectedTupleChange(TransportTuple),
    DtlsStateChange(DtlsState),
    SctpStateChange(SctpState),
    Tuple(TransportTuple),
    RtcpTuple(TransportTuple),

    // Producer / Consumer
    ProducerScore(Vec<ProducerScore>),
    ConsumerScore(ConsumerScore),
    LayersChange(Option<ConsumerLayers>),
    VideoOrientationChange(VideoOrientation),
    Trace(TraceEventData),

    // RtpObserver
    AddProducer(Producer),
    RemoveProducer(Producer),
    Volumes(Vec<AudioVolume>),
    Silence,
    DominantSpeaker(Producer),
}

impl EventName for ObserverEvent {
    fn name(&self) -> &'static str {
        match &self.kind {
            ObserverEventKind::Close => "close",
            ObserverEventKind::Pause => "pause",
            ObserverEventKind::Resume => "resume",
            ObserverEventKind::NewTransport(_) => "newtransport",
            ObserverEventKind::NewRtpObserver(_) => "newrtpobserver",
            ObserverEventKind::NewProducer(_) => "newproducer",
            ObserverEventKind::NewConsumer(_) => "newconsumer",
            ObserverEventKind::NewDataProducer(_) => "newdataproducer",
            ObserverEventKind::NewDataConsumer(_) => "newdataconsumer",
            ObserverEventKind::IceStateChange(_) => "icestatechange",
            ObserverEventKind::IceSelectedTupleChange(_) => "iceselectedtuplechange",
            ObserverEventKind::DtlsStateChange(_) => "dtlsstatechange",
            ObserverEventKind::SctpStateChange(_) => "sctpstatechange",
            ObserverEventKind::Tuple(_) => "tuple",
            ObserverEventKind::RtcpTuple(_) => "rtcptuple",
            ObserverEventKind::ProducerScore(_) | ObserverEventKind::ConsumerScore(_) => "score",
            ObserverEventKind::LayersChange(_) => "layersChange",
            ObserverEventKind::VideoOrientationChange(_) => "videoorientationchange",
            ObserverEventKind::Trace(_) => "trace",
            ObserverEventKind::AddProducer(_) => "addproducer",
            ObserverEventKind::RemoveProducer(_) => "removeproducer",
            ObserverEventKind::Volumes(_) => "volumes",
            ObserverEventKind::Silence => "silence",
            ObserverEventKind::DominantSpeaker(_) => "dominantspeaker",
        }
    }
}

/// Fan-in sink for every entity owned by one Router
pub type Observer = EventEmitter<ObserverEvent>;

/// An entity's handle on its Router's observer
#[derive(Clone)]
pub(crate) struct ObserverHandle {
    observer: Arc<Observer>,
    entity_kind: EntityKind,
    entity_id: String,
}

impl ObserverHandle {
    pub(crate) fn new(observer: Arc<Observer>, entity_kind: EntityKind, entity_id: &str) -> Self {
        Self {
            observer,
            entity_kind,
            entity_id: entity_id.to_string(),
        }
    }

    pub(crate) fn emit(&self, kind: ObserverEventKind) {
        self.observer.emit(&ObserverEvent {
            entity_kind: self.entity_kind,
            entity_id: self.entity_id.clone(),
            kind,
        });
    }

    /// Handle for a child entity sharing the same observer
    pub(crate) fn child(&self, entity_kind: EntityKind, entity_id: &str) -> Self {
        Self::new(Arc::clone(&self.observer), entity_kind, entity_id)
    }

    pub(crate) fn observer(&self) -> &Arc<Observer> {
        &self.observer
    }
}
