//! Router: owner of transports, RTP observers and the producer registry
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


use mediactl_types::{Internal, Method};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use worker_channel::Channel;

use crate::data_producer::DataProducer;
use crate::entity::{decode_response, EntityCore};
use crate::error::{MediaError, MediaResult};
use crate::event_emitter::{EventEmitter, EventName, HandlerId};
use crate::observer::{EntityKind, Observer, ObserverEventKind, ObserverHandle};
use crate::options::{
    ActiveSpeakerObserverOptions, AudioLevelObserverOptions, PlainTransportOptions, RouterOptions,
    WebRtcTransportOptions,
};
use crate::producer::Producer;
use crate::registry::EntityRegistry;
use crate::rtp_observer::{RtpObserver, RtpObserverKind};
use crate::transport::{Transport, TransportData};

#[derive(Debug, Clone)]
pub enum RouterEvent {
    InternalClose,
    Close,
    WorkerClose,
}

impl EventName for RouterEvent {
    fn name(&self) -> &'static str {
        match self {
            RouterEvent::InternalClose => "@close",
            RouterEvent::Close => "close",
            RouterEvent::WorkerClose => "workerclose",
        }
    }
}

struct RouterState {
    closed: bool,
    transports: HashMap<String, Transport>,
    rtp_observers: HashMap<String, RtpObserver>,
}

struct RouterInner {
    id: String,
    app_data: Value,
    core: EntityCore,
    observer: ObserverHandle,
    registry: Arc<EntityRegistry>,
    events: EventEmitter<RouterEvent>,
    state: Mutex<RouterState>,
}

/// Handle to a worker router
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    pub(crate) fn new(id: String, options: RouterOptions, channel: Channel) -> Self {
        let observer = ObserverHandle::new(Arc::new(Observer::new()), EntityKind::Router, &id);
        let core = EntityCore::new(channel, Internal::router(&id));

        Self {
            inner: Arc::new(RouterInner {
                id,
                app_data: options.app_data,
                core,
                observer,
                registry: Arc::new(EntityRegistry::new()),
                events: EventEmitter::new(),
                state: Mutex::new(RouterState {
                    closed: false,
                    transports: HashMap::new(),
                    rtp_observers: HashMap::new(),
                }),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn app_data(&self) -> &Value {
        &self.inner.app_data
    }

    pub fn closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Event sink for every entity this router owns
    pub fn observer(&self) -> &Observer {
        self.inner.observer.observer()
    }

    pub fn on<F>(&self, event: &'static str, handler: F) -> HandlerId
    where
        F: Fn(&RouterEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(event, handler)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.events.off(id)
    }

    pub fn transports(&self) -> Vec<Transport> {
        self.inner.state.lock().transports.values().cloned().collect()
    }

    pub fn rtp_observers(&self) -> Vec<RtpObserver> {
        self.inner.state.lock().rtp_observers.values().cloned().collect()
    }

    /// Live producer with the given id on any of this router's transports
    pub fn resolve_producer(&self, producer_id: &str) -> Option<Producer> {
        self.inner.registry.producer(producer_id)
    }

    pub fn resolve_data_producer(&self, data_producer_id: &str) -> Option<DataProducer> {
        self.inner.registry.data_producer(data_producer_id)
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.inner.registry
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    pub fn close(&self) {
        let Some((transports, rtp_observers)) = self.mark_closed() else {
            return;
        };
        info!(router_id = %self.inner.id, "Router closed");

        self.inner.core.request_detached(Method::RouterClose, None);
        self.cascade(transports, rtp_observers);

        self.inner.events.emit(&RouterEvent::InternalClose);
        self.inner.events.emit(&RouterEvent::Close);
        self.inner.observer.emit(ObserverEventKind::Close);
    }

    /// Worker was closed
    pub fn worker_closed(&self) {
        let Some((transports, rtp_observers)) = self.mark_closed() else {
            return;
        };
        debug!(router_id = %self.inner.id, "worker_closed()");

        self.cascade(transports, rtp_observers);

        self.inner.events.emit(&RouterEvent::WorkerClose);
        self.inner.observer.emit(ObserverEventKind::Close);
    }

    fn mark_closed(&self) -> Option<(Vec<Transport>, Vec<RtpObserver>)> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return None;
        }
        state.closed = true;
        self.inner.core.shutdown();

        Some((
            state.transports.drain().map(|(_, t)| t).collect(),
            state.rtp_observers.drain().map(|(_, o)| o).collect(),
        ))
    }

    fn cascade(&self, transports: Vec<Transport>, rtp_observers: Vec<RtpObserver>) {
        for transport in transports {
            transport.router_closed();
        }
        for rtp_observer in rtp_observers {
            rtp_observer.router_closed();
        }
        self.inner.registry.clear();
    }

    pub async fn dump(&self) -> MediaResult<Value> {
        debug!(router_id = %self.inner.id, "dump()");
        self.inner.core.request_value(Method::RouterDump, None).await
    }

    // ------------------------------------------------------------------------
    // Transports
    // ------------------------------------------------------------------------

    pub async fn create_webrtc_transport(
        &self,
        options: WebRtcTransportOptions,
    ) -> MediaResult<Transport> {
        debug!(router_id = %self.inner.id, "create_webrtc_transport()");

        let data = json!({
            "listenIps": options.listen_ips,
            "enableUdp": options.enable_udp,
            "enableTcp": options.enable_tcp,
            "preferUdp": options.prefer_udp,
            "preferTcp": options.prefer_tcp,
            "initialAvailableOutgoingBitrate": options.initial_available_outgoing_bitrate,
            "enableSctp": options.enable_sctp,
            "numSctpStreams": options.num_sctp_streams,
            "maxSctpMessageSize": options.max_sctp_message_size,
            "isDataChannel": true,
        });

        self.create_transport(Method::RouterCreateWebRtcTransport, data, options.app_data, |payload| {
            decode_response(Method::RouterCreateWebRtcTransport, payload).map(TransportData::WebRtc)
        })
        .await
    }

    pub async fn create_plain_transport(
        &self,
        options: PlainTransportOptions,
    ) -> MediaResult<Transport> {
        debug!(router_id = %self.inner.id, "create_plain_transport()");

        let data = json!({
            "listenIp": options.listen_ip,
            "rtcpMux": options.rtcp_mux,
            "comedia": options.comedia,
            "enableSctp": options.enable_sctp,
            "numSctpStreams": options.num_sctp_streams,
            "maxSctpMessageSize": options.max_sctp_message_size,
            "isDataChannel": false,
            "enableSrtp": options.enable_srtp,
            "srtpCryptoSuite": options.srtp_crypto_suite,
        });

        self.create_transport(Method::RouterCreatePlainTransport, data, options.app_data, |payload| {
            decode_response(Method::RouterCreatePlainTransport, payload).map(TransportData::Plain)
        })
        .await
    }

    async fn create_transport<F>(
        &self,
        method: Method,
        data: Value,
        app_data: Value,
        decode: F,
    ) -> MediaResult<Transport>
    where
        F: FnOnce(Option<Value>) -> MediaResult<TransportData>,
    {
        let transport_id = Uuid::new_v4().to_string();
        let internal = self.inner.core.internal().clone().with_transport(&transport_id);

        let payload = self
            .inner
            .core
            .request_with(method, internal.clone(), Some(data))
            .await?;
        let transport_data = decode(payload).map_err(|e| {
            warn!(%method, error = %e, "Closing transport created with an unreadable response");
            self.inner
                .core
                .channel()
                .request_detached(Method::TransportClose, internal.clone(), None);
            e
        })?;

        let transport = Transport::new(
            transport_id.clone(),
            transport_data,
            app_data,
            EntityCore::new(self.inner.core.channel().clone(), internal),
            self.inner.observer.child(EntityKind::Transport, &transport_id),
            Arc::downgrade(&self.inner.registry),
        );

        {
            let mut state = self.inner.state.lock();
            if !state.closed {
                state.transports.insert(transport_id.clone(), transport.clone());
            } else {
                drop(state);
                transport.router_closed();
                return Err(MediaError::ChannelClosed);
            }
        }

        let weak = Arc::downgrade(&self.inner);
        transport.on("@close", move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.state.lock().transports.remove(&transport_id);
            }
        });

        self.inner
            .observer
            .emit(ObserverEventKind::NewTransport(transport.clone()));
        Ok(transport)
    }

    // ------------------------------------------------------------------------
    // RTP observers
    // ------------------------------------------------------------------------

    pub async fn create_audio_level_observer(
        &self,
        options: AudioLevelObserverOptions,
    ) -> MediaResult<RtpObserver> {
        debug!(router_id = %self.inner.id, "create_audio_level_observer()");

        let data = json!({
            "maxEntries": options.max_entries,
            "threshold": options.threshold,
            "interval": options.interval,
        });
        self.create_rtp_observer(
            Method::RouterCreateAudioLevelObserver,
            RtpObserverKind::AudioLevel,
            data,
            options.app_data,
        )
        .await
    }

    pub async fn create_active_speaker_observer(
        &self,
        options: ActiveSpeakerObserverOptions,
    ) -> MediaResult<RtpObserver> {
        debug!(router_id = %self.inner.id, "create_active_speaker_observer()");

        let data = json!({ "interval": options.interval });
        self.create_rtp_observer(
            Method::RouterCreateActiveSpeakerObserver,
            RtpObserverKind::ActiveSpeaker,
            data,
            options.app_data,
        )
        .await
    }

    async fn create_rtp_observer(
        &self,
        method: Method,
        kind: RtpObserverKind,
        data: Value,
        app_data: Value,
    ) -> MediaResult<RtpObserver> {
        let rtp_observer_id = Uuid::new_v4().to_string();
        let internal = self
            .inner
            .core
            .internal()
            .clone()
            .with_rtp_observer(&rtp_observer_id);

        self.inner
            .core
            .request_with(method, internal.clone(), Some(data))
            .await?;

        let rtp_observer = RtpObserver::new(
            rtp_observer_id.clone(),
            kind,
            app_data,
            EntityCore::new(self.inner.core.channel().clone(), internal),
            self.inner
                .observer
                .child(EntityKind::RtpObserver, &rtp_observer_id),
            Arc::downgrade(&self.inner.registry),
        );

        {
            let mut state = self.inner.state.lock();
            if !state.closed {
                state
                    .rtp_observers
                    .insert(rtp_observer_id.clone(), rtp_observer.clone());
            } else {
                drop(state);
                rtp_observer.router_closed();
                return Err(MediaError::ChannelClosed);
            }
        }

        let weak = Arc::downgrade(&self.inner);
        rtp_observer.on("@close", move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.state.lock().rtp_observers.remove(&rtp_observer_id);
            }
        });

        self.inner
            .observer
            .emit(ObserverEventKind::NewRtpObserver(rtp_observer.clone()));
        Ok(rtp_observer)
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("id", &self.inner.id)
            .field("closed", &self.closed())
            .finish()
    }
}
