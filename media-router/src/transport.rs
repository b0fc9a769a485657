//! Transports: WebRTC and plain RTP
//!
//! A transport owns the producers, consumers, data producers and data
//! consumers created on it and cascades its closure to them.
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


use mediactl_types::notifications::{
    DtlsStateChangeData, IceSelectedTupleChangeData, IceStateChangeData, RtcpTupleChangeData,
    SctpStateChangeData, TupleChangeData,
};
use mediactl_types::{
    ConsumerLayers, ConsumerScore, ConsumerType, DtlsParameters, DtlsRole, DtlsState, IceCandidate,
    IceParameters, IceRole, IceState, Method, Notification, ProducerType, SctpParameters,
    SctpState, SctpStreamParameters, SrtpParameters, TraceEventData, TraceEventType,
    TransportTuple,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::{debug, info};
use uuid::Uuid;

use crate::consumer::{Consumer, ConsumerInit};
use crate::data_consumer::{DataConsumer, DataConsumerInit};
use crate::data_producer::{DataProducer, DataProducerInit};
use crate::entity::{log_dropped, notification_data, unknown_event, EntityCore};
use crate::error::{MediaError, MediaResult, NotificationError};
use crate::event_emitter::{EventEmitter, EventName, HandlerId};
use crate::observer::{EntityKind, ObserverEventKind, ObserverHandle};
use crate::options::{
    ConnectParameters, ConsumerOptions, DataConsumerOptions, DataProducerOptions, ProducerOptions,
};
use crate::producer::{Producer, ProducerInit};
use crate::registry::EntityRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebRtc,
    Plain,
}

impl TransportKind {
    fn connect_shape(self) -> &'static str {
        match self {
            TransportKind::WebRtc => "webrtc connect parameters",
            TransportKind::Plain => "plain connect parameters",
        }
    }

    fn name(self) -> &'static str {
        match self {
            TransportKind::WebRtc => "webrtc transport",
            TransportKind::Plain => "plain transport",
        }
    }
}

/// Public transport events
#[derive(Debug, Clone)]
pub enum TransportEvent {
    InternalClose,
    Close,
    RouterClose,
    IceStateChange(IceState),
    IceSelectedTupleChange(TransportTuple),
    DtlsStateChange(DtlsState),
    SctpStateChange(SctpState),
    Tuple(TransportTuple),
    RtcpTuple(TransportTuple),
    Trace(TraceEventData),
}

impl EventName for TransportEvent {
    fn name(&self) -> &'static str {
        match self {
            TransportEvent::InternalClose => "@close",
            TransportEvent::Close => "close",
            TransportEvent::RouterClose => "routerclose",
            TransportEvent::IceStateChange(_) => "icestatechange",
            TransportEvent::IceSelectedTupleChange(_) => "iceselectedtuplechange",
            TransportEvent::DtlsStateChange(_) => "dtlsstatechange",
            TransportEvent::SctpStateChange(_) => "sctpstatechange",
            TransportEvent::Tuple(_) => "tuple",
            TransportEvent::RtcpTuple(_) => "rtcptuple",
            TransportEvent::Trace(_) => "trace",
        }
    }
}

enum TransportNotification {
    IceStateChange(IceState),
    IceSelectedTupleChange(TransportTuple),
    DtlsStateChange(DtlsStateChangeData),
    SctpStateChange(SctpState),
    Tuple(TransportTuple),
    RtcpTuple(TransportTuple),
    Trace(TraceEventData),
    Unknown,
}

impl TransportNotification {
    fn parse(kind: TransportKind, notification: &Notification) -> Result<Self, NotificationError> {
        use TransportKind::{Plain, WebRtc};

        Ok(match (kind, notification.event.as_str()) {
            (WebRtc, "icestatechange") => {
                Self::IceStateChange(notification_data::<IceStateChangeData>(notification)?.ice_state)
            }
            (WebRtc, "iceselectedtuplechange") => Self::IceSelectedTupleChange(
                notification_data::<IceSelectedTupleChangeData>(notification)?.ice_selected_tuple,
            ),
            (WebRtc, "dtlsstatechange") => Self::DtlsStateChange(notification_data(notification)?),
            (_, "sctpstatechange") => {
                Self::SctpStateChange(notification_data::<SctpStateChangeData>(notification)?.sctp_state)
            }
            (Plain, "tuple") => Self::Tuple(notification_data::<TupleChangeData>(notification)?.tuple),
            (Plain, "rtcptuple") => {
                Self::RtcpTuple(notification_data::<RtcpTupleChangeData>(notification)?.rtcp_tuple)
            }
            (_, "trace") => Self::Trace(notification_data(notification)?),
            _ => Self::Unknown,
        })
    }
}

// ============================================================================
// Worker payloads
// ============================================================================

/// `router.createWebRtcTransport` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WebRtcTransportData {
    ice_role: IceRole,
    ice_parameters: IceParameters,
    #[serde(default)]
    ice_candidates: Vec<IceCandidate>,
    ice_state: IceState,
    ice_selected_tuple: Option<TransportTuple>,
    dtls_parameters: DtlsParameters,
    dtls_state: DtlsState,
    dtls_remote_cert: Option<String>,
    sctp_parameters: Option<SctpParameters>,
    sctp_state: Option<SctpState>,
}

/// `router.createPlainTransport` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlainTransportData {
    rtcp_mux: bool,
    comedia: bool,
    tuple: TransportTuple,
    rtcp_tuple: Option<TransportTuple>,
    srtp_parameters: Option<SrtpParameters>,
    sctp_parameters: Option<SctpParameters>,
    sctp_state: Option<SctpState>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebRtcConnectResponse {
    dtls_local_role: DtlsRole,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlainConnectRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    ip: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rtcp_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    srtp_parameters: Option<&'a SrtpParameters>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlainConnectResponse {
    tuple: Option<TransportTuple>,
    rtcp_tuple: Option<TransportTuple>,
    srtp_parameters: Option<SrtpParameters>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestartIceResponse {
    ice_parameters: IceParameters,
}

#[derive(Deserialize)]
struct ProduceResponse {
    #[serde(rename = "type")]
    producer_type: ProducerType,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsumeResponse {
    paused: bool,
    producer_paused: bool,
    #[serde(default)]
    score: ConsumerScore,
    preferred_layers: Option<ConsumerLayers>,
}

/// Data producer / consumer creation response
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataEndpointResponse {
    sctp_stream_parameters: Option<SctpStreamParameters>,
    label: Option<String>,
    protocol: Option<String>,
}

// ============================================================================
// State
// ============================================================================

struct WebRtcState {
    ice_role: IceRole,
    ice_parameters: IceParameters,
    ice_candidates: Vec<IceCandidate>,
    ice_state: IceState,
    ice_selected_tuple: Option<TransportTuple>,
    dtls_parameters: DtlsParameters,
    dtls_state: DtlsState,
    dtls_remote_cert: Option<String>,
}

struct PlainState {
    rtcp_mux: bool,
    comedia: bool,
    tuple: TransportTuple,
    rtcp_tuple: Option<TransportTuple>,
    srtp_parameters: Option<SrtpParameters>,
}

enum KindState {
    WebRtc(WebRtcState),
    Plain(PlainState),
}

struct TransportState {
    closed: bool,
    kind: KindState,
    sctp_parameters: Option<SctpParameters>,
    sctp_state: Option<SctpState>,
    producers: HashMap<String, Producer>,
    consumers: HashMap<String, Consumer>,
    data_producers: HashMap<String, DataProducer>,
    data_consumers: HashMap<String, DataConsumer>,
    /// Held by data consumers, including ones still being created
    sctp_stream_ids: HashSet<u16>,
}

impl TransportState {
    /// Force every status to its terminal value and drop transient fields
    fn force_closed(&mut self) {
        if let KindState::WebRtc(webrtc) = &mut self.kind {
            webrtc.ice_state = IceState::Closed;
            webrtc.ice_selected_tuple = None;
            webrtc.dtls_state = DtlsState::Closed;
            webrtc.dtls_remote_cert = None;
        }
        if self.sctp_state.is_some() {
            self.sctp_state = Some(SctpState::Closed);
        }
    }

    fn webrtc(&self) -> Option<&WebRtcState> {
        match &self.kind {
            KindState::WebRtc(webrtc) => Some(webrtc),
            KindState::Plain(_) => None,
        }
    }

    fn plain(&self) -> Option<&PlainState> {
        match &self.kind {
            KindState::Plain(plain) => Some(plain),
            KindState::WebRtc(_) => None,
        }
    }

    /// Reserve the lowest SCTP stream id no data consumer holds
    fn reserve_sctp_stream_id(&mut self) -> Option<u16> {
        let max = self.sctp_parameters.as_ref()?.mis;
        let stream_id = (0..max).find(|id| !self.sctp_stream_ids.contains(id))?;
        self.sctp_stream_ids.insert(stream_id);
        Some(stream_id)
    }
}

/// SCTP stream id reserved for a data consumer being created
///
/// Released on drop unless the new data consumer keeps it.
struct StreamIdReservation {
    inner: Weak<TransportInner>,
    stream_id: u16,
    kept: bool,
}

impl StreamIdReservation {
    fn keep(mut self) -> u16 {
        self.kept = true;
        self.stream_id
    }
}

impl Drop for StreamIdReservation {
    fn drop(&mut self) {
        if self.kept {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            inner.state.lock().sctp_stream_ids.remove(&self.stream_id);
        }
    }
}

struct Children {
    producers: Vec<Producer>,
    consumers: Vec<Consumer>,
    data_producers: Vec<DataProducer>,
    data_consumers: Vec<DataConsumer>,
}

struct TransportInner {
    id: String,
    kind: TransportKind,
    app_data: Value,
    core: EntityCore,
    observer: ObserverHandle,
    registry: Weak<EntityRegistry>,
    events: EventEmitter<TransportEvent>,
    state: Mutex<TransportState>,
}

/// Handle to a worker transport
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

pub(crate) enum TransportData {
    WebRtc(WebRtcTransportData),
    Plain(PlainTransportData),
}

impl Transport {
    pub(crate) fn new(
        id: String,
        data: TransportData,
        app_data: Value,
        core: EntityCore,
        observer: ObserverHandle,
        registry: Weak<EntityRegistry>,
    ) -> Self {
        let (kind, kind_state, sctp_parameters, sctp_state) = match data {
            TransportData::WebRtc(d) => (
                TransportKind::WebRtc,
                KindState::WebRtc(WebRtcState {
                    ice_role: d.ice_role,
                    ice_parameters: d.ice_parameters,
                    ice_candidates: d.ice_candidates,
                    ice_state: d.ice_state,
                    ice_selected_tuple: d.ice_selected_tuple,
                    dtls_parameters: d.dtls_parameters,
                    dtls_state: d.dtls_state,
                    dtls_remote_cert: d.dtls_remote_cert,
                }),
                d.sctp_parameters,
                d.sctp_state,
            ),
            TransportData::Plain(d) => (
                TransportKind::Plain,
                KindState::Plain(PlainState {
                    rtcp_mux: d.rtcp_mux,
                    comedia: d.comedia,
                    tuple: d.tuple,
                    rtcp_tuple: d.rtcp_tuple,
                    srtp_parameters: d.srtp_parameters,
                }),
                d.sctp_parameters,
                d.sctp_state,
            ),
        };

        let inner = Arc::new(TransportInner {
            id,
            kind,
            app_data,
            core,
            observer,
            registry,
            events: EventEmitter::new(),
            state: Mutex::new(TransportState {
                closed: false,
                kind: kind_state,
                sctp_parameters,
                sctp_state,
                producers: HashMap::new(),
                consumers: HashMap::new(),
                data_producers: HashMap::new(),
                data_consumers: HashMap::new(),
                sctp_stream_ids: HashSet::new(),
            }),
        });

        let weak = Arc::downgrade(&inner);
        inner.core.subscribe(&inner.id, move |notification| {
            if let Some(inner) = weak.upgrade() {
                Transport { inner }.handle_notification(notification);
            }
        });

        Self { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TransportKind {
        self.inner.kind
    }

    pub fn app_data(&self) -> &Value {
        &self.inner.app_data
    }

    pub fn closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn on<F>(&self, event: &'static str, handler: F) -> HandlerId
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(event, handler)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.events.off(id)
    }

    // ------------------------------------------------------------------------
    // Mirrored state
    // ------------------------------------------------------------------------

    pub fn ice_role(&self) -> Option<IceRole> {
        self.inner.state.lock().webrtc().map(|w| w.ice_role)
    }

    pub fn ice_parameters(&self) -> Option<IceParameters> {
        self.inner.state.lock().webrtc().map(|w| w.ice_parameters.clone())
    }

    pub fn ice_candidates(&self) -> Vec<IceCandidate> {
        self.inner
            .state
            .lock()
            .webrtc()
            .map(|w| w.ice_candidates.clone())
            .unwrap_or_default()
    }

    pub fn ice_state(&self) -> Option<IceState> {
        self.inner.state.lock().webrtc().map(|w| w.ice_state)
    }

    pub fn ice_selected_tuple(&self) -> Option<TransportTuple> {
        self.inner
            .state
            .lock()
            .webrtc()
            .and_then(|w| w.ice_selected_tuple.clone())
    }

    pub fn dtls_parameters(&self) -> Option<DtlsParameters> {
        self.inner.state.lock().webrtc().map(|w| w.dtls_parameters.clone())
    }

    pub fn dtls_state(&self) -> Option<DtlsState> {
        self.inner.state.lock().webrtc().map(|w| w.dtls_state)
    }

    pub fn dtls_remote_cert(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .webrtc()
            .and_then(|w| w.dtls_remote_cert.clone())
    }

    pub fn rtcp_mux(&self) -> Option<bool> {
        self.inner.state.lock().plain().map(|p| p.rtcp_mux)
    }

    pub fn comedia(&self) -> Option<bool> {
        self.inner.state.lock().plain().map(|p| p.comedia)
    }

    pub fn tuple(&self) -> Option<TransportTuple> {
        self.inner.state.lock().plain().map(|p| p.tuple.clone())
    }

    pub fn rtcp_tuple(&self) -> Option<TransportTuple> {
        self.inner
            .state
            .lock()
            .plain()
            .and_then(|p| p.rtcp_tuple.clone())
    }

    pub fn srtp_parameters(&self) -> Option<SrtpParameters> {
        self.inner
            .state
            .lock()
            .plain()
            .and_then(|p| p.srtp_parameters.clone())
    }

    pub fn sctp_parameters(&self) -> Option<SctpParameters> {
        self.inner.state.lock().sctp_parameters.clone()
    }

    pub fn sctp_state(&self) -> Option<SctpState> {
        self.inner.state.lock().sctp_state
    }

    pub fn producers(&self) -> Vec<Producer> {
        self.inner.state.lock().producers.values().cloned().collect()
    }

    pub fn consumers(&self) -> Vec<Consumer> {
        self.inner.state.lock().consumers.values().cloned().collect()
    }

    pub fn data_producers(&self) -> Vec<DataProducer> {
        self.inner.state.lock().data_producers.values().cloned().collect()
    }

    pub fn data_consumers(&self) -> Vec<DataConsumer> {
        self.inner.state.lock().data_consumers.values().cloned().collect()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Close the transport and every entity created on it
    pub fn close(&self) {
        let Some(children) = self.mark_closed() else {
            return;
        };
        info!(transport_id = %self.inner.id, "Transport closed");

        self.inner.core.request_detached(Method::TransportClose, None);
        self.cascade(children);

        self.inner.events.emit(&TransportEvent::InternalClose);
        self.inner.events.emit(&TransportEvent::Close);
        self.inner.observer.emit(ObserverEventKind::Close);
    }

    /// Router was closed; the worker already closed the transport
    pub fn router_closed(&self) {
        let Some(children) = self.mark_closed() else {
            return;
        };
        debug!(transport_id = %self.inner.id, "router_closed()");

        self.cascade(children);

        self.inner.events.emit(&TransportEvent::RouterClose);
        self.inner.observer.emit(ObserverEventKind::Close);
    }

    fn mark_closed(&self) -> Option<Children> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return None;
        }
        state.closed = true;
        state.force_closed();
        self.inner.core.shutdown();

        Some(Children {
            producers: state.producers.drain().map(|(_, p)| p).collect(),
            consumers: state.consumers.drain().map(|(_, c)| c).collect(),
            data_producers: state.data_producers.drain().map(|(_, d)| d).collect(),
            data_consumers: state.data_consumers.drain().map(|(_, d)| d).collect(),
        })
    }

    fn cascade(&self, children: Children) {
        let registry = self.inner.registry.upgrade();

        for producer in children.producers {
            if let Some(registry) = &registry {
                registry.remove_producer(producer.id());
            }
            producer.transport_closed();
        }
        for consumer in children.consumers {
            consumer.transport_closed();
        }
        for data_producer in children.data_producers {
            if let Some(registry) = &registry {
                registry.remove_data_producer(data_producer.id());
            }
            data_producer.transport_closed();
        }
        for data_consumer in children.data_consumers {
            data_consumer.transport_closed();
        }
    }

    pub async fn dump(&self) -> MediaResult<Value> {
        debug!(transport_id = %self.inner.id, "dump()");
        self.inner.core.request_value(Method::TransportDump, None).await
    }

    pub async fn get_stats(&self) -> MediaResult<Value> {
        debug!(transport_id = %self.inner.id, "get_stats()");
        self.inner.core.request_value(Method::TransportGetStats, None).await
    }

    // ------------------------------------------------------------------------
    // Transport operations
    // ------------------------------------------------------------------------

    /// Provide the remote endpoint's parameters
    ///
    /// Parameters for the other transport kind fail with
    /// [`MediaError::TypeMismatch`] without contacting the worker.
    pub async fn connect(&self, parameters: ConnectParameters) -> MediaResult<()> {
        debug!(transport_id = %self.inner.id, "connect()");

        match (self.inner.kind, parameters) {
            (TransportKind::WebRtc, ConnectParameters::WebRtc { dtls_parameters }) => {
                let response: WebRtcConnectResponse = self
                    .inner
                    .core
                    .request_as(
                        Method::TransportConnect,
                        self.inner.core.internal().clone(),
                        Some(json!({ "dtlsParameters": dtls_parameters })),
                    )
                    .await?;

                self.mutate(|state| {
                    if let KindState::WebRtc(webrtc) = &mut state.kind {
                        webrtc.dtls_parameters.role = Some(response.dtls_local_role);
                    }
                });
                Ok(())
            }
            (
                TransportKind::Plain,
                ConnectParameters::Plain {
                    ip,
                    port,
                    rtcp_port,
                    srtp_parameters,
                },
            ) => {
                let request = PlainConnectRequest {
                    ip: ip.as_deref(),
                    port,
                    rtcp_port,
                    srtp_parameters: srtp_parameters.as_ref(),
                };
                let data = serde_json::to_value(&request).map_err(|e| MediaError::InvalidRequest {
                    method: Method::TransportConnect,
                    reason: e.to_string(),
                })?;

                let response: PlainConnectResponse = self
                    .inner
                    .core
                    .request_as(
                        Method::TransportConnect,
                        self.inner.core.internal().clone(),
                        Some(data),
                    )
                    .await?;

                self.mutate(|state| {
                    if let KindState::Plain(plain) = &mut state.kind {
                        if let Some(tuple) = response.tuple {
                            plain.tuple = tuple;
                        }
                        if response.rtcp_tuple.is_some() {
                            plain.rtcp_tuple = response.rtcp_tuple;
                        }
                        if response.srtp_parameters.is_some() {
                            plain.srtp_parameters = response.srtp_parameters;
                        }
                    }
                });
                Ok(())
            }
            (kind, parameters) => Err(MediaError::TypeMismatch {
                expected: kind.connect_shape(),
                found: parameters.shape(),
            }),
        }
    }

    /// Generate new local ICE credentials (WebRTC only)
    pub async fn restart_ice(&self) -> MediaResult<IceParameters> {
        debug!(transport_id = %self.inner.id, "restart_ice()");

        if self.inner.kind != TransportKind::WebRtc {
            return Err(MediaError::TypeMismatch {
                expected: TransportKind::WebRtc.name(),
                found: self.inner.kind.name(),
            });
        }

        let response: RestartIceResponse = self
            .inner
            .core
            .request_as(
                Method::TransportRestartIce,
                self.inner.core.internal().clone(),
                None,
            )
            .await?;

        let ice_parameters = response.ice_parameters;
        self.mutate(|state| {
            if let KindState::WebRtc(webrtc) = &mut state.kind {
                webrtc.ice_parameters = ice_parameters.clone();
            }
        });
        Ok(ice_parameters)
    }

    pub async fn set_max_incoming_bitrate(&self, bitrate: u32) -> MediaResult<()> {
        debug!(transport_id = %self.inner.id, bitrate, "set_max_incoming_bitrate()");
        self.inner
            .core
            .request_void(
                Method::TransportSetMaxIncomingBitrate,
                Some(json!({ "bitrate": bitrate })),
            )
            .await
    }

    pub async fn enable_trace_event(&self, types: &[TraceEventType]) -> MediaResult<()> {
        debug!(transport_id = %self.inner.id, "enable_trace_event()");
        self.inner
            .core
            .request_void(Method::TransportEnableTraceEvent, Some(json!({ "types": types })))
            .await
    }

    // ------------------------------------------------------------------------
    // Children
    // ------------------------------------------------------------------------

    /// Create a producer receiving media from the remote endpoint
    pub async fn produce(&self, options: ProducerOptions) -> MediaResult<Producer> {
        debug!(transport_id = %self.inner.id, "produce()");

        let producer_id = options
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let internal = self.inner.core.internal().clone().with_producer(&producer_id);
        let data = json!({
            "kind": options.kind,
            "rtpParameters": options.rtp_parameters,
            "paused": options.paused,
            "keyFrameRequestDelay": options.key_frame_request_delay,
        });

        let payload = self
            .inner
            .core
            .request_with(Method::TransportProduce, internal.clone(), Some(data))
            .await?;
        let response: ProduceResponse = self.inner.core.decode_created(
            Method::TransportProduce,
            Method::ProducerClose,
            &internal,
            payload,
        )?;

        let producer = Producer::new(
            ProducerInit {
                id: producer_id.clone(),
                kind: options.kind,
                rtp_parameters: options.rtp_parameters,
                producer_type: response.producer_type,
                paused: options.paused,
                app_data: options.app_data,
            },
            EntityCore::new(self.inner.core.channel().clone(), internal),
            self.inner.observer.child(EntityKind::Producer, &producer_id),
        );

        {
            let mut state = self.inner.state.lock();
            if !state.closed {
                state.producers.insert(producer_id.clone(), producer.clone());
            } else {
                drop(state);
                producer.transport_closed();
                return Err(MediaError::ChannelClosed);
            }
        }
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.insert_producer(producer.clone());
        }

        let weak = Arc::downgrade(&self.inner);
        producer.on("@close", move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.state.lock().producers.remove(&producer_id);
                if let Some(registry) = inner.registry.upgrade() {
                    registry.remove_producer(&producer_id);
                }
            }
        });

        self.inner
            .observer
            .emit(ObserverEventKind::NewProducer(producer.clone()));
        Ok(producer)
    }

    /// Create a consumer sending a Router producer's media to the remote endpoint
    ///
    /// Fails with [`MediaError::ProducerNotFound`], before any I/O, when the
    /// producer is unknown to the Router.
    pub async fn consume(&self, options: ConsumerOptions) -> MediaResult<Consumer> {
        debug!(transport_id = %self.inner.id, producer_id = %options.producer_id, "consume()");

        let producer = self
            .inner
            .registry
            .upgrade()
            .and_then(|registry| registry.producer(&options.producer_id))
            .ok_or_else(|| MediaError::ProducerNotFound {
                producer_id: options.producer_id.clone(),
            })?;

        let consumer_id = Uuid::new_v4().to_string();
        let consumer_type = ConsumerType::from(producer.producer_type());
        let internal = self
            .inner
            .core
            .internal()
            .clone()
            .with_consumer(&consumer_id)
            .with_producer(producer.id());
        let data = json!({
            "kind": producer.kind(),
            "rtpParameters": options.rtp_parameters,
            "type": consumer_type,
            "consumableRtpEncodings": producer.rtp_parameters().encodings,
            "paused": options.paused,
            "preferredLayers": options.preferred_layers,
        });

        let payload = self
            .inner
            .core
            .request_with(Method::TransportConsume, internal.clone(), Some(data))
            .await?;
        let response: ConsumeResponse = self.inner.core.decode_created(
            Method::TransportConsume,
            Method::ConsumerClose,
            &internal,
            payload,
        )?;

        let consumer = Consumer::new(
            ConsumerInit {
                id: consumer_id.clone(),
                producer_id: producer.id().to_string(),
                kind: producer.kind(),
                rtp_parameters: options.rtp_parameters,
                consumer_type,
                paused: response.paused,
                producer_paused: response.producer_paused,
                score: response.score,
                preferred_layers: response.preferred_layers,
                app_data: options.app_data,
            },
            EntityCore::new(self.inner.core.channel().clone(), internal),
            self.inner.observer.child(EntityKind::Consumer, &consumer_id),
        );

        {
            let mut state = self.inner.state.lock();
            if !state.closed {
                state.consumers.insert(consumer_id.clone(), consumer.clone());
            } else {
                drop(state);
                consumer.transport_closed();
                return Err(MediaError::ChannelClosed);
            }
        }

        for event in ["@close", "@producerclose"] {
            let weak = Arc::downgrade(&self.inner);
            let consumer_id = consumer_id.clone();
            consumer.on(event, move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.state.lock().consumers.remove(&consumer_id);
                }
            });
        }

        self.inner
            .observer
            .emit(ObserverEventKind::NewConsumer(consumer.clone()));
        Ok(consumer)
    }

    /// Create a data producer receiving SCTP messages from the remote endpoint
    pub async fn produce_data(&self, options: DataProducerOptions) -> MediaResult<DataProducer> {
        debug!(transport_id = %self.inner.id, "produce_data()");

        let data_producer_id = options
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let internal = self
            .inner
            .core
            .internal()
            .clone()
            .with_data_producer(&data_producer_id);
        let data = json!({
            "type": "sctp",
            "sctpStreamParameters": options.sctp_stream_parameters,
            "label": options.label,
            "protocol": options.protocol,
        });

        let payload = self
            .inner
            .core
            .request_with(Method::TransportProduceData, internal.clone(), Some(data))
            .await?;
        let response: Option<DataEndpointResponse> = self.inner.core.decode_created(
            Method::TransportProduceData,
            Method::DataProducerClose,
            &internal,
            payload,
        )?;
        let (sctp_stream_parameters, label, protocol) = match response {
            Some(r) => (
                r.sctp_stream_parameters.or(options.sctp_stream_parameters),
                r.label.unwrap_or(options.label),
                r.protocol.unwrap_or(options.protocol),
            ),
            None => (options.sctp_stream_parameters, options.label, options.protocol),
        };

        let data_producer = DataProducer::new(
            DataProducerInit {
                id: data_producer_id.clone(),
                sctp_stream_parameters,
                label,
                protocol,
                app_data: options.app_data,
            },
            EntityCore::new(self.inner.core.channel().clone(), internal),
            self.inner
                .observer
                .child(EntityKind::DataProducer, &data_producer_id),
        );

        {
            let mut state = self.inner.state.lock();
            if !state.closed {
                state
                    .data_producers
                    .insert(data_producer_id.clone(), data_producer.clone());
            } else {
                drop(state);
                data_producer.transport_closed();
                return Err(MediaError::ChannelClosed);
            }
        }
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.insert_data_producer(data_producer.clone());
        }

        let weak = Arc::downgrade(&self.inner);
        data_producer.on("@close", move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.state.lock().data_producers.remove(&data_producer_id);
                if let Some(registry) = inner.registry.upgrade() {
                    registry.remove_data_producer(&data_producer_id);
                }
            }
        });

        self.inner
            .observer
            .emit(ObserverEventKind::NewDataProducer(data_producer.clone()));
        Ok(data_producer)
    }

    /// Create a data consumer sending a Router data producer's messages
    ///
    /// Fails with [`MediaError::DataProducerNotFound`], before any I/O, when
    /// the data producer is unknown to the Router.
    pub async fn consume_data(&self, options: DataConsumerOptions) -> MediaResult<DataConsumer> {
        debug!(
            transport_id = %self.inner.id,
            data_producer_id = %options.data_producer_id,
            "consume_data()"
        );

        let data_producer = self
            .inner
            .registry
            .upgrade()
            .and_then(|registry| registry.data_producer(&options.data_producer_id))
            .ok_or_else(|| MediaError::DataProducerNotFound {
                data_producer_id: options.data_producer_id.clone(),
            })?;

        let (sctp_stream_parameters, reservation) = match data_producer.sctp_stream_parameters() {
            Some(source) => {
                let stream_id = self.inner.state.lock().reserve_sctp_stream_id().ok_or_else(|| {
                    MediaError::InvalidRequest {
                        method: Method::TransportConsumeData,
                        reason: "no free SCTP stream id".to_string(),
                    }
                })?;
                let reservation = StreamIdReservation {
                    inner: Arc::downgrade(&self.inner),
                    stream_id,
                    kept: false,
                };
                let mut params = source.clone();
                params.stream_id = stream_id;
                if let Some(ordered) = options.ordered {
                    params.ordered = Some(ordered);
                }
                (Some(params), Some(reservation))
            }
            None => (None, None),
        };

        let data_consumer_id = Uuid::new_v4().to_string();
        let internal = self
            .inner
            .core
            .internal()
            .clone()
            .with_data_consumer(&data_consumer_id)
            .with_data_producer(data_producer.id());
        let data = json!({
            "type": "sctp",
            "sctpStreamParameters": sctp_stream_parameters,
            "label": data_producer.label(),
            "protocol": data_producer.protocol(),
        });

        let payload = self
            .inner
            .core
            .request_with(Method::TransportConsumeData, internal.clone(), Some(data))
            .await?;
        let response: Option<DataEndpointResponse> = self.inner.core.decode_created(
            Method::TransportConsumeData,
            Method::DataConsumerClose,
            &internal,
            payload,
        )?;
        let sctp_stream_parameters = response
            .and_then(|r| r.sctp_stream_parameters)
            .or(sctp_stream_parameters);

        let data_consumer = DataConsumer::new(
            DataConsumerInit {
                id: data_consumer_id.clone(),
                data_producer_id: data_producer.id().to_string(),
                sctp_stream_parameters,
                label: data_producer.label().to_string(),
                protocol: data_producer.protocol().to_string(),
                app_data: options.app_data,
            },
            EntityCore::new(self.inner.core.channel().clone(), internal),
            self.inner
                .observer
                .child(EntityKind::DataConsumer, &data_consumer_id),
        );

        let stream_id = {
            let mut state = self.inner.state.lock();
            if !state.closed {
                state
                    .data_consumers
                    .insert(data_consumer_id.clone(), data_consumer.clone());
                reservation.map(StreamIdReservation::keep)
            } else {
                drop(state);
                data_consumer.transport_closed();
                return Err(MediaError::ChannelClosed);
            }
        };

        for event in ["@close", "@dataproducerclose"] {
            let weak = Arc::downgrade(&self.inner);
            let data_consumer_id = data_consumer_id.clone();
            data_consumer.on(event, move |_| {
                if let Some(inner) = weak.upgrade() {
                    let mut state = inner.state.lock();
                    state.data_consumers.remove(&data_consumer_id);
                    if let Some(stream_id) = stream_id {
                        state.sctp_stream_ids.remove(&stream_id);
                    }
                }
            });
        }

        self.inner
            .observer
            .emit(ObserverEventKind::NewDataConsumer(data_consumer.clone()));
        Ok(data_consumer)
    }

    // ------------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------------

    /// Apply `update` unless closed; returns whether it was applied
    fn mutate(&self, update: impl FnOnce(&mut TransportState)) -> bool {
        let mut state = self.inner.state.lock();
        if state.closed {
            return false;
        }
        update(&mut state);
        true
    }

    fn handle_notification(&self, notification: &Notification) {
        let parsed = match TransportNotification::parse(self.inner.kind, notification) {
            Ok(parsed) => parsed,
            Err(e) => {
                log_dropped(EntityKind::Transport, &self.inner.id, &e);
                return;
            }
        };

        match parsed {
            TransportNotification::IceStateChange(ice_state) => {
                let applied = self.mutate(|state| {
                    if let KindState::WebRtc(webrtc) = &mut state.kind {
                        webrtc.ice_state = ice_state;
                    }
                });
                if applied {
                    self.inner.events.emit(&TransportEvent::IceStateChange(ice_state));
                    self.inner
                        .observer
                        .emit(ObserverEventKind::IceStateChange(ice_state));
                }
            }
            TransportNotification::IceSelectedTupleChange(tuple) => {
                let applied = self.mutate(|state| {
                    if let KindState::WebRtc(webrtc) = &mut state.kind {
                        webrtc.ice_selected_tuple = Some(tuple.clone());
                    }
                });
                if applied {
                    self.inner
                        .events
                        .emit(&TransportEvent::IceSelectedTupleChange(tuple.clone()));
                    self.inner
                        .observer
                        .emit(ObserverEventKind::IceSelectedTupleChange(tuple));
                }
            }
            TransportNotification::DtlsStateChange(data) => {
                let dtls_state = data.dtls_state;
                let applied = self.mutate(|state| {
                    if let KindState::WebRtc(webrtc) = &mut state.kind {
                        webrtc.dtls_state = dtls_state;
                        if data.dtls_remote_cert.is_some() {
                            webrtc.dtls_remote_cert = data.dtls_remote_cert;
                        }
                    }
                });
                if applied {
                    self.inner
                        .events
                        .emit(&TransportEvent::DtlsStateChange(dtls_state));
                    self.inner
                        .observer
                        .emit(ObserverEventKind::DtlsStateChange(dtls_state));
                }
            }
            TransportNotification::SctpStateChange(sctp_state) => {
                if self.mutate(|state| state.sctp_state = Some(sctp_state)) {
                    self.inner
                        .events
                        .emit(&TransportEvent::SctpStateChange(sctp_state));
                    self.inner
                        .observer
                        .emit(ObserverEventKind::SctpStateChange(sctp_state));
                }
            }
            TransportNotification::Tuple(tuple) => {
                let applied = self.mutate(|state| {
                    if let KindState::Plain(plain) = &mut state.kind {
                        plain.tuple = tuple.clone();
                    }
                });
                if applied {
                    self.inner.events.emit(&TransportEvent::Tuple(tuple.clone()));
                    self.inner.observer.emit(ObserverEventKind::Tuple(tuple));
                }
            }
            TransportNotification::RtcpTuple(tuple) => {
                let applied = self.mutate(|state| {
                    if let KindState::Plain(plain) = &mut state.kind {
                        plain.rtcp_tuple = Some(tuple.clone());
                    }
                });
                if applied {
                    self.inner
                        .events
                        .emit(&TransportEvent::RtcpTuple(tuple.clone()));
                    self.inner.observer.emit(ObserverEventKind::RtcpTuple(tuple));
                }
            }
            TransportNotification::Trace(trace) => {
                if self.closed() {
                    return;
                }
                self.inner.events.emit(&TransportEvent::Trace(trace.clone()));
                self.inner.observer.emit(ObserverEventKind::Trace(trace));
            }
            TransportNotification::Unknown => {
                log_dropped(EntityKind::Transport, &self.inner.id, &unknown_event(notification));
            }
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("closed", &self.closed())
            .finish()
    }
}
