//! Consumer: an outbound media stream fed by a producer
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
    ConsumerLayers, ConsumerScore, ConsumerType, MediaKind, Method, Notification, RtpParameters,
    TraceEventData, TraceEventType,
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::entity::{log_dropped, notification_data, unknown_event, EntityCore};
use crate::error::{MediaResult, NotificationError};
use crate::event_emitter::{EventEmitter, EventName, HandlerId};
use crate::observer::{EntityKind, ObserverEventKind, ObserverHandle};

/// Priority restored by [`Consumer::unset_priority`]
pub const DEFAULT_PRIORITY: u8 = 1;

/// Public consumer events
#[derive(Debug, Clone)]
pub enum ConsumerEvent {
    /// Closed locally; consumed by the owning transport
    InternalClose,
    /// Closed because its producer closed; consumed by the owning transport
    InternalProducerClose,
    Close,
    TransportClose,
    ProducerClose,
    ProducerPause,
    ProducerResume,
    Score(ConsumerScore),
    LayersChange(Option<ConsumerLayers>),
    Trace(TraceEventData),
}

impl EventName for ConsumerEvent {
    fn name(&self) -> &'static str {
        match self {
            ConsumerEvent::InternalClose => "@close",
            ConsumerEvent::InternalProducerClose => "@producerclose",
            ConsumerEvent::Close => "close",
            ConsumerEvent::TransportClose => "transportclose",
            ConsumerEvent::ProducerClose => "producerclose",
            ConsumerEvent::ProducerPause => "producerpause",
            ConsumerEvent::ProducerResume => "producerresume",
            ConsumerEvent::Score(_) => "score",
            ConsumerEvent::LayersChange(_) => "layerschange",
            ConsumerEvent::Trace(_) => "trace",
        }
    }
}

enum ConsumerNotification {
    ProducerClose,
    ProducerPause,
    ProducerResume,
    Score(ConsumerScore),
    LayersChange(Option<ConsumerLayers>),
    Trace(TraceEventData),
    Unknown,
}

impl ConsumerNotification {
    fn parse(notification: &Notification) -> Result<Self, NotificationError> {
        Ok(match notification.event.as_str() {
            "producerclose" => Self::ProducerClose,
            "producerpause" => Self::ProducerPause,
            "producerresume" => Self::ProducerResume,
            "score" => Self::Score(notification_data(notification)?),
            "layerschange" => Self::LayersChange(notification_data(notification)?),
            "trace" => Self::Trace(notification_data(notification)?),
            _ => Self::Unknown,
        })
    }
}

#[derive(Deserialize)]
struct PriorityResponse {
    priority: u8,
}

pub(crate) struct ConsumerInit {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub consumer_type: ConsumerType,
    pub paused: bool,
    pub producer_paused: bool,
    pub score: ConsumerScore,
    pub preferred_layers: Option<ConsumerLayers>,
    pub app_data: Value,
}

struct ConsumerState {
    closed: bool,
    paused: bool,
    producer_paused: bool,
    priority: u8,
    score: ConsumerScore,
    preferred_layers: Option<ConsumerLayers>,
    current_layers: Option<ConsumerLayers>,
}

impl ConsumerState {
    fn effectively_paused(&self) -> bool {
        self.paused || self.producer_paused
    }
}

struct ConsumerInner {
    id: String,
    producer_id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    consumer_type: ConsumerType,
    app_data: Value,
    core: EntityCore,
    observer: ObserverHandle,
    events: EventEmitter<ConsumerEvent>,
    state: Mutex<ConsumerState>,
}

#[derive(Clone)]
pub struct Consumer {
    inner: Arc<ConsumerInner>,
}

impl Consumer {
    pub(crate) fn new(init: ConsumerInit, core: EntityCore, observer: ObserverHandle) -> Self {
        let inner = Arc::new(ConsumerInner {
            id: init.id,
            producer_id: init.producer_id,
            kind: init.kind,
            rtp_parameters: init.rtp_parameters,
            consumer_type: init.consumer_type,
            app_data: init.app_data,
            core,
            observer,
            events: EventEmitter::new(),
            state: Mutex::new(ConsumerState {
                closed: false,
                paused: init.paused,
                producer_paused: init.producer_paused,
                priority: DEFAULT_PRIORITY,
                score: init.score,
                preferred_layers: init.preferred_layers,
                current_layers: None,
            }),
        });

        let weak = Arc::downgrade(&inner);
        inner.core.subscribe(&inner.id, move |notification| {
            if let Some(inner) = weak.upgrade() {
                Consumer { inner }.handle_notification(notification);
            }
        });

        Self { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn producer_id(&self) -> &str {
        &self.inner.producer_id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.inner.rtp_parameters
    }

    pub fn consumer_type(&self) -> ConsumerType {
        self.inner.consumer_type
    }

    pub fn app_data(&self) -> &Value {
        &self.inner.app_data
    }

    pub fn closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Whether the consumer itself is paused
    pub fn paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    /// Whether the associated producer is paused
    pub fn producer_paused(&self) -> bool {
        self.inner.state.lock().producer_paused
    }

    pub fn priority(&self) -> u8 {
        self.inner.state.lock().priority
    }

    pub fn score(&self) -> ConsumerScore {
        self.inner.state.lock().score.clone()
    }

    pub fn preferred_layers(&self) -> Option<ConsumerLayers> {
        self.inner.state.lock().preferred_layers
    }

    pub fn current_layers(&self) -> Option<ConsumerLayers> {
        self.inner.state.lock().current_layers
    }

    pub fn on<F>(&self, event: &'static str, handler: F) -> HandlerId
    where
        F: Fn(&ConsumerEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(event, handler)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.events.off(id)
    }

    /// Close the consumer
    pub fn close(&self) {
        if !self.mark_closed() {
            return;
        }
        debug!(consumer_id = %self.inner.id, "close()");

        self.inner.core.request_detached(Method::ConsumerClose, None);

        self.inner.events.emit(&ConsumerEvent::InternalClose);
        self.inner.events.emit(&ConsumerEvent::Close);
        self.inner.observer.emit(ObserverEventKind::Close);
    }

    /// Transport was closed
    pub fn transport_closed(&self) {
        if !self.mark_closed() {
            return;
        }
        debug!(consumer_id = %self.inner.id, "transport_closed()");

        self.inner.events.emit(&ConsumerEvent::TransportClose);
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
        debug!(consumer_id = %self.inner.id, "dump()");
        self.inner.core.request_value(Method::ConsumerDump, None).await
    }

    pub async fn get_stats(&self) -> MediaResult<Value> {
        debug!(consumer_id = %self.inner.id, "get_stats()");
        self.inner.core.request_value(Method::ConsumerGetStats, None).await
    }

    /// Pause the consumer
    ///
    /// The request is sent even when already paused.
    pub async fn pause(&self) -> MediaResult<()> {
        debug!(consumer_id = %self.inner.id, "pause()");
        self.inner.core.request_void(Method::ConsumerPause, None).await?;
        self.update_pause(|state| !std::mem::replace(&mut state.paused, true));
        Ok(())
    }

    /// Resume the consumer
    pub async fn resume(&self) -> MediaResult<()> {
        debug!(consumer_id = %self.inner.id, "resume()");
        self.inner.core.request_void(Method::ConsumerResume, None).await?;
        self.update_pause(|state| std::mem::replace(&mut state.paused, false));
        Ok(())
    }

    /// Apply `update` and report the effective pause transition to the
    /// observer. `update` returns whether it flipped its flag; the result is
    /// false when it did not or the consumer is already closed.
    fn update_pause(&self, update: impl FnOnce(&mut ConsumerState) -> bool) -> bool {
        let (changed, was, now) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return false;
            }
            let was = state.effectively_paused();
            let changed = update(&mut state);
            (changed, was, state.effectively_paused())
        };

        match (was, now) {
            (false, true) => self.inner.observer.emit(ObserverEventKind::Pause),
            (true, false) => self.inner.observer.emit(ObserverEventKind::Resume),
            _ => {}
        }
        changed
    }

    /// Set preferred spatial and temporal layers
    ///
    /// Stores the layers the worker settled on, which may differ from the
    /// requested ones.
    pub async fn set_preferred_layers(&self, layers: ConsumerLayers) -> MediaResult<()> {
        debug!(consumer_id = %self.inner.id, "set_preferred_layers()");

        let preferred: Option<ConsumerLayers> = self
            .inner
            .core
            .request_as(
                Method::ConsumerSetPreferredLayers,
                self.inner.core.internal().clone(),
                Some(json!(layers)),
            )
            .await?;

        let mut state = self.inner.state.lock();
        if !state.closed {
            state.preferred_layers = preferred;
        }
        Ok(())
    }

    pub async fn set_priority(&self, priority: u8) -> MediaResult<()> {
        debug!(consumer_id = %self.inner.id, priority, "set_priority()");
        self.request_priority(priority).await
    }

    /// Restore the default priority
    pub async fn unset_priority(&self) -> MediaResult<()> {
        debug!(consumer_id = %self.inner.id, "unset_priority()");
        self.request_priority(DEFAULT_PRIORITY).await
    }

    async fn request_priority(&self, priority: u8) -> MediaResult<()> {
        let response: PriorityResponse = self
            .inner
            .core
            .request_as(
                Method::ConsumerSetPriority,
                self.inner.core.internal().clone(),
                Some(json!({ "priority": priority })),
            )
            .await?;

        let mut state = self.inner.state.lock();
        if !state.closed {
            state.priority = response.priority;
        }
        Ok(())
    }

    pub async fn request_key_frame(&self) -> MediaResult<()> {
        debug!(consumer_id = %self.inner.id, "request_key_frame()");
        self.inner
            .core
            .request_void(Method::ConsumerRequestKeyFrame, None)
            .await
    }

    pub async fn enable_trace_event(&self, types: &[TraceEventType]) -> MediaResult<()> {
        debug!(consumer_id = %self.inner.id, "enable_trace_event()");
        self.inner
            .core
            .request_void(Method::ConsumerEnableTraceEvent, Some(json!({ "types": types })))
            .await
    }

    fn handle_notification(&self, notification: &Notification) {
        let parsed = match ConsumerNotification::parse(notification) {
            Ok(parsed) => parsed,
            Err(e) => {
                log_dropped(EntityKind::Consumer, &self.inner.id, &e);
                return;
            }
        };

        match parsed {
            ConsumerNotification::ProducerClose => {
                if !self.mark_closed() {
                    return;
                }
                debug!(consumer_id = %self.inner.id, "Producer closed");

                self.inner.events.emit(&ConsumerEvent::InternalProducerClose);
                self.inner.events.emit(&ConsumerEvent::ProducerClose);
                self.inner.observer.emit(ObserverEventKind::Close);
            }
            ConsumerNotification::ProducerPause => {
                if self.update_pause(|state| !std::mem::replace(&mut state.producer_paused, true)) {
                    self.inner.events.emit(&ConsumerEvent::ProducerPause);
                }
            }
            ConsumerNotification::ProducerResume => {
                if self.update_pause(|state| std::mem::replace(&mut state.producer_paused, false)) {
                    self.inner.events.emit(&ConsumerEvent::ProducerResume);
                }
            }
            ConsumerNotification::Score(score) => {
                {
                    let mut state = self.inner.state.lock();
                    if state.closed {
                        return;
                    }
                    state.score = score.clone();
                }
                self.inner.events.emit(&ConsumerEvent::Score(score.clone()));
                self.inner.observer.emit(ObserverEventKind::ConsumerScore(score));
            }
            ConsumerNotification::LayersChange(layers) => {
                {
                    let mut state = self.inner.state.lock();
                    if state.closed {
                        return;
                    }
                    state.current_layers = layers;
                }
                self.inner.events.emit(&ConsumerEvent::LayersChange(layers));
                self.inner.observer.emit(ObserverEventKind::LayersChange(layers));
            }
            ConsumerNotification::Trace(trace) => {
                if self.closed() {
                    return;
                }
                self.inner.events.emit(&ConsumerEvent::Trace(trace.clone()));
                self.inner.observer.emit(ObserverEventKind::Trace(trace));
            }
            ConsumerNotification::Unknown => {
                log_dropped(EntityKind::Consumer, &self.inner.id, &unknown_event(notification));
            }
        }
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.inner.id)
            .field("producer_id", &self.inner.producer_id)
            .field("closed", &self.closed())
            .finish()
    }
}
