//! Producer: an inbound media stream on a transport
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
    MediaKind, Method, Notification, ProducerScore, ProducerType, RtpParameters,
    TraceEventData, TraceEventType, VideoOrientation,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::entity::{log_dropped, notification_data, unknown_event, EntityCore};
use crate::error::{MediaResult, NotificationError};
use crate::event_emitter::{EventEmitter, EventName, HandlerId};
use crate::observer::{EntityKind, ObserverEventKind, ObserverHandle};

/// Public producer events
#[derive(Debug, Clone)]
pub enum ProducerEvent {
    /// Closed locally; consumed by the owning transport
    InternalClose,
    Close,
    TransportClose,
    Score(Vec<ProducerScore>),
    VideoOrientationChange(VideoOrientation),
    Trace(TraceEventData),
}

impl EventName for ProducerEvent {
    fn name(&self) -> &'static str {
        match self {
            ProducerEvent::InternalClose => "@close",
            ProducerEvent::Close => "close",
            ProducerEvent::TransportClose => "transportclose",
            ProducerEvent::Score(_) => "score",
            ProducerEvent::VideoOrientationChange(_) => "videoorientationchange",
            ProducerEvent::Trace(_) => "trace",
        }
    }
}

enum ProducerNotification {
    Score(Vec<ProducerScore>),
    VideoOrientationChange(VideoOrientation),
    Trace(TraceEventData),
    Unknown,
}

impl ProducerNotification {
    fn parse(notification: &Notification) -> Result<Self, NotificationError> {
        Ok(match notification.event.as_str() {
            "score" => Self::Score(notification_data(notification)?),
            "videoorientationchange" => Self::VideoOrientationChange(notification_data(notification)?),
            "trace" => Self::Trace(notification_data(notification)?),
            _ => Self::Unknown,
        })
    }
}

/// Immutable producer attributes known at creation
pub(crate) struct ProducerInit {
    pub id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub producer_type: ProducerType,
    pub paused: bool,
    pub app_data: Value,
}

struct ProducerState {
    closed: bool,
    paused: bool,
    score: Vec<ProducerScore>,
}

struct ProducerInner {
    id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    producer_type: ProducerType,
    app_data: Value,
    core: EntityCore,
    observer: ObserverHandle,
    events: EventEmitter<ProducerEvent>,
    state: Mutex<ProducerState>,
}

#[derive(Clone)]
pub struct Producer {
    inner: Arc<ProducerInner>,
}

impl Producer {
    pub(crate) fn new(init: ProducerInit, core: EntityCore, observer: ObserverHandle) -> Self {
        let inner = Arc::new(ProducerInner {
            id: init.id,
            kind: init.kind,
            rtp_parameters: init.rtp_parameters,
            producer_type: init.producer_type,
            app_data: init.app_data,
            core,
            observer,
            events: EventEmitter::new(),
            state: Mutex::new(ProducerState {
                closed: false,
                paused: init.paused,
                score: Vec::new(),
            }),
        });

        let weak = Arc::downgrade(&inner);
        inner.core.subscribe(&inner.id, move |notification| {
            if let Some(inner) = weak.upgrade() {
                Producer { inner }.handle_notification(notification);
            }
        });

        Self { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.inner.rtp_parameters
    }

    pub fn producer_type(&self) -> ProducerType {
        self.inner.producer_type
    }

    pub fn app_data(&self) -> &Value {
        &self.inner.app_data
    }

    pub fn closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    /// Latest per-encoding scores reported by the worker
    pub fn score(&self) -> Vec<ProducerScore> {
        self.inner.state.lock().score.clone()
    }

    pub fn on<F>(&self, event: &'static str, handler: F) -> HandlerId
    where
        F: Fn(&ProducerEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(event, handler)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.events.off(id)
    }

    /// Close the producer
    pub fn close(&self) {
        if !self.mark_closed() {
            return;
        }
        debug!(producer_id = %self.inner.id, "close()");

        self.inner.core.request_detached(Method::ProducerClose, None);

        self.inner.events.emit(&ProducerEvent::InternalClose);
        self.inner.events.emit(&ProducerEvent::Close);
        self.inner.observer.emit(ObserverEventKind::Close);
    }

    /// Transport was closed
    pub fn transport_closed(&self) {
        if !self.mark_closed() {
            return;
        }
        debug!(producer_id = %self.inner.id, "transport_closed()");

        self.inner.events.emit(&ProducerEvent::TransportClose);
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
        debug!(producer_id = %self.inner.id, "dump()");
        self.inner.core.request_value(Method::ProducerDump, None).await
    }

    pub async fn get_stats(&self) -> MediaResult<Value> {
        debug!(producer_id = %self.inner.id, "get_stats()");
        self.inner.core.request_value(Method::ProducerGetStats, None).await
    }

    /// Pause the producer
    pub async fn pause(&self) -> MediaResult<()> {
        debug!(producer_id = %self.inner.id, "pause()");
        self.inner.core.request_void(Method::ProducerPause, None).await?;
        self.set_paused(true);
        Ok(())
    }

    /// Resume the producer
    pub async fn resume(&self) -> MediaResult<()> {
        debug!(producer_id = %self.inner.id, "resume()");
        self.inner.core.request_void(Method::ProducerResume, None).await?;
        self.set_paused(false);
        Ok(())
    }

    fn set_paused(&self, paused: bool) {
        let was_paused = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            std::mem::replace(&mut state.paused, paused)
        };

        if was_paused != paused {
            self.inner.observer.emit(if paused {
                ObserverEventKind::Pause
            } else {
                ObserverEventKind::Resume
            });
        }
    }

    pub async fn enable_trace_event(&self, types: &[TraceEventType]) -> MediaResult<()> {
        debug!(producer_id = %self.inner.id, "enable_trace_event()");
        self.inner
            .core
            .request_void(Method::ProducerEnableTraceEvent, Some(json!({ "types": types })))
            .await
    }

    fn handle_notification(&self, notification: &Notification) {
        let parsed = match ProducerNotification::parse(notification) {
            Ok(parsed) => parsed,
            Err(e) => {
                log_dropped(EntityKind::Producer, &self.inner.id, &e);
                return;
            }
        };

        match parsed {
            ProducerNotification::Score(score) => {
                {
                    let mut state = self.inner.state.lock();
                    if state.closed {
                        return;
                    }
                    state.score = score.clone();
                }
                self.inner.events.emit(&ProducerEvent::Score(score.clone()));
                self.inner.observer.emit(ObserverEventKind::ProducerScore(score));
            }
            ProducerNotification::VideoOrientationChange(orientation) => {
                if self.closed() {
                    return;
                }
                self.inner
                    .events
                    .emit(&ProducerEvent::VideoOrientationChange(orientation));
                self.inner
                    .observer
                    .emit(ObserverEventKind::VideoOrientationChange(orientation));
            }
            ProducerNotification::Trace(trace) => {
                if self.closed() {
                    return;
                }
                self.inner.events.emit(&ProducerEvent::Trace(trace.clone()));
                self.inner.observer.emit(ObserverEventKind::Trace(trace));
            }
            ProducerNotification::Unknown => {
                log_dropped(EntityKind::Producer, &self.inner.id, &unknown_event(notification));
            }
        }
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("closed", &self.closed())
            .finish()
    }
}
