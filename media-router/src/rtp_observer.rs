//! RTP observers: audio level and active speaker detection
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


use mediactl_types::notifications::{DominantSpeakerData, VolumeData};
use mediactl_types::{Method, Notification};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::entity::{log_dropped, notification_data, unknown_event, EntityCore};
use crate::error::{MediaError, MediaResult, NotificationError};
use crate::event_emitter::{EventEmitter, EventName, HandlerId};
use crate::observer::{EntityKind, ObserverEventKind, ObserverHandle};
use crate::producer::Producer;
use crate::registry::EntityRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtpObserverKind {
    AudioLevel,
    ActiveSpeaker,
}

/// Volume of one producer in a `volumes` event
#[derive(Debug, Clone)]
pub struct AudioVolume {
    pub producer: Producer,
    /// Average volume in dBvo, from -127 to 0
    pub volume: i8,
}

#[derive(Debug, Clone)]
pub enum RtpObserverEvent {
    InternalClose,
    Close,
    RouterClose,
    Volumes(Vec<AudioVolume>),
    Silence,
    DominantSpeaker(Producer),
}

impl EventName for RtpObserverEvent {
    fn name(&self) -> &'static str {
        match self {
            RtpObserverEvent::InternalClose => "@close",
            RtpObserverEvent::Close => "close",
            RtpObserverEvent::RouterClose => "routerclose",
            RtpObserverEvent::Volumes(_) => "volumes",
            RtpObserverEvent::Silence => "silence",
            RtpObserverEvent::DominantSpeaker(_) => "dominantspeaker",
        }
    }
}

enum RtpObserverNotification {
    Volumes(Vec<VolumeData>),
    Silence,
    DominantSpeaker(DominantSpeakerData),
    Unknown,
}

impl RtpObserverNotification {
    fn parse(kind: RtpObserverKind, notification: &Notification) -> Result<Self, NotificationError> {
        Ok(match (kind, notification.event.as_str()) {
            (RtpObserverKind::AudioLevel, "volumes") => Self::Volumes(notification_data(notification)?),
            (RtpObserverKind::AudioLevel, "silence") => Self::Silence,
            (RtpObserverKind::ActiveSpeaker, "dominantspeaker") => {
                Self::DominantSpeaker(notification_data(notification)?)
            }
            _ => Self::Unknown,
        })
    }
}

struct RtpObserverState {
    closed: bool,
    paused: bool,
}

struct RtpObserverInner {
    id: String,
    kind: RtpObserverKind,
    app_data: Value,
    core: EntityCore,
    observer: ObserverHandle,
    registry: Weak<EntityRegistry>,
    events: EventEmitter<RtpObserverEvent>,
    state: Mutex<RtpObserverState>,
}

#[derive(Clone)]
pub struct RtpObserver {
    inner: Arc<RtpObserverInner>,
}

impl RtpObserver {
    pub(crate) fn new(
        id: String,
        kind: RtpObserverKind,
        app_data: Value,
        core: EntityCore,
        observer: ObserverHandle,
        registry: Weak<EntityRegistry>,
    ) -> Self {
        let inner = Arc::new(RtpObserverInner {
            id,
            kind,
            app_data,
            core,
            observer,
            registry,
            events: EventEmitter::new(),
            state: Mutex::new(RtpObserverState {
                closed: false,
                paused: false,
            }),
        });

        let weak = Arc::downgrade(&inner);
        inner.core.subscribe(&inner.id, move |notification| {
            if let Some(inner) = weak.upgrade() {
                RtpObserver { inner }.handle_notification(notification);
            }
        });

        Self { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> RtpObserverKind {
        self.inner.kind
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

    pub fn on<F>(&self, event: &'static str, handler: F) -> HandlerId
    where
        F: Fn(&RtpObserverEvent) + Send + Sync + 'static,
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
        debug!(rtp_observer_id = %self.inner.id, "close()");

        self.inner.core.request_detached(Method::RtpObserverClose, None);

        self.inner.events.emit(&RtpObserverEvent::InternalClose);
        self.inner.events.emit(&RtpObserverEvent::Close);
        self.inner.observer.emit(ObserverEventKind::Close);
    }

    /// Router was closed
    pub fn router_closed(&self) {
        if !self.mark_closed() {
            return;
        }
        debug!(rtp_observer_id = %self.inner.id, "router_closed()");

        self.inner.events.emit(&RtpObserverEvent::RouterClose);
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

    pub async fn pause(&self) -> MediaResult<()> {
        debug!(rtp_observer_id = %self.inner.id, "pause()");
        self.inner.core.request_void(Method::RtpObserverPause, None).await?;
        self.set_paused(true);
        Ok(())
    }

    pub async fn resume(&self) -> MediaResult<()> {
        debug!(rtp_observer_id = %self.inner.id, "resume()");
        self.inner.core.request_void(Method::RtpObserverResume, None).await?;
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

    /// Start observing a producer of the same Router
    pub async fn add_producer(&self, producer_id: &str) -> MediaResult<()> {
        debug!(rtp_observer_id = %self.inner.id, producer_id, "add_producer()");
        let producer = self.resolve(producer_id)?;

        self.inner
            .core
            .request_with(
                Method::RtpObserverAddProducer,
                self.inner.core.internal().clone().with_producer(producer_id),
                None,
            )
            .await?;

        self.inner.observer.emit(ObserverEventKind::AddProducer(producer));
        Ok(())
    }

    pub async fn remove_producer(&self, producer_id: &str) -> MediaResult<()> {
        debug!(rtp_observer_id = %self.inner.id, producer_id, "remove_producer()");
        let producer = self.resolve(producer_id)?;

        self.inner
            .core
            .request_with(
                Method::RtpObserverRemoveProducer,
                self.inner.core.internal().clone().with_producer(producer_id),
                None,
            )
            .await?;

        self.inner.observer.emit(ObserverEventKind::RemoveProducer(producer));
        Ok(())
    }

    fn resolve(&self, producer_id: &str) -> MediaResult<Producer> {
        self.inner
            .registry
            .upgrade()
            .and_then(|registry| registry.producer(producer_id))
            .ok_or_else(|| MediaError::ProducerNotFound {
                producer_id: producer_id.to_string(),
            })
    }

    fn handle_notification(&self, notification: &Notification) {
        let parsed = match RtpObserverNotification::parse(self.inner.kind, notification) {
            Ok(parsed) => parsed,
            Err(e) => {
                log_dropped(EntityKind::RtpObserver, &self.inner.id, &e);
                return;
            }
        };

        if self.closed() {
            return;
        }

        match parsed {
            RtpObserverNotification::Volumes(entries) => {
                let Some(registry) = self.inner.registry.upgrade() else {
                    return;
                };

                // Producers closed since the worker sampled them are skipped
                let volumes: Vec<AudioVolume> = entries
                    .into_iter()
                    .filter_map(|entry| {
                        registry.producer(&entry.producer_id).map(|producer| AudioVolume {
                            producer,
                            volume: entry.volume,
                        })
                    })
                    .collect();

                if volumes.is_empty() {
                    return;
                }
                self.inner.events.emit(&RtpObserverEvent::Volumes(volumes.clone()));
                self.inner.observer.emit(ObserverEventKind::Volumes(volumes));
            }
            RtpObserverNotification::Silence => {
                self.inner.events.emit(&RtpObserverEvent::Silence);
                self.inner.observer.emit(ObserverEventKind::Silence);
            }
            RtpObserverNotification::DominantSpeaker(data) => {
                let producer = self
                    .inner
                    .registry
                    .upgrade()
                    .and_then(|registry| registry.producer(&data.producer_id));
                let Some(producer) = producer else {
                    debug!(producer_id = %data.producer_id, "Dominant speaker no longer exists");
                    return;
                };

                self.inner
                    .events
                    .emit(&RtpObserverEvent::DominantSpeaker(producer.clone()));
                self.inner
                    .observer
                    .emit(ObserverEventKind::DominantSpeaker(producer));
            }
            RtpObserverNotification::Unknown => {
                log_dropped(EntityKind::RtpObserver, &self.inner.id, &unknown_event(notification));
            }
        }
    }
}

impl std::fmt::Debug for RtpObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpObserver")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("closed", &self.closed())
            .finish()
    }
}
