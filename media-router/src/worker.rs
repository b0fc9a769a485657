//! Worker handle: root of the entity tree
//!
//! A [`Worker`] wraps the control [`Channel`] to one media worker process and
//! owns the routers created on it. When the channel goes away, whether
//! closed locally or because the worker hung up, every router is closed.
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
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use worker_channel::Channel;

use crate::error::{MediaError, MediaResult};
use crate::event_emitter::{EventEmitter, EventName, HandlerId};
use crate::options::RouterOptions;
use crate::router::Router;

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Closed locally
    Close,
    /// The channel closed underneath
    Died,
}

impl EventName for WorkerEvent {
    fn name(&self) -> &'static str {
        match self {
            WorkerEvent::Close => "close",
            WorkerEvent::Died => "died",
        }
    }
}

struct WorkerState {
    closed: bool,
    routers: HashMap<String, Router>,
}

struct WorkerInner {
    channel: Channel,
    events: EventEmitter<WorkerEvent>,
    state: Mutex<WorkerState>,
}

#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

impl Worker {
    /// Wrap an established channel
    ///
    /// Must be called within a Tokio runtime; a task watches the channel and
    /// closes every router once it shuts down.
    pub fn new(channel: Channel) -> Self {
        let inner = Arc::new(WorkerInner {
            channel,
            events: EventEmitter::new(),
            state: Mutex::new(WorkerState {
                closed: false,
                routers: HashMap::new(),
            }),
        });

        let weak = Arc::downgrade(&inner);
        let channel_closed = inner.channel.closed();
        tokio::spawn(async move {
            channel_closed.await;
            if let Some(inner) = weak.upgrade() {
                Worker { inner }.channel_closed();
            }
        });

        Self { inner }
    }

    pub fn channel(&self) -> &Channel {
        &self.inner.channel
    }

    pub fn closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn routers(&self) -> Vec<Router> {
        self.inner.state.lock().routers.values().cloned().collect()
    }

    pub fn on<F>(&self, event: &'static str, handler: F) -> HandlerId
    where
        F: Fn(&WorkerEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(event, handler)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.events.off(id)
    }

    pub async fn dump(&self) -> MediaResult<Value> {
        debug!("dump()");
        if self.closed() {
            return Err(MediaError::ChannelClosed);
        }
        let payload = self
            .inner
            .channel
            .request(Method::WorkerDump, Internal::default(), None)
            .await?;
        Ok(payload.unwrap_or(Value::Null))
    }

    pub async fn create_router(&self, options: RouterOptions) -> MediaResult<Router> {
        debug!("create_router()");
        if self.closed() {
            return Err(MediaError::ChannelClosed);
        }

        let router_id = Uuid::new_v4().to_string();
        self.inner
            .channel
            .request(Method::WorkerCreateRouter, Internal::router(&router_id), None)
            .await?;

        let router = Router::new(router_id.clone(), options, self.inner.channel.clone());

        {
            let mut state = self.inner.state.lock();
            if !state.closed {
                state.routers.insert(router_id.clone(), router.clone());
            } else {
                drop(state);
                router.worker_closed();
                return Err(MediaError::ChannelClosed);
            }
        }

        let weak = Arc::downgrade(&self.inner);
        router.on("@close", move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.state.lock().routers.remove(&router_id);
            }
        });

        info!(router_id = %router.id(), "Router created");
        Ok(router)
    }

    /// Close every router, then the channel
    pub fn close(&self) {
        let Some(routers) = self.mark_closed() else {
            return;
        };
        info!(routers = routers.len(), "Closing worker");

        for router in routers {
            router.worker_closed();
        }
        self.inner.channel.close();
        self.inner.events.emit(&WorkerEvent::Close);
    }

    fn channel_closed(&self) {
        let Some(routers) = self.mark_closed() else {
            return;
        };
        warn!(routers = routers.len(), "Worker channel closed unexpectedly");

        for router in routers {
            router.worker_closed();
        }
        self.inner.events.emit(&WorkerEvent::Died);
    }

    fn mark_closed(&self) -> Option<Vec<Router>> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return None;
        }
        state.closed = true;
        Some(state.routers.drain().map(|(_, r)| r).collect())
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("closed", &self.closed())
            .finish()
    }
}
