//! Multi-listener event emitter
//!
//! Every entity owns one emitter for its public events; the Router-scoped
//! Observer is another instance of the same type.
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


use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

/// Events carry a stable name that listeners subscribe to
pub trait EventName {
    fn name(&self) -> &'static str;
}

/// Identifies a registered handler for later removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listener<E> {
    id: HandlerId,
    /// `None` listens to every event
    event: Option<&'static str>,
    handler: Handler<E>,
}

/// Registry of event handlers
pub struct EventEmitter<E> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Listener<E>>>,
}

impl<E: EventName> EventEmitter<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register `handler` for events named `event`
    pub fn on<F>(&self, event: &'static str, handler: F) -> HandlerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.add(Some(event), Arc::new(handler))
    }

    /// Register `handler` for every event
    pub fn on_any<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.add(None, Arc::new(handler))
    }

    fn add(&self, event: Option<&'static str>, handler: Handler<E>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push(Listener { id, event, handler });
        id
    }

    /// Remove a handler; returns false if it was not registered
    pub fn off(&self, id: HandlerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    /// Invoke the matching handlers in registration order
    ///
    /// Handlers run on a snapshot taken before the first call, without the
    /// lock held. A panicking handler is logged and the rest still run.
    /// Returns the number of handlers invoked.
    pub fn emit(&self, event: &E) -> usize {
        let name = event.name();
        let snapshot: Vec<Handler<E>> = self
            .listeners
            .lock()
            .iter()
            .filter(|l| l.event.map_or(true, |e| e == name))
            .map(|l| Arc::clone(&l.handler))
            .collect();

        for handler in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(event = name, "Event handler panicked");
            }
        }
        snapshot.len()
    }

    /// Number of handlers that would receive an event named `event`
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .lock()
            .iter()
            .filter(|l| l.event.map_or(true, |e| e == event))
            .count()
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }
}

impl<E: EventName> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}
