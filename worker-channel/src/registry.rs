//! Pending request and notification handler registries
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


use mediactl_types::{Method, Notification, Response};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::error::{ProtocolError, RequestError};

pub(crate) type ResponseResult = Result<Option<Value>, RequestError>;

enum PendingRequest {
    /// A caller is waiting on the receiving half
    Awaited {
        method: Method,
        sender: oneshot::Sender<ResponseResult>,
    },
    /// Fire-and-forget; the outcome is only logged
    Detached { method: Method },
}

struct RequestState {
    closed: bool,
    pending: HashMap<u32, PendingRequest>,
}

/// Outstanding requests keyed by correlation id
pub(crate) struct RequestRegistry {
    next_id: AtomicU32,
    state: Mutex<RequestState>,
}

impl RequestRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            state: Mutex::new(RequestState {
                closed: false,
                pending: HashMap::new(),
            }),
        }
    }

    /// Register a request whose outcome will be delivered to the returned receiver
    pub(crate) fn register(
        &self,
        method: Method,
    ) -> Result<(u32, oneshot::Receiver<ResponseResult>), RequestError> {
        let (sender, receiver) = oneshot::channel();
        let id = self.insert(PendingRequest::Awaited { method, sender })?;
        Ok((id, receiver))
    }

    pub(crate) fn register_detached(&self, method: Method) -> Result<u32, RequestError> {
        self.insert(PendingRequest::Detached { method })
    }

    fn insert(&self, entry: PendingRequest) -> Result<u32, RequestError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(RequestError::ChannelClosed);
        }

        // Ids wrap at u32::MAX; 0 is never issued and live ids are never reused
        let id = loop {
            let candidate = self.next_id.fetch_add(1, Ordering::Relaxed);
            if candidate != 0 && !state.pending.contains_key(&candidate) {
                break candidate;
            }
        };

        state.pending.insert(id, entry);
        Ok(id)
    }

    /// Forget a request that never made it onto the wire
    pub(crate) fn cancel(&self, id: u32) -> bool {
        self.state.lock().pending.remove(&id).is_some()
    }

    /// Resolve the pending entry matching `response.id`
    pub(crate) fn complete(&self, response: Response) -> Result<(), ProtocolError> {
        let entry = self
            .state
            .lock()
            .pending
            .remove(&response.id)
            .ok_or(ProtocolError::UnmatchedResponse(response.id))?;

        let outcome = if response.accepted {
            Ok(response.data)
        } else {
            Err(RequestError::Rejected {
                reason: response.rejection_reason(),
            })
        };

        match entry {
            PendingRequest::Awaited { method, sender } => {
                if sender.send(outcome).is_err() {
                    debug!(id = response.id, method = %method, "Caller stopped waiting for response");
                }
            }
            PendingRequest::Detached { method } => match outcome {
                Ok(_) => debug!(id = response.id, method = %method, "Detached request accepted"),
                Err(e) => warn!(id = response.id, method = %method, error = %e, "Detached request failed"),
            },
        }

        Ok(())
    }

    /// Fail every outstanding request with `ChannelClosed` and refuse new ones
    ///
    /// Returns the number of requests that were still pending.
    pub(crate) fn close(&self) -> usize {
        let drained: Vec<(u32, PendingRequest)> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.pending.drain().collect()
        };

        let count = drained.len();
        for (id, entry) in drained {
            match entry {
                PendingRequest::Awaited { sender, .. } => {
                    let _ = sender.send(Err(RequestError::ChannelClosed));
                }
                PendingRequest::Detached { method } => {
                    debug!(id, method = %method, "Detached request abandoned, channel closed");
                }
            }
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().pending.len()
    }
}

/// Callback invoked for each notification addressed to a subscribed target
pub type NotificationHandler = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Notification handlers keyed by target id
pub(crate) struct NotificationRegistry {
    next_key: AtomicU64,
    handlers: Mutex<HashMap<String, Vec<(u64, NotificationHandler)>>>,
}

impl NotificationRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_key: AtomicU64::new(1),
            handlers: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn register(&self, target_id: &str, handler: NotificationHandler) -> u64 {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .entry(target_id.to_string())
            .or_default()
            .push((key, handler));
        key
    }

    pub(crate) fn unregister(&self, target_id: &str, key: u64) -> bool {
        let mut handlers = self.handlers.lock();
        let Some(entries) = handlers.get_mut(target_id) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|(k, _)| *k != key);
        let removed = entries.len() != before;
        if entries.is_empty() {
            handlers.remove(target_id);
        }
        removed
    }

    /// Invoke every handler registered for the notification's target
    ///
    /// Handlers run outside the registry lock, so they may subscribe or
    /// unsubscribe. Returns the number of handlers invoked.
    pub(crate) fn dispatch(&self, notification: &Notification) -> usize {
        let snapshot: Vec<NotificationHandler> = match self.handlers.lock().get(&notification.target_id) {
            Some(entries) => entries.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };

        for handler in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(notification))).is_err() {
                error!(
                    target_id = %notification.target_id,
                    event = %notification.event,
                    "Notification handler panicked"
                );
            }
        }
        snapshot.len()
    }

    pub(crate) fn clear(&self) {
        self.handlers.lock().clear();
    }

    pub(crate) fn target_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

/// Keeps a notification subscription alive
///
/// Dropping the handle unregisters the handler.
#[must_use = "dropping the handle unsubscribes immediately"]
pub struct SubscriptionHandle {
    registry: Weak<NotificationRegistry>,
    target_id: String,
    key: u64,
}

impl SubscriptionHandle {
    pub(crate) fn new(registry: &Arc<NotificationRegistry>, target_id: String, key: u64) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            target_id,
            key,
        }
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("target_id", &self.target_id)
            .finish()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(&self.target_id, self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_ids_skip_zero_and_live_entries() {
        let registry = RequestRegistry::new();
        registry.next_id.store(u32::MAX, Ordering::Relaxed);

        let (first, _rx1) = registry.register(Method::WorkerDump).unwrap();
        let (second, _rx2) = registry.register(Method::WorkerDump).unwrap();
        assert_eq!(first, u32::MAX);
        assert_eq!(second, 1);

        // Wrap around again while 1 is still outstanding
        registry.next_id.store(1, Ordering::Relaxed);
        let (third, _rx3) = registry.register(Method::WorkerDump).unwrap();
        assert_eq!(third, 2);
    }

    #[tokio::test]
    async fn test_complete_resolves_matching_entry_once() {
        let registry = RequestRegistry::new();
        let (id, rx) = registry.register(Method::RouterDump).unwrap();

        registry
            .complete(Response::accepted(id, Some(json!({ "id": "r1" }))))
            .unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), Some(json!({ "id": "r1" })));

        let again = registry.complete(Response::accepted(id, None));
        assert!(matches!(again, Err(ProtocolError::UnmatchedResponse(i)) if i == id));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_waiter_stays_pending_until_its_response() {
        let registry = RequestRegistry::new();
        let (id, rx) = registry.register(Method::ConsumerPause).unwrap();
        let (other, _other_rx) = registry.register(Method::ConsumerResume).unwrap();
        let mut waiter = tokio_test::task::spawn(rx);

        tokio_test::assert_pending!(waiter.poll());
        registry.complete(Response::accepted(other, None)).unwrap();
        tokio_test::assert_pending!(waiter.poll());

        registry.complete(Response::accepted(id, None)).unwrap();
        assert!(waiter.is_woken());
        let result = tokio_test::assert_ready!(waiter.poll());
        assert_eq!(result.unwrap(), Ok(None));
    }

    #[tokio::test]
    async fn test_rejection_carries_reason() {
        let registry = RequestRegistry::new();
        let (id, rx) = registry.register(Method::TransportConnect).unwrap();

        registry
            .complete(Response::rejected(id, "already connected"))
            .unwrap();
        assert_eq!(
            rx.await.unwrap(),
            Err(RequestError::Rejected {
                reason: "already connected".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_refuses_new() {
        let registry = RequestRegistry::new();
        let (_, rx1) = registry.register(Method::WorkerDump).unwrap();
        let (_, rx2) = registry.register(Method::RouterDump).unwrap();
        registry.register_detached(Method::ProducerClose).unwrap();

        assert_eq!(registry.close(), 3);
        assert_eq!(rx1.await.unwrap(), Err(RequestError::ChannelClosed));
        assert_eq!(rx2.await.unwrap(), Err(RequestError::ChannelClosed));
        assert!(matches!(
            registry.register(Method::WorkerDump),
            Err(RequestError::ChannelClosed)
        ));
        assert_eq!(registry.close(), 0);
    }

    #[test]
    fn test_detached_rejection_is_absorbed() {
        let registry = RequestRegistry::new();
        let id = registry.register_detached(Method::ConsumerClose).unwrap();

        registry.complete(Response::rejected(id, "gone")).unwrap();
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_dispatch_routes_by_target_and_survives_panics() {
        let registry = Arc::new(NotificationRegistry::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let key = registry.register(
            "p1",
            Arc::new(move |_n: &Notification| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        registry.register("p1", Arc::new(|_n: &Notification| panic!("boom")));

        let for_p1 = Notification::new("p1", "score", None);
        let for_p2 = Notification::new("p2", "score", None);

        assert_eq!(registry.dispatch(&for_p1), 2);
        assert_eq!(registry.dispatch(&for_p2), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(registry.unregister("p1", key));
        assert!(!registry.unregister("p1", key));
        registry.dispatch(&for_p1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_drop_unregisters() {
        let registry = Arc::new(NotificationRegistry::new());
        let key = registry.register("c1", Arc::new(|_n: &Notification| {}));
        let handle = SubscriptionHandle::new(&registry, "c1".to_string(), key);
        assert_eq!(registry.target_count(), 1);

        drop(handle);
        assert_eq!(registry.target_count(), 0);
    }
}
