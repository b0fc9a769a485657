//! Shared plumbing for worker-backed entities
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


use mediactl_types::{Internal, Method, Notification};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use worker_channel::{Channel, SubscriptionHandle};

use crate::error::{MediaError, MediaResult, NotificationError};
use crate::observer::EntityKind;

/// Channel access, identifiers and closure signal for one entity
///
/// Requests issued through the core are raced against the entity's closure,
/// so closing an entity resolves its in-flight calls with
/// [`MediaError::ChannelClosed`].
pub(crate) struct EntityCore {
    channel: Channel,
    internal: Internal,
    closed: CancellationToken,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl EntityCore {
    pub(crate) fn new(channel: Channel, internal: Internal) -> Self {
        Self {
            channel,
            internal,
            closed: CancellationToken::new(),
            subscription: Mutex::new(None),
        }
    }

    pub(crate) fn channel(&self) -> &Channel {
        &self.channel
    }

    pub(crate) fn internal(&self) -> &Internal {
        &self.internal
    }

    /// Route notifications for `target_id` to `handler`
    ///
    /// Call once the entity is fully constructed.
    pub(crate) fn subscribe<F>(&self, target_id: &str, handler: F)
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        if self.closed.is_cancelled() {
            return;
        }
        let handle = self.channel.subscribe(target_id, handler);
        *self.subscription.lock() = Some(handle);
    }

    /// Cancel in-flight requests and stop notification delivery
    ///
    /// Callers hold the entity's state lock with `closed` already set.
    pub(crate) fn shutdown(&self) {
        self.closed.cancel();
        self.subscription.lock().take();
    }

    pub(crate) async fn request(&self, method: Method, data: Option<Value>) -> MediaResult<Option<Value>> {
        self.request_with(method, self.internal.clone(), data).await
    }

    /// Request on behalf of this entity with explicit identifiers, e.g. for
    /// creating a child
    pub(crate) async fn request_with(
        &self,
        method: Method,
        internal: Internal,
        data: Option<Value>,
    ) -> MediaResult<Option<Value>> {
        if self.closed.is_cancelled() {
            return Err(MediaError::ChannelClosed);
        }

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(MediaError::ChannelClosed),
            result = self.channel.request(method, internal, data) => result.map_err(MediaError::from),
        }
    }

    /// Request and decode the response payload
    pub(crate) async fn request_as<T: DeserializeOwned>(
        &self,
        method: Method,
        internal: Internal,
        data: Option<Value>,
    ) -> MediaResult<T> {
        let payload = self.request_with(method, internal, data).await?;
        decode_response(method, payload)
    }

    pub(crate) async fn request_void(&self, method: Method, data: Option<Value>) -> MediaResult<()> {
        self.request(method, data).await.map(|_| ())
    }

    /// Response payload, `null` when the worker sent none
    pub(crate) async fn request_value(&self, method: Method, data: Option<Value>) -> MediaResult<Value> {
        Ok(self.request(method, data).await?.unwrap_or(Value::Null))
    }

    /// Best-effort request; failures are logged by the channel
    pub(crate) fn request_detached(&self, method: Method, data: Option<Value>) {
        self.channel
            .request_detached(method, self.internal.clone(), data);
    }

    /// Decode the response to a creation request
    ///
    /// The worker has already created the entity when it accepts, so an
    /// undecodable payload closes it again with `close` under `internal`.
    pub(crate) fn decode_created<T: DeserializeOwned>(
        &self,
        method: Method,
        close: Method,
        internal: &Internal,
        payload: Option<Value>,
    ) -> MediaResult<T> {
        decode_response(method, payload).map_err(|e| {
            warn!(%method, error = %e, "Closing entity created with an unreadable response");
            self.channel.request_detached(close, internal.clone(), None);
            e
        })
    }
}

pub(crate) fn decode_response<T: DeserializeOwned>(method: Method, payload: Option<Value>) -> MediaResult<T> {
    serde_json::from_value(payload.unwrap_or(Value::Null)).map_err(|e| MediaError::InvalidResponse {
        method,
        reason: e.to_string(),
    })
}

/// Decode a notification's `data`, treating a missing payload as `null`
pub(crate) fn notification_data<T: DeserializeOwned>(notification: &Notification) -> Result<T, NotificationError> {
    serde_json::from_value(notification.data.clone().unwrap_or(Value::Null)).map_err(|source| {
        NotificationError::InvalidPayload {
            event: notification.event.clone(),
            source,
        }
    })
}

pub(crate) fn unknown_event(notification: &Notification) -> NotificationError {
    NotificationError::Unknown {
        event: notification.event.clone(),
    }
}

pub(crate) fn log_dropped(kind: EntityKind, id: &str, error: &NotificationError) {
    warn!(entity = ?kind, id = %id, error = %error, "Dropping notification");
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediactl_types::ConsumerLayers;
    use serde_json::json;
    use worker_channel::testing::MockWorker;

    #[tokio::test]
    async fn test_closure_resolves_in_flight_request() {
        let (channel, mut worker) = MockWorker::pair();
        let core = EntityCore::new(channel.clone(), Internal::router("r1"));

        let (result, _) = tokio::join!(core.request(Method::RouterDump, None), async {
            worker.expect_request(Method::RouterDump).await;
            core.shutdown();
        });

        assert_eq!(result, Err(MediaError::ChannelClosed));
        assert_eq!(
            core.request(Method::RouterDump, None).await,
            Err(MediaError::ChannelClosed)
        );
    }

    #[tokio::test]
    async fn test_malformed_response_is_invalid_response() {
        let (channel, mut worker) = MockWorker::pair();
        let core = EntityCore::new(channel, Internal::router("r1"));

        let (result, _) = tokio::join!(
            core.request_as::<ConsumerLayers>(Method::ConsumerSetPreferredLayers, Internal::router("r1"), None),
            async {
                let request = worker.expect_request(Method::ConsumerSetPreferredLayers).await;
                worker.accept(&request, Some(json!({ "spatial": "high" }))).await;
            }
        );

        assert!(matches!(
            result,
            Err(MediaError::InvalidResponse { method: Method::ConsumerSetPreferredLayers, .. })
        ));
    }

    #[test]
    fn test_notification_data_reports_event_name() {
        let notification = Notification::new("c1", "layerschange", Some(json!({ "spatialLayer": "x" })));
        let err = notification_data::<ConsumerLayers>(&notification).unwrap_err();
        assert!(matches!(err, NotificationError::InvalidPayload { ref event, .. } if event == "layerschange"));

        let empty = Notification::new("c1", "layerschange", None);
        let layers: Option<ConsumerLayers> = notification_data(&empty).unwrap();
        assert!(layers.is_none());
    }
}
