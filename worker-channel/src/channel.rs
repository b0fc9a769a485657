//! Control channel to the media worker
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


use bytes::{Bytes, BytesMut};
use futures::{Sink, SinkExt, Stream, StreamExt};
use mediactl_config::ChannelConfig;
use mediactl_types::{InboundMessage, Internal, Method, Notification, Request};
use serde_json::Value;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::{frame_codec, JsonCodec, PayloadCodec};
use crate::error::{ProtocolError, RequestError, Result};
use crate::registry::{NotificationRegistry, RequestRegistry, SubscriptionHandle};

/// Shared handle to the worker control channel
///
/// Cloning is cheap; every clone talks to the same worker. Requests may be
/// issued concurrently from any task. Responses are matched by id and
/// notifications are delivered, in arrival order, to the handlers
/// subscribed for their `targetId`.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    requests: RequestRegistry,
    notifications: Arc<NotificationRegistry>,
    outbound: mpsc::UnboundedSender<Bytes>,
    codec: Arc<dyn PayloadCodec>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl Channel {
    /// Create a channel over a byte stream using length-prefixed JSON frames
    ///
    /// Must be called from within a Tokio runtime; the reader and writer
    /// tasks are spawned immediately.
    pub fn new<T>(io: T, config: &ChannelConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (sink, stream) = Framed::new(io, frame_codec(config)).split();
        Self::from_parts(sink, stream, Arc::new(JsonCodec))
    }

    /// Create a channel from an already framed sink and stream
    pub fn from_parts<Si, St>(sink: Si, stream: St, codec: Arc<dyn PayloadCodec>) -> Self
    where
        Si: Sink<Bytes, Error = io::Error> + Send + 'static,
        St: Stream<Item = io::Result<BytesMut>> + Send + 'static,
    {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ChannelInner {
            requests: RequestRegistry::new(),
            notifications: Arc::new(NotificationRegistry::new()),
            outbound,
            codec,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        });

        tokio::spawn(write_loop(
            outbound_rx,
            sink,
            Arc::downgrade(&inner),
            inner.shutdown.clone(),
        ));
        tokio::spawn(read_loop(
            stream,
            Arc::downgrade(&inner),
            inner.shutdown.clone(),
        ));

        debug!("Worker channel opened");
        Self { inner }
    }

    /// Send a request and wait for the matching response
    ///
    /// Resolves to the response `data` on acceptance. Fails with
    /// [`RequestError::Rejected`] when the worker rejects the request and
    /// with [`RequestError::ChannelClosed`] when the channel closes first.
    pub async fn request(
        &self,
        method: Method,
        internal: Internal,
        data: Option<Value>,
    ) -> Result<Option<Value>> {
        let (id, receiver) = self.inner.requests.register(method)?;

        if let Err(e) = self.inner.send(Request { id, method, internal, data }) {
            self.inner.requests.cancel(id);
            return Err(e);
        }

        receiver.await.unwrap_or(Err(RequestError::ChannelClosed))
    }

    /// Send a request without waiting for its response
    ///
    /// A rejection is logged at warn level; it never reaches the caller.
    pub fn request_detached(&self, method: Method, internal: Internal, data: Option<Value>) {
        let id = match self.inner.requests.register_detached(method) {
            Ok(id) => id,
            Err(e) => {
                debug!(method = %method, error = %e, "Skipping detached request");
                return;
            }
        };

        if let Err(e) = self.inner.send(Request { id, method, internal, data }) {
            self.inner.requests.cancel(id);
            debug!(method = %method, error = %e, "Skipping detached request");
        }
    }

    /// Route notifications whose `targetId` equals `target_id` to `handler`
    ///
    /// Handlers run on the channel's reader task and must not block.
    pub fn subscribe<F>(&self, target_id: impl Into<String>, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let target_id = target_id.into();
        let key = self
            .inner
            .notifications
            .register(&target_id, Arc::new(handler));
        SubscriptionHandle::new(&self.inner.notifications, target_id, key)
    }

    /// Close the channel, failing every pending request
    ///
    /// Idempotent.
    pub fn close(&self) {
        self.inner.shutdown("closed locally");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Resolves once the channel has closed, for whatever reason
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let token = self.inner.shutdown.clone();
        async move { token.cancelled().await }
    }

    /// Number of requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.inner.requests.len()
    }

    /// Number of target ids with at least one live subscription
    pub fn subscribed_targets(&self) -> usize {
        self.inner.notifications.target_count()
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("closed", &self.is_closed())
            .field("pending_requests", &self.pending_requests())
            .finish()
    }
}

impl ChannelInner {
    fn send(&self, request: Request) -> Result<()> {
        let payload = self
            .codec
            .encode_request(&request)
            .map_err(|e| RequestError::InvalidRequest {
                method: request.method,
                reason: e.to_string(),
            })?;

        trace!(id = request.id, method = %request.method, "Sending request");
        self.outbound
            .send(payload)
            .map_err(|_| RequestError::ChannelClosed)
    }

    fn handle_frame(&self, payload: &[u8]) {
        match self.codec.decode_message(payload) {
            Ok(InboundMessage::Response(response)) => {
                if let Err(e) = self.requests.complete(response) {
                    warn!(error = %e, "Dropping response");
                }
            }
            Ok(InboundMessage::Notification(notification)) => {
                if self.notifications.dispatch(&notification) == 0 {
                    trace!(
                        target_id = %notification.target_id,
                        event = %notification.event,
                        "No handler for notification"
                    );
                }
            }
            Err(e) => {
                warn!(error = %e, len = payload.len(), "Dropping malformed frame");
            }
        }
    }

    fn shutdown(&self, cause: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let failed = self.requests.close();
        self.notifications.clear();
        self.shutdown.cancel();

        info!(cause, failed_requests = failed, "Worker channel closed");
    }
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn write_loop<Si>(
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    sink: Si,
    inner: Weak<ChannelInner>,
    shutdown: CancellationToken,
) where
    Si: Sink<Bytes, Error = io::Error>,
{
    let mut sink = Box::pin(sink);

    loop {
        let payload = tokio::select! {
            _ = shutdown.cancelled() => break,
            payload = outbound.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };

        if let Err(e) = sink.send(payload).await {
            let e = ProtocolError::from(e);
            warn!(error = %e, "Failed to write frame");
            if let Some(inner) = inner.upgrade() {
                inner.shutdown("write failed");
            }
            break;
        }
    }

    let _ = sink.close().await;
    debug!("Writer task finished");
}

async fn read_loop<St>(stream: St, inner: Weak<ChannelInner>, shutdown: CancellationToken)
where
    St: Stream<Item = io::Result<BytesMut>>,
{
    let mut stream = Box::pin(stream);

    let cause = loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break None,
            frame = stream.next() => frame,
        };

        let Some(inner) = inner.upgrade() else {
            break None;
        };

        match frame {
            Some(Ok(payload)) => inner.handle_frame(&payload),
            Some(Err(e)) => {
                let e = ProtocolError::from(e);
                warn!(error = %e, "Failed to read frame");
                break Some("read failed");
            }
            None => break Some("worker hung up"),
        }
    };

    if let Some(cause) = cause {
        if let Some(inner) = inner.upgrade() {
            inner.shutdown(cause);
        }
    }
    debug!("Reader task finished");
}
