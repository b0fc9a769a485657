//! In-process worker double for tests
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


use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use mediactl_config::ChannelConfig;
use mediactl_types::{Internal, Method, Notification, Request, Response};
use serde_json::Value;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::channel::Channel;

const DUPLEX_BUFFER: usize = 256 * 1024;

/// Worker end of an in-memory control channel
///
/// Reads the requests a [`Channel`] sends and lets the test script the
/// worker's responses and notifications.
pub struct MockWorker {
    framed: Framed<DuplexStream, LengthDelimitedCodec>,
}

impl MockWorker {
    /// Create a connected channel and worker pair with default limits
    pub fn pair() -> (Channel, MockWorker) {
        Self::pair_with_config(&ChannelConfig::default())
    }

    pub fn pair_with_config(config: &ChannelConfig) -> (Channel, MockWorker) {
        let (client, worker) = tokio::io::duplex(DUPLEX_BUFFER);
        let channel = Channel::new(client, config);

        // The worker side enforces no limit so tests can send oversized frames
        let codec = LengthDelimitedCodec::builder()
            .length_field_length(4)
            .big_endian()
            .max_frame_length(usize::MAX)
            .new_codec();

        (channel, MockWorker { framed: Framed::new(worker, codec) })
    }

    /// Next request sent by the channel, or `None` once it hung up
    pub async fn next_request(&mut self) -> Option<Request> {
        let frame = self.framed.next().await?.ok()?;
        Some(serde_json::from_slice(&frame).expect("channel sent an invalid request"))
    }

    /// Next request, asserting its method
    pub async fn expect_request(&mut self, method: Method) -> Request {
        let request = self
            .next_request()
            .await
            .unwrap_or_else(|| panic!("channel hung up while waiting for {method}"));
        assert_eq!(request.method, method, "unexpected request {request:?}");
        request
    }

    /// Next request if one arrives within `wait`
    pub async fn try_next_request(&mut self, wait: Duration) -> Option<Request> {
        tokio::time::timeout(wait, self.next_request())
            .await
            .ok()
            .flatten()
    }

    pub async fn accept(&mut self, request: &Request, data: Option<Value>) {
        self.respond(Response::accepted(request.id, data)).await;
    }

    pub async fn reject(&mut self, request: &Request, reason: &str) {
        self.respond(Response::rejected(request.id, reason)).await;
    }

    pub async fn respond(&mut self, response: Response) {
        let payload = serde_json::to_vec(&response).expect("response serializes");
        self.send_raw(payload).await;
    }

    pub async fn notify(&mut self, target_id: &str, event: &str, data: Option<Value>) {
        let notification = Notification::new(target_id, event, data);
        let payload = serde_json::to_vec(&notification).expect("notification serializes");
        self.send_raw(payload).await;
    }

    /// Send an arbitrary frame payload
    pub async fn send_raw(&mut self, payload: impl Into<Bytes>) {
        self.framed
            .send(payload.into())
            .await
            .expect("channel end dropped");
    }

    /// Wait until every frame sent so far has been processed by `channel`
    ///
    /// Frames are handled in order, so a completed round trip means the
    /// earlier notifications have been dispatched.
    pub async fn sync(&mut self, channel: &Channel) {
        let (result, _) = tokio::join!(
            channel.request(Method::WorkerDump, Internal::default(), None),
            async {
                let request = self.expect_request(Method::WorkerDump).await;
                self.accept(&request, None).await;
            }
        );
        result.expect("sync round trip failed");
    }

    /// Drop the worker end, as if the worker process died
    pub fn hang_up(self) {
        drop(self);
    }
}
