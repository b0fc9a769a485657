//! Error types for the media router
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


use mediactl_types::Method;
use thiserror::Error;
use worker_channel::RequestError;

/// Result type for media router operations
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors surfaced to callers of entity operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// The channel, or the entity the call was made on, closed
    #[error("Channel closed")]
    ChannelClosed,

    /// Worker answered `accepted: false`
    #[error("Request rejected: {reason}")]
    RequestRejected { reason: String },

    /// Parameters do not match the entity subtype; nothing was sent
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Producer not found: {producer_id}")]
    ProducerNotFound { producer_id: String },

    #[error("Data producer not found: {data_producer_id}")]
    DataProducerNotFound { data_producer_id: String },

    #[error("Invalid request {method}: {reason}")]
    InvalidRequest { method: Method, reason: String },

    /// Accepted response whose payload does not have the expected shape
    #[error("Invalid response to {method}: {reason}")]
    InvalidResponse { method: Method, reason: String },
}

impl From<RequestError> for MediaError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::ChannelClosed => MediaError::ChannelClosed,
            RequestError::Rejected { reason } => MediaError::RequestRejected { reason },
            RequestError::InvalidRequest { method, reason } => {
                MediaError::InvalidRequest { method, reason }
            }
            RequestError::InvalidResponse { method, reason } => {
                MediaError::InvalidResponse { method, reason }
            }
        }
    }
}

/// Notification handling failures; logged and dropped, never surfaced
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Unknown notification event: {event}")]
    Unknown { event: String },

    #[error("Invalid payload for {event}: {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}
