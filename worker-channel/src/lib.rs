//! Worker Channel Library
//!
//! Bidirectional framed control channel to the media worker: pairs
//! outbound requests with inbound responses by correlation id and routes
//! unsolicited notifications to the handlers registered for their target.

pub mod channel;
pub mod codec;
pub mod error;
pub mod registry;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use channel::*;
pub use codec::{JsonCodec, PayloadCodec};
pub use error::*;
pub use registry::{NotificationHandler, SubscriptionHandle};
