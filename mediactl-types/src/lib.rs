//! Mediactl Types
//!
//! Wire messages, notification payloads and shared schemas exchanged with
//! the media worker over the control channel.

pub mod messages;
pub mod notifications;
pub mod schemas;
pub mod error;

pub use messages::*;
pub use schemas::*;
pub use error::*;
