//! Frame and payload codecs
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
use mediactl_config::ChannelConfig;
use mediactl_types::{InboundMessage, Request};
use tokio_util::codec::LengthDelimitedCodec;

use crate::error::ProtocolError;

/// Turns typed messages into frame payloads and back
///
/// Framing (the length prefix) is handled separately by
/// [`frame_codec`]; implementations only deal with the payload bytes.
pub trait PayloadCodec: Send + Sync + 'static {
    fn encode_request(&self, request: &Request) -> Result<Bytes, ProtocolError>;

    fn decode_message(&self, payload: &[u8]) -> Result<InboundMessage, ProtocolError>;
}

/// JSON payloads, one message per frame
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode_request(&self, request: &Request) -> Result<Bytes, ProtocolError> {
        serde_json::to_vec(request)
            .map(Bytes::from)
            .map_err(ProtocolError::Encode)
    }

    fn decode_message(&self, payload: &[u8]) -> Result<InboundMessage, ProtocolError> {
        serde_json::from_slice(payload).map_err(ProtocolError::Decode)
    }
}

/// Length-prefixed framing: 4-byte big-endian length followed by the payload
pub fn frame_codec(config: &ChannelConfig) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(config.max_message_size)
        .new_codec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediactl_types::{Internal, Method};
    use serde_json::json;

    #[test]
    fn test_encode_request_uses_dotted_method() {
        let request = Request {
            id: 7,
            method: Method::TransportConnect,
            internal: Internal::router("r1").with_transport("t1"),
            data: Some(json!({ "port": 5000 })),
        };

        let bytes = JsonCodec.encode_request(&request).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["method"], "transport.connect");
        assert_eq!(value["internal"]["transportId"], "t1");
        assert_eq!(value["data"]["port"], 5000);
    }

    #[test]
    fn test_decode_distinguishes_responses_and_notifications() {
        let response = JsonCodec
            .decode_message(br#"{"id":3,"accepted":true,"data":{"x":1}}"#)
            .unwrap();
        assert!(matches!(response, InboundMessage::Response(r) if r.id == 3 && r.accepted));

        let notification = JsonCodec
            .decode_message(br#"{"targetId":"p1","event":"score","data":[]}"#)
            .unwrap();
        assert!(matches!(
            notification,
            InboundMessage::Notification(n) if n.target_id == "p1" && n.event == "score"
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result = JsonCodec.decode_message(b"not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));

        let result = JsonCodec.decode_message(br#"{"hello":"world"}"#);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_default_limit_is_four_mib_of_payload() {
        use bytes::{Bytes, BytesMut};
        use tokio_util::codec::Encoder;

        let mut codec = frame_codec(&ChannelConfig::default());
        let mut buf = BytesMut::new();

        codec
            .encode(Bytes::from(vec![b' '; 4 * 1024 * 1024]), &mut buf)
            .unwrap();
        assert_eq!(buf.len(), 4 + 4 * 1024 * 1024);
        assert_eq!(&buf[..4], &[0x00, 0x40, 0x00, 0x00]);

        let too_big = Bytes::from(vec![b' '; 4 * 1024 * 1024 + 1]);
        assert!(codec.encode(too_big, &mut BytesMut::new()).is_err());
    }
}
