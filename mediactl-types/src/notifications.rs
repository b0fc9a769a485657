//! Notification payload schemas
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


use serde::{Deserialize, Serialize};

use crate::schemas::{DtlsState, IceState, SctpState, TransportTuple};

// ============================================================================
// Transport notifications
// ============================================================================

/// Payload for `icestatechange`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceStateChangeData {
    pub ice_state: IceState,
}

/// Payload for `iceselectedtuplechange`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceSelectedTupleChangeData {
    pub ice_selected_tuple: TransportTuple,
}

/// Payload for `dtlsstatechange`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtlsStateChangeData {
    pub dtls_state: DtlsState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtls_remote_cert: Option<String>,
}

/// Payload for `sctpstatechange`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SctpStateChangeData {
    pub sctp_state: SctpState,
}

/// Payload for `tuple` (plain transport)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleChangeData {
    pub tuple: TransportTuple,
}

/// Payload for `rtcptuple` (plain transport)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcpTupleChangeData {
    pub rtcp_tuple: TransportTuple,
}

// ============================================================================
// RtpObserver notifications
// ============================================================================

/// One entry of an audio level `volumes` notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeData {
    pub producer_id: String,
    /// Average volume in dBvo, from -127 to 0
    pub volume: i8,
}

/// Payload for `dominantspeaker`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DominantSpeakerData {
    pub producer_id: String,
}

// ============================================================================
// DataConsumer notifications
// ============================================================================

/// Payload for `bufferedamountlow`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferedAmountLowData {
    pub buffered_amount: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_buffered_amount_low_payload() {
        let data: BufferedAmountLowData =
            serde_json::from_value(json!({ "bufferedAmount": 4_294_967_295u32 })).unwrap();
        assert_eq!(data.buffered_amount, u32::MAX);

        // snake_case, negative and missing amounts are not accepted
        for payload in [
            json!({ "buffered_amount": 10 }),
            json!({ "bufferedAmount": -1 }),
            json!({}),
        ] {
            assert!(serde_json::from_value::<BufferedAmountLowData>(payload).is_err());
        }
    }
}
