//! Creation options for routers, transports and their children
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


use mediactl_types::{ConsumerLayers, DtlsParameters, MediaKind, RtpParameters, SctpStreamParameters, SrtpParameters};
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// Router
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RouterOptions {
    pub app_data: Value,
}

// ============================================================================
// Transports
// ============================================================================

/// Local address to listen on, with an optional announced (public) address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenIp {
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub announced_ip: Option<String>,
}

impl ListenIp {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            announced_ip: None,
        }
    }
}

/// Number of SCTP streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NumSctpStreams {
    /// Initially requested outgoing streams
    #[serde(rename = "OS")]
    pub os: u16,
    /// Maximum incoming streams
    #[serde(rename = "MIS")]
    pub mis: u16,
}

impl Default for NumSctpStreams {
    fn default() -> Self {
        Self { os: 1024, mis: 1024 }
    }
}

#[derive(Debug, Clone)]
pub struct WebRtcTransportOptions {
    pub listen_ips: Vec<ListenIp>,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
    pub prefer_tcp: bool,
    /// Initial outgoing bitrate estimate, in bps
    pub initial_available_outgoing_bitrate: u32,
    pub enable_sctp: bool,
    pub num_sctp_streams: NumSctpStreams,
    pub max_sctp_message_size: u32,
    pub app_data: Value,
}

impl WebRtcTransportOptions {
    pub fn new(listen_ips: Vec<ListenIp>) -> Self {
        Self {
            listen_ips,
            enable_udp: true,
            enable_tcp: false,
            prefer_udp: false,
            prefer_tcp: false,
            initial_available_outgoing_bitrate: 600_000,
            enable_sctp: false,
            num_sctp_streams: NumSctpStreams::default(),
            max_sctp_message_size: 262_144,
            app_data: Value::Null,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlainTransportOptions {
    pub listen_ip: ListenIp,
    /// Use RTCP-mux (RTP and RTCP on the same port)
    pub rtcp_mux: bool,
    /// Learn the remote address from the first received packet
    pub comedia: bool,
    pub enable_sctp: bool,
    pub num_sctp_streams: NumSctpStreams,
    pub max_sctp_message_size: u32,
    pub enable_srtp: bool,
    pub srtp_crypto_suite: String,
    pub app_data: Value,
}

impl PlainTransportOptions {
    pub fn new(listen_ip: ListenIp) -> Self {
        Self {
            listen_ip,
            rtcp_mux: true,
            comedia: false,
            enable_sctp: false,
            num_sctp_streams: NumSctpStreams::default(),
            max_sctp_message_size: 262_144,
            enable_srtp: false,
            srtp_crypto_suite: "AES_CM_128_HMAC_SHA1_80".to_string(),
            app_data: Value::Null,
        }
    }
}

/// Remote parameters for [`Transport::connect`](crate::Transport::connect)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectParameters {
    WebRtc {
        dtls_parameters: DtlsParameters,
    },
    Plain {
        ip: Option<String>,
        port: Option<u16>,
        rtcp_port: Option<u16>,
        srtp_parameters: Option<SrtpParameters>,
    },
}

impl ConnectParameters {
    pub(crate) fn shape(&self) -> &'static str {
        match self {
            ConnectParameters::WebRtc { .. } => "webrtc connect parameters",
            ConnectParameters::Plain { .. } => "plain connect parameters",
        }
    }
}

// ============================================================================
// Producers and consumers
// ============================================================================

#[derive(Debug, Clone)]
pub struct ProducerOptions {
    /// Fixed producer id; a random one is generated when `None`
    pub id: Option<String>,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub paused: bool,
    /// Delay before forwarding a key frame request to the endpoint, in ms
    pub key_frame_request_delay: u32,
    pub app_data: Value,
}

impl ProducerOptions {
    pub fn new(kind: MediaKind, rtp_parameters: RtpParameters) -> Self {
        Self {
            id: None,
            kind,
            rtp_parameters,
            paused: false,
            key_frame_request_delay: 0,
            app_data: Value::Null,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub producer_id: String,
    /// Already negotiated RTP parameters for the consumer endpoint
    pub rtp_parameters: RtpParameters,
    pub paused: bool,
    pub preferred_layers: Option<ConsumerLayers>,
    pub app_data: Value,
}

impl ConsumerOptions {
    pub fn new(producer_id: impl Into<String>, rtp_parameters: RtpParameters) -> Self {
        Self {
            producer_id: producer_id.into(),
            rtp_parameters,
            paused: false,
            preferred_layers: None,
            app_data: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DataProducerOptions {
    pub id: Option<String>,
    pub sctp_stream_parameters: Option<SctpStreamParameters>,
    pub label: String,
    pub protocol: String,
    pub app_data: Value,
}

#[derive(Debug, Clone)]
pub struct DataConsumerOptions {
    pub data_producer_id: String,
    /// Override the data producer's ordering
    pub ordered: Option<bool>,
    pub app_data: Value,
}

impl DataConsumerOptions {
    pub fn new(data_producer_id: impl Into<String>) -> Self {
        Self {
            data_producer_id: data_producer_id.into(),
            ordered: None,
            app_data: Value::Null,
        }
    }
}

// ============================================================================
// RTP observers
// ============================================================================

#[derive(Debug, Clone)]
pub struct AudioLevelObserverOptions {
    /// Maximum number of entries in a `volumes` event
    pub max_entries: u16,
    /// Minimum average volume (dBvo, -127 to 0) to report
    pub threshold: i8,
    /// Reporting interval, in ms
    pub interval: u16,
    pub app_data: Value,
}

impl Default for AudioLevelObserverOptions {
    fn default() -> Self {
        Self {
            max_entries: 1,
            threshold: -80,
            interval: 1000,
            app_data: Value::Null,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActiveSpeakerObserverOptions {
    pub interval: u16,
    pub app_data: Value,
}

impl Default for ActiveSpeakerObserverOptions {
    fn default() -> Self {
        Self {
            interval: 300,
            app_data: Value::Null,
        }
    }
}
