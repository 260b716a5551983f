//! Stream configuration types
//!
//! `StreamConfig` is the persisted, declarative description of one transport
//! stream. `StreamPatch` is the partial form accepted by update requests.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ValidationError;

/// Default channel count
pub const DEFAULT_CHANNELS: u32 = 2;

/// Default sample format (24-bit big-endian PCM, the AES67 L24 wire format)
pub const DEFAULT_FORMAT: &str = "S24BE";

/// Default capture/playback buffer time in microseconds
pub const DEFAULT_BUFFER_TIME_US: u64 = 100_000;

/// Default capture/playback latency time in microseconds
pub const DEFAULT_LATENCY_TIME_US: u64 = 5_000_000;

/// Device reference used when a stream names none
pub const DEFAULT_DEVICE: &str = "default";

/// Upper bound accepted for `channels`
pub const MAX_CHANNELS: u32 = 64;

/// Direction of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Captures local audio and sends it to the network
    Sender,
    /// Receives network audio and plays it locally
    Receiver,
}

impl StreamKind {
    /// Name as used in stream documents
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Sender => "sender",
            StreamKind::Receiver => "receiver",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sender" => Ok(StreamKind::Sender),
            "receiver" => Ok(StreamKind::Receiver),
            other => Err(ValidationError::UnknownKind(other.to_string())),
        }
    }
}

fn default_channels() -> u32 {
    DEFAULT_CHANNELS
}

fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}

fn default_buffer_time() -> u64 {
    DEFAULT_BUFFER_TIME_US
}

fn default_latency_time() -> u64 {
    DEFAULT_LATENCY_TIME_US
}

fn default_enabled() -> bool {
    true
}

/// Unassigned (empty) or made of `[A-Za-z0-9_-]`, so it can name a unit
fn is_valid_id(id: &str) -> bool {
    id.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Desired configuration of one transport stream
///
/// Field names serialize in camelCase. The short names used by older stream
/// documents (`ip`, `iface`, `buffer_time`, ...) are accepted when reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    /// Stable identifier; empty until the registry assigns one
    #[serde(default)]
    pub id: String,

    /// Sender or receiver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<StreamKind>,

    /// Multicast group (or unicast peer) address
    #[serde(default, alias = "ip", skip_serializing_if = "Option::is_none")]
    pub multicast_address: Option<String>,

    /// RTP port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Local audio device (`default`, a card name, or a fully qualified ALSA name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    /// Interface used to join or send multicast traffic
    #[serde(default, alias = "iface", skip_serializing_if = "Option::is_none")]
    pub network_interface: Option<String>,

    /// Audio channel count
    #[serde(default = "default_channels")]
    pub channels: u32,

    /// Local sample format (S16LE, S24LE, S24BE, S32LE, ...)
    #[serde(default = "default_format")]
    pub format: String,

    /// Device buffer time in microseconds
    #[serde(default = "default_buffer_time", alias = "buffer_time")]
    pub buffer_time_micros: u64,

    /// Device latency time in microseconds
    #[serde(default = "default_latency_time", alias = "latency_time")]
    pub latency_time_micros: u64,

    /// Synchronise the sink to the pipeline clock
    #[serde(default, alias = "sync")]
    pub sync_to_clock: bool,

    /// Loopback test flag (accepted and persisted; does not alter the pipeline)
    #[serde(default, alias = "loopback")]
    pub loopback_test: bool,

    /// Desired run state
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            kind: None,
            multicast_address: None,
            port: None,
            device: None,
            network_interface: None,
            channels: DEFAULT_CHANNELS,
            format: default_format(),
            buffer_time_micros: DEFAULT_BUFFER_TIME_US,
            latency_time_micros: DEFAULT_LATENCY_TIME_US,
            sync_to_clock: false,
            loopback_test: false,
            enabled: true,
        }
    }
}

impl StreamConfig {
    /// Create a stream with the required topology fields set
    pub fn new(kind: StreamKind, multicast_address: impl Into<String>, port: u16) -> Self {
        Self {
            kind: Some(kind),
            multicast_address: Some(multicast_address.into()),
            port: Some(port),
            ..Default::default()
        }
    }

    /// Decode a stream document
    pub fn from_json(bytes: &[u8]) -> Result<Self, ValidationError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Set the ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the audio device
    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Set the network interface
    pub fn interface(mut self, iface: impl Into<String>) -> Self {
        self.network_interface = Some(iface.into());
        self
    }

    /// Set the channel count
    pub fn channels(mut self, channels: u32) -> Self {
        self.channels = channels;
        self
    }

    /// Set the sample format
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Set the desired run state
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Stream kind, or a validation error if unset
    pub fn stream_kind(&self) -> Result<StreamKind, ValidationError> {
        self.kind.ok_or(ValidationError::MissingField("kind"))
    }

    /// Device reference with the `default` fallback applied
    pub fn device_or_default(&self) -> &str {
        match self.device.as_deref() {
            Some(d) if !d.trim().is_empty() => d,
            _ => DEFAULT_DEVICE,
        }
    }

    /// `address:port`, with `?` standing in for missing parts
    pub fn endpoint(&self) -> String {
        format!(
            "{}:{}",
            self.multicast_address.as_deref().unwrap_or("?"),
            self.port.map(|p| p.to_string()).unwrap_or_else(|| "?".into())
        )
    }

    /// Short one-line description for logs and failure reports
    pub fn summary(&self) -> String {
        format!(
            "{} device={} endpoint={} enabled={}",
            self.kind.map(|k| k.as_str()).unwrap_or("?"),
            self.device_or_default(),
            self.endpoint(),
            self.enabled
        )
    }

    /// Check that the stream can be turned into a pipeline
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !is_valid_id(&self.id) {
            return Err(ValidationError::InvalidValue {
                field: "id",
                reason: format!(
                    "'{}' may only contain letters, digits, '-' and '_'",
                    self.id
                ),
            });
        }

        self.stream_kind()?;

        let address = self
            .multicast_address
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .ok_or(ValidationError::MissingField("multicastAddress"))?;
        address
            .parse::<IpAddr>()
            .map_err(|_| ValidationError::InvalidValue {
                field: "multicastAddress",
                reason: format!("'{}' is not an IP address", address),
            })?;

        match self.port {
            None => return Err(ValidationError::MissingField("port")),
            Some(0) => {
                return Err(ValidationError::InvalidValue {
                    field: "port",
                    reason: "port must be non-zero".into(),
                })
            }
            Some(_) => {}
        }

        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(ValidationError::InvalidValue {
                field: "channels",
                reason: format!("must be between 1 and {}", MAX_CHANNELS),
            });
        }

        if self.format.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "format",
                reason: "must not be empty".into(),
            });
        }

        Ok(())
    }

    /// Merge a partial update into this stream
    ///
    /// Shallow overwrite of every field present in `patch`. The ID is never
    /// changed, even if the patch carries one.
    pub fn apply_patch(&mut self, patch: StreamPatch) {
        let StreamPatch {
            id: _,
            kind,
            multicast_address,
            port,
            device,
            network_interface,
            channels,
            format,
            buffer_time_micros,
            latency_time_micros,
            sync_to_clock,
            loopback_test,
            enabled,
        } = patch;

        if kind.is_some() {
            self.kind = kind;
        }
        if multicast_address.is_some() {
            self.multicast_address = multicast_address;
        }
        if port.is_some() {
            self.port = port;
        }
        if device.is_some() {
            self.device = device;
        }
        if network_interface.is_some() {
            self.network_interface = network_interface;
        }
        if let Some(channels) = channels {
            self.channels = channels;
        }
        if let Some(format) = format {
            self.format = format;
        }
        if let Some(v) = buffer_time_micros {
            self.buffer_time_micros = v;
        }
        if let Some(v) = latency_time_micros {
            self.latency_time_micros = v;
        }
        if let Some(v) = sync_to_clock {
            self.sync_to_clock = v;
        }
        if let Some(v) = loopback_test {
            self.loopback_test = v;
        }
        if let Some(v) = enabled {
            self.enabled = v;
        }
    }
}

/// Partial stream update
///
/// Absent fields leave the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamPatch {
    /// Ignored by the merge; IDs are immutable once assigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<StreamKind>,
    #[serde(default, alias = "ip", skip_serializing_if = "Option::is_none")]
    pub multicast_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, alias = "iface", skip_serializing_if = "Option::is_none")]
    pub network_interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, alias = "buffer_time", skip_serializing_if = "Option::is_none")]
    pub buffer_time_micros: Option<u64>,
    #[serde(default, alias = "latency_time", skip_serializing_if = "Option::is_none")]
    pub latency_time_micros: Option<u64>,
    #[serde(default, alias = "sync", skip_serializing_if = "Option::is_none")]
    pub sync_to_clock: Option<bool>,
    #[serde(default, alias = "loopback", skip_serializing_if = "Option::is_none")]
    pub loopback_test: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl StreamPatch {
    /// Decode a partial stream document
    pub fn from_json(bytes: &[u8]) -> Result<Self, ValidationError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied_on_decode() {
        let config = StreamConfig::from_json(
            br#"{"kind":"sender","multicastAddress":"239.69.0.1","port":5004}"#,
        )
        .unwrap();

        assert!(config.id.is_empty());
        assert!(config.enabled);
        assert_eq!(config.channels, 2);
        assert_eq!(config.format, "S24BE");
        assert_eq!(config.buffer_time_micros, 100_000);
        assert_eq!(config.latency_time_micros, 5_000_000);
        assert!(!config.sync_to_clock);
        assert!(!config.loopback_test);
    }

    #[test]
    fn test_legacy_keys_accepted() {
        let config = StreamConfig::from_json(
            br#"{"id":"a","kind":"receiver","ip":"239.1.1.1","iface":"eth0","port":5004,
                "buffer_time":2000,"latency_time":1000,"sync":true,"loopback":true}"#,
        )
        .unwrap();

        assert_eq!(config.multicast_address.as_deref(), Some("239.1.1.1"));
        assert_eq!(config.network_interface.as_deref(), Some("eth0"));
        assert_eq!(config.buffer_time_micros, 2000);
        assert_eq!(config.latency_time_micros, 1000);
        assert!(config.sync_to_clock);
        assert!(config.loopback_test);

        let written = serde_json::to_value(&config).unwrap();
        assert_eq!(written["multicastAddress"], "239.1.1.1");
        assert!(written.get("ip").is_none());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result = StreamConfig::from_json(br#"{"kind":"relay"}"#);
        assert!(matches!(result, Err(ValidationError::Malformed(_))));

        let parsed = "relay".parse::<StreamKind>();
        assert_eq!(parsed, Err(ValidationError::UnknownKind("relay".into())));
        assert_eq!("sender".parse::<StreamKind>(), Ok(StreamKind::Sender));
    }

    #[test]
    fn test_validate_required_fields() {
        let mut config = StreamConfig::default();
        assert_eq!(config.validate(), Err(ValidationError::MissingField("kind")));

        config.kind = Some(StreamKind::Sender);
        assert_eq!(
            config.validate(),
            Err(ValidationError::MissingField("multicastAddress"))
        );

        config.multicast_address = Some("239.69.0.1".into());
        assert_eq!(config.validate(), Err(ValidationError::MissingField("port")));

        config.port = Some(5004);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_addr = StreamConfig::new(StreamKind::Sender, "not-an-ip", 5004);
        assert!(matches!(
            bad_addr.validate(),
            Err(ValidationError::InvalidValue { field: "multicastAddress", .. })
        ));

        let zero_port = StreamConfig::new(StreamKind::Sender, "239.1.1.1", 0);
        assert!(matches!(
            zero_port.validate(),
            Err(ValidationError::InvalidValue { field: "port", .. })
        ));

        let no_channels = StreamConfig::new(StreamKind::Sender, "239.1.1.1", 5004).channels(0);
        assert!(matches!(
            no_channels.validate(),
            Err(ValidationError::InvalidValue { field: "channels", .. })
        ));

        let bad_id = StreamConfig::new(StreamKind::Sender, "239.1.1.1", 5004).with_id("../etc");
        assert!(matches!(
            bad_id.validate(),
            Err(ValidationError::InvalidValue { field: "id", .. })
        ));
    }

    #[test]
    fn test_apply_patch_preserves_untouched_fields() {
        let mut config = StreamConfig::new(StreamKind::Sender, "239.69.0.1", 5004)
            .with_id("s-1")
            .device("hw:0,0");

        let patch = StreamPatch::from_json(br#"{"id":"other","format":"S32LE","channels":8}"#)
            .unwrap();
        config.apply_patch(patch);

        assert_eq!(config.id, "s-1");
        assert_eq!(config.format, "S32LE");
        assert_eq!(config.channels, 8);
        assert_eq!(config.multicast_address.as_deref(), Some("239.69.0.1"));
        assert_eq!(config.device.as_deref(), Some("hw:0,0"));
        assert_eq!(config.port, Some(5004));
    }

    #[test]
    fn test_summary() {
        let config = StreamConfig::new(StreamKind::Receiver, "239.1.1.1", 5004).enabled(false);

        assert_eq!(
            config.summary(),
            "receiver device=default endpoint=239.1.1.1:5004 enabled=false"
        );
    }
}
