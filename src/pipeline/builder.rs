//! Pipeline description builder
//!
//! Turns a `StreamConfig` into the argument vector handed to the transport
//! launcher. Pure: no I/O, identical input always yields identical output.

use std::fmt;

use crate::stream::{StreamConfig, StreamKind, ValidationError};

use super::device::format_device;

/// Sample rate used on the wire (AES67 mandates 48 kHz support)
pub const NETWORK_SAMPLE_RATE: u32 = 48_000;

/// Payloader MTU
pub const RTP_MTU: u32 = 1200;

/// DSCP marking for media packets (AF41)
pub const AUDIO_DSCP: u8 = 34;

/// Receiver jitter buffer latency in milliseconds
pub const JITTER_BUFFER_MS: u32 = 20;

/// Flags passed to the launcher before the pipeline
pub const LAUNCHER_FLAGS: &[&str] = &["-e"];

/// RTP linear PCM payload encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadEncoding {
    /// 16-bit linear PCM
    L16,
    /// 24-bit linear PCM
    L24,
}

impl PayloadEncoding {
    /// Pick the wire encoding for a local sample format
    pub fn for_format(format: &str) -> Self {
        if format.to_ascii_uppercase().starts_with("S16") {
            PayloadEncoding::L16
        } else {
            PayloadEncoding::L24
        }
    }

    /// Encoding name as used in RTP caps
    pub fn name(&self) -> &'static str {
        match self {
            PayloadEncoding::L16 => "L16",
            PayloadEncoding::L24 => "L24",
        }
    }

    /// Raw sample format the payloader consumes
    pub fn raw_format(&self) -> &'static str {
        match self {
            PayloadEncoding::L16 => "S16BE",
            PayloadEncoding::L24 => "S24BE",
        }
    }
}

/// An executable transport pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDescription {
    kind: StreamKind,
    args: Vec<String>,
}

impl PipelineDescription {
    /// Build the pipeline for a stream
    ///
    /// Fails with a `ValidationError` if the stream lacks topology fields.
    pub fn build(config: &StreamConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        let kind = config.stream_kind()?;

        let elements = match kind {
            StreamKind::Sender => sender_elements(config),
            StreamKind::Receiver => receiver_elements(config),
        };

        let mut args = Vec::new();
        for (i, element) in elements.into_iter().enumerate() {
            if i > 0 {
                args.push("!".to_string());
            }
            args.extend(element);
        }

        Ok(Self { kind, args })
    }

    /// Stream direction this pipeline implements
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Pipeline arguments, one launcher argv entry each
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Full launcher command line with shell-safe quoting
    pub fn command_line(&self, launcher: &str) -> String {
        let mut parts = vec![quote_arg(launcher)];
        parts.extend(LAUNCHER_FLAGS.iter().map(|f| f.to_string()));
        parts.extend(self.args.iter().map(|a| quote_arg(a)));
        parts.join(" ")
    }
}

impl fmt::Display for PipelineDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.args.join(" "))
    }
}

fn sender_elements(config: &StreamConfig) -> Vec<Vec<String>> {
    let encoding = PayloadEncoding::for_format(&config.format);
    let channels = config.channels;

    let mut sink = vec![
        "udpsink".to_string(),
        format!("host={}", config.multicast_address.as_deref().unwrap_or_default()),
        format!("port={}", config.port.unwrap_or_default()),
    ];
    if let Some(iface) = config.network_interface.as_deref() {
        sink.push(format!("multicast-iface={}", iface));
    }
    sink.push(format!("qos-dscp={}", AUDIO_DSCP));
    sink.push(format!("sync={}", config.sync_to_clock));
    sink.push("async=false".to_string());

    vec![
        vec![
            "alsasrc".to_string(),
            format!("device={}", format_device(config.device_or_default())),
            format!("buffer-time={}", config.buffer_time_micros),
            format!("latency-time={}", config.latency_time_micros),
        ],
        vec![raw_caps(&config.format, channels)],
        vec!["audioconvert".to_string()],
        vec!["audioresample".to_string()],
        vec![raw_caps(encoding.raw_format(), channels)],
        vec![
            format!("rtp{}pay", encoding.name()),
            format!("mtu={}", RTP_MTU),
        ],
        sink,
    ]
}

fn receiver_elements(config: &StreamConfig) -> Vec<Vec<String>> {
    let encoding = PayloadEncoding::for_format(&config.format);
    let channels = config.channels;

    let mut source = vec![
        "udpsrc".to_string(),
        format!(
            "address={}",
            config.multicast_address.as_deref().unwrap_or_default()
        ),
        format!("port={}", config.port.unwrap_or_default()),
    ];
    if let Some(iface) = config.network_interface.as_deref() {
        source.push(format!("multicast-iface={}", iface));
    }
    source.push(format!(
        "caps=application/x-rtp,media=audio,clock-rate={},encoding-name={},channels={}",
        NETWORK_SAMPLE_RATE,
        encoding.name(),
        channels
    ));

    vec![
        source,
        vec![
            "rtpjitterbuffer".to_string(),
            format!("latency={}", JITTER_BUFFER_MS),
            "mode=slave".to_string(),
        ],
        vec![format!("rtp{}depay", encoding.name())],
        vec!["audioconvert".to_string()],
        vec!["audioresample".to_string()],
        vec![raw_caps(&config.format, channels)],
        vec![
            "alsasink".to_string(),
            format!("device={}", format_device(config.device_or_default())),
            format!("buffer-time={}", config.buffer_time_micros),
            format!("latency-time={}", config.latency_time_micros),
            format!("sync={}", config.sync_to_clock),
        ],
    ]
}

fn raw_caps(format: &str, channels: u32) -> String {
    format!(
        "audio/x-raw,format={},rate={},channels={}",
        format, NETWORK_SAMPLE_RATE, channels
    )
}

fn quote_arg(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-.,:/=+@%!".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> StreamConfig {
        StreamConfig::new(StreamKind::Sender, "239.69.0.1", 5004)
            .with_id("s-1")
            .device("hw:0,0")
            .interface("eth0")
    }

    #[test]
    fn test_sender_pipeline() {
        let pipeline = PipelineDescription::build(&sender()).unwrap();
        let text = pipeline.to_string();

        assert_eq!(pipeline.kind(), StreamKind::Sender);
        assert!(text.starts_with("alsasrc device=hw:0,0 buffer-time=100000 latency-time=5000000 !"));
        assert!(text.contains("audioconvert ! audioresample"));
        assert!(text.contains("rtpL24pay mtu=1200"));
        assert!(text.contains("udpsink host=239.69.0.1 port=5004 multicast-iface=eth0 qos-dscp=34"));
        assert!(text.ends_with("sync=false async=false"));
    }

    #[test]
    fn test_receiver_pipeline() {
        let config = StreamConfig::new(StreamKind::Receiver, "239.1.1.1", 5004)
            .device("default")
            .interface("eth0");
        let text = PipelineDescription::build(&config).unwrap().to_string();

        assert!(text.starts_with("udpsrc address=239.1.1.1 port=5004 multicast-iface=eth0"));
        assert!(text.contains("encoding-name=L24,channels=2"));
        assert!(text.contains("rtpjitterbuffer latency=20 mode=slave ! rtpL24depay"));
        assert!(text.contains("alsasink device=default"));
    }

    #[test]
    fn test_s16_uses_l16() {
        let config = sender().format("S16LE");
        let text = PipelineDescription::build(&config).unwrap().to_string();

        assert!(text.contains("audio/x-raw,format=S16LE,rate=48000,channels=2"));
        assert!(text.contains("audio/x-raw,format=S16BE,rate=48000,channels=2 ! rtpL16pay"));
    }

    #[test]
    fn test_interface_optional() {
        let mut config = sender();
        config.network_interface = None;
        let text = PipelineDescription::build(&config).unwrap().to_string();

        assert!(!text.contains("multicast-iface"));
    }

    #[test]
    fn test_device_normalized_in_pipeline() {
        let text = PipelineDescription::build(&sender().device("sndrpihifiberry"))
            .unwrap()
            .to_string();
        assert!(text.contains("device=hw:sndrpihifiberry"));

        let text = PipelineDescription::build(&sender().device("plughw:1,0"))
            .unwrap()
            .to_string();
        assert!(text.contains("device=plughw:1,0"));
    }

    #[test]
    fn test_deterministic() {
        let a = PipelineDescription::build(&sender()).unwrap();
        let b = PipelineDescription::build(&sender()).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_missing_kind_fails() {
        let mut config = sender();
        config.kind = None;

        assert_eq!(
            PipelineDescription::build(&config),
            Err(ValidationError::MissingField("kind"))
        );
    }

    #[test]
    fn test_command_line_quoting() {
        let pipeline = PipelineDescription::build(&sender()).unwrap();
        let line = pipeline.command_line("/usr/bin/gst-launch-1.0");

        assert!(line.starts_with("/usr/bin/gst-launch-1.0 -e alsasrc"));
        assert_eq!(quote_arg("it's here"), "'it'\\''s here'");
        assert_eq!(quote_arg("mode=slave"), "mode=slave");
    }
}
