//! ALSA device string normalization

/// Namespace prefix for raw hardware devices
pub const HW_PREFIX: &str = "hw:";

/// Normalize a device reference for `alsasrc`/`alsasink`
///
/// - `default` passes through
/// - anything already containing `:` is assumed fully qualified
/// - a bare card name gets the `hw:` prefix
pub fn format_device(device: &str) -> String {
    if device == "default" || device.contains(':') {
        device.to_string()
    } else {
        format!("{}{}", HW_PREFIX, device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_passes_through() {
        assert_eq!(format_device("default"), "default");
    }

    #[test]
    fn test_bare_card_gets_prefix() {
        assert_eq!(format_device("card0"), "hw:card0");
        assert_eq!(format_device("sndrpihifiberry"), "hw:sndrpihifiberry");
    }

    #[test]
    fn test_qualified_device_unchanged() {
        assert_eq!(format_device("plughw:1,0"), "plughw:1,0");
        assert_eq!(format_device("hw:0,0"), "hw:0,0");
    }
}
