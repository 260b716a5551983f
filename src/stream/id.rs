//! Stream identifier generation

use std::collections::HashSet;

use uuid::Uuid;

/// Prefix carried by every generated stream ID
pub const STREAM_ID_PREFIX: &str = "s-";

/// Generate a fresh short stream ID (`s-` + 8 hex chars)
pub fn generate_stream_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}{}", STREAM_ID_PREFIX, &hex[..8])
}

/// Generate an ID not present in `taken`
pub fn generate_unique_id(taken: &HashSet<String>) -> String {
    loop {
        let id = generate_stream_id();
        if !taken.contains(&id) {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_id_shape() {
        let id = generate_stream_id();

        assert!(id.starts_with(STREAM_ID_PREFIX));
        assert_eq!(id.len(), STREAM_ID_PREFIX.len() + 8);
        assert!(id[2..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_unique_id_avoids_taken() {
        let mut taken = HashSet::new();
        for _ in 0..64 {
            let id = generate_unique_id(&taken);
            assert!(!taken.contains(&id));
            taken.insert(id);
        }
        assert_eq!(taken.len(), 64);
    }
}
