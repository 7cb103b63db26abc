//! Identifier generation.

use uuid::Uuid;

/// Generate a batch identifier of the form `batch_<16 hex chars>`.
#[must_use]
pub fn generate_batch_id() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("batch_{}", &raw[..16])
}

/// Generate a generic record identifier.
#[must_use]
pub fn generate_record_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a worker identifier, e.g. `worker-3f2a9c1b`.
#[must_use]
pub fn generate_worker_id(prefix: &str) -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &raw[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_id_has_prefix_and_hex_suffix() {
        let id = generate_batch_id();
        assert!(id.starts_with("batch_"));
        let suffix = &id["batch_".len()..];
        assert_eq!(suffix.len(), 16);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_batch_ids_are_unique() {
        assert_ne!(generate_batch_id(), generate_batch_id());
    }
}
