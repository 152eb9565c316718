//! Time and identity helpers for modqueue
//!
//! All timestamps stored by modqueue are Unix milliseconds.

use chrono::Utc;
use uuid::Uuid;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Generate a random secondary identity (UUID v4)
///
/// Example: `3f2b8c1e-9a4d-4e2f-b6c1-0d9e8f7a6b5c`
pub fn generate_uuid() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_returns_reasonable_timestamp() {
        let ts = now_ms();
        // Should be after 2020-01-01 and before 2100-01-01
        assert!(ts > 1577836800000);
        assert!(ts < 4102444800000);
    }

    #[test]
    fn test_generate_uuid_format() {
        let id = generate_uuid();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[4].len(), 12);
        assert!(parts[2].starts_with('4'));
        assert!(id.chars().all(|c| c == '-' || c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_uuid_is_v4() {
        let id = Uuid::parse_str(&generate_uuid()).unwrap();
        assert_eq!(id.get_version_num(), 4);
    }

    #[test]
    fn test_generate_uuid_uniqueness() {
        assert_ne!(generate_uuid(), generate_uuid());
    }
}
