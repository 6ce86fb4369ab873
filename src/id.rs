//! Prefixed ID generation for Paygate entities.
//!
//! All IDs use a `pg_` brand prefix so gateway identifiers can never collide
//! with identifiers issued by downstream processors or merchants.
//!
//! Format: `pg_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// All known entity prefixes for validation.
const ALL_PREFIXES: &[&str] = &[
    "pg_pay_",
    "pg_re_",
    "pg_wh_",
    "pg_evt_",
    "pg_job_",
    "pg_key_",
];

/// Validate that a string is a valid Paygate prefixed ID.
///
/// Cheap format check to reject garbage before hitting the database.
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Entity types that have prefixed IDs in Paygate.
#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Payment,
    Refund,
    Webhook,
    Event,
    Job,
    IdempotencyKey,
}

impl EntityType {
    /// Returns the prefix for this entity type.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Payment => "pg_pay",
            Self::Refund => "pg_re",
            Self::Webhook => "pg_wh",
            Self::Event => "pg_evt",
            Self::Job => "pg_job",
            Self::IdempotencyKey => "pg_key",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_format() {
        let id = EntityType::Payment.gen_id();
        assert!(id.starts_with("pg_pay_"));
        // pg_pay_ (7 chars) + 32 hex chars
        assert_eq!(id.len(), 39);
    }

    #[test]
    fn test_all_prefixes_unique() {
        let prefixes = [
            EntityType::Payment.prefix(),
            EntityType::Refund.prefix(),
            EntityType::Webhook.prefix(),
            EntityType::Event.prefix(),
            EntityType::Job.prefix(),
            EntityType::IdempotencyKey.prefix(),
        ];

        let mut seen = std::collections::HashSet::new();
        for prefix in prefixes {
            assert!(seen.insert(prefix), "Duplicate prefix found: {}", prefix);
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let id1 = EntityType::Event.gen_id();
        let id2 = EntityType::Event.gen_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_is_valid_prefixed_id() {
        assert!(is_valid_prefixed_id("pg_pay_a1b2c3d4e5f6789012345678901234ab"));
        assert!(is_valid_prefixed_id("pg_evt_00000000000000000000000000000000"));
        assert!(is_valid_prefixed_id(&EntityType::Refund.gen_id()));
        assert!(is_valid_prefixed_id(&EntityType::Webhook.gen_id()));

        assert!(!is_valid_prefixed_id(""));
        assert!(!is_valid_prefixed_id("a1b2c3d4-e5f6-7890-1234-567890123456"));
        assert!(!is_valid_prefixed_id("pg_unknown_a1b2c3d4e5f6789012345678901234ab"));
        assert!(!is_valid_prefixed_id("pg_pay_a1b2c3d4"));
        assert!(!is_valid_prefixed_id("pg_pay_a1b2c3d4e5f6789012345678901234gg"));
        assert!(!is_valid_prefixed_id("pay_a1b2c3d4e5f6789012345678901234ab"));
    }
}
