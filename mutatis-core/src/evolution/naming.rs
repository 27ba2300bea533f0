//! Identifier validation and relation naming.
//!
//! Every name interpolated into DDL goes through this module. Pattern types
//! must be lower-case snake identifiers; the evolved relation for a pattern
//! type is always `<pattern_type>_evolved`, so two entities sharing a pattern
//! type share one relation (rows are told apart by the `entity` column).
//! Shadow names add a timestamp and a process-wide sequence number, which
//! keeps them unique within and across sessions.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

/// Suffix appended to a pattern type to name its evolved relation.
pub const EVOLVED_SUFFIX: &str = "_evolved";

const MAX_IDENTIFIER_LEN: usize = 63;

static IDENTIFIER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("invalid regex"));

static ENTITY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\p{L}\p{N}][\p{L}\p{N} '.\-]*$").expect("invalid regex"));

static SHADOW_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Check that `name` is safe to splice into DDL.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.len() > MAX_IDENTIFIER_LEN || !IDENTIFIER_PATTERN.is_match(name) {
        return Err(Error::validation(format!("invalid identifier '{}'", name)));
    }
    Ok(())
}

/// Check that an entity is lower-cased, trimmed and plainly spelled.
pub fn validate_entity(entity: &str, max_len: usize) -> Result<()> {
    if entity.is_empty()
        || entity.chars().count() > max_len
        || entity != entity.trim()
        || entity.chars().any(char::is_uppercase)
        || !ENTITY_PATTERN.is_match(entity)
    {
        return Err(Error::validation(format!("invalid entity '{}'", entity)));
    }
    Ok(())
}

/// Canonical relation name for a pattern type.
pub fn evolved_table_name(pattern_type: &str) -> Result<String> {
    let name = format!("{}{}", pattern_type, EVOLVED_SUFFIX);
    validate_identifier(pattern_type)?;
    validate_identifier(&name)?;
    Ok(name)
}

/// Collision-free shadow name for a target relation.
pub fn shadow_table_name(target: &str, at: DateTime<Utc>) -> Result<String> {
    let sequence = SHADOW_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let name = format!(
        "{}_shadow_{}_{}",
        target,
        at.timestamp_micros().unsigned_abs(),
        sequence
    );
    if name.len() > MAX_IDENTIFIER_LEN {
        // Keep the unique tail, drop the readable head
        let tail = format!("shadow_{}_{}", at.timestamp_micros().unsigned_abs(), sequence);
        return Ok(format!("s{}", tail));
    }
    validate_identifier(&name)?;
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evolved_table_name() {
        assert_eq!(
            evolved_table_name("family_spouse").unwrap(),
            "family_spouse_evolved"
        );
    }

    #[test]
    fn test_rejects_injection() {
        assert!(evolved_table_name("x; DROP TABLE generic_memories").is_err());
        assert!(evolved_table_name("Family").is_err());
        assert!(evolved_table_name("").is_err());
        assert!(evolved_table_name("9lives").is_err());
        assert!(validate_identifier(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_entity_validation() {
        assert!(validate_entity("sara", 64).is_ok());
        assert!(validate_entity("acme corp", 64).is_ok());
        assert!(validate_entity("o'brien", 64).is_ok());
        assert!(validate_entity("zoë", 64).is_ok());
        assert!(validate_entity("zoË", 64).is_err());
        assert!(validate_entity("Sara", 64).is_err());
        assert!(validate_entity(" sara", 64).is_err());
        assert!(validate_entity("sara; --", 64).is_err());
        assert!(validate_entity("", 64).is_err());
        assert!(validate_entity("abcdef", 5).is_err());
    }

    #[test]
    fn test_shadow_names_never_collide() {
        let at = Utc::now();
        let first = shadow_table_name("family_spouse_evolved", at).unwrap();
        let second = shadow_table_name("family_spouse_evolved", at).unwrap();

        assert_ne!(first, second);
        assert!(first.starts_with("family_spouse_evolved_shadow_"));
        assert!(validate_identifier(&first).is_ok());
    }

    #[test]
    fn test_long_target_gets_short_shadow() {
        let target = format!("{}_evolved", "p".repeat(50));
        let shadow = shadow_table_name(&target, Utc::now()).unwrap();
        assert!(validate_identifier(&shadow).is_ok());
    }
}
