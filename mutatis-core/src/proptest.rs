//! Property-based tests for confidence accumulation and ranking.
//!
//! These tests check the numeric guarantees callers rely on:
//!
//! - Accumulated confidence never decreases and never exceeds the cap
//! - Tier gravity orders foundational above transient within the stated bound
//! - Index search is deterministic and sorted
