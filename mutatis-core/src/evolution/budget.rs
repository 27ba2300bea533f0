//! Per-session cap on schema evolutions.

use serde::{Deserialize, Serialize};

/// Counts evolutions performed in the current session.
///
/// Owned by the caller and passed to the engine on every run. It starts at
/// zero and only [`reset`](EvolutionBudget::reset) brings it back there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvolutionBudget {
    cap: u32,
    used: u32,
}

impl EvolutionBudget {
    pub fn new(cap: u32) -> Self {
        Self { cap, used: 0 }
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn remaining(&self) -> u32 {
        self.cap.saturating_sub(self.used)
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.cap
    }

    /// Record one completed evolution.
    pub(crate) fn consume(&mut self) {
        self.used = self.used.saturating_add(1);
    }

    /// Start a new session.
    pub fn reset(&mut self) {
        self.used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_exhausts_at_cap() {
        let mut budget = EvolutionBudget::new(3);
        for _ in 0..3 {
            assert!(!budget.is_exhausted());
            budget.consume();
        }
        assert!(budget.is_exhausted());
        assert_eq!(budget.remaining(), 0);

        budget.reset();
        assert_eq!(budget.used(), 0);
        assert_eq!(budget.remaining(), 3);
    }

    #[test]
    fn test_zero_cap_blocks_everything() {
        assert!(EvolutionBudget::new(0).is_exhausted());
    }
}
