//! Token budget tracking for autonomous runs.

use std::collections::BTreeSet;

use sage_core::AgentBudgetLevel;

/// What changed after recording usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BudgetCheck {
    /// Levels crossed for the first time, lowest first.
    pub new_warnings: Vec<AgentBudgetLevel>,
    pub exceeded: bool,
}

#[derive(Debug, Clone)]
pub struct TokenBudget {
    budget: usize,
    medium: f32,
    high: f32,
    used: usize,
    warned: BTreeSet<AgentBudgetLevel>,
}

impl TokenBudget {
    pub fn new(budget: usize, medium: f32, high: f32) -> Self {
        Self {
            budget,
            medium,
            high,
            used: 0,
            warned: BTreeSet::new(),
        }
    }

    pub fn record(&mut self, tokens: usize) {
        self.used = self.used.saturating_add(tokens);
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn is_exceeded(&self) -> bool {
        self.used > self.budget
    }

    /// Report newly crossed warning levels; each level is reported once.
    pub fn check(&mut self) -> BudgetCheck {
        let fraction = if self.budget == 0 {
            f32::INFINITY
        } else {
            self.used as f32 / self.budget as f32
        };

        let mut new_warnings = Vec::new();
        for (level, threshold) in [
            (AgentBudgetLevel::Medium, self.medium),
            (AgentBudgetLevel::High, self.high),
        ] {
            if fraction >= threshold && self.warned.insert(level) {
                new_warnings.push(level);
            }
        }
        BudgetCheck {
            new_warnings,
            exceeded: self.is_exceeded(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warnings_fire_once_per_level() {
        let mut b = TokenBudget::new(1000, 0.5, 0.8);
        b.record(400);
        assert!(b.check().new_warnings.is_empty());

        b.record(100);
        assert_eq!(b.check().new_warnings, vec![AgentBudgetLevel::Medium]);
        b.record(10);
        assert!(b.check().new_warnings.is_empty());

        b.record(400);
        let check = b.check();
        assert_eq!(check.new_warnings, vec![AgentBudgetLevel::High]);
        assert!(!check.exceeded);
    }

    #[test]
    fn test_jump_past_both_levels() {
        let mut b = TokenBudget::new(100, 0.5, 0.8);
        b.record(150);
        let check = b.check();
        assert_eq!(
            check.new_warnings,
            vec![AgentBudgetLevel::Medium, AgentBudgetLevel::High]
        );
        assert!(check.exceeded);
    }

    #[test]
    fn test_exactly_at_budget_is_not_exceeded() {
        let mut b = TokenBudget::new(100, 0.5, 0.8);
        b.record(100);
        assert!(!b.check().exceeded);
        b.record(1);
        assert!(b.is_exceeded());
    }
}
