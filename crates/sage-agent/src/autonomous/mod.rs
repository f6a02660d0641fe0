//! Autonomous mode: plan a request into tasks, run them in order under a
//! token budget, and summarize the results.

mod budget;
mod executor;
mod planner;

pub use budget::{BudgetCheck, TokenBudget};
pub use executor::{
    compute_stats, fallback_summary, parse_confidence, AgentExecutor, AgentRequest,
    AgentRunOutcome,
};
pub use planner::{fallback_plan, parse_plan, Planner};

use sage_core::defaults;

/// Limits for one autonomous run.
///
/// # Environment Variables
///
/// - `AGENT_MAX_TASKS`: Tasks accepted from a plan (default: 8)
/// - `AGENT_TOKEN_BUDGET`: Token ceiling per run (default: 50000)
/// - `AGENT_BUDGET_MEDIUM`: Fraction for the medium warning (default: 0.5)
/// - `AGENT_BUDGET_HIGH`: Fraction for the high warning (default: 0.8)
/// - `AGENT_REVIEW_THRESHOLD`: Confidence below which a task needs review (default: 0.6)
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub max_tasks: usize,
    pub token_budget: usize,
    pub budget_medium: f32,
    pub budget_high: f32,
    pub review_threshold: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tasks: defaults::AGENT_MAX_TASKS,
            token_budget: defaults::AGENT_TOKEN_BUDGET,
            budget_medium: defaults::AGENT_BUDGET_MEDIUM,
            budget_high: defaults::AGENT_BUDGET_HIGH,
            review_threshold: defaults::AGENT_REVIEW_THRESHOLD,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let base = Self::default();
        fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
        }

        Self {
            max_tasks: parsed::<usize>("AGENT_MAX_TASKS")
                .unwrap_or(base.max_tasks)
                .max(1),
            token_budget: parsed("AGENT_TOKEN_BUDGET").unwrap_or(base.token_budget),
            budget_medium: parsed("AGENT_BUDGET_MEDIUM").unwrap_or(base.budget_medium),
            budget_high: parsed("AGENT_BUDGET_HIGH").unwrap_or(base.budget_high),
            review_threshold: parsed("AGENT_REVIEW_THRESHOLD").unwrap_or(base.review_threshold),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let c = AgentConfig::default();
        assert_eq!(c.max_tasks, 8);
        assert_eq!(c.token_budget, 50_000);
        assert!(c.budget_medium < c.budget_high);
    }
}
