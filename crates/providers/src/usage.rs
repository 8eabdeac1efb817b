use crate::traits::Usage;
use serde::{Deserialize, Serialize};

/// Cumulative token usage and cost for a session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub requests: usize,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
}

impl TokenUsage {
    pub fn with_pricing(input_cost_per_1k: f64, output_cost_per_1k: f64) -> Self {
        Self {
            input_cost_per_1k,
            output_cost_per_1k,
            ..Self::default()
        }
    }

    pub fn add(&mut self, usage: Usage) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.requests += 1;
    }

    pub fn total_tokens(&self) -> usize {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn cost(&self) -> f64 {
        (self.prompt_tokens as f64 / 1000.0) * self.input_cost_per_1k
            + (self.completion_tokens as f64 / 1000.0) * self.output_cost_per_1k
    }

    pub fn summary(&self) -> String {
        let mut line = format!(
            "Tokens: {} prompt + {} completion = {} total over {} requests",
            self.prompt_tokens,
            self.completion_tokens,
            self.total_tokens(),
            self.requests
        );
        if self.input_cost_per_1k > 0.0 || self.output_cost_per_1k > 0.0 {
            line.push_str(&format!(" (${:.4})", self.cost()));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_and_prices() {
        let mut usage = TokenUsage::with_pricing(0.5, 1.5);
        usage.add(Usage::new(1000, 200));
        usage.add(Usage::new(1000, 200));
        assert_eq!(usage.total_tokens(), 2400);
        assert_eq!(usage.requests, 2);
        assert!((usage.cost() - (1.0 + 0.6)).abs() < 1e-9);
        assert!(usage.summary().contains("$1.6000"));
    }

    #[test]
    fn test_summary_without_pricing() {
        let mut usage = TokenUsage::default();
        usage.add(Usage::new(3, 4));
        assert_eq!(
            usage.summary(),
            "Tokens: 3 prompt + 4 completion = 7 total over 1 requests"
        );
    }
}
