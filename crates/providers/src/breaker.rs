//! Tool-loop circuit breaker.
//!
//! Termination is data, not control flow: the loop consults
//! [`BreakerState::check`] before every model call and stops with an
//! explicit reason. Tool results are tracked append-only; repetition is
//! byte-equality on the serialized result.

/// Why the tool loop was halted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakReason {
    MaxIterations,
    ToolError(String),
    RepeatedResults,
}

impl BreakReason {
    pub fn message(&self) -> String {
        match self {
            BreakReason::MaxIterations => "maximum iterations reached".into(),
            BreakReason::ToolError(e) => format!("Tool error: {e}"),
            BreakReason::RepeatedResults => "Repeated identical results".into(),
        }
    }
}

pub struct BreakerState {
    max_iterations: u32,
    iterations: u32,
    results: Vec<String>,
    last_error: Option<String>,
}

impl BreakerState {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            iterations: 0,
            results: Vec::new(),
            last_error: None,
        }
    }

    /// Consulted before each model call. `None` means proceed.
    pub fn check(&self) -> Option<BreakReason> {
        if self.iterations >= self.max_iterations {
            return Some(BreakReason::MaxIterations);
        }
        if let Some(error) = &self.last_error {
            return Some(BreakReason::ToolError(error.clone()));
        }
        if self.results.len() >= 2 {
            let [a, b] = &self.results[self.results.len() - 2..] else {
                unreachable!()
            };
            if a.as_bytes() == b.as_bytes() {
                return Some(BreakReason::RepeatedResults);
            }
        }
        None
    }

    pub fn record_iteration(&mut self) {
        self.iterations += 1;
    }

    pub fn record_result(&mut self, serialized: &str) {
        self.results.push(serialized.to_string());
    }

    pub fn record_error(&mut self, error: &str) {
        self.last_error = Some(error.to_string());
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_allows_first_iteration() {
        let breaker = BreakerState::new(3);
        assert_eq!(breaker.check(), None);
    }

    #[test]
    fn exactly_max_iterations_completes_then_breaks() {
        let mut breaker = BreakerState::new(3);
        for i in 0..3 {
            assert_eq!(breaker.check(), None, "iteration {i} should proceed");
            breaker.record_iteration();
            breaker.record_result(&format!("distinct result {i}"));
        }
        // The max_iterations+1'th attempt is refused.
        assert_eq!(breaker.check(), Some(BreakReason::MaxIterations));
    }

    #[test]
    fn two_consecutive_identical_results_break_on_the_second() {
        let mut breaker = BreakerState::new(10);
        breaker.record_iteration();
        breaker.record_result("same output");
        assert_eq!(breaker.check(), None);

        breaker.record_iteration();
        breaker.record_result("same output");
        assert_eq!(breaker.check(), Some(BreakReason::RepeatedResults));
    }

    #[test]
    fn identical_but_not_consecutive_results_pass() {
        let mut breaker = BreakerState::new(10);
        for result in ["a", "b", "a"] {
            breaker.record_iteration();
            breaker.record_result(result);
        }
        assert_eq!(breaker.check(), None);
    }

    #[test]
    fn tool_error_breaks_next_check() {
        let mut breaker = BreakerState::new(10);
        breaker.record_iteration();
        breaker.record_error("exec failed: no such file");
        match breaker.check() {
            Some(BreakReason::ToolError(msg)) => assert!(msg.contains("no such file")),
            other => panic!("expected ToolError, got {other:?}"),
        }
    }

    #[test]
    fn repetition_is_byte_equality() {
        let mut breaker = BreakerState::new(10);
        breaker.record_result("result ");
        breaker.record_result("result"); // trailing space differs
        assert_eq!(breaker.check(), None);
    }
}
