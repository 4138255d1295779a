use crate::step::Step;

/// A predicate deciding whether the agent loop should stop after a step.
///
/// Conditions must be pure and deterministic over `(step_count,
/// last_step)`: the loop may evaluate them at any point and expects the
/// same answer for the same inputs.
pub trait StopCondition: Send + Sync {
    /// `step_count` is the number of completed steps (1 after the first
    /// step); `last_step` is the step that just finished.
    fn is_met(&self, step_count: usize, last_step: &Step) -> bool;
}

impl<F> StopCondition for F
where
    F: Fn(usize, &Step) -> bool + Send + Sync,
{
    fn is_met(&self, step_count: usize, last_step: &Step) -> bool {
        self(step_count, last_step)
    }
}

/// Stops once `n` steps have completed.
#[derive(Debug, Clone, Copy)]
pub struct MaxSteps {
    max: usize,
}

impl StopCondition for MaxSteps {
    fn is_met(&self, step_count: usize, _last_step: &Step) -> bool {
        step_count >= self.max
    }
}

/// Stop after at most `n` steps.
pub fn max_steps(n: usize) -> MaxSteps {
    MaxSteps { max: n }
}

/// Stops when the most recent step produced zero tool calls.
#[derive(Debug, Clone, Copy)]
pub struct NoMoreTools;

impl StopCondition for NoMoreTools {
    fn is_met(&self, _step_count: usize, last_step: &Step) -> bool {
        last_step.tool_calls.is_empty()
    }
}

/// Stop when the model answers without requesting tools.
pub fn no_more_tools() -> NoMoreTools {
    NoMoreTools
}

/// Stops once the named tool appears among the last step's calls.
#[derive(Debug, Clone)]
pub struct UntilToolSeen {
    tool_name: String,
}

impl StopCondition for UntilToolSeen {
    fn is_met(&self, _step_count: usize, last_step: &Step) -> bool {
        last_step
            .tool_calls
            .iter()
            .any(|call| call.name == self.tool_name)
    }
}

/// Stop once the model has called the named tool.
pub fn until_tool_seen(tool_name: impl Into<String>) -> UntilToolSeen {
    UntilToolSeen {
        tool_name: tool_name.into(),
    }
}

/// Disjunction: stops when any inner condition is met.
pub struct AnyOf {
    conditions: Vec<Box<dyn StopCondition>>,
}

impl StopCondition for AnyOf {
    fn is_met(&self, step_count: usize, last_step: &Step) -> bool {
        self.conditions
            .iter()
            .any(|condition| condition.is_met(step_count, last_step))
    }
}

/// Combine conditions; the loop stops as soon as one of them is met.
pub fn any_of(conditions: Vec<Box<dyn StopCondition>>) -> AnyOf {
    AnyOf { conditions }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyllm_provider::ToolCall;

    fn step_with_calls(names: &[&str]) -> Step {
        let calls = names
            .iter()
            .enumerate()
            .map(|(i, name)| ToolCall::new(format!("call_{i}"), *name, "{}"))
            .collect();
        Step::new(0, "text".to_string(), calls, Vec::new())
    }

    #[test]
    fn test_max_steps() {
        let condition = max_steps(3);
        let step = step_with_calls(&[]);
        assert!(!condition.is_met(2, &step));
        assert!(condition.is_met(3, &step));
        assert!(condition.is_met(4, &step));
    }

    #[test]
    fn test_no_more_tools() {
        let condition = no_more_tools();
        assert!(condition.is_met(1, &step_with_calls(&[])));
        assert!(!condition.is_met(1, &step_with_calls(&["calculator"])));
    }

    #[test]
    fn test_until_tool_seen() {
        let condition = until_tool_seen("final_answer");
        assert!(!condition.is_met(1, &step_with_calls(&["search"])));
        assert!(condition.is_met(2, &step_with_calls(&["search", "final_answer"])));
    }

    #[test]
    fn test_any_of_is_disjunctive() {
        let condition = any_of(vec![
            Box::new(max_steps(5)),
            Box::new(until_tool_seen("done")),
        ]);
        assert!(!condition.is_met(1, &step_with_calls(&["search"])));
        assert!(condition.is_met(1, &step_with_calls(&["done"])));
        assert!(condition.is_met(5, &step_with_calls(&["search"])));
    }

    #[test]
    fn test_function_condition() {
        fn wants_stop(count: usize, step: &Step) -> bool {
            count > 1 && step.text.contains("stop")
        }
        let condition: &dyn StopCondition = &wants_stop;
        let mut step = step_with_calls(&[]);
        step.text = "please stop".to_string();
        assert!(condition.is_met(2, &step));
        assert!(!condition.is_met(1, &step));
    }
}
