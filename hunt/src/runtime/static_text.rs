use super::{Evaluator, RuntimeContext, RuntimeError};

/// Exact, case-sensitive text.
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticRuntime;

impl Evaluator for StaticRuntime {
    fn evaluate(&self, script: &str, _ctx: &mut RuntimeContext) -> Result<String, RuntimeError> {
        Ok(script.to_string())
    }

    fn validate_guess(&self, validator: &str, guess: &str, _ctx: &RuntimeContext) -> Result<bool, RuntimeError> {
        Ok(validator == guess)
    }
}
