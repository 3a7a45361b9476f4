use regex::Regex;

use super::{Evaluator, Runtime, RuntimeContext, RuntimeError};

/// Full-string regular expression match.
#[derive(Clone, Copy, Debug, Default)]
pub struct RegexRuntime;

impl RegexRuntime {
    fn compile(pattern: &str) -> Result<Regex, RuntimeError> {
        // The bare pattern is compiled first so an unbalanced group cannot escape the anchors below.
        Regex::new(pattern).map_err(|e| RuntimeError::Syntax(e.to_string()))?;
        Regex::new(&format!("^(?:{pattern})$")).map_err(|e| RuntimeError::Syntax(e.to_string()))
    }
}

impl Evaluator for RegexRuntime {
    fn evaluate(&self, _script: &str, _ctx: &mut RuntimeContext) -> Result<String, RuntimeError> {
        Err(RuntimeError::NotImplemented { runtime: Runtime::Regex, operation: "evaluate" })
    }

    fn validate_guess(&self, validator: &str, guess: &str, _ctx: &RuntimeContext) -> Result<bool, RuntimeError> {
        Ok(Self::compile(validator)?.is_match(guess))
    }

    fn check_script(&self, script: &str) -> Result<(), RuntimeError> {
        Self::compile(script).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluate_is_unsupported() {
        let err = RegexRuntime.evaluate(".*", &mut RuntimeContext::default()).unwrap_err();
        assert!(matches!(err, RuntimeError::NotImplemented { runtime: Runtime::Regex, .. }));
    }

    #[test]
    fn validate_matches_whole_guess() {
        let ctx = RuntimeContext::default();
        assert!(RegexRuntime.validate_guess(r"Hello \w*!", "Hello Planet!", &ctx).unwrap());
        assert!(!RegexRuntime.validate_guess(r"Hello \w*!", "Goodbye World!", &ctx).unwrap());
        assert!(!RegexRuntime.validate_guess(r"Hello", "Hello Planet!", &ctx).unwrap());
        assert!(!RegexRuntime.validate_guess(r"Planet!", "Hello Planet!", &ctx).unwrap());
    }

    #[test]
    fn alternation_is_anchored_as_a_whole() {
        let ctx = RuntimeContext::default();
        assert!(RegexRuntime.validate_guess("cat|dog", "dog", &ctx).unwrap());
        assert!(!RegexRuntime.validate_guess("cat|dog", "catalogue", &ctx).unwrap());
    }

    #[test]
    fn malformed_pattern_is_a_syntax_error() {
        let ctx = RuntimeContext::default();
        assert!(matches!(RegexRuntime.validate_guess("[Rr", "R", &ctx), Err(RuntimeError::Syntax(_))));
        assert!(matches!(RegexRuntime.check_script("[Rr"), Err(RuntimeError::Syntax(_))));
        assert!(matches!(RegexRuntime.check_script("a)|(b"), Err(RuntimeError::Syntax(_))));
        assert!(RegexRuntime.check_script(r"[Rr]ed").is_ok());
    }
}
