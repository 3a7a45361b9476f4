use uuid::Uuid;

use super::{Evaluator, Runtime, RuntimeContext, RuntimeError};

/// Embeds a third-party page, tagging the URL with the attempt's token so the
/// page's callbacks can be traced back to a user and puzzle.
#[derive(Clone, Copy, Debug, Default)]
pub struct IFrameRuntime;

impl Evaluator for IFrameRuntime {
    fn evaluate(&self, script: &str, ctx: &mut RuntimeContext) -> Result<String, RuntimeError> {
        let url = script.trim();
        let token = ctx.token.unwrap_or_else(Uuid::new_v4);
        let separator = if url.contains('?') { '&' } else { '?' };
        let src = format!("{url}{separator}token={token}").replace('"', "%22");
        Ok(format!("<iframe class=\"puzzle-frame\" src=\"{src}\"></iframe>"))
    }

    fn validate_guess(&self, _validator: &str, _guess: &str, _ctx: &RuntimeContext) -> Result<bool, RuntimeError> {
        Err(RuntimeError::NotImplemented { runtime: Runtime::IFrame, operation: "validate_guess" })
    }
}
