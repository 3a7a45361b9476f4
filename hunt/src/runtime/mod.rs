//! Pluggable evaluators for puzzle content and guess validators.
//!
//! Every answer, unlock answer and puzzle field carries a [`Runtime`] tag. The
//! [`RuntimeRegistry`] maps the tag to one of a fixed set of implementations that
//! share the [`Evaluator`] interface. Each implementation is stateless; the Lua
//! runtime builds a fresh interpreter for every call.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::SandboxConfig;

mod iframe;
#[cfg(feature = "lua")]
mod lua;
mod regex;
mod static_text;

pub use iframe::IFrameRuntime;
#[cfg(feature = "lua")]
pub use lua::LuaRuntime;
pub use regex::RegexRuntime;
pub use static_text::StaticRuntime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Runtime {
    #[serde(rename = "I")]
    IFrame,
    #[serde(rename = "L")]
    Lua,
    #[serde(rename = "R")]
    Regex,
    #[serde(rename = "S")]
    Static,
}

impl Runtime {
    pub const ALL: [Runtime; 4] = [Runtime::IFrame, Runtime::Lua, Runtime::Regex, Runtime::Static];

    /// Single-character tag used in stored definitions.
    pub const fn tag(self) -> char {
        match self {
            Runtime::IFrame => 'I',
            Runtime::Lua => 'L',
            Runtime::Regex => 'R',
            Runtime::Static => 'S',
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Runtime::IFrame => "IFrame",
            Runtime::Lua => "Lua",
            Runtime::Regex => "Regex",
            Runtime::Static => "Static",
        }
    }

    /// Whether guesses can be checked against this runtime. IFrame content only renders.
    pub const fn can_validate(self) -> bool {
        !matches!(self, Runtime::IFrame)
    }

    /// Whether the stored script is meaningful to show to an author as the answer itself.
    pub const fn is_printable(self) -> bool {
        matches!(self, Runtime::Regex | Runtime::Static)
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Runtime {
    type Err = RuntimeError;

    /// Accepts the stored tag (`"L"`) or the name in any case (`"lua"`).
    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        Runtime::ALL
            .into_iter()
            .find(|runtime| {
                let mut chars = tag.chars();
                let is_tag = chars.next() == Some(runtime.tag()) && chars.next().is_none();
                is_tag || runtime.name().eq_ignore_ascii_case(tag)
            })
            .ok_or_else(|| RuntimeError::UnknownRuntime(tag.to_string()))
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("unknown runtime {0:?}")]
    UnknownRuntime(String),
    #[error("{runtime} runtime does not support {operation}")]
    NotImplemented { runtime: Runtime, operation: &'static str },
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("script failed: {0}")]
    Execution(String),
    #[error("script exceeded its instruction limit of {limit}")]
    InstructionLimitExceeded { limit: u64 },
    #[error("script exceeded its memory limit of {limit} bytes")]
    MemoryLimitExceeded { limit: usize },
    #[error("script tried to reach {identifier:?} outside the sandbox")]
    SandboxViolation { identifier: String },
    #[error("parameter {0:?} overrides the sandbox environment")]
    ParameterOverride(String),
    #[error("script did not return a value")]
    NoReturnValue,
    #[error("sandbox internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// True when a validator or evaluator broke while running, as opposed to a
    /// definition or configuration problem. Malfunctions must never be read as
    /// "guess incorrect".
    pub fn is_malfunction(&self) -> bool {
        matches!(
            self,
            RuntimeError::Execution(_)
                | RuntimeError::InstructionLimitExceeded { .. }
                | RuntimeError::MemoryLimitExceeded { .. }
                | RuntimeError::SandboxViolation { .. }
                | RuntimeError::NoReturnValue
                | RuntimeError::Internal(_)
        )
    }
}

/// Data visible to a script. Evaluation may write the blobs back; validation
/// only reads them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RuntimeContext {
    pub team_puzzle_data: Option<Value>,
    pub user_puzzle_data: Option<Value>,
    pub team_data: Option<Value>,
    pub user_data: Option<Value>,
    /// Correlation token of the user's attempt, used by the iframe runtime.
    pub token: Option<Uuid>,
}

/// The shared two-operation interface of every runtime.
pub trait Evaluator {
    /// Render content from `script`.
    fn evaluate(&self, script: &str, ctx: &mut RuntimeContext) -> Result<String, RuntimeError>;

    /// Decide whether `guess` satisfies `validator`.
    fn validate_guess(&self, validator: &str, guess: &str, ctx: &RuntimeContext) -> Result<bool, RuntimeError>;

    /// Definition-time check; runs nothing.
    fn check_script(&self, _script: &str) -> Result<(), RuntimeError> {
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct RuntimeRegistry {
    static_text: StaticRuntime,
    regex: RegexRuntime,
    iframe: IFrameRuntime,
    #[cfg(feature = "lua")]
    lua: LuaRuntime,
    #[cfg(not(feature = "lua"))]
    lua: Unavailable,
}

impl RuntimeRegistry {
    pub fn new(sandbox: SandboxConfig) -> Self {
        Self {
            static_text: StaticRuntime,
            regex: RegexRuntime,
            iframe: IFrameRuntime,
            #[cfg(feature = "lua")]
            lua: LuaRuntime::new(sandbox),
            #[cfg(not(feature = "lua"))]
            lua: {
                let _ = sandbox;
                Unavailable(Runtime::Lua)
            },
        }
    }

    pub fn runtime_for(&self, runtime: Runtime) -> &dyn Evaluator {
        match runtime {
            Runtime::Static => &self.static_text,
            Runtime::Regex => &self.regex,
            Runtime::IFrame => &self.iframe,
            Runtime::Lua => &self.lua,
        }
    }

    pub fn evaluate(&self, runtime: Runtime, script: &str, ctx: &mut RuntimeContext) -> Result<String, RuntimeError> {
        self.runtime_for(runtime).evaluate(script, ctx)
    }

    pub fn validate_guess(
        &self,
        runtime: Runtime,
        validator: &str,
        guess: &str,
        ctx: &RuntimeContext,
    ) -> Result<bool, RuntimeError> {
        self.runtime_for(runtime).validate_guess(validator, guess, ctx)
    }

    pub fn check_script(&self, runtime: Runtime, script: &str) -> Result<(), RuntimeError> {
        self.runtime_for(runtime).check_script(script)
    }

    /// Definition-time check for an answer or unlock answer: the runtime must be
    /// able to validate, and the script must compile.
    pub fn check_validator(&self, runtime: Runtime, validator: &str) -> Result<(), RuntimeError> {
        if !runtime.can_validate() {
            return Err(RuntimeError::NotImplemented { runtime, operation: "validate_guess" });
        }
        self.check_script(runtime, validator)
    }

    /// Dispatch on a raw stored tag. Unknown tags are a configuration error.
    pub fn evaluate_tagged(&self, tag: &str, script: &str, ctx: &mut RuntimeContext) -> Result<String, RuntimeError> {
        self.evaluate(tag.parse()?, script, ctx)
    }

    pub fn validate_tagged(&self, tag: &str, validator: &str, guess: &str, ctx: &RuntimeContext) -> Result<bool, RuntimeError> {
        self.validate_guess(tag.parse()?, validator, guess, ctx)
    }
}

#[cfg(not(feature = "lua"))]
#[derive(Clone, Copy, Debug)]
struct Unavailable(Runtime);

#[cfg(not(feature = "lua"))]
impl Default for Unavailable {
    fn default() -> Self {
        Unavailable(Runtime::Lua)
    }
}

#[cfg(not(feature = "lua"))]
impl Evaluator for Unavailable {
    fn evaluate(&self, _script: &str, _ctx: &mut RuntimeContext) -> Result<String, RuntimeError> {
        Err(RuntimeError::NotImplemented { runtime: self.0, operation: "evaluate" })
    }

    fn validate_guess(&self, _validator: &str, _guess: &str, _ctx: &RuntimeContext) -> Result<bool, RuntimeError> {
        Err(RuntimeError::NotImplemented { runtime: self.0, operation: "validate_guess" })
    }

    fn check_script(&self, _script: &str) -> Result<(), RuntimeError> {
        Err(RuntimeError::NotImplemented { runtime: self.0, operation: "check_script" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_and_names_parse() {
        assert_eq!("S".parse::<Runtime>().unwrap(), Runtime::Static);
        assert_eq!("R".parse::<Runtime>().unwrap(), Runtime::Regex);
        assert_eq!("lua".parse::<Runtime>().unwrap(), Runtime::Lua);
        assert_eq!("IFrame".parse::<Runtime>().unwrap(), Runtime::IFrame);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let registry = RuntimeRegistry::default();
        let err = registry.validate_tagged("X", "answer", "answer", &RuntimeContext::default()).unwrap_err();
        assert_eq!(err, RuntimeError::UnknownRuntime("X".to_string()));
        assert!(!err.is_malfunction());
        assert!("SS".parse::<Runtime>().is_err());
    }

    #[test]
    fn registry_dispatches_by_tag() {
        let registry = RuntimeRegistry::default();
        let ctx = RuntimeContext::default();
        assert!(registry.validate_tagged("S", "answer", "answer", &ctx).unwrap());
        assert!(registry.validate_tagged("R", "ans.*", "answer", &ctx).unwrap());
        let mut ctx = RuntimeContext::default();
        assert_eq!(registry.evaluate_tagged("S", "Hello  World!", &mut ctx).unwrap(), "Hello  World!");
    }

    #[test]
    fn serde_uses_stored_tags() {
        assert_eq!(serde_json::to_string(&Runtime::Lua).unwrap(), "\"L\"");
        let parsed: Runtime = serde_json::from_str("\"R\"").unwrap();
        assert_eq!(parsed, Runtime::Regex);
    }

    #[test]
    fn iframe_cannot_define_a_validator() {
        let registry = RuntimeRegistry::default();
        assert!(matches!(
            registry.check_validator(Runtime::IFrame, "https://example.com/puzzle"),
            Err(RuntimeError::NotImplemented { runtime: Runtime::IFrame, .. })
        ));
        assert!(registry.check_validator(Runtime::Static, "owl").is_ok());
        assert!(matches!(registry.check_validator(Runtime::Regex, "[Rr"), Err(RuntimeError::Syntax(_))));
        // Still fine as page content.
        assert!(registry.check_script(Runtime::IFrame, "https://example.com/puzzle").is_ok());
    }
}
