//! Sandboxed Lua 5.4.
//!
//! Each call gets a fresh interpreter with a small whitelisted environment, a
//! memory cap and an instruction budget. Reading any global outside the
//! whitelist aborts the script with [`RuntimeError::SandboxViolation`]; the
//! violation is sticky, so a script that catches it with `pcall` still fails.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use mlua::{ChunkMode, Error as LuaError, HookTriggers, Lua, LuaOptions, LuaSerdeExt, MultiValue, StdLib, Table, Value as LuaValue};
use serde_json::Value;

use super::{Evaluator, RuntimeContext, RuntimeError};
use crate::config::SandboxConfig;

const SAFE_GLOBALS: &[&str] =
    &["_VERSION", "assert", "error", "ipairs", "next", "pairs", "pcall", "select", "tonumber", "tostring", "type", "xpcall"];

const SAFE_LIBRARIES: &[(&str, &[&str])] = &[
    ("string", &["byte", "char", "find", "format", "gmatch", "gsub", "len", "lower", "match", "rep", "reverse", "sub", "upper"]),
    ("table", &["concat", "insert", "move", "pack", "remove", "sort", "unpack"]),
    (
        "math",
        &[
            "abs", "ceil", "cos", "deg", "exp", "floor", "fmod", "huge", "log", "max", "maxinteger", "min", "mininteger", "modf", "pi",
            "rad", "random", "sin", "sqrt", "tan", "tointeger", "type", "ult",
        ],
    ),
    ("utf8", &["char", "charpattern", "codepoint", "codes", "len", "offset"]),
    ("os", &["clock", "date", "difftime", "time"]),
];

const TEAM_PUZZLE_DATA: &str = "team_puzzle_data";
const USER_PUZZLE_DATA: &str = "user_puzzle_data";
const TEAM_DATA: &str = "team_data";
const USER_DATA: &str = "user_data";
const GUESS: &str = "guess";

#[derive(Clone, Debug, Default)]
pub struct LuaRuntime {
    config: SandboxConfig,
}

/// Flags shared between the interpreter hooks and the caller.
#[derive(Default)]
struct Tripwires {
    instructions: AtomicU64,
    instruction_limit_hit: AtomicBool,
    violation: Mutex<Option<String>>,
}

impl Tripwires {
    fn record_violation(&self, identifier: String) {
        let mut slot = self.violation.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.get_or_insert(identifier);
    }

    fn violation(&self) -> Option<String> {
        self.violation.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

/// A parameter handed to the script. Data blobs are presented as tables even when empty.
enum Parameter<'a> {
    Text(&'a str),
    Data(Option<&'a Value>),
}

impl LuaRuntime {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn interpreter(&self) -> Result<Lua, RuntimeError> {
        let libs = StdLib::STRING | StdLib::TABLE | StdLib::MATH | StdLib::UTF8 | StdLib::OS;
        let lua = Lua::new_with(libs, LuaOptions::new()).map_err(|e| RuntimeError::Internal(e.to_string()))?;
        // Strings share the host's string table as their metatable; bytecode dumping stays off.
        {
            let string: Table = lua.globals().raw_get("string").map_err(internal)?;
            string.raw_set("dump", LuaValue::Nil).map_err(internal)?;
        }
        Ok(lua)
    }

    fn environment<'lua>(
        &self,
        lua: &'lua Lua,
        parameters: &[(&'static str, Parameter<'_>)],
        tripwires: &Arc<Tripwires>,
    ) -> Result<Table<'lua>, RuntimeError> {
        let globals = lua.globals();
        let env = lua.create_table().map_err(internal)?;
        for name in SAFE_GLOBALS {
            let value: LuaValue = globals.raw_get(*name).map_err(internal)?;
            env.raw_set(*name, value).map_err(internal)?;
        }
        for (library, members) in SAFE_LIBRARIES {
            let source: Table = globals.raw_get(*library).map_err(internal)?;
            let copy = lua.create_table().map_err(internal)?;
            for member in members.iter() {
                let value: LuaValue = source.raw_get(*member).map_err(internal)?;
                copy.raw_set(*member, value).map_err(internal)?;
            }
            env.raw_set(*library, copy).map_err(internal)?;
        }

        for (name, parameter) in parameters {
            let existing: LuaValue = env.raw_get(*name).map_err(internal)?;
            if !existing.is_nil() {
                return Err(RuntimeError::ParameterOverride(name.to_string()));
            }
            let value = match parameter {
                Parameter::Text(text) => LuaValue::String(lua.create_string(text).map_err(internal)?),
                Parameter::Data(Some(data)) if !data.is_null() => lua.to_value(data).map_err(internal)?,
                Parameter::Data(_) => LuaValue::Table(lua.create_table().map_err(internal)?),
            };
            env.raw_set(*name, value).map_err(internal)?;
        }

        // Parameters may be set to nil by the script; reading them back afterwards is fine.
        let declared: BTreeSet<&'static str> = parameters.iter().map(|(name, _)| *name).collect();
        let tripwires = Arc::clone(tripwires);
        let guard = lua.create_table().map_err(internal)?;
        let index = lua
            .create_function(move |_, (_env, key): (Table, LuaValue)| {
                let identifier = match &key {
                    LuaValue::String(s) => s.to_string_lossy().into_owned(),
                    other => format!("<{}>", other.type_name()),
                };
                if declared.contains(identifier.as_str()) {
                    return Ok(LuaValue::Nil);
                }
                tripwires.record_violation(identifier.clone());
                Err(LuaError::RuntimeError(format!("access to {identifier:?} is not permitted")))
            })
            .map_err(internal)?;
        guard.raw_set("__index", index).map_err(internal)?;
        env.set_metatable(Some(guard));
        Ok(env)
    }

    fn install_limits(&self, lua: &Lua, tripwires: &Arc<Tripwires>) -> Result<(), RuntimeError> {
        let granularity = self.config.hook_granularity;
        let limit = self.config.instruction_limit;
        let hook_tripwires = Arc::clone(tripwires);
        lua.set_hook(HookTriggers::new().every_nth_instruction(granularity), move |_lua, _debug| {
            let executed = hook_tripwires.instructions.fetch_add(u64::from(granularity), Ordering::Relaxed) + u64::from(granularity);
            if executed > limit {
                hook_tripwires.instruction_limit_hit.store(true, Ordering::Relaxed);
                return Err(LuaError::RuntimeError("instruction limit exceeded".to_string()));
            }
            Ok(())
        });
        // The budget covers what the script allocates, not the environment built above.
        lua.set_memory_limit(lua.used_memory() + self.config.memory_limit).map_err(internal)?;
        Ok(())
    }

    /// Runs `script` and hands the return values and the final environment to `finish`.
    fn run<R>(
        &self,
        script: &str,
        parameters: &[(&'static str, Parameter<'_>)],
        finish: impl for<'lua> FnOnce(&'lua Lua, MultiValue<'lua>, Table<'lua>) -> Result<R, RuntimeError>,
    ) -> Result<R, RuntimeError> {
        let lua = self.interpreter()?;
        let tripwires = Arc::new(Tripwires::default());
        let env = self.environment(&lua, parameters, &tripwires)?;

        let function = lua
            .load(script)
            .set_name("=script")
            .set_mode(ChunkMode::Text)
            .set_environment(env.clone())
            .into_function()
            .map_err(|e| self.classify(e, &tripwires))?;

        self.install_limits(&lua, &tripwires)?;
        let outcome = function.call::<_, MultiValue>(());
        lua.remove_hook();

        let values = outcome.map_err(|e| self.classify(e, &tripwires))?;
        if let Some(identifier) = tripwires.violation() {
            return Err(RuntimeError::SandboxViolation { identifier });
        }
        if tripwires.instruction_limit_hit.load(Ordering::Relaxed) {
            return Err(RuntimeError::InstructionLimitExceeded { limit: self.config.instruction_limit });
        }
        // Let the write-back below allocate freely.
        lua.set_memory_limit(0).map_err(internal)?;
        finish(&lua, values, env)
    }

    fn classify(&self, err: LuaError, tripwires: &Tripwires) -> RuntimeError {
        if let Some(identifier) = tripwires.violation() {
            return RuntimeError::SandboxViolation { identifier };
        }
        if tripwires.instruction_limit_hit.load(Ordering::Relaxed) {
            return RuntimeError::InstructionLimitExceeded { limit: self.config.instruction_limit };
        }
        match root_cause(&err) {
            LuaError::SyntaxError { message, .. } => RuntimeError::Syntax(message.clone()),
            LuaError::MemoryError(_) => RuntimeError::MemoryLimitExceeded { limit: self.config.memory_limit },
            LuaError::RuntimeError(message) => RuntimeError::Execution(message.clone()),
            other => {
                warn!("lua sandbox failed outside the script: {other}");
                RuntimeError::Internal(other.to_string())
            }
        }
    }
}

impl Evaluator for LuaRuntime {
    /// The first return value, a string or number, is the rendered content. Any
    /// changes the script made to the data tables are written back into `ctx`.
    fn evaluate(&self, script: &str, ctx: &mut RuntimeContext) -> Result<String, RuntimeError> {
        let parameters = [
            (TEAM_PUZZLE_DATA, Parameter::Data(ctx.team_puzzle_data.as_ref())),
            (USER_PUZZLE_DATA, Parameter::Data(ctx.user_puzzle_data.as_ref())),
            (TEAM_DATA, Parameter::Data(ctx.team_data.as_ref())),
            (USER_DATA, Parameter::Data(ctx.user_data.as_ref())),
        ];
        let (content, written) = self.run(script, &parameters, |lua, values, env| {
            let first = values.into_iter().next().ok_or(RuntimeError::NoReturnValue)?;
            let content = match first {
                LuaValue::String(s) => s.to_string_lossy().into_owned(),
                LuaValue::Integer(i) => i.to_string(),
                LuaValue::Number(n) => n.to_string(),
                LuaValue::Nil => return Err(RuntimeError::NoReturnValue),
                other => return Err(RuntimeError::Execution(format!("script returned a {} instead of text", other.type_name()))),
            };
            let mut written = Vec::with_capacity(4);
            for name in [TEAM_PUZZLE_DATA, USER_PUZZLE_DATA, TEAM_DATA, USER_DATA] {
                let value: LuaValue = env.raw_get(name).map_err(internal)?;
                let json = if value.is_nil() {
                    Value::Null
                } else {
                    lua.from_value::<Value>(value)
                        .map_err(|e| RuntimeError::Execution(format!("{name} cannot be stored: {e}")))?
                };
                written.push(json);
            }
            Ok((content, written))
        })?;

        let slots = [&mut ctx.team_puzzle_data, &mut ctx.user_puzzle_data, &mut ctx.team_data, &mut ctx.user_data];
        for (slot, after) in slots.into_iter().zip(written) {
            let after = normalize_blob(slot.as_ref(), after);
            if slot.as_ref().unwrap_or(&Value::Null) != &after {
                debug!("lua script updated a data blob");
                *slot = Some(after);
            }
        }
        Ok(content)
    }

    /// Lua truthiness of the first return value decides correctness.
    fn validate_guess(&self, validator: &str, guess: &str, ctx: &RuntimeContext) -> Result<bool, RuntimeError> {
        let parameters = [
            (GUESS, Parameter::Text(guess)),
            (TEAM_PUZZLE_DATA, Parameter::Data(ctx.team_puzzle_data.as_ref())),
            (TEAM_DATA, Parameter::Data(ctx.team_data.as_ref())),
        ];
        self.run(validator, &parameters, |_lua, values, _env| {
            let first = values.into_iter().next().ok_or(RuntimeError::NoReturnValue)?;
            Ok(!matches!(first, LuaValue::Nil | LuaValue::Boolean(false)))
        })
    }

    fn check_script(&self, script: &str) -> Result<(), RuntimeError> {
        let lua = Lua::new_with(StdLib::NONE, LuaOptions::new()).map_err(|e| RuntimeError::Internal(e.to_string()))?;
        lua.load(script)
            .set_name("=script")
            .set_mode(ChunkMode::Text)
            .into_function()
            .map(|_| ())
            .map_err(|e| match root_cause(&e) {
                LuaError::SyntaxError { message, .. } => RuntimeError::Syntax(message.clone()),
                other => RuntimeError::Internal(other.to_string()),
            })
    }
}

fn internal(err: LuaError) -> RuntimeError {
    RuntimeError::Internal(err.to_string())
}

fn root_cause(err: &LuaError) -> &LuaError {
    match err {
        LuaError::CallbackError { cause, .. } => root_cause(cause.as_ref()),
        other => other,
    }
}

/// Lua cannot tell an empty object from an empty array, and absent blobs were
/// handed in as empty tables; an empty result keeps the shape it came in with.
fn normalize_blob(before: Option<&Value>, after: Value) -> Value {
    let empty = match &after {
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    };
    if !empty {
        return after;
    }
    match before {
        None | Some(Value::Null) => Value::Null,
        Some(Value::Array(_)) => Value::Array(Vec::new()),
        Some(_) => Value::Object(Default::default()),
    }
}
