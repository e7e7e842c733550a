use crate::comm::{CommChannel, Message, MessageKind};
use crate::context::{VariableName, VariableValue};
use mlua::{HookTriggers, Lua, LuaOptions, StdLib, Value, VmState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Instructions executed between watchdog invocations. Lua gets through this
/// many in well under a millisecond, which keeps abort latency bounded even
/// for a busy loop.
pub(crate) const HOOK_INSTRUCTION_INTERVAL: u32 = 1_000;

const SLEEP_TICK: Duration = Duration::from_millis(5);

/// How a script run ended. Deadline and termination flags win over the raw
/// evaluation result, so a `pcall` in the script cannot mask an abort.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptOutcome {
    /// The script ran to completion; carries the logical result derived
    /// from its final value.
    Finished(bool),
    Terminated,
    TimedOut,
    Failed(String),
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
enum Interrupt {
    #[error("script timed out")]
    Timeout,
    #[error("sequence termination requested")]
    Terminated,
}

/// One embedded Lua environment, alive for a single step execution. Opens
/// only the safe library subset: base plus `string`, `table` and `math`.
/// No filesystem, process, network, loader or debug facilities.
pub struct ScriptHost {
    lua: Lua,
    terminated: Arc<AtomicBool>,
    timed_out: Arc<AtomicBool>,
}

impl ScriptHost {
    pub fn new() -> mlua::Result<Self> {
        let lua = Lua::new_with(
            StdLib::STRING | StdLib::TABLE | StdLib::MATH,
            LuaOptions::default(),
        )?;
        // The base library bundles file loaders; strip them.
        let globals = lua.globals();
        globals.set("dofile", Value::Nil)?;
        globals.set("loadfile", Value::Nil)?;
        drop(globals);
        Ok(Self {
            lua,
            terminated: Arc::new(AtomicBool::new(false)),
            timed_out: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The raw environment, handed to context setup hooks.
    pub fn environment(&self) -> &Lua {
        &self.lua
    }

    /// Registers `terminate_sequence()`, `sleep(ms)` and `print(...)`.
    pub fn install_commands(
        &self,
        comm: Option<Arc<dyn CommChannel>>,
        step_index: usize,
        deadline: Option<Instant>,
    ) -> mlua::Result<()> {
        let globals = self.lua.globals();

        let terminated = Arc::clone(&self.terminated);
        let terminate = self.lua.create_function(move |_, ()| {
            terminated.store(true, Ordering::Relaxed);
            Ok(())
        })?;
        globals.set("terminate_sequence", terminate)?;

        let terminated = Arc::clone(&self.terminated);
        let timed_out = Arc::clone(&self.timed_out);
        let sleep_comm = comm.clone();
        let sleep = self.lua.create_function(move |_, ms: u64| {
            let mut remaining = Duration::from_millis(ms);
            loop {
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    timed_out.store(true, Ordering::Relaxed);
                    return Err(mlua::Error::external(Interrupt::Timeout));
                }
                if terminated.load(Ordering::Relaxed)
                    || sleep_comm
                        .as_ref()
                        .is_some_and(|comm| comm.termination_requested())
                {
                    terminated.store(true, Ordering::Relaxed);
                    return Err(mlua::Error::external(Interrupt::Terminated));
                }
                if remaining.is_zero() {
                    return Ok(());
                }
                let tick = remaining.min(SLEEP_TICK);
                thread::sleep(tick);
                remaining = remaining.saturating_sub(tick);
            }
        })?;
        globals.set("sleep", sleep)?;

        let print = self.lua.create_function(move |_, values: mlua::Variadic<Value>| {
            if let Some(comm) = &comm {
                let text = values
                    .iter()
                    .map(display_value)
                    .collect::<Vec<_>>()
                    .join("\t");
                comm.send(Message::for_step(MessageKind::StepOutput, text, step_index));
            }
            Ok(())
        })?;
        globals.set("print", print)?;

        Ok(())
    }

    /// Arms the instruction-count hook enforcing the wall-clock deadline,
    /// the local termination flag and inbound termination requests.
    pub fn install_watchdog(&self, comm: Option<Arc<dyn CommChannel>>, deadline: Option<Instant>) {
        let terminated = Arc::clone(&self.terminated);
        let timed_out = Arc::clone(&self.timed_out);
        self.lua.set_hook(
            HookTriggers {
                every_nth_instruction: Some(HOOK_INSTRUCTION_INTERVAL),
                ..HookTriggers::default()
            },
            move |_lua, _debug| {
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    timed_out.store(true, Ordering::Relaxed);
                    return Err(mlua::Error::external(Interrupt::Timeout));
                }
                if comm
                    .as_ref()
                    .is_some_and(|comm| comm.termination_requested())
                {
                    terminated.store(true, Ordering::Relaxed);
                }
                if terminated.load(Ordering::Relaxed) {
                    return Err(mlua::Error::external(Interrupt::Terminated));
                }
                Ok(VmState::Continue)
            },
        );
    }

    /// Binds a context value as a global, preserving the numeric subtype.
    pub fn set_variable(&self, name: &VariableName, value: &VariableValue) -> mlua::Result<()> {
        let globals = self.lua.globals();
        match value {
            VariableValue::Integer(value) => globals.set(name.as_str(), *value),
            VariableValue::Float(value) => globals.set(name.as_str(), *value),
            VariableValue::String(value) => globals.set(name.as_str(), value.as_str()),
        }
    }

    /// Reads a global back as a typed value. Lua integers stay integers;
    /// booleans, tables and functions are not exportable and yield `None`.
    pub fn variable(&self, name: &VariableName) -> Option<VariableValue> {
        let value: Value = self.lua.globals().get(name.as_str()).ok()?;
        match value {
            Value::Integer(value) => Some(VariableValue::Integer(value)),
            Value::Number(value) => Some(VariableValue::Float(value)),
            Value::String(value) => Some(VariableValue::String(value.to_string_lossy().to_string())),
            _ => None,
        }
    }

    /// Runs the script under the installed hooks and classifies the outcome.
    pub fn eval(&self, script: &str, chunk_name: &str) -> ScriptOutcome {
        let result = self.lua.load(script).set_name(chunk_name).eval::<Value>();
        if self.timed_out.load(Ordering::Relaxed) {
            return ScriptOutcome::TimedOut;
        }
        if self.terminated.load(Ordering::Relaxed) {
            return ScriptOutcome::Terminated;
        }
        match result {
            Ok(value) => ScriptOutcome::Finished(logical_result(&value)),
            Err(error) => ScriptOutcome::Failed(error.to_string()),
        }
    }
}

/// Boolean reading of a script's final value: booleans count as themselves,
/// numbers as nonzero, strings as non-empty, nil and nothing as false, and
/// anything else follows Lua truthiness.
fn logical_result(value: &Value) -> bool {
    match value {
        Value::Nil => false,
        Value::Boolean(value) => *value,
        Value::Integer(value) => *value != 0,
        Value::Number(value) => *value != 0.0,
        Value::String(value) => !value.as_bytes().is_empty(),
        _ => true,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(value) => value.to_string(),
        Value::Integer(value) => value.to_string(),
        Value::Number(value) => value.to_string(),
        Value::String(value) => value.to_string_lossy().to_string(),
        other => other.type_name().to_string(),
    }
}
