use crate::comm::{post, CommChannel, Message, MessageKind};
use crate::context::{Context, VariableName};
use crate::script::{ScriptHost, ScriptOutcome};
use crate::shared::time;
use chrono::{DateTime, Local};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Deepest block nesting rendered by indentation. Levels are display
/// metadata only.
pub const MAX_INDENTATION_LEVEL: usize = 20;

/// Control-flow role of a step within its sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepType {
    Action,
    If,
    Elseif,
    Else,
    While,
    Try,
    Catch,
    End,
}

impl StepType {
    pub fn as_str(self) -> &'static str {
        match self {
            StepType::Action => "action",
            StepType::If => "if",
            StepType::Elseif => "elseif",
            StepType::Else => "else",
            StepType::While => "while",
            StepType::Try => "try",
            StepType::Catch => "catch",
            StepType::End => "end",
        }
    }

    /// Everything except `action` takes part in block structure.
    pub fn is_control(self) -> bool {
        !matches!(self, StepType::Action)
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown step type `{keyword}`")]
pub struct UnknownStepType {
    pub keyword: String,
}

impl FromStr for StepType {
    type Err = UnknownStepType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "action" => Ok(StepType::Action),
            "if" => Ok(StepType::If),
            "elseif" => Ok(StepType::Elseif),
            "else" => Ok(StepType::Else),
            "while" => Ok(StepType::While),
            "try" => Ok(StepType::Try),
            "catch" => Ok(StepType::Catch),
            "end" => Ok(StepType::End),
            _ => Err(UnknownStepType {
                keyword: s.to_string(),
            }),
        }
    }
}

/// Per-step wall-clock limit. The default disables the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout(Option<Duration>);

impl Timeout {
    pub const fn infinite() -> Self {
        Self(None)
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(Some(Duration::from_millis(millis)))
    }

    pub fn duration(self) -> Option<Duration> {
        self.0
    }

    pub fn is_infinite(self) -> bool {
        self.0.is_none()
    }

    pub(crate) fn deadline_from(self, start: Instant) -> Option<Instant> {
        self.0.and_then(|duration| start.checked_add(duration))
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Self::infinite()
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Self(Some(duration))
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            None => f.write_str("infinite"),
            Some(duration) => write!(f, "{}", duration.as_millis()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("indentation level {level} is outside 0..={MAX_INDENTATION_LEVEL}")]
pub struct IndentationError {
    pub level: usize,
}

/// How a single step execution failed. Only script errors are recoverable
/// by an enclosing `try`/`catch`; timeouts and termination always propagate.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("script error: {message}")]
    Script { message: String },
    #[error("step exceeded its timeout of {timeout} ms")]
    Timeout { timeout: Timeout },
    #[error("sequence termination requested")]
    Terminated,
}

/// One executable unit of a sequence: a control-flow role, an embedded
/// script and its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    step_type: StepType,
    label: String,
    script: String,
    used_context_variable_names: BTreeSet<VariableName>,
    timeout: Timeout,
    indentation_level: usize,
    disabled: bool,
    running: bool,
    time_of_last_modification: Option<DateTime<Local>>,
    time_of_last_execution: Option<DateTime<Local>>,
}

impl Step {
    pub fn new(step_type: StepType) -> Self {
        Self {
            step_type,
            label: String::new(),
            script: String::new(),
            used_context_variable_names: BTreeSet::new(),
            timeout: Timeout::infinite(),
            indentation_level: 0,
            disabled: false,
            running: false,
            time_of_last_modification: None,
            time_of_last_execution: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.set_label(label);
        self
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.set_script(script);
        self
    }

    pub fn with_used_context_variable_names(mut self, names: BTreeSet<VariableName>) -> Self {
        self.set_used_context_variable_names(names);
        self
    }

    pub fn with_timeout(mut self, timeout: Timeout) -> Self {
        self.set_timeout(timeout);
        self
    }

    pub fn step_type(&self) -> StepType {
        self.step_type
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn used_context_variable_names(&self) -> &BTreeSet<VariableName> {
        &self.used_context_variable_names
    }

    pub fn timeout(&self) -> Timeout {
        self.timeout
    }

    pub fn indentation_level(&self) -> usize {
        self.indentation_level
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn time_of_last_modification(&self) -> Option<DateTime<Local>> {
        self.time_of_last_modification
    }

    pub fn time_of_last_execution(&self) -> Option<DateTime<Local>> {
        self.time_of_last_execution
    }

    pub fn set_type(&mut self, step_type: StepType) {
        self.step_type = step_type;
        self.touch();
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
        self.touch();
    }

    pub fn set_script(&mut self, script: impl Into<String>) {
        self.script = script.into();
        self.touch();
    }

    pub fn set_used_context_variable_names(&mut self, names: BTreeSet<VariableName>) {
        self.used_context_variable_names = names;
    }

    pub fn set_timeout(&mut self, timeout: Timeout) {
        self.timeout = timeout;
    }

    pub fn set_indentation_level(&mut self, level: usize) -> Result<(), IndentationError> {
        if level > MAX_INDENTATION_LEVEL {
            return Err(IndentationError { level });
        }
        self.indentation_level = level;
        Ok(())
    }

    pub(crate) fn force_indentation_level(&mut self, level: usize) {
        self.indentation_level = level.min(MAX_INDENTATION_LEVEL);
    }

    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    /// Overrides the recorded modification time. Deserialization applies the
    /// stored value after the content setters have run.
    pub fn set_time_of_last_modification(&mut self, time: Option<DateTime<Local>>) {
        self.time_of_last_modification = time;
    }

    pub fn set_time_of_last_execution(&mut self, time: Option<DateTime<Local>>) {
        self.time_of_last_execution = time;
    }

    fn touch(&mut self) {
        self.time_of_last_modification = Some(time::now_second());
    }

    /// Runs the step script in a fresh sandboxed environment: imports the
    /// declared context variables, evaluates under the timeout and
    /// termination watchdog, exports the declared variables back and
    /// returns the logical result of the script's final value.
    pub fn execute(
        &mut self,
        context: &mut Context,
        comm: Option<&Arc<dyn CommChannel>>,
        step_index: usize,
    ) -> Result<bool, ExecutionError> {
        self.time_of_last_execution = Some(time::now_second());
        post(
            comm,
            Message::for_step(
                MessageKind::StepStarted,
                format!("step {step_index} [{}] started", self.step_type),
                step_index,
            ),
        );

        self.running = true;
        let outcome = self.run_script(context, comm, step_index);
        self.running = false;

        match outcome {
            ScriptOutcome::Finished(result) => {
                post(
                    comm,
                    Message::for_step(
                        MessageKind::StepStopped,
                        format!("step {step_index} finished (result: {result})"),
                        step_index,
                    ),
                );
                Ok(result)
            }
            ScriptOutcome::Terminated => {
                post(
                    comm,
                    Message::for_step(
                        MessageKind::StepStopped,
                        format!("step {step_index} stopped on termination request"),
                        step_index,
                    ),
                );
                Err(ExecutionError::Terminated)
            }
            ScriptOutcome::TimedOut => {
                let error = ExecutionError::Timeout {
                    timeout: self.timeout,
                };
                post(
                    comm,
                    Message::for_step(
                        MessageKind::StepStoppedWithError,
                        format!("step {step_index} failed: {error}"),
                        step_index,
                    ),
                );
                Err(error)
            }
            ScriptOutcome::Failed(message) => {
                post(
                    comm,
                    Message::for_step(
                        MessageKind::StepStoppedWithError,
                        format!("step {step_index} failed: {message}"),
                        step_index,
                    ),
                );
                Err(ExecutionError::Script { message })
            }
        }
    }

    fn run_script(
        &self,
        context: &mut Context,
        comm: Option<&Arc<dyn CommChannel>>,
        step_index: usize,
    ) -> ScriptOutcome {
        let deadline = self.timeout.deadline_from(Instant::now());
        let host = match ScriptHost::new() {
            Ok(host) => host,
            Err(error) => return ScriptOutcome::Failed(error.to_string()),
        };
        if let Err(error) = host.install_commands(comm.cloned(), step_index, deadline) {
            return ScriptOutcome::Failed(error.to_string());
        }
        if let Some(setup) = context.step_setup() {
            if let Err(error) = setup.as_ref()(host.environment()) {
                return ScriptOutcome::Failed(error.to_string());
            }
        }
        host.install_watchdog(comm.cloned(), deadline);

        for name in &self.used_context_variable_names {
            if let Some(value) = context.get(name) {
                if let Err(error) = host.set_variable(name, value) {
                    return ScriptOutcome::Failed(error.to_string());
                }
            }
        }

        let chunk_name = if self.label.is_empty() {
            self.step_type.as_str()
        } else {
            self.label.as_str()
        };
        let outcome = host.eval(&self.script, chunk_name);

        if let ScriptOutcome::Finished(_) = outcome {
            for name in &self.used_context_variable_names {
                if let Some(value) = host.variable(name) {
                    context.set(name.clone(), value);
                }
            }
        }
        outcome
    }
}
