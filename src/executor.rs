use crate::comm::{post, CommChannel, Message, MessageKind};
use crate::context::{Context, VariableName, VariableValue};
use crate::sequence::{Sequence, SequenceError};
use crate::step::{ExecutionError, Step, StepType};
use std::sync::Arc;

/// Context variable receiving the script error message when a `try` block
/// unwinds to its `catch`.
pub const ERROR_MESSAGE_VARIABLE: &str = "error_message";

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Validation(#[from] SequenceError),
    #[error("step {index} failed: {message}")]
    StepFailed { index: usize, message: String },
    #[error("step {index} exceeded its timeout")]
    StepTimeout { index: usize },
}

enum WalkError {
    Terminated,
    Timeout { index: usize },
    Script { index: usize, message: String },
}

/// Runs a validated sequence as a nested block program against the shared
/// context. Cooperative termination is an orderly outcome and returns `Ok`;
/// timeouts and uncaught script errors surface the responsible step index.
pub fn execute_sequence(
    sequence: &mut Sequence,
    context: &mut Context,
    comm: Option<Arc<dyn CommChannel>>,
) -> Result<(), ExecutorError> {
    sequence.check_structure()?;

    let label = sequence.label().to_string();
    let comm = comm.as_ref();
    post(
        comm,
        Message::for_sequence(
            MessageKind::SequenceStarted,
            format!("sequence `{label}` started"),
        ),
    );

    let shapes: Vec<(StepType, bool)> = sequence
        .steps()
        .iter()
        .map(|step| (step.step_type(), step.is_disabled()))
        .collect();
    let total = shapes.len();
    let result = {
        let mut frame = ExecutionFrame {
            steps: sequence.steps_mut(),
            shapes: &shapes,
            context,
            comm,
        };
        frame.run_block(0, total)
    };

    match result {
        Ok(()) => {
            post(
                comm,
                Message::for_sequence(
                    MessageKind::SequenceStopped,
                    format!("sequence `{label}` finished"),
                ),
            );
            Ok(())
        }
        Err(WalkError::Terminated) => {
            post(
                comm,
                Message::for_sequence(
                    MessageKind::SequenceStopped,
                    format!("sequence `{label}` stopped: termination requested"),
                ),
            );
            Ok(())
        }
        Err(WalkError::Timeout { index }) => {
            post(
                comm,
                Message::for_sequence(
                    MessageKind::SequenceStoppedWithError,
                    format!("sequence `{label}` stopped: step {index} exceeded its timeout"),
                ),
            );
            Err(ExecutorError::StepTimeout { index })
        }
        Err(WalkError::Script { index, message }) => {
            post(
                comm,
                Message::for_sequence(
                    MessageKind::SequenceStoppedWithError,
                    format!("sequence `{label}` stopped: step {index} failed: {message}"),
                ),
            );
            Err(ExecutorError::StepFailed { index, message })
        }
    }
}

struct ExecutionFrame<'a> {
    steps: &'a mut [Step],
    shapes: &'a [(StepType, bool)],
    context: &'a mut Context,
    comm: Option<&'a Arc<dyn CommChannel>>,
}

impl ExecutionFrame<'_> {
    fn run_block(&mut self, from: usize, to: usize) -> Result<(), WalkError> {
        let mut index = from;
        while index < to {
            let (kind, disabled) = self.shapes[index];
            index = match kind {
                StepType::Action => {
                    if !disabled {
                        self.execute_step(index)?;
                    }
                    index + 1
                }
                StepType::If => self.run_if(index)?,
                StepType::While => self.run_while(index)?,
                StepType::Try => self.run_try(index)?,
                // elseif/else/catch/end are consumed by the block handlers
                _ => index + 1,
            };
        }
        Ok(())
    }

    fn execute_step(&mut self, index: usize) -> Result<bool, WalkError> {
        self.steps[index]
            .execute(self.context, self.comm, index)
            .map_err(|error| match error {
                ExecutionError::Terminated => WalkError::Terminated,
                ExecutionError::Timeout { .. } => WalkError::Timeout { index },
                ExecutionError::Script { message } => WalkError::Script { index, message },
            })
    }

    /// Evaluates the `if` and `elseif` predicates in order, runs the body of
    /// the first that holds, or the `else` body when none does. Returns the
    /// index just past the closing `end`.
    fn run_if(&mut self, if_index: usize) -> Result<usize, WalkError> {
        let end = matching_end(self.shapes, if_index);
        let mut clauses = vec![if_index];
        clauses.extend(clause_positions(self.shapes, if_index, end));

        for (slot, &clause) in clauses.iter().enumerate() {
            let body_from = clause + 1;
            let body_to = clauses.get(slot + 1).copied().unwrap_or(end);
            let kind = self.shapes[clause].0;
            let taken = match kind {
                StepType::Else => true,
                _ => self.execute_step(clause)?,
            };
            if taken {
                self.run_block(body_from, body_to)?;
                break;
            }
        }
        Ok(end + 1)
    }

    /// Re-evaluates the predicate step before every iteration, so loop
    /// counters in the context are re-imported and re-exported each pass.
    fn run_while(&mut self, while_index: usize) -> Result<usize, WalkError> {
        let end = matching_end(self.shapes, while_index);
        while self.execute_step(while_index)? {
            self.run_block(while_index + 1, end)?;
        }
        Ok(end + 1)
    }

    /// Runs the `try` body; a script error from any step in it binds the
    /// error text as `error_message` and diverts to the `catch` body.
    /// Timeouts and termination are not recoverable and propagate.
    fn run_try(&mut self, try_index: usize) -> Result<usize, WalkError> {
        let end = matching_end(self.shapes, try_index);
        let catch = clause_positions(self.shapes, try_index, end)
            .first()
            .copied()
            .unwrap_or(end);

        match self.run_block(try_index + 1, catch) {
            Ok(()) => {}
            Err(WalkError::Script { message, .. }) => {
                self.context.set(
                    VariableName::new_unchecked(ERROR_MESSAGE_VARIABLE),
                    VariableValue::String(message),
                );
                self.run_block(catch + 1, end)?;
            }
            Err(other) => return Err(other),
        }
        Ok(end + 1)
    }
}

/// Index of the `end` closing the block opened at `open`. Validated
/// sequences always have one; the fallback keeps the walk in bounds.
fn matching_end(shapes: &[(StepType, bool)], open: usize) -> usize {
    let mut depth = 0usize;
    for (index, (kind, _)) in shapes.iter().enumerate().skip(open + 1) {
        match kind {
            StepType::If | StepType::While | StepType::Try => depth += 1,
            StepType::End if depth == 0 => return index,
            StepType::End => depth -= 1,
            _ => {}
        }
    }
    shapes.len()
}

/// Positions of the `elseif`/`else`/`catch` clauses belonging directly to
/// the block opened at `open`, ignoring nested blocks.
fn clause_positions(shapes: &[(StepType, bool)], open: usize, end: usize) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut depth = 0usize;
    for index in open + 1..end.min(shapes.len()) {
        match shapes[index].0 {
            StepType::If | StepType::While | StepType::Try => depth += 1,
            StepType::End => depth = depth.saturating_sub(1),
            StepType::Elseif | StepType::Else | StepType::Catch if depth == 0 => {
                positions.push(index)
            }
            _ => {}
        }
    }
    positions
}
