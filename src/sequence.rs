use crate::step::{Step, StepType};

#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    #[error("step {index}: expected {expected}, found `{found}`")]
    UnexpectedStep {
        index: usize,
        expected: String,
        found: StepType,
    },
    #[error("step {index}: `{kind}` block is never closed by `end`")]
    UnclosedBlock { index: usize, kind: StepType },
    #[error("step {index}: control step `{kind}` must not be disabled")]
    DisabledControlStep { index: usize, kind: StepType },
}

enum OpenBlock {
    If { else_seen: bool },
    While,
    Try { catch_seen: bool },
}

/// An ordered list of steps forming a well-nested control-flow program,
/// under a human-readable label. Indentation levels of the steps are
/// recomputed from the block structure after every list mutation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sequence {
    label: String,
    steps: Vec<Step>,
}

impl Sequence {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            steps: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    pub fn push_back(&mut self, step: Step) {
        self.steps.push(step);
        self.indent();
    }

    /// Inserts a step before `index`. Panics if `index > len`, like
    /// `Vec::insert`.
    pub fn insert(&mut self, index: usize, step: Step) {
        self.steps.insert(index, step);
        self.indent();
    }

    /// Removes and returns the step at `index`. Panics if out of bounds,
    /// like `Vec::remove`.
    pub fn erase(&mut self, index: usize) -> Step {
        let step = self.steps.remove(index);
        self.indent();
        step
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub(crate) fn steps_mut(&mut self) -> &mut [Step] {
        &mut self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Validates that the step types form a well-nested block structure:
    ///
    /// ```text
    /// Seq   := Block*
    /// Block := action
    ///        | if Seq (elseif Seq)* (else Seq)? end
    ///        | while Seq end
    ///        | try Seq catch Seq end
    /// ```
    ///
    /// Reports the first offending step with its index. Only `action` steps
    /// may be disabled.
    pub fn check_structure(&self) -> Result<(), SequenceError> {
        let mut open: Vec<(usize, OpenBlock)> = Vec::new();

        for (index, step) in self.steps.iter().enumerate() {
            let kind = step.step_type();
            if step.is_disabled() && kind.is_control() {
                return Err(SequenceError::DisabledControlStep { index, kind });
            }
            match kind {
                StepType::Action => {}
                StepType::If => open.push((index, OpenBlock::If { else_seen: false })),
                StepType::While => open.push((index, OpenBlock::While)),
                StepType::Try => open.push((index, OpenBlock::Try { catch_seen: false })),
                StepType::Elseif => match open.last() {
                    Some((_, OpenBlock::If { else_seen: false })) => {}
                    _ => {
                        return Err(SequenceError::UnexpectedStep {
                            index,
                            expected: "an open `if` block without `else`".to_string(),
                            found: kind,
                        })
                    }
                },
                StepType::Else => match open.last_mut() {
                    Some((_, OpenBlock::If { else_seen })) if !*else_seen => *else_seen = true,
                    _ => {
                        return Err(SequenceError::UnexpectedStep {
                            index,
                            expected: "an open `if` block without `else`".to_string(),
                            found: kind,
                        })
                    }
                },
                StepType::Catch => match open.last_mut() {
                    Some((_, OpenBlock::Try { catch_seen })) if !*catch_seen => *catch_seen = true,
                    _ => {
                        return Err(SequenceError::UnexpectedStep {
                            index,
                            expected: "an open `try` block without `catch`".to_string(),
                            found: kind,
                        })
                    }
                },
                StepType::End => match open.pop() {
                    Some((_, OpenBlock::Try { catch_seen: false })) => {
                        return Err(SequenceError::UnexpectedStep {
                            index,
                            expected: "`catch`".to_string(),
                            found: kind,
                        })
                    }
                    Some(_) => {}
                    None => {
                        return Err(SequenceError::UnexpectedStep {
                            index,
                            expected: "an open block".to_string(),
                            found: kind,
                        })
                    }
                },
            }
        }

        if let Some((index, _)) = open.into_iter().next() {
            let kind = self.steps[index].step_type();
            return Err(SequenceError::UnclosedBlock { index, kind });
        }
        Ok(())
    }

    fn indent(&mut self) {
        let mut level: usize = 0;
        for step in &mut self.steps {
            match step.step_type() {
                StepType::If | StepType::While | StepType::Try => {
                    step.force_indentation_level(level);
                    level += 1;
                }
                StepType::Elseif | StepType::Else | StepType::Catch => {
                    step.force_indentation_level(level.saturating_sub(1));
                }
                StepType::End => {
                    level = level.saturating_sub(1);
                    step.force_indentation_level(level);
                }
                StepType::Action => step.force_indentation_level(level),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence_of(types: &[StepType]) -> Sequence {
        let mut sequence = Sequence::new("test");
        for &step_type in types {
            sequence.push_back(Step::new(step_type));
        }
        sequence
    }

    #[test]
    fn accepts_well_nested_blocks() {
        use StepType::*;
        let cases: &[&[StepType]] = &[
            &[],
            &[Action],
            &[Action, Action, Action],
            &[If, Action, End],
            &[If, Action, Elseif, Action, Elseif, Action, Else, Action, End],
            &[While, Action, End],
            &[Try, Action, Catch, Action, End],
            &[While, If, Action, Else, Try, Action, Catch, Action, End, End, End],
        ];
        for case in cases {
            assert!(
                sequence_of(case).check_structure().is_ok(),
                "rejected {case:?}"
            );
        }
    }

    #[test]
    fn reports_first_offending_step() {
        use StepType::*;
        let cases: &[(&[StepType], usize)] = &[
            (&[End], 0),
            (&[Elseif], 0),
            (&[Else], 0),
            (&[Catch], 0),
            (&[If, Action], 0),
            (&[While, Action, Action], 0),
            (&[Try, Action, End], 2),
            (&[If, Action, Else, Action, Elseif, Action, End], 4),
            (&[If, Action, End, End], 3),
            (&[Try, Action, Catch, Action, Catch, End], 4),
            (&[While, Action, Elseif, Action, End], 2),
        ];
        for (case, expected_index) in cases {
            let error = sequence_of(case)
                .check_structure()
                .expect_err("accepted invalid stream");
            let index = match error {
                SequenceError::UnexpectedStep { index, .. } => index,
                SequenceError::UnclosedBlock { index, .. } => index,
                SequenceError::DisabledControlStep { index, .. } => index,
            };
            assert_eq!(index, *expected_index, "case {case:?}");
        }
    }

    #[test]
    fn disabled_control_step_is_rejected() {
        let mut sequence = Sequence::new("test");
        let mut opener = Step::new(StepType::If);
        opener.set_disabled(true);
        sequence.push_back(opener);
        sequence.push_back(Step::new(StepType::Action));
        sequence.push_back(Step::new(StepType::End));

        assert!(matches!(
            sequence.check_structure(),
            Err(SequenceError::DisabledControlStep { index: 0, .. })
        ));
    }

    #[test]
    fn disabled_action_is_allowed() {
        let mut sequence = Sequence::new("test");
        let mut action = Step::new(StepType::Action);
        action.set_disabled(true);
        sequence.push_back(action);
        assert!(sequence.check_structure().is_ok());
    }

    #[test]
    fn insert_and_erase_keep_indentation_current() {
        use StepType::*;
        let mut sequence = sequence_of(&[While, End]);
        sequence.insert(1, Step::new(Action));
        assert_eq!(sequence.len(), 3);
        assert_eq!(sequence.steps()[1].indentation_level(), 1);

        let removed = sequence.erase(0);
        assert_eq!(removed.step_type(), While);
        assert_eq!(sequence.steps()[0].indentation_level(), 0);
    }

    #[test]
    fn indentation_follows_block_nesting() {
        use StepType::*;
        let sequence = sequence_of(&[If, Action, While, Action, End, Else, Action, End]);
        let levels: Vec<usize> = sequence
            .steps()
            .iter()
            .map(Step::indentation_level)
            .collect();
        assert_eq!(levels, vec![0, 1, 1, 2, 1, 0, 1, 0]);
    }
}
