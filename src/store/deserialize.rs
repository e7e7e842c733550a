use super::{filenames, io_err, StoreError};
use crate::context::VariableName;
use crate::sequence::Sequence;
use crate::shared::time;
use crate::step::{Step, StepType, Timeout};
use chrono::{DateTime, Local};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Loads a sequence from its directory. The label comes from the unescaped
/// directory name; steps are read in lexicographic filename order and
/// nothing inside the files is consulted for ordering.
pub fn load_sequence(path: &Path) -> Result<Sequence, StoreError> {
    if !path.is_dir() {
        return Err(StoreError::MissingSequence {
            path: path.display().to_string(),
        });
    }
    let label = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(filenames::unescape_filename_characters)
        .unwrap_or_default();
    let mut sequence = Sequence::new(label);

    let mut files = Vec::new();
    for entry in fs::read_dir(path).map_err(|e| io_err(path, e))? {
        let entry = entry.map_err(|e| io_err(path, e))?;
        let file = entry.path();
        let is_step = file
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(filenames::is_step_filename);
        if is_step && file.is_file() {
            files.push(file);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    for file in files {
        let raw = fs::read_to_string(&file).map_err(|e| io_err(&file, e))?;
        let step = parse_step(&raw).map_err(|reason| StoreError::Parse {
            path: file.display().to_string(),
            reason,
        })?;
        sequence.push_back(step);
    }
    Ok(sequence)
}

/// Parses one step file. Keyword lines may appear in any order; the first
/// line that is not a recognized keyword ends the banner and starts the
/// verbatim script body. The recorded modification time is applied last so
/// the content setters cannot overwrite it with the parse time.
pub(crate) fn parse_step(raw: &str) -> Result<Step, String> {
    let mut step_type: Option<StepType> = None;
    let mut label = String::new();
    let mut names: BTreeSet<VariableName> = BTreeSet::new();
    let mut timeout = Timeout::infinite();
    let mut disabled = false;
    let mut modification: Option<DateTime<Local>> = None;
    let mut execution: Option<DateTime<Local>> = None;
    let mut script_lines: Vec<&str> = Vec::new();
    let mut in_banner = true;

    for line in raw.lines() {
        if !in_banner {
            script_lines.push(line);
            continue;
        }
        match banner_keyword(line) {
            Some(("type", value)) => {
                step_type = Some(value.parse::<StepType>().map_err(|e| e.to_string())?);
            }
            Some(("label", value)) => label = value.to_string(),
            Some(("use context variable names", value)) => {
                names = parse_variable_names(value)?;
            }
            Some(("time of last modification", value)) => {
                modification = Some(time::parse_local(value).map_err(|e| e.to_string())?);
            }
            Some(("time of last execution", value)) => {
                execution = Some(time::parse_local(value).map_err(|e| e.to_string())?);
            }
            Some(("timeout", value)) => timeout = parse_timeout(value)?,
            Some(("disabled", value)) => {
                disabled = value
                    .trim()
                    .parse::<bool>()
                    .map_err(|_| format!("disabled: expected true or false (`{value}`)"))?;
            }
            _ => {
                in_banner = false;
                script_lines.push(line);
            }
        }
    }

    let step_type = step_type.ok_or_else(|| "missing `type` keyword".to_string())?;
    let mut step = Step::new(step_type);
    step.set_label(label);
    if !script_lines.is_empty() {
        step.set_script(script_lines.join("\n"));
    }
    step.set_used_context_variable_names(names);
    step.set_timeout(timeout);
    step.set_disabled(disabled);
    step.set_time_of_last_execution(execution);
    step.set_time_of_last_modification(modification);
    Ok(step)
}

/// A recognized keyword line: `-- ` up to the first `:`. The value keeps
/// everything after the colon, minus one leading space.
fn banner_keyword(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("-- ")?;
    let (keyword, value) = rest.split_once(':')?;
    Some((keyword, value.strip_prefix(' ').unwrap_or(value)))
}

fn parse_variable_names(value: &str) -> Result<BTreeSet<VariableName>, String> {
    let inner = value
        .trim()
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .ok_or_else(|| "use context variable names: expected a bracketed list".to_string())?;
    let mut names = BTreeSet::new();
    for part in inner.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        names.insert(VariableName::new(part).map_err(|e| e.to_string())?);
    }
    Ok(names)
}

fn parse_timeout(value: &str) -> Result<Timeout, String> {
    let value = value.trim();
    if value == "infinite" {
        return Ok(Timeout::infinite());
    }
    value
        .parse::<u64>()
        .map(Timeout::from_millis)
        .map_err(|_| format!("timeout: unable to parse number (`{value}`)"))
}
