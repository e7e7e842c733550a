use super::{filenames, io_err, StoreError};
use crate::context::VariableName;
use crate::sequence::Sequence;
use crate::shared::{fs_atomic, time};
use crate::step::Step;
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};

/// Writes `sequence` as a directory under `parent`: the directory is named
/// by the escaped label, each step becomes one `step_<NNN>_<type>.lua` file
/// written atomically, and step files from an earlier, longer version are
/// removed. Returns the sequence directory.
pub fn store_sequence(parent: &Path, sequence: &Sequence) -> Result<PathBuf, StoreError> {
    let dir = parent.join(filenames::escape_filename_characters(sequence.label()));
    fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    remove_stale_step_files(&dir)?;

    for (index, step) in sequence.steps().iter().enumerate() {
        let path = dir.join(filenames::step_filename(index + 1, step.step_type()));
        fs_atomic::atomic_write_file(&path, render_step(step).as_bytes())
            .map_err(|e| io_err(&path, e))?;
    }
    Ok(dir)
}

fn remove_stale_step_files(dir: &Path) -> Result<(), StoreError> {
    for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let is_step = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(filenames::is_step_filename);
        if is_step && path.is_file() {
            fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
        }
    }
    Ok(())
}

/// Banner of keyword comments followed by the verbatim script body.
fn render_step(step: &Step) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "-- type: {}", step.step_type());
    let _ = writeln!(out, "-- label: {}", step.label());

    let names = step
        .used_context_variable_names()
        .iter()
        .map(VariableName::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    let _ = writeln!(out, "-- use context variable names: [{names}]");

    if let Some(timestamp) = step.time_of_last_modification() {
        let _ = writeln!(
            out,
            "-- time of last modification: {}",
            time::format_local(timestamp)
        );
    }
    if let Some(timestamp) = step.time_of_last_execution() {
        let _ = writeln!(
            out,
            "-- time of last execution: {}",
            time::format_local(timestamp)
        );
    }
    let _ = writeln!(out, "-- timeout: {}", step.timeout());
    let _ = writeln!(out, "-- disabled: {}", step.is_disabled());

    if !step.script().is_empty() {
        out.push_str(step.script());
        out.push('\n');
    }
    out
}
