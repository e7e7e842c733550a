use super::{deserialize, filenames, io_err, serialize, StoreError};
use crate::sequence::Sequence;
use std::fs;
use std::path::{Path, PathBuf};

/// Root directory holding one subdirectory per stored sequence.
#[derive(Debug, Clone)]
pub struct SequenceStore {
    root: PathBuf,
}

impl SequenceStore {
    /// Opens the store, creating the root directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directories of all stored sequences, sorted by path.
    pub fn sequence_paths(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| io_err(&self.root, e))? {
            let entry = entry.map_err(|e| io_err(&self.root, e))?;
            let path = entry.path();
            if path.is_dir() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    pub fn store(&self, sequence: &Sequence) -> Result<PathBuf, StoreError> {
        serialize::store_sequence(&self.root, sequence)
    }

    pub fn load(&self, label: &str) -> Result<Sequence, StoreError> {
        deserialize::load_sequence(&self.sequence_dir(label))
    }

    /// Relabels a stored sequence, moving it to the directory matching the
    /// new label.
    pub fn rename(&self, label: &str, new_label: &str) -> Result<Sequence, StoreError> {
        let mut sequence = self.load(label)?;
        sequence.set_label(new_label);
        if self.sequence_dir(label) != self.sequence_dir(new_label) {
            self.remove(label)?;
        }
        self.store(&sequence)?;
        Ok(sequence)
    }

    pub fn remove(&self, label: &str) -> Result<(), StoreError> {
        let dir = self.sequence_dir(label);
        fs::remove_dir_all(&dir).map_err(|e| io_err(&dir, e))
    }

    fn sequence_dir(&self, label: &str) -> PathBuf {
        self.root
            .join(filenames::escape_filename_characters(label))
    }
}
