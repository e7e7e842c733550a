use std::path::Path;

pub mod deserialize;
pub mod filenames;
pub mod manager;
pub mod serialize;

pub use deserialize::load_sequence;
pub use filenames::{
    escape_filename_characters, is_step_filename, step_filename, unescape_filename_characters,
};
pub use manager::SequenceStore;
pub use serialize::store_sequence;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sequence store io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid step file {path}: {reason}")]
    Parse { path: String, reason: String },
    #[error("sequence directory does not exist: {path}")]
    MissingSequence { path: String },
}

pub(crate) fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}
