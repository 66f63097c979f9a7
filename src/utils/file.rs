use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::config::defs::PipelineError;

pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Makes a path absolute against `cwd` unless it already is.
pub fn absolute_path(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// Checks that a user supplied file exists and can be opened.
pub fn validate_file_input(path: &Path) -> Result<(), PipelineError> {
    match File::open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(PipelineError::InvalidInput {
            path: path.to_path_buf(),
            reason: "file does not exist".to_string(),
        }),
        Err(e) => Err(PipelineError::InvalidInput {
            path: path.to_path_buf(),
            reason: format!("can't access file: {}", e),
        }),
    }
}

pub fn validate_file_inputs<P: AsRef<Path>>(paths: &[P]) -> Result<(), PipelineError> {
    for path in paths {
        validate_file_input(path.as_ref())?;
    }
    Ok(())
}

/// Final path component as an owned string, for building output names.
pub fn file_name_string(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
