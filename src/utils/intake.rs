// src/utils/intake.rs: turns a flat list of read files into samples

use std::path::{Path, PathBuf};

use log::debug;

use crate::config::defs::{FASTQ_EXTS, GZIP_EXT, MATE_SUFFIXES, Mate, PipelineError};
use crate::utils::file::file_name_string;
use crate::utils::registry::{SampleRegistry, SampleRegistryBuilder};

/// What intake learned from one file name.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadFileInfo {
    pub sample: String,
    pub mate: Option<Mate>,
    pub compressed: bool,
}

/// Parses a read file name into its sample key, mate and compression.
/// `.gz` is optional; a `.fastq` or `.fq` suffix is required.
///
/// # Arguments
///
/// * `path` - Path to a FASTQ file; only the file name is inspected.
///
/// # Returns
/// ReadFileInfo, or UnsupportedFormat for anything that is not FASTQ.
pub fn parse_read_file(path: &Path) -> Result<ReadFileInfo, PipelineError> {
    let name = file_name_string(path);

    let gz_suffix = format!(".{}", GZIP_EXT);
    let (name, compressed) = match name.strip_suffix(gz_suffix.as_str()) {
        Some(stripped) => (stripped, true),
        None => (name.as_str(), false),
    };

    let stem = FASTQ_EXTS
        .iter()
        .find_map(|ext| name.strip_suffix(format!(".{}", ext).as_str()))
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| PipelineError::UnsupportedFormat(path.to_path_buf()))?;

    for (suffix, mate) in MATE_SUFFIXES {
        if let Some(sample) = stem.strip_suffix(suffix) {
            if !sample.is_empty() {
                return Ok(ReadFileInfo {
                    sample: sample.to_string(),
                    mate: Some(*mate),
                    compressed,
                });
            }
        }
    }

    Ok(ReadFileInfo {
        sample: stem.to_string(),
        mate: None,
        compressed,
    })
}

/// Groups read files into samples, pairing `_1`/`_2` mates under one key.
///
/// # Arguments
///
/// * `inputs` - Read files as given on the command line.
///
/// # Returns
/// A validated SampleRegistry. Unsupported extensions, duplicated inputs and
/// lone mates are errors.
pub fn classify_inputs<P: AsRef<Path>>(inputs: &[P]) -> Result<SampleRegistry, PipelineError> {
    let mut builder = SampleRegistryBuilder::new();
    for input in inputs {
        let path = input.as_ref();
        let info = parse_read_file(path)?;
        debug!("Classified {} as sample {} ({:?})", path.display(), info.sample, info.mate);
        match info.mate {
            Some(mate) => builder.add_mate(&info.sample, mate, path.to_path_buf(), info.compressed)?,
            None => builder.add_single(&info.sample, path.to_path_buf(), info.compressed)?,
        }
    }
    builder.build()
}

/// Treats every file as its own single-end sample keyed by file name, as the
/// QC pipeline does.
pub fn classify_unpaired<P: AsRef<Path>>(inputs: &[P]) -> Result<SampleRegistry, PipelineError> {
    let mut builder = SampleRegistryBuilder::new();
    for input in inputs {
        let path = input.as_ref();
        let info = parse_read_file(path)?;
        builder.add_single(&file_name_string(path), PathBuf::from(path), info.compressed)?;
    }
    builder.build()
}
