// src/pipelines/classify.rs: show how input files group into samples

use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::defs::PipelineError;
use crate::utils::fastq::count_reads;
use crate::utils::file::{absolute_path, validate_file_inputs};
use crate::utils::intake::classify_inputs;
use crate::utils::registry::SampleRegistry;

pub const TSV_HEADER: &str = "sample\tlayout\tcompressed\treads_1\treads_2";

fn path_cell(path: Option<&PathBuf>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_else(|| "-".to_string())
}

/// Writes one tab-separated row per sample, sorted by key. With `counts`,
/// two more columns hold the record count of each read file.
///
/// # Arguments
///
/// * `registry` - Classified samples.
/// * `counts` - Read counts per sample as (reads_1, reads_2), when requested.
/// * `out` - Destination, normally stdout.
pub fn write_table<W: Write>(
    registry: &SampleRegistry,
    counts: Option<&[(u64, Option<u64>)]>,
    out: &mut W,
) -> Result<(), PipelineError> {
    match counts {
        Some(_) => writeln!(out, "{}\tcount_1\tcount_2", TSV_HEADER)?,
        None => writeln!(out, "{}", TSV_HEADER)?,
    }
    for (i, (key, sample)) in registry.snapshot().into_iter().enumerate() {
        let layout = if sample.paired { "paired" } else { "single" };
        write!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            key,
            layout,
            sample.compressed,
            path_cell(sample.reads_1.as_ref()),
            path_cell(sample.reads_2.as_ref())
        )?;
        if let Some((c1, c2)) = counts.and_then(|c| c.get(i)) {
            let c2 = c2.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string());
            write!(out, "\t{}\t{}", c1, c2)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn count_sample_reads(registry: &SampleRegistry) -> Result<Vec<(u64, Option<u64>)>, PipelineError> {
    let mut counts = Vec::with_capacity(registry.len());
    for (key, sample) in registry.snapshot() {
        let c1 = match &sample.reads_1 {
            Some(path) => count_reads(path)?,
            None => 0,
        };
        let c2 = sample.reads_2.as_deref().map(count_reads).transpose()?;
        if let Some(c2) = c2 {
            if c1 != c2 {
                warn!("Sample {} has {} reads in mate 1 but {} in mate 2", key, c1, c2);
            }
        }
        counts.push((c1, c2));
    }
    Ok(counts)
}

/// Classifies the inputs and prints the table to stdout.
pub fn run(inputs: &[PathBuf], cwd: &Path, count: bool) -> Result<SampleRegistry, PipelineError> {
    let inputs: Vec<PathBuf> = inputs
        .iter()
        .map(|p| absolute_path(p, cwd))
        .collect();
    validate_file_inputs(&inputs)?;
    let registry = classify_inputs(&inputs)?;
    info!("{} files form {} samples", inputs.len(), registry.len());

    let counts = if count { Some(count_sample_reads(&registry)?) } else { None };

    let stdout = std::io::stdout();
    write_table(&registry, counts.as_deref(), &mut stdout.lock())?;
    Ok(registry)
}
