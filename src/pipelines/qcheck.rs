// src/pipelines/qcheck.rs: FastQC, Kraken and trimming per input file, then MultiQC

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{LevelFilter, info, warn};

use crate::cli::args::Toolchain;
use crate::config::defs::{OutputLayout, PipelineError, RunConfig};
use crate::pipelines::align::{self, AlignJob};
use crate::pipelines::stages::qc_pipeline;
use crate::utils::command::{ShellPipeline, qc};
use crate::utils::environment::{preflight_align, preflight_qc};
use crate::utils::file::{absolute_path, validate_file_input, validate_file_inputs};
use crate::utils::intake::classify_unpaired;
use crate::utils::registry::SampleRegistry;
use crate::utils::scheduler::{SchedulerReport, TaskScheduler};
use crate::utils::system::{resolve_thread_budget, threads_per_task, worker_count};

#[derive(Debug, Clone)]
pub struct QcJob {
    pub inputs: Vec<PathBuf>,
    pub threads: usize,
    pub bin_dir: Option<PathBuf>,
    /// Reference to align the trimmed reads against, if any.
    pub align_reference: Option<PathBuf>,
    pub toolchain: Toolchain,
    pub keep_temp: bool,
}

#[derive(Debug, Clone, Default)]
pub struct QcOutcome {
    /// Trimmed file per input file name.
    pub qc: SchedulerReport,
    pub align: Option<SchedulerReport>,
}

impl QcOutcome {
    pub fn trimmed_files(&self) -> Vec<PathBuf> {
        self.qc.artifacts.values().cloned().collect()
    }
}

fn resolve_job(mut job: QcJob, cwd: &Path) -> Result<QcJob, PipelineError> {
    job.inputs = job.inputs.iter().map(|p| absolute_path(p, cwd)).collect();
    job.bin_dir = job.bin_dir.map(|p| absolute_path(&p, cwd));
    job.align_reference = job.align_reference.map(|p| absolute_path(&p, cwd));

    validate_file_inputs(&job.inputs)?;
    if let Some(reference) = &job.align_reference {
        validate_file_input(reference)?;
    }
    Ok(job)
}

/// Resolves paths against `cwd`, checks every input and the optional
/// reference exist, and registers each input file as its own sample.
pub fn validate_job(job: QcJob, cwd: &Path) -> Result<(QcJob, SampleRegistry), PipelineError> {
    let job = resolve_job(job, cwd)?;
    let registry = classify_unpaired(&job.inputs)?;
    if registry.is_empty() {
        return Err(PipelineError::InvalidConfig("no files to check".to_string()));
    }
    Ok((job, registry))
}

/// Runs QC on every input file, then optionally the align pipeline on the
/// trimmed reads in the same output directory.
///
/// # Arguments
///
/// * `job` - Inputs and settings, as returned by `validate_job`.
/// * `registry` - One sample per input file.
/// * `cwd` - The current working directory.
/// * `layout` - Output directories; QC reports go to `QC_files/`.
/// * `log_level` - Carried into the run configuration.
///
/// # Returns
/// QcOutcome with the trimmed files and, with alignment, its report.
pub async fn run_validated(
    job: QcJob,
    registry: SampleRegistry,
    cwd: PathBuf,
    layout: OutputLayout,
    log_level: LevelFilter,
) -> Result<QcOutcome, PipelineError> {
    println!("\n-------------\n QC\n-------------\n");

    preflight_qc().await?;
    if job.align_reference.is_some() {
        preflight_align(job.bin_dir.as_deref(), job.toolchain).await?;
    }
    std::fs::create_dir_all(&layout.qc)?;

    let threads = resolve_thread_budget(job.threads).await;
    let workers = worker_count(threads, registry.len());
    let config = Arc::new(RunConfig {
        cwd: cwd.clone(),
        layout: layout.clone(),
        reference: job.align_reference.clone(),
        threads,
        workers,
        tool_threads: threads_per_task(threads, workers),
        toolchain: job.toolchain,
        keep_temp: job.keep_temp,
        bin_dir: job.bin_dir.clone(),
        log_level,
    });
    info!("Checking {} files with {} workers", registry.len(), workers);

    let pipeline = qc_pipeline(&config);
    info!("Stages: {}", pipeline.stage_names().join(" -> "));
    let scheduler = TaskScheduler::new(Arc::new(registry), pipeline, workers)?;
    let mut outcome = QcOutcome {
        qc: scheduler.run().await?,
        align: None,
    };

    if let Err(e) = ShellPipeline::new(qc::multiqc(&layout.root)).run().await {
        warn!("MultiQC did not finish: {}", e);
    }
    info!("QC reports are in {}", layout.qc.display());

    if let Some(reference) = job.align_reference {
        let align_job = AlignJob {
            inputs: outcome.trimmed_files(),
            reference,
            threads: job.threads,
            toolchain: job.toolchain,
            keep_temp: job.keep_temp,
            bin_dir: job.bin_dir,
        };
        outcome.align = Some(align::run(align_job, cwd, layout, log_level).await?);
    }
    Ok(outcome)
}
