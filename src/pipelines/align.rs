// src/pipelines/align.rs: reads to pseudogenomes, one worker per sample

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{LevelFilter, info, warn};

use crate::cli::args::Toolchain;
use crate::config::defs::{OutputLayout, PipelineError, RunConfig};
use crate::pipelines::stages::align_pipeline;
use crate::utils::command::{ShellPipeline, bowtie2, bwa, samtools};
use crate::utils::environment::preflight_align;
use crate::utils::file::{absolute_path, validate_file_input, validate_file_inputs};
use crate::utils::intake::classify_inputs;
use crate::utils::registry::SampleRegistry;
use crate::utils::scheduler::{SchedulerReport, TaskScheduler};
use crate::utils::system::{resolve_thread_budget, threads_per_task, worker_count};

/// Everything the align command needs, already taken off the command line.
#[derive(Debug, Clone)]
pub struct AlignJob {
    pub inputs: Vec<PathBuf>,
    pub reference: PathBuf,
    /// Requested threads; 0 means all cores.
    pub threads: usize,
    pub toolchain: Toolchain,
    pub keep_temp: bool,
    pub bin_dir: Option<PathBuf>,
}

/// Checks the reference and every input exist, then groups the inputs into samples.
///
/// # Arguments
///
/// * `job` - Paths may be relative to `cwd`.
/// * `cwd` - Directory relative paths are resolved against.
///
/// # Returns
/// The job with absolute paths and the classified registry.
pub fn validate_job(mut job: AlignJob, cwd: &Path) -> Result<(AlignJob, SampleRegistry), PipelineError> {
    job.reference = absolute_path(&job.reference, cwd);
    job.inputs = job.inputs.iter().map(|p| absolute_path(p, cwd)).collect();
    job.bin_dir = job.bin_dir.map(|p| absolute_path(&p, cwd));

    validate_file_input(&job.reference)?;
    validate_file_inputs(&job.inputs)?;
    let registry = classify_inputs(&job.inputs)?;
    if registry.is_empty() {
        return Err(PipelineError::InvalidConfig("no samples to align".to_string()));
    }
    Ok((job, registry))
}

/// Creates `tmp`, `bams`, `bcfs` and `pseudogenomes` under the output root.
/// None of them may exist yet, so a previous run is never overwritten.
pub fn create_layout(layout: &OutputLayout) -> Result<(), PipelineError> {
    std::fs::create_dir_all(&layout.root)?;
    for dir in [&layout.tmp, &layout.bams, &layout.bcfs, &layout.pseudogenomes] {
        if dir.exists() {
            return Err(PipelineError::InvalidConfig(format!(
                "output directory already exists: {}",
                dir.display()
            )));
        }
        std::fs::create_dir(dir)?;
    }
    Ok(())
}

/// Copies the reference into `tmp/` and builds the indices the toolchain needs.
pub async fn prepare_reference(config: &RunConfig) -> Result<(), PipelineError> {
    let source = config
        .reference
        .as_ref()
        .ok_or_else(|| PipelineError::InvalidConfig("no reference given".to_string()))?;
    let reference = config.layout.reference();
    info!("Preparing reference {}", source.display());

    tokio::fs::copy(source, &reference).await?;
    ShellPipeline::new(samtools::faidx(&reference)).run().await?;
    ShellPipeline::new(samtools::dict(&reference))
        .redirect_to(&config.layout.reference_dict())
        .run()
        .await?;

    let index = match config.toolchain {
        Toolchain::Gatk => bwa::index(&reference),
        Toolchain::Lite => bowtie2::build(config.threads, &reference, &reference),
    };
    ShellPipeline::new(index).run().await?;
    Ok(())
}

fn log_parameters(config: &RunConfig, registry: &SampleRegistry) {
    info!("Output directory: {}", config.layout.root.display());
    if let Some(reference) = &config.reference {
        info!("Reference: {}", reference.display());
    }
    info!("Toolchain: {:?}", config.toolchain);
    info!(
        "Threads: {} ({} workers x {} threads per tool)",
        config.threads, config.workers, config.tool_threads
    );
    info!("Samples: {}", registry.len());
    for (key, sample) in registry.snapshot() {
        let files = sample
            .read_files()
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let layout = if sample.paired { "paired" } else { "single" };
        info!("\t{} [{}] {}", key, layout, files);
    }
}

/// Validates `job` and runs the whole align pipeline into `layout`.
pub async fn run(
    job: AlignJob,
    cwd: PathBuf,
    layout: OutputLayout,
    log_level: LevelFilter,
) -> Result<SchedulerReport, PipelineError> {
    let (job, registry) = validate_job(job, &cwd)?;
    run_validated(job, registry, cwd, layout, log_level).await
}

/// Runs the align pipeline for a job that already went through `validate_job`.
///
/// # Arguments
///
/// * `job` - Inputs, reference and tool settings, with absolute paths.
/// * `registry` - Samples classified from `job.inputs`.
/// * `cwd` - The current working directory.
/// * `layout` - Output directories; the root may already exist.
/// * `log_level` - Carried into the run configuration.
///
/// # Returns
/// SchedulerReport with the pseudogenome path of every sample.
pub async fn run_validated(
    job: AlignJob,
    registry: SampleRegistry,
    cwd: PathBuf,
    layout: OutputLayout,
    log_level: LevelFilter,
) -> Result<SchedulerReport, PipelineError> {
    println!("\n-------------\n Align\n-------------\n");

    create_layout(&layout)?;
    preflight_align(job.bin_dir.as_deref(), job.toolchain).await?;

    let threads = resolve_thread_budget(job.threads).await;
    let workers = worker_count(threads, registry.len());
    let config = Arc::new(RunConfig {
        cwd,
        layout,
        reference: Some(job.reference),
        threads,
        workers,
        tool_threads: threads_per_task(threads, workers),
        toolchain: job.toolchain,
        keep_temp: job.keep_temp,
        bin_dir: job.bin_dir,
        log_level,
    });
    log_parameters(&config, &registry);

    prepare_reference(&config).await?;

    let pipeline = align_pipeline(&config);
    info!("Stages: {}", pipeline.stage_names().join(" -> "));
    let scheduler = TaskScheduler::new(Arc::new(registry), pipeline, workers)?;
    let report = scheduler.run().await?;

    if !config.keep_temp {
        if let Err(e) = tokio::fs::remove_dir_all(&config.layout.tmp).await {
            warn!("Could not remove {}: {}", config.layout.tmp.display(), e);
        }
    }

    for (sample, artifact) in &report.artifacts {
        info!("\t{}: {}", sample, artifact.display());
    }
    info!("Finished. Results are in {}", config.layout.root.display());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn job(inputs: &[&str], reference: &str) -> AlignJob {
        AlignJob {
            inputs: inputs.iter().map(PathBuf::from).collect(),
            reference: PathBuf::from(reference),
            threads: 0,
            toolchain: Toolchain::Gatk,
            keep_temp: false,
            bin_dir: None,
        }
    }

    #[test]
    fn test_validate_job_resolves_and_classifies() -> anyhow::Result<()> {
        let dir = tempdir()?;
        for name in ["ref.fa", "s_1.fq", "s_2.fq", "t.fq.gz"] {
            std::fs::write(dir.path().join(name), "")?;
        }
        let (job, registry) = validate_job(job(&["s_1.fq", "s_2.fq", "t.fq.gz"], "ref.fa"), dir.path())?;
        assert_eq!(job.reference, dir.path().join("ref.fa"));
        assert_eq!(registry.keys(), vec!["s", "t"]);
        assert!(registry.get("s").unwrap().paired);
        Ok(())
    }

    #[test]
    fn test_validate_job_missing_reference() -> anyhow::Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("s.fq"), "")?;
        assert!(matches!(
            validate_job(job(&["s.fq"], "missing.fa"), dir.path()),
            Err(PipelineError::InvalidInput { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_create_layout_refuses_existing() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let layout = OutputLayout::new(&dir.path().join("run"));
        create_layout(&layout)?;
        assert!(layout.tmp.is_dir() && layout.bams.is_dir() && layout.pseudogenomes.is_dir());
        assert!(matches!(create_layout(&layout), Err(PipelineError::InvalidConfig(_))));
        Ok(())
    }
}
