// src/utils/stage.rs: ordered external stages applied to one sample

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use log::{debug, error};

use crate::config::defs::PipelineError;
use crate::utils::registry::{Sample, SampleRegistry};

/// Everything a stage may look at for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct StageRequest<'a> {
    pub sample_key: &'a str,
    /// Output of the previous stage, or the first read file for the first stage.
    pub artifact: &'a Path,
    pub sample: &'a Sample,
}

/// One external tool invocation in the per-sample pipeline.
///
/// Implementations hold their own configuration (reference, output
/// directories, threads) and must not keep state between samples.
pub trait ExternalStage: Send + Sync {
    fn name(&self) -> &str;

    /// Runs the stage and returns the path of the artifact it produced.
    fn invoke<'a>(&'a self, request: StageRequest<'a>) -> BoxFuture<'a, Result<PathBuf, PipelineError>>;
}

/// An ordered list of stages. Cheap to clone; the stages are shared.
#[derive(Clone, Default)]
pub struct StagePipeline {
    stages: Vec<Arc<dyn ExternalStage>>,
}

impl StagePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage<S: ExternalStage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn push(&mut self, stage: Arc<dyn ExternalStage>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    /// Runs every stage for one sample, feeding each output to the next stage
    /// and recording it in the registry. Stops at the first failure.
    ///
    /// # Arguments
    ///
    /// * `registry` - Shared sample registry; only `sample_key`'s entry is touched.
    /// * `sample_key` - The sample to process.
    /// * `worker` - Id of the calling worker, for logging.
    ///
    /// # Returns
    /// Path of the final artifact.
    pub async fn run_sample(
        &self,
        registry: &SampleRegistry,
        sample_key: &str,
        worker: usize,
    ) -> Result<PathBuf, PipelineError> {
        let sample = registry
            .get(sample_key)
            .ok_or_else(|| PipelineError::UnknownSample(sample_key.to_string()))?;
        let mut artifact = sample.artifact.clone();

        for stage in &self.stages {
            debug!("\t[ worker {}: * running {} on {} ]", worker, stage.name(), sample_key);
            let request = StageRequest {
                sample_key,
                artifact: &artifact,
                sample: &sample,
            };
            let produced = stage.invoke(request).await.map_err(|e| {
                error!("\t[ worker {}: {} failed for {}: {} ]", worker, stage.name(), sample_key, e);
                PipelineError::StageFailed {
                    sample: sample_key.to_string(),
                    stage: stage.name().to_string(),
                    error: e.to_string(),
                }
            })?;
            registry.advance(sample_key, &produced)?;
            artifact = produced;
        }

        Ok(artifact)
    }
}
