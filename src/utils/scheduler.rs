// src/utils/scheduler.rs: fixed-size worker pool draining the sample registry

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

use crate::config::defs::PipelineError;
use crate::utils::registry::SampleRegistry;
use crate::utils::stage::StagePipeline;

type TaskQueue = Arc<Mutex<mpsc::Receiver<String>>>;

/// What one worker did before the task queue ran dry.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSummary {
    pub worker: usize,
    pub completed: Vec<String>,
}

/// Outcome of a successful scheduler run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerReport {
    pub workers: usize,
    /// Final artifact per sample key.
    pub artifacts: BTreeMap<String, PathBuf>,
    /// Number of samples each worker processed, indexed by worker id - 1.
    pub tasks_per_worker: Vec<usize>,
}

impl SchedulerReport {
    pub fn samples(&self) -> usize {
        self.artifacts.len()
    }
}

/// Runs every sample in a registry through a stage pipeline using a bounded
/// number of workers. Each sample key is handed to exactly one worker.
pub struct TaskScheduler {
    registry: Arc<SampleRegistry>,
    pipeline: Arc<StagePipeline>,
    workers: usize,
}

impl TaskScheduler {
    pub fn new(
        registry: Arc<SampleRegistry>,
        pipeline: StagePipeline,
        workers: usize,
    ) -> Result<Self, PipelineError> {
        if workers == 0 {
            return Err(PipelineError::InvalidConfig("worker count must be at least 1".to_string()));
        }
        Ok(TaskScheduler {
            registry,
            pipeline: Arc::new(pipeline),
            workers,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn registry(&self) -> &Arc<SampleRegistry> {
        &self.registry
    }

    /// Starts the workers, enqueues every sample key once, closes the queue and
    /// waits for all workers to exit.
    ///
    /// The first stage failure on any worker aborts the remaining workers,
    /// which kills their in-flight tool processes, and is returned as the
    /// run's error. Samples that already finished keep their artifacts.
    ///
    /// # Returns
    /// SchedulerReport with the final artifact of every sample.
    pub async fn run(&self) -> Result<SchedulerReport, PipelineError> {
        let keys = self.registry.keys();
        let task_load = keys.len();
        info!(" * launching {} workers for {} samples", self.workers, task_load);

        // Capacity covers every task, so enqueueing never waits on a worker.
        let (tx, rx) = mpsc::channel::<String>(task_load.max(1));
        let tasks: TaskQueue = Arc::new(Mutex::new(rx));

        let mut workers = JoinSet::new();
        for id in 1..=self.workers {
            workers.spawn(worker(
                id,
                tasks.clone(),
                self.registry.clone(),
                self.pipeline.clone(),
            ));
        }
        drop(tasks);

        for key in keys {
            // Fails only once every worker has already exited on an error,
            // which the join loop below reports.
            if tx.send(key).await.is_err() {
                break;
            }
        }
        drop(tx);

        let mut report = SchedulerReport {
            workers: self.workers,
            tasks_per_worker: vec![0; self.workers],
            ..Default::default()
        };

        while let Some(joined) = workers.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(PipelineError::WorkerPanicked(e.to_string())),
            };
            match outcome {
                Ok(summary) => {
                    report.tasks_per_worker[summary.worker - 1] = summary.completed.len();
                    for key in summary.completed {
                        let sample = self
                            .registry
                            .get(&key)
                            .ok_or_else(|| PipelineError::UnknownSample(key.clone()))?;
                        report.artifacts.insert(key, sample.artifact);
                    }
                }
                Err(e) => {
                    error!("Stopping all workers: {}", e);
                    workers.abort_all();
                    while workers.join_next().await.is_some() {}
                    return Err(e);
                }
            }
        }

        info!(" * all workers finished ({} samples)", report.samples());
        Ok(report)
    }
}

async fn worker(
    id: usize,
    tasks: TaskQueue,
    registry: Arc<SampleRegistry>,
    pipeline: Arc<StagePipeline>,
) -> Result<WorkerSummary, PipelineError> {
    let mut completed = Vec::new();
    loop {
        let next = tasks.lock().await.recv().await;
        let Some(sample) = next else {
            debug!("\t[ worker {}: shutting down ]", id);
            return Ok(WorkerSummary { worker: id, completed });
        };

        info!("\t[ worker {}: starting task {} ]", id, sample);
        let artifact = pipeline.run_sample(&registry, &sample, id).await?;
        info!("\t[ worker {}: completed task {} -> {} ]", id, sample, artifact.display());
        completed.push(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::intake::classify_inputs;

    #[tokio::test]
    async fn test_zero_workers_rejected() -> anyhow::Result<()> {
        let registry = Arc::new(classify_inputs(&["a.fq"])?);
        assert!(matches!(
            TaskScheduler::new(registry, StagePipeline::new(), 0),
            Err(PipelineError::InvalidConfig(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_registry_returns_immediately() -> anyhow::Result<()> {
        let registry = Arc::new(classify_inputs::<&str>(&[])?);
        let scheduler = TaskScheduler::new(registry, StagePipeline::new(), 4)?;
        let report = scheduler.run().await?;
        assert_eq!(report.samples(), 0);
        assert_eq!(report.tasks_per_worker, vec![0, 0, 0, 0]);
        Ok(())
    }

    #[tokio::test]
    async fn test_every_sample_gets_artifact() -> anyhow::Result<()> {
        let registry = Arc::new(classify_inputs(&["a.fq", "b_1.fq", "b_2.fq", "c.fq.gz"])?);
        let scheduler = TaskScheduler::new(registry, StagePipeline::new(), 2)?;
        let report = scheduler.run().await?;

        assert_eq!(report.samples(), 3);
        assert_eq!(report.tasks_per_worker.iter().sum::<usize>(), 3);
        assert_eq!(report.artifacts["b"], PathBuf::from("b_1.fq"));
        assert_eq!(report.artifacts["c"], PathBuf::from("c.fq.gz"));
        Ok(())
    }
}
