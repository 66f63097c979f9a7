use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::future::BoxFuture;
use tokio::time::sleep;

use wgs_pipelines::config::defs::PipelineError;
use wgs_pipelines::utils::intake::classify_inputs;
use wgs_pipelines::utils::registry::SampleRegistry;
use wgs_pipelines::utils::scheduler::TaskScheduler;
use wgs_pipelines::utils::stage::{ExternalStage, StagePipeline, StageRequest};

/// Shared observations from every mock stage invocation.
#[derive(Default)]
struct Tracker {
    calls: Mutex<Vec<(String, String)>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl Tracker {
    fn calls_for(&self, stage: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == stage)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

struct MockStage {
    name: String,
    tracker: Arc<Tracker>,
    delay: Duration,
    fail_for: Option<String>,
    slow_for: Option<(String, Duration)>,
}

impl MockStage {
    fn new(name: &str, tracker: &Arc<Tracker>) -> Self {
        MockStage {
            name: name.to_string(),
            tracker: tracker.clone(),
            delay: Duration::from_millis(5),
            fail_for: None,
            slow_for: None,
        }
    }
}

impl ExternalStage for MockStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, request: StageRequest<'a>) -> BoxFuture<'a, Result<PathBuf, PipelineError>> {
        Box::pin(async move {
            self.tracker
                .calls
                .lock()
                .unwrap()
                .push((self.name.clone(), request.sample_key.to_string()));

            let now = self.tracker.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.tracker.peak.fetch_max(now, Ordering::SeqCst);

            let delay = match &self.slow_for {
                Some((key, slow)) if key == request.sample_key => *slow,
                _ => self.delay,
            };
            sleep(delay).await;
            self.tracker.running.fetch_sub(1, Ordering::SeqCst);

            if self.fail_for.as_deref() == Some(request.sample_key) {
                return Err(PipelineError::ToolExecution {
                    tool: self.name.clone(),
                    error: "exit status 1".to_string(),
                });
            }
            Ok(PathBuf::from(format!("{}.{}", request.artifact.display(), self.name)))
        })
    }
}

fn registry_of(n: usize) -> Result<Arc<SampleRegistry>> {
    let files: Vec<String> = (0..n).map(|i| format!("sample{:02}.fq.gz", i)).collect();
    Ok(Arc::new(classify_inputs(&files)?))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_sample_runs_every_stage_exactly_once() -> Result<()> {
    let registry = registry_of(10)?;
    let tracker = Arc::new(Tracker::default());
    let pipeline = StagePipeline::new()
        .with_stage(MockStage::new("dedup", &tracker))
        .with_stage(MockStage::new("call", &tracker));

    let scheduler = TaskScheduler::new(registry.clone(), pipeline, 3)?;
    let report = scheduler.run().await?;

    let keys = registry.keys();
    assert_eq!(tracker.calls_for("dedup"), keys);
    assert_eq!(tracker.calls_for("call"), keys);
    assert_eq!(report.samples(), 10);
    assert_eq!(report.tasks_per_worker.iter().sum::<usize>(), 10);
    assert_eq!(
        report.artifacts["sample03"],
        PathBuf::from("sample03.fq.gz.dedup.call")
    );
    for (_, sample) in registry.snapshot() {
        assert_eq!(sample.stages_completed, 2);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_never_exceeds_worker_count() -> Result<()> {
    let registry = registry_of(12)?;
    let tracker = Arc::new(Tracker::default());
    let mut stage = MockStage::new("call", &tracker);
    stage.delay = Duration::from_millis(30);
    let pipeline = StagePipeline::new().with_stage(stage);

    TaskScheduler::new(registry, pipeline, 3)?.run().await?;

    let peak = tracker.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency was {}", peak);
    assert!(peak >= 1);
    Ok(())
}

#[tokio::test]
async fn extra_workers_stay_idle() -> Result<()> {
    let registry = registry_of(2)?;
    let tracker = Arc::new(Tracker::default());
    let pipeline = StagePipeline::new().with_stage(MockStage::new("call", &tracker));

    let report = TaskScheduler::new(registry, pipeline, 5)?.run().await?;

    assert_eq!(report.workers, 5);
    assert_eq!(report.tasks_per_worker.len(), 5);
    assert_eq!(report.tasks_per_worker.iter().sum::<usize>(), 2);
    assert!(report.tasks_per_worker.iter().filter(|&&n| n == 0).count() >= 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_stage_fails_the_run() -> Result<()> {
    let registry = Arc::new(classify_inputs(&["sampleA.fq", "sampleB.fq", "sampleC.fq"])?);
    let tracker = Arc::new(Tracker::default());
    let mut stage2 = MockStage::new("stage2", &tracker);
    stage2.fail_for = Some("sampleB".to_string());
    let pipeline = StagePipeline::new()
        .with_stage(MockStage::new("stage1", &tracker))
        .with_stage(stage2)
        .with_stage(MockStage::new("stage3", &tracker));

    let scheduler = TaskScheduler::new(registry.clone(), pipeline, 2)?;
    match scheduler.run().await {
        Err(PipelineError::StageFailed { sample, stage, .. }) => {
            assert_eq!(sample, "sampleB");
            assert_eq!(stage, "stage2");
        }
        other => panic!("expected StageFailed, got {:?}", other),
    }

    let b = registry.get("sampleB").unwrap();
    assert!(b.stages_completed < 3);
    assert_eq!(b.stages_completed, 1);
    assert!(!tracker.calls_for("stage3").contains(&"sampleB".to_string()));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failure_cancels_in_flight_siblings() -> Result<()> {
    let registry = Arc::new(classify_inputs(&["fast.fq", "slow.fq"])?);
    let tracker = Arc::new(Tracker::default());
    let mut stage = MockStage::new("call", &tracker);
    stage.fail_for = Some("fast".to_string());
    stage.slow_for = Some(("slow".to_string(), Duration::from_secs(30)));
    let pipeline = StagePipeline::new().with_stage(stage);

    let started = Instant::now();
    let result = TaskScheduler::new(registry.clone(), pipeline, 2)?.run().await;

    assert!(matches!(result, Err(PipelineError::StageFailed { .. })));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(registry.get("slow").unwrap().stages_completed, 0);
    Ok(())
}

#[tokio::test]
async fn single_worker_processes_in_queue_order() -> Result<()> {
    let registry = registry_of(4)?;
    let tracker = Arc::new(Tracker::default());
    let pipeline = StagePipeline::new().with_stage(MockStage::new("call", &tracker));

    let report = TaskScheduler::new(registry.clone(), pipeline, 1)?.run().await?;

    let order: Vec<String> = tracker.calls.lock().unwrap().iter().map(|(_, k)| k.clone()).collect();
    assert_eq!(order, registry.keys());
    assert_eq!(report.tasks_per_worker, vec![4]);

    let per_sample: HashMap<_, _> = report.artifacts.into_iter().collect();
    assert_eq!(per_sample.len(), 4);
    Ok(())
}
