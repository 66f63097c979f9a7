// src/utils/registry.rs: per-sample state shared by the scheduler's workers

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use fxhash::FxHashMap as HashMap;

use crate::config::defs::{Mate, PipelineError};

/// One sequenced specimen tracked through the pipeline.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sample {
    pub reads_1: Option<PathBuf>,
    pub reads_2: Option<PathBuf>,
    pub compressed: bool,
    pub paired: bool,
    /// Output of the last stage that ran, or the first read file before any stage.
    pub artifact: PathBuf,
    pub stages_completed: usize,
}

impl Sample {
    pub fn single(reads: PathBuf, compressed: bool) -> Self {
        Sample {
            reads_1: Some(reads),
            compressed,
            ..Default::default()
        }
    }

    pub fn paired(compressed: bool) -> Self {
        Sample {
            compressed,
            paired: true,
            ..Default::default()
        }
    }

    pub fn mate(&self, mate: Mate) -> Option<&PathBuf> {
        match mate {
            Mate::First => self.reads_1.as_ref(),
            Mate::Second => self.reads_2.as_ref(),
        }
    }

    /// True when every read file the layout needs is present.
    pub fn is_complete(&self) -> bool {
        if self.paired {
            self.reads_1.is_some() && self.reads_2.is_some()
        } else {
            self.reads_1.is_some()
        }
    }

    /// Read files in mate order.
    pub fn read_files(&self) -> Vec<&PathBuf> {
        self.reads_1.iter().chain(self.reads_2.iter()).collect()
    }
}

/// Collects samples during intake. Freezing it with `build` validates every
/// entry and yields a registry whose key set can no longer change.
#[derive(Debug, Default)]
pub struct SampleRegistryBuilder {
    samples: HashMap<String, Sample>,
}

impl SampleRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Sample> {
        self.samples.get(key)
    }

    pub fn add_single(&mut self, key: &str, reads: PathBuf, compressed: bool) -> Result<(), PipelineError> {
        if self.samples.contains_key(key) {
            return Err(PipelineError::DuplicateInput { sample: key.to_string(), path: reads });
        }
        self.samples.insert(key.to_string(), Sample::single(reads, compressed));
        Ok(())
    }

    /// Records one mate of a paired sample. The second sighting of a key fills
    /// the other mate of the existing entry.
    pub fn add_mate(&mut self, key: &str, mate: Mate, reads: PathBuf, compressed: bool) -> Result<(), PipelineError> {
        let sample = self
            .samples
            .entry(key.to_string())
            .or_insert_with(|| Sample::paired(compressed));

        if !sample.paired || sample.mate(mate).is_some() {
            return Err(PipelineError::DuplicateInput { sample: key.to_string(), path: reads });
        }
        match mate {
            Mate::First => sample.reads_1 = Some(reads),
            Mate::Second => sample.reads_2 = Some(reads),
        }
        sample.compressed |= compressed;
        Ok(())
    }

    pub fn build(self) -> Result<SampleRegistry, PipelineError> {
        let mut samples = HashMap::default();
        for (key, mut sample) in self.samples {
            if !sample.is_complete() {
                return Err(PipelineError::IncompleteSample(key));
            }
            if let Some(reads) = &sample.reads_1 {
                sample.artifact = reads.clone();
            }
            samples.insert(key, Mutex::new(sample));
        }
        Ok(SampleRegistry { samples })
    }
}

/// Samples keyed by name. The map is immutable once built; each entry sits
/// behind its own lock so workers advancing different samples never contend.
#[derive(Debug, Default)]
pub struct SampleRegistry {
    samples: HashMap<String, Mutex<Sample>>,
}

impl SampleRegistry {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.samples.contains_key(key)
    }

    /// Sample keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.samples.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Snapshot of one sample.
    pub fn get(&self, key: &str) -> Option<Sample> {
        self.samples.get(key).map(|entry| lock(entry).clone())
    }

    /// Snapshot of every sample, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, Sample)> {
        self.keys()
            .into_iter()
            .filter_map(|key| self.get(&key).map(|sample| (key, sample)))
            .collect()
    }

    /// Records the output of a finished stage as the sample's current artifact.
    pub fn advance(&self, key: &str, artifact: &Path) -> Result<usize, PipelineError> {
        let entry = self
            .samples
            .get(key)
            .ok_or_else(|| PipelineError::UnknownSample(key.to_string()))?;
        let mut sample = lock(entry);
        sample.artifact = artifact.to_path_buf();
        sample.stages_completed += 1;
        Ok(sample.stages_completed)
    }
}

// A poisoned entry only means a worker panicked mid-update of plain data.
fn lock(entry: &Mutex<Sample>) -> MutexGuard<'_, Sample> {
    entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_pairs_mates() -> Result<(), PipelineError> {
        let mut builder = SampleRegistryBuilder::new();
        builder.add_mate("s1", Mate::Second, PathBuf::from("s1_2.fq"), false)?;
        builder.add_mate("s1", Mate::First, PathBuf::from("s1_1.fq"), false)?;
        let registry = builder.build()?;

        let sample = registry.get("s1").unwrap();
        assert!(sample.paired);
        assert_eq!(sample.reads_1, Some(PathBuf::from("s1_1.fq")));
        assert_eq!(sample.reads_2, Some(PathBuf::from("s1_2.fq")));
        assert_eq!(sample.artifact, PathBuf::from("s1_1.fq"));
        Ok(())
    }

    #[test]
    fn test_lone_mate_is_incomplete() {
        let mut builder = SampleRegistryBuilder::new();
        builder.add_mate("s1", Mate::First, PathBuf::from("s1_1.fq"), false).unwrap();
        match builder.build() {
            Err(PipelineError::IncompleteSample(key)) => assert_eq!(key, "s1"),
            other => panic!("expected IncompleteSample, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_inputs_rejected() {
        let mut builder = SampleRegistryBuilder::new();
        builder.add_mate("s1", Mate::First, PathBuf::from("a/s1_1.fq"), false).unwrap();
        assert!(builder.add_mate("s1", Mate::First, PathBuf::from("b/s1_1.fq"), false).is_err());

        builder.add_single("s2", PathBuf::from("s2.fq"), false).unwrap();
        assert!(builder.add_single("s2", PathBuf::from("s2.fq.gz"), true).is_err());
        assert!(builder.add_mate("s2", Mate::Second, PathBuf::from("s2_2.fq"), false).is_err());
    }

    #[test]
    fn test_advance_updates_only_that_sample() -> Result<(), PipelineError> {
        let mut builder = SampleRegistryBuilder::new();
        builder.add_single("a", PathBuf::from("a.fq"), false)?;
        builder.add_single("b", PathBuf::from("b.fq"), false)?;
        let registry = builder.build()?;

        assert_eq!(registry.advance("a", Path::new("a.bam"))?, 1);
        assert_eq!(registry.advance("a", Path::new("a.nodup.bam"))?, 2);

        let a = registry.get("a").unwrap();
        let b = registry.get("b").unwrap();
        assert_eq!(a.artifact, PathBuf::from("a.nodup.bam"));
        assert_eq!(a.stages_completed, 2);
        assert_eq!(b.artifact, PathBuf::from("b.fq"));
        assert_eq!(b.stages_completed, 0);

        assert!(matches!(
            registry.advance("missing", Path::new("x")),
            Err(PipelineError::UnknownSample(_))
        ));
        Ok(())
    }

    #[test]
    fn test_keys_sorted() -> Result<(), PipelineError> {
        let mut builder = SampleRegistryBuilder::new();
        for key in ["c", "a", "b"] {
            builder.add_single(key, PathBuf::from(format!("{key}.fq")), false)?;
        }
        let registry = builder.build()?;
        assert_eq!(registry.keys(), vec!["a", "b", "c"]);
        assert_eq!(registry.len(), 3);
        Ok(())
    }
}
