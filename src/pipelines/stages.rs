// src/pipelines/stages.rs: external tool stages for the align and QC pipelines

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use log::{info, warn};

use crate::cli::args::Toolchain;
use crate::config::defs::{
    ADAPTERS_FASTA, CONSENSUS_MIN_DEPTH, GATK_JAR, KRAKEN_DB_DIR, MIN_MAPPING_QUALITY,
    MPILEUP_MAX_DEPTH, PICARD_JAR, PipelineError, RunConfig, VCFUTILS_SCRIPT,
};
use crate::utils::command::{
    ShellPipeline, bcftools, bowtie2, bwa, gatk, picard, qc, samtools, vcfutils,
};
use crate::utils::stage::{ExternalStage, StagePipeline, StageRequest};

/// `tmp/alignment_file.<key>.sorted.bam`
pub fn sorted_bam(config: &RunConfig, key: &str) -> PathBuf {
    config.layout.tmp.join(format!("alignment_file.{}.sorted.bam", key))
}

/// `tmp/alignment_file.<key>.sorted.nodup.bam`
pub fn nodup_bam(config: &RunConfig, key: &str) -> PathBuf {
    config.layout.tmp.join(format!("alignment_file.{}.sorted.nodup.bam", key))
}

pub fn realigned_bam(config: &RunConfig, key: &str) -> PathBuf {
    config
        .layout
        .bams
        .join(format!("alignment_file.{}.sorted.nodup.indels_corrected.bam", key))
}

pub fn realigner_intervals(config: &RunConfig, key: &str) -> PathBuf {
    config.layout.tmp.join(format!("{}.realigner.intervals", key))
}

pub fn pileup_bcf(config: &RunConfig, key: &str) -> PathBuf {
    config.layout.tmp.join(format!("{}.tmp.bcf", key))
}

pub fn called_bcf(config: &RunConfig, key: &str) -> PathBuf {
    config.layout.bcfs.join(format!("{}.bcf", key))
}

pub fn pseudogenome(config: &RunConfig, key: &str) -> PathBuf {
    config.layout.pseudogenomes.join(format!("{}.pseudogenome.fa", key))
}

fn read_paths<'a>(request: &StageRequest<'a>) -> Result<Vec<&'a Path>, PipelineError> {
    let reads: Vec<&Path> = request.sample.read_files().into_iter().map(PathBuf::as_path).collect();
    if reads.is_empty() {
        return Err(PipelineError::IncompleteSample(request.sample_key.to_string()));
    }
    Ok(reads)
}

/// Read alignment piped through mapping-quality filtering, fixmate and sort.
pub struct AlignStage {
    config: Arc<RunConfig>,
}

impl AlignStage {
    pub fn new(config: Arc<RunConfig>) -> Self {
        AlignStage { config }
    }
}

impl ExternalStage for AlignStage {
    fn name(&self) -> &str {
        "align"
    }

    fn invoke<'a>(&'a self, request: StageRequest<'a>) -> BoxFuture<'a, Result<PathBuf, PipelineError>> {
        Box::pin(async move {
            let config = &self.config;
            let threads = config.tool_threads;
            let reads = read_paths(&request)?;
            let reference = config.layout.reference();
            let output = sorted_bam(config, request.sample_key);

            let aligner = match config.toolchain {
                Toolchain::Gatk => bwa::mem(threads, request.sample_key, &reference, &reads),
                Toolchain::Lite => bowtie2::align(threads, request.sample_key, &reference, &reads),
            };
            ShellPipeline::new(aligner)
                .pipe(samtools::view_filter(threads, MIN_MAPPING_QUALITY))
                .pipe(samtools::fixmate(threads))
                .pipe(samtools::sort(threads, &output))
                .run()
                .await?;
            Ok(output)
        })
    }
}

/// Duplicate removal and indexing. The lite toolchain publishes its result in
/// `bams/` because it has no realignment step.
pub struct MarkDuplicatesStage {
    config: Arc<RunConfig>,
}

impl MarkDuplicatesStage {
    pub fn new(config: Arc<RunConfig>) -> Self {
        MarkDuplicatesStage { config }
    }

    /// BAM that later stages read and that gets indexed: the deduplicated
    /// BAM in `tmp/`, or its published copy in `bams/` for the lite toolchain.
    pub fn final_bam(&self, key: &str) -> PathBuf {
        match self.config.toolchain {
            Toolchain::Gatk => nodup_bam(&self.config, key),
            Toolchain::Lite => self
                .config
                .layout
                .bams
                .join(format!("alignment_file.{}.sorted.nodup.bam", key)),
        }
    }
}

impl ExternalStage for MarkDuplicatesStage {
    fn name(&self) -> &str {
        "mark_duplicates"
    }

    fn invoke<'a>(&'a self, request: StageRequest<'a>) -> BoxFuture<'a, Result<PathBuf, PipelineError>> {
        Box::pin(async move {
            let config = &self.config;
            let dedup_out = nodup_bam(config, request.sample_key);
            let final_bam = self.final_bam(request.sample_key);

            let dedup = match config.toolchain {
                Toolchain::Gatk => picard::mark_duplicates(&config.bin_file(PICARD_JAR)?, request.artifact, &dedup_out),
                Toolchain::Lite => samtools::rmdup(request.sample.paired, request.artifact, &dedup_out),
            };
            ShellPipeline::new(dedup).run().await?;
            if final_bam != dedup_out {
                tokio::fs::copy(&dedup_out, &final_bam).await?;
            }
            ShellPipeline::new(samtools::index(&final_bam)).run().await?;
            Ok(final_bam)
        })
    }
}

/// GATK RealignerTargetCreator followed by IndelRealigner.
pub struct IndelRealignStage {
    config: Arc<RunConfig>,
}

impl IndelRealignStage {
    pub fn new(config: Arc<RunConfig>) -> Self {
        IndelRealignStage { config }
    }
}

impl ExternalStage for IndelRealignStage {
    fn name(&self) -> &str {
        "indel_realign"
    }

    fn invoke<'a>(&'a self, request: StageRequest<'a>) -> BoxFuture<'a, Result<PathBuf, PipelineError>> {
        Box::pin(async move {
            let config = &self.config;
            let jar = config.bin_file(GATK_JAR)?;
            let reference = config.layout.reference();
            let intervals = realigner_intervals(config, request.sample_key);
            let output = realigned_bam(config, request.sample_key);

            ShellPipeline::new(gatk::target_creator(&jar, config.tool_threads, &reference, request.artifact, &intervals))
                .run()
                .await?;
            ShellPipeline::new(gatk::indel_realigner(&jar, &reference, request.artifact, &intervals, &output))
                .run()
                .await?;
            Ok(output)
        })
    }
}

/// Pileup and haploid consensus calling into `bcfs/`.
pub struct VariantCallStage {
    config: Arc<RunConfig>,
}

impl VariantCallStage {
    pub fn new(config: Arc<RunConfig>) -> Self {
        VariantCallStage { config }
    }
}

impl ExternalStage for VariantCallStage {
    fn name(&self) -> &str {
        "variant_call"
    }

    fn invoke<'a>(&'a self, request: StageRequest<'a>) -> BoxFuture<'a, Result<PathBuf, PipelineError>> {
        Box::pin(async move {
            let config = &self.config;
            let pileup = pileup_bcf(config, request.sample_key);
            let output = called_bcf(config, request.sample_key);

            ShellPipeline::new(samtools::mpileup(MPILEUP_MAX_DEPTH, &config.layout.reference(), request.artifact))
                .redirect_to(&pileup)
                .run()
                .await?;
            ShellPipeline::new(bcftools::call(&pileup, &output)).run().await?;
            Ok(output)
        })
    }
}

/// Writes the pseudogenome FASTA from the called BCF.
pub struct ConsensusStage {
    config: Arc<RunConfig>,
}

impl ConsensusStage {
    pub fn new(config: Arc<RunConfig>) -> Self {
        ConsensusStage { config }
    }
}

impl ExternalStage for ConsensusStage {
    fn name(&self) -> &str {
        "consensus"
    }

    fn invoke<'a>(&'a self, request: StageRequest<'a>) -> BoxFuture<'a, Result<PathBuf, PipelineError>> {
        Box::pin(async move {
            let config = &self.config;
            let script = config.bin_file(VCFUTILS_SCRIPT)?;
            let output = pseudogenome(config, request.sample_key);

            ShellPipeline::new(bcftools::view(request.artifact))
                .pipe(vcfutils::vcf2fa(&script, CONSENSUS_MIN_DEPTH))
                .redirect_to(&output)
                .run()
                .await?;
            Ok(output)
        })
    }
}

/// FastQC report into `QC_files/`; passes the reads through unchanged.
pub struct FastqcStage {
    config: Arc<RunConfig>,
}

impl FastqcStage {
    pub fn new(config: Arc<RunConfig>) -> Self {
        FastqcStage { config }
    }
}

impl ExternalStage for FastqcStage {
    fn name(&self) -> &str {
        "fastqc"
    }

    fn invoke<'a>(&'a self, request: StageRequest<'a>) -> BoxFuture<'a, Result<PathBuf, PipelineError>> {
        Box::pin(async move {
            ShellPipeline::new(qc::fastqc(self.config.tool_threads, &self.config.layout.qc, request.artifact))
                .run()
                .await?;
            Ok(request.artifact.to_path_buf())
        })
    }
}

/// Kraken classification summarised by kraken-report; passes the reads through.
pub struct KrakenStage {
    config: Arc<RunConfig>,
    db: PathBuf,
}

impl KrakenStage {
    pub fn new(config: Arc<RunConfig>, db: PathBuf) -> Self {
        KrakenStage { config, db }
    }
}

impl ExternalStage for KrakenStage {
    fn name(&self) -> &str {
        "kraken"
    }

    fn invoke<'a>(&'a self, request: StageRequest<'a>) -> BoxFuture<'a, Result<PathBuf, PipelineError>> {
        Box::pin(async move {
            let report = self
                .config
                .layout
                .qc
                .join(format!("{}.krakenreport.txt", request.sample_key));
            ShellPipeline::new(qc::kraken(self.config.tool_threads, &self.db, request.artifact, request.sample.compressed))
                .pipe(qc::kraken_report(&self.db))
                .redirect_to(&report)
                .run()
                .await?;
            Ok(request.artifact.to_path_buf())
        })
    }
}

/// Quality trimming into `QC_files/trimmed.<name>`.
pub struct TrimmomaticStage {
    config: Arc<RunConfig>,
    adapters: Option<PathBuf>,
}

impl TrimmomaticStage {
    pub fn new(config: Arc<RunConfig>, adapters: Option<PathBuf>) -> Self {
        TrimmomaticStage { config, adapters }
    }
}

impl TrimmomaticStage {
    /// Trimming command for one file. Trimmomatic's stderr summary is kept
    /// next to the reports so MultiQC can pick it up.
    pub fn command(&self, sample_key: &str, reads: &Path) -> (ShellPipeline, PathBuf) {
        let qc_dir = &self.config.layout.qc;
        let output = qc_dir.join(format!("trimmed.{}", sample_key));
        let log = qc_dir.join(format!("trimmomatic_logfile_for_{}.log", sample_key));
        let pipeline = ShellPipeline::new(qc::trimmomatic(
            self.config.tool_threads,
            reads,
            &output,
            self.adapters.as_deref(),
        ))
        .redirect_stderr_to(&log);
        (pipeline, output)
    }
}

impl ExternalStage for TrimmomaticStage {
    fn name(&self) -> &str {
        "trimmomatic"
    }

    fn invoke<'a>(&'a self, request: StageRequest<'a>) -> BoxFuture<'a, Result<PathBuf, PipelineError>> {
        Box::pin(async move {
            let (pipeline, output) = self.command(request.sample_key, request.artifact);
            pipeline.run().await?;
            Ok(output)
        })
    }
}

/// Per-sample stages for the configured toolchain, in execution order.
pub fn align_pipeline(config: &Arc<RunConfig>) -> StagePipeline {
    let pipeline = StagePipeline::new()
        .with_stage(AlignStage::new(config.clone()))
        .with_stage(MarkDuplicatesStage::new(config.clone()));
    let pipeline = match config.toolchain {
        Toolchain::Gatk => pipeline.with_stage(IndelRealignStage::new(config.clone())),
        Toolchain::Lite => pipeline,
    };
    pipeline
        .with_stage(VariantCallStage::new(config.clone()))
        .with_stage(ConsensusStage::new(config.clone()))
}

/// Per-file QC stages. Kraken is left out when the bin directory has no database.
pub fn qc_pipeline(config: &Arc<RunConfig>) -> StagePipeline {
    let mut pipeline = StagePipeline::new().with_stage(FastqcStage::new(config.clone()));

    match config.bin_dir.as_ref().map(|dir| dir.join(KRAKEN_DB_DIR)) {
        Some(db) if db.is_dir() => pipeline = pipeline.with_stage(KrakenStage::new(config.clone(), db)),
        _ => warn!("No {} found in the bin directory; skipping kraken", KRAKEN_DB_DIR),
    }

    let adapters = config
        .bin_dir
        .as_ref()
        .map(|dir| dir.join(ADAPTERS_FASTA))
        .filter(|path| path.is_file());
    if adapters.is_none() {
        info!("No {} found; trimming without adapter clipping", ADAPTERS_FASTA);
    }
    pipeline.with_stage(TrimmomaticStage::new(config.clone(), adapters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defs::OutputLayout;
    use log::LevelFilter;
    use tempfile::tempdir;

    fn config(toolchain: Toolchain, bin_dir: Option<PathBuf>) -> Arc<RunConfig> {
        Arc::new(RunConfig {
            cwd: PathBuf::from("/"),
            layout: OutputLayout::new(Path::new("/out")),
            reference: Some(PathBuf::from("/ref/genome.fa")),
            threads: 4,
            workers: 2,
            tool_threads: 2,
            toolchain,
            keep_temp: false,
            bin_dir,
            log_level: LevelFilter::Info,
        })
    }

    #[test]
    fn test_gatk_stage_order() {
        let pipeline = align_pipeline(&config(Toolchain::Gatk, None));
        assert_eq!(
            pipeline.stage_names(),
            vec!["align", "mark_duplicates", "indel_realign", "variant_call", "consensus"]
        );
    }

    #[test]
    fn test_lite_skips_realignment() {
        let pipeline = align_pipeline(&config(Toolchain::Lite, None));
        assert_eq!(
            pipeline.stage_names(),
            vec!["align", "mark_duplicates", "variant_call", "consensus"]
        );
    }

    #[test]
    fn test_qc_pipeline_kraken_needs_db() -> anyhow::Result<()> {
        let bin = tempdir()?;
        let without = qc_pipeline(&config(Toolchain::Gatk, Some(bin.path().to_path_buf())));
        assert_eq!(without.stage_names(), vec!["fastqc", "trimmomatic"]);

        std::fs::create_dir(bin.path().join(KRAKEN_DB_DIR))?;
        let with = qc_pipeline(&config(Toolchain::Gatk, Some(bin.path().to_path_buf())));
        assert_eq!(with.stage_names(), vec!["fastqc", "kraken", "trimmomatic"]);
        Ok(())
    }

    #[test]
    fn test_artifact_paths() {
        let config = config(Toolchain::Gatk, None);
        assert_eq!(sorted_bam(&config, "s1"), PathBuf::from("/out/tmp/alignment_file.s1.sorted.bam"));
        assert_eq!(
            realigned_bam(&config, "s1"),
            PathBuf::from("/out/bams/alignment_file.s1.sorted.nodup.indels_corrected.bam")
        );
        assert_eq!(realigner_intervals(&config, "s1"), PathBuf::from("/out/tmp/s1.realigner.intervals"));
        assert_eq!(called_bcf(&config, "s1"), PathBuf::from("/out/bcfs/s1.bcf"));
        assert_eq!(pseudogenome(&config, "s1"), PathBuf::from("/out/pseudogenomes/s1.pseudogenome.fa"));
    }

    #[test]
    fn test_trimmomatic_keeps_stderr_log() {
        let stage = TrimmomaticStage::new(config(Toolchain::Gatk, None), None);
        let (pipeline, output) = stage.command("s_1.fq.gz", Path::new("/in/s_1.fq.gz"));
        assert_eq!(output, PathBuf::from("/out/QC_files/trimmed.s_1.fq.gz"));
        assert!(pipeline
            .render()
            .ends_with("2> /out/QC_files/trimmomatic_logfile_for_s_1.fq.gz.log"));
    }

    #[test]
    fn test_lite_indexes_only_published_bam() {
        let lite = MarkDuplicatesStage::new(config(Toolchain::Lite, None));
        assert_eq!(
            lite.final_bam("s1"),
            PathBuf::from("/out/bams/alignment_file.s1.sorted.nodup.bam")
        );
        let gatk = MarkDuplicatesStage::new(config(Toolchain::Gatk, None));
        assert_eq!(gatk.final_bam("s1"), nodup_bam(&gatk.config, "s1"));
    }

    #[tokio::test]
    async fn test_stage_without_bin_dir_fails() -> anyhow::Result<()> {
        let registry = crate::utils::intake::classify_inputs(&["s1.fq"])?;
        let sample = registry.get("s1").unwrap();
        let stage = ConsensusStage::new(config(Toolchain::Gatk, None));
        let result = stage
            .invoke(StageRequest {
                sample_key: "s1",
                artifact: Path::new("/out/bcfs/s1.bcf"),
                sample: &sample,
            })
            .await;
        assert!(matches!(result, Err(PipelineError::Environment(_))));
        Ok(())
    }
}
