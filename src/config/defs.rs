use std::collections::HashMap;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use log::LevelFilter;
use thiserror::Error;

use crate::cli::args::Toolchain;

// External software
pub const GZIP_EXT: &str = "gz";
pub const JAVA_TAG: &str = "java";
pub const BWA_TAG: &str = "bwa";
pub const BOWTIE2_TAG: &str = "bowtie2";
pub const BOWTIE2_BUILD_TAG: &str = "bowtie2-build";
pub const SAMTOOLS_TAG: &str = "samtools";
pub const BCFTOOLS_TAG: &str = "bcftools";
pub const FASTQC_TAG: &str = "fastqc";
pub const TRIMMOMATIC_TAG: &str = "trimmomatic";
pub const KRAKEN_TAG: &str = "kraken";
pub const KRAKEN_REPORT_TAG: &str = "kraken-report";
pub const MULTIQC_TAG: &str = "multiqc";

// Auxiliary bin directory contents
pub const BIN_ENV_VAR: &str = "WGS_PIPELINES_BIN";
pub const GATK_JAR: &str = "GenomeAnalysisTK.jar";
pub const PICARD_JAR: &str = "picard.jar";
pub const VCFUTILS_SCRIPT: &str = "vcfutils.pl";
pub const KRAKEN_DB_DIR: &str = "kraken_db";
pub const ADAPTERS_FASTA: &str = "adapters.fa";

lazy_static! {
    /// Minimum (major, minor) versions for tools that report one via `--version`.
    pub static ref TOOL_VERSIONS: HashMap<&'static str, (u32, u32)> = {
        let mut m = HashMap::new();
        m.insert(SAMTOOLS_TAG, (1, 4));
        m.insert(BCFTOOLS_TAG, (1, 4));
        m
    };
}

pub const QC_PROGRAMS: &[&str] = &[
    FASTQC_TAG,
    TRIMMOMATIC_TAG,
    KRAKEN_TAG,
    KRAKEN_REPORT_TAG,
    MULTIQC_TAG,
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamtoolsSubcommand {
    View,
    Fixmate,
    Sort,
    Index,
    Faidx,
    Dict,
    Rmdup,
    Mpileup,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BcftoolsSubcommand {
    Call,
    View,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GatkSubcommand {
    RealignerTargetCreator,
    IndelRealigner,
}

// Static filenames and directories
pub const TMP_DIR: &str = "tmp";
pub const BAMS_DIR: &str = "bams";
pub const BCFS_DIR: &str = "bcfs";
pub const PSEUDOGENOMES_DIR: &str = "pseudogenomes";
pub const QC_DIR: &str = "QC_files";
pub const LOG_FILE: &str = "log.txt";
pub const REFERENCE_FASTA: &str = "reference.fa";
pub const REFERENCE_DICT: &str = "reference.dict";

// Static parameters
pub const MIN_MAPPING_QUALITY: u8 = 10;
pub const MPILEUP_MAX_DEPTH: u32 = 1000;
pub const CONSENSUS_MIN_DEPTH: u32 = 5;
pub const JAVA_HEAP: &str = "-Xmx2g";
pub const JAVA_STACK: &str = "-Xss512k";

pub const FASTQ_EXTS: &[&'static str] = &["fastq", "fq"];
pub const MATE_SUFFIXES: &[(&'static str, Mate)] = &[("_1", Mate::First), ("_2", Mate::Second)];

/// Which read file of a pair a path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mate {
    First,
    Second,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input '{path}': {reason}")]
    InvalidInput { path: PathBuf, reason: String },

    #[error("File format not supported: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("Only one read file found for sample '{0}', which looks paired")]
    IncompleteSample(String),

    #[error("Sample '{sample}' already has a read file for this slot: {path}")]
    DuplicateInput { sample: String, path: PathBuf },

    #[error("Environment check failed: {0}")]
    Environment(String),

    #[error("{tool} failed: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("Stage '{stage}' failed for sample '{sample}': {error}")]
    StageFailed {
        sample: String,
        stage: String,
        error: String,
    },

    #[error("Sample '{0}' is not in the registry")]
    UnknownSample(String),

    #[error("A worker stopped unexpectedly: {0}")]
    WorkerPanicked(String),

    #[error("IO error: {0}")]
    IOError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::IOError(e.to_string())
    }
}

/// Directory layout of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLayout {
    pub root: PathBuf,
    pub tmp: PathBuf,
    pub bams: PathBuf,
    pub bcfs: PathBuf,
    pub pseudogenomes: PathBuf,
    pub qc: PathBuf,
    pub log_file: PathBuf,
}

impl OutputLayout {
    pub fn new(root: &Path) -> Self {
        OutputLayout {
            root: root.to_path_buf(),
            tmp: root.join(TMP_DIR),
            bams: root.join(BAMS_DIR),
            bcfs: root.join(BCFS_DIR),
            pseudogenomes: root.join(PSEUDOGENOMES_DIR),
            qc: root.join(QC_DIR),
            log_file: root.join(LOG_FILE),
        }
    }

    pub fn reference(&self) -> PathBuf {
        self.tmp.join(REFERENCE_FASTA)
    }

    pub fn reference_dict(&self) -> PathBuf {
        self.tmp.join(REFERENCE_DICT)
    }
}

pub struct RunConfig {
    pub cwd: PathBuf,
    pub layout: OutputLayout,
    pub reference: Option<PathBuf>,
    pub threads: usize,
    pub workers: usize,
    /// Threads given to each external tool invocation.
    pub tool_threads: usize,
    pub toolchain: Toolchain,
    pub keep_temp: bool,
    pub bin_dir: Option<PathBuf>,
    pub log_level: LevelFilter,
}

impl RunConfig {
    /// Resolves a file inside the auxiliary bin directory.
    pub fn bin_file(&self, name: &str) -> Result<PathBuf, PipelineError> {
        self.bin_dir
            .as_ref()
            .map(|dir| dir.join(name))
            .ok_or_else(|| PipelineError::Environment(format!("{} is not set", BIN_ENV_VAR)))
    }
}
