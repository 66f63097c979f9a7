use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::defs::BIN_ENV_VAR;

/// Which external tools back the per-sample stages.
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq)]
pub enum Toolchain {
    /// BWA, Picard MarkDuplicates and GATK indel realignment
    #[default]
    Gatk,
    /// Bowtie2 and samtools rmdup, no indel realignment
    Lite,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "wgs-pipelines", version, about = "A collection of tools for bacterial WGS data")]
pub struct Arguments {
    #[arg(short = 'v', long = "verbose", action, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Group input FASTQ files into samples and print the result
    Classify(ClassifyArgs),
    /// Align, SNP call and generate a pseudogenome for each sample
    Align(AlignArgs),
    /// Run basic QC on FASTQ files, optionally followed by the align pipeline
    Qcheck(QcheckArgs),
    /// Test the runtime environment for required software
    Envtest(EnvtestArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ClassifyArgs {
    #[arg(required = true, help = "Input FASTQ files (can be .gz)")]
    pub input: Vec<PathBuf>,

    #[arg(long, default_value_t = false, help = "Count reads in every input file")]
    pub count_reads: bool,
}

#[derive(Args, Debug, Clone)]
pub struct AlignArgs {
    #[arg(required = true, help = "Input FASTQ files (can be .gz)")]
    pub input: Vec<PathBuf>,

    #[arg(short = 'r', long = "reference", help = "Reference sequence in FASTA format")]
    pub reference: PathBuf,

    #[arg(short = 'o', long = "out", help = "Output directory. Defaults to './wgs-align-<YYYYMMDDHHMMSS>'.")]
    pub out_dir: Option<PathBuf>,

    #[arg(short = 't', long, default_value_t = 0, help = "Number of processors to use [default: maximum]")]
    pub threads: usize,

    #[arg(short = 'k', long = "keep", default_value_t = false, help = "Keep temporary files")]
    pub keep: bool,

    #[arg(long, default_value = "gatk", value_enum)]
    pub toolchain: Toolchain,

    #[arg(long = "bin-dir", env = BIN_ENV_VAR, help = "Directory holding GATK, Picard and vcfutils.pl")]
    pub bin_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct QcheckArgs {
    #[arg(required = true, help = "Input FASTQ files (can be .gz)")]
    pub input: Vec<PathBuf>,

    #[arg(short = 'o', long = "out", help = "Output directory. Defaults to './wgs-qcheck-<YYYYMMDDHHMMSS>'.")]
    pub out_dir: Option<PathBuf>,

    #[arg(short = 't', long, default_value_t = 0, help = "Number of processors to use [default: maximum]")]
    pub threads: usize,

    #[arg(short = 'a', long, default_value_t = false, requires = "reference", help = "Run the align pipeline after the QC check finishes")]
    pub align: bool,

    #[arg(short = 'r', long = "reference", help = "Reference sequence (required with --align)")]
    pub reference: Option<PathBuf>,

    #[arg(short = 'k', long = "keep", default_value_t = false, help = "Keep temporary files of the align pipeline")]
    pub keep: bool,

    #[arg(long, default_value = "gatk", value_enum)]
    pub toolchain: Toolchain,

    #[arg(long = "bin-dir", env = BIN_ENV_VAR)]
    pub bin_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct EnvtestArgs {
    #[arg(long, default_value = "gatk", value_enum)]
    pub toolchain: Toolchain,

    #[arg(long = "bin-dir", env = BIN_ENV_VAR)]
    pub bin_dir: Option<PathBuf>,
}
