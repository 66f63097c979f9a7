/// Functions and structs for building and running external tool command lines

use std::borrow::Cow;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use futures::future::join_all;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use tokio::process::Command;

use crate::config::defs::PipelineError;

lazy_static! {
    static ref VERSION_RE: Regex = Regex::new(r"(\d+)\.(\d+)").expect("valid version regex");
}

/// Number of stderr lines kept when a tool fails.
const STDERR_TAIL_LINES: usize = 20;

/// One program and its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub tool: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(tool: &str) -> Self {
        CommandSpec {
            tool: tool.to_string(),
            args: Vec::new(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Shell-safe rendering of the command.
    pub fn render(&self) -> String {
        std::iter::once(self.tool.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Commands joined with pipes, optionally redirecting the last stdout and
/// every stderr to files. Each command is its own child process, so dropping
/// the future returned by `run` kills the whole chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellPipeline {
    commands: Vec<CommandSpec>,
    stdout: Option<PathBuf>,
    stderr: Option<PathBuf>,
}

impl ShellPipeline {
    pub fn new(first: CommandSpec) -> Self {
        ShellPipeline {
            commands: vec![first],
            stdout: None,
            stderr: None,
        }
    }

    pub fn pipe(mut self, next: CommandSpec) -> Self {
        self.commands.push(next);
        self
    }

    pub fn redirect_to(mut self, path: &Path) -> Self {
        self.stdout = Some(path.to_path_buf());
        self
    }

    /// Sends the stderr of every command to `path` instead of keeping it for
    /// error reports.
    pub fn redirect_stderr_to(mut self, path: &Path) -> Self {
        self.stderr = Some(path.to_path_buf());
        self
    }

    /// Shell-equivalent rendering, for logs and error messages.
    pub fn render(&self) -> String {
        let mut line = self
            .commands
            .iter()
            .map(CommandSpec::render)
            .collect::<Vec<_>>()
            .join(" | ");
        if let Some(out) = &self.stdout {
            line.push_str(" > ");
            line.push_str(&shell_quote(&out.to_string_lossy()));
        }
        if let Some(err) = &self.stderr {
            line.push_str(" 2> ");
            line.push_str(&shell_quote(&err.to_string_lossy()));
        }
        line
    }

    /// Tool names in the chain, e.g. `bwa | samtools`.
    pub fn tools(&self) -> String {
        self.commands
            .iter()
            .map(|c| c.tool.as_str())
            .collect::<Vec<_>>()
            .join(" | ")
    }

    /// Runs the pipeline to completion. Every child is spawned with
    /// `kill_on_drop`, so cancelling the returned future kills all of them.
    /// Like `set -o pipefail`, any command exiting non-zero fails the run; the
    /// leftmost failure is reported.
    pub async fn run(&self) -> Result<(), PipelineError> {
        let line = self.render();
        debug!("Running: {}", line);

        let stderr_log = match &self.stderr {
            Some(path) => Some(File::create(path)?),
            None => None,
        };

        let mut children = Vec::with_capacity(self.commands.len());
        let mut upstream: Option<Stdio> = None;
        for (i, spec) in self.commands.iter().enumerate() {
            let last = i + 1 == self.commands.len();
            let stdout = match (&self.stdout, last) {
                (_, false) => Stdio::piped(),
                (Some(path), true) => Stdio::from(File::create(path)?),
                (None, true) => Stdio::null(),
            };
            let stderr = match &stderr_log {
                Some(file) => Stdio::from(file.try_clone()?),
                None => Stdio::piped(),
            };

            let mut child = Command::new(&spec.tool)
                .args(&spec.args)
                .stdin(upstream.take().unwrap_or_else(Stdio::null))
                .stdout(stdout)
                .stderr(stderr)
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| PipelineError::ToolExecution {
                    tool: spec.tool.clone(),
                    error: format!("Failed to spawn: {}. Is {} installed?", e, spec.tool),
                })?;

            if !last {
                let out = child.stdout.take().ok_or_else(|| PipelineError::ToolExecution {
                    tool: spec.tool.clone(),
                    error: "stdout was not captured".to_string(),
                })?;
                upstream = Some(out.try_into()?);
            }
            children.push(child);
        }

        let outputs = join_all(children.into_iter().map(|child| child.wait_with_output())).await;
        for (spec, output) in self.commands.iter().zip(outputs) {
            let output = output?;
            if output.status.success() {
                continue;
            }
            let detail = match &self.stderr {
                Some(path) => format!("see {}", path.display()),
                None => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let lines: Vec<&str> = stderr.lines().collect();
                    lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n")
                }
            };
            return Err(PipelineError::ToolExecution {
                tool: spec.tool.clone(),
                error: format!("`{}` exited with {}: {}", line, output.status, detail.trim()),
            });
        }
        Ok(())
    }
}

/// Single-quotes a word for a POSIX shell unless it only holds safe characters.
pub fn shell_quote(word: &str) -> Cow<'_, str> {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c));
    if safe {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', r"'\''")))
    }
}

/// Pulls the first `major.minor` out of a `--version` banner.
pub fn parse_version(text: &str) -> Option<(u32, u32)> {
    let caps = VERSION_RE.captures(text)?;
    let major = caps.get(1)?.as_str().parse().ok()?;
    let minor = caps.get(2)?.as_str().parse().ok()?;
    Some((major, minor))
}

/// Runs `tool --version` and returns its first non-empty output line.
pub async fn tool_version(tool: &str) -> Result<String, PipelineError> {
    let output = Command::new(tool)
        .arg("--version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| PipelineError::ToolExecution {
            tool: tool.to_string(),
            error: format!("Failed to spawn: {}. Is {} installed?", e, tool),
        })?;

    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).into_owned()
    };
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PipelineError::ToolExecution {
            tool: tool.to_string(),
            error: format!("No output from {} --version", tool),
        })
}

pub mod bwa {
    use super::CommandSpec;
    use crate::config::defs::BWA_TAG;
    use std::path::Path;

    pub fn index(reference: &Path) -> CommandSpec {
        CommandSpec::new(BWA_TAG).arg("index").path(reference)
    }

    pub fn mem(threads: usize, sample_key: &str, reference: &Path, reads: &[&Path]) -> CommandSpec {
        let mut cmd = CommandSpec::new(BWA_TAG)
            .arg("mem")
            .arg("-t")
            .arg(threads.to_string())
            .arg("-R")
            .arg(format!(r"@RG\tID:{0}\tSM:{0}\tLB:library1", sample_key))
            .path(reference);
        for r in reads {
            cmd = cmd.path(r);
        }
        cmd
    }
}

pub mod bowtie2 {
    use super::CommandSpec;
    use crate::config::defs::{BOWTIE2_BUILD_TAG, BOWTIE2_TAG};
    use std::path::Path;

    pub fn build(threads: usize, reference: &Path, index_prefix: &Path) -> CommandSpec {
        CommandSpec::new(BOWTIE2_BUILD_TAG)
            .arg("--threads")
            .arg(threads.to_string())
            .path(reference)
            .path(index_prefix)
    }

    pub fn align(threads: usize, sample_key: &str, index_prefix: &Path, reads: &[&Path]) -> CommandSpec {
        let mut cmd = CommandSpec::new(BOWTIE2_TAG)
            .arg("-p")
            .arg(threads.to_string())
            .arg("--rg-id")
            .arg(sample_key)
            .arg("--rg")
            .arg(format!("SM:{}", sample_key))
            .arg("--rg")
            .arg("LB:library1")
            .arg("-x")
            .path(index_prefix);
        match reads {
            [r1, r2] => cmd = cmd.arg("-1").path(r1).arg("-2").path(r2),
            _ => {
                for r in reads {
                    cmd = cmd.arg("-U").path(r);
                }
            }
        }
        cmd
    }
}

pub mod samtools {
    use super::CommandSpec;
    use crate::config::defs::{SAMTOOLS_TAG, SamtoolsSubcommand};
    use std::path::Path;

    fn subcommand(sub: SamtoolsSubcommand) -> CommandSpec {
        let tag = match sub {
            SamtoolsSubcommand::View => "view",
            SamtoolsSubcommand::Fixmate => "fixmate",
            SamtoolsSubcommand::Sort => "sort",
            SamtoolsSubcommand::Index => "index",
            SamtoolsSubcommand::Faidx => "faidx",
            SamtoolsSubcommand::Dict => "dict",
            SamtoolsSubcommand::Rmdup => "rmdup",
            SamtoolsSubcommand::Mpileup => "mpileup",
        };
        CommandSpec::new(SAMTOOLS_TAG).arg(tag)
    }

    /// SAM on stdin to BAM on stdout, dropping reads below `min_mapq`.
    pub fn view_filter(threads: usize, min_mapq: u8) -> CommandSpec {
        subcommand(SamtoolsSubcommand::View)
            .args(["-@".to_string(), threads.to_string()])
            .args(["-q".to_string(), min_mapq.to_string()])
            .args(["-bh", "-"])
    }

    pub fn fixmate(threads: usize) -> CommandSpec {
        subcommand(SamtoolsSubcommand::Fixmate)
            .args(["-@".to_string(), threads.to_string()])
            .args(["-O", "bam", "-", "-"])
    }

    pub fn sort(threads: usize, output: &Path) -> CommandSpec {
        subcommand(SamtoolsSubcommand::Sort)
            .args(["-@".to_string(), threads.to_string()])
            .args(["-", "-o"])
            .path(output)
    }

    pub fn index(bam: &Path) -> CommandSpec {
        subcommand(SamtoolsSubcommand::Index).path(bam)
    }

    pub fn faidx(reference: &Path) -> CommandSpec {
        subcommand(SamtoolsSubcommand::Faidx).path(reference)
    }

    pub fn dict(reference: &Path) -> CommandSpec {
        subcommand(SamtoolsSubcommand::Dict).path(reference)
    }

    /// Single-end data needs `-s`; paired data uses the default mode.
    pub fn rmdup(paired: bool, input: &Path, output: &Path) -> CommandSpec {
        let cmd = subcommand(SamtoolsSubcommand::Rmdup);
        let cmd = if paired { cmd } else { cmd.arg("-s") };
        cmd.path(input).path(output)
    }

    pub fn mpileup(max_depth: u32, reference: &Path, bam: &Path) -> CommandSpec {
        subcommand(SamtoolsSubcommand::Mpileup)
            .args(["-d".to_string(), max_depth.to_string()])
            .args(["-guB", "-t", "DP,DV,DP4,SP", "-f"])
            .path(reference)
            .path(bam)
    }
}

pub mod picard {
    use super::CommandSpec;
    use crate::config::defs::{JAVA_HEAP, JAVA_STACK, JAVA_TAG};
    use std::path::Path;

    pub fn mark_duplicates(picard_jar: &Path, input: &Path, output: &Path) -> CommandSpec {
        CommandSpec::new(JAVA_TAG)
            .args([JAVA_HEAP, JAVA_STACK, "-jar"])
            .path(picard_jar)
            .args(["MarkDuplicates", "VALIDATION_STRINGENCY=LENIENT", "METRICS_FILE=/dev/null"])
            .arg(format!("INPUT={}", input.display()))
            .arg(format!("OUTPUT={}", output.display()))
    }
}

pub mod gatk {
    use super::CommandSpec;
    use crate::config::defs::{GatkSubcommand, JAVA_HEAP, JAVA_STACK, JAVA_TAG};
    use std::path::Path;

    fn tool(gatk_jar: &Path, sub: GatkSubcommand, reference: &Path, input: &Path) -> CommandSpec {
        let walker = match sub {
            GatkSubcommand::RealignerTargetCreator => "RealignerTargetCreator",
            GatkSubcommand::IndelRealigner => "IndelRealigner",
        };
        CommandSpec::new(JAVA_TAG)
            .args([JAVA_HEAP, JAVA_STACK, "-jar"])
            .path(gatk_jar)
            .args(["-T", walker])
            .arg("-R")
            .path(reference)
            .arg("-I")
            .path(input)
    }

    pub fn target_creator(gatk_jar: &Path, threads: usize, reference: &Path, input: &Path, intervals: &Path) -> CommandSpec {
        tool(gatk_jar, GatkSubcommand::RealignerTargetCreator, reference, input)
            .args(["-nt".to_string(), threads.to_string()])
            .args(["-nct", "1", "-o"])
            .path(intervals)
    }

    pub fn indel_realigner(gatk_jar: &Path, reference: &Path, input: &Path, intervals: &Path, output: &Path) -> CommandSpec {
        tool(gatk_jar, GatkSubcommand::IndelRealigner, reference, input)
            .args(["-nct", "1", "-targetIntervals"])
            .path(intervals)
            .arg("-o")
            .path(output)
    }
}

pub mod bcftools {
    use super::CommandSpec;
    use crate::config::defs::{BCFTOOLS_TAG, BcftoolsSubcommand};
    use std::path::Path;

    fn subcommand(sub: BcftoolsSubcommand) -> CommandSpec {
        let tag = match sub {
            BcftoolsSubcommand::Call => "call",
            BcftoolsSubcommand::View => "view",
        };
        CommandSpec::new(BCFTOOLS_TAG).arg(tag)
    }

    /// Consensus caller, haploid.
    pub fn call(input: &Path, output: &Path) -> CommandSpec {
        subcommand(BcftoolsSubcommand::Call)
            .args(["-c", "--ploidy", "1"])
            .path(input)
            .args(["-O", "u", "-o"])
            .path(output)
    }

    pub fn view(input: &Path) -> CommandSpec {
        subcommand(BcftoolsSubcommand::View).path(input)
    }
}

pub mod vcfutils {
    use super::CommandSpec;
    use std::path::Path;

    pub fn vcf2fa(script: &Path, min_depth: u32) -> CommandSpec {
        CommandSpec::new(&script.to_string_lossy())
            .arg("vcf2fa")
            .arg("-d")
            .arg(min_depth.to_string())
    }
}

pub mod qc {
    use super::CommandSpec;
    use crate::config::defs::{FASTQC_TAG, KRAKEN_REPORT_TAG, KRAKEN_TAG, MULTIQC_TAG, TRIMMOMATIC_TAG};
    use std::path::Path;

    pub fn fastqc(threads: usize, out_dir: &Path, reads: &Path) -> CommandSpec {
        CommandSpec::new(FASTQC_TAG)
            .args(["--threads".to_string(), threads.to_string()])
            .args(["--quiet", "--outdir"])
            .path(out_dir)
            .path(reads)
    }

    pub fn kraken(threads: usize, db: &Path, reads: &Path, compressed: bool) -> CommandSpec {
        let cmd = CommandSpec::new(KRAKEN_TAG)
            .args(["--threads".to_string(), threads.to_string()])
            .args(["--preload", "--fastq-input"]);
        let cmd = if compressed { cmd.arg("--gzip-compressed") } else { cmd };
        cmd.arg("--db").path(db).path(reads)
    }

    pub fn kraken_report(db: &Path) -> CommandSpec {
        CommandSpec::new(KRAKEN_REPORT_TAG).arg("--db").path(db)
    }

    /// Single-end trimming; adapter clipping only when an adapter file exists.
    pub fn trimmomatic(threads: usize, reads: &Path, output: &Path, adapters: Option<&Path>) -> CommandSpec {
        let mut cmd = CommandSpec::new(TRIMMOMATIC_TAG)
            .arg("SE")
            .args(["-threads".to_string(), threads.to_string()])
            .path(reads)
            .path(output);
        if let Some(adapters) = adapters {
            cmd = cmd.arg(format!("ILLUMINACLIP:{}:2:30:10", adapters.display()));
        }
        cmd.args(["SLIDINGWINDOW:4:20", "MINLEN:100"])
    }

    pub fn multiqc(out_dir: &Path) -> CommandSpec {
        CommandSpec::new(MULTIQC_TAG).arg("-o").path(out_dir).path(out_dir)
    }
}
