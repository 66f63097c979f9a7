// src/utils/environment.rs: pre-flight checks for the auxiliary bin directory and PATH programs

use std::env;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info};

use crate::cli::args::Toolchain;
use crate::config::defs::{
    BCFTOOLS_TAG, BOWTIE2_BUILD_TAG, BOWTIE2_TAG, BWA_TAG, GATK_JAR, JAVA_TAG,
    PICARD_JAR, PipelineError, QC_PROGRAMS, SAMTOOLS_TAG, TOOL_VERSIONS, VCFUTILS_SCRIPT,
};
use crate::utils::command::{parse_version, tool_version};

/// Collected outcome of a set of checks. Every check adds one message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvReport {
    pub messages: Vec<String>,
    pub failures: usize,
}

impl EnvReport {
    fn pass(&mut self, message: String) {
        self.messages.push(message);
    }

    fn fail(&mut self, message: String) {
        self.failures += 1;
        self.messages.push(message);
    }

    pub fn passed(&self) -> bool {
        self.failures == 0
    }

    pub fn merge(&mut self, other: EnvReport) {
        self.failures += other.failures;
        self.messages.extend(other.messages);
    }

    /// Logs every message and turns any failure into an Environment error.
    pub fn into_result(self) -> Result<(), PipelineError> {
        for message in &self.messages {
            info!("\t{}", message);
        }
        if self.passed() {
            Ok(())
        } else {
            error!("{} environment check(s) failed", self.failures);
            Err(PipelineError::Environment(format!(
                "{} check(s) failed: {}",
                self.failures,
                self.messages
                    .iter()
                    .filter(|m| m.starts_with("FAIL"))
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("; ")
            )))
        }
    }
}

/// Programs the align pipeline needs on PATH.
pub fn align_programs(toolchain: Toolchain) -> Vec<&'static str> {
    match toolchain {
        Toolchain::Gatk => vec![JAVA_TAG, BWA_TAG, SAMTOOLS_TAG, BCFTOOLS_TAG],
        Toolchain::Lite => vec![BOWTIE2_TAG, BOWTIE2_BUILD_TAG, SAMTOOLS_TAG, BCFTOOLS_TAG],
    }
}

pub fn qc_programs() -> Vec<&'static str> {
    QC_PROGRAMS.to_vec()
}

/// Checks the auxiliary bin directory holds what the toolchain needs.
///
/// # Arguments
///
/// * `bin_dir` - Directory from `--bin-dir` or the environment, if any.
/// * `toolchain` - Selects whether the Java jars are required.
///
/// # Returns
/// EnvReport with one message per check.
pub fn bin_check(bin_dir: Option<&Path>, toolchain: Toolchain) -> EnvReport {
    let mut report = EnvReport::default();
    let Some(bin_dir) = bin_dir else {
        report.fail("FAIL bin directory: not set (use --bin-dir)".to_string());
        return report;
    };
    if !bin_dir.is_dir() {
        report.fail(format!("FAIL bin directory: {} does not exist", bin_dir.display()));
        return report;
    }
    report.pass(format!("ok   bin directory: {}", bin_dir.display()));

    if toolchain == Toolchain::Gatk {
        for jar in [GATK_JAR, PICARD_JAR] {
            let path = bin_dir.join(jar);
            if path.is_file() {
                report.pass(format!("ok   {}", path.display()));
            } else {
                report.fail(format!("FAIL {}: missing", path.display()));
            }
        }
    }

    let script = bin_dir.join(VCFUTILS_SCRIPT);
    match fs::read_to_string(&script) {
        Ok(text) if text.contains("vcf2fa") => report.pass(format!("ok   {}", script.display())),
        Ok(_) => report.fail(format!("FAIL {}: no vcf2fa command", script.display())),
        Err(e) => report.fail(format!("FAIL {}: {}", script.display(), e)),
    }
    report
}

/// Finds an executable on a PATH-style search list.
pub fn locate_program(program: &str, search_path: &OsStr) -> Option<PathBuf> {
    env::split_paths(search_path)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Checks each program is on PATH and, where a minimum is known, new enough.
pub async fn program_test(programs: &[&str]) -> EnvReport {
    let search_path = env::var_os("PATH").unwrap_or_default();
    let mut report = EnvReport::default();

    for program in programs {
        let Some(location) = locate_program(program, &search_path) else {
            report.fail(format!("FAIL {}: not found on PATH", program));
            continue;
        };

        let Some(&minimum) = TOOL_VERSIONS.get(*program) else {
            report.pass(format!("ok   {}: {}", program, location.display()));
            continue;
        };

        match tool_version(program).await {
            Ok(banner) => match parse_version(&banner) {
                Some(found) if found >= minimum => {
                    report.pass(format!("ok   {}: {} ({})", program, location.display(), banner))
                }
                Some((major, minor)) => report.fail(format!(
                    "FAIL {}: version {}.{} is older than {}.{}",
                    program, major, minor, minimum.0, minimum.1
                )),
                None => report.fail(format!("FAIL {}: unreadable version '{}'", program, banner)),
            },
            Err(e) => report.fail(format!("FAIL {}: {}", program, e)),
        }
    }
    report
}

/// All checks the align pipeline needs before touching any data.
pub async fn preflight_align(bin_dir: Option<&Path>, toolchain: Toolchain) -> Result<(), PipelineError> {
    info!("Checking environment for the {:?} toolchain", toolchain);
    let mut report = bin_check(bin_dir, toolchain);
    report.merge(program_test(&align_programs(toolchain)).await);
    report.into_result()
}

pub async fn preflight_qc() -> Result<(), PipelineError> {
    info!("Checking environment for QC");
    program_test(&qc_programs()).await.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path, text: &str) -> std::io::Result<()> {
        fs::write(path, text)
    }

    #[test]
    fn test_bin_check_gatk() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let report = bin_check(Some(dir.path()), Toolchain::Gatk);
        assert_eq!(report.failures, 3);

        touch(&dir.path().join(GATK_JAR), "")?;
        touch(&dir.path().join(PICARD_JAR), "")?;
        touch(&dir.path().join(VCFUTILS_SCRIPT), "#!/usr/bin/perl\nsub vcf2fa {}\n")?;
        let report = bin_check(Some(dir.path()), Toolchain::Gatk);
        assert!(report.passed(), "{:?}", report.messages);
        Ok(())
    }

    #[test]
    fn test_bin_check_lite_needs_only_vcfutils() -> anyhow::Result<()> {
        let dir = tempdir()?;
        touch(&dir.path().join(VCFUTILS_SCRIPT), "print 'hello'\n")?;
        let report = bin_check(Some(dir.path()), Toolchain::Lite);
        assert_eq!(report.failures, 1);
        assert!(report.messages.iter().any(|m| m.contains("no vcf2fa")));
        Ok(())
    }

    #[test]
    fn test_bin_check_unset() {
        let report = bin_check(None, Toolchain::Lite);
        assert!(!report.passed());
        assert!(matches!(report.into_result(), Err(PipelineError::Environment(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_locate_program() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir()?;
        let exe = dir.path().join("mytool");
        touch(&exe, "#!/bin/sh\n")?;
        let plain = dir.path().join("notexec");
        touch(&plain, "")?;
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755))?;
        fs::set_permissions(&plain, fs::Permissions::from_mode(0o644))?;

        let search = env::join_paths([Path::new("/nonexistent"), dir.path()])?;
        assert_eq!(locate_program("mytool", &search), Some(exe));
        assert_eq!(locate_program("notexec", &search), None);
        Ok(())
    }

    #[tokio::test]
    async fn test_program_test_missing() {
        let report = program_test(&["definitely-not-a-real-tool-xyz"]).await;
        assert_eq!(report.failures, 1);
        assert!(report.messages[0].contains("not found on PATH"));
    }

    #[test]
    fn test_align_programs() {
        assert!(align_programs(Toolchain::Gatk).contains(&JAVA_TAG));
        assert!(!align_programs(Toolchain::Lite).contains(&JAVA_TAG));
        assert!(align_programs(Toolchain::Lite).contains(&BOWTIE2_TAG));
    }
}
