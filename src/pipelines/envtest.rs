// src/pipelines/envtest.rs: report whether the machine can run the pipelines

use std::path::PathBuf;

use log::{info, warn};

use crate::cli::args::Toolchain;
use crate::config::defs::PipelineError;
use crate::utils::environment::{EnvReport, align_programs, bin_check, program_test, qc_programs};

/// Runs every check for the toolchain and for QC and logs the results.
/// Fails if anything the align pipeline needs is missing; missing QC programs
/// only warn.
pub async fn run(toolchain: Toolchain, bin_dir: Option<PathBuf>) -> Result<EnvReport, PipelineError> {
    println!("\n-------------\n Environment test\n-------------\n");

    let mut report = bin_check(bin_dir.as_deref(), toolchain);
    report.merge(program_test(&align_programs(toolchain)).await);

    let qc = program_test(&qc_programs()).await;
    for message in &qc.messages {
        info!("\t{}", message);
    }
    if !qc.passed() {
        warn!("{} QC program(s) missing; qcheck will not run", qc.failures);
    }

    report.clone().into_result()?;
    info!("All checks passed for the {:?} toolchain", toolchain);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_envtest_fails_on_empty_bin_dir() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let result = run(Toolchain::Gatk, Some(dir.path().to_path_buf())).await;
        assert!(matches!(result, Err(PipelineError::Environment(_))));
        Ok(())
    }
}
