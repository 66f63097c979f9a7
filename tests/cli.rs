use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use anyhow::Result;
use tempfile::tempdir;

const READS: &str = "@r1\nACGT\n+\nIIII\n";

fn wgs_pipelines(cwd: &Path, args: &[&str]) -> Result<Output> {
    Ok(Command::new(env!("CARGO_BIN_EXE_wgs-pipelines"))
        .current_dir(cwd)
        .env_remove("WGS_PIPELINES_BIN")
        .args(args)
        .output()?)
}

fn run_dirs(cwd: &Path, prefix: &str) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(cwd)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if name.starts_with(prefix) {
            names.push(name);
        }
    }
    Ok(names)
}

#[test]
fn classify_rejects_unsupported_file() -> Result<()> {
    let dir = tempdir()?;
    fs::write(dir.path().join("notes.txt"), "not reads\n")?;

    let output = wgs_pipelines(dir.path(), &["classify", "notes.txt"])?;

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8(output.stderr)?.contains("Pipeline failed"));
    Ok(())
}

#[test]
fn classify_prints_paired_sample() -> Result<()> {
    let dir = tempdir()?;
    fs::write(dir.path().join("s_1.fq"), READS)?;
    fs::write(dir.path().join("s_2.fq"), READS)?;

    let output = wgs_pipelines(dir.path(), &["classify", "s_1.fq", "s_2.fq"])?;

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.lines().any(|line| line.starts_with("s\tpaired\t")), "{}", stdout);
    Ok(())
}

#[test]
fn align_rejects_lone_mate_before_creating_output() -> Result<()> {
    let dir = tempdir()?;
    fs::write(dir.path().join("ref.fa"), ">chr\nACGT\n")?;
    fs::write(dir.path().join("s_1.fq"), READS)?;

    let output = wgs_pipelines(dir.path(), &["align", "-r", "ref.fa", "-o", "run", "s_1.fq"])?;
    assert_eq!(output.status.code(), Some(1));
    assert!(!dir.path().join("run").exists());

    let output = wgs_pipelines(dir.path(), &["align", "-r", "ref.fa", "s_1.fq"])?;
    assert_eq!(output.status.code(), Some(1));
    assert!(run_dirs(dir.path(), "wgs-align-")?.is_empty());
    Ok(())
}

#[test]
fn align_rejects_missing_input_before_creating_output() -> Result<()> {
    let dir = tempdir()?;
    fs::write(dir.path().join("ref.fa"), ">chr\nACGT\n")?;

    let output = wgs_pipelines(dir.path(), &["align", "-r", "ref.fa", "-o", "run", "absent.fq"])?;

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8(output.stderr)?.contains("absent.fq"));
    assert!(!dir.path().join("run").exists());
    Ok(())
}

#[test]
fn qcheck_rejects_missing_input_before_creating_output() -> Result<()> {
    let dir = tempdir()?;

    let output = wgs_pipelines(dir.path(), &["qcheck", "absent.fq"])?;

    assert_eq!(output.status.code(), Some(1));
    assert!(run_dirs(dir.path(), "wgs-qcheck-")?.is_empty());
    Ok(())
}
