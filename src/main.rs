use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use env_logger::{Builder, Target};
use log::{LevelFilter, error, info};

use wgs_pipelines::cli::args::Commands;
use wgs_pipelines::cli::parse;
use wgs_pipelines::config::defs::{LOG_FILE, OutputLayout};
use wgs_pipelines::pipelines::align::{self, AlignJob};
use wgs_pipelines::pipelines::qcheck::{self, QcJob};
use wgs_pipelines::pipelines::{classify, envtest};

/// Log sink that copies every line to stderr and, once a run has its output
/// directory, to `<out>/log.txt`.
#[derive(Clone, Default)]
struct LogSink {
    log_file: Arc<Mutex<Option<File>>>,
}

impl LogSink {
    fn attach(&self, path: &Path) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let mut slot = self
            .log_file
            .lock()
            .map_err(|_| anyhow::anyhow!("log file lock poisoned"))?;
        *slot = Some(file);
        Ok(())
    }
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        if let Ok(mut slot) = self.log_file.lock() {
            if let Some(file) = slot.as_mut() {
                file.write_all(buf)?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        if let Ok(mut slot) = self.log_file.lock() {
            if let Some(file) = slot.as_mut() {
                file.flush()?;
            }
        }
        Ok(())
    }
}

/// Resolves the output directory of a run and makes sure it exists.
/// Without `-o`, a directory named `wgs-<subcommand>-<YYYYMMDDHHMMSS>` is
/// created in the current directory.
///
/// # Arguments
/// * `out_dir` - The `-o` value, if given.
/// * `subcommand` - Used in the default name.
/// * `cwd` - The current working directory.
/// # Returns
/// path to the output directory.
fn setup_output_dir(out_dir: Option<&PathBuf>, subcommand: &str, cwd: &Path) -> Result<PathBuf> {
    let out_dir = match out_dir {
        Some(path) if path.is_absolute() => path.clone(),
        Some(path) => cwd.join(path),
        None => cwd.join(format!(
            "wgs-{}-{}",
            subcommand,
            chrono::Local::now().format("%Y%m%d%H%M%S")
        )),
    };
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;
    Ok(out_dir)
}

fn init_logger(log_level: LevelFilter, sink: LogSink) {
    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(sink)))
        .init();
}

/// Validates the command, creates its output directory and runs it. Nothing
/// is written to disk before the inputs pass validation.
async fn dispatch(command: Commands, cwd: PathBuf, log_level: LevelFilter, sink: &LogSink) -> Result<()> {
    match command {
        Commands::Classify(a) => {
            classify::run(&a.input, &cwd, a.count_reads)?;
        }
        Commands::Align(a) => {
            let job = AlignJob {
                inputs: a.input,
                reference: a.reference,
                threads: a.threads,
                toolchain: a.toolchain,
                keep_temp: a.keep,
                bin_dir: a.bin_dir,
            };
            let (job, registry) = align::validate_job(job, &cwd)?;
            let out_dir = setup_output_dir(a.out_dir.as_ref(), "align", &cwd)?;
            sink.attach(&out_dir.join(LOG_FILE))?;
            align::run_validated(job, registry, cwd, OutputLayout::new(&out_dir), log_level).await?;
        }
        Commands::Qcheck(q) => {
            let job = QcJob {
                inputs: q.input,
                threads: q.threads,
                bin_dir: q.bin_dir,
                align_reference: if q.align { q.reference } else { None },
                toolchain: q.toolchain,
                keep_temp: q.keep,
            };
            let (job, registry) = qcheck::validate_job(job, &cwd)?;
            let out_dir = setup_output_dir(q.out_dir.as_ref(), "qcheck", &cwd)?;
            sink.attach(&out_dir.join(LOG_FILE))?;
            qcheck::run_validated(job, registry, cwd, OutputLayout::new(&out_dir), log_level).await?;
        }
        Commands::Envtest(e) => {
            envtest::run(e.toolchain, e.bin_dir).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();
    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let sink = LogSink::default();
    init_logger(log_level, sink.clone());

    let cwd = env::current_dir()?;
    info!("The current directory is {:?}", cwd);

    if let Err(e) = dispatch(args.command, cwd, log_level, &sink).await {
        error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
        std::process::exit(1);
    }

    info!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}
