//! Thin CLI around [`rcps_scheduler`]: load a bundle, run an algorithm,
//! write the result.

use clap::{
    Parser, ValueEnum,
    builder::{Styles, styling::AnsiColor},
};
use miette::{
    Diagnostic, IntoDiagnostic, NamedSource, Result, SourceOffset, SourceSpan,
};
use rcps_scheduler::{AlgorithmResult, BoundedRollout, Bundle, CriticalPath, ParallelSgs, SchedulingAlgorithm, schedule_with};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};
use thiserror::Error;

const STYLE: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().bold())
    .usage(AnsiColor::Green.on_default().bold())
    .literal(AnsiColor::BrightCyan.on_default().bold())
    .placeholder(AnsiColor::Cyan.on_default());

/// Which closed-set algorithm variant to run.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Algorithm {
    /// Plain chronological greedy forward pass.
    ParallelSgs,
    /// Forward pass with the bounded-rollout commit check live (default).
    BoundedRollout,
    /// Target-driven critical-path scheduler.
    CriticalPath,
}

impl Algorithm {
    fn as_scheduling_algorithm(self) -> Box<dyn SchedulingAlgorithm> {
        match self {
            Algorithm::ParallelSgs => Box::new(ParallelSgs),
            Algorithm::BoundedRollout => Box::new(BoundedRollout),
            Algorithm::CriticalPath => Box::new(CriticalPath),
        }
    }
}

/// RCPS scheduling CLI
#[derive(Debug, Parser)]
#[command(version, propagate_version = true, about, long_about = None, styles = STYLE, color = clap::ColorChoice::Always)]
struct Cli {
    /// Path to the bundle describing tasks, resources, and tuning
    #[arg(short, long, value_name = "PATH", default_value_os_t = PathBuf::from("./bundle.json"))]
    bundle: PathBuf,

    /// Path to write the produced schedule
    #[arg(short, long, value_name = "PATH", default_value_os_t = PathBuf::from("./schedule.json"))]
    output: PathBuf,

    /// Which scheduling algorithm to run
    #[arg(short, long, value_enum, default_value_t = Algorithm::BoundedRollout)]
    algorithm: Algorithm,
}

/// IO errors aside from [`NotFound`](std::io::ErrorKind::NotFound).
#[derive(Debug, Diagnostic, Error)]
#[error("could not load {name} data")]
struct LoadError {
    name: &'static str,

    #[source_code]
    source: String,

    #[label(primary, "{e}")]
    primary_span: SourceSpan,

    #[source]
    e: std::io::Error,
}

/// Error while trying to parse a file
#[derive(Debug, Diagnostic, Error)]
#[error("could not parse file")]
struct ParseError {
    #[source_code]
    source: NamedSource<String>,

    #[label(primary, "{e}")]
    primary_span: SourceOffset,

    #[source]
    e: serde_json::Error,
}

fn load<T: Serialize + DeserializeOwned + Default>(path: &Path, name: &'static str) -> Result<T> {
    match File::open(path) {
        // successfully loaded
        Ok(file) => serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            let source = std::fs::read_to_string(path).unwrap_or_default();
            ParseError {
                primary_span: SourceOffset::from_location(&source, e.line(), e.column()),
                e,
                source: NamedSource::new(path.display().to_string(), source).with_language("JSON"),
            }
            .into()
        }),

        // not found, generate one
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let default = T::default();
            File::create(path)
                .into_diagnostic()
                .and_then(|file| serde_json::to_writer_pretty(file, &default).into_diagnostic())?;
            Ok(default)
        }

        // other error
        Err(e) => {
            let source = match path.canonicalize() {
                Ok(absolute) => absolute.display().to_string(),
                Err(_) => path.display().to_string(),
            };
            Err(LoadError {
                e,
                name,
                primary_span: (0..source.len()).into(),
                source,
            }
            .into())
        }
    }
}

fn write<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let file = File::create(path).into_diagnostic()?;
    serde_json::to_writer_pretty(file, value).into_diagnostic()
}

fn main() -> Result<()> {
    let Cli {
        bundle,
        output,
        algorithm,
    } = match Cli::try_parse() {
        Err(e) if e.kind() == clap::error::ErrorKind::DisplayHelp => {
            return e.print().into_diagnostic();
        }
        cli => cli.into_diagnostic(),
    }?;

    let bundle: Bundle = load(&bundle, "bundle")?;
    let result: AlgorithmResult =
        schedule_with(&dbg!(bundle), algorithm.as_scheduling_algorithm().as_ref()).into_diagnostic()?;
    write(&dbg!(result), &output)?;

    Ok(())
}
