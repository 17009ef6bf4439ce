use anyhow::{Context, Result};
use clap::Parser;
use facematch_core::commands::{self, DEFAULT_THRESHOLD};
use facematch_core::{ComparisonResult, InvalidArguments, OnnxAnalyzer, Outcome};
use std::ffi::OsString;
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser, Debug)]
#[command(name = "face_compare", version, about = "Face comparison and detection")]
struct Cli {
    /// First image path (profile)
    image1: Option<OsString>,

    /// Second image path (selfie)
    image2: Option<OsString>,

    /// Detect face in single image
    #[arg(long, value_name = "PATH")]
    detect: Option<OsString>,

    /// Matching threshold, reported when the model has none of its own
    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    threshold: f64,
}

#[derive(Debug, PartialEq)]
enum Mode<'a> {
    Detect(&'a Path),
    Compare { profile: &'a Path, selfie: &'a Path },
}

impl Cli {
    /// `--detect` wins over positionals; empty paths count as absent.
    fn mode(&self) -> Option<Mode<'_>> {
        if let Some(image) = given(&self.detect) {
            return Some(Mode::Detect(image));
        }
        match (given(&self.image1), given(&self.image2)) {
            (Some(profile), Some(selfie)) => Some(Mode::Compare { profile, selfie }),
            _ => None,
        }
    }
}

fn given(arg: &Option<OsString>) -> Option<&Path> {
    arg.as_deref().filter(|p| !p.is_empty()).map(Path::new)
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = Config::load();
    let log_filter = config.as_ref().map_or("off", |c| c.log.as_str());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(log_filter).unwrap_or_else(|_| EnvFilter::new("off")))
        .with_writer(std::io::stderr)
        .init();

    if let Ok(config) = &config {
        for (key, value) in &config.ignored_overrides {
            tracing::warn!(key = %key, value = %value, "ignoring unparseable environment override");
        }
    }

    let Some(mode) = cli.mode() else {
        tracing::info!(?cli, "no usable mode in arguments");
        emit(&Outcome::InvalidArguments(InvalidArguments::default()))?;
        return Ok(ExitCode::SUCCESS);
    };

    let config = match config {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "configuration unusable");
            return unavailable();
        }
    };
    let backends = config.analyzer.backends();

    let mut analyzer = match OnnxAnalyzer::load(config.analyzer) {
        Ok(analyzer) => analyzer,
        Err(err) => {
            tracing::error!(error = %err, "face analysis backend unavailable");
            return unavailable();
        }
    };

    let outcome = match mode {
        Mode::Detect(image) => {
            tracing::info!(image = %image.display(), "detect");
            Outcome::Detection(commands::detect_face(&mut analyzer, image, backends))
        }
        Mode::Compare { profile, selfie } => {
            tracing::info!(profile = %profile.display(), selfie = %selfie.display(), "compare");
            Outcome::Comparison(commands::compare_faces(
                &mut analyzer,
                profile,
                selfie,
                cli.threshold,
                backends,
            ))
        }
    };

    emit(&outcome)?;
    Ok(ExitCode::SUCCESS)
}

/// Print the fixed startup-failure document and exit 1.
fn unavailable() -> Result<ExitCode> {
    emit(&Outcome::Comparison(ComparisonResult::unavailable()))?;
    Ok(ExitCode::FAILURE)
}

/// Write one JSON line to stdout.
fn emit(outcome: &Outcome) -> Result<()> {
    let line = outcome.to_json().context("serializing result")?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}").context("writing result to stdout")?;
    stdout.flush().context("flushing stdout")?;
    tracing::debug!(success = outcome.success(), "result written");
    Ok(())
}
