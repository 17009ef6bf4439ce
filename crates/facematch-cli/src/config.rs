use facematch_core::{AnalyzerConfig, DetectorBackend, DistanceMetric, RecognitionModel};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// CLI configuration: defaults, then an optional TOML file named by
/// `FACEMATCH_CONFIG`, then `FACEMATCH_*` environment overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub analyzer: AnalyzerConfig,
    /// `tracing` filter directive; `off` keeps stderr quiet.
    pub log: String,
    /// Environment overrides that failed to parse, as `(key, raw value)`.
    /// Loading happens before logging is up, so the caller reports these.
    pub ignored_overrides: Vec<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            analyzer: AnalyzerConfig::default(),
            log: "off".to_string(),
            ignored_overrides: Vec::new(),
        }
    }
}

/// On-disk layout of the optional TOML file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    model_dir: Option<PathBuf>,
    detector: Option<DetectorBackend>,
    recognition_model: Option<RecognitionModel>,
    distance_metric: Option<DistanceMetric>,
    detection_threshold: Option<f32>,
    intra_threads: Option<usize>,
    log: Option<String>,
}

impl Config {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = lookup("FACEMATCH_CONFIG").filter(|p| !p.is_empty()) {
            config.apply_file(&read_file(Path::new(&path))?);
        }
        config.apply_env(&lookup);

        Ok(config)
    }

    fn apply_file(&mut self, file: &FileConfig) {
        let analyzer = &mut self.analyzer;
        if let Some(dir) = &file.model_dir {
            analyzer.model_dir = dir.clone();
        }
        if let Some(detector) = file.detector {
            analyzer.detector = detector;
        }
        if let Some(model) = file.recognition_model {
            analyzer.recognition_model = model;
        }
        if let Some(metric) = file.distance_metric {
            analyzer.distance_metric = metric;
        }
        if let Some(threshold) = file.detection_threshold {
            analyzer.detection_threshold = threshold;
        }
        if let Some(threads) = file.intra_threads {
            analyzer.intra_threads = threads.max(1);
        }
        if let Some(log) = &file.log {
            self.log = log.clone();
        }
    }

    fn apply_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        let analyzer = &mut self.analyzer;
        if let Some(dir) = lookup("FACEMATCH_MODEL_DIR").filter(|d| !d.is_empty()) {
            analyzer.model_dir = PathBuf::from(dir);
        }
        let ignored = &mut self.ignored_overrides;
        analyzer.detector = env_parse(lookup, "FACEMATCH_DETECTOR", analyzer.detector, ignored);
        analyzer.recognition_model =
            env_parse(lookup, "FACEMATCH_RECOGNITION_MODEL", analyzer.recognition_model, ignored);
        analyzer.distance_metric =
            env_parse(lookup, "FACEMATCH_DISTANCE_METRIC", analyzer.distance_metric, ignored);
        analyzer.detection_threshold =
            env_parse(lookup, "FACEMATCH_DETECTION_THRESHOLD", analyzer.detection_threshold, ignored);
        analyzer.intra_threads =
            env_parse(lookup, "FACEMATCH_INTRA_THREADS", analyzer.intra_threads, ignored).max(1);
        if let Some(log) = lookup("FACEMATCH_LOG").filter(|l| !l.is_empty()) {
            self.log = log;
        }
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse `key` with `FromStr`, keeping `current` when unset or malformed.
/// Malformed values are recorded in `ignored`.
fn env_parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    current: T,
    ignored: &mut Vec<(String, String)>,
) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                ignored.push((key.to_string(), raw));
                current
            }
        },
        None => current,
    }
}
