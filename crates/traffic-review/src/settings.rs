use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use traffic_review_client::{Backend, Configuration, DEFAULT_BASE_URL};

use crate::cli::{CliArgs, CliSources};
use crate::playback::PlaybackOptions;

pub const DEFAULT_LOG_FILTER: &str = "traffic_review=info";

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub(crate) struct FileConfig {
    pub(crate) service: Option<ServiceFileConfig>,
    pub(crate) playback: Option<PlaybackFileConfig>,
    pub(crate) logging: Option<LoggingFileConfig>,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone)]
#[serde(default)]
pub(crate) struct ServiceFileConfig {
    pub(crate) url: Option<String>,
    pub(crate) backend: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone)]
#[serde(default)]
pub(crate) struct PlaybackFileConfig {
    pub(crate) step_frames: Option<u64>,
    pub(crate) frame_poll_ms: Option<u64>,
    pub(crate) position_poll_ms: Option<u64>,
    pub(crate) stats_poll_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone)]
#[serde(default)]
pub(crate) struct LoggingFileConfig {
    pub(crate) filter: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EffectiveSettings {
    pub service: ServiceSettings,
    pub playback: PlaybackOptions,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub backend: Backend,
    pub url: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoggingSettings {
    /// Explicit filter; `None` defers to `RUST_LOG`, then the default.
    pub filter: Option<String>,
}

#[derive(Debug)]
pub struct ResolvedSettings {
    pub settings: EffectiveSettings,
    pub config_path: Option<PathBuf>,
}

impl EffectiveSettings {
    pub fn client_configuration(&self) -> Configuration {
        Configuration {
            backend: self.service.backend,
            base_url: self.service.url.clone(),
            ..Configuration::default()
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    InvalidValue {
        path: Option<PathBuf>,
        field: &'static str,
        value: String,
    },
    NotFound {
        path: PathBuf,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read config file {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config file {}: {}", path.display(), source)
            }
            ConfigError::InvalidValue { path, field, value } => {
                if let Some(path) = path {
                    write!(
                        f,
                        "invalid value '{}' for '{}' in {}",
                        value,
                        field,
                        path.display()
                    )
                } else {
                    write!(f, "invalid value '{}' for '{}'", value, field)
                }
            }
            ConfigError::NotFound { path } => {
                write!(f, "config file {} does not exist", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::InvalidValue { .. } | ConfigError::NotFound { .. } => None,
        }
    }
}

pub fn resolve_settings(
    cli: &CliArgs,
    sources: &CliSources,
) -> Result<ResolvedSettings, ConfigError> {
    let (file, config_path) = load_config(cli.config.as_deref())?;
    merge(cli, sources, file, config_path)
}

/// `--config`, then `./config.toml`, then the platform config directory.
fn load_config(path_override: Option<&Path>) -> Result<(FileConfig, Option<PathBuf>), ConfigError> {
    if let Some(path) = path_override {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let config = load_file_config(path)?;
        return Ok((config, Some(path.to_path_buf())));
    }

    let candidates = [project_config_path(), default_config_path()];
    for path in candidates.into_iter().flatten() {
        if path.exists() {
            let config = load_file_config(&path)?;
            return Ok((config, Some(path)));
        }
    }
    Ok((FileConfig::default(), None))
}

fn merge(
    cli: &CliArgs,
    sources: &CliSources,
    file: FileConfig,
    config_path: Option<PathBuf>,
) -> Result<ResolvedSettings, ConfigError> {
    let FileConfig {
        service: file_service,
        playback: file_playback,
        logging: file_logging,
    } = file;

    let service_cfg = file_service.unwrap_or_default();
    let playback_cfg = file_playback.unwrap_or_default();
    let logging_cfg = file_logging.unwrap_or_default();

    let backend = resolve_backend(
        cli.backend.clone(),
        service_cfg.backend,
        config_path.as_ref(),
    )?;
    let url = resolve_url(cli.url.clone(), service_cfg.url, config_path.as_ref())?;

    let step_frames = resolve_positive(
        "step_frames",
        cli.step_frames,
        playback_cfg.step_frames,
        !sources.step_frames_from_cli,
        config_path.as_ref(),
    )?;
    let frame_poll_ms = resolve_positive(
        "frame_poll_ms",
        cli.frame_poll_ms,
        playback_cfg.frame_poll_ms,
        !sources.frame_poll_from_cli,
        config_path.as_ref(),
    )?;
    let position_poll_ms = resolve_positive(
        "position_poll_ms",
        cli.position_poll_ms,
        playback_cfg.position_poll_ms,
        !sources.position_poll_from_cli,
        config_path.as_ref(),
    )?;
    let stats_poll_ms = resolve_positive(
        "stats_poll_ms",
        cli.stats_poll_ms,
        playback_cfg.stats_poll_ms,
        !sources.stats_poll_from_cli,
        config_path.as_ref(),
    )?;

    let settings = EffectiveSettings {
        service: ServiceSettings { backend, url },
        playback: PlaybackOptions {
            step_frames,
            frame_poll_interval: Duration::from_millis(frame_poll_ms),
            position_poll_interval: Duration::from_millis(position_poll_ms),
            stats_poll_interval: Duration::from_millis(stats_poll_ms),
        },
        logging: LoggingSettings {
            filter: normalize_string(cli.log_filter.clone())
                .or_else(|| normalize_string(logging_cfg.filter)),
        },
    };

    Ok(ResolvedSettings {
        settings,
        config_path,
    })
}

pub(crate) fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("rs", "traffic-review", "traffic-review")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

pub(crate) fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn project_config_path() -> Option<PathBuf> {
    env::current_dir().ok().map(|dir| dir.join("config.toml"))
}

fn normalize_string(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn resolve_backend(
    cli_value: Option<String>,
    file_value: Option<String>,
    config_path: Option<&PathBuf>,
) -> Result<Backend, ConfigError> {
    let (raw, path) = match normalize_string(cli_value) {
        Some(value) => (value, None),
        None => match normalize_string(file_value) {
            Some(value) => (value, config_path.cloned()),
            None => return Ok(Backend::default()),
        },
    };
    Backend::from_str(&raw).map_err(|_| ConfigError::InvalidValue {
        path,
        field: "backend",
        value: raw,
    })
}

fn resolve_url(
    cli_value: Option<String>,
    file_value: Option<String>,
    config_path: Option<&PathBuf>,
) -> Result<String, ConfigError> {
    let (raw, path) = match normalize_string(cli_value) {
        Some(value) => (value, None),
        None => match normalize_string(file_value) {
            Some(value) => (value, config_path.cloned()),
            None => return Ok(DEFAULT_BASE_URL.to_string()),
        },
    };
    if !(raw.starts_with("http://") || raw.starts_with("https://")) {
        return Err(ConfigError::InvalidValue {
            path,
            field: "url",
            value: raw,
        });
    }
    Ok(raw)
}

fn resolve_positive(
    field: &'static str,
    cli_value: u64,
    file_value: Option<u64>,
    use_file: bool,
    config_path: Option<&PathBuf>,
) -> Result<u64, ConfigError> {
    if use_file && let Some(value) = file_value {
        if value == 0 {
            return Err(ConfigError::InvalidValue {
                path: config_path.cloned(),
                field,
                value: value.to_string(),
            });
        }
        return Ok(value);
    }
    Ok(cli_value)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn file_values_apply_when_cli_is_silent() {
        let file = write_config(
            r#"
[service]
backend = "mock"
url = "http://detector.local:5000"

[playback]
step_frames = 15
position_poll_ms = 500
stats_poll_ms = 2000

[logging]
filter = "traffic_review=debug"
"#,
        );
        let cli = CliArgs {
            config: Some(file.path().to_path_buf()),
            ..CliArgs::defaults()
        };
        let resolved = resolve_settings(&cli, &CliSources::default()).unwrap();
        let settings = resolved.settings;
        assert_eq!(resolved.config_path.as_deref(), Some(file.path()));
        assert_eq!(settings.service.backend, Backend::Mock);
        assert_eq!(settings.service.url, "http://detector.local:5000");
        assert_eq!(settings.playback.step_frames, 15);
        assert_eq!(settings.playback.frame_poll_interval, Duration::from_millis(100));
        assert_eq!(settings.playback.position_poll_interval, Duration::from_millis(500));
        assert_eq!(settings.playback.stats_poll_interval, Duration::from_secs(2));
        assert_eq!(settings.logging.filter.as_deref(), Some("traffic_review=debug"));
    }

    #[test]
    fn cli_values_win_over_file() {
        let file = write_config("[playback]\nstep_frames = 15\n[service]\nbackend = \"mock\"\n");
        let cli = CliArgs {
            config: Some(file.path().to_path_buf()),
            step_frames: 60,
            backend: Some("http".into()),
            ..CliArgs::defaults()
        };
        let sources = CliSources {
            step_frames_from_cli: true,
            ..CliSources::default()
        };
        let settings = resolve_settings(&cli, &sources).unwrap().settings;
        assert_eq!(settings.playback.step_frames, 60);
        assert_eq!(settings.service.backend, Backend::Http);
        assert_eq!(settings.service.url, DEFAULT_BASE_URL);
    }

    #[test]
    fn zero_interval_in_file_is_invalid() {
        let file = write_config("[playback]\nframe_poll_ms = 0\n");
        let cli = CliArgs {
            config: Some(file.path().to_path_buf()),
            ..CliArgs::defaults()
        };
        let err = resolve_settings(&cli, &CliSources::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { field, .. } if field == "frame_poll_ms"
        ));
    }

    #[test]
    fn unknown_backend_is_invalid() {
        let err = resolve_backend(Some("grpc".into()), None, None).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { field, path: None, .. } if field == "backend"
        ));
        assert!(resolve_url(None, Some("localhost:5000".into()), None).is_err());
    }

    #[test]
    fn missing_override_is_reported() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("absent.toml");
        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let file = write_config("[playback\nstep_frames = 1");
        let err = load_config(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().starts_with("failed to parse config file"));
    }
}
