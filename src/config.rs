//! Configuration loader and validator for the back office service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub attendance: Attendance,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub listen: String,
}

/// Fingerprint scanner ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attendance {
    /// Domain appended to lower-cased scanner names to find the owning user.
    pub email_domain: String,
    pub capture_dir: String,
    pub raw_file: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    pub interval_seconds: u64,
    pub lease_seconds: u64,
    #[serde(default)]
    pub export_url: Option<String>,
}

fn default_retention_days() -> u64 {
    5
}

impl App {
    /// Expand a leading `~/` in `data_dir`.
    pub fn resolved_data_dir(&self) -> String {
        expand_home(&self.data_dir)
    }
}

impl Attendance {
    pub fn resolved_capture_dir(&self) -> PathBuf {
        PathBuf::from(expand_home(&self.capture_dir))
    }
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path.to_string(),
    }
}

impl Config {
    /// Ensure required directories exist (creates data and capture dirs if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(self.app.resolved_data_dir())?;
        fs::create_dir_all(self.attendance.resolved_capture_dir())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.listen.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Invalid("app.listen must be a socket address"));
    }

    let att = &cfg.attendance;
    if att.email_domain.trim().is_empty() || att.email_domain.contains('@') {
        return Err(ConfigError::Invalid(
            "attendance.email_domain must be a bare domain",
        ));
    }
    if att.capture_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("attendance.capture_dir must be non-empty"));
    }
    if att.raw_file.trim().is_empty() {
        return Err(ConfigError::Invalid("attendance.raw_file must be non-empty"));
    }
    if att.retention_days == 0 {
        return Err(ConfigError::Invalid("attendance.retention_days must be > 0"));
    }
    if att.interval_seconds == 0 {
        return Err(ConfigError::Invalid("attendance.interval_seconds must be > 0"));
    }
    if att.lease_seconds == 0 {
        return Err(ConfigError::Invalid("attendance.lease_seconds must be > 0"));
    }
    if let Some(url) = att.export_url.as_deref() {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Invalid(
                "attendance.export_url must be an http(s) URL",
            ));
        }
    }

    Ok(())
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  listen: "127.0.0.1:8080"

attendance:
  email_domain: "example.com"
  capture_dir: "./data/attendance"
  raw_file: "attlog.dat"
  retention_days: 5
  interval_seconds: 3600
  lease_seconds: 600
  export_url: null
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.attendance.retention_days, 5);
        assert!(cfg.attendance.export_url.is_none());
    }

    #[test]
    fn invalid_listen() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.listen = "not-an-address".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("app.listen")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_email_domain() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.attendance.email_domain = "@example.com".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("email_domain")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.attendance.email_domain = " ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_schedule_values() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.attendance.interval_seconds = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.attendance.lease_seconds = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.attendance.retention_days = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_export_url() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.attendance.export_url = Some("ftp://scanner/attlog.dat".into());
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("export_url")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn ensure_dirs_creates_capture_dir() {
        let td = tempdir().unwrap();
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = td.path().join("data").to_string_lossy().to_string();
        cfg.attendance.capture_dir = td.path().join("capture").to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(td.path().join("data").exists());
        assert!(td.path().join("capture").exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.attendance.email_domain, "example.com");
        assert_eq!(cfg.attendance.raw_file, "attlog.dat");
    }
}
