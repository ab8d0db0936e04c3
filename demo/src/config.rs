use anyhow::{anyhow, Context, Error, Result};
use figment::{
    providers::{Env, Format, Toml, Yaml},
    Figment,
};
use perfect_shutdown::ShutdownConfig;
use serde::Deserialize;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::filter::LevelFilter;

const ENV_PREFIX: &str = "PSHUTDOWN_";
const DEFAULT_WORKERS: usize = 5;
const DEFAULT_INTERVAL_SECS: u64 = 10;

#[derive(Deserialize, Clone, Debug, Default)]
pub struct Config {
    pub log: Option<String>,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub demo: Demo,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Demo {
    #[serde(default = "workers_default")]
    pub workers: usize,
    #[serde(default = "interval_secs_default")]
    pub interval_secs: u64,
}

fn workers_default() -> usize {
    DEFAULT_WORKERS
}

fn interval_secs_default() -> u64 {
    DEFAULT_INTERVAL_SECS
}

impl Default for Demo {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            interval_secs: DEFAULT_INTERVAL_SECS,
        }
    }
}

impl Demo {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Config {
    pub fn load(path: Option<PathBuf>) -> Result<Self, Error> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = match path.extension().and_then(OsStr::to_str) {
                Some("toml") => figment.merge(Toml::file(path)),
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some(ext) => return Err(anyhow!("unexpected config extension '{}'", ext)),
                None => return Err(anyhow!("config path has no extension: {}", path.display())),
            };
        }

        figment
            .join(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("fail extract demo config")
    }

    /// Level named by `log`, case-insensitive; INFO when unset or unknown.
    pub fn log_level(&self) -> LevelFilter {
        self.log
            .as_deref()
            .and_then(|level| level.parse().ok())
            .unwrap_or(LevelFilter::INFO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfect_shutdown::ShutdownSignal;
    use std::io::Write;

    fn write_config(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_toml() {
        let file = write_config(
            ".toml",
            r#"
log = "debug"

[shutdown]
signals = ["terminate"]
capture_backtrace = true
drain_warn_secs = 15

[demo]
workers = 2
interval_secs = 3
"#,
        );

        let config = Config::load(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.log_level(), LevelFilter::DEBUG);
        assert_eq!(config.shutdown.signals, vec![ShutdownSignal::Terminate]);
        assert!(config.shutdown.capture_backtrace);
        assert_eq!(config.shutdown.drain_warn_secs, Some(15));
        assert_eq!(config.demo.workers, 2);
        assert_eq!(config.demo.interval(), Duration::from_secs(3));
    }

    #[test]
    fn test_load_yaml_fills_defaults() {
        let file = write_config(".yaml", "demo:\n  workers: 1\n");

        let config = Config::load(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.log_level(), LevelFilter::INFO);
        assert_eq!(config.shutdown, ShutdownConfig::default());
        assert_eq!(config.demo.workers, 1);
        assert_eq!(config.demo.interval_secs, DEFAULT_INTERVAL_SECS);
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let file = write_config(".ini", "log = debug\n");

        let result = Config::load(Some(file.path().to_path_buf()));

        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_log_level_falls_back_to_info() {
        let config = Config {
            log: Some("verbose".to_string()),
            ..Default::default()
        };
        assert_eq!(config.log_level(), LevelFilter::INFO);
    }

    #[test]
    fn test_log_level_ignores_case() {
        for (name, level) in [
            ("warn", LevelFilter::WARN),
            ("ERROR", LevelFilter::ERROR),
            ("Trace", LevelFilter::TRACE),
        ] {
            let config = Config {
                log: Some(name.to_string()),
                ..Default::default()
            };
            assert_eq!(config.log_level(), level);
        }
        assert_eq!(Config::default().log_level(), LevelFilter::INFO);
    }
}
