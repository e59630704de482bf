//! Runtime Configuration
//!
//! A single `Config` value is built once at startup (from CLI flags layered over
//! defaults) and handed to every component constructor. Nothing reads global state.

use crate::error::{Result, ServiceError};

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP boundary listens on.
    pub bind_addr: SocketAddr,
    /// Directory holding one `{dataset_id}.index` file per dataset.
    pub index_folder: PathBuf,
    /// Directory holding `{subject}_progress.txt` files.
    pub progress_folder: PathBuf,
    /// Embedding dimension produced by the extractor.
    pub vector_dim: usize,
    /// Sigma of the distance -> similarity decay; larger is more forgiving.
    pub similarity_sigma: f32,

    /// How long task records and results stay in the `ResultStore`.
    pub task_ttl: Duration,
    /// Lease duration for task execution.
    pub lease_ttl: Duration,
    /// How often a running task renews its lease.
    pub lease_renew_interval: Duration,
    /// Lease duration for dataset-scoped index writes.
    pub dataset_lease_ttl: Duration,
    /// How long an index writer waits for the dataset lease before giving up.
    pub dataset_lease_wait: Duration,

    pub worker_count: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Bounded wait of a single blocking pop in the worker loop.
    pub pop_timeout: Duration,
    /// Fixed interval of `wait_for_task` polling.
    pub poll_interval: Duration,
    /// Per-image extraction wait used by the ingest pipeline.
    pub extraction_timeout: Duration,
    /// Priority given to tasks when the caller does not supply one.
    pub default_priority: i32,

    /// Base URL of the remote feature-extraction service.
    pub extractor_url: String,
    /// Hard cap on `k` per query when an index runs on an accelerator.
    pub accelerator_max_k: usize,
    /// Maximum level emitted by the tracing subscriber.
    pub log_level: tracing::Level,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 6000)),
            index_folder: PathBuf::from("data/indexes"),
            progress_folder: PathBuf::from("data/progress"),
            vector_dim: 2048,
            similarity_sigma: 10.0,
            task_ttl: Duration::from_secs(3600),
            lease_ttl: Duration::from_secs(30),
            lease_renew_interval: Duration::from_secs(10),
            dataset_lease_ttl: Duration::from_secs(300),
            dataset_lease_wait: Duration::from_secs(30),
            worker_count: 4,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            pop_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            extraction_timeout: Duration::from_secs(30),
            default_priority: 5,
            extractor_url: "http://127.0.0.1:7000".to_string(),
            accelerator_max_k: 2048,
            log_level: tracing::Level::INFO,
        }
    }
}

impl Config {
    /// Layers command-line flags over the defaults.
    ///
    /// Unknown flags are ignored.
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Config::default();

        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            let value = args.get(i + 1);

            match (flag, value) {
                ("--bind", Some(v)) => config.bind_addr = parse_flag(flag, v)?,
                ("--index-folder", Some(v)) => config.index_folder = PathBuf::from(v),
                ("--progress-folder", Some(v)) => config.progress_folder = PathBuf::from(v),
                ("--dim", Some(v)) => config.vector_dim = parse_flag(flag, v)?,
                ("--workers", Some(v)) => config.worker_count = parse_flag(flag, v)?,
                ("--sigma", Some(v)) => config.similarity_sigma = parse_flag(flag, v)?,
                ("--max-retries", Some(v)) => config.max_retries = parse_flag(flag, v)?,
                ("--extractor-url", Some(v)) => config.extractor_url = v.clone(),
                ("--log-level", Some(v)) => config.log_level = parse_flag(flag, v)?,
                (
                    "--bind" | "--index-folder" | "--progress-folder" | "--dim" | "--workers"
                    | "--sigma" | "--max-retries" | "--extractor-url" | "--log-level",
                    None,
                ) => {
                    return Err(ServiceError::Configuration(format!(
                        "missing value for {}",
                        flag
                    )));
                }
                _ => {
                    i += 1;
                    continue;
                }
            }
            i += 2;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.vector_dim == 0 {
            return Err(ServiceError::Configuration(
                "vector_dim must be greater than 0".to_string(),
            ));
        }
        if !(self.similarity_sigma.is_finite() && self.similarity_sigma > 0.0) {
            return Err(ServiceError::Configuration(format!(
                "similarity_sigma must be positive, got {}",
                self.similarity_sigma
            )));
        }
        if self.worker_count == 0 {
            return Err(ServiceError::Configuration(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.accelerator_max_k == 0 {
            return Err(ServiceError::Configuration(
                "accelerator_max_k must be at least 1".to_string(),
            ));
        }
        if self.dataset_lease_ttl.is_zero() {
            return Err(ServiceError::Configuration(
                "dataset_lease_ttl must be positive".to_string(),
            ));
        }
        if self.lease_renew_interval >= self.lease_ttl {
            return Err(ServiceError::Configuration(
                "lease_renew_interval must be shorter than lease_ttl".to_string(),
            ));
        }
        Ok(())
    }

    /// `{index_folder}/{dataset_id}.index`
    pub fn index_path(&self, dataset_id: &str) -> PathBuf {
        self.index_folder.join(format!("{}.index", dataset_id))
    }

    /// `{progress_folder}/{subject}_progress.txt`
    pub fn progress_path(&self, subject: &str) -> PathBuf {
        self.progress_folder.join(format!("{}_progress.txt", subject))
    }
}

fn parse_flag<T>(flag: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| ServiceError::Configuration(format!("invalid {} '{}': {}", flag, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("similarity_cluster")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.vector_dim, 2048);
        assert_eq!(config.default_priority, 5);
    }

    #[test]
    fn test_from_args_overrides() {
        let config = Config::from_args(&args(&[
            "--bind",
            "0.0.0.0:8080",
            "--dim",
            "512",
            "--workers",
            "8",
            "--sigma",
            "2.5",
            "--index-folder",
            "/tmp/idx",
        ]))
        .unwrap();

        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.vector_dim, 512);
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.similarity_sigma, 2.5);
        assert_eq!(config.index_path("3"), PathBuf::from("/tmp/idx/3.index"));
    }

    #[test]
    fn test_from_args_rejects_bad_values() {
        assert!(matches!(
            Config::from_args(&args(&["--dim", "abc"])),
            Err(ServiceError::Configuration(_))
        ));
        assert!(matches!(
            Config::from_args(&args(&["--dim", "0"])),
            Err(ServiceError::Configuration(_))
        ));
        assert!(matches!(
            Config::from_args(&args(&["--workers"])),
            Err(ServiceError::Configuration(_))
        ));
    }

    #[test]
    fn test_unknown_flags_are_ignored() {
        let config = Config::from_args(&args(&["--verbose", "--dim", "16"])).unwrap();
        assert_eq!(config.vector_dim, 16);
    }

    #[test]
    fn test_log_level_flag() {
        let config = Config::from_args(&args(&["--log-level", "debug"])).unwrap();
        assert_eq!(config.log_level, tracing::Level::DEBUG);
    }
}
