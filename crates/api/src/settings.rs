//! Receiver Configuration
//!
//! Layered as defaults, then an optional TOML file, then `RECEIVER__*`
//! environment variables, then the receiver's historical environment
//! variable names.

use config::{Config, ConfigError, Environment, File};
use correlation::{ControllerConfig, TagPolicy};
use dynatrace_client::ClientConfig;
use scheduler::JobConfig;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "RECEIVER_CONFIG";

/// Configuration file used when [`CONFIG_PATH_ENV`] is unset
pub const DEFAULT_CONFIG_PATH: &str = "config/receiver.toml";

/// Historical environment variable names and the keys they override
const LEGACY_ENV: [(&str, &str); 7] = [
    ("DT_API_URL", "dynatrace.api_url"),
    ("DT_API_TOKEN", "dynatrace.api_token"),
    ("DT_GROUP_NAME", "dynatrace.group_name"),
    ("WEBHOOK_PROBLEM_SEVERITIES", "correlation.problem_severities"),
    ("WEBHOOK_PORT", "server.port"),
    ("WEBHOOK_LOG_FOLDER", "cache.dir"),
    ("WEBHOOK_LOG_FOLDER", "logging.dir"),
];

/// Complete receiver configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub server: ServerConfig,
    pub dynatrace: DynatraceConfig,
    pub correlation: CorrelationConfig,
    pub jobs: JobsConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Webhook listener
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Listening port (default: 9393)
    pub port: u16,
    /// Upper bound on answering one request (default: 180). Delivery
    /// continues in the background past it.
    pub request_timeout_seconds: u64,
}

/// Dynatrace environment
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DynatraceConfig {
    pub api_url: String,
    pub api_token: String,
    /// Custom device group of every registered device
    pub group_name: String,
    pub retries: u32,
    pub retry_delay_seconds: u64,
    pub request_timeout_seconds: u64,
}

/// Alert to event mapping
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Severities that open a problem, as a list or comma separated
    #[serde(deserialize_with = "severities")]
    pub problem_severities: Vec<String>,
    pub default_device_name: String,
    pub event_timeout_minutes: u32,
    /// Alert label → entity tag key
    pub tag_labels: BTreeMap<String, String>,
    pub tag_attempts: u32,
    pub tag_retry_delay_seconds: u64,
}

/// Background job intervals
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub reconcile_interval_seconds: u64,
    pub resend_interval_seconds: u64,
    pub expire_interval_seconds: u64,
    /// Incidents older than this are dropped (default: 120 hours)
    pub retention_hours: u64,
}

/// Location of `customDevices.json` and `problems.json`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`
    pub level: String,
    /// One JSON object per line instead of human readable output
    pub json: bool,
    /// Also write daily rotated log files here
    pub dir: Option<PathBuf>,
    /// Rotated log files kept in `dir`
    pub max_files: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder and serve `/metrics`
    pub enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 9393,
            request_timeout_seconds: 180,
        }
    }
}

impl Default for DynatraceConfig {
    fn default() -> Self {
        let client = ClientConfig::default();
        Self {
            api_url: client.base_url,
            api_token: client.api_token,
            group_name: ControllerConfig::default().device_group,
            retries: client.retries,
            retry_delay_seconds: client.retry_delay.as_secs(),
            request_timeout_seconds: client.request_timeout.as_secs(),
        }
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        let controller = ControllerConfig::default();
        Self {
            problem_severities: controller.problem_severities,
            default_device_name: controller.default_device_name,
            event_timeout_minutes: controller.event_timeout_minutes,
            tag_labels: controller.tags.label_keys,
            tag_attempts: controller.tags.attempts,
            tag_retry_delay_seconds: controller.tags.retry_delay.as_secs(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        let jobs = JobConfig::default();
        Self {
            reconcile_interval_seconds: jobs.reconcile_interval.as_secs(),
            resend_interval_seconds: jobs.resend_interval.as_secs(),
            expire_interval_seconds: jobs.expire_interval.as_secs(),
            retention_hours: jobs.retention.as_secs() / 3600,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join("dynatrace-receiver"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            dir: None,
            max_files: 5,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn severities<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Csv(String),
    }

    let list = match Raw::deserialize(deserializer)? {
        Raw::List(list) => list,
        Raw::Csv(csv) => csv.split(',').map(str::to_string).collect(),
    };
    Ok(list
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

impl ReceiverConfig {
    /// Load from `config_path` (optional) and the environment
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        Self::from_sources(config_path, |name| std::env::var(name).ok())
    }

    /// Load from the file named by `RECEIVER_CONFIG`, or
    /// `config/receiver.toml`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_file(config_path)
    }

    /// Load with `legacy_env` answering for the historical variable names
    pub fn from_sources<P, F>(config_path: P, legacy_env: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Config::builder()
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("RECEIVER").separator("__"));

        for (name, key) in LEGACY_ENV {
            let value = legacy_env(name).filter(|v| !v.is_empty());
            builder = builder.set_override_option(key, value)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Address the webhook listens on
    pub fn socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.bind_address, self.server.port)
            .parse()
            .map_err(|_| {
                format!(
                    "Invalid socket address: {}:{}",
                    self.server.bind_address, self.server.port
                )
            })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_seconds)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.dynatrace.api_url.clone(),
            api_token: self.dynatrace.api_token.clone(),
            retries: self.dynatrace.retries.max(1),
            retry_delay: Duration::from_secs(self.dynatrace.retry_delay_seconds),
            request_timeout: Duration::from_secs(self.dynatrace.request_timeout_seconds),
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        let correlation = &self.correlation;
        ControllerConfig {
            device_group: self.dynatrace.group_name.clone(),
            default_device_name: correlation.default_device_name.clone(),
            problem_severities: correlation.problem_severities.clone(),
            event_timeout_minutes: correlation.event_timeout_minutes,
            tags: TagPolicy {
                label_keys: correlation.tag_labels.clone(),
                attempts: correlation.tag_attempts,
                retry_delay: Duration::from_secs(correlation.tag_retry_delay_seconds),
            },
        }
    }

    pub fn job_config(&self) -> JobConfig {
        JobConfig {
            reconcile_interval: Duration::from_secs(self.jobs.reconcile_interval_seconds),
            resend_interval: Duration::from_secs(self.jobs.resend_interval_seconds),
            expire_interval: Duration::from_secs(self.jobs.expire_interval_seconds),
            retention: Duration::from_secs(self.jobs.retention_hours * 3600),
        }
    }
}
