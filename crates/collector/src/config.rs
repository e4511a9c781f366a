//! Collector configuration

use anyhow::{bail, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Collector configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Network interface the PTP device sits behind
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Total run time, e.g. "1000s" or "2h45m"
    #[serde(default = "default_duration")]
    pub duration: String,

    /// Poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Device info announce interval in seconds
    #[serde(default = "default_announce_interval")]
    pub announce_interval_secs: u64,

    /// Capacity of the poll outcome channel
    #[serde(default = "default_results_capacity")]
    pub results_capacity: usize,

    /// Namespace of the PTP daemon pod
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Name prefix of the PTP daemon pod
    #[serde(default = "default_pod_prefix")]
    pub pod_prefix: String,

    #[serde(default = "default_daemon_container")]
    pub daemon_container: String,

    #[serde(default = "default_gpsd_container")]
    pub gpsd_container: String,

    /// Lines read from the GNSS tty per poll
    #[serde(default = "default_gnss_lines")]
    pub gnss_lines: usize,

    /// Seconds to wait for the GNSS lines
    #[serde(default = "default_gnss_timeout")]
    pub gnss_timeout_secs: u64,

    /// Port for the metrics endpoint; disabled when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,

    /// Podman container local runs exec into
    #[serde(default)]
    pub local_container: Option<String>,

    /// Image to start `local_container` from; an existing container is used when unset
    #[serde(default)]
    pub local_image: Option<String>,
}

fn default_interface() -> String {
    std::env::var("PTP_INTERFACE").unwrap_or_else(|_| "ens7f0".to_string())
}

fn default_duration() -> String {
    "1000s".to_string()
}

fn default_poll_interval() -> u64 {
    1
}

fn default_announce_interval() -> u64 {
    60
}

fn default_results_capacity() -> usize {
    100
}

fn default_namespace() -> String {
    collector_lib::collector::PTP_NAMESPACE.to_string()
}

fn default_pod_prefix() -> String {
    collector_lib::collector::PTP_POD_PREFIX.to_string()
}

fn default_daemon_container() -> String {
    collector_lib::collector::PTP_CONTAINER.to_string()
}

fn default_gpsd_container() -> String {
    collector_lib::collector::GPSD_CONTAINER.to_string()
}

fn default_gnss_lines() -> usize {
    1
}

fn default_gnss_timeout() -> u64 {
    1
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            duration: default_duration(),
            poll_interval_secs: default_poll_interval(),
            announce_interval_secs: default_announce_interval(),
            results_capacity: default_results_capacity(),
            namespace: default_namespace(),
            pod_prefix: default_pod_prefix(),
            daemon_container: default_daemon_container(),
            gpsd_container: default_gpsd_container(),
            gnss_lines: default_gnss_lines(),
            gnss_timeout_secs: default_gnss_timeout(),
            metrics_port: None,
            local_container: None,
            local_image: None,
        }
    }
}

impl CollectorConfig {
    /// Load configuration from an optional file, then `COLLECTOR_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(config::Environment::with_prefix("COLLECTOR"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn run_duration(&self) -> Result<Duration> {
        parse_duration(&self.duration)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs.max(1))
    }
}

/// Parse a duration such as "300ms", "1.5h" or "2h45m"
///
/// Units are `ms`, `s`, `m` and `h`; a bare number is taken as seconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        bail!("empty duration");
    }
    if input.starts_with('-') {
        bail!("duration must be positive: {}", input);
    }
    if let Ok(secs) = input.parse::<f64>() {
        return seconds_to_duration(secs, input);
    }

    let mut total = 0f64;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            bail!("invalid duration {}: expected a number", input);
        }
        let (number, tail) = rest.split_at(number_len);
        let value: f64 = number
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid number {} in duration {}", number, input))?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = match unit {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => bail!("missing unit in duration {}", input),
            other => bail!("unknown unit {} in duration {}", other, input),
        };

        total += value * scale;
        rest = tail;
    }

    seconds_to_duration(total, input)
}

fn seconds_to_duration(secs: f64, input: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| anyhow::anyhow!("duration {} out of range: {}", input, e))
}
