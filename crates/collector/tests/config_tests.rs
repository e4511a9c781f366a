//! Tests for configuration loading and duration parsing

#[path = "../src/config.rs"]
#[allow(dead_code)]
mod config;

use self::config::{parse_duration, CollectorConfig};
use std::io::Write;
use std::time::Duration;

fn config_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_defaults() {
    let config = CollectorConfig::default();

    assert_eq!(config.duration, "1000s");
    assert_eq!(config.run_duration().unwrap(), Duration::from_secs(1000));
    assert_eq!(config.poll_interval(), Duration::from_secs(1));
    assert_eq!(config.announce_interval(), Duration::from_secs(60));
    assert_eq!(config.results_capacity, 100);
    assert_eq!(config.namespace, "openshift-ptp");
    assert_eq!(config.pod_prefix, "linuxptp-daemon-");
    assert_eq!(config.daemon_container, "linuxptp-daemon-container");
    assert!(config.metrics_port.is_none());
    assert!(config.local_container.is_none());
    assert!(config.local_image.is_none());
    assert!(!config.interface.is_empty());
}

#[test]
fn test_partial_file_keeps_defaults() {
    let file = config_file(
        ".toml",
        "interface = \"ens1f0\"\nduration = \"5m\"\npoll_interval_secs = 2\n",
    );

    let config = CollectorConfig::load(Some(file.path())).unwrap();

    assert_eq!(config.interface, "ens1f0");
    assert_eq!(config.run_duration().unwrap(), Duration::from_secs(300));
    assert_eq!(config.poll_interval(), Duration::from_secs(2));
    assert_eq!(config.announce_interval(), Duration::from_secs(60));
    assert_eq!(config.namespace, "openshift-ptp");
}

#[test]
fn test_local_container_from_file() {
    let file = config_file(
        ".toml",
        "local_container = \"ptp-tools\"\nlocal_image = \"quay.io/example/tools:latest\"\n",
    );

    let config = CollectorConfig::load(Some(file.path())).unwrap();

    assert_eq!(config.local_container.as_deref(), Some("ptp-tools"));
    assert_eq!(
        config.local_image.as_deref(),
        Some("quay.io/example/tools:latest")
    );
}

#[test]
fn test_json_file() {
    let file = config_file(".json", r#"{"namespace": "ptp", "metrics_port": 9100}"#);

    let config = CollectorConfig::load(Some(file.path())).unwrap();

    assert_eq!(config.namespace, "ptp");
    assert_eq!(config.metrics_port, Some(9100));
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(CollectorConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
}

#[test]
fn test_environment_overrides() {
    std::env::set_var("COLLECTOR_GPSD_CONTAINER", "gpsd-sidecar");

    let config = CollectorConfig::load(None).unwrap();

    std::env::remove_var("COLLECTOR_GPSD_CONTAINER");
    assert_eq!(config.gpsd_container, "gpsd-sidecar");
}

#[test]
fn test_zero_intervals_are_clamped() {
    let config = CollectorConfig {
        poll_interval_secs: 0,
        announce_interval_secs: 0,
        ..CollectorConfig::default()
    };
    assert_eq!(config.poll_interval(), Duration::from_secs(1));
    assert_eq!(config.announce_interval(), Duration::from_secs(1));
}

#[test]
fn test_parse_duration_units() {
    assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
    assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
    assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
    assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
    assert_eq!(parse_duration("2h45m").unwrap(), Duration::from_secs(9900));
    assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
    assert_eq!(parse_duration(" 90 ").unwrap(), Duration::from_secs(90));
}

#[test]
fn test_parse_duration_rejects_garbage() {
    for input in ["", "-5s", "s", "5d", "5x", "1.2.3s", "m5"] {
        assert!(parse_duration(input).is_err(), "accepted {:?}", input);
    }
}

#[test]
fn test_parse_duration_rejects_out_of_range() {
    let huge = format!("{}h{}h", "9".repeat(300), "9".repeat(300));
    for input in ["inf", "NaN", "1e400", huge.as_str()] {
        assert!(parse_duration(input).is_err(), "accepted {:?}", input);
    }
}
