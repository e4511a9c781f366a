//! Core data models for the collector

use crate::error::CollectorError;
use serde::{Deserialize, Serialize};

/// Result of one poll cycle of one collector
#[derive(Debug)]
pub struct PollOutcome {
    pub collector: String,
    pub errors: Vec<CollectorError>,
}

impl PollOutcome {
    pub fn new(collector: impl Into<String>, errors: Vec<CollectorError>) -> Self {
        Self {
            collector: collector.into(),
            errors,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// NIC identity as read from sysfs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PtpDeviceInfo {
    pub timestamp: String,
    pub vendor_id: String,
    pub device_id: String,
    #[serde(rename = "ttyGNSS")]
    pub gnss_tty: String,
    pub firmware_version: String,
}

/// DPLL state and phase offset of a NIC
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DpllInfo {
    pub timestamp: String,
    pub state: String,
    pub phase_offset: f64,
}

/// Raw lines read from a GNSS tty
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GnssTtyLines {
    pub timestamp: String,
    pub tty: String,
    pub lines: String,
}
