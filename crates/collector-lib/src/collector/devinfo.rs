//! NIC device identity collector
//!
//! Announces the interface's vendor/device ids, GNSS tty and firmware
//! version. Identity values are read once per interface and reused.

use super::{
    open_session, Collector, CollectorArgs, DataSource, ExecCollector, SessionKind,
};
use crate::error::{CollectorError, FetchError};
use crate::fetcher::{assign, Binding, Command, Fetcher, Record};
use crate::models::PtpDeviceInfo;
use crate::runner::{Applicability, CollectorDescriptor, Requiredness};
use crate::session::CommandRunner;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub const DEV_INFO_COLLECTOR: &str = "DevInfo";
pub const DEVICE_INFO_KEY: &str = "device-info";

const KEYS: &[&str] = &[DEVICE_INFO_KEY];

const DEVICE_INFO_BINDINGS: &[Binding<PtpDeviceInfo>] = &[
    Binding::new("timestamp", |r, v| assign(&mut r.timestamp, "timestamp", v)),
    Binding::new("vendorId", |r, v| assign(&mut r.vendor_id, "vendorId", v)),
    Binding::new("deviceId", |r, v| assign(&mut r.device_id, "deviceId", v)),
    Binding::new("ttyGNSS", |r, v| assign(&mut r.gnss_tty, "ttyGNSS", v)),
    Binding::new("firmwareVersion", |r, v| {
        assign(&mut r.firmware_version, "firmwareVersion", v)
    }),
];

impl Record for PtpDeviceInfo {
    fn bindings() -> &'static [Binding<Self>] {
        DEVICE_INFO_BINDINGS
    }
}

/// Value of `field` in `ethtool -i` style `name: value` output
pub fn ethtool_field(output: &str, field: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        (name.trim() == field).then(|| value.trim().to_string())
    })
}

fn derive_device_fields(
    raw: &HashMap<String, String>,
) -> Result<HashMap<String, Value>, FetchError> {
    let mut derived = HashMap::new();

    let gnss_device = raw
        .get("gnssDevice")
        .and_then(|listing| listing.split_whitespace().next())
        .map(|name| format!("/dev/{}", name))
        .unwrap_or_default();
    derived.insert("ttyGNSS".to_string(), Value::String(gnss_device));

    if let Some(driver_info) = raw.get("driverInfo") {
        let firmware = ethtool_field(driver_info, "firmware-version").ok_or_else(|| {
            FetchError::Parse("no firmware-version in driver info".to_string())
        })?;
        derived.insert("firmwareVersion".to_string(), Value::String(firmware));
    }

    Ok(derived)
}

/// Command set reading the identity of `interface`
pub fn build_fetcher(interface: &str) -> Fetcher {
    let device_dir = format!("/sys/class/net/{}/device", interface);
    let mut fetcher = Fetcher::new();
    fetcher
        .add_command(Command::new("timestamp", "date +%s.%N"))
        .add_command(Command::new("vendorId", format!("cat {}/vendor", device_dir)).cached())
        .add_command(Command::new("deviceId", format!("cat {}/device", device_dir)).cached())
        .add_command(
            Command::new(
                "gnssDevice",
                format!("ls {}/gnss/ 2>/dev/null || true", device_dir),
            )
            .cached(),
        )
        .add_command(Command::new("driverInfo", format!("ethtool -i {}", interface)).cached())
        .set_post_processor(derive_device_fields);
    fetcher
}

/// Reads [`PtpDeviceInfo`] for one interface
pub struct DevInfoSource {
    fetcher: Arc<Fetcher>,
}

impl DevInfoSource {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl DataSource for DevInfoSource {
    fn keys(&self) -> &'static [&'static str] {
        KEYS
    }

    async fn fetch(&self, runner: &dyn CommandRunner, key: &str) -> Result<Value, CollectorError> {
        if key != DEVICE_INFO_KEY {
            return Err(CollectorError::NotCollectable {
                collector: DEV_INFO_COLLECTOR.to_string(),
                key: key.to_string(),
            });
        }

        let mut info = PtpDeviceInfo::default();
        self.fetcher
            .fetch(runner, &mut info)
            .await
            .map_err(|source| CollectorError::Fetch {
                key: key.to_string(),
                source,
            })?;

        serde_json::to_value(&info).map_err(|source| CollectorError::Serialize {
            key: key.to_string(),
            source,
        })
    }
}

fn construct(args: CollectorArgs) -> BoxFuture<'static, Result<Arc<dyn Collector>, CollectorError>> {
    Box::pin(async move {
        let session = open_session(
            &args.target,
            args.contexts.daemon_target(),
            SessionKind::PerCall,
            &args.contexts,
        )
        .await?;

        let fetcher = args
            .fetchers
            .get_or_build(&format!("{}:{}", DEVICE_INFO_KEY, args.interface), || {
                build_fetcher(&args.interface)
            });

        let collector: Arc<dyn Collector> = Arc::new(ExecCollector::new(
            DEV_INFO_COLLECTOR,
            DevInfoSource::new(fetcher),
            session,
            args.callback,
            args.devinfo_announce_interval,
        ));
        Ok(collector)
    })
}

pub fn descriptor() -> CollectorDescriptor {
    CollectorDescriptor {
        name: DEV_INFO_COLLECTOR,
        constructor: construct,
        requiredness: Requiredness::Required,
        applicability: Applicability::RunAnywhere,
        validations: &["devices/details", "devices/firmware", "devices/gnss-tty"],
    }
}
