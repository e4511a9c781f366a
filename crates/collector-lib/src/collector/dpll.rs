//! DPLL state collector
//!
//! Reads the NIC's DPLL lock state and phase offset from sysfs over a
//! persistent shell, since it is polled at the fast cadence.

use super::{open_session, Collector, CollectorArgs, DataSource, ExecCollector, SessionKind};
use crate::error::{CollectorError, FetchError};
use crate::fetcher::{assign, Binding, Command, Fetcher, Record};
use crate::models::DpllInfo;
use crate::runner::{Applicability, CollectorDescriptor, Requiredness};
use crate::session::CommandRunner;
use async_trait::async_trait;
use futures::future::BoxFuture;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

pub const DPLL_COLLECTOR: &str = "DPLL";
pub const DPLL_INFO_KEY: &str = "dpll-info";

const KEYS: &[&str] = &[DPLL_INFO_KEY];

const DPLL_BINDINGS: &[Binding<DpllInfo>] = &[
    Binding::new("timestamp", |r, v| assign(&mut r.timestamp, "timestamp", v)),
    Binding::new("state", |r, v| assign(&mut r.state, "state", v)),
    Binding::new("phaseOffset", |r, v| assign(&mut r.phase_offset, "phaseOffset", v)),
];

impl Record for DpllInfo {
    fn bindings() -> &'static [Binding<Self>] {
        DPLL_BINDINGS
    }
}

fn dpll_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"state:\s*(?P<state>\S+)\s+offset:\s*(?P<offset>-?\d+(?:\.\d+)?)")
            .expect("dpll pattern is valid")
    })
}

/// Split the combined sysfs read into state and numeric offset
fn parse_dpll(raw: &HashMap<String, String>) -> Result<HashMap<String, Value>, FetchError> {
    let text = raw.get("dpll").map(String::as_str).unwrap_or_default();
    let captures = dpll_pattern()
        .captures(text)
        .ok_or_else(|| FetchError::Parse(format!("unexpected dpll output {:?}", text)))?;

    let offset: f64 = captures["offset"]
        .parse()
        .map_err(|e| FetchError::Parse(format!("bad dpll offset: {}", e)))?;

    Ok([
        ("state".to_string(), Value::String(captures["state"].to_string())),
        ("phaseOffset".to_string(), Value::from(offset)),
    ]
    .into_iter()
    .collect())
}

pub fn build_fetcher(interface: &str) -> Fetcher {
    let device_dir = format!("/sys/class/net/{}/device", interface);
    let mut fetcher = Fetcher::new();
    fetcher
        .add_command(Command::new("timestamp", "date +%s.%N"))
        .add_command(Command::new(
            "dpll",
            format!(
                "echo state: $(cat {dir}/dpll_1_state) offset: $(cat {dir}/dpll_1_offset)",
                dir = device_dir
            ),
        ))
        .set_post_processor(parse_dpll);
    fetcher
}

/// Reads [`DpllInfo`] for one interface
pub struct DpllSource {
    fetcher: Arc<Fetcher>,
}

impl DpllSource {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl DataSource for DpllSource {
    fn keys(&self) -> &'static [&'static str] {
        KEYS
    }

    async fn fetch(&self, runner: &dyn CommandRunner, key: &str) -> Result<Value, CollectorError> {
        if key != DPLL_INFO_KEY {
            return Err(CollectorError::NotCollectable {
                collector: DPLL_COLLECTOR.to_string(),
                key: key.to_string(),
            });
        }

        let mut info = DpllInfo::default();
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
            SessionKind::Persistent,
            &args.contexts,
        )
        .await?;

        let fetcher = args
            .fetchers
            .get_or_build(&format!("{}:{}", DPLL_INFO_KEY, args.interface), || {
                build_fetcher(&args.interface)
            });

        let collector: Arc<dyn Collector> = Arc::new(ExecCollector::new(
            DPLL_COLLECTOR,
            DpllSource::new(fetcher),
            session,
            args.callback,
            args.poll_interval,
        ));
        Ok(collector)
    })
}

pub fn descriptor() -> CollectorDescriptor {
    CollectorDescriptor {
        name: DPLL_COLLECTOR,
        constructor: construct,
        requiredness: Requiredness::Optional,
        applicability: Applicability::RunOnCluster,
        validations: &["dpll/locked", "dpll/phase-offset"],
    }
}
