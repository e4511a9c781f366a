//! GNSS tty collector
//!
//! Locates the GNSS tty behind the interface once, then reads a few raw
//! lines from it on every poll.

use super::{open_session, Collector, CollectorArgs, DataSource, ExecCollector, SessionKind};
use crate::error::{CollectorError, FetchError};
use crate::fetcher::{assign, Binding, Command, Fetcher, FetcherCache, Record};
use crate::models::GnssTtyLines;
use crate::runner::{Applicability, CollectorDescriptor, Requiredness};
use crate::session::CommandRunner;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

pub const GNSS_COLLECTOR: &str = "GNSS";
pub const GNSS_TTY_KEY: &str = "gnss-tty";

const KEYS: &[&str] = &[GNSS_TTY_KEY];

/// Where the GNSS receiver of an interface is exposed
#[derive(Debug, Default)]
struct GnssLocation {
    device: String,
}

const LOCATION_BINDINGS: &[Binding<GnssLocation>] =
    &[Binding::new("gnssDevice", |r, v| assign(&mut r.device, "gnssDevice", v))];

impl Record for GnssLocation {
    fn bindings() -> &'static [Binding<Self>] {
        LOCATION_BINDINGS
    }
}

const LINES_BINDINGS: &[Binding<GnssTtyLines>] = &[
    Binding::new("timestamp", |r, v| assign(&mut r.timestamp, "timestamp", v)),
    Binding::new("lines", |r, v| assign(&mut r.lines, "lines", v)),
];

impl Record for GnssTtyLines {
    fn bindings() -> &'static [Binding<Self>] {
        LINES_BINDINGS
    }
}

fn first_entry(listing: &str) -> String {
    listing.split_whitespace().next().unwrap_or_default().to_string()
}

fn build_locate_fetcher(interface: &str) -> Fetcher {
    let mut fetcher = Fetcher::new();
    fetcher.add_command(
        Command::new(
            "gnssDevice",
            format!(
                "ls /sys/class/net/{}/device/gnss/ 2>/dev/null || true",
                interface
            ),
        )
        .with_cleanup(first_entry)
        .cached(),
    );
    fetcher
}

fn build_lines_fetcher(tty: &str, lines: usize, timeout_secs: u64) -> Fetcher {
    let mut fetcher = Fetcher::new();
    fetcher
        .add_command(Command::new("timestamp", "date +%s.%N"))
        .add_command(Command::new(
            "lines",
            format!(
                "timeout {} head -n {} {} || true",
                timeout_secs, lines, tty
            ),
        ));
    fetcher
}

/// Reads [`GnssTtyLines`] from the interface's GNSS tty
pub struct GnssSource {
    fetchers: Arc<FetcherCache>,
    locate: Arc<Fetcher>,
    lines: usize,
    timeout_secs: u64,
}

impl GnssSource {
    pub fn new(fetchers: Arc<FetcherCache>, interface: &str, lines: usize, timeout_secs: u64) -> Self {
        let locate = fetchers.get_or_build(&format!("gnss-locate:{}", interface), || {
            build_locate_fetcher(interface)
        });
        Self {
            fetchers,
            locate,
            lines,
            timeout_secs,
        }
    }

    async fn read_lines(&self, runner: &dyn CommandRunner) -> Result<GnssTtyLines, FetchError> {
        let mut location = GnssLocation::default();
        self.locate.fetch(runner, &mut location).await?;
        if location.device.is_empty() {
            return Err(FetchError::Parse("interface has no GNSS device".to_string()));
        }

        let tty = format!("/dev/{}", location.device);
        let fetcher = self
            .fetchers
            .get_or_build(&format!("gnss-lines:{}", tty), || {
                build_lines_fetcher(&tty, self.lines, self.timeout_secs)
            });

        let mut record = GnssTtyLines {
            tty,
            ..Default::default()
        };
        fetcher.fetch(runner, &mut record).await?;
        Ok(record)
    }
}

#[async_trait]
impl DataSource for GnssSource {
    fn keys(&self) -> &'static [&'static str] {
        KEYS
    }

    async fn fetch(&self, runner: &dyn CommandRunner, key: &str) -> Result<Value, CollectorError> {
        if key != GNSS_TTY_KEY {
            return Err(CollectorError::NotCollectable {
                collector: GNSS_COLLECTOR.to_string(),
                key: key.to_string(),
            });
        }

        let record = self
            .read_lines(runner)
            .await
            .map_err(|source| CollectorError::Fetch {
                key: key.to_string(),
                source,
            })?;

        serde_json::to_value(&record).map_err(|source| CollectorError::Serialize {
            key: key.to_string(),
            source,
        })
    }
}

fn construct(args: CollectorArgs) -> BoxFuture<'static, Result<Arc<dyn Collector>, CollectorError>> {
    Box::pin(async move {
        let session = open_session(
            &args.target,
            args.contexts.gpsd_target(),
            SessionKind::PerCall,
            &args.contexts,
        )
        .await?;

        let source = GnssSource::new(
            args.fetchers.clone(),
            &args.interface,
            args.gnss_lines,
            args.gnss_timeout_secs,
        );

        let collector: Arc<dyn Collector> = Arc::new(ExecCollector::new(
            GNSS_COLLECTOR,
            source,
            session,
            args.callback,
            args.poll_interval,
        ));
        Ok(collector)
    })
}

pub fn descriptor() -> CollectorDescriptor {
    CollectorDescriptor {
        name: GNSS_COLLECTOR,
        constructor: construct,
        requiredness: Requiredness::Optional,
        applicability: Applicability::RunOnCluster,
        validations: &["gnss/tty-readable"],
    }
}
