//! Assembles one snapshot per request. Each metric group is isolated: a probe
//! that errors or panics degrades only its own field.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tracing::warn;

use crate::error::{panic_message, CollectionError, FatalError, FatalKind};
use crate::source::MetricSource;
use crate::types::{Probe, Snapshot};

pub struct Collector {
    source: Arc<dyn MetricSource>,
    os: String,
    offset: UtcOffset,
}

impl Collector {
    /// `os` is described once at startup; `offset` is the local UTC offset,
    /// which can only be read reliably before the runtime spawns threads.
    pub fn new(source: Arc<dyn MetricSource>, os: impl Into<String>, offset: UtcOffset) -> Self {
        Self {
            source,
            os: os.into(),
            offset,
        }
    }

    pub fn os(&self) -> &str {
        &self.os
    }

    /// Wall-clock time as `HH:MM:SS`.
    pub fn wall_time(&self) -> Result<String, FatalError> {
        let now = OffsetDateTime::now_utc().to_offset(self.offset);
        now.format(format_description!("[hour]:[minute]:[second]"))
            .map_err(|e| FatalError::new(e))
    }

    pub async fn collect(&self) -> Result<Snapshot, FatalError> {
        let time = self.wall_time()?;
        let src = self.source.as_ref();

        let (cpu, ram, disk, network) = futures::join!(
            isolate("cpu", src.cpu()),
            isolate("ram", src.ram()),
            isolate("disk", src.disk()),
            isolate("network", src.network()),
        );

        let server = src
            .server_info()
            .await
            .map_err(|e| FatalError::new(FatalKind::ServerInfo(e)))?;

        Ok(Snapshot {
            time,
            os: self.os.clone(),
            cpu,
            ram,
            disk,
            network,
            server,
        })
    }
}

async fn isolate<T, F>(probe: &'static str, fut: F) -> Probe<T>
where
    F: Future<Output = Result<T, CollectionError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(v)) => Probe::Ok(v),
        Ok(Err(e)) => {
            warn!(probe, error = %e, "probe failed");
            Probe::Failed {
                error: e.to_string(),
            }
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            warn!(probe, panic = %msg, "probe panicked");
            Probe::Failed {
                error: format!("{probe} probe panicked: {msg}"),
            }
        }
    }
}
