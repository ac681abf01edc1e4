//! Error taxonomy: per-probe collection failures and faults that escape the
//! per-metric isolation boundary.

use std::panic::Location;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A probe could not obtain its metric. Surfaces as `{error: ...}` for that
/// metric group only.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("`{program}` timed out after {}ms", .after.as_millis())]
    Timeout { program: String, after: Duration },
    #[error("could not read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse {what}: {detail}")]
    Parse { what: String, detail: String },
    #[error("{0}")]
    Unavailable(String),
}

impl CollectionError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(what: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FatalKind {
    #[error("could not format wall-clock time: {0}")]
    Clock(#[from] time::error::Format),
    #[error("server info unavailable: {0}")]
    ServerInfo(#[from] CollectionError),
    #[error("could not encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("collection panicked: {0}")]
    Panic(String),
}

/// Anything that escapes probe isolation. Remembers where it was raised so the
/// HTTP error body can point at it.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct FatalError {
    #[source]
    kind: FatalKind,
    location: &'static Location<'static>,
}

impl FatalError {
    #[track_caller]
    pub fn new(kind: impl Into<FatalKind>) -> Self {
        Self {
            kind: kind.into(),
            location: Location::caller(),
        }
    }

    pub fn kind(&self) -> &FatalKind {
        &self.kind
    }

    pub fn file(&self) -> &'static str {
        self.location.file()
    }

    pub fn line(&self) -> u32 {
        self.location.line()
    }
}

/// Best-effort message out of a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
