use crate::check::Status;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;
use zookeeper::ZkError;

/// Failure kinds of a Burrow lag snapshot. Any of them aborts the whole snapshot.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid burrow url {base} - {source}")]
    InvalidEndpoint {
        base: String,
        #[source]
        source: url::ParseError
    },

    #[error("failed fetching {url} - {message}")]
    UpstreamReported {
        url: String,
        message: String
    },

    #[error("timed-out after {timeout}s - {url}, ensure that host is reachable and url parameters are correct")]
    Timeout {
        timeout: u64,
        url: String
    },

    #[error("failed fetching {url} - {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error
    },

    #[error("failed parsing {url} - {source}")]
    Parse {
        url: String,
        #[source]
        source: serde_json::Error
    },

    #[error("failed connecting to zookeeper {address} - {source}")]
    MetadataStoreConnect {
        address: String,
        #[source]
        source: ZkError
    },

    #[error("failed resolving partition owner at {path} - {source}")]
    OwnerResolution {
        path: String,
        #[source]
        source: ZkError
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("failed connecting to zookeeper {address} - {source}")]
    Connect {
        address: String,
        #[source]
        source: ZkError
    },

    #[error("failed reading {path} - {source}")]
    Zookeeper {
        path: String,
        #[source]
        source: ZkError
    },

    #[error("failed parsing {path} - {source}")]
    Registration {
        path: String,
        #[source]
        source: serde_json::Error
    },

    #[error("Can not find {}", .0.display())]
    ToolMissing(PathBuf),

    #[error("failed running {command} - {source}")]
    Command {
        command: String,
        #[source]
        source: io::Error
    },

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        stderr: String
    }
}

impl ProbeError {
    /// Missing tooling means the probe could not run at all; everything else is a failed check.
    pub fn status(&self) -> Status {
        match self {
            ProbeError::ToolMissing(_) => Status::Unknown,
            _ => Status::Critical
        }
    }
}
