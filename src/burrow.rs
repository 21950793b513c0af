//! Consumer lag snapshots from linkedin/Burrow, with each partition's owner
//! resolved from the consumer group's ZooKeeper registrations.

use crate::error::FetchError;
use crate::store::{self, MetadataStore, ZkStore};
use once_cell::sync::Lazy;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

// Old-style consumer ids embed a millisecond timestamp: `<client>-<13 digits>-<uuid>`.
static OWNER_TIMESTAMP: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"-[0-9]{13}-").expect("owner timestamp pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    pub endpoint_base: String,
    pub cluster_name: String,
    pub group_name: String,
    pub timeout_seconds: u64,
    pub metadata_store_address: String
}

impl FetchConfig {
    /// `<endpoint_base>/v2/kafka/<cluster>/consumer/<group>/lag`. The base path is
    /// always treated as a directory, so trailing slashes make no difference.
    pub fn request_url(&self) -> Result<Url, FetchError> {
        let invalid = |source| FetchError::InvalidEndpoint {
            base: self.endpoint_base.clone(),
            source
        };
        let mut base = Url::parse(&self.endpoint_base).map_err(invalid)?;
        let dir = format!("{}/", base.path().trim_end_matches('/'));
        base.set_path(&dir);
        base.join(&format!("v2/kafka/{}/consumer/{}/lag", self.cluster_name, self.group_name))
            .map_err(invalid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLag {
    pub partition_id: i32,
    pub lag: i64,
    pub owner: String
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LagSnapshot {
    /// The aggregate Burrow reports, not a sum over `partitions`.
    pub total_lag: i64,
    pub partitions: Vec<PartitionLag>,
    pub source_url: String
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    message: String
}

#[derive(Debug, Deserialize)]
struct LagReport {
    status: GroupStatus
}

#[derive(Debug, Deserialize)]
struct GroupStatus {
    totallag: i64,
    #[serde(default)]
    partitions: Vec<PartitionStatus>
}

#[derive(Debug, Deserialize)]
struct PartitionStatus {
    topic: String,
    partition: i32,
    end: OffsetStatus
}

#[derive(Debug, Deserialize)]
struct OffsetStatus {
    lag: i64
}

/// Fetches the group's lag from Burrow, then connects to ZooKeeper to name the
/// owner of every partition.
pub async fn fetch_lag_snapshot(config: &FetchConfig) -> Result<LagSnapshot, FetchError> {
    let url = config.request_url()?;
    let status = fetch_status(&url, config.timeout_seconds).await?;
    let store = ZkStore::connect(&config.metadata_store_address, store::SESSION_TIMEOUT).await
        .map_err(|source| FetchError::MetadataStoreConnect {
            address: config.metadata_store_address.clone(),
            source
        })?;
    resolve_owners(config, url, status, &store).await
}

/// Same as [`fetch_lag_snapshot`] against an already open metadata store.
pub async fn fetch_lag_snapshot_with<S>(config: &FetchConfig, store: &S) -> Result<LagSnapshot, FetchError>
    where S: MetadataStore + ?Sized
{
    let url = config.request_url()?;
    let status = fetch_status(&url, config.timeout_seconds).await?;
    resolve_owners(config, url, status, store).await
}

async fn fetch_status(url: &Url, timeout_seconds: u64) -> Result<GroupStatus, FetchError> {
    let transport = |source| FetchError::Transport {
        url: url.to_string(),
        source
    };

    let request = async {
        debug!(%url, "fetching consumer lag");
        let client = reqwest::Client::builder().build().map_err(transport)?;
        let response = client.get(url.clone()).send().await.map_err(transport)?;
        let http_status = response.status();
        let body = response.bytes().await.map_err(transport)?;
        decode_status(url, http_status, &body)
    };

    match tokio::time::timeout(Duration::from_secs(timeout_seconds), request).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            timeout: timeout_seconds,
            url: url.to_string()
        })
    }
}

fn decode_status(url: &Url, http_status: StatusCode, body: &[u8]) -> Result<GroupStatus, FetchError> {
    let parse = |source| FetchError::Parse {
        url: url.to_string(),
        source
    };
    let upstream = |message: String| FetchError::UpstreamReported {
        url: url.to_string(),
        message
    };

    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(_) if !http_status.is_success() => return Err(upstream(format!("HTTP {}", http_status))),
        Err(e) => return Err(parse(e))
    };

    let envelope = Envelope::deserialize(&value).map_err(parse)?;
    if envelope.error {
        return Err(upstream(envelope.message));
    }
    if !http_status.is_success() {
        return Err(upstream(format!("HTTP {}", http_status)));
    }

    let report = LagReport::deserialize(&value).map_err(parse)?;
    Ok(report.status)
}

async fn resolve_owners<S>(config: &FetchConfig, url: Url, status: GroupStatus, store: &S) -> Result<LagSnapshot, FetchError>
    where S: MetadataStore + ?Sized
{
    let mut partitions = Vec::with_capacity(status.partitions.len());
    for partition in status.partitions {
        let owner = partition_owner(store, &config.group_name, &partition.topic, partition.partition).await?;
        partitions.push(PartitionLag {
            partition_id: partition.partition,
            lag: partition.end.lag,
            owner
        });
    }

    Ok(LagSnapshot {
        total_lag: status.totallag,
        partitions,
        source_url: url.to_string()
    })
}

pub fn owner_path(group: &str, topic: &str, partition: i32) -> String {
    format!("/kafka/consumers/{}/owners/{}/{}", group, topic, partition)
}

async fn partition_owner<S>(store: &S, group: &str, topic: &str, partition: i32) -> Result<String, FetchError>
    where S: MetadataStore + ?Sized
{
    let path = owner_path(group, topic, partition);
    let data = store.get_data(&path).await
        .map_err(|source| FetchError::OwnerResolution {
            path: path.clone(),
            source
        })?;
    Ok(strip_owner_timestamp(&String::from_utf8_lossy(&data)).to_owned())
}

/// Keeps what precedes the first `-<13 digits>-` in a raw owner id.
pub fn strip_owner_timestamp(raw: &str) -> &str {
    match OWNER_TIMESTAMP.find(raw) {
        Some(m) => &raw[..m.start()],
        None => raw
    }
}
