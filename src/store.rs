//! Read-only access to the ZooKeeper tree Kafka keeps its metadata in.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tracing::{debug, warn};
use zookeeper::{WatchedEvent, ZkError, ZkResult, ZooKeeper};

pub const SESSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Point reads against the metadata store. Paths are absolute ZooKeeper paths.
pub trait MetadataStore {
    fn get_data<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ZkResult<Vec<u8>>>;
    fn get_children<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ZkResult<Vec<String>>>;
}

/// Fails any request that takes longer than `timeout` with `OperationTimeout`.
///
/// The zookeeper client queues requests while it has no connection, so an
/// unreachable ensemble would otherwise stall a probe forever. A request that
/// times out leaves its blocking thread parked on the client; the binary exits
/// without waiting for it.
pub struct Bounded<S> {
    inner: S,
    timeout: Duration
}

impl<S> Bounded<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Bounded { inner, timeout }
    }
}

impl<S: MetadataStore> MetadataStore for Bounded<S> {
    fn get_data<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ZkResult<Vec<u8>>> {
        within(self.timeout, path, self.inner.get_data(path))
    }

    fn get_children<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ZkResult<Vec<String>>> {
        within(self.timeout, path, self.inner.get_children(path))
    }
}

fn within<'a, T: Send + 'a>(timeout: Duration, path: &'a str, request: BoxFuture<'a, ZkResult<T>>) -> BoxFuture<'a, ZkResult<T>> {
    Box::pin(async move {
        match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%path, ?timeout, "zookeeper request timed out");
                Err(ZkError::OperationTimeout)
            }
        }
    })
}

pub struct ZkStore {
    zk: Arc<ZooKeeper>
}

impl ZkStore {
    /// `nodes` is a ZooKeeper connect string, `host:port[,host:port...]`. Every
    /// request on the returned store, and the connect itself, is bounded by
    /// `session_timeout`.
    pub async fn connect(nodes: &str, session_timeout: Duration) -> ZkResult<Bounded<ZkStore>> {
        let nodes = nodes.to_owned();
        let connecting = tokio::task::spawn_blocking(move || ZooKeeper::connect(&nodes, session_timeout, Watcher));
        let zk = match tokio::time::timeout(session_timeout, connecting).await {
            Ok(joined) => settle(joined)?,
            Err(_) => {
                warn!(?session_timeout, "zookeeper connect timed out");
                return Err(ZkError::OperationTimeout);
            }
        };
        Ok(Bounded::new(ZkStore { zk: Arc::new(zk) }, session_timeout))
    }
}

impl MetadataStore for ZkStore {
    fn get_data<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ZkResult<Vec<u8>>> {
        let zk = self.zk.clone();
        let path = path.to_owned();
        Box::pin(async move {
            debug!(%path, "zookeeper get");
            let (data, _) = settle(tokio::task::spawn_blocking(move || zk.get_data(&path, false)).await)?;
            Ok(data)
        })
    }

    fn get_children<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ZkResult<Vec<String>>> {
        let zk = self.zk.clone();
        let path = path.to_owned();
        Box::pin(async move {
            debug!(%path, "zookeeper ls");
            settle(tokio::task::spawn_blocking(move || zk.get_children(&path, false)).await)
        })
    }
}

fn settle<T>(joined: Result<ZkResult<T>, JoinError>) -> ZkResult<T> {
    joined.unwrap_or_else(|e| {
        debug!(error = %e, "zookeeper blocking task failed");
        Err(ZkError::SystemError)
    })
}

struct Watcher;

impl zookeeper::Watcher for Watcher {
    fn handle(&self, event: WatchedEvent) {
        debug!(?event, "zookeeper session event");
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{StaticStore, Unresponsive};
    use super::*;

    #[tokio::test]
    async fn bounded_store_times_out_silent_requests() {
        let store = Bounded::new(Unresponsive, Duration::from_millis(50));

        let data = store.get_data("/brokers/ids/1").await;
        let children = store.get_children("/brokers/ids").await;

        assert!(matches!(data, Err(ZkError::OperationTimeout)), "{:?}", data);
        assert!(matches!(children, Err(ZkError::OperationTimeout)), "{:?}", children);
    }

    #[tokio::test]
    async fn bounded_store_passes_answers_through() {
        let store = Bounded::new(StaticStore::default().with("/brokers/ids/1", "{}"), Duration::from_secs(1));

        assert_eq!(store.get_data("/brokers/ids/1").await.unwrap(), b"{}".to_vec());
        assert_eq!(store.get_children("/brokers/ids").await.unwrap(), vec!["1".to_owned()]);
        assert!(matches!(store.get_data("/brokers/ids/2").await, Err(ZkError::NoNode)));
    }
}
