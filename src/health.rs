use crate::check::CheckResult;
use crate::error::ProbeError;
use crate::kafka_cli::{KafkaTools, PartitionRow};
use crate::store::MetadataStore;
use futures::future::try_join_all;
use itertools::join;
use serde::Deserialize;
use std::collections::BTreeSet;

const BROKER_IDS: &str = "/brokers/ids";
const TOPICS: &str = "/brokers/topics";

/// The JSON a broker registers under `/brokers/ids/<id>`.
#[derive(Debug, Deserialize)]
struct BrokerInfo {
    host: Option<String>,
    #[serde(default)]
    port: i32,
    #[serde(default)]
    endpoints: Vec<String>
}

impl BrokerInfo {
    fn address(&self) -> String {
        match (&self.host, self.endpoints.first()) {
            (Some(host), _) => format!("{}:{}", host, self.port),
            (None, Some(endpoint)) => endpoint.clone(),
            (None, None) => "no endpoint".to_owned()
        }
    }
}

pub async fn check_broker<S>(store: &S, ids: &[String]) -> Result<CheckResult, ProbeError>
    where S: MetadataStore + ?Sized
{
    if ids.is_empty() {
        return Ok(CheckResult::unknown("No broker ids given"));
    }
    let live: BTreeSet<String> = children(store, BROKER_IDS).await?.into_iter().collect();

    let missing: Vec<&String> = ids.iter().filter(|id| !live.contains(*id)).collect();
    if !missing.is_empty() {
        return Ok(CheckResult::critical(format!("Brokers '[{}]' not found", join(&missing, ", "))));
    }

    let registrations = try_join_all(ids.iter().map(|id| broker_info(store, id))).await?;
    let brokers = ids.iter()
        .zip(registrations.iter())
        .map(|(id, info)| format!("{} ({})", id, info.address()));
    Ok(CheckResult::ok_with(format!("Brokers registered: {}", join(brokers, ", "))))
}

pub async fn check_topic<S>(store: &S, name: &str) -> Result<CheckResult, ProbeError>
    where S: MetadataStore + ?Sized
{
    let topics = children(store, TOPICS).await?;
    if topics.iter().any(|topic| topic == name) {
        Ok(CheckResult::ok())
    } else {
        Ok(CheckResult::critical(format!("{} not found", name)))
    }
}

/// The live topic set must be exactly `expected`.
pub async fn check_topics_name<S>(store: &S, expected: &[String]) -> Result<CheckResult, ProbeError>
    where S: MetadataStore + ?Sized
{
    if expected.is_empty() {
        return Ok(CheckResult::unknown("No topic names given"));
    }
    let live: BTreeSet<String> = children(store, TOPICS).await?.into_iter().collect();
    let expected_set: BTreeSet<&String> = expected.iter().collect();

    let not_found: Vec<&String> = expected.iter().filter(|name| !live.contains(*name)).collect();
    if !not_found.is_empty() {
        return Ok(CheckResult::critical(format!("Topics '[{}]' not found", join(&not_found, ", "))));
    }

    let not_checked: Vec<&String> = live.iter().filter(|name| !expected_set.contains(name)).collect();
    if !not_checked.is_empty() {
        return Ok(CheckResult::critical(format!("Topics '[{}]' not checked", join(&not_checked, ", "))));
    }

    Ok(CheckResult::ok())
}

pub async fn check_topics(tools: &KafkaTools, zookeeper: &str, replication_factor: Option<usize>) -> Result<CheckResult, ProbeError> {
    let rows = tools.describe_topics(zookeeper).await?;
    Ok(partition_health(&rows, replication_factor))
}

/// Critical findings win over warnings; every finding is listed, one per line.
pub fn partition_health(rows: &[PartitionRow], replication_factor: Option<usize>) -> CheckResult {
    if rows.is_empty() {
        return CheckResult::critical("Could not find topics/partitions");
    }

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for row in rows {
        if row.isr.is_empty() {
            errors.push(format!("topic {} partition {} has no active replicas", row.topic, row.partition));
        } else if row.leader < 0 {
            errors.push(format!("topic {} partition {} has no leader", row.topic, row.partition));
        } else if row.isr.len() < row.replicas.len() {
            warnings.push(format!("topic {} partition {} is under-replicated", row.topic, row.partition));
        }

        if let Some(expected) = replication_factor {
            if row.replicas.len() < expected {
                errors.push(format!("topic {} partition {} has {} replicas (expected {})",
                                    row.topic, row.partition, row.replicas.len(), expected));
            }
        }
    }

    if !errors.is_empty() {
        CheckResult::critical(join(errors.iter().chain(warnings.iter()), "\n"))
    } else if !warnings.is_empty() {
        CheckResult::warning(join(&warnings, "\n"))
    } else {
        let topics: BTreeSet<&str> = rows.iter().map(|row| row.topic.as_str()).collect();
        CheckResult::ok_with(format!("{} topics, {} partitions in sync", topics.len(), rows.len()))
    }
}

async fn children<S>(store: &S, path: &str) -> Result<Vec<String>, ProbeError>
    where S: MetadataStore + ?Sized
{
    let mut children = store.get_children(path).await
        .map_err(|source| ProbeError::Zookeeper {
            path: path.to_owned(),
            source
        })?;
    children.sort();
    Ok(children)
}

async fn broker_info<S>(store: &S, id: &str) -> Result<BrokerInfo, ProbeError>
    where S: MetadataStore + ?Sized
{
    let path = format!("{}/{}", BROKER_IDS, id);
    let data = store.get_data(&path).await
        .map_err(|source| ProbeError::Zookeeper {
            path: path.clone(),
            source
        })?;
    serde_json::from_slice(&data).map_err(|source| ProbeError::Registration { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::Status;
    use crate::store::testing::{StaticStore, Unresponsive};
    use crate::store::Bounded;
    use std::time::Duration;
    use zookeeper::ZkError;

    fn cluster() -> StaticStore {
        StaticStore::default()
            .with("/brokers/ids/1", r#"{"host":"kafka1","port":9092,"endpoints":["PLAINTEXT://kafka1:9092"]}"#)
            .with("/brokers/ids/2", r#"{"host":null,"port":-1,"endpoints":["SSL://kafka2:9093"]}"#)
            .with("/brokers/topics/orders", r#"{"version":1,"partitions":{"0":[1,2]}}"#)
            .with("/brokers/topics/payments", r#"{"version":1,"partitions":{"0":[2,1]}}"#)
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn row(partition: i32, leader: i32, replicas: &[i32], isr: &[i32]) -> PartitionRow {
        PartitionRow {
            topic: "orders".into(),
            partition,
            leader,
            replicas: replicas.to_vec(),
            isr: isr.to_vec()
        }
    }

    #[tokio::test]
    async fn registered_brokers_are_ok() {
        let result = check_broker(&cluster(), &ids(&["1", "2"])).await.unwrap();

        assert_eq!(result, CheckResult::ok_with("Brokers registered: 1 (kafka1:9092), 2 (SSL://kafka2:9093)"));
    }

    #[tokio::test]
    async fn missing_broker_is_critical() {
        let result = check_broker(&cluster(), &ids(&["1", "3", "4"])).await.unwrap();

        assert_eq!(result, CheckResult::critical("Brokers '[3, 4]' not found"));
    }

    #[tokio::test]
    async fn garbled_registration_is_an_error() {
        let store = StaticStore::default().with("/brokers/ids/5", "not json");

        let err = check_broker(&store, &ids(&["5"])).await.unwrap_err();

        assert!(matches!(err, ProbeError::Registration { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn unreadable_broker_list_is_an_error() {
        let err = check_broker(&StaticStore::default(), &ids(&["1"])).await.unwrap_err();

        assert!(err.to_string().starts_with("failed reading /brokers/ids"), "{}", err);
    }

    #[tokio::test]
    async fn empty_lists_check_nothing() {
        assert_eq!(check_broker(&cluster(), &[]).await.unwrap(), CheckResult::unknown("No broker ids given"));
        assert_eq!(check_topics_name(&cluster(), &[]).await.unwrap(), CheckResult::unknown("No topic names given"));
    }

    #[tokio::test]
    async fn silent_zookeeper_fails_the_check() {
        let store = Bounded::new(Unresponsive, Duration::from_millis(50));

        let err = check_broker(&store, &ids(&["1"])).await.unwrap_err();

        assert!(matches!(err, ProbeError::Zookeeper { source: ZkError::OperationTimeout, .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn topic_presence() {
        assert_eq!(check_topic(&cluster(), "orders").await.unwrap(), CheckResult::ok());
        assert_eq!(check_topic(&cluster(), "clicks").await.unwrap(), CheckResult::critical("clicks not found"));
    }

    #[tokio::test]
    async fn topic_names_must_match_exactly() {
        let exact = check_topics_name(&cluster(), &ids(&["payments", "orders"])).await.unwrap();
        assert_eq!(exact.status, Status::Ok);

        let missing = check_topics_name(&cluster(), &ids(&["orders", "payments", "clicks"])).await.unwrap();
        assert_eq!(missing, CheckResult::critical("Topics '[clicks]' not found"));

        let extra = check_topics_name(&cluster(), &ids(&["orders"])).await.unwrap();
        assert_eq!(extra, CheckResult::critical("Topics '[payments]' not checked"));
    }

    #[test]
    fn healthy_partitions() {
        let rows = vec![row(0, 1, &[1, 2], &[1, 2]), row(1, 2, &[2, 1], &[2, 1])];

        let result = partition_health(&rows, Some(2));

        assert_eq!(result, CheckResult::ok_with("1 topics, 2 partitions in sync"));
    }

    #[test]
    fn lagging_replica_is_a_warning() {
        let rows = vec![row(0, 1, &[1, 2], &[1])];

        let result = partition_health(&rows, None);

        assert_eq!(result, CheckResult::warning("topic orders partition 0 is under-replicated"));
    }

    #[test]
    fn offline_partition_and_short_replication_are_critical() {
        let rows = vec![row(0, -1, &[1, 2], &[]), row(1, 1, &[1], &[1]), row(2, 1, &[1, 2], &[1])];

        let result = partition_health(&rows, Some(2));

        assert_eq!(result.status, Status::Critical);
        pretty_assertions::assert_eq!(
            result.message.unwrap(),
            "topic orders partition 0 has no active replicas\n\
             topic orders partition 1 has 1 replicas (expected 2)\n\
             topic orders partition 2 is under-replicated"
        );
    }

    #[test]
    fn no_partitions_is_critical() {
        assert_eq!(partition_health(&[], None), CheckResult::critical("Could not find topics/partitions"));
    }
}
