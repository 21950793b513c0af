use crate::burrow::{self, FetchConfig, LagSnapshot, PartitionLag};
use crate::check::{CheckResult, Metric, Status};
use crate::error::ProbeError;
use crate::kafka_cli::{KafkaTools, OffsetRow};
use itertools::join;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::iter::once;
use tracing::info;

/// Summed per topic, in this order, by both offset checker probes.
const FIELDS: [(&str, fn(&OffsetRow) -> i64); 3] = [
    ("offset", offset_of),
    ("logsize", log_size_of),
    ("lag", lag_of)
];

fn offset_of(row: &OffsetRow) -> i64 {
    row.offset
}

fn log_size_of(row: &OffsetRow) -> i64 {
    row.log_size
}

fn lag_of(row: &OffsetRow) -> i64 {
    row.lag
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LagThresholds {
    pub warning_over: Option<i64>,
    pub critical_over: Option<i64>,
    pub warning_under: Option<i64>,
    pub critical_under: Option<i64>
}

#[derive(Debug, Clone)]
pub struct ConsumerLagConfig {
    pub group: String,
    pub zookeeper: String,
    pub topic_excludes: Vec<String>,
    pub auto_list: bool,
    pub thresholds: LagThresholds
}

#[derive(Debug, Clone)]
pub struct ConsumerMetricsConfig {
    pub group: String,
    pub zookeeper: String,
    pub scheme: String,
    pub topics: Vec<String>,
    pub topic_excludes: Vec<String>
}

pub async fn check_consumer_lag(tools: &KafkaTools, config: &ConsumerLagConfig) -> Result<CheckResult, ProbeError> {
    let mut topics = Vec::new();
    if config.auto_list {
        topics = tools.list_topics(&config.zookeeper).await?;
        topics.retain(|topic| !config.topic_excludes.contains(topic));
    }

    let rows = tools.consumer_offsets(&config.group, &config.zookeeper, &topics).await?;
    Ok(group_lag_health(&config.group, &rows, &config.thresholds))
}

pub fn group_lag_health(group: &str, rows: &[OffsetRow], thresholds: &LagThresholds) -> CheckResult {
    let topics = by_topic(rows);
    if topics.is_empty() {
        return CheckResult::critical("Could not find topics/partitions");
    }

    for (field, value) in FIELDS.iter() {
        for (topic, partitions) in topics.iter() {
            if partitions.iter().any(|row| value(row) < 0) {
                return CheckResult::critical(format!("Topic {} has partitions with {} < 0", topic, field));
            }
        }
    }

    for (topic, partitions) in topics.iter() {
        if partitions.iter().any(|row| row.owner == "none") {
            return CheckResult::critical(format!("Topic {} has partitions with no owner", topic));
        }
    }

    let lags: BTreeMap<&str, i64> = topics.iter()
        .map(|(topic, partitions)| (*topic, partitions.iter().map(|row| row.lag).sum()))
        .collect();
    let max_lag = lags.values().copied().max().unwrap_or(0);
    let min_lag = lags.values().copied().min().unwrap_or(0);
    let holding = |lag: i64| {
        lags.iter().filter(|(_, l)| **l == lag).map(|(topic, _)| *topic).collect::<Vec<&str>>()
    };

    let over = [(Status::Critical, thresholds.critical_over), (Status::Warning, thresholds.warning_over)];
    for (status, threshold) in over.iter() {
        if let Some(threshold) = threshold {
            if max_lag > *threshold {
                return CheckResult::with_message(*status, format!(
                    "Topics `[{}]` for the group `{}` lag: {} (>= {})",
                    join(holding(max_lag), ", "), group, max_lag, threshold));
            }
        }
    }

    let under = [(Status::Critical, thresholds.critical_under), (Status::Warning, thresholds.warning_under)];
    for (status, threshold) in under.iter() {
        if let Some(threshold) = threshold {
            if min_lag < *threshold {
                return CheckResult::with_message(*status, format!(
                    "Topics `[{}]` for the group `{}` lag: {} (<= {})",
                    join(holding(min_lag), ", "), group, min_lag, threshold));
            }
        }
    }

    CheckResult::ok_with(format!("Group `{}`'s lag is ok ({}/{})", group, min_lag, max_lag))
}

pub async fn metrics_consumer(tools: &KafkaTools, config: &ConsumerMetricsConfig, timestamp: i64) -> Result<Vec<Metric>, ProbeError> {
    let rows = tools.consumer_offsets(&config.group, &config.zookeeper, &config.topics).await?;
    Ok(offset_metrics(config, &rows, timestamp))
}

pub fn offset_metrics(config: &ConsumerMetricsConfig, rows: &[OffsetRow], timestamp: i64) -> Vec<Metric> {
    let topics = by_topic(rows);
    let mut metrics = Vec::new();
    for (field, value) in FIELDS.iter() {
        for (topic, partitions) in topics.iter() {
            if config.topic_excludes.iter().any(|excluded| excluded == topic) {
                continue;
            }
            let path = format!("{}.{}.{}.{}", config.scheme, config.group, topic, field);
            metrics.push(Metric::new(path, partitions.iter().map(|row| value(row)).sum(), timestamp));
        }
    }
    metrics
}

fn by_topic(rows: &[OffsetRow]) -> BTreeMap<&str, Vec<&OffsetRow>> {
    let mut topics: BTreeMap<&str, Vec<&OffsetRow>> = BTreeMap::new();
    for row in rows {
        topics.entry(row.topic.as_str()).or_default().push(row);
    }
    topics
}

pub async fn check_consumer_lag_via_burrow(config: &FetchConfig, warning: i64, critical: i64) -> Result<CheckResult, ProbeError> {
    let snapshot = burrow::fetch_lag_snapshot(config).await?;
    info!(total_lag = snapshot.total_lag, partitions = snapshot.partitions.len(), "fetched lag snapshot");
    Ok(snapshot_health(&config.group_name, &snapshot, warning, critical))
}

/// A threshold of zero disables that level.
pub fn exceeds(snapshot: &LagSnapshot, threshold: i64) -> bool {
    threshold > 0 && snapshot.total_lag > threshold
}

pub fn snapshot_health(group: &str, snapshot: &LagSnapshot, warning: i64, critical: i64) -> CheckResult {
    if exceeds(snapshot, critical) {
        CheckResult::critical(lag_message(group, snapshot))
    } else if exceeds(snapshot, warning) {
        CheckResult::warning(lag_message(group, snapshot))
    } else {
        CheckResult::ok()
    }
}

/// Group summary line, then partitions from most to least behind.
pub fn lag_message(group: &str, snapshot: &LagSnapshot) -> String {
    let mut partitions: Vec<&PartitionLag> = snapshot.partitions.iter().collect();
    partitions.sort_by_key(|partition| Reverse(partition.lag));

    let summary = format!("{} is {} events behind - {}", group, in_millions(snapshot.total_lag), snapshot.source_url);
    let lines = partitions.iter().map(|partition| {
        format!("{} lag for {} (partition {})", in_millions(partition.lag), partition.owner, partition.partition_id)
    });
    join(once(summary).chain(lines), "\n")
}

/// `1_500_000` is `1.5 Millions`; three decimals at most, one at least.
pub fn in_millions(value: i64) -> String {
    let millions = (value as f64 / 1_000_000.0 * 1000.0).round() / 1000.0;
    if millions.fract() == 0.0 {
        format!("{:.1} Millions", millions)
    } else {
        format!("{} Millions", millions)
    }
}

pub async fn metrics_consumer_lag_via_burrow(config: &FetchConfig, scheme: &str, timestamp: i64) -> Result<Vec<Metric>, ProbeError> {
    let snapshot = burrow::fetch_lag_snapshot(config).await?;
    Ok(snapshot_metrics(scheme, &snapshot, timestamp))
}

pub fn snapshot_metrics(scheme: &str, snapshot: &LagSnapshot, timestamp: i64) -> Vec<Metric> {
    let total = Metric::new(metric_key(scheme, "total_lag"), snapshot.total_lag, timestamp);
    let partitions = snapshot.partitions.iter()
        .map(|partition| Metric::new(metric_key(scheme, &partition.owner), partition.lag, timestamp));
    once(total).chain(partitions).collect()
}

fn metric_key(scheme: &str, name: &str) -> String {
    format!("{}.{}", scheme, name.replace(|c: char| c == '.' || c == '-', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn offsets(topic: &str, partition: i32, offset: i64, log_size: i64, owner: &str) -> OffsetRow {
        OffsetRow {
            group: "billing".into(),
            topic: topic.into(),
            partition,
            offset,
            log_size,
            lag: log_size - offset,
            owner: owner.into()
        }
    }

    fn rows() -> Vec<OffsetRow> {
        vec![
            offsets("orders", 0, 100, 150, "billing_host-1-0"),
            offsets("orders", 1, 100, 130, "billing_host-1-1"),
            offsets("payments", 0, 10, 15, "billing_host-2-0"),
        ]
    }

    fn snapshot() -> LagSnapshot {
        LagSnapshot {
            total_lag: 5_000_000,
            partitions: vec![
                PartitionLag { partition_id: 1, lag: 2_000_000, owner: "consumer-B".into() },
                PartitionLag { partition_id: 0, lag: 3_000_000, owner: "consumer-A".into() },
            ],
            source_url: "http://burrow:8000/v2/kafka/main/consumer/event-group/lag".into()
        }
    }

    #[test]
    fn lag_within_thresholds_is_ok() {
        let thresholds = LagThresholds { critical_over: Some(1000), warning_under: Some(1), ..Default::default() };

        let result = group_lag_health("billing", &rows(), &thresholds);

        assert_eq!(result, CheckResult::ok_with("Group `billing`'s lag is ok (5/80)"));
    }

    #[test]
    fn critical_over_wins_over_warning_over() {
        let thresholds = LagThresholds { warning_over: Some(10), critical_over: Some(50), ..Default::default() };

        let result = group_lag_health("billing", &rows(), &thresholds);

        assert_eq!(result, CheckResult::critical("Topics `[orders]` for the group `billing` lag: 80 (>= 50)"));
    }

    #[test]
    fn under_threshold_reports_the_quietest_topics() {
        let thresholds = LagThresholds { warning_under: Some(6), ..Default::default() };

        let result = group_lag_health("billing", &rows(), &thresholds);

        assert_eq!(result, CheckResult::warning("Topics `[payments]` for the group `billing` lag: 5 (<= 6)"));
    }

    #[test]
    fn negative_columns_and_missing_owners_are_critical() {
        let mut negative = rows();
        negative[2].lag = -3;
        assert_eq!(
            group_lag_health("billing", &negative, &LagThresholds::default()),
            CheckResult::critical("Topic payments has partitions with lag < 0")
        );

        let mut orphaned = rows();
        orphaned[1].owner = "none".into();
        assert_eq!(
            group_lag_health("billing", &orphaned, &LagThresholds::default()),
            CheckResult::critical("Topic orders has partitions with no owner")
        );
    }

    #[test]
    fn no_rows_is_critical() {
        assert_eq!(
            group_lag_health("billing", &[], &LagThresholds::default()),
            CheckResult::critical("Could not find topics/partitions")
        );
    }

    #[test]
    fn offset_metrics_sum_per_topic_and_skip_excludes() {
        let config = ConsumerMetricsConfig {
            group: "billing".into(),
            zookeeper: "localhost:2181".into(),
            scheme: "sensu.kafka.consumers".into(),
            topics: vec![],
            topic_excludes: vec!["payments".into()]
        };

        let lines: Vec<String> = offset_metrics(&config, &rows(), 1_600_000_000).iter().map(Metric::to_string).collect();

        assert_eq!(lines, vec![
            "sensu.kafka.consumers.billing.orders.offset 200 1600000000",
            "sensu.kafka.consumers.billing.orders.logsize 280 1600000000",
            "sensu.kafka.consumers.billing.orders.lag 80 1600000000",
        ]);
    }

    #[test]
    fn renders_millions() {
        assert_eq!(in_millions(1_500_000), "1.5 Millions");
        assert_eq!(in_millions(999), "0.001 Millions");
        assert_eq!(in_millions(5_000_000), "5.0 Millions");
        assert_eq!(in_millions(1_234_567), "1.235 Millions");
        assert_eq!(in_millions(0), "0.0 Millions");
    }

    #[test]
    fn thresholds_of_zero_never_fire() {
        assert_eq!(snapshot_health("event-group", &snapshot(), 0, 0), CheckResult::ok());
    }

    #[test]
    fn critical_is_checked_before_warning() {
        let result = snapshot_health("event-group", &snapshot(), 100_000, 1_000_000);

        assert_eq!(result.status, Status::Critical);
        assert_eq!(
            result.message.unwrap(),
            "event-group is 5.0 Millions events behind - http://burrow:8000/v2/kafka/main/consumer/event-group/lag\n\
             3.0 Millions lag for consumer-A (partition 0)\n\
             2.0 Millions lag for consumer-B (partition 1)"
        );
    }

    #[test]
    fn warning_when_only_warning_is_exceeded() {
        let result = snapshot_health("event-group", &snapshot(), 1_000_000, 10_000_000);

        assert_eq!(result.status, Status::Warning);
    }

    #[test]
    fn lag_equal_to_threshold_does_not_fire() {
        assert!(!exceeds(&snapshot(), 5_000_000));
        assert!(exceeds(&snapshot(), 4_999_999));
    }

    #[test]
    fn snapshot_metrics_use_sanitized_owner_keys() {
        let mut snapshot = snapshot();
        snapshot.partitions[0].owner = "host.example-com".into();

        let lines: Vec<String> = snapshot_metrics("sensu_kafka.consumers.lag", &snapshot, 42).iter().map(Metric::to_string).collect();

        assert_eq!(lines, vec![
            "sensu_kafka.consumers.lag.total_lag 5000000 42",
            "sensu_kafka.consumers.lag.host_example_com 2000000 42",
            "sensu_kafka.consumers.lag.consumer_A 3000000 42",
        ]);
    }
}
