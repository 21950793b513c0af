//! Wrappers around the shell tools shipped in a Kafka distribution.

use crate::error::ProbeError;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

const RUN_CLASS: &str = "kafka-run-class.sh";
const TOPICS: &str = "kafka-topics.sh";

/// One row of `ConsumerOffsetChecker` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetRow {
    pub group: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub log_size: i64,
    pub lag: i64,
    pub owner: String
}

/// One partition line of `kafka-topics.sh --describe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRow {
    pub topic: String,
    pub partition: i32,
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>
}

pub struct KafkaTools {
    home: PathBuf
}

impl KafkaTools {
    pub fn new<P: Into<PathBuf>>(home: P) -> Self {
        KafkaTools { home: home.into() }
    }

    fn script(&self, name: &str) -> Result<PathBuf, ProbeError> {
        let path = self.home.join("bin").join(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(ProbeError::ToolMissing(path))
        }
    }

    pub async fn list_topics(&self, zookeeper: &str) -> Result<Vec<String>, ProbeError> {
        let script = self.script(RUN_CLASS)?;
        let lines = read_lines(&script, &["kafka.admin.TopicCommand", "--zookeeper", zookeeper, "--list"]).await?;
        Ok(parse_topic_list(&lines))
    }

    /// An empty `topics` lets the tool pick every topic the group has committed to.
    pub async fn consumer_offsets(&self, group: &str, zookeeper: &str, topics: &[String]) -> Result<Vec<OffsetRow>, ProbeError> {
        let script = self.script(RUN_CLASS)?;
        let joined = topics.join(",");
        let mut args = vec!["kafka.tools.ConsumerOffsetChecker", "--group", group, "--zookeeper", zookeeper];
        if !topics.is_empty() {
            args.push("--topic");
            args.push(&joined);
        }
        let lines = read_lines(&script, &args).await?;
        Ok(parse_offset_rows(&lines))
    }

    pub async fn describe_topics(&self, zookeeper: &str) -> Result<Vec<PartitionRow>, ProbeError> {
        let script = self.script(TOPICS)?;
        let lines = read_lines(&script, &["--describe", "--zookeeper", zookeeper]).await?;
        Ok(parse_partition_rows(&lines))
    }
}

async fn read_lines(script: &Path, args: &[&str]) -> Result<Vec<String>, ProbeError> {
    let command = format!("{} {}", script.display(), args.join(" "));
    debug!(%command, "running kafka tool");

    let output = Command::new(script)
        .args(args)
        .output()
        .await
        .map_err(|source| ProbeError::Command {
            command: command.clone(),
            source
        })?;

    if !output.status.success() {
        return Err(ProbeError::CommandFailed {
            command,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned()
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).lines().map(str::to_owned).collect())
}

pub fn parse_topic_list(lines: &[String]) -> Vec<String> {
    lines.iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .filter(|line| !line.contains("__consumer_offsets") && !line.contains("marked for deletion"))
        .map(str::to_owned)
        .collect()
}

/// Skips the header line. Columns that are not numbers (`unknown`) read as 0.
pub fn parse_offset_rows(lines: &[String]) -> Vec<OffsetRow> {
    lines.iter()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 7 {
                warn!(%line, "skipping offset checker line");
                return None;
            }
            Some(OffsetRow {
                group: cols[0].to_owned(),
                topic: cols[1].to_owned(),
                partition: cols[2].parse().unwrap_or(0),
                offset: lenient(cols[3]),
                log_size: lenient(cols[4]),
                lag: lenient(cols[5]),
                owner: cols[6..].join(" ")
            })
        })
        .collect()
}

fn lenient(value: &str) -> i64 {
    value.parse().unwrap_or(0)
}

/// Reads `Label: value` pairs; per-topic summary lines are ignored.
pub fn parse_partition_rows(lines: &[String]) -> Vec<PartitionRow> {
    lines.iter()
        .filter(|line| !line.contains("ReplicationFactor"))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let topic = labelled(&tokens, "Topic:")?;
            let partition = labelled(&tokens, "Partition:")?.parse().ok()?;
            Some(PartitionRow {
                topic: topic.to_owned(),
                partition,
                leader: labelled(&tokens, "Leader:").and_then(|l| l.parse().ok()).unwrap_or(-1),
                replicas: labelled(&tokens, "Replicas:").map(broker_list).unwrap_or_default(),
                isr: labelled(&tokens, "Isr:").map(broker_list).unwrap_or_default()
            })
        })
        .collect()
}

fn labelled<'a>(tokens: &[&'a str], label: &str) -> Option<&'a str> {
    tokens.iter()
        .position(|t| *t == label)
        .and_then(|i| tokens.get(i + 1))
        .copied()
        .filter(|value| !value.ends_with(':'))
}

fn broker_list(value: &str) -> Vec<i32> {
    value.split(',')
        .filter_map(|id| id.trim().parse().ok())
        .collect()
}
