//! Monitoring probes for Kafka: cluster metadata in ZooKeeper, the Kafka
//! command line tools, and consumer lag as reported by linkedin/Burrow.
//! Every probe produces either a check verdict or a batch of Graphite metrics.

pub mod burrow;
pub mod check;
pub mod error;
pub mod health;
pub mod kafka_cli;
pub mod lag;
pub mod store;
