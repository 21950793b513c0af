use clap::*;
use kafka_checks::burrow::FetchConfig;
use kafka_checks::check::{CheckResult, Outcome, Status};
use kafka_checks::error::ProbeError;
use kafka_checks::kafka_cli::KafkaTools;
use kafka_checks::lag::{ConsumerLagConfig, ConsumerMetricsConfig, LagThresholds};
use kafka_checks::store::{self, Bounded, ZkStore};
use kafka_checks::{health, lag};
use std::process::exit;
use std::result::Result;
use tracing::error;
use tracing_subscriber::EnvFilter;

const DEFAULT_ZOOKEEPER: &str = "localhost:2181";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_logging();

    let matches = match app().get_matches_safe() {
        Ok(m) => m,
        Err(e) if e.kind == ErrorKind::HelpDisplayed || e.kind == ErrorKind::VersionDisplayed => e.exit(),
        Err(e) => {
            eprintln!("{}", e.message);
            exit(Status::Unknown.exit_code());
        }
    };

    let (command, _) = matches.subcommand();
    let outcome = run(&matches).await;
    exit(report(&check_name(command), outcome));
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn app() -> App<'static, 'static> {
    App::new("kafka-checks")
        .version(crate_version!())
        .about("Health checks and metrics for Kafka clusters and consumer groups")
        .setting(AppSettings::SubcommandRequired)
        .subcommand(SubCommand::with_name("check-broker")
            .about("Verifies that brokers are registered in ZooKeeper")
            .arg(zookeeper_arg())
            .arg(Arg::with_name("ids")
                .short("n")
                .long("ids")
                .value_name("IDS")
                .help("Comma separated broker ids")
                .required(true)
                .validator(non_empty_list)
                .takes_value(true)))
        .subcommand(SubCommand::with_name("check-topic")
            .about("Verifies that a topic exists")
            .arg(zookeeper_arg())
            .arg(Arg::with_name("name")
                .short("n")
                .long("name")
                .value_name("TOPIC_NAME")
                .help("Topic name")
                .required(true)
                .takes_value(true)))
        .subcommand(SubCommand::with_name("check-topics-name")
            .about("Verifies that the cluster holds exactly the given topics")
            .arg(zookeeper_arg())
            .arg(Arg::with_name("name")
                .short("n")
                .long("name")
                .value_name("TOPIC_NAMES")
                .help("Comma separated topic names")
                .required(true)
                .validator(non_empty_list)
                .takes_value(true)))
        .subcommand(SubCommand::with_name("check-topics")
            .about("Verifies leadership, in-sync replicas and replication factor of every partition")
            .arg(kafka_home_arg())
            .arg(zookeeper_arg())
            .arg(Arg::with_name("replication_factor")
                .short("R")
                .long("replication-factor")
                .value_name("N")
                .help("Minimum replication factor of every partition")
                .validator(positive)
                .takes_value(true)))
        .subcommand(SubCommand::with_name("check-consumer-lag")
            .about("Checks a consumer group's per topic lag using ConsumerOffsetChecker")
            .arg(group_arg())
            .arg(kafka_home_arg())
            .arg(topic_excludes_arg())
            .arg(Arg::with_name("auto_list")
                .short("a")
                .long("auto-list")
                .value_name("VALUE")
                .help("Auto list topics")
                .possible_values(&["true", "false"])
                .default_value("true")
                .takes_value(true))
            .arg(zookeeper_arg())
            .arg(threshold_arg("warning_over", "W", "warning-over", "Warning if the largest topic lag is over N"))
            .arg(threshold_arg("critical_over", "C", "critical-over", "Critical if the largest topic lag is over N"))
            .arg(threshold_arg("warning_under", "w", "warning-under", "Warning if the smallest topic lag is under N"))
            .arg(threshold_arg("critical_under", "c", "critical-under", "Critical if the smallest topic lag is under N")))
        .subcommand(SubCommand::with_name("metrics-consumer")
            .about("Emits a consumer group's offset, logsize and lag per topic")
            .arg(scheme_arg("sensu.kafka.consumers"))
            .arg(group_arg())
            .arg(kafka_home_arg())
            .arg(Arg::with_name("topic")
                .short("t")
                .long("topic")
                .value_name("NAME")
                .help("Comma separated list of consumer topics")
                .takes_value(true))
            .arg(topic_excludes_arg())
            .arg(zookeeper_arg()))
        .subcommand(SubCommand::with_name("check-consumer-lag-via-burrow")
            .about("Checks a consumer group's total lag as reported by Burrow")
            .args(&burrow_args())
            .arg(threshold_arg("warning_threshold", "w", "warning_threshold",
                               "Total event group consumers lag warning threshold, zero for none")
                .default_value("0"))
            .arg(threshold_arg("critical_threshold", "C", "critical_threshold",
                               "Total event group consumers lag critical threshold, zero for none")
                .default_value("0")))
        .subcommand(SubCommand::with_name("metrics-consumer-lag-via-burrow")
            .about("Emits a consumer group's total and per owner lag as reported by Burrow")
            .args(&burrow_args())
            .arg(scheme_arg("sensu_kafka.consumers.lag")))
}

fn zookeeper_arg() -> Arg<'static, 'static> {
    Arg::with_name("zookeeper")
        .short("z")
        .long("zookeeper")
        .value_name("ZOOKEEPER")
        .help("ZooKeeper connect string (host:port,..)")
        .default_value(DEFAULT_ZOOKEEPER)
        .takes_value(true)
}

fn kafka_home_arg() -> Arg<'static, 'static> {
    Arg::with_name("kafka_home")
        .short("k")
        .long("kafka-home")
        .value_name("PATH")
        .help("Kafka installation directory")
        .default_value("/opt/kafka")
        .takes_value(true)
}

fn group_arg() -> Arg<'static, 'static> {
    Arg::with_name("group")
        .short("g")
        .long("group")
        .value_name("NAME")
        .help("Consumer group")
        .required(true)
        .takes_value(true)
}

fn topic_excludes_arg() -> Arg<'static, 'static> {
    Arg::with_name("topic_excludes")
        .short("e")
        .long("topic-excludes")
        .value_name("NAMES")
        .help("Comma separated topics to leave out")
        .takes_value(true)
}

fn scheme_arg(default: &'static str) -> Arg<'static, 'static> {
    Arg::with_name("scheme")
        .short("s")
        .long("scheme")
        .value_name("SCHEME")
        .help("Metric naming scheme, text to prepend to metric")
        .default_value(default)
        .takes_value(true)
}

fn threshold_arg(name: &'static str, short: &'static str, long: &'static str, help: &'static str) -> Arg<'static, 'static> {
    Arg::with_name(name)
        .short(short)
        .long(long)
        .value_name("N")
        .help(help)
        .validator(integer)
        .takes_value(true)
}

fn burrow_args() -> Vec<Arg<'static, 'static>> {
    vec![
        Arg::with_name("zookeeper")
            .short("z")
            .long("zookeeper_nodes")
            .value_name("NODES")
            .help("Comma separated ZooKeeper nodes")
            .required(true)
            .takes_value(true),
        Arg::with_name("burrow_url")
            .short("u")
            .long("burrow_url")
            .value_name("URL")
            .help("linkedin/Burrow host url")
            .required(true)
            .takes_value(true),
        Arg::with_name("burrow_timeout")
            .short("t")
            .long("burrow_timeout")
            .value_name("SECONDS")
            .help("Burrow request timeout")
            .default_value("2")
            .validator(positive)
            .takes_value(true),
        Arg::with_name("event_group")
            .short("g")
            .long("event_group")
            .value_name("GROUP")
            .help("Event group name")
            .required(true)
            .takes_value(true),
        Arg::with_name("kafka_cluster")
            .short("c")
            .long("kafka_cluster")
            .value_name("CLUSTER")
            .help("Kafka cluster name")
            .required(true)
            .takes_value(true),
    ]
}

fn integer(value: String) -> Result<(), String> {
    value.parse::<i64>()
        .map(|_| ())
        .map_err(|_| format!("{} is not an integer", value))
}

fn positive(value: String) -> Result<(), String> {
    match value.parse::<u64>() {
        Ok(n) if n > 0 => Ok(()),
        _ => Err(format!("{} is not a positive integer", value))
    }
}

fn non_empty_list(value: String) -> Result<(), String> {
    if split_list(&value).is_empty() {
        Err(format!("'{}' names nothing to check", value))
    } else {
        Ok(())
    }
}

async fn run(matches: &ArgMatches<'_>) -> Result<Outcome, ProbeError> {
    match matches.subcommand() {
        ("check-broker", Some(args)) => {
            let store = zookeeper(args).await?;
            health::check_broker(&store, &list(args, "ids")).await.map(Outcome::from)
        }
        ("check-topic", Some(args)) => {
            let store = zookeeper(args).await?;
            health::check_topic(&store, args.value_of("name").unwrap_or_default()).await.map(Outcome::from)
        }
        ("check-topics-name", Some(args)) => {
            let store = zookeeper(args).await?;
            health::check_topics_name(&store, &list(args, "name")).await.map(Outcome::from)
        }
        ("check-topics", Some(args)) => {
            let replication_factor = value_t!(args, "replication_factor", usize).ok();
            health::check_topics(&kafka_tools(args), zookeeper_address(args), replication_factor).await
                .map(Outcome::from)
        }
        ("check-consumer-lag", Some(args)) => {
            let config = ConsumerLagConfig {
                group: args.value_of("group").unwrap_or_default().to_owned(),
                zookeeper: zookeeper_address(args).to_owned(),
                topic_excludes: list(args, "topic_excludes"),
                auto_list: args.value_of("auto_list") == Some("true"),
                thresholds: LagThresholds {
                    warning_over: value_t!(args, "warning_over", i64).ok(),
                    critical_over: value_t!(args, "critical_over", i64).ok(),
                    warning_under: value_t!(args, "warning_under", i64).ok(),
                    critical_under: value_t!(args, "critical_under", i64).ok()
                }
            };
            lag::check_consumer_lag(&kafka_tools(args), &config).await.map(Outcome::from)
        }
        ("metrics-consumer", Some(args)) => {
            let config = ConsumerMetricsConfig {
                group: args.value_of("group").unwrap_or_default().to_owned(),
                zookeeper: zookeeper_address(args).to_owned(),
                scheme: args.value_of("scheme").unwrap_or_default().to_owned(),
                topics: list(args, "topic"),
                topic_excludes: list(args, "topic_excludes")
            };
            lag::metrics_consumer(&kafka_tools(args), &config, now()).await.map(Outcome::from)
        }
        ("check-consumer-lag-via-burrow", Some(args)) => {
            let warning = value_t!(args, "warning_threshold", i64).unwrap_or_else(|e| e.exit());
            let critical = value_t!(args, "critical_threshold", i64).unwrap_or_else(|e| e.exit());
            lag::check_consumer_lag_via_burrow(&fetch_config(args), warning, critical).await.map(Outcome::from)
        }
        ("metrics-consumer-lag-via-burrow", Some(args)) => {
            let scheme = args.value_of("scheme").unwrap_or_default();
            lag::metrics_consumer_lag_via_burrow(&fetch_config(args), scheme, now()).await.map(Outcome::from)
        }
        (other, _) => Ok(CheckResult::unknown(format!("unknown probe {}", other)).into())
    }
}

/// Prints the outcome for the check runner and returns the process exit code.
fn report(name: &str, outcome: Result<Outcome, ProbeError>) -> i32 {
    match outcome {
        Ok(Outcome::Metrics(metrics)) => {
            for metric in metrics {
                println!("{}", metric);
            }
            Status::Ok.exit_code()
        }
        Ok(Outcome::Check(result)) => {
            println!("{}", result.render(name));
            result.status.exit_code()
        }
        Err(e) => {
            error!(error = %e, "probe failed");
            let result = CheckResult::with_message(e.status(), e.to_string());
            println!("{}", result.render(name));
            result.status.exit_code()
        }
    }
}

/// `check-consumer-lag` reports as `CheckConsumerLag`.
fn check_name(command: &str) -> String {
    command.split('-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new()
            }
        })
        .collect()
}

fn fetch_config(args: &ArgMatches<'_>) -> FetchConfig {
    FetchConfig {
        endpoint_base: args.value_of("burrow_url").unwrap_or_default().to_owned(),
        cluster_name: args.value_of("kafka_cluster").unwrap_or_default().to_owned(),
        group_name: args.value_of("event_group").unwrap_or_default().to_owned(),
        timeout_seconds: value_t!(args, "burrow_timeout", u64).unwrap_or_else(|e| e.exit()),
        metadata_store_address: zookeeper_address(args).to_owned()
    }
}

fn zookeeper_address<'a>(args: &'a ArgMatches<'_>) -> &'a str {
    args.value_of("zookeeper").unwrap_or(DEFAULT_ZOOKEEPER)
}

async fn zookeeper(args: &ArgMatches<'_>) -> Result<Bounded<ZkStore>, ProbeError> {
    let address = zookeeper_address(args);
    ZkStore::connect(address, store::SESSION_TIMEOUT).await
        .map_err(|source| ProbeError::Connect {
            address: address.to_owned(),
            source
        })
}

fn kafka_tools(args: &ArgMatches<'_>) -> KafkaTools {
    KafkaTools::new(args.value_of("kafka_home").unwrap_or("/opt/kafka"))
}

fn list(args: &ArgMatches<'_>, name: &str) -> Vec<String> {
    args.value_of(name).map(split_list).unwrap_or_default()
}

fn split_list(value: &str) -> Vec<String> {
    value.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
