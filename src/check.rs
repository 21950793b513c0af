use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Warning,
    Critical,
    Unknown
}

impl Status {
    pub fn exit_code(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Warning => 1,
            Status::Critical => 2,
            Status::Unknown => 3
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Ok => "OK",
            Status::Warning => "WARNING",
            Status::Critical => "CRITICAL",
            Status::Unknown => "UNKNOWN"
        };
        f.write_str(label)
    }
}

/// The verdict of a single check run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub status: Status,
    pub message: Option<String>
}

impl CheckResult {
    pub fn ok() -> Self {
        CheckResult { status: Status::Ok, message: None }
    }

    pub fn with_message<S: Into<String>>(status: Status, message: S) -> Self {
        CheckResult { status, message: Some(message.into()) }
    }

    pub fn ok_with<S: Into<String>>(message: S) -> Self {
        Self::with_message(Status::Ok, message)
    }

    pub fn warning<S: Into<String>>(message: S) -> Self {
        Self::with_message(Status::Warning, message)
    }

    pub fn critical<S: Into<String>>(message: S) -> Self {
        Self::with_message(Status::Critical, message)
    }

    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self::with_message(Status::Unknown, message)
    }

    /// `<name> <STATUS>` or `<name> <STATUS>: <message>`, the line a check runner expects.
    pub fn render(&self, name: &str) -> String {
        match &self.message {
            Some(message) => format!("{} {}: {}", name, self.status, message),
            None => format!("{} {}", name, self.status)
        }
    }
}

/// One Graphite plaintext data point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metric {
    pub path: String,
    pub value: i64,
    pub timestamp: i64
}

impl Metric {
    pub fn new<S: Into<String>>(path: S, value: i64, timestamp: i64) -> Self {
        Metric { path: path.into(), value, timestamp }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.path, self.value, self.timestamp)
    }
}

/// What a probe produced: either a verdict or a batch of metrics.
#[derive(Debug)]
pub enum Outcome {
    Check(CheckResult),
    Metrics(Vec<Metric>)
}

impl From<CheckResult> for Outcome {
    fn from(result: CheckResult) -> Self {
        Outcome::Check(result)
    }
}

impl From<Vec<Metric>> for Outcome {
    fn from(metrics: Vec<Metric>) -> Self {
        Outcome::Metrics(metrics)
    }
}
