//! Process definitions and configuration loading for novapm.
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer, de};
use std::{
    collections::HashMap,
    env, fmt, fs,
    path::Path,
    time::Duration,
};
use strum_macros::AsRefStr;
use sysinfo::{CpuRefreshKind, System};

use crate::error::NovaError;

/// Default graceful-stop window before SIGKILL, in milliseconds.
pub const DEFAULT_KILL_TIMEOUT_MS: u64 = 1600;

/// Default restart budget for a crash streak.
pub const DEFAULT_MAX_RESTARTS: u32 = 16;

/// Default steady tenure that resets a restart streak, in milliseconds.
pub const DEFAULT_LISTEN_TIMEOUT_MS: u64 = 3000;

/// Ceiling applied to exponential restart backoff.
pub const RESTART_BACKOFF_CEILING: Duration = Duration::from_secs(60);

/// Default number of recent lines retained in a per-process ring buffer.
pub const DEFAULT_LOG_RING_LINES: usize = 1000;

/// Default size at which a log file is rotated.
pub const DEFAULT_LOG_ROTATE_BYTES: u64 = 10 * 1024 * 1024;

/// Default number of rotated log files kept per stream.
pub const DEFAULT_LOG_ROTATE_KEEP: usize = 5;

/// How children are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExecMode {
    /// One child per process record.
    #[default]
    Fork,
    /// N children sharing the record and, when configured, the port.
    Cluster,
}

/// Declared instance count: a positive integer or "max" (the CPU count).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceCount {
    /// Fixed number of instances.
    Count(u32),
    /// Resolve to the measured CPU count at spawn time.
    Auto,
}

impl Default for InstanceCount {
    fn default() -> Self {
        InstanceCount::Count(1)
    }
}

impl InstanceCount {
    /// Materialises the declared count against the given CPU count.
    pub fn resolve(&self, cpus: u32) -> u32 {
        match self {
            InstanceCount::Count(n) => (*n).max(1),
            InstanceCount::Auto => cpus.max(1),
        }
    }
}

impl Serialize for InstanceCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            InstanceCount::Count(n) => serializer.serialize_u32(*n),
            InstanceCount::Auto => serializer.serialize_str("max"),
        }
    }
}

impl<'de> Deserialize<'de> for InstanceCount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        struct CountVisitor;

        impl de::Visitor<'_> for CountVisitor {
            type Value = InstanceCount;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a positive integer or 'max'")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                if value == 0 || value > u32::MAX as u64 {
                    return Err(E::invalid_value(
                        de::Unexpected::Unsigned(value),
                        &self,
                    ));
                }
                Ok(InstanceCount::Count(value as u32))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
                if value <= 0 {
                    return Err(E::invalid_value(de::Unexpected::Signed(value), &self));
                }
                self.visit_u64(value as u64)
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                match value.trim().to_ascii_lowercase().as_str() {
                    "max" | "auto" => Ok(InstanceCount::Auto),
                    other => {
                        let parsed: u64 = other.parse().map_err(|_| {
                            E::invalid_value(de::Unexpected::Str(value), &self)
                        })?;
                        if parsed == 0 || parsed > u32::MAX as u64 {
                            return Err(E::invalid_value(
                                de::Unexpected::Str(value),
                                &self,
                            ));
                        }
                        Ok(InstanceCount::Count(parsed as u32))
                    }
                }
            }
        }

        deserializer.deserialize_any(CountVisitor)
    }
}

/// Returns the number of logical CPUs, used to resolve `instances: max`.
pub fn cpu_count() -> u32 {
    let mut system = System::new();
    system.refresh_cpu_list(CpuRefreshKind::nothing());
    system.cpus().len().max(1) as u32
}

/// Health probe kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HealthCheckKind {
    /// GET `http://host:port/path`, healthy iff the status is 2xx.
    Http,
    /// TCP connect to `host:port`, healthy on handshake.
    Tcp,
    /// `sh -c <script>`, healthy iff the exit code is 0.
    Script,
}

/// Health probe configuration for one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    /// Probe kind.
    #[serde(rename = "type")]
    pub kind: HealthCheckKind,
    /// Host probed for http/tcp checks.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port probed for http/tcp checks.
    pub port: Option<u16>,
    /// URL path for http checks.
    #[serde(default = "default_path")]
    pub path: String,
    /// Shell command for script checks.
    pub script: Option<String>,
    /// Interval between probes.
    #[serde(default = "default_probe_interval", with = "duration_ms")]
    pub interval: Duration,
    /// Deadline for a single probe.
    #[serde(default = "default_probe_timeout", with = "duration_ms")]
    pub timeout: Duration,
    /// Consecutive failures before the process is declared unhealthy.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Grace window after spawn during which failures are ignored.
    #[serde(default, with = "duration_ms")]
    pub start_period: Duration,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

fn default_probe_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_retries() -> u32 {
    3
}

/// Log capture configuration for one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSpec {
    /// Number of recent lines retained in memory.
    pub max_lines: usize,
    /// File size threshold that triggers rotation.
    #[serde(with = "byte_size")]
    pub rotate_size: u64,
    /// Number of rotated files kept per stream.
    pub rotate_keep: usize,
    /// Compress rotated files with gzip.
    pub compress: bool,
}

impl Default for LogSpec {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_LOG_RING_LINES,
            rotate_size: DEFAULT_LOG_ROTATE_BYTES,
            rotate_keep: DEFAULT_LOG_ROTATE_KEEP,
            compress: false,
        }
    }
}

/// Filesystem-watch configuration. Accepted and persisted, but no watcher
/// runs; restart-on-change is a future capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSpec {
    /// Paths to watch.
    pub paths: Vec<String>,
    /// Paths excluded from watching.
    pub ignore_watch: Vec<String>,
}

/// Declarative definition of one managed process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Unique case-sensitive process name.
    pub name: String,
    /// Script or binary to execute.
    pub script: String,
    /// Working directory for the child.
    pub cwd: Option<String>,
    /// Arguments passed to the script.
    #[serde(default)]
    pub args: Vec<String>,
    /// Interpreter the script is run with, if any.
    pub interpreter: Option<String>,
    /// Extra arguments passed to the interpreter before the script.
    #[serde(default)]
    pub interpreter_args: Vec<String>,
    /// Fork or cluster execution.
    #[serde(default)]
    pub exec_mode: ExecMode,
    /// Declared instance count.
    #[serde(default)]
    pub instances: InstanceCount,
    /// Environment variables merged over the daemon environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Port injected into children as `PORT`.
    pub port: Option<u16>,
    /// Respawn the child when it exits.
    #[serde(default = "default_true")]
    pub autorestart: bool,
    /// Respawn attempts allowed within one crash streak.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Fixed delay before a respawn.
    #[serde(default, with = "duration_ms")]
    pub restart_delay: Duration,
    /// Base delay for exponential backoff; zero disables backoff.
    #[serde(default, with = "duration_ms")]
    pub exp_backoff_restart_delay: Duration,
    /// RSS threshold that triggers a restart, in bytes.
    #[serde(default, with = "opt_byte_size")]
    pub max_memory_restart: Option<u64>,
    /// Window between SIGINT and SIGKILL on stop.
    #[serde(default = "default_kill_timeout", with = "duration_ms")]
    pub kill_timeout: Duration,
    /// Online tenure after which a restart streak resets.
    #[serde(default = "default_listen_timeout", with = "duration_ms")]
    pub listen_timeout: Duration,
    /// Cron expression that triggers periodic restarts.
    pub cron_restart: Option<String>,
    /// Filesystem-watch declaration (inert).
    pub watch: Option<WatchSpec>,
    /// Health probe configuration.
    pub health_check: Option<HealthCheckSpec>,
    /// Log capture configuration.
    #[serde(default)]
    pub log: LogSpec,
}

fn default_true() -> bool {
    true
}

fn default_max_restarts() -> u32 {
    DEFAULT_MAX_RESTARTS
}

fn default_kill_timeout() -> Duration {
    Duration::from_millis(DEFAULT_KILL_TIMEOUT_MS)
}

fn default_listen_timeout() -> Duration {
    Duration::from_millis(DEFAULT_LISTEN_TIMEOUT_MS)
}

impl ProcessSpec {
    /// Minimal spec used as a starting point by the CLI and tests.
    pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            cwd: None,
            args: Vec::new(),
            interpreter: None,
            interpreter_args: Vec::new(),
            exec_mode: ExecMode::default(),
            instances: InstanceCount::default(),
            env: HashMap::new(),
            port: None,
            autorestart: true,
            max_restarts: DEFAULT_MAX_RESTARTS,
            restart_delay: Duration::ZERO,
            exp_backoff_restart_delay: Duration::ZERO,
            max_memory_restart: None,
            kill_timeout: default_kill_timeout(),
            listen_timeout: default_listen_timeout(),
            cron_restart: None,
            watch: None,
            health_check: None,
            log: LogSpec::default(),
        }
    }

    /// Validates the spec, collecting every violation into one error.
    pub fn validate(&self) -> Result<(), NovaError> {
        let mut problems = Vec::new();

        if self.name.trim().is_empty() {
            problems.push("name: must not be empty".to_string());
        }
        if self.name.contains('/') || self.name.contains('\0') {
            problems.push("name: must not contain '/' or NUL".to_string());
        }
        if self.script.trim().is_empty() {
            problems.push("script: must not be empty".to_string());
        }
        if let InstanceCount::Count(0) = self.instances {
            problems.push("instances: must be a positive integer or 'max'".to_string());
        }
        if self.exec_mode == ExecMode::Fork
            && let InstanceCount::Count(n) = self.instances
            && n > 1
        {
            problems.push(
                "instances: fork mode supports a single instance; use exec_mode: cluster"
                    .to_string(),
            );
        }
        if self.kill_timeout.is_zero() {
            problems.push("kill_timeout: must be greater than zero".to_string());
        }
        if let Some(0) = self.max_memory_restart {
            problems.push("max_memory_restart: must be greater than zero".to_string());
        }
        if let Some(expr) = &self.cron_restart
            && expr.parse::<cron::Schedule>().is_err()
        {
            problems.push(format!("cron_restart: invalid cron expression '{expr}'"));
        }
        if let Some(health) = &self.health_check {
            match health.kind {
                HealthCheckKind::Http | HealthCheckKind::Tcp => {
                    if health.port.is_none() && self.port.is_none() {
                        problems.push(
                            "health_check.port: required for http and tcp probes"
                                .to_string(),
                        );
                    }
                }
                HealthCheckKind::Script => {
                    if health.script.as_deref().unwrap_or("").trim().is_empty() {
                        problems.push(
                            "health_check.script: required for script probes".to_string(),
                        );
                    }
                }
            }
            if health.interval.is_zero() {
                problems.push("health_check.interval: must be greater than zero".into());
            }
            if health.timeout.is_zero() {
                problems.push("health_check.timeout: must be greater than zero".into());
            }
            if health.retries == 0 {
                problems.push("health_check.retries: must be at least 1".into());
            }
        }
        if self.log.max_lines == 0 {
            problems.push("log.max_lines: must be at least 1".to_string());
        }
        if self.log.rotate_size == 0 {
            problems.push("log.rotate_size: must be greater than zero".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(NovaError::ConfigValidation(problems))
        }
    }

    /// Effective port probed by http/tcp health checks.
    pub fn health_port(&self) -> Option<u16> {
        self.health_check
            .as_ref()
            .and_then(|h| h.port)
            .or(self.port)
    }
}

/// Declarative application file enumerating one or more process specs.
#[derive(Debug, Clone, Deserialize)]
pub struct AppFile {
    /// Process definitions.
    pub apps: Vec<ProcessSpec>,
}

/// Loads and validates an application file, expanding `$VAR` references.
pub fn load_app_file(path: &Path) -> Result<Vec<ProcessSpec>, NovaError> {
    let content = fs::read_to_string(path).map_err(|e| {
        NovaError::Io(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, path.display()),
        ))
    })?;

    let expanded = expand_env_vars(&content);
    let file: AppFile = serde_yaml::from_str(&expanded)?;

    let mut problems = Vec::new();
    let mut seen = Vec::new();
    for spec in &file.apps {
        if seen.contains(&spec.name) {
            problems.push(format!("apps: duplicate name '{}'", spec.name));
        }
        seen.push(spec.name.clone());
        if let Err(NovaError::ConfigValidation(mut inner)) = spec.validate() {
            problems.extend(inner.drain(..).map(|p| format!("{}: {p}", spec.name)));
        }
    }

    if problems.is_empty() {
        Ok(file.apps)
    } else {
        Err(NovaError::ConfigValidation(problems))
    }
}

/// Expands `$VAR` / `${VAR}` references against the daemon environment.
/// References to unset variables are left untouched.
fn expand_env_vars(input: &str) -> String {
    let re = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .to_string()
}

/// Parses a duration string such as `100ms`, `30s`, `5m`, `1h` or `2d`.
/// A bare number is interpreted as milliseconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(trimmed.len());
    let (number_part, unit) = trimmed.split_at(split);
    let value: f64 = number_part
        .parse()
        .map_err(|_| format!("invalid duration '{trimmed}'"))?;

    let millis = match unit.trim() {
        "" | "ms" => value,
        "s" => value * 1000.0,
        "m" => value * 60_000.0,
        "h" => value * 3_600_000.0,
        "d" => value * 86_400_000.0,
        other => return Err(format!("unknown duration unit '{other}'")),
    };

    if !millis.is_finite() || millis < 0.0 {
        return Err(format!("invalid duration '{trimmed}'"));
    }

    Ok(Duration::from_millis(millis.round() as u64))
}

/// Parses a byte size such as `512M`, `1G` or `64K`. A bare number is bytes.
pub fn parse_bytes(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    let without_suffix = trimmed.trim_end_matches(&['B', 'b'][..]);

    let (number_part, factor) = match without_suffix.chars().last() {
        Some(suffix) if suffix.is_ascii_alphabetic() => {
            let len = without_suffix.len() - suffix.len_utf8();
            let multiplier = match suffix.to_ascii_uppercase() {
                'K' => 1u64 << 10,
                'M' => 1u64 << 20,
                'G' => 1u64 << 30,
                'T' => 1u64 << 40,
                _ => return Err(format!("invalid byte size '{trimmed}'")),
            };
            (without_suffix[..len].trim(), multiplier)
        }
        _ => (without_suffix.trim(), 1),
    };

    if number_part.is_empty() {
        return Err(format!("invalid byte size '{trimmed}'"));
    }

    let value: u64 = number_part
        .parse()
        .map_err(|_| format!("invalid byte size '{trimmed}'"))?;
    value
        .checked_mul(factor)
        .ok_or_else(|| format!("byte size '{trimmed}' overflows"))
}

/// Serde adapter for durations accepting either milliseconds or a string.
pub mod duration_ms {
    use super::parse_duration;
    use serde::{Deserializer, Serializer, de};
    use std::{fmt, time::Duration};

    pub fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl de::Visitor<'_> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("milliseconds or a duration string like '30s'")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                Ok(Duration::from_millis(value))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
                if value < 0 {
                    return Err(E::invalid_value(
                        de::Unexpected::Signed(value),
                        &"a non-negative duration",
                    ));
                }
                Ok(Duration::from_millis(value as u64))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                parse_duration(value).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

/// Serde adapter for byte sizes accepting either a number or `512M`-style text.
pub mod byte_size {
    use super::parse_bytes;
    use serde::{Deserializer, Serializer, de};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(*value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct BytesVisitor;

        impl de::Visitor<'_> for BytesVisitor {
            type Value = u64;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("bytes or a size string like '512M'")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                Ok(value)
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                parse_bytes(value).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(BytesVisitor)
    }
}

/// `Option<u64>` variant of [`byte_size`].
pub mod opt_byte_size {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(
        value: &Option<u64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(bytes),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<Raw> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(Raw::Number(n)) => Ok(Some(n)),
            Some(Raw::Text(text)) => super::parse_bytes(&text)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
