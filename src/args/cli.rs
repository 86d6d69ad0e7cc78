use clap::{ArgAction, Args, Parser, Subcommand};

use crate::control::{Config, SortKey, TestKind};
use crate::error::{AppResult, ConfigError};

use super::parsers::{parse_hosts, resolve_hosts};

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
        * 2
}

fn generated_test_id() -> String {
    chrono::Utc::now().timestamp().to_string()
}

#[derive(Debug, Parser)]
#[command(
    name = "hperf",
    version,
    about = "Network performance measurement for fleets of cooperating nodes"
)]
pub struct HperfArgs {
    #[command(subcommand)]
    pub command: HperfCommand,

    /// Enable debug output
    #[arg(long, global = true, env = "HPERF_DEBUG")]
    pub debug: bool,
}

#[derive(Debug, Subcommand)]
pub enum HperfCommand {
    /// Start an agent serving the control and data endpoints
    Server(ServerArgs),
    /// Run a preset round-trip latency test and analyze the results
    Latency(LatencyArgs),
    /// Run a streaming bandwidth test
    Bandwidth(TestArgs),
    /// Run a throughput-per-request test
    Requests(TestArgs),
    /// Attach to live tests and stream their data points
    Listen(SelectArgs),
    /// List tests stored on the selected hosts
    List(SelectArgs),
    /// Stop running tests on the selected hosts
    Stop(SelectArgs),
    /// Download a test's result files from the selected hosts
    Download(DownloadArgs),
    /// Delete stored tests from the selected hosts
    Delete(SelectArgs),
    /// Analyze a downloaded result file
    Analyze(FileArgs),
    /// Export a downloaded result file as CSV
    Csv(FileArgs),
}

#[derive(Debug, Args)]
pub struct ServerArgs {
    /// Bind to the specified address
    #[arg(long, env = "HPERF_ADDRESS", default_value = "0.0.0.0:9010")]
    pub address: String,

    /// The real IP used to connect to other servers, when --address is not
    /// bound to it
    #[arg(long = "real-ip", env = "HPERF_REAL_IP")]
    pub real_ip: Option<String>,

    /// Directory that receives test result files
    #[arg(long = "storage-path", env = "HPERF_STORAGE_PATH")]
    pub storage_path: Option<std::path::PathBuf>,
}

#[derive(Debug, Args)]
pub struct TestArgs {
    /// Hosts taking part in the test: comma separated, file:<path>, or
    /// ellipsis ranges like 10.10.1.{1...3}
    #[arg(long, env = "HPERF_HOSTS")]
    pub hosts: String,

    /// Port used to communicate with hosts
    #[arg(long, env = "HPERF_PORT", default_value_t = 9010)]
    pub port: u16,

    /// Custom id for the test (defaults to the unix timestamp)
    #[arg(long)]
    pub id: Option<String>,

    /// How long the test will run, in seconds
    #[arg(long, env = "HPERF_DURATION", default_value_t = 30)]
    pub duration: u64,

    /// Concurrent requests kept in flight per host pair
    #[arg(long, env = "HPERF_CONCURRENCY", default_value_t = default_concurrency())]
    pub concurrency: usize,

    /// Delay in milliseconds before each request is sent
    #[arg(long = "request-delay", env = "HPERF_REQUEST_DELAY", default_value_t = 0)]
    pub request_delay: u64,

    /// Buffer size in bytes
    #[arg(long = "buffer-size", env = "HPERF_BUFFER_SIZE", default_value_t = 32_000)]
    pub buffer_size: usize,

    /// Payload size in bytes
    #[arg(long = "payload-size", env = "HPERF_PAYLOAD_SIZE", default_value_t = 1_000_000)]
    pub payload_size: usize,

    /// Reconnect the control channel when it fails
    #[arg(
        long = "restart-on-error",
        env = "HPERF_RESTART_ON_ERROR",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub restart_on_error: bool,

    /// Save test results on the agents for later retrieval
    #[arg(
        long,
        env = "HPERF_SAVE",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub save: bool,

    /// Use plain http/ws instead of https/wss
    #[arg(
        long,
        env = "HPERF_INSECURE",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub insecure: bool,

    /// Use a custom DNS server to resolve hosts
    #[arg(long = "dns-server", env = "HPERF_DNS_SERVER")]
    pub dns_server: Option<String>,

    /// Print every data point after the test finishes
    #[arg(long = "print-stats")]
    pub print_stats: bool,

    /// Print recorded errors after the test finishes
    #[arg(long = "print-errors")]
    pub print_errors: bool,

    /// Sort key for the analysis pass (RMSH or TTFBH)
    #[arg(long, default_value = "RMSH")]
    pub sort: SortKey,

    /// Only show data points involving this host
    #[arg(long = "host-filter")]
    pub host_filter: Option<String>,
}

/// The latency command pins payload, buffer, concurrency and pacing; only the
/// remaining knobs are exposed.
#[derive(Debug, Args)]
pub struct LatencyArgs {
    /// Hosts taking part in the test
    #[arg(long, env = "HPERF_HOSTS")]
    pub hosts: String,

    /// Port used to communicate with hosts
    #[arg(long, env = "HPERF_PORT", default_value_t = 9010)]
    pub port: u16,

    /// Custom id for the test (defaults to the unix timestamp)
    #[arg(long)]
    pub id: Option<String>,

    /// How long the test will run, in seconds
    #[arg(long, env = "HPERF_DURATION", default_value_t = 30)]
    pub duration: u64,

    /// Save test results on the agents for later retrieval
    #[arg(
        long,
        env = "HPERF_SAVE",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub save: bool,

    /// Use plain http/ws instead of https/wss
    #[arg(
        long,
        env = "HPERF_INSECURE",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub insecure: bool,

    /// Use a custom DNS server to resolve hosts
    #[arg(long = "dns-server", env = "HPERF_DNS_SERVER")]
    pub dns_server: Option<String>,

    /// Print every data point after the test finishes
    #[arg(long = "print-stats")]
    pub print_stats: bool,

    /// Print recorded errors after the test finishes
    #[arg(long = "print-errors")]
    pub print_errors: bool,

    /// Sort key for the analysis pass (RMSH or TTFBH)
    #[arg(long, default_value = "RMSH")]
    pub sort: SortKey,
}

#[derive(Debug, Args)]
pub struct SelectArgs {
    /// Hosts to contact
    #[arg(long, env = "HPERF_HOSTS")]
    pub hosts: String,

    /// Port used to communicate with hosts
    #[arg(long, env = "HPERF_PORT", default_value_t = 9010)]
    pub port: u16,

    /// Test id to select (all tests when omitted)
    #[arg(long)]
    pub id: Option<String>,

    /// Use plain http/ws instead of https/wss
    #[arg(
        long,
        env = "HPERF_INSECURE",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub insecure: bool,

    /// Use a custom DNS server to resolve hosts
    #[arg(long = "dns-server", env = "HPERF_DNS_SERVER")]
    pub dns_server: Option<String>,
}

#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Hosts to download from
    #[arg(long, env = "HPERF_HOSTS")]
    pub hosts: String,

    /// Port used to communicate with hosts
    #[arg(long, env = "HPERF_PORT", default_value_t = 9010)]
    pub port: u16,

    /// Test id to download
    #[arg(long)]
    pub id: Option<String>,

    /// Output file path
    #[arg(long)]
    pub file: Option<String>,

    /// Use plain http/ws instead of https/wss
    #[arg(
        long,
        env = "HPERF_INSECURE",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub insecure: bool,

    /// Use a custom DNS server to resolve hosts
    #[arg(long = "dns-server", env = "HPERF_DNS_SERVER")]
    pub dns_server: Option<String>,
}

#[derive(Debug, Args)]
pub struct FileArgs {
    /// Input file path
    #[arg(long)]
    pub file: Option<String>,

    /// Print every data point
    #[arg(long = "print-stats")]
    pub print_stats: bool,

    /// Print recorded errors
    #[arg(long = "print-errors")]
    pub print_errors: bool,

    /// Sort key for the analysis pass (RMSH or TTFBH)
    #[arg(long, default_value = "RMSH")]
    pub sort: SortKey,

    /// Only show data points involving this host
    #[arg(long = "host-filter")]
    pub host_filter: Option<String>,
}

impl TestArgs {
    pub async fn into_config(self, kind: TestKind) -> AppResult<Config> {
        let hosts = parse_hosts(&self.hosts)?;
        let hosts = resolve_hosts(hosts, self.dns_server.as_deref()).await?;
        Ok(Config {
            test_id: self.id.unwrap_or_else(generated_test_id),
            kind,
            duration_secs: self.duration,
            concurrency: self.concurrency.max(1),
            payload_bytes: self.payload_size,
            buffer_bytes: self.buffer_size,
            request_delay_ms: self.request_delay,
            port: self.port,
            hosts,
            insecure: self.insecure,
            save: self.save,
            restart_on_error: self.restart_on_error,
            dial_timeout_secs: 0,
            file: None,
            print_full: self.print_stats,
            print_errors: self.print_errors,
            sort: self.sort,
            host_filter: self.host_filter,
        })
    }
}

impl LatencyArgs {
    pub async fn into_config(self) -> AppResult<Config> {
        let hosts = parse_hosts(&self.hosts)?;
        let hosts = resolve_hosts(hosts, self.dns_server.as_deref()).await?;
        Ok(Config {
            test_id: self.id.unwrap_or_else(generated_test_id),
            kind: TestKind::Request,
            duration_secs: self.duration,
            concurrency: 1,
            payload_bytes: 1000,
            buffer_bytes: 1000,
            request_delay_ms: 200,
            port: self.port,
            hosts,
            insecure: self.insecure,
            save: self.save,
            restart_on_error: true,
            dial_timeout_secs: 0,
            file: None,
            print_full: self.print_stats,
            print_errors: self.print_errors,
            sort: self.sort,
            host_filter: None,
        })
    }
}

impl SelectArgs {
    pub async fn into_config(self) -> AppResult<Config> {
        let hosts = parse_hosts(&self.hosts)?;
        let hosts = resolve_hosts(hosts, self.dns_server.as_deref()).await?;
        Ok(Config {
            test_id: self.id.unwrap_or_default(),
            kind: TestKind::Latency,
            duration_secs: 30,
            concurrency: 1,
            payload_bytes: 0,
            buffer_bytes: 0,
            request_delay_ms: 0,
            port: self.port,
            hosts,
            insecure: self.insecure,
            save: false,
            restart_on_error: false,
            dial_timeout_secs: 0,
            file: None,
            print_full: false,
            print_errors: false,
            sort: SortKey::default(),
            host_filter: None,
        })
    }
}

impl DownloadArgs {
    pub async fn into_config(self) -> AppResult<Config> {
        let test_id = self
            .id
            .ok_or(ConfigError::MissingTestId {
                command: "download",
            })?;
        let file = self.file.ok_or(ConfigError::MissingFile {
            command: "download",
        })?;
        let hosts = parse_hosts(&self.hosts)?;
        let hosts = resolve_hosts(hosts, self.dns_server.as_deref()).await?;
        Ok(Config {
            test_id,
            kind: TestKind::Latency,
            duration_secs: 30,
            concurrency: 1,
            payload_bytes: 0,
            buffer_bytes: 0,
            request_delay_ms: 0,
            port: self.port,
            hosts,
            insecure: self.insecure,
            save: false,
            restart_on_error: false,
            dial_timeout_secs: 0,
            file: Some(file),
            print_full: false,
            print_errors: false,
            sort: SortKey::default(),
            host_filter: None,
        })
    }
}

impl FileArgs {
    pub fn into_config(self, command: &'static str) -> AppResult<Config> {
        let file = self.file.ok_or(ConfigError::MissingFile { command })?;
        Ok(Config {
            test_id: String::new(),
            kind: TestKind::Latency,
            duration_secs: 0,
            concurrency: 1,
            payload_bytes: 0,
            buffer_bytes: 0,
            request_delay_ms: 0,
            port: 9010,
            hosts: Vec::new(),
            insecure: true,
            save: false,
            restart_on_error: false,
            dial_timeout_secs: 0,
            file: Some(file),
            print_full: self.print_stats,
            print_errors: self.print_errors,
            sort: self.sort,
            host_filter: self.host_filter,
        })
    }
}
