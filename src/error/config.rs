use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No hosts were provided.")]
    EmptyHosts,
    #[error("Missing required --id for {command}.")]
    MissingTestId { command: &'static str },
    #[error("Missing required --file for {command}.")]
    MissingFile { command: &'static str },
    #[error("Invalid ellipsis pattern ({pattern}), expected the format 1.1.1.{{1...3}}.")]
    InvalidEllipsis { pattern: String },
    #[error("When using a file for hosts, use the format file:path, example file:~/hosts.txt.")]
    MissingHostsFilePath,
    #[error("Could not read hosts file {path}: {source}")]
    HostsFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Hosts within {path} should be one per line or comma separated.")]
    EmptyHostsFile { path: String },
    #[error("Could not resolve host {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Host {host} did not resolve to any address.")]
    NoAddresses { host: String },
    #[error("No peers were created, please revise the host list.")]
    NoPeers,
    #[error("Invalid sort key ({value}), expected RMSH or TTFBH.")]
    InvalidSortKey { value: String },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: String },
}
