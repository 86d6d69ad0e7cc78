use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("A test with id {id} is already running.")]
    DuplicateTest { id: String },
    #[error("Invalid bind address {addr}: {source}")]
    BindAddr {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Result file error for test {id}: {source}")]
    ResultFile {
        id: String,
        #[source]
        source: std::io::Error,
    },
}
