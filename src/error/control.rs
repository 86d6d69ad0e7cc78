use thiserror::Error;

use crate::control::SignalCode;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Connection error to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error("Timed out waiting for {expected} host handshakes (got {actual}).")]
    HandshakeTimeout { expected: usize, actual: usize },
    #[error("Received {code:?} from {host} on connect, expected OK.")]
    HandshakeRejected { host: String, code: SignalCode },
    #[error("Expected a Ping greeting from {host}.")]
    UnexpectedGreeting { host: String },
    #[error("Connection to {host} closed.")]
    ConnectionClosed { host: String },
    #[error("Decode error during {context}: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Encode error during {context}: {source}")]
    Encode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Total duration reached 20 seconds past the configured duration.")]
    KeepAliveExpired,
    #[error("Unknown result line prefix: {prefix}")]
    UnknownPrefix { prefix: u8 },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: String },
}
