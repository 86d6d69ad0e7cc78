use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ControlError;

use super::model::{Config, DataPoint, SignalCode, TError, TestInfo};

/// One framed control-plane message. Each variant carries exactly the payload
/// it needs; unknown tags and malformed payloads are rejected at decode time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "SType")]
pub enum Signal {
    Err {
        #[serde(rename = "Created")]
        created: DateTime<Utc>,
        #[serde(rename = "Error")]
        error: String,
    },
    RunTest {
        #[serde(rename = "Config")]
        config: Config,
    },
    ListenTest {
        #[serde(rename = "TestID", default)]
        test_id: String,
    },
    ListTests {
        #[serde(rename = "Tests", default)]
        tests: Vec<TestInfo>,
    },
    GetTest {
        #[serde(rename = "TestID", default)]
        test_id: String,
        #[serde(rename = "Data", default)]
        data: String,
    },
    DeleteTests {
        #[serde(rename = "TestID", default)]
        test_id: String,
    },
    Ping {
        #[serde(rename = "Code")]
        code: SignalCode,
    },
    Pong,
    Exit,
    StopAllTests {
        #[serde(rename = "TestID", default)]
        test_id: String,
    },
    Stats {
        #[serde(rename = "DPS", default)]
        points: Vec<DataPoint>,
        #[serde(rename = "Errors", default)]
        errors: Vec<TError>,
    },
    Done {
        #[serde(rename = "Code")]
        code: SignalCode,
    },
}

impl Signal {
    #[must_use]
    pub fn done() -> Self {
        Signal::Done {
            code: SignalCode::Ok,
        }
    }

    #[must_use]
    pub fn greeting() -> Self {
        Signal::Ping {
            code: SignalCode::Ok,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Signal::Err {
            created: Utc::now(),
            error: message.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ControlError> {
        serde_json::to_string(self).map_err(|err| ControlError::Encode {
            context: "signal",
            source: err,
        })
    }

    pub fn decode(text: &str) -> Result<Self, ControlError> {
        serde_json::from_str(text).map_err(|err| ControlError::Decode {
            context: "signal",
            source: err,
        })
    }
}
