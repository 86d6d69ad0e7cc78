use super::{ConfigError, ControlError};

impl From<&'static str> for ConfigError {
    fn from(message: &'static str) -> Self {
        ConfigError::TestExpectation {
            message: message.to_owned(),
        }
    }
}

impl From<String> for ConfigError {
    fn from(message: String) -> Self {
        ConfigError::TestExpectation { message }
    }
}

impl From<&'static str> for ControlError {
    fn from(message: &'static str) -> Self {
        ControlError::TestExpectation {
            message: message.to_owned(),
        }
    }
}

impl From<String> for ControlError {
    fn from(message: String) -> Self {
        ControlError::TestExpectation { message }
    }
}
