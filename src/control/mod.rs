mod model;
mod signal;

#[cfg(test)]
pub(crate) mod tests;

pub use model::{
    join_host_port, Config, DataPoint, FilePrefix, SignalCode, SortKey, TError, TestInfo, TestKind,
    LOW_SENTINEL,
};
pub use signal::Signal;
