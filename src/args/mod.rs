mod cli;
mod parsers;


pub use cli::{
    DownloadArgs, FileArgs, HperfArgs, HperfCommand, LatencyArgs, SelectArgs, ServerArgs, TestArgs,
};
pub use parsers::{parse_hosts, resolve_hosts};
