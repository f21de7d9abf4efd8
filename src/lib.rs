#![doc = include_str!("../README.md")]

/// NNTP client with TLS and plaintext transport
mod client;
/// NNTP command builders and response parsers
pub mod commands;
/// Server and run configuration
pub mod config;
mod error;
/// Parallel overview fetch orchestration
pub mod fetch;
/// NZB synthesis from indexed overview rows
pub mod nzb;
/// Overview line parsing
pub mod overview;
mod pool;
mod response;
/// Persistent header index over SQLite
pub mod store;
/// Subject line analysis for multipart reassembly
pub mod subject;

pub use client::NntpClient;
pub use commands::GroupInfo;
pub use config::{ServerConfig, Settings};
pub use error::{exit_codes, IndexError, Result};
pub use fetch::{
    ChunkRange, ChunkSource, FetchOptions, FetchOutcome, FetchProgress, Fetcher, IndexOutcome,
    PooledChunkSource,
};
pub use nzb::{build_grouped_nzbs, build_nzb_xml, FileSet, NzbOptions};
pub use overview::{parse_overview_line, OverviewRow, ParseTally};
pub use pool::{NntpPool, RetryConfig};
pub use response::{codes, NntpResponse};
pub use store::{HeaderStore, QueryFilter, UpsertStats};
pub use subject::{analyze, SubjectInfo};
