pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod hamming;
pub mod ingest;
pub mod phash;
pub mod search;
pub mod source;
pub mod store;
pub mod utils;

pub use config::Opts;
pub use db::Record;
pub use ingest::{IngestConfig, IngestSummary, Ingestor};
pub use phash::{Fingerprint, phash};
pub use search::{Query, SearchReport, Searcher};
pub use store::{MemoryStore, RecordStore, SqliteStore};
