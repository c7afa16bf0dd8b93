pub mod candidate_filter;
pub mod config;
pub mod downloader;
pub mod error;
pub mod http_client;
pub mod importer;
pub mod logging;
pub mod match_hash;
pub mod pipeline;
pub mod rank_catalog;
pub mod replay;
pub mod source_client;
pub mod staging;
pub mod store;
