pub mod app;
pub mod category;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod error;
pub mod export;
pub mod ingest;
pub mod output;
pub mod stats;
pub mod store;
