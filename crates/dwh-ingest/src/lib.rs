//! DWH Ingest Library
//!
//! Source clients and load helpers for the Oppfølging data warehouse.
//!
//! # Overview
//!
//! - **SSB**: classifications, versions, correspondence tables and code changes ([`ssb`])
//! - **BRREG**: units and sub-units from Enhetsregisteret ([`brreg`])
//! - **Kafka**: batched topic reads with Confluent Avro/JSON decoding ([`kafka`])
//! - **Oracle**: insert/update/log helpers over a [`oracle::Cursor`] ([`oracle`])
//! - **GCP**: secrets, access tokens and BigQuery reads ([`gcp`])
//!
//! # Example
//!
//! ```no_run
//! use dwh_ingest::config::IngestConfig;
//! use dwh_ingest::ssb::{SsbClient, API_NAME, API_VERSION};
//!
//! async fn load() -> dwh_ingest::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let client = SsbClient::from_config(&config)?;
//!     let version = client.get_classification_version(1954).await?;
//!     let rows = version.to_records(API_VERSION, API_NAME, dwh_ingest::oracle::today())?;
//!     println!("{} rows", rows.len());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod brreg;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod gcp;
pub mod kafka;
pub mod oracle;
pub mod ssb;

// Re-export commonly used types
pub use cli::Cli;
pub use config::IngestConfig;
pub use error::{IngestError, Result};
