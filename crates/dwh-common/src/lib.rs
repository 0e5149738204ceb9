//! DWH Common Library
//!
//! Shared types, utilities, and error handling for the Oppfølging data
//! warehouse ETL tooling.
//!
//! # Overview
//!
//! - **Error Handling**: Custom error types and result types
//! - **Checksums**: SHA-256 hashing of raw payloads and serialized records
//! - **Rows**: Ordered column/value records ready for database insertion
//! - **Transforms**: Datetime, code, and JSON conversions shared by the loaders
//!
//! # Example
//!
//! ```no_run
//! use dwh_common::row::Row;
//! use dwh_common::transforms::{json_to_string, string_to_naive_norwegian_datetime};
//! use dwh_common::checksum::string_to_sha256_hash;
//!
//! fn build() -> dwh_common::Result<Row> {
//!     let data = json_to_string(&serde_json::json!({"code": "01"}));
//!     let row = Row::new()
//!         .with("sha256_hash", string_to_sha256_hash(&data))
//!         .with("data", data)
//!         .with("lastet_dato", string_to_naive_norwegian_datetime("2024-01-01")?);
//!     Ok(row)
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;
pub mod row;
pub mod transforms;

// Re-export commonly used types
pub use error::{DwhError, Result};
pub use row::{Row, Value};
