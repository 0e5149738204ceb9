//! SSB (Statistics Norway) classification API
//!
//! Classifications, their versions, correspondence tables between versions
//! and code changes are fetched from KLASS and converted to rows with
//! [`Version::to_records`], [`Version::to_metadata_record`],
//! [`Correspondence::to_records`] and `Verbatim<CodeChangeItem>::to_record`.
//! Item payloads are kept as [`Verbatim`] so the `data` column is the JSON
//! KLASS sent.

pub mod client;
pub mod models;
mod records;

pub use client::SsbClient;
pub use models::{
    Changelog, Classification, ClassificationItem, CodeChangeItem, ContactPerson, Correspondence,
    CorrespondenceMap, CorrespondenceTableHeader, Level, Verbatim, Version, VersionHeader,
};

/// Value of the `api_versjon` column for KLASS rows
pub const API_VERSION: i64 = 1;

/// Value of the `kildesystem` column for KLASS rows
pub const API_NAME: &str = "SSB";
