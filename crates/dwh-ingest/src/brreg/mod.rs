//! BRREG Enhetsregisteret (Norwegian register of legal entities)
//!
//! Units (`Enhet`) and sub-units (`Underenhet`) are fetched one by one,
//! through the update feed, or from the daily full dump, and turned into
//! rows combining the latest update with the unit document.

pub mod bulk;
pub mod client;
pub mod rows;

pub use client::BrregUnitApi;
pub use rows::{
    brreg_date_to_naive_norwegian_datetime, make_fake_unit, make_fake_unit_update, make_row,
    naive_utc0_datetime_to_brreg_date_str,
};

/// Value of the `api_versjon` column for BRREG rows
pub const API_VERSION: i64 = 2;

/// Value of the `kildesystem` column for BRREG rows
pub const API_NAME: &str = "BRREG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum UnitType {
    Enhet,
    Underenhet,
}

impl UnitType {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitType::Enhet => "Enhet",
            UnitType::Underenhet => "Underenhet",
        }
    }

    /// Lower-case name used in paths and media types
    pub fn path_name(self) -> &'static str {
        match self {
            UnitType::Enhet => "enhet",
            UnitType::Underenhet => "underenhet",
        }
    }
}

impl std::fmt::Display for UnitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
