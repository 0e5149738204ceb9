//! Oracle load helpers
//!
//! Everything is written against the [`Cursor`] trait. The driver-backed
//! [`OracleCursor`] needs the `oracle` feature and the Oracle client
//! libraries at runtime.

#[cfg(feature = "oracle")]
pub mod connection;
pub mod cursor;
pub mod etl;
pub mod sql;

#[cfg(feature = "oracle")]
pub use connection::{create_oracle_connection, OracleCursor};
pub use cursor::{BatchError, BatchOutcome, Cursor, Params, TracedCursor};
pub use etl::{
    create_table_insert_generator, execute_stored_procedure, get_table_row_count, insert_to_table, is_table_empty,
    is_table_stale, is_workflow_stale, log_etl, today, update_table_from_sql, EtlLogEntry, InsertOptions, StaleTableCheck,
    TableInserter, UpdateOptions,
};
pub use sql::build_insert_sql_string;
