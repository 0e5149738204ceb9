//! Cursor over a real Oracle connection

use crate::error::{IngestError, Result};
use crate::gcp::OracleCredentials;
use crate::oracle::cursor::{BatchError, BatchOutcome, Cursor, Params};
use chrono::NaiveDateTime;
use dwh_common::{Row, Value};
use ::oracle::sql_type::{OracleType, ToSql};
use ::oracle::{Connection, SqlValue};
use tracing::{info, warn};

fn db_error(e: ::oracle::Error) -> IngestError {
    IngestError::database(e)
}

fn bind_value(value: &Value) -> Box<dyn ToSql> {
    match value {
        Value::Null => Box::new(None::<String>),
        Value::Bool(b) => Box::new(i64::from(*b)),
        Value::Int(i) => Box::new(*i),
        Value::Float(f) => Box::new(*f),
        Value::Text(s) => Box::new(s.clone()),
        Value::Timestamp(ts) => Box::new(*ts),
    }
}

fn read_value(value: &SqlValue) -> Result<Value> {
    if value.is_null().map_err(db_error)? {
        return Ok(Value::Null);
    }
    let converted = match value.oracle_type().map_err(db_error)? {
        OracleType::Number(_, _) | OracleType::Int64 | OracleType::UInt64 => match value.get::<i64>() {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Float(value.get::<f64>().map_err(db_error)?),
        },
        OracleType::BinaryFloat | OracleType::BinaryDouble | OracleType::Float(_) => {
            Value::Float(value.get::<f64>().map_err(db_error)?)
        },
        OracleType::Date | OracleType::Timestamp(_) | OracleType::TimestampTZ(_) | OracleType::TimestampLTZ(_) => {
            Value::Timestamp(value.get::<NaiveDateTime>().map_err(db_error)?)
        },
        _ => Value::Text(value.get::<String>().map_err(db_error)?),
    };
    Ok(converted)
}

/// Connects with the schema's credentials; as proxy the session runs as
/// `user[schema]`, which is required for DDL.
pub fn create_oracle_connection(credentials: &OracleCredentials, schema: &str, as_proxy: bool) -> Result<OracleCursor> {
    let user = credentials.login_user(schema, as_proxy);
    let conn = Connection::connect(&user, &credentials.pwd, credentials.connect_string()).map_err(db_error)?;
    info!(schema, as_proxy, host = %credentials.host, "Connected to Oracle");
    Ok(OracleCursor { conn })
}

pub struct OracleCursor {
    conn: Connection,
}

impl OracleCursor {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn commit(&self) -> Result<()> {
        self.conn.commit().map_err(db_error)
    }

    pub fn rollback(&self) -> Result<()> {
        self.conn.rollback().map_err(db_error)
    }
}

/// Owned bind values with the borrowed view the driver expects
struct Binds {
    values: Vec<(String, Box<dyn ToSql>)>,
    positional: bool,
}

impl Binds {
    fn from_params(params: &Params) -> Self {
        Self {
            positional: matches!(params, Params::Positional(_)),
            values: params
                .entries()
                .into_iter()
                .map(|(name, value)| (name, bind_value(value)))
                .collect(),
        }
    }

    fn from_row(row: &Row) -> Self {
        Self {
            positional: false,
            values: row
                .iter()
                .map(|(column, value)| (column.to_string(), bind_value(value)))
                .collect(),
        }
    }

    fn named(&self) -> Vec<(&str, &dyn ToSql)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value.as_ref())).collect()
    }

    fn ordered(&self) -> Vec<&dyn ToSql> {
        self.values.iter().map(|(_, value)| value.as_ref()).collect()
    }
}

impl Cursor for OracleCursor {
    fn execute(&mut self, sql: &str, params: &Params) -> Result<u64> {
        let binds = Binds::from_params(params);
        let stmt = if binds.positional {
            self.conn.execute(sql, &binds.ordered())
        } else {
            self.conn.execute_named(sql, &binds.named())
        }
        .map_err(db_error)?;
        stmt.row_count().map_err(db_error)
    }

    fn query_row(&mut self, sql: &str, params: &Params) -> Result<Option<Vec<Value>>> {
        let binds = Binds::from_params(params);
        let mut rows = if binds.positional {
            self.conn.query(sql, &binds.ordered())
        } else {
            self.conn.query_named(sql, &binds.named())
        }
        .map_err(db_error)?;
        match rows.next() {
            Some(row) => {
                let row = row.map_err(db_error)?;
                row.sql_values().iter().map(read_value).collect::<Result<Vec<_>>>().map(Some)
            },
            None => Ok(None),
        }
    }

    fn execute_many(&mut self, sql: &str, rows: &[Row], batch_errors: bool) -> Result<BatchOutcome> {
        let mut stmt = self.conn.statement(sql).build().map_err(db_error)?;
        let mut outcome = BatchOutcome::default();
        for (offset, row) in rows.iter().enumerate() {
            let binds = Binds::from_row(row);
            match stmt.execute_named(&binds.named()) {
                Ok(()) => outcome.row_count += stmt.row_count().map_err(db_error)?,
                Err(e) if batch_errors && e.db_error().is_some() => {
                    let (code, message) = e
                        .db_error()
                        .map(|db| (db.code(), db.message().to_string()))
                        .unwrap_or_default();
                    warn!(offset, code, %message, "Row rejected");
                    outcome.errors.push(BatchError { offset, code, message });
                },
                Err(e) => return Err(db_error(e)),
            }
        }
        Ok(outcome)
    }

    fn call_procedure(&mut self, name: &str, args: &[Value], kwargs: &[(String, Value)]) -> Result<()> {
        let mut placeholders: Vec<String> = (0..args.len()).map(|i| format!(":p{i}")).collect();
        placeholders.extend(kwargs.iter().map(|(key, _)| format!("{key} => :{key}")));
        let block = format!("begin {name}({}); end;", placeholders.join(", "));

        let mut values: Vec<(String, Box<dyn ToSql>)> = args
            .iter()
            .enumerate()
            .map(|(i, value)| (format!("p{i}"), bind_value(value)))
            .collect();
        values.extend(kwargs.iter().map(|(key, value)| (key.clone(), bind_value(value))));
        let binds = Binds {
            values,
            positional: false,
        };

        self.conn.execute_named(&block, &binds.named()).map_err(db_error)?;
        Ok(())
    }
}
