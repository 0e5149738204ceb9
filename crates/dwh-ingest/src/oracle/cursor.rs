//! Database cursor abstraction and bind tracing

use crate::error::Result;
use dwh_common::{Row, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Bind parameters of a single statement
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    #[default]
    None,
    /// Bound to `:0`, `:1`, ... in order
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
}

impl Params {
    pub fn named<K: Into<String>, V: Into<Value>>(binds: impl IntoIterator<Item = (K, V)>) -> Self {
        Params::Named(binds.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Bind names with their values; positional binds are named by index
    pub fn entries(&self) -> Vec<(String, &Value)> {
        match self {
            Params::None => Vec::new(),
            Params::Positional(values) => values.iter().enumerate().map(|(i, v)| (i.to_string(), v)).collect(),
            Params::Named(binds) => binds.iter().map(|(k, v)| (k.clone(), v)).collect(),
        }
    }
}

/// Row-level error reported by an array insert with batch errors enabled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchError {
    /// Index of the failing row within the batch
    pub offset: usize,
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub row_count: u64,
    pub errors: Vec<BatchError>,
}

/// Statement execution on an open connection. Nothing is committed.
pub trait Cursor {
    /// Executes one statement and returns the number of affected rows
    fn execute(&mut self, sql: &str, params: &Params) -> Result<u64>;

    /// First row of a query, `None` when it returns no rows
    fn query_row(&mut self, sql: &str, params: &Params) -> Result<Option<Vec<Value>>>;

    /// Executes `sql` once per row, binding each row's columns by name. With
    /// `batch_errors` failing rows are reported instead of aborting the call.
    fn execute_many(&mut self, sql: &str, rows: &[Row], batch_errors: bool) -> Result<BatchOutcome>;

    /// Calls a stored procedure with positional and keyword arguments
    fn call_procedure(&mut self, name: &str, args: &[Value], kwargs: &[(String, Value)]) -> Result<()>;

    /// Maximum bind sizes for the next statement; empty clears them
    fn set_input_sizes(&mut self, _sizes: &BTreeMap<String, usize>) -> Result<()> {
        Ok(())
    }
}

impl<C: Cursor + ?Sized> Cursor for &mut C {
    fn execute(&mut self, sql: &str, params: &Params) -> Result<u64> {
        (**self).execute(sql, params)
    }

    fn query_row(&mut self, sql: &str, params: &Params) -> Result<Option<Vec<Value>>> {
        (**self).query_row(sql, params)
    }

    fn execute_many(&mut self, sql: &str, rows: &[Row], batch_errors: bool) -> Result<BatchOutcome> {
        (**self).execute_many(sql, rows, batch_errors)
    }

    fn call_procedure(&mut self, name: &str, args: &[Value], kwargs: &[(String, Value)]) -> Result<()> {
        (**self).call_procedure(name, args, kwargs)
    }

    fn set_input_sizes(&mut self, sizes: &BTreeMap<String, usize>) -> Result<()> {
        (**self).set_input_sizes(sizes)
    }
}

/// Cursor wrapper logging statements and bind variables
///
/// For each call the largest size seen per bind variable is computed and
/// handed to the inner cursor. Sizes never carry over between calls: they are
/// cleared before every call, and a call without rows clears them on the
/// inner cursor as well without executing anything.
#[derive(Debug)]
pub struct TracedCursor<C> {
    inner: C,
    bind_sizes: BTreeMap<String, usize>,
}

impl<C: Cursor> TracedCursor<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            bind_sizes: BTreeMap::new(),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    /// Bind sizes of the most recent call
    pub fn bind_sizes(&self) -> &BTreeMap<String, usize> {
        &self.bind_sizes
    }

    fn track<'a>(&mut self, binds: impl IntoIterator<Item = (String, &'a Value)>) {
        for (name, value) in binds {
            let size = self.bind_sizes.entry(name).or_insert(0);
            *size = (*size).max(value.bind_size());
        }
    }

    fn begin(&mut self, sql: &str) {
        self.bind_sizes.clear();
        debug!(sql, "Preparing statement");
    }

    fn apply_sizes(&mut self) -> Result<()> {
        debug!(binds = ?self.bind_sizes.keys().collect::<Vec<_>>(), sizes = ?self.bind_sizes.values().collect::<Vec<_>>(), "Bind variables");
        self.inner.set_input_sizes(&self.bind_sizes)
    }
}

impl<C: Cursor> Cursor for TracedCursor<C> {
    fn execute(&mut self, sql: &str, params: &Params) -> Result<u64> {
        self.begin(sql);
        self.track(params.entries());
        self.apply_sizes()?;
        let count = self.inner.execute(sql, params)?;
        debug!(rows = count, "Statement executed");
        Ok(count)
    }

    fn query_row(&mut self, sql: &str, params: &Params) -> Result<Option<Vec<Value>>> {
        self.begin(sql);
        self.track(params.entries());
        self.apply_sizes()?;
        self.inner.query_row(sql, params)
    }

    fn execute_many(&mut self, sql: &str, rows: &[Row], batch_errors: bool) -> Result<BatchOutcome> {
        self.begin(sql);
        if rows.is_empty() {
            debug!("No rows to bind, statement skipped");
            self.inner.set_input_sizes(&self.bind_sizes)?;
            return Ok(BatchOutcome::default());
        }
        for row in rows {
            self.track(row.iter().map(|(column, value)| (column.to_string(), value)));
        }
        self.apply_sizes()?;
        let outcome = self.inner.execute_many(sql, rows, batch_errors)?;
        debug!(rows = outcome.row_count, errors = outcome.errors.len(), "Batch executed");
        Ok(outcome)
    }

    fn call_procedure(&mut self, name: &str, args: &[Value], kwargs: &[(String, Value)]) -> Result<()> {
        self.begin(name);
        self.track(args.iter().enumerate().map(|(i, v)| (i.to_string(), v)));
        self.track(kwargs.iter().map(|(k, v)| (k.clone(), v)));
        self.apply_sizes()?;
        self.inner.call_procedure(name, args, kwargs)
    }

    fn set_input_sizes(&mut self, sizes: &BTreeMap<String, usize>) -> Result<()> {
        self.inner.set_input_sizes(sizes)
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::testing::{Call, FakeCursor};
    use super::*;

    fn sizes(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_bind_sizes_are_max_per_column() {
        let mut cursor = TracedCursor::new(FakeCursor::default());
        let rows = vec![
            Row::new().with("a", "xx").with("b", 1),
            Row::new().with("a", "xxxxx").with("b", 2),
        ];
        cursor.execute_many("insert", &rows, false).unwrap();
        assert_eq!(cursor.bind_sizes(), &sizes(&[("a", 5), ("b", 0)]));
    }

    #[test]
    fn test_sizes_do_not_leak_into_next_statement() {
        let mut cursor = TracedCursor::new(FakeCursor::default());
        let rows = vec![Row::new().with("long_text", "x".repeat(4000))];
        cursor.execute_many("insert", &rows, false).unwrap();
        cursor
            .execute("insert into etl_logg", &Params::Positional(vec![Value::from("t")]))
            .unwrap();

        let inner = cursor.into_inner();
        let applied: Vec<&BTreeMap<String, usize>> = inner
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::InputSizes(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[1], &sizes(&[("0", 1)]));
    }

    #[test]
    fn test_empty_batch_resets_sizes_without_executing() {
        let mut cursor = TracedCursor::new(FakeCursor::default());
        cursor
            .execute("update", &Params::named([("etl_date", "2024")]))
            .unwrap();
        let outcome = cursor.execute_many("insert", &[], true).unwrap();
        assert_eq!(outcome, BatchOutcome::default());
        assert!(cursor.bind_sizes().is_empty());

        let inner = cursor.into_inner();
        assert_eq!(inner.statements(), vec!["update"]);
        assert_eq!(inner.calls.last(), Some(&Call::InputSizes(BTreeMap::new())));
    }

    #[test]
    fn test_params_entries() {
        let positional = Params::Positional(vec![Value::Int(1), Value::Null]);
        let names: Vec<String> = positional.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["0", "1"]);
        assert!(Params::None.entries().is_empty());
    }
}
