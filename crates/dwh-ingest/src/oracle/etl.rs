//! Table maintenance helpers used by the load jobs
//!
//! All functions work on any [`Cursor`] and never commit.

use crate::error::{IngestError, Result};
use crate::oracle::cursor::{BatchError, Cursor, Params};
use crate::oracle::sql::build_insert_sql_string;
use chrono::{Duration, Local, NaiveDateTime};
use dwh_common::{Row, Value};
use tracing::info;

/// Wall-clock time as stored in the load tables
pub fn today() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Counters written to the etl log table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EtlLogEntry {
    pub rows_inserted: Option<i64>,
    pub rows_updated: Option<i64>,
    pub rows_deleted: Option<i64>,
    pub log_text: Option<String>,
}

/// Inserts a row into `{schema}.etl_logg`
pub fn log_etl<C: Cursor + ?Sized>(
    cur: &mut C,
    schema: &str,
    table: &str,
    etl_date: NaiveDateTime,
    entry: &EtlLogEntry,
) -> Result<()> {
    let sql = format!("insert into {schema}.etl_logg select :0,:1,:2,:3,:4,:5 from dual");
    let params = Params::Positional(vec![
        Value::from(table),
        Value::from(etl_date),
        Value::from(entry.rows_inserted),
        Value::from(entry.rows_updated),
        Value::from(entry.rows_deleted),
        Value::from(entry.log_text.clone()),
    ]);
    cur.execute(&sql, &params)?;
    info!(schema, table, "Logged etl");
    Ok(())
}

pub fn get_table_row_count<C: Cursor + ?Sized>(cur: &mut C, schema: &str, table: &str) -> Result<i64> {
    let sql = format!("select count(*) from {schema}.{table}");
    cur.query_row(&sql, &Params::None)?
        .and_then(|row| row.first().and_then(Value::as_i64))
        .ok_or_else(|| IngestError::database(format!("count of {schema}.{table} returned no value")))
}

pub fn is_table_empty<C: Cursor + ?Sized>(cur: &mut C, schema: &str, table: &str) -> Result<bool> {
    Ok(get_table_row_count(cur, schema, table)? == 0)
}

/// Staleness limits for [`is_table_stale`]
#[derive(Debug, Clone)]
pub struct StaleTableCheck {
    pub max_hours_behind_today: i64,
    pub insert_date_column: String,
}

impl Default for StaleTableCheck {
    fn default() -> Self {
        Self {
            max_hours_behind_today: 72,
            insert_date_column: "lastet_dato".to_string(),
        }
    }
}

/// True when the newest insert date is too old, or the table has none
pub fn is_table_stale<C: Cursor + ?Sized>(
    cur: &mut C,
    schema: &str,
    table: &str,
    check: &StaleTableCheck,
) -> Result<bool> {
    let sql = format!("select max({}) from {schema}.{table}", check.insert_date_column);
    let insert_date = cur
        .query_row(&sql, &Params::None)?
        .and_then(|row| row.first().and_then(Value::as_timestamp));
    Ok(match insert_date {
        None => true,
        Some(date) => today() - date >= Duration::hours(check.max_hours_behind_today),
    })
}

const WORKFLOW_SQL: &str = "
with t as (
    select
        c.workflow_id workflow_id
        , trunc(c.end_time) updated
        , decode(c.run_err_code, 0, 1, 0) succeeded
        , row_number() over(partition by c.workflow_id order by c.end_time desc) rn
    from
        osddm_report_repos.mx_rep_targ_tbls a
    left join
        osddm_report_repos.mx_rep_sess_tbl_log b
        on a.table_id = b.table_id
    left join
        osddm_report_repos.mx_rep_wflow_run c
        on b.workflow_id = c.workflow_id
    where
        a.table_name = upper(:table_name)
)
select * from t where t.rn = 1
";

/// Checks the latest repository run of the workflow loading `table_name`.
///
/// A failed run is reported as not stale; otherwise the run is stale when
/// its date is at least `max_hours_behind_today` behind today's date.
pub fn is_workflow_stale<C: Cursor + ?Sized>(cur: &mut C, table_name: &str, max_hours_behind_today: i64) -> Result<bool> {
    let row = cur.query_row(WORKFLOW_SQL, &Params::named([("table_name", table_name)]))?;
    let (updated, succeeded) = row
        .and_then(|row| {
            let updated = row.get(1).and_then(Value::as_timestamp)?;
            let succeeded = row.get(2).and_then(Value::as_i64)? != 0;
            Some((updated, succeeded))
        })
        .ok_or_else(|| IngestError::WorkflowNotFound(table_name.to_string()))?;
    if !succeeded {
        return Ok(false);
    }
    let age = today().date() - updated.date();
    Ok(age >= Duration::hours(max_hours_behind_today))
}

/// Calls `{schema}.{package}.{procedure}`
pub fn execute_stored_procedure<C: Cursor + ?Sized>(
    cur: &mut C,
    schema: &str,
    package: &str,
    procedure: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> Result<()> {
    let name = [schema, package, procedure].join(".");
    cur.call_procedure(&name, args, kwargs)
}

#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Bind the current time to `etl_date_bind_name`
    pub bind_today_to_etl_date: bool,
    /// Some names, like `date`, are reserved and cannot be bound
    pub etl_date_bind_name: String,
    pub enable_etl_logging: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            bind_today_to_etl_date: true,
            etl_date_bind_name: "etl_date".to_string(),
            enable_etl_logging: true,
        }
    }
}

/// Runs `update_sql` against `table`; returns `(rows_inserted, rows_updated)`.
///
/// Inserted and deleted rows are derived from the change in row count, the
/// rest of the affected rows are counted as updated.
pub fn update_table_from_sql<C: Cursor + ?Sized>(
    cur: &mut C,
    schema: &str,
    table: &str,
    update_sql: &str,
    options: &UpdateOptions,
) -> Result<(i64, i64)> {
    let now = today();
    let rows_before = get_table_row_count(cur, schema, table)?;
    let params = if options.bind_today_to_etl_date {
        Params::named([(options.etl_date_bind_name.as_str(), now)])
    } else {
        Params::None
    };
    let rows_affected = i64::try_from(cur.execute(update_sql, &params)?)
        .map_err(|e| IngestError::database(format!("row count out of range: {e}")))?;
    let rows_after = get_table_row_count(cur, schema, table)?;

    let difference = rows_after - rows_before;
    let (rows_inserted, rows_deleted) = if difference < 0 { (0, -difference) } else { (difference, 0) };
    let rows_updated = rows_affected - rows_inserted;
    info!(schema, table, rows_inserted, rows_updated, rows_deleted, "Updated table");

    if options.enable_etl_logging {
        let entry = EtlLogEntry {
            rows_inserted: Some(rows_inserted),
            rows_updated: Some(rows_updated),
            rows_deleted: Some(rows_deleted),
            log_text: None,
        };
        log_etl(cur, schema, table, now, &entry)?;
    }
    Ok((rows_inserted, rows_updated))
}

#[derive(Debug, Clone)]
pub struct InsertOptions {
    /// Skip rows whose values in these columns already exist in the table
    pub unique_columns: Vec<String>,
    /// Extra conditions, without the `where` keyword
    pub additional_where_clauses: Vec<String>,
    /// Write an etl log row after the last batch
    pub enable_etl_logging: bool,
    /// Report failing rows per batch instead of failing the insert
    pub continue_on_db_errors: bool,
}

impl Default for InsertOptions {
    fn default() -> Self {
        Self {
            unique_columns: Vec::new(),
            additional_where_clauses: Vec::new(),
            enable_etl_logging: true,
            continue_on_db_errors: false,
        }
    }
}

/// Iterator inserting one batch per step, see [`create_table_insert_generator`]
pub struct TableInserter<'c, C: ?Sized, I> {
    cur: &'c mut C,
    schema: String,
    table: String,
    batches: I,
    options: InsertOptions,
    insert_sql: Option<String>,
    rows_inserted: u64,
    finished: bool,
}

impl<C: Cursor + ?Sized, I: Iterator<Item = Vec<Row>>> TableInserter<'_, C, I> {
    /// Rows inserted by the batches so far
    pub fn rows_inserted(&self) -> u64 {
        self.rows_inserted
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        if self.options.enable_etl_logging {
            let entry = EtlLogEntry {
                rows_inserted: Some(i64::try_from(self.rows_inserted).unwrap_or(i64::MAX)),
                ..EtlLogEntry::default()
            };
            log_etl(&mut *self.cur, &self.schema, &self.table, today(), &entry)?;
        }
        Ok(())
    }
}

impl<C: Cursor + ?Sized, I: Iterator<Item = Vec<Row>>> Iterator for TableInserter<'_, C, I> {
    type Item = Result<(u64, Vec<BatchError>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            let Some(batch) = self.batches.next() else {
                return self.finish().err().map(Err);
            };
            let Some(first) = batch.first() else {
                continue;
            };
            let sql = self.insert_sql.get_or_insert_with(|| {
                let cols: Vec<&str> = first.columns().collect();
                let unique: Vec<&str> = self.options.unique_columns.iter().map(String::as_str).collect();
                let clauses: Vec<&str> = self.options.additional_where_clauses.iter().map(String::as_str).collect();
                build_insert_sql_string(&self.schema, &self.table, &cols, &unique, &clauses)
            });
            return match self.cur.execute_many(sql, &batch, self.options.continue_on_db_errors) {
                Ok(outcome) => {
                    self.rows_inserted += outcome.row_count;
                    Some(Ok((outcome.row_count, outcome.errors)))
                },
                Err(e) => {
                    self.finished = true;
                    Some(Err(e))
                },
            };
        }
    }
}

/// Inserts batches lazily, yielding `(rows_inserted, batch_errors)` for each
/// non-empty batch. The statement is built from the columns of the first
/// row. Batch errors are only collected with `continue_on_db_errors`.
pub fn create_table_insert_generator<'a, C, I>(
    cur: &'a mut C,
    schema: &str,
    table: &str,
    batches: I,
    options: InsertOptions,
) -> TableInserter<'a, C, I::IntoIter>
where
    C: Cursor + ?Sized,
    I: IntoIterator<Item = Vec<Row>>,
{
    TableInserter {
        cur,
        schema: schema.to_string(),
        table: table.to_string(),
        batches: batches.into_iter(),
        options,
        insert_sql: None,
        rows_inserted: 0,
        finished: false,
    }
}

/// Inserts all batches and returns the number of rows inserted
pub fn insert_to_table<C, I>(cur: &mut C, schema: &str, table: &str, batches: I, options: InsertOptions) -> Result<u64>
where
    C: Cursor + ?Sized,
    I: IntoIterator<Item = Vec<Row>>,
{
    let mut inserter = create_table_insert_generator(cur, schema, table, batches, options);
    for step in inserter.by_ref() {
        step?;
    }
    Ok(inserter.rows_inserted())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::oracle::cursor::testing::{Call, FakeCursor};
    use crate::oracle::cursor::{BatchOutcome, TracedCursor};

    fn rows(ids: &[i64]) -> Vec<Row> {
        ids.iter().map(|id| Row::new().with("id", *id).with("navn", "x")).collect()
    }

    #[test]
    fn test_log_etl_binds_positionally() {
        let mut cur = FakeCursor::default();
        let date = NaiveDateTime::parse_from_str("2024-01-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let entry = EtlLogEntry {
            rows_inserted: Some(3),
            ..EtlLogEntry::default()
        };
        log_etl(&mut cur, "dvh", "tabell", date, &entry).unwrap();
        assert_eq!(
            cur.calls,
            vec![Call::Execute(
                "insert into dvh.etl_logg select :0,:1,:2,:3,:4,:5 from dual".into(),
                Params::Positional(vec![
                    Value::from("tabell"),
                    Value::Timestamp(date),
                    Value::Int(3),
                    Value::Null,
                    Value::Null,
                    Value::Null,
                ])
            )]
        );
    }

    #[test]
    fn test_row_count_and_empty() {
        let mut cur = FakeCursor::with_query_results([Some(vec![Value::Int(0)]), Some(vec![Value::Int(7)])]);
        assert!(is_table_empty(&mut cur, "s", "t").unwrap());
        assert_eq!(get_table_row_count(&mut cur, "s", "t").unwrap(), 7);
        assert_eq!(cur.statements(), vec!["select count(*) from s.t"; 2]);
    }

    #[test]
    fn test_missing_count_is_an_error() {
        let mut cur = FakeCursor::with_query_results([None]);
        assert!(get_table_row_count(&mut cur, "s", "t").is_err());
    }

    #[test]
    fn test_table_staleness() {
        let check = StaleTableCheck::default();
        let mut cur = FakeCursor::with_query_results([
            Some(vec![Value::Null]),
            Some(vec![Value::Timestamp(today() - Duration::hours(100))]),
            Some(vec![Value::Timestamp(today() - Duration::hours(1))]),
        ]);
        assert!(is_table_stale(&mut cur, "s", "t", &check).unwrap());
        assert!(is_table_stale(&mut cur, "s", "t", &check).unwrap());
        assert!(!is_table_stale(&mut cur, "s", "t", &check).unwrap());
        assert_eq!(cur.statements()[0], "select max(lastet_dato) from s.t");
    }

    #[test]
    fn test_workflow_staleness() {
        let old = today() - Duration::days(3);
        let mut cur = FakeCursor::with_query_results([
            Some(vec![Value::Int(1), Value::Timestamp(old), Value::Int(1), Value::Int(1)]),
            Some(vec![Value::Int(1), Value::Timestamp(old), Value::Int(0), Value::Int(1)]),
            Some(vec![Value::Int(1), Value::Timestamp(today()), Value::Int(1), Value::Int(1)]),
            None,
        ]);
        assert!(is_workflow_stale(&mut cur, "tabell", 24).unwrap());
        assert!(!is_workflow_stale(&mut cur, "tabell", 24).unwrap());
        assert!(!is_workflow_stale(&mut cur, "tabell", 24).unwrap());
        assert!(matches!(
            is_workflow_stale(&mut cur, "tabell", 24),
            Err(IngestError::WorkflowNotFound(_))
        ));
    }

    #[test]
    fn test_stored_procedure_name() {
        let mut cur = FakeCursor::default();
        execute_stored_procedure(&mut cur, "dvh", "pkg", "last", &[Value::Int(1)], &[]).unwrap();
        assert_eq!(cur.statements(), vec!["dvh.pkg.last"]);
    }

    #[test]
    fn test_update_counts_inserted_and_updated() {
        let mut cur = FakeCursor::with_query_results([Some(vec![Value::Int(10)]), Some(vec![Value::Int(12)])]);
        cur.execute_counts.push_back(5);
        let (inserted, updated) =
            update_table_from_sql(&mut cur, "s", "t", "merge into s.t ...", &UpdateOptions::default()).unwrap();
        assert_eq!((inserted, updated), (2, 3));

        match &cur.calls[1] {
            Call::Execute(sql, Params::Named(binds)) => {
                assert_eq!(sql, "merge into s.t ...");
                assert_eq!(binds[0].0, "etl_date");
            },
            other => panic!("unexpected call {other:?}"),
        }
        assert_eq!(cur.statements().last(), Some(&"insert into s.etl_logg select :0,:1,:2,:3,:4,:5 from dual"));
    }

    #[test]
    fn test_update_counts_deleted() {
        let mut cur = FakeCursor::with_query_results([Some(vec![Value::Int(10)]), Some(vec![Value::Int(6)])]);
        cur.execute_counts.push_back(4);
        let options = UpdateOptions {
            bind_today_to_etl_date: false,
            enable_etl_logging: false,
            ..UpdateOptions::default()
        };
        assert_eq!(update_table_from_sql(&mut cur, "s", "t", "delete", &options).unwrap(), (0, 4));
        assert_eq!(cur.calls[1], Call::Execute("delete".into(), Params::None));
        assert_eq!(cur.calls.len(), 3);
    }

    #[test]
    fn test_generator_skips_empty_batches_and_logs_at_end() {
        let mut cur = FakeCursor::default();
        let options = InsertOptions {
            unique_columns: vec!["id".into()],
            ..InsertOptions::default()
        };
        let steps: Vec<_> = create_table_insert_generator(
            &mut cur,
            "s",
            "t",
            vec![rows(&[1, 2]), vec![], rows(&[3])],
            options,
        )
        .collect::<Result<_>>()
        .unwrap();
        assert_eq!(steps, vec![(2, vec![]), (1, vec![])]);

        let statements = cur.statements();
        assert_eq!(statements.len(), 3);
        assert_eq!(
            statements[0],
            "insert into s.t targ (targ.id, targ.navn) select :id, :navn from dual src where not exists (select null from s.t t where t.id = :id)"
        );
        assert!(statements[2].starts_with("insert into s.etl_logg"));
    }

    #[test]
    fn test_generator_reports_batch_errors() {
        let mut cur = FakeCursor::default();
        cur.batch_outcomes.push_back(BatchOutcome {
            row_count: 1,
            errors: vec![BatchError {
                offset: 1,
                code: 1,
                message: "ORA-00001: unique constraint violated".into(),
            }],
        });
        let options = InsertOptions {
            enable_etl_logging: false,
            continue_on_db_errors: true,
            ..InsertOptions::default()
        };
        let mut inserter = create_table_insert_generator(&mut cur, "s", "t", [rows(&[1, 1])], options);
        let (count, errors) = inserter.next().unwrap().unwrap();
        assert_eq!(count, 1);
        assert_eq!(errors[0].offset, 1);
        assert!(inserter.next().is_none());
        drop(inserter);
        assert!(matches!(&cur.calls[0], Call::ExecuteMany(_, _, true)));
    }

    #[test]
    fn test_insert_to_table_through_traced_cursor() {
        let mut cur = TracedCursor::new(FakeCursor::default());
        let inserted = insert_to_table(&mut cur, "s", "t", [rows(&[1, 2, 3])], InsertOptions::default()).unwrap();
        assert_eq!(inserted, 3);
        // the log statement only sees its own binds
        assert_eq!(cur.bind_sizes().len(), 6);
        assert!(!cur.bind_sizes().contains_key("navn"));
    }

    #[test]
    fn test_nothing_to_insert() {
        let mut cur = FakeCursor::default();
        let options = InsertOptions {
            enable_etl_logging: false,
            ..InsertOptions::default()
        };
        assert_eq!(insert_to_table(&mut cur, "s", "t", Vec::<Vec<Row>>::new(), options).unwrap(), 0);
        assert!(cur.calls.is_empty());
    }
}
