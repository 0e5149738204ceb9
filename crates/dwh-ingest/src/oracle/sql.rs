//! SQL text builders

/// Insert of bind values selected from dual.
///
/// With `unique_columns` a row is skipped when the target already has a row
/// with the same values in those columns. `additional_where_clauses` are
/// appended with `and` and must not contain the `where` keyword.
pub fn build_insert_sql_string(
    schema: &str,
    table: &str,
    cols: &[&str],
    unique_columns: &[&str],
    additional_where_clauses: &[&str],
) -> String {
    let targ_cols = cols.join(", targ.");
    let bind_cols = cols.join(", :");
    let mut sql = format!("insert into {schema}.{table} targ (targ.{targ_cols}) select :{bind_cols} from dual src");

    let mut where_set = false;
    if !unique_columns.is_empty() {
        let conditions: Vec<String> = unique_columns.iter().map(|col| format!("t.{col} = :{col}")).collect();
        sql.push_str(&format!(
            " where not exists (select null from {schema}.{table} t where {})",
            conditions.join(" and ")
        ));
        where_set = true;
    }
    if !additional_where_clauses.is_empty() {
        sql.push_str(if where_set { " and " } else { " where " });
        sql.push_str(&additional_where_clauses.join(" and "));
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_with_unique_columns() {
        assert_eq!(
            build_insert_sql_string("a", "b", &["x", "y"], &["x", "y"], &[]),
            "insert into a.b targ (targ.x, targ.y) select :x, :y from dual src where not exists (select null from a.b t where t.x = :x and t.y = :y)"
        );
    }

    #[test]
    fn test_insert_with_unique_columns_and_clauses() {
        assert_eq!(
            build_insert_sql_string("a", "b", &["x", "y"], &["x", "y"], &["2 = 3", "5 = 4"]),
            "insert into a.b targ (targ.x, targ.y) select :x, :y from dual src where not exists (select null from a.b t where t.x = :x and t.y = :y) and 2 = 3 and 5 = 4"
        );
    }

    #[test]
    fn test_insert_with_clauses_only() {
        assert_eq!(
            build_insert_sql_string("a", "b", &["x", "y"], &[], &["2 = 3", "5 = 4"]),
            "insert into a.b targ (targ.x, targ.y) select :x, :y from dual src where 2 = 3 and 5 = 4"
        );
    }

    #[test]
    fn test_plain_insert() {
        assert_eq!(
            build_insert_sql_string("dvh", "t", &["id"], &[], &[]),
            "insert into dvh.t targ (targ.id) select :id from dual src"
        );
    }
}
