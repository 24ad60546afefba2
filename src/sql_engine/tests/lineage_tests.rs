//! Tests for resolving output columns back to base-table columns

use pretty_assertions::assert_eq;
use test_case::test_case;

use super::super::error::LineageError;
use super::super::lineage::extract_column_lineage;
use super::super::model::{SourceColumn, SourceKind, StatementLineage, TableInfo};
use crate::config::{LineageConfig, TableConfig};

fn analyze(sql: &str) -> StatementLineage {
    analyze_with(sql, &LineageConfig::default())
}

fn analyze_with(sql: &str, config: &LineageConfig) -> StatementLineage {
    extract_column_lineage(sql, config)
        .expect("test SQL should parse")
        .remove(0)
}

fn table(name: &str) -> TableInfo {
    match name.split_once('.') {
        Some((db, t)) => TableInfo::new(Some(db.to_string()), t),
        None => TableInfo::new(None, name),
    }
}

/// Sources of `field` rendered as `table.column`
fn sources(result: &StatementLineage, field: &str) -> Vec<String> {
    result
        .target(field)
        .unwrap_or_else(|| panic!("no lineage for {}", field))
        .sources
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[test]
fn test_single_table_sources() {
    let result = analyze("SELECT a, b, a + b AS c FROM db.t");
    assert!(result.is_ok());
    assert_eq!(sources(&result, "a"), vec!["db.t.a"]);
    assert_eq!(sources(&result, "b"), vec!["db.t.b"]);
    assert_eq!(sources(&result, "c"), vec!["db.t.a", "db.t.b"]);
}

#[test]
fn test_insert_pairs_columns_by_position() {
    let result = analyze("INSERT INTO t (a, b) SELECT x, y FROM s");
    assert!(result.is_ok());
    assert_eq!(result.target_table, Some(table("t")));

    let pairs: Vec<(String, Vec<String>)> = result
        .lineage
        .iter()
        .map(|l| {
            (
                l.target.to_string(),
                l.sources.iter().map(|s| s.to_string()).collect(),
            )
        })
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("t.a".to_string(), vec!["s.x".to_string()]),
            ("t.b".to_string(), vec!["s.y".to_string()]),
        ]
    );
}

#[test]
fn test_end_to_end_insert_through_derived_tables() {
    let result = analyze(
        "INSERT INTO db.r (id, name) SELECT t1.id, t2.name \
         FROM (SELECT id1 + id2 AS id FROM db.t1) t1 \
         LEFT JOIN (SELECT id, sourcename AS name FROM db.t2) t2 ON t1.id = t2.id",
    );
    assert!(result.is_ok());
    assert_eq!(sources(&result, "id"), vec!["db.t1.id1", "db.t1.id2"]);
    assert_eq!(sources(&result, "name"), vec!["db.t2.sourcename"]);
    assert_eq!(result.target("name").unwrap().target.to_string(), "db.r.name");
}

#[test]
fn test_unaliased_inner_derived_table() {
    let result = analyze(
        "INSERT INTO TABLE db_test.table_result (id, name) SELECT t1.id, t2.name \
         FROM (SELECT id1 + id2 AS id FROM db_test.table1) t1 \
         LEFT JOIN (SELECT id, name FROM (SELECT id, sourcename AS name FROM db_test.table2)) t2 \
         ON t1.id = t2.id",
    );
    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(
        sources(&result, "id"),
        vec!["db_test.table1.id1", "db_test.table1.id2"]
    );
    assert_eq!(sources(&result, "name"), vec!["db_test.table2.sourcename"]);
}

#[test_case("SELECT a, b FROM db.t" ; "plain")]
#[test_case("SELECT * FROM (SELECT a, b FROM db.t) AS w" ; "wrapped once")]
#[test_case("SELECT * FROM (SELECT * FROM (SELECT a, b FROM db.t) AS v) AS w" ; "wrapped twice")]
#[test_case("SELECT w.a, w.b FROM (SELECT a, b FROM db.t) AS w" ; "qualified through wrapper")]
fn test_nesting_transparency(sql: &str) {
    let result = analyze(sql);
    assert_eq!(sources(&result, "a"), vec!["db.t.a"]);
    assert_eq!(sources(&result, "b"), vec!["db.t.b"]);
}

#[test_case("SELECT a FROM t", "a" ; "bare column")]
#[test_case("SELECT a AS b FROM t", "b" ; "aliased column")]
#[test_case("SELECT x.a AS b FROM t x", "b" ; "aliased table")]
fn test_alias_transparency(sql: &str, field: &str) {
    assert_eq!(sources(&analyze(sql), field), vec!["t.a"]);
}

#[test]
fn test_join_fan_in() {
    let result = analyze("SELECT f(t1.x, t2.y) AS z FROM t1 JOIN t2 ON t1.k = t2.k");
    assert_eq!(sources(&result, "z"), vec!["t1.x", "t2.y"]);
}

#[test]
fn test_cte_resolves_through_body() {
    let result = analyze(
        "WITH base AS (SELECT id, amount * 2 AS doubled FROM db.orders) \
         SELECT b.id, doubled FROM base b",
    );
    assert_eq!(sources(&result, "id"), vec!["db.orders.id"]);
    assert_eq!(sources(&result, "doubled"), vec!["db.orders.amount"]);
}

#[test]
fn test_union_fans_in_from_every_operand() {
    let result = analyze("SELECT a FROM t1 UNION ALL SELECT b FROM t2 UNION SELECT c FROM t3");
    assert_eq!(result.lineage.len(), 1);
    assert_eq!(sources(&result, "a"), vec!["t1.a", "t2.b", "t3.c"]);
}

#[test]
fn test_literal_source() {
    let result = analyze("SELECT 1 AS one");
    let one = result.target("one").unwrap();
    assert_eq!(
        one.sources.iter().cloned().collect::<Vec<_>>(),
        vec![SourceColumn::other(None, "one", SourceKind::Literal)]
    );
    assert_eq!(one.column_sources().count(), 0);
}

#[test]
fn test_scalar_subquery_sources() {
    let result = analyze("SELECT id, (SELECT max(amount) FROM db.orders) AS top FROM db.users");
    assert_eq!(sources(&result, "top"), vec!["db.orders.amount"]);
}

#[test]
fn test_where_subquery_does_not_leak_into_outputs() {
    let result = analyze("SELECT a FROM t WHERE a IN (SELECT b FROM u) AND EXISTS (SELECT c FROM v)");
    assert_eq!(result.lineage.len(), 1);
    assert_eq!(sources(&result, "a"), vec!["t.a"]);
}

#[test]
fn test_catalog_expands_wildcard() {
    let config = LineageConfig {
        tables: vec![TableConfig {
            database: Some("db".to_string()),
            name: "users".to_string(),
            columns: vec!["id".to_string(), "email".to_string()],
        }],
        ..LineageConfig::default()
    };
    let result = analyze_with("INSERT INTO db.copy SELECT * FROM db.users", &config);

    assert!(result.warnings.is_empty());
    let targets: Vec<_> = result.lineage.iter().map(|l| l.target.to_string()).collect();
    assert_eq!(targets, vec!["db.copy.id", "db.copy.email"]);
    assert_eq!(sources(&result, "email"), vec!["db.users.email"]);
}

#[test]
fn test_unknown_wildcard_is_marked() {
    let result = analyze("SELECT * FROM db.users");
    assert_eq!(
        result.warnings,
        vec![LineageError::UnresolvedWildcard("db.users.*".to_string())]
    );
    let star = result.target("*").unwrap();
    assert_eq!(
        star.sources.iter().next().unwrap(),
        &SourceColumn::other(Some(table("db.users")), "*", SourceKind::UnresolvedWildcard)
    );
}

#[test]
fn test_named_column_through_unexpanded_wildcard() {
    let result = analyze("SELECT w.a FROM (SELECT * FROM db.t) w");
    assert_eq!(sources(&result, "a"), vec!["db.t.a"]);
}

#[test]
fn test_ambiguous_reference_is_reported() {
    let result = analyze("SELECT id FROM a JOIN b ON a.id = b.id");
    assert_eq!(
        result.warnings,
        vec![LineageError::AmbiguousReference {
            column: "id".to_string(),
            candidates: vec!["a".to_string(), "b".to_string()],
        }]
    );
    let id = result.target("id").unwrap();
    assert!(id.sources.iter().all(|s| s.kind == SourceKind::Ambiguous));
}

#[test]
fn test_using_column_fans_in_from_both_sides() {
    let result = analyze("SELECT id, a.x + id AS y FROM a JOIN b USING (id)");
    assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    assert_eq!(sources(&result, "id"), vec!["a.id", "b.id"]);
    assert!(sources(&result, "y").contains(&"b.id".to_string()));
}

#[test]
fn test_using_column_ignores_tables_joined_later() {
    let result = analyze("SELECT id FROM a JOIN b USING (id) JOIN c ON c.k = a.k");
    assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    assert_eq!(sources(&result, "id"), vec!["a.id", "b.id"]);
}

#[test]
fn test_catalog_settles_unqualified_join_column() {
    let config = LineageConfig {
        tables: vec![
            TableConfig {
                database: None,
                name: "a".to_string(),
                columns: vec!["id".to_string()],
            },
            TableConfig {
                database: None,
                name: "b".to_string(),
                columns: vec!["id".to_string(), "total".to_string()],
            },
        ],
        ..LineageConfig::default()
    };
    let result = analyze_with("SELECT total FROM a JOIN b ON a.id = b.id", &config);
    assert!(result.warnings.is_empty());
    assert_eq!(sources(&result, "total"), vec!["b.total"]);
}

#[test]
fn test_positional_mismatch_keeps_partial_lineage() {
    let result = analyze("INSERT INTO t (a, b, c) SELECT x, y FROM s");
    assert_eq!(
        result.error,
        Some(LineageError::PositionalMismatch {
            targets: 3,
            outputs: 2
        })
    );
    assert_eq!(sources(&result, "x"), vec!["s.x"]);
    assert_eq!(result.target_table, Some(table("t")));
    assert!(result.lineage.iter().all(|l| l.target.table.is_none()));
    assert_eq!(result.lineage[1].target.to_string(), "y");
}

#[test]
fn test_unbound_column_is_unresolved() {
    let result = analyze("SELECT z.a FROM t");
    let a = result.target("a").unwrap();
    assert_eq!(
        a.sources.iter().cloned().collect::<Vec<_>>(),
        vec![SourceColumn::other(Some(table("z")), "a", SourceKind::Unresolved)]
    );
}

#[test]
fn test_unbound_qualified_wildcard_names_no_table() {
    let result = analyze("SELECT w.a FROM (SELECT z.* FROM t) w");
    let a = result.target("a").unwrap();
    assert_eq!(
        a.sources.iter().cloned().collect::<Vec<_>>(),
        vec![SourceColumn::other(None, "a", SourceKind::Unresolved)]
    );
    assert_eq!(
        result.warnings,
        vec![LineageError::UnresolvedWildcard("z.*".to_string())]
    );

    let star = analyze("SELECT z.* FROM t");
    assert_eq!(
        star.lineage[0].sources.iter().cloned().collect::<Vec<_>>(),
        vec![SourceColumn::other(None, "*", SourceKind::UnresolvedWildcard)]
    );
}

#[test]
fn test_insert_into_table_function_is_malformed() {
    let config = LineageConfig {
        dialect: "clickhouse".to_string(),
        ..LineageConfig::default()
    };
    let results = extract_column_lineage(
        "INSERT INTO FUNCTION remote('h', db.t) SELECT a FROM s; SELECT b FROM u",
        &config,
    )
    .unwrap();

    assert_eq!(results.len(), 2);
    assert!(matches!(
        results[0].error,
        Some(LineageError::MalformedAst(_))
    ));
    assert!(results[0].lineage.is_empty());
    assert!(results[1].is_ok());
    assert_eq!(sources(&results[1], "b"), vec!["u.b"]);
}

#[test]
fn test_shared_subqueries_resolve_once() {
    let mut sql = "SELECT x FROM t".to_string();
    for _ in 0..16 {
        sql = format!(
            "SELECT a + b + c + d AS x FROM (SELECT x AS a, x AS b, x AS c, x AS d FROM ({}) s1) s2",
            sql
        );
    }
    let result = analyze(&sql);
    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(sources(&result, "x"), vec!["t.x"]);
}

#[test]
fn test_batch_continues_after_failing_statement() {
    let results = extract_column_lineage(
        "DROP TABLE x; INSERT INTO t (a) SELECT a, b FROM s; SELECT c FROM u",
        &LineageConfig::default(),
    )
    .unwrap();

    assert_eq!(results.len(), 3);
    assert!(matches!(
        results[0].error,
        Some(LineageError::UnsupportedStatement(_))
    ));
    assert!(matches!(
        results[1].error,
        Some(LineageError::PositionalMismatch { .. })
    ));
    assert!(results[2].is_ok());
    assert_eq!(results[2].statement_index, 2);
    assert_eq!(sources(&results[2], "c"), vec!["u.c"]);
}

#[test]
fn test_resolution_is_deterministic() {
    let sql = "SELECT f(b.y, a.x) AS z, a.x FROM a JOIN (SELECT y FROM c UNION SELECT y FROM d) b ON true";
    let first = serde_json::to_string(&analyze(sql)).unwrap();
    let second = serde_json::to_string(&analyze(sql)).unwrap();
    assert_eq!(first, second);
    assert!(first.contains(r#"{"table":"a","field":"x"}"#));
}

#[test]
fn test_json_shape() {
    let result = analyze("INSERT INTO db.t (f) SELECT g FROM db.s");
    let json = serde_json::to_value(&result.lineage).unwrap();
    assert_eq!(
        json,
        serde_json::json!([
            {"target": {"table": "db.t", "field": "f"}, "sources": [{"table": "db.s", "field": "g"}]}
        ])
    );
}
