//! Property tests for the sanitizer, validator and shaper.

use proptest::prelude::*;
use tabletalk::query::{sanitize, shape};
use tabletalk::safety::{QueryValidator, RejectReason};
use tabletalk::store::{quote_ident, ColumnInfo, QueryResult, StoreBackend, TableName, Value};

const TABLE: &str = "data_abc123";

fn table() -> TableName {
    TableName::parse(TABLE).unwrap()
}

fn backend() -> impl Strategy<Value = StoreBackend> {
    prop_oneof![Just(StoreBackend::Sqlite), Just(StoreBackend::Postgres)]
}

/// Declared column names, all starting with `c_` and distinct.
fn declared_columns() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("c_[a-z]{1,6}", 1..6)
        .prop_map(|set| set.into_iter().collect())
}

proptest! {
    #[test]
    fn sanitize_is_idempotent(raw in ".{0,80}") {
        let once = sanitize(&raw);
        prop_assert_eq!(sanitize(&once), once);
    }

    #[test]
    fn sanitize_unwraps_any_fenced_query(body in "SELECT [a-z]{1,8} FROM [a-z]{1,8}", tag in "(sql|postgresql)?") {
        let raw = format!("Sure!\n```{tag}\n{body}\n```\nDone.");
        prop_assert_eq!(sanitize(&raw), body);
    }

    #[test]
    fn foreign_tables_are_rejected(backend in backend(), other in "[a-z_][a-z0-9_]{0,12}") {
        prop_assume!(other != TABLE);
        let candidate = format!("SELECT * FROM {}", quote_ident(&other));
        let result = QueryValidator::new(backend).validate(&candidate, &table(), &["a".to_string()]);
        prop_assert!(matches!(result, Err(RejectReason::ForeignTable(_))), "{:?}", result);
    }

    #[test]
    fn foreign_tables_in_joins_are_rejected(backend in backend(), other in "[a-z][a-z0-9]{0,8}_t") {
        let candidate = format!(
            "SELECT \"a\" FROM \"{TABLE}\" JOIN {} ON 1 = 1",
            quote_ident(&other)
        );
        let result = QueryValidator::new(backend).validate(&candidate, &table(), &["a".to_string()]);
        prop_assert!(matches!(result, Err(RejectReason::ForeignTable(_))));
    }

    #[test]
    fn declared_columns_are_accepted(backend in backend(), columns in declared_columns()) {
        let projection = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
        let candidate = format!("SELECT {projection} FROM \"{TABLE}\"");
        let validated = QueryValidator::new(backend).validate(&candidate, &table(), &columns);
        prop_assert!(validated.is_ok(), "{:?}", validated);
    }

    #[test]
    fn undeclared_columns_are_rejected(
        backend in backend(),
        columns in declared_columns(),
        stray in "zz_[a-z]{1,6}",
    ) {
        let candidate = format!(
            "SELECT {}, {} FROM \"{TABLE}\"",
            quote_ident(&columns[0]),
            quote_ident(&stray)
        );
        let result = QueryValidator::new(backend).validate(&candidate, &table(), &columns);
        prop_assert_eq!(result.err(), Some(RejectReason::UnknownColumn(stray)));
    }

    #[test]
    fn unlisted_functions_cannot_reach_other_tables(
        backend in backend(),
        function in prop_oneof![
            Just("query_to_xml".to_string()),
            Just("pg_read_file".to_string()),
            Just("dblink".to_string()),
            Just("load_extension".to_string()),
            "zz_[a-z]{1,8}",
            "pg_catalog\\.pg_[a-z]{1,8}",
        ],
        wrap_in_where in any::<bool>(),
    ) {
        let call = format!("{function}('SELECT * FROM datasets')");
        let candidate = if wrap_in_where {
            format!("SELECT \"a\" FROM \"{TABLE}\" WHERE \"a\" = {call}")
        } else {
            format!("SELECT {call} FROM \"{TABLE}\"")
        };
        let result = QueryValidator::new(backend).validate(&candidate, &table(), &["a".to_string()]);
        prop_assert!(matches!(result, Err(RejectReason::ForbiddenFunction(_))), "{:?}", result);
    }

    #[test]
    fn self_aliases_never_admit_undeclared_columns(
        backend in backend(),
        columns in declared_columns(),
        stray in prop_oneof!["zz_[a-z]{1,6}", Just("rowid".to_string()), Just("ctid".to_string())],
    ) {
        let candidate = format!(
            "SELECT {}, {stray} AS {stray} FROM \"{TABLE}\"",
            quote_ident(&columns[0])
        );
        let result = QueryValidator::new(backend).validate(&candidate, &table(), &columns);
        prop_assert!(matches!(result, Err(RejectReason::UnknownColumn(_))), "{:?}", result);
    }

    #[test]
    fn numeric_only_results_have_no_chart(values in prop::collection::vec(any::<i64>(), 1..20)) {
        let rows = values.iter().map(|v| vec![Value::Int(*v), Value::Float(*v as f64)]).collect();
        let result = QueryResult::with_data(
            vec![ColumnInfo::new("n", "INTEGER"), ColumnInfo::new("f", "REAL")],
            rows,
        );
        let shaped = shape(&result);
        prop_assert_eq!(shaped.chart, None);
        prop_assert_eq!(shaped.summary, format!("The result contains {} records.", values.len()));
    }

    #[test]
    fn empty_results_are_always_no_data(names in prop::collection::vec("[a-z]{1,8}", 0..5)) {
        let columns = names.iter().map(|n| ColumnInfo::new(n.clone(), "TEXT")).collect();
        let shaped = shape(&QueryResult::with_data(columns, vec![]));
        prop_assert_eq!(shaped.summary, "No data found.");
        prop_assert_eq!(shaped.chart, None);
    }
}
