//! Allow-list validation of candidate queries.
//!
//! Uses sqlparser-rs with the store's dialect to parse the candidate, then
//! walks the AST to check statement kind, relations, column references and
//! function calls.

use std::ops::ControlFlow;

use sqlparser::ast::{
    visit_expressions, visit_relations, Expr, Ident, ObjectName, Query, SelectItem, SetExpr,
    Statement, TableAlias, TableFactor, TableWithJoins, Visit, Visitor,
};
use sqlparser::dialect::Dialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::store::{StoreBackend, TableName};

use super::{functions, RejectReason, StatementType};

/// Keywords that may never appear unquoted in a candidate.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "CREATE", "DROP", "ALTER", "INSERT", "UPDATE", "DELETE", "TRUNCATE", "MERGE", "GRANT",
    "REVOKE", "COPY", "ATTACH", "DETACH", "PRAGMA", "VACUUM", "REINDEX",
];

const HIDDEN_COLUMNS: &[&str] = &[
    "rowid", "_rowid_", "oid", "ctid", "xmin", "xmax", "cmin", "cmax", "tableoid",
];

/// A candidate query that passed the allow-list gate.
///
/// Only [`QueryValidator::validate`] can construct one, so holding a
/// `ValidatedQuery` proves the text was checked against `table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    sql: String,
    table: TableName,
}

impl ValidatedQuery {
    /// The query text, without a trailing semicolon.
    pub fn as_str(&self) -> &str {
        &self.sql
    }

    /// The only table this query reads from.
    pub fn table(&self) -> &TableName {
        &self.table
    }
}

/// Validates candidate SQL against a single table and its declared columns.
#[derive(Debug, Clone, Copy)]
pub struct QueryValidator {
    backend: StoreBackend,
}

impl QueryValidator {
    /// Creates a validator that parses with the given store's dialect.
    pub fn new(backend: StoreBackend) -> Self {
        Self { backend }
    }

    /// Checks `candidate` and returns it as a [`ValidatedQuery`] if it is a
    /// single read-only query referencing only `table` and `columns`.
    pub fn validate(
        &self,
        candidate: &str,
        table: &TableName,
        columns: &[String],
    ) -> Result<ValidatedQuery, RejectReason> {
        let text = candidate.trim();
        if text.trim_end_matches(';').trim().is_empty() {
            return Err(RejectReason::Empty);
        }

        self.backend
            .with_dialect(|dialect| check_keywords(dialect, text))?;

        let statements = self
            .backend
            .with_dialect(|dialect| Parser::parse_sql(dialect, text))
            .map_err(|e| RejectReason::Unparseable(e.to_string()))?;

        let statement = match statements.as_slice() {
            [] => return Err(RejectReason::Empty),
            [statement] => statement,
            many => return Err(RejectReason::MultipleStatements(many.len())),
        };

        if !matches!(statement, Statement::Query(_)) {
            return Err(RejectReason::NotReadOnly(statement_type(statement)));
        }

        let mut scope = QueryScope::default();
        if let ControlFlow::Break(reason) = statement.visit(&mut scope) {
            return Err(reason);
        }

        let allowed = AllowList {
            backend: self.backend,
            table,
            columns,
            scope: &scope,
        };

        if let ControlFlow::Break(reason) =
            visit_relations(statement, |name| allowed.check_relation(name))
        {
            return Err(reason);
        }

        if let ControlFlow::Break(reason) =
            visit_expressions(statement, |expr| allowed.check_expr(expr))
        {
            return Err(reason);
        }

        if let ControlFlow::Break(reason) = statement.visit(&mut ProjectionCheck {
            allowed: &allowed,
        }) {
            return Err(reason);
        }

        Ok(ValidatedQuery {
            sql: text.trim_end_matches(';').trim_end().to_string(),
            table: table.clone(),
        })
    }
}

/// Rejects candidates that contain a forbidden keyword outside of quotes and
/// string literals.
fn check_keywords(dialect: &dyn Dialect, sql: &str) -> Result<(), RejectReason> {
    let tokens = Tokenizer::new(dialect, sql)
        .tokenize()
        .map_err(|e| RejectReason::Unparseable(e.to_string()))?;

    for token in tokens {
        if let Token::Word(word) = token {
            if word.quote_style.is_some() {
                continue;
            }
            let upper = word.value.to_ascii_uppercase();
            if FORBIDDEN_KEYWORDS.contains(&upper.as_str()) {
                return Err(RejectReason::ForbiddenKeyword(upper));
            }
        }
    }

    Ok(())
}

/// Maps a non-query statement to the type reported in the rejection.
fn statement_type(statement: &Statement) -> StatementType {
    match statement {
        Statement::Query(_) => StatementType::Select,
        Statement::Insert { .. } => StatementType::Insert,
        Statement::Update { .. } => StatementType::Update,
        Statement::Delete { .. } => StatementType::Delete,
        Statement::Merge { .. } => StatementType::Merge,
        Statement::Drop { .. } => StatementType::Drop,
        Statement::Truncate { .. } => StatementType::Truncate,
        Statement::AlterTable { .. } => StatementType::Alter,
        Statement::CreateTable { .. }
        | Statement::CreateView { .. }
        | Statement::CreateIndex { .. } => StatementType::Create,
        Statement::Grant { .. } => StatementType::Grant,
        Statement::Revoke { .. } => StatementType::Revoke,
        Statement::Explain { .. } => StatementType::Explain,
        _ => StatementType::Unknown,
    }
}

/// Names introduced by the statement itself.
///
/// Also rejects query bodies that write (data-modifying CTEs, `SELECT INTO`).
#[derive(Debug, Default)]
struct QueryScope {
    cte_names: Vec<String>,
    /// Table, derived-table and nested-join aliases. Only valid as qualifiers.
    qualifiers: Vec<String>,
    /// Output names of inner queries: projection aliases and the column
    /// lists of CTE and table aliases.
    derived_columns: Vec<String>,
}

impl Visitor for QueryScope {
    type Break = RejectReason;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.cte_names.push(cte.alias.name.value.clone());
                self.collect_alias_columns(&cte.alias);
            }
        }
        self.collect_set_expr(&query.body)
    }
}

impl QueryScope {
    fn collect_set_expr(&mut self, body: &SetExpr) -> ControlFlow<RejectReason> {
        match body {
            SetExpr::Select(select) => {
                if select.into.is_some() {
                    return ControlFlow::Break(RejectReason::SelectInto);
                }
                for item in &select.projection {
                    if let SelectItem::ExprWithAlias { alias, .. } = item {
                        self.derived_columns.push(alias.value.clone());
                    }
                }
                for twj in &select.from {
                    self.collect_table_with_joins(twj);
                }
                ControlFlow::Continue(())
            }
            SetExpr::SetOperation { left, right, .. } => {
                self.collect_set_expr(left)?;
                self.collect_set_expr(right)
            }
            // Nested queries are visited on their own.
            SetExpr::Query(_) | SetExpr::Values(_) => ControlFlow::Continue(()),
            // INSERT/UPDATE/etc. inside a CTE body, or TABLE <name>
            _ => ControlFlow::Break(RejectReason::NotReadOnly(StatementType::Unknown)),
        }
    }

    fn collect_table_with_joins(&mut self, twj: &TableWithJoins) {
        self.collect_table_factor(&twj.relation);
        for join in &twj.joins {
            self.collect_table_factor(&join.relation);
        }
    }

    fn collect_table_factor(&mut self, factor: &TableFactor) {
        match factor {
            TableFactor::Table { alias, .. } | TableFactor::Derived { alias, .. } => {
                if let Some(alias) = alias {
                    self.collect_alias(alias);
                }
            }
            TableFactor::NestedJoin {
                table_with_joins,
                alias,
            } => {
                if let Some(alias) = alias {
                    self.collect_alias(alias);
                }
                self.collect_table_with_joins(table_with_joins);
            }
            _ => {}
        }
    }

    fn collect_alias(&mut self, alias: &TableAlias) {
        self.qualifiers.push(alias.name.value.clone());
        self.collect_alias_columns(alias);
    }

    /// `t(a, b)` renames the relation's output columns to `a` and `b`.
    fn collect_alias_columns(&mut self, alias: &TableAlias) {
        self.derived_columns
            .extend(alias.columns.iter().map(|column| column.value.clone()));
    }
}

/// The allow-list a single validation runs against.
struct AllowList<'a> {
    backend: StoreBackend,
    table: &'a TableName,
    columns: &'a [String],
    scope: &'a QueryScope,
}

impl AllowList<'_> {
    fn check_relation(&self, name: &ObjectName) -> ControlFlow<RejectReason> {
        let allowed = match name.0.as_slice() {
            [ident] => {
                ident_matches(ident, self.table.as_str())
                    || self.scope.cte_names.iter().any(|cte| ident_matches(ident, cte))
            }
            _ => false,
        };

        if allowed {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(RejectReason::ForeignTable(name.to_string()))
        }
    }

    fn check_expr(&self, expr: &Expr) -> ControlFlow<RejectReason> {
        match expr {
            Expr::Identifier(ident) => self.check_column(ident),
            Expr::CompoundIdentifier(parts) => match parts.as_slice() {
                [qualifier, column] => {
                    if !self.is_qualifier(qualifier) {
                        return ControlFlow::Break(RejectReason::BadQualifier(
                            display_parts(parts),
                        ));
                    }
                    self.check_column(column)
                }
                [single] => self.check_column(single),
                _ => ControlFlow::Break(RejectReason::BadQualifier(display_parts(parts))),
            },
            Expr::Function(function) => self.check_function(&function.name),
            _ => ControlFlow::Continue(()),
        }
    }

    fn check_function(&self, name: &ObjectName) -> ControlFlow<RejectReason> {
        match name.0.as_slice() {
            [ident] if functions::is_allowed(self.backend, &ident.value) => {
                ControlFlow::Continue(())
            }
            // Schema-qualified calls (pg_catalog.x) are never allowed.
            _ => ControlFlow::Break(RejectReason::ForbiddenFunction(display_parts(&name.0))),
        }
    }

    fn check_column(&self, ident: &Ident) -> ControlFlow<RejectReason> {
        let known = self.is_declared(ident) || self.is_derived(ident);

        if known {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(RejectReason::UnknownColumn(ident.value.clone()))
        }
    }

    fn is_declared(&self, ident: &Ident) -> bool {
        self.columns.iter().any(|c| ident_matches(ident, c))
    }

    fn is_derived(&self, ident: &Ident) -> bool {
        !is_hidden_column(ident)
            && self.scope.derived_columns.iter().any(|c| ident_matches(ident, c))
    }

    fn is_qualifier(&self, ident: &Ident) -> bool {
        ident_matches(ident, self.table.as_str())
            || self.scope.qualifiers.iter().any(|a| ident_matches(ident, a))
            || self.scope.cte_names.iter().any(|c| ident_matches(ident, c))
    }

    /// Checks each SELECT's own projection. Names there resolve against the
    /// select's sources, so a derived name only counts when the select reads
    /// a CTE or a derived table; `SELECT x AS x` needs `x` declared.
    fn check_projections(&self, body: &SetExpr) -> ControlFlow<RejectReason> {
        match body {
            SetExpr::Select(select) => {
                let reads_derived = select.from.iter().any(|twj| self.reads_derived(twj));
                for item in &select.projection {
                    let mut names = ProjectionNames::default();
                    let _ = item.visit(&mut names);
                    for ident in &names.found {
                        let known = self.is_declared(ident)
                            || (reads_derived && self.is_derived(ident));
                        if !known {
                            return ControlFlow::Break(RejectReason::UnknownColumn(
                                ident.value.clone(),
                            ));
                        }
                    }
                }
                ControlFlow::Continue(())
            }
            SetExpr::SetOperation { left, right, .. } => {
                self.check_projections(left)?;
                self.check_projections(right)
            }
            _ => ControlFlow::Continue(()),
        }
    }

    fn reads_derived(&self, twj: &TableWithJoins) -> bool {
        std::iter::once(&twj.relation)
            .chain(twj.joins.iter().map(|join| &join.relation))
            .any(|factor| match factor {
                TableFactor::Derived { .. } => true,
                TableFactor::Table { name, .. } => match name.0.as_slice() {
                    [ident] => self.scope.cte_names.iter().any(|c| ident_matches(ident, c)),
                    _ => false,
                },
                TableFactor::NestedJoin {
                    table_with_joins, ..
                } => self.reads_derived(table_with_joins),
                _ => false,
            })
    }
}

/// Runs [`AllowList::check_projections`] on every query in the statement.
struct ProjectionCheck<'a> {
    allowed: &'a AllowList<'a>,
}

impl Visitor for ProjectionCheck<'_> {
    type Break = RejectReason;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        self.allowed.check_projections(&query.body)
    }
}

/// Column names referenced directly by one projection item, skipping
/// subqueries (those are checked as queries of their own).
#[derive(Default)]
struct ProjectionNames {
    depth: usize,
    found: Vec<Ident>,
}

impl Visitor for ProjectionNames {
    type Break = ();

    fn pre_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.depth -= 1;
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        if self.depth == 0 {
            match expr {
                Expr::Identifier(ident) => self.found.push(ident.clone()),
                Expr::CompoundIdentifier(parts) => {
                    if let Some(column) = parts.last() {
                        self.found.push(column.clone());
                    }
                }
                _ => {}
            }
        }
        ControlFlow::Continue(())
    }
}

/// Row identifiers and system columns every table carries without declaring
/// them. Only reachable when the dataset itself declares the name.
fn is_hidden_column(ident: &Ident) -> bool {
    HIDDEN_COLUMNS
        .iter()
        .any(|hidden| ident.value.eq_ignore_ascii_case(hidden))
}

/// Quoted identifiers match exactly; unquoted ones ignore ASCII case.
fn ident_matches(ident: &Ident, name: &str) -> bool {
    if ident.quote_style.is_some() {
        ident.value == name
    } else {
        ident.value.eq_ignore_ascii_case(name)
    }
}

fn display_parts(parts: &[Ident]) -> String {
    parts
        .iter()
        .map(|p| p.value.as_str())
        .collect::<Vec<_>>()
        .join(".")
}
