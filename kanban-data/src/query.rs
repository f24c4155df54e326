//! A fluent, dialect-aware SQL builder producing [`Statement`]s.
//!
//! ```
//! use kanban_data::query::{Dialect, QueryBuilder};
//!
//! let stmt = QueryBuilder::select("tags")
//!     .columns(&["tag_id", "status"])
//!     .where_eq("art_no", "A-100")
//!     .order_by("tag_id", true)
//!     .build()
//!     .unwrap();
//! assert_eq!(stmt.sql, "SELECT tag_id, status FROM tags WHERE art_no = ? ORDER BY tag_id ASC");
//! ```

use kanban_core::GatewayError;
use kanban_pool::{SqlValue, Statement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// SQLite-style `?` placeholders (default).
    #[default]
    Sqlite,
    /// MySQL-style `?` placeholders with backtick quoting.
    MySql,
    /// Postgres-style `$1, $2, ...` placeholders.
    Postgres,
    /// SQL Server `@P1, @P2, ...` placeholders with bracket quoting.
    MsSql,
}

impl Dialect {
    /// Guess the dialect from a connection URL scheme, defaulting to SQLite.
    pub fn from_url(url: &str) -> Self {
        let scheme = url.split(':').next().unwrap_or_default().to_ascii_lowercase();
        match scheme.as_str() {
            "postgres" | "postgresql" => Dialect::Postgres,
            "mysql" | "mariadb" => Dialect::MySql,
            "mssql" | "sqlserver" | "tds" => Dialect::MsSql,
            _ => Dialect::Sqlite,
        }
    }

    /// The bind marker for the 1-based parameter `index`.
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::MsSql => format!("@P{index}"),
            Dialect::Sqlite | Dialect::MySql => "?".to_string(),
        }
    }

    fn quote(self, part: &str) -> String {
        match self {
            Dialect::MySql => format!("`{part}`"),
            Dialect::MsSql => format!("[{part}]"),
            Dialect::Sqlite | Dialect::Postgres => format!("\"{part}\""),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentifierPolicy {
    /// Validate identifiers against a conservative pattern.
    #[default]
    Validate,
    /// Validate and quote identifiers using the dialect quoting style.
    Quote,
}

#[derive(Debug, Clone)]
enum Kind {
    Select(Vec<String>),
    Count,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
enum Condition {
    Eq(String, SqlValue),
    NotEq(String, SqlValue),
    Gt(String, SqlValue),
    Lt(String, SqlValue),
    Like(String, String),
    In(String, Vec<SqlValue>),
    IsNull(String),
}

#[derive(Debug, Clone)]
pub struct QueryBuilder {
    kind: Kind,
    table: String,
    assignments: Vec<(String, SqlValue)>,
    conditions: Vec<Condition>,
    order: Vec<(String, bool)>,
    limit_val: Option<u64>,
    offset_val: Option<u64>,
    dialect: Dialect,
    identifier_policy: IdentifierPolicy,
}

impl QueryBuilder {
    fn new(kind: Kind, table: &str) -> Self {
        Self {
            kind,
            table: table.to_string(),
            assignments: Vec::new(),
            conditions: Vec::new(),
            order: Vec::new(),
            limit_val: None,
            offset_val: None,
            dialect: Dialect::default(),
            identifier_policy: IdentifierPolicy::default(),
        }
    }

    /// `SELECT *` unless [`columns`](Self::columns) narrows it.
    pub fn select(table: &str) -> Self {
        Self::new(Kind::Select(vec!["*".to_string()]), table)
    }

    pub fn count(table: &str) -> Self {
        Self::new(Kind::Count, table)
    }

    pub fn insert(table: &str) -> Self {
        Self::new(Kind::Insert, table)
    }

    pub fn update(table: &str) -> Self {
        Self::new(Kind::Update, table)
    }

    pub fn delete(table: &str) -> Self {
        Self::new(Kind::Delete, table)
    }

    /// Set the SQL dialect (affects placeholder style, quoting and row limits).
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn identifier_policy(mut self, policy: IdentifierPolicy) -> Self {
        self.identifier_policy = policy;
        self
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        if let Kind::Select(cols) = &mut self.kind {
            *cols = columns.iter().map(|c| c.to_string()).collect();
        }
        self
    }

    /// A column value for INSERT and UPDATE.
    pub fn set(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.assignments.push((column.to_string(), value.into()));
        self
    }

    pub fn where_eq(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.conditions
            .push(Condition::Eq(column.to_string(), value.into()));
        self
    }

    pub fn where_not_eq(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.conditions
            .push(Condition::NotEq(column.to_string(), value.into()));
        self
    }

    pub fn where_gt(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.conditions
            .push(Condition::Gt(column.to_string(), value.into()));
        self
    }

    pub fn where_lt(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.conditions
            .push(Condition::Lt(column.to_string(), value.into()));
        self
    }

    pub fn where_like(mut self, column: &str, pattern: &str) -> Self {
        self.conditions
            .push(Condition::Like(column.to_string(), pattern.to_string()));
        self
    }

    pub fn where_in(mut self, column: &str, values: Vec<SqlValue>) -> Self {
        self.conditions.push(Condition::In(column.to_string(), values));
        self
    }

    pub fn where_null(mut self, column: &str) -> Self {
        self.conditions.push(Condition::IsNull(column.to_string()));
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order.push((column.to_string(), ascending));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit_val = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset_val = Some(offset);
        self
    }

    /// Render the statement, validating every identifier.
    pub fn build(&self) -> Result<Statement, QueryError> {
        let table = self.ident(&self.table, false, "table")?;
        let mut params = Vec::new();
        let mut sql = match &self.kind {
            Kind::Select(columns) => {
                let cols = columns
                    .iter()
                    .map(|c| self.ident(c, true, "column"))
                    .collect::<Result<Vec<_>, _>>()?
                    .join(", ");
                match (self.dialect, self.limit_val, self.offset_val) {
                    (Dialect::MsSql, Some(limit), None) => {
                        format!("SELECT TOP ({limit}) {cols} FROM {table}")
                    }
                    _ => format!("SELECT {cols} FROM {table}"),
                }
            }
            Kind::Count => format!("SELECT COUNT(*) AS count FROM {table}"),
            Kind::Insert => {
                if self.assignments.is_empty() {
                    return Err(QueryError::Empty("INSERT without values"));
                }
                let mut cols = Vec::with_capacity(self.assignments.len());
                let mut marks = Vec::with_capacity(self.assignments.len());
                for (col, value) in &self.assignments {
                    cols.push(self.ident(col, false, "column")?);
                    params.push(value.clone());
                    marks.push(self.dialect.placeholder(params.len()));
                }
                format!("INSERT INTO {table} ({}) VALUES ({})", cols.join(", "), marks.join(", "))
            }
            Kind::Update => {
                if self.assignments.is_empty() {
                    return Err(QueryError::Empty("UPDATE without assignments"));
                }
                let mut sets = Vec::with_capacity(self.assignments.len());
                for (col, value) in &self.assignments {
                    let col = self.ident(col, false, "column")?;
                    params.push(value.clone());
                    sets.push(format!("{col} = {}", self.dialect.placeholder(params.len())));
                }
                format!("UPDATE {table} SET {}", sets.join(", "))
            }
            Kind::Delete => format!("DELETE FROM {table}"),
        };

        self.append_where(&mut sql, &mut params)?;
        if let Kind::Select(_) = self.kind {
            self.append_order(&mut sql)?;
            self.append_limit_offset(&mut sql);
        }
        Ok(Statement { sql, params })
    }

    fn append_where(&self, sql: &mut String, params: &mut Vec<SqlValue>) -> Result<(), QueryError> {
        if self.conditions.is_empty() {
            return Ok(());
        }
        let mut clauses = Vec::with_capacity(self.conditions.len());
        for cond in &self.conditions {
            let clause = match cond {
                Condition::Eq(col, val) => self.binary(col, "=", val, params)?,
                Condition::NotEq(col, val) => self.binary(col, "!=", val, params)?,
                Condition::Gt(col, val) => self.binary(col, ">", val, params)?,
                Condition::Lt(col, val) => self.binary(col, "<", val, params)?,
                Condition::Like(col, pat) => {
                    self.binary(col, "LIKE", &SqlValue::Text(pat.clone()), params)?
                }
                Condition::In(col, vals) => {
                    let col = self.ident(col, false, "column")?;
                    if vals.is_empty() {
                        // Matches nothing, and stays valid SQL.
                        "1 = 0".to_string()
                    } else {
                        let marks: Vec<_> = vals
                            .iter()
                            .map(|v| {
                                params.push(v.clone());
                                self.dialect.placeholder(params.len())
                            })
                            .collect();
                        format!("{col} IN ({})", marks.join(", "))
                    }
                }
                Condition::IsNull(col) => {
                    format!("{} IS NULL", self.ident(col, false, "column")?)
                }
            };
            clauses.push(clause);
        }
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
        Ok(())
    }

    fn binary(
        &self,
        column: &str,
        op: &str,
        value: &SqlValue,
        params: &mut Vec<SqlValue>,
    ) -> Result<String, QueryError> {
        let col = self.ident(column, false, "column")?;
        params.push(value.clone());
        Ok(format!("{col} {op} {}", self.dialect.placeholder(params.len())))
    }

    fn append_order(&self, sql: &mut String) -> Result<(), QueryError> {
        if self.order.is_empty() {
            return Ok(());
        }
        let mut clauses = Vec::with_capacity(self.order.len());
        for (col, asc) in &self.order {
            let col = self.ident(col, false, "column")?;
            clauses.push(format!("{col} {}", if *asc { "ASC" } else { "DESC" }));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&clauses.join(", "));
        Ok(())
    }

    fn append_limit_offset(&self, sql: &mut String) {
        if self.dialect == Dialect::MsSql {
            // TOP already covers a bare limit; paging needs ORDER BY.
            if let Some(offset) = self.offset_val {
                sql.push_str(&format!(" OFFSET {offset} ROWS"));
                if let Some(limit) = self.limit_val {
                    sql.push_str(&format!(" FETCH NEXT {limit} ROWS ONLY"));
                }
            }
            return;
        }
        if let Some(limit) = self.limit_val {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset_val {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
    }

    fn ident(&self, ident: &str, allow_star: bool, kind: &'static str) -> Result<String, QueryError> {
        if !is_valid_identifier(ident, allow_star) {
            return Err(QueryError::InvalidIdentifier {
                kind,
                ident: ident.to_string(),
            });
        }
        Ok(match self.identifier_policy {
            IdentifierPolicy::Validate => ident.to_string(),
            IdentifierPolicy::Quote => ident
                .split('.')
                .map(|part| if part == "*" { part.to_string() } else { self.dialect.quote(part) })
                .collect::<Vec<_>>()
                .join("."),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    InvalidIdentifier { kind: &'static str, ident: String },
    Empty(&'static str),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::InvalidIdentifier { kind, ident } => {
                write!(f, "Invalid {kind} identifier: {ident}")
            }
            QueryError::Empty(what) => write!(f, "Incomplete statement: {what}"),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<QueryError> for GatewayError {
    fn from(err: QueryError) -> Self {
        GatewayError::internal(err.to_string())
    }
}

fn is_valid_identifier(ident: &str, allow_star: bool) -> bool {
    if ident.is_empty() {
        return false;
    }
    let parts: Vec<&str> = ident.split('.').collect();
    for (idx, part) in parts.iter().enumerate() {
        if allow_star && *part == "*" {
            return idx + 1 == parts.len();
        }
        if !is_valid_segment(part) {
            return false;
        }
    }
    true
}

/// ASCII letters, digits and `_`; `$` is accepted after the first character
/// (Navision company tables are named `<company>$<table>`).
fn is_valid_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
