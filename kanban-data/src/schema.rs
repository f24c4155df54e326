//! Bootstrap DDL for SQLite-backed stores (development, tests, ERP mirror).

use kanban_pool::{BackendConnection, NativeError, Statement};

pub const GENERAL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS articles (
        art_no VARCHAR(50) PRIMARY KEY,
        art_supplier VARCHAR(3) NOT NULL DEFAULT 'OKB' CHECK (art_supplier IN ('OKB', 'SW', 'RKB')),
        description TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS tags (
        tag_id VARCHAR(24) PRIMARY KEY,
        art_no VARCHAR(50) NOT NULL REFERENCES articles (art_no) ON DELETE CASCADE,
        status INTEGER NOT NULL DEFAULT 0 CHECK (status IN (0, 1)),
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE INDEX IF NOT EXISTS idx_tags_art_no ON tags (art_no)",
    "CREATE TRIGGER IF NOT EXISTS tags_touch AFTER UPDATE ON tags
     BEGIN
        UPDATE tags SET updated_at = CURRENT_TIMESTAMP WHERE tag_id = NEW.tag_id;
     END",
    "CREATE TABLE IF NOT EXISTS stock (
        sku VARCHAR(50) PRIMARY KEY,
        quantity INTEGER NOT NULL DEFAULT 0 CHECK (quantity >= 0)
    )",
];

pub const SECONDARY: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS orders (
        order_no VARCHAR(10) PRIMARY KEY,
        art_no VARCHAR(50) NOT NULL,
        status INTEGER NOT NULL DEFAULT 0 CHECK (status IN (0, 1)),
        timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE INDEX IF NOT EXISTS idx_orders_art_no ON orders (art_no)",
];

/// The item table of an ERP mirror for `company`.
pub fn erp_mirror(company: &str) -> Vec<String> {
    vec![format!(
        "CREATE TABLE IF NOT EXISTS \"{company}$Item\" (
            \"No_\" VARCHAR(20) PRIMARY KEY,
            \"Description\" VARCHAR(100) NOT NULL DEFAULT ''
        )"
    )]
}

/// Run each DDL statement in order on `conn`.
pub async fn bootstrap<S: AsRef<str>>(
    conn: &mut dyn BackendConnection,
    statements: &[S],
) -> Result<(), NativeError> {
    for ddl in statements {
        conn.execute(&Statement::new(ddl.as_ref())).await?;
    }
    Ok(())
}
