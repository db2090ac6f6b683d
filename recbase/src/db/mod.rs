//! SQLite engine handle: transactions, introspection and persistence.
//!
//! All schema mutations go through [`Db::run_in_transaction`]. Nested calls
//! reuse the already open transaction, so a failure anywhere rolls back the
//! whole logical operation.

mod collections;
mod records;

use std::cell::Cell;
use std::path::Path;

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, ToSql};
use serde_json::{Map, Value};

use crate::config::CoreConfig;
use crate::errors::{CoreError, CoreResult};
use crate::fields::sql_to_json;
use crate::registry::FieldTypeRegistry;
use crate::tools::dbutils::quote_table;

pub use records::CascadeTarget;

/// Internal table holding the collection definitions.
pub const COLLECTIONS_TABLE: &str = "_collections";

/// Named statement parameters (`name` is used as `:name` in the SQL).
pub type Params = Vec<(String, SqlValue)>;

/// Column info as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub primary_key: bool,
}

/// A view stored in `sqlite_master`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredView {
    pub name: String,
    pub sql: String,
}

pub struct Db {
    conn: Connection,
    registry: FieldTypeRegistry,
    config: CoreConfig,
    tx_depth: Cell<usize>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("path", &self.conn.path())
            .field("tx_depth", &self.tx_depth.get())
            .finish_non_exhaustive()
    }
}

impl Db {
    /// Opens (or creates) the database configured in `config.database.path`.
    pub fn open(config: CoreConfig) -> CoreResult<Self> {
        let conn = Connection::open(Path::new(&config.database.path))?;
        Self::with_connection(conn, config, FieldTypeRegistry::with_defaults())
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_in_memory_with(CoreConfig::default())
    }

    pub fn open_in_memory_with(config: CoreConfig) -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, config, FieldTypeRegistry::with_defaults())
    }

    /// Wraps an existing connection with an explicit field type registry.
    pub fn with_connection(conn: Connection, config: CoreConfig, registry: FieldTypeRegistry) -> CoreResult<Self> {
        let db = Self {
            conn,
            registry,
            config,
            tx_depth: Cell::new(0),
        };
        db.apply_pragmas()?;
        db.bootstrap()?;
        Ok(db)
    }

    fn apply_pragmas(&self) -> CoreResult<()> {
        let settings = &self.config.database;
        self.conn
            .busy_timeout(std::time::Duration::from_millis(settings.busy_timeout_ms))?;
        // journal_mode returns the resulting mode as a row
        let _mode: String = self
            .conn
            .query_row(&format!("PRAGMA journal_mode = {}", settings.journal_mode), [], |row| row.get(0))?;
        self.conn
            .execute_batch(&format!("PRAGMA foreign_keys = {}", if settings.foreign_keys { "ON" } else { "OFF" }))?;
        Ok(())
    }

    fn bootstrap(&self) -> CoreResult<()> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS `{COLLECTIONS_TABLE}` (
                `id`         TEXT PRIMARY KEY NOT NULL,
                `system`     BOOLEAN DEFAULT FALSE NOT NULL,
                `type`       TEXT DEFAULT 'base' NOT NULL,
                `name`       TEXT UNIQUE NOT NULL,
                `fields`     JSON DEFAULT '[]' NOT NULL,
                `indexes`    JSON DEFAULT '[]' NOT NULL,
                `listRule`   TEXT DEFAULT NULL,
                `viewRule`   TEXT DEFAULT NULL,
                `createRule` TEXT DEFAULT NULL,
                `updateRule` TEXT DEFAULT NULL,
                `deleteRule` TEXT DEFAULT NULL,
                `options`    JSON DEFAULT '{{}}' NOT NULL,
                `created`    TEXT DEFAULT '' NOT NULL,
                `updated`    TEXT DEFAULT '' NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS `idx__collections_name` ON `{COLLECTIONS_TABLE}` (`name` COLLATE NOCASE);"
        ))?;
        Ok(())
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &FieldTypeRegistry {
        &self.registry
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn in_transaction(&self) -> bool {
        self.tx_depth.get() > 0
    }

    /// Runs `f` inside a transaction.
    ///
    /// The outermost call commits on `Ok` and rolls back on `Err`; nested calls
    /// join the active transaction and leave the decision to the outermost one.
    pub fn run_in_transaction<T>(&self, f: impl FnOnce(&Db) -> CoreResult<T>) -> CoreResult<T> {
        let depth = self.tx_depth.get();
        if depth > 0 {
            self.tx_depth.set(depth + 1);
            let result = f(self);
            self.tx_depth.set(depth);
            return result;
        }

        self.conn.execute_batch("BEGIN")?;
        self.tx_depth.set(1);
        let result = f(self);
        self.tx_depth.set(0);

        match result {
            Ok(value) => match self.conn.execute_batch("COMMIT") {
                Ok(()) => Ok(value),
                Err(err) => {
                    self.rollback();
                    Err(err.into())
                }
            },
            Err(err) => {
                self.rollback();
                Err(err)
            }
        }
    }

    fn rollback(&self) {
        if let Err(err) = self.conn.execute_batch("ROLLBACK") {
            log::warn!("failed to rollback transaction: {err}");
        }
    }

    /// Executes a statement without parameters.
    pub fn exec(&self, sql: &str) -> CoreResult<usize> {
        log::debug!("{sql}");
        Ok(self.conn.execute(sql, [])?)
    }

    /// Executes a statement with named parameters.
    pub fn exec_with(&self, sql: &str, params: &[(String, SqlValue)]) -> CoreResult<usize> {
        log::debug!("{sql}");
        let named = named_params(params);
        let refs: Vec<(&str, &dyn ToSql)> = named.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        Ok(self.conn.execute(sql, refs.as_slice())?)
    }

    /// Runs a query and returns each row as a column name keyed JSON map.
    pub fn query_maps(&self, sql: &str, params: &[(String, SqlValue)]) -> CoreResult<Vec<Map<String, Value>>> {
        let mut stmt = self.conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
        let named = named_params(params);
        let refs: Vec<(&str, &dyn ToSql)> = named.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        let mut rows = stmt.query(refs.as_slice())?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut map = Map::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                let value: SqlValue = row.get(i)?;
                map.insert(name.clone(), sql_to_json(value));
            }
            out.push(map);
        }
        Ok(out)
    }

    /// Runs a query returning a single integer (e.g. `COUNT(*)`).
    pub fn query_count(&self, sql: &str, params: &[(String, SqlValue)]) -> CoreResult<i64> {
        let named = named_params(params);
        let refs: Vec<(&str, &dyn ToSql)> = named.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        Ok(self.conn.query_row(sql, refs.as_slice(), |row| row.get(0))?)
    }

    /// Columns of a table or view. Errors for unknown tables.
    pub fn table_columns(&self, table: &str) -> CoreResult<Vec<TableColumn>> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({})", quote_table(table)))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(TableColumn {
                    name: row.get(1)?,
                    declared_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    not_null: row.get::<_, i64>(3)? != 0,
                    default_value: row.get(4)?,
                    primary_key: row.get::<_, i64>(5)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if columns.is_empty() {
            return Err(CoreError::not_found(format!("table {table:?}")));
        }
        Ok(columns)
    }

    /// Index name → definition of a table. Missing tables have no indexes.
    pub fn table_indexes(&self, table: &str) -> CoreResult<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, sql FROM sqlite_master WHERE type = 'index' AND sql IS NOT NULL AND tbl_name = ?1 COLLATE NOCASE",
        )?;
        let indexes = stmt
            .query_map([table], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(indexes)
    }

    /// Table that owns the index `name`, if any.
    pub fn index_owner(&self, name: &str) -> CoreResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT tbl_name FROM sqlite_master WHERE type = 'index' AND name = ?1 COLLATE NOCASE",
                [name],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Case-insensitive check for a table or view.
    pub fn has_table(&self, name: &str) -> CoreResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1 COLLATE NOCASE",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn find_all_views(&self) -> CoreResult<Vec<StoredView>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, sql FROM sqlite_master WHERE type = 'view' AND sql IS NOT NULL ORDER BY rowid")?;
        let views = stmt
            .query_map([], |row| {
                Ok(StoredView {
                    name: row.get(0)?,
                    sql: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(views)
    }

    /// Drops and recreates the view `name` from `select_query`.
    pub fn save_view(&self, name: &str, select_query: &str) -> CoreResult<()> {
        let query = select_query.trim().trim_end_matches(';');
        self.run_in_transaction(|db| {
            db.delete_view(name)?;
            db.exec(&format!("CREATE VIEW {} AS {query}", quote_table(name)))?;
            Ok(())
        })
    }

    pub fn delete_view(&self, name: &str) -> CoreResult<()> {
        self.exec(&format!("DROP VIEW IF EXISTS {}", quote_table(name)))?;
        Ok(())
    }

    /// Best-effort `PRAGMA optimize`; failures are only logged.
    pub fn optimize(&self) {
        if let Err(err) = self.conn.execute_batch("PRAGMA optimize") {
            log::warn!("PRAGMA optimize failed: {err}");
        }
    }
}

fn named_params(params: &[(String, SqlValue)]) -> Vec<(String, &dyn ToSql)> {
    params
        .iter()
        .map(|(name, value)| {
            let key = if name.starts_with(':') { name.clone() } else { format!(":{name}") };
            (key, value as &dyn ToSql)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_transactions_share_outcome() {
        let db = Db::open_in_memory().unwrap();
        db.exec("CREATE TABLE t (v TEXT)").unwrap();

        let result: CoreResult<()> = db.run_in_transaction(|db| {
            db.exec("INSERT INTO t VALUES ('a')")?;
            db.run_in_transaction(|inner| {
                assert!(inner.in_transaction());
                inner.exec("INSERT INTO t VALUES ('b')")
            })?;
            Err(CoreError::other("abort"))
        });
        assert!(result.is_err());
        assert!(!db.in_transaction());
        assert_eq!(db.query_count("SELECT COUNT(*) FROM t", &[]).unwrap(), 0);

        db.run_in_transaction(|db| db.exec("INSERT INTO t VALUES ('c')")).unwrap();
        assert_eq!(db.query_count("SELECT COUNT(*) FROM t", &[]).unwrap(), 1);
    }

    #[test]
    fn test_introspection_of_missing_tables() {
        let db = Db::open_in_memory().unwrap();
        assert!(db.table_columns("missing").is_err());
        assert!(db.table_indexes("missing").unwrap().is_empty());
        assert!(!db.has_table("missing").unwrap());
        assert!(db.has_table("_COLLECTIONS").unwrap());
    }

    #[test]
    fn test_views_roundtrip() {
        let db = Db::open_in_memory().unwrap();
        db.save_view("v1", "SELECT 1 AS one;").unwrap();
        let columns = db.table_columns("v1").unwrap();
        assert_eq!(columns[0].name, "one");
        assert_eq!(db.find_all_views().unwrap().len(), 1);
        db.delete_view("v1").unwrap();
        assert!(db.find_all_views().unwrap().is_empty());
    }

    #[test]
    fn test_named_params() {
        let db = Db::open_in_memory().unwrap();
        let rows = db
            .query_maps("SELECT :a AS a, :b AS b", &[("a".into(), SqlValue::Integer(1)), (":b".into(), SqlValue::Text("x".into()))])
            .unwrap();
        assert_eq!(rows[0]["a"], Value::from(1));
        assert_eq!(rows[0]["b"], Value::from("x"));
    }
}
