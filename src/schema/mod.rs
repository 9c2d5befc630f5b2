pub mod definition;
pub mod tokens;

use std::path::Path;

use rusqlite::{Connection, OpenFlags, OptionalExtension};

use crate::error::VaultError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
}

/// Live shape of one table. Always read fresh; never cached between calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub definition: String,
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// An index or trigger attached to a table. These are dropped together with the table
/// during reconstruction and must be recreated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentObject {
    pub kind: String,
    pub name: String,
    pub sql: String,
}

/// Read-only schema queries against a database file. Each public call opens its own
/// connection and closes it before returning.
pub struct Introspector;

impl Introspector {
    pub fn open_read_only(file: &Path) -> Result<Connection, VaultError> {
        if !file.is_file() {
            return Err(VaultError::SchemaNotFound(format!(
                "database file '{}' does not exist",
                file.display()
            )));
        }
        let conn = Connection::open_with_flags(
            file,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }

    pub fn table_exists(file: &Path, table: &str) -> Result<bool, VaultError> {
        let conn = Self::open_read_only(file)?;
        Self::table_exists_on(&conn, table)
    }

    pub fn columns(file: &Path, table: &str) -> Result<Vec<String>, VaultError> {
        let conn = Self::open_read_only(file)?;
        Ok(Self::table_schema_on(&conn, table)?.column_names())
    }

    pub fn definition_text(file: &Path, table: &str) -> Result<String, VaultError> {
        let conn = Self::open_read_only(file)?;
        Ok(Self::table_schema_on(&conn, table)?.definition)
    }

    pub fn table_schema(file: &Path, table: &str) -> Result<TableSchema, VaultError> {
        let conn = Self::open_read_only(file)?;
        Self::table_schema_on(&conn, table)
    }

    pub fn table_exists_on(conn: &Connection, table: &str) -> Result<bool, VaultError> {
        let count: i64 = conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn table_schema_on(conn: &Connection, table: &str) -> Result<TableSchema, VaultError> {
        let row: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT name, sql FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
                [table],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (name, definition) = row
            .ok_or_else(|| VaultError::SchemaNotFound(format!("table '{}' not found", table)))?;

        let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")?;
        let columns = stmt
            .query_map([&name], |row| {
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    declared_type: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TableSchema {
            name,
            columns,
            definition: definition.unwrap_or_default(),
        })
    }

    pub fn dependents_on(conn: &Connection, table: &str) -> Result<Vec<DependentObject>, VaultError> {
        let mut stmt = conn.prepare(
            "SELECT type, name, sql FROM sqlite_master
             WHERE tbl_name = ?1 COLLATE NOCASE AND type IN ('index', 'trigger') AND sql IS NOT NULL
             ORDER BY CASE type WHEN 'index' THEN 0 ELSE 1 END, name",
        )?;
        let dependents = stmt
            .query_map([table], |row| {
                Ok(DependentObject {
                    kind: row.get(0)?,
                    name: row.get(1)?,
                    sql: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(dependents)
    }
}
