use std::fmt;
use std::path::Path;

use log::{debug, info};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior};

use crate::error::VaultError;
use crate::schema::definition::{rename_in_dependent, TableDefinition};
use crate::schema::{Introspector, TableSchema};
use crate::utils::Utils;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameOutcome {
    Applied,
    AlreadyApplied,
    Skipped(String),
    Failed(String),
}

impl fmt::Display for RenameOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenameOutcome::Applied => write!(f, "applied"),
            RenameOutcome::AlreadyApplied => write!(f, "already applied"),
            RenameOutcome::Skipped(reason) => write!(f, "skipped ({})", reason),
            RenameOutcome::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// Steps of a table reconstruction, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconstructionStep {
    RenameAside,
    CreateReplacement,
    CopyRows,
    DropOriginal,
    RecreateDependents,
}

/// Renames one column by rebuilding its table inside a single transaction:
/// the live table is renamed aside, a replacement is created from the regenerated
/// definition, rows are copied across by position, and the old table is dropped.
/// Any error rolls the whole transaction back and leaves the table untouched.
#[derive(Debug, Default)]
pub struct ColumnRenamer {
    #[cfg(test)]
    fail_before: Option<ReconstructionStep>,
}

impl ColumnRenamer {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn failing_before(step: ReconstructionStep) -> Self {
        Self {
            fail_before: Some(step),
        }
    }

    pub fn rename_column(&self, file: &Path, table: &str, old_name: &str, new_name: &str) -> RenameOutcome {
        match self.try_rename(file, table, old_name, new_name) {
            Ok(outcome) => outcome,
            Err(e) => RenameOutcome::Failed(e.to_string()),
        }
    }

    fn try_rename(
        &self,
        file: &Path,
        table: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<RenameOutcome, VaultError> {
        if old_name.eq_ignore_ascii_case(new_name) {
            return Ok(RenameOutcome::Skipped(
                "old and new column names are equal".into(),
            ));
        }
        if !file.is_file() {
            return Ok(RenameOutcome::Skipped("database file not found".into()));
        }

        // Never create a database that isn't there
        let mut conn = Connection::open_with_flags(
            file,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // Keep references from other tables pointing at the original table name while
        // it is temporarily renamed aside.
        conn.pragma_update(None, "legacy_alter_table", true)?;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !Introspector::table_exists_on(&tx, table)? {
            return Ok(RenameOutcome::Skipped("table not found".into()));
        }

        let schema = Introspector::table_schema_on(&tx, table)?;
        let has_old = schema.has_column(old_name);
        let has_new = schema.has_column(new_name);

        if !has_old {
            return Ok(if has_new {
                RenameOutcome::AlreadyApplied
            } else {
                RenameOutcome::Skipped("old column not found".into())
            });
        }
        if has_new {
            return Ok(RenameOutcome::AlreadyApplied);
        }

        self.reconstruct(&tx, &schema, old_name, new_name)?;
        tx.commit()?;

        info!(
            "Renamed column: {}.{} -> {} in {}",
            schema.name,
            old_name,
            new_name,
            file.display()
        );
        Ok(RenameOutcome::Applied)
    }

    fn reconstruct(
        &self,
        tx: &Transaction,
        schema: &TableSchema,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), VaultError> {
        let dependents = Introspector::dependents_on(tx, &schema.name)?;

        let mut definition = TableDefinition::parse(&schema.definition)?;
        definition.rename_column(old_name, new_name)?;
        Self::check_regenerated(&definition, schema, old_name, new_name)?;
        let new_definition = definition.to_sql();

        let row_count = Self::row_count(tx, &schema.name)?;
        // The rename aside carries the AUTOINCREMENT counter off to the temp table
        let sequence = Self::sequence_value(tx, &schema.name)?;
        let temp_name = Self::unused_temp_name(tx, &schema.name)?;
        let table = Utils::quote_ident(&schema.name);
        let temp = Utils::quote_ident(&temp_name);

        self.checkpoint(ReconstructionStep::RenameAside)?;
        tx.execute_batch(&format!("ALTER TABLE {} RENAME TO {}", table, temp))?;

        self.checkpoint(ReconstructionStep::CreateReplacement)?;
        tx.execute_batch(&new_definition)?;

        // Select in the captured column order so values land on the same positions
        self.checkpoint(ReconstructionStep::CopyRows)?;
        let column_list: Vec<String> = schema
            .columns
            .iter()
            .map(|c| Utils::quote_ident(&c.name))
            .collect();
        tx.execute(
            &format!(
                "INSERT INTO {} SELECT {} FROM {}",
                table,
                column_list.join(", "),
                temp
            ),
            [],
        )?;

        let copied = Self::row_count(tx, &schema.name)?;
        if copied != row_count {
            return Err(VaultError::IntegrityViolation(format!(
                "copied {} of {} rows into '{}'",
                copied, row_count, schema.name
            )));
        }

        self.checkpoint(ReconstructionStep::DropOriginal)?;
        tx.execute_batch(&format!("DROP TABLE {}", temp))?;
        if let Some(seq) = sequence {
            Self::restore_sequence(tx, &schema.name, seq)?;
        }

        self.checkpoint(ReconstructionStep::RecreateDependents)?;
        for dependent in &dependents {
            debug!("Recreating {} '{}'", dependent.kind, dependent.name);
            tx.execute_batch(&rename_in_dependent(&dependent.sql, old_name, new_name))?;
        }

        let rebuilt = Introspector::table_schema_on(tx, &schema.name)?;
        let types_kept = rebuilt
            .columns
            .iter()
            .zip(&schema.columns)
            .all(|(after, before)| same_type(&after.declared_type, &before.declared_type));
        if rebuilt.has_column(old_name)
            || !rebuilt.has_column(new_name)
            || rebuilt.columns.len() != schema.columns.len()
            || !types_kept
        {
            return Err(VaultError::IntegrityViolation(format!(
                "rebuilt table '{}' has unexpected columns: {}",
                schema.name,
                rebuilt.column_names().join(", ")
            )));
        }

        Ok(())
    }

    /// The regenerated definition must declare the live columns in the live order, with
    /// only the renamed one changed and every declared type intact.
    fn check_regenerated(
        definition: &TableDefinition,
        schema: &TableSchema,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), VaultError> {
        let expected: Vec<&str> = schema
            .columns
            .iter()
            .map(|c| {
                if c.name.eq_ignore_ascii_case(old_name) {
                    new_name
                } else {
                    c.name.as_str()
                }
            })
            .collect();
        let names = definition.column_names();
        let names_match = names.len() == expected.len()
            && names
                .iter()
                .zip(&expected)
                .all(|(got, want)| got.eq_ignore_ascii_case(want));
        let types_match = definition
            .columns()
            .zip(&schema.columns)
            .all(|(decl, live)| same_type(&decl.declared_type(), &live.declared_type));

        if names_match && types_match {
            Ok(())
        } else {
            Err(VaultError::IntegrityViolation(format!(
                "regenerated definition of '{}' declares unexpected columns: {}",
                schema.name,
                names.join(", ")
            )))
        }
    }

    fn sequence_value(conn: &Connection, table: &str) -> Result<Option<i64>, VaultError> {
        if !Introspector::table_exists_on(conn, "sqlite_sequence")? {
            return Ok(None);
        }
        let seq = conn
            .query_row(
                "SELECT seq FROM sqlite_sequence WHERE name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seq)
    }

    fn restore_sequence(conn: &Connection, table: &str, seq: i64) -> Result<(), VaultError> {
        let updated = conn.execute(
            "UPDATE sqlite_sequence SET seq = max(seq, ?1) WHERE name = ?2",
            params![seq, table],
        )?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2)",
                params![table, seq],
            )?;
        }
        Ok(())
    }

    fn checkpoint(&self, step: ReconstructionStep) -> Result<(), VaultError> {
        debug!("Reconstruction step: {:?}", step);
        #[cfg(test)]
        if self.fail_before == Some(step) {
            return Err(VaultError::Error(format!("injected failure before {:?}", step)));
        }
        Ok(())
    }

    fn row_count(conn: &Connection, table: &str) -> Result<i64, VaultError> {
        let count = conn.query_row(
            &format!("SELECT count(*) FROM {}", Utils::quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn unused_temp_name(conn: &Connection, table: &str) -> Result<String, VaultError> {
        let base = format!("_{}_rename_old", table);
        let mut candidate = base.clone();
        let mut n = 1;
        while Introspector::table_exists_on(conn, &candidate)? {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        Ok(candidate)
    }
}

/// Declared types compare like SQLite identifiers: case and spacing do not matter.
fn same_type(a: &str, b: &str) -> bool {
    let squash = |s: &str| -> String {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect()
    };
    squash(a) == squash(b)
}
