//! Structured view of SQLite DDL used to rename a column without touching unrelated text.
//!
//! A `CREATE TABLE` statement is split into its header (everything up to the opening
//! parenthesis), the ordered list of column declarations and table constraints, and the
//! trailer (closing parenthesis and table options). Renaming a column rewrites only
//! identifier tokens that refer to that column of this table, then regenerates the
//! statement from the tokens.

use super::tokens::{render, tokenize, Token, TokenKind};
use crate::error::VaultError;

const CONSTRAINT_KEYWORDS: [&str; 5] = ["CONSTRAINT", "PRIMARY", "UNIQUE", "CHECK", "FOREIGN"];

const COLUMN_CONSTRAINT_KEYWORDS: [&str; 11] = [
    "CONSTRAINT",
    "PRIMARY",
    "NOT",
    "NULL",
    "UNIQUE",
    "CHECK",
    "DEFAULT",
    "COLLATE",
    "REFERENCES",
    "GENERATED",
    "AS",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDecl {
    tokens: Vec<Token>,
}

impl ColumnDecl {
    fn name_index(&self) -> Option<usize> {
        self.tokens.iter().position(|t| !t.is_trivia())
    }

    pub fn name(&self) -> String {
        self.name_index()
            .and_then(|i| self.tokens[i].ident_value())
            .unwrap_or_default()
    }

    /// The declared type as written, e.g. `VARCHAR(20)`; empty when the column has none.
    pub fn declared_type(&self) -> String {
        let Some(start) = self.name_index() else {
            return String::new();
        };

        let mut depth = 0usize;
        let mut end = start + 1;
        for (i, token) in self.tokens.iter().enumerate().skip(start + 1) {
            if depth == 0
                && COLUMN_CONSTRAINT_KEYWORDS
                    .iter()
                    .any(|kw| token.is_keyword(kw))
            {
                break;
            }
            if token.is_punct('(') {
                depth += 1;
            } else if token.is_punct(')') {
                depth = depth.saturating_sub(1);
            }
            if !token.is_trivia() {
                end = i + 1;
            }
        }

        render(&self.tokens[start + 1..end]).trim().to_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionItem {
    Column(ColumnDecl),
    Constraint(Vec<Token>),
}

impl DefinitionItem {
    fn tokens_mut(&mut self) -> &mut Vec<Token> {
        match self {
            DefinitionItem::Column(decl) => &mut decl.tokens,
            DefinitionItem::Constraint(tokens) => tokens,
        }
    }

    fn tokens(&self) -> &[Token] {
        match self {
            DefinitionItem::Column(decl) => &decl.tokens,
            DefinitionItem::Constraint(tokens) => tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    head: Vec<Token>,
    items: Vec<DefinitionItem>,
    tail: Vec<Token>,
}

impl TableDefinition {
    pub fn parse(sql: &str) -> Result<Self, VaultError> {
        let tokens = tokenize(sql);

        let open = tokens
            .iter()
            .position(|t| t.is_punct('('))
            .ok_or_else(|| unsupported(sql))?;

        let mut items = Vec::new();
        let mut current: Vec<Token> = Vec::new();
        let mut depth = 0usize;
        let mut close = None;

        for (i, token) in tokens.iter().enumerate().skip(open + 1) {
            if token.is_punct('(') {
                depth += 1;
            } else if token.is_punct(')') {
                if depth == 0 {
                    close = Some(i);
                    break;
                }
                depth -= 1;
            } else if token.is_punct(',') && depth == 0 {
                items.push(classify(std::mem::take(&mut current)));
                continue;
            }
            current.push(token.clone());
        }

        let close = close.ok_or_else(|| unsupported(sql))?;
        items.push(classify(current));

        Ok(TableDefinition {
            head: tokens[..=open].to_vec(),
            items,
            tail: tokens[close..].to_vec(),
        })
    }

    pub fn columns(&self) -> impl Iterator<Item = &ColumnDecl> {
        self.items.iter().filter_map(|item| match item {
            DefinitionItem::Column(decl) => Some(decl),
            DefinitionItem::Constraint(_) => None,
        })
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns().map(ColumnDecl::name).collect()
    }

    /// Renames the declaration of `old_name` and every reference to it from constraint
    /// expressions of this table. Columns of other tables named after `REFERENCES` keep
    /// their names.
    pub fn rename_column(&mut self, old_name: &str, new_name: &str) -> Result<(), VaultError> {
        let mut declared = 0;

        for item in self.items.iter_mut() {
            if let DefinitionItem::Column(decl) = item {
                if let Some(i) = decl.name_index() {
                    if decl.tokens[i].names(old_name) {
                        decl.tokens[i].rename(new_name);
                        declared += 1;
                    }
                }
            }
            rename_nested_references(item.tokens_mut(), old_name, new_name);
        }

        match declared {
            1 => Ok(()),
            0 => Err(VaultError::SchemaNotFound(format!(
                "column '{}' is not declared in the table definition",
                old_name
            ))),
            _ => Err(VaultError::IntegrityViolation(format!(
                "column '{}' is declared more than once",
                old_name
            ))),
        }
    }

    pub fn to_sql(&self) -> String {
        let body: Vec<String> = self.items.iter().map(|item| render(item.tokens())).collect();
        format!("{}{}{}", render(&self.head), body.join(","), render(&self.tail))
    }
}

fn unsupported(sql: &str) -> VaultError {
    VaultError::Error(format!("Unsupported table definition: {}", sql))
}

fn classify(tokens: Vec<Token>) -> DefinitionItem {
    let is_constraint = tokens
        .iter()
        .find(|t| !t.is_trivia())
        .is_some_and(|t| CONSTRAINT_KEYWORDS.iter().any(|kw| t.is_keyword(kw)));

    if is_constraint {
        DefinitionItem::Constraint(tokens)
    } else {
        DefinitionItem::Column(ColumnDecl { tokens })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ReferenceState {
    None,
    ExpectTable,
    ExpectColumns,
}

/// Renames identifiers inside parenthesised groups (CHECK, GENERATED, key column lists),
/// skipping the column list that follows `REFERENCES <table>`.
fn rename_nested_references(tokens: &mut [Token], old_name: &str, new_name: &str) {
    let mut depth = 0usize;
    let mut skip_until_depth: Option<usize> = None;
    let mut state = ReferenceState::None;

    for token in tokens.iter_mut() {
        if token.is_trivia() {
            continue;
        }

        if depth == 0 && skip_until_depth.is_none() {
            match state {
                ReferenceState::ExpectTable if token.ident_value().is_some() => {
                    state = ReferenceState::ExpectColumns;
                    continue;
                }
                ReferenceState::ExpectColumns if token.is_punct('(') => {
                    state = ReferenceState::None;
                    skip_until_depth = Some(0);
                    depth += 1;
                    continue;
                }
                _ => state = ReferenceState::None,
            }
            if token.is_keyword("REFERENCES") {
                state = ReferenceState::ExpectTable;
                continue;
            }
        }

        if token.is_punct('(') {
            depth += 1;
        } else if token.is_punct(')') {
            depth = depth.saturating_sub(1);
            if skip_until_depth == Some(depth) {
                skip_until_depth = None;
            }
        } else if depth > 0 && skip_until_depth.is_none() && token.names(old_name) {
            token.rename(new_name);
        }
    }
}

/// Rewrites an index or trigger definition so it refers to the renamed column. Only the
/// part after the object's own name and target table is touched.
pub fn rename_in_dependent(sql: &str, old_name: &str, new_name: &str) -> String {
    let mut tokens = tokenize(sql);

    let is_trigger = tokens.iter().any(|t| t.is_keyword("TRIGGER"));
    let start = if is_trigger {
        // CREATE [TEMP] TRIGGER [IF NOT EXISTS] name ...
        let trigger_kw = tokens.iter().position(|t| t.is_keyword("TRIGGER")).unwrap_or(0);
        tokens
            .iter()
            .enumerate()
            .skip(trigger_kw + 1)
            .filter(|(_, t)| t.ident_value().is_some())
            .find(|(_, t)| !(t.is_keyword("IF") || t.is_keyword("NOT") || t.is_keyword("EXISTS")))
            .map(|(i, _)| i + 1)
            .unwrap_or(tokens.len())
    } else {
        tokens
            .iter()
            .position(|t| t.is_punct('('))
            .unwrap_or(tokens.len())
    };

    for token in tokens.iter_mut().skip(start) {
        if matches!(token.kind(), TokenKind::Ident | TokenKind::QuotedIdent) && token.names(old_name) {
            token.rename(new_name);
        }
    }

    render(&tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const PATIENTS_SQL: &str = "CREATE TABLE patients (\n    id INTEGER PRIMARY KEY AUTOINCREMENT,\n    nidaanId TEXT UNIQUE NOT NULL,\n    name TEXT,\n    age INTEGER\n)";

    #[test]
    fn test_parse_columns_and_types() {
        let def = TableDefinition::parse(PATIENTS_SQL).unwrap();
        assert_eq!(def.column_names(), vec!["id", "nidaanId", "name", "age"]);

        let types: Vec<String> = def.columns().map(ColumnDecl::declared_type).collect();
        assert_eq!(types, vec!["INTEGER", "TEXT", "TEXT", "INTEGER"]);

        let def = TableDefinition::parse("CREATE TABLE t (a TEXT -- note\n NOT NULL, b VARCHAR(20) /* x */, c)").unwrap();
        let types: Vec<String> = def.columns().map(ColumnDecl::declared_type).collect();
        assert_eq!(types, vec!["TEXT", "VARCHAR(20)", ""]);
    }

    #[test]
    fn test_to_sql_is_lossless() {
        let def = TableDefinition::parse(PATIENTS_SQL).unwrap();
        assert_eq!(def.to_sql(), PATIENTS_SQL);
    }

    #[test]
    fn test_rename_simple_column() {
        let mut def = TableDefinition::parse(PATIENTS_SQL).unwrap();
        def.rename_column("nidaanId", "patientId").unwrap();
        assert_eq!(
            def.to_sql(),
            "CREATE TABLE patients (\n    id INTEGER PRIMARY KEY AUTOINCREMENT,\n    patientId TEXT UNIQUE NOT NULL,\n    name TEXT,\n    age INTEGER\n)"
        );
    }

    #[test]
    fn test_rename_does_not_touch_substring_identifiers() {
        let sql = "CREATE TABLE visits (visit_id INTEGER, visit TEXT DEFAULT 'visit', visit_count INTEGER)";
        let mut def = TableDefinition::parse(sql).unwrap();
        def.rename_column("visit", "reason").unwrap();
        assert_eq!(
            def.to_sql(),
            "CREATE TABLE visits (visit_id INTEGER, reason TEXT DEFAULT 'visit', visit_count INTEGER)"
        );
    }

    #[test]
    fn test_rename_does_not_touch_table_name_or_types() {
        let sql = "CREATE TABLE date (id INTEGER, date DATE, created date)";
        let mut def = TableDefinition::parse(sql).unwrap();
        def.rename_column("date", "visit_date").unwrap();
        assert_eq!(
            def.to_sql(),
            "CREATE TABLE date (id INTEGER, visit_date DATE, created date)"
        );
    }

    #[test]
    fn test_rename_updates_constraints_but_not_foreign_columns() {
        let sql = "CREATE TABLE invoices (\n  id INTEGER,\n  nidaanId TEXT CHECK (length(nidaanId) > 0) REFERENCES patients(nidaanId),\n  total REAL,\n  UNIQUE (id, nidaanId),\n  FOREIGN KEY (nidaanId) REFERENCES patients (nidaanId) ON DELETE CASCADE\n)";
        let mut def = TableDefinition::parse(sql).unwrap();
        def.rename_column("nidaanId", "patientId").unwrap();
        assert_eq!(
            def.to_sql(),
            "CREATE TABLE invoices (\n  id INTEGER,\n  patientId TEXT CHECK (length(patientId) > 0) REFERENCES patients(nidaanId),\n  total REAL,\n  UNIQUE (id, patientId),\n  FOREIGN KEY (patientId) REFERENCES patients (nidaanId) ON DELETE CASCADE\n)"
        );
    }

    #[test]
    fn test_rename_quoted_column() {
        let sql = "CREATE TABLE \"reports\" (\"id\" INTEGER, \"nidaan_id\" TEXT)";
        let mut def = TableDefinition::parse(sql).unwrap();
        def.rename_column("nidaan_id", "patient_id").unwrap();
        assert_eq!(
            def.to_sql(),
            "CREATE TABLE \"reports\" (\"id\" INTEGER, \"patient_id\" TEXT)"
        );
    }

    #[test]
    fn test_rename_missing_column_is_schema_not_found() {
        let mut def = TableDefinition::parse(PATIENTS_SQL).unwrap();
        let result = def.rename_column("nope", "still_nope");
        assert!(matches!(result, Err(VaultError::SchemaNotFound(_))));
    }

    #[test]
    fn test_parse_rejects_create_as_select() {
        assert!(TableDefinition::parse("CREATE TABLE t AS SELECT 1").is_err());
    }

    #[test]
    fn test_without_rowid_tail_preserved() {
        let sql = "CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT) WITHOUT ROWID";
        let mut def = TableDefinition::parse(sql).unwrap();
        def.rename_column("v", "value").unwrap();
        assert_eq!(
            def.to_sql(),
            "CREATE TABLE kv (k TEXT PRIMARY KEY, value TEXT) WITHOUT ROWID"
        );
    }

    #[test]
    fn test_rename_in_index() {
        let sql = "CREATE INDEX idx_nidaanId ON patients (nidaanId, name) WHERE nidaanId IS NOT NULL";
        assert_eq!(
            rename_in_dependent(sql, "nidaanId", "patientId"),
            "CREATE INDEX idx_nidaanId ON patients (patientId, name) WHERE patientId IS NOT NULL"
        );
    }

    #[test]
    fn test_rename_in_trigger() {
        let sql = "CREATE TRIGGER IF NOT EXISTS nidaanId AFTER UPDATE OF nidaanId ON patients BEGIN SELECT NEW.nidaanId; END";
        assert_eq!(
            rename_in_dependent(sql, "nidaanId", "patientId"),
            "CREATE TRIGGER IF NOT EXISTS nidaanId AFTER UPDATE OF patientId ON patients BEGIN SELECT NEW.patientId; END"
        );
    }

    proptest! {
        #[test]
        fn prop_rename_touches_only_the_target_column(other in "c_[a-z0-9_]{0,10}") {
            let sql = format!(
                "CREATE TABLE t (id INTEGER PRIMARY KEY, nidaanId TEXT, {} TEXT DEFAULT 'nidaanId', \
                 CHECK (length(nidaanId) > 0))",
                other
            );
            let mut definition = TableDefinition::parse(&sql).unwrap();
            definition.rename_column("nidaanId", "patientId").unwrap();

            prop_assert_eq!(
                definition.column_names(),
                vec!["id".to_string(), "patientId".to_string(), other.clone()]
            );
            let rendered = definition.to_sql();
            prop_assert!(rendered.contains("DEFAULT 'nidaanId'"));
            prop_assert!(rendered.contains("length(patientId)"));
        }
    }
}
