//! Fixture helpers shared by the unit tests.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::types::Value;
use rusqlite::Connection;

use crate::config::EnginePaths;

pub const PATIENTS_DDL: &str = "CREATE TABLE patients (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    nidaanId TEXT UNIQUE NOT NULL,
    name TEXT,
    age INTEGER,
    phone TEXT
)";

pub fn create_db(dir: &Path, name: &str, statements: &[&str]) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    let conn = Connection::open(&path).unwrap();
    for statement in statements {
        conn.execute_batch(statement).unwrap();
    }
    path
}

/// Every row of `sql`, each value rendered through its `Debug` form so types are visible.
pub fn query_rows(db: &Path, sql: &str) -> Vec<Vec<String>> {
    let conn = Connection::open(db).unwrap();
    let mut stmt = conn.prepare(sql).unwrap();
    let column_count = stmt.column_count();
    stmt.query_map([], |row| {
        (0..column_count)
            .map(|i| row.get::<_, Value>(i).map(|v| format!("{:?}", v)))
            .collect::<Result<Vec<_>, _>>()
    })
    .unwrap()
    .collect::<Result<Vec<_>, _>>()
    .unwrap()
}

/// A data directory laid out the way the host application lays it out.
pub fn fixture_paths(root: &Path) -> EnginePaths {
    let paths = EnginePaths::new(
        &root.join("databases"),
        &root.join("config.yaml"),
        &root.join("assets"),
    );
    fs::create_dir_all(&paths.db_dir).unwrap();
    fs::create_dir_all(&paths.assets_dir).unwrap();
    paths
}

/// Populates `paths.db_dir` with the four pre-migration clinic databases.
pub fn seed_legacy_databases(paths: &EnginePaths) {
    create_db(
        &paths.db_dir,
        "patient_cms.db",
        &[
            PATIENTS_DDL,
            "INSERT INTO patients (nidaanId, name, age, phone) VALUES
                ('NID-000001', 'Asha', 34, '555-0101'),
                ('NID-000002', 'Ravi', 45, '555-0102')",
            "CREATE TABLE invoices (
                id INTEGER PRIMARY KEY,
                nidaanId TEXT NOT NULL,
                amount REAL,
                issued_at TEXT
            )",
            "INSERT INTO invoices (nidaanId, amount, issued_at) VALUES
                ('NID-000001', 1200.5, '2025-01-15'),
                ('NID-000002', 300.0, '2025-01-16')",
        ],
    );
    create_db(
        &paths.db_dir,
        "report_tracker.db",
        &[
            "CREATE TABLE reports (id INTEGER PRIMARY KEY, nidaanId TEXT, status TEXT)",
            "INSERT INTO reports (nidaanId, status) VALUES ('NID-000001', 'ready')",
        ],
    );
    create_db(
        &paths.db_dir,
        "polyclinic.db",
        &[
            "CREATE TABLE polyclinic_bookings (id INTEGER PRIMARY KEY, nidaan_id TEXT, slot TEXT)",
            "INSERT INTO polyclinic_bookings (nidaan_id, slot) VALUES ('NID-000002', '10:30')",
        ],
    );
    create_db(
        &paths.db_dir,
        "datasheet.db",
        &[
            "CREATE TABLE invoice_records (id INTEGER PRIMARY KEY, nidaanId TEXT, total REAL)",
            "INSERT INTO invoice_records (nidaanId, total) VALUES ('NID-000001', 99.5)",
        ],
    );
}

pub fn db_bytes(paths: &EnginePaths) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = fs::read_dir(&paths.db_dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == "db"))
        .map(|p| {
            (
                p.file_name().unwrap().to_string_lossy().into_owned(),
                fs::read(&p).unwrap(),
            )
        })
        .collect();
    files.sort();
    files
}
