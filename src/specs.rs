use std::fmt;

/// One column rename the engine knows how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRenameSpec {
    pub db_file: &'static str,
    pub table: &'static str,
    pub old_column: &'static str,
    pub new_column: &'static str,
}

impl ColumnRenameSpec {
    pub const fn new(
        db_file: &'static str,
        table: &'static str,
        old_column: &'static str,
        new_column: &'static str,
    ) -> Self {
        Self {
            db_file,
            table,
            old_column,
            new_column,
        }
    }
}

impl fmt::Display for ColumnRenameSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}.{} -> {}",
            self.db_file, self.table, self.old_column, self.new_column
        )
    }
}

/// A database file that was renamed between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseFileRename {
    pub legacy_name: &'static str,
    pub current_name: &'static str,
}

pub const FILE_RENAMES: [DatabaseFileRename; 1] = [DatabaseFileRename {
    legacy_name: "nidaan_cms.db",
    current_name: "patient_cms.db",
}];

/// Ordered by database file so a run touches each file in one contiguous pass.
pub const COLUMN_RENAMES: [ColumnRenameSpec; 5] = [
    ColumnRenameSpec::new("patient_cms.db", "patients", "nidaanId", "patientId"),
    ColumnRenameSpec::new("patient_cms.db", "invoices", "nidaanId", "patientId"),
    ColumnRenameSpec::new("report_tracker.db", "reports", "nidaanId", "patientId"),
    ColumnRenameSpec::new("polyclinic.db", "polyclinic_bookings", "nidaan_id", "patient_id"),
    ColumnRenameSpec::new("datasheet.db", "invoice_records", "nidaanId", "patientId"),
];

/// The rename whose state stands in for the whole migration when deciding whether a run
/// is needed at all.
pub const IDEMPOTENCY_PROBE: ColumnRenameSpec = COLUMN_RENAMES[0];

/// Groups renames by database file, preserving declaration order.
pub fn group_by_file(specs: &[ColumnRenameSpec]) -> Vec<(&'static str, Vec<ColumnRenameSpec>)> {
    let mut groups: Vec<(&'static str, Vec<ColumnRenameSpec>)> = Vec::new();
    for spec in specs {
        match groups.iter_mut().find(|(file, _)| *file == spec.db_file) {
            Some((_, group)) => group.push(*spec),
            None => groups.push((spec.db_file, vec![*spec])),
        }
    }
    groups
}
