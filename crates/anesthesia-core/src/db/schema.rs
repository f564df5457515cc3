//! SQLite schema definition.

/// Tables for infusions, their rate history, boluses and the audit chain.
///
/// Timestamps are RFC 3339 strings in UTC with millisecond precision, so
/// text order matches time order.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Constant-rate infusions
-- ============================================================================

CREATE TABLE IF NOT EXISTS cri_infusions (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL,
    name TEXT NOT NULL,
    rate REAL NOT NULL,                          -- rate of the last history row
    unit TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT,                               -- NULL while running
    administered_by TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_cri_patient ON cri_infusions(patient_id, start_time);

CREATE TABLE IF NOT EXISTS cri_rate_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cri_id TEXT NOT NULL REFERENCES cri_infusions(id) ON DELETE CASCADE,
    timestamp TEXT NOT NULL,
    rate REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rate_history_cri ON cri_rate_history(cri_id, timestamp);

-- ============================================================================
-- Boluses
-- ============================================================================

CREATE TABLE IF NOT EXISTS boluses (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL,
    name TEXT NOT NULL,
    dose REAL NOT NULL,
    unit TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    administered_by TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_bolus_patient ON boluses(patient_id, timestamp);

-- ============================================================================
-- Audit chain (append-only, one chain per patient)
-- ============================================================================

CREATE TABLE IF NOT EXISTS audit_entries (
    patient_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    payload TEXT NOT NULL,                       -- canonical JSON of the event
    prev_hash TEXT NOT NULL,
    hash TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (patient_id, sequence)
);

CREATE TRIGGER IF NOT EXISTS audit_entries_no_update BEFORE UPDATE ON audit_entries
BEGIN
    SELECT RAISE(ABORT, 'Audit entries are append-only');
END;

CREATE TRIGGER IF NOT EXISTS audit_entries_no_delete BEFORE DELETE ON audit_entries
BEGIN
    SELECT RAISE(ABORT, 'Audit entries are append-only');
END;
"#;
