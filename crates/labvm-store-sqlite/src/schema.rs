//! SQL schema for the catalog.
//!
//! Executed once at connection startup. The constraints here are the
//! catalog's integrity invariants; the Rust side relies on them rather than
//! re-checking before every insert.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS subjects (
    subject_id  TEXT PRIMARY KEY,
    vlan        INTEGER NOT NULL UNIQUE CHECK (vlan BETWEEN 2 AND 4094)
);

CREATE TABLE IF NOT EXISTS vms (
    id                  TEXT PRIMARY KEY,
    description         TEXT UNIQUE,
    is_base             INTEGER NOT NULL DEFAULT 0,
    is_template         INTEGER NOT NULL DEFAULT 0,
    depends_on          TEXT REFERENCES vms(id),
    subject_id          TEXT REFERENCES subjects(subject_id),
    vm_vlan_identifier  INTEGER CHECK (vm_vlan_identifier BETWEEN 2 AND 254),
    owner_id            TEXT,
    -- session columns; all NULL while no session is active
    session_start       TEXT,
    session_end         TEXT,
    reminder_sent       INTEGER,
    reminder_token      TEXT UNIQUE,

    CHECK (NOT (is_base AND is_template)),
    CHECK (NOT (is_base OR is_template)
           OR (depends_on IS NULL AND subject_id IS NULL AND vm_vlan_identifier IS NULL)),
    CHECK ((subject_id IS NULL) = (vm_vlan_identifier IS NULL)),
    CHECK (is_base OR is_template OR (depends_on IS NOT NULL AND subject_id IS NOT NULL)),
    UNIQUE (subject_id, vm_vlan_identifier)
);

CREATE TABLE IF NOT EXISTS users (
    user_id  TEXT PRIMARY KEY,
    email    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS vms_subject_idx     ON vms(subject_id);
CREATE INDEX IF NOT EXISTS vms_depends_on_idx  ON vms(depends_on);
CREATE INDEX IF NOT EXISTS vms_session_end_idx ON vms(session_end);

PRAGMA user_version = 1;
";
