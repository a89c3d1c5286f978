//! SQL schema for the Forma metadata tables.
//!
//! Executed once at connection startup. Entity tables are not declared here;
//! they are created by published DDL scripts.

/// Metadata DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS entity_definitions (
    definition_id  TEXT PRIMARY KEY,
    namespace      TEXT NOT NULL,
    entity_name    TEXT NOT NULL,
    route          TEXT NOT NULL,
    display_name   TEXT NOT NULL,      -- JSON locale map
    description    TEXT NOT NULL,      -- JSON locale map
    structure      TEXT NOT NULL,      -- 'single' | 'master_detail'
    status         TEXT NOT NULL,      -- 'draft' | 'published' | 'modified'
    is_locked      INTEGER NOT NULL,
    is_enabled     INTEGER NOT NULL,
    parent_json    TEXT,               -- JSON ParentLink or NULL
    revision       INTEGER NOT NULL DEFAULT 0,
    applied_schema TEXT,               -- JSON AppliedSchema or NULL
    created_at     TEXT NOT NULL,
    created_by     TEXT,
    updated_at     TEXT NOT NULL,
    updated_by     TEXT,
    UNIQUE (namespace, entity_name)
);

CREATE TABLE IF NOT EXISTS sub_entity_definitions (
    sub_entity_id      TEXT PRIMARY KEY,
    definition_id      TEXT NOT NULL REFERENCES entity_definitions(definition_id),
    position           INTEGER NOT NULL,
    code               TEXT NOT NULL,
    display_name       TEXT NOT NULL,
    description        TEXT NOT NULL,
    sort_order         INTEGER NOT NULL,
    default_sort_field TEXT,
    sort_descending    INTEGER NOT NULL,
    foreign_key_field  TEXT,
    collection_name    TEXT,
    cascade_behavior   TEXT NOT NULL,
    published_revision INTEGER,
    UNIQUE (definition_id, code)
);

-- Root fields have a NULL sub_entity_id.
CREATE TABLE IF NOT EXISTS field_metadata (
    field_id             TEXT PRIMARY KEY,
    definition_id        TEXT NOT NULL REFERENCES entity_definitions(definition_id),
    sub_entity_id        TEXT REFERENCES sub_entity_definitions(sub_entity_id),
    position             INTEGER NOT NULL,
    parent_field_id      TEXT,
    property_name        TEXT NOT NULL,
    display_name         TEXT NOT NULL,
    data_type            TEXT NOT NULL,
    length               INTEGER,
    precision            INTEGER,
    scale                INTEGER,
    is_required          INTEGER NOT NULL,
    is_entity_ref        INTEGER NOT NULL,
    referenced_entity_id TEXT,
    on_delete            TEXT NOT NULL,
    lookup_display_field TEXT,
    enum_code            TEXT,
    default_value        TEXT,
    validation_rules     TEXT,           -- JSON or NULL
    sort_order           INTEGER NOT NULL,
    source               TEXT NOT NULL,  -- 'system' | 'interface' | 'custom'
    published_revision   INTEGER,
    is_deleted           INTEGER NOT NULL DEFAULT 0,
    deleted_at           TEXT,
    deleted_by           TEXT
);

CREATE TABLE IF NOT EXISTS entity_interfaces (
    interface_id  TEXT PRIMARY KEY,
    definition_id TEXT NOT NULL REFERENCES entity_definitions(definition_id),
    kind          TEXT NOT NULL,
    is_enabled    INTEGER NOT NULL,
    is_locked     INTEGER NOT NULL,
    UNIQUE (definition_id, kind)
);

-- DDL history is append-only: rows are never deleted and leave the
-- 'pending' state exactly once.
CREATE TABLE IF NOT EXISTS ddl_scripts (
    script_id     TEXT PRIMARY KEY,
    definition_id TEXT NOT NULL REFERENCES entity_definitions(definition_id),
    script_type   TEXT NOT NULL,   -- 'create' | 'alter'
    script        TEXT NOT NULL,
    status        TEXT NOT NULL,   -- 'pending' | 'executed' | 'failed'
    created_at    TEXT NOT NULL,
    created_by    TEXT,
    executed_at   TEXT,
    error_message TEXT
);

CREATE TRIGGER IF NOT EXISTS ddl_scripts_no_delete
BEFORE DELETE ON ddl_scripts
BEGIN
    SELECT RAISE(ABORT, 'ddl_scripts is append-only');
END;

CREATE TRIGGER IF NOT EXISTS ddl_scripts_finalized
BEFORE UPDATE ON ddl_scripts
WHEN OLD.status <> 'pending' OR NEW.script <> OLD.script
BEGIN
    SELECT RAISE(ABORT, 'ddl script is already finalized');
END;

CREATE INDEX IF NOT EXISTS field_metadata_definition_idx ON field_metadata(definition_id);
CREATE INDEX IF NOT EXISTS sub_entity_definition_idx     ON sub_entity_definitions(definition_id);
CREATE INDEX IF NOT EXISTS ddl_scripts_definition_idx    ON ddl_scripts(definition_id);

PRAGMA user_version = 1;
";
