pub const SCHEMA: &str = r#"
-- Modules group branches; names are unique and immutable
CREATE TABLE IF NOT EXISTS modules (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE CHECK (length(name) <= 64),
    created_at TEXT NOT NULL
);

-- Branches own an index sequence; latest_index_id tracks its maximum
CREATE TABLE IF NOT EXISTS branches (
    id TEXT PRIMARY KEY,
    module_id TEXT NOT NULL REFERENCES modules(id) ON DELETE RESTRICT,
    name TEXT NOT NULL CHECK (length(name) <= 64),
    latest_index_id TEXT REFERENCES build_indexes(id) ON DELETE RESTRICT,
    created_at TEXT NOT NULL,

    UNIQUE(module_id, name)
);

-- Build indexes: values per branch form the contiguous sequence 1..N
CREATE TABLE IF NOT EXISTS build_indexes (
    id TEXT PRIMARY KEY,
    branch_id TEXT NOT NULL REFERENCES branches(id) ON DELETE RESTRICT,
    commit_ref TEXT NOT NULL CHECK (length(commit_ref) = 40),
    value INTEGER NOT NULL CHECK (value >= 1),
    created_at TEXT NOT NULL,      -- RFC 3339, fixed microsecond precision, UTC

    UNIQUE(branch_id, value),
    UNIQUE(branch_id, id)
);

-- Principals
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT,            -- argon2id PHC string, NULL = key-only user
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

-- Access keys for CI clients, always owned by a user
CREATE TABLE IF NOT EXISTS access_keys (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    label TEXT CHECK (length(label) <= 64),
    key_lookup TEXT NOT NULL UNIQUE,   -- public half of bidx_<lookup>_<secret>
    secret_hash TEXT NOT NULL,         -- argon2id PHC string of the secret half
    scope TEXT,                        -- grant expression narrowing the key, NULL = owner's grants
    created_at TEXT NOT NULL,
    expires_at TEXT,                   -- NULL = never
    last_used_at TEXT
);

-- One row per leaf scope string a user holds
CREATE TABLE IF NOT EXISTS permission_grants (
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    scope TEXT NOT NULL CHECK (length(scope) <= 150),
    created_at TEXT DEFAULT (datetime('now')),
    PRIMARY KEY (user_id, scope)
);

-- Create indexes
CREATE INDEX IF NOT EXISTS idx_branches_module ON branches(module_id);
CREATE INDEX IF NOT EXISTS idx_build_indexes_commit ON build_indexes(branch_id, commit_ref);
CREATE INDEX IF NOT EXISTS idx_access_keys_user ON access_keys(user_id);
"#;
