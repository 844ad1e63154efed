//! SQL schema definitions.

/// Complete schema for the Weft v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Identities
-- ============================================================

CREATE TABLE IF NOT EXISTS identities (
    peer_id TEXT PRIMARY KEY,
    signing_seed BLOB NOT NULL,
    agreement_secret BLOB NOT NULL,
    display_name TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    is_primary INTEGER NOT NULL DEFAULT 0
);

-- ============================================================
-- Peers
-- ============================================================

CREATE TABLE IF NOT EXISTS peers (
    peer_id TEXT PRIMARY KEY,
    signing_key BLOB NOT NULL,
    agreement_key BLOB,
    last_seen INTEGER NOT NULL,
    reputation INTEGER NOT NULL DEFAULT 50,
    blacklisted INTEGER NOT NULL DEFAULT 0,
    bootstrap_hints TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_peers_last_seen ON peers(last_seen);

-- ============================================================
-- Routes
-- ============================================================

CREATE TABLE IF NOT EXISTS routes (
    destination TEXT PRIMARY KEY,
    next_hop TEXT NOT NULL,
    hop_count INTEGER NOT NULL,
    metric INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_routes_expires ON routes(expires_at);

-- ============================================================
-- Session keys
-- ============================================================

CREATE TABLE IF NOT EXISTS session_keys (
    peer_id TEXT NOT NULL,
    direction TEXT NOT NULL CHECK (direction IN ('tx', 'rx')),
    rotation INTEGER NOT NULL,
    key BLOB NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    PRIMARY KEY (peer_id, direction, rotation)
);

CREATE INDEX IF NOT EXISTS idx_session_keys_expires ON session_keys(expires_at);

-- ============================================================
-- Store-and-forward queue
-- ============================================================

CREATE TABLE IF NOT EXISTS queued_messages (
    id BLOB PRIMARY KEY,
    destination TEXT NOT NULL,
    payload BLOB NOT NULL,
    priority INTEGER NOT NULL DEFAULT 1,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_attempt_at INTEGER,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_queue_destination ON queued_messages(destination);
CREATE INDEX IF NOT EXISTS idx_queue_expires ON queued_messages(expires_at);

-- ============================================================
-- Conversations & messages
-- ============================================================

CREATE TABLE IF NOT EXISTS conversations (
    id BLOB PRIMARY KEY,
    peer_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    last_activity INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id BLOB PRIMARY KEY,
    conversation_id BLOB NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    sender TEXT NOT NULL,
    recipient TEXT NOT NULL,
    kind INTEGER NOT NULL,
    content BLOB NOT NULL,
    timestamp INTEGER NOT NULL,
    status TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp);

-- ============================================================
-- Meta (scrub tokens, bookkeeping)
-- ============================================================

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
