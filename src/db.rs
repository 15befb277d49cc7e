use rusqlite::Connection;
use std::sync::Mutex;

pub struct Db {
    pub conn: Mutex<Connection>,
}

/// Generate a plaintext API key: `aw_sk_<64 hex chars>`, per bootstrap.py's scheme.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    getrandom(&mut bytes);
    format!("aw_sk_{}", hex::encode(bytes))
}

fn getrandom(buf: &mut [u8]) {
    use rand_core::RngCore;
    rand_core::OsRng.fill_bytes(buf);
}

impl Db {
    pub fn new(path: &str) -> Self {
        let conn = Connection::open(path).expect("Failed to open database");
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .expect("Failed to set pragmas");
        let db = Db {
            conn: Mutex::new(conn),
        };
        db.migrate();
        db
    }

    pub fn in_memory() -> Self {
        let conn = Connection::open_in_memory().expect("Failed to open in-memory database");
        conn.execute_batch("PRAGMA foreign_keys=ON;").ok();
        let db = Db {
            conn: Mutex::new(conn),
        };
        db.migrate();
        db
    }

    fn migrate(&self) {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tenants (
                project_id TEXT PRIMARY KEY,
                slug TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS agents (
                agent_id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES tenants(project_id),
                alias TEXT NOT NULL,
                display_name TEXT NOT NULL DEFAULT '',
                kind TEXT NOT NULL DEFAULT 'agent',
                access_policy TEXT NOT NULL DEFAULT 'open',
                did TEXT,
                public_key TEXT,
                custody TEXT,
                signing_key_enc BLOB,
                lifetime TEXT NOT NULL DEFAULT 'persistent',
                status TEXT NOT NULL DEFAULT 'active',
                successor_agent_id TEXT,
                created_at TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_agents_live_alias
                ON agents(project_id, alias) WHERE deleted_at IS NULL;
            CREATE INDEX IF NOT EXISTS idx_agents_project ON agents(project_id);

            CREATE TABLE IF NOT EXISTS api_keys (
                api_key_id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES tenants(project_id),
                agent_id TEXT REFERENCES agents(agent_id),
                key_hash TEXT NOT NULL UNIQUE,
                key_prefix TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                last_used_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_api_keys_hash ON api_keys(key_hash);

            CREATE TABLE IF NOT EXISTS agent_log (
                entry_id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                operation TEXT NOT NULL,
                prior_did TEXT,
                new_did TEXT,
                signer_did TEXT,
                entry_signature TEXT,
                metadata TEXT DEFAULT '{}',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_agent_log_agent ON agent_log(agent_id, created_at);

            CREATE TABLE IF NOT EXISTS rotation_announcements (
                announcement_id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                old_did TEXT NOT NULL,
                new_did TEXT NOT NULL,
                rotation_timestamp TEXT NOT NULL,
                old_key_signature TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rotation_announcements_agent
                ON rotation_announcements(agent_id, created_at);

            CREATE TABLE IF NOT EXISTS rotation_peer_acks (
                announcement_id TEXT NOT NULL REFERENCES rotation_announcements(announcement_id),
                peer_agent_id TEXT NOT NULL,
                acknowledged_at TEXT,
                PRIMARY KEY (announcement_id, peer_agent_id)
            );

            CREATE TABLE IF NOT EXISTS mail_messages (
                message_id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                from_agent_id TEXT NOT NULL,
                from_alias TEXT NOT NULL,
                to_agent_id TEXT NOT NULL,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                priority TEXT NOT NULL DEFAULT 'normal',
                thread_id TEXT,
                from_did TEXT,
                to_did TEXT,
                signature TEXT,
                signing_key_id TEXT,
                created_at TEXT NOT NULL,
                read_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_mail_recipient
                ON mail_messages(project_id, to_agent_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_mail_sender
                ON mail_messages(project_id, from_agent_id, created_at);

            CREATE TABLE IF NOT EXISTS chat_sessions (
                session_id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                participant_hash TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(project_id, participant_hash)
            );

            CREATE TABLE IF NOT EXISTS chat_session_participants (
                session_id TEXT NOT NULL REFERENCES chat_sessions(session_id),
                agent_id TEXT NOT NULL,
                alias TEXT NOT NULL,
                PRIMARY KEY (session_id, agent_id)
            );
            CREATE INDEX IF NOT EXISTS idx_chat_participants_agent
                ON chat_session_participants(agent_id);

            CREATE TABLE IF NOT EXISTS chat_messages (
                message_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES chat_sessions(session_id),
                from_agent_id TEXT NOT NULL,
                from_alias TEXT NOT NULL,
                body TEXT NOT NULL,
                sender_leaving INTEGER NOT NULL DEFAULT 0,
                hang_on INTEGER NOT NULL DEFAULT 0,
                from_did TEXT,
                to_did TEXT,
                signature TEXT,
                signing_key_id TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chat_messages_session
                ON chat_messages(session_id, created_at);

            CREATE TABLE IF NOT EXISTS chat_read_receipts (
                session_id TEXT NOT NULL REFERENCES chat_sessions(session_id),
                agent_id TEXT NOT NULL,
                last_read_message_id TEXT,
                last_read_at TEXT,
                PRIMARY KEY (session_id, agent_id)
            );

            CREATE TABLE IF NOT EXISTS reservations (
                project_id TEXT NOT NULL,
                resource_key TEXT NOT NULL,
                holder_agent_id TEXT NOT NULL,
                holder_alias TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                metadata TEXT DEFAULT '{}',
                PRIMARY KEY (project_id, resource_key)
            );
            CREATE INDEX IF NOT EXISTS idx_reservations_expiry
                ON reservations(project_id, expires_at);

            CREATE TABLE IF NOT EXISTS contacts (
                contact_id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                address TEXT NOT NULL,
                label TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(project_id, address)
            );
            ",
        )
        .expect("Failed to run migrations");
    }
}
