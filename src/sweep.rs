//! Background reservation sweeper (C8 ambient half): periodically deletes
//! rows whose `expires_at` has passed.
//!
//! `reservations::acquire`/`list` already treat an expired row as logically
//! absent on read, so this is a housekeeping pass rather than a correctness
//! requirement — grounded on the teacher's `retention::spawn_retention_task`
//! shape (a detached task holding its own `Connection`, sleeping between
//! sweeps) rather than sharing the request-path `Mutex<Connection>`.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

const SWEEP_INTERVAL_SECS: u64 = 60;

pub fn spawn_reservation_sweeper(db_path: String) {
    tokio::spawn(async move {
        let conn = Arc::new(Mutex::new(match Connection::open(&db_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "reservation sweeper: failed to open database");
                return;
            }
        }));

        tokio::time::sleep(std::time::Duration::from_secs(30)).await;

        loop {
            {
                let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
                let now = chrono::Utc::now().to_rfc3339();
                match conn.execute("DELETE FROM reservations WHERE expires_at <= ?1", [&now]) {
                    Ok(deleted) if deleted > 0 => tracing::debug!(deleted, "swept expired reservations"),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "reservation sweep failed"),
                }
            }
            tokio::time::sleep(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS)).await;
        }
    });
}
