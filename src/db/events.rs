use chrono::Utc;
use rusqlite::params;

use super::*;

impl ResearchDb {
    // =========================================================================
    // Events (append-only)
    // =========================================================================

    /// Append an event to a company's timeline. Events are never mutated or
    /// deleted; merges re-point them wholesale.
    pub fn record_event(
        &self,
        company_id: &str,
        event_type: &str,
        details: Option<&serde_json::Value>,
    ) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO events (company_id, event_type, occurred_at, details)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                company_id,
                event_type,
                Utc::now().to_rfc3339(),
                details.map(|d| d.to_string()),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// A company's events, oldest first.
    pub fn get_events_for_company(&self, company_id: &str) -> Result<Vec<DbEvent>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, company_id, event_type, occurred_at, details
             FROM events WHERE company_id = ?1 ORDER BY occurred_at, id",
        )?;
        let rows = stmt.query_map(params![company_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, company_id, event_type, occurred_at, details) = row?;
            out.push(DbEvent {
                id,
                company_id,
                event_type,
                occurred_at,
                details: match details {
                    Some(text) => Some(serde_json::from_str(&text)?),
                    None => None,
                },
            });
        }
        Ok(out)
    }
}
