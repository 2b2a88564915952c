use rusqlite::{params, OptionalExtension};

use super::*;

impl ResearchDb {
    // =========================================================================
    // Messages
    // =========================================================================

    pub fn insert_message(&self, message: &DbMessage) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO messages (id, company_id, direction, subject, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id,
                message.company_id,
                message.direction.as_str(),
                message.subject,
                message.body,
                message.created_at,
            ],
        )?;
        Ok(())
    }

    /// Newest message in the given direction for a company. Reply generation
    /// drafts against the latest inbound; send-and-archive ships the latest
    /// outbound.
    pub fn latest_message(
        &self,
        company_id: &str,
        direction: MessageDirection,
    ) -> Result<Option<DbMessage>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, company_id, direction, subject, body, created_at
                 FROM messages WHERE company_id = ?1 AND direction = ?2
                 ORDER BY created_at DESC LIMIT 1",
                params![company_id, direction.as_str()],
                Self::map_message_row,
            )
            .optional()?)
    }

    /// All messages for a company, oldest first.
    pub fn get_messages_for_company(&self, company_id: &str) -> Result<Vec<DbMessage>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, company_id, direction, subject, body, created_at
             FROM messages WHERE company_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![company_id], Self::map_message_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub(crate) fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbMessage> {
        Ok(DbMessage {
            id: row.get(0)?,
            company_id: row.get(1)?,
            direction: MessageDirection::from_str_lossy(&row.get::<_, String>(2)?),
            subject: row.get(3)?,
            body: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}
