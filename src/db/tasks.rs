use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::*;
use crate::codec;

impl ResearchDb {
    // =========================================================================
    // Task queue
    // =========================================================================

    /// Enqueue a task. Status starts at `pending`; both timestamps are now.
    pub fn create_task(
        &self,
        task_type: TaskType,
        args: &serde_json::Value,
    ) -> Result<String, DbError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO tasks (id, task_type, args, status, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', '', ?4, ?4)",
            params![id, task_type.as_str(), args.to_string(), now],
        )?;
        log::info!("Enqueued {} task {}", task_type.as_str(), id);
        Ok(id)
    }

    /// Oldest pending task by creation time, or None.
    ///
    /// Deliberately does NOT mark the row running — that is the worker
    /// loop's job. If the process dies between dequeue and the status
    /// update, the task stays `pending` and is retried whole on restart
    /// (at-least-once, not exactly-once).
    pub fn get_next_pending_task(&self) -> Result<Option<DbTask>, DbError> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, task_type, args, status, result, error, created_at, updated_at
                 FROM tasks WHERE status = 'pending'
                 ORDER BY created_at, rowid LIMIT 1",
                [],
                Self::map_task_row,
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(Self::decode_task(raw)?)),
            None => Ok(None),
        }
    }

    /// Overwrite a task's status (and optionally result/error), bumping
    /// `updated_at`. Results go through the lossless task-result codec.
    pub fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<(), DbError> {
        let encoded = match result {
            Some(value) => Some(codec::encode_result(value)?),
            None => None,
        };
        let changed = self.conn.execute(
            "UPDATE tasks
             SET status = ?2,
                 result = COALESCE(?3, result),
                 error = COALESCE(?4, error),
                 updated_at = ?5
             WHERE id = ?1",
            params![
                id,
                status.as_str(),
                encoded,
                error,
                Utc::now().to_rfc3339(),
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("task {}", id)));
        }
        Ok(())
    }

    /// Update only the result payload of a task in place. Used by long
    /// handlers (bulk import) to publish running counters a polling client
    /// can render as progress.
    pub fn update_task_result(&self, id: &str, result: &serde_json::Value) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE tasks SET result = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, codec::encode_result(result)?, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Full task row for status polling.
    pub fn get_task(&self, id: &str) -> Result<Option<DbTask>, DbError> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, task_type, args, status, result, error, created_at, updated_at
                 FROM tasks WHERE id = ?1",
                params![id],
                Self::map_task_row,
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(Self::decode_task(raw)?)),
            None => Ok(None),
        }
    }

    fn map_task_row(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<(String, String, String, String, Option<String>, String, String, String)>
    {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
        ))
    }

    fn decode_task(
        raw: (String, String, String, String, Option<String>, String, String, String),
    ) -> Result<DbTask, DbError> {
        let (id, task_type, args, status, result, error, created_at, updated_at) = raw;
        let task_type = TaskType::parse(&task_type)
            .ok_or_else(|| DbError::Migration(format!("unknown task type '{}'", task_type)))?;
        Ok(DbTask {
            id,
            task_type,
            args: serde_json::from_str(&args)?,
            status: TaskStatus::from_str_lossy(&status),
            result: match result {
                Some(text) => Some(codec::decode_result(&text)?),
                None => None,
            },
            error,
            created_at,
            updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::temp_db;
    use super::*;

    #[test]
    fn test_create_and_dequeue_oldest_first() {
        let (_dir, db) = temp_db();
        let first = db
            .create_task(TaskType::Research, &serde_json::json!({"content": "a"}))
            .unwrap();
        let _second = db
            .create_task(TaskType::Research, &serde_json::json!({"content": "b"}))
            .unwrap();

        let next = db.get_next_pending_task().unwrap().expect("a pending task");
        assert_eq!(next.id, first, "oldest pending task comes out first");
        assert_eq!(next.status, TaskStatus::Pending);
        assert_eq!(next.task_type, TaskType::Research);
    }

    #[test]
    fn test_dequeue_does_not_mark_running() {
        let (_dir, db) = temp_db();
        let id = db
            .create_task(TaskType::BulkImport, &serde_json::json!({}))
            .unwrap();

        // Dequeue twice without a status update: the same row comes back.
        let a = db.get_next_pending_task().unwrap().unwrap();
        let b = db.get_next_pending_task().unwrap().unwrap();
        assert_eq!(a.id, id);
        assert_eq!(b.id, id);
    }

    #[test]
    fn test_status_transitions_forward() {
        let (_dir, db) = temp_db();
        let id = db
            .create_task(TaskType::Research, &serde_json::json!({}))
            .unwrap();

        db.update_task_status(&id, TaskStatus::Running, None, None)
            .unwrap();
        assert_eq!(db.get_task(&id).unwrap().unwrap().status, TaskStatus::Running);

        db.update_task_status(
            &id,
            TaskStatus::Completed,
            Some(&serde_json::json!({"entityId": "acme-corp"})),
            None,
        )
        .unwrap();
        let task = db.get_task(&id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.status.is_terminal());
        assert_eq!(
            task.result.unwrap()["entityId"],
            serde_json::json!("acme-corp")
        );
    }

    #[test]
    fn test_failed_task_keeps_error_string() {
        let (_dir, db) = temp_db();
        let id = db
            .create_task(TaskType::Research, &serde_json::json!({}))
            .unwrap();
        db.update_task_status(&id, TaskStatus::Running, None, None)
            .unwrap();
        db.update_task_status(&id, TaskStatus::Failed, None, Some("research source error"))
            .unwrap();

        let task = db.get_task(&id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error, "research source error");
    }

    #[test]
    fn test_incremental_result_updates() {
        let (_dir, db) = temp_db();
        let id = db
            .create_task(TaskType::BulkImport, &serde_json::json!({}))
            .unwrap();

        db.update_task_result(&id, &serde_json::json!({"found": 10, "processed": 3}))
            .unwrap();
        db.update_task_result(&id, &serde_json::json!({"found": 10, "processed": 7}))
            .unwrap();

        let task = db.get_task(&id).unwrap().unwrap();
        assert_eq!(task.result.unwrap()["processed"], serde_json::json!(7));
        // Progress updates never touch status.
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_update_unknown_task_errors() {
        let (_dir, db) = temp_db();
        let err = db.update_task_status("nope", TaskStatus::Running, None, None);
        assert!(matches!(err, Err(DbError::NotFound(_))));
    }
}
