use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::*;
use crate::helpers::normalize_name;

impl ResearchDb {
    // =========================================================================
    // Companies
    // =========================================================================

    /// Insert a new company. Fails with `AlreadyExists` if the id collides
    /// with any existing row — tombstones keep their id, so a collision with
    /// a soft-deleted row is surfaced the same way (merge or rename instead).
    pub fn create_company(&self, company: &DbCompany) -> Result<(), DbError> {
        if self.get_company(&company.id)?.is_some() {
            return Err(DbError::AlreadyExists(company.id.clone()));
        }
        self.conn.execute(
            "INSERT INTO companies (id, name, details, status, source_url, deleted_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                company.id,
                company.name,
                serde_json::to_string(&company.details)?,
                serde_json::to_string(&company.status)?,
                company.source_url,
                company.deleted_at,
                company.created_at,
                company.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Get a company by id. Returns soft-deleted rows too; callers that care
    /// check `is_deleted()`.
    pub fn get_company(&self, id: &str) -> Result<Option<DbCompany>, DbError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, details, status, source_url, deleted_at, created_at, updated_at
                 FROM companies WHERE id = ?1",
                params![id],
                Self::map_company_row,
            )
            .optional()?;
        match row {
            Some(raw) => Ok(Some(Self::decode_company(raw)?)),
            None => Ok(None),
        }
    }

    /// Find a live company whose name normalizes to the same form as `name`.
    ///
    /// Linear scan over non-deleted rows. Fine at this system's scale
    /// (hundreds of companies); revisit if that ever changes.
    pub fn get_company_by_normalized_name(&self, name: &str) -> Result<Option<DbCompany>, DbError> {
        let wanted = normalize_name(name);
        if wanted.is_empty() {
            return Ok(None);
        }
        for company in self.list_companies()? {
            if normalize_name(&company.name) == wanted {
                return Ok(Some(company));
            }
        }
        Ok(None)
    }

    /// All live companies, ordered by name.
    pub fn list_companies(&self) -> Result<Vec<DbCompany>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, details, status, source_url, deleted_at, created_at, updated_at
             FROM companies WHERE deleted_at IS NULL ORDER BY name",
        )?;
        let rows = stmt.query_map([], Self::map_company_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(Self::decode_company(row?)?);
        }
        Ok(out)
    }

    /// Overwrite a company's mutable fields and bump `updated_at`.
    pub fn update_company(&self, company: &DbCompany) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE companies
             SET name = ?2, details = ?3, status = ?4, source_url = ?5, updated_at = ?6
             WHERE id = ?1",
            params![
                company.id,
                company.name,
                serde_json::to_string(&company.details)?,
                serde_json::to_string(&company.status)?,
                company.source_url,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Tombstone a company. Idempotent: re-deleting keeps the original
    /// `deleted_at`.
    pub fn soft_delete_company(&self, id: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE companies SET deleted_at = COALESCE(deleted_at, ?2) WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Merge `duplicate_id` into `canonical_id` inside one transaction:
    /// re-point aliases (dropping any that would collide with an active
    /// alias the canonical already has), re-point messages and events, fill
    /// empty canonical detail fields from the duplicate, then tombstone the
    /// duplicate.
    ///
    /// Returns `None` when either id does not resolve to a row. Succeeds on
    /// an already-tombstoned duplicate, so re-running a merge is safe.
    pub fn merge_companies(
        &self,
        canonical_id: &str,
        duplicate_id: &str,
    ) -> Result<Option<MergeResult>, DbError> {
        if canonical_id == duplicate_id {
            log::warn!("Merge refused: canonical and duplicate are both {}", canonical_id);
            return Ok(None);
        }
        let Some(mut canonical) = self.get_company(canonical_id)? else {
            return Ok(None);
        };
        let Some(duplicate) = self.get_company(duplicate_id)? else {
            return Ok(None);
        };

        let result = self.with_transaction(|tx| {
            let conn = tx.conn_ref();

            // Re-point aliases; collisions with the canonical's active
            // aliases are simply dropped.
            let aliases_moved = conn.execute(
                "UPDATE OR IGNORE aliases SET company_id = ?2 WHERE company_id = ?1",
                params![duplicate_id, canonical_id],
            )?;
            let aliases_dropped = conn.execute(
                "DELETE FROM aliases WHERE company_id = ?1",
                params![duplicate_id],
            )?;

            let messages_moved = conn.execute(
                "UPDATE messages SET company_id = ?2 WHERE company_id = ?1",
                params![duplicate_id, canonical_id],
            )?;

            let events_moved = conn.execute(
                "UPDATE events SET company_id = ?2 WHERE company_id = ?1",
                params![duplicate_id, canonical_id],
            )?;

            // Non-empty wins, canonical precedence.
            let fields_filled = canonical.details.fill_missing_from(&duplicate.details);
            if canonical.source_url.is_none() {
                canonical.source_url = duplicate.source_url.clone();
            }
            tx.update_company(&canonical)?;

            tx.soft_delete_company(duplicate_id)?;

            Ok(MergeResult {
                aliases_moved,
                aliases_dropped,
                messages_moved,
                events_moved,
                fields_filled,
            })
        })?;

        log::info!(
            "Merged company {} into {}: {} aliases moved, {} dropped, {} messages, {} events",
            duplicate_id,
            canonical_id,
            result.aliases_moved,
            result.aliases_dropped,
            result.messages_moved,
            result.events_moved,
        );
        Ok(Some(result))
    }
}

// Row mapping is split in two stages: rusqlite pulls raw TEXT columns, then
// the JSON blobs decode (with forward migration) outside the rusqlite error
// domain so a drifted blob surfaces as `DbError::Json`.
pub(crate) struct RawCompanyRow {
    id: String,
    name: String,
    details: String,
    status: String,
    source_url: Option<String>,
    deleted_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ResearchDb {
    pub(crate) fn map_company_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawCompanyRow> {
        Ok(RawCompanyRow {
            id: row.get(0)?,
            name: row.get(1)?,
            details: row.get(2)?,
            status: row.get(3)?,
            source_url: row.get(4)?,
            deleted_at: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    pub(crate) fn decode_company(raw: RawCompanyRow) -> Result<DbCompany, DbError> {
        let details_value: serde_json::Value = serde_json::from_str(&raw.details)?;
        Ok(DbCompany {
            id: raw.id,
            name: raw.name,
            details: CompanyDetails::from_json(details_value)?,
            status: serde_json::from_str(&raw.status)?,
            source_url: raw.source_url,
            deleted_at: raw.deleted_at,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::temp_db;
    use super::*;
    use crate::db::{AliasSource, DbMessage, MessageDirection, ResearchStatus};

    fn company(id: &str, name: &str) -> DbCompany {
        let now = Utc::now().to_rfc3339();
        DbCompany {
            id: id.to_string(),
            name: name.to_string(),
            details: CompanyDetails::default(),
            status: ResearchStatus::default(),
            source_url: None,
            deleted_at: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    fn message(id: &str, company_id: &str) -> DbMessage {
        DbMessage {
            id: id.to_string(),
            company_id: company_id.to_string(),
            direction: MessageDirection::Inbound,
            subject: "subject".into(),
            body: "body".into(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn test_create_collision_reports_already_exists() {
        let (_dir, db) = temp_db();
        db.create_company(&company("acme-corp", "Acme Corp")).unwrap();
        let err = db.create_company(&company("acme-corp", "Acme Corp"));
        assert!(matches!(err, Err(DbError::AlreadyExists(_))));
    }

    #[test]
    fn test_normalized_name_lookup() {
        let (_dir, db) = temp_db();
        db.create_company(&company("acme-and-co", "Acme & Co.")).unwrap();

        let hit = db.get_company_by_normalized_name("acme and co").unwrap();
        assert_eq!(hit.unwrap().id, "acme-and-co");

        // Soft-deleted rows are invisible to normalized lookup.
        db.soft_delete_company("acme-and-co").unwrap();
        assert!(db.get_company_by_normalized_name("acme and co").unwrap().is_none());
        // But still reachable by id.
        assert!(db.get_company("acme-and-co").unwrap().unwrap().is_deleted());
    }

    #[test]
    fn test_soft_delete_is_idempotent() {
        let (_dir, db) = temp_db();
        db.create_company(&company("acme-corp", "Acme Corp")).unwrap();

        db.soft_delete_company("acme-corp").unwrap();
        let first = db.get_company("acme-corp").unwrap().unwrap().deleted_at;
        db.soft_delete_company("acme-corp").unwrap();
        let second = db.get_company("acme-corp").unwrap().unwrap().deleted_at;
        assert_eq!(first, second, "re-deleting keeps the original tombstone time");
    }

    #[test]
    fn test_merge_repoints_everything_and_tombstones() {
        let (_dir, db) = temp_db();
        let mut canonical = company("acme-corp", "Acme Corp");
        canonical.details.website = Some("https://acme.example".into());
        db.create_company(&canonical).unwrap();
        let mut duplicate = company("acme-inc", "Acme Inc");
        duplicate.details.website = Some("https://should-not-win.example".into());
        duplicate.details.industry = Some("Robotics".into());
        db.create_company(&duplicate).unwrap();

        // Colliding alias on both sides + one unique to the duplicate.
        db.create_alias("acme-corp", "Acme Group", AliasSource::Manual).unwrap();
        db.create_alias("acme-inc", "Acme Group", AliasSource::Seed).unwrap();
        db.create_alias("acme-inc", "Acme International", AliasSource::Auto).unwrap();

        db.insert_message(&message("m1", "acme-inc")).unwrap();
        db.record_event("acme-inc", "research_completed", None).unwrap();

        let result = db.merge_companies("acme-corp", "acme-inc").unwrap().unwrap();
        assert_eq!(result.aliases_moved, 1, "only the non-colliding alias moves");
        assert_eq!(result.aliases_dropped, 1, "the colliding alias is dropped");
        assert_eq!(result.messages_moved, 1);
        assert_eq!(result.events_moved, 1);
        assert_eq!(result.fields_filled, 1, "industry filled, website kept");

        let merged = db.get_company("acme-corp").unwrap().unwrap();
        assert_eq!(merged.details.website.as_deref(), Some("https://acme.example"));
        assert_eq!(merged.details.industry.as_deref(), Some("Robotics"));

        let tombstone = db.get_company("acme-inc").unwrap().unwrap();
        assert!(tombstone.is_deleted());

        assert_eq!(db.get_messages_for_company("acme-corp").unwrap().len(), 1);
        assert_eq!(db.get_events_for_company("acme-corp").unwrap().len(), 1);
        assert!(db.get_aliases("acme-inc", false).unwrap().is_empty());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let (_dir, db) = temp_db();
        db.create_company(&company("acme-corp", "Acme Corp")).unwrap();
        db.create_company(&company("acme-inc", "Acme Inc")).unwrap();
        db.create_alias("acme-inc", "Acme International", AliasSource::Auto).unwrap();
        db.insert_message(&message("m1", "acme-inc")).unwrap();

        let first = db.merge_companies("acme-corp", "acme-inc").unwrap().unwrap();
        assert_eq!(first.aliases_moved, 1);
        assert_eq!(first.messages_moved, 1);

        // Re-running against the now-tombstoned duplicate still succeeds and
        // changes nothing.
        let second = db.merge_companies("acme-corp", "acme-inc").unwrap().unwrap();
        assert_eq!(second.aliases_moved, 0);
        assert_eq!(second.messages_moved, 0);

        assert!(db.get_company("acme-inc").unwrap().unwrap().is_deleted());
        assert_eq!(db.get_aliases("acme-corp", true).unwrap().len(), 1);
        assert_eq!(db.get_messages_for_company("acme-corp").unwrap().len(), 1);
    }

    #[test]
    fn test_merge_unknown_id_returns_none() {
        let (_dir, db) = temp_db();
        db.create_company(&company("acme-corp", "Acme Corp")).unwrap();
        assert!(db.merge_companies("acme-corp", "ghost").unwrap().is_none());
        assert!(db.merge_companies("ghost", "acme-corp").unwrap().is_none());
        assert!(db.merge_companies("acme-corp", "acme-corp").unwrap().is_none());
    }

    #[test]
    fn test_alias_promotion_keeps_id() {
        let (_dir, db) = temp_db();
        db.create_company(&company("acme-corp", "Acme Corp")).unwrap();
        db.create_alias("acme-corp", "Acme Robotics", AliasSource::Manual).unwrap();
        let alias = &db.get_aliases("acme-corp", true).unwrap()[0];

        db.set_alias_as_canonical("acme-corp", alias.id).unwrap();

        let promoted = db.get_company("acme-corp").unwrap().unwrap();
        assert_eq!(promoted.name, "Acme Robotics");
        assert_eq!(promoted.id, "acme-corp", "promotion never changes the id");
    }

    #[test]
    fn test_alias_promotion_rejects_foreign_alias() {
        let (_dir, db) = temp_db();
        db.create_company(&company("acme-corp", "Acme Corp")).unwrap();
        db.create_company(&company("initech", "Initech")).unwrap();
        db.create_alias("initech", "Initech Global", AliasSource::Manual).unwrap();
        let alias = &db.get_aliases("initech", true).unwrap()[0];

        let err = db.set_alias_as_canonical("acme-corp", alias.id);
        assert!(matches!(err, Err(DbError::NotFound(_))));
    }
}
