use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::*;
use crate::helpers::normalize_name;

impl ResearchDb {
    // =========================================================================
    // Aliases
    // =========================================================================

    /// Insert an active alias for a company.
    ///
    /// Returns `false` when an active alias with the same normalized text
    /// already exists for this company — bulk seeding treats that as a skip,
    /// not a failure.
    pub fn create_alias(
        &self,
        company_id: &str,
        alias: &str,
        source: AliasSource,
    ) -> Result<bool, DbError> {
        let normalized = normalize_name(alias);
        if normalized.is_empty() {
            log::debug!("Skipping empty alias for {}", company_id);
            return Ok(false);
        }
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO aliases (company_id, alias, normalized_alias, source, active, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![
                company_id,
                alias,
                normalized,
                source.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        if inserted == 0 {
            log::debug!("Alias '{}' already active for {}, skipped", alias, company_id);
        }
        Ok(inserted > 0)
    }

    /// Aliases for a company, ordered by trust rank (manual > auto > seed)
    /// then age.
    pub fn get_aliases(&self, company_id: &str, active_only: bool) -> Result<Vec<DbAlias>, DbError> {
        let sql = if active_only {
            "SELECT id, company_id, alias, normalized_alias, source, active, created_at
             FROM aliases WHERE company_id = ?1 AND active = 1
             ORDER BY CASE source WHEN 'manual' THEN 0 WHEN 'auto' THEN 1 ELSE 2 END, created_at"
        } else {
            "SELECT id, company_id, alias, normalized_alias, source, active, created_at
             FROM aliases WHERE company_id = ?1
             ORDER BY CASE source WHEN 'manual' THEN 0 WHEN 'auto' THEN 1 ELSE 2 END, created_at"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![company_id], Self::map_alias_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Get a single alias row by id.
    pub fn get_alias(&self, alias_id: i64) -> Result<Option<DbAlias>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, company_id, alias, normalized_alias, source, active, created_at
                 FROM aliases WHERE id = ?1",
                params![alias_id],
                Self::map_alias_row,
            )
            .optional()?)
    }

    /// Promote an alias's text to be the company's display name.
    ///
    /// Used when an external lookup only succeeded under the alias, so
    /// future lookups lead with the working name. The company id (slug) is
    /// never changed by promotion.
    pub fn set_alias_as_canonical(&self, company_id: &str, alias_id: i64) -> Result<(), DbError> {
        let Some(alias) = self.get_alias(alias_id)? else {
            return Err(DbError::NotFound(format!("alias {}", alias_id)));
        };
        if alias.company_id != company_id {
            return Err(DbError::NotFound(format!(
                "alias {} on company {} (belongs to {})",
                alias_id, company_id, alias.company_id
            )));
        }
        self.conn.execute(
            "UPDATE companies SET name = ?2, updated_at = ?3 WHERE id = ?1",
            params![company_id, alias.alias, Utc::now().to_rfc3339()],
        )?;
        log::info!(
            "Promoted alias '{}' to display name for {}",
            alias.alias,
            company_id
        );
        Ok(())
    }

    pub(crate) fn map_alias_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbAlias> {
        Ok(DbAlias {
            id: row.get(0)?,
            company_id: row.get(1)?,
            alias: row.get(2)?,
            normalized_alias: row.get(3)?,
            source: AliasSource::from_str_lossy(&row.get::<_, String>(4)?),
            active: row.get::<_, i64>(5)? != 0,
            created_at: row.get(6)?,
        })
    }
}
