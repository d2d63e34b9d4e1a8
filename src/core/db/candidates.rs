use anyhow::Result;
use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use super::Database;
use super::types::Candidate;

impl Database {
    /// Resolve the candidate for a chat address, creating the row on first
    /// contact. The display name is only used at creation time; an existing
    /// candidate keeps the name already on record.
    pub async fn find_or_create_candidate(
        &self,
        address: &str,
        display_name: &str,
    ) -> Result<Candidate> {
        let conn = self.conn.lock().await;

        let existing = conn
            .query_row(
                "SELECT id, name, email FROM candidates WHERE address = ?1",
                params![address],
                |row| {
                    Ok(Candidate {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                    })
                },
            )
            .optional()?;

        if let Some(candidate) = existing {
            return Ok(candidate);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let name = if display_name.trim().is_empty() {
            address.to_string()
        } else {
            display_name.trim().to_string()
        };
        conn.execute(
            "INSERT INTO candidates (id, address, name, email, created_at)
             VALUES (?1, ?2, ?3, NULL, ?4)",
            params![id, address, name, Utc::now().to_rfc3339()],
        )?;

        Ok(Candidate {
            id,
            name,
            email: None,
        })
    }

    pub async fn update_candidate_email(&self, candidate_id: &str, email: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE candidates SET email = ?1 WHERE id = ?2",
            params![email, candidate_id],
        )?;
        Ok(changed > 0)
    }

    #[cfg(test)]
    pub async fn get_candidate(&self, candidate_id: &str) -> Result<Option<Candidate>> {
        let conn = self.conn.lock().await;
        let candidate = conn
            .query_row(
                "SELECT id, name, email FROM candidates WHERE id = ?1",
                params![candidate_id],
                |row| {
                    Ok(Candidate {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(candidate)
    }
}
