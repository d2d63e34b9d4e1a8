use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use super::Database;
use super::types::{Interview, InterviewStage};

impl Database {
    /// The interview currently in progress for a candidate, if any.
    pub async fn find_active_interview(&self, candidate_id: &str) -> Result<Option<Interview>> {
        let conn = self.conn.lock().await;
        let interview = conn
            .query_row(
                "SELECT id, position_title, stage
                 FROM interviews
                 WHERE candidate_id = ?1 AND status = 'active'
                 ORDER BY created_at DESC LIMIT 1",
                params![candidate_id],
                |row| {
                    let stage: String = row.get(2)?;
                    Ok(Interview {
                        id: row.get(0)?,
                        position_title: row.get(1)?,
                        stage: InterviewStage::parse(&stage)
                            .unwrap_or(InterviewStage::Screening),
                    })
                },
            )
            .optional()?;
        Ok(interview)
    }

    pub async fn create_interview(
        &self,
        candidate_id: &str,
        position_title: &str,
        stage: InterviewStage,
    ) -> Result<Interview> {
        let conn = self.conn.lock().await;
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO interviews
                (id, candidate_id, position_title, stage, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?5)",
            params![id, candidate_id, position_title, stage.as_str(), now],
        )?;
        Ok(Interview {
            id,
            position_title: position_title.to_string(),
            stage,
        })
    }

    /// Mark an interview as scheduled with its confirmed start time.
    pub async fn mark_interview_scheduled(
        &self,
        interview_id: &str,
        start: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE interviews
             SET status = 'scheduled', scheduled_at = ?1, updated_at = ?2
             WHERE id = ?3",
            params![start.to_rfc3339(), Utc::now().to_rfc3339(), interview_id],
        )?;
        Ok(changed > 0)
    }

}
