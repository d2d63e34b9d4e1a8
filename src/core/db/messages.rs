use anyhow::Result;
use chrono::Utc;
use rusqlite::params;

use super::Database;
use super::types::{MessageRecord, OutboundMeta};

impl Database {
    /// True if an inbound message with this provider id was already recorded.
    /// This is the idempotency check that runs before any model call.
    pub async fn inbound_exists(&self, external_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE external_id = ?1 AND direction = 'in'",
            params![external_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub async fn record_inbound(
        &self,
        candidate_id: &str,
        content: &str,
        external_id: &str,
    ) -> Result<MessageRecord> {
        let conn = self.conn.lock().await;
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO messages (id, candidate_id, direction, content, external_id, created_at)
             VALUES (?1, ?2, 'in', ?3, ?4, ?5)",
            params![id, candidate_id, content, external_id, Utc::now().to_rfc3339()],
        )?;
        Ok(MessageRecord {
            direction: "in".to_string(),
            external_id: Some(external_id.to_string()),
        })
    }

    pub async fn record_outbound(
        &self,
        candidate_id: &str,
        content: &str,
        meta: OutboundMeta,
    ) -> Result<MessageRecord> {
        let conn = self.conn.lock().await;
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO messages
                (id, candidate_id, direction, content, external_id,
                 tokens_used, model_name, processing_ms, created_at)
             VALUES (?1, ?2, 'out', ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                candidate_id,
                content,
                meta.external_id,
                meta.tokens_used.map(|t| t as i64),
                meta.model_name,
                meta.processing_ms.map(|t| t as i64),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(MessageRecord {
            direction: "out".to_string(),
            external_id: meta.external_id,
        })
    }

    #[cfg(test)]
    pub async fn count_messages(&self, candidate_id: &str, direction: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE candidate_id = ?1 AND direction = ?2",
            params![candidate_id, direction],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::test_database;

    #[tokio::test]
    async fn inbound_exists_detects_replay() {
        let db = test_database();
        let c = db
            .find_or_create_candidate("whatsapp:+52333", "Dee")
            .await
            .unwrap();
        assert!(!db.inbound_exists("SM123").await.unwrap());
        db.record_inbound(&c.id, "hi", "SM123").await.unwrap();
        assert!(db.inbound_exists("SM123").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_external_id_is_rejected_by_schema() {
        let db = test_database();
        let c = db
            .find_or_create_candidate("whatsapp:+52333", "Dee")
            .await
            .unwrap();
        db.record_inbound(&c.id, "hi", "SM777").await.unwrap();
        assert!(db.record_inbound(&c.id, "hi again", "SM777").await.is_err());
    }

    #[tokio::test]
    async fn outbound_meta_is_persisted() {
        let db = test_database();
        let c = db
            .find_or_create_candidate("whatsapp:+52444", "Ed")
            .await
            .unwrap();
        let meta = OutboundMeta {
            external_id: Some("SMout1".to_string()),
            tokens_used: Some(42),
            model_name: Some("gpt-4o-mini".to_string()),
            processing_ms: Some(1300),
        };
        let rec = db.record_outbound(&c.id, "hello", meta).await.unwrap();
        assert_eq!(rec.direction, "out");
        assert_eq!(rec.external_id.as_deref(), Some("SMout1"));
        assert_eq!(db.count_messages(&c.id, "out").await.unwrap(), 1);
    }
}
