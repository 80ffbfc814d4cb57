/// Append-only audit trail of privileged actions
use crate::error::ApiResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// One audit entry, joined with the acting admin's email for listings
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub admin_id: String,
    pub admin_email: Option<String>,
    pub action: String,
    pub entity: Option<String>,
    pub entity_id: Option<String>,
    pub meta: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

pub struct AuditLog {
    db: SqlitePool,
}

impl AuditLog {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Append an entry. Failures are surfaced to the caller; privileged
    /// actions that cannot be audited should fail loudly rather than proceed
    /// silently.
    pub async fn record(
        &self,
        admin_id: &str,
        action: &str,
        entity: Option<&str>,
        entity_id: Option<&str>,
        meta: Option<serde_json::Value>,
    ) -> ApiResult<()> {
        let meta_text = meta.map(|m| m.to_string());

        sqlx::query(
            "INSERT INTO audit_log (id, admin_id, action, entity, entity_id, meta, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(admin_id)
        .bind(action)
        .bind(entity)
        .bind(entity_id)
        .bind(meta_text)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        tracing::info!(admin_id, action, entity, entity_id, "audit");

        Ok(())
    }

    /// List entries newest-first
    pub async fn list(&self, limit: i64, offset: i64) -> ApiResult<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT a.id, a.admin_id, u.email AS admin_email, a.action, a.entity,
                    a.entity_id, a.meta, a.created_at
             FROM audit_log a
             LEFT JOIN admin_user u ON u.id = a.admin_id
             ORDER BY a.created_at DESC, a.id DESC
             LIMIT ?1 OFFSET ?2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let meta: Option<String> = row.get("meta");
                AuditEntry {
                    id: row.get("id"),
                    admin_id: row.get("admin_id"),
                    admin_email: row.get("admin_email"),
                    action: row.get("action"),
                    entity: row.get("entity"),
                    entity_id: row.get("entity_id"),
                    meta: meta.and_then(|m| serde_json::from_str(&m).ok()),
                    created_at: row.get("created_at"),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;

    #[tokio::test]
    async fn test_record_and_list() {
        let pool = memory_pool().await;
        sqlx::query(
            "INSERT INTO admin_user (id, email, password_hash, created_at)
             VALUES ('admin-1', 'admin@example.com', 'x', ?1)",
        )
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap();

        let log = AuditLog::new(pool);

        log.record("admin-1", "LOGIN", None, None, None)
            .await
            .unwrap();
        log.record(
            "admin-1",
            "CREATE_SURVEY",
            Some("survey"),
            Some("s-1"),
            Some(serde_json::json!({ "title": "Test" })),
        )
        .await
        .unwrap();

        let entries = log.list(10, 0).await.unwrap();
        assert_eq!(entries.len(), 2);

        // Newest first
        assert_eq!(entries[0].action, "CREATE_SURVEY");
        assert_eq!(entries[0].admin_email.as_deref(), Some("admin@example.com"));
        assert_eq!(
            entries[0].meta,
            Some(serde_json::json!({ "title": "Test" }))
        );
        assert_eq!(entries[1].action, "LOGIN");
    }

    #[tokio::test]
    async fn test_list_pagination() {
        let pool = memory_pool().await;
        sqlx::query(
            "INSERT INTO admin_user (id, email, password_hash, created_at)
             VALUES ('admin-1', 'admin@example.com', 'x', ?1)",
        )
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap();

        let log = AuditLog::new(pool);
        for i in 0..5 {
            log.record("admin-1", &format!("ACTION_{}", i), None, None, None)
                .await
                .unwrap();
        }

        let page = log.list(2, 2).await.unwrap();
        assert_eq!(page.len(), 2);
    }
}
