/// Contact capture, structurally separated from survey responses
///
/// Contacts and submissions must stay unlinkable: the contact table has no
/// foreign key or id column referencing submissions or answers, and the
/// validator rejects any payload that even mentions one. The shared
/// event_slug is a free-text grouping tag, not a join key.
use crate::error::{ApiError, ApiResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Fields a contact payload must never carry; their presence, regardless of
/// value, fails validation by name.
const FORBIDDEN_FIELDS: [&str; 3] = ["submissionId", "responseId", "answerId"];
const ALLOWED_FIELDS: [&str; 6] = ["eventSlug", "name", "email", "company", "role", "consent"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub event_slug: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub role: Option<String>,
    pub consent: bool,
    pub created_at: DateTime<Utc>,
}

/// Validated contact payload
#[derive(Debug, Clone)]
pub struct NewContact {
    pub event_slug: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub role: Option<String>,
    pub consent: bool,
}

impl NewContact {
    /// Strict validation of an untyped JSON payload
    ///
    /// Unknown fields are rejected by name, with linkage fields called out
    /// specifically, so a client bug that tries to attach a submission id
    /// fails loudly instead of being silently dropped.
    pub fn from_value(value: serde_json::Value) -> ApiResult<Self> {
        let serde_json::Value::Object(map) = value else {
            return Err(ApiError::Validation(
                "Contact payload must be a JSON object".to_string(),
            ));
        };

        for forbidden in FORBIDDEN_FIELDS {
            if map.contains_key(forbidden) {
                return Err(ApiError::Validation(format!(
                    "Field '{}' is not allowed on a contact",
                    forbidden
                )));
            }
        }

        for key in map.keys() {
            if !ALLOWED_FIELDS.contains(&key.as_str()) {
                return Err(ApiError::Validation(format!(
                    "Unknown field '{}' on contact",
                    key
                )));
            }
        }

        let event_slug = match map.get("eventSlug") {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.clone(),
            _ => {
                return Err(ApiError::Validation(
                    "Field 'eventSlug' is required".to_string(),
                ))
            }
        };

        let consent = match map.get("consent") {
            Some(serde_json::Value::Bool(b)) => *b,
            _ => {
                return Err(ApiError::Validation(
                    "Field 'consent' is required and must be a boolean".to_string(),
                ))
            }
        };
        if !consent {
            return Err(ApiError::Validation(
                "Field 'consent' must be true to store a contact".to_string(),
            ));
        }

        let text_field = |key: &str| -> ApiResult<Option<String>> {
            match map.get(key) {
                None | Some(serde_json::Value::Null) => Ok(None),
                Some(serde_json::Value::String(s)) => {
                    let trimmed = s.trim();
                    Ok(if trimmed.is_empty() {
                        None
                    } else {
                        Some(trimmed.to_string())
                    })
                }
                Some(_) => Err(ApiError::Validation(format!(
                    "Field '{}' must be a string",
                    key
                ))),
            }
        };

        let contact = NewContact {
            event_slug,
            name: text_field("name")?,
            email: text_field("email")?,
            company: text_field("company")?,
            role: text_field("role")?,
            consent,
        };

        if let Some(email) = &contact.email {
            if !email.contains('@') {
                return Err(ApiError::Validation(
                    "Field 'email' is not a valid email address".to_string(),
                ));
            }
        }

        if contact.name.is_none()
            && contact.email.is_none()
            && contact.company.is_none()
            && contact.role.is_none()
        {
            return Err(ApiError::Validation(
                "At least one of 'name', 'email', 'company', 'role' is required".to_string(),
            ));
        }

        Ok(contact)
    }
}

pub struct ContactStore {
    db: SqlitePool,
}

impl ContactStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn create(&self, new: NewContact) -> ApiResult<Contact> {
        let contact = Contact {
            id: Uuid::new_v4().to_string(),
            event_slug: new.event_slug,
            name: new.name,
            email: new.email,
            company: new.company,
            role: new.role,
            consent: new.consent,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO contact (id, event_slug, name, email, company, role, consent, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&contact.id)
        .bind(&contact.event_slug)
        .bind(&contact.name)
        .bind(&contact.email)
        .bind(&contact.company)
        .bind(&contact.role)
        .bind(contact.consent)
        .bind(contact.created_at)
        .execute(&self.db)
        .await?;

        Ok(contact)
    }

    /// All contacts for an event, for the admin export
    pub async fn list_for_event(&self, event_slug: &str) -> ApiResult<Vec<Contact>> {
        use sqlx::Row;

        let rows = sqlx::query(
            "SELECT id, event_slug, name, email, company, role, consent, created_at
             FROM contact WHERE event_slug = ?1 ORDER BY created_at",
        )
        .bind(event_slug)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Contact {
                id: row.get("id"),
                event_slug: row.get("event_slug"),
                name: row.get("name"),
                email: row.get("email"),
                company: row.get("company"),
                role: row.get("role"),
                consent: row.get("consent"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;

    fn valid_payload() -> serde_json::Value {
        serde_json::json!({
            "eventSlug": "meetup-2026",
            "name": "Ada",
            "email": "ada@example.com",
            "consent": true
        })
    }

    #[test]
    fn test_valid_payload_passes() {
        let contact = NewContact::from_value(valid_payload()).unwrap();
        assert_eq!(contact.event_slug, "meetup-2026");
        assert_eq!(contact.name.as_deref(), Some("Ada"));
        assert!(contact.consent);
    }

    #[test]
    fn test_forbidden_fields_rejected_by_name() {
        for field in ["submissionId", "responseId", "answerId"] {
            let mut payload = valid_payload();
            payload[field] = serde_json::json!("sub-123");

            let err = NewContact::from_value(payload).unwrap_err();
            match err {
                ApiError::Validation(msg) => {
                    assert!(msg.contains(field), "message should name '{}': {}", field, msg)
                }
                other => panic!("expected Validation, got {:?}", other.to_string()),
            }
        }
    }

    #[test]
    fn test_forbidden_field_rejected_even_when_null() {
        let mut payload = valid_payload();
        payload["submissionId"] = serde_json::Value::Null;
        assert!(NewContact::from_value(payload).is_err());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let mut payload = valid_payload();
        payload["nickname"] = serde_json::json!("ada");

        let err = NewContact::from_value(payload).unwrap_err();
        match err {
            ApiError::Validation(msg) => assert!(msg.contains("nickname")),
            other => panic!("expected Validation, got {:?}", other.to_string()),
        }
    }

    #[test]
    fn test_consent_must_be_true() {
        let mut payload = valid_payload();
        payload["consent"] = serde_json::json!(false);
        assert!(NewContact::from_value(payload).is_err());

        let mut payload = valid_payload();
        payload.as_object_mut().unwrap().remove("consent");
        assert!(NewContact::from_value(payload).is_err());
    }

    #[test]
    fn test_requires_at_least_one_identity_field() {
        let payload = serde_json::json!({
            "eventSlug": "meetup-2026",
            "consent": true
        });
        assert!(NewContact::from_value(payload).is_err());
    }

    #[tokio::test]
    async fn test_rejected_payload_stores_nothing() {
        let pool = memory_pool().await;
        let store = ContactStore::new(pool.clone());

        let mut payload = valid_payload();
        payload["submissionId"] = serde_json::json!("sub-123");

        if let Ok(contact) = NewContact::from_value(payload) {
            store.create(contact).await.unwrap();
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contact")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let pool = memory_pool().await;
        let store = ContactStore::new(pool);

        let created = store
            .create(NewContact::from_value(valid_payload()).unwrap())
            .await
            .unwrap();

        let listed = store.list_for_event("meetup-2026").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);
        assert_eq!(listed[0].email.as_deref(), Some("ada@example.com"));
    }

    #[tokio::test]
    async fn test_contact_table_has_no_foreign_keys() {
        let pool = memory_pool().await;

        let fks = sqlx::query("PRAGMA foreign_key_list(contact)")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert!(fks.is_empty(), "contact table must not reference any table");

        // And no column whose name suggests a linkage
        use sqlx::Row;
        let columns = sqlx::query("PRAGMA table_info(contact)")
            .fetch_all(&pool)
            .await
            .unwrap();
        for col in columns {
            let name: String = col.get("name");
            assert!(
                !name.to_lowercase().contains("submission")
                    && !name.to_lowercase().contains("answer"),
                "suspicious contact column: {}",
                name
            );
        }
    }
}
