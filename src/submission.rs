/// Submission pipeline: anonymous response records and their answers
///
/// A submission moves Open -> Completed exactly once. While open, answers
/// upsert keyed on (submission, question); after completion the whole record
/// is immutable. Submissions carry no respondent identity, only the survey id
/// and an event grouping tag.
use crate::error::{ApiError, ApiResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// One answer in a batch, addressed by question id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerInput {
    pub question_id: String,
    /// Selected option values, in selection order
    #[serde(default)]
    pub choice_values: Vec<String>,
    #[serde(default)]
    pub text_value: Option<String>,
    #[serde(default)]
    pub number_value: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub survey_id: String,
    pub event_slug: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Stored answer row for exports and metrics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAnswer {
    pub submission_id: String,
    pub question_id: String,
    pub choice_values: Vec<String>,
    pub text_value: Option<String>,
    pub number_value: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate counts for the admin dashboard
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsOverview {
    pub survey_id: String,
    pub total_submissions: i64,
    pub completed_submissions: i64,
    /// Completed over total; zero when there are no submissions
    pub completion_rate: f64,
    /// Mean seconds from open to complete, over completed submissions
    pub avg_completion_seconds: Option<f64>,
    pub answer_count: i64,
}

/// Per-question aggregate: choice distribution plus numeric summary
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionMetrics {
    pub question_id: String,
    pub answer_count: i64,
    /// value -> times selected, for choice questions
    pub choice_counts: Vec<ChoiceCount>,
    pub number_average: Option<f64>,
    /// Free-text answers, for text questions
    pub text_values: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceCount {
    pub value: String,
    pub count: i64,
}

pub struct SubmissionService {
    db: SqlitePool,
}

impl SubmissionService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Open a new submission against an active survey
    pub async fn create(&self, survey_id: &str, event_slug: &str) -> ApiResult<Submission> {
        let row = sqlx::query("SELECT is_active FROM survey WHERE id = ?1")
            .bind(survey_id)
            .fetch_optional(&self.db)
            .await?;

        let Some(row) = row else {
            return Err(ApiError::NotFound("Survey not found".to_string()));
        };
        let is_active: bool = row.get("is_active");
        if !is_active {
            return Err(ApiError::Validation(
                "Survey is not accepting submissions".to_string(),
            ));
        }

        if event_slug.trim().is_empty() {
            return Err(ApiError::Validation(
                "Field 'eventSlug' must not be empty".to_string(),
            ));
        }

        let submission = Submission {
            id: Uuid::new_v4().to_string(),
            survey_id: survey_id.to_string(),
            event_slug: event_slug.to_string(),
            created_at: Utc::now(),
            completed_at: None,
        };

        sqlx::query(
            "INSERT INTO submission (id, survey_id, event_slug, created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, NULL)",
        )
        .bind(&submission.id)
        .bind(&submission.survey_id)
        .bind(&submission.event_slug)
        .bind(submission.created_at)
        .execute(&self.db)
        .await?;

        Ok(submission)
    }

    pub async fn find(&self, submission_id: &str) -> ApiResult<Option<Submission>> {
        let row = sqlx::query(
            "SELECT id, survey_id, event_slug, created_at, completed_at
             FROM submission WHERE id = ?1",
        )
        .bind(submission_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|row| Submission {
            id: row.get("id"),
            survey_id: row.get("survey_id"),
            event_slug: row.get("event_slug"),
            created_at: row.get("created_at"),
            completed_at: row.get("completed_at"),
        }))
    }

    /// Upsert a batch of answers for an open submission
    ///
    /// Keyed on (submission, question): re-answering replaces the previous
    /// answer. The completed check and the writes share one transaction so a
    /// concurrent complete cannot interleave.
    pub async fn submit_answers(
        &self,
        submission_id: &str,
        answers: &[AnswerInput],
    ) -> ApiResult<()> {
        for answer in answers {
            if answer.question_id.trim().is_empty() {
                return Err(ApiError::Validation(
                    "Field 'questionId' must not be empty".to_string(),
                ));
            }
        }

        let mut tx = self.db.begin().await?;

        let row = sqlx::query("SELECT completed_at FROM submission WHERE id = ?1")
            .bind(submission_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Err(ApiError::NotFound("Submission not found".to_string()));
        };
        let completed_at: Option<DateTime<Utc>> = row.get("completed_at");
        if completed_at.is_some() {
            return Err(ApiError::Conflict(
                "Submission is already completed".to_string(),
            ));
        }

        let now = Utc::now();
        for answer in answers {
            // Resolve the question up front so a bad id reads as a 404
            // instead of surfacing as a foreign-key failure.
            let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM question WHERE id = ?1")
                .bind(&answer.question_id)
                .fetch_one(&mut *tx)
                .await?;
            if known == 0 {
                return Err(ApiError::NotFound(format!(
                    "Question not found: {}",
                    answer.question_id
                )));
            }

            let choice_json = serde_json::to_string(&answer.choice_values)
                .map_err(|e| ApiError::Internal(format!("Answer encoding failed: {}", e)))?;

            sqlx::query(
                "INSERT INTO answer (id, submission_id, question_id, choice_values,
                                     text_value, number_value, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (submission_id, question_id) DO UPDATE SET
                     choice_values = excluded.choice_values,
                     text_value = excluded.text_value,
                     number_value = excluded.number_value,
                     updated_at = excluded.updated_at",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(submission_id)
            .bind(&answer.question_id)
            .bind(&choice_json)
            .bind(&answer.text_value)
            .bind(answer.number_value)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    /// Mark a submission completed; exactly-once by construction
    ///
    /// The guarded UPDATE only matches open submissions, so a repeat call
    /// affects zero rows and is rejected as a conflict.
    pub async fn complete(&self, submission_id: &str) -> ApiResult<Submission> {
        let result = sqlx::query(
            "UPDATE submission SET completed_at = ?1 WHERE id = ?2 AND completed_at IS NULL",
        )
        .bind(Utc::now())
        .bind(submission_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return match self.find(submission_id).await? {
                Some(_) => Err(ApiError::Conflict(
                    "Submission is already completed".to_string(),
                )),
                None => Err(ApiError::NotFound("Submission not found".to_string())),
            };
        }

        self.find(submission_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Submission not found".to_string()))
    }

    /// All answers of a survey, joined through submissions, for exports
    pub async fn answers_for_survey(&self, survey_id: &str) -> ApiResult<Vec<StoredAnswer>> {
        let rows = sqlx::query(
            "SELECT a.submission_id, a.question_id, a.choice_values, a.text_value,
                    a.number_value, a.updated_at
             FROM answer a
             JOIN submission s ON s.id = a.submission_id
             WHERE s.survey_id = ?1
             ORDER BY s.created_at, a.question_id",
        )
        .bind(survey_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(decode_answer_row).collect()
    }

    pub async fn list_for_survey(&self, survey_id: &str) -> ApiResult<Vec<Submission>> {
        let rows = sqlx::query(
            "SELECT id, survey_id, event_slug, created_at, completed_at
             FROM submission WHERE survey_id = ?1 ORDER BY created_at",
        )
        .bind(survey_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Submission {
                id: row.get("id"),
                survey_id: row.get("survey_id"),
                event_slug: row.get("event_slug"),
                created_at: row.get("created_at"),
                completed_at: row.get("completed_at"),
            })
            .collect())
    }

    pub async fn metrics_overview(&self, survey_id: &str) -> ApiResult<MetricsOverview> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total,
                    SUM(CASE WHEN completed_at IS NOT NULL THEN 1 ELSE 0 END) AS completed,
                    AVG(CASE WHEN completed_at IS NOT NULL
                        THEN (julianday(completed_at) - julianday(created_at)) * 86400.0
                        END) AS avg_seconds
             FROM submission WHERE survey_id = ?1",
        )
        .bind(survey_id)
        .fetch_one(&self.db)
        .await?;

        let total: i64 = row.get("total");
        let completed: Option<i64> = row.get("completed");
        let completed = completed.unwrap_or(0);
        let avg_completion_seconds: Option<f64> = row.get("avg_seconds");

        let answer_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM answer a
             JOIN submission s ON s.id = a.submission_id
             WHERE s.survey_id = ?1",
        )
        .bind(survey_id)
        .fetch_one(&self.db)
        .await?;

        Ok(MetricsOverview {
            survey_id: survey_id.to_string(),
            total_submissions: total,
            completed_submissions: completed,
            completion_rate: if total > 0 {
                completed as f64 / total as f64
            } else {
                0.0
            },
            avg_completion_seconds,
            answer_count,
        })
    }

    /// Aggregate one question's answers: choice distribution and numeric mean
    pub async fn question_metrics(&self, question_id: &str) -> ApiResult<QuestionMetrics> {
        let rows = sqlx::query(
            "SELECT choice_values, text_value, number_value
             FROM answer WHERE question_id = ?1 ORDER BY updated_at",
        )
        .bind(question_id)
        .fetch_all(&self.db)
        .await?;

        let mut counts: std::collections::BTreeMap<String, i64> = Default::default();
        let mut text_values = Vec::new();
        let mut number_sum = 0.0;
        let mut number_n = 0i64;
        let answer_count = rows.len() as i64;

        for row in rows {
            let choice_json: String = row.get("choice_values");
            let values: Vec<String> = serde_json::from_str(&choice_json).unwrap_or_default();
            for value in values {
                *counts.entry(value).or_insert(0) += 1;
            }

            if let Some(text) = row.get::<Option<String>, _>("text_value") {
                text_values.push(text);
            }

            if let Some(n) = row.get::<Option<f64>, _>("number_value") {
                number_sum += n;
                number_n += 1;
            }
        }

        Ok(QuestionMetrics {
            question_id: question_id.to_string(),
            answer_count,
            choice_counts: counts
                .into_iter()
                .map(|(value, count)| ChoiceCount { value, count })
                .collect(),
            number_average: if number_n > 0 {
                Some(number_sum / number_n as f64)
            } else {
                None
            },
            text_values,
        })
    }
}

fn decode_answer_row(row: sqlx::sqlite::SqliteRow) -> ApiResult<StoredAnswer> {
    let choice_json: String = row.get("choice_values");
    let choice_values = serde_json::from_str(&choice_json)
        .map_err(|e| ApiError::Internal(format!("Corrupt answer encoding: {}", e)))?;

    Ok(StoredAnswer {
        submission_id: row.get("submission_id"),
        question_id: row.get("question_id"),
        choice_values,
        text_value: row.get("text_value"),
        number_value: row.get("number_value"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;
    use crate::survey::{NewSection, NewSurvey, SurveyStore};

    async fn service_with_survey() -> (SubmissionService, String, String) {
        let pool = memory_pool().await;
        let surveys = SurveyStore::new(pool.clone());

        let survey = surveys
            .create_survey(&NewSurvey {
                title: "S".to_string(),
                description: None,
                is_active: true,
            })
            .await
            .unwrap();
        let section = surveys
            .create_section(
                &survey.id,
                &NewSection {
                    title: "Sec".to_string(),
                    order: 1,
                },
            )
            .await
            .unwrap();

        sqlx::query(
            "INSERT INTO question (id, section_id, type, prompt, required, \"order\")
             VALUES ('q1', ?1, 'TEXT', 'Prompt', 0, 1)",
        )
        .bind(&section.id)
        .execute(&pool)
        .await
        .unwrap();

        (SubmissionService::new(pool), survey.id, "q1".to_string())
    }

    fn text_answer(question_id: &str, text: &str) -> AnswerInput {
        AnswerInput {
            question_id: question_id.to_string(),
            choice_values: vec![],
            text_value: Some(text.to_string()),
            number_value: None,
        }
    }

    #[tokio::test]
    async fn test_create_requires_active_survey() {
        let (service, survey_id, _) = service_with_survey().await;

        let sub = service.create(&survey_id, "meetup-2026").await.unwrap();
        assert!(sub.completed_at.is_none());

        // Two creates yield distinct submissions
        let other = service.create(&survey_id, "meetup-2026").await.unwrap();
        assert_ne!(sub.id, other.id);

        assert!(matches!(
            service.create("missing", "meetup-2026").await,
            Err(ApiError::NotFound(_))
        ));

        sqlx::query("UPDATE survey SET is_active = 0")
            .execute(&service.db)
            .await
            .unwrap();
        assert!(matches!(
            service.create(&survey_id, "meetup-2026").await,
            Err(ApiError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_answer_upsert_last_write_wins() {
        let (service, survey_id, q1) = service_with_survey().await;
        let sub = service.create(&survey_id, "ev").await.unwrap();

        service
            .submit_answers(&sub.id, &[text_answer(&q1, "first")])
            .await
            .unwrap();
        service
            .submit_answers(&sub.id, &[text_answer(&q1, "second")])
            .await
            .unwrap();

        let answers = service.answers_for_survey(&survey_id).await.unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].text_value.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_unknown_question_rejected_as_not_found() {
        let (service, survey_id, q1) = service_with_survey().await;
        let sub = service.create(&survey_id, "ev").await.unwrap();

        assert!(matches!(
            service
                .submit_answers(&sub.id, &[text_answer("q-missing", "x")])
                .await,
            Err(ApiError::NotFound(_))
        ));

        // The rejected batch writes nothing, even for valid entries before
        // the bad one.
        assert!(matches!(
            service
                .submit_answers(
                    &sub.id,
                    &[text_answer(&q1, "kept?"), text_answer("q-missing", "x")],
                )
                .await,
            Err(ApiError::NotFound(_))
        ));
        let answers = service.answers_for_survey(&survey_id).await.unwrap();
        assert!(answers.is_empty());
    }

    #[tokio::test]
    async fn test_completed_submission_is_immutable() {
        let (service, survey_id, q1) = service_with_survey().await;
        let sub = service.create(&survey_id, "ev").await.unwrap();

        service
            .submit_answers(&sub.id, &[text_answer(&q1, "before")])
            .await
            .unwrap();
        let completed = service.complete(&sub.id).await.unwrap();
        assert!(completed.completed_at.is_some());

        assert!(matches!(
            service
                .submit_answers(&sub.id, &[text_answer(&q1, "after")])
                .await,
            Err(ApiError::Conflict(_))
        ));

        let answers = service.answers_for_survey(&survey_id).await.unwrap();
        assert_eq!(answers[0].text_value.as_deref(), Some("before"));
    }

    #[tokio::test]
    async fn test_complete_exactly_once() {
        let (service, survey_id, _) = service_with_survey().await;
        let sub = service.create(&survey_id, "ev").await.unwrap();

        service.complete(&sub.id).await.unwrap();
        assert!(matches!(
            service.complete(&sub.id).await,
            Err(ApiError::Conflict(_))
        ));
        assert!(matches!(
            service.complete("missing").await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_metrics_overview() {
        let (service, survey_id, q1) = service_with_survey().await;

        let a = service.create(&survey_id, "ev").await.unwrap();
        let _b = service.create(&survey_id, "ev").await.unwrap();

        service
            .submit_answers(&a.id, &[text_answer(&q1, "hello")])
            .await
            .unwrap();
        service.complete(&a.id).await.unwrap();

        let metrics = service.metrics_overview(&survey_id).await.unwrap();
        assert_eq!(metrics.total_submissions, 2);
        assert_eq!(metrics.completed_submissions, 1);
        assert!((metrics.completion_rate - 0.5).abs() < f64::EPSILON);
        assert!(metrics.avg_completion_seconds.is_some());
        assert_eq!(metrics.answer_count, 1);
    }

    #[tokio::test]
    async fn test_question_metrics_choice_distribution() {
        let (service, survey_id, q1) = service_with_survey().await;

        for values in [vec!["red"], vec!["red", "blue"], vec!["blue"]] {
            let sub = service.create(&survey_id, "ev").await.unwrap();
            service
                .submit_answers(
                    &sub.id,
                    &[AnswerInput {
                        question_id: q1.clone(),
                        choice_values: values.iter().map(|s| s.to_string()).collect(),
                        text_value: None,
                        number_value: None,
                    }],
                )
                .await
                .unwrap();
        }

        let metrics = service.question_metrics(&q1).await.unwrap();
        assert_eq!(metrics.answer_count, 3);
        let counts: std::collections::HashMap<_, _> = metrics
            .choice_counts
            .iter()
            .map(|c| (c.value.as_str(), c.count))
            .collect();
        assert_eq!(counts.get("red"), Some(&2));
        assert_eq!(counts.get("blue"), Some(&2));
        assert_eq!(metrics.number_average, None);
        assert!(metrics.text_values.is_empty());
    }

    #[tokio::test]
    async fn test_question_metrics_numeric_average() {
        let (service, survey_id, q1) = service_with_survey().await;

        for n in [6.0, 8.0, 10.0] {
            let sub = service.create(&survey_id, "ev").await.unwrap();
            service
                .submit_answers(
                    &sub.id,
                    &[AnswerInput {
                        question_id: q1.clone(),
                        choice_values: vec![],
                        text_value: None,
                        number_value: Some(n),
                    }],
                )
                .await
                .unwrap();
        }

        let metrics = service.question_metrics(&q1).await.unwrap();
        assert_eq!(metrics.number_average, Some(8.0));
    }
}
