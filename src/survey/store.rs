/// Survey persistence: tree loading and admin CRUD
use crate::error::{ApiError, ApiResult};
use crate::survey::{
    BranchAction, OptionItem, Question, QuestionType, Section, ShowIfRule, Survey,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Survey list row with aggregate counts for the admin overview
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveySummary {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub section_count: i64,
    pub question_count: i64,
    pub submission_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSurvey {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSection {
    pub title: String,
    pub order: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQuestion {
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub prompt: String,
    #[serde(default)]
    pub help_text: Option<String>,
    #[serde(default)]
    pub required: bool,
    pub order: i64,
    #[serde(default)]
    pub show_if: Option<serde_json::Value>,
    #[serde(default)]
    pub options: Vec<NewOption>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOption {
    pub label: String,
    pub value: String,
    pub order: i64,
    #[serde(default)]
    pub branch_action: Option<BranchAction>,
    #[serde(default)]
    pub target_question_id: Option<String>,
    #[serde(default)]
    pub target_section_id: Option<String>,
    #[serde(default)]
    pub skip_to_end: bool,
}

/// Partial update for an option's branch metadata; absent fields keep their
/// current value, explicit nulls cannot be expressed (use the full option
/// update for that).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchPatch {
    pub branch_action: Option<BranchAction>,
    pub target_question_id: Option<String>,
    pub target_section_id: Option<String>,
    pub skip_to_end: Option<bool>,
}

pub struct SurveyStore {
    db: SqlitePool,
}

impl SurveyStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Load a full survey tree: sections, questions, and options, each in
    /// stored order, with show_if conditions parsed once.
    pub async fn load_tree(&self, survey_id: &str) -> ApiResult<Option<Survey>> {
        let row = sqlx::query(
            "SELECT id, title, description, is_active, created_at FROM survey WHERE id = ?1",
        )
        .bind(survey_id)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut survey = Survey {
            id: row.get("id"),
            title: row.get("title"),
            description: row.get("description"),
            is_active: row.get("is_active"),
            created_at: row.get("created_at"),
            sections: Vec::new(),
        };

        let section_rows = sqlx::query(
            "SELECT id, title, \"order\" FROM section WHERE survey_id = ?1 ORDER BY \"order\", id",
        )
        .bind(survey_id)
        .fetch_all(&self.db)
        .await?;

        let question_rows = sqlx::query(
            "SELECT q.id, q.section_id, q.type, q.prompt, q.help_text, q.required,
                    q.\"order\", q.show_if
             FROM question q
             JOIN section s ON s.id = q.section_id
             WHERE s.survey_id = ?1
             ORDER BY q.\"order\", q.id",
        )
        .bind(survey_id)
        .fetch_all(&self.db)
        .await?;

        let option_rows = sqlx::query(
            "SELECT o.id, o.question_id, o.label, o.value, o.\"order\",
                    o.branch_action, o.branch_target_question_id,
                    o.branch_target_section_id, o.skip_to_end
             FROM option o
             JOIN question q ON q.id = o.question_id
             JOIN section s ON s.id = q.section_id
             WHERE s.survey_id = ?1
             ORDER BY o.\"order\", o.id",
        )
        .bind(survey_id)
        .fetch_all(&self.db)
        .await?;

        for row in section_rows {
            survey.sections.push(Section {
                id: row.get("id"),
                title: row.get("title"),
                order: row.get("order"),
                questions: Vec::new(),
            });
        }

        for row in question_rows {
            let section_id: String = row.get("section_id");
            let type_text: String = row.get("type");
            let question_type = QuestionType::parse(&type_text).ok_or_else(|| {
                ApiError::Internal(format!("Unknown question type in storage: {}", type_text))
            })?;

            let show_if_text: Option<String> = row.get("show_if");
            let show_if_rule = ShowIfRule::parse(show_if_text.as_deref());
            let show_if = show_if_text.and_then(|t| serde_json::from_str(&t).ok());

            let question = Question {
                id: row.get("id"),
                question_type,
                prompt: row.get("prompt"),
                help_text: row.get("help_text"),
                required: row.get("required"),
                order: row.get("order"),
                show_if,
                show_if_rule,
                options: Vec::new(),
            };

            if let Some(section) = survey.sections.iter_mut().find(|s| s.id == section_id) {
                section.questions.push(question);
            }
        }

        for row in option_rows {
            let question_id: String = row.get("question_id");
            let action_text: Option<String> = row.get("branch_action");
            let branch_action = match action_text.as_deref() {
                None => None,
                Some("SHOW_QUESTION") => Some(BranchAction::ShowQuestion),
                Some("SKIP_TO_SECTION") => Some(BranchAction::SkipToSection),
                Some("SKIP_TO_END") => Some(BranchAction::SkipToEnd),
                Some(other) => {
                    tracing::warn!(other, "unknown branch action in storage, ignoring");
                    None
                }
            };

            let option = OptionItem {
                id: row.get("id"),
                label: row.get("label"),
                value: row.get("value"),
                order: row.get("order"),
                branch_action,
                target_question_id: row.get("branch_target_question_id"),
                target_section_id: row.get("branch_target_section_id"),
                skip_to_end: row.get("skip_to_end"),
            };

            if let Some(question) = survey
                .sections
                .iter_mut()
                .flat_map(|s| s.questions.iter_mut())
                .find(|q| q.id == question_id)
            {
                question.options.push(option);
            }
        }

        Ok(Some(survey))
    }

    /// The active survey for the public intake flow. When several are active
    /// the oldest wins, so flipping a new survey active cannot silently steal
    /// traffic from a running one.
    pub async fn find_active(&self) -> ApiResult<Option<Survey>> {
        let id: Option<String> = sqlx::query_scalar(
            "SELECT id FROM survey WHERE is_active = 1 ORDER BY created_at ASC, id ASC LIMIT 1",
        )
        .fetch_optional(&self.db)
        .await?;

        match id {
            Some(id) => self.load_tree(&id).await,
            None => Ok(None),
        }
    }

    /// List all surveys with aggregate counts, newest first
    pub async fn list(&self) -> ApiResult<Vec<SurveySummary>> {
        let rows = sqlx::query(
            "SELECT s.id, s.title, s.description, s.is_active, s.created_at,
                    (SELECT COUNT(*) FROM section WHERE survey_id = s.id) AS section_count,
                    (SELECT COUNT(*) FROM question q JOIN section x ON x.id = q.section_id
                     WHERE x.survey_id = s.id) AS question_count,
                    (SELECT COUNT(*) FROM submission WHERE survey_id = s.id) AS submission_count
             FROM survey s
             ORDER BY s.created_at DESC, s.id DESC",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| SurveySummary {
                id: row.get("id"),
                title: row.get("title"),
                description: row.get("description"),
                is_active: row.get("is_active"),
                created_at: row.get("created_at"),
                section_count: row.get("section_count"),
                question_count: row.get("question_count"),
                submission_count: row.get("submission_count"),
            })
            .collect())
    }

    pub async fn create_survey(&self, new: &NewSurvey) -> ApiResult<Survey> {
        if new.title.trim().is_empty() {
            return Err(ApiError::Validation(
                "Field 'title' must not be empty".to_string(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO survey (id, title, description, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(new.is_active)
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok(Survey {
            id,
            title: new.title.clone(),
            description: new.description.clone(),
            is_active: new.is_active,
            created_at: now,
            sections: Vec::new(),
        })
    }

    pub async fn update_survey(&self, survey_id: &str, patch: &SurveyPatch) -> ApiResult<Survey> {
        let result = sqlx::query(
            "UPDATE survey SET
                title = COALESCE(?1, title),
                description = COALESCE(?2, description),
                is_active = COALESCE(?3, is_active)
             WHERE id = ?4",
        )
        .bind(&patch.title)
        .bind(&patch.description)
        .bind(patch.is_active)
        .bind(survey_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("Survey not found".to_string()));
        }

        self.load_tree(survey_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Survey not found".to_string()))
    }

    /// Delete a survey; sections, questions, options, submissions, and
    /// answers cascade.
    pub async fn delete_survey(&self, survey_id: &str) -> ApiResult<()> {
        let result = sqlx::query("DELETE FROM survey WHERE id = ?1")
            .bind(survey_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("Survey not found".to_string()));
        }

        Ok(())
    }

    pub async fn create_section(&self, survey_id: &str, new: &NewSection) -> ApiResult<Section> {
        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM survey WHERE id = ?1")
            .bind(survey_id)
            .fetch_one(&self.db)
            .await?;
        if exists == 0 {
            return Err(ApiError::NotFound("Survey not found".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO section (id, survey_id, title, \"order\") VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&id)
        .bind(survey_id)
        .bind(&new.title)
        .bind(new.order)
        .execute(&self.db)
        .await?;

        Ok(Section {
            id,
            title: new.title.clone(),
            order: new.order,
            questions: Vec::new(),
        })
    }

    pub async fn delete_section(&self, section_id: &str) -> ApiResult<()> {
        let result = sqlx::query("DELETE FROM section WHERE id = ?1")
            .bind(section_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("Section not found".to_string()));
        }

        Ok(())
    }

    /// Create a question with its inline options in one transaction
    pub async fn create_question(
        &self,
        section_id: &str,
        new: &NewQuestion,
    ) -> ApiResult<Question> {
        if !new.question_type.has_options() && !new.options.is_empty() {
            return Err(ApiError::Validation(format!(
                "Question type {} does not take options",
                new.question_type.as_str()
            )));
        }

        let mut tx = self.db.begin().await?;

        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM section WHERE id = ?1")
            .bind(section_id)
            .fetch_one(&mut *tx)
            .await?;
        if exists == 0 {
            return Err(ApiError::NotFound("Section not found".to_string()));
        }

        let show_if_text = new.show_if.as_ref().map(|v| v.to_string());
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO question (id, section_id, type, prompt, help_text, required, \"order\", show_if)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&id)
        .bind(section_id)
        .bind(new.question_type.as_str())
        .bind(&new.prompt)
        .bind(&new.help_text)
        .bind(new.required)
        .bind(new.order)
        .bind(&show_if_text)
        .execute(&mut *tx)
        .await?;

        let mut options = Vec::with_capacity(new.options.len());
        for opt in &new.options {
            let opt_id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO option (id, question_id, label, value, \"order\",
                                     branch_action, branch_target_question_id,
                                     branch_target_section_id, skip_to_end)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .bind(&opt_id)
            .bind(&id)
            .bind(&opt.label)
            .bind(&opt.value)
            .bind(opt.order)
            .bind(opt.branch_action.map(branch_action_str))
            .bind(&opt.target_question_id)
            .bind(&opt.target_section_id)
            .bind(opt.skip_to_end)
            .execute(&mut *tx)
            .await?;

            options.push(OptionItem {
                id: opt_id,
                label: opt.label.clone(),
                value: opt.value.clone(),
                order: opt.order,
                branch_action: opt.branch_action,
                target_question_id: opt.target_question_id.clone(),
                target_section_id: opt.target_section_id.clone(),
                skip_to_end: opt.skip_to_end,
            });
        }

        tx.commit().await?;

        Ok(Question {
            id,
            question_type: new.question_type,
            prompt: new.prompt.clone(),
            help_text: new.help_text.clone(),
            required: new.required,
            order: new.order,
            show_if: new.show_if.clone(),
            show_if_rule: ShowIfRule::parse(show_if_text.as_deref()),
            options,
        })
    }

    pub async fn delete_question(&self, question_id: &str) -> ApiResult<()> {
        let result = sqlx::query("DELETE FROM question WHERE id = ?1")
            .bind(question_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("Question not found".to_string()));
        }

        Ok(())
    }

    /// Patch an option's branch metadata
    pub async fn update_branch(&self, option_id: &str, patch: &BranchPatch) -> ApiResult<()> {
        let result = sqlx::query(
            "UPDATE option SET
                branch_action = COALESCE(?1, branch_action),
                branch_target_question_id = COALESCE(?2, branch_target_question_id),
                branch_target_section_id = COALESCE(?3, branch_target_section_id),
                skip_to_end = COALESCE(?4, skip_to_end)
             WHERE id = ?5",
        )
        .bind(patch.branch_action.map(branch_action_str))
        .bind(&patch.target_question_id)
        .bind(&patch.target_section_id)
        .bind(patch.skip_to_end)
        .bind(option_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("Option not found".to_string()));
        }

        Ok(())
    }
}

fn branch_action_str(action: BranchAction) -> &'static str {
    match action {
        BranchAction::ShowQuestion => "SHOW_QUESTION",
        BranchAction::SkipToSection => "SKIP_TO_SECTION",
        BranchAction::SkipToEnd => "SKIP_TO_END",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;

    async fn store() -> SurveyStore {
        SurveyStore::new(memory_pool().await)
    }

    async fn seed_survey(store: &SurveyStore) -> Survey {
        let survey = store
            .create_survey(&NewSurvey {
                title: "Event Feedback".to_string(),
                description: Some("How was it?".to_string()),
                is_active: true,
            })
            .await
            .unwrap();

        let sec = store
            .create_section(
                &survey.id,
                &NewSection {
                    title: "About you".to_string(),
                    order: 1,
                },
            )
            .await
            .unwrap();

        store
            .create_question(
                &sec.id,
                &NewQuestion {
                    question_type: QuestionType::Single,
                    prompt: "Did you attend?".to_string(),
                    help_text: None,
                    required: true,
                    order: 1,
                    show_if: None,
                    options: vec![
                        NewOption {
                            label: "Yes".to_string(),
                            value: "yes".to_string(),
                            order: 1,
                            branch_action: None,
                            target_question_id: None,
                            target_section_id: None,
                            skip_to_end: false,
                        },
                        NewOption {
                            label: "No".to_string(),
                            value: "no".to_string(),
                            order: 2,
                            branch_action: Some(BranchAction::SkipToEnd),
                            target_question_id: None,
                            target_section_id: None,
                            skip_to_end: true,
                        },
                    ],
                },
            )
            .await
            .unwrap();

        store
            .create_question(
                &sec.id,
                &NewQuestion {
                    question_type: QuestionType::Text,
                    prompt: "What stood out?".to_string(),
                    help_text: None,
                    required: false,
                    order: 2,
                    show_if: Some(serde_json::json!({
                        "questionId": "q1", "operator": "equals", "value": "yes"
                    })),
                    options: vec![],
                },
            )
            .await
            .unwrap();

        store.load_tree(&survey.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_tree_loads_in_order_with_parsed_conditions() {
        let store = store().await;
        let tree = seed_survey(&store).await;

        assert_eq!(tree.sections.len(), 1);
        let questions = &tree.sections[0].questions;
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].prompt, "Did you attend?");
        assert_eq!(questions[0].options.len(), 2);
        assert_eq!(questions[0].options[1].value, "no");
        assert!(questions[0].options[1].skip_to_end);
        assert_eq!(
            questions[0].options[1].branch_action,
            Some(BranchAction::SkipToEnd)
        );

        assert!(matches!(questions[1].show_if_rule, ShowIfRule::When(_)));
        assert_eq!(questions[0].show_if_rule, ShowIfRule::Always);
    }

    #[tokio::test]
    async fn test_equal_order_values_tie_break_by_id() {
        let store = store().await;
        let survey = store
            .create_survey(&NewSurvey {
                title: "Ties".to_string(),
                description: None,
                is_active: false,
            })
            .await
            .unwrap();

        // Insert in reverse id order with identical "order" values; the tree
        // must still come back in a single deterministic order.
        for id in ["sec-b", "sec-a"] {
            sqlx::query(
                "INSERT INTO section (id, survey_id, title, \"order\") VALUES (?1, ?2, ?1, 1)",
            )
            .bind(id)
            .bind(&survey.id)
            .execute(&store.db)
            .await
            .unwrap();
        }
        for id in ["q-b", "q-a"] {
            sqlx::query(
                "INSERT INTO question (id, section_id, type, prompt, required, \"order\")
                 VALUES (?1, 'sec-a', 'TEXT', ?1, 0, 1)",
            )
            .bind(id)
            .execute(&store.db)
            .await
            .unwrap();
        }

        let tree = store.load_tree(&survey.id).await.unwrap().unwrap();
        assert_eq!(tree.sections[0].id, "sec-a");
        assert_eq!(tree.sections[1].id, "sec-b");
        assert_eq!(tree.sections[0].questions[0].id, "q-a");
        assert_eq!(tree.sections[0].questions[1].id, "q-b");
    }

    #[tokio::test]
    async fn test_find_active_prefers_oldest() {
        let store = store().await;

        let first = store
            .create_survey(&NewSurvey {
                title: "First".to_string(),
                description: None,
                is_active: true,
            })
            .await
            .unwrap();

        // Backdate nothing; insertion order breaks the tie via id ordering is
        // not guaranteed, so set distinct timestamps explicitly.
        sqlx::query("UPDATE survey SET created_at = ?1 WHERE id = ?2")
            .bind(Utc::now() - chrono::Duration::days(1))
            .bind(&first.id)
            .execute(&store.db)
            .await
            .unwrap();

        store
            .create_survey(&NewSurvey {
                title: "Second".to_string(),
                description: None,
                is_active: true,
            })
            .await
            .unwrap();

        let active = store.find_active().await.unwrap().unwrap();
        assert_eq!(active.id, first.id);
    }

    #[tokio::test]
    async fn test_options_rejected_on_free_form_question() {
        let store = store().await;
        let survey = store
            .create_survey(&NewSurvey {
                title: "S".to_string(),
                description: None,
                is_active: false,
            })
            .await
            .unwrap();
        let sec = store
            .create_section(
                &survey.id,
                &NewSection {
                    title: "Sec".to_string(),
                    order: 1,
                },
            )
            .await
            .unwrap();

        let result = store
            .create_question(
                &sec.id,
                &NewQuestion {
                    question_type: QuestionType::Text,
                    prompt: "Free form".to_string(),
                    help_text: None,
                    required: false,
                    order: 1,
                    show_if: None,
                    options: vec![NewOption {
                        label: "x".to_string(),
                        value: "x".to_string(),
                        order: 1,
                        branch_action: None,
                        target_question_id: None,
                        target_section_id: None,
                        skip_to_end: false,
                    }],
                },
            )
            .await;

        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn test_delete_survey_cascades() {
        let store = store().await;
        let tree = seed_survey(&store).await;

        store.delete_survey(&tree.id).await.unwrap();

        let sections: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM section")
            .fetch_one(&store.db)
            .await
            .unwrap();
        let questions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM question")
            .fetch_one(&store.db)
            .await
            .unwrap();
        let options: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM option")
            .fetch_one(&store.db)
            .await
            .unwrap();
        assert_eq!((sections, questions, options), (0, 0, 0));

        assert!(matches!(
            store.delete_survey(&tree.id).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_branch_patch() {
        let store = store().await;
        let tree = seed_survey(&store).await;
        let option_id = tree.sections[0].questions[0].options[0].id.clone();

        store
            .update_branch(
                &option_id,
                &BranchPatch {
                    branch_action: Some(BranchAction::SkipToSection),
                    target_question_id: None,
                    target_section_id: Some("sec-later".to_string()),
                    skip_to_end: None,
                },
            )
            .await
            .unwrap();

        let reloaded = store.load_tree(&tree.id).await.unwrap().unwrap();
        let opt = &reloaded.sections[0].questions[0].options[0];
        assert_eq!(opt.branch_action, Some(BranchAction::SkipToSection));
        assert_eq!(opt.target_section_id.as_deref(), Some("sec-later"));
        assert!(!opt.skip_to_end);
    }

    #[tokio::test]
    async fn test_list_counts() {
        let store = store().await;
        let tree = seed_survey(&store).await;

        let summaries = store.list().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, tree.id);
        assert_eq!(summaries[0].section_count, 1);
        assert_eq!(summaries[0].question_count, 2);
        assert_eq!(summaries[0].submission_count, 0);
    }
}
