/// Survey tree: surveys contain ordered sections, sections contain ordered
/// questions, choice questions carry ordered options.
///
/// Two pieces of conditional-flow metadata live on this tree:
///  - `show_if` on a question gates its visibility on a prior answer
///  - branch fields on an option redirect the flow when that option is chosen
mod flow;
mod store;

pub use flow::{branch_directive, question_visible, NextStep};
pub use store::{
    BranchPatch, NewOption, NewQuestion, NewSection, NewSurvey, SurveyPatch, SurveyStore,
    SurveySummary,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Question types. Single/Multi carry options; the rest are free-form inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    Single,
    Multi,
    Likert,
    Text,
    #[serde(rename = "LONGTEXT")]
    LongText,
    Nps,
    Number,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Single => "SINGLE",
            QuestionType::Multi => "MULTI",
            QuestionType::Likert => "LIKERT",
            QuestionType::Text => "TEXT",
            QuestionType::LongText => "LONGTEXT",
            QuestionType::Nps => "NPS",
            QuestionType::Number => "NUMBER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SINGLE" => Some(QuestionType::Single),
            "MULTI" => Some(QuestionType::Multi),
            "LIKERT" => Some(QuestionType::Likert),
            "TEXT" => Some(QuestionType::Text),
            "LONGTEXT" => Some(QuestionType::LongText),
            "NPS" => Some(QuestionType::Nps),
            "NUMBER" => Some(QuestionType::Number),
            _ => None,
        }
    }

    /// Whether this type carries an option list
    pub fn has_options(&self) -> bool {
        matches!(self, QuestionType::Single | QuestionType::Multi)
    }
}

/// Comparison operator for a visibility condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowIfOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
}

/// Visibility condition: show this question only when the answer to
/// `question_id` satisfies `operator` against `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowIf {
    pub question_id: String,
    pub operator: ShowIfOperator,
    pub value: serde_json::Value,
}

/// Parsed form of the stored `show_if` JSON
///
/// Malformed JSON is kept as its own state rather than an error: a survey
/// with a corrupt condition must keep working, with the question visible.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ShowIfRule {
    #[default]
    Always,
    When(ShowIf),
    Malformed,
}

impl ShowIfRule {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            None => ShowIfRule::Always,
            Some(text) => match serde_json::from_str::<ShowIf>(text) {
                Ok(cond) => ShowIfRule::When(cond),
                Err(e) => {
                    tracing::warn!(error = %e, "unparseable show_if condition, treating as always-visible");
                    ShowIfRule::Malformed
                }
            },
        }
    }
}

/// Flow directive attached to an option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchAction {
    ShowQuestion,
    SkipToSection,
    SkipToEnd,
}

/// A selectable option on a SINGLE or MULTI question
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionItem {
    pub id: String,
    pub label: String,
    pub value: String,
    pub order: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_action: Option<BranchAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_question_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_section_id: Option<String>,
    #[serde(default)]
    pub skip_to_end: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
    pub required: bool,
    pub order: i64,
    /// Raw stored condition, surfaced to clients verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_if: Option<serde_json::Value>,
    /// Parsed once at load; not part of the wire format
    #[serde(skip)]
    pub show_if_rule: ShowIfRule,
    pub options: Vec<OptionItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub title: String,
    pub order: i64,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Survey {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub sections: Vec<Section>,
}

impl Survey {
    /// Index of a section by id
    pub fn section_index(&self, section_id: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.id == section_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_type_round_trip() {
        for t in [
            QuestionType::Single,
            QuestionType::Multi,
            QuestionType::Likert,
            QuestionType::Text,
            QuestionType::LongText,
            QuestionType::Nps,
            QuestionType::Number,
        ] {
            assert_eq!(QuestionType::parse(t.as_str()), Some(t));
        }
        assert_eq!(QuestionType::parse("DROPDOWN"), None);
    }

    #[test]
    fn test_question_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&QuestionType::LongText).unwrap(),
            r#""LONGTEXT""#
        );
        assert_eq!(
            serde_json::from_str::<QuestionType>(r#""LONGTEXT""#).unwrap(),
            QuestionType::LongText
        );
        assert_eq!(
            serde_json::to_string(&QuestionType::Single).unwrap(),
            r#""SINGLE""#
        );
    }

    #[test]
    fn test_show_if_rule_parse() {
        assert_eq!(ShowIfRule::parse(None), ShowIfRule::Always);

        let rule = ShowIfRule::parse(Some(
            r#"{"questionId":"q1","operator":"equals","value":"yes"}"#,
        ));
        match rule {
            ShowIfRule::When(cond) => {
                assert_eq!(cond.question_id, "q1");
                assert_eq!(cond.operator, ShowIfOperator::Equals);
                assert_eq!(cond.value, serde_json::json!("yes"));
            }
            other => panic!("expected When, got {:?}", other),
        }

        assert_eq!(ShowIfRule::parse(Some("not json")), ShowIfRule::Malformed);
        assert_eq!(
            ShowIfRule::parse(Some(r#"{"operator":"equals"}"#)),
            ShowIfRule::Malformed
        );
    }
}
