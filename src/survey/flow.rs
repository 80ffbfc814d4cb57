/// Conditional flow evaluation: question visibility and section branching
///
/// Pure functions over a loaded survey tree and the answers collected so far.
/// Deterministic by construction: same tree plus same answers always produces
/// the same result.
use crate::submission::AnswerInput;
use crate::survey::{BranchAction, Question, ShowIfOperator, ShowIfRule, Survey};
use std::collections::HashMap;

/// Where the flow goes after finishing a section
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    /// Proceed to the next section in document order
    Advance,
    /// Jump to the named section (always later than the current one)
    JumpToSection(String),
    /// Finish the survey immediately
    End,
}

/// Evaluate a question's visibility against collected answers
///
/// Missing referenced answer hides the question (the condition cannot hold
/// yet), while an unparseable condition shows it; losing a question to bad
/// data is worse than showing one too many.
pub fn question_visible(question: &Question, answers: &HashMap<String, AnswerInput>) -> bool {
    let cond = match &question.show_if_rule {
        ShowIfRule::Always | ShowIfRule::Malformed => return true,
        ShowIfRule::When(cond) => cond,
    };

    let Some(answer) = answers.get(&cond.question_id) else {
        return false;
    };

    match cond.operator {
        // equals/not_equals resolve per answer shape, and not_equals inverts
        // inside each shape: an answer with no usable shape is false for both.
        ShowIfOperator::Equals => answer_equals(answer, &cond.value) == Some(true),
        ShowIfOperator::NotEquals => answer_equals(answer, &cond.value) == Some(false),
        ShowIfOperator::Contains => answer_contains(answer, &cond.value),
        ShowIfOperator::GreaterThan => match (answer.number_value, value_number(&cond.value)) {
            (Some(a), Some(v)) => a > v,
            _ => false,
        },
        ShowIfOperator::LessThan => match (answer.number_value, value_number(&cond.value)) {
            (Some(a), Some(v)) => a < v,
            _ => false,
        },
    }
}

/// Determine where the flow goes after the section at `current_index`
///
/// Scans every question of the section in order, visible or not; for each,
/// walks the selected choice values in selection order and consults the
/// owning option's branch metadata. The first directive found wins and the
/// scan stops. Backward section jumps are ignored (the flow only ever moves
/// forward), in which case the directive is consumed and the scan does not
/// resume.
pub fn branch_directive(
    survey: &Survey,
    current_index: usize,
    answers: &HashMap<String, AnswerInput>,
) -> NextStep {
    let Some(section) = survey.sections.get(current_index) else {
        return NextStep::End;
    };

    for question in &section.questions {
        let Some(answer) = answers.get(&question.id) else {
            continue;
        };

        for selected in &answer.choice_values {
            let Some(option) = question.options.iter().find(|o| &o.value == selected) else {
                continue;
            };

            if option.skip_to_end || option.branch_action == Some(BranchAction::SkipToEnd) {
                return NextStep::End;
            }

            if option.branch_action == Some(BranchAction::SkipToSection) {
                if let Some(target) = &option.target_section_id {
                    match survey.section_index(target) {
                        Some(target_index) if target_index > current_index => {
                            return NextStep::JumpToSection(target.clone());
                        }
                        Some(_) => {
                            tracing::warn!(
                                target,
                                current_index,
                                "ignoring backward section jump"
                            );
                            return NextStep::Advance;
                        }
                        None => {
                            tracing::warn!(target, "branch targets unknown section");
                            return NextStep::Advance;
                        }
                    }
                }
                return NextStep::Advance;
            }

            // SHOW_QUESTION and options without metadata do not redirect
        }
    }

    NextStep::Advance
}

/// Equality against the answer's shape: choice membership for selections,
/// exact string equality for text, numeric equality for numbers. `None` when
/// the answer carries no usable shape or the comparison value cannot be read
/// for that shape.
fn answer_equals(answer: &AnswerInput, value: &serde_json::Value) -> Option<bool> {
    if !answer.choice_values.is_empty() {
        let expected = value_string(value)?;
        return Some(answer.choice_values.iter().any(|c| c == &expected));
    }

    if let Some(text) = answer.text_value.as_deref() {
        let expected = value_string(value)?;
        return Some(text == expected);
    }

    if let Some(n) = answer.number_value {
        let expected = value_number(value)?;
        return Some(n == expected);
    }

    None
}

/// Substring containment: any selected value containing the comparison value,
/// or the text answer containing it. Numbers never satisfy contains.
fn answer_contains(answer: &AnswerInput, value: &serde_json::Value) -> bool {
    let Some(expected) = value_string(value) else {
        return false;
    };

    if !answer.choice_values.is_empty() {
        return answer.choice_values.iter().any(|c| c.contains(&expected));
    }

    answer
        .text_value
        .as_deref()
        .map(|t| t.contains(&expected))
        .unwrap_or(false)
}

fn value_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn value_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
