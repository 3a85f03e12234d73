use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::error::LoadError;

const TRUE_FALSE_OPTIONS: [&str; 2] = ["True", "False"];

/// Wire-level question type. Only used at the deserialization boundary;
/// everything past it matches on [`QuestionKind`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    #[default]
    Mcq,
    TrueFalse,
    #[serde(alias = "fill_in_blank")]
    FillBlank,
    Essay,
    CodeDragDrop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuestionKind {
    Mcq {
        options: Vec<String>,
        correct_answer: Option<usize>,
    },
    TrueFalse {
        options: Vec<String>,
        correct_answer: Option<usize>,
    },
    FillInBlank {
        correct_answer: Option<String>,
    },
    Essay,
    CodeDragDrop {
        blocks: Vec<String>,
        correct_order: Option<Vec<usize>>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "QuestionPayload", into = "QuestionPayload")]
pub struct Question {
    pub id: String,
    pub prompt: String,
    pub explanation: Option<String>,
    pub kind: QuestionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuestionPayload {
    #[serde(alias = "_id")]
    id: String,
    question: String,
    #[serde(default)]
    question_type: QuestionType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correct_answer: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    explanation: Option<String>,
}

fn index_from_value(value: &Value, options: &[String]) -> Result<usize, String> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(|v| v as usize)
            .ok_or_else(|| format!("correctAnswer `{n}` is not an index")),
        Value::String(s) => s.trim().parse::<usize>().or_else(|_| {
            options
                .iter()
                .position(|o| o.trim().eq_ignore_ascii_case(s.trim()))
                .ok_or_else(|| format!("correctAnswer `{s}` matches no option"))
        }),
        Value::Bool(b) => {
            let label = if *b { "true" } else { "false" };
            Ok(options
                .iter()
                .position(|o| o.trim().eq_ignore_ascii_case(label))
                .unwrap_or(if *b { 0 } else { 1 }))
        }
        other => Err(format!("correctAnswer `{other}` is not an index")),
    }
}

impl TryFrom<QuestionPayload> for Question {
    type Error = String;

    fn try_from(raw: QuestionPayload) -> Result<Self, Self::Error> {
        let kind = match raw.question_type {
            QuestionType::Mcq => {
                let correct_answer = raw
                    .correct_answer
                    .as_ref()
                    .map(|v| index_from_value(v, &raw.options))
                    .transpose()?;
                QuestionKind::Mcq { options: raw.options, correct_answer }
            }
            QuestionType::TrueFalse => {
                let options = if raw.options.is_empty() {
                    TRUE_FALSE_OPTIONS.iter().map(|s| s.to_string()).collect()
                } else {
                    raw.options
                };
                let correct_answer = raw
                    .correct_answer
                    .as_ref()
                    .map(|v| index_from_value(v, &options))
                    .transpose()?;
                QuestionKind::TrueFalse { options, correct_answer }
            }
            QuestionType::FillBlank => QuestionKind::FillInBlank {
                correct_answer: raw.correct_answer.map(|v| match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                }),
            },
            QuestionType::Essay => QuestionKind::Essay,
            QuestionType::CodeDragDrop => {
                let correct_order = match raw.correct_answer {
                    Some(value) => Some(
                        serde_json::from_value::<Vec<usize>>(value)
                            .map_err(|e| format!("correctAnswer for code_drag_drop: {e}"))?,
                    ),
                    None => None,
                };
                QuestionKind::CodeDragDrop { blocks: raw.options, correct_order }
            }
        };
        Ok(Question {
            id: raw.id,
            prompt: raw.question,
            explanation: raw.explanation,
            kind,
        })
    }
}

impl From<Question> for QuestionPayload {
    fn from(q: Question) -> Self {
        let (question_type, options, correct_answer) = match q.kind {
            QuestionKind::Mcq { options, correct_answer } => {
                (QuestionType::Mcq, options, correct_answer.map(Value::from))
            }
            QuestionKind::TrueFalse { options, correct_answer } => {
                (QuestionType::TrueFalse, options, correct_answer.map(Value::from))
            }
            QuestionKind::FillInBlank { correct_answer } => {
                (QuestionType::FillBlank, Vec::new(), correct_answer.map(Value::from))
            }
            QuestionKind::Essay => (QuestionType::Essay, Vec::new(), None),
            QuestionKind::CodeDragDrop { blocks, correct_order } => {
                (QuestionType::CodeDragDrop, blocks, correct_order.map(Value::from))
            }
        };
        QuestionPayload {
            id: q.id,
            question: q.prompt,
            question_type,
            options,
            correct_answer,
            explanation: q.explanation,
        }
    }
}

impl Question {
    pub fn question_type(&self) -> QuestionType {
        match self.kind {
            QuestionKind::Mcq { .. } => QuestionType::Mcq,
            QuestionKind::TrueFalse { .. } => QuestionType::TrueFalse,
            QuestionKind::FillInBlank { .. } => QuestionType::FillBlank,
            QuestionKind::Essay => QuestionType::Essay,
            QuestionKind::CodeDragDrop { .. } => QuestionType::CodeDragDrop,
        }
    }

    /// Options in their authoritative order. Drag-and-drop blocks count as options.
    pub fn options(&self) -> &[String] {
        match &self.kind {
            QuestionKind::Mcq { options, .. } | QuestionKind::TrueFalse { options, .. } => options.as_slice(),
            QuestionKind::CodeDragDrop { blocks, .. } => blocks.as_slice(),
            QuestionKind::FillInBlank { .. } | QuestionKind::Essay => &[],
        }
    }

    /// Whether `answer` has the right shape for this question and stays in range.
    pub fn accepts(&self, answer: &Answer) -> bool {
        match (&self.kind, answer) {
            (
                QuestionKind::Mcq { options, .. } | QuestionKind::TrueFalse { options, .. },
                Answer::Choice(index),
            ) => *index < options.len(),
            (QuestionKind::FillInBlank { .. } | QuestionKind::Essay, Answer::Text(text)) => {
                !text.trim().is_empty()
            }
            (QuestionKind::CodeDragDrop { blocks, .. }, Answer::Order(order)) => {
                order.len() == blocks.len() && is_index_permutation(order)
            }
            _ => false,
        }
    }
}

pub(crate) fn is_index_permutation(indices: &[usize]) -> bool {
    let mut seen = vec![false; indices.len()];
    for &i in indices {
        match seen.get_mut(i) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    #[serde(alias = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Minutes.
    pub duration: u32,
    pub questions: Vec<Question>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl Quiz {
    pub fn duration_secs(&self) -> u64 {
        u64::from(self.duration) * 60
    }

    pub fn question(&self, id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    pub fn check_availability(&self, now: DateTime<Utc>) -> Result<(), LoadError> {
        if let Some(start) = self.start_time {
            if now < start {
                return Err(LoadError::NotStarted { starts_at: Some(start) });
            }
        }
        if let Some(end) = self.end_time {
            if now >= end {
                return Err(LoadError::Ended);
            }
        }
        Ok(())
    }
}

/// An answer expressed in original (authoritative) option indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Choice(usize),
    Text(String),
    Order(Vec<usize>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub question_id: String,
    pub selected_answer: Answer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    pub quiz_id: String,
    pub answers: Vec<AnswerRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedResult {
    pub question_id: String,
    #[serde(default)]
    pub selected_answer: Option<Answer>,
    #[serde(default)]
    pub correct_answer: Option<Value>,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default)]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub score: u32,
    pub total_questions: u32,
    pub percentage: f64,
    #[serde(default)]
    pub detailed_results: Vec<DetailedResult>,
    #[serde(default)]
    pub is_practice: bool,
    #[serde(default)]
    pub attempt_number: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionResponse {
    pub result: SubmissionResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(alias = "studentName", alias = "username")]
    pub name: String,
    pub score: u32,
    #[serde(default)]
    pub percentage: f64,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagRequest {
    pub quiz_id: String,
    pub question_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub issue: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.issue)
    }
}

/// Local sanity checks run before an attempt starts.
pub fn validate_quiz(quiz: &Quiz) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    if quiz.title.trim().is_empty() {
        issues.push(ValidationIssue {
            field: "title".into(),
            issue: "must not be empty".into(),
        });
    }
    if quiz.duration == 0 {
        issues.push(ValidationIssue {
            field: "duration".into(),
            issue: "must be at least one minute".into(),
        });
    }
    if quiz.questions.is_empty() {
        issues.push(ValidationIssue {
            field: "questions".into(),
            issue: "must contain at least one question".into(),
        });
    }

    let mut question_ids = HashSet::new();
    for (i, q) in quiz.questions.iter().enumerate() {
        if q.id.trim().is_empty() {
            issues.push(ValidationIssue {
                field: format!("questions[{i}].id"),
                issue: "must not be empty".into(),
            });
        }
        if !question_ids.insert(q.id.as_str()) {
            issues.push(ValidationIssue {
                field: format!("questions[{i}].id"),
                issue: "must be unique".into(),
            });
        }
        if q.prompt.trim().is_empty() {
            issues.push(ValidationIssue {
                field: format!("questions[{i}].question"),
                issue: "must not be empty".into(),
            });
        }

        match &q.kind {
            QuestionKind::Mcq { options, correct_answer }
            | QuestionKind::TrueFalse { options, correct_answer } => {
                if options.len() < 2 {
                    issues.push(ValidationIssue {
                        field: format!("questions[{i}].options"),
                        issue: "must contain at least 2 options".into(),
                    });
                }
                if let Some(idx) = correct_answer {
                    if *idx >= options.len() {
                        issues.push(ValidationIssue {
                            field: format!("questions[{i}].correctAnswer"),
                            issue: "must reference an existing option".into(),
                        });
                    }
                }
            }
            QuestionKind::CodeDragDrop { blocks, correct_order } => {
                if blocks.len() < 2 {
                    issues.push(ValidationIssue {
                        field: format!("questions[{i}].options"),
                        issue: "must contain at least 2 code blocks".into(),
                    });
                }
                if let Some(order) = correct_order {
                    if order.len() != blocks.len() || !is_index_permutation(order) {
                        issues.push(ValidationIssue {
                            field: format!("questions[{i}].correctAnswer"),
                            issue: "must be a permutation of the code blocks".into(),
                        });
                    }
                }
            }
            QuestionKind::FillInBlank { .. } | QuestionKind::Essay => {}
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_quiz() -> Quiz {
        serde_json::from_value(json!({
            "_id": "quiz-1",
            "title": "Rust basics",
            "code": "RUST01",
            "duration": 5,
            "questions": [
                {"id": "q1", "question": "Borrow checker?", "options": ["Yes", "No", "Maybe"], "correctAnswer": 0},
                {"id": "q2", "question": "Rust is fast", "questionType": "true_false", "correctAnswer": "true"},
                {"id": "q3", "question": "Keyword for immutable binding", "questionType": "fill_blank", "correctAnswer": "let"},
                {"id": "q4", "question": "Explain ownership", "questionType": "essay"},
                {"id": "q5", "question": "Order the lines", "questionType": "code_drag_drop",
                 "options": ["fn main() {", "println!(\"hi\");", "}"], "correctAnswer": [0, 1, 2]}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn question_type_is_resolved_once() {
        let quiz = sample_quiz();
        assert_eq!(quiz.id, "quiz-1");
        let types: Vec<_> = quiz.questions.iter().map(|q| q.question_type()).collect();
        assert_eq!(
            types,
            vec![
                QuestionType::Mcq,
                QuestionType::TrueFalse,
                QuestionType::FillBlank,
                QuestionType::Essay,
                QuestionType::CodeDragDrop
            ]
        );
        match &quiz.questions[1].kind {
            QuestionKind::TrueFalse { options, correct_answer } => {
                assert_eq!(options, &vec!["True".to_string(), "False".to_string()]);
                assert_eq!(*correct_answer, Some(0));
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn unknown_question_type_is_rejected() {
        let raw = json!({"id": "q1", "question": "?", "questionType": "hotspot"});
        assert!(serde_json::from_value::<Question>(raw).is_err());
    }

    #[test]
    fn boolean_correct_answer_follows_option_text() {
        let correct = |raw: Value| match serde_json::from_value::<Question>(raw).unwrap().kind {
            QuestionKind::TrueFalse { correct_answer, .. } => correct_answer,
            other => panic!("unexpected kind {other:?}"),
        };
        let swapped = json!({
            "id": "q1", "question": "?", "questionType": "true_false",
            "options": ["False", "True"], "correctAnswer": true
        });
        assert_eq!(correct(swapped), Some(1));
        let defaulted = json!({
            "id": "q2", "question": "?", "questionType": "true_false", "correctAnswer": false
        });
        assert_eq!(correct(defaulted), Some(1));
    }

    #[test]
    fn accepts_matches_kind_and_range() {
        let quiz = sample_quiz();
        assert!(quiz.questions[0].accepts(&Answer::Choice(2)));
        assert!(!quiz.questions[0].accepts(&Answer::Choice(3)));
        assert!(!quiz.questions[0].accepts(&Answer::Text("Yes".into())));
        assert!(quiz.questions[2].accepts(&Answer::Text(" let ".into())));
        assert!(!quiz.questions[3].accepts(&Answer::Text("   ".into())));
        assert!(quiz.questions[4].accepts(&Answer::Order(vec![2, 0, 1])));
        assert!(!quiz.questions[4].accepts(&Answer::Order(vec![0, 0, 1])));
        assert!(!quiz.questions[4].accepts(&Answer::Order(vec![0, 1])));
    }

    #[test]
    fn answers_use_untagged_wire_shape() {
        let payload = SubmissionPayload {
            quiz_id: "quiz-1".into(),
            answers: vec![
                AnswerRecord { question_id: "q1".into(), selected_answer: Answer::Choice(1) },
                AnswerRecord { question_id: "q3".into(), selected_answer: Answer::Text("let".into()) },
                AnswerRecord { question_id: "q5".into(), selected_answer: Answer::Order(vec![1, 0]) },
            ],
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({
                "quizId": "quiz-1",
                "answers": [
                    {"questionId": "q1", "selectedAnswer": 1},
                    {"questionId": "q3", "selectedAnswer": "let"},
                    {"questionId": "q5", "selectedAnswer": [1, 0]}
                ]
            })
        );
    }

    #[test]
    fn validate_quiz_ok() {
        assert!(validate_quiz(&sample_quiz()).is_ok());
    }

    #[test]
    fn validate_quiz_negative() {
        let mut quiz = sample_quiz();
        quiz.questions[1].id = "q1".into();
        quiz.questions[0].kind = QuestionKind::Mcq {
            options: vec!["only".into()],
            correct_answer: Some(4),
        };
        quiz.duration = 0;
        let issues = validate_quiz(&quiz).unwrap_err();
        assert!(issues.iter().any(|i| i.issue.contains("unique")));
        assert!(issues.iter().any(|i| i.field == "questions[0].correctAnswer"));
        assert!(issues.iter().any(|i| i.field == "duration"));
    }

    #[test]
    fn availability_window() {
        let mut quiz = sample_quiz();
        let now = Utc::now();
        assert!(quiz.check_availability(now).is_ok());
        quiz.start_time = Some(now + chrono::Duration::minutes(10));
        assert!(matches!(quiz.check_availability(now), Err(LoadError::NotStarted { .. })));
        quiz.start_time = None;
        quiz.end_time = Some(now - chrono::Duration::minutes(1));
        assert!(matches!(quiz.check_availability(now), Err(LoadError::Ended)));
    }

    #[test]
    fn submission_result_defaults() {
        let parsed: SubmissionResponse = serde_json::from_value(json!({
            "result": {"score": 1, "totalQuestions": 2, "percentage": 50.0}
        }))
        .unwrap();
        assert_eq!(parsed.result.total_questions, 2);
        assert!(!parsed.result.is_practice);
        assert!(parsed.result.detailed_results.is_empty());
    }
}
