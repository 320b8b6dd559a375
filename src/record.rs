// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Quiz progress record.
//!
//! The [`QuizProgressRecord`] is the unit that flows through every tier.
//! Its wire form is camelCase JSON, matching the progress API:
//!
//! ```json
//! {
//!   "quizId": "communication",
//!   "experience": 40,
//!   "questionsAnswered": 2,
//!   "currentScenarioIndex": 2,
//!   "status": "in-progress",
//!   "scorePercentage": 50,
//!   "questionHistory": [ ... ],
//!   "tools": [],
//!   "lastUpdated": 1767084657058
//! }
//! ```
//!
//! Records read back from storage go through [`QuizProgressRecord::from_json_lenient`],
//! which never fails on a JSON object: wrong field types are coerced or zeroed
//! and the fact is reported so the caller can count the corruption.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProgressError;

/// Current time as epoch millis.
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Lifecycle of one quiz attempt.
///
/// `not-started → in-progress → passed | failed | completed`, and back to
/// `not-started` only through an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuizStatus {
    #[default]
    NotStarted,
    InProgress,
    Passed,
    Failed,
    /// Legacy terminal state for quizzes without a pass threshold.
    Completed,
}

impl QuizStatus {
    /// Terminal states require a non-empty history.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Completed)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::InProgress => "in-progress",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
            "not-started" | "notstarted" => Some(Self::NotStarted),
            "in-progress" | "inprogress" => Some(Self::InProgress),
            "passed" => Some(Self::Passed),
            "failed" => Some(Self::Failed),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for QuizStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One answered (or timed-out) question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionAttempt {
    /// Scenario shown to the learner
    pub scenario_id: String,
    /// Selected option text; empty when the question timed out
    pub selected_answer: String,
    pub is_correct: bool,
    /// Time spent on the question in millis
    pub time_spent_ms: u64,
    #[serde(default)]
    pub timed_out: bool,
}

impl QuestionAttempt {
    /// An answered question; correctness is derived from the expected option.
    pub fn answered(
        scenario_id: impl Into<String>,
        selected: impl Into<String>,
        expected: &str,
        time_spent_ms: u64,
    ) -> Self {
        let selected_answer = selected.into();
        Self {
            scenario_id: scenario_id.into(),
            is_correct: selected_answer == expected,
            selected_answer,
            time_spent_ms,
            timed_out: false,
        }
    }

    /// A question whose timer ran out. Never correct.
    pub fn timed_out(scenario_id: impl Into<String>, time_spent_ms: u64) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            selected_answer: String::new(),
            is_correct: false,
            time_spent_ms,
            timed_out: true,
        }
    }
}

/// Per-quiz rules applied by [`QuizProgressRecord::record_answer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerPolicy {
    /// Number of questions in the quiz
    pub total_questions: usize,
    /// Pass mark in percent; None ends the quiz in `completed`
    pub pass_threshold: Option<u8>,
    pub max_xp: u32,
}

/// Progress of one learner through one quiz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizProgressRecord {
    pub quiz_id: String,
    pub experience: u32,
    pub questions_answered: usize,
    pub current_scenario_index: usize,
    pub status: QuizStatus,
    pub score_percentage: u8,
    pub question_history: Vec<QuestionAttempt>,
    pub tools: Vec<String>,
    /// Epoch millis
    pub last_updated: i64,
}

/// Outcome of a lenient parse.
#[derive(Debug, Clone)]
pub struct ParsedRecord {
    pub record: QuizProgressRecord,
    /// Human-readable notes on every coerced field (empty = clean)
    pub corrections: Vec<String>,
}

impl ParsedRecord {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.corrections.is_empty()
    }
}

impl QuizProgressRecord {
    /// Fresh, not-started record.
    pub fn new(quiz_id: impl Into<String>) -> Self {
        Self {
            quiz_id: quiz_id.into(),
            experience: 0,
            questions_answered: 0,
            current_scenario_index: 0,
            status: QuizStatus::NotStarted,
            score_percentage: 0,
            question_history: Vec::new(),
            tools: Vec::new(),
            last_updated: now_millis(),
        }
    }

    /// Completeness used to order candidates: `max(questionsAnswered, history.len())`.
    #[must_use]
    pub fn effective_count(&self) -> usize {
        self.questions_answered.max(self.question_history.len())
    }

    #[must_use]
    pub fn correct_answers(&self) -> usize {
        self.question_history.iter().filter(|a| a.is_correct).count()
    }

    /// Raw correct-answer ratio, rounded, 0 when nothing was answered.
    #[must_use]
    pub fn compute_score(&self) -> u8 {
        let answered = self.question_history.len();
        if answered == 0 {
            return 0;
        }
        ((self.correct_answers() as f64 * 100.0) / answered as f64).round() as u8
    }

    /// Restore the record invariants in place. Returns true if anything changed.
    ///
    /// - terminal status with empty history → `in-progress`
    /// - `not-started` with answers → `in-progress`
    /// - non-empty history → `questionsAnswered` equals its length
    /// - `currentScenarioIndex` always equals `questionsAnswered`
    /// - `scorePercentage` capped at 100
    pub fn repair(&mut self) -> bool {
        let before = (
            self.status,
            self.questions_answered,
            self.current_scenario_index,
            self.score_percentage,
        );

        if self.status.is_terminal() && self.question_history.is_empty() {
            self.status = QuizStatus::InProgress;
        }
        let history_len = self.question_history.len();
        if history_len > 0 {
            self.questions_answered = history_len;
        }
        if self.status == QuizStatus::NotStarted && self.effective_count() > 0 {
            self.status = QuizStatus::InProgress;
        }
        self.current_scenario_index = self.questions_answered;
        self.score_percentage = self.score_percentage.min(100);

        before
            != (
                self.status,
                self.questions_answered,
                self.current_scenario_index,
                self.score_percentage,
            )
    }

    /// Clamp experience into `[0, max_xp]`.
    pub fn clamp_experience(&mut self, max_xp: u32) -> bool {
        if self.experience > max_xp {
            self.experience = max_xp;
            true
        } else {
            false
        }
    }

    /// Append an answer and advance the state machine.
    ///
    /// On the last question the status becomes `passed`/`failed` against the
    /// policy threshold, or `completed` when there is none.
    pub fn record_answer(
        &mut self,
        attempt: QuestionAttempt,
        xp_delta: i32,
        policy: &AnswerPolicy,
    ) -> Result<QuizStatus, ProgressError> {
        if self.status.is_terminal() {
            return Err(ProgressError::QuizFinished {
                quiz_id: self.quiz_id.clone(),
                status: self.status.to_string(),
            });
        }

        self.question_history.push(attempt);
        self.questions_answered = self.question_history.len();
        self.current_scenario_index = self.questions_answered;
        self.experience = if xp_delta >= 0 {
            self.experience.saturating_add(xp_delta.unsigned_abs())
        } else {
            self.experience.saturating_sub(xp_delta.unsigned_abs())
        }
        .min(policy.max_xp);
        self.score_percentage = self.compute_score();

        self.status = if self.questions_answered >= policy.total_questions {
            match policy.pass_threshold {
                Some(threshold) if self.score_percentage >= threshold => QuizStatus::Passed,
                Some(_) => QuizStatus::Failed,
                None => QuizStatus::Completed,
            }
        } else {
            QuizStatus::InProgress
        };
        self.last_updated = now_millis();
        Ok(self.status)
    }

    /// Unlock a tool. Tools are append-only; duplicates are ignored.
    pub fn add_tool(&mut self, tool: impl Into<String>) -> bool {
        let tool = tool.into();
        if self.tools.contains(&tool) {
            return false;
        }
        self.tools.push(tool);
        true
    }

    /// Parse a stored payload, coercing anything malformed.
    ///
    /// Returns `None` only if the text is not JSON or not an object.
    #[must_use]
    pub fn from_str_lenient(raw: &str) -> Option<ParsedRecord> {
        let value: Value = serde_json::from_str(raw).ok()?;
        Self::from_json_lenient(&value)
    }

    /// Build a record from arbitrary JSON. camelCase and snake_case keys are
    /// both accepted.
    #[must_use]
    pub fn from_json_lenient(value: &Value) -> Option<ParsedRecord> {
        let obj = value.as_object()?;
        let mut corrections = Vec::new();

        let quiz_id = match field(obj, "quizId", "quiz_id") {
            Some(Value::String(s)) => s.clone(),
            None | Some(Value::Null) => String::new(),
            Some(other) => {
                corrections.push("quizId is not a string".to_string());
                other.to_string().trim_matches('"').to_string()
            }
        };

        let experience = coerce_count(obj, "experience", "experience", &mut corrections);
        let questions_answered =
            coerce_count(obj, "questionsAnswered", "questions_answered", &mut corrections);
        let current_scenario_index =
            coerce_count(obj, "currentScenarioIndex", "current_scenario_index", &mut corrections);
        let score = coerce_count(obj, "scorePercentage", "score_percentage", &mut corrections);

        let question_history = match field(obj, "questionHistory", "question_history") {
            Some(Value::Array(items)) => {
                let parsed: Vec<QuestionAttempt> =
                    items.iter().filter_map(attempt_lenient).collect();
                if parsed.len() != items.len() {
                    corrections.push(format!(
                        "dropped {} malformed history entries",
                        items.len() - parsed.len()
                    ));
                }
                parsed
            }
            None | Some(Value::Null) => Vec::new(),
            Some(_) => {
                corrections.push("questionHistory is not an array".to_string());
                Vec::new()
            }
        };

        let tools = match field(obj, "tools", "tools") {
            Some(Value::Array(items)) => {
                let parsed: Vec<String> =
                    items.iter().filter_map(|t| t.as_str().map(str::to_string)).collect();
                if parsed.len() != items.len() {
                    corrections.push("dropped non-string tools".to_string());
                }
                parsed
            }
            None | Some(Value::Null) => Vec::new(),
            Some(_) => {
                corrections.push("tools is not an array".to_string());
                Vec::new()
            }
        };

        let answered_any = questions_answered > 0 || !question_history.is_empty();
        let status = match field(obj, "status", "status") {
            Some(Value::String(s)) => QuizStatus::parse(s).unwrap_or_else(|| {
                corrections.push(format!("unknown status '{s}'"));
                fallback_status(answered_any)
            }),
            None | Some(Value::Null) => fallback_status(answered_any),
            Some(_) => {
                corrections.push("status is not a string".to_string());
                fallback_status(answered_any)
            }
        };

        let last_updated = match field(obj, "lastUpdated", "last_updated") {
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
            // ISO strings from older clients are not parsed; the record still
            // competes on completeness.
            Some(Value::String(s)) => s.trim().parse::<i64>().unwrap_or_else(|_| {
                corrections.push("lastUpdated is not epoch millis".to_string());
                0
            }),
            None | Some(Value::Null) => 0,
            Some(_) => {
                corrections.push("lastUpdated has wrong type".to_string());
                0
            }
        };

        let record = QuizProgressRecord {
            quiz_id,
            experience: u32::try_from(experience).unwrap_or(u32::MAX),
            questions_answered: usize::try_from(questions_answered).unwrap_or(usize::MAX),
            current_scenario_index: usize::try_from(current_scenario_index).unwrap_or(usize::MAX),
            status,
            score_percentage: score.min(100) as u8,
            question_history,
            tools,
            last_updated,
        };
        Some(ParsedRecord { record, corrections })
    }

    /// Serialize for storage.
    #[must_use]
    pub fn to_json_string(&self) -> String {
        // Plain data: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn fallback_status(answered_any: bool) -> QuizStatus {
    if answered_any {
        QuizStatus::InProgress
    } else {
        QuizStatus::NotStarted
    }
}

fn field<'a>(obj: &'a Map<String, Value>, camel: &str, snake: &str) -> Option<&'a Value> {
    obj.get(camel).or_else(|| obj.get(snake))
}

/// Non-negative integer coercion: numeric strings parse, floats truncate,
/// everything else is zero.
fn coerce_count(obj: &Map<String, Value>, camel: &str, snake: &str, corrections: &mut Vec<String>) -> u64 {
    match field(obj, camel, snake) {
        None | Some(Value::Null) => 0,
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_u64() {
                v
            } else {
                corrections.push(format!("{camel} is not a non-negative integer"));
                n.as_f64().filter(|f| f.is_finite() && *f > 0.0).map_or(0, |f| f as u64)
            }
        }
        Some(Value::String(s)) => {
            corrections.push(format!("{camel} given as string"));
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite() && *f > 0.0).map(|f| f as u64))
                .unwrap_or(0)
        }
        Some(_) => {
            corrections.push(format!("{camel} has wrong type"));
            0
        }
    }
}

fn attempt_lenient(value: &Value) -> Option<QuestionAttempt> {
    let obj = value.as_object()?;

    // Older clients stored the whole scenario object; keep its id or title.
    let scenario_id = match field(obj, "scenarioId", "scenario_id").or_else(|| obj.get("scenario")) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Object(scenario)) => scenario
            .get("id")
            .or_else(|| scenario.get("title"))
            .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
            .unwrap_or_default(),
        _ => String::new(),
    };

    let selected_answer = match field(obj, "selectedAnswer", "selected_answer") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(answer)) => answer
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    };

    let timed_out = field(obj, "timedOut", "timed_out")
        .or_else(|| obj.get("isTimeout"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let is_correct = !timed_out
        && field(obj, "isCorrect", "is_correct").and_then(Value::as_bool).unwrap_or(false);
    let time_spent_ms = field(obj, "timeSpentMs", "time_spent_ms")
        .or_else(|| obj.get("timeSpent"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    Some(QuestionAttempt { scenario_id, selected_answer, is_correct, time_spent_ms, timed_out })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn history(n: usize) -> Vec<QuestionAttempt> {
        (0..n)
            .map(|i| QuestionAttempt::answered(format!("s{i}"), "a", if i % 2 == 0 { "a" } else { "b" }, 1000))
            .collect()
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let mut record = QuizProgressRecord::new("communication");
        record.status = QuizStatus::InProgress;
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["quizId"], "communication");
        assert_eq!(json["status"], "in-progress");
        assert!(json.get("questionHistory").is_some());
        assert!(json.get("currentScenarioIndex").is_some());
    }

    #[test]
    fn test_repair_demotes_terminal_without_history() {
        let mut record = QuizProgressRecord::new("q");
        record.status = QuizStatus::Passed;

        assert!(record.repair());
        assert_eq!(record.status, QuizStatus::InProgress);
    }

    #[test]
    fn test_repair_heals_counters_from_history() {
        let mut record = QuizProgressRecord::new("q");
        record.question_history = history(5);

        assert!(record.repair());
        assert_eq!(record.questions_answered, 5);
        assert_eq!(record.current_scenario_index, 5);
        assert_eq!(record.status, QuizStatus::InProgress);
    }

    #[test]
    fn test_repair_pins_inflated_counter_to_history() {
        let mut record = QuizProgressRecord::new("q");
        record.question_history = history(3);
        record.questions_answered = 7;
        record.current_scenario_index = 7;
        record.status = QuizStatus::InProgress;

        assert!(record.repair());
        assert_eq!(record.questions_answered, 3);
        assert_eq!(record.current_scenario_index, 3);
        // Ranking still sees the larger claim
        record.questions_answered = 7;
        assert_eq!(record.effective_count(), 7);
    }

    #[test]
    fn test_repair_keeps_counter_without_history() {
        let mut record = QuizProgressRecord::new("q");
        record.questions_answered = 4;
        record.current_scenario_index = 4;
        record.status = QuizStatus::InProgress;

        assert!(!record.repair());
        assert_eq!(record.questions_answered, 4);
    }

    #[test]
    fn test_compute_score_is_raw_ratio() {
        let mut record = QuizProgressRecord::new("q");
        record.question_history = history(3); // correct, wrong, correct
        assert_eq!(record.compute_score(), 67);
        assert_eq!(QuizProgressRecord::new("q").compute_score(), 0);
    }

    #[test]
    fn test_record_answer_transitions() {
        let policy = AnswerPolicy { total_questions: 2, pass_threshold: Some(70), max_xp: 100 };
        let mut record = QuizProgressRecord::new("q");

        let status = record
            .record_answer(QuestionAttempt::answered("s1", "a", "a", 500), 20, &policy)
            .unwrap();
        assert_eq!(status, QuizStatus::InProgress);
        assert_eq!(record.experience, 20);

        let status = record
            .record_answer(QuestionAttempt::timed_out("s2", 30_000), -5, &policy)
            .unwrap();
        assert_eq!(status, QuizStatus::Failed);
        assert_eq!(record.score_percentage, 50);
        assert_eq!(record.experience, 15);
        assert_eq!(record.current_scenario_index, 2);

        let err = record
            .record_answer(QuestionAttempt::answered("s3", "a", "a", 1), 10, &policy)
            .unwrap_err();
        assert!(matches!(err, ProgressError::QuizFinished { .. }));
    }

    #[test]
    fn test_record_answer_pass_and_completed() {
        let policy = AnswerPolicy { total_questions: 1, pass_threshold: Some(70), max_xp: 10 };
        let mut record = QuizProgressRecord::new("q");
        let status = record
            .record_answer(QuestionAttempt::answered("s1", "a", "a", 1), 50, &policy)
            .unwrap();
        assert_eq!(status, QuizStatus::Passed);
        assert_eq!(record.experience, 10);

        let policy = AnswerPolicy { pass_threshold: None, ..policy };
        let mut record = QuizProgressRecord::new("q");
        let status = record
            .record_answer(QuestionAttempt::answered("s1", "x", "a", 1), 0, &policy)
            .unwrap();
        assert_eq!(status, QuizStatus::Completed);
    }

    #[test]
    fn test_add_tool_is_append_only() {
        let mut record = QuizProgressRecord::new("q");
        assert!(record.add_tool("checklist"));
        assert!(!record.add_tool("checklist"));
        assert_eq!(record.tools, vec!["checklist".to_string()]);
    }

    #[test]
    fn test_lenient_clean_roundtrip() {
        let mut record = QuizProgressRecord::new("communication");
        record.question_history = history(2);
        record.repair();

        let parsed = QuizProgressRecord::from_str_lenient(&record.to_json_string()).unwrap();
        assert!(parsed.is_clean());
        assert_eq!(parsed.record, record);
    }

    #[test]
    fn test_lenient_coerces_wrong_types() {
        let parsed = QuizProgressRecord::from_json_lenient(&json!({
            "quizId": "initiative",
            "experience": "45",
            "questionsAnswered": -3,
            "currentScenarioIndex": "nope",
            "status": "Passed",
            "questionHistory": "not a list",
            "tools": ["a", 7],
            "lastUpdated": "1700000000000"
        }))
        .unwrap();

        let record = parsed.record;
        assert!(!parsed.corrections.is_empty());
        assert_eq!(record.experience, 45);
        assert_eq!(record.questions_answered, 0);
        assert_eq!(record.current_scenario_index, 0);
        assert_eq!(record.status, QuizStatus::Passed);
        assert!(record.question_history.is_empty());
        assert_eq!(record.tools, vec!["a".to_string()]);
        assert_eq!(record.last_updated, 1_700_000_000_000);
    }

    #[test]
    fn test_lenient_accepts_legacy_history_entries() {
        let parsed = QuizProgressRecord::from_json_lenient(&json!({
            "quiz_id": "communication",
            "question_history": [
                {"scenario": {"id": 3, "title": "Standup"}, "selectedAnswer": {"text": "Speak up"}, "isCorrect": true, "timeSpent": 1200},
                {"scenarioId": "s4", "isTimeout": true, "isCorrect": true},
                42
            ]
        }))
        .unwrap();

        let history = &parsed.record.question_history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].scenario_id, "3");
        assert_eq!(history[0].selected_answer, "Speak up");
        assert!(history[0].is_correct);
        assert!(history[1].timed_out);
        assert!(!history[1].is_correct);
        assert_eq!(parsed.record.status, QuizStatus::InProgress);
    }

    #[test]
    fn test_lenient_rejects_non_objects() {
        assert!(QuizProgressRecord::from_str_lenient("[1,2,3]").is_none());
        assert!(QuizProgressRecord::from_str_lenient("{not json").is_none());
        assert!(QuizProgressRecord::from_str_lenient("null").is_none());
    }
}
