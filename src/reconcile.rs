// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reconciliation: pick one canonical record out of several tier copies.
//!
//! Ordering, highest first:
//!
//! 1. completeness: `max(questionsAnswered, questionHistory.len())`
//! 2. recency: `lastUpdated`
//! 3. source: Remote > Durable > Ephemeral
//!
//! A tier that briefly held stale or empty data can therefore never clobber
//! one holding more progress, however new its timestamp. The winner is then
//! repaired (see [`QuizProgressRecord::repair`]) and stamped with the quiz id
//! it is being reconciled for.

use std::cmp::Ordering;

use crate::record::QuizProgressRecord;
use crate::storage::traits::TierKind;

/// One tier's copy of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub source: TierKind,
    pub record: QuizProgressRecord,
}

impl Candidate {
    pub fn new(source: TierKind, record: QuizProgressRecord) -> Self {
        Self { source, record }
    }

    fn rank(&self) -> (usize, i64, u8) {
        (self.record.effective_count(), self.record.last_updated, self.source.priority())
    }
}

/// Winner of a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub record: QuizProgressRecord,
    /// Tier the winning copy came from
    pub source: TierKind,
    /// Whether the repair pass changed anything
    pub repaired: bool,
}

/// Deterministic merge. `None` only when there are no candidates.
///
/// On a full tie the earlier candidate wins, so callers that list tiers in
/// priority order get a stable result.
#[must_use]
pub fn reconcile(quiz_id: &str, candidates: Vec<Candidate>) -> Option<Reconciled> {
    let mut best: Option<Candidate> = None;
    for candidate in candidates {
        best = match best {
            Some(current) if candidate.rank().cmp(&current.rank()) != Ordering::Greater => Some(current),
            _ => Some(candidate),
        };
    }

    let Candidate { source, mut record } = best?;
    let repaired = record.repair();
    record.quiz_id = quiz_id.to_string();
    Some(Reconciled { record, source, repaired })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{QuestionAttempt, QuizStatus};

    fn record(answered: usize, last_updated: i64) -> QuizProgressRecord {
        let mut r = QuizProgressRecord::new("communication");
        for i in 0..answered {
            r.question_history.push(QuestionAttempt::answered(format!("s{i}"), "a", "a", 1000));
        }
        r.questions_answered = answered;
        r.current_scenario_index = answered;
        r.status = if answered > 0 { QuizStatus::InProgress } else { QuizStatus::NotStarted };
        r.last_updated = last_updated;
        r
    }

    #[test]
    fn test_empty_input() {
        assert!(reconcile("communication", Vec::new()).is_none());
    }

    #[test]
    fn test_completeness_beats_recency() {
        let durable = Candidate::new(TierKind::Durable, record(10, 1_000));
        let remote = Candidate::new(TierKind::Remote, record(6, 9_000));

        let out = reconcile("communication", vec![remote, durable]).unwrap();
        assert_eq!(out.source, TierKind::Durable);
        assert_eq!(out.record.questions_answered, 10);
        assert!(!out.repaired);
    }

    #[test]
    fn test_recency_breaks_count_ties() {
        let older = Candidate::new(TierKind::Remote, record(4, 1_000));
        let newer = Candidate::new(TierKind::Ephemeral, record(4, 2_000));

        let out = reconcile("communication", vec![older, newer]).unwrap();
        assert_eq!(out.source, TierKind::Ephemeral);
        assert_eq!(out.record.last_updated, 2_000);
    }

    #[test]
    fn test_source_priority_breaks_full_ties() {
        let candidates = vec![
            Candidate::new(TierKind::Ephemeral, record(3, 5_000)),
            Candidate::new(TierKind::Remote, record(3, 5_000)),
            Candidate::new(TierKind::Durable, record(3, 5_000)),
        ];
        assert_eq!(reconcile("communication", candidates).unwrap().source, TierKind::Remote);
    }

    #[test]
    fn test_counter_only_progress_counts() {
        // questionsAnswered without history still ranks by the counter
        let mut counted = record(0, 1_000);
        counted.questions_answered = 7;
        let with_history = record(5, 9_000);

        let out = reconcile(
            "communication",
            vec![
                Candidate::new(TierKind::Remote, with_history),
                Candidate::new(TierKind::Durable, counted),
            ],
        )
        .unwrap();
        assert_eq!(out.source, TierKind::Durable);
        assert_eq!(out.record.questions_answered, 7);
        assert_eq!(out.record.status, QuizStatus::InProgress);
        assert!(out.repaired);
    }

    #[test]
    fn test_passed_with_empty_history_is_demoted() {
        let mut bogus = record(0, 1_000);
        bogus.status = QuizStatus::Passed;

        let out = reconcile("communication", vec![Candidate::new(TierKind::Remote, bogus)]).unwrap();
        assert_eq!(out.record.status, QuizStatus::InProgress);
        assert!(out.repaired);
    }

    #[test]
    fn test_missing_counter_restored_from_history() {
        let mut r = record(5, 1_000);
        r.questions_answered = 0;
        r.current_scenario_index = 0;

        let out = reconcile("communication", vec![Candidate::new(TierKind::Durable, r)]).unwrap();
        assert_eq!(out.record.questions_answered, 5);
        assert_eq!(out.record.current_scenario_index, 5);
    }

    #[test]
    fn test_quiz_id_is_stamped() {
        let mut r = record(2, 1_000);
        r.quiz_id = String::new();

        let out = reconcile("tester-mindset", vec![Candidate::new(TierKind::Ephemeral, r)]).unwrap();
        assert_eq!(out.record.quiz_id, "tester-mindset");
    }
}
