// src/models/grading.rs

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::models::{form::FormItem, session::ResponseRecord};

/// Correct answers and weight of one gradable question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub correct_answers: Vec<String>,
    pub points: i64,
}

/// Answer key of one grading run, built from the authoritative form.
///
/// Owned by the run that built it, so two tests can be graded at once.
#[derive(Debug, Clone, Default)]
pub struct AnswerKey {
    entries: HashMap<String, KeyEntry>,
}

/// Per-session aggregate produced by scoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionTally {
    pub score: i64,
    pub attempted: i64,
    pub correct: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GradeSummary {
    pub test_id: i64,
    pub total_points: i64,
    pub graded_sessions: usize,
}

impl AnswerKey {
    /// Keeps every question carrying grading with at least one correct answer.
    pub fn from_items(items: &[FormItem]) -> Self {
        let mut key = AnswerKey::default();
        for item in items {
            if let Some(grading) = item.grading() {
                if grading.correct_answers.is_empty() {
                    continue;
                }
                key.insert(
                    item.id().to_string(),
                    grading.correct_answers.clone(),
                    grading.point_value,
                );
            }
        }
        key
    }

    pub fn insert(&mut self, question_id: String, correct_answers: Vec<String>, points: i64) {
        self.entries.insert(
            question_id,
            KeyEntry {
                correct_answers,
                points,
            },
        );
    }

    pub fn get(&self, question_id: &str) -> Option<&KeyEntry> {
        self.entries.get(question_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_points(&self) -> i64 {
        self.entries.values().map(|e| e.points).sum()
    }

    /// Points earned by `values` for `question_id`; `None` when unmatched or ungraded.
    pub fn award(&self, question_id: &str, values: &[String]) -> Option<i64> {
        let entry = self.entries.get(question_id)?;
        (normalize(values) == normalize(&entry.correct_answers)).then_some(entry.points)
    }

    /// Folds every response into per-session tallies keyed by result id.
    pub fn tally<'a, I>(&self, responses: I) -> HashMap<i64, SessionTally>
    where
        I: IntoIterator<Item = &'a ResponseRecord>,
    {
        let mut tallies: HashMap<i64, SessionTally> = HashMap::new();
        for response in responses {
            let tally = tallies.entry(response.result_id).or_default();
            if response.answer_values.iter().any(|v| !v.trim().is_empty()) {
                tally.attempted += 1;
            }
            if let Some(points) = self.award(&response.question_id, &response.answer_values) {
                tally.score += points;
                tally.correct += 1;
            }
        }
        tallies
    }
}

fn normalize(values: &[String]) -> BTreeSet<&str> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::form::{ChoiceType, Grading, QuestionItem, QuestionKind, TextItem};

    fn graded(id: &str, answers: &[&str], points: i64) -> FormItem {
        FormItem::Question(QuestionItem {
            item_id: id.into(),
            title: id.into(),
            description: None,
            required: false,
            question: QuestionKind::Choice {
                choice_type: ChoiceType::Checkbox,
                options: Vec::new(),
            },
            image: None,
            grading: Some(Grading {
                point_value: points,
                correct_answers: answers.iter().map(|a| a.to_string()).collect(),
            }),
        })
    }

    fn response(result_id: i64, question: &str, values: &[&str]) -> ResponseRecord {
        ResponseRecord {
            result_id,
            question_id: question.into(),
            answer_values: values.iter().map(|v| v.to_string()).collect(),
            time_taken_ms: 1000,
        }
    }

    #[test]
    fn key_skips_ungraded_items() {
        let items = vec![
            graded("q1", &["A"], 2),
            graded("q2", &[], 3),
            FormItem::Text(TextItem {
                item_id: "t".into(),
                title: "Read carefully".into(),
                description: None,
            }),
        ];
        let key = AnswerKey::from_items(&items);
        assert_eq!(key.len(), 1);
        assert_eq!(key.total_points(), 2);
    }

    #[test]
    fn award_is_order_insensitive() {
        let key = AnswerKey::from_items(&[graded("q1", &["A", "C"], 4)]);
        assert_eq!(key.award("q1", &["C".into(), " A".into()]), Some(4));
        assert_eq!(key.award("q1", &["A".into()]), None);
        assert_eq!(key.award("missing", &["A".into()]), None);
    }

    #[test]
    fn tally_counts_attempted_and_correct() {
        let key = AnswerKey::from_items(&[graded("q1", &["A"], 5), graded("q2", &["B"], 10)]);
        let responses = vec![
            response(1, "q1", &["A"]),
            response(1, "q2", &["C"]),
            response(2, "q1", &[""]),
            response(2, "q2", &["B"]),
        ];
        let tallies = key.tally(&responses);
        assert_eq!(
            tallies[&1],
            SessionTally {
                score: 5,
                attempted: 2,
                correct: 1
            }
        );
        assert_eq!(
            tallies[&2],
            SessionTally {
                score: 10,
                attempted: 1,
                correct: 1
            }
        );
    }
}
