// src/models/report.rs

use serde::Serialize;

use crate::models::session::PassFail;

/// Score distribution of a test: `counts[i]` sessions scored at most `boundaries[i]`
/// (and more than the previous boundary).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreHistogram {
    pub boundaries: Vec<i64>,
    pub counts: Vec<i64>,
}

impl ScoreHistogram {
    /// Axis labels in the form `"{boundary} / {percent}%"`.
    pub fn labels(&self) -> Vec<String> {
        self.boundaries
            .iter()
            .enumerate()
            .map(|(i, k)| format!("{} / {}%", k, i * 10))
            .collect()
    }

    pub fn total(&self) -> i64 {
        self.counts.iter().sum()
    }
}

/// Data behind the cumulative (per test) report.
#[derive(Debug, Clone, Serialize)]
pub struct CumulativeChart {
    pub histogram: ScoreHistogram,
    pub cutoff: i64,
    pub pass_fail: PassFail,
}

/// Data behind one candidate's report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndividualChart {
    /// Funnel stages: Total, Attempted, Correct.
    pub funnel: Vec<(String, i64)>,
    /// Radar axes with their max: Accuracy%, Attempted, Correct.
    pub radar: Vec<RadarAxis>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadarAxis {
    pub name: String,
    pub max: f64,
    pub value: f64,
}
