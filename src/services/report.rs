// src/services/report.rs

//! Cumulative and per-candidate result reports, rendered as standalone HTML
//! pages with ECharts.

use std::{
    path::PathBuf,
    sync::{Arc, LazyLock},
};

use chrono::Utc;
use regex::Regex;
use serde_json::json;

use crate::{
    clients::mailer::{Attachment, MailTransport, OutgoingMail},
    error::AppError,
    models::{
        report::{CumulativeChart, IndividualChart, RadarAxis, ScoreHistogram},
        session::{CandidateResult, TestMeta},
    },
    repository::ExamRepository,
    utils::{
        artifact::{cumulative_path, individual_path, write_atomic},
        html::{escape_text, script_json},
        templates::{ResultDraftEmail, result_draft},
    },
};

const BUCKETS: i64 = 10;
const ECHARTS_CDN: &str = "https://cdn.jsdelivr.net/npm/echarts@5/dist/echarts.min.js";

static USER_UUID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]{1,64}$").expect("valid uuid pattern"));

/// Upper bounds of the 11 score buckets: `i * ceil(total / 10)` for the first
/// ten, `total` for the last.
pub fn bucket_boundaries(total_points: i64) -> Vec<i64> {
    let step = (total_points.max(0) + BUCKETS - 1) / BUCKETS;
    let mut boundaries: Vec<i64> = (0..BUCKETS).map(|i| i * step).collect();
    boundaries.push(total_points);
    boundaries
}

/// Places every score in the first bucket whose boundary is at least the score.
pub fn histogram(scores: &[i64], total_points: i64) -> ScoreHistogram {
    let boundaries = bucket_boundaries(total_points);
    let mut counts = vec![0; boundaries.len()];
    let last = boundaries.len() - 1;
    for score in scores {
        let bucket = boundaries
            .iter()
            .position(|k| k >= score)
            .unwrap_or(last);
        counts[bucket] += 1;
    }
    ScoreHistogram { boundaries, counts }
}

/// Lowest passing score: `threshold` percent of `total_points`, rounded down.
pub fn pass_cutoff(threshold: i32, total_points: i64) -> i64 {
    (i64::from(threshold) * total_points).div_euclid(100)
}

pub fn individual_chart(question_count: i64, attempted: i64, correct: i64) -> IndividualChart {
    let accuracy = if attempted == 0 {
        0.0
    } else {
        correct as f64 / attempted as f64 * 100.0
    };
    let questions = question_count.max(0) as f64;
    IndividualChart {
        funnel: vec![
            ("Total".to_string(), question_count),
            ("Attempted".to_string(), attempted),
            ("Correct".to_string(), correct),
        ],
        radar: vec![
            RadarAxis {
                name: "Accuracy%".to_string(),
                max: 100.0,
                value: accuracy,
            },
            RadarAxis {
                name: "Attempted".to_string(),
                max: questions,
                value: attempted as f64,
            },
            RadarAxis {
                name: "Correct".to_string(),
                max: questions,
                value: correct as f64,
            },
        ],
    }
}

fn page(title: &str, subtitle: &str, charts: &[(&str, serde_json::Value)]) -> Result<String, AppError> {
    let mut divs = String::new();
    let mut scripts = String::new();
    for (id, option) in charts {
        let option = script_json(option).map_err(|e| AppError::InternalServerError(e.to_string()))?;
        divs.push_str(&format!(
            r#"<div id="{id}" style="width: 720px; height: 420px; margin: 24px auto"></div>"#
        ));
        scripts.push_str(&format!(
            "echarts.init(document.getElementById('{id}')).setOption({option});\n"
        ));
    }
    Ok(format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<script src="{cdn}"></script>
</head>
<body style="font-family: sans-serif">
<h2 style="text-align: center">{title}</h2>
<p style="text-align: center">{subtitle}</p>
{divs}
<script>
{scripts}</script>
</body>
</html>
"#,
        title = escape_text(title),
        subtitle = escape_text(subtitle),
        cdn = ECHARTS_CDN,
    ))
}

fn render_cumulative(meta: &TestMeta, chart: &CumulativeChart) -> Result<String, AppError> {
    let histogram = json!({
        "title": { "text": "Score distribution" },
        "tooltip": {},
        "xAxis": { "type": "category", "data": chart.histogram.labels() },
        "yAxis": { "type": "value", "minInterval": 1 },
        "series": [{ "type": "bar", "name": "Candidates", "data": chart.histogram.counts }],
    });
    let pass_fail = json!({
        "title": { "text": format!("Pass / Fail (cutoff {})", chart.cutoff) },
        "tooltip": { "trigger": "item" },
        "legend": { "bottom": 0 },
        "series": [{
            "type": "pie",
            "radius": "60%",
            "data": [
                { "name": "Pass", "value": chart.pass_fail.pass_count },
                { "name": "Fail", "value": chart.pass_fail.fail_count },
            ],
        }],
    });
    page(
        &format!("{} - {}", meta.company_name, meta.name),
        &format!(
            "{} candidates graded, pass threshold {}%",
            chart.histogram.total(),
            meta.threshold
        ),
        &[("histogram", histogram), ("pass_fail", pass_fail)],
    )
}

fn render_individual(
    meta: &TestMeta,
    candidate: &CandidateResult,
    chart: &IndividualChart,
) -> Result<String, AppError> {
    let funnel_data: Vec<_> = chart
        .funnel
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    let funnel = json!({
        "title": { "text": "Progress" },
        "tooltip": { "trigger": "item" },
        "series": [{ "type": "funnel", "sort": "descending", "data": funnel_data }],
    });
    let indicators: Vec<_> = chart
        .radar
        .iter()
        .map(|axis| json!({ "name": axis.name, "max": axis.max }))
        .collect();
    let values: Vec<f64> = chart.radar.iter().map(|axis| axis.value).collect();
    let radar = json!({
        "title": { "text": "Performance" },
        "radar": { "indicator": indicators },
        "series": [{ "type": "radar", "data": [{ "name": candidate.student_name, "value": values }] }],
    });
    page(
        &format!("{} - {}", meta.name, candidate.student_name),
        &format!("Score {} for {} at {}", candidate.score, meta.job_title, meta.company_name),
        &[("funnel", funnel), ("radar", radar)],
    )
}

#[derive(Clone)]
pub struct ReportGenerator {
    repo: Arc<dyn ExamRepository>,
    mailer: Arc<dyn MailTransport>,
    results_dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(
        repo: Arc<dyn ExamRepository>,
        mailer: Arc<dyn MailTransport>,
        results_dir: PathBuf,
    ) -> Self {
        Self {
            repo,
            mailer,
            results_dir,
        }
    }

    /// Renders the per-test report, mails the draft to the company
    /// representative and records the artifact on the test.
    pub async fn cumulative(&self, test_id: i64) -> Result<PathBuf, AppError> {
        let meta = self
            .repo
            .test_meta(test_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("test {} not found", test_id)))?;
        let total_points = meta.total_points.ok_or_else(|| {
            AppError::PreconditionFailed(format!("test {} has not been graded", test_id))
        })?;

        let scores = self.repo.session_scores(test_id).await?;
        let cutoff = pass_cutoff(meta.threshold, total_points);
        let pass_fail = self.repo.pass_fail_counts(test_id, cutoff).await?;
        let chart = CumulativeChart {
            histogram: histogram(&scores, total_points),
            cutoff,
            pass_fail,
        };

        let path = cumulative_path(&self.results_dir, test_id);
        write_atomic(&path, &render_cumulative(&meta, &chart)?).await?;

        let body = result_draft(&ResultDraftEmail {
            company_name: &meta.company_name,
            test_id,
            test_name: &meta.name,
            end_time: meta.end_time,
            threshold: meta.threshold,
            generated_at: Utc::now(),
        });
        let mail = OutgoingMail {
            recipients: vec![meta.representative_email.clone()],
            subject: format!("Result draft: {}", meta.name),
            html_body: body,
            attachment: Some(Attachment {
                path: path.clone(),
                file_name: format!("{}_testresult.html", test_id),
            }),
        };
        self.mailer.send(&mail).await.map_err(|e| {
            tracing::error!(test_id, "Failed to mail result draft: {}", e);
            e
        })?;

        self.repo
            .set_result_url(test_id, &path.to_string_lossy())
            .await?;
        tracing::info!(
            test_id,
            pass = pass_fail.pass_count,
            fail = pass_fail.fail_count,
            "Cumulative report generated"
        );
        Ok(path)
    }

    /// Renders one candidate's report.
    pub async fn individual(
        &self,
        meta: &TestMeta,
        candidate: &CandidateResult,
    ) -> Result<PathBuf, AppError> {
        if !USER_UUID.is_match(&candidate.user_uuid) {
            return Err(AppError::BadRequest(format!(
                "candidate uuid {:?} is not usable in a file name",
                candidate.user_uuid
            )));
        }
        let chart = individual_chart(meta.question_count, candidate.attempted, candidate.correct);
        let path = individual_path(&self.results_dir, meta.test_id, &candidate.user_uuid);
        write_atomic(&path, &render_individual(meta, candidate, &chart)?).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{grading::AnswerKey, session::PassFail},
        repository::MemoryRepository,
        services::fakes::{RecordingMailer, enroll, temp_results_dir, test_meta},
    };
    use chrono::Duration;

    #[test]
    fn boundaries_for_hundred_points() {
        assert_eq!(
            bucket_boundaries(100),
            vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90, 100]
        );
        assert_eq!(
            bucket_boundaries(25),
            vec![0, 3, 6, 9, 12, 15, 18, 21, 24, 27, 25]
        );
    }

    #[test]
    fn histogram_conserves_sessions() {
        let scores = [0, 5, 10, 11, 55, 99, 100, 140];
        let h = histogram(&scores, 100);
        assert_eq!(h.counts, vec![1, 2, 1, 0, 0, 0, 1, 0, 0, 0, 3]);
        assert_eq!(h.total(), scores.len() as i64);
        assert_eq!(h.labels()[1], "10 / 10%");
    }

    #[test]
    fn scores_above_a_non_monotonic_tail_land_in_last_bucket() {
        let h = histogram(&[26, 28], 25);
        assert_eq!(h.counts[9], 1);
        assert_eq!(h.counts[10], 1);
        assert_eq!(h.total(), 2);
    }

    #[test]
    fn cutoff_rounds_down() {
        assert_eq!(pass_cutoff(40, 100), 40);
        assert_eq!(pass_cutoff(33, 10), 3);
        assert_eq!(pass_cutoff(0, 50), 0);
    }

    #[test]
    fn accuracy_is_zero_without_attempts() {
        let chart = individual_chart(10, 0, 0);
        assert_eq!(chart.radar[0].value, 0.0);
        let chart = individual_chart(10, 8, 6);
        assert_eq!(chart.radar[0].value, 75.0);
        assert_eq!(chart.funnel[0], ("Total".to_string(), 10));
    }

    async fn graded_repo(scores: &[i64]) -> Arc<MemoryRepository> {
        let repo = Arc::new(MemoryRepository::new());
        let mut meta = test_meta(1, Utc::now() - Duration::minutes(5));
        meta.threshold = 40;
        repo.insert_test(meta).unwrap();
        let mut key = AnswerKey::default();
        // Each candidate answers their own question, worth exactly their score.
        for (i, score) in scores.iter().enumerate() {
            let user = i as i64 + 1;
            enroll(&repo, 1, user);
            let session = repo.create_session_if_absent(1, user, Utc::now()).await.unwrap();
            let question = format!("q{}", user);
            key.insert(question.clone(), vec![format!("A{}", user)], *score);
            repo.upsert_response(&crate::models::session::ResponseRecord {
                result_id: session.result_id,
                question_id: question,
                answer_values: vec![format!("A{}", user)],
                time_taken_ms: 1,
            })
            .await
            .unwrap();
        }
        repo.apply_answer_key(1, &key).await.unwrap();
        repo
    }

    #[tokio::test]
    async fn cumulative_report_mails_draft_then_records_url() {
        let repo = graded_repo(&[10, 40, 41, 9]).await;
        let mailer = Arc::new(RecordingMailer::default());
        let dir = temp_results_dir();
        let reports = ReportGenerator::new(repo.clone(), mailer.clone(), dir.clone());

        let path = reports.cumulative(1).await.unwrap();

        assert_eq!(path, cumulative_path(&dir, 1));
        let html = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(html.contains("echarts"));
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec!["hr@acme.test"]);
        let meta = repo.test_meta(1).await.unwrap().unwrap();
        assert_eq!(meta.result_url.as_deref(), Some(&*path.to_string_lossy()));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn pass_fail_split_at_forty_percent_of_hundred() {
        let repo = graded_repo(&[10, 40, 41, 99]).await;
        let counts = repo.pass_fail_counts(1, pass_cutoff(40, 100)).await.unwrap();
        assert_eq!(
            counts,
            PassFail {
                pass_count: 3,
                fail_count: 1
            }
        );
    }

    #[tokio::test]
    async fn failed_draft_mail_leaves_test_unreported() {
        let repo = graded_repo(&[5]).await;
        let mailer = Arc::new(RecordingMailer::failing(1));
        let dir = temp_results_dir();
        let reports = ReportGenerator::new(repo.clone(), mailer, dir.clone());

        assert!(reports.cumulative(1).await.is_err());
        let meta = repo.test_meta(1).await.unwrap().unwrap();
        assert!(meta.result_url.is_none());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn ungraded_test_has_no_cumulative_report() {
        let repo = Arc::new(MemoryRepository::new());
        repo.insert_test(test_meta(1, Utc::now() - Duration::minutes(5)))
            .unwrap();
        let reports = ReportGenerator::new(
            repo,
            Arc::new(RecordingMailer::default()),
            temp_results_dir(),
        );
        assert!(matches!(
            reports.cumulative(1).await,
            Err(AppError::PreconditionFailed(_))
        ));
    }

    #[tokio::test]
    async fn individual_report_rejects_path_like_uuid() {
        let dir = temp_results_dir();
        let reports = ReportGenerator::new(
            Arc::new(MemoryRepository::new()),
            Arc::new(RecordingMailer::default()),
            dir.clone(),
        );
        let meta = test_meta(1, Utc::now());
        let mut candidate = CandidateResult {
            result_id: 1,
            user_uuid: "../../etc".to_string(),
            student_name: "Eve".to_string(),
            student_email: "eve@test.dev".to_string(),
            started_at: None,
            score: 0,
            attempted: 0,
            correct: 0,
        };
        assert!(matches!(
            reports.individual(&meta, &candidate).await,
            Err(AppError::BadRequest(_))
        ));

        candidate.user_uuid = "3f2a-77".to_string();
        let path = reports.individual(&meta, &candidate).await.unwrap();
        assert_eq!(path, individual_path(&dir, 1, "3f2a-77"));
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
