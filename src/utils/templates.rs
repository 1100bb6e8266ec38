// src/utils/templates.rs

//! HTML e-mail bodies sent with result artifacts.

use chrono::{DateTime, Local, Utc};

use crate::utils::html::escape_text;

/// Values shown to a candidate when their result is published.
#[derive(Debug, Clone)]
pub struct ResultPublishedEmail<'a> {
    pub student_name: &'a str,
    pub test_name: &'a str,
    pub job_title: &'a str,
    pub company_name: &'a str,
    pub start_time: Option<DateTime<Utc>>,
}

/// Values shown to the company representative with the cumulative draft.
#[derive(Debug, Clone)]
pub struct ResultDraftEmail<'a> {
    pub company_name: &'a str,
    pub test_id: i64,
    pub test_name: &'a str,
    pub end_time: DateTime<Utc>,
    pub threshold: i32,
    pub generated_at: DateTime<Utc>,
}

fn display_time(t: DateTime<Utc>) -> String {
    t.with_timezone(&Local).format("%I:%M %p %d-%m-%Y").to_string()
}

pub fn result_published(data: &ResultPublishedEmail<'_>) -> String {
    let started = data
        .start_time
        .map(display_time)
        .unwrap_or_else(|| "-".to_string());
    format!(
        r#"<!DOCTYPE html>
<html><body style="font-family: sans-serif">
<p>Dear {name},</p>
<p>The results of <b>{test}</b> for the position <b>{job}</b> at <b>{company}</b> have been published.</p>
<p>Your attempt started at {started}. Your individual report is attached to this e-mail.</p>
<p>Regards,<br>Placement Cell</p>
</body></html>"#,
        name = escape_text(data.student_name),
        test = escape_text(data.test_name),
        job = escape_text(data.job_title),
        company = escape_text(data.company_name),
        started = escape_text(&started),
    )
}

pub fn result_draft(data: &ResultDraftEmail<'_>) -> String {
    format!(
        r#"<!DOCTYPE html>
<html><body style="font-family: sans-serif">
<p>Dear {company} team,</p>
<p>The result draft for test <b>{name}</b> (#{id}) is ready. The test closed at {end}.</p>
<p>Pass threshold: {threshold}%. Report generated at {generated}.</p>
<p>The cumulative report is attached. Individual results are being delivered to the candidates.</p>
</body></html>"#,
        company = escape_text(data.company_name),
        name = escape_text(data.test_name),
        id = data.test_id,
        end = escape_text(&display_time(data.end_time)),
        threshold = data.threshold,
        generated = escape_text(&display_time(data.generated_at)),
    )
}
