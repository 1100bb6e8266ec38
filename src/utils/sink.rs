// src/utils/sink.rs

//! Side channel for failures that must be reported without aborting the
//! caller (per-candidate render failures, undeliverable result mails).

use std::fmt;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warn,
    Error,
    Critical,
}

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub severity: Severity,
    pub context: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ErrorSink {
    tx: mpsc::UnboundedSender<ErrorReport>,
}

impl ErrorSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ErrorReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Sink whose reports are logged by a background task.
    pub fn spawn_reporter() -> (Self, JoinHandle<()>) {
        let (sink, mut rx) = Self::channel();
        let handle = tokio::spawn(async move {
            while let Some(report) = rx.recv().await {
                log_report(&report);
            }
        });
        (sink, handle)
    }

    pub fn report(&self, severity: Severity, context: impl Into<String>, err: impl fmt::Display) {
        let report = ErrorReport {
            severity,
            context: context.into(),
            message: err.to_string(),
        };
        if let Err(mpsc::error::SendError(report)) = self.tx.send(report) {
            log_report(&report);
        }
    }
}

fn log_report(report: &ErrorReport) {
    match report.severity {
        Severity::Warn => tracing::warn!(context = %report.context, "{}", report.message),
        Severity::Error => tracing::error!(context = %report.context, "{}", report.message),
        Severity::Critical => {
            tracing::error!(context = %report.context, critical = true, "{}", report.message)
        }
    }
}
