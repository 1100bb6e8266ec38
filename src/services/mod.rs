// src/services/mod.rs

pub mod content;
pub mod grading;
pub mod navigator;
pub mod pipeline;
pub mod poller;
pub mod publisher;
pub mod report;
pub mod timer;

#[cfg(test)]
pub(crate) mod fakes;

pub use content::FormContentLoader;
pub use grading::GradingEngine;
pub use navigator::SessionNavigator;
pub use pipeline::ResultPipeline;
pub use poller::ResultPoller;
pub use publisher::ResultPublisher;
pub use report::ReportGenerator;
pub use timer::SessionTimer;
