// src/models/mod.rs

pub mod form;
pub mod grading;
pub mod report;
pub mod session;
