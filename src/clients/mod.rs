// src/clients/mod.rs

pub mod forms;
pub mod mailer;
