// src/utils/mod.rs

pub mod artifact;
pub mod html;
pub mod jwt;
pub mod sink;
pub mod templates;
