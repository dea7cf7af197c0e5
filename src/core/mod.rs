//! Core building blocks: error taxonomy and configuration.

pub mod config;
pub mod error;
