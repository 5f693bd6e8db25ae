//! Domain models

pub mod lab;
pub mod types;
