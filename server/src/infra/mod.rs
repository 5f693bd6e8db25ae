//! Infrastructure layer

pub mod lab_service;
pub mod remote;
pub mod simulated;
