//! Service layer

pub mod lab_store;
pub mod presenter;
