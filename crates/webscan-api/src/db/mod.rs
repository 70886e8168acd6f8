//! Database layer

pub mod repos;
pub mod schema;
