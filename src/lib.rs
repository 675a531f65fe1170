pub mod config;
pub mod diagnose;
pub mod load;
pub mod schema;
pub mod sql;
pub mod transform;
pub mod warehouse;
