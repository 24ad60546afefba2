//! Column-level lineage for INSERT ... SELECT and nested SQL queries

pub mod config;
pub mod sql_engine;
