//! SQL Engine module for tracing column lineage through parsed statements

pub mod bindings;
pub mod detector;
pub mod error;
pub mod fields;
pub mod lineage;
pub mod model;
pub mod scope;
pub mod tables;

#[cfg(test)]
mod tests;
