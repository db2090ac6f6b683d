//! Small helpers shared by the schema, view and filter modules.

pub mod dbutils;
pub mod index;
pub mod inflector;
pub mod list;
pub mod security;
pub mod tokenizer;
