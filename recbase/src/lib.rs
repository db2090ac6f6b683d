//! recbase core library.
//!
//! Collection schemas stored in SQLite: typed fields, structural validation,
//! table synchronization, view field inference and a filter language compiled
//! to SQL through a collection aware field resolver.

pub mod collection;
pub mod config;
pub mod db;
pub mod errors;
pub mod fields;
pub mod fields_list;
pub mod filesystem;
pub mod id;
pub mod record;
pub mod registry;
pub mod resolver;
pub mod schema;
pub mod search;
pub mod tools;
pub mod validators;

pub use collection::{Collection, CollectionType, validate_collection};
pub use config::CoreConfig;
pub use db::Db;
pub use errors::*;
pub use fields::Field;
pub use fields_list::FieldsList;
pub use record::Record;
pub use registry::FieldTypeRegistry;
pub use resolver::{RecordFieldResolver, RequestInfo};
pub use search::{FieldResolver, FilterData, SearchProvider, SearchQuery, SearchResult, SortOrder};
