//! Physical schema management: record table synchronization and view field inference.

mod sync;
mod view;

pub use sync::sync_record_table_schema;
pub use view::{QueryIdentifiers, SqlIdentifier, create_view_fields, parse_query_identifiers};
