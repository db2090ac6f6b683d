//! Reconciles the record table of a collection with its field list.

use crate::collection::Collection;
use crate::db::Db;
use crate::errors::CoreResult;
use crate::fields::Field;
use crate::tools::dbutils::quote_table;
use crate::tools::index::parse_index;
use crate::tools::security::{LOWER_ALPHANUM, random_string_with_alphabet};

fn temp_column_name(prefix: &str) -> String {
    format!("_{prefix}_{}", random_string_with_alphabet(10, LOWER_ALPHANUM))
}

fn column(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Creates or updates the table of `new` so that it matches its fields and indexes.
///
/// `old` is the previously persisted state (`None` for new collections). View
/// collections have no table and are ignored. Everything runs in a single
/// transaction, so a failing statement leaves the previous schema untouched.
///
/// `PRAGMA optimize` runs afterwards only when the call is not nested in an
/// outer transaction; otherwise the outermost caller is expected to run it
/// once it commits (as [`Db::save_collection`] does).
pub fn sync_record_table_schema(db: &Db, new: &Collection, old: Option<&Collection>) -> CoreResult<()> {
    if new.is_view() {
        return Ok(());
    }

    db.run_in_transaction(|db| {
        let old = match old {
            Some(old) if !old.is_view() && db.has_table(&old.name)? => old,
            _ => return create_table(db, new),
        };

        let renamed = !old.name.eq_ignore_ascii_case(&new.name);
        let fields_changed = old.fields.to_json()? != new.fields.to_json()?;
        let indexes_changed = old.indexes != new.indexes;
        if !renamed && !fields_changed && !indexes_changed {
            return Ok(());
        }

        drop_indexes(db, old)?;

        let table = quote_table(&new.name);
        if renamed {
            db.exec(&format!("ALTER TABLE {} RENAME TO {table}", quote_table(&old.name)))?;
        }

        if fields_changed {
            for old_field in old.fields.iter() {
                if new.fields.get_by_id(old_field.id()).is_none() {
                    db.exec(&format!("ALTER TABLE {table} DROP COLUMN {}", column(old_field.name())))?;
                }
            }

            // every add/rename goes through a temp name so that swapped names
            // (a->b, b->a) never overwrite each other
            let mut pending = Vec::new();
            for field in new.fields.iter() {
                match old.fields.get_by_id(field.id()) {
                    None => {
                        let tmp = temp_column_name("new");
                        db.exec(&format!("ALTER TABLE {table} ADD COLUMN {} {}", column(&tmp), field.column_type()))?;
                        pending.push((tmp, field.name()));
                    }
                    Some(old_field) if old_field.name() != field.name() => {
                        let tmp = temp_column_name("rename");
                        db.exec(&format!(
                            "ALTER TABLE {table} RENAME COLUMN {} TO {}",
                            column(old_field.name()),
                            column(&tmp)
                        ))?;
                        pending.push((tmp, field.name()));
                    }
                    Some(_) => {}
                }
            }
            for (tmp, name) in pending {
                db.exec(&format!("ALTER TABLE {table} RENAME COLUMN {} TO {}", column(&tmp), column(name)))?;
            }

            normalize_cardinality_changes(db, new, old)?;
        }

        create_indexes(db, new)
    })?;

    if !db.in_transaction() && db.config().schema.optimize_after_sync {
        db.optimize();
    }
    Ok(())
}

fn create_table(db: &Db, collection: &Collection) -> CoreResult<()> {
    let columns: Vec<String> = collection
        .fields
        .iter()
        .map(|field| format!("{} {}", column(field.name()), field.column_type()))
        .collect();
    db.exec(&format!("CREATE TABLE {} ({})", quote_table(&collection.name), columns.join(", ")))?;
    create_indexes(db, collection)
}

fn drop_indexes(db: &Db, collection: &Collection) -> CoreResult<()> {
    for raw in &collection.indexes {
        let parsed = parse_index(raw);
        if parsed.index_name.is_empty() {
            continue;
        }
        db.exec(&format!("DROP INDEX IF EXISTS {}", quote_table(&parsed.index_name)))?;
    }
    Ok(())
}

fn create_indexes(db: &Db, collection: &Collection) -> CoreResult<()> {
    for raw in &collection.indexes {
        let mut parsed = parse_index(raw);
        if !parsed.is_valid() {
            continue;
        }
        // the table name always follows the collection name
        parsed.table_name = collection.name.clone();
        db.exec(&parsed.build())?;
    }
    Ok(())
}

/// Re-encodes the data of multi-valued fields whose single/multiple mode changed.
///
/// Views are dropped for the duration of the swap since they may reference the
/// column that gets renamed out and back in.
fn normalize_cardinality_changes(db: &Db, new: &Collection, old: &Collection) -> CoreResult<()> {
    let changed: Vec<&Field> = new
        .fields
        .iter()
        .filter(|field| field.is_multi_valuer())
        .filter(|field| {
            old.fields
                .get_by_id(field.id())
                .is_some_and(|old_field| old_field.is_multi_valuer() && old_field.is_multiple() != field.is_multiple())
        })
        .collect();
    if changed.is_empty() {
        return Ok(());
    }

    let views = db.find_all_views()?;
    for view in &views {
        db.delete_view(&view.name)?;
    }

    let table = quote_table(&new.name);
    for field in changed {
        let name = column(field.name());
        let tmp = column(&temp_column_name("cardinality"));

        db.exec(&format!("ALTER TABLE {table} RENAME COLUMN {name} TO {tmp}"))?;
        db.exec(&format!("ALTER TABLE {table} ADD COLUMN {name} {}", field.column_type()))?;

        let recast = if field.is_multiple() {
            format!(
                "(CASE WHEN COALESCE({tmp}, '') = '' THEN '[]' ELSE (
                    CASE WHEN json_valid({tmp}) AND json_type({tmp}) = 'array' THEN {tmp} ELSE json_array({tmp}) END
                ) END)"
            )
        } else {
            format!(
                "(CASE WHEN COALESCE({tmp}, '[]') = '[]' THEN '' ELSE (
                    CASE WHEN json_valid({tmp}) AND json_type({tmp}) = 'array' THEN COALESCE(json_extract({tmp}, '$[#-1]'), '') ELSE {tmp} END
                ) END)"
            )
        };
        db.exec(&format!("UPDATE {table} SET {name} = {recast}"))?;
        db.exec(&format!("ALTER TABLE {table} DROP COLUMN {tmp}"))?;
    }

    for view in &views {
        db.exec(&view.sql)?;
    }
    Ok(())
}
