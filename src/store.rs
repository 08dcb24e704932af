//! Collection store over the `collections` table.
//!
//! Every record kind lives in one row as a JSON array keyed by
//! `collection_key`. Reads deserialize the whole array; writes replace it
//! (last writer wins). The helpers here take a bare `Connection` so
//! multi-collection workflows can run them inside one transaction.

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{PosError, PosResult};

/// A record persisted as an element of a named collection.
pub trait Record: Serialize + DeserializeOwned {
    /// Row key in the `collections` table.
    const COLLECTION: &'static str;
    /// Prefix for generated ids (`ord`, `res`, ...).
    const ID_PREFIX: &'static str;
    /// Human-readable kind used in `NotFound` errors.
    const KIND: &'static str;

    fn id(&self) -> &str;
}

/// Every collection key written by this crate.
pub const ALL_COLLECTIONS: &[&str] = &[
    "menu",
    "ingredients",
    "recipes",
    "tables",
    "waitlist",
    "orders",
    "reservations",
    "customers",
    "users",
    "feedback",
];

/// Generate a fresh id of the form `<prefix>-<uuid>`.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

// ---------------------------------------------------------------------------
// Whole-collection reads and writes
// ---------------------------------------------------------------------------

/// Read a collection. A missing row is an empty collection.
pub fn load<T: Record>(conn: &Connection) -> PosResult<Vec<T>> {
    let json_str: Option<String> = conn
        .query_row(
            "SELECT data FROM collections WHERE collection_key = ?1",
            params![T::COLLECTION],
            |row| row.get(0),
        )
        .optional()?;

    match json_str {
        Some(s) => serde_json::from_str::<Vec<T>>(&s).map_err(|e| {
            error!(collection = T::COLLECTION, "collection JSON parse error: {e}");
            PosError::from(e)
        }),
        None => Ok(Vec::new()),
    }
}

/// Replace a collection with `records`.
pub fn save<T: Record>(conn: &Connection, records: &[T]) -> PosResult<()> {
    let data = serde_json::to_string(records)?;
    conn.execute(
        "INSERT INTO collections (collection_key, data, record_count, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(collection_key) DO UPDATE SET
            data = excluded.data,
            record_count = excluded.record_count,
            updated_at = excluded.updated_at",
        params![T::COLLECTION, data, records.len() as i64],
    )?;
    debug!(
        collection = T::COLLECTION,
        count = records.len(),
        "collection saved"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Record-level helpers
// ---------------------------------------------------------------------------

/// Look up one record by id.
pub fn find<T: Record>(conn: &Connection, id: &str) -> PosResult<T> {
    load::<T>(conn)?
        .into_iter()
        .find(|r| r.id() == id)
        .ok_or_else(|| PosError::not_found(T::KIND, id))
}

/// Look up one record by id, `None` when absent.
pub fn find_opt<T: Record>(conn: &Connection, id: &str) -> PosResult<Option<T>> {
    Ok(load::<T>(conn)?.into_iter().find(|r| r.id() == id))
}

/// Append a record. Rejects an id that is already present.
pub fn insert<T: Record + Clone>(conn: &Connection, record: T) -> PosResult<T> {
    let mut records = load::<T>(conn)?;
    if records.iter().any(|r| r.id() == record.id()) {
        return Err(PosError::Conflict(format!(
            "{} already exists: {}",
            T::KIND,
            record.id()
        )));
    }
    records.push(record.clone());
    save(conn, &records)?;
    Ok(record)
}

/// Mutate one record in place and persist the collection.
///
/// The closure may reject the change; nothing is written in that case.
pub fn update<T, F>(conn: &Connection, id: &str, f: F) -> PosResult<T>
where
    T: Record + Clone,
    F: FnOnce(&mut T) -> PosResult<()>,
{
    let mut records = load::<T>(conn)?;
    let record = records
        .iter_mut()
        .find(|r| r.id() == id)
        .ok_or_else(|| PosError::not_found(T::KIND, id))?;
    f(record)?;
    let updated = record.clone();
    save(conn, &records)?;
    Ok(updated)
}

/// Remove exactly one record by id, returning it.
pub fn remove<T: Record>(conn: &Connection, id: &str) -> PosResult<T> {
    let mut records = load::<T>(conn)?;
    let index = records
        .iter()
        .position(|r| r.id() == id)
        .ok_or_else(|| PosError::not_found(T::KIND, id))?;
    let removed = records.remove(index);
    save(conn, &records)?;
    info!(kind = T::KIND, id = %id, "record deleted");
    Ok(removed)
}

/// Number of records stored under every collection key.
pub fn collection_counts(conn: &Connection) -> PosResult<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT collection_key, record_count FROM collections ORDER BY collection_key",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Drop every collection (demo reset). Settings are left untouched.
pub fn clear_all(conn: &Connection) -> PosResult<()> {
    conn.execute("DELETE FROM collections", [])?;
    info!("all collections cleared");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        text: String,
    }

    impl Record for Note {
        const COLLECTION: &'static str = "notes";
        const ID_PREFIX: &'static str = "note";
        const KIND: &'static str = "Note";

        fn id(&self) -> &str {
            &self.id
        }
    }

    fn note(text: &str) -> Note {
        Note {
            id: new_id(Note::ID_PREFIX),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_missing_collection_is_empty() {
        let db = db::test_db_state();
        let conn = db.conn.lock().unwrap();
        assert!(load::<Note>(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_collection_is_an_error() {
        let db = db::test_db_state();
        let conn = db.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO collections (collection_key, data) VALUES ('notes', X'00ff')",
            [],
        )
        .unwrap();
        assert!(matches!(load::<Note>(&conn), Err(PosError::Database(_))));
        assert!(insert(&conn, note("a")).is_err());

        conn.execute_batch("ALTER TABLE collections RENAME TO collections_old")
            .unwrap();
        assert!(matches!(load::<Note>(&conn), Err(PosError::Database(_))));
    }

    #[test]
    fn test_insert_assigns_unique_ids_and_reads_back_once() {
        let db = db::test_db_state();
        let conn = db.conn.lock().unwrap();

        let a = insert(&conn, note("a")).unwrap();
        let b = insert(&conn, note("b")).unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("note-"));

        let all = load::<Note>(&conn).unwrap();
        assert_eq!(all.iter().filter(|n| n.id == a.id).count(), 1);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let db = db::test_db_state();
        let conn = db.conn.lock().unwrap();
        let a = insert(&conn, note("a")).unwrap();
        let err = insert(&conn, a.clone()).unwrap_err();
        assert!(matches!(err, PosError::Conflict(_)));
        assert_eq!(load::<Note>(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_remove_deletes_exactly_one() {
        let db = db::test_db_state();
        let conn = db.conn.lock().unwrap();
        let a = insert(&conn, note("a")).unwrap();
        let b = insert(&conn, note("b")).unwrap();
        let c = insert(&conn, note("c")).unwrap();

        let removed = remove::<Note>(&conn, &b.id).unwrap();
        assert_eq!(removed, b);

        let rest = load::<Note>(&conn).unwrap();
        assert_eq!(rest, vec![a, c]);
    }

    #[test]
    fn test_update_and_remove_missing_record() {
        let db = db::test_db_state();
        let conn = db.conn.lock().unwrap();
        insert(&conn, note("a")).unwrap();

        let err = update::<Note, _>(&conn, "note-missing", |_| Ok(())).unwrap_err();
        assert!(matches!(err, PosError::NotFound { kind: "Note", .. }));

        let err = remove::<Note>(&conn, "note-missing").unwrap_err();
        assert!(matches!(err, PosError::NotFound { .. }));
        assert_eq!(load::<Note>(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_rejected_update_writes_nothing() {
        let db = db::test_db_state();
        let conn = db.conn.lock().unwrap();
        let a = insert(&conn, note("a")).unwrap();

        let err = update::<Note, _>(&conn, &a.id, |n| {
            n.text = "changed".into();
            Err(PosError::validation("nope"))
        })
        .unwrap_err();
        assert!(matches!(err, PosError::Validation(_)));
        assert_eq!(find::<Note>(&conn, &a.id).unwrap().text, "a");
    }

    #[test]
    fn test_clear_all_and_counts() {
        let db = db::test_db_state();
        let conn = db.conn.lock().unwrap();
        insert(&conn, note("a")).unwrap();
        insert(&conn, note("b")).unwrap();

        let counts = collection_counts(&conn).unwrap();
        assert_eq!(counts, vec![("notes".to_string(), 2)]);

        clear_all(&conn).unwrap();
        assert!(load::<Note>(&conn).unwrap().is_empty());
        assert!(find_opt::<Note>(&conn, "note-x").unwrap().is_none());
    }
}
