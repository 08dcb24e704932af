//! Dining tables and the walk-in waitlist.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};
use crate::models::{Order, Table, TableStatus, WaitlistEntry};
use crate::store::{self, Record};

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Add a free table. Table numbers are unique.
pub fn create_table(db: &DbState, number: u32, capacity: u32) -> PosResult<Table> {
    if number == 0 {
        return Err(PosError::validation("Table number must be at least 1"));
    }
    if capacity == 0 {
        return Err(PosError::validation("Capacity must be at least 1"));
    }
    let conn = db.conn.lock()?;
    if store::load::<Table>(&conn)?.iter().any(|t| t.number == number) {
        return Err(PosError::Conflict(format!("table {number} already exists")));
    }
    let table = store::insert(
        &conn,
        Table {
            id: store::new_id(Table::ID_PREFIX),
            number,
            status: TableStatus::Free,
            capacity,
            diners: None,
            waiter_id: None,
            current_order_id: None,
            reservation_id: None,
        },
    )?;
    info!(table = number, capacity, "table created");
    Ok(table)
}

pub fn list_tables(db: &DbState) -> PosResult<Vec<Table>> {
    let conn = db.conn.lock()?;
    let mut tables = store::load::<Table>(&conn)?;
    tables.sort_by_key(|t| t.number);
    Ok(tables)
}

pub fn get_table(db: &DbState, id: &str) -> PosResult<Table> {
    let conn = db.conn.lock()?;
    store::find(&conn, id)
}

pub fn table_by_number(db: &DbState, number: u32) -> PosResult<Table> {
    list_tables(db)?
        .into_iter()
        .find(|t| t.number == number)
        .ok_or_else(|| PosError::not_found(Table::KIND, number.to_string()))
}

/// Whether the order linked to `table` still exists.
fn holds_order(conn: &Connection, table: &Table) -> PosResult<bool> {
    match table.current_order_id.as_deref() {
        Some(order_id) => Ok(store::find_opt::<Order>(conn, order_id)?.is_some()),
        None => Ok(false),
    }
}

/// Set a table's status directly (floor plan edits).
///
/// Leaving `occupied` clears the party; a table with a live order cannot be
/// freed this way. A link to an order that no longer exists is dropped.
pub fn set_table_status(db: &DbState, id: &str, status: TableStatus) -> PosResult<Table> {
    let conn = db.conn.lock()?;
    let holds = holds_order(&conn, &store::find::<Table>(&conn, id)?)?;
    let table = store::update::<Table, _>(&conn, id, |t| {
        if holds && status != TableStatus::Occupied {
            return Err(PosError::Conflict(format!(
                "table {} has an open order",
                t.number
            )));
        }
        if !holds && t.current_order_id.is_some() {
            warn!(table = t.number, "dropping link to a missing order");
            t.current_order_id = None;
        }
        t.status = status;
        if status != TableStatus::Occupied {
            t.diners = None;
            t.waiter_id = None;
        }
        if status != TableStatus::Reserved {
            t.reservation_id = None;
        }
        Ok(())
    })?;
    info!(table = table.number, status = %status, "table status set");
    Ok(table)
}

pub fn set_capacity(db: &DbState, id: &str, capacity: u32) -> PosResult<Table> {
    if capacity == 0 {
        return Err(PosError::validation("Capacity must be at least 1"));
    }
    let conn = db.conn.lock()?;
    store::update::<Table, _>(&conn, id, |t| {
        t.capacity = capacity;
        Ok(())
    })
}

/// Seat a party at a free, reserved or waiting table.
pub fn seat_party(
    db: &DbState,
    id: &str,
    diners: u32,
    waiter_id: Option<&str>,
) -> PosResult<Table> {
    if diners == 0 {
        return Err(PosError::validation("Party size must be at least 1"));
    }
    let conn = db.conn.lock()?;
    let table = store::update::<Table, _>(&conn, id, |t| {
        if !matches!(
            t.status,
            TableStatus::Free | TableStatus::Reserved | TableStatus::Waiting
        ) {
            return Err(PosError::Conflict(format!(
                "table {} is {}",
                t.number, t.status
            )));
        }
        if diners > t.capacity {
            warn!(table = t.number, diners, capacity = t.capacity, "party too large for table");
            return Err(PosError::validation(format!(
                "Table {} seats {} at most",
                t.number, t.capacity
            )));
        }
        t.status = TableStatus::Occupied;
        t.diners = Some(diners);
        t.waiter_id = waiter_id.map(str::to_string);
        Ok(())
    })?;
    info!(table = table.number, diners, "party seated");
    Ok(table)
}

/// Return a table to free once it has no open order.
pub fn release_table(db: &DbState, id: &str) -> PosResult<Table> {
    set_table_status(db, id, TableStatus::Free)
}

/// Free tables that fit `party`, smallest first.
pub fn available_for(db: &DbState, party: u32) -> PosResult<Vec<Table>> {
    let mut tables: Vec<Table> = list_tables(db)?
        .into_iter()
        .filter(|t| t.status == TableStatus::Free && t.capacity >= party)
        .collect();
    tables.sort_by_key(|t| (t.capacity, t.number));
    Ok(tables)
}

pub fn delete_table(db: &DbState, id: &str) -> PosResult<Table> {
    let conn = db.conn.lock()?;
    let table = store::find::<Table>(&conn, id)?;
    if holds_order(&conn, &table)? {
        return Err(PosError::Conflict(format!(
            "table {} has an open order",
            table.number
        )));
    }
    store::remove::<Table>(&conn, id)
}

// ---------------------------------------------------------------------------
// Waitlist
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWaitlistEntry {
    pub customer_name: String,
    pub phone: String,
    pub party_size: u32,
    #[serde(default)]
    pub estimated_minutes: u32,
}

pub fn add_to_waitlist(db: &DbState, input: NewWaitlistEntry) -> PosResult<WaitlistEntry> {
    if input.customer_name.trim().is_empty() {
        return Err(PosError::validation("Name is required"));
    }
    if input.phone.trim().is_empty() {
        return Err(PosError::validation("Phone is required"));
    }
    if input.party_size == 0 {
        return Err(PosError::validation("Party size must be at least 1"));
    }
    let conn = db.conn.lock()?;
    let entry = store::insert(
        &conn,
        WaitlistEntry {
            id: store::new_id(WaitlistEntry::ID_PREFIX),
            customer_name: input.customer_name.trim().to_string(),
            phone: input.phone.trim().to_string(),
            party_size: input.party_size,
            estimated_minutes: input.estimated_minutes,
            notified: false,
            created_at: Utc::now(),
        },
    )?;
    info!(id = %entry.id, party = entry.party_size, "added to waitlist");
    Ok(entry)
}

/// Waitlist in arrival order.
pub fn list_waitlist(db: &DbState) -> PosResult<Vec<WaitlistEntry>> {
    let conn = db.conn.lock()?;
    let mut entries = store::load::<WaitlistEntry>(&conn)?;
    entries.sort_by_key(|e| e.created_at);
    Ok(entries)
}

pub fn notify_waitlist(db: &DbState, id: &str) -> PosResult<WaitlistEntry> {
    let conn = db.conn.lock()?;
    let entry = store::update::<WaitlistEntry, _>(&conn, id, |e| {
        e.notified = true;
        Ok(())
    })?;
    info!(id = %entry.id, "waitlist party notified");
    Ok(entry)
}

/// Seat a waitlisted party at a free or cleaning table and drop the entry.
pub fn assign_from_waitlist(db: &DbState, entry_id: &str, table_id: &str) -> PosResult<Table> {
    let conn = db.conn.lock()?;
    db::with_transaction(&conn, |tx| {
        let entry = store::remove::<WaitlistEntry>(tx, entry_id)?;
        let table = store::update::<Table, _>(tx, table_id, |t| {
            if !matches!(t.status, TableStatus::Free | TableStatus::Cleaning) {
                return Err(PosError::Conflict(format!(
                    "table {} is {}",
                    t.number, t.status
                )));
            }
            t.status = TableStatus::Occupied;
            t.diners = Some(entry.party_size);
            Ok(())
        })?;
        info!(table = table.number, party = entry.party_size, "waitlist party seated");
        Ok(table)
    })
}

pub fn remove_from_waitlist(db: &DbState, id: &str) -> PosResult<WaitlistEntry> {
    let conn = db.conn.lock()?;
    store::remove::<WaitlistEntry>(&conn, id)
}

/// Whole minutes an entry has waited as of `now`.
pub fn minutes_waiting(entry: &WaitlistEntry, now: DateTime<Utc>) -> i64 {
    (now - entry.created_at).num_minutes().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db_state;
    use chrono::Duration;

    fn waitlist_input(name: &str, party: u32) -> NewWaitlistEntry {
        NewWaitlistEntry {
            customer_name: name.into(),
            phone: "999111222".into(),
            party_size: party,
            estimated_minutes: 15,
        }
    }

    #[test]
    fn test_create_rejects_duplicate_number() {
        let db = test_db_state();
        create_table(&db, 1, 4).unwrap();
        assert!(matches!(
            create_table(&db, 1, 2),
            Err(PosError::Conflict(_))
        ));
        assert!(create_table(&db, 2, 0).is_err());
        assert_eq!(list_tables(&db).unwrap().len(), 1);
    }

    #[test]
    fn test_seat_and_release() {
        let db = test_db_state();
        let t = create_table(&db, 3, 4).unwrap();

        assert!(seat_party(&db, &t.id, 6, None).is_err());
        let seated = seat_party(&db, &t.id, 3, Some("usr-w")).unwrap();
        assert_eq!(seated.status, TableStatus::Occupied);
        assert_eq!(seated.diners, Some(3));
        assert!(matches!(
            seat_party(&db, &t.id, 2, None),
            Err(PosError::Conflict(_))
        ));

        let freed = release_table(&db, &t.id).unwrap();
        assert_eq!(freed.status, TableStatus::Free);
        assert!(freed.diners.is_none());
    }

    #[test]
    fn test_link_to_missing_order_does_not_block_release() {
        let db = test_db_state();
        let t = create_table(&db, 5, 4).unwrap();
        {
            let conn = db.conn.lock().unwrap();
            store::update::<Table, _>(&conn, &t.id, |t| {
                t.status = TableStatus::Occupied;
                t.current_order_id = Some("ord-gone".into());
                Ok(())
            })
            .unwrap();
        }

        let freed = release_table(&db, &t.id).unwrap();
        assert_eq!(freed.status, TableStatus::Free);
        assert!(freed.current_order_id.is_none());
        delete_table(&db, &t.id).unwrap();
    }

    #[test]
    fn test_available_for_party() {
        let db = test_db_state();
        create_table(&db, 1, 2).unwrap();
        let six = create_table(&db, 2, 6).unwrap();
        let four = create_table(&db, 3, 4).unwrap();
        let busy = create_table(&db, 4, 4).unwrap();
        seat_party(&db, &busy.id, 2, None).unwrap();

        let fits: Vec<u32> = available_for(&db, 3)
            .unwrap()
            .iter()
            .map(|t| t.number)
            .collect();
        assert_eq!(fits, vec![four.number, six.number]);
        assert_eq!(table_by_number(&db, 2).unwrap().id, six.id);
    }

    #[test]
    fn test_waitlist_assign_seats_and_removes_entry() {
        let db = test_db_state();
        let t = create_table(&db, 5, 4).unwrap();
        set_table_status(&db, &t.id, TableStatus::Cleaning).unwrap();
        let entry = add_to_waitlist(&db, waitlist_input("Rosa", 3)).unwrap();
        let other = add_to_waitlist(&db, waitlist_input("Luis", 2)).unwrap();

        let notified = notify_waitlist(&db, &entry.id).unwrap();
        assert!(notified.notified);

        let table = assign_from_waitlist(&db, &entry.id, &t.id).unwrap();
        assert_eq!(table.status, TableStatus::Occupied);
        assert_eq!(table.diners, Some(3));

        let rest = list_waitlist(&db).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, other.id);

        // occupied table: entry stays put
        assert!(assign_from_waitlist(&db, &other.id, &t.id).is_err());
        assert_eq!(list_waitlist(&db).unwrap().len(), 1);
    }

    #[test]
    fn test_waitlist_validation_and_remove() {
        let db = test_db_state();
        assert!(add_to_waitlist(&db, waitlist_input("", 2)).is_err());
        assert!(add_to_waitlist(&db, waitlist_input("Ana", 0)).is_err());
        let e = add_to_waitlist(&db, waitlist_input("Ana", 2)).unwrap();
        remove_from_waitlist(&db, &e.id).unwrap();
        assert!(list_waitlist(&db).unwrap().is_empty());
    }

    #[test]
    fn test_minutes_waiting() {
        let now = Utc::now();
        let entry = WaitlistEntry {
            id: "wait-1".into(),
            customer_name: "Ana".into(),
            phone: "1".into(),
            party_size: 2,
            estimated_minutes: 10,
            notified: false,
            created_at: now - Duration::minutes(12),
        };
        assert_eq!(minutes_waiting(&entry, now), 12);
    }

    #[test]
    fn test_delete_table() {
        let db = test_db_state();
        let a = create_table(&db, 1, 2).unwrap();
        let b = create_table(&db, 2, 2).unwrap();
        delete_table(&db, &a.id).unwrap();
        let rest = list_tables(&db).unwrap();
        assert_eq!(rest, vec![b]);
    }
}
