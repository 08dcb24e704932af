//! Reservations and table assignment on arrival.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config;
use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};
use crate::models::{Reservation, ReservationStatus, Table, TableStatus};
use crate::store::{self, Record};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReservation {
    pub customer_name: String,
    pub phone: String,
    pub date: DateTime<Utc>,
    pub party_size: u32,
    #[serde(default)]
    pub preferences: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationPatch {
    pub customer_name: Option<String>,
    pub phone: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub party_size: Option<u32>,
    pub preferences: Option<String>,
    pub status: Option<ReservationStatus>,
}

pub fn create_reservation(db: &DbState, input: NewReservation) -> PosResult<Reservation> {
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
    let reservation = store::insert(
        &conn,
        Reservation {
            id: store::new_id(Reservation::ID_PREFIX),
            customer_name: input.customer_name.trim().to_string(),
            phone: input.phone.trim().to_string(),
            date: input.date,
            party_size: input.party_size,
            preferences: input.preferences,
            assigned_table: None,
            status: ReservationStatus::Confirmed,
            created_at: Utc::now(),
        },
    )?;
    info!(
        id = %reservation.id,
        date = %reservation.date,
        party = reservation.party_size,
        "reservation created"
    );
    Ok(reservation)
}

pub fn list_reservations(db: &DbState) -> PosResult<Vec<Reservation>> {
    let conn = db.conn.lock()?;
    store::load(&conn)
}

pub fn get_reservation(db: &DbState, id: &str) -> PosResult<Reservation> {
    let conn = db.conn.lock()?;
    store::find(&conn, id)
}

/// Reservations on `day` (UTC), earliest first.
pub fn reservations_on(db: &DbState, day: NaiveDate) -> PosResult<Vec<Reservation>> {
    let mut list: Vec<Reservation> = list_reservations(db)?
        .into_iter()
        .filter(|r| r.date.date_naive() == day)
        .collect();
    list.sort_by_key(|r| r.date);
    Ok(list)
}

pub fn update_reservation(
    db: &DbState,
    id: &str,
    patch: ReservationPatch,
) -> PosResult<Reservation> {
    if patch.party_size == Some(0) {
        return Err(PosError::validation("Party size must be at least 1"));
    }
    let conn = db.conn.lock()?;
    store::update::<Reservation, _>(&conn, id, |r| {
        if let Some(v) = patch.customer_name {
            r.customer_name = v;
        }
        if let Some(v) = patch.phone {
            r.phone = v;
        }
        if let Some(v) = patch.date {
            r.date = v;
        }
        if let Some(v) = patch.party_size {
            r.party_size = v;
        }
        if let Some(v) = patch.preferences {
            r.preferences = Some(v);
        }
        if let Some(v) = patch.status {
            r.status = v;
        }
        Ok(())
    })
}

/// Seat a reservation at the first free table that fits, else the first
/// free table. The reservation completes and the table becomes occupied.
pub fn assign_table(db: &DbState, id: &str) -> PosResult<Table> {
    let conn = db.conn.lock()?;
    db::with_transaction(&conn, |tx| {
        let reservation = store::find::<Reservation>(tx, id)?;
        if matches!(
            reservation.status,
            ReservationStatus::Completed | ReservationStatus::Expired
        ) {
            return Err(PosError::Conflict(
                "reservation is already closed".to_string(),
            ));
        }

        let mut tables = store::load::<Table>(tx)?;
        tables.sort_by_key(|t| t.number);
        let index = tables
            .iter()
            .position(|t| t.status == TableStatus::Free && t.capacity >= reservation.party_size)
            .or_else(|| tables.iter().position(|t| t.status == TableStatus::Free))
            .ok_or_else(|| {
                warn!(reservation_id = %id, "no free table for reservation");
                PosError::Conflict("no free table available".to_string())
            })?;

        let table = &mut tables[index];
        if table.capacity < reservation.party_size {
            warn!(
                table = table.number,
                capacity = table.capacity,
                party = reservation.party_size,
                "seating reservation at an undersized table"
            );
        }
        table.status = TableStatus::Occupied;
        table.diners = Some(reservation.party_size);
        table.reservation_id = Some(reservation.id.clone());
        let assigned = table.clone();
        store::save(tx, &tables)?;

        store::update::<Reservation, _>(tx, id, |r| {
            r.status = ReservationStatus::Completed;
            r.assigned_table = Some(assigned.number);
            Ok(())
        })?;
        info!(reservation_id = %id, table = assigned.number, "reservation seated");
        Ok(assigned)
    })
}

/// Cancelling marks the reservation expired.
pub fn cancel_reservation(db: &DbState, id: &str) -> PosResult<Reservation> {
    let conn = db.conn.lock()?;
    let r = store::update::<Reservation, _>(&conn, id, |r| {
        if r.status == ReservationStatus::Completed {
            return Err(PosError::Conflict(
                "reservation is already completed".to_string(),
            ));
        }
        r.status = ReservationStatus::Expired;
        Ok(())
    })?;
    info!(id = %r.id, "reservation cancelled");
    Ok(r)
}

pub fn delete_reservation(db: &DbState, id: &str) -> PosResult<Reservation> {
    let conn = db.conn.lock()?;
    store::remove::<Reservation>(&conn, id)
}

/// Expire confirmed or waiting reservations whose hold window has passed.
/// Returns how many changed.
pub fn expire_overdue(db: &DbState, now: DateTime<Utc>) -> PosResult<usize> {
    let conn = db.conn.lock()?;
    let hold = Duration::minutes(i64::from(
        config::load_with(&conn).reservation_hold_minutes,
    ));
    let mut list = store::load::<Reservation>(&conn)?;
    let mut expired = 0;
    for r in list.iter_mut().filter(|r| {
        matches!(
            r.status,
            ReservationStatus::Confirmed | ReservationStatus::Waiting
        ) && r.date + hold < now
    }) {
        r.status = ReservationStatus::Expired;
        expired += 1;
    }
    if expired > 0 {
        store::save(&conn, &list)?;
        info!(expired, "overdue reservations expired");
    }
    Ok(expired)
}
