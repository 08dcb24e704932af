//! Demo data for a fresh install and the "reset demo" action.

use chrono::Utc;
use rusqlite::Connection;
use tracing::info;

use crate::db::{self, DbState};
use crate::error::PosResult;
use crate::models::{Ingredient, KitchenStation, MenuItem, Table, TableStatus, User, UserRole};
use crate::store::{self, Record};
use crate::users::PIN_HASH_COST;

/// PIN of the seeded administrator. Change it after first login.
pub const DEMO_ADMIN_PIN: &str = "1234";

const DEMO_TABLES: &[(u32, u32)] = &[
    (1, 2),
    (2, 2),
    (3, 4),
    (4, 4),
    (5, 4),
    (6, 4),
    (7, 6),
    (8, 6),
    (9, 4),
    (10, 4),
    (11, 8),
    (12, 2),
];

// (name, category, dine-in, delivery, station)
const DEMO_MENU: &[(&str, &str, f64, f64, KitchenStation)] = &[
    ("Ceviche clásico", "Ceviches", 35.0, 38.0, KitchenStation::Cold),
    ("Ceviche mixto", "Ceviches", 42.0, 45.0, KitchenStation::Cold),
    ("Tiradito al ají amarillo", "Ceviches", 34.0, 37.0, KitchenStation::Cold),
    ("Causa limeña", "Entradas", 22.0, 24.0, KitchenStation::Cold),
    ("Chicharrón de pescado", "Entradas", 32.0, 35.0, KitchenStation::Fryer),
    ("Lomo saltado", "Fondos", 45.0, 48.0, KitchenStation::Griddle),
    ("Arroz con mariscos", "Fondos", 44.0, 47.0, KitchenStation::Griddle),
    ("Pescado a la parrilla", "Fondos", 48.0, 51.0, KitchenStation::Grill),
    ("Suspiro limeño", "Postres", 14.0, 16.0, KitchenStation::Desserts),
    ("Chicha morada (jarra)", "Bebidas", 18.0, 20.0, KitchenStation::Bar),
    ("Pisco sour", "Bebidas", 24.0, 26.0, KitchenStation::Bar),
];

// (name, stock, unit, minimum, unit cost)
const DEMO_INGREDIENTS: &[(&str, f64, &str, f64, f64)] = &[
    ("Pescado fresco", 12.0, "kg", 5.0, 38.0),
    ("Limón", 20.0, "kg", 8.0, 4.5),
    ("Cebolla roja", 15.0, "kg", 5.0, 3.0),
    ("Ají amarillo", 3.0, "kg", 2.0, 9.0),
    ("Lomo fino", 6.0, "kg", 4.0, 52.0),
    ("Arroz", 25.0, "kg", 10.0, 4.2),
    ("Papa amarilla", 2.0, "kg", 6.0, 3.8),
];

fn is_empty(conn: &Connection) -> PosResult<bool> {
    Ok(store::load::<Table>(conn)?.is_empty()
        && store::load::<MenuItem>(conn)?.is_empty()
        && store::load::<User>(conn)?.is_empty())
}

fn write_demo(conn: &Connection) -> PosResult<()> {
    let tables: Vec<Table> = DEMO_TABLES
        .iter()
        .map(|&(number, capacity)| Table {
            id: store::new_id(Table::ID_PREFIX),
            number,
            status: TableStatus::Free,
            capacity,
            diners: None,
            waiter_id: None,
            current_order_id: None,
            reservation_id: None,
        })
        .collect();
    store::save(conn, &tables)?;

    let menu: Vec<MenuItem> = DEMO_MENU
        .iter()
        .map(|&(name, category, dine_in, delivery, station)| MenuItem {
            id: store::new_id(MenuItem::ID_PREFIX),
            name: name.to_string(),
            category: category.to_string(),
            dine_in_price: dine_in,
            delivery_price: delivery,
            description: String::new(),
            photo: None,
            tags: Vec::new(),
            available: true,
            station,
        })
        .collect();
    store::save(conn, &menu)?;

    let ingredients: Vec<Ingredient> = DEMO_INGREDIENTS
        .iter()
        .map(|&(name, stock, unit, minimum, unit_cost)| Ingredient {
            id: store::new_id(Ingredient::ID_PREFIX),
            name: name.to_string(),
            stock,
            unit: unit.to_string(),
            minimum,
            unit_cost,
            lot: None,
            expires_on: None,
        })
        .collect();
    store::save(conn, &ingredients)?;

    let admin = User {
        id: store::new_id(User::ID_PREFIX),
        name: "Administrador".to_string(),
        role: UserRole::Admin,
        roles: UserRole::ALL.to_vec(),
        pin_hash: Some(bcrypt::hash(DEMO_ADMIN_PIN, PIN_HASH_COST)?),
        active: true,
        email: None,
        created_at: Utc::now(),
    };
    store::save(conn, &[admin])?;

    info!(
        tables = tables.len(),
        menu = menu.len(),
        ingredients = ingredients.len(),
        "demo data seeded"
    );
    Ok(())
}

/// Seed demo data when no tables, menu items or users exist yet.
/// Returns whether anything was written.
pub fn seed_if_empty(db: &DbState) -> PosResult<bool> {
    let conn = db.conn.lock()?;
    if !is_empty(&conn)? {
        return Ok(false);
    }
    db::with_transaction(&conn, write_demo)?;
    Ok(true)
}

/// Wipe every collection and the login lockout, then seed again.
/// Restaurant configuration is kept.
pub fn reset_demo(db: &DbState) -> PosResult<()> {
    let conn = db.conn.lock()?;
    db::with_transaction(&conn, |tx| {
        store::clear_all(tx)?;
        db::delete_all_settings(tx, "staff")?;
        write_demo(tx)
    })?;
    info!("demo reset");
    Ok(())
}
