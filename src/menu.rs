//! Menu catalog.
//!
//! Menu items live in the `menu` collection. Prices are per channel; the
//! order flow snapshots the channel price when a line is added.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::DbState;
use crate::error::{PosError, PosResult};
use crate::models::{KitchenStation, MenuItem};
use crate::store::{self, Record};

/// Fields accepted when creating a menu item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMenuItem {
    pub name: String,
    pub category: String,
    pub dine_in_price: f64,
    pub delivery_price: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub station: KitchenStation,
}

/// Partial update. `None` leaves the field as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItemPatch {
    pub name: Option<String>,
    pub category: Option<String>,
    pub dine_in_price: Option<f64>,
    pub delivery_price: Option<f64>,
    pub description: Option<String>,
    pub photo: Option<String>,
    pub tags: Option<Vec<String>>,
    pub available: Option<bool>,
    pub station: Option<KitchenStation>,
}

fn check_price(label: &str, price: f64) -> PosResult<()> {
    if !price.is_finite() || price < 0.0 {
        return Err(PosError::validation(format!(
            "{label} price must be zero or more"
        )));
    }
    Ok(())
}

fn check_required(label: &str, value: &str) -> PosResult<()> {
    if value.trim().is_empty() {
        return Err(PosError::validation(format!("{label} is required")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

pub fn create_item(db: &DbState, input: NewMenuItem) -> PosResult<MenuItem> {
    check_required("Name", &input.name)?;
    check_required("Category", &input.category)?;
    check_price("Dine-in", input.dine_in_price)?;
    check_price("Delivery", input.delivery_price)?;

    let item = MenuItem {
        id: store::new_id(MenuItem::ID_PREFIX),
        name: input.name.trim().to_string(),
        category: input.category.trim().to_string(),
        dine_in_price: input.dine_in_price,
        delivery_price: input.delivery_price,
        description: input.description,
        photo: input.photo,
        tags: input.tags,
        available: true,
        station: input.station,
    };

    let conn = db.conn.lock()?;
    let item = store::insert(&conn, item)?;
    info!(id = %item.id, name = %item.name, category = %item.category, "menu item created");
    Ok(item)
}

pub fn update_item(db: &DbState, id: &str, patch: MenuItemPatch) -> PosResult<MenuItem> {
    if let Some(name) = &patch.name {
        check_required("Name", name)?;
    }
    if let Some(category) = &patch.category {
        check_required("Category", category)?;
    }
    if let Some(p) = patch.dine_in_price {
        check_price("Dine-in", p)?;
    }
    if let Some(p) = patch.delivery_price {
        check_price("Delivery", p)?;
    }

    let conn = db.conn.lock()?;
    let item = store::update::<MenuItem, _>(&conn, id, |item| {
        if let Some(v) = patch.name {
            item.name = v.trim().to_string();
        }
        if let Some(v) = patch.category {
            item.category = v.trim().to_string();
        }
        if let Some(v) = patch.dine_in_price {
            item.dine_in_price = v;
        }
        if let Some(v) = patch.delivery_price {
            item.delivery_price = v;
        }
        if let Some(v) = patch.description {
            item.description = v;
        }
        if let Some(v) = patch.photo {
            item.photo = Some(v);
        }
        if let Some(v) = patch.tags {
            item.tags = v;
        }
        if let Some(v) = patch.available {
            item.available = v;
        }
        if let Some(v) = patch.station {
            item.station = v;
        }
        Ok(())
    })?;
    info!(id = %item.id, "menu item updated");
    Ok(item)
}

/// Set the availability flag. No other field changes.
pub fn set_availability(db: &DbState, id: &str, available: bool) -> PosResult<MenuItem> {
    let conn = db.conn.lock()?;
    let item = store::update::<MenuItem, _>(&conn, id, |item| {
        item.available = available;
        Ok(())
    })?;
    info!(id = %item.id, available, "menu item availability set");
    Ok(item)
}

/// Flip the availability flag. No other field changes.
pub fn toggle_availability(db: &DbState, id: &str) -> PosResult<MenuItem> {
    let conn = db.conn.lock()?;
    let item = store::update::<MenuItem, _>(&conn, id, |item| {
        item.available = !item.available;
        Ok(())
    })?;
    info!(id = %item.id, available = item.available, "menu item availability toggled");
    Ok(item)
}

pub fn delete_item(db: &DbState, id: &str) -> PosResult<MenuItem> {
    let conn = db.conn.lock()?;
    store::remove::<MenuItem>(&conn, id)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

pub fn list_items(db: &DbState) -> PosResult<Vec<MenuItem>> {
    let conn = db.conn.lock()?;
    store::load(&conn)
}

pub fn get_item(db: &DbState, id: &str) -> PosResult<MenuItem> {
    let conn = db.conn.lock()?;
    store::find(&conn, id)
}

/// Items in a category, matched case-insensitively.
pub fn items_by_category(db: &DbState, category: &str) -> PosResult<Vec<MenuItem>> {
    let wanted = category.trim().to_lowercase();
    Ok(list_items(db)?
        .into_iter()
        .filter(|i| i.category.to_lowercase() == wanted)
        .collect())
}

pub fn available_items(db: &DbState) -> PosResult<Vec<MenuItem>> {
    Ok(list_items(db)?.into_iter().filter(|i| i.available).collect())
}

pub fn items_by_station(db: &DbState, station: KitchenStation) -> PosResult<Vec<MenuItem>> {
    Ok(list_items(db)?
        .into_iter()
        .filter(|i| i.station == station)
        .collect())
}

/// Distinct categories in first-seen order.
pub fn categories(db: &DbState) -> PosResult<Vec<String>> {
    let mut seen: Vec<String> = Vec::new();
    for item in list_items(db)? {
        if !seen.iter().any(|c| c.eq_ignore_ascii_case(&item.category)) {
            seen.push(item.category);
        }
    }
    Ok(seen)
}

/// Resolve a line's menu item for ordering. Unavailable items are rejected.
pub(crate) fn orderable(items: &[MenuItem], id: &str) -> PosResult<MenuItem> {
    let item = items
        .iter()
        .find(|i| i.id == id)
        .ok_or_else(|| PosError::not_found(MenuItem::KIND, id))?;
    if !item.available {
        warn!(id, name = %item.name, "order line for unavailable menu item");
        return Err(PosError::validation(format!(
            "{} is not available",
            item.name
        )));
    }
    Ok(item.clone())
}

#[cfg(test)]
pub(crate) fn sample_item(name: &str, category: &str, price: f64) -> NewMenuItem {
    NewMenuItem {
        name: name.to_string(),
        category: category.to_string(),
        dine_in_price: price,
        delivery_price: price + 3.0,
        description: String::new(),
        photo: None,
        tags: vec![],
        station: KitchenStation::Cold,
    }
}
