//! Restaurant configuration persisted in `local_settings`.
//!
//! Every field is stored as its own row under the `restaurant` category so a
//! missing or unparsable row falls back to its default without affecting the
//! rest.

use chrono::NaiveTime;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{info, warn};

use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};

const CATEGORY: &str = "restaurant";

pub const DEFAULT_TAX_RATE: f64 = 0.18;
pub const DEFAULT_TIP_RATE: f64 = 0.10;
pub const DEFAULT_ZONE_FEE: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestaurantConfig {
    pub name: String,
    pub currency: String,
    pub opening_time: NaiveTime,
    pub closing_time: NaiveTime,
    pub tax_rate: f64,
    pub suggested_tip_rate: f64,
    pub table_turn_minutes: u32,
    pub reservation_hold_minutes: u32,
    /// Flat delivery fee per zone slug.
    pub delivery_zones: BTreeMap<String, f64>,
    pub default_zone_fee: f64,
    pub auto_deduct_stock: bool,
}

impl Default for RestaurantConfig {
    fn default() -> Self {
        let delivery_zones = [
            ("miraflores", 8.0),
            ("san-isidro", 10.0),
            ("barranco", 8.0),
            ("la-molina", 12.0),
            ("surco", 10.0),
        ]
        .into_iter()
        .map(|(zone, fee)| (zone.to_string(), fee))
        .collect();

        Self {
            name: "D'Stephano".to_string(),
            currency: "PEN".to_string(),
            opening_time: NaiveTime::from_hms_opt(11, 0, 0).unwrap_or_default(),
            closing_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or_default(),
            tax_rate: DEFAULT_TAX_RATE,
            suggested_tip_rate: DEFAULT_TIP_RATE,
            table_turn_minutes: 45,
            reservation_hold_minutes: 15,
            delivery_zones,
            default_zone_fee: DEFAULT_ZONE_FEE,
            auto_deduct_stock: false,
        }
    }
}

impl RestaurantConfig {
    /// Flat fee for a delivery zone; unknown zones pay the default fee.
    pub fn zone_fee(&self, zone: &str) -> f64 {
        let key = zone.trim().to_lowercase();
        self.delivery_zones
            .get(&key)
            .copied()
            .unwrap_or(self.default_zone_fee)
    }

    pub fn is_open_at(&self, time: NaiveTime) -> bool {
        time >= self.opening_time && time < self.closing_time
    }

    fn validate(&self) -> PosResult<()> {
        if self.name.trim().is_empty() {
            return Err(PosError::validation("Restaurant name is required"));
        }
        if !(0.0..1.0).contains(&self.tax_rate) {
            return Err(PosError::validation("Tax rate must be between 0 and 1"));
        }
        if !(0.0..=1.0).contains(&self.suggested_tip_rate) {
            return Err(PosError::validation("Tip rate must be between 0 and 1"));
        }
        if self.closing_time <= self.opening_time {
            return Err(PosError::validation(
                "Closing time must be after opening time",
            ));
        }
        if self.default_zone_fee < 0.0 || self.delivery_zones.values().any(|f| *f < 0.0) {
            return Err(PosError::validation("Delivery fees cannot be negative"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

fn read_parsed<T: FromStr>(conn: &Connection, key: &str, default: T) -> T {
    match db::get_setting(conn, CATEGORY, key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "unparsable restaurant setting, using default");
            default
        }),
        None => default,
    }
}

/// Read the configuration using an already-locked connection.
pub fn load_with(conn: &Connection) -> RestaurantConfig {
    let d = RestaurantConfig::default();

    let delivery_zones = match db::get_setting(conn, CATEGORY, "delivery_zones") {
        Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("delivery_zones setting is not valid JSON ({e}), using defaults");
            d.delivery_zones.clone()
        }),
        None => d.delivery_zones.clone(),
    };

    RestaurantConfig {
        name: db::get_setting(conn, CATEGORY, "name").unwrap_or(d.name),
        currency: db::get_setting(conn, CATEGORY, "currency").unwrap_or(d.currency),
        opening_time: read_parsed(conn, "opening_time", d.opening_time),
        closing_time: read_parsed(conn, "closing_time", d.closing_time),
        tax_rate: read_parsed(conn, "tax_rate", d.tax_rate),
        suggested_tip_rate: read_parsed(conn, "suggested_tip_rate", d.suggested_tip_rate),
        table_turn_minutes: read_parsed(conn, "table_turn_minutes", d.table_turn_minutes),
        reservation_hold_minutes: read_parsed(
            conn,
            "reservation_hold_minutes",
            d.reservation_hold_minutes,
        ),
        delivery_zones,
        default_zone_fee: read_parsed(conn, "default_zone_fee", d.default_zone_fee),
        auto_deduct_stock: read_parsed(conn, "auto_deduct_stock", d.auto_deduct_stock),
    }
}

/// Write every field of `config` using an already-locked connection.
pub fn save_with(conn: &Connection, config: &RestaurantConfig) -> PosResult<()> {
    config.validate()?;
    let zones = serde_json::to_string(&config.delivery_zones)?;
    db::with_transaction(conn, |tx| {
        db::set_setting(tx, CATEGORY, "name", &config.name)?;
        db::set_setting(tx, CATEGORY, "currency", &config.currency)?;
        db::set_setting(tx, CATEGORY, "opening_time", &config.opening_time.to_string())?;
        db::set_setting(tx, CATEGORY, "closing_time", &config.closing_time.to_string())?;
        db::set_setting(tx, CATEGORY, "tax_rate", &config.tax_rate.to_string())?;
        db::set_setting(
            tx,
            CATEGORY,
            "suggested_tip_rate",
            &config.suggested_tip_rate.to_string(),
        )?;
        db::set_setting(
            tx,
            CATEGORY,
            "table_turn_minutes",
            &config.table_turn_minutes.to_string(),
        )?;
        db::set_setting(
            tx,
            CATEGORY,
            "reservation_hold_minutes",
            &config.reservation_hold_minutes.to_string(),
        )?;
        db::set_setting(tx, CATEGORY, "delivery_zones", &zones)?;
        db::set_setting(
            tx,
            CATEGORY,
            "default_zone_fee",
            &config.default_zone_fee.to_string(),
        )?;
        db::set_setting(
            tx,
            CATEGORY,
            "auto_deduct_stock",
            &config.auto_deduct_stock.to_string(),
        )
    })?;
    info!(name = %config.name, "restaurant config saved");
    Ok(())
}

pub fn load(db: &DbState) -> PosResult<RestaurantConfig> {
    let conn = db.conn.lock()?;
    Ok(load_with(&conn))
}

pub fn save(db: &DbState, config: &RestaurantConfig) -> PosResult<()> {
    let conn = db.conn.lock()?;
    save_with(&conn, config)
}

/// Drop every stored field so the defaults apply again.
pub fn reset(db: &DbState) -> PosResult<()> {
    let conn = db.conn.lock()?;
    db::delete_all_settings(&conn, CATEGORY)?;
    info!("restaurant config reset to defaults");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db_state;

    #[test]
    fn test_defaults_when_nothing_stored() {
        let db = test_db_state();
        let config = load(&db).unwrap();
        assert_eq!(config, RestaurantConfig::default());
        assert_eq!(config.currency, "PEN");
        assert_eq!(config.tax_rate, 0.18);
        assert_eq!(config.reservation_hold_minutes, 15);
        assert!(!config.auto_deduct_stock);
    }

    #[test]
    fn test_zone_fee_lookup() {
        let config = RestaurantConfig::default();
        assert_eq!(config.zone_fee("miraflores"), 8.0);
        assert_eq!(config.zone_fee(" La-Molina "), 12.0);
        assert_eq!(config.zone_fee("callao"), 10.0);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let db = test_db_state();
        let mut config = RestaurantConfig::default();
        config.name = "Test Bistro".into();
        config.tax_rate = 0.10;
        config.auto_deduct_stock = true;
        config.delivery_zones.insert("callao".into(), 15.0);
        save(&db, &config).unwrap();

        let loaded = load(&db).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.zone_fee("callao"), 15.0);
    }

    #[test]
    fn test_bad_row_falls_back_to_default() {
        let db = test_db_state();
        {
            let conn = db.conn.lock().unwrap();
            db::set_setting(&conn, CATEGORY, "tax_rate", "eighteen").unwrap();
            db::set_setting(&conn, CATEGORY, "table_turn_minutes", "60").unwrap();
        }
        let config = load(&db).unwrap();
        assert_eq!(config.tax_rate, DEFAULT_TAX_RATE);
        assert_eq!(config.table_turn_minutes, 60);
    }

    #[test]
    fn test_save_rejects_invalid_config() {
        let db = test_db_state();
        let mut config = RestaurantConfig::default();
        config.tax_rate = 1.5;
        assert!(matches!(save(&db, &config), Err(PosError::Validation(_))));

        let mut config = RestaurantConfig::default();
        config.closing_time = config.opening_time;
        assert!(save(&db, &config).is_err());
    }

    #[test]
    fn test_reset_restores_defaults() {
        let db = test_db_state();
        let mut config = RestaurantConfig::default();
        config.currency = "USD".into();
        save(&db, &config).unwrap();
        reset(&db).unwrap();
        assert_eq!(load(&db).unwrap().currency, "PEN");
    }

    #[test]
    fn test_opening_hours() {
        let config = RestaurantConfig::default();
        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        let night = NaiveTime::from_hms_opt(20, 0, 0).unwrap();
        assert!(config.is_open_at(noon));
        assert!(!config.is_open_at(night));
    }
}
