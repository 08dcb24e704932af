//! Restaurant POS back end.
//!
//! Menu catalog, tables and waitlist, order lifecycle with a kitchen display
//! queue, billing, delivery tracking, reservations, CRM, staff auth and
//! feedback over one local SQLite file. Each record kind is stored as a JSON
//! collection; every public operation takes the shared [`DbState`] and locks
//! it once.
//!
//! ```no_run
//! use restaurant_pos::{open, diagnostics, seed};
//!
//! let data_dir = std::path::Path::new("./data");
//! let _guard = diagnostics::init_tracing(&data_dir.join("logs"))?;
//! let db = open(data_dir)?;
//! seed::seed_if_empty(&db)?;
//! # Ok::<(), restaurant_pos::PosError>(())
//! ```

use std::path::Path;

pub mod auth;
pub mod billing;
pub mod config;
pub mod customers;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod feedback;
pub mod inventory;
pub mod menu;
pub mod models;
pub mod orders;
pub mod reports;
pub mod reservations;
pub mod seed;
pub mod store;
pub mod tables;
pub mod users;

pub use auth::{AuthState, Permission, Session};
pub use config::RestaurantConfig;
pub use db::DbState;
pub use diagnostics::{build_info, init_tracing, BuildInfo};
pub use error::{PosError, PosResult};

/// Open (or create) the store under `data_dir`.
pub fn open(data_dir: &Path) -> PosResult<DbState> {
    db::init(data_dir)
}
