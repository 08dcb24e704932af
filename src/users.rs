//! Staff and customer accounts.
//!
//! A user has a primary role plus any number of extra roles. PINs are
//! stored only as bcrypt hashes on the record.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::DbState;
use crate::error::{PosError, PosResult};
use crate::models::{User, UserRole};
use crate::store::{self, Record};

#[cfg(not(test))]
pub(crate) const PIN_HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
pub(crate) const PIN_HASH_COST: u32 = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub name: String,
    pub role: UserRole,
    /// Defaults to `[role]` when empty.
    #[serde(default)]
    pub roles: Vec<UserRole>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub pin: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    pub name: Option<String>,
    pub role: Option<UserRole>,
    pub roles: Option<Vec<UserRole>>,
    pub email: Option<String>,
    pub active: Option<bool>,
}

/// PINs are digits only, at least 4 long.
pub fn validate_pin(pin: &str) -> PosResult<()> {
    if pin.len() < 4 {
        return Err(PosError::validation("PIN must be at least 4 digits"));
    }
    if !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(PosError::validation("PIN must contain only digits"));
    }
    Ok(())
}

fn hash_pin(pin: &str) -> PosResult<String> {
    validate_pin(pin)?;
    Ok(bcrypt::hash(pin, PIN_HASH_COST)?)
}

/// Primary role first, no duplicates.
fn normalize_roles(primary: UserRole, roles: Vec<UserRole>) -> Vec<UserRole> {
    let mut out = vec![primary];
    for role in roles {
        if !out.contains(&role) {
            out.push(role);
        }
    }
    out
}

pub fn add_user(db: &DbState, input: NewUser) -> PosResult<User> {
    if input.name.trim().is_empty() {
        return Err(PosError::validation("Name is required"));
    }
    let pin_hash = input.pin.as_deref().map(hash_pin).transpose()?;
    let user = User {
        id: store::new_id(User::ID_PREFIX),
        name: input.name.trim().to_string(),
        role: input.role,
        roles: normalize_roles(input.role, input.roles),
        pin_hash,
        active: true,
        email: input.email,
        created_at: Utc::now(),
    };
    let conn = db.conn.lock()?;
    let user = store::insert(&conn, user)?;
    info!(id = %user.id, role = %user.role, "user added");
    Ok(user)
}

pub fn update_user(db: &DbState, id: &str, patch: UserPatch) -> PosResult<User> {
    if let Some(name) = &patch.name {
        if name.trim().is_empty() {
            return Err(PosError::validation("Name is required"));
        }
    }
    let conn = db.conn.lock()?;
    let user = store::update::<User, _>(&conn, id, |u| {
        if let Some(v) = patch.name {
            u.name = v.trim().to_string();
        }
        if let Some(v) = patch.role {
            u.role = v;
        }
        let extra = patch.roles.unwrap_or_else(|| u.roles.clone());
        u.roles = normalize_roles(u.role, extra);
        if let Some(v) = patch.email {
            u.email = Some(v);
        }
        if let Some(v) = patch.active {
            u.active = v;
        }
        Ok(())
    })?;
    info!(id = %user.id, "user updated");
    Ok(user)
}

pub fn set_pin(db: &DbState, id: &str, pin: &str) -> PosResult<User> {
    let hash = hash_pin(pin)?;
    let conn = db.conn.lock()?;
    let user = store::update::<User, _>(&conn, id, |u| {
        u.pin_hash = Some(hash);
        Ok(())
    })?;
    info!(id = %user.id, "user PIN set");
    Ok(user)
}

pub fn delete_user(db: &DbState, id: &str) -> PosResult<User> {
    let conn = db.conn.lock()?;
    store::remove::<User>(&conn, id)
}

pub fn list_users(db: &DbState) -> PosResult<Vec<User>> {
    let conn = db.conn.lock()?;
    store::load(&conn)
}

pub fn get_user(db: &DbState, id: &str) -> PosResult<User> {
    let conn = db.conn.lock()?;
    store::find(&conn, id)
}

/// Users holding `role`, primary or extra.
pub fn users_with_role(db: &DbState, role: UserRole) -> PosResult<Vec<User>> {
    Ok(list_users(db)?
        .into_iter()
        .filter(|u| u.has_role(role))
        .collect())
}

#[cfg(test)]
pub(crate) fn staff(name: &str, role: UserRole, pin: Option<&str>) -> NewUser {
    NewUser {
        name: name.to_string(),
        role,
        roles: vec![],
        email: None,
        pin: pin.map(str::to_string),
    }
}
