//! PIN login, the current staff session, and role permissions.
//!
//! PIN hashes live on user records. Failed attempts are counted per
//! terminal and persisted in `local_settings` (category "staff") so a
//! restart does not clear a lockout. The session itself is in memory; each
//! login and logout is also written to the `staff_sessions` audit table.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};
use crate::models::{User, UserRole};
use crate::store;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const MAX_FAILED_ATTEMPTS: u32 = 5;
pub const LOCKOUT_MINUTES: i64 = 15;
pub const SESSION_INACTIVITY_MINUTES: i64 = 30;
pub const SESSION_MAX_DURATION_HOURS: i64 = 12;
const LOCKOUT_ATTEMPTS_KEY: &str = "lockout_attempts";
const LOCKOUT_LAST_ATTEMPT_KEY: &str = "lockout_last_attempt";

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewOrders,
    CreateOrder,
    UpdateOrderStatus,
    SettleOrder,
    CancelOrder,
    ManageDelivery,
    ManageTables,
    ManageMenu,
    ManageInventory,
    ManageReservations,
    ManageCustomers,
    ManageStaff,
    ViewReports,
    SystemSettings,
    PlaceOnlineOrder,
    SubmitFeedback,
}

/// Permissions granted by one role. Admin is handled separately.
pub fn role_permissions(role: UserRole) -> &'static [Permission] {
    use Permission::*;
    match role {
        UserRole::Admin => &[
            ViewOrders,
            CreateOrder,
            UpdateOrderStatus,
            SettleOrder,
            CancelOrder,
            ManageDelivery,
            ManageTables,
            ManageMenu,
            ManageInventory,
            ManageReservations,
            ManageCustomers,
            ManageStaff,
            ViewReports,
            SystemSettings,
            PlaceOnlineOrder,
            SubmitFeedback,
        ],
        UserRole::Waiter => &[ViewOrders, CreateOrder, ManageTables, SubmitFeedback],
        UserRole::Kitchen => &[ViewOrders, UpdateOrderStatus, SubmitFeedback],
        UserRole::Cashier => &[ViewOrders, SettleOrder, CancelOrder, SubmitFeedback],
        UserRole::Delivery => &[ViewOrders, ManageDelivery, SubmitFeedback],
        UserRole::Customer => &[PlaceOnlineOrder, SubmitFeedback],
        UserRole::Inventory => &[ManageInventory, SubmitFeedback],
        UserRole::Reservations => &[ManageReservations, ManageTables, SubmitFeedback],
        UserRole::Menu => &[ManageMenu, SubmitFeedback],
        UserRole::Crm => &[ManageCustomers, ViewReports, SubmitFeedback],
    }
}

pub fn role_allows(role: UserRole, permission: Permission) -> bool {
    role == UserRole::Admin || role_permissions(role).contains(&permission)
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The signed-in user on this terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub user_name: String,
    pub roles: Vec<UserRole>,
    pub active_role: UserRole,
    pub login_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Expired on inactivity or past the maximum duration.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
            || now - self.last_activity > Duration::minutes(SESSION_INACTIVITY_MINUTES)
    }
}

struct LockoutEntry {
    attempts: u32,
    last_attempt: DateTime<Utc>,
}

impl LockoutEntry {
    fn check(&self, now: DateTime<Utc>) -> PosResult<()> {
        if self.attempts >= MAX_FAILED_ATTEMPTS {
            let elapsed = now - self.last_attempt;
            if elapsed < Duration::minutes(LOCKOUT_MINUTES) {
                let minutes = LOCKOUT_MINUTES - elapsed.num_minutes();
                warn!(attempts = self.attempts, minutes, "login blocked by lockout");
                return Err(PosError::LockedOut { minutes });
            }
        }
        Ok(())
    }
}

/// Authentication state for one terminal.
pub struct AuthState {
    session: Mutex<Option<Session>>,
    lockout: Mutex<LockoutEntry>,
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthState {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
            lockout: Mutex::new(LockoutEntry {
                attempts: 0,
                last_attempt: Utc::now(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_lockout_from_db(conn: &Connection) -> LockoutEntry {
    let attempts = db::get_setting(conn, "staff", LOCKOUT_ATTEMPTS_KEY)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);
    let last_attempt = db::get_setting(conn, "staff", LOCKOUT_LAST_ATTEMPT_KEY)
        .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    LockoutEntry {
        attempts,
        last_attempt,
    }
}

fn persist_lockout_to_db(conn: &Connection, lockout: &LockoutEntry) -> PosResult<()> {
    db::set_setting(
        conn,
        "staff",
        LOCKOUT_ATTEMPTS_KEY,
        &lockout.attempts.to_string(),
    )?;
    db::set_setting(
        conn,
        "staff",
        LOCKOUT_LAST_ATTEMPT_KEY,
        &lockout.last_attempt.to_rfc3339(),
    )
}

fn pin_matches(user: &User, pin: &str) -> bool {
    user.pin_hash
        .as_deref()
        .is_some_and(|hash| bcrypt::verify(pin, hash).unwrap_or(false))
}

fn record_session_start(conn: &Connection, session: &Session) -> PosResult<()> {
    conn.execute(
        "INSERT INTO staff_sessions (id, user_id, role, login_time, is_active)
         VALUES (?1, ?2, ?3, ?4, 1)",
        params![
            session.session_id,
            session.user_id,
            session.active_role.as_str(),
            session.login_time.to_rfc3339()
        ],
    )?;
    Ok(())
}

fn record_session_end(conn: &Connection, session_id: &str) -> PosResult<()> {
    conn.execute(
        "UPDATE staff_sessions SET logout_time = ?1, is_active = 0 WHERE id = ?2",
        params![Utc::now().to_rfc3339(), session_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Login / logout
// ---------------------------------------------------------------------------

/// Verify `pin` against every active user and open a session.
pub fn login(db: &DbState, auth: &AuthState, pin: &str) -> PosResult<Session> {
    let pin = pin.trim();
    if pin.is_empty() {
        return Err(PosError::validation("PIN is required"));
    }

    let conn = db.conn.lock()?;
    let mut lockout = auth.lockout.lock()?;
    *lockout = load_lockout_from_db(&conn);
    let now = Utc::now();
    lockout.check(now)?;

    let users = store::load::<User>(&conn)?;
    let Some(user) = users.iter().find(|u| u.active && pin_matches(u, pin)) else {
        lockout.attempts += 1;
        lockout.last_attempt = now;
        persist_lockout_to_db(&conn, &lockout)?;
        warn!(attempts = lockout.attempts, "failed login attempt");
        return Err(PosError::Unauthorized("Invalid PIN".to_string()));
    };

    lockout.attempts = 0;
    lockout.last_attempt = now;
    persist_lockout_to_db(&conn, &lockout)?;

    let session = Session {
        session_id: Uuid::new_v4().to_string(),
        user_id: user.id.clone(),
        user_name: user.name.clone(),
        roles: user.roles.clone(),
        active_role: user.role,
        login_time: now,
        last_activity: now,
        expires_at: now + Duration::hours(SESSION_MAX_DURATION_HOURS),
    };
    record_session_start(&conn, &session)?;

    let mut current = auth.session.lock()?;
    if let Some(previous) = current.replace(session.clone()) {
        record_session_end(&conn, &previous.session_id)?;
    }
    info!(user_id = %session.user_id, role = %session.active_role, "login successful");
    Ok(session)
}

/// End the current session, if any.
pub fn logout(db: &DbState, auth: &AuthState) -> PosResult<()> {
    let taken = auth.session.lock()?.take();
    if let Some(session) = taken {
        let conn = db.conn.lock()?;
        record_session_end(&conn, &session.session_id)?;
        info!(session_id = %session.session_id, "session logged out");
    }
    Ok(())
}

/// The live session. An expired one is dropped and `None` returned.
pub fn current_session(auth: &AuthState) -> PosResult<Option<Session>> {
    let mut current = auth.session.lock()?;
    if current
        .as_ref()
        .is_some_and(|s| s.is_expired_at(Utc::now()))
    {
        if let Some(expired) = current.take() {
            info!(session_id = %expired.session_id, "session expired");
        }
    }
    Ok(current.clone())
}

fn require_session(auth: &AuthState) -> PosResult<Session> {
    current_session(auth)?.ok_or_else(|| PosError::Unauthorized("Not logged in".to_string()))
}

/// Refresh the inactivity timer.
pub fn track_activity(auth: &AuthState) -> PosResult<()> {
    let mut current = auth.session.lock()?;
    if let Some(session) = current.as_mut() {
        session.last_activity = Utc::now();
    }
    Ok(())
}

/// Switch the active role. It must be one the user holds.
pub fn select_role(auth: &AuthState, role: UserRole) -> PosResult<Session> {
    require_session(auth)?;
    let mut current = auth.session.lock()?;
    let session = current
        .as_mut()
        .ok_or_else(|| PosError::Unauthorized("Not logged in".to_string()))?;
    if !session.roles.contains(&role) {
        warn!(user_id = %session.user_id, role = %role, "role not assigned to user");
        return Err(PosError::Unauthorized(format!(
            "role {role} is not assigned to this user"
        )));
    }
    session.active_role = role;
    session.last_activity = Utc::now();
    info!(user_id = %session.user_id, role = %role, "active role selected");
    Ok(session.clone())
}

pub fn has_permission(auth: &AuthState, permission: Permission) -> PosResult<bool> {
    Ok(current_session(auth)?.is_some_and(|s| role_allows(s.active_role, permission)))
}

/// Fail with `Unauthorized` unless the active role grants `permission`.
pub fn require_permission(auth: &AuthState, permission: Permission) -> PosResult<Session> {
    let session = require_session(auth)?;
    if !role_allows(session.active_role, permission) {
        return Err(PosError::Unauthorized(format!(
            "{} cannot {permission:?}",
            session.active_role
        )));
    }
    Ok(session)
}

/// Remaining lockout minutes, 0 when login is allowed.
pub fn lockout_minutes_remaining(db: &DbState) -> PosResult<i64> {
    let conn = db.conn.lock()?;
    match load_lockout_from_db(&conn).check(Utc::now()) {
        Ok(()) => Ok(0),
        Err(PosError::LockedOut { minutes }) => Ok(minutes),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db_state;
    use crate::users::{self, staff};

    fn lockout_attempts(db_state: &DbState) -> u32 {
        let conn = db_state.conn.lock().expect("db lock");
        db::get_setting(&conn, "staff", LOCKOUT_ATTEMPTS_KEY)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0)
    }

    fn open_sessions(db_state: &DbState) -> i64 {
        let conn = db_state.conn.lock().expect("db lock");
        conn.query_row(
            "SELECT COUNT(*) FROM staff_sessions WHERE is_active = 1",
            [],
            |row| row.get(0),
        )
        .expect("count sessions")
    }

    #[test]
    fn lockout_persists_across_auth_state_restart() {
        let db_state = test_db_state();
        users::add_user(&db_state, staff("Ana", UserRole::Waiter, Some("1234"))).unwrap();
        let auth_before_restart = AuthState::new();

        for _ in 0..MAX_FAILED_ATTEMPTS {
            let err = login(&db_state, &auth_before_restart, "9999")
                .expect_err("invalid login should fail");
            assert!(matches!(err, PosError::Unauthorized(_)));
        }
        assert_eq!(lockout_attempts(&db_state), MAX_FAILED_ATTEMPTS);

        let auth_after_restart = AuthState::new();
        let err = login(&db_state, &auth_after_restart, "1234")
            .expect_err("lockout should remain active after restart");
        assert!(matches!(err, PosError::LockedOut { .. }));
        assert!(err.to_string().contains("Too many failed attempts"));
        assert_eq!(
            lockout_attempts(&db_state),
            MAX_FAILED_ATTEMPTS,
            "blocked attempt should not increment counter"
        );
        assert!(lockout_minutes_remaining(&db_state).unwrap() > 0);
    }

    #[test]
    fn successful_login_resets_lockout() {
        let db_state = test_db_state();
        users::add_user(&db_state, staff("Ana", UserRole::Waiter, Some("1234"))).unwrap();
        let auth = AuthState::new();
        for _ in 0..2 {
            assert!(login(&db_state, &auth, "0000").is_err());
        }
        assert_eq!(lockout_attempts(&db_state), 2);

        let session = login(&db_state, &auth, "1234").expect("valid login");
        assert_eq!(session.user_name, "Ana");
        assert_eq!(session.active_role, UserRole::Waiter);
        assert_eq!(lockout_attempts(&db_state), 0);
        assert_eq!(lockout_minutes_remaining(&db_state).unwrap(), 0);
    }

    #[test]
    fn inactive_user_cannot_log_in() {
        let db_state = test_db_state();
        let u = users::add_user(&db_state, staff("Ana", UserRole::Waiter, Some("1234"))).unwrap();
        users::update_user(
            &db_state,
            &u.id,
            users::UserPatch {
                active: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(login(&db_state, &AuthState::new(), "1234").is_err());
    }

    #[test]
    fn role_selection_limited_to_assigned_roles() {
        let db_state = test_db_state();
        let mut input = staff("Lucía", UserRole::Cashier, Some("5555"));
        input.roles = vec![UserRole::Waiter];
        users::add_user(&db_state, input).unwrap();
        let auth = AuthState::new();
        login(&db_state, &auth, "5555").unwrap();

        assert!(has_permission(&auth, Permission::SettleOrder).unwrap());
        assert!(!has_permission(&auth, Permission::ManageTables).unwrap());

        let session = select_role(&auth, UserRole::Waiter).unwrap();
        assert_eq!(session.active_role, UserRole::Waiter);
        assert!(has_permission(&auth, Permission::ManageTables).unwrap());
        assert!(require_permission(&auth, Permission::SettleOrder).is_err());

        assert!(matches!(
            select_role(&auth, UserRole::Admin),
            Err(PosError::Unauthorized(_))
        ));
    }

    #[test]
    fn admin_has_every_permission() {
        for role in UserRole::ALL {
            assert!(role_allows(UserRole::Admin, Permission::ManageStaff));
            assert_eq!(
                role_allows(role, Permission::SystemSettings),
                role == UserRole::Admin
            );
        }
    }

    #[test]
    fn logout_closes_audit_row() {
        let db_state = test_db_state();
        users::add_user(&db_state, staff("Ana", UserRole::Kitchen, Some("1234"))).unwrap();
        let auth = AuthState::new();
        login(&db_state, &auth, "1234").unwrap();
        assert_eq!(open_sessions(&db_state), 1);
        assert!(current_session(&auth).unwrap().is_some());

        logout(&db_state, &auth).unwrap();
        assert_eq!(open_sessions(&db_state), 0);
        assert!(current_session(&auth).unwrap().is_none());
        assert!(!has_permission(&auth, Permission::ViewOrders).unwrap());
    }

    #[test]
    fn session_expiry_rules() {
        let now = Utc::now();
        let session = Session {
            session_id: "s".into(),
            user_id: "u".into(),
            user_name: "Ana".into(),
            roles: vec![UserRole::Waiter],
            active_role: UserRole::Waiter,
            login_time: now,
            last_activity: now,
            expires_at: now + Duration::hours(SESSION_MAX_DURATION_HOURS),
        };
        assert!(!session.is_expired_at(now + Duration::minutes(29)));
        assert!(session.is_expired_at(now + Duration::minutes(31)));
        let active = Session {
            last_activity: now + Duration::hours(12),
            ..session
        };
        assert!(active.is_expired_at(now + Duration::hours(12)));
    }
}
