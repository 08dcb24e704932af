//! Customer records (CRM) and order-derived customer statistics.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::db::DbState;
use crate::error::{PosError, PosResult};
use crate::models::{Customer, Order, OrderStatus};
use crate::store::{self, Record};

/// Spend above which a customer counts as VIP.
pub const VIP_THRESHOLD: f64 = 500.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCustomer {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub preferences: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerPatch {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub document_id: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub allergies: Option<Vec<String>>,
    pub favorites: Option<Vec<String>>,
    pub preferences: Option<String>,
    pub rating: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerStats {
    pub orders: usize,
    pub total_spent: f64,
    pub average_ticket: f64,
    pub last_visit: Option<DateTime<Utc>>,
    pub vip: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmSummary {
    pub customers: usize,
    pub vip_customers: usize,
    pub average_ticket: f64,
    pub new_this_month: usize,
}

fn digits(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// CRUD
// ---------------------------------------------------------------------------

pub fn add_customer(db: &DbState, input: NewCustomer) -> PosResult<Customer> {
    if input.name.trim().is_empty() {
        return Err(PosError::validation("Name is required"));
    }
    let customer = Customer {
        id: store::new_id(Customer::ID_PREFIX),
        name: input.name.trim().to_string(),
        phone: non_blank(input.phone),
        document_id: non_blank(input.document_id),
        email: non_blank(input.email),
        address: non_blank(input.address),
        allergies: input.allergies,
        favorites: Vec::new(),
        preferences: non_blank(input.preferences),
        total_visits: 0,
        average_ticket: 0.0,
        rating: None,
        created_at: Utc::now(),
    };
    let conn = db.conn.lock()?;
    let customer = store::insert(&conn, customer)?;
    info!(id = %customer.id, "customer added");
    Ok(customer)
}

pub fn update_customer(db: &DbState, id: &str, patch: CustomerPatch) -> PosResult<Customer> {
    if let Some(name) = &patch.name {
        if name.trim().is_empty() {
            return Err(PosError::validation("Name is required"));
        }
    }
    if let Some(rating) = patch.rating {
        if !(0.0..=5.0).contains(&rating) {
            return Err(PosError::validation("Rating must be between 0 and 5"));
        }
    }
    let conn = db.conn.lock()?;
    store::update::<Customer, _>(&conn, id, |c| {
        if let Some(v) = patch.name {
            c.name = v.trim().to_string();
        }
        if patch.phone.is_some() {
            c.phone = non_blank(patch.phone);
        }
        if patch.document_id.is_some() {
            c.document_id = non_blank(patch.document_id);
        }
        if patch.email.is_some() {
            c.email = non_blank(patch.email);
        }
        if patch.address.is_some() {
            c.address = non_blank(patch.address);
        }
        if let Some(v) = patch.allergies {
            c.allergies = v;
        }
        if let Some(v) = patch.favorites {
            c.favorites = v;
        }
        if patch.preferences.is_some() {
            c.preferences = non_blank(patch.preferences);
        }
        if let Some(v) = patch.rating {
            c.rating = Some(v);
        }
        Ok(())
    })
}

pub fn delete_customer(db: &DbState, id: &str) -> PosResult<Customer> {
    let conn = db.conn.lock()?;
    store::remove::<Customer>(&conn, id)
}

pub fn list_customers(db: &DbState) -> PosResult<Vec<Customer>> {
    let conn = db.conn.lock()?;
    store::load(&conn)
}

pub fn get_customer(db: &DbState, id: &str) -> PosResult<Customer> {
    let conn = db.conn.lock()?;
    store::find(&conn, id)
}

/// Match on phone digits only, so `987 654 321` finds `987-654-321`.
pub fn find_by_phone(db: &DbState, phone: &str) -> PosResult<Option<Customer>> {
    let wanted = digits(phone);
    if wanted.is_empty() {
        return Ok(None);
    }
    Ok(list_customers(db)?
        .into_iter()
        .find(|c| c.phone.as_deref().map(digits).as_deref() == Some(wanted.as_str())))
}

/// Case-insensitive match on name, phone or email.
pub fn search_customers(db: &DbState, query: &str) -> PosResult<Vec<Customer>> {
    let q = query.trim().to_lowercase();
    let all = list_customers(db)?;
    if q.is_empty() {
        return Ok(all);
    }
    Ok(all
        .into_iter()
        .filter(|c| {
            c.name.to_lowercase().contains(&q)
                || c.phone.as_deref().is_some_and(|p| p.contains(&q))
                || c
                    .email
                    .as_deref()
                    .is_some_and(|e| e.to_lowercase().contains(&q))
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Order-derived statistics
// ---------------------------------------------------------------------------

fn customer_orders<'a>(orders: &'a [Order], customer_id: &'a str) -> impl Iterator<Item = &'a Order> {
    orders.iter().filter(move |o| {
        o.customer_id.as_deref() == Some(customer_id) && o.status != OrderStatus::Cancelled
    })
}

pub fn compute_stats(orders: &[Order], customer_id: &str) -> CustomerStats {
    let mine: Vec<&Order> = customer_orders(orders, customer_id).collect();
    let total_spent: f64 = mine.iter().map(|o| o.total).sum();
    let average_ticket = if mine.is_empty() {
        0.0
    } else {
        total_spent / mine.len() as f64
    };
    CustomerStats {
        orders: mine.len(),
        total_spent,
        average_ticket,
        last_visit: mine.iter().map(|o| o.created_at).max(),
        vip: total_spent > VIP_THRESHOLD,
    }
}

pub fn customer_stats(db: &DbState, customer_id: &str) -> PosResult<CustomerStats> {
    let conn = db.conn.lock()?;
    store::find::<Customer>(&conn, customer_id)?;
    let orders = store::load::<Order>(&conn)?;
    Ok(compute_stats(&orders, customer_id))
}

/// Write visit count and average ticket back onto the customer record.
pub fn refresh_customer_stats(db: &DbState, customer_id: &str) -> PosResult<Customer> {
    let conn = db.conn.lock()?;
    let orders = store::load::<Order>(&conn)?;
    let stats = compute_stats(&orders, customer_id);
    store::update::<Customer, _>(&conn, customer_id, |c| {
        c.total_visits = stats.orders as u32;
        c.average_ticket = stats.average_ticket;
        Ok(())
    })
}

/// Dish names with how many units the customer ordered, most first.
pub fn favorite_dishes(db: &DbState, customer_id: &str) -> PosResult<Vec<(String, u32)>> {
    let conn = db.conn.lock()?;
    let orders = store::load::<Order>(&conn)?;
    let mut counts: HashMap<String, u32> = HashMap::new();
    for order in customer_orders(&orders, customer_id) {
        for item in order
            .items
            .iter()
            .filter(|i| i.status != OrderStatus::Cancelled)
        {
            *counts.entry(item.name.clone()).or_insert(0) += item.quantity;
        }
    }
    let mut ranked: Vec<(String, u32)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(ranked)
}

pub fn crm_summary(db: &DbState, now: DateTime<Utc>) -> PosResult<CrmSummary> {
    let conn = db.conn.lock()?;
    let customers = store::load::<Customer>(&conn)?;
    let orders = store::load::<Order>(&conn)?;

    let live: Vec<&Order> = orders
        .iter()
        .filter(|o| o.status != OrderStatus::Cancelled)
        .collect();
    let average_ticket = if live.is_empty() {
        0.0
    } else {
        live.iter().map(|o| o.total).sum::<f64>() / live.len() as f64
    };

    Ok(CrmSummary {
        customers: customers.len(),
        vip_customers: customers
            .iter()
            .filter(|c| compute_stats(&orders, &c.id).vip)
            .count(),
        average_ticket,
        new_this_month: customers
            .iter()
            .filter(|c| c.created_at.year() == now.year() && c.created_at.month() == now.month())
            .count(),
    })
}
