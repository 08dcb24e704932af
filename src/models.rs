//! Record types and status enums shared across the stores.
//!
//! Records serialize with camelCase fields; enums with kebab-case values.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::store::Record;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Staff and customer roles. A user may hold several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserRole {
    Admin,
    Waiter,
    Kitchen,
    Cashier,
    Delivery,
    Customer,
    Inventory,
    Reservations,
    Menu,
    Crm,
}

impl UserRole {
    pub const ALL: [UserRole; 10] = [
        UserRole::Admin,
        UserRole::Waiter,
        UserRole::Kitchen,
        UserRole::Cashier,
        UserRole::Delivery,
        UserRole::Customer,
        UserRole::Inventory,
        UserRole::Reservations,
        UserRole::Menu,
        UserRole::Crm,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Waiter => "waiter",
            Self::Kitchen => "kitchen",
            Self::Cashier => "cashier",
            Self::Delivery => "delivery",
            Self::Customer => "customer",
            Self::Inventory => "inventory",
            Self::Reservations => "reservations",
            Self::Menu => "menu",
            Self::Crm => "crm",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TableStatus {
    Free,
    Occupied,
    Reserved,
    Cleaning,
    Waiting,
}

impl TableStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Occupied => "occupied",
            Self::Reserved => "reserved",
            Self::Cleaning => "cleaning",
            Self::Waiting => "waiting",
        }
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall order status and per-item status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderStatus {
    New,
    Preparing,
    Ready,
    Served,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::New,
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::Served,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::Served => "served",
            Self::Cancelled => "cancelled",
        }
    }

    /// new → preparing → ready → served, cancelled from new or preparing.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (Self::New, Self::Preparing)
                | (Self::Preparing, Self::Ready)
                | (Self::Ready, Self::Served)
                | (Self::New, Self::Cancelled)
                | (Self::Preparing, Self::Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Served | Self::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery sub-state carried next to the order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryStatus {
    Received,
    Preparing,
    EnRoute,
    Delivered,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 4] = [
        DeliveryStatus::Received,
        DeliveryStatus::Preparing,
        DeliveryStatus::EnRoute,
        DeliveryStatus::Delivered,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Preparing => "preparing",
            Self::EnRoute => "en-route",
            Self::Delivered => "delivered",
        }
    }

    pub fn next(self) -> Option<DeliveryStatus> {
        match self {
            Self::Received => Some(Self::Preparing),
            Self::Preparing => Some(Self::EnRoute),
            Self::EnRoute => Some(Self::Delivered),
            Self::Delivered => None,
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReservationStatus {
    Confirmed,
    Waiting,
    Expired,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Yape,
    Plin,
    Transfer,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Card => "card",
            Self::Yape => "yape",
            Self::Plin => "plin",
            Self::Transfer => "transfer",
        }
    }
}

/// Kitchen zone an order item is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KitchenStation {
    Cold,
    Griddle,
    Fryer,
    Grill,
    Desserts,
    Bar,
}

impl KitchenStation {
    pub const ALL: [KitchenStation; 6] = [
        KitchenStation::Cold,
        KitchenStation::Griddle,
        KitchenStation::Fryer,
        KitchenStation::Grill,
        KitchenStation::Desserts,
        KitchenStation::Bar,
    ];
}

/// Sales channel. Picks which menu price applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderChannel {
    DineIn,
    Delivery,
}

impl OrderChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DineIn => "dine-in",
            Self::Delivery => "delivery",
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub role: UserRole,
    pub roles: Vec<UserRole>,
    /// bcrypt hash; the plain PIN is never stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_hash: Option<String>,
    pub active: bool,
    #[serde(default)]
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn has_role(&self, role: UserRole) -> bool {
        self.role == role || self.roles.contains(&role)
    }
}

impl Record for User {
    const COLLECTION: &'static str = "users";
    const ID_PREFIX: &'static str = "usr";
    const KIND: &'static str = "User";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: String,
    pub number: u32,
    pub status: TableStatus,
    pub capacity: u32,
    #[serde(default)]
    pub diners: Option<u32>,
    #[serde(default)]
    pub waiter_id: Option<String>,
    #[serde(default)]
    pub current_order_id: Option<String>,
    #[serde(default)]
    pub reservation_id: Option<String>,
}

impl Record for Table {
    const COLLECTION: &'static str = "tables";
    const ID_PREFIX: &'static str = "tbl";
    const KIND: &'static str = "Table";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitlistEntry {
    pub id: String,
    pub customer_name: String,
    pub phone: String,
    pub party_size: u32,
    pub estimated_minutes: u32,
    pub notified: bool,
    pub created_at: DateTime<Utc>,
}

impl Record for WaitlistEntry {
    const COLLECTION: &'static str = "waitlist";
    const ID_PREFIX: &'static str = "wait";
    const KIND: &'static str = "Waitlist entry";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: String,
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
    pub available: bool,
    pub station: KitchenStation,
}

impl MenuItem {
    pub fn price_for(&self, channel: OrderChannel) -> f64 {
        match channel {
            OrderChannel::DineIn => self.dine_in_price,
            OrderChannel::Delivery => self.delivery_price,
        }
    }
}

impl Record for MenuItem {
    const COLLECTION: &'static str = "menu";
    const ID_PREFIX: &'static str = "menu";
    const KIND: &'static str = "Menu item";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: String,
    pub menu_item_id: String,
    /// Name snapshot at order time.
    pub name: String,
    /// Channel price snapshot at order time.
    pub unit_price: f64,
    pub quantity: u32,
    #[serde(default)]
    pub modifiers: Vec<String>,
    #[serde(default)]
    pub note: String,
    pub station: KitchenStation,
    pub status: OrderStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ready_at: Option<DateTime<Utc>>,
}

impl OrderItem {
    pub fn line_total(&self) -> f64 {
        crate::billing::line_total(self.unit_price, self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryDetails {
    pub customer_name: String,
    pub phone: String,
    pub address: String,
    pub zone: String,
    pub status: DeliveryStatus,
    #[serde(default)]
    pub courier_id: Option<String>,
    pub estimated_minutes: u32,
    #[serde(default)]
    pub cash_amount: Option<f64>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub channel: OrderChannel,
    #[serde(default)]
    pub table_id: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub waiter_id: Option<String>,
    pub items: Vec<OrderItem>,
    /// Items total plus the delivery fee (fee is 0 for dine-in).
    pub subtotal: f64,
    pub delivery_fee: f64,
    pub tax: f64,
    pub tip: f64,
    pub discount: f64,
    pub total: f64,
    pub status: OrderStatus,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub delivery: Option<DeliveryDetails>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub settled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn items_total(&self) -> f64 {
        self.items
            .iter()
            .filter(|i| i.status != OrderStatus::Cancelled)
            .map(OrderItem::line_total)
            .sum()
    }

    pub fn has_station(&self, station: KitchenStation) -> bool {
        self.items.iter().any(|i| i.station == station)
    }
}

impl Record for Order {
    const COLLECTION: &'static str = "orders";
    const ID_PREFIX: &'static str = "ord";
    const KIND: &'static str = "Order";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: String,
    pub customer_name: String,
    pub phone: String,
    pub date: DateTime<Utc>,
    pub party_size: u32,
    #[serde(default)]
    pub preferences: Option<String>,
    #[serde(default)]
    pub assigned_table: Option<u32>,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
}

impl Record for Reservation {
    const COLLECTION: &'static str = "reservations";
    const ID_PREFIX: &'static str = "res";
    const KIND: &'static str = "Reservation";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
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
    pub favorites: Vec<String>,
    #[serde(default)]
    pub preferences: Option<String>,
    pub total_visits: u32,
    pub average_ticket: f64,
    #[serde(default)]
    pub rating: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Record for Customer {
    const COLLECTION: &'static str = "customers";
    const ID_PREFIX: &'static str = "cus";
    const KIND: &'static str = "Customer";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ingredient {
    pub id: String,
    pub name: String,
    pub stock: f64,
    pub unit: String,
    pub minimum: f64,
    pub unit_cost: f64,
    #[serde(default)]
    pub lot: Option<String>,
    #[serde(default)]
    pub expires_on: Option<NaiveDate>,
}

impl Record for Ingredient {
    const COLLECTION: &'static str = "ingredients";
    const ID_PREFIX: &'static str = "ing";
    const KIND: &'static str = "Ingredient";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeLine {
    pub ingredient_id: String,
    pub quantity: f64,
    pub unit: String,
}

/// Bill of materials for one menu item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub id: String,
    pub menu_item_id: String,
    pub lines: Vec<RecipeLine>,
    /// Portions produced by one batch of `lines`.
    pub yield_portions: f64,
    /// Fraction lost in preparation, `0.0..1.0`.
    pub waste: f64,
}

impl Record for Recipe {
    const COLLECTION: &'static str = "recipes";
    const ID_PREFIX: &'static str = "rec";
    const KIND: &'static str = "Recipe";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: String,
    pub role: UserRole,
    pub satisfaction: u8,
    pub recommendation: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

impl Record for Feedback {
    const COLLECTION: &'static str = "feedback";
    const ID_PREFIX: &'static str = "fb";
    const KIND: &'static str = "Feedback";

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_status_transitions() {
        use OrderStatus::*;
        assert!(New.can_transition_to(Preparing));
        assert!(Preparing.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Served));
        assert!(New.can_transition_to(Cancelled));
        assert!(Preparing.can_transition_to(Cancelled));

        assert!(!New.can_transition_to(Ready));
        assert!(!New.can_transition_to(Served));
        assert!(!Ready.can_transition_to(Cancelled));
        assert!(!Served.can_transition_to(New));
        assert!(!Cancelled.can_transition_to(Preparing));
    }

    #[test]
    fn delivery_status_advances_one_step() {
        assert_eq!(
            DeliveryStatus::Received.next(),
            Some(DeliveryStatus::Preparing)
        );
        assert_eq!(
            DeliveryStatus::EnRoute.next(),
            Some(DeliveryStatus::Delivered)
        );
        assert_eq!(DeliveryStatus::Delivered.next(), None);
    }

    #[test]
    fn enums_serialize_kebab_case() {
        assert_eq!(
            serde_json::to_value(DeliveryStatus::EnRoute).unwrap(),
            "en-route"
        );
        assert_eq!(
            serde_json::to_value(OrderChannel::DineIn).unwrap(),
            "dine-in"
        );
        let role: UserRole = serde_json::from_str("\"cashier\"").unwrap();
        assert_eq!(role, UserRole::Cashier);
    }

    #[test]
    fn menu_item_price_follows_channel() {
        let item = MenuItem {
            id: "menu-1".into(),
            name: "Ceviche".into(),
            category: "Ceviches".into(),
            dine_in_price: 35.0,
            delivery_price: 38.0,
            description: String::new(),
            photo: None,
            tags: vec![],
            available: true,
            station: KitchenStation::Cold,
        };
        assert_eq!(item.price_for(OrderChannel::DineIn), 35.0);
        assert_eq!(item.price_for(OrderChannel::Delivery), 38.0);
    }
}
