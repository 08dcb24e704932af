//! Order lifecycle: creation, kitchen flow, settlement and delivery tracking.
//!
//! Status moves new → preparing → ready → served, with cancel allowed from
//! new and preparing. Delivery orders also carry a sub-state that advances
//! one step at a time. Every transition is checked before anything is
//! written; a rejected transition leaves the stored order untouched.

use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::billing::{self, CartLine, Invoice, TipPolicy};
use crate::config;
use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};
use crate::inventory;
use crate::models::{
    DeliveryDetails, DeliveryStatus, KitchenStation, MenuItem, Order, OrderChannel, OrderItem,
    OrderStatus, PaymentMethod, Table, TableStatus,
};
use crate::store::{self, Record};

pub const DEFAULT_DELIVERY_MINUTES: u32 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDineInOrder {
    pub table_id: String,
    #[serde(default)]
    pub waiter_id: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub diners: Option<u32>,
    pub lines: Vec<CartLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDeliveryOrder {
    pub customer_name: String,
    pub phone: String,
    pub address: String,
    pub zone: String,
    pub payment_method: PaymentMethod,
    /// Cash tendered; required when paying cash.
    #[serde(default)]
    pub cash_amount: Option<f64>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    pub lines: Vec<CartLine>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    #[serde(default)]
    pub tip: TipPolicy,
    #[serde(default)]
    pub discount: f64,
    /// Keeps the method chosen at checkout when absent.
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn build_items(
    menu_items: &[MenuItem],
    lines: &[CartLine],
    channel: OrderChannel,
) -> PosResult<Vec<OrderItem>> {
    if lines.is_empty() {
        return Err(PosError::validation("An order needs at least one item"));
    }
    lines
        .iter()
        .map(|line| {
            if line.quantity == 0 {
                return Err(PosError::validation("Quantity must be at least 1"));
            }
            let item = crate::menu::orderable(menu_items, &line.menu_item_id)?;
            Ok(OrderItem {
                id: store::new_id("item"),
                unit_price: item.price_for(channel),
                menu_item_id: item.id,
                name: item.name,
                quantity: line.quantity,
                modifiers: line.modifiers.clone(),
                note: line.note.clone(),
                station: item.station,
                status: OrderStatus::New,
                started_at: None,
                ready_at: None,
            })
        })
        .collect()
}

fn apply_invoice(order: &mut Order, invoice: &Invoice) {
    order.subtotal = invoice.subtotal;
    order.delivery_fee = invoice.delivery_fee;
    order.tax = invoice.tax;
    order.tip = invoice.tip;
    order.discount = invoice.discount;
    order.total = invoice.total;
}

fn guard(order: &Order, next: OrderStatus) -> PosResult<()> {
    if !order.status.can_transition_to(next) {
        warn!(order_id = %order.id, from = %order.status, to = %next, "rejected order transition");
        return Err(PosError::transition(order.status, next));
    }
    Ok(())
}

/// Detach an order from its table and put the table into `status`.
fn release_table(conn: &Connection, order: &Order, status: TableStatus) -> PosResult<()> {
    let Some(table_id) = order.table_id.as_deref() else {
        return Ok(());
    };
    let mut tables = store::load::<Table>(conn)?;
    let Some(table) = tables.iter_mut().find(|t| t.id == table_id) else {
        warn!(order_id = %order.id, table_id, "order references a deleted table");
        return Ok(());
    };
    if table.current_order_id.as_deref() == Some(order.id.as_str()) {
        table.status = status;
        table.current_order_id = None;
        table.diners = None;
        table.waiter_id = None;
        let number = table.number;
        store::save(conn, &tables)?;
        info!(table = number, status = %status, "table released");
    }
    Ok(())
}

fn mutate_order<F>(db: &DbState, id: &str, f: F) -> PosResult<Order>
where
    F: FnOnce(&mut Order) -> PosResult<()>,
{
    let conn = db.conn.lock()?;
    store::update::<Order, _>(&conn, id, |order| {
        f(order)?;
        order.updated_at = Utc::now();
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

/// Price a cart against the current menu and config without saving it.
pub fn quote(
    db: &DbState,
    lines: &[CartLine],
    channel: OrderChannel,
    zone: Option<&str>,
) -> PosResult<billing::Quote> {
    let conn = db.conn.lock()?;
    let config = config::load_with(&conn);
    let menu_items = store::load::<MenuItem>(&conn)?;
    billing::quote_cart(&config, &menu_items, lines, channel, zone)
}

/// Open a dine-in order on a table and mark the table occupied.
pub fn create_dine_in_order(db: &DbState, input: NewDineInOrder) -> PosResult<Order> {
    let conn = db.conn.lock()?;
    let config = config::load_with(&conn);

    let order = db::with_transaction(&conn, |tx| {
        let mut tables = store::load::<Table>(tx)?;
        let table = tables
            .iter_mut()
            .find(|t| t.id == input.table_id)
            .ok_or_else(|| PosError::not_found(Table::KIND, &input.table_id))?;

        let seatable = match table.status {
            TableStatus::Free | TableStatus::Reserved | TableStatus::Waiting => true,
            TableStatus::Occupied => table.current_order_id.is_none(),
            TableStatus::Cleaning => false,
        };
        if !seatable {
            return Err(PosError::Conflict(format!(
                "table {} is {} and cannot take a new order",
                table.number, table.status
            )));
        }
        if let Some(diners) = input.diners {
            if diners == 0 {
                return Err(PosError::validation("Diners must be at least 1"));
            }
            if diners > table.capacity {
                warn!(table = table.number, diners, capacity = table.capacity, "party too large for table");
                return Err(PosError::validation(format!(
                    "Table {} seats {} at most",
                    table.number, table.capacity
                )));
            }
        }

        let menu_items = store::load::<MenuItem>(tx)?;
        let items = build_items(&menu_items, &input.lines, OrderChannel::DineIn)?;
        let now = Utc::now();
        let mut order = Order {
            id: store::new_id(Order::ID_PREFIX),
            channel: OrderChannel::DineIn,
            table_id: Some(table.id.clone()),
            customer_id: input.customer_id.clone(),
            waiter_id: input.waiter_id.clone(),
            items,
            subtotal: 0.0,
            delivery_fee: 0.0,
            tax: 0.0,
            tip: 0.0,
            discount: 0.0,
            total: 0.0,
            status: OrderStatus::New,
            payment_method: None,
            delivery: None,
            created_at: now,
            updated_at: now,
            settled_at: None,
        };
        let invoice = billing::invoice_for(
            &config,
            order.items_total(),
            OrderChannel::DineIn,
            None,
            TipPolicy::None,
            0.0,
        )?;
        apply_invoice(&mut order, &invoice);

        table.status = TableStatus::Occupied;
        table.current_order_id = Some(order.id.clone());
        table.diners = input.diners.or(table.diners);
        if input.waiter_id.is_some() {
            table.waiter_id = input.waiter_id.clone();
        }
        let table_number = table.number;
        store::save(tx, &tables)?;
        let order = store::insert(tx, order)?;
        info!(
            order_id = %order.id,
            table = table_number,
            items = order.items.len(),
            total = order.total,
            "dine-in order created"
        );
        Ok(order)
    })?;
    Ok(order)
}

/// Check out a delivery cart.
pub fn create_delivery_order(db: &DbState, input: NewDeliveryOrder) -> PosResult<Order> {
    for (label, value) in [
        ("Name", &input.customer_name),
        ("Phone", &input.phone),
        ("Address", &input.address),
        ("Zone", &input.zone),
    ] {
        if value.trim().is_empty() {
            warn!(field = label, "delivery checkout missing field");
            return Err(PosError::validation(format!("{label} is required")));
        }
    }

    let conn = db.conn.lock()?;
    let config = config::load_with(&conn);
    let menu_items = store::load::<MenuItem>(&conn)?;
    let items = build_items(&menu_items, &input.lines, OrderChannel::Delivery)?;

    let now = Utc::now();
    let zone = input.zone.trim().to_lowercase();
    let mut order = Order {
        id: store::new_id(Order::ID_PREFIX),
        channel: OrderChannel::Delivery,
        table_id: None,
        customer_id: input.customer_id,
        waiter_id: None,
        items,
        subtotal: 0.0,
        delivery_fee: 0.0,
        tax: 0.0,
        tip: 0.0,
        discount: 0.0,
        total: 0.0,
        status: OrderStatus::New,
        payment_method: Some(input.payment_method),
        delivery: None,
        created_at: now,
        updated_at: now,
        settled_at: None,
    };
    let invoice = billing::invoice_for(
        &config,
        order.items_total(),
        OrderChannel::Delivery,
        Some(&zone),
        TipPolicy::None,
        0.0,
    )?;
    apply_invoice(&mut order, &invoice);

    if input.payment_method == PaymentMethod::Cash {
        let tendered = input
            .cash_amount
            .ok_or_else(|| PosError::validation("Cash amount is required for cash payment"))?;
        billing::change_due(order.total, tendered)?;
    }

    order.delivery = Some(DeliveryDetails {
        customer_name: input.customer_name.trim().to_string(),
        phone: input.phone.trim().to_string(),
        address: input.address.trim().to_string(),
        zone,
        status: DeliveryStatus::Received,
        courier_id: None,
        estimated_minutes: DEFAULT_DELIVERY_MINUTES,
        cash_amount: input.cash_amount,
        notes: input.notes,
    });

    let order = store::insert(&conn, order)?;
    info!(
        order_id = %order.id,
        fee = order.delivery_fee,
        total = order.total,
        payment = order.payment_method.map(PaymentMethod::as_str).unwrap_or("none"),
        "delivery order created"
    );
    Ok(order)
}

/// Append lines to an order the kitchen has not accepted yet.
pub fn add_items(db: &DbState, order_id: &str, lines: &[CartLine]) -> PosResult<Order> {
    let conn = db.conn.lock()?;
    let config = config::load_with(&conn);
    let menu_items = store::load::<MenuItem>(&conn)?;
    let order = store::update::<Order, _>(&conn, order_id, |order| {
        if order.status != OrderStatus::New {
            return Err(PosError::Conflict(format!(
                "order is {} and can no longer take items",
                order.status
            )));
        }
        let new_items = build_items(&menu_items, lines, order.channel)?;
        order.items.extend(new_items);
        let zone = order.delivery.as_ref().map(|d| d.zone.clone());
        let invoice = billing::invoice_for(
            &config,
            order.items_total(),
            order.channel,
            zone.as_deref(),
            TipPolicy::None,
            0.0,
        )?;
        apply_invoice(order, &invoice);
        order.updated_at = Utc::now();
        Ok(())
    })?;
    info!(order_id = %order.id, items = order.items.len(), total = order.total, "items added to order");
    Ok(order)
}

// ---------------------------------------------------------------------------
// Kitchen flow
// ---------------------------------------------------------------------------

/// Kitchen accepts the order: new → preparing.
pub fn accept_order(db: &DbState, id: &str) -> PosResult<Order> {
    let order = mutate_order(db, id, |order| {
        guard(order, OrderStatus::Preparing)?;
        let now = Utc::now();
        order.status = OrderStatus::Preparing;
        for item in order
            .items
            .iter_mut()
            .filter(|i| i.status == OrderStatus::New)
        {
            item.status = OrderStatus::Preparing;
            item.started_at = Some(now);
        }
        if let Some(d) = order.delivery.as_mut() {
            if d.status == DeliveryStatus::Received {
                d.status = DeliveryStatus::Preparing;
            }
        }
        Ok(())
    })?;
    info!(order_id = %order.id, "order accepted by kitchen");
    Ok(order)
}

/// Kitchen marks the whole order ready: preparing → ready.
pub fn mark_ready(db: &DbState, id: &str) -> PosResult<Order> {
    let order = mutate_order(db, id, |order| {
        guard(order, OrderStatus::Ready)?;
        let now = Utc::now();
        order.status = OrderStatus::Ready;
        for item in order
            .items
            .iter_mut()
            .filter(|i| matches!(i.status, OrderStatus::New | OrderStatus::Preparing))
        {
            item.status = OrderStatus::Ready;
            item.ready_at = Some(now);
        }
        Ok(())
    })?;
    info!(order_id = %order.id, "order ready");
    Ok(order)
}

/// Mark one line ready. The order turns ready once every live line is.
pub fn mark_item_ready(db: &DbState, order_id: &str, item_id: &str) -> PosResult<Order> {
    let order = mutate_order(db, order_id, |order| {
        if order.status != OrderStatus::Preparing {
            return Err(PosError::transition(order.status, OrderStatus::Ready));
        }
        let item = order
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| PosError::not_found("Order item", item_id))?;
        if item.status != OrderStatus::Preparing {
            return Err(PosError::transition(item.status, OrderStatus::Ready));
        }
        item.status = OrderStatus::Ready;
        item.ready_at = Some(Utc::now());

        let all_ready = order
            .items
            .iter()
            .filter(|i| i.status != OrderStatus::Cancelled)
            .all(|i| i.status == OrderStatus::Ready);
        if all_ready {
            order.status = OrderStatus::Ready;
        }
        Ok(())
    })?;
    info!(order_id = %order.id, item_id, status = %order.status, "order item ready");
    Ok(order)
}

// ---------------------------------------------------------------------------
// Settlement and cancellation
// ---------------------------------------------------------------------------

/// Cashier settles a ready order: ready → served.
///
/// Recomputes the invoice with the tip and discount, releases a dine-in
/// table to cleaning and, when enabled in config, deducts recipe stock.
pub fn settle_order(db: &DbState, id: &str, settlement: Settlement) -> PosResult<Order> {
    let conn = db.conn.lock()?;
    let config = config::load_with(&conn);

    db::with_transaction(&conn, |tx| {
        let mut order = store::find::<Order>(tx, id)?;
        guard(&order, OrderStatus::Served)?;

        let invoice = billing::compute_invoice(
            order.items_total(),
            order.delivery_fee,
            config.tax_rate,
            settlement.tip,
            config.suggested_tip_rate,
            settlement.discount,
        )?;
        apply_invoice(&mut order, &invoice);

        let method = settlement.payment_method.or(order.payment_method);
        if method.is_none() {
            return Err(PosError::validation("Payment method is required"));
        }
        order.payment_method = method;
        if method == Some(PaymentMethod::Cash) {
            if let Some(tendered) = order.delivery.as_ref().and_then(|d| d.cash_amount) {
                billing::change_due(order.total, tendered)?;
            }
        }

        let now = Utc::now();
        order.status = OrderStatus::Served;
        for item in order
            .items
            .iter_mut()
            .filter(|i| i.status != OrderStatus::Cancelled)
        {
            item.status = OrderStatus::Served;
        }
        order.settled_at = Some(now);
        order.updated_at = now;

        let settled = order.clone();
        store::update::<Order, _>(tx, id, |stored| {
            *stored = order;
            Ok(())
        })?;
        release_table(tx, &settled, TableStatus::Cleaning)?;
        if config.auto_deduct_stock {
            inventory::deduct_with(tx, &settled)?;
        }
        info!(
            order_id = %settled.id,
            total = settled.total,
            tip = settled.tip,
            discount = settled.discount,
            payment = settled.payment_method.map(PaymentMethod::as_str).unwrap_or("none"),
            "order settled"
        );
        Ok(settled)
    })
}

/// Cancel from new or preparing. A dine-in table goes back to free.
pub fn cancel_order(db: &DbState, id: &str) -> PosResult<Order> {
    let conn = db.conn.lock()?;
    db::with_transaction(&conn, |tx| {
        let order = store::update::<Order, _>(tx, id, |order| {
            guard(order, OrderStatus::Cancelled)?;
            order.status = OrderStatus::Cancelled;
            for item in order.items.iter_mut() {
                item.status = OrderStatus::Cancelled;
            }
            order.updated_at = Utc::now();
            Ok(())
        })?;
        release_table(tx, &order, TableStatus::Free)?;
        info!(order_id = %order.id, "order cancelled");
        Ok(order)
    })
}

/// Remove an order. A table still held by it goes back to free.
pub fn delete_order(db: &DbState, id: &str) -> PosResult<Order> {
    let conn = db.conn.lock()?;
    db::with_transaction(&conn, |tx| {
        let order = store::find::<Order>(tx, id)?;
        release_table(tx, &order, TableStatus::Free)?;
        store::remove::<Order>(tx, id)
    })
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

fn delivery_mut(order: &mut Order) -> PosResult<&mut DeliveryDetails> {
    let id = order.id.clone();
    order
        .delivery
        .as_mut()
        .ok_or_else(|| PosError::validation(format!("order {id} is not a delivery order")))
}

/// Step the delivery sub-state forward, optionally only to `target`.
fn step_delivery(order: &mut Order, target: Option<DeliveryStatus>) -> PosResult<()> {
    let status = order.status;
    let delivery = delivery_mut(order)?;
    let current = delivery.status;
    let next = current
        .next()
        .ok_or_else(|| PosError::transition(current, target.unwrap_or(current)))?;
    if let Some(target) = target {
        if target != next {
            return Err(PosError::transition(current, target));
        }
    }
    if status == OrderStatus::Cancelled {
        return Err(PosError::transition(current, next));
    }
    if next == DeliveryStatus::EnRoute && !matches!(status, OrderStatus::Ready | OrderStatus::Served)
    {
        return Err(PosError::Conflict(
            "order must be ready before it leaves".to_string(),
        ));
    }
    delivery.status = next;
    Ok(())
}

fn log_delivery(order: &Order) {
    if let Some(d) = &order.delivery {
        info!(order_id = %order.id, delivery_status = %d.status, "delivery advanced");
    }
}

/// Move the delivery sub-state one step forward.
pub fn advance_delivery(db: &DbState, id: &str) -> PosResult<Order> {
    let order = mutate_order(db, id, |order| step_delivery(order, None))?;
    log_delivery(&order);
    Ok(order)
}

/// Set the delivery sub-state, allowed only as the next step.
pub fn set_delivery_status(db: &DbState, id: &str, status: DeliveryStatus) -> PosResult<Order> {
    let order = mutate_order(db, id, |order| step_delivery(order, Some(status)))?;
    log_delivery(&order);
    Ok(order)
}

pub fn assign_courier(db: &DbState, id: &str, courier_id: &str) -> PosResult<Order> {
    let order = mutate_order(db, id, |order| {
        delivery_mut(order)?.courier_id = Some(courier_id.to_string());
        Ok(())
    })?;
    info!(order_id = %order.id, courier_id, "courier assigned");
    Ok(order)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

pub fn list_orders(db: &DbState) -> PosResult<Vec<Order>> {
    let conn = db.conn.lock()?;
    store::load(&conn)
}

pub fn get_order(db: &DbState, id: &str) -> PosResult<Order> {
    let conn = db.conn.lock()?;
    store::find(&conn, id)
}

pub fn orders_by_status(db: &DbState, status: OrderStatus) -> PosResult<Vec<Order>> {
    Ok(list_orders(db)?
        .into_iter()
        .filter(|o| o.status == status)
        .collect())
}

pub fn orders_for_customer(db: &DbState, customer_id: &str) -> PosResult<Vec<Order>> {
    Ok(list_orders(db)?
        .into_iter()
        .filter(|o| o.customer_id.as_deref() == Some(customer_id))
        .collect())
}

/// KDS view: orders in `status`, oldest first, optionally limited to those
/// with at least one item at `station`.
pub fn kitchen_queue(
    db: &DbState,
    status: OrderStatus,
    station: Option<KitchenStation>,
) -> PosResult<Vec<Order>> {
    let mut queue: Vec<Order> = list_orders(db)?
        .into_iter()
        .filter(|o| o.status == status)
        .filter(|o| station.map_or(true, |s| o.has_station(s)))
        .collect();
    queue.sort_by_key(|o| o.created_at);
    Ok(queue)
}

/// Delivery orders grouped by sub-state, in lifecycle order.
pub fn delivery_board(db: &DbState) -> PosResult<Vec<(DeliveryStatus, Vec<Order>)>> {
    let orders = list_orders(db)?;
    Ok(DeliveryStatus::ALL
        .iter()
        .map(|status| {
            let group = orders
                .iter()
                .filter(|o| o.status != OrderStatus::Cancelled)
                .filter(|o| o.delivery.as_ref().is_some_and(|d| d.status == *status))
                .cloned()
                .collect();
            (*status, group)
        })
        .collect())
}

/// Delivery orders whose id contains `query`, ignoring case.
pub fn track_delivery(db: &DbState, query: &str) -> PosResult<Vec<Order>> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Ok(Vec::new());
    }
    Ok(list_orders(db)?
        .into_iter()
        .filter(|o| o.channel == OrderChannel::Delivery)
        .filter(|o| o.id.to_lowercase().contains(&needle))
        .collect())
}
