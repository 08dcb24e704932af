//! Sales reporting over served orders.
//!
//! Only served orders count as sales. A period filters on `settledAt`
//! (falling back to `createdAt` for orders settled before that field was
//! recorded), start inclusive, end exclusive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::billing::round_money;
use crate::db::DbState;
use crate::error::{PosError, PosResult};
use crate::models::{MenuItem, Order, OrderStatus};
use crate::store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Period {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> PosResult<Self> {
        if end <= start {
            return Err(PosError::validation("Period end must be after its start"));
        }
        Ok(Self { start, end })
    }

    fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesSummary {
    pub orders: usize,
    pub gross: f64,
    pub tax: f64,
    pub tips: f64,
    pub discounts: f64,
    pub delivery_fees: f64,
    pub average_ticket: f64,
    /// Totals keyed by `dine-in` / `delivery`.
    pub by_channel: BTreeMap<String, f64>,
    /// Totals keyed by payment method.
    pub by_payment_method: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySales {
    pub category: String,
    pub quantity: u32,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DishSales {
    pub menu_item_id: String,
    pub name: String,
    pub quantity: u32,
    pub revenue: f64,
}

fn served_in<'a>(orders: &'a [Order], period: Option<Period>) -> Vec<&'a Order> {
    orders
        .iter()
        .filter(|o| o.status == OrderStatus::Served)
        .filter(|o| period.map_or(true, |p| p.contains(o.settled_at.unwrap_or(o.created_at))))
        .collect()
}

pub fn summarize(orders: &[Order], period: Option<Period>) -> SalesSummary {
    let served = served_in(orders, period);
    let mut by_channel: BTreeMap<String, f64> = BTreeMap::new();
    let mut by_payment_method: BTreeMap<String, f64> = BTreeMap::new();
    let (mut gross, mut tax, mut tips, mut discounts, mut fees) = (0.0, 0.0, 0.0, 0.0, 0.0);

    for o in &served {
        gross += o.total;
        tax += o.tax;
        tips += o.tip;
        discounts += o.discount;
        fees += o.delivery_fee;
        *by_channel.entry(o.channel.as_str().to_string()).or_insert(0.0) += o.total;
        let method = o.payment_method.map_or("unknown", |m| m.as_str());
        *by_payment_method.entry(method.to_string()).or_insert(0.0) += o.total;
    }

    for v in by_channel.values_mut().chain(by_payment_method.values_mut()) {
        *v = round_money(*v);
    }

    let average_ticket = if served.is_empty() {
        0.0
    } else {
        round_money(gross / served.len() as f64)
    };

    SalesSummary {
        orders: served.len(),
        gross: round_money(gross),
        tax: round_money(tax),
        tips: round_money(tips),
        discounts: round_money(discounts),
        delivery_fees: round_money(fees),
        average_ticket,
        by_channel,
        by_payment_method,
    }
}

pub fn sales_summary(db: &DbState, period: Option<Period>) -> PosResult<SalesSummary> {
    let conn = db.conn.lock()?;
    let orders = store::load::<Order>(&conn)?;
    let summary = summarize(&orders, period);
    debug!(orders = summary.orders, gross = summary.gross, "sales summary computed");
    Ok(summary)
}

/// Item revenue per menu category, highest revenue first. Items whose menu
/// entry was deleted are grouped under "Uncategorized".
pub fn sales_by_category(db: &DbState, period: Option<Period>) -> PosResult<Vec<CategorySales>> {
    let conn = db.conn.lock()?;
    let orders = store::load::<Order>(&conn)?;
    let menu: HashMap<String, String> = store::load::<MenuItem>(&conn)?
        .into_iter()
        .map(|m| (m.id, m.category))
        .collect();

    let mut totals: HashMap<String, (u32, f64)> = HashMap::new();
    for order in served_in(&orders, period) {
        for item in order
            .items
            .iter()
            .filter(|i| i.status != OrderStatus::Cancelled)
        {
            let category = menu
                .get(&item.menu_item_id)
                .cloned()
                .unwrap_or_else(|| "Uncategorized".to_string());
            let entry = totals.entry(category).or_insert((0, 0.0));
            entry.0 += item.quantity;
            entry.1 += item.line_total();
        }
    }

    let mut rows: Vec<CategorySales> = totals
        .into_iter()
        .map(|(category, (quantity, revenue))| CategorySales {
            category,
            quantity,
            revenue: round_money(revenue),
        })
        .collect();
    rows.sort_by(|a, b| {
        b.revenue
            .total_cmp(&a.revenue)
            .then_with(|| a.category.cmp(&b.category))
    });
    Ok(rows)
}

/// Best sellers by quantity.
pub fn top_dishes(db: &DbState, period: Option<Period>, limit: usize) -> PosResult<Vec<DishSales>> {
    let conn = db.conn.lock()?;
    let orders = store::load::<Order>(&conn)?;

    let mut totals: HashMap<String, DishSales> = HashMap::new();
    for order in served_in(&orders, period) {
        for item in order
            .items
            .iter()
            .filter(|i| i.status != OrderStatus::Cancelled)
        {
            let entry = totals
                .entry(item.menu_item_id.clone())
                .or_insert_with(|| DishSales {
                    menu_item_id: item.menu_item_id.clone(),
                    name: item.name.clone(),
                    quantity: 0,
                    revenue: 0.0,
                });
            entry.quantity += item.quantity;
            entry.revenue += item.line_total();
        }
    }

    let mut rows: Vec<DishSales> = totals.into_values().collect();
    for row in &mut rows {
        row.revenue = round_money(row.revenue);
    }
    rows.sort_by(|a, b| b.quantity.cmp(&a.quantity).then_with(|| a.name.cmp(&b.name)));
    rows.truncate(limit);
    Ok(rows)
}

/// Number of orders in each status, every status present.
pub fn order_counts(db: &DbState) -> PosResult<Vec<(OrderStatus, usize)>> {
    let conn = db.conn.lock()?;
    let orders = store::load::<Order>(&conn)?;
    Ok(OrderStatus::ALL
        .iter()
        .map(|s| (*s, orders.iter().filter(|o| o.status == *s).count()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::{CartLine, TipPolicy};
    use crate::db::test_db_state;
    use crate::menu;
    use crate::models::{MenuItem, PaymentMethod};
    use crate::orders::{self, NewDeliveryOrder, NewDineInOrder, Settlement};
    use crate::tables;
    use chrono::Duration;

    fn line(item: &MenuItem, quantity: u32) -> CartLine {
        CartLine {
            menu_item_id: item.id.clone(),
            quantity,
            modifiers: vec![],
            note: String::new(),
        }
    }

    fn serve(db: &DbState, id: &str, tip: TipPolicy, method: PaymentMethod) {
        orders::accept_order(db, id).unwrap();
        orders::mark_ready(db, id).unwrap();
        orders::settle_order(
            db,
            id,
            Settlement {
                tip,
                discount: 0.0,
                payment_method: Some(method),
            },
        )
        .unwrap();
    }

    struct Seeded {
        db: DbState,
        ceviche: MenuItem,
    }

    /// Dine-in: 2 ceviche + 1 chicha (78 items), delivery: 1 ceviche,
    /// one cancelled order and one still new.
    fn seeded() -> Seeded {
        let db = test_db_state();
        let t1 = tables::create_table(&db, 1, 4).unwrap();
        let t2 = tables::create_table(&db, 2, 4).unwrap();
        let t3 = tables::create_table(&db, 3, 4).unwrap();
        let ceviche = menu::create_item(&db, menu::sample_item("Ceviche", "Ceviches", 35.0)).unwrap();
        let chicha = menu::create_item(&db, menu::sample_item("Chicha", "Bebidas", 8.0)).unwrap();

        let dine = orders::create_dine_in_order(
            &db,
            NewDineInOrder {
                table_id: t1.id,
                waiter_id: None,
                customer_id: None,
                diners: Some(2),
                lines: vec![line(&ceviche, 2), line(&chicha, 1)],
            },
        )
        .unwrap();
        serve(&db, &dine.id, TipPolicy::Suggested, PaymentMethod::Card);

        let delivery = orders::create_delivery_order(
            &db,
            NewDeliveryOrder {
                customer_name: "Ana".into(),
                phone: "999".into(),
                address: "Av. Arequipa 1".into(),
                zone: "surco".into(),
                payment_method: PaymentMethod::Yape,
                cash_amount: None,
                notes: String::new(),
                customer_id: None,
                lines: vec![line(&ceviche, 1)],
            },
        )
        .unwrap();
        serve(&db, &delivery.id, TipPolicy::None, PaymentMethod::Yape);

        let cancelled = orders::create_dine_in_order(
            &db,
            NewDineInOrder {
                table_id: t2.id,
                waiter_id: None,
                customer_id: None,
                diners: None,
                lines: vec![line(&chicha, 10)],
            },
        )
        .unwrap();
        orders::cancel_order(&db, &cancelled.id).unwrap();

        orders::create_dine_in_order(
            &db,
            NewDineInOrder {
                table_id: t3.id,
                waiter_id: None,
                customer_id: None,
                diners: None,
                lines: vec![line(&chicha, 1)],
            },
        )
        .unwrap();

        Seeded { db, ceviche }
    }

    #[test]
    fn test_sales_summary_counts_served_only() {
        let s = seeded();
        let summary = sales_summary(&s.db, None).unwrap();
        assert_eq!(summary.orders, 2);
        // dine-in: 78 + 14.04 tax + 7.80 tip = 99.84
        // delivery: (38 + 10 fee) + 8.64 tax = 56.64
        assert_eq!(summary.gross, 156.48);
        assert_eq!(summary.tips, 7.8);
        assert_eq!(summary.delivery_fees, 10.0);
        assert_eq!(summary.average_ticket, 78.24);
        assert_eq!(summary.by_channel["dine-in"], 99.84);
        assert_eq!(summary.by_channel["delivery"], 56.64);
        assert_eq!(summary.by_payment_method["yape"], 56.64);
    }

    #[test]
    fn test_period_filter() {
        let s = seeded();
        let now = Utc::now();
        let past = Period::new(now - Duration::days(2), now - Duration::days(1)).unwrap();
        assert_eq!(sales_summary(&s.db, Some(past)).unwrap().orders, 0);
        let today = Period::new(now - Duration::hours(1), now + Duration::hours(1)).unwrap();
        assert_eq!(sales_summary(&s.db, Some(today)).unwrap().orders, 2);
        assert!(Period::new(now, now).is_err());
    }

    #[test]
    fn test_sales_by_category_and_top_dishes() {
        let s = seeded();
        let cats = sales_by_category(&s.db, None).unwrap();
        assert_eq!(cats.len(), 2);
        assert_eq!(cats[0].category, "Ceviches");
        assert_eq!(cats[0].quantity, 3);
        // 2 × 35 dine-in + 1 × 38 delivery
        assert_eq!(cats[0].revenue, 108.0);
        assert_eq!(cats[1].revenue, 8.0);

        let top = top_dishes(&s.db, None, 1).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].menu_item_id, s.ceviche.id);
        assert_eq!(top[0].quantity, 3);
    }

    #[test]
    fn test_order_counts_cover_every_status() {
        let s = seeded();
        let counts = order_counts(&s.db).unwrap();
        assert_eq!(counts.len(), 5);
        let get = |status| counts.iter().find(|(s, _)| *s == status).unwrap().1;
        assert_eq!(get(OrderStatus::Served), 2);
        assert_eq!(get(OrderStatus::Cancelled), 1);
        assert_eq!(get(OrderStatus::New), 1);
        assert_eq!(get(OrderStatus::Ready), 0);
    }
}
