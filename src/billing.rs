//! Invoice arithmetic: subtotal, delivery fee, tax, tip, discount, total.
//!
//! All functions are pure. Every component is rounded to cents and the
//! total is built from the rounded parts, so
//! `total == subtotal + tax + tip - discount` holds exactly in cents.

use serde::{Deserialize, Serialize};

use crate::config::RestaurantConfig;
use crate::error::{PosError, PosResult};
use crate::menu;
use crate::models::{MenuItem, OrderChannel};

/// Round a money amount to cents.
pub fn round_money(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Price of `quantity` units, rounded to cents. Orders and quotes both
/// sum these rounded lines.
pub fn line_total(unit_price: f64, quantity: u32) -> f64 {
    round_money(unit_price * f64::from(quantity))
}

fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

fn from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// How the tip is chosen at settlement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum TipPolicy {
    #[default]
    None,
    /// Configured suggested rate of the subtotal.
    Suggested,
    /// Percentage of the subtotal, e.g. `12.5`.
    Percent(f64),
    /// Fixed amount.
    Amount(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub items_total: f64,
    pub delivery_fee: f64,
    pub subtotal: f64,
    pub tax: f64,
    pub tip: f64,
    pub discount: f64,
    pub total: f64,
}

pub fn resolve_tip(policy: TipPolicy, subtotal: f64, suggested_rate: f64) -> PosResult<f64> {
    let tip = match policy {
        TipPolicy::None => 0.0,
        TipPolicy::Suggested => subtotal * suggested_rate,
        TipPolicy::Percent(pct) => {
            if !pct.is_finite() || pct < 0.0 {
                return Err(PosError::validation("Tip percentage cannot be negative"));
            }
            subtotal * pct / 100.0
        }
        TipPolicy::Amount(amount) => {
            if !amount.is_finite() || amount < 0.0 {
                return Err(PosError::validation("Tip cannot be negative"));
            }
            amount
        }
    };
    Ok(round_money(tip))
}

/// Compute an invoice from the items total and its adjustments.
pub fn compute_invoice(
    items_total: f64,
    delivery_fee: f64,
    tax_rate: f64,
    tip: TipPolicy,
    suggested_tip_rate: f64,
    discount: f64,
) -> PosResult<Invoice> {
    if !discount.is_finite() || discount < 0.0 {
        return Err(PosError::validation("Discount cannot be negative"));
    }
    let items_total = round_money(items_total);
    let delivery_fee = round_money(delivery_fee);
    let subtotal = round_money(items_total + delivery_fee);
    let tax = round_money(subtotal * tax_rate);
    let tip = resolve_tip(tip, subtotal, suggested_tip_rate)?;
    let discount = round_money(discount);

    let gross = to_cents(subtotal) + to_cents(tax) + to_cents(tip);
    if to_cents(discount) > gross {
        return Err(PosError::validation("Discount exceeds the bill"));
    }

    Ok(Invoice {
        items_total,
        delivery_fee,
        subtotal,
        tax,
        tip,
        discount,
        total: from_cents(gross - to_cents(discount)),
    })
}

/// Invoice for a freshly created order using the configured rates.
pub fn invoice_for(
    config: &RestaurantConfig,
    items_total: f64,
    channel: OrderChannel,
    zone: Option<&str>,
    tip: TipPolicy,
    discount: f64,
) -> PosResult<Invoice> {
    let fee = match (channel, zone) {
        (OrderChannel::Delivery, Some(z)) => config.zone_fee(z),
        (OrderChannel::Delivery, None) => config.default_zone_fee,
        (OrderChannel::DineIn, _) => 0.0,
    };
    compute_invoice(
        items_total,
        fee,
        config.tax_rate,
        tip,
        config.suggested_tip_rate,
        discount,
    )
}

// ---------------------------------------------------------------------------
// Cart quote
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub menu_item_id: String,
    pub quantity: u32,
    #[serde(default)]
    pub modifiers: Vec<String>,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotedLine {
    pub menu_item_id: String,
    pub name: String,
    pub unit_price: f64,
    pub quantity: u32,
    pub line_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub lines: Vec<QuotedLine>,
    pub invoice: Invoice,
}

/// Price a cart against `menu` for a channel. Nothing is persisted.
pub fn quote_cart(
    config: &RestaurantConfig,
    menu_items: &[MenuItem],
    lines: &[CartLine],
    channel: OrderChannel,
    zone: Option<&str>,
) -> PosResult<Quote> {
    if lines.is_empty() {
        return Err(PosError::validation("The cart is empty"));
    }
    let mut quoted = Vec::with_capacity(lines.len());
    for line in lines {
        if line.quantity == 0 {
            return Err(PosError::validation("Quantity must be at least 1"));
        }
        let item = menu::orderable(menu_items, &line.menu_item_id)?;
        let unit_price = item.price_for(channel);
        quoted.push(QuotedLine {
            menu_item_id: item.id,
            name: item.name,
            unit_price,
            quantity: line.quantity,
            line_total: line_total(unit_price, line.quantity),
        });
    }
    let items_total: f64 = quoted.iter().map(|l| l.line_total).sum();
    let invoice = invoice_for(config, items_total, channel, zone, TipPolicy::None, 0.0)?;
    Ok(Quote {
        lines: quoted,
        invoice,
    })
}

// ---------------------------------------------------------------------------
// Bill splitting
// ---------------------------------------------------------------------------

/// Split `total` across `people` parts that sum exactly to the total.
/// Leftover cents go to the first parts.
pub fn split_even(total: f64, people: u32) -> PosResult<Vec<f64>> {
    if people < 2 {
        return Err(PosError::validation("Split needs at least 2 people"));
    }
    if !total.is_finite() || total < 0.0 {
        return Err(PosError::validation("Total cannot be negative"));
    }
    let cents = to_cents(total);
    let n = i64::from(people);
    let base = cents / n;
    let extra = cents % n;
    Ok((0..n)
        .map(|i| from_cents(base + i64::from(i < extra)))
        .collect())
}

/// Split off `amount` from `total`, returning `[amount, remainder]`.
pub fn split_by_amount(total: f64, amount: f64) -> PosResult<[f64; 2]> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(PosError::validation("Amount must be greater than zero"));
    }
    let total_cents = to_cents(total);
    let amount_cents = to_cents(amount);
    if amount_cents > total_cents {
        return Err(PosError::validation("Amount exceeds the total"));
    }
    Ok([from_cents(amount_cents), from_cents(total_cents - amount_cents)])
}

/// Change due for a cash payment.
pub fn change_due(total: f64, tendered: f64) -> PosResult<f64> {
    let diff = to_cents(tendered) - to_cents(total);
    if diff < 0 {
        return Err(PosError::validation("Cash amount does not cover the total"));
    }
    Ok(from_cents(diff))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariant(inv: &Invoice) {
        let lhs = to_cents(inv.total);
        let rhs = to_cents(inv.subtotal) + to_cents(inv.tax) + to_cents(inv.tip)
            - to_cents(inv.discount);
        assert_eq!(lhs, rhs, "{inv:?}");
    }

    #[test]
    fn test_reference_example() {
        let inv = compute_invoice(100.0, 0.0, 0.18, TipPolicy::Suggested, 0.10, 0.0).unwrap();
        assert_eq!(inv.subtotal, 100.0);
        assert_eq!(inv.tax, 18.0);
        assert_eq!(inv.tip, 10.0);
        assert_eq!(inv.total, 128.0);
        assert_invariant(&inv);
    }

    #[test]
    fn test_delivery_fee_is_taxed() {
        let config = RestaurantConfig::default();
        let inv = invoice_for(
            &config,
            50.0,
            OrderChannel::Delivery,
            Some("la-molina"),
            TipPolicy::None,
            0.0,
        )
        .unwrap();
        assert_eq!(inv.delivery_fee, 12.0);
        assert_eq!(inv.subtotal, 62.0);
        assert_eq!(inv.tax, 11.16);
        assert_eq!(inv.total, 73.16);
        assert_invariant(&inv);

        let unknown = invoice_for(
            &config,
            50.0,
            OrderChannel::Delivery,
            Some("callao"),
            TipPolicy::None,
            0.0,
        )
        .unwrap();
        assert_eq!(unknown.delivery_fee, 10.0);
    }

    #[test]
    fn test_dine_in_ignores_zone() {
        let config = RestaurantConfig::default();
        let inv = invoice_for(
            &config,
            40.0,
            OrderChannel::DineIn,
            Some("surco"),
            TipPolicy::None,
            0.0,
        )
        .unwrap();
        assert_eq!(inv.delivery_fee, 0.0);
        assert_eq!(inv.subtotal, 40.0);
    }

    #[test]
    fn test_invariant_holds_with_awkward_amounts() {
        for (items, tip, discount) in [
            (33.33, TipPolicy::Percent(12.5), 1.11),
            (0.07, TipPolicy::Suggested, 0.0),
            (129.99, TipPolicy::Amount(4.555), 10.0),
        ] {
            let inv = compute_invoice(items, 0.0, 0.18, tip, 0.10, discount).unwrap();
            assert_invariant(&inv);
        }
    }

    #[test]
    fn test_rejects_bad_adjustments() {
        assert!(compute_invoice(10.0, 0.0, 0.18, TipPolicy::None, 0.1, -1.0).is_err());
        assert!(compute_invoice(10.0, 0.0, 0.18, TipPolicy::Amount(-2.0), 0.1, 0.0).is_err());
        assert!(compute_invoice(10.0, 0.0, 0.18, TipPolicy::None, 0.1, 50.0).is_err());
        // discounting the whole bill is allowed
        let free = compute_invoice(10.0, 0.0, 0.18, TipPolicy::None, 0.1, 11.8).unwrap();
        assert_eq!(free.total, 0.0);
    }

    #[test]
    fn test_split_even_sums_to_total() {
        let parts = split_even(100.0, 3).unwrap();
        assert_eq!(parts, vec![33.34, 33.33, 33.33]);
        for (total, n) in [(128.0, 4), (73.16, 3), (0.05, 7)] {
            let parts = split_even(total, n).unwrap();
            let sum: i64 = parts.iter().map(|p| to_cents(*p)).sum();
            assert_eq!(sum, to_cents(total));
        }
        assert!(split_even(10.0, 1).is_err());
    }

    #[test]
    fn test_split_by_amount() {
        assert_eq!(split_by_amount(128.0, 28.0).unwrap(), [28.0, 100.0]);
        assert_eq!(split_by_amount(128.0, 128.0).unwrap(), [128.0, 0.0]);
        assert!(split_by_amount(128.0, 0.0).is_err());
        assert!(split_by_amount(128.0, 128.01).is_err());
    }

    #[test]
    fn test_quote_cart_uses_channel_price() {
        let config = RestaurantConfig::default();
        let menu = vec![MenuItem {
            id: "menu-1".into(),
            name: "Ceviche".into(),
            category: "Ceviches".into(),
            dine_in_price: 35.0,
            delivery_price: 38.0,
            description: String::new(),
            photo: None,
            tags: vec![],
            available: true,
            station: crate::models::KitchenStation::Cold,
        }];
        let lines = vec![CartLine {
            menu_item_id: "menu-1".into(),
            quantity: 2,
            modifiers: vec![],
            note: String::new(),
        }];
        let quote = quote_cart(
            &config,
            &menu,
            &lines,
            OrderChannel::Delivery,
            Some("miraflores"),
        )
        .unwrap();
        assert_eq!(quote.invoice.items_total, 76.0);
        assert_eq!(quote.invoice.subtotal, 84.0);
        assert!(quote_cart(&config, &menu, &[], OrderChannel::DineIn, None).is_err());
    }

    #[test]
    fn test_change_due() {
        assert_eq!(change_due(73.16, 100.0).unwrap(), 26.84);
        assert!(change_due(73.16, 50.0).is_err());
    }
}
