//! Ingredients, recipes (bill of materials) and stock.
//!
//! Stock is only deducted through [`deduct_for_order`]; settlement calls it
//! when the `autoDeductStock` config flag is on.

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::db::DbState;
use crate::error::{PosError, PosResult};
use crate::models::{Ingredient, MenuItem, Order, OrderStatus, Recipe, RecipeLine};
use crate::store::{self, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StockStatus {
    Ok,
    Low,
    Critical,
}

/// Critical at or below half the minimum, low at or below the minimum.
pub fn stock_status(ingredient: &Ingredient) -> StockStatus {
    if ingredient.minimum <= 0.0 {
        return StockStatus::Ok;
    }
    if ingredient.stock <= ingredient.minimum * 0.5 {
        StockStatus::Critical
    } else if ingredient.stock <= ingredient.minimum {
        StockStatus::Low
    } else {
        StockStatus::Ok
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIngredient {
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

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngredientPatch {
    pub name: Option<String>,
    pub stock: Option<f64>,
    pub unit: Option<String>,
    pub minimum: Option<f64>,
    pub unit_cost: Option<f64>,
    pub lot: Option<String>,
    pub expires_on: Option<NaiveDate>,
}

fn non_negative(label: &str, value: f64) -> PosResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(PosError::validation(format!("{label} cannot be negative")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Ingredients
// ---------------------------------------------------------------------------

pub fn add_ingredient(db: &DbState, input: NewIngredient) -> PosResult<Ingredient> {
    if input.name.trim().is_empty() {
        return Err(PosError::validation("Ingredient name is required"));
    }
    if input.unit.trim().is_empty() {
        return Err(PosError::validation("Unit is required"));
    }
    non_negative("Stock", input.stock)?;
    non_negative("Minimum", input.minimum)?;
    non_negative("Unit cost", input.unit_cost)?;

    let ingredient = Ingredient {
        id: store::new_id(Ingredient::ID_PREFIX),
        name: input.name.trim().to_string(),
        stock: input.stock,
        unit: input.unit.trim().to_string(),
        minimum: input.minimum,
        unit_cost: input.unit_cost,
        lot: input.lot,
        expires_on: input.expires_on,
    };
    let conn = db.conn.lock()?;
    let ingredient = store::insert(&conn, ingredient)?;
    info!(id = %ingredient.id, name = %ingredient.name, "ingredient added");
    Ok(ingredient)
}

pub fn update_ingredient(
    db: &DbState,
    id: &str,
    patch: IngredientPatch,
) -> PosResult<Ingredient> {
    for (label, value) in [
        ("Stock", patch.stock),
        ("Minimum", patch.minimum),
        ("Unit cost", patch.unit_cost),
    ] {
        if let Some(v) = value {
            non_negative(label, v)?;
        }
    }
    let conn = db.conn.lock()?;
    store::update::<Ingredient, _>(&conn, id, |ing| {
        if let Some(v) = patch.name {
            ing.name = v;
        }
        if let Some(v) = patch.stock {
            ing.stock = v;
        }
        if let Some(v) = patch.unit {
            ing.unit = v;
        }
        if let Some(v) = patch.minimum {
            ing.minimum = v;
        }
        if let Some(v) = patch.unit_cost {
            ing.unit_cost = v;
        }
        if let Some(v) = patch.lot {
            ing.lot = Some(v);
        }
        if let Some(v) = patch.expires_on {
            ing.expires_on = Some(v);
        }
        Ok(())
    })
}

/// Add (or with a negative delta, remove) stock. Never drops below zero.
pub fn adjust_stock(db: &DbState, id: &str, delta: f64) -> PosResult<Ingredient> {
    if !delta.is_finite() {
        return Err(PosError::validation("Stock adjustment must be a number"));
    }
    let conn = db.conn.lock()?;
    let ing = store::update::<Ingredient, _>(&conn, id, |ing| {
        if ing.stock + delta < 0.0 {
            return Err(PosError::validation(format!(
                "Not enough {} in stock ({} {})",
                ing.name, ing.stock, ing.unit
            )));
        }
        ing.stock += delta;
        Ok(())
    })?;
    info!(id = %ing.id, delta, stock = ing.stock, "stock adjusted");
    Ok(ing)
}

pub fn delete_ingredient(db: &DbState, id: &str) -> PosResult<Ingredient> {
    let conn = db.conn.lock()?;
    store::remove::<Ingredient>(&conn, id)
}

pub fn list_ingredients(db: &DbState) -> PosResult<Vec<Ingredient>> {
    let conn = db.conn.lock()?;
    store::load(&conn)
}

pub fn get_ingredient(db: &DbState, id: &str) -> PosResult<Ingredient> {
    let conn = db.conn.lock()?;
    store::find(&conn, id)
}

pub fn critical_ingredients(db: &DbState) -> PosResult<Vec<Ingredient>> {
    Ok(list_ingredients(db)?
        .into_iter()
        .filter(|i| stock_status(i) == StockStatus::Critical)
        .collect())
}

/// Ingredients at or below their minimum, critical ones included.
pub fn low_stock_ingredients(db: &DbState) -> PosResult<Vec<Ingredient>> {
    Ok(list_ingredients(db)?
        .into_iter()
        .filter(|i| stock_status(i) != StockStatus::Ok)
        .collect())
}

/// Ingredients whose lot expires on or before `date`.
pub fn expiring_by(db: &DbState, date: NaiveDate) -> PosResult<Vec<Ingredient>> {
    Ok(list_ingredients(db)?
        .into_iter()
        .filter(|i| i.expires_on.is_some_and(|d| d <= date))
        .collect())
}

/// Σ stock × unit cost over every ingredient.
pub fn inventory_value(db: &DbState) -> PosResult<f64> {
    Ok(list_ingredients(db)?
        .iter()
        .map(|i| i.stock * i.unit_cost)
        .sum())
}

// ---------------------------------------------------------------------------
// Recipes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecipe {
    pub menu_item_id: String,
    pub lines: Vec<RecipeLine>,
    pub yield_portions: f64,
    #[serde(default)]
    pub waste: f64,
}

fn validate_recipe(conn: &Connection, input: &NewRecipe) -> PosResult<()> {
    if !(input.yield_portions > 0.0) {
        return Err(PosError::validation("Yield must be greater than zero"));
    }
    if !(0.0..1.0).contains(&input.waste) {
        return Err(PosError::validation("Waste must be between 0 and 1"));
    }
    if input.lines.is_empty() {
        return Err(PosError::validation("Recipe needs at least one ingredient"));
    }
    let ingredients = store::load::<Ingredient>(conn)?;
    for line in &input.lines {
        if !(line.quantity > 0.0) {
            return Err(PosError::validation("Ingredient quantity must be positive"));
        }
        if !ingredients.iter().any(|i| i.id == line.ingredient_id) {
            return Err(PosError::not_found(Ingredient::KIND, &line.ingredient_id));
        }
    }
    store::find::<MenuItem>(conn, &input.menu_item_id)?;
    Ok(())
}

/// Create a recipe. A menu item has at most one.
pub fn create_recipe(db: &DbState, input: NewRecipe) -> PosResult<Recipe> {
    let conn = db.conn.lock()?;
    validate_recipe(&conn, &input)?;
    if store::load::<Recipe>(&conn)?
        .iter()
        .any(|r| r.menu_item_id == input.menu_item_id)
    {
        return Err(PosError::Conflict(format!(
            "menu item {} already has a recipe",
            input.menu_item_id
        )));
    }
    let recipe = Recipe {
        id: store::new_id(Recipe::ID_PREFIX),
        menu_item_id: input.menu_item_id,
        lines: input.lines,
        yield_portions: input.yield_portions,
        waste: input.waste,
    };
    let recipe = store::insert(&conn, recipe)?;
    info!(id = %recipe.id, menu_item = %recipe.menu_item_id, "recipe created");
    Ok(recipe)
}

/// Replace a recipe's lines, yield and waste.
pub fn update_recipe(db: &DbState, id: &str, input: NewRecipe) -> PosResult<Recipe> {
    let conn = db.conn.lock()?;
    validate_recipe(&conn, &input)?;
    store::update::<Recipe, _>(&conn, id, |r| {
        if r.menu_item_id != input.menu_item_id {
            return Err(PosError::validation(
                "A recipe cannot move to another menu item",
            ));
        }
        r.lines = input.lines;
        r.yield_portions = input.yield_portions;
        r.waste = input.waste;
        Ok(())
    })
}

pub fn delete_recipe(db: &DbState, id: &str) -> PosResult<Recipe> {
    let conn = db.conn.lock()?;
    store::remove::<Recipe>(&conn, id)
}

pub fn list_recipes(db: &DbState) -> PosResult<Vec<Recipe>> {
    let conn = db.conn.lock()?;
    store::load(&conn)
}

pub fn recipe_for_item(db: &DbState, menu_item_id: &str) -> PosResult<Option<Recipe>> {
    Ok(list_recipes(db)?
        .into_iter()
        .find(|r| r.menu_item_id == menu_item_id))
}

/// Ingredient quantity needed for one portion, waste included.
fn per_portion(recipe: &Recipe, line: &RecipeLine) -> f64 {
    line.quantity / recipe.yield_portions / (1.0 - recipe.waste)
}

/// Cost of one portion: Σ qty × cost / yield / (1 − waste).
pub fn recipe_cost(db: &DbState, recipe_id: &str) -> PosResult<f64> {
    let conn = db.conn.lock()?;
    let recipe = store::find::<Recipe>(&conn, recipe_id)?;
    let ingredients = store::load::<Ingredient>(&conn)?;
    let mut cost = 0.0;
    for line in &recipe.lines {
        let ing = ingredients
            .iter()
            .find(|i| i.id == line.ingredient_id)
            .ok_or_else(|| PosError::not_found(Ingredient::KIND, &line.ingredient_id))?;
        cost += per_portion(&recipe, line) * ing.unit_cost;
    }
    Ok(cost)
}

/// Ingredient id → quantity consumed by the order's non-cancelled lines.
/// Items without a recipe contribute nothing.
pub fn order_requirements(recipes: &[Recipe], order: &Order) -> BTreeMap<String, f64> {
    let mut needed: BTreeMap<String, f64> = BTreeMap::new();
    for item in order
        .items
        .iter()
        .filter(|i| i.status != OrderStatus::Cancelled)
    {
        let Some(recipe) = recipes.iter().find(|r| r.menu_item_id == item.menu_item_id) else {
            continue;
        };
        for line in &recipe.lines {
            *needed.entry(line.ingredient_id.clone()).or_insert(0.0) +=
                per_portion(recipe, line) * f64::from(item.quantity);
        }
    }
    needed
}

pub fn requirements_for_order(db: &DbState, order_id: &str) -> PosResult<BTreeMap<String, f64>> {
    let conn = db.conn.lock()?;
    let order = store::find::<Order>(&conn, order_id)?;
    let recipes = store::load::<Recipe>(&conn)?;
    Ok(order_requirements(&recipes, &order))
}

/// Deduct an order's recipe requirements from stock on a held connection.
///
/// Stock never drops below zero; a shortfall is logged and the ingredient
/// clamps at zero. Returns the ids of short ingredients.
pub(crate) fn deduct_with(conn: &Connection, order: &Order) -> PosResult<Vec<String>> {
    let recipes = store::load::<Recipe>(conn)?;
    let needed = order_requirements(&recipes, order);
    if needed.is_empty() {
        return Ok(Vec::new());
    }

    let mut ingredients = store::load::<Ingredient>(conn)?;
    let mut short = Vec::new();
    for (ingredient_id, qty) in &needed {
        let Some(ing) = ingredients.iter_mut().find(|i| &i.id == ingredient_id) else {
            warn!(order_id = %order.id, ingredient_id = %ingredient_id, "recipe references missing ingredient");
            continue;
        };
        if ing.stock < *qty {
            warn!(
                order_id = %order.id,
                ingredient = %ing.name,
                stock = ing.stock,
                needed = qty,
                "stock shortfall"
            );
            short.push(ing.id.clone());
            ing.stock = 0.0;
        } else {
            ing.stock -= qty;
        }
    }
    store::save(conn, &ingredients)?;
    info!(order_id = %order.id, ingredients = needed.len(), "stock deducted for order");
    Ok(short)
}

pub fn deduct_for_order(db: &DbState, order_id: &str) -> PosResult<Vec<String>> {
    let conn = db.conn.lock()?;
    let order = store::find::<Order>(&conn, order_id)?;
    deduct_with(&conn, &order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db_state;
    use crate::menu;

    fn ingredient(db: &DbState, name: &str, stock: f64, minimum: f64, cost: f64) -> Ingredient {
        add_ingredient(
            db,
            NewIngredient {
                name: name.into(),
                stock,
                unit: "kg".into(),
                minimum,
                unit_cost: cost,
                lot: None,
                expires_on: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_stock_status_thresholds() {
        let db = test_db_state();
        let ok = ingredient(&db, "Limón", 11.0, 10.0, 1.0);
        let low = ingredient(&db, "Cebolla", 10.0, 10.0, 1.0);
        let critical = ingredient(&db, "Pescado", 5.0, 10.0, 1.0);
        let no_min = ingredient(&db, "Sal", 0.0, 0.0, 1.0);

        assert_eq!(stock_status(&ok), StockStatus::Ok);
        assert_eq!(stock_status(&low), StockStatus::Low);
        assert_eq!(stock_status(&critical), StockStatus::Critical);
        assert_eq!(stock_status(&no_min), StockStatus::Ok);

        assert_eq!(critical_ingredients(&db).unwrap().len(), 1);
        assert_eq!(low_stock_ingredients(&db).unwrap().len(), 2);
    }

    #[test]
    fn test_inventory_value() {
        let db = test_db_state();
        ingredient(&db, "Pescado", 4.0, 2.0, 30.0);
        ingredient(&db, "Limón", 10.0, 2.0, 2.5);
        assert!((inventory_value(&db).unwrap() - 145.0).abs() < 1e-9);
    }

    #[test]
    fn test_adjust_stock_never_negative() {
        let db = test_db_state();
        let ing = ingredient(&db, "Ají", 2.0, 1.0, 5.0);
        assert_eq!(adjust_stock(&db, &ing.id, 3.0).unwrap().stock, 5.0);
        assert!(matches!(
            adjust_stock(&db, &ing.id, -6.0),
            Err(PosError::Validation(_))
        ));
        assert_eq!(get_ingredient(&db, &ing.id).unwrap().stock, 5.0);
    }

    #[test]
    fn test_recipe_cost_with_yield_and_waste() {
        let db = test_db_state();
        let fish = ingredient(&db, "Pescado", 10.0, 2.0, 40.0);
        let item = menu::create_item(&db, menu::sample_item("Ceviche", "Ceviches", 35.0)).unwrap();
        let recipe = create_recipe(
            &db,
            NewRecipe {
                menu_item_id: item.id.clone(),
                lines: vec![RecipeLine {
                    ingredient_id: fish.id.clone(),
                    quantity: 1.0,
                    unit: "kg".into(),
                }],
                yield_portions: 4.0,
                waste: 0.2,
            },
        )
        .unwrap();
        // 1 kg × 40 / 4 portions / 0.8
        assert!((recipe_cost(&db, &recipe.id).unwrap() - 12.5).abs() < 1e-9);

        let dup = create_recipe(
            &db,
            NewRecipe {
                menu_item_id: item.id,
                lines: recipe.lines.clone(),
                yield_portions: 1.0,
                waste: 0.0,
            },
        );
        assert!(matches!(dup, Err(PosError::Conflict(_))));
    }

    #[test]
    fn test_recipe_validation() {
        let db = test_db_state();
        let fish = ingredient(&db, "Pescado", 10.0, 2.0, 40.0);
        let item = menu::create_item(&db, menu::sample_item("Ceviche", "Ceviches", 35.0)).unwrap();
        let line = RecipeLine {
            ingredient_id: fish.id,
            quantity: 0.2,
            unit: "kg".into(),
        };
        let bad_yield = NewRecipe {
            menu_item_id: item.id.clone(),
            lines: vec![line.clone()],
            yield_portions: 0.0,
            waste: 0.0,
        };
        assert!(create_recipe(&db, bad_yield).is_err());
        let bad_waste = NewRecipe {
            menu_item_id: item.id.clone(),
            lines: vec![line],
            yield_portions: 1.0,
            waste: 1.0,
        };
        assert!(create_recipe(&db, bad_waste).is_err());
        let missing = NewRecipe {
            menu_item_id: item.id,
            lines: vec![RecipeLine {
                ingredient_id: "ing-missing".into(),
                quantity: 1.0,
                unit: "kg".into(),
            }],
            yield_portions: 1.0,
            waste: 0.0,
        };
        assert!(matches!(
            create_recipe(&db, missing),
            Err(PosError::NotFound { .. })
        ));
    }

    #[test]
    fn test_expiring_by() {
        let db = test_db_state();
        let soon = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();
        add_ingredient(
            &db,
            NewIngredient {
                name: "Leche".into(),
                stock: 5.0,
                unit: "l".into(),
                minimum: 1.0,
                unit_cost: 4.0,
                lot: Some("L-01".into()),
                expires_on: Some(soon),
            },
        )
        .unwrap();
        ingredient(&db, "Arroz", 20.0, 5.0, 3.0);
        let cutoff = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        assert_eq!(expiring_by(&db, cutoff).unwrap().len(), 1);
    }
}
