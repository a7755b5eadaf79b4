#![deny(warnings)]

//! Pure cost and profit math for recipes.
//!
//! Every function here recomputes from the caller-supplied price table; no
//! result is cached or persisted, so an ingredient price edit shows up in
//! every recipe on the next read. Dangling ingredient references fail hard
//! with [`CalcError::DanglingIngredient`] for every recipe alike; nothing is
//! ever silently substituted with zero.

use recipe_core::{Drug, IngredientName, PriceTable};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// Errors produced by the calculation engine.
#[derive(Debug, Error, PartialEq)]
pub enum CalcError {
    /// A recipe row references an ingredient missing from the price table.
    #[error("dangling ingredient reference: {0}")]
    DanglingIngredient(String),
    /// Markup for a suggested price must be >= 0.
    #[error("negative markup is invalid")]
    NegativeMarkup,
}

/// One display row of a recipe's cost summary.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CostLine {
    pub ingredient: IngredientName,
    pub quantity: u32,
    pub unit_price: Decimal,
    /// quantity x unit_price, exact.
    pub line_total: Decimal,
}

/// Total ingredient cost of a recipe: sum of quantity x current unit price.
///
/// Example:
/// let cost = recipe_cost(&drug, &prices)?; // 3 x 2.00 => 6.00
pub fn recipe_cost(drug: &Drug, prices: &PriceTable) -> Result<Decimal, CalcError> {
    let mut total = Decimal::ZERO;
    for row in &drug.ingredients {
        let price = prices
            .get(&row.ingredient)
            .ok_or_else(|| CalcError::DanglingIngredient(row.ingredient.0.clone()))?;
        total += Decimal::from(row.quantity) * *price;
    }
    Ok(total)
}

/// Per-row line totals for the cost summary table, in recipe order.
pub fn cost_breakdown(drug: &Drug, prices: &PriceTable) -> Result<Vec<CostLine>, CalcError> {
    drug.ingredients
        .iter()
        .map(|row| {
            let price = prices
                .get(&row.ingredient)
                .ok_or_else(|| CalcError::DanglingIngredient(row.ingredient.0.clone()))?;
            Ok(CostLine {
                ingredient: row.ingredient.clone(),
                quantity: row.quantity,
                unit_price: *price,
                line_total: Decimal::from(row.quantity) * *price,
            })
        })
        .collect()
}

/// Absolute profit at a given sell price.
pub fn profit(sell_price: Decimal, cost: Decimal) -> Decimal {
    sell_price - cost
}

/// Profit margin `(sell - cost) / sell`, or `None` when no positive sell
/// price has been entered. Never divides by zero.
///
/// Example:
/// let m = profit_margin(Some(Decimal::new(1500, 2)), Decimal::new(600, 2));
/// assert_eq!(m, Some(Decimal::new(6, 1))); // 0.6
pub fn profit_margin(sell_price: Option<Decimal>, cost: Decimal) -> Option<Decimal> {
    match sell_price {
        Some(sell) if sell > Decimal::ZERO => Some((sell - cost) / sell),
        _ => None,
    }
}

/// Cost-plus suggested sell price: `cost * (1 + markup)`.
///
/// Example:
/// let p = suggested_price(Decimal::new(600, 2), Decimal::new(5, 1))?; // 9.00
pub fn suggested_price(cost: Decimal, markup: Decimal) -> Result<Decimal, CalcError> {
    if markup < Decimal::ZERO {
        return Err(CalcError::NegativeMarkup);
    }
    Ok(cost * (Decimal::ONE + markup))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use recipe_core::{DrugKind, IngredientUse};
    use std::collections::BTreeSet;

    fn drug(rows: &[(&str, u32)], sell_cents: Option<i64>) -> Drug {
        Drug {
            name: "Test Batch".to_string(),
            kind: DrugKind::Weed,
            ingredients: rows
                .iter()
                .map(|(n, q)| IngredientUse {
                    ingredient: IngredientName(n.to_string()),
                    quantity: *q,
                })
                .collect(),
            effects: BTreeSet::new(),
            sell_price: sell_cents.map(|c| Decimal::new(c, 2)),
            notes: String::new(),
            favorite: false,
        }
    }

    fn prices(rows: &[(&str, i64)]) -> PriceTable {
        rows.iter()
            .map(|(n, cents)| (IngredientName(n.to_string()), Decimal::new(*cents, 2)))
            .collect()
    }

    #[test]
    fn baking_soda_scenario() {
        // 3 x 2.00 = 6.00; margin (15.00 - 6.00) / 15.00 = 0.6
        let d = drug(&[("Baking Soda", 3)], Some(1500));
        let p = prices(&[("Baking Soda", 200)]);
        let cost = recipe_cost(&d, &p).unwrap();
        assert_eq!(cost, Decimal::new(600, 2));
        assert_eq!(profit_margin(d.sell_price, cost), Some(Decimal::new(6, 1)));
    }

    #[test]
    fn cost_is_exact_sum_of_products() {
        let d = drug(&[("Salt", 2), ("Sugar", 5)], None);
        let p = prices(&[("Salt", 125), ("Sugar", 40)]);
        // 2 x 1.25 + 5 x 0.40 = 4.50
        assert_eq!(recipe_cost(&d, &p).unwrap(), Decimal::new(450, 2));
    }

    #[test]
    fn price_edit_changes_recomputed_cost() {
        let d = drug(&[("Salt", 4)], None);
        let before = prices(&[("Salt", 100)]);
        let after = prices(&[("Salt", 150)]);
        assert_eq!(recipe_cost(&d, &before).unwrap(), Decimal::new(400, 2));
        assert_eq!(recipe_cost(&d, &after).unwrap(), Decimal::new(600, 2));
    }

    #[test]
    fn dangling_reference_fails_hard() {
        let d = drug(&[("Ghost Pepper", 1)], None);
        assert_eq!(
            recipe_cost(&d, &prices(&[])),
            Err(CalcError::DanglingIngredient("Ghost Pepper".to_string()))
        );
        assert!(cost_breakdown(&d, &prices(&[])).is_err());
    }

    #[test]
    fn breakdown_rows_follow_recipe_order() {
        let d = drug(&[("Sugar", 5), ("Salt", 2)], None);
        let p = prices(&[("Salt", 125), ("Sugar", 40)]);
        let lines = cost_breakdown(&d, &p).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].ingredient, IngredientName("Sugar".to_string()));
        assert_eq!(lines[0].line_total, Decimal::new(200, 2));
        assert_eq!(lines[1].line_total, Decimal::new(250, 2));
    }

    #[test]
    fn margin_not_applicable_without_positive_sell_price() {
        let cost = Decimal::new(600, 2);
        assert_eq!(profit_margin(None, cost), None);
        assert_eq!(profit_margin(Some(Decimal::ZERO), cost), None);
    }

    #[test]
    fn suggested_price_rejects_negative_markup() {
        let cost = Decimal::new(600, 2);
        assert_eq!(
            suggested_price(cost, Decimal::new(5, 1)).unwrap(),
            Decimal::new(900, 2)
        );
        assert_eq!(
            suggested_price(cost, Decimal::new(-1, 1)),
            Err(CalcError::NegativeMarkup)
        );
    }

    proptest! {
        #[test]
        fn cost_is_linear_in_quantity(q in 1u32..1_000, cents in 0i64..100_000) {
            let p = prices(&[("X", cents)]);
            let one = recipe_cost(&drug(&[("X", 1)], None), &p).unwrap();
            let many = recipe_cost(&drug(&[("X", q)], None), &p).unwrap();
            prop_assert_eq!(many, one * Decimal::from(q));
        }

        #[test]
        fn margin_is_below_one_for_positive_prices(
            sell in 1i64..1_000_000,
            cost in 0i64..1_000_000,
        ) {
            let m = profit_margin(Some(Decimal::new(sell, 2)), Decimal::new(cost, 2)).unwrap();
            prop_assert!(m <= Decimal::ONE);
            // break-even iff cost == sell
            if cost == sell {
                prop_assert_eq!(m, Decimal::ZERO);
            }
        }
    }
}
