#![deny(warnings)]

//! Core domain models and invariants for the recipe ledger.
//!
//! This crate defines the serializable entity types shared across the
//! application with validation helpers to guarantee basic invariants.
//! Derived figures (recipe cost, profit margin) are never stored on these
//! types; they are recomputed on demand by `recipe-calc`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Unique key of an ingredient, e.g. "Baking Soda". Exact, case-sensitive.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IngredientName(pub String);

/// Unique key of an effect, e.g. "Energizing". Exact, case-sensitive.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EffectName(pub String);

/// A base ingredient with its current market price.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    /// Ingredient key.
    pub name: IngredientName,
    /// Price per unit (>= 0).
    pub unit_price: Decimal,
}

/// An effect a drug can carry. The color is a display hint only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    /// Effect key.
    pub name: EffectName,
    /// Free-form description shown in the detail view.
    #[serde(default)]
    pub description: String,
    /// "#RRGGBB" hex color. Legacy records without one default to white.
    #[serde(default = "default_effect_color")]
    pub color: String,
}

fn default_effect_color() -> String {
    "#FFFFFF".to_string()
}

/// Game categories a recipe can belong to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrugKind {
    Weed,
    Meth,
    Cocaine,
}

impl DrugKind {
    /// Display label.
    pub fn as_str(self) -> &'static str {
        match self {
            DrugKind::Weed => "Weed",
            DrugKind::Meth => "Meth",
            DrugKind::Cocaine => "Cocaine",
        }
    }
}

/// One ingredient row of a recipe: a non-owning reference plus a quantity.
///
/// Exists only inside a [`Drug`]; never persisted on its own.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IngredientUse {
    /// Referenced ingredient key.
    pub ingredient: IngredientName,
    /// How many units the recipe consumes (>= 1).
    pub quantity: u32,
}

/// A recipe: ingredient references with quantities, effect references, and
/// an optional user-entered sell price.
///
/// Ingredient order is insertion order and is meaningful for display only.
/// Cost and margin are derived at read time from the current ingredient
/// prices, so a later price edit is reflected in every recipe immediately.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Drug {
    /// Recipe key.
    pub name: String,
    /// Game category.
    pub kind: DrugKind,
    /// Ingredient rows, by reference.
    pub ingredients: Vec<IngredientUse>,
    /// Assigned effects, by reference.
    #[serde(default)]
    pub effects: BTreeSet<EffectName>,
    /// User-entered sell price; `None` until the player decides on one.
    #[serde(default)]
    pub sell_price: Option<Decimal>,
    /// Free-form notes.
    #[serde(default)]
    pub notes: String,
    /// Pinned in list views.
    #[serde(default)]
    pub favorite: bool,
}

/// In-memory snapshot of all three collections.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub ingredients: Vec<Ingredient>,
    pub effects: Vec<Effect>,
    pub drugs: Vec<Drug>,
}

/// Ingredient price lookup consumed by the calculation engine.
pub type PriceTable = BTreeMap<IngredientName, Decimal>;

/// Build a price lookup from the current ingredient collection.
pub fn price_table(ingredients: &[Ingredient]) -> PriceTable {
    ingredients
        .iter()
        .map(|i| (i.name.clone(), i.unit_price))
        .collect()
}

/// Validation errors for domain invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Entity keys must be non-empty.
    #[error("name must not be empty")]
    EmptyName,
    /// Price must be non-negative.
    #[error("negative monetary value is invalid")]
    NegativeMoney,
    /// Recipe rows must consume at least one unit.
    #[error("ingredient quantity must be >= 1 in drug '{0}'")]
    ZeroQuantity(String),
    /// Color must be a "#RRGGBB" hex string.
    #[error("invalid color '{0}', expected #RRGGBB")]
    BadColor(String),
    /// Keys are unique within a collection.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    /// A recipe row points at an ingredient that is not in the collection.
    #[error("drug '{drug}' references unknown ingredient '{ingredient}'")]
    UnknownIngredient { drug: String, ingredient: String },
    /// A recipe points at an effect that is not in the collection.
    #[error("drug '{drug}' references unknown effect '{effect}'")]
    UnknownEffect { drug: String, effect: String },
}

/// Validate a single ingredient.
pub fn validate_ingredient(i: &Ingredient) -> Result<(), ValidationError> {
    if i.name.0.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if i.unit_price < Decimal::ZERO {
        return Err(ValidationError::NegativeMoney);
    }
    Ok(())
}

/// Validate a single effect, including its color hint.
pub fn validate_effect(e: &Effect) -> Result<(), ValidationError> {
    if e.name.0.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if !is_hex_color(&e.color) {
        return Err(ValidationError::BadColor(e.color.clone()));
    }
    Ok(())
}

fn is_hex_color(s: &str) -> bool {
    let Some(hex) = s.strip_prefix('#') else {
        return false;
    };
    hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit())
}

/// Validate a single drug's own fields (references are checked by
/// [`validate_ledger`], which has both collections in hand).
pub fn validate_drug(d: &Drug) -> Result<(), ValidationError> {
    if d.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    for u in &d.ingredients {
        if u.ingredient.0.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if u.quantity == 0 {
            return Err(ValidationError::ZeroQuantity(d.name.clone()));
        }
    }
    if let Some(p) = d.sell_price {
        if p < Decimal::ZERO {
            return Err(ValidationError::NegativeMoney);
        }
    }
    Ok(())
}

/// Validate the whole ledger: per-entity invariants, key uniqueness, and
/// resolution of every drug reference. A dangling reference is an error
/// here, never a silent zero downstream.
pub fn validate_ledger(ledger: &Ledger) -> Result<(), ValidationError> {
    let mut ingredient_keys: BTreeSet<&IngredientName> = BTreeSet::new();
    for i in &ledger.ingredients {
        validate_ingredient(i)?;
        if !ingredient_keys.insert(&i.name) {
            return Err(ValidationError::DuplicateKey(i.name.0.clone()));
        }
    }

    let mut effect_keys: BTreeSet<&EffectName> = BTreeSet::new();
    for e in &ledger.effects {
        validate_effect(e)?;
        if !effect_keys.insert(&e.name) {
            return Err(ValidationError::DuplicateKey(e.name.0.clone()));
        }
    }

    let mut drug_keys: BTreeSet<&str> = BTreeSet::new();
    for d in &ledger.drugs {
        validate_drug(d)?;
        if !drug_keys.insert(&d.name) {
            return Err(ValidationError::DuplicateKey(d.name.clone()));
        }
        for u in &d.ingredients {
            if !ingredient_keys.contains(&u.ingredient) {
                return Err(ValidationError::UnknownIngredient {
                    drug: d.name.clone(),
                    ingredient: u.ingredient.0.clone(),
                });
            }
        }
        for e in &d.effects {
            if !effect_keys.contains(e) {
                return Err(ValidationError::UnknownEffect {
                    drug: d.name.clone(),
                    effect: e.0.clone(),
                });
            }
        }
    }
    Ok(())
}
