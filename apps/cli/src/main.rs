#![deny(warnings)]

//! Headless CLI: opens (or seeds) a recipe store, validates the ledger,
//! and prints cost/profit figures for every recipe.

use anyhow::Result;
use recipe_core::*;
use recipe_store::RecipeStore;
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

struct Args {
    dir: String,
    seed: bool,
    version: bool,
}

fn parse_args() -> Args {
    let mut args = Args {
        dir: "./data".to_string(),
        seed: false,
        version: false,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--dir" => {
                if let Some(d) = it.next() {
                    args.dir = d;
                }
            }
            "--seed" => args.seed = true,
            "--version" => args.version = true,
            _ => {}
        }
    }
    args
}

/// Seed a small starter ledger so there is something to look at.
fn seed_store(store: &mut RecipeStore) -> Result<()> {
    for (name, cents) in [("Baking Soda", 200), ("Cuke", 150), ("Banana", 120)] {
        store.upsert_ingredient(Ingredient {
            name: IngredientName(name.to_string()),
            unit_price: Decimal::new(cents, 2),
        })?;
    }
    store.upsert_effect(Effect {
        name: EffectName("Energizing".to_string()),
        description: "Moves faster".to_string(),
        color: "#9AFE2E".to_string(),
    })?;
    store.upsert_drug(Drug {
        name: "Test Batch".to_string(),
        kind: DrugKind::Meth,
        ingredients: vec![
            IngredientUse {
                ingredient: IngredientName("Baking Soda".to_string()),
                quantity: 3,
            },
            IngredientUse {
                ingredient: IngredientName("Cuke".to_string()),
                quantity: 1,
            },
        ],
        effects: [EffectName("Energizing".to_string())].into_iter().collect(),
        sell_price: Some(Decimal::new(1500, 2)),
        notes: String::new(),
        favorite: true,
    })?;
    store.save_all()?;
    Ok(())
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();

    let args = parse_args();
    if args.version {
        println!(
            "recipe-ledger {} ({} {})",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_SHA"),
            env!("BUILD_DATE")
        );
        return Ok(());
    }
    info!(dir = %args.dir, seed = args.seed, "starting CLI");

    let mut store = RecipeStore::open(&args.dir)?;
    if args.seed {
        seed_store(&mut store)?;
    }

    // open() already validated the ledger at the load boundary
    let prices = store.prices();

    for drug in store.drugs() {
        let cost = recipe_calc::recipe_cost(drug, &prices)?;
        let margin = recipe_calc::profit_margin(drug.sell_price, cost);
        let margin_s = match margin {
            Some(m) => format!("{:.1}%", m * Decimal::new(100, 0)),
            None => "n/a".to_string(),
        };
        let sell_s = match drug.sell_price {
            Some(p) => format!("${p}"),
            None => "unset".to_string(),
        };
        println!(
            "{} [{}] | cost: ${} | sell: {} | margin: {}{}",
            drug.name,
            drug.kind.as_str(),
            cost,
            sell_s,
            margin_s,
            if drug.favorite { " | *" } else { "" }
        );
    }

    println!(
        "Ledger OK | ingredients: {} | effects: {} | drugs: {}",
        store.ingredients().len(),
        store.effects().len(),
        store.drugs().len()
    );

    Ok(())
}
