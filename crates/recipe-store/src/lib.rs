#![deny(warnings)]

//! JSON-file repository for the recipe ledger.
//!
//! One versioned document per entity kind (`ingredients.json`,
//! `effects.json`, `drugs.json`) inside a data directory. Saves go through
//! a temp-file-then-rename so the prior file survives any failed write.
//! The store is the sole owner of the in-memory collections; mutations
//! validate first and leave both memory and disk untouched on error.
//!
//! Deleting an ingredient or effect that a drug still references is
//! refused with [`StoreError::Referenced`] listing every dependent drug.

use recipe_core::{
    price_table, validate_drug, validate_effect, validate_ingredient, validate_ledger, Drug,
    Effect, EffectName, Ingredient, IngredientName, Ledger, PriceTable, ValidationError,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Current on-disk document version.
pub const SCHEMA_VERSION: u32 = 1;

const INGREDIENTS_FILE: &str = "ingredients.json";
const EFFECTS_FILE: &str = "effects.json";
const DRUGS_FILE: &str = "drugs.json";

/// Repository errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Local persistence failure; in-memory state is unchanged.
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The file exists but is not a well-formed document. Never silently
    /// reset to an empty collection.
    #[error("malformed {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// Document written by a newer version of the app.
    #[error("unsupported schema version {found} in {} (latest is {latest})", .path.display())]
    UnsupportedSchema {
        path: PathBuf,
        found: u32,
        latest: u32,
    },
    /// No entity with the given key.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },
    /// Delete blocked: the entity is still referenced by these drugs.
    #[error("{kind} '{name}' is referenced by: {}", .dependents.join(", "))]
    Referenced {
        kind: &'static str,
        name: String,
        dependents: Vec<String>,
    },
    /// The entity failed domain validation; nothing was changed.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Versioned envelope around each persisted collection.
#[derive(Serialize, Deserialize)]
struct Document<T> {
    schema_version: u32,
    entries: Vec<T>,
}

/// The repository: owns the three collections and their data directory.
#[derive(Debug)]
pub struct RecipeStore {
    dir: PathBuf,
    ledger: Ledger,
}

impl RecipeStore {
    /// Open a store over `dir`, loading every kind. A missing file is an
    /// empty collection (first run); a malformed file is an error, and so
    /// is a well-formed one that breaks domain invariants (negative price,
    /// duplicate key, dangling reference) — rejected here at the boundary,
    /// never propagated.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        let ledger = Ledger {
            ingredients: load_kind(&dir.join(INGREDIENTS_FILE))?,
            effects: load_kind(&dir.join(EFFECTS_FILE))?,
            drugs: load_kind(&dir.join(DRUGS_FILE))?,
        };
        validate_ledger(&ledger)?;
        info!(
            dir = %dir.display(),
            ingredients = ledger.ingredients.len(),
            effects = ledger.effects.len(),
            drugs = ledger.drugs.len(),
            "opened store"
        );
        Ok(Self { dir, ledger })
    }

    pub fn ingredients(&self) -> &[Ingredient] {
        &self.ledger.ingredients
    }

    pub fn effects(&self) -> &[Effect] {
        &self.ledger.effects
    }

    pub fn drugs(&self) -> &[Drug] {
        &self.ledger.drugs
    }

    /// Snapshot of all collections (cloned; the store stays the owner).
    pub fn ledger(&self) -> Ledger {
        self.ledger.clone()
    }

    /// Price lookup over the current ingredient collection.
    pub fn prices(&self) -> PriceTable {
        price_table(&self.ledger.ingredients)
    }

    pub fn get_ingredient(&self, name: &IngredientName) -> Option<&Ingredient> {
        self.ledger.ingredients.iter().find(|i| &i.name == name)
    }

    pub fn get_effect(&self, name: &EffectName) -> Option<&Effect> {
        self.ledger.effects.iter().find(|e| &e.name == name)
    }

    pub fn get_drug(&self, name: &str) -> Option<&Drug> {
        self.ledger.drugs.iter().find(|d| d.name == name)
    }

    /// Replace the ingredient with the same key, or append. Exact string
    /// match; last write wins.
    pub fn upsert_ingredient(&mut self, ingredient: Ingredient) -> Result<(), StoreError> {
        validate_ingredient(&ingredient)?;
        upsert_by(&mut self.ledger.ingredients, ingredient, |a, b| {
            a.name == b.name
        });
        Ok(())
    }

    pub fn upsert_effect(&mut self, effect: Effect) -> Result<(), StoreError> {
        validate_effect(&effect)?;
        upsert_by(&mut self.ledger.effects, effect, |a, b| a.name == b.name);
        Ok(())
    }

    /// Upsert a drug. Its references must resolve against the current
    /// collections; a dangling reference is rejected at this boundary.
    pub fn upsert_drug(&mut self, drug: Drug) -> Result<(), StoreError> {
        validate_drug(&drug)?;
        for row in &drug.ingredients {
            if self.get_ingredient(&row.ingredient).is_none() {
                return Err(ValidationError::UnknownIngredient {
                    drug: drug.name.clone(),
                    ingredient: row.ingredient.0.clone(),
                }
                .into());
            }
        }
        for e in &drug.effects {
            if self.get_effect(e).is_none() {
                return Err(ValidationError::UnknownEffect {
                    drug: drug.name.clone(),
                    effect: e.0.clone(),
                }
                .into());
            }
        }
        upsert_by(&mut self.ledger.drugs, drug, |a, b| a.name == b.name);
        Ok(())
    }

    /// Delete an ingredient. Refused while any drug still references it.
    pub fn delete_ingredient(&mut self, name: &IngredientName) -> Result<(), StoreError> {
        let dependents: Vec<String> = self
            .ledger
            .drugs
            .iter()
            .filter(|d| d.ingredients.iter().any(|u| &u.ingredient == name))
            .map(|d| d.name.clone())
            .collect();
        if !dependents.is_empty() {
            return Err(StoreError::Referenced {
                kind: "ingredient",
                name: name.0.clone(),
                dependents,
            });
        }
        remove_by(&mut self.ledger.ingredients, "ingredient", &name.0, |i| {
            &i.name == name
        })
    }

    /// Delete an effect. Refused while any drug still references it.
    pub fn delete_effect(&mut self, name: &EffectName) -> Result<(), StoreError> {
        let dependents: Vec<String> = self
            .ledger
            .drugs
            .iter()
            .filter(|d| d.effects.contains(name))
            .map(|d| d.name.clone())
            .collect();
        if !dependents.is_empty() {
            return Err(StoreError::Referenced {
                kind: "effect",
                name: name.0.clone(),
                dependents,
            });
        }
        remove_by(&mut self.ledger.effects, "effect", &name.0, |e| {
            &e.name == name
        })
    }

    pub fn delete_drug(&mut self, name: &str) -> Result<(), StoreError> {
        remove_by(&mut self.ledger.drugs, "drug", name, |d| d.name == name)
    }

    pub fn save_ingredients(&self) -> Result<(), StoreError> {
        save_kind(&self.dir.join(INGREDIENTS_FILE), &self.ledger.ingredients)
    }

    pub fn save_effects(&self) -> Result<(), StoreError> {
        save_kind(&self.dir.join(EFFECTS_FILE), &self.ledger.effects)
    }

    pub fn save_drugs(&self) -> Result<(), StoreError> {
        save_kind(&self.dir.join(DRUGS_FILE), &self.ledger.drugs)
    }

    /// Persist every kind. Validates the whole ledger first so a dangling
    /// reference never reaches disk.
    pub fn save_all(&self) -> Result<(), StoreError> {
        validate_ledger(&self.ledger)?;
        self.save_ingredients()?;
        self.save_effects()?;
        self.save_drugs()?;
        info!(dir = %self.dir.display(), "saved all collections");
        Ok(())
    }
}

fn upsert_by<T>(items: &mut Vec<T>, item: T, same_key: impl Fn(&T, &T) -> bool) {
    match items.iter_mut().find(|x| same_key(x, &item)) {
        Some(slot) => *slot = item,
        None => items.push(item),
    }
}

fn remove_by<T>(
    items: &mut Vec<T>,
    kind: &'static str,
    name: &str,
    matches: impl Fn(&T) -> bool,
) -> Result<(), StoreError> {
    match items.iter().position(matches) {
        Some(idx) => {
            items.remove(idx);
            debug!(kind, name, "deleted entity");
            Ok(())
        }
        None => Err(StoreError::NotFound {
            kind,
            name: name.to_string(),
        }),
    }
}

fn load_kind<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    let doc: Document<T> = serde_json::from_str(&text).map_err(|e| StoreError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    if doc.schema_version > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchema {
            path: path.to_path_buf(),
            found: doc.schema_version,
            latest: SCHEMA_VERSION,
        });
    }
    Ok(doc.entries)
}

/// Serialize then write-to-temp-and-rename, so either the new document
/// lands in full or the old one is still there.
fn save_kind<T: Serialize + Clone>(path: &Path, entries: &[T]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let doc = Document {
        schema_version: SCHEMA_VERSION,
        entries: entries.to_vec(),
    };
    let json = serde_json::to_string_pretty(&doc).map_err(|e| StoreError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    debug!(path = %path.display(), entries = entries.len(), "wrote document");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn ingredient(name: &str, cents: i64) -> Ingredient {
        Ingredient {
            name: IngredientName(name.to_string()),
            unit_price: Decimal::new(cents, 2),
        }
    }

    fn effect(name: &str) -> Effect {
        Effect {
            name: EffectName(name.to_string()),
            description: String::new(),
            color: "#00FF00".to_string(),
        }
    }

    fn drug(name: &str, rows: &[(&str, u32)], effects: &[&str]) -> Drug {
        Drug {
            name: name.to_string(),
            kind: recipe_core::DrugKind::Meth,
            ingredients: rows
                .iter()
                .map(|(n, q)| recipe_core::IngredientUse {
                    ingredient: IngredientName(n.to_string()),
                    quantity: *q,
                })
                .collect(),
            effects: effects
                .iter()
                .map(|e| EffectName(e.to_string()))
                .collect::<BTreeSet<_>>(),
            sell_price: Some(Decimal::new(1500, 2)),
            notes: String::new(),
            favorite: false,
        }
    }

    fn seeded_store(dir: &Path) -> RecipeStore {
        let mut store = RecipeStore::open(dir).unwrap();
        store.upsert_ingredient(ingredient("Baking Soda", 200)).unwrap();
        store.upsert_effect(effect("Energizing")).unwrap();
        store
            .upsert_drug(drug("Test Batch", &[("Baking Soda", 3)], &["Energizing"]))
            .unwrap();
        store
    }

    #[test]
    fn missing_files_mean_empty_collections() {
        let tmp = tempdir().unwrap();
        let store = RecipeStore::open(tmp.path()).unwrap();
        assert!(store.ingredients().is_empty());
        assert!(store.effects().is_empty());
        assert!(store.drugs().is_empty());
    }

    #[test]
    fn save_then_load_round_trips_every_kind() {
        let tmp = tempdir().unwrap();
        let store = seeded_store(tmp.path());
        store.save_all().unwrap();

        let back = RecipeStore::open(tmp.path()).unwrap();
        assert_eq!(back.ledger(), store.ledger());
    }

    #[test]
    fn upsert_replaces_on_matching_key() {
        let tmp = tempdir().unwrap();
        let mut store = seeded_store(tmp.path());
        store.upsert_ingredient(ingredient("Baking Soda", 350)).unwrap();
        assert_eq!(store.ingredients().len(), 1);
        assert_eq!(
            store
                .get_ingredient(&IngredientName("Baking Soda".to_string()))
                .unwrap()
                .unit_price,
            Decimal::new(350, 2)
        );
    }

    #[test]
    fn upsert_drug_rejects_dangling_references() {
        let tmp = tempdir().unwrap();
        let mut store = seeded_store(tmp.path());
        let err = store
            .upsert_drug(drug("Broken", &[("Ghost Pepper", 1)], &[]))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Invalid(ValidationError::UnknownIngredient { .. })
        ));
        // rejected entity never entered the collection
        assert!(store.get_drug("Broken").is_none());
    }

    #[test]
    fn referenced_delete_is_blocked_with_dependents_listed() {
        let tmp = tempdir().unwrap();
        let mut store = seeded_store(tmp.path());
        store
            .upsert_drug(drug("Second Batch", &[("Baking Soda", 1)], &[]))
            .unwrap();

        let err = store
            .delete_ingredient(&IngredientName("Baking Soda".to_string()))
            .unwrap_err();
        match err {
            StoreError::Referenced { dependents, .. } => {
                assert_eq!(dependents, vec!["Test Batch", "Second Batch"]);
            }
            other => panic!("expected Referenced, got {other:?}"),
        }

        let err = store
            .delete_effect(&EffectName("Energizing".to_string()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Referenced { .. }));

        // after the dependents are gone the delete goes through
        store.delete_drug("Test Batch").unwrap();
        store.delete_drug("Second Batch").unwrap();
        store
            .delete_ingredient(&IngredientName("Baking Soda".to_string()))
            .unwrap();
    }

    #[test]
    fn delete_of_unknown_key_is_not_found() {
        let tmp = tempdir().unwrap();
        let mut store = RecipeStore::open(tmp.path()).unwrap();
        assert!(matches!(
            store.delete_drug("Nope"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn malformed_file_is_an_error_not_a_reset() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("drugs.json"), "{ not json").unwrap();
        assert!(matches!(
            RecipeStore::open(tmp.path()),
            Err(StoreError::Parse { .. })
        ));
    }

    #[test]
    fn domain_invalid_file_is_rejected_at_open() {
        // well-formed JSON, invalid domain: negative price
        let tmp = tempdir().unwrap();
        fs::write(
            tmp.path().join("ingredients.json"),
            r#"{"schema_version": 1, "entries": [{"name": "Salt", "unit_price": "-1.00"}]}"#,
        )
        .unwrap();
        assert!(matches!(
            RecipeStore::open(tmp.path()),
            Err(StoreError::Invalid(ValidationError::NegativeMoney))
        ));

        // a drug referencing an ingredient that is not on disk
        let tmp = tempdir().unwrap();
        fs::write(
            tmp.path().join("drugs.json"),
            r#"{"schema_version": 1, "entries": [{"name": "Orphan", "kind": "Weed",
                "ingredients": [{"ingredient": "Gone", "quantity": 1}]}]}"#,
        )
        .unwrap();
        assert!(matches!(
            RecipeStore::open(tmp.path()),
            Err(StoreError::Invalid(ValidationError::UnknownIngredient { .. }))
        ));
    }

    #[test]
    fn newer_schema_version_is_refused() {
        let tmp = tempdir().unwrap();
        fs::write(
            tmp.path().join("effects.json"),
            r#"{"schema_version": 99, "entries": []}"#,
        )
        .unwrap();
        assert!(matches!(
            RecipeStore::open(tmp.path()),
            Err(StoreError::UnsupportedSchema { found: 99, .. })
        ));
    }

    #[test]
    fn legacy_effect_entries_load_with_defaults() {
        let tmp = tempdir().unwrap();
        fs::write(
            tmp.path().join("effects.json"),
            r#"{"schema_version": 1, "entries": [{"name": "Calming"}]}"#,
        )
        .unwrap();
        let store = RecipeStore::open(tmp.path()).unwrap();
        assert_eq!(store.effects()[0].color, "#FFFFFF");
    }

    #[test]
    fn save_replaces_file_and_leaves_no_temp_behind() {
        let tmp = tempdir().unwrap();
        let mut store = seeded_store(tmp.path());
        store.save_all().unwrap();
        store.upsert_ingredient(ingredient("Salt", 50)).unwrap();
        store.save_ingredients().unwrap();

        assert!(!tmp.path().join("ingredients.json.tmp").exists());
        let back = RecipeStore::open(tmp.path()).unwrap();
        assert_eq!(back.ingredients().len(), 2);
    }

    #[test]
    fn save_all_refuses_a_ledger_with_dangling_refs() {
        let tmp = tempdir().unwrap();
        let mut store = seeded_store(tmp.path());
        store.save_all().unwrap();
        // force an inconsistent ledger the way a bug would: drop the
        // ingredient list behind the drugs' back
        store.ledger.ingredients.clear();
        assert!(matches!(store.save_all(), Err(StoreError::Invalid(_))));
        // prior file still intact
        let back = RecipeStore::open(tmp.path()).unwrap();
        assert_eq!(back.ingredients().len(), 1);
    }
}
