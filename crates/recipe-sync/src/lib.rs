#![deny(warnings)]

//! Client for the shared online recipe database.
//!
//! The remote service is consumed through the [`RemoteDb`] port so tests
//! (and an offline mode) can substitute an in-memory implementation;
//! [`HttpRemote`] is the production implementation over HTTP/JSON.
//!
//! Submitted drugs travel as denormalized snapshots ([`RemoteDrug`]): the
//! recipe plus self-contained copies of its referenced ingredients and
//! effects, so the remote record is immune to later local edits. Each
//! operation is a single request; callers issue requests for the same
//! entity sequentially and may drop a pending future without leaving
//! remote state half-applied.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recipe_core::{
    validate_drug, validate_effect, validate_ingredient, Drug, Effect, EffectName, Ingredient,
    IngredientName, IngredientUse, Ledger,
};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Server-assigned identifier of a shared drug record.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RemoteId(pub String);

/// Errors from remote operations. Only [`SyncError::Network`] is safe to
/// retry as-is; the rest need user correction first.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport-level failure (timeout, DNS, connection reset).
    #[error("network error: {0}")]
    Network(String),
    /// Credentials rejected or session expired.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The server refused a submission.
    #[error("submission rejected: {0}")]
    Submit(String),
    /// The server refused a vote (e.g. already voted).
    #[error("vote rejected: {0}")]
    Vote(String),
    /// No remote record with that id.
    #[error("remote drug not found: {0}")]
    NotFound(String),
    /// The server answered with something we cannot decode.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// A snapshot or import referenced an entity that does not exist.
    #[error("dangling reference: {0}")]
    Dangling(String),
    /// The on-disk session cache could not be read or written.
    #[error("session cache: {0}")]
    SessionCache(String),
}

impl SyncError {
    /// Whether a caller may retry the same call without changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network(_))
    }
}

/// An authenticated session with the remote service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Stable user id assigned by the service.
    pub user_id: String,
    pub email: String,
    /// Public handle shown on shared recipes; set via `set_username`.
    #[serde(default)]
    pub username: Option<String>,
    /// Bearer token for authenticated calls.
    pub token: String,
}

const SESSION_FILE: &str = "session.json";

impl Session {
    /// Persist the session so the user stays signed in across runs.
    pub fn save_to<P: AsRef<Path>>(&self, dir: P) -> Result<(), SyncError> {
        let path = dir.as_ref().join(SESSION_FILE);
        let json =
            serde_json::to_string_pretty(self).map_err(|e| SyncError::SessionCache(e.to_string()))?;
        fs::write(&path, json).map_err(|e| SyncError::SessionCache(e.to_string()))
    }

    /// Load a cached session, if any.
    pub fn load_from<P: AsRef<Path>>(dir: P) -> Result<Option<Session>, SyncError> {
        let path = dir.as_ref().join(SESSION_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SyncError::SessionCache(e.to_string())),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| SyncError::SessionCache(e.to_string()))
    }

    /// Drop the cached session (sign-out).
    pub fn clear<P: AsRef<Path>>(dir: P) -> Result<(), SyncError> {
        let path = dir.as_ref().join(SESSION_FILE);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::SessionCache(e.to_string())),
        }
    }
}

/// Self-contained ingredient row inside a shared record: reference,
/// quantity, and the unit price at submission time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteIngredient {
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

/// Self-contained effect copy inside a shared record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteEffect {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_remote_color")]
    pub color: String,
}

fn default_remote_color() -> String {
    "#FFFFFF".to_string()
}

/// A drug as it travels over the wire: the recipe plus denormalized
/// snapshots of everything it references, submitter identity, and rating.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteDrug {
    /// Present on records fetched from the server, absent on submission.
    #[serde(default)]
    pub id: Option<RemoteId>,
    pub name: String,
    pub kind: recipe_core::DrugKind,
    #[serde(default)]
    pub sell_price: Option<Decimal>,
    #[serde(default)]
    pub notes: String,
    pub ingredients: Vec<RemoteIngredient>,
    #[serde(default)]
    pub effects: Vec<RemoteEffect>,
    #[serde(default)]
    pub submitted_by: Option<String>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub upvotes: u64,
}

/// Build the denormalized snapshot of a local drug for submission.
///
/// Fails with [`SyncError::Dangling`] if any referenced ingredient or
/// effect is missing from the ledger.
pub fn snapshot(drug: &Drug, ledger: &Ledger) -> Result<RemoteDrug, SyncError> {
    let mut ingredients = Vec::with_capacity(drug.ingredients.len());
    for row in &drug.ingredients {
        let ing = ledger
            .ingredients
            .iter()
            .find(|i| i.name == row.ingredient)
            .ok_or_else(|| SyncError::Dangling(row.ingredient.0.clone()))?;
        ingredients.push(RemoteIngredient {
            name: ing.name.0.clone(),
            quantity: row.quantity,
            unit_price: ing.unit_price,
        });
    }
    let mut effects = Vec::with_capacity(drug.effects.len());
    for name in &drug.effects {
        let eff = ledger
            .effects
            .iter()
            .find(|e| &e.name == name)
            .ok_or_else(|| SyncError::Dangling(name.0.clone()))?;
        effects.push(RemoteEffect {
            name: eff.name.0.clone(),
            description: eff.description.clone(),
            color: eff.color.clone(),
        });
    }
    Ok(RemoteDrug {
        id: None,
        name: drug.name.clone(),
        kind: drug.kind,
        sell_price: drug.sell_price,
        notes: drug.notes.clone(),
        ingredients,
        effects,
        submitted_by: None,
        submitted_at: Some(Utc::now()),
        upvotes: 0,
    })
}

/// What happened during an import.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImportReport {
    /// Ingredients that did not exist locally and were created.
    pub created_ingredients: Vec<IngredientName>,
    /// Effects that did not exist locally and were created.
    pub created_effects: Vec<EffectName>,
    /// Name collisions where the local unit price was kept.
    pub price_conflicts: Vec<PriceConflict>,
    /// Effect name collisions where the local attributes were kept.
    pub effect_conflicts: Vec<EffectName>,
    /// A local drug of the same name was overwritten.
    pub replaced_drug: bool,
}

/// A remote ingredient whose name matched a local one at a different price.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceConflict {
    pub ingredient: IngredientName,
    pub local_price: Decimal,
    pub remote_price: Decimal,
}

/// Rehydrate a shared record into the local entity model.
///
/// Missing ingredients/effects are created from the snapshot. On a name
/// collision with different attributes the LOCAL values win and the
/// collision is recorded in the report; the imported drug always ends up
/// referencing the local entity. The report makes the merge auditable so
/// a remote record never silently overwrites a local price.
///
/// All-or-nothing: creations are staged and the whole record is validated
/// first, so a malformed snapshot leaves the ledger exactly as it was.
pub fn import_to_local(remote: &RemoteDrug, ledger: &mut Ledger) -> Result<(Drug, ImportReport), SyncError> {
    let invalid = |e: recipe_core::ValidationError| SyncError::InvalidResponse(e.to_string());
    let mut report = ImportReport::default();
    let mut new_ingredients: Vec<Ingredient> = Vec::new();
    let mut new_effects: Vec<Effect> = Vec::new();

    let mut uses = Vec::with_capacity(remote.ingredients.len());
    for row in &remote.ingredients {
        let name = IngredientName(row.name.clone());
        match ledger.ingredients.iter().find(|i| i.name == name) {
            Some(local) => {
                if local.unit_price != row.unit_price {
                    report.price_conflicts.push(PriceConflict {
                        ingredient: name.clone(),
                        local_price: local.unit_price,
                        remote_price: row.unit_price,
                    });
                }
            }
            None => {
                let created = Ingredient {
                    name: name.clone(),
                    unit_price: row.unit_price,
                };
                validate_ingredient(&created).map_err(invalid)?;
                new_ingredients.push(created);
                report.created_ingredients.push(name.clone());
            }
        }
        uses.push(IngredientUse {
            ingredient: name,
            quantity: row.quantity,
        });
    }

    let mut effect_refs = BTreeSet::new();
    for row in &remote.effects {
        let name = EffectName(row.name.clone());
        match ledger.effects.iter().find(|e| e.name == name) {
            Some(local) => {
                if local.description != row.description || local.color != row.color {
                    report.effect_conflicts.push(name.clone());
                }
            }
            None => {
                let created = Effect {
                    name: name.clone(),
                    description: row.description.clone(),
                    color: row.color.clone(),
                };
                validate_effect(&created).map_err(invalid)?;
                new_effects.push(created);
                report.created_effects.push(name.clone());
            }
        }
        effect_refs.insert(name);
    }

    let drug = Drug {
        name: remote.name.clone(),
        kind: remote.kind,
        ingredients: uses,
        effects: effect_refs,
        sell_price: remote.sell_price,
        notes: remote.notes.clone(),
        favorite: false,
    };
    // reject malformed remote data at the boundary, before any mutation
    validate_drug(&drug).map_err(invalid)?;

    ledger.ingredients.append(&mut new_ingredients);
    ledger.effects.append(&mut new_effects);
    match ledger.drugs.iter_mut().find(|d| d.name == drug.name) {
        Some(slot) => {
            *slot = drug.clone();
            report.replaced_drug = true;
        }
        None => ledger.drugs.push(drug.clone()),
    }
    info!(drug = %drug.name, created_ingredients = report.created_ingredients.len(),
          price_conflicts = report.price_conflicts.len(), "imported remote drug");
    Ok((drug, report))
}

/// Port to the shared database. One method per remote operation; every
/// method is a single atomic request.
#[async_trait]
pub trait RemoteDb {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, SyncError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, SyncError>;
    /// Set or change the public handle attached to future submissions.
    async fn set_username(&self, session: &Session, username: &str) -> Result<(), SyncError>;
    /// Share a drug snapshot; returns the server-assigned id.
    async fn submit(&self, session: &Session, drug: &RemoteDrug) -> Result<RemoteId, SyncError>;
    /// Browse shared drugs. Ordering is server-defined; `filter` is an
    /// optional free-text search over name/kind/creator.
    async fn list_community(&self, filter: Option<&str>) -> Result<Vec<RemoteDrug>, SyncError>;
    /// The current user's own submissions.
    async fn list_mine(&self, session: &Session) -> Result<Vec<RemoteDrug>, SyncError>;
    async fn fetch(&self, id: &RemoteId) -> Result<RemoteDrug, SyncError>;
    /// Upvote once per user per drug (enforced server-side); returns the
    /// new vote count.
    async fn upvote(&self, session: &Session, id: &RemoteId) -> Result<u64, SyncError>;
    async fn has_upvoted(&self, session: &Session, id: &RemoteId) -> Result<bool, SyncError>;
    /// Delete one of the current user's own submissions.
    async fn delete_remote(&self, session: &Session, id: &RemoteId) -> Result<(), SyncError>;
}

/// HTTP/JSON implementation of [`RemoteDb`].
#[derive(Clone)]
pub struct HttpRemote {
    http: reqwest::Client,
    base_url: String,
}

/// Default request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Serialize)]
struct CredentialsBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthBody {
    token: String,
    user_id: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Serialize)]
struct UsernameBody<'a> {
    username: &'a str,
}

#[derive(Deserialize)]
struct SubmitBody {
    id: RemoteId,
}

#[derive(Deserialize)]
struct UpvoteBody {
    upvotes: u64,
}

#[derive(Deserialize)]
struct UpvotedBody {
    upvoted: bool,
}

impl HttpRemote {
    pub fn new(base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn auth_request(&self, path: &str, email: &str, password: &str) -> Result<Session, SyncError> {
        let response = self
            .http
            .post(self.url(path))
            .json(&CredentialsBody { email, password })
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        if !response.status().is_success() {
            // any refusal on the auth endpoints is an auth problem
            return Err(SyncError::Auth(read_error_text(response).await));
        }
        let body: AuthBody = response
            .json()
            .await
            .map_err(|e| SyncError::InvalidResponse(e.to_string()))?;
        Ok(Session {
            user_id: body.user_id,
            email: email.to_string(),
            username: body.username,
            token: body.token,
        })
    }
}

async fn read_error_text(response: reqwest::Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(text) if !text.is_empty() => text,
        _ => status.to_string(),
    }
}

/// Map a non-success status to the right error kind for an operation.
async fn status_error(
    response: reqwest::Response,
    on_refusal: fn(String) -> SyncError,
) -> SyncError {
    match response.status() {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SyncError::Auth(read_error_text(response).await)
        }
        StatusCode::NOT_FOUND => SyncError::NotFound(read_error_text(response).await),
        _ => on_refusal(read_error_text(response).await),
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, SyncError> {
    response
        .json()
        .await
        .map_err(|e| SyncError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl RemoteDb for HttpRemote {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, SyncError> {
        self.auth_request("/auth/signup", email, password).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, SyncError> {
        self.auth_request("/auth/signin", email, password).await
    }

    async fn set_username(&self, session: &Session, username: &str) -> Result<(), SyncError> {
        let response = self
            .http
            .put(self.url("/users/username"))
            .bearer_auth(&session.token)
            .json(&UsernameBody { username })
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(status_error(response, SyncError::Submit).await);
        }
        Ok(())
    }

    async fn submit(&self, session: &Session, drug: &RemoteDrug) -> Result<RemoteId, SyncError> {
        let response = self
            .http
            .post(self.url("/drugs"))
            .bearer_auth(&session.token)
            .json(drug)
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(status_error(response, SyncError::Submit).await);
        }
        let body: SubmitBody = decode(response).await?;
        info!(drug = %drug.name, id = %body.id.0, "submitted drug");
        Ok(body.id)
    }

    async fn list_community(&self, filter: Option<&str>) -> Result<Vec<RemoteDrug>, SyncError> {
        let mut request = self.http.get(self.url("/drugs"));
        if let Some(q) = filter {
            request = request.query(&[("q", q)]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(status_error(response, SyncError::InvalidResponse).await);
        }
        decode(response).await
    }

    async fn list_mine(&self, session: &Session) -> Result<Vec<RemoteDrug>, SyncError> {
        let response = self
            .http
            .get(self.url("/drugs/mine"))
            .bearer_auth(&session.token)
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(status_error(response, SyncError::InvalidResponse).await);
        }
        decode(response).await
    }

    async fn fetch(&self, id: &RemoteId) -> Result<RemoteDrug, SyncError> {
        let response = self
            .http
            .get(self.url(&format!("/drugs/{}", id.0)))
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(status_error(response, SyncError::InvalidResponse).await);
        }
        decode(response).await
    }

    async fn upvote(&self, session: &Session, id: &RemoteId) -> Result<u64, SyncError> {
        let response = self
            .http
            .post(self.url(&format!("/drugs/{}/upvote", id.0)))
            .bearer_auth(&session.token)
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(status_error(response, SyncError::Vote).await);
        }
        let body: UpvoteBody = decode(response).await?;
        Ok(body.upvotes)
    }

    async fn has_upvoted(&self, session: &Session, id: &RemoteId) -> Result<bool, SyncError> {
        let response = self
            .http
            .get(self.url(&format!("/drugs/{}/upvoted", id.0)))
            .bearer_auth(&session.token)
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(status_error(response, SyncError::Vote).await);
        }
        let body: UpvotedBody = decode(response).await?;
        Ok(body.upvoted)
    }

    async fn delete_remote(&self, session: &Session, id: &RemoteId) -> Result<(), SyncError> {
        let response = self
            .http
            .delete(self.url(&format!("/drugs/{}", id.0)))
            .bearer_auth(&session.token)
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(status_error(response, SyncError::Submit).await);
        }
        Ok(())
    }
}
