//! Disambiguation ledger: pending entity choices and their resolutions
//!
//! When planning cannot uniquely pin an entity it mints an opaque
//! `dsk_<random>` token bound to the pending choice, persists it, and
//! surfaces it to the caller (REST: 409). `resolve` writes a durable
//! decision row so later plans for the same `(title_norm, year)` never
//! prompt again.

use namegnome_common::db::{decisions, kv};
use namegnome_common::types::DisambigCandidate;
use namegnome_common::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// A pending (or resolved) disambiguation bound to a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingDisambiguation {
    pub token: String,
    pub scan_id: String,
    /// Decision scope, the media type namespace
    pub scope: String,
    pub field: String,
    pub title_norm: String,
    pub year: Option<i32>,
    pub candidates: Vec<DisambigCandidate>,
    pub suggested: Option<String>,
    pub resolved: bool,
}

fn kv_key(token: &str) -> String {
    format!("disambig:{}", token)
}

fn mint_token() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..16)
        .map(|_| {
            let n: u8 = rng.gen_range(0..16);
            char::from_digit(n as u32, 16).unwrap()
        })
        .collect();
    format!("dsk_{}", suffix)
}

pub struct DisambigLedger<'a> {
    pool: &'a SqlitePool,
}

impl<'a> DisambigLedger<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Mint and persist a pending token.
    pub async fn mint(
        &self,
        scan_id: &str,
        scope: &str,
        field: &str,
        title_norm: &str,
        year: Option<i32>,
        candidates: Vec<DisambigCandidate>,
        suggested: Option<String>,
    ) -> Result<PendingDisambiguation> {
        let pending = PendingDisambiguation {
            token: mint_token(),
            scan_id: scan_id.to_string(),
            scope: scope.to_string(),
            field: field.to_string(),
            title_norm: title_norm.to_string(),
            year,
            candidates,
            suggested,
            resolved: false,
        };

        let value = serde_json::to_value(&pending)
            .map_err(|e| Error::Fatal(format!("pending serialisation: {}", e)))?;
        kv::put(self.pool, &kv_key(&pending.token), &value).await?;

        tracing::info!(
            "Minted disambiguation token {} for '{}' ({} candidates)",
            pending.token,
            pending.title_norm,
            pending.candidates.len()
        );
        Ok(pending)
    }

    /// Look up a token.
    pub async fn get(&self, token: &str) -> Result<Option<PendingDisambiguation>> {
        let Some(value) = kv::get(self.pool, &kv_key(token)).await? else {
            return Ok(None);
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| Error::Fatal(format!("pending deserialisation: {}", e)))
    }

    /// Resolve a token with the chosen candidate id, writing the durable
    /// decision and marking the token resumable.
    pub async fn resolve(&self, token: &str, choice_id: &str) -> Result<PendingDisambiguation> {
        let Some(mut pending) = self.get(token).await? else {
            return Err(Error::Validation(format!("unknown token {}", token)));
        };

        let Some(choice) = pending.candidates.iter().find(|c| c.id == choice_id) else {
            return Err(Error::Validation(format!(
                "choice {} is not among the candidates for {}",
                choice_id, token
            )));
        };

        decisions::put_decision(
            self.pool,
            &pending.scope,
            &pending.title_norm,
            pending.year,
            &choice.provider,
            &choice.id,
        )
        .await?;

        pending.resolved = true;
        let value = serde_json::to_value(&pending)
            .map_err(|e| Error::Fatal(format!("pending serialisation: {}", e)))?;
        kv::put(self.pool, &kv_key(token), &value).await?;

        tracing::info!("Resolved token {} to {}/{}", token, choice.provider, choice.id);
        Ok(pending)
    }
}

/// Persist an explicit `(provider, ext_id)` pin, bypassing the token flow.
pub async fn pin_explicit(
    pool: &SqlitePool,
    scope: &str,
    title_norm: &str,
    year: Option<i32>,
    provider: &str,
    ext_id: &str,
) -> Result<()> {
    decisions::put_decision(pool, scope, title_norm, year, provider, ext_id).await
}
