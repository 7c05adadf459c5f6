//! relay-repository
//!
//! Talks to the database side of the relay: opens pooled connections, invokes
//! the `get_next_events` stored procedure inside a caller-supplied
//! transaction, and hands the two returned blobs to the decoder.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use relay_config::DatasourceConfig;
use relay_model::{Record, RowSet, Task};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};

/// Overrides `datasource.password` from the YAML config: an operator can
/// leave the field empty in the committed config and supply the real
/// password via this env var (typically populated from `.env.local` by the
/// daemon's `dotenvy` bootstrap) instead.
pub const ENV_DATASOURCE_PASSWORD: &str = "RELAY_DATASOURCE_PASSWORD";

/// Abstraction over the database-side collaborator so `relay-service` can be
/// exercised against an in-memory fake in tests.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_records(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        task: &Task,
    ) -> anyhow::Result<Vec<Record>>;
}

pub async fn connect(cfg: &DatasourceConfig) -> anyhow::Result<PgPool> {
    let pool_cfg = &cfg.connection_pool;
    let options = connect_options(cfg).context("repository - building connect options failed")?;
    PgPoolOptions::new()
        .max_connections(pool_cfg.max_open_conns.max(1))
        .min_connections(pool_cfg.max_idle_conns)
        .max_lifetime(non_zero_duration(pool_cfg.max_life_time))
        .idle_timeout(non_zero_duration(pool_cfg.max_idle_time))
        .connect_with(options)
        .await
        .context("repository - connect failed")
}

/// Parse `datasource.url` and layer `username`/`password` on top of it, so
/// that a bare host/schema URL plus separately-configured credentials (the
/// shape SPEC_FULL §6/§10.3 document) works the same way the teacher's own
/// `makeDatabaseURL(username, password, url)` does. `password` prefers the
/// `RELAY_DATASOURCE_PASSWORD` env var over the YAML value, so an operator
/// can leave `datasource.password` empty and supply it via `.env.local`.
fn connect_options(cfg: &DatasourceConfig) -> anyhow::Result<PgConnectOptions> {
    let mut options = PgConnectOptions::from_str(&cfg.url)
        .with_context(|| format!("parsing datasource.url {:?}", cfg.url))?;

    if !cfg.username.is_empty() {
        options = options.username(&cfg.username);
    }

    let password = select_password(std::env::var(ENV_DATASOURCE_PASSWORD).ok(), &cfg.password);
    if !password.is_empty() {
        options = options.password(&password);
    }

    Ok(options)
}

/// The env-override-wins decision in isolation: prefer `env_override` (the
/// `RELAY_DATASOURCE_PASSWORD` lookup) when present, falling back to the
/// YAML-configured password otherwise.
fn select_password(env_override: Option<String>, cfg_password: &str) -> String {
    env_override.unwrap_or_else(|| cfg_password.to_string())
}

fn non_zero_duration(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

/// The Postgres rendition of the stored procedure call. `schema` is the
/// operator-configured schema the function lives in; it is interpolated
/// (identifiers cannot be bind parameters), the six task-derived values are
/// bound normally.
pub struct PgRepository {
    schema: String,
}

impl PgRepository {
    pub fn new(schema: impl Into<String>) -> Self {
        PgRepository { schema: schema.into() }
    }

    fn query(&self) -> String {
        format!(
            "select upd_rows_dump, upd_rows_count, del_rows_dump, del_rows_count \
             from {}.get_next_events($1, $2, $3, $4, $5, $6)",
            self.schema
        )
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn get_records(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        task: &Task,
    ) -> anyhow::Result<Vec<Record>> {
        let row: PgRow = sqlx::query(&self.query())
            .bind(&task.group_id)
            .bind(task.part_id)
            .bind(task.batch_size)
            .bind(&task.query.columns)
            .bind(&task.query.from)
            .bind(&task.query.pk_column)
            .fetch_one(&mut **tx)
            .await
            .context("repository - get records failed")?;

        let updated: Option<Vec<u8>> = row
            .try_get("upd_rows_dump")
            .context("repository - reading upd_rows_dump failed")?;
        let deleted: Option<Vec<u8>> = row
            .try_get("del_rows_dump")
            .context("repository - reading del_rows_dump failed")?;

        decode_rowset(RowSet { updated, deleted })
    }
}

/// Decode a `RowSet`'s two blobs and concatenate them, updates first.
/// Shared by the real Postgres repository and anything that wants to exercise
/// the decode+concat step directly.
pub fn decode_rowset(rowset: RowSet) -> anyhow::Result<Vec<Record>> {
    let mut records = relay_decoder::decode(rowset.updated.as_deref())
        .map_err(anyhow::Error::from)
        .context("repository - decoding updated row-set failed")?;
    let mut deleted = relay_decoder::decode(rowset.deleted.as_deref())
        .map_err(anyhow::Error::from)
        .context("repository - decoding deleted row-set failed")?;
    records.append(&mut deleted);
    Ok(records)
}
