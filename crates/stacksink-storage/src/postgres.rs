//! PostgreSQL storage backend.
//!
//! Persists the full ingestion data set via `sqlx` with connection pooling.
//! Every update method runs one explicit transaction; canonicality flips
//! happen inside the same transaction as the insert that caused them.
//!
//! # Schema
//! Tables are created on first connect (`CREATE TABLE IF NOT EXISTS`):
//! blocks, microblocks, txs, events, miner_rewards, burnchain_rewards,
//! reward_slot_holders, mempool_txs, names, namespaces, subdomains,
//! attachments, and the append-only `event_observer_requests` raw log.
//!
//! Amount columns are NUMERIC (the chain uses 128-bit amounts); values are
//! bound as strings and cast server-side.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info};

use stacksink_core::error::IngestError;
use stacksink_core::records::{
    BlockUpdate, BnsName, BnsNamespace, BnsSubdomain, DbBlock, DbBurnchainReward, DbEvent,
    DbMempoolTx, DbMicroblock, DbMinerReward, DbRewardSlotHolder, DbTx, DbTxBundle,
    MempoolTxStatus, MicroblockUpdate, RawEventRecord,
};
use stacksink_core::store::IngestStore;

/// Connection options for the Postgres backend.
#[derive(Debug, Clone)]
pub struct PgOptions {
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for PgOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            connect_timeout_secs: 30,
        }
    }
}

/// PostgreSQL-backed ingest store. Cheaply cloneable (wraps a pool).
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

fn db_err(e: sqlx::Error) -> IngestError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            IngestError::StoreConflict(db.to_string())
        }
        _ => IngestError::StoreUnavailable(e.to_string()),
    }
}

impl PgStore {
    /// Connect and initialize the schema.
    pub async fn connect(database_url: &str) -> Result<Self, IngestError> {
        Self::connect_with_options(database_url, PgOptions::default()).await
    }

    pub async fn connect_with_options(
        database_url: &str,
        opts: PgOptions,
    ) -> Result<Self, IngestError> {
        let pool = PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(opts.connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(db_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        info!("PgStore connected and schema initialized");
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), IngestError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS blocks (
                index_block_hash TEXT PRIMARY KEY,
                block_hash TEXT NOT NULL,
                parent_index_block_hash TEXT NOT NULL,
                parent_block_hash TEXT NOT NULL,
                parent_microblock_hash TEXT NOT NULL,
                parent_microblock_sequence INTEGER NOT NULL,
                block_height BIGINT NOT NULL,
                burn_block_time BIGINT NOT NULL,
                burn_block_hash TEXT NOT NULL,
                burn_block_height BIGINT NOT NULL,
                miner_txid TEXT NOT NULL,
                execution_cost JSONB NOT NULL,
                canonical BOOLEAN NOT NULL,
                commit_seq BIGSERIAL
            )",
            "CREATE INDEX IF NOT EXISTS idx_blocks_height ON blocks(block_height)",
            "CREATE INDEX IF NOT EXISTS idx_blocks_parent ON blocks(parent_index_block_hash)",
            "CREATE TABLE IF NOT EXISTS microblocks (
                microblock_hash TEXT NOT NULL,
                parent_index_block_hash TEXT NOT NULL,
                microblock_sequence INTEGER NOT NULL,
                microblock_parent_hash TEXT NOT NULL,
                parent_burn_block_height BIGINT NOT NULL,
                parent_burn_block_hash TEXT NOT NULL,
                parent_burn_block_time BIGINT NOT NULL,
                block_height BIGINT NOT NULL,
                parent_block_height BIGINT NOT NULL,
                parent_block_hash TEXT NOT NULL,
                index_block_hash TEXT NOT NULL,
                block_hash TEXT NOT NULL,
                canonical BOOLEAN NOT NULL,
                microblock_canonical BOOLEAN NOT NULL,
                PRIMARY KEY (microblock_hash, parent_index_block_hash)
            )",
            "CREATE TABLE IF NOT EXISTS txs (
                tx_id TEXT NOT NULL,
                index_block_hash TEXT NOT NULL,
                tx_index INTEGER NOT NULL,
                block_hash TEXT NOT NULL,
                block_height BIGINT NOT NULL,
                burn_block_time BIGINT NOT NULL,
                nonce BIGINT NOT NULL,
                type_id SMALLINT NOT NULL,
                sender_address TEXT NOT NULL,
                sponsor_address TEXT,
                fee NUMERIC NOT NULL,
                anchor_mode SMALLINT NOT NULL,
                post_condition_mode SMALLINT NOT NULL,
                post_conditions BYTEA NOT NULL,
                raw_tx BYTEA NOT NULL,
                payload JSONB NOT NULL,
                microblock_hash TEXT,
                microblock_sequence INTEGER,
                event_count INTEGER NOT NULL,
                canonical BOOLEAN NOT NULL,
                origin_hash_mode SMALLINT NOT NULL,
                status TEXT NOT NULL,
                raw_result TEXT NOT NULL,
                execution_cost JSONB NOT NULL,
                contract_abi JSONB,
                PRIMARY KEY (tx_id, index_block_hash)
            )",
            "CREATE INDEX IF NOT EXISTS idx_txs_block ON txs(index_block_hash)",
            "CREATE TABLE IF NOT EXISTS events (
                id BIGSERIAL PRIMARY KEY,
                event_index INTEGER NOT NULL,
                tx_id TEXT NOT NULL,
                tx_index INTEGER NOT NULL,
                block_height BIGINT NOT NULL,
                canonical BOOLEAN NOT NULL,
                payload JSONB NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_events_tx ON events(tx_id)",
            "CREATE TABLE IF NOT EXISTS miner_rewards (
                id BIGSERIAL PRIMARY KEY,
                block_hash TEXT NOT NULL,
                index_block_hash TEXT NOT NULL,
                from_index_block_hash TEXT NOT NULL,
                mature_block_height BIGINT NOT NULL,
                recipient TEXT NOT NULL,
                coinbase_amount NUMERIC NOT NULL,
                tx_fees_anchored NUMERIC NOT NULL,
                tx_fees_streamed_confirmed NUMERIC NOT NULL,
                tx_fees_streamed_produced NUMERIC NOT NULL,
                canonical BOOLEAN NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_miner_rewards_block ON miner_rewards(index_block_hash)",
            "CREATE TABLE IF NOT EXISTS burnchain_rewards (
                burn_block_hash TEXT NOT NULL,
                burn_block_height BIGINT NOT NULL,
                burn_amount NUMERIC NOT NULL,
                reward_recipient TEXT NOT NULL,
                reward_amount NUMERIC NOT NULL,
                reward_index INTEGER NOT NULL,
                PRIMARY KEY (burn_block_hash, reward_index)
            )",
            "CREATE TABLE IF NOT EXISTS reward_slot_holders (
                burn_block_hash TEXT NOT NULL,
                burn_block_height BIGINT NOT NULL,
                address TEXT NOT NULL,
                slot_index INTEGER NOT NULL,
                PRIMARY KEY (burn_block_hash, slot_index)
            )",
            "CREATE TABLE IF NOT EXISTS mempool_txs (
                tx_id TEXT PRIMARY KEY,
                raw_tx BYTEA NOT NULL,
                type_id SMALLINT NOT NULL,
                nonce BIGINT NOT NULL,
                sender_address TEXT NOT NULL,
                sponsor_address TEXT,
                fee NUMERIC NOT NULL,
                origin_hash_mode SMALLINT NOT NULL,
                payload JSONB NOT NULL,
                receipt_time BIGINT NOT NULL,
                pruned BOOLEAN NOT NULL,
                status TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS names (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                namespace_id TEXT NOT NULL,
                address TEXT NOT NULL,
                registered_at BIGINT NOT NULL,
                expire_block BIGINT NOT NULL,
                zonefile_hash TEXT NOT NULL,
                zonefile TEXT,
                tx_id TEXT NOT NULL,
                status TEXT NOT NULL,
                canonical BOOLEAN NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_names_name ON names(name, namespace_id)",
            "CREATE TABLE IF NOT EXISTS namespaces (
                id BIGSERIAL PRIMARY KEY,
                namespace_id TEXT NOT NULL,
                address TEXT NOT NULL,
                base NUMERIC NOT NULL,
                coeff NUMERIC NOT NULL,
                launched_at BIGINT,
                lifetime BIGINT NOT NULL,
                no_vowel_discount NUMERIC NOT NULL,
                nonalpha_discount NUMERIC NOT NULL,
                ready_block BIGINT NOT NULL,
                reveal_block BIGINT NOT NULL,
                buckets TEXT NOT NULL,
                tx_id TEXT NOT NULL,
                canonical BOOLEAN NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS subdomains (
                id BIGSERIAL PRIMARY KEY,
                fully_qualified_subdomain TEXT NOT NULL,
                namespace_id TEXT NOT NULL,
                name TEXT NOT NULL,
                owner TEXT NOT NULL,
                zonefile TEXT NOT NULL,
                zonefile_hash TEXT NOT NULL,
                block_height BIGINT NOT NULL,
                tx_id TEXT NOT NULL,
                canonical BOOLEAN NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS attachments (
                id BIGSERIAL PRIMARY KEY,
                op TEXT NOT NULL,
                name TEXT NOT NULL,
                namespace TEXT NOT NULL,
                zonefile_hash TEXT NOT NULL,
                zonefile TEXT NOT NULL,
                tx_id TEXT NOT NULL,
                index_block_hash TEXT NOT NULL,
                block_height BIGINT NOT NULL,
                attachment_index INTEGER NOT NULL,
                UNIQUE (zonefile_hash, tx_id, index_block_hash)
            )",
            "CREATE TABLE IF NOT EXISTS event_observer_requests (
                seq BIGSERIAL PRIMARY KEY,
                event_path TEXT NOT NULL,
                payload TEXT NOT NULL
            )",
        ];
        for stmt in statements {
            sqlx::query(stmt).execute(&self.pool).await.map_err(db_err)?;
        }
        debug!("PgStore schema initialized");
        Ok(())
    }
}

// ─── Row helpers ──────────────────────────────────────────────────────────────

fn json_of<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, IngestError> {
    serde_json::to_value(value)
        .map_err(|e| IngestError::StoreUnavailable(format!("serialize row: {e}")))
}

fn status_str<T: serde::Serialize>(value: &T) -> Result<String, IngestError> {
    Ok(json_of(value)?
        .as_str()
        .unwrap_or_default()
        .to_string())
}

/// Flip one block's rows (and everything keyed off its transactions).
async fn set_block_canonical(
    tx: &mut Transaction<'_, Postgres>,
    index_block_hash: &str,
    canonical: bool,
) -> Result<(), IngestError> {
    sqlx::query("UPDATE blocks SET canonical = $2 WHERE index_block_hash = $1")
        .bind(index_block_hash)
        .bind(canonical)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    sqlx::query("UPDATE txs SET canonical = $2 WHERE index_block_hash = $1")
        .bind(index_block_hash)
        .bind(canonical)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    sqlx::query("UPDATE microblocks SET canonical = $2 WHERE index_block_hash = $1")
        .bind(index_block_hash)
        .bind(canonical)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    sqlx::query("UPDATE miner_rewards SET canonical = $2 WHERE index_block_hash = $1")
        .bind(index_block_hash)
        .bind(canonical)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    for table in ["events", "names", "namespaces", "subdomains"] {
        let sql = format!(
            "UPDATE {table} SET canonical = $2 WHERE tx_id IN
             (SELECT tx_id FROM txs WHERE index_block_hash = $1)"
        );
        sqlx::query(&sql)
            .bind(index_block_hash)
            .bind(canonical)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
    }
    Ok(())
}

/// Detach a block and all its still-canonical descendants, frontier walk.
async fn detach_branch(
    tx: &mut Transaction<'_, Postgres>,
    index_block_hash: &str,
) -> Result<(), IngestError> {
    let mut frontier = vec![index_block_hash.to_string()];
    while let Some(hash) = frontier.pop() {
        set_block_canonical(tx, &hash, false).await?;
        let rows = sqlx::query(
            "SELECT index_block_hash FROM blocks
             WHERE parent_index_block_hash = $1 AND canonical",
        )
        .bind(&hash)
        .fetch_all(&mut **tx)
        .await
        .map_err(db_err)?;
        frontier.extend(rows.iter().map(|r| r.get::<String, _>("index_block_hash")));
    }
    Ok(())
}

async fn canonical_siblings_at(
    tx: &mut Transaction<'_, Postgres>,
    block_height: u32,
    except: &str,
) -> Result<Vec<String>, IngestError> {
    let rows = sqlx::query(
        "SELECT index_block_hash FROM blocks
         WHERE block_height = $1 AND canonical AND index_block_hash <> $2",
    )
    .bind(i64::from(block_height))
    .bind(except)
    .fetch_all(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(rows.iter().map(|r| r.get("index_block_hash")).collect())
}

/// The reorg algorithm: detach displaced siblings, re-attach the new
/// block's ancestor chain.
async fn resolve_reorg(
    tx: &mut Transaction<'_, Postgres>,
    block: &DbBlock,
) -> Result<(), IngestError> {
    for sibling in canonical_siblings_at(tx, block.block_height, &block.index_block_hash).await? {
        debug!(height = block.block_height, %sibling, "reorg: detaching sibling branch");
        detach_branch(tx, &sibling).await?;
    }

    let mut cursor = block.parent_index_block_hash.clone();
    loop {
        let Some(row) = sqlx::query(
            "SELECT parent_index_block_hash, block_height, canonical
             FROM blocks WHERE index_block_hash = $1",
        )
        .bind(&cursor)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?
        else {
            break;
        };
        if row.get::<bool, _>("canonical") {
            break;
        }
        let height = row.get::<i64, _>("block_height") as u32;
        for displaced in canonical_siblings_at(tx, height, &cursor).await? {
            detach_branch(tx, &displaced).await?;
        }
        set_block_canonical(tx, &cursor, true).await?;
        cursor = row.get("parent_index_block_hash");
    }
    Ok(())
}

async fn insert_tx_bundle(
    tx: &mut Transaction<'_, Postgres>,
    bundle: &DbTxBundle,
) -> Result<(), IngestError> {
    insert_db_tx(tx, &bundle.tx).await?;
    for event in &bundle.events {
        insert_event(tx, event).await?;
    }
    for name in &bundle.names {
        insert_name(tx, name).await?;
    }
    for ns in &bundle.namespaces {
        insert_namespace(tx, ns).await?;
    }
    // A confirmed transaction leaves the mempool.
    sqlx::query("UPDATE mempool_txs SET pruned = TRUE WHERE tx_id = $1")
        .bind(&bundle.tx.tx_id)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    Ok(())
}

async fn insert_db_tx(tx: &mut Transaction<'_, Postgres>, row: &DbTx) -> Result<(), IngestError> {
    sqlx::query(
        "INSERT INTO txs (tx_id, index_block_hash, tx_index, block_hash, block_height,
            burn_block_time, nonce, type_id, sender_address, sponsor_address, fee,
            anchor_mode, post_condition_mode, post_conditions, raw_tx, payload,
            microblock_hash, microblock_sequence, event_count, canonical,
            origin_hash_mode, status, raw_result, execution_cost, contract_abi)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11::NUMERIC, $12, $13, $14,
            $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25)",
    )
    .bind(&row.tx_id)
    .bind(&row.index_block_hash)
    .bind(row.tx_index as i32)
    .bind(&row.block_hash)
    .bind(row.block_height)
    .bind(row.burn_block_time)
    .bind(row.nonce as i64)
    .bind(row.type_id as i16)
    .bind(&row.sender_address)
    .bind(&row.sponsor_address)
    .bind(row.fee.to_string())
    .bind(row.anchor_mode as i16)
    .bind(row.post_condition_mode as i16)
    .bind(&row.post_conditions)
    .bind(&row.raw_tx)
    .bind(json_of(&row.payload)?)
    .bind(&row.microblock_hash)
    .bind(row.microblock_sequence.map(i32::from))
    .bind(row.event_count as i32)
    .bind(row.canonical)
    .bind(i16::from(row.origin_hash_mode))
    .bind(status_str(&row.status)?)
    .bind(&row.raw_result)
    .bind(json_of(&row.execution_cost)?)
    .bind(&row.contract_abi)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn insert_event(tx: &mut Transaction<'_, Postgres>, row: &DbEvent) -> Result<(), IngestError> {
    sqlx::query(
        "INSERT INTO events (event_index, tx_id, tx_index, block_height, canonical, payload)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(row.event_index as i32)
    .bind(&row.tx_id)
    .bind(row.tx_index as i32)
    .bind(row.block_height)
    .bind(row.canonical)
    .bind(json_of(&row.payload)?)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn insert_name(tx: &mut Transaction<'_, Postgres>, row: &BnsName) -> Result<(), IngestError> {
    sqlx::query(
        "INSERT INTO names (name, namespace_id, address, registered_at, expire_block,
            zonefile_hash, zonefile, tx_id, status, canonical)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(&row.name)
    .bind(&row.namespace_id)
    .bind(&row.address)
    .bind(i64::from(row.registered_at))
    .bind(i64::from(row.expire_block))
    .bind(&row.zonefile_hash)
    .bind(&row.zonefile)
    .bind(&row.tx_id)
    .bind(&row.status)
    .bind(row.canonical)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn insert_namespace(
    tx: &mut Transaction<'_, Postgres>,
    row: &BnsNamespace,
) -> Result<(), IngestError> {
    sqlx::query(
        "INSERT INTO namespaces (namespace_id, address, base, coeff, launched_at, lifetime,
            no_vowel_discount, nonalpha_discount, ready_block, reveal_block, buckets,
            tx_id, canonical)
         VALUES ($1, $2, $3::NUMERIC, $4::NUMERIC, $5, $6, $7::NUMERIC, $8::NUMERIC,
            $9, $10, $11, $12, $13)",
    )
    .bind(&row.namespace_id)
    .bind(&row.address)
    .bind(row.base.to_string())
    .bind(row.coeff.to_string())
    .bind(row.launched_at.map(i64::from))
    .bind(i64::from(row.lifetime))
    .bind(row.no_vowel_discount.to_string())
    .bind(row.nonalpha_discount.to_string())
    .bind(i64::from(row.ready_block))
    .bind(i64::from(row.reveal_block))
    .bind(&row.buckets)
    .bind(&row.tx_id)
    .bind(row.canonical)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn insert_subdomain(
    tx: &mut Transaction<'_, Postgres>,
    row: &BnsSubdomain,
) -> Result<(), IngestError> {
    sqlx::query(
        "INSERT INTO subdomains (fully_qualified_subdomain, namespace_id, name, owner,
            zonefile, zonefile_hash, block_height, tx_id, canonical)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(&row.fully_qualified_subdomain)
    .bind(&row.namespace_id)
    .bind(&row.name)
    .bind(&row.owner)
    .bind(&row.zonefile)
    .bind(&row.zonefile_hash)
    .bind(i64::from(row.block_height))
    .bind(&row.tx_id)
    .bind(row.canonical)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn insert_microblock(
    tx: &mut Transaction<'_, Postgres>,
    row: &DbMicroblock,
) -> Result<(), IngestError> {
    sqlx::query(
        "INSERT INTO microblocks (microblock_hash, parent_index_block_hash,
            microblock_sequence, microblock_parent_hash, parent_burn_block_height,
            parent_burn_block_hash, parent_burn_block_time, block_height,
            parent_block_height, parent_block_hash, index_block_hash, block_hash,
            canonical, microblock_canonical)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
         ON CONFLICT (microblock_hash, parent_index_block_hash) DO UPDATE SET
            block_height = EXCLUDED.block_height,
            parent_block_height = EXCLUDED.parent_block_height,
            parent_block_hash = EXCLUDED.parent_block_hash,
            index_block_hash = EXCLUDED.index_block_hash,
            block_hash = EXCLUDED.block_hash,
            canonical = EXCLUDED.canonical,
            microblock_canonical = EXCLUDED.microblock_canonical",
    )
    .bind(&row.microblock_hash)
    .bind(&row.parent_index_block_hash)
    .bind(i32::from(row.microblock_sequence))
    .bind(&row.microblock_parent_hash)
    .bind(i64::from(row.parent_burn_block_height))
    .bind(&row.parent_burn_block_hash)
    .bind(row.parent_burn_block_time)
    .bind(row.block_height)
    .bind(i64::from(row.parent_block_height))
    .bind(&row.parent_block_hash)
    .bind(&row.index_block_hash)
    .bind(&row.block_hash)
    .bind(row.canonical)
    .bind(row.microblock_canonical)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn insert_miner_reward(
    tx: &mut Transaction<'_, Postgres>,
    row: &DbMinerReward,
) -> Result<(), IngestError> {
    sqlx::query(
        "INSERT INTO miner_rewards (block_hash, index_block_hash, from_index_block_hash,
            mature_block_height, recipient, coinbase_amount, tx_fees_anchored,
            tx_fees_streamed_confirmed, tx_fees_streamed_produced, canonical)
         VALUES ($1, $2, $3, $4, $5, $6::NUMERIC, $7::NUMERIC, $8::NUMERIC, $9::NUMERIC, $10)",
    )
    .bind(&row.block_hash)
    .bind(&row.index_block_hash)
    .bind(&row.from_index_block_hash)
    .bind(i64::from(row.mature_block_height))
    .bind(&row.recipient)
    .bind(row.coinbase_amount.to_string())
    .bind(row.tx_fees_anchored.to_string())
    .bind(row.tx_fees_streamed_confirmed.to_string())
    .bind(row.tx_fees_streamed_produced.to_string())
    .bind(row.canonical)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Remove every row a previous delivery of this block inserted.
async fn remove_block_rows(
    tx: &mut Transaction<'_, Postgres>,
    index_block_hash: &str,
) -> Result<(), IngestError> {
    for table in ["events", "names", "namespaces", "subdomains"] {
        let sql = format!(
            "DELETE FROM {table} WHERE tx_id IN
             (SELECT tx_id FROM txs WHERE index_block_hash = $1)"
        );
        sqlx::query(&sql)
            .bind(index_block_hash)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
    }
    sqlx::query("DELETE FROM miner_rewards WHERE index_block_hash = $1")
        .bind(index_block_hash)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    sqlx::query("DELETE FROM txs WHERE index_block_hash = $1")
        .bind(index_block_hash)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    sqlx::query("DELETE FROM blocks WHERE index_block_hash = $1")
        .bind(index_block_hash)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    Ok(())
}

/// Confirm the streamed microblocks this anchor block accepts; orphan the
/// rest of the stream off the same parent.
async fn confirm_microblocks(
    tx: &mut Transaction<'_, Postgres>,
    block: &DbBlock,
) -> Result<(), IngestError> {
    if crate::names_a_microblock(&block.parent_microblock_hash) {
        sqlx::query(
            "UPDATE microblocks SET
                index_block_hash = $1, block_hash = $2, block_height = $3,
                parent_block_height = $4, parent_block_hash = $5,
                microblock_canonical = TRUE, canonical = $6
             WHERE parent_index_block_hash = $7 AND index_block_hash = ''
               AND microblock_sequence <= $8",
        )
        .bind(&block.index_block_hash)
        .bind(&block.block_hash)
        .bind(i64::from(block.block_height))
        .bind(i64::from(block.block_height.saturating_sub(1)))
        .bind(&block.parent_block_hash)
        .bind(block.canonical)
        .bind(&block.parent_index_block_hash)
        .bind(i32::from(block.parent_microblock_sequence))
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    }
    sqlx::query(
        "UPDATE microblocks SET microblock_canonical = FALSE
         WHERE parent_index_block_hash = $1 AND index_block_hash = ''",
    )
    .bind(&block.parent_index_block_hash)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}

// ─── IngestStore impl ─────────────────────────────────────────────────────────

#[async_trait]
impl IngestStore for PgStore {
    async fn update_block(&self, update: BlockUpdate) -> Result<(), IngestError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        remove_block_rows(&mut tx, &update.block.index_block_hash).await?;
        resolve_reorg(&mut tx, &update.block).await?;
        confirm_microblocks(&mut tx, &update.block).await?;

        let block = &update.block;
        sqlx::query(
            "INSERT INTO blocks (index_block_hash, block_hash, parent_index_block_hash,
                parent_block_hash, parent_microblock_hash, parent_microblock_sequence,
                block_height, burn_block_time, burn_block_hash, burn_block_height,
                miner_txid, execution_cost, canonical)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(&block.index_block_hash)
        .bind(&block.block_hash)
        .bind(&block.parent_index_block_hash)
        .bind(&block.parent_block_hash)
        .bind(&block.parent_microblock_hash)
        .bind(i32::from(block.parent_microblock_sequence))
        .bind(i64::from(block.block_height))
        .bind(block.burn_block_time)
        .bind(&block.burn_block_hash)
        .bind(i64::from(block.burn_block_height))
        .bind(&block.miner_txid)
        .bind(json_of(&block.execution_cost)?)
        .bind(block.canonical)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for mb in &update.microblocks {
            insert_microblock(&mut tx, mb).await?;
        }
        for reward in &update.miner_rewards {
            insert_miner_reward(&mut tx, reward).await?;
        }
        for bundle in &update.txs {
            insert_tx_bundle(&mut tx, bundle).await?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn update_microblocks(&self, update: MicroblockUpdate) -> Result<(), IngestError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for mb in &update.microblocks {
            insert_microblock(&mut tx, mb).await?;
        }
        for bundle in &update.txs {
            // A streamed tx may be re-delivered with its anchor block later;
            // the (tx_id, index_block_hash) key keeps both rows distinct,
            // but re-delivery of the same unconfirmed tx is dropped.
            let exists = sqlx::query(
                "SELECT 1 AS one FROM txs WHERE tx_id = $1 AND index_block_hash = ''",
            )
            .bind(&bundle.tx.tx_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
            if exists.is_none() {
                insert_tx_bundle(&mut tx, bundle).await?;
            }
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn update_burnchain_rewards(
        &self,
        rewards: Vec<DbBurnchainReward>,
    ) -> Result<(), IngestError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if let Some(first) = rewards.first() {
            sqlx::query("DELETE FROM burnchain_rewards WHERE burn_block_hash = $1")
                .bind(&first.burn_block_hash)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        for reward in &rewards {
            sqlx::query(
                "INSERT INTO burnchain_rewards (burn_block_hash, burn_block_height,
                    burn_amount, reward_recipient, reward_amount, reward_index)
                 VALUES ($1, $2, $3::NUMERIC, $4, $5::NUMERIC, $6)",
            )
            .bind(&reward.burn_block_hash)
            .bind(i64::from(reward.burn_block_height))
            .bind(reward.burn_amount.to_string())
            .bind(&reward.reward_recipient)
            .bind(reward.reward_amount.to_string())
            .bind(reward.reward_index as i32)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn update_reward_slot_holders(
        &self,
        holders: Vec<DbRewardSlotHolder>,
    ) -> Result<(), IngestError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if let Some(first) = holders.first() {
            sqlx::query("DELETE FROM reward_slot_holders WHERE burn_block_hash = $1")
                .bind(&first.burn_block_hash)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        for holder in &holders {
            sqlx::query(
                "INSERT INTO reward_slot_holders (burn_block_hash, burn_block_height,
                    address, slot_index)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(&holder.burn_block_hash)
            .bind(i64::from(holder.burn_block_height))
            .bind(&holder.address)
            .bind(holder.slot_index as i32)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn update_mempool_txs(&self, txs: Vec<DbMempoolTx>) -> Result<(), IngestError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for row in &txs {
            sqlx::query(
                "INSERT INTO mempool_txs (tx_id, raw_tx, type_id, nonce, sender_address,
                    sponsor_address, fee, origin_hash_mode, payload, receipt_time,
                    pruned, status)
                 VALUES ($1, $2, $3, $4, $5, $6, $7::NUMERIC, $8, $9, $10, $11, $12)
                 ON CONFLICT (tx_id) DO NOTHING",
            )
            .bind(&row.tx_id)
            .bind(&row.raw_tx)
            .bind(row.type_id as i16)
            .bind(row.nonce as i64)
            .bind(&row.sender_address)
            .bind(&row.sponsor_address)
            .bind(row.fee.to_string())
            .bind(i16::from(row.origin_hash_mode))
            .bind(json_of(&row.payload)?)
            .bind(row.receipt_time)
            .bind(row.pruned)
            .bind(status_str(&row.status)?)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn drop_mempool_txs(
        &self,
        status: MempoolTxStatus,
        tx_ids: Vec<String>,
    ) -> Result<(), IngestError> {
        sqlx::query(
            "UPDATE mempool_txs SET status = $1, pruned = TRUE WHERE tx_id = ANY($2)",
        )
        .bind(status_str(&status)?)
        .bind(&tx_ids)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_attachments(
        &self,
        attachments: Vec<stacksink_core::records::DbAttachment>,
    ) -> Result<(), IngestError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for attachment in &attachments {
            sqlx::query(
                "INSERT INTO attachments (op, name, namespace, zonefile_hash, zonefile,
                    tx_id, index_block_hash, block_height, attachment_index)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 ON CONFLICT (zonefile_hash, tx_id, index_block_hash) DO NOTHING",
            )
            .bind(&attachment.op)
            .bind(&attachment.name)
            .bind(&attachment.namespace)
            .bind(&attachment.zonefile_hash)
            .bind(&attachment.zonefile)
            .bind(&attachment.tx_id)
            .bind(&attachment.index_block_hash)
            .bind(i64::from(attachment.block_height))
            .bind(attachment.attachment_index as i32)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            for subdomain in &attachment.subdomains {
                insert_subdomain(&mut tx, subdomain).await?;
            }
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn store_raw_event_request(
        &self,
        path: &str,
        payload: &str,
    ) -> Result<u64, IngestError> {
        // Own short-lived connection: never blocks the typed write path.
        let row = sqlx::query(
            "INSERT INTO event_observer_requests (event_path, payload)
             VALUES ($1, $2) RETURNING seq",
        )
        .bind(path)
        .bind(payload)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.get::<i64, _>("seq") as u64)
    }

    async fn raw_event_requests(&self) -> Result<Vec<RawEventRecord>, IngestError> {
        let rows = sqlx::query(
            "SELECT seq, event_path, payload FROM event_observer_requests ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|r| RawEventRecord {
                seq: r.get::<i64, _>("seq") as u64,
                path: r.get("event_path"),
                payload: r.get("payload"),
            })
            .collect())
    }

    async fn prune_raw_event_requests(&self) -> Result<u64, IngestError> {
        let result = sqlx::query("DELETE FROM event_observer_requests")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn is_empty(&self) -> Result<bool, IngestError> {
        let row = sqlx::query(
            "SELECT (SELECT COUNT(*) FROM blocks)
                  + (SELECT COUNT(*) FROM txs)
                  + (SELECT COUNT(*) FROM mempool_txs)
                  + (SELECT COUNT(*) FROM event_observer_requests) AS total",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.get::<i64, _>("total") == 0)
    }

    async fn wipe(&self) -> Result<(), IngestError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for table in [
            "events",
            "names",
            "namespaces",
            "subdomains",
            "attachments",
            "miner_rewards",
            "burnchain_rewards",
            "reward_slot_holders",
            "mempool_txs",
            "txs",
            "microblocks",
            "blocks",
            "event_observer_requests",
        ] {
            let sql = format!("TRUNCATE {table} RESTART IDENTITY");
            sqlx::query(&sql).execute(&mut *tx).await.map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }
}
