use super::models::*;
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{debug, info};

/// Keyed storage for instruction records - THE source of truth for settlement state
///
/// INVARIANTS:
/// - insert never overwrites an existing record
/// - apply_settlement is a single critical section per instruction id
/// - a terminal record is never written again
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a pending record. Fails with DuplicateKey if the id exists.
    async fn insert(&self, new: NewInstructionRecord) -> Result<InstructionRecord, StoreError>;

    /// Fetch a record by instruction id
    async fn get(&self, instruction_id: &str) -> Result<InstructionRecord, StoreError>;

    /// Fold a settled amount into a pending record.
    ///
    /// Idempotent: a record already in a terminal state is returned unchanged
    /// with `transitioned = false`.
    async fn apply_settlement(
        &self,
        instruction_id: &str,
        onchain_amount: Decimal,
    ) -> Result<SettlementOutcome, StoreError>;
}

const RECORD_COLUMNS: &str = r#"
    instruction_id, transaction_reference, expected_amount, onchain_amount,
    currency, value_date, status, created_at, updated_at
"#;

/// Postgres-backed record store
pub struct PgRecordStore {
    pub pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn insert(&self, new: NewInstructionRecord) -> Result<InstructionRecord, StoreError> {
        let instruction_id = new.instruction_id.clone();

        let record = sqlx::query_as::<_, InstructionRecord>(&format!(
            r#"
            INSERT INTO instruction_records (
                instruction_id, transaction_reference, expected_amount,
                currency, value_date, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            ON CONFLICT (instruction_id) DO NOTHING
            RETURNING {}
            "#,
            RECORD_COLUMNS
        ))
        .bind(new.instruction_id)
        .bind(new.transaction_reference)
        .bind(new.expected_amount)
        .bind(new.currency)
        .bind(new.value_date)
        .bind(SettlementStatus::PendingSettlement)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::DuplicateKey(instruction_id.clone()))?;

        info!("Stored pending record {}", instruction_id);
        Ok(record)
    }

    async fn get(&self, instruction_id: &str) -> Result<InstructionRecord, StoreError> {
        sqlx::query_as::<_, InstructionRecord>(&format!(
            "SELECT {} FROM instruction_records WHERE instruction_id = $1",
            RECORD_COLUMNS
        ))
        .bind(instruction_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(instruction_id.to_string()))
    }

    async fn apply_settlement(
        &self,
        instruction_id: &str,
        onchain_amount: Decimal,
    ) -> Result<SettlementOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Row lock makes read-compare-write a single critical section per key
        let mut record = sqlx::query_as::<_, InstructionRecord>(&format!(
            "SELECT {} FROM instruction_records WHERE instruction_id = $1 FOR UPDATE",
            RECORD_COLUMNS
        ))
        .bind(instruction_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(instruction_id.to_string()))?;

        if !record.settle(onchain_amount, Utc::now()) {
            tx.rollback().await?;
            debug!("Record {} already {}, settlement ignored", instruction_id, record.status);
            return Ok(SettlementOutcome {
                record,
                transitioned: false,
            });
        }

        sqlx::query(
            r#"
            UPDATE instruction_records
            SET onchain_amount = $2, status = $3, updated_at = $4
            WHERE instruction_id = $1 AND status = $5
            "#,
        )
        .bind(instruction_id)
        .bind(record.onchain_amount)
        .bind(record.status)
        .bind(record.updated_at)
        .bind(SettlementStatus::PendingSettlement)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(SettlementOutcome {
            record,
            transitioned: true,
        })
    }
}

/// In-memory record store with the same contract as the Postgres store
pub struct InMemoryRecordStore {
    records: tokio::sync::RwLock<HashMap<String, InstructionRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert(&self, new: NewInstructionRecord) -> Result<InstructionRecord, StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&new.instruction_id) {
            return Err(StoreError::DuplicateKey(new.instruction_id));
        }

        let record = InstructionRecord::pending(new, Utc::now());
        records.insert(record.instruction_id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, instruction_id: &str) -> Result<InstructionRecord, StoreError> {
        let records = self.records.read().await;
        records
            .get(instruction_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(instruction_id.to_string()))
    }

    async fn apply_settlement(
        &self,
        instruction_id: &str,
        onchain_amount: Decimal,
    ) -> Result<SettlementOutcome, StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(instruction_id)
            .ok_or_else(|| StoreError::NotFound(instruction_id.to_string()))?;

        let transitioned = record.settle(onchain_amount, Utc::now());

        Ok(SettlementOutcome {
            record: record.clone(),
            transitioned,
        })
    }
}
