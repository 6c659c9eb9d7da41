use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::error::{AppResult, SubmissionError};
use crate::ledger::models::{
    instruction_id_for_reference, InstructionRecord, NewInstructionRecord, SettlementIntent,
};
use crate::ledger::RecordStore;
use crate::message::PaymentInstruction;
use crate::settlement::client::LedgerClient;

/// Receipt for a submitted settlement intent
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReceipt {
    pub record: InstructionRecord,
    pub transaction_hash: String,
}

/// Turns parsed instructions into pending records and ledger settlement intents.
///
/// The only writer of record creation.
pub struct SettlementSubmitter {
    store: Arc<dyn RecordStore>,
    ledger: Arc<dyn LedgerClient>,
}

impl SettlementSubmitter {
    pub fn new(store: Arc<dyn RecordStore>, ledger: Arc<dyn LedgerClient>) -> Self {
        Self { store, ledger }
    }

    /// Record a pending intent, then submit it to the ledger.
    ///
    /// A ledger failure leaves the record PENDING_SETTLEMENT and is returned to
    /// the caller; the store is never rolled back.
    #[instrument(skip(self, instruction), fields(reference = ?instruction.transaction_reference))]
    pub async fn submit(&self, instruction: &PaymentInstruction) -> AppResult<SubmissionReceipt> {
        let (new_record, intent) = Self::build_intent(instruction)?;

        let record = self.store.insert(new_record).await?;
        info!("📝 Stored pending record {}", record.instruction_id);

        let transaction_hash = match self.ledger.submit_intent(&intent).await {
            Ok(hash) => hash,
            Err(e) => {
                error!(
                    "❌ Ledger submission failed for {}, record left pending: {}",
                    record.instruction_id, e
                );
                return Err(e);
            }
        };

        info!(
            "✓ Settlement intent {} submitted: {}",
            record.instruction_id, transaction_hash
        );

        Ok(SubmissionReceipt {
            record,
            transaction_hash,
        })
    }

    /// Validate required fields and derive the record and ledger intent
    fn build_intent(
        instruction: &PaymentInstruction,
    ) -> Result<(NewInstructionRecord, SettlementIntent), SubmissionError> {
        let reference = instruction
            .transaction_reference
            .clone()
            .filter(|r| !r.is_empty())
            .ok_or(SubmissionError::IncompleteInstruction("transaction_reference"))?;
        let amount = instruction
            .amount
            .ok_or(SubmissionError::IncompleteInstruction("amount"))?;
        let currency = instruction
            .currency
            .clone()
            .ok_or(SubmissionError::IncompleteInstruction("currency"))?;
        let value_date = instruction
            .value_date
            .ok_or(SubmissionError::IncompleteInstruction("value_date"))?;

        let instruction_id = instruction_id_for_reference(&reference)
            .ok_or_else(|| SubmissionError::ReferenceTooLong(reference.clone()))?;

        let intent = SettlementIntent {
            instruction_id: instruction_id.clone(),
            amount,
            currency: currency.clone(),
            value_date,
            ordering_institution: instruction.ordering_institution.clone(),
            beneficiary: instruction.beneficiary.clone(),
        };

        let record = NewInstructionRecord {
            instruction_id,
            transaction_reference: reference,
            expected_amount: amount,
            currency,
            value_date,
        };

        Ok((record, intent))
    }
}
