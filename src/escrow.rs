use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::Settings;
use crate::error::EngineError;
use crate::models::PaymentMethod;

fn fee_cents(amount_cents: i64, bps: i64) -> Result<i64, EngineError> {
    amount_cents
        .checked_mul(bps)
        .map(|v| v / 10_000)
        .ok_or_else(|| EngineError::Validation("funding amount is too large".to_string()))
}

/// One accepted `fund` call, fees itemized separately from the escrowed
/// amount.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FundReceipt {
    pub idempotency_key: String,
    pub amount_cents: i64,
    pub payment_method: PaymentMethod,
    pub platform_fee_cents: i64,
    pub processing_fee_cents: i64,
    pub total_charged_cents: i64,
    pub at: DateTime<Utc>,
}

/// Per-project escrow balances. `released` only ever moves through the
/// milestone engine, so `released <= funded` holds by construction.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Ledger {
    pub funded_cents: i64,
    pub released_cents: i64,
    pub receipts: Vec<FundReceipt>,
    #[serde(skip)]
    applied_keys: HashMap<String, usize>,
}

impl Ledger {
    pub fn pending_cents(&self) -> i64 {
        self.funded_cents - self.released_cents
    }

    /// Escrows `amount_cents`. A replayed idempotency key returns the
    /// original receipt without touching the balances, so client
    /// retries never double-charge.
    pub fn fund(
        &mut self,
        amount_cents: i64,
        payment_method: PaymentMethod,
        terms_accepted: bool,
        idempotency_key: &str,
        settings: &Settings,
    ) -> Result<FundReceipt, EngineError> {
        if !terms_accepted {
            return Err(EngineError::Validation(
                "terms must be accepted before funding".to_string(),
            ));
        }
        if amount_cents <= 0 {
            return Err(EngineError::Validation(
                "funding amount must be positive".to_string(),
            ));
        }
        if idempotency_key.is_empty() {
            return Err(EngineError::Validation(
                "idempotency key is required".to_string(),
            ));
        }

        if let Some(&idx) = self.applied_keys.get(idempotency_key) {
            let original = &self.receipts[idx];
            // A retry must carry the same parameters; anything else is
            // a client bug, not a replay.
            if original.amount_cents != amount_cents || original.payment_method != payment_method {
                return Err(EngineError::Validation(
                    "idempotency key was already used with different parameters".to_string(),
                ));
            }
            return Ok(original.clone());
        }

        let platform_fee_cents = fee_cents(amount_cents, settings.platform_fee_bps)?;
        let processing_bps = match payment_method {
            PaymentMethod::Card => settings.card_fee_bps,
            PaymentMethod::BankTransfer => 0,
        };
        let processing_fee_cents = fee_cents(amount_cents, processing_bps)?;

        let too_large = || EngineError::Validation("funding amount is too large".to_string());
        let total_charged_cents = amount_cents
            .checked_add(platform_fee_cents)
            .and_then(|v| v.checked_add(processing_fee_cents))
            .ok_or_else(too_large)?;
        let funded_cents = self
            .funded_cents
            .checked_add(amount_cents)
            .ok_or_else(too_large)?;

        let receipt = FundReceipt {
            idempotency_key: idempotency_key.to_string(),
            amount_cents,
            payment_method,
            platform_fee_cents,
            processing_fee_cents,
            total_charged_cents,
            at: Utc::now(),
        };

        self.funded_cents = funded_cents;
        self.applied_keys
            .insert(idempotency_key.to_string(), self.receipts.len());
        self.receipts.push(receipt.clone());
        Ok(receipt)
    }

    /// Moves `amount_cents` from pending to released. Only the
    /// milestone engine calls this, on approval.
    pub(crate) fn release(&mut self, amount_cents: i64) -> Result<(), EngineError> {
        if amount_cents > self.pending_cents() {
            return Err(EngineError::InsufficientFunds {
                requested_cents: amount_cents,
                pending_cents: self.pending_cents(),
            });
        }
        self.released_cents += amount_cents;
        Ok(())
    }
}

impl crate::store::Store {
    /// Escrows funds for a project. Owner-only; retried keys are safe.
    pub fn fund_project(
        &self,
        project_id: &str,
        caller_id: &str,
        amount_cents: i64,
        payment_method: PaymentMethod,
        terms_accepted: bool,
        idempotency_key: &str,
    ) -> Result<FundReceipt, EngineError> {
        let settings = self.settings;
        let mut state = self.state.write().expect("state lock poisoned");
        let owner_id = state
            .projects
            .get(project_id)
            .map(|p| p.owner_id.clone())
            .ok_or(EngineError::NotFound("project"))?;
        if owner_id != caller_id {
            return Err(EngineError::Forbidden(
                "only the project owner can fund it".to_string(),
            ));
        }
        let already_applied = state
            .ledgers
            .get(project_id)
            .map(|l| l.receipts.iter().any(|r| r.idempotency_key == idempotency_key))
            .unwrap_or(false);
        let receipt = state
            .ledgers
            .get_mut(project_id)
            .ok_or(EngineError::NotFound("project"))?
            .fund(amount_cents, payment_method, terms_accepted, idempotency_key, &settings)?;
        if !already_applied {
            state.record(caller_id, "escrow", "funded", &format!("{amount_cents} cents"));
        }
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn fund_itemizes_fees_separately() {
        let mut ledger = Ledger::default();
        let receipt = ledger
            .fund(1_000_000, PaymentMethod::Card, true, "k1", &settings())
            .unwrap();
        assert_eq!(receipt.platform_fee_cents, 10_000); // 1%
        assert_eq!(receipt.processing_fee_cents, 29_000); // 2.9%
        assert_eq!(receipt.total_charged_cents, 1_039_000);
        // Fees are charged on top, not escrowed.
        assert_eq!(ledger.funded_cents, 1_000_000);
    }

    #[test]
    fn bank_transfer_has_no_processing_fee() {
        let mut ledger = Ledger::default();
        let receipt = ledger
            .fund(50_000, PaymentMethod::BankTransfer, true, "k1", &settings())
            .unwrap();
        assert_eq!(receipt.processing_fee_cents, 0);
    }

    #[test]
    fn fund_requires_terms_acceptance() {
        let mut ledger = Ledger::default();
        let err = ledger
            .fund(50_000, PaymentMethod::Card, false, "k1", &settings())
            .unwrap_err();
        assert_eq!(err.code(), "validation");
        assert_eq!(ledger.funded_cents, 0);
    }

    #[test]
    fn oversized_amounts_are_rejected_not_wrapped() {
        let mut ledger = Ledger::default();
        let err = ledger
            .fund(i64::MAX, PaymentMethod::Card, true, "k-big", &settings())
            .unwrap_err();
        assert_eq!(err.code(), "validation");
        assert_eq!(ledger.funded_cents, 0);
        assert!(ledger.receipts.is_empty());
        // The key was not consumed, so a sane retry still works.
        ledger
            .fund(100_000, PaymentMethod::Card, true, "k-big", &settings())
            .unwrap();
        assert_eq!(ledger.funded_cents, 100_000);
    }

    #[test]
    fn replay_with_different_parameters_is_rejected() {
        let mut ledger = Ledger::default();
        ledger
            .fund(100_000, PaymentMethod::Card, true, "k1", &settings())
            .unwrap();
        let err = ledger
            .fund(50_000, PaymentMethod::Card, true, "k1", &settings())
            .unwrap_err();
        assert_eq!(err.code(), "validation");
        let err = ledger
            .fund(100_000, PaymentMethod::BankTransfer, true, "k1", &settings())
            .unwrap_err();
        assert_eq!(err.code(), "validation");
        // The original receipt and balance are untouched.
        assert_eq!(ledger.funded_cents, 100_000);
        assert_eq!(ledger.receipts.len(), 1);
    }

    #[test]
    fn replayed_idempotency_key_funds_exactly_once() {
        let mut ledger = Ledger::default();
        let first = ledger
            .fund(100_000, PaymentMethod::Card, true, "retry-1", &settings())
            .unwrap();
        let second = ledger
            .fund(100_000, PaymentMethod::Card, true, "retry-1", &settings())
            .unwrap();
        assert_eq!(ledger.funded_cents, 100_000);
        assert_eq!(ledger.receipts.len(), 1);
        assert_eq!(first.at, second.at);
    }

    #[test]
    fn release_never_exceeds_funded() {
        let mut ledger = Ledger::default();
        ledger
            .fund(100_000, PaymentMethod::Card, true, "k1", &settings())
            .unwrap();
        ledger.release(60_000).unwrap();
        let err = ledger.release(60_000).unwrap_err();
        assert_eq!(
            err,
            EngineError::InsufficientFunds {
                requested_cents: 60_000,
                pending_cents: 40_000,
            }
        );
        assert!(ledger.released_cents <= ledger.funded_cents);
        assert_eq!(ledger.pending_cents(), 40_000);
    }

    #[test]
    fn balances_hold_over_mixed_sequences() {
        let mut ledger = Ledger::default();
        for i in 0..5 {
            ledger
                .fund(10_000, PaymentMethod::BankTransfer, true, &format!("k{i}"), &settings())
                .unwrap();
            let _ = ledger.release(15_000);
            assert!(ledger.released_cents <= ledger.funded_cents);
            assert!(ledger.pending_cents() >= 0);
        }
    }
}
