use chrono::Utc;
use serde_json::json;

use crate::error::EngineError;
use crate::models::{Contract, ContractSignature, ContractStatus};
use crate::store::{new_id, Store};

impl Store {
    /// Drafts a contract for a project. Either party (owner or
    /// assigned contractor) can draft; it activates once every
    /// required signer has signed.
    #[allow(clippy::too_many_arguments)]
    pub fn create_contract(
        &self,
        project_id: &str,
        caller_id: &str,
        title: &str,
        terms: &str,
        total_budget_cents: i64,
        currency: &str,
        required_signers: Vec<String>,
    ) -> Result<Contract, EngineError> {
        if terms.trim().is_empty() {
            return Err(EngineError::Validation("contract terms are required".to_string()));
        }
        let mut state = self.state.write().expect("state lock poisoned");
        let (owner_id, assigned) = state
            .projects
            .get(project_id)
            .map(|p| (p.owner_id.clone(), p.assigned_contractor.clone()))
            .ok_or(EngineError::NotFound("project"))?;
        if caller_id != owner_id && assigned.as_deref() != Some(caller_id) {
            return Err(EngineError::Forbidden(
                "only the owner or assigned contractor can draft a contract".to_string(),
            ));
        }

        // Default signers: both parties to the project.
        let required_signers = if required_signers.is_empty() {
            let mut signers = vec![owner_id.clone()];
            signers.extend(assigned.clone());
            signers
        } else {
            required_signers
        };

        let now = Utc::now();
        let contract = Contract {
            id: new_id(),
            project_id: project_id.to_string(),
            title: title.to_string(),
            terms: terms.to_string(),
            total_budget_cents,
            currency: currency.to_string(),
            status: ContractStatus::Pending,
            required_signers: required_signers.clone(),
            signatures: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        state.contracts.insert(contract.id.clone(), contract.clone());
        for signer in required_signers.iter().filter(|s| *s != caller_id) {
            state.notify(
                signer,
                "Contract ready to sign",
                &format!("\"{title}\" is awaiting your signature"),
                json!({ "contractId": contract.id, "projectId": project_id }),
            );
        }
        state.record(caller_id, "contract", "created", &contract.id);
        Ok(contract)
    }

    pub fn get_contract(&self, contract_id: &str) -> Result<Contract, EngineError> {
        let state = self.state.read().expect("state lock poisoned");
        state
            .contracts
            .get(contract_id)
            .cloned()
            .ok_or(EngineError::NotFound("contract"))
    }

    /// Records a required signer's signature; the contract becomes
    /// approved when the last one lands.
    pub fn sign_contract(&self, contract_id: &str, user_id: &str) -> Result<Contract, EngineError> {
        let mut state = self.state.write().expect("state lock poisoned");

        let (required_signers, became_approved) = {
            let contract = state
                .contracts
                .get_mut(contract_id)
                .ok_or(EngineError::NotFound("contract"))?;
            if contract.status != ContractStatus::Pending {
                return Err(EngineError::InvalidStateTransition {
                    entity: "contract",
                    from: contract.status.as_str().to_string(),
                    action: "sign",
                });
            }
            if !contract.required_signers.iter().any(|s| s == user_id) {
                return Err(EngineError::Forbidden(
                    "you are not a required signer on this contract".to_string(),
                ));
            }
            if contract.has_signed(user_id) {
                return Err(EngineError::Validation(
                    "you have already signed this contract".to_string(),
                ));
            }
            contract.signatures.push(ContractSignature {
                user_id: user_id.to_string(),
                signed_at: Utc::now(),
            });
            contract.updated_at = Utc::now();
            let became_approved = contract.fully_signed();
            if became_approved {
                contract.status = ContractStatus::Approved;
            }
            (contract.required_signers.clone(), became_approved)
        };

        if became_approved {
            for signer in &required_signers {
                state.notify(
                    signer,
                    "Contract active",
                    "All required signatures are in place",
                    json!({ "contractId": contract_id }),
                );
            }
            state.record(user_id, "contract", "approved", contract_id);
        }
        state.record(user_id, "contract", "signed", contract_id);

        state
            .contracts
            .get(contract_id)
            .cloned()
            .ok_or(EngineError::NotFound("contract"))
    }

    /// Owner-driven status change; the only legal move is rejecting a
    /// pending draft.
    pub fn set_contract_status(
        &self,
        contract_id: &str,
        caller_id: &str,
        status: ContractStatus,
    ) -> Result<Contract, EngineError> {
        let mut state = self.state.write().expect("state lock poisoned");

        let (project_id, current) = state
            .contracts
            .get(contract_id)
            .map(|c| (c.project_id.clone(), c.status))
            .ok_or(EngineError::NotFound("contract"))?;
        let owner_id = state
            .projects
            .get(&project_id)
            .map(|p| p.owner_id.clone())
            .ok_or(EngineError::NotFound("project"))?;
        if owner_id != caller_id {
            return Err(EngineError::Forbidden(
                "only the project owner can change contract status".to_string(),
            ));
        }
        if current != ContractStatus::Pending || status != ContractStatus::Rejected {
            return Err(EngineError::InvalidStateTransition {
                entity: "contract",
                from: current.as_str().to_string(),
                action: "set_status",
            });
        }

        let contract = state
            .contracts
            .get_mut(contract_id)
            .ok_or(EngineError::NotFound("contract"))?;
        contract.status = ContractStatus::Rejected;
        contract.updated_at = Utc::now();
        let updated = contract.clone();
        state.record(caller_id, "contract", "rejected", contract_id);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::*;
    use crate::store::Store;

    fn project_with_contractor(store: &Store) -> String {
        let project_id = store
            .create_project("owner-1", new_project(100_000, &[("Demo", 50_000)]))
            .unwrap()
            .id;
        let app = store
            .apply_to_project(&project_id, "contractor-1", "hi")
            .unwrap();
        store.decide_application(&app.id, "owner-1", true).unwrap();
        project_id
    }

    #[test]
    fn contract_approves_after_both_signatures() {
        let store = store();
        let project_id = project_with_contractor(&store);
        let contract = store
            .create_contract(&project_id, "owner-1", "Remodel", "scope and terms", 100_000, "USD", vec![])
            .unwrap();
        assert_eq!(contract.required_signers, vec!["owner-1", "contractor-1"]);

        let contract = store.sign_contract(&contract.id, "owner-1").unwrap();
        assert_eq!(contract.status, ContractStatus::Pending);
        let contract = store.sign_contract(&contract.id, "contractor-1").unwrap();
        assert_eq!(contract.status, ContractStatus::Approved);
        // No further signing once active.
        let err = store.sign_contract(&contract.id, "owner-1").unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition { action: "sign", .. }));
    }

    #[test]
    fn double_signing_and_strangers_are_rejected() {
        let store = store();
        let project_id = project_with_contractor(&store);
        let contract = store
            .create_contract(&project_id, "owner-1", "Remodel", "terms", 100_000, "USD", vec![])
            .unwrap();
        store.sign_contract(&contract.id, "owner-1").unwrap();
        assert_eq!(
            store.sign_contract(&contract.id, "owner-1").unwrap_err().code(),
            "validation"
        );
        assert_eq!(
            store.sign_contract(&contract.id, "worker-9").unwrap_err().code(),
            "forbidden"
        );
    }

    #[test]
    fn owner_can_reject_a_pending_draft_only() {
        let store = store();
        let project_id = project_with_contractor(&store);
        let contract = store
            .create_contract(&project_id, "contractor-1", "Remodel", "terms", 100_000, "USD", vec![])
            .unwrap();
        let err = store
            .set_contract_status(&contract.id, "contractor-1", ContractStatus::Rejected)
            .unwrap_err();
        assert_eq!(err.code(), "forbidden");
        let rejected = store
            .set_contract_status(&contract.id, "owner-1", ContractStatus::Rejected)
            .unwrap();
        assert_eq!(rejected.status, ContractStatus::Rejected);
        // A rejected draft cannot be signed or re-rejected.
        let err = store.sign_contract(&contract.id, "owner-1").unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition { .. }));
        let err = store
            .set_contract_status(&contract.id, "owner-1", ContractStatus::Rejected)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition { .. }));
    }
}
