use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::config::Settings;
use crate::error::EngineError;
use crate::escrow::Ledger;
use crate::models::{
    Application, CheckIn, Contract, Gig, Milestone, MilestoneStatus, NewProject, Notification,
    Project, ProjectEdits,
};

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn milestone_total(amounts: impl Iterator<Item = i64>) -> Result<i64, EngineError> {
    let mut total = 0i64;
    for amount in amounts {
        total = total
            .checked_add(amount)
            .ok_or_else(|| EngineError::Validation("milestone amounts are too large".to_string()))?;
    }
    Ok(total)
}

/// Everything the engine owns, mutated only under the store's write
/// lock so each operation is atomic and at-most-once.
#[derive(Default)]
pub(crate) struct State {
    pub projects: HashMap<String, Project>,
    pub ledgers: HashMap<String, Ledger>,
    pub gigs: HashMap<String, Gig>,
    pub applications: HashMap<String, Application>,
    pub check_ins: HashMap<String, CheckIn>,
    pub contracts: HashMap<String, Contract>,
    pub notifications: HashMap<String, Vec<Notification>>,
    pub audit: Vec<crate::models::AuditEntry>,
    pub audit_seq: u64,
}

/// The project store: single source of truth for projects, their
/// ledgers, and everything hanging off them.
pub struct Store {
    pub(crate) settings: Settings,
    pub(crate) state: RwLock<State>,
}

#[derive(Debug, Serialize)]
pub struct Analytics {
    pub total_projects: usize,
    pub assigned_projects: usize,
    pub total_funded_cents: i64,
    pub total_released_cents: i64,
    pub total_pending_cents: i64,
    pub open_check_ins: usize,
    pub pending_applications: usize,
}

impl Store {
    pub fn new(settings: Settings) -> Self {
        Store {
            settings,
            state: RwLock::new(State::default()),
        }
    }

    pub fn create_project(&self, owner_id: &str, req: NewProject) -> Result<Project, EngineError> {
        if req.title.trim().is_empty() {
            return Err(EngineError::Validation("project title is required".to_string()));
        }
        let milestone_total = milestone_total(req.milestones.iter().map(|m| m.amount_cents))?;
        if milestone_total > req.estimated_budget_cents {
            return Err(EngineError::Validation(format!(
                "milestone amounts ({milestone_total}) exceed the estimated budget ({})",
                req.estimated_budget_cents
            )));
        }
        if req.milestones.iter().any(|m| m.amount_cents <= 0) {
            return Err(EngineError::Validation(
                "milestone amounts must be positive".to_string(),
            ));
        }

        let now = Utc::now();
        let project = Project {
            id: new_id(),
            title: req.title,
            description: req.description,
            project_type: req.project_type,
            estimated_budget_cents: req.estimated_budget_cents,
            timeline: req.timeline,
            address: req.address,
            site: req.site,
            owner_id: owner_id.to_string(),
            assigned_contractor: None,
            milestones: req
                .milestones
                .into_iter()
                .map(|m| Milestone {
                    id: new_id(),
                    name: m.name,
                    amount_cents: m.amount_cents,
                    description: m.description,
                    status: MilestoneStatus::Pending,
                    evidence: Vec::new(),
                    submission_note: None,
                    review_note: None,
                    submitted_at: None,
                    decided_at: None,
                })
                .collect(),
            media: req.media,
            created_at: now,
            updated_at: now,
        };

        let mut state = self.state.write().expect("state lock poisoned");
        state.ledgers.insert(project.id.clone(), Ledger::default());
        state.projects.insert(project.id.clone(), project.clone());
        state.record(owner_id, "project", "created", &project.id);
        Ok(project)
    }

    pub fn get_project(&self, project_id: &str) -> Result<Project, EngineError> {
        let state = self.state.read().expect("state lock poisoned");
        state
            .projects
            .get(project_id)
            .cloned()
            .ok_or(EngineError::NotFound("project"))
    }

    pub fn list_projects(&self) -> Vec<Project> {
        let state = self.state.read().expect("state lock poisoned");
        let mut projects: Vec<Project> = state.projects.values().cloned().collect();
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        projects
    }

    pub fn update_project(
        &self,
        project_id: &str,
        caller_id: &str,
        edits: ProjectEdits,
    ) -> Result<Project, EngineError> {
        let mut state = self.state.write().expect("state lock poisoned");
        let project = state
            .projects
            .get_mut(project_id)
            .ok_or(EngineError::NotFound("project"))?;
        if project.owner_id != caller_id {
            return Err(EngineError::Forbidden(
                "only the project owner can edit it".to_string(),
            ));
        }

        if let Some(title) = edits.title {
            project.title = title;
        }
        if let Some(description) = edits.description {
            project.description = description;
        }
        if let Some(project_type) = edits.project_type {
            project.project_type = project_type;
        }
        if let Some(budget) = edits.estimated_budget_cents {
            let milestone_total = milestone_total(project.milestones.iter().map(|m| m.amount_cents))?;
            if milestone_total > budget {
                return Err(EngineError::Validation(format!(
                    "milestone amounts ({milestone_total}) exceed the estimated budget ({budget})"
                )));
            }
            project.estimated_budget_cents = budget;
        }
        if let Some(timeline) = edits.timeline {
            project.timeline = timeline;
        }
        if let Some(address) = edits.address {
            project.address = address;
        }
        if let Some(site) = edits.site {
            project.site = site;
        }
        project.updated_at = Utc::now();
        let updated = project.clone();

        state.record(caller_id, "project", "updated", project_id);
        Ok(updated)
    }

    /// Hard delete, refused while the ledger still holds escrowed
    /// funds.
    pub fn delete_project(&self, project_id: &str, caller_id: &str) -> Result<(), EngineError> {
        let mut state = self.state.write().expect("state lock poisoned");
        let project = state
            .projects
            .get(project_id)
            .ok_or(EngineError::NotFound("project"))?;
        if project.owner_id != caller_id {
            return Err(EngineError::Forbidden(
                "only the project owner can delete it".to_string(),
            ));
        }
        let pending = state
            .ledgers
            .get(project_id)
            .map(|l| l.pending_cents())
            .unwrap_or(0);
        if pending > 0 {
            return Err(EngineError::Validation(format!(
                "project still holds {pending} cents in escrow"
            )));
        }

        state.projects.remove(project_id);
        state.ledgers.remove(project_id);

        // Everything hanging off the project goes with it, so nothing
        // can be applied to or checked into a deleted project.
        let gig_ids: Vec<String> = state
            .gigs
            .values()
            .filter(|g| g.project_id == project_id)
            .map(|g| g.id.clone())
            .collect();
        state.gigs.retain(|_, g| g.project_id != project_id);
        state.applications.retain(|_, a| match &a.target {
            crate::models::ApplicationTarget::Project(id) => id != project_id,
            crate::models::ApplicationTarget::Gig(id) => !gig_ids.contains(id),
        });
        state.check_ins.retain(|_, c| c.project_id != project_id);
        state.contracts.retain(|_, c| c.project_id != project_id);

        state.record(caller_id, "project", "deleted", project_id);
        Ok(())
    }

    pub fn ledger(&self, project_id: &str) -> Result<Ledger, EngineError> {
        let state = self.state.read().expect("state lock poisoned");
        state
            .ledgers
            .get(project_id)
            .cloned()
            .ok_or(EngineError::NotFound("project"))
    }

    pub fn analytics(&self) -> Analytics {
        let state = self.state.read().expect("state lock poisoned");
        Analytics {
            total_projects: state.projects.len(),
            assigned_projects: state
                .projects
                .values()
                .filter(|p| p.assigned_contractor.is_some())
                .count(),
            total_funded_cents: state.ledgers.values().map(|l| l.funded_cents).sum(),
            total_released_cents: state.ledgers.values().map(|l| l.released_cents).sum(),
            total_pending_cents: state.ledgers.values().map(|l| l.pending_cents()).sum(),
            open_check_ins: state.check_ins.values().filter(|c| c.is_open()).count(),
            pending_applications: state
                .applications
                .values()
                .filter(|a| a.status == crate::models::ApplicationStatus::Pending)
                .count(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use crate::models::{MilestoneStatus, PaymentMethod};

    #[test]
    fn milestone_total_cannot_exceed_budget() {
        let store = store();
        let err = store
            .create_project("owner-1", new_project(100_000, &[("Demo", 150_000)]))
            .unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[test]
    fn overflowing_milestone_amounts_are_rejected() {
        let store = store();
        let err = store
            .create_project(
                "owner-1",
                new_project(i64::MAX, &[("Demo", i64::MAX), ("Paint", i64::MAX)]),
            )
            .unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[test]
    fn delete_removes_everything_hanging_off_the_project() {
        let store = store();
        let project = store
            .create_project("owner-1", new_project(100_000, &[("Demo", 50_000)]))
            .unwrap();
        let app = store
            .apply_to_project(&project.id, "contractor-1", "hi")
            .unwrap();
        store.decide_application(&app.id, "owner-1", true).unwrap();
        let gig = store
            .post_gig(&project.id, "contractor-1", "Crew", "work", 10_000)
            .unwrap();
        let gig_app = store.apply_to_gig(&gig.id, "worker-1", "here").unwrap();
        store
            .check_in(&project.id, "worker-1", crate::models::UserRole::Worker, Some(40.0), Some(-88.0))
            .unwrap();
        let contract = store
            .create_contract(&project.id, "owner-1", "Remodel", "terms", 100_000, "USD", vec![])
            .unwrap();

        store.delete_project(&project.id, "owner-1").unwrap();

        assert!(store.list_gigs().is_empty());
        assert_eq!(store.get_contract(&contract.id).unwrap_err().code(), "not_found");
        assert!(store.check_in_status(&project.id, "worker-1").session.is_none());
        // Dependent applications are gone too, and a deleted gig takes
        // no new ones.
        assert_eq!(
            store.withdraw_application(&gig_app.id, "worker-1").unwrap_err().code(),
            "not_found"
        );
        assert_eq!(
            store.apply_to_gig(&gig.id, "worker-2", "too late").unwrap_err().code(),
            "not_found"
        );
    }

    #[test]
    fn only_owner_edits_and_deletes() {
        let store = store();
        let project = store
            .create_project("owner-1", new_project(100_000, &[("Demo", 50_000)]))
            .unwrap();
        let err = store
            .update_project(&project.id, "stranger", Default::default())
            .unwrap_err();
        assert_eq!(err.code(), "forbidden");
        let err = store.delete_project(&project.id, "stranger").unwrap_err();
        assert_eq!(err.code(), "forbidden");
        store.delete_project(&project.id, "owner-1").unwrap();
    }

    #[test]
    fn deletion_blocked_while_funds_escrowed() {
        let store = store();
        let project = store
            .create_project("owner-1", new_project(100_000, &[("Demo", 50_000)]))
            .unwrap();
        store
            .fund_project(&project.id, "owner-1", 50_000, PaymentMethod::Card, true, "k1")
            .unwrap();
        let err = store.delete_project(&project.id, "owner-1").unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    // Full happy path: fund $10,000, submit the $2,500 "Demo" milestone
    // with a photo, approve it, and read the resulting balances.
    #[test]
    fn fund_submit_approve_releases_milestone_amount() {
        let store = store();
        let project = store
            .create_project("owner-1", new_project(1_000_000, &[("Demo", 250_000)]))
            .unwrap();
        store
            .fund_project(&project.id, "owner-1", 1_000_000, PaymentMethod::Card, true, "fund-1")
            .unwrap();
        let app = store
            .apply_to_project(&project.id, "contractor-1", "licensed and bonded")
            .unwrap();
        store.decide_application(&app.id, "owner-1", true).unwrap();

        let milestone_id = store.get_project(&project.id).unwrap().milestones[0].id.clone();
        store
            .submit_milestone(
                &milestone_id,
                "contractor-1",
                "Demo complete, debris hauled",
                &["https://cdn.example/demo-1.jpg".to_string()],
            )
            .unwrap();
        store.approve_milestone(&milestone_id, "owner-1").unwrap();

        let ledger = store.ledger(&project.id).unwrap();
        assert_eq!(ledger.released_cents, 250_000);
        assert_eq!(ledger.pending_cents(), 750_000);
        let project = store.get_project(&project.id).unwrap();
        assert_eq!(project.milestones[0].status, MilestoneStatus::Approved);

        // Both sides got notified along the way.
        assert!(!store.notifications_for("owner-1").is_empty());
        assert!(!store.notifications_for("contractor-1").is_empty());

        let analytics = store.analytics();
        assert_eq!(analytics.total_released_cents, 250_000);
        assert_eq!(analytics.total_pending_cents, 750_000);
    }
}
