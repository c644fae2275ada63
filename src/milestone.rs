use chrono::Utc;
use serde_json::json;

use crate::error::EngineError;
use crate::models::{Milestone, MilestoneStatus};
use crate::store::Store;

/// Milestone lifecycle: `pending -> submitted -> {approved,
/// changes_requested}`, with `changes_requested -> submitted` on
/// resubmission. Approval is the only path that releases escrowed
/// funds, and it is irreversible.
impl Store {
    pub fn submit_milestone(
        &self,
        milestone_id: &str,
        contractor_id: &str,
        description: &str,
        photos: &[String],
    ) -> Result<Milestone, EngineError> {
        if description.trim().is_empty() {
            return Err(EngineError::Validation(
                "a submission description is required".to_string(),
            ));
        }
        if photos.is_empty() {
            return Err(EngineError::Validation(
                "at least one photo is required".to_string(),
            ));
        }

        let mut state = self.state.write().expect("state lock poisoned");

        let (project_id, owner_id) = {
            let project = state
                .projects
                .values()
                .find(|p| p.milestone(milestone_id).is_some())
                .ok_or(EngineError::NotFound("milestone"))?;
            if project.assigned_contractor.as_deref() != Some(contractor_id) {
                return Err(EngineError::Forbidden(
                    "only the assigned contractor can submit milestones".to_string(),
                ));
            }
            let milestone = project
                .milestone(milestone_id)
                .ok_or(EngineError::NotFound("milestone"))?;
            match milestone.status {
                MilestoneStatus::Pending | MilestoneStatus::ChangesRequested => {}
                status => {
                    return Err(EngineError::InvalidStateTransition {
                        entity: "milestone",
                        from: status.as_str().to_string(),
                        action: "submit",
                    })
                }
            }
            (project.id.clone(), project.owner_id.clone())
        };

        let now = Utc::now();
        let project = state
            .projects
            .get_mut(&project_id)
            .ok_or(EngineError::NotFound("project"))?;
        let milestone = project
            .milestone_mut(milestone_id)
            .ok_or(EngineError::NotFound("milestone"))?;
        milestone.status = MilestoneStatus::Submitted;
        milestone.evidence = photos.to_vec();
        milestone.submission_note = Some(description.to_string());
        milestone.submitted_at = Some(now);
        let snapshot = milestone.clone();
        project.updated_at = now;

        state.notify(
            &owner_id,
            "Milestone submitted",
            &format!("\"{}\" is ready for your review", snapshot.name),
            json!({ "projectId": project_id, "milestoneId": milestone_id }),
        );
        state.record(contractor_id, "milestone", "submitted", milestone_id);
        Ok(snapshot)
    }

    /// Approves a submitted milestone, releasing its amount from
    /// escrow. A failed release leaves the milestone submitted.
    pub fn approve_milestone(
        &self,
        milestone_id: &str,
        caller_id: &str,
    ) -> Result<Milestone, EngineError> {
        let mut state = self.state.write().expect("state lock poisoned");

        let (project_id, contractor_id, amount_cents) = {
            let project = state
                .projects
                .values()
                .find(|p| p.milestone(milestone_id).is_some())
                .ok_or(EngineError::NotFound("milestone"))?;
            if project.owner_id != caller_id {
                return Err(EngineError::Forbidden(
                    "only the project owner can approve milestones".to_string(),
                ));
            }
            let milestone = project
                .milestone(milestone_id)
                .ok_or(EngineError::NotFound("milestone"))?;
            if milestone.status != MilestoneStatus::Submitted {
                return Err(EngineError::InvalidStateTransition {
                    entity: "milestone",
                    from: milestone.status.as_str().to_string(),
                    action: "approve",
                });
            }
            (
                project.id.clone(),
                project.assigned_contractor.clone(),
                milestone.amount_cents,
            )
        };

        // Release first so an insufficient-funds failure is retryable.
        state
            .ledgers
            .get_mut(&project_id)
            .ok_or(EngineError::NotFound("project"))?
            .release(amount_cents)?;

        let now = Utc::now();
        let project = state
            .projects
            .get_mut(&project_id)
            .ok_or(EngineError::NotFound("project"))?;
        let milestone = project
            .milestone_mut(milestone_id)
            .ok_or(EngineError::NotFound("milestone"))?;
        milestone.status = MilestoneStatus::Approved;
        milestone.decided_at = Some(now);
        let snapshot = milestone.clone();
        project.updated_at = now;

        if let Some(contractor_id) = contractor_id {
            state.notify(
                &contractor_id,
                "Milestone approved",
                &format!(
                    "\"{}\" was approved and {} cents were released",
                    snapshot.name, amount_cents
                ),
                json!({ "projectId": project_id, "milestoneId": milestone_id, "amountCents": amount_cents }),
            );
        }
        state.record(caller_id, "milestone", "approved", milestone_id);
        state.record(caller_id, "escrow", "released", &format!("{amount_cents} cents"));
        Ok(snapshot)
    }

    pub fn request_changes(
        &self,
        milestone_id: &str,
        caller_id: &str,
        note: &str,
    ) -> Result<Milestone, EngineError> {
        if note.trim().is_empty() {
            return Err(EngineError::Validation(
                "a change-request note is required".to_string(),
            ));
        }

        let mut state = self.state.write().expect("state lock poisoned");

        let (project_id, contractor_id) = {
            let project = state
                .projects
                .values()
                .find(|p| p.milestone(milestone_id).is_some())
                .ok_or(EngineError::NotFound("milestone"))?;
            if project.owner_id != caller_id {
                return Err(EngineError::Forbidden(
                    "only the project owner can request changes".to_string(),
                ));
            }
            let milestone = project
                .milestone(milestone_id)
                .ok_or(EngineError::NotFound("milestone"))?;
            if milestone.status != MilestoneStatus::Submitted {
                return Err(EngineError::InvalidStateTransition {
                    entity: "milestone",
                    from: milestone.status.as_str().to_string(),
                    action: "request_changes",
                });
            }
            (project.id.clone(), project.assigned_contractor.clone())
        };

        let now = Utc::now();
        let project = state
            .projects
            .get_mut(&project_id)
            .ok_or(EngineError::NotFound("project"))?;
        let milestone = project
            .milestone_mut(milestone_id)
            .ok_or(EngineError::NotFound("milestone"))?;
        milestone.status = MilestoneStatus::ChangesRequested;
        milestone.review_note = Some(note.to_string());
        milestone.decided_at = Some(now);
        let snapshot = milestone.clone();
        project.updated_at = now;

        if let Some(contractor_id) = contractor_id {
            state.notify(
                &contractor_id,
                "Changes requested",
                &format!("\"{}\": {note}", snapshot.name),
                json!({ "projectId": project_id, "milestoneId": milestone_id }),
            );
        }
        state.record(caller_id, "milestone", "changes_requested", milestone_id);
        Ok(snapshot)
    }
}
