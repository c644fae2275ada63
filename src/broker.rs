use chrono::Utc;
use serde_json::json;

use crate::error::EngineError;
use crate::models::{Application, ApplicationStatus, ApplicationTarget, Gig};
use crate::store::{new_id, Store};

impl Store {
    /// A contractor applies for a project's (exclusive) contractor
    /// slot.
    pub fn apply_to_project(
        &self,
        project_id: &str,
        applicant_id: &str,
        message: &str,
    ) -> Result<Application, EngineError> {
        let mut state = self.state.write().expect("state lock poisoned");
        let (owner_id, assigned) = state
            .projects
            .get(project_id)
            .map(|p| (p.owner_id.clone(), p.assigned_contractor.clone()))
            .ok_or(EngineError::NotFound("project"))?;
        if assigned.is_some() {
            return Err(EngineError::Validation(
                "project already has an assigned contractor".to_string(),
            ));
        }
        let target = ApplicationTarget::Project(project_id.to_string());
        if state.applications.values().any(|a| {
            a.applicant_id == applicant_id
                && a.target == target
                && a.status != ApplicationStatus::Withdrawn
        }) {
            return Err(EngineError::DuplicateApplication);
        }

        let now = Utc::now();
        let application = Application {
            id: new_id(),
            target,
            applicant_id: applicant_id.to_string(),
            status: ApplicationStatus::Pending,
            message: message.to_string(),
            decided_by: None,
            created_at: now,
            updated_at: now,
        };
        state
            .applications
            .insert(application.id.clone(), application.clone());
        state.notify(
            &owner_id,
            "New application",
            &format!("{applicant_id} applied to your project"),
            json!({ "applicationId": application.id, "projectId": project_id, "contractorId": applicant_id }),
        );
        state.record(applicant_id, "application", "created", &application.id);
        Ok(application)
    }

    /// A worker applies for a seat on a gig. Gig seats are not
    /// exclusive.
    pub fn apply_to_gig(
        &self,
        gig_id: &str,
        applicant_id: &str,
        message: &str,
    ) -> Result<Application, EngineError> {
        let mut state = self.state.write().expect("state lock poisoned");
        let posted_by = state
            .gigs
            .get(gig_id)
            .map(|g| g.posted_by.clone())
            .ok_or(EngineError::NotFound("gig"))?;
        let target = ApplicationTarget::Gig(gig_id.to_string());
        if state.applications.values().any(|a| {
            a.applicant_id == applicant_id
                && a.target == target
                && a.status != ApplicationStatus::Withdrawn
        }) {
            return Err(EngineError::DuplicateApplication);
        }

        let now = Utc::now();
        let application = Application {
            id: new_id(),
            target,
            applicant_id: applicant_id.to_string(),
            status: ApplicationStatus::Pending,
            message: message.to_string(),
            decided_by: None,
            created_at: now,
            updated_at: now,
        };
        state
            .applications
            .insert(application.id.clone(), application.clone());
        state.notify(
            &posted_by,
            "New gig application",
            &format!("{applicant_id} applied to your gig"),
            json!({ "applicationId": application.id, "gigId": gig_id, "workerId": applicant_id }),
        );
        state.record(applicant_id, "application", "created", &application.id);
        Ok(application)
    }

    /// Accepts or denies a pending application. Accepting a contractor
    /// assigns them and denies the project's other pending applicants;
    /// accepting a worker just adds them to the gig crew.
    pub fn decide_application(
        &self,
        application_id: &str,
        decider_id: &str,
        accept: bool,
    ) -> Result<Application, EngineError> {
        let mut state = self.state.write().expect("state lock poisoned");

        let (target, applicant_id, status) = state
            .applications
            .get(application_id)
            .map(|a| (a.target.clone(), a.applicant_id.clone(), a.status))
            .ok_or(EngineError::NotFound("application"))?;
        if status != ApplicationStatus::Pending {
            return Err(EngineError::InvalidStateTransition {
                entity: "application",
                from: status.as_str().to_string(),
                action: "decide",
            });
        }

        // Only the owner of the target decides.
        match &target {
            ApplicationTarget::Project(project_id) => {
                let owner_id = state
                    .projects
                    .get(project_id)
                    .map(|p| p.owner_id.clone())
                    .ok_or(EngineError::NotFound("project"))?;
                if owner_id != decider_id {
                    return Err(EngineError::Forbidden(
                        "only the project owner can decide applications".to_string(),
                    ));
                }
            }
            ApplicationTarget::Gig(gig_id) => {
                let posted_by = state
                    .gigs
                    .get(gig_id)
                    .map(|g| g.posted_by.clone())
                    .ok_or(EngineError::NotFound("gig"))?;
                if posted_by != decider_id {
                    return Err(EngineError::Forbidden(
                        "only the gig poster can decide applications".to_string(),
                    ));
                }
            }
        }

        let now = Utc::now();
        let new_status = if accept {
            ApplicationStatus::Accepted
        } else {
            ApplicationStatus::Denied
        };
        {
            let application = state
                .applications
                .get_mut(application_id)
                .ok_or(EngineError::NotFound("application"))?;
            application.status = new_status;
            application.decided_by = Some(decider_id.to_string());
            application.updated_at = now;
        }

        let mut auto_denied: Vec<(String, String)> = Vec::new();
        if accept {
            match &target {
                ApplicationTarget::Project(project_id) => {
                    if let Some(project) = state.projects.get_mut(project_id) {
                        project.assigned_contractor = Some(applicant_id.clone());
                        project.updated_at = now;
                    }
                    // The contractor slot is exclusive: everyone else
                    // still pending for this project is denied.
                    for application in state.applications.values_mut() {
                        if application.target == target
                            && application.id != application_id
                            && application.status == ApplicationStatus::Pending
                        {
                            application.status = ApplicationStatus::Denied;
                            application.decided_by = Some(decider_id.to_string());
                            application.updated_at = now;
                            auto_denied
                                .push((application.id.clone(), application.applicant_id.clone()));
                        }
                    }
                }
                ApplicationTarget::Gig(gig_id) => {
                    if let Some(gig) = state.gigs.get_mut(gig_id) {
                        gig.workers.push(applicant_id.clone());
                    }
                }
            }
        }

        let target_json = match &target {
            ApplicationTarget::Project(id) => json!({ "projectId": id }),
            ApplicationTarget::Gig(id) => json!({ "gigId": id }),
        };
        state.notify(
            &applicant_id,
            if accept { "Application accepted" } else { "Application denied" },
            if accept {
                "You were selected for this work"
            } else {
                "Your application was not selected"
            },
            target_json.clone(),
        );
        for (denied_id, denied_applicant) in &auto_denied {
            state.notify(
                denied_applicant,
                "Application denied",
                "Another applicant was selected",
                target_json.clone(),
            );
            state.record(decider_id, "application", "denied", denied_id);
        }
        state.record(
            decider_id,
            "application",
            if accept { "accepted" } else { "denied" },
            application_id,
        );

        state
            .applications
            .get(application_id)
            .cloned()
            .ok_or(EngineError::NotFound("application"))
    }

    /// Withdraws the caller's own pending application.
    pub fn withdraw_application(
        &self,
        application_id: &str,
        applicant_id: &str,
    ) -> Result<Application, EngineError> {
        let mut state = self.state.write().expect("state lock poisoned");
        let application = state
            .applications
            .get_mut(application_id)
            .ok_or(EngineError::NotFound("application"))?;
        if application.applicant_id != applicant_id {
            return Err(EngineError::Forbidden(
                "only the applicant can withdraw an application".to_string(),
            ));
        }
        if application.status != ApplicationStatus::Pending {
            return Err(EngineError::InvalidStateTransition {
                entity: "application",
                from: application.status.as_str().to_string(),
                action: "withdraw",
            });
        }
        application.status = ApplicationStatus::Withdrawn;
        application.updated_at = Utc::now();
        let withdrawn = application.clone();
        state.record(applicant_id, "application", "withdrawn", application_id);
        Ok(withdrawn)
    }

    /// Posts a gig under a project. Only the assigned contractor can
    /// post gigs for it.
    pub fn post_gig(
        &self,
        project_id: &str,
        poster_id: &str,
        title: &str,
        description: &str,
        pay_cents: i64,
    ) -> Result<Gig, EngineError> {
        if title.trim().is_empty() {
            return Err(EngineError::Validation("gig title is required".to_string()));
        }
        if pay_cents <= 0 {
            return Err(EngineError::Validation("gig pay must be positive".to_string()));
        }
        let mut state = self.state.write().expect("state lock poisoned");
        let assigned = state
            .projects
            .get(project_id)
            .map(|p| p.assigned_contractor.clone())
            .ok_or(EngineError::NotFound("project"))?;
        if assigned.as_deref() != Some(poster_id) {
            return Err(EngineError::Forbidden(
                "only the assigned contractor can post gigs".to_string(),
            ));
        }

        let gig = Gig {
            id: new_id(),
            project_id: project_id.to_string(),
            posted_by: poster_id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            pay_cents,
            workers: Vec::new(),
            created_at: Utc::now(),
        };
        state.gigs.insert(gig.id.clone(), gig.clone());
        state.record(poster_id, "gig", "created", &gig.id);
        Ok(gig)
    }

    pub fn list_gigs(&self) -> Vec<Gig> {
        let state = self.state.read().expect("state lock poisoned");
        let mut gigs: Vec<Gig> = state.gigs.values().cloned().collect();
        gigs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        gigs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::*;
    use crate::store::Store;

    fn open_project(store: &Store) -> String {
        store
            .create_project("owner-1", new_project(100_000, &[("Demo", 50_000)]))
            .unwrap()
            .id
    }

    #[test]
    fn second_pending_application_is_a_duplicate() {
        let store = store();
        let project_id = open_project(&store);
        store
            .apply_to_project(&project_id, "contractor-1", "first")
            .unwrap();
        let err = store
            .apply_to_project(&project_id, "contractor-1", "second")
            .unwrap_err();
        assert_eq!(err, EngineError::DuplicateApplication);
    }

    #[test]
    fn withdrawing_clears_the_way_for_a_fresh_application() {
        let store = store();
        let project_id = open_project(&store);
        let app = store
            .apply_to_project(&project_id, "contractor-1", "first")
            .unwrap();
        store.withdraw_application(&app.id, "contractor-1").unwrap();
        store
            .apply_to_project(&project_id, "contractor-1", "second")
            .unwrap();
        // A withdrawn application cannot be withdrawn again or decided.
        let err = store
            .withdraw_application(&app.id, "contractor-1")
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition { action: "withdraw", .. }));
        let err = store.decide_application(&app.id, "owner-1", true).unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition { action: "decide", .. }));
    }

    #[test]
    fn only_the_owner_decides() {
        let store = store();
        let project_id = open_project(&store);
        let app = store
            .apply_to_project(&project_id, "contractor-1", "hello")
            .unwrap();
        let err = store
            .decide_application(&app.id, "contractor-1", true)
            .unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }

    #[test]
    fn accepting_a_contractor_assigns_and_denies_the_rest() {
        let store = store();
        let project_id = open_project(&store);
        let winner = store
            .apply_to_project(&project_id, "contractor-1", "pick me")
            .unwrap();
        let loser = store
            .apply_to_project(&project_id, "contractor-2", "no, me")
            .unwrap();

        store.decide_application(&winner.id, "owner-1", true).unwrap();

        let project = store.get_project(&project_id).unwrap();
        assert_eq!(project.assigned_contractor.as_deref(), Some("contractor-1"));
        let err = store.decide_application(&loser.id, "owner-1", true).unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition { .. }));
        assert!(store
            .notifications_for("contractor-2")
            .iter()
            .any(|n| n.title == "Application denied"));
        // And the slot is closed to new applicants.
        let err = store
            .apply_to_project(&project_id, "contractor-3", "too late")
            .unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[test]
    fn gig_seats_are_not_exclusive() {
        let store = store();
        let project_id = open_project(&store);
        let app = store
            .apply_to_project(&project_id, "contractor-1", "hi")
            .unwrap();
        store.decide_application(&app.id, "owner-1", true).unwrap();
        let gig = store
            .post_gig(&project_id, "contractor-1", "Drywall crew", "Hang and tape", 20_000)
            .unwrap();

        let first = store.apply_to_gig(&gig.id, "worker-1", "available").unwrap();
        let second = store.apply_to_gig(&gig.id, "worker-2", "also available").unwrap();
        store.decide_application(&first.id, "contractor-1", true).unwrap();
        // Accepting one worker leaves the other application pending.
        let second = store.decide_application(&second.id, "contractor-1", true).unwrap();
        assert_eq!(second.status, ApplicationStatus::Accepted);

        let gigs = store.list_gigs();
        assert_eq!(gigs[0].workers, vec!["worker-1", "worker-2"]);
    }

    #[test]
    fn only_the_assigned_contractor_posts_gigs() {
        let store = store();
        let project_id = open_project(&store);
        let err = store
            .post_gig(&project_id, "contractor-9", "Crew", "work", 10_000)
            .unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }
}
