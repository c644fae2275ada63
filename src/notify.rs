use chrono::Utc;
use serde_json::Value;

use crate::models::{AuditEntry, Notification};
use crate::store::{new_id, State, Store};

impl State {
    /// Appends a notification to the recipient's feed.
    pub(crate) fn notify(&mut self, user_id: &str, title: &str, body: &str, data: Value) {
        let notification = Notification {
            id: new_id(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            data,
            read: false,
            created_at: Utc::now(),
        };
        self.notifications
            .entry(user_id.to_string())
            .or_default()
            .push(notification);
    }

    /// Appends one line to the global ordered audit trail.
    pub(crate) fn record(&mut self, actor: &str, entity: &str, action: &str, detail: &str) {
        self.audit_seq += 1;
        self.audit.push(AuditEntry {
            seq: self.audit_seq,
            at: Utc::now(),
            actor: actor.to_string(),
            entity: entity.to_string(),
            action: action.to_string(),
            detail: detail.to_string(),
        });
        log::info!("audit #{}: {} {} {} ({})", self.audit_seq, actor, action, entity, detail);
    }
}

impl Store {
    pub fn notifications_for(&self, user_id: &str) -> Vec<Notification> {
        let state = self.state.read().expect("state lock poisoned");
        state.notifications.get(user_id).cloned().unwrap_or_default()
    }

    /// Marks the given notification ids read; returns how many changed.
    pub fn mark_read(&self, user_id: &str, ids: &[String]) -> usize {
        let mut state = self.state.write().expect("state lock poisoned");
        let mut changed = 0;
        if let Some(feed) = state.notifications.get_mut(user_id) {
            for notification in feed.iter_mut() {
                if !notification.read && ids.contains(&notification.id) {
                    notification.read = true;
                    changed += 1;
                }
            }
        }
        changed
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        let state = self.state.read().expect("state lock poisoned");
        state.audit.clone()
    }
}

#[cfg(test)]
mod tests {
    use crate::store::test_support::*;

    #[test]
    fn mark_read_touches_only_named_ids() {
        let store = store();
        store
            .create_project("owner-1", new_project(100_000, &[("Demo", 50_000)]))
            .unwrap();
        // Seed two notifications through a contractor application.
        let project = &store.list_projects()[0];
        store
            .apply_to_project(&project.id, "contractor-1", "I can start Monday")
            .unwrap();
        let feed = store.notifications_for("owner-1");
        assert_eq!(feed.len(), 1);

        let changed = store.mark_read("owner-1", &[feed[0].id.clone()]);
        assert_eq!(changed, 1);
        assert!(store.notifications_for("owner-1")[0].read);
        // Re-marking is a no-op.
        assert_eq!(store.mark_read("owner-1", &[feed[0].id.clone()]), 0);
    }

    #[test]
    fn audit_log_is_ordered() {
        let store = store();
        store
            .create_project("owner-1", new_project(100_000, &[("Demo", 50_000)]))
            .unwrap();
        store
            .create_project("owner-2", new_project(100_000, &[("Demo", 50_000)]))
            .unwrap();
        let log = store.audit_log();
        assert_eq!(log.len(), 2);
        assert!(log[0].seq < log[1].seq);
        assert_eq!(log[0].action, "created");
    }
}
