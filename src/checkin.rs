use chrono::Utc;
use serde::Serialize;

use crate::error::EngineError;
use crate::models::{CheckIn, GeoPoint, UserRole};
use crate::store::{new_id, Store};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle (haversine) distance between two points, in meters.
pub fn distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Formats elapsed seconds as `HH:MM:SS` for timer display.
pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[derive(Debug, Serialize)]
pub struct CheckInStatus {
    pub checked_in: bool,
    pub session: Option<CheckIn>,
}

impl Store {
    /// Opens a work session if the caller is within the allowed radius
    /// of the job site. Nothing is recorded on failure.
    pub fn check_in(
        &self,
        project_id: &str,
        user_id: &str,
        user_type: UserRole,
        lat: Option<f64>,
        lng: Option<f64>,
    ) -> Result<CheckIn, EngineError> {
        let (lat, lng) = match (lat, lng) {
            (Some(lat), Some(lng)) => (lat, lng),
            // A denied GPS permission reaches us as missing coordinates
            // and must not be reported as out-of-range.
            _ => return Err(EngineError::LocationUnavailable),
        };

        let mut state = self.state.write().expect("state lock poisoned");
        let site = state
            .projects
            .get(project_id)
            .map(|p| p.site)
            .ok_or(EngineError::NotFound("project"))?;

        // One open session per (project, user).
        if state
            .check_ins
            .values()
            .any(|c| c.project_id == project_id && c.user_id == user_id && c.is_open())
        {
            return Err(EngineError::AlreadyCheckedIn);
        }

        let distance = distance_m(site, GeoPoint { lat, lng });
        if distance > self.settings.allowed_radius_m {
            return Err(EngineError::OutOfRange {
                distance_m: distance,
                allowed_radius_m: self.settings.allowed_radius_m,
            });
        }

        let session = CheckIn {
            check_in_id: new_id(),
            project_id: project_id.to_string(),
            user_id: user_id.to_string(),
            user_type,
            check_in_time: Utc::now(),
            check_out_time: None,
            distance_m: distance,
            duration_seconds: None,
        };
        state
            .check_ins
            .insert(session.check_in_id.clone(), session.clone());
        state.record(user_id, "check_in", "opened", &session.check_in_id);
        Ok(session)
    }

    pub fn check_out(
        &self,
        project_id: &str,
        user_id: &str,
        check_in_id: &str,
    ) -> Result<CheckIn, EngineError> {
        let mut state = self.state.write().expect("state lock poisoned");
        let session = state
            .check_ins
            .get_mut(check_in_id)
            .filter(|c| c.project_id == project_id && c.user_id == user_id && c.is_open())
            .ok_or(EngineError::NoOpenCheckIn)?;
        session.close(Utc::now());
        let closed = session.clone();
        state.record(user_id, "check_in", "closed", check_in_id);
        Ok(closed)
    }

    /// Idempotent read used by clients to restore timers after a
    /// restart: the open session if one exists, else the most recent
    /// closed one.
    pub fn check_in_status(&self, project_id: &str, user_id: &str) -> CheckInStatus {
        let state = self.state.read().expect("state lock poisoned");
        let mut sessions: Vec<&CheckIn> = state
            .check_ins
            .values()
            .filter(|c| c.project_id == project_id && c.user_id == user_id)
            .collect();
        sessions.sort_by(|a, b| a.check_in_time.cmp(&b.check_in_time));
        let open = sessions.iter().rev().find(|c| c.is_open());
        CheckInStatus {
            checked_in: open.is_some(),
            session: open.or(sessions.last()).map(|c| (*c).clone()),
        }
    }
}
