//! Remote issue tracker synchronization.
//!
//! The tracker holds a mirror of each ticket as an issue; triad pushes
//! partial updates at it and treats the result as advisory. No error
//! crosses this module's boundary: every outcome is a boolean.

pub mod redmine;

use serde_json::json;

pub use redmine::RedmineClient;

/// Partial update for a remote issue.
///
/// `assigned_to` is three-valued: `None` leaves the assignment untouched,
/// `Some(None)` clears it, `Some(Some(id))` sets it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueUpdate {
    pub status_id: Option<u32>,
    pub notes: Option<String>,
    pub assigned_to: Option<Option<u64>>,
}

impl IssueUpdate {
    pub fn is_empty(&self) -> bool {
        self.status_id.is_none() && self.notes.is_none() && self.assigned_to.is_none()
    }

    /// Wire payload with only the supplied fields.
    pub fn to_payload(&self) -> serde_json::Value {
        let mut issue = serde_json::Map::new();
        if let Some(status_id) = self.status_id {
            issue.insert("status_id".to_string(), json!(status_id));
        }
        if let Some(notes) = &self.notes {
            issue.insert("notes".to_string(), json!(notes));
        }
        if let Some(assigned_to) = &self.assigned_to {
            // Explicit null clears the assignment.
            issue.insert("assigned_to_id".to_string(), json!(assigned_to));
        }
        json!({ "issue": issue })
    }
}

/// Common interface for issue trackers, mirroring the shape of the wire
/// client so tests can substitute a stub.
pub trait TrackerApi: Send + Sync {
    /// Push a partial update to the given issue. Boolean outcome only.
    fn update_issue(
        &self,
        issue_id: u64,
        update: IssueUpdate,
    ) -> impl std::future::Future<Output = bool> + Send;

    /// Connectivity probe used at startup. Never fatal.
    fn probe(&self) -> impl std::future::Future<Output = bool> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_contains_only_supplied_fields() {
        let update = IssueUpdate {
            status_id: Some(2),
            notes: None,
            assigned_to: None,
        };
        let payload = update.to_payload();
        assert_eq!(payload["issue"]["status_id"], 2);
        assert!(payload["issue"].get("notes").is_none());
        assert!(payload["issue"].get("assigned_to_id").is_none());
    }

    #[test]
    fn test_explicit_null_assignee_is_serialized() {
        let update = IssueUpdate {
            status_id: Some(1),
            notes: None,
            assigned_to: Some(None),
        };
        let payload = update.to_payload();
        assert!(payload["issue"]["assigned_to_id"].is_null());
        assert!(payload["issue"].as_object().unwrap().contains_key("assigned_to_id"));
    }

    #[test]
    fn test_set_assignee() {
        let update = IssueUpdate {
            assigned_to: Some(Some(7)),
            ..Default::default()
        };
        assert_eq!(update.to_payload()["issue"]["assigned_to_id"], 7);
    }

    #[test]
    fn test_is_empty() {
        assert!(IssueUpdate::default().is_empty());
        assert!(
            !IssueUpdate {
                notes: Some("x".into()),
                ..Default::default()
            }
            .is_empty()
        );
    }
}
