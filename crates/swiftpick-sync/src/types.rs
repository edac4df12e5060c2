use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// PickupStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a pickup request.
///
/// Transitions move forward only: `Pending → TeacherNotified → Dismissed`.
/// `Cancelled` is reachable from `Pending` or `TeacherNotified` and, like
/// `Dismissed`, has no outgoing transitions. The server owns every
/// transition except the optimistic `Pending` written at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickupStatus {
    Pending,
    TeacherNotified,
    Dismissed,
    Cancelled,
}

impl PickupStatus {
    pub fn all() -> &'static [PickupStatus] {
        &[
            PickupStatus::Pending,
            PickupStatus::TeacherNotified,
            PickupStatus::Dismissed,
            PickupStatus::Cancelled,
        ]
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PickupStatus::Dismissed | PickupStatus::Cancelled)
    }

    /// A pickup may only be cancelled before the student is dismissed.
    pub fn can_cancel(self) -> bool {
        matches!(self, PickupStatus::Pending | PickupStatus::TeacherNotified)
    }

    pub fn can_transition_to(self, next: PickupStatus) -> bool {
        match (self, next) {
            (PickupStatus::Pending, PickupStatus::TeacherNotified) => true,
            (PickupStatus::TeacherNotified, PickupStatus::Dismissed) => true,
            // Server-side fast path: a pickup dismissed before the local
            // poller ever saw teacher_notified.
            (PickupStatus::Pending, PickupStatus::Dismissed) => true,
            (PickupStatus::Pending | PickupStatus::TeacherNotified, PickupStatus::Cancelled) => {
                true
            }
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PickupStatus::Pending => "pending",
            PickupStatus::TeacherNotified => "teacher_notified",
            PickupStatus::Dismissed => "dismissed",
            PickupStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PickupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PickupStatus {
    type Err = crate::error::SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PickupStatus::Pending),
            "teacher_notified" => Ok(PickupStatus::TeacherNotified),
            "dismissed" => Ok(PickupStatus::Dismissed),
            "cancelled" => Ok(PickupStatus::Cancelled),
            _ => Err(crate::error::SyncError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// TripStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a bus trip as reported by the driver app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TripStatus::Completed | TripStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: TripStatus) -> bool {
        match (self, next) {
            (TripStatus::Scheduled, TripStatus::InProgress) => true,
            (TripStatus::InProgress, TripStatus::Completed) => true,
            (TripStatus::Scheduled | TripStatus::InProgress, TripStatus::Cancelled) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TripStatus::Scheduled => "scheduled",
            TripStatus::InProgress => "in_progress",
            TripStatus::Completed => "completed",
            TripStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TripStatus {
    type Err = crate::error::SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(TripStatus::Scheduled),
            "in_progress" => Ok(TripStatus::InProgress),
            "completed" => Ok(TripStatus::Completed),
            "cancelled" => Ok(TripStatus::Cancelled),
            _ => Err(crate::error::SyncError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// EntityKind / EntityRef
// ---------------------------------------------------------------------------

/// The kinds of server state the app polls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Pickup,
    Trip,
    BusLocation,
    AdminStats,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Pickup => "pickup",
            EntityKind::Trip => "trip",
            EntityKind::BusLocation => "bus_location",
            EntityKind::AdminStats => "admin_stats",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a tracked entity: what it is plus the server-assigned id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: i64) -> Self {
        Self { kind, id }
    }

    pub fn pickup(id: i64) -> Self {
        Self::new(EntityKind::Pickup, id)
    }

    pub fn trip(id: i64) -> Self {
        Self::new(EntityKind::Trip, id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

// ---------------------------------------------------------------------------
// Method
// ---------------------------------------------------------------------------

/// HTTP method of a queued mutating request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = crate::error::SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            _ => Err(crate::error::SyncError::InvalidMethod(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn pickup_forward_transitions() {
        assert!(PickupStatus::Pending.can_transition_to(PickupStatus::TeacherNotified));
        assert!(PickupStatus::TeacherNotified.can_transition_to(PickupStatus::Dismissed));
        assert!(PickupStatus::Pending.can_transition_to(PickupStatus::Dismissed));
    }

    #[test]
    fn pickup_no_backward_transitions() {
        assert!(!PickupStatus::TeacherNotified.can_transition_to(PickupStatus::Pending));
        assert!(!PickupStatus::Dismissed.can_transition_to(PickupStatus::TeacherNotified));
    }

    #[test]
    fn pickup_terminal_states_are_sinks() {
        for next in PickupStatus::all() {
            assert!(!PickupStatus::Dismissed.can_transition_to(*next));
            assert!(!PickupStatus::Cancelled.can_transition_to(*next));
        }
    }

    #[test]
    fn cancel_only_before_dismissal() {
        assert!(PickupStatus::Pending.can_cancel());
        assert!(PickupStatus::TeacherNotified.can_cancel());
        assert!(!PickupStatus::Dismissed.can_cancel());
        assert!(!PickupStatus::Cancelled.can_cancel());
    }

    #[test]
    fn pickup_status_roundtrip() {
        for status in PickupStatus::all() {
            let parsed = PickupStatus::from_str(status.as_str()).unwrap();
            assert_eq!(*status, parsed);
        }
    }

    #[test]
    fn pickup_status_serde_snake_case() {
        let json = serde_json::to_string(&PickupStatus::TeacherNotified).unwrap();
        assert_eq!(json, "\"teacher_notified\"");
    }

    #[test]
    fn trip_transitions() {
        assert!(TripStatus::Scheduled.can_transition_to(TripStatus::InProgress));
        assert!(TripStatus::InProgress.can_transition_to(TripStatus::Completed));
        assert!(!TripStatus::Completed.can_transition_to(TripStatus::InProgress));
        assert!(!TripStatus::Scheduled.can_transition_to(TripStatus::Completed));
    }

    #[test]
    fn method_roundtrip() {
        assert_eq!(Method::from_str("post").unwrap(), Method::Post);
        assert_eq!(Method::from_str("DELETE").unwrap(), Method::Delete);
        assert!(Method::from_str("GET").is_err());
    }

    #[test]
    fn entity_ref_display() {
        assert_eq!(EntityRef::pickup(42).to_string(), "pickup/42");
    }
}
