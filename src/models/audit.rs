use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Audit trail entry for a change made through a service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditLog {
    pub id: Uuid,
    pub action: AuditAction,
    /// Who made the change, if known
    pub actor: Option<String>,
    pub object_type: String,
    pub object_id: Uuid,
    /// Snapshot of the object after the change
    pub object_repr: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditLog {
    pub fn new(
        action: AuditAction,
        actor: Option<String>,
        object_type: impl Into<String>,
        object_id: Uuid,
        object_repr: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            actor,
            object_type: object_type.into(),
            object_id,
            object_repr,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}
