use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Unavailable,
    Busy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub restaurant_id: Option<Uuid>,
    pub availability: Availability,
    /// Set while `availability == Busy`, cleared on release.
    pub current_order: Option<Uuid>,
    /// When the driver last became available; drives fairness in matching.
    pub available_since: Option<DateTime<Utc>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    pub fn serves(&self, restaurant_id: Uuid) -> bool {
        self.restaurant_id.is_none_or(|affiliation| affiliation == restaurant_id)
    }

    pub fn is_assignable(&self) -> bool {
        self.active && self.availability == Availability::Available && self.current_order.is_none()
    }
}
