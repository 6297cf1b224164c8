use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Restaurant,
    Driver,
    Admin,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "customer" => Some(Role::Customer),
            "restaurant" => Some(Role::Restaurant),
            "driver" => Some(Role::Driver),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// An already-validated identity claim handed over by the auth layer.
///
/// Customer, restaurant and driver claims carry the id of the party they
/// represent; admin claims carry none.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub role: Role,
    pub id: Option<Uuid>,
}

impl Actor {
    pub fn customer(id: Uuid) -> Self {
        Self {
            role: Role::Customer,
            id: Some(id),
        }
    }

    pub fn restaurant(id: Uuid) -> Self {
        Self {
            role: Role::Restaurant,
            id: Some(id),
        }
    }

    pub fn driver(id: Uuid) -> Self {
        Self {
            role: Role::Driver,
            id: Some(id),
        }
    }

    pub fn admin() -> Self {
        Self {
            role: Role::Admin,
            id: None,
        }
    }

    pub fn is(&self, role: Role, id: Uuid) -> bool {
        self.role == role && self.id == Some(id)
    }
}
