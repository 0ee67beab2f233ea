use serde::{Deserialize, Serialize};

/// Role permitted to originate order transitions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Actor {
    Customer,
    Restaurant,
    Driver,
    Admin,
}

/// An authenticated identity, resolved once from the role index at login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum User {
    Customer { id: String, name: String },
    Restaurant { id: String, name: String },
    Driver { id: String, name: String },
    Admin { id: String, name: String },
}

impl User {
    pub fn id(&self) -> &str {
        match self {
            User::Customer { id, .. }
            | User::Restaurant { id, .. }
            | User::Driver { id, .. }
            | User::Admin { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            User::Customer { name, .. }
            | User::Restaurant { name, .. }
            | User::Driver { name, .. }
            | User::Admin { name, .. } => name,
        }
    }

    pub fn actor(&self) -> Actor {
        match self {
            User::Customer { .. } => Actor::Customer,
            User::Restaurant { .. } => Actor::Restaurant,
            User::Driver { .. } => Actor::Driver,
            User::Admin { .. } => Actor::Admin,
        }
    }
}
