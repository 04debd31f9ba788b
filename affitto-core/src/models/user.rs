use serde::{Deserialize, Serialize};

/// Account role: tenants browse and book, owners manage listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "tenant")]
    Tenant,
    #[serde(rename = "owner")]
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Tenant => "tenant",
            Role::Owner => "owner",
        }
    }

    /// Parse the DB/wire representation.
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "tenant" => Some(Role::Tenant),
            "owner" => Some(Role::Owner),
            _ => None,
        }
    }
}

/// User exposed on the wire (not a DB model).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Full profile view returned by GET /api/user/profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    pub created_at: String, // RFC3339 UTC
}
