use serde::{Deserialize, Serialize};

/// Owner contact details resolved into listing responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerContact {
    pub user_id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Listing (property for rent) exposed on the wire. A chat conversation is
/// scoped to exactly one listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub property_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub location: String,
    pub city: String,
    pub price: i64,
    /// Free-form kind: apartment, house, duplex, ...
    #[serde(rename = "type")]
    pub kind: String,
    pub bedrooms: i64,
    pub bathrooms: i64,
    pub size: i64,
    pub images: Vec<String>,
    pub featured: bool,
    pub available: bool,
    pub owner: OwnerContact,
    pub created_at: String, // RFC3339 UTC
}
