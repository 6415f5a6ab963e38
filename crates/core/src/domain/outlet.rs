use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutletKey(pub String);

/// A physical outlet. `area_key` groups outlets under a wider location
/// such as `petaling_jaya`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outlet {
    pub key: OutletKey,
    pub name: String,
    pub area_key: String,
    pub location: String,
    pub address: String,
    pub opening_hours: String,
    pub phone: String,
    pub services: Vec<String>,
}
