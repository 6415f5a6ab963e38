use serde::{Deserialize, Serialize};

/// Coarse classification of what a message is trying to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentType {
    OutletInquiry,
    RestaurantSearch,
    ProductSearch,
    Calculation,
    GeneralQuery,
}

impl IntentType {
    pub const ALL: [IntentType; 5] = [
        Self::OutletInquiry,
        Self::RestaurantSearch,
        Self::ProductSearch,
        Self::Calculation,
        Self::GeneralQuery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OutletInquiry => "OUTLET_INQUIRY",
            Self::RestaurantSearch => "RESTAURANT_SEARCH",
            Self::ProductSearch => "PRODUCT_SEARCH",
            Self::Calculation => "CALCULATION",
            Self::GeneralQuery => "GENERAL_QUERY",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "OUTLET_INQUIRY" => Some(Self::OutletInquiry),
            "RESTAURANT_SEARCH" => Some(Self::RestaurantSearch),
            "PRODUCT_SEARCH" => Some(Self::ProductSearch),
            "CALCULATION" => Some(Self::Calculation),
            "GENERAL_QUERY" => Some(Self::GeneralQuery),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::OutletInquiry => "outlet locations and information",
            Self::RestaurantSearch => "restaurant recommendations",
            Self::ProductSearch => "product searches",
            Self::Calculation => "calculations",
            Self::GeneralQuery => "general questions",
        }
    }
}

impl std::fmt::Display for IntentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
