use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use parley_core::domain::decision::ToolKind;
use parley_core::domain::entity::{QueryType, LOCATION, QUERY_TYPE};
use parley_core::domain::outlet::Outlet;
use parley_core::domain::tool::{ToolErrorKind, ToolParams};
use parley_db::OutletDirectory;

use super::{Tool, ToolFailure};
use crate::extractor::location_label;

/// Looks outlets up by outlet key or area key through the directory.
pub struct OutletSearchTool {
    directory: Arc<dyn OutletDirectory>,
}

impl OutletSearchTool {
    pub fn new(directory: Arc<dyn OutletDirectory>) -> Self {
        Self { directory }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutletSearchResult {
    pub location: String,
    pub query_type: QueryType,
    pub outlets: Vec<Outlet>,
}

impl OutletSearchResult {
    /// More than one hit is always answered with the list, never a guess.
    pub fn is_ambiguous(&self) -> bool {
        self.outlets.len() > 1
    }

    pub fn single(&self) -> Option<&Outlet> {
        match self.outlets.as_slice() {
            [outlet] => Some(outlet),
            _ => None,
        }
    }

    pub fn render(&self) -> String {
        let place = location_label(&self.location).unwrap_or(self.location.as_str());

        if let Some(outlet) = self.single() {
            return match self.query_type {
                QueryType::OpeningHours => {
                    format!("The {} is open {}.", outlet.name, outlet.opening_hours)
                }
                QueryType::Contact => {
                    format!("You can contact the {} at {}.", outlet.name, outlet.phone)
                }
                QueryType::Address => {
                    format!("The {} is located at {}.", outlet.name, outlet.address)
                }
                QueryType::Services => {
                    format!("The {} offers {}.", outlet.name, outlet.services.join(", "))
                }
                QueryType::General => format!(
                    "Yes! The {} is located at {}. Operating hours: {}. Phone: {}.",
                    outlet.name, outlet.address, outlet.opening_hours, outlet.phone
                ),
            };
        }

        if self.outlets.is_empty() {
            return format!("I'm sorry, I don't have information about an outlet in {place}.");
        }

        let listed = self
            .outlets
            .iter()
            .map(|outlet| format!("{} ({})", outlet.name, outlet.location))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "We have {} outlets in {place}: {listed}. Which outlet are you referring to?",
            self.outlets.len()
        )
    }
}

#[async_trait]
impl Tool for OutletSearchTool {
    fn kind(&self) -> ToolKind {
        ToolKind::OutletSearch
    }

    fn required_params(&self) -> &'static [&'static str] {
        &[LOCATION]
    }

    async fn execute(&self, params: &ToolParams) -> Result<Value, ToolFailure> {
        let location = params
            .text(LOCATION)
            .ok_or_else(|| ToolFailure::new(ToolErrorKind::MissingParam, "location must be text"))?;
        let query_type = match params.text(QUERY_TYPE) {
            Some(raw) => QueryType::parse(raw).ok_or_else(|| {
                ToolFailure::new(ToolErrorKind::ValidationFailed, format!("unknown query type `{raw}`"))
            })?,
            None => QueryType::General,
        };

        let outlets = self.directory.find_by_location(location).await.map_err(|error| {
            ToolFailure::new(ToolErrorKind::UpstreamUnavailable, error.to_string())
        })?;

        serde_json::to_value(OutletSearchResult {
            location: location.to_string(),
            query_type,
            outlets,
        })
        .map_err(|error| ToolFailure::new(ToolErrorKind::ValidationFailed, error.to_string()))
    }
}
