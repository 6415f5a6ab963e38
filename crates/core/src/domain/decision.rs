//! Planner output. A [`Decision`] is rebuilt for every turn and never stored;
//! only the turn it produces is.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::intent::IntentType;
use crate::domain::tool::ToolParams;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    AskClarification,
    RequestMissingInfo,
    ProvideResponse,
    CallCalculator,
    SearchOutlets,
    SearchRestaurants,
    SearchProducts,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AskClarification => "ASK_CLARIFICATION",
            Self::RequestMissingInfo => "REQUEST_MISSING_INFO",
            Self::ProvideResponse => "PROVIDE_RESPONSE",
            Self::CallCalculator => "CALL_CALCULATOR",
            Self::SearchOutlets => "SEARCH_OUTLETS",
            Self::SearchRestaurants => "SEARCH_RESTAURANTS",
            Self::SearchProducts => "SEARCH_PRODUCTS",
        }
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(
            self,
            Self::CallCalculator
                | Self::SearchOutlets
                | Self::SearchRestaurants
                | Self::SearchProducts
        )
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Built-in tools, each bound to exactly one intent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Calculator,
    OutletSearch,
    RestaurantSearch,
    ProductSearch,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] =
        [Self::Calculator, Self::OutletSearch, Self::RestaurantSearch, Self::ProductSearch];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Calculator => "calculator",
            Self::OutletSearch => "outlet_search",
            Self::RestaurantSearch => "restaurant_search",
            Self::ProductSearch => "product_search",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == value.trim())
    }

    pub fn bound_intent(&self) -> IntentType {
        match self {
            Self::Calculator => IntentType::Calculation,
            Self::OutletSearch => IntentType::OutletInquiry,
            Self::RestaurantSearch => IntentType::RestaurantSearch,
            Self::ProductSearch => IntentType::ProductSearch,
        }
    }

    pub fn for_intent(intent: IntentType) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.bound_intent() == intent)
    }

    pub fn action_kind(&self) -> ActionKind {
        match self {
            Self::Calculator => ActionKind::CallCalculator,
            Self::OutletSearch => ActionKind::SearchOutlets,
            Self::RestaurantSearch => ActionKind::SearchRestaurants,
            Self::ProductSearch => ActionKind::SearchProducts,
        }
    }
}

/// How a `PROVIDE_RESPONSE` action should be worded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStyle {
    /// Default informative answer for the intent.
    Informative,
    /// Answer immediately from whatever is already known.
    BestEffort,
    /// Said after a tool could not deliver.
    PartialInformation,
    GenericHelp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    AskClarification {
        intent: IntentType,
    },
    RequestMissingInfo {
        intent: IntentType,
        missing: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        candidates: BTreeMap<String, Vec<Value>>,
    },
    CallTool {
        tool: ToolKind,
        params: ToolParams,
    },
    ProvideResponse {
        intent: IntentType,
        style: ResponseStyle,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::AskClarification { .. } => ActionKind::AskClarification,
            Self::RequestMissingInfo { .. } => ActionKind::RequestMissingInfo,
            Self::CallTool { tool, .. } => tool.action_kind(),
            Self::ProvideResponse { .. } => ActionKind::ProvideResponse,
        }
    }
}

/// Signals the planner scored before walking its decision tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionScores {
    pub completeness: f64,
    pub tool_relevance: f64,
    pub urgency: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub intent: IntentType,
    pub primary_action: Action,
    pub fallback_actions: Vec<Action>,
    pub reasoning: String,
    pub confidence: f64,
    pub scores: DecisionScores,
}

impl Decision {
    pub fn primary_kind(&self) -> ActionKind {
        self.primary_action.kind()
    }

    /// Primary action first, then the fallbacks in order.
    pub fn attempt_order(&self) -> impl Iterator<Item = &Action> {
        std::iter::once(&self.primary_action).chain(self.fallback_actions.iter())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::domain::intent::IntentType;
    use crate::domain::tool::ToolParams;

    use super::{Action, ActionKind, ToolKind};

    #[test]
    fn every_tool_maps_back_from_its_intent() {
        for tool in ToolKind::ALL {
            assert_eq!(ToolKind::for_intent(tool.bound_intent()), Some(tool));
            assert_eq!(ToolKind::parse(tool.name()), Some(tool));
            assert!(tool.action_kind().is_tool_call());
        }
        assert_eq!(ToolKind::for_intent(IntentType::GeneralQuery), None);
    }

    #[test]
    fn tool_action_reports_the_tool_specific_kind() {
        let action = Action::CallTool {
            tool: ToolKind::Calculator,
            params: ToolParams::new().with("expression", "1 + 1"),
        };

        assert_eq!(action.kind(), ActionKind::CallCalculator);
        let value = serde_json::to_value(&action).expect("serialize action");
        assert_eq!(value["type"], json!("call_tool"));
        assert_eq!(value["tool"], json!("calculator"));
    }
}
