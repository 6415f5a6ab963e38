use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use parley_core::domain::decision::{ResponseStyle, ToolKind};
use parley_core::domain::entity::{CATEGORY, CUISINE, EXPRESSION, LOCATION, SEARCH_TERM};
use parley_core::domain::intent::IntentType;

use crate::extractor::location_label;
use crate::tools::calculator::CalculationResult;
use crate::tools::catalog::{ProductSearchResult, RestaurantSearchResult};
use crate::tools::outlet::OutletSearchResult;

pub const LAST_RESORT_RESPONSE: &str =
    "I apologize, but I'm having trouble processing your request right now. Please try again.";

pub const PERSISTENCE_FAILURE_RESPONSE: &str =
    "I'm sorry, something went wrong on my side and I couldn't save this conversation. Please try again.";

const HELP_TEXT: &str = "I'm here to help you with outlet information, restaurant recommendations, \
product searches, and calculations. How can I assist you today?";

const SUMMARY_SLOTS: &[&str] = &[LOCATION, CUISINE, CATEGORY, SEARCH_TERM, EXPRESSION];

pub fn clarification(intent: IntentType) -> String {
    match intent {
        IntentType::GeneralQuery => format!(
            "I'm not sure I understood that. I can help with {}, {}, {} and {}. What would you like to know?",
            IntentType::OutletInquiry.label(),
            IntentType::RestaurantSearch.label(),
            IntentType::ProductSearch.label(),
            IntentType::Calculation.label(),
        ),
        intent => format!(
            "I'm not sure I understood your question about {}. Could you rephrase it?",
            intent.label()
        ),
    }
}

pub fn missing_info(missing: &[String], candidates: &BTreeMap<String, Vec<Value>>) -> String {
    if let Some((slot, values)) = candidates.iter().next() {
        let options = values
            .iter()
            .map(|value| display_value(slot, value))
            .collect::<Vec<_>>()
            .join(" or ");
        return format!(
            "I found more than one {}: {options}. Which one did you mean?",
            friendly_slot_name(slot)
        );
    }

    let wanted = missing.iter().map(|slot| friendly_slot_name(slot)).collect::<Vec<_>>();
    if wanted.is_empty() {
        return clarification(IntentType::GeneralQuery);
    }
    format!("To help you better, could you please specify the {}?", wanted.join(" and "))
}

pub fn provide(
    intent: IntentType,
    style: ResponseStyle,
    known: &BTreeMap<String, Value>,
) -> String {
    let summary = summarize(known);

    match style {
        ResponseStyle::GenericHelp => HELP_TEXT.to_string(),
        ResponseStyle::Informative if intent == IntentType::GeneralQuery => HELP_TEXT.to_string(),
        ResponseStyle::Informative => match summary {
            Some(summary) => format!(
                "I can help with {}, but I can't look that up right now. So far I have {summary}.",
                intent.label()
            ),
            None => format!(
                "I can help with {}. Could you tell me a bit more about what you need?",
                intent.label()
            ),
        },
        ResponseStyle::BestEffort => match summary {
            Some(summary) => format!(
                "Here's what I can tell you right away: I have {summary}. Let me know if you need more."
            ),
            None => HELP_TEXT.to_string(),
        },
        ResponseStyle::PartialInformation => {
            let so_far = summary.map(|summary| format!(" So far I have {summary}.")).unwrap_or_default();
            format!(
                "I couldn't complete the {} just now.{so_far} Please try again in a moment.",
                task_name(intent)
            )
        }
    }
}

/// Renders a successful tool payload. A payload that does not decode is a
/// broken tool contract.
pub fn tool_response(tool: ToolKind, data: &Value) -> Result<String, serde_json::Error> {
    let rendered = match tool {
        ToolKind::Calculator => CalculationResult::deserialize(data)?.render(),
        ToolKind::OutletSearch => OutletSearchResult::deserialize(data)?.render(),
        ToolKind::RestaurantSearch => RestaurantSearchResult::deserialize(data)?.render(),
        ToolKind::ProductSearch => ProductSearchResult::deserialize(data)?.render(),
    };
    Ok(rendered)
}

fn task_name(intent: IntentType) -> &'static str {
    match intent {
        IntentType::OutletInquiry => "outlet lookup",
        IntentType::RestaurantSearch => "restaurant search",
        IntentType::ProductSearch => "product search",
        IntentType::Calculation => "calculation",
        IntentType::GeneralQuery => "request",
    }
}

fn friendly_slot_name(slot: &str) -> &str {
    match slot {
        LOCATION => "location or outlet",
        CUISINE => "cuisine type",
        CATEGORY => "product category",
        EXPRESSION => "calculation",
        SEARCH_TERM => "product name",
        "query_type" => "information you need",
        other => other,
    }
}

fn display_value(slot: &str, value: &Value) -> String {
    let text = match value {
        Value::String(text) => text.as_str(),
        other => return other.to_string(),
    };
    if slot == LOCATION {
        return location_label(text).unwrap_or(text).to_string();
    }
    text.to_string()
}

fn summarize(known: &BTreeMap<String, Value>) -> Option<String> {
    let parts = SUMMARY_SLOTS
        .iter()
        .filter_map(|slot| {
            known
                .get(*slot)
                .map(|value| format!("{} {}", friendly_slot_name(slot), display_value(slot, value)))
        })
        .collect::<Vec<_>>();
    (!parts.is_empty()).then(|| parts.join(", "))
}
