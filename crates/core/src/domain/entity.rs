//! Typed entities pulled out of a user message.
//!
//! Entities stay typed inside the engine and are flattened into a
//! `slot name -> JSON value` map only when they cross the persistence or
//! transport boundary. A slot with more than one candidate flattens to an
//! array; that is how an ambiguous location survives a round trip.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DomainError;

pub const LOCATION: &str = "location";
pub const EXPRESSION: &str = "expression";
pub const QUERY_TYPE: &str = "query_type";
pub const CUISINE: &str = "cuisine";
pub const CATEGORY: &str = "category";
pub const SEARCH_TERM: &str = "search_term";

/// What an outlet inquiry is actually asking about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    OpeningHours,
    Contact,
    Address,
    Services,
    General,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpeningHours => "opening_hours",
            Self::Contact => "contact",
            Self::Address => "address",
            Self::Services => "services",
            Self::General => "general",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "opening_hours" => Some(Self::OpeningHours),
            "contact" => Some(Self::Contact),
            "address" => Some(Self::Address),
            "services" => Some(Self::Services),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Entity {
    /// Gazetteer key, e.g. `ss2` or `petaling_jaya`.
    Location(String),
    Expression(String),
    QueryType(QueryType),
    Cuisine(String),
    Category(String),
    SearchTerm(String),
}

impl Entity {
    pub fn slot_name(&self) -> &'static str {
        match self {
            Self::Location(_) => LOCATION,
            Self::Expression(_) => EXPRESSION,
            Self::QueryType(_) => QUERY_TYPE,
            Self::Cuisine(_) => CUISINE,
            Self::Category(_) => CATEGORY,
            Self::SearchTerm(_) => SEARCH_TERM,
        }
    }

    pub fn flat_value(&self) -> Value {
        match self {
            Self::Location(value)
            | Self::Expression(value)
            | Self::Cuisine(value)
            | Self::Category(value)
            | Self::SearchTerm(value) => Value::String(value.clone()),
            Self::QueryType(query_type) => Value::String(query_type.as_str().to_string()),
        }
    }

    fn from_flat(slot_name: &str, value: &str) -> Result<Self, DomainError> {
        let entity = match slot_name {
            LOCATION => Self::Location(value.to_string()),
            EXPRESSION => Self::Expression(value.to_string()),
            QUERY_TYPE => Self::QueryType(QueryType::parse(value).ok_or_else(|| {
                DomainError::InvariantViolation(format!("unknown query type `{value}`"))
            })?),
            CUISINE => Self::Cuisine(value.to_string()),
            CATEGORY => Self::Category(value.to_string()),
            SEARCH_TERM => Self::SearchTerm(value.to_string()),
            other => {
                return Err(DomainError::InvariantViolation(format!(
                    "unknown entity slot `{other}`"
                )))
            }
        };
        Ok(entity)
    }
}

/// Ordered entity list. Several entities of one kind are candidates, not
/// alternatives to be silently collapsed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entities(Vec<Entity>);

impl Entities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entity: Entity) {
        if !self.0.contains(&entity) {
            self.0.push(entity);
        }
    }

    pub fn extend(&mut self, entities: impl IntoIterator<Item = Entity>) {
        for entity in entities {
            self.push(entity);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, slot_name: &str) -> bool {
        self.0.iter().any(|entity| entity.slot_name() == slot_name)
    }

    pub fn candidates(&self, slot_name: &str) -> Vec<Value> {
        self.0
            .iter()
            .filter(|entity| entity.slot_name() == slot_name)
            .map(Entity::flat_value)
            .collect()
    }

    pub fn locations(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter_map(|entity| match entity {
                Entity::Location(key) => Some(key.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn query_type(&self) -> Option<QueryType> {
        self.0.iter().find_map(|entity| match entity {
            Entity::QueryType(query_type) => Some(*query_type),
            _ => None,
        })
    }

    /// Slots with exactly one candidate.
    pub fn resolved(&self) -> BTreeMap<String, Value> {
        self.grouped()
            .into_iter()
            .filter_map(|(name, mut values)| {
                (values.len() == 1).then(|| (name.to_string(), values.remove(0)))
            })
            .collect()
    }

    /// Slots with more than one candidate, with every candidate in order.
    pub fn ambiguous(&self) -> BTreeMap<String, Vec<Value>> {
        self.grouped()
            .into_iter()
            .filter(|(_, values)| values.len() > 1)
            .map(|(name, values)| (name.to_string(), values))
            .collect()
    }

    pub fn to_flat(&self) -> BTreeMap<String, Value> {
        self.grouped()
            .into_iter()
            .map(|(name, mut values)| {
                let value =
                    if values.len() == 1 { values.remove(0) } else { Value::Array(values) };
                (name.to_string(), value)
            })
            .collect()
    }

    pub fn from_flat(flat: &BTreeMap<String, Value>) -> Result<Self, DomainError> {
        let mut entities = Self::new();
        for (name, value) in flat {
            match value {
                Value::String(text) => entities.push(Entity::from_flat(name, text)?),
                Value::Array(items) => {
                    for item in items {
                        let text = item.as_str().ok_or_else(|| {
                            DomainError::InvariantViolation(format!(
                                "entity `{name}` holds a non-string candidate"
                            ))
                        })?;
                        entities.push(Entity::from_flat(name, text)?);
                    }
                }
                other => {
                    return Err(DomainError::InvariantViolation(format!(
                        "entity `{name}` has unsupported value {other}"
                    )))
                }
            }
        }
        Ok(entities)
    }

    fn grouped(&self) -> BTreeMap<&'static str, Vec<Value>> {
        let mut grouped: BTreeMap<&'static str, Vec<Value>> = BTreeMap::new();
        for entity in &self.0 {
            grouped.entry(entity.slot_name()).or_default().push(entity.flat_value());
        }
        grouped
    }
}

impl FromIterator<Entity> for Entities {
    fn from_iter<T: IntoIterator<Item = Entity>>(iter: T) -> Self {
        let mut entities = Self::new();
        entities.extend(iter);
        entities
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{Entities, Entity, QueryType, LOCATION, QUERY_TYPE};

    #[test]
    fn multiple_locations_flatten_to_a_candidate_list() {
        let entities: Entities = [
            Entity::Location("ss2".to_string()),
            Entity::Location("mid_valley".to_string()),
            Entity::QueryType(QueryType::OpeningHours),
        ]
        .into_iter()
        .collect();

        let flat = entities.to_flat();
        assert_eq!(flat.get(LOCATION), Some(&json!(["ss2", "mid_valley"])));
        assert_eq!(flat.get(QUERY_TYPE), Some(&json!("opening_hours")));

        assert!(!entities.resolved().contains_key(LOCATION));
        assert_eq!(entities.ambiguous().get(LOCATION).map(Vec::len), Some(2));

        let restored = Entities::from_flat(&flat).expect("flat entities decode");
        assert_eq!(restored.locations(), vec!["ss2", "mid_valley"]);
        assert_eq!(restored.query_type(), Some(QueryType::OpeningHours));
    }

    #[test]
    fn duplicate_entities_are_collapsed() {
        let mut entities = Entities::new();
        entities.push(Entity::Cuisine("Japanese".to_string()));
        entities.push(Entity::Cuisine("Japanese".to_string()));

        assert_eq!(entities.len(), 1);
        assert_eq!(entities.resolved().get("cuisine"), Some(&Value::from("Japanese")));
    }

    #[test]
    fn unknown_flat_slot_is_rejected() {
        let mut flat = std::collections::BTreeMap::new();
        flat.insert("weather".to_string(), json!("sunny"));

        assert!(Entities::from_flat(&flat).is_err());
    }
}
