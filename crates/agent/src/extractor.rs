//! Rule-table intent and entity extraction.
//!
//! Extraction is a pure function of the message and the prior-turn summary.
//! Rules are tried in table order and the first whose predicate holds decides
//! the intent and its confidence. Entity sub-extractors run independently of
//! the rule; the matched intent only selects which kinds end up on the result.

use serde::Serialize;

use parley_core::config::ExtractorConfig;
use parley_core::domain::conversation::PriorTurnSummary;
use parley_core::domain::entity::{Entities, Entity, QueryType};
use parley_core::domain::intent::IntentType;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Extraction {
    pub intent: IntentType,
    pub confidence: f64,
    pub entities: Entities,
    pub rule: &'static str,
}

#[derive(Clone, Copy, Debug)]
enum RuleConfidence {
    Fixed(f64),
    Carryover,
}

struct IntentRule {
    name: &'static str,
    confidence: RuleConfidence,
    matches: fn(&MessageFeatures, &PriorTurnSummary) -> Option<IntentType>,
}

const RULES: &[IntentRule] = &[
    IntentRule {
        name: "outlet_keyword",
        confidence: RuleConfidence::Fixed(0.9),
        matches: |features, _| {
            features.has_any(OUTLET_TERMS).then_some(IntentType::OutletInquiry)
        },
    },
    IntentRule {
        name: "outlet_follow_up",
        confidence: RuleConfidence::Carryover,
        matches: |features, prior| {
            let follows_outlet = prior.intent == Some(IntentType::OutletInquiry);
            let names_outlet_detail =
                !features.locations.is_empty() || features.query_type.is_some();
            (follows_outlet && names_outlet_detail).then_some(IntentType::OutletInquiry)
        },
    },
    IntentRule {
        name: "restaurant_keyword",
        confidence: RuleConfidence::Fixed(0.8),
        matches: |features, _| {
            features.has_any(RESTAURANT_TERMS).then_some(IntentType::RestaurantSearch)
        },
    },
    IntentRule {
        name: "product_keyword",
        confidence: RuleConfidence::Fixed(0.8),
        matches: |features, _| features.has_any(PRODUCT_TERMS).then_some(IntentType::ProductSearch),
    },
    IntentRule {
        name: "calculation",
        confidence: RuleConfidence::Fixed(0.9),
        matches: |features, _| {
            (features.has_any(CALCULATION_TERMS) || features.expression.is_some())
                .then_some(IntentType::Calculation)
        },
    },
    IntentRule {
        name: "greeting",
        confidence: RuleConfidence::Fixed(0.6),
        matches: |features, _| features.has_any(GREETING_TERMS).then_some(IntentType::GeneralQuery),
    },
    IntentRule {
        name: "pending_carryover",
        confidence: RuleConfidence::Carryover,
        matches: |_, prior| prior.carryover_intent(),
    },
];

const OUTLET_TERMS: &[&str] =
    &["outlet", "outlets", "store", "stores", "branch", "branches", "location", "locations"];
const RESTAURANT_TERMS: &[&str] = &[
    "restaurant",
    "restaurants",
    "food",
    "eat",
    "dining",
    "dinner",
    "lunch",
    "breakfast",
];
const PRODUCT_TERMS: &[&str] =
    &["product", "products", "buy", "purchase", "item", "items", "shop", "shopping"];
const CALCULATION_TERMS: &[&str] = &[
    "calculate",
    "compute",
    "math",
    "add",
    "subtract",
    "multiply",
    "divide",
    "plus",
    "minus",
];
const GREETING_TERMS: &[&str] = &[
    "hello",
    "hi",
    "hey",
    "help",
    "thanks",
    "thank you",
    "good morning",
    "good afternoon",
    "good evening",
];

struct LocationEntry {
    key: &'static str,
    label: &'static str,
    area: Option<&'static str>,
    aliases: &'static [&'static str],
}

const LOCATIONS: &[LocationEntry] = &[
    LocationEntry {
        key: "ss2",
        label: "SS2",
        area: Some("petaling_jaya"),
        aliases: &["ss2", "ss 2", "sea park"],
    },
    LocationEntry {
        key: "mid_valley",
        label: "Mid Valley",
        area: Some("kuala_lumpur"),
        aliases: &["mid valley", "midvalley"],
    },
    LocationEntry {
        key: "one_utama",
        label: "1 Utama",
        area: Some("petaling_jaya"),
        aliases: &["1 utama", "one utama", "1utama"],
    },
    LocationEntry {
        key: "petaling_jaya",
        label: "Petaling Jaya",
        area: None,
        aliases: &["petaling jaya", "pj", "petaling"],
    },
    LocationEntry {
        key: "kuala_lumpur",
        label: "Kuala Lumpur",
        area: None,
        aliases: &["kuala lumpur", "kl", "kuala"],
    },
];

const QUERY_TYPE_TERMS: &[(QueryType, &[&str])] = &[
    (QueryType::OpeningHours, &["open", "opening", "opens", "hours", "time", "close", "closing"]),
    (QueryType::Contact, &["phone", "contact", "number", "call"]),
    (QueryType::Address, &["address", "where", "located"]),
    (QueryType::Services, &["services", "service", "delivery", "takeaway", "dine in"]),
];

const CUISINES: &[(&str, &[&str])] = &[
    ("Malaysian", &["malaysian", "malay", "nasi lemak", "laksa"]),
    ("Chinese", &["chinese", "dim sum"]),
    ("Indian", &["indian", "roti canai", "tandoori"]),
    ("Japanese", &["japanese", "sushi"]),
    ("Italian", &["italian", "pizza", "pasta"]),
    ("Thai", &["thai", "tom yum"]),
    ("American", &["american", "burger", "burgers"]),
];

const CATEGORIES: &[(&str, &[&str])] = &[
    ("Electronics", &["electronics", "electronic", "gadget", "gadgets"]),
    ("Health & Fitness", &["health", "fitness", "yoga", "gym"]),
    ("Food & Beverage", &["beverage", "beverages", "drink", "drinks", "tea", "coffee"]),
    ("Furniture", &["furniture", "chair", "desk"]),
    ("Home & Garden", &["home", "garden", "kitchen"]),
    ("Fashion", &["fashion", "shoes", "clothing", "apparel"]),
];

const OPERATORS: &[char] = &['+', '-', '*', '/', '%', '^'];

/// Display name for a gazetteer location key.
pub fn location_label(key: &str) -> Option<&'static str> {
    LOCATIONS.iter().find(|entry| entry.key == key).map(|entry| entry.label)
}

#[derive(Clone, Debug)]
pub struct IntentExtractor {
    config: ExtractorConfig,
}

impl Default for IntentExtractor {
    fn default() -> Self {
        Self::new(ExtractorConfig::default())
    }
}

impl IntentExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn extract(&self, message: &str, prior: &PriorTurnSummary) -> Extraction {
        let features = MessageFeatures::from_message(message);

        for rule in RULES {
            if let Some(intent) = (rule.matches)(&features, prior) {
                let confidence = match rule.confidence {
                    RuleConfidence::Fixed(value) => value,
                    RuleConfidence::Carryover => self.config.carryover_confidence,
                };
                return Extraction {
                    intent,
                    confidence,
                    entities: features.entities_for(intent),
                    rule: rule.name,
                };
            }
        }

        Extraction {
            intent: IntentType::GeneralQuery,
            confidence: self.config.unmatched_confidence,
            entities: Entities::new(),
            rule: "unmatched",
        }
    }
}

struct MessageFeatures {
    padded: String,
    locations: Vec<&'static str>,
    query_type: Option<QueryType>,
    cuisines: Vec<&'static str>,
    categories: Vec<&'static str>,
    expression: Option<String>,
    search_term: Option<String>,
}

impl MessageFeatures {
    fn from_message(message: &str) -> Self {
        let padded = format!(" {} ", normalize_text(message));

        let mut features = Self {
            locations: Vec::new(),
            query_type: None,
            cuisines: Vec::new(),
            categories: Vec::new(),
            expression: extract_expression(message),
            search_term: extract_search_term(message),
            padded,
        };
        features.locations = features.extract_locations();
        features.query_type = QUERY_TYPE_TERMS
            .iter()
            .find(|(_, terms)| features.has_any(terms))
            .map(|(query_type, _)| *query_type);
        features.cuisines = features.match_gazetteer(CUISINES);
        features.categories = features.match_gazetteer(CATEGORIES);
        features
    }

    fn has_term(&self, term: &str) -> bool {
        self.padded.contains(&format!(" {term} "))
    }

    fn has_any(&self, terms: &[&str]) -> bool {
        terms.iter().any(|term| self.has_term(term))
    }

    fn match_gazetteer(&self, table: &[(&'static str, &[&str])]) -> Vec<&'static str> {
        table
            .iter()
            .filter(|(_, aliases)| self.has_any(aliases))
            .map(|(canonical, _)| *canonical)
            .collect()
    }

    /// Matched location keys. An area is dropped when an outlet inside it was
    /// also named, so "Mid Valley, Kuala Lumpur" is one location, not two.
    fn extract_locations(&self) -> Vec<&'static str> {
        let matched: Vec<&LocationEntry> =
            LOCATIONS.iter().filter(|entry| self.has_any(entry.aliases)).collect();

        matched
            .iter()
            .filter(|entry| !matched.iter().any(|other| other.area == Some(entry.key)))
            .map(|entry| entry.key)
            .collect()
    }

    fn entities_for(&self, intent: IntentType) -> Entities {
        let mut entities = Entities::new();
        match intent {
            IntentType::OutletInquiry => {
                entities.extend(self.locations.iter().map(|key| Entity::Location(key.to_string())));
                entities.push(Entity::QueryType(self.query_type.unwrap_or(QueryType::General)));
            }
            IntentType::RestaurantSearch => {
                entities.extend(self.cuisines.iter().map(|name| Entity::Cuisine(name.to_string())));
                entities.extend(self.locations.iter().map(|key| Entity::Location(key.to_string())));
            }
            IntentType::ProductSearch => {
                entities
                    .extend(self.categories.iter().map(|name| Entity::Category(name.to_string())));
                if let Some(term) = &self.search_term {
                    entities.push(Entity::SearchTerm(term.clone()));
                }
            }
            IntentType::Calculation => {
                if let Some(expression) = &self.expression {
                    entities.push(Entity::Expression(expression.clone()));
                }
            }
            IntentType::GeneralQuery => {}
        }
        entities
    }
}

fn normalize_text(text: &str) -> String {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_alphanumeric() {
            sanitized.extend(character.to_lowercase());
        } else {
            sanitized.push(' ');
        }
    }
    sanitized.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Rewrites worded arithmetic into operators.
fn normalize_arithmetic(text: &str) -> String {
    let tokens: Vec<String> = text.split_whitespace().map(str::to_lowercase).collect();
    let mut rewritten = Vec::with_capacity(tokens.len());
    let mut index = 0;

    while index < tokens.len() {
        let next = tokens.get(index + 1).map(String::as_str);
        let (operator, consumed) = match (tokens[index].as_str(), next) {
            ("multiplied", Some("by")) => ("*", 2),
            ("divided", Some("by")) => ("/", 2),
            ("plus", _) => ("+", 1),
            ("minus", _) => ("-", 1),
            ("times", _) => ("*", 1),
            (token, _) => (token, 1),
        };
        rewritten.push(operator.to_string());
        index += consumed;
    }

    rewritten.join(" ")
}

/// The longest run of arithmetic characters holding at least two operands
/// and one operator.
fn extract_expression(message: &str) -> Option<String> {
    let normalized = normalize_arithmetic(message);
    let is_arithmetic = |character: char| {
        character.is_ascii_digit()
            || character == '.'
            || character == '('
            || character == ')'
            || character == ' '
            || OPERATORS.contains(&character)
    };

    let mut best: Option<&str> = None;
    for run in normalized.split(|character: char| !is_arithmetic(character)) {
        let candidate = run.trim();
        if !looks_like_expression(candidate) {
            continue;
        }
        if best.map_or(true, |current| candidate.len() > current.len()) {
            best = Some(candidate);
        }
    }

    best.map(str::to_string)
}

fn looks_like_expression(candidate: &str) -> bool {
    let operands = candidate
        .split(|character: char| !(character.is_ascii_digit() || character == '.'))
        .filter(|part| part.chars().any(|character| character.is_ascii_digit()))
        .count();
    operands >= 2 && candidate.contains(OPERATORS)
}

/// A quoted phrase, or the words after "called" / "named".
fn extract_search_term(message: &str) -> Option<String> {
    let mut quoted = message.split('"');
    if let (Some(_), Some(inner), Some(_)) = (quoted.next(), quoted.next(), quoted.next()) {
        let inner = inner.trim();
        if !inner.is_empty() {
            return Some(inner.to_string());
        }
    }

    let lowered = message.to_lowercase();
    ["called ", "named "].iter().find_map(|marker| {
        let start = lowered.find(marker)? + marker.len();
        let tail = message.get(start..)?;
        let term = tail
            .trim_end_matches(|character: char| matches!(character, '?' | '!' | '.'))
            .trim();
        (!term.is_empty()).then(|| term.to_string())
    })
}
