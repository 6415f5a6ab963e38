pub mod config;
pub mod domain;
pub mod errors;

pub use domain::conversation::{
    ConversationId, ConversationMemory, ConversationState, PriorTurnSummary, Slot, SlotDelta,
    Turn, TurnEffects, TurnId,
};
pub use domain::decision::{
    Action, ActionKind, Decision, DecisionScores, ResponseStyle, ToolKind,
};
pub use domain::entity::{Entities, Entity, QueryType};
pub use domain::intent::IntentType;
pub use domain::outlet::{Outlet, OutletKey};
pub use domain::tool::{ParamValue, ToolCallResult, ToolErrorKind, ToolParams};
pub use errors::{ApplicationError, DialogueError, DomainError, InterfaceError};
