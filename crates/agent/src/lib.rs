//! Dialogue engine for the parley assistant.
//!
//! Each user message goes through a fixed loop:
//! 1. **Extraction** (`extractor`) - keyword rules turn text into an intent
//!    and entities, using the previous turn for follow-ups.
//! 2. **Planning** (`planner`) - a decision tree picks the next action and
//!    its fallbacks from confidence, slot completeness and urgency.
//! 3. **Execution** (`executor`) - actions run in order until one answers;
//!    tools go through the `tools` registry and its `guardrails`.
//! 4. **Commit** (`runtime`) - the turn and its slot writes are stored
//!    atomically under the conversation's lock.
//!
//! Nothing in the loop surfaces an error to the user. Failures become
//! fallback responses and show up in the turn trace instead.

pub mod executor;
pub mod extractor;
pub mod guardrails;
pub mod planner;
pub mod responses;
pub mod runtime;
pub mod tools;

pub use executor::{ExecutionOutcome, Executor};
pub use extractor::{Extraction, IntentExtractor};
pub use planner::Planner;
pub use runtime::{DecisionExplanation, DialogueRuntime, SubmitResponse, TurnTrace};
pub use tools::{Tool, ToolFailure, ToolRegistry};
