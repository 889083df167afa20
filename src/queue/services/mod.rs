//! Application services orchestrating the queue protocol.

mod agent;
mod builder;

pub use agent::{
    AgentConfig, AgentError, AgentResult, AgentService, EchoHandler, HandlerRegistry, PassSummary,
};
pub use builder::{BuilderError, BuilderResult, BuilderService};
