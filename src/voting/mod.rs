pub mod engine;
pub mod export;
pub mod messages;
pub mod quorum;

pub use engine::{Conversation, Election, Turn, VotingContext, VotingError};
pub use messages::{ChatState, Prompt, Rendered};
pub use quorum::QuorumTracker;
