mod ballot;
mod session;

pub use ballot::{Ballot, BallotError, Item, Section};
pub use session::{Session, SessionKey, SessionStatus, SectionVotes, Vote, Voter, VoterId};
