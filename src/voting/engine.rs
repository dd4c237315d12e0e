//! Per-voter conversation state machine.
//!
//! A `Conversation` holds exactly one pending question. Every inbound
//! message goes through `handle`, which validates the answer against that
//! question, persists accepted answers through the session store and
//! returns the prompts to send next. Invalid answers produce a corrective
//! prompt and leave the stage untouched.

use chrono::Utc;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

use super::export::{build_record, ExportError, ResultExporter};
use super::messages::Prompt;
use super::quorum::{QuorumTracker, QuorumUpdate};
use crate::db::{SessionStore, StoreError};
use crate::models::{Ballot, Section, Session, SessionKey, SessionStatus, Vote, Voter};

#[derive(Debug, Error)]
pub enum VotingError {
    #[error("session storage failed: {0}")]
    Store(#[from] StoreError),
    #[error("result export failed: {0}")]
    Export(#[from] ExportError),
    #[error("no election is loaded")]
    NoElection,
}

/// The election currently open, shared read-only by all conversations.
pub struct Election {
    pub ballot: Arc<Ballot>,
    pub quorum: QuorumTracker,
    pub exporter: ResultExporter,
}

pub struct VotingContext {
    pub election: Option<Arc<Election>>,
    pub sessions: Arc<dyn SessionStore>,
}

/// What one inbound message produced.
#[derive(Debug, Default)]
pub struct Turn {
    pub prompts: Vec<Prompt>,
    pub finished: bool,
    // Set when this turn completed the ballot
    pub quorum: Option<QuorumUpdate>,
}

impl Turn {
    fn push(&mut self, prompt: Prompt) {
        self.prompts.push(prompt);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Consent {
    Recast,
    Resume,
    Start,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Stage {
    Init,
    Consent(Consent),
    // Yes/no per item; `order` is the shuffled item order for this pass
    Approval {
        section: usize,
        order: Vec<usize>,
        position: usize,
    },
    // One pick per seat, `seat` is 1-based
    Seat {
        section: usize,
        order: Vec<usize>,
        seat: usize,
        seats: usize,
        selections: Vec<String>,
    },
    Finished,
}

enum Choice {
    Abstain,
    Index(usize),
    Invalid,
}

fn parse_yes_no(input: &str) -> Option<bool> {
    match input.trim().to_lowercase().as_str() {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}

fn parse_choice(input: &str) -> Choice {
    let input = input.trim().to_lowercase();
    if input == "none" {
        return Choice::Abstain;
    }
    match input.parse::<usize>() {
        Ok(0) => Choice::Abstain,
        Ok(index) => Choice::Index(index),
        Err(_) => Choice::Invalid,
    }
}

/// Display order for a seat: seat `n` sees the section order rotated
/// right by `n` positions.
pub(crate) fn seat_order(order: &[usize], seat: usize) -> Vec<usize> {
    let mut rotated = order.to_vec();
    if !rotated.is_empty() {
        let offset = seat % rotated.len();
        rotated.rotate_right(offset);
    }
    rotated
}

/// Candidates chosen in a seat-limited section, by seat number.
fn seat_choices(session: &Session, title: &str) -> Vec<(usize, String)> {
    let mut choices: Vec<(usize, String)> = session
        .section_votes(title)
        .map(|votes| {
            votes
                .iter()
                .filter_map(|(seat, vote)| match (seat.parse::<usize>(), vote) {
                    (Ok(seat), Vote::Chose(name)) => Some((seat, name.clone())),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    choices.sort_by_key(|(seat, _)| *seat);
    choices
}

pub struct Conversation {
    id: Uuid,
    voter: Voter,
    stage: Stage,
    rng: StdRng,
    last_activity: Instant,
}

impl Conversation {
    pub fn new(voter: Voter) -> Self {
        Self::with_rng(voter, StdRng::from_entropy())
    }

    pub fn with_rng(voter: Voter, rng: StdRng) -> Self {
        Self {
            id: Uuid::new_v4(),
            voter,
            stage: Stage::Init,
            rng,
            last_activity: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_new(&self) -> bool {
        self.stage == Stage::Init
    }

    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Finished
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Advance the conversation with the voter's next message.
    ///
    /// On error the stage is left where it was, so the voter can simply
    /// answer again.
    pub async fn handle(&mut self, ctx: &VotingContext, input: &str) -> Result<Turn, VotingError> {
        self.last_activity = Instant::now();
        let mut turn = Turn::default();

        let next = match self.stage.clone() {
            Stage::Init => self.greet(ctx, &mut turn).await?,
            Stage::Consent(question) => self.on_consent(ctx, question, input, &mut turn).await?,
            Stage::Approval {
                section,
                order,
                position,
            } => {
                self.on_approval(ctx, section, order, position, input, &mut turn)
                    .await?
            }
            Stage::Seat {
                section,
                order,
                seat,
                seats,
                selections,
            } => {
                self.on_seat(ctx, section, order, seat, seats, selections, input, &mut turn)
                    .await?
            }
            Stage::Finished => Stage::Finished,
        };

        turn.finished = next == Stage::Finished;
        self.stage = next;
        Ok(turn)
    }

    fn election(ctx: &VotingContext) -> Result<Arc<Election>, VotingError> {
        ctx.election.clone().ok_or(VotingError::NoElection)
    }

    fn key(&self, election: &Election) -> SessionKey {
        SessionKey::new(election.ballot.id.clone(), self.voter.id.clone())
    }

    async fn update_session<F>(
        &self,
        ctx: &VotingContext,
        election: &Election,
        change: F,
    ) -> Result<Session, VotingError>
    where
        F: FnOnce(&mut Session),
    {
        let key = self.key(election);
        let mut session = ctx.sessions.get(&key).await?;
        change(&mut session);
        ctx.sessions.replace(&key, &session).await?;
        Ok(session)
    }

    async fn greet(&mut self, ctx: &VotingContext, turn: &mut Turn) -> Result<Stage, VotingError> {
        turn.push(Prompt::Welcome {
            name: self.voter.name.clone(),
        });

        let Some(election) = ctx.election.clone() else {
            turn.push(Prompt::NoElection);
            return Ok(Stage::Finished);
        };

        turn.push(Prompt::Elections {
            titles: election.ballot.titles(),
        });
        turn.push(Prompt::MeetingNotice {
            date: election.ballot.date.clone(),
        });

        let session = ctx.sessions.get(&self.key(&election)).await?;
        let question = match session.status() {
            SessionStatus::Completed => {
                turn.push(Prompt::AlreadyVoted);
                Consent::Recast
            }
            SessionStatus::Started => {
                turn.push(Prompt::ResumeVoting);
                Consent::Resume
            }
            SessionStatus::NotStarted => {
                turn.push(Prompt::StartVoting);
                Consent::Start
            }
        };
        Ok(Stage::Consent(question))
    }

    async fn on_consent(
        &mut self,
        ctx: &VotingContext,
        question: Consent,
        input: &str,
        turn: &mut Turn,
    ) -> Result<Stage, VotingError> {
        let election = Self::election(ctx)?;

        match parse_yes_no(input) {
            None => {
                turn.push(Prompt::InvalidYesNo);
                Ok(Stage::Consent(question))
            }
            Some(false) => {
                turn.push(Prompt::Farewell {
                    name: self.voter.name.clone(),
                });
                Ok(Stage::Finished)
            }
            Some(true) => {
                match question {
                    Consent::Recast => {
                        self.update_session(ctx, &election, |session| session.restart())
                            .await?;
                        info!("{} is recasting votes for {}", self.voter.id, election.ballot.id);
                    }
                    Consent::Start => {
                        let ballot = Arc::clone(&election.ballot);
                        self.update_session(ctx, &election, |session| session.start(&ballot))
                            .await?;
                        info!("{} started voting on {}", self.voter.id, election.ballot.id);
                    }
                    Consent::Resume => {
                        info!("{} resumed voting on {}", self.voter.id, election.ballot.id);
                    }
                }
                self.enter_section(ctx, &election, 0, turn).await
            }
        }
    }

    /// Announce the section at `index` (skipping empty ones) and ask its
    /// first question, or move on to the results after the last section.
    async fn enter_section(
        &mut self,
        ctx: &VotingContext,
        election: &Election,
        mut index: usize,
        turn: &mut Turn,
    ) -> Result<Stage, VotingError> {
        loop {
            let Some(section) = election.ballot.sections.get(index) else {
                return self.finish(ctx, election, turn).await;
            };
            if section.items.is_empty() {
                debug!("Skipping section '{}' without items", section.title);
                index += 1;
                continue;
            }

            turn.push(Prompt::SectionTitle {
                title: section.title.clone(),
            });

            // Reshuffled on every entry so nobody gets a fixed top of the list
            let mut order: Vec<usize> = (0..section.items.len()).collect();
            order.shuffle(&mut self.rng);

            let session = ctx.sessions.get(&self.key(election)).await?;

            return Ok(match section.seats() {
                Some(seats) => {
                    turn.push(Prompt::NumCandidatesLimited {
                        candidates: section.items.len(),
                        limit: seats,
                    });
                    let previous: Vec<String> = seat_choices(&session, &section.title)
                        .into_iter()
                        .map(|(_, name)| name)
                        .collect();
                    if !previous.is_empty() {
                        turn.push(Prompt::PreviousLimitedVotes { names: previous });
                    }
                    prompt_seat(section, &order, 1, &[], turn);
                    Stage::Seat {
                        section: index,
                        order,
                        seat: 1,
                        seats,
                        selections: Vec::new(),
                    }
                }
                None => {
                    turn.push(Prompt::NumCandidates {
                        candidates: section.items.len(),
                    });
                    prompt_candidate(section, order[0], &session, turn);
                    Stage::Approval {
                        section: index,
                        order,
                        position: 0,
                    }
                }
            });
        }
    }

    async fn on_approval(
        &mut self,
        ctx: &VotingContext,
        section_index: usize,
        order: Vec<usize>,
        position: usize,
        input: &str,
        turn: &mut Turn,
    ) -> Result<Stage, VotingError> {
        let election = Self::election(ctx)?;

        let Some(approve) = parse_yes_no(input) else {
            turn.push(Prompt::InvalidYesNo);
            return Ok(Stage::Approval {
                section: section_index,
                order,
                position,
            });
        };

        let section = &election.ballot.sections[section_index];
        let item = &section.items[order[position]];
        let vote = if approve { Vote::Yes } else { Vote::No };
        debug!("{} voted {} for '{}' in '{}'", self.voter.id, vote, item.name, section.title);
        let session = self
            .update_session(ctx, &election, |session| {
                session.record(&section.title, &item.name, vote)
            })
            .await?;

        let position = position + 1;
        if position < order.len() {
            prompt_candidate(section, order[position], &session, turn);
            Ok(Stage::Approval {
                section: section_index,
                order,
                position,
            })
        } else {
            self.enter_section(ctx, &election, section_index + 1, turn)
                .await
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn on_seat(
        &mut self,
        ctx: &VotingContext,
        section_index: usize,
        order: Vec<usize>,
        seat: usize,
        seats: usize,
        mut selections: Vec<String>,
        input: &str,
        turn: &mut Turn,
    ) -> Result<Stage, VotingError> {
        let election = Self::election(ctx)?;
        let section = &election.ballot.sections[section_index];
        let unchanged = |selections: Vec<String>| Stage::Seat {
            section: section_index,
            order: order.clone(),
            seat,
            seats,
            selections,
        };

        match parse_choice(input) {
            Choice::Abstain => {
                // Abstaining here abstains every remaining seat of the section
                debug!("{} abstained from seats {}..={} of '{}'", self.voter.id, seat, seats, section.title);
                self.update_session(ctx, &election, |session| {
                    for remaining in seat..=seats {
                        session.abstain(&section.title, &remaining.to_string());
                    }
                })
                .await?;
                turn.push(Prompt::AbstainedRemaining {
                    title: section.title.clone(),
                });
                self.enter_section(ctx, &election, section_index + 1, turn)
                    .await
            }
            Choice::Index(index) if index <= order.len() => {
                let shown = seat_order(&order, seat);
                let item = &section.items[shown[index - 1]];

                if selections.contains(&item.name) {
                    turn.push(Prompt::DuplicateIndex {
                        index,
                        name: item.name.clone(),
                    });
                    return Ok(unchanged(selections));
                }

                debug!("{} chose '{}' for seat {} of '{}'", self.voter.id, item.name, seat, section.title);
                self.update_session(ctx, &election, |session| {
                    session.record(
                        &section.title,
                        &seat.to_string(),
                        Vote::Chose(item.name.clone()),
                    )
                })
                .await?;
                turn.push(Prompt::ChosenLimitedCandidate {
                    name: item.name.clone(),
                });
                selections.push(item.name.clone());

                let seat = seat + 1;
                if seat > seats {
                    self.enter_section(ctx, &election, section_index + 1, turn)
                        .await
                } else {
                    prompt_seat(section, &order, seat, &selections, turn);
                    Ok(Stage::Seat {
                        section: section_index,
                        order,
                        seat,
                        seats,
                        selections,
                    })
                }
            }
            Choice::Index(_) | Choice::Invalid => {
                turn.push(Prompt::InvalidIndex { max: order.len() });
                Ok(unchanged(selections))
            }
        }
    }

    async fn finish(
        &mut self,
        ctx: &VotingContext,
        election: &Election,
        turn: &mut Turn,
    ) -> Result<Stage, VotingError> {
        let key = self.key(election);
        let mut session = ctx.sessions.get(&key).await?;

        for section in &election.ballot.sections {
            if section.items.is_empty() {
                continue;
            }
            let lines = result_lines(section, &session);
            if lines.is_empty() {
                turn.push(Prompt::AbstainedAll {
                    title: section.title.clone(),
                });
                continue;
            }
            turn.push(Prompt::VoteResults {
                title: section.title.clone(),
            });
            for (label, value) in lines {
                turn.push(Prompt::VoteResult { label, value });
            }
        }

        // Completed only after the record is written and the voter counted
        let record = build_record(&election.ballot, &self.voter.id, &session, Utc::now());
        let path = election.exporter.write(&record).await?;
        let update = election.quorum.record_completion(&self.voter.id).await?;

        session.complete();
        ctx.sessions.replace(&key, &session).await?;
        info!(
            "{} completed ballot {} (result written to {}, {}/{} voters)",
            self.voter.id,
            election.ballot.id,
            path.display(),
            update.completed,
            update.threshold
        );

        turn.quorum = Some(update);
        turn.push(Prompt::Farewell {
            name: self.voter.name.clone(),
        });
        Ok(Stage::Finished)
    }
}

fn prompt_candidate(section: &Section, item_index: usize, session: &Session, turn: &mut Turn) {
    let item = &section.items[item_index];
    turn.push(Prompt::Candidate {
        name: item.name.clone(),
        contact: item.contact.clone(),
        url: item.url.clone(),
    });
    if let Some(vote) = session.vote(&section.title, &item.name) {
        turn.push(Prompt::PreviousVote {
            name: item.name.clone(),
            vote: vote.to_string(),
        });
    }
    turn.push(Prompt::ApproveCandidate);
}

fn prompt_seat(section: &Section, order: &[usize], seat: usize, selections: &[String], turn: &mut Turn) {
    let mut options = Vec::new();
    for (position, item_index) in seat_order(order, seat).into_iter().enumerate() {
        let item = &section.items[item_index];
        let chosen = selections.contains(&item.name);
        if !chosen {
            options.push(position + 1);
        }
        turn.push(Prompt::LimitedCandidate {
            index: position + 1,
            name: item.name.clone(),
            contact: item.contact.clone(),
            url: item.url.clone(),
            chosen,
        });
    }
    turn.push(Prompt::LimitedChoice {
        seat,
        title: section.title.clone(),
        options,
    });
}

/// Lines of the closing summary for one section; empty when every seat
/// was abstained (or nothing was answered).
fn result_lines(section: &Section, session: &Session) -> Vec<(String, String)> {
    if section.is_limited() {
        seat_choices(session, &section.title)
            .into_iter()
            .map(|(seat, name)| (format!("Choice {}", seat), name))
            .collect()
    } else {
        section
            .items
            .iter()
            .filter_map(|item| {
                session
                    .vote(&section.title, &item.name)
                    .map(|vote| (item.name.clone(), vote.to_string()))
            })
            .collect()
    }
}
