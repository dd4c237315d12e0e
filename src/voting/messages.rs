//! Everything the bot says to a voter.
//!
//! Each prompt renders to plain text plus, where it adds something, a rich
//! (Markdown) variant. Rich text is only sent to clients that support it.

/// Chat state sent alongside a message when the client supports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Composing,
    Active,
    Gone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    Welcome { name: String },
    NoElection,
    Elections { titles: Vec<String> },
    MeetingNotice { date: String },
    AlreadyVoted,
    ResumeVoting,
    StartVoting,
    InvalidYesNo,
    SectionTitle { title: String },
    NumCandidates { candidates: usize },
    Candidate { name: String, contact: Option<String>, url: Option<String> },
    PreviousVote { name: String, vote: String },
    ApproveCandidate,
    NumCandidatesLimited { candidates: usize, limit: usize },
    PreviousLimitedVotes { names: Vec<String> },
    LimitedCandidate {
        index: usize,
        name: String,
        contact: Option<String>,
        url: Option<String>,
        chosen: bool,
    },
    LimitedChoice { seat: usize, title: String, options: Vec<usize> },
    InvalidIndex { max: usize },
    DuplicateIndex { index: usize, name: String },
    ChosenLimitedCandidate { name: String },
    AbstainedRemaining { title: String },
    VoteResults { title: String },
    VoteResult { label: String, value: String },
    AbstainedAll { title: String },
    TemporaryFailure,
    Farewell { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    pub rich: Option<String>,
}

impl Rendered {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            rich: None,
        }
    }

    fn both(text: impl Into<String>, rich: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            rich: Some(rich.into()),
        }
    }
}

fn contact_line(name: &str, contact: &Option<String>, url: &Option<String>) -> (String, String) {
    let mut text = name.to_string();
    let mut rich = format!("**{}**", name);
    if let Some(contact) = contact {
        text.push_str(&format!(" ({})", contact));
        rich.push_str(&format!(" ({})", contact));
    }
    if let Some(url) = url {
        text.push_str(&format!(" -- {}", url));
        rich.push_str(&format!(" ([View application]({}))", url));
    }
    (text, rich)
}

impl Prompt {
    pub fn chat_state(&self) -> ChatState {
        match self {
            Prompt::Farewell { .. } => ChatState::Gone,
            _ => ChatState::Active,
        }
    }

    pub fn render(&self) -> Rendered {
        match self {
            Prompt::Welcome { name } => Rendered::plain(format!("Hi, {}!", name)),
            Prompt::NoElection => Rendered::plain("No elections are being held at this time."),
            Prompt::Elections { titles } => {
                let rich: Vec<String> = titles.iter().map(|t| format!("**{}**", t)).collect();
                Rendered::both(
                    format!("Voting has begun for: {}", titles.join(", ")),
                    format!("Voting has begun for: {}", rich.join(", ")),
                )
            }
            Prompt::MeetingNotice { date } => Rendered::both(
                format!(
                    "By proceeding, you affirm that you wish to have your vote count as a \
                     proxy vote in the official meeting to be held on {}.",
                    date
                ),
                format!(
                    "*By proceeding, you affirm that you wish to have your vote count as a \
                     proxy vote in the official meeting to be held on **{}**.*",
                    date
                ),
            ),
            Prompt::AlreadyVoted => Rendered::both(
                "You have already participated in this election. Would you like to recast your votes? (yes/no)",
                "You have already participated in this election. Would you like to recast your votes? (**yes** / **no**)",
            ),
            Prompt::ResumeVoting => Rendered::both(
                "You started voting, but have not finished. Would you like to resume voting? (yes/no)",
                "You started voting, but have not finished. Would you like to resume voting? (**yes** / **no**)",
            ),
            Prompt::StartVoting => Rendered::both(
                "Would you like to cast your votes now? (yes/no)",
                "Would you like to cast your votes now? (**yes** / **no**)",
            ),
            Prompt::InvalidYesNo => Rendered::both(
                "Please respond with \"yes\" or \"no\".",
                "Please respond with **yes** or **no**.",
            ),
            Prompt::SectionTitle { title } => {
                Rendered::both(format!("{}:", title), format!("__**{}**__:", title))
            }
            Prompt::NumCandidates { candidates } => Rendered::both(
                format!("There are {} candidates.", candidates),
                format!("*There are {} candidates.*", candidates),
            ),
            Prompt::Candidate { name, contact, url } => {
                let (text, rich) = contact_line(name, contact, url);
                Rendered::both(text, rich)
            }
            Prompt::PreviousVote { name, vote } => Rendered::both(
                format!("You previously voted {} for {}.", vote, name),
                format!("*You previously voted **{}** for **{}**.*", vote, name),
            ),
            Prompt::ApproveCandidate => {
                Rendered::both("Approve? (yes/no)", "Approve? (**yes** / **no**)")
            }
            Prompt::NumCandidatesLimited { candidates, limit } => Rendered::both(
                format!("There are {} candidates. You may vote for {}.", candidates, limit),
                format!("*There are {} candidates. You may vote for {}.*", candidates, limit),
            ),
            Prompt::PreviousLimitedVotes { names } => {
                let text: Vec<String> = names.iter().map(|n| format!("- {}", n)).collect();
                Rendered::both(
                    format!("You previously voted for:\n{}", text.join("\n")),
                    format!("*You previously voted for:*\n{}", text.join("\n")),
                )
            }
            Prompt::LimitedCandidate {
                index,
                name,
                contact,
                url,
                chosen,
            } => {
                let (text, rich) = contact_line(name, contact, url);
                if *chosen {
                    Rendered::both(
                        format!("{}) {} [already chosen]", index, text),
                        format!("{}) ~~{}~~", index, rich),
                    )
                } else {
                    Rendered::both(format!("{}) {}", index, text), format!("{}) {}", index, rich))
                }
            }
            Prompt::LimitedChoice {
                seat,
                title,
                options,
            } => {
                let mut offered: Vec<String> = options.iter().map(|o| o.to_string()).collect();
                offered.push("0 to abstain".to_string());
                Rendered::both(
                    format!("Choice {} for {}: ({})", seat, title, offered.join(" / ")),
                    format!("Choice {} for **{}**: ({})", seat, title, offered.join(" / ")),
                )
            }
            Prompt::InvalidIndex { max } => Rendered::plain(format!(
                "Please respond with the number (1 through {}) of the candidate you wish to \
                 select, or 0 to abstain.",
                max
            )),
            Prompt::DuplicateIndex { index, name } => Rendered::plain(format!(
                "You have already chosen {} ({}). Please select another candidate.",
                index, name
            )),
            Prompt::ChosenLimitedCandidate { name } => Rendered::both(
                format!("You chose {}.", name),
                format!("*You chose **{}**.*", name),
            ),
            Prompt::AbstainedRemaining { title } => Rendered::both(
                format!("You abstained from the remaining choices for {}.", title),
                format!("*You abstained from the remaining choices for **{}**.*", title),
            ),
            Prompt::VoteResults { title } => Rendered::both(
                format!("Your votes for {}:", title),
                format!("Your votes for **{}**:", title),
            ),
            Prompt::VoteResult { label, value } => Rendered::both(
                format!("{} -- {}", label, value),
                format!("**{}** - *{}*", label, value),
            ),
            Prompt::AbstainedAll { title } => Rendered::both(
                format!("You abstained from all choices for {}.", title),
                format!("*You abstained from all choices for **{}**.*", title),
            ),
            Prompt::TemporaryFailure => Rendered::plain(
                "Sorry, something went wrong while recording that. Please send your answer again.",
            ),
            Prompt::Farewell { name } => Rendered::plain(format!("Thank you for voting, {}!", name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meeting_notice_embeds_date() {
        let rendered = Prompt::MeetingNotice {
            date: "2026-11-05".into(),
        }
        .render();
        assert!(rendered.text.contains("held on 2026-11-05."));
        assert!(rendered.rich.unwrap().contains("**2026-11-05**"));
    }

    #[test]
    fn candidate_lists_contact_and_reference() {
        let rendered = Prompt::Candidate {
            name: "Alice".into(),
            contact: Some("alice@example.org".into()),
            url: Some("https://example.org/a".into()),
        }
        .render();
        assert_eq!(rendered.text, "Alice (alice@example.org) -- https://example.org/a");
        assert_eq!(
            rendered.rich.as_deref(),
            Some("**Alice** (alice@example.org) ([View application](https://example.org/a))")
        );
    }

    #[test]
    fn candidate_without_links_is_just_the_name() {
        let rendered = Prompt::Candidate {
            name: "Bob".into(),
            contact: None,
            url: None,
        }
        .render();
        assert_eq!(rendered.text, "Bob");
    }

    #[test]
    fn limited_choice_lists_only_offered_options() {
        let rendered = Prompt::LimitedChoice {
            seat: 2,
            title: "Council".into(),
            options: vec![1, 3],
        }
        .render();
        assert_eq!(rendered.text, "Choice 2 for Council: (1 / 3 / 0 to abstain)");
    }

    #[test]
    fn chosen_candidates_are_de_emphasized() {
        let rendered = Prompt::LimitedCandidate {
            index: 2,
            name: "Carol".into(),
            contact: None,
            url: None,
            chosen: true,
        }
        .render();
        assert_eq!(rendered.text, "2) Carol [already chosen]");
        assert_eq!(rendered.rich.as_deref(), Some("2) ~~**Carol**~~"));
    }

    #[test]
    fn farewell_signals_gone() {
        let prompt = Prompt::Farewell { name: "Dana".into() };
        assert_eq!(prompt.chat_state(), ChatState::Gone);
        assert_eq!(Prompt::ApproveCandidate.chat_state(), ChatState::Active);
    }
}
