//! Per-voter result records.
//!
//! Written once a voter finishes the ballot, one JSON file per voter under
//! `<data_dir>/results/<ballot>/`. A recast overwrites the earlier file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::{Ballot, Session, Vote, VoterId};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write result record {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode result record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Yes,
    No,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateVerdict {
    pub name: String,
    pub vote: Verdict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionalAnswer {
    pub position: usize,
    pub name: String,
    pub answer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SectionResult {
    /// Seat elections: was each candidate among the chosen seats.
    Seats {
        title: String,
        candidates: Vec<CandidateVerdict>,
    },
    /// Independent approvals, in ballot item order.
    Answers {
        title: String,
        answers: Vec<PositionalAnswer>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub respondent: String,
    pub ballot: String,
    pub completed_at: DateTime<Utc>,
    pub sections: Vec<SectionResult>,
}

pub fn build_record(
    ballot: &Ballot,
    voter: &VoterId,
    session: &Session,
    completed_at: DateTime<Utc>,
) -> ResultRecord {
    let sections = ballot
        .sections
        .iter()
        .map(|section| {
            let votes = session.section_votes(&section.title);
            if section.is_limited() {
                let chosen: HashSet<&str> = votes
                    .map(|votes| {
                        votes
                            .values()
                            .filter_map(|vote| match vote {
                                Vote::Chose(name) => Some(name.as_str()),
                                _ => None,
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                SectionResult::Seats {
                    title: section.title.clone(),
                    candidates: section
                        .items
                        .iter()
                        .map(|item| CandidateVerdict {
                            name: item.name.clone(),
                            vote: if chosen.contains(item.name.as_str()) {
                                Verdict::Yes
                            } else {
                                Verdict::No
                            },
                        })
                        .collect(),
                }
            } else {
                SectionResult::Answers {
                    title: section.title.clone(),
                    answers: section
                        .items
                        .iter()
                        .enumerate()
                        .map(|(position, item)| PositionalAnswer {
                            position,
                            name: item.name.clone(),
                            answer: votes
                                .and_then(|votes| votes.get(&item.name))
                                .map(|vote| vote.to_string()),
                        })
                        .collect(),
                }
            }
        })
        .collect();

    ResultRecord {
        respondent: voter.to_string(),
        ballot: ballot.id.clone(),
        completed_at,
        sections,
    }
}

pub struct ResultExporter {
    dir: PathBuf,
}

impl ResultExporter {
    /// Creates `<data_dir>/results/<ballot>/` if needed.
    pub fn new(data_dir: &Path, ballot: &str) -> Result<Self, ExportError> {
        let dir = data_dir.join("results").join(ballot);
        std::fs::create_dir_all(&dir).map_err(|source| ExportError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, voter: &str) -> PathBuf {
        let file_name: String = voter
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' || c == '@' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }

    pub async fn write(&self, record: &ResultRecord) -> Result<PathBuf, ExportError> {
        let path = self.path_for(&record.respondent);
        let body = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|source| ExportError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ballot() -> Ballot {
        let mut ballot = Ballot::parse(
            r#"{"date": "today", "sections": [
                {"title": "Membership", "items": [{"name": "A"}, {"name": "B"}, {"name": "C"}]},
                {"title": "Council", "limit": 2, "items": [{"name": "X"}, {"name": "Y"}, {"name": "Z"}]}
            ]}"#,
        )
        .unwrap();
        ballot.id = "2026".to_string();
        ballot
    }

    fn completed_session() -> Session {
        let mut session = Session::default();
        session.start(&ballot());
        session.record("Membership", "C", Vote::No);
        session.record("Membership", "A", Vote::Yes);
        session.record("Council", "1", Vote::Chose("Z".into()));
        session.record("Council", "2", Vote::Chose("X".into()));
        session.complete();
        session
    }

    #[test]
    fn seat_sections_export_verdicts_in_ballot_order() {
        let record = build_record(&ballot(), &VoterId::from("42"), &completed_session(), Utc::now());
        let SectionResult::Seats { title, candidates } = &record.sections[1] else {
            panic!("expected seat verdicts");
        };
        assert_eq!(title, "Council");
        let verdicts: Vec<(&str, Verdict)> =
            candidates.iter().map(|c| (c.name.as_str(), c.vote)).collect();
        assert_eq!(
            verdicts,
            vec![("X", Verdict::Yes), ("Y", Verdict::No), ("Z", Verdict::Yes)]
        );
    }

    #[test]
    fn approval_sections_export_positional_answers() {
        let record = build_record(&ballot(), &VoterId::from("42"), &completed_session(), Utc::now());
        assert_eq!(record.respondent, "42");
        assert_eq!(record.ballot, "2026");

        let SectionResult::Answers { answers, .. } = &record.sections[0] else {
            panic!("expected positional answers");
        };
        let flat: Vec<(usize, &str, Option<&str>)> = answers
            .iter()
            .map(|a| (a.position, a.name.as_str(), a.answer.as_deref()))
            .collect();
        assert_eq!(
            flat,
            vec![(0, "A", Some("yes")), (1, "B", None), (2, "C", Some("no"))]
        );
    }

    #[tokio::test]
    async fn write_overwrites_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = ResultExporter::new(dir.path(), "2026").unwrap();

        let mut record = build_record(&ballot(), &VoterId::from("42"), &completed_session(), Utc::now());
        let first = exporter.write(&record).await.unwrap();

        record.sections.truncate(1);
        let second = exporter.write(&record).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, dir.path().join("results/2026/42.json"));

        let stored: ResultRecord =
            serde_json::from_slice(&std::fs::read(&second).unwrap()).unwrap();
        assert_eq!(stored.sections.len(), 1);
    }

    #[test]
    fn file_names_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = ResultExporter::new(dir.path(), "2026").unwrap();
        let path = exporter.path_for("../evil/voter");
        assert_eq!(path.file_name().unwrap(), ".._evil_voter.json");
    }
}
