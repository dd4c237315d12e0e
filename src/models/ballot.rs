use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BallotError {
    #[error("failed to read ballot file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed ballot file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid ballot: {0}")]
    Invalid(String),
}

/// One election: a meeting date and the ordered sections voted on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ballot {
    // Filled in by the loader from the file name, not read from the document
    #[serde(skip)]
    pub id: String,
    pub date: String,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    // 0 or missing means every item is approved or rejected on its own
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    #[serde(default, alias = "jid")]
    pub contact: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Ballot {
    /// Load `ballot_<id>.json` from the data directory.
    ///
    /// Any problem with the file is fatal: a ballot is either loaded in full
    /// or not at all.
    pub fn load(data_dir: &Path, id: &str) -> Result<Self, BallotError> {
        let path = data_dir.join(format!("ballot_{}.json", id));
        let raw = std::fs::read_to_string(&path).map_err(|source| BallotError::Io {
            path: path.clone(),
            source,
        })?;
        let mut ballot = Self::parse(&raw).map_err(|source| BallotError::Parse { path, source })?;
        ballot.id = id.to_string();
        ballot.validate()?;
        Ok(ballot)
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn validate(&self) -> Result<(), BallotError> {
        let mut titles = HashSet::new();
        for section in &self.sections {
            if section.title.trim().is_empty() {
                return Err(BallotError::Invalid("section with an empty title".to_string()));
            }
            if !titles.insert(section.title.as_str()) {
                return Err(BallotError::Invalid(format!(
                    "duplicate section title '{}'",
                    section.title
                )));
            }

            let mut names = HashSet::new();
            for item in &section.items {
                if item.name.trim().is_empty() {
                    return Err(BallotError::Invalid(format!(
                        "item with an empty name in section '{}'",
                        section.title
                    )));
                }
                // Seat picks are stored by candidate name next to yes/no answers
                if section.is_limited() && matches!(item.name.as_str(), "yes" | "no") {
                    return Err(BallotError::Invalid(format!(
                        "candidate '{}' in section '{}' clashes with a yes/no answer",
                        item.name, section.title
                    )));
                }
                if !names.insert(item.name.as_str()) {
                    return Err(BallotError::Invalid(format!(
                        "duplicate item '{}' in section '{}'",
                        item.name, section.title
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn find_section(&self, title: &str) -> Option<&Section> {
        self.sections.iter().find(|section| section.title == title)
    }

    pub fn titles(&self) -> Vec<String> {
        self.sections.iter().map(|section| section.title.clone()).collect()
    }
}

impl Section {
    /// Number of seats to fill, clamped to the number of candidates.
    /// `None` for sections without a seat limit.
    pub fn seats(&self) -> Option<usize> {
        if self.limit == 0 {
            None
        } else {
            Some((self.limit as usize).min(self.items.len()))
        }
    }

    pub fn is_limited(&self) -> bool {
        self.limit > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "date": "2026-11-05",
        "sections": [
            {
                "title": "Membership",
                "items": [
                    { "name": "Alice", "jid": "alice@example.org", "url": "https://example.org/alice" },
                    { "name": "Bob" }
                ]
            },
            {
                "title": "Council",
                "limit": 5,
                "items": [ { "name": "Carol" }, { "name": "Dave" } ]
            }
        ]
    }"#;

    #[test]
    fn parses_sections_and_items() {
        let ballot = Ballot::parse(SAMPLE).unwrap();
        assert_eq!(ballot.date, "2026-11-05");
        assert_eq!(ballot.titles(), vec!["Membership", "Council"]);

        let membership = ballot.find_section("Membership").unwrap();
        assert!(!membership.is_limited());
        assert_eq!(membership.seats(), None);
        assert_eq!(
            membership.items[0].contact.as_deref(),
            Some("alice@example.org")
        );
        assert_eq!(membership.items[1].url, None);
    }

    #[test]
    fn seat_limit_is_clamped_to_candidates() {
        let ballot = Ballot::parse(SAMPLE).unwrap();
        let council = ballot.find_section("Council").unwrap();
        assert!(council.is_limited());
        assert_eq!(council.seats(), Some(2));
    }

    #[test]
    fn rejects_duplicate_items() {
        let ballot = Ballot::parse(
            r#"{"date": "x", "sections": [{"title": "Board", "limit": 1,
                "items": [{"name": "Eve"}, {"name": "Eve"}]}]}"#,
        )
        .unwrap();
        assert!(matches!(ballot.validate(), Err(BallotError::Invalid(_))));
    }

    #[test]
    fn rejects_yes_no_candidates_in_seat_sections() {
        let ballot = Ballot::parse(
            r#"{"date": "x", "sections": [{"title": "Board", "limit": 1,
                "items": [{"name": "no"}, {"name": "Eve"}]}]}"#,
        )
        .unwrap();
        assert!(matches!(ballot.validate(), Err(BallotError::Invalid(_))));

        // Approval sections key answers by name, so the name itself is fine
        let ballot = Ballot::parse(
            r#"{"date": "x", "sections": [{"title": "Motions",
                "items": [{"name": "no"}, {"name": "yes"}]}]}"#,
        )
        .unwrap();
        assert!(ballot.validate().is_ok());
    }

    #[test]
    fn rejects_duplicate_sections() {
        let ballot = Ballot::parse(
            r#"{"date": "x", "sections": [{"title": "Board"}, {"title": "Board"}]}"#,
        )
        .unwrap();
        assert!(matches!(ballot.validate(), Err(BallotError::Invalid(_))));
    }

    #[test]
    fn missing_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Ballot::load(dir.path(), "2026").unwrap_err();
        assert!(matches!(err, BallotError::Io { .. }));
    }

    #[test]
    fn load_sets_identifier() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ballot_2026.json"), SAMPLE).unwrap();
        let ballot = Ballot::load(dir.path(), "2026").unwrap();
        assert_eq!(ballot.id, "2026");
    }

    #[test]
    fn malformed_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ballot_bad.json"), "{ not json").unwrap();
        let err = Ballot::load(dir.path(), "bad").unwrap_err();
        assert!(matches!(err, BallotError::Parse { .. }));
    }
}
