//! Member roster.
//!
//! Only members may vote. Members and admins are plain text files in the
//! data directory, one voter id per line. Admins can reload the files and
//! add or remove members at runtime.

use log::info;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::VoterId;

const MEMBERS_FILE: &str = "roster.txt";
const ADMINS_FILE: &str = "admins.txt";

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("failed to access roster file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not allowed to administer the roster")]
    Forbidden(VoterId),
}

#[derive(Debug, Default)]
struct RosterData {
    members: BTreeSet<VoterId>,
    admins: BTreeSet<VoterId>,
}

pub struct Roster {
    data_dir: PathBuf,
    data: RwLock<RosterData>,
}

fn read_ids(path: &Path) -> Result<BTreeSet<VoterId>, RosterError> {
    let raw = std::fs::read_to_string(path).map_err(|source| RosterError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(VoterId::from)
        .collect())
}

fn load_data(data_dir: &Path) -> Result<RosterData, RosterError> {
    Ok(RosterData {
        members: read_ids(&data_dir.join(MEMBERS_FILE))?,
        admins: read_ids(&data_dir.join(ADMINS_FILE))?,
    })
}

impl Roster {
    pub fn load(data_dir: &Path) -> Result<Self, RosterError> {
        let data = load_data(data_dir)?;
        info!(
            "Loaded roster with {} members and {} admins",
            data.members.len(),
            data.admins.len()
        );
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            data: RwLock::new(data),
        })
    }

    pub async fn is_member(&self, voter: &VoterId) -> bool {
        self.data.read().await.members.contains(voter)
    }

    pub async fn is_admin(&self, voter: &VoterId) -> bool {
        self.data.read().await.admins.contains(voter)
    }

    pub async fn member_count(&self) -> usize {
        self.data.read().await.members.len()
    }

    async fn require_admin(&self, by: &VoterId) -> Result<(), RosterError> {
        if self.is_admin(by).await {
            Ok(())
        } else {
            Err(RosterError::Forbidden(by.clone()))
        }
    }

    pub async fn reload(&self, by: &VoterId) -> Result<usize, RosterError> {
        self.require_admin(by).await?;
        let fresh = load_data(&self.data_dir)?;
        let count = fresh.members.len();
        *self.data.write().await = fresh;
        info!("Roster reloaded by {} ({} members)", by, count);
        Ok(count)
    }

    /// Returns `false` if the voter already was a member.
    pub async fn add(&self, by: &VoterId, voter: VoterId) -> Result<bool, RosterError> {
        self.require_admin(by).await?;
        let mut data = self.data.write().await;
        if !data.members.insert(voter.clone()) {
            return Ok(false);
        }
        self.save(&data.members)?;
        info!("{} added member {}", by, voter);
        Ok(true)
    }

    /// Returns `false` if the voter was not a member.
    pub async fn remove(&self, by: &VoterId, voter: &VoterId) -> Result<bool, RosterError> {
        self.require_admin(by).await?;
        let mut data = self.data.write().await;
        if !data.members.remove(voter) {
            return Ok(false);
        }
        self.save(&data.members)?;
        info!("{} removed member {}", by, voter);
        Ok(true)
    }

    fn save(&self, members: &BTreeSet<VoterId>) -> Result<(), RosterError> {
        let path = self.data_dir.join(MEMBERS_FILE);
        let body: String = members.iter().map(|member| format!("{}\n", member)).collect();
        std::fs::write(&path, body).map_err(|source| RosterError::Io { path, source })
    }
}
