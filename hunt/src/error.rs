use chrono::TimeDelta;

use crate::config::ConfigError;
use crate::ids::{EpisodeId, EventId};
use crate::runtime::RuntimeError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum HuntError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{episode} cannot be its own prequel")]
    SelfReference { episode: EpisodeId },
    #[error("making {prequel} a prequel of {episode} would form a cycle")]
    PrequelCycle { episode: EpisodeId, prequel: EpisodeId },
    #[error("guess is empty")]
    EmptyGuess,
    #[error("the event has ended")]
    EventOver,
    #[error("guessing too fast, retry in {}s", retry_after.num_seconds())]
    TooFast { retry_after: TimeDelta },
    #[error("{0} not found")]
    NotFound(String),
    #[error("the owning unlock of an unlock answer cannot change")]
    ImmutableUnlock,
    #[error("{event} already has an admin team")]
    DuplicateAdminTeam { event: EventId },
    #[error("not available to this team yet")]
    Locked,
    #[error("user is not on a team for this event")]
    NoTeam,
}

impl HuntError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        HuntError::NotFound(what.to_string())
    }

    /// A validator or evaluator broke; the guess outcome is unknown, not "incorrect".
    pub fn is_malfunction(&self) -> bool {
        matches!(self, HuntError::Runtime(e) if e.is_malfunction())
    }
}

pub type HuntResult<T> = Result<T, HuntError>;
