//! Persisted entities of a hunt.
//!
//! Everything here is plain data. Behaviour that depends on other entities or on
//! the current time lives in the engine modules (`progress`, `headstart`, ...),
//! which read these records through the store.

use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::ids::*;
use crate::runtime::Runtime;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl Event {
    pub fn new(id: EventId, name: impl Into<String>, start_date: DateTime<Utc>, end_date: DateTime<Utc>) -> Self {
        Self { id, name: name.into(), start_date, end_date }
    }

    /// After the end everything is unlocked, read-only.
    pub fn is_over(&self, now: DateTime<Utc>) -> bool {
        self.end_date < now
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Episode {
    pub id: EpisodeId,
    pub event: EventId,
    pub name: String,
    pub flavour: String,
    pub start_date: DateTime<Utc>,
    /// Puzzles may be answered in any order.
    pub parallel: bool,
    /// Must be finished to win the event.
    pub winning: bool,
    /// Episodes that must be finished before this one unlocks.
    pub prequels: BTreeSet<EpisodeId>,
    /// Episodes whose solved puzzles advance this episode's start.
    pub headstart_from: BTreeSet<EpisodeId>,
}

impl Episode {
    pub fn new(id: EpisodeId, event: EventId, name: impl Into<String>, start_date: DateTime<Utc>) -> Self {
        Self {
            id,
            event,
            name: name.into(),
            flavour: String::new(),
            start_date,
            parallel: false,
            winning: false,
            prequels: BTreeSet::new(),
            headstart_from: BTreeSet::new(),
        }
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    pub fn winning(mut self) -> Self {
        self.winning = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Puzzle {
    pub id: PuzzleId,
    pub episode: EpisodeId,
    pub title: String,
    /// Sort key within the episode. Assigned on insertion, ties broken by id.
    pub order: u32,
    pub runtime: Runtime,
    pub content: String,
    pub cb_runtime: Runtime,
    pub cb_content: String,
    pub soln_runtime: Runtime,
    pub soln_content: String,
    /// Only consulted when the episode is parallel.
    pub start_date: DateTime<Utc>,
    pub headstart_granted: TimeDelta,
}

impl Puzzle {
    pub fn new(id: PuzzleId, episode: EpisodeId, title: impl Into<String>) -> Self {
        Self {
            id,
            episode,
            title: title.into(),
            order: 0,
            runtime: Runtime::Static,
            content: String::new(),
            cb_runtime: Runtime::Static,
            cb_content: String::new(),
            soln_runtime: Runtime::Static,
            soln_content: String::new(),
            start_date: DateTime::<Utc>::UNIX_EPOCH,
            headstart_granted: TimeDelta::zero(),
        }
    }

    pub fn with_content(mut self, runtime: Runtime, content: impl Into<String>) -> Self {
        self.runtime = runtime;
        self.content = content.into();
        self
    }

    pub fn with_callback(mut self, runtime: Runtime, content: impl Into<String>) -> Self {
        self.cb_runtime = runtime;
        self.cb_content = content.into();
        self
    }

    pub fn with_solution(mut self, runtime: Runtime, content: impl Into<String>) -> Self {
        self.soln_runtime = runtime;
        self.soln_content = content.into();
        self
    }

    pub fn starting_at(mut self, start_date: DateTime<Utc>) -> Self {
        self.start_date = start_date;
        self
    }

    pub fn granting(mut self, headstart: TimeDelta) -> Self {
        self.headstart_granted = headstart;
        self
    }
}

/// One accepted-correct definition for a puzzle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Answer {
    pub id: AnswerId,
    pub puzzle: PuzzleId,
    pub runtime: Runtime,
    pub answer: String,
}

/// Author input for creating or replacing an answer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnswerDraft {
    pub runtime: Runtime,
    pub answer: String,
}

impl AnswerDraft {
    pub fn new(runtime: Runtime, answer: impl Into<String>) -> Self {
        Self { runtime, answer: answer.into() }
    }

    pub fn static_text(answer: impl Into<String>) -> Self {
        Self::new(Runtime::Static, answer)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Guess {
    pub id: GuessId,
    pub puzzle: PuzzleId,
    pub by: UserId,
    /// Denormalised team of `by` at the puzzle's event; re-derived on membership changes.
    pub by_team: Option<TeamId>,
    pub guess: String,
    pub given: DateTime<Utc>,
    // Correctness cache. Read through `HuntView::correct_for`, never directly.
    pub(crate) correct_for: Option<AnswerId>,
    pub(crate) correct_current: bool,
    pub(crate) cache_epoch: u64,
}

impl Guess {
    pub fn new(id: GuessId, puzzle: PuzzleId, by: UserId, guess: impl Into<String>, given: DateTime<Utc>) -> Self {
        Self {
            id,
            puzzle,
            by,
            by_team: None,
            guess: guess.into(),
            given,
            correct_for: None,
            correct_current: false,
            cache_epoch: 0,
        }
    }

    /// Whether the cached answer pointer can be trusted without recomputation.
    pub fn cache_current(&self) -> bool {
        self.correct_current
    }

    /// The cached answer pointer, possibly stale. Aggregates use this knowingly.
    pub fn cached_correct_for(&self) -> Option<AnswerId> {
        self.correct_for
    }

    pub(crate) fn mark_stale(&mut self) {
        self.correct_current = false;
        self.cache_epoch += 1;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Team {
    pub id: TeamId,
    pub event: EventId,
    pub name: Option<String>,
    pub is_admin: bool,
}

impl Team {
    pub fn new(id: TeamId, event: EventId, name: impl Into<String>) -> Self {
        Self { id, event, name: Some(name.into()), is_admin: false }
    }

    pub fn admin(id: TeamId, event: EventId) -> Self {
        Self { id, event, name: Some("Admins".to_string()), is_admin: true }
    }
}

/// Clue shown a fixed delay after the team first opened the puzzle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hint {
    pub id: HintId,
    pub puzzle: PuzzleId,
    pub text: String,
    pub delay: TimeDelta,
}

/// Clue revealed once one of the team's guesses matches an [`UnlockAnswer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unlock {
    pub id: UnlockId,
    pub puzzle: PuzzleId,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnlockAnswer {
    pub id: UnlockAnswerId,
    unlock: UnlockId,
    pub runtime: Runtime,
    pub guess: String,
}

impl UnlockAnswer {
    pub fn new(id: UnlockAnswerId, unlock: UnlockId, runtime: Runtime, guess: impl Into<String>) -> Self {
        Self { id, unlock, runtime, guess: guess.into() }
    }

    /// The owning unlock never changes once set.
    pub fn unlock(&self) -> UnlockId {
        self.unlock
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeadstartAdjustment {
    pub episode: EpisodeId,
    pub team: TeamId,
    pub adjustment: TimeDelta,
}

/// Key of a lazily created data blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataScope {
    Team(TeamId),
    User(UserId, EventId),
    TeamPuzzle(TeamId, PuzzleId),
    UserPuzzle(UserId, PuzzleId),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScopedData {
    pub scope: DataScope,
    pub data: Value,
    /// Team-puzzle blobs only: first time anyone on the team opened the puzzle.
    pub start_time: Option<DateTime<Utc>>,
    /// User-puzzle blobs only: opaque token for correlating third-party callbacks.
    pub token: Option<Uuid>,
}

impl ScopedData {
    pub fn new(scope: DataScope) -> Self {
        let token = matches!(scope, DataScope::UserPuzzle(..)).then(Uuid::new_v4);
        Self { scope, data: Value::Null, start_time: None, token }
    }
}

/// The four blobs a puzzle script may see, loaded together.
#[derive(Clone, Debug, PartialEq)]
pub struct PuzzleData {
    pub team: ScopedData,
    pub team_puzzle: ScopedData,
    pub user: Option<ScopedData>,
    pub user_puzzle: Option<ScopedData>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_user_puzzle_blobs_get_tokens() {
        assert!(ScopedData::new(DataScope::UserPuzzle(UserId(1), PuzzleId(2))).token.is_some());
        assert!(ScopedData::new(DataScope::TeamPuzzle(TeamId(1), PuzzleId(2))).token.is_none());
        assert!(ScopedData::new(DataScope::Team(TeamId(1))).token.is_none());
    }

    #[test]
    fn marking_stale_bumps_epoch() {
        let mut guess = Guess::new(GuessId(1), PuzzleId(1), UserId(1), "x", DateTime::<Utc>::UNIX_EPOCH);
        guess.correct_current = true;
        guess.mark_stale();
        assert!(!guess.cache_current());
        assert_eq!(guess.cache_epoch, 1);
    }

    #[test]
    fn event_is_over_strictly_after_end() {
        let end = DateTime::from_timestamp(100, 0).unwrap();
        let event = Event::new(EventId(1), "e", DateTime::<Utc>::UNIX_EPOCH, end);
        assert!(!event.is_over(end));
        assert!(event.is_over(end + TimeDelta::seconds(1)));
    }
}
