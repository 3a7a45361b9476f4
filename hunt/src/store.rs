//! Persistence collaborator.
//!
//! The engine never holds entities across calls; it reads and writes them
//! through [`StoreTrait`]. Backends must make `save_answer`/`delete_answer`
//! atomic with the guess invalidation they carry, `update_guess` /
//! `record_correctness` atomic per guess row, and `commit_data` atomic across
//! the blobs it writes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::ids::*;
use crate::model::*;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal error")]
    Internal,
}

pub type Store = Arc<dyn StoreTrait + Send + Sync + 'static>;

/// The bounded set of guesses an answer mutation makes stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StaleGuesses {
    pub puzzle: PuzzleId,
    /// Guesses cached against this answer.
    pub answer: AnswerId,
    /// Also guesses with no cached answer, and guesses already stale.
    pub unmatched: bool,
}

impl StaleGuesses {
    /// A created or modified answer may now match anything that matched nothing.
    pub fn on_save(puzzle: PuzzleId, answer: AnswerId) -> Self {
        Self { puzzle, answer, unmatched: true }
    }

    pub fn on_delete(puzzle: PuzzleId, answer: AnswerId) -> Self {
        Self { puzzle, answer, unmatched: false }
    }

    pub fn matches(&self, guess: &Guess) -> bool {
        guess.puzzle == self.puzzle
            && (guess.correct_for == Some(self.answer)
                || (self.unmatched && (guess.correct_for.is_none() || !guess.correct_current)))
    }
}

/// A script's change to one data blob, made against the data it was shown.
#[derive(Clone, Debug, PartialEq)]
pub struct DataWrite {
    pub scope: DataScope,
    pub expected: Value,
    pub data: Value,
}

pub trait StoreTrait {
    fn allocate_id(&self) -> Result<u64, StoreError>;

    fn put_event(&self, event: Event) -> Result<(), StoreError>;
    fn event(&self, id: EventId) -> Result<Option<Event>, StoreError>;

    fn put_episode(&self, episode: Episode) -> Result<(), StoreError>;
    fn episode(&self, id: EpisodeId) -> Result<Option<Episode>, StoreError>;
    /// Episodes of an event ordered by start date, then id.
    fn episodes(&self, event: EventId) -> Result<Vec<Episode>, StoreError>;

    fn put_puzzle(&self, puzzle: Puzzle) -> Result<(), StoreError>;
    fn puzzle(&self, id: PuzzleId) -> Result<Option<Puzzle>, StoreError>;
    /// Puzzles of an episode ordered by `order`, then id.
    fn puzzles(&self, episode: EpisodeId) -> Result<Vec<Puzzle>, StoreError>;

    fn answer(&self, id: AnswerId) -> Result<Option<Answer>, StoreError>;
    /// Answers of a puzzle in creation order.
    fn answers(&self, puzzle: PuzzleId) -> Result<Vec<Answer>, StoreError>;
    /// Upserts `answer` and marks `stale` in one transaction. Returns the number of guesses invalidated.
    fn save_answer(&self, answer: Answer, stale: StaleGuesses) -> Result<usize, StoreError>;
    fn delete_answer(&self, id: AnswerId, stale: StaleGuesses) -> Result<usize, StoreError>;

    fn insert_guess(&self, guess: Guess) -> Result<(), StoreError>;
    fn guess(&self, id: GuessId) -> Result<Option<Guess>, StoreError>;
    /// Atomic read-modify-write of one guess row.
    fn update_guess(&self, id: GuessId, update: &mut dyn FnMut(&mut Guess)) -> Result<Guess, StoreError>;
    fn delete_guess(&self, id: GuessId) -> Result<Option<Guess>, StoreError>;
    /// Guesses on a puzzle ordered by time given, then id.
    fn guesses(&self, puzzle: PuzzleId) -> Result<Vec<Guess>, StoreError>;
    fn team_guesses(&self, puzzle: PuzzleId, team: TeamId) -> Result<Vec<Guess>, StoreError>;
    fn user_guesses(&self, puzzle: PuzzleId, user: UserId) -> Result<Vec<Guess>, StoreError>;
    /// Stores a recomputed cache only if no invalidation happened since `epoch` was read.
    fn record_correctness(&self, id: GuessId, epoch: u64, correct_for: Option<AnswerId>) -> Result<bool, StoreError>;
    /// Sets `by_team` on every guess `user` made on puzzles of `event`.
    fn reassign_guesses(&self, user: UserId, event: EventId, team: Option<TeamId>) -> Result<usize, StoreError>;

    fn put_team(&self, team: Team) -> Result<(), StoreError>;
    fn team(&self, id: TeamId) -> Result<Option<Team>, StoreError>;
    fn teams(&self, event: EventId) -> Result<Vec<Team>, StoreError>;
    fn team_for(&self, user: UserId, event: EventId) -> Result<Option<TeamId>, StoreError>;
    fn team_members(&self, team: TeamId) -> Result<BTreeSet<UserId>, StoreError>;
    /// Replaces the roster, moving users out of other teams of the same event.
    /// Returns every user whose team at the event changed.
    fn set_team_members(&self, team: TeamId, members: BTreeSet<UserId>) -> Result<BTreeSet<UserId>, StoreError>;

    fn put_hint(&self, hint: Hint) -> Result<(), StoreError>;
    /// Hints of a puzzle ordered by delay, then id.
    fn hints(&self, puzzle: PuzzleId) -> Result<Vec<Hint>, StoreError>;
    fn put_unlock(&self, unlock: Unlock) -> Result<(), StoreError>;
    fn unlock(&self, id: UnlockId) -> Result<Option<Unlock>, StoreError>;
    fn unlocks(&self, puzzle: PuzzleId) -> Result<Vec<Unlock>, StoreError>;
    fn put_unlock_answer(&self, answer: UnlockAnswer) -> Result<(), StoreError>;
    fn unlock_answer(&self, id: UnlockAnswerId) -> Result<Option<UnlockAnswer>, StoreError>;
    fn unlock_answers(&self, unlock: UnlockId) -> Result<Vec<UnlockAnswer>, StoreError>;

    /// Get-or-create.
    fn data(&self, scope: DataScope) -> Result<ScopedData, StoreError>;
    /// Lookup without creating.
    fn find_data(&self, scope: DataScope) -> Result<Option<ScopedData>, StoreError>;
    /// Replaces the `data` of every written blob, but only if none of them has
    /// changed since it was read. Start times and tokens are never touched.
    fn commit_data(&self, writes: &[DataWrite]) -> Result<bool, StoreError>;
    /// Get-or-create the team-puzzle blob, setting its start time if it has none.
    fn start_team_puzzle(&self, team: TeamId, puzzle: PuzzleId, now: DateTime<Utc>) -> Result<ScopedData, StoreError>;
    fn data_by_token(&self, token: Uuid) -> Result<Option<ScopedData>, StoreError>;

    fn headstart_adjustment(&self, episode: EpisodeId, team: TeamId) -> Result<Option<TimeDelta>, StoreError>;
    fn set_headstart_adjustment(&self, adjustment: HeadstartAdjustment) -> Result<(), StoreError>;
}

#[derive(Default)]
struct Tables {
    next_id: u64,
    events: BTreeMap<EventId, Event>,
    episodes: BTreeMap<EpisodeId, Episode>,
    puzzles: BTreeMap<PuzzleId, Puzzle>,
    answers: BTreeMap<AnswerId, Answer>,
    guesses: BTreeMap<GuessId, Guess>,
    teams: BTreeMap<TeamId, Team>,
    members: BTreeMap<TeamId, BTreeSet<UserId>>,
    hints: BTreeMap<HintId, Hint>,
    unlocks: BTreeMap<UnlockId, Unlock>,
    unlock_answers: BTreeMap<UnlockAnswerId, UnlockAnswer>,
    data: BTreeMap<DataScope, ScopedData>,
    headstarts: BTreeMap<(EpisodeId, TeamId), TimeDelta>, // (episode, team) -> manual delta
}

impl Tables {
    fn event_of_puzzle(&self, puzzle: PuzzleId) -> Option<EventId> {
        let episode = self.puzzles.get(&puzzle)?.episode;
        Some(self.episodes.get(&episode)?.event)
    }

    fn sorted_guesses(&self, keep: impl Fn(&Guess) -> bool) -> Vec<Guess> {
        let mut out: Vec<Guess> = self.guesses.values().filter(|g| keep(g)).cloned().collect();
        out.sort_by_key(|g| (g.given, g.id));
        out
    }

    fn invalidate(&mut self, stale: &StaleGuesses) -> usize {
        let mut count = 0;
        for guess in self.guesses.values_mut().filter(|g| stale.matches(g)) {
            guess.mark_stale();
            count += 1;
        }
        count
    }
}

#[derive(Default)]
struct Mem {
    tables: Mutex<Tables>,
}

impl Mem {
    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Internal)
    }
}

impl StoreTrait for Mem {
    fn allocate_id(&self) -> Result<u64, StoreError> {
        let mut t = self.lock()?;
        t.next_id += 1;
        Ok(t.next_id)
    }

    fn put_event(&self, event: Event) -> Result<(), StoreError> {
        self.lock()?.events.insert(event.id, event);
        Ok(())
    }

    fn event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        Ok(self.lock()?.events.get(&id).cloned())
    }

    fn put_episode(&self, episode: Episode) -> Result<(), StoreError> {
        self.lock()?.episodes.insert(episode.id, episode);
        Ok(())
    }

    fn episode(&self, id: EpisodeId) -> Result<Option<Episode>, StoreError> {
        Ok(self.lock()?.episodes.get(&id).cloned())
    }

    fn episodes(&self, event: EventId) -> Result<Vec<Episode>, StoreError> {
        let mut out: Vec<Episode> = self.lock()?.episodes.values().filter(|e| e.event == event).cloned().collect();
        out.sort_by_key(|e| (e.start_date, e.id));
        Ok(out)
    }

    fn put_puzzle(&self, puzzle: Puzzle) -> Result<(), StoreError> {
        self.lock()?.puzzles.insert(puzzle.id, puzzle);
        Ok(())
    }

    fn puzzle(&self, id: PuzzleId) -> Result<Option<Puzzle>, StoreError> {
        Ok(self.lock()?.puzzles.get(&id).cloned())
    }

    fn puzzles(&self, episode: EpisodeId) -> Result<Vec<Puzzle>, StoreError> {
        let mut out: Vec<Puzzle> = self.lock()?.puzzles.values().filter(|p| p.episode == episode).cloned().collect();
        out.sort_by_key(|p| (p.order, p.id));
        Ok(out)
    }

    fn answer(&self, id: AnswerId) -> Result<Option<Answer>, StoreError> {
        Ok(self.lock()?.answers.get(&id).cloned())
    }

    fn answers(&self, puzzle: PuzzleId) -> Result<Vec<Answer>, StoreError> {
        Ok(self.lock()?.answers.values().filter(|a| a.puzzle == puzzle).cloned().collect())
    }

    fn save_answer(&self, answer: Answer, stale: StaleGuesses) -> Result<usize, StoreError> {
        let mut t = self.lock()?;
        if let Some(existing) = t.answers.get(&answer.id) {
            if existing.puzzle != answer.puzzle {
                return Err(StoreError::Conflict(format!("{} belongs to {}", answer.id, existing.puzzle)));
            }
        }
        t.answers.insert(answer.id, answer);
        Ok(t.invalidate(&stale))
    }

    fn delete_answer(&self, id: AnswerId, stale: StaleGuesses) -> Result<usize, StoreError> {
        let mut t = self.lock()?;
        t.answers.remove(&id).ok_or(StoreError::NotFound { kind: "answer", id: id.0 })?;
        Ok(t.invalidate(&stale))
    }

    fn insert_guess(&self, guess: Guess) -> Result<(), StoreError> {
        let mut t = self.lock()?;
        if t.guesses.contains_key(&guess.id) {
            return Err(StoreError::Conflict(format!("{} already exists", guess.id)));
        }
        t.guesses.insert(guess.id, guess);
        Ok(())
    }

    fn guess(&self, id: GuessId) -> Result<Option<Guess>, StoreError> {
        Ok(self.lock()?.guesses.get(&id).cloned())
    }

    fn update_guess(&self, id: GuessId, update: &mut dyn FnMut(&mut Guess)) -> Result<Guess, StoreError> {
        let mut t = self.lock()?;
        let guess = t.guesses.get_mut(&id).ok_or(StoreError::NotFound { kind: "guess", id: id.0 })?;
        update(guess);
        Ok(guess.clone())
    }

    fn delete_guess(&self, id: GuessId) -> Result<Option<Guess>, StoreError> {
        Ok(self.lock()?.guesses.remove(&id))
    }

    fn guesses(&self, puzzle: PuzzleId) -> Result<Vec<Guess>, StoreError> {
        Ok(self.lock()?.sorted_guesses(|g| g.puzzle == puzzle))
    }

    fn team_guesses(&self, puzzle: PuzzleId, team: TeamId) -> Result<Vec<Guess>, StoreError> {
        Ok(self.lock()?.sorted_guesses(|g| g.puzzle == puzzle && g.by_team == Some(team)))
    }

    fn user_guesses(&self, puzzle: PuzzleId, user: UserId) -> Result<Vec<Guess>, StoreError> {
        Ok(self.lock()?.sorted_guesses(|g| g.puzzle == puzzle && g.by == user))
    }

    fn record_correctness(&self, id: GuessId, epoch: u64, correct_for: Option<AnswerId>) -> Result<bool, StoreError> {
        let mut t = self.lock()?;
        let guess = t.guesses.get_mut(&id).ok_or(StoreError::NotFound { kind: "guess", id: id.0 })?;
        if guess.cache_epoch != epoch {
            return Ok(false);
        }
        guess.correct_for = correct_for;
        guess.correct_current = true;
        Ok(true)
    }

    fn reassign_guesses(&self, user: UserId, event: EventId, team: Option<TeamId>) -> Result<usize, StoreError> {
        let mut t = self.lock()?;
        let puzzles: BTreeSet<PuzzleId> =
            t.puzzles.keys().copied().filter(|p| t.event_of_puzzle(*p) == Some(event)).collect();
        let mut count = 0;
        for guess in t.guesses.values_mut().filter(|g| g.by == user && puzzles.contains(&g.puzzle)) {
            if guess.by_team != team {
                guess.by_team = team;
                count += 1;
            }
        }
        Ok(count)
    }

    fn put_team(&self, team: Team) -> Result<(), StoreError> {
        self.lock()?.teams.insert(team.id, team);
        Ok(())
    }

    fn team(&self, id: TeamId) -> Result<Option<Team>, StoreError> {
        Ok(self.lock()?.teams.get(&id).cloned())
    }

    fn teams(&self, event: EventId) -> Result<Vec<Team>, StoreError> {
        Ok(self.lock()?.teams.values().filter(|team| team.event == event).cloned().collect())
    }

    fn team_for(&self, user: UserId, event: EventId) -> Result<Option<TeamId>, StoreError> {
        let t = self.lock()?;
        Ok(t.teams
            .values()
            .filter(|team| team.event == event)
            .find(|team| t.members.get(&team.id).is_some_and(|m| m.contains(&user)))
            .map(|team| team.id))
    }

    fn team_members(&self, team: TeamId) -> Result<BTreeSet<UserId>, StoreError> {
        Ok(self.lock()?.members.get(&team).cloned().unwrap_or_default())
    }

    fn set_team_members(&self, team: TeamId, members: BTreeSet<UserId>) -> Result<BTreeSet<UserId>, StoreError> {
        let mut t = self.lock()?;
        let event = t.teams.get(&team).ok_or(StoreError::NotFound { kind: "team", id: team.0 })?.event;
        let siblings: Vec<TeamId> = t.teams.values().filter(|other| other.event == event && other.id != team).map(|other| other.id).collect();

        let previous = t.members.get(&team).cloned().unwrap_or_default();
        let mut changed: BTreeSet<UserId> = previous.symmetric_difference(&members).copied().collect();
        for sibling in siblings {
            if let Some(roster) = t.members.get_mut(&sibling) {
                let moved: Vec<UserId> = roster.intersection(&members).copied().collect();
                for user in moved {
                    roster.remove(&user);
                    changed.insert(user);
                }
            }
        }
        t.members.insert(team, members);
        Ok(changed)
    }

    fn put_hint(&self, hint: Hint) -> Result<(), StoreError> {
        self.lock()?.hints.insert(hint.id, hint);
        Ok(())
    }

    fn hints(&self, puzzle: PuzzleId) -> Result<Vec<Hint>, StoreError> {
        let mut out: Vec<Hint> = self.lock()?.hints.values().filter(|h| h.puzzle == puzzle).cloned().collect();
        out.sort_by_key(|h| (h.delay, h.id));
        Ok(out)
    }

    fn put_unlock(&self, unlock: Unlock) -> Result<(), StoreError> {
        self.lock()?.unlocks.insert(unlock.id, unlock);
        Ok(())
    }

    fn unlock(&self, id: UnlockId) -> Result<Option<Unlock>, StoreError> {
        Ok(self.lock()?.unlocks.get(&id).cloned())
    }

    fn unlocks(&self, puzzle: PuzzleId) -> Result<Vec<Unlock>, StoreError> {
        Ok(self.lock()?.unlocks.values().filter(|u| u.puzzle == puzzle).cloned().collect())
    }

    fn put_unlock_answer(&self, answer: UnlockAnswer) -> Result<(), StoreError> {
        let mut t = self.lock()?;
        if let Some(existing) = t.unlock_answers.get(&answer.id) {
            if existing.unlock() != answer.unlock() {
                return Err(StoreError::Conflict(format!("{} cannot move to {}", answer.id, answer.unlock())));
            }
        }
        t.unlock_answers.insert(answer.id, answer);
        Ok(())
    }

    fn unlock_answer(&self, id: UnlockAnswerId) -> Result<Option<UnlockAnswer>, StoreError> {
        Ok(self.lock()?.unlock_answers.get(&id).cloned())
    }

    fn unlock_answers(&self, unlock: UnlockId) -> Result<Vec<UnlockAnswer>, StoreError> {
        Ok(self.lock()?.unlock_answers.values().filter(|a| a.unlock() == unlock).cloned().collect())
    }

    fn data(&self, scope: DataScope) -> Result<ScopedData, StoreError> {
        Ok(self.lock()?.data.entry(scope).or_insert_with(|| ScopedData::new(scope)).clone())
    }

    fn find_data(&self, scope: DataScope) -> Result<Option<ScopedData>, StoreError> {
        Ok(self.lock()?.data.get(&scope).cloned())
    }

    fn commit_data(&self, writes: &[DataWrite]) -> Result<bool, StoreError> {
        let mut t = self.lock()?;
        let null = Value::Null;
        if writes.iter().any(|w| t.data.get(&w.scope).map_or(&null, |blob| &blob.data) != &w.expected) {
            return Ok(false);
        }
        for write in writes {
            t.data.entry(write.scope).or_insert_with(|| ScopedData::new(write.scope)).data = write.data.clone();
        }
        Ok(true)
    }

    fn start_team_puzzle(&self, team: TeamId, puzzle: PuzzleId, now: DateTime<Utc>) -> Result<ScopedData, StoreError> {
        let scope = DataScope::TeamPuzzle(team, puzzle);
        let mut t = self.lock()?;
        let data = t.data.entry(scope).or_insert_with(|| ScopedData::new(scope));
        data.start_time.get_or_insert(now);
        Ok(data.clone())
    }

    fn data_by_token(&self, token: Uuid) -> Result<Option<ScopedData>, StoreError> {
        Ok(self.lock()?.data.values().find(|d| d.token == Some(token)).cloned())
    }

    fn headstart_adjustment(&self, episode: EpisodeId, team: TeamId) -> Result<Option<TimeDelta>, StoreError> {
        Ok(self.lock()?.headstarts.get(&(episode, team)).copied())
    }

    fn set_headstart_adjustment(&self, adjustment: HeadstartAdjustment) -> Result<(), StoreError> {
        self.lock()?.headstarts.insert((adjustment.episode, adjustment.team), adjustment.adjustment);
        Ok(())
    }
}

pub fn new_store() -> Store {
    Arc::new(Mem::default())
}
