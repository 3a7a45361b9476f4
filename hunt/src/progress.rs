//! Episode and puzzle unlock state for a team.
//!
//! Nothing here is stored. `started`, `unlocked` and `finished` are derived
//! from the event window, the prequel graph, puzzle order and the team's
//! correct guesses, as seen at the view's `now`.

use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};

use crate::engine::HuntView;
use crate::error::{HuntError, HuntResult};
use crate::ids::*;
use crate::model::*;

/// Who is looking. Admins see everything; it changes presentation only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Player,
    Admin,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    /// Unlocked, but its start time (after headstart) is still ahead.
    NotStarted { starts_at: DateTime<Utc>, headstart: TimeDelta },
    Locked,
}

impl HuntView<'_> {
    pub fn access_for(&self, team: TeamId) -> HuntResult<Access> {
        Ok(if self.team(team)?.is_admin { Access::Admin } else { Access::Player })
    }

    /// 1-based position of the episode within its event.
    pub fn episode_number(&self, episode: &Episode) -> HuntResult<usize> {
        self.store
            .episodes(episode.event)?
            .iter()
            .position(|e| e.id == episode.id)
            .map(|i| i + 1)
            .ok_or_else(|| HuntError::not_found(episode.id))
    }

    /// 1-based position of the puzzle within its episode.
    pub fn puzzle_number(&self, puzzle: &Puzzle) -> HuntResult<usize> {
        self.store
            .puzzles(puzzle.episode)?
            .iter()
            .position(|p| p.id == puzzle.id)
            .map(|i| i + 1)
            .ok_or_else(|| HuntError::not_found(puzzle.id))
    }

    /// The `number`th (1-based) puzzle of an episode.
    pub fn get_puzzle(&self, episode: EpisodeId, number: usize) -> HuntResult<Option<Puzzle>> {
        let Some(index) = number.checked_sub(1) else {
            return Ok(None);
        };
        Ok(self.store.puzzles(episode)?.into_iter().nth(index))
    }

    /// Whether `episode` transitively requires `other`.
    pub fn follows(&self, episode: EpisodeId, other: EpisodeId) -> HuntResult<bool> {
        let mut seen = BTreeSet::new();
        let mut pending = vec![episode];
        while let Some(current) = pending.pop() {
            if !seen.insert(current) {
                continue;
            }
            for prequel in self.episode(current)?.prequels {
                if prequel == other {
                    return Ok(true);
                }
                pending.push(prequel);
            }
        }
        Ok(false)
    }

    /// The episode's start for a team, moved earlier by the team's headstart.
    pub fn episode_start(&self, episode: &Episode, team: TeamId) -> HuntResult<DateTime<Utc>> {
        Ok(episode.start_date - self.headstart_applied(episode, team)?)
    }

    pub fn episode_started(&self, episode: &Episode, team: TeamId) -> HuntResult<bool> {
        Ok(self.now >= self.episode_start(episode, team)?)
    }

    pub fn episode_unlocked(&self, episode: &Episode, team: TeamId) -> HuntResult<bool> {
        if self.event_of(episode)?.is_over(self.now) {
            return Ok(true);
        }
        for prequel in &episode.prequels {
            if !self.episode_finished(&self.episode(*prequel)?, team)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Every puzzle answered. An episode without puzzles is finished.
    pub fn episode_finished(&self, episode: &Episode, team: TeamId) -> HuntResult<bool> {
        for puzzle in self.store.puzzles(episode.id)? {
            if !self.answered_by(puzzle.id, team)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Only puzzles of parallel episodes have their own start time.
    pub fn puzzle_started(&self, puzzle: &Puzzle, episode: &Episode) -> bool {
        !episode.parallel || puzzle.start_date <= self.now
    }

    pub fn puzzle_unlocked(&self, puzzle: &Puzzle, team: TeamId) -> HuntResult<bool> {
        let episode = self.episode(puzzle.episode)?;
        if self.event_of(&episode)?.is_over(self.now) {
            return Ok(true);
        }
        if !self.episode_unlocked(&episode, team)? {
            return Ok(false);
        }
        if episode.parallel {
            return Ok(self.puzzle_started(puzzle, &episode));
        }
        for earlier in self.store.puzzles(episode.id)? {
            if earlier.id == puzzle.id {
                return Ok(true);
            }
            if !self.answered_by(earlier.id, team)? {
                return Ok(false);
            }
        }
        Err(HuntError::not_found(puzzle.id))
    }

    /// Linear episodes: 1-based position of the first unanswered puzzle.
    /// Parallel episodes: that position only when it is the last one left.
    pub fn next_puzzle(&self, episode: &Episode, team: TeamId) -> HuntResult<Option<usize>> {
        let mut unanswered = Vec::new();
        for (index, puzzle) in self.store.puzzles(episode.id)?.iter().enumerate() {
            if !self.answered_by(puzzle.id, team)? {
                if !episode.parallel {
                    return Ok(Some(index + 1));
                }
                unanswered.push(index + 1);
            }
        }
        Ok(match unanswered.as_slice() {
            [only] => Some(*only),
            _ => None,
        })
    }

    /// Puzzles the team can open: every started puzzle of a parallel episode,
    /// or a linear episode's puzzles up to and including the first unanswered.
    pub fn unlocked_puzzles(&self, episode: &Episode, team: TeamId) -> HuntResult<Vec<Puzzle>> {
        let puzzles = self.store.puzzles(episode.id)?;
        if episode.parallel || self.event_of(episode)?.is_over(self.now) {
            return Ok(puzzles.into_iter().filter(|p| self.puzzle_started(p, episode)).collect());
        }
        let mut out = Vec::new();
        for puzzle in puzzles {
            let answered = self.answered_by(puzzle.id, team)?;
            out.push(puzzle);
            if !answered {
                break;
            }
        }
        Ok(out)
    }

    pub fn episode_visibility(&self, episode: &Episode, team: TeamId, access: Access) -> HuntResult<Visibility> {
        if access == Access::Admin {
            return Ok(Visibility::Visible);
        }
        if !self.episode_unlocked(episode, team)? {
            return Ok(Visibility::Locked);
        }
        let headstart = self.headstart_applied(episode, team)?;
        let starts_at = episode.start_date - headstart;
        if self.now < starts_at && !self.event_of(episode)?.is_over(self.now) {
            return Ok(Visibility::NotStarted { starts_at, headstart });
        }
        Ok(Visibility::Visible)
    }

    pub fn puzzle_visibility(&self, puzzle: &Puzzle, team: TeamId, access: Access) -> HuntResult<Visibility> {
        if access == Access::Admin {
            return Ok(Visibility::Visible);
        }
        let episode = self.episode(puzzle.episode)?;
        match self.episode_visibility(&episode, team, access)? {
            Visibility::Visible => {}
            other => return Ok(other),
        }
        if !self.puzzle_unlocked(puzzle, team)? {
            if episode.parallel && !self.puzzle_started(puzzle, &episode) {
                return Ok(Visibility::NotStarted { starts_at: puzzle.start_date, headstart: TimeDelta::zero() });
            }
            return Ok(Visibility::Locked);
        }
        Ok(Visibility::Visible)
    }
}
