//! Aggregate statistics for organisers.
//!
//! Read-only. These read the cached correctness fields as they are, without
//! recomputing stale ones, and never create data blobs.
//! A figure may lag an answer change until the affected guesses are next read.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};

use crate::engine::HuntView;
use crate::error::HuntResult;
use crate::ids::*;
use crate::model::*;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PuzzleStats {
    pub puzzle: PuzzleId,
    pub title: String,
    /// Competing teams that have answered the puzzle.
    pub completions: usize,
    /// Mean time from first opening to first correct guess.
    pub average_solve: Option<TimeDelta>,
    /// Mean time teams that opened the puzzle but have not solved it have spent on it.
    pub average_stuck: Option<TimeDelta>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TeamProgress {
    pub team: TeamId,
    pub name: Option<String>,
    /// First correct guess time per solved puzzle.
    pub solved: BTreeMap<PuzzleId, DateTime<Utc>>,
    /// Time spent so far on opened, unsolved puzzles.
    pub stuck: BTreeMap<PuzzleId, TimeDelta>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EpisodeStats {
    pub puzzles: Vec<PuzzleStats>,
    pub teams: Vec<TeamProgress>,
}

fn average(durations: &[TimeDelta]) -> Option<TimeDelta> {
    let count = i32::try_from(durations.len()).ok().filter(|n| *n > 0)?;
    let total = durations.iter().fold(TimeDelta::zero(), |acc, d| acc + *d);
    Some(total / count)
}

impl HuntView<'_> {
    /// Statistics over `episodes` of `event`, or over all of its episodes when `episodes` is None.
    pub fn episode_stats(&self, event: EventId, episodes: Option<&[EpisodeId]>) -> HuntResult<EpisodeStats> {
        let teams = self.competing_teams(event)?;
        let mut puzzles = Vec::new();
        for episode in self.store.episodes(event)? {
            if episodes.is_some_and(|wanted| !wanted.contains(&episode.id)) {
                continue;
            }
            puzzles.extend(self.store.puzzles(episode.id)?);
        }

        let mut progress: Vec<TeamProgress> = teams
            .iter()
            .map(|t| TeamProgress { team: t.id, name: t.name.clone(), solved: BTreeMap::new(), stuck: BTreeMap::new() })
            .collect();
        let mut stats = Vec::with_capacity(puzzles.len());

        for puzzle in &puzzles {
            let mut solve_times = Vec::new();
            let mut stuck_times = Vec::new();
            for entry in progress.iter_mut() {
                let solved_at = self
                    .store
                    .team_guesses(puzzle.id, entry.team)?
                    .into_iter()
                    .find(|g| g.cached_correct_for().is_some())
                    .map(|g| g.given);
                let opened = self.store.find_data(DataScope::TeamPuzzle(entry.team, puzzle.id))?.and_then(|d| d.start_time);
                match (solved_at, opened) {
                    (Some(solved), opened) => {
                        entry.solved.insert(puzzle.id, solved);
                        if let Some(opened) = opened {
                            solve_times.push(solved - opened);
                        }
                    }
                    (None, Some(opened)) => {
                        let stuck = self.now - opened;
                        entry.stuck.insert(puzzle.id, stuck);
                        stuck_times.push(stuck);
                    }
                    (None, None) => {}
                }
            }
            stats.push(PuzzleStats {
                puzzle: puzzle.id,
                title: puzzle.title.clone(),
                completions: progress.iter().filter(|p| p.solved.contains_key(&puzzle.id)).count(),
                average_solve: average(&solve_times),
                average_stuck: average(&stuck_times),
            });
        }
        Ok(EpisodeStats { puzzles: stats, teams: progress })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_of_nothing_is_none() {
        assert_eq!(average(&[]), None);
        assert_eq!(average(&[TimeDelta::minutes(10), TimeDelta::minutes(20)]), Some(TimeDelta::minutes(15)));
    }
}
