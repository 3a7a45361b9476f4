//! Finishing order for episodes and for the event as a whole.
//!
//! Computed on demand from first-correct guesses; nothing is cached. Admin
//! teams are not ranked.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use itertools::Itertools;

use crate::engine::HuntView;
use crate::error::HuntResult;
use crate::ids::*;
use crate::model::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Finish {
    pub team: TeamId,
    pub finished_at: DateTime<Utc>,
}

impl HuntView<'_> {
    /// Finishing time of every team that has finished the episode.
    ///
    /// Linear: when the last puzzle was first answered, for teams that have
    /// answered every puzzle. Parallel: the latest of the first-correct times
    /// across all puzzles, defined once all are answered.
    pub fn finishing_times(&self, episode: &Episode) -> HuntResult<BTreeMap<TeamId, DateTime<Utc>>> {
        let puzzles = self.store.puzzles(episode.id)?;
        let Some(last) = puzzles.last() else {
            return Ok(BTreeMap::new());
        };

        let mut times = if episode.parallel {
            let mut per_puzzle = Vec::with_capacity(puzzles.len());
            for puzzle in &puzzles {
                per_puzzle.push(self.first_correct_guesses(puzzle.id)?);
            }
            let mut times = BTreeMap::new();
            for team in per_puzzle[0].keys() {
                let all: Option<Vec<DateTime<Utc>>> =
                    per_puzzle.iter().map(|firsts| firsts.get(team).map(|g| g.given)).collect();
                if let Some(latest) = all.and_then(|given| given.into_iter().max()) {
                    times.insert(*team, latest);
                }
            }
            times
        } else {
            // Answering the last puzzle is not enough if an earlier answer has since stopped counting.
            let mut times = BTreeMap::new();
            for (team, guess) in self.first_correct_guesses(last.id)? {
                if self.episode_finished(episode, team)? {
                    times.insert(team, guess.given);
                }
            }
            times
        };

        for team in times.keys().copied().collect::<Vec<_>>() {
            if self.team(team)?.is_admin {
                times.remove(&team);
            }
        }
        Ok(times)
    }

    pub fn finished_time(&self, episode: &Episode, team: TeamId) -> HuntResult<Option<DateTime<Utc>>> {
        Ok(self.finishing_times(episode)?.get(&team).copied())
    }

    /// Teams that finished the episode, earliest first. Ties fall back to team id.
    pub fn finished_positions(&self, episode: &Episode) -> HuntResult<Vec<Finish>> {
        Ok(rank(self.finishing_times(episode)?))
    }

    /// Teams that finished every winning episode, ranked by when they finished the last of them.
    pub fn event_finishing_positions(&self, event: EventId) -> HuntResult<Vec<Finish>> {
        let winning: Vec<Episode> = self.store.episodes(event)?.into_iter().filter(|e| e.winning).collect();
        let Some((first, rest)) = winning.split_first() else {
            return Ok(Vec::new());
        };
        let mut finished = self.finishing_times(first)?;
        for episode in rest {
            let times = self.finishing_times(episode)?;
            finished = finished
                .into_iter()
                .filter_map(|(team, at)| times.get(&team).map(|other| (team, at.max(*other))))
                .collect();
        }
        Ok(rank(finished))
    }
}

fn rank(times: BTreeMap<TeamId, DateTime<Utc>>) -> Vec<Finish> {
    times
        .into_iter()
        .map(|(team, finished_at)| Finish { team, finished_at })
        .sorted_by_key(|f| (f.finished_at, f.team))
        .collect()
}
