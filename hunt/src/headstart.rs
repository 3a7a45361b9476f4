//! Headstarts: time credit that moves an episode's start earlier for a team.

use chrono::TimeDelta;
use log::info;

use crate::engine::{Hunt, HuntView};
use crate::error::HuntResult;
use crate::ids::*;
use crate::model::*;

impl HuntView<'_> {
    /// Sum of `headstart_granted` over the episode's puzzles the team has answered.
    pub fn headstart_granted(&self, episode: &Episode, team: TeamId) -> HuntResult<TimeDelta> {
        let mut total = TimeDelta::zero();
        for puzzle in self.store.puzzles(episode.id)? {
            if self.answered_by(puzzle.id, team)? {
                total += puzzle.headstart_granted;
            }
        }
        Ok(total)
    }

    /// Headstart granted by the episode's sources plus the manual adjustment.
    /// Never includes the episode's own puzzles.
    pub fn headstart_applied(&self, episode: &Episode, team: TeamId) -> HuntResult<TimeDelta> {
        let mut total = self.store.headstart_adjustment(episode.id, team)?.unwrap_or_else(TimeDelta::zero);
        for source in &episode.headstart_from {
            if *source == episode.id {
                continue;
            }
            total += self.headstart_granted(&self.episode(*source)?, team)?;
        }
        Ok(total)
    }
}

impl Hunt {
    /// Replaces the manual adjustment for (episode, team). May be negative.
    pub fn set_headstart_adjustment(&self, episode: EpisodeId, team: TeamId, adjustment: TimeDelta) -> HuntResult<()> {
        self.view().episode(episode)?;
        self.view().team(team)?;
        self.store().set_headstart_adjustment(HeadstartAdjustment { episode, team, adjustment })?;
        info!("{team} headstart adjustment on {episode} set to {}s", adjustment.num_seconds());
        Ok(())
    }
}
