//! Guess correctness cache.
//!
//! Each guess caches the first answer of its puzzle it matches (`correct_for`)
//! and whether that cache is current. Reads recompute stale entries; answer
//! mutations invalidate, in the same store transaction, every guess cached
//! against the answer and, on save, every guess that matched nothing.
//!
//! Recomputation runs outside any lock and is committed with a compare-and-set
//! on the guess's cache epoch. An invalidation that lands in between bumps the
//! epoch, the write is dropped and the guess stays stale.

use std::collections::BTreeMap;

use log::{debug, info, warn};

use crate::engine::{Hunt, HuntView};
use crate::error::{HuntError, HuntResult};
use crate::ids::*;
use crate::model::*;
use crate::runtime::{Runtime, RuntimeContext};
use crate::store::StaleGuesses;

impl HuntView<'_> {
    /// The answer `guess` matches, recomputing the cache if it is stale or
    /// points at an answer that no longer exists.
    pub fn correct_for(&self, guess: &Guess) -> HuntResult<Option<Answer>> {
        if guess.correct_current {
            match guess.correct_for {
                None => return Ok(None),
                Some(id) => {
                    if let Some(answer) = self.store.answer(id)?.filter(|a| a.puzzle == guess.puzzle) {
                        return Ok(Some(answer));
                    }
                    debug!("{} cached a missing {id}, recomputing", guess.id);
                }
            }
        }
        self.recompute(guess)
    }

    pub fn is_correct(&self, guess: &Guess) -> HuntResult<bool> {
        Ok(self.correct_for(guess)?.is_some())
    }

    fn recompute(&self, guess: &Guess) -> HuntResult<Option<Answer>> {
        // The row (and its epoch) must be read before the answers.
        let stored = self.store.guess(guess.id)?;
        let epoch = stored.as_ref().map(|g| g.cache_epoch);
        let guess = stored.as_ref().unwrap_or(guess);
        let answers = self.store.answers(guess.puzzle)?;
        let ctx = if answers.iter().any(|a| a.runtime == Runtime::Lua) {
            self.validation_context(guess.puzzle, guess.by_team)?
        } else {
            RuntimeContext::default()
        };

        let mut matched = None;
        for answer in answers {
            let hit = self.runtimes.validate_guess(answer.runtime, &answer.answer, &guess.guess, &ctx).map_err(|e| {
                warn!("{} failed validating {}: {e}", answer.id, guess.id);
                HuntError::from(e)
            })?;
            if hit {
                matched = Some(answer);
                break;
            }
        }

        if let Some(epoch) = epoch {
            let committed = self.store.record_correctness(guess.id, epoch, matched.as_ref().map(|a| a.id))?;
            if !committed {
                debug!("{} was invalidated during recomputation", guess.id);
            }
        }
        Ok(matched)
    }

    /// The data a validator sees: the guessing team's blobs.
    pub(crate) fn validation_context(&self, puzzle: PuzzleId, team: Option<TeamId>) -> HuntResult<RuntimeContext> {
        let Some(team) = team else {
            return Ok(RuntimeContext::default());
        };
        Ok(RuntimeContext {
            team_puzzle_data: Some(self.store.data(DataScope::TeamPuzzle(team, puzzle))?.data),
            team_data: Some(self.store.data(DataScope::Team(team))?.data),
            ..RuntimeContext::default()
        })
    }

    /// The team's earliest guess on `puzzle` that matches an answer.
    pub fn first_correct_guess(&self, puzzle: PuzzleId, team: TeamId) -> HuntResult<Option<Guess>> {
        for guess in self.store.team_guesses(puzzle, team)? {
            if self.is_correct(&guess)? {
                return Ok(Some(guess));
            }
        }
        Ok(None)
    }

    pub fn answered_by(&self, puzzle: PuzzleId, team: TeamId) -> HuntResult<bool> {
        Ok(self.first_correct_guess(puzzle, team)?.is_some())
    }

    /// Earliest correct guess per team on `puzzle`.
    pub fn first_correct_guesses(&self, puzzle: PuzzleId) -> HuntResult<BTreeMap<TeamId, Guess>> {
        let mut out = BTreeMap::new();
        for guess in self.store.guesses(puzzle)? {
            let Some(team) = guess.by_team else { continue };
            if out.contains_key(&team) {
                continue;
            }
            if self.is_correct(&guess)? {
                out.insert(team, guess);
            }
        }
        Ok(out)
    }
}

/// How one team's progress on a puzzle would move if an answer changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TeamImpact {
    pub team: TeamId,
    /// Guesses that would newly count as correct.
    pub gained: Vec<Guess>,
    /// Guesses that would stop counting as correct.
    pub lost: Vec<Guess>,
    /// Whether the team would go from unanswered to answered, or the reverse.
    pub answered_before: bool,
    pub answered_after: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnswerChange {
    Save(AnswerDraft),
    Delete,
}

impl HuntView<'_> {
    /// Dry run of an answer create, update or delete. Nothing is written.
    pub fn preview_answer_change(
        &self,
        puzzle: PuzzleId,
        existing: Option<AnswerId>,
        change: &AnswerChange,
    ) -> HuntResult<Vec<TeamImpact>> {
        let current = self.store.answers(puzzle)?;
        let mut proposed: Vec<Answer> = current.iter().filter(|a| Some(a.id) != existing).cloned().collect();
        if let AnswerChange::Save(draft) = change {
            self.runtimes.check_validator(draft.runtime, &draft.answer)?;
            let id = existing.unwrap_or(AnswerId(u64::MAX));
            proposed.push(Answer { id, puzzle, runtime: draft.runtime, answer: draft.answer.clone() });
            proposed.sort_by_key(|a| a.id);
        }

        let mut by_team: BTreeMap<TeamId, TeamImpact> = BTreeMap::new();
        for guess in self.store.guesses(puzzle)? {
            let Some(team) = guess.by_team else { continue };
            let ctx = self.validation_context(puzzle, Some(team))?;
            let before = self.is_correct(&guess)?;
            let mut after = false;
            for answer in &proposed {
                if self.runtimes.validate_guess(answer.runtime, &answer.answer, &guess.guess, &ctx)? {
                    after = true;
                    break;
                }
            }
            let impact = by_team.entry(team).or_insert_with(|| TeamImpact {
                team,
                gained: Vec::new(),
                lost: Vec::new(),
                answered_before: false,
                answered_after: false,
            });
            impact.answered_before |= before;
            impact.answered_after |= after;
            match (before, after) {
                (false, true) => impact.gained.push(guess),
                (true, false) => impact.lost.push(guess),
                _ => {}
            }
        }
        Ok(by_team.into_values().filter(|i| !i.gained.is_empty() || !i.lost.is_empty()).collect())
    }
}

impl Hunt {
    pub fn save_answer(&self, puzzle: PuzzleId, draft: AnswerDraft) -> HuntResult<Answer> {
        self.view().puzzle(puzzle)?;
        self.runtimes().check_validator(draft.runtime, &draft.answer)?;
        let answer = Answer { id: AnswerId(self.next_id()?), puzzle, runtime: draft.runtime, answer: draft.answer };
        self.commit_answer(answer)
    }

    pub fn update_answer(&self, id: AnswerId, draft: AnswerDraft) -> HuntResult<Answer> {
        let existing = self.store().answer(id)?.ok_or_else(|| HuntError::not_found(id))?;
        self.runtimes().check_validator(draft.runtime, &draft.answer)?;
        self.commit_answer(Answer { runtime: draft.runtime, answer: draft.answer, ..existing })
    }

    fn commit_answer(&self, answer: Answer) -> HuntResult<Answer> {
        let (puzzle, id) = (answer.puzzle, answer.id);
        let invalidated = self.store().save_answer(answer.clone(), StaleGuesses::on_save(puzzle, id))?;
        info!("saved {id} for {puzzle}, {invalidated} guesses invalidated");
        self.notify(|h| h.on_answer_changed(puzzle, id, invalidated));
        Ok(answer)
    }

    pub fn delete_answer(&self, id: AnswerId) -> HuntResult<Answer> {
        let existing = self.store().answer(id)?.ok_or_else(|| HuntError::not_found(id))?;
        let invalidated = self.store().delete_answer(id, StaleGuesses::on_delete(existing.puzzle, id))?;
        info!("deleted {id} from {}, {invalidated} guesses invalidated", existing.puzzle);
        self.notify(|h| h.on_answer_changed(existing.puzzle, id, invalidated));
        Ok(existing)
    }
}
