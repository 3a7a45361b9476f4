//! Hints (time-delayed) and unlocks (guess-triggered).

use chrono::{DateTime, TimeDelta, Utc};

use crate::engine::{Hunt, HuntView, UnlockNotice};
use crate::error::{HuntError, HuntResult};
use crate::ids::*;
use crate::model::*;
use crate::runtime::RuntimeContext;

impl HuntView<'_> {
    /// When the team's hint becomes visible. None if the team never opened the puzzle.
    pub fn hint_time(&self, hint: &Hint, team: TeamId) -> HuntResult<Option<DateTime<Utc>>> {
        let started = self.store.find_data(DataScope::TeamPuzzle(team, hint.puzzle))?.and_then(|d| d.start_time);
        Ok(started.map(|start| start + hint.delay))
    }

    pub fn visible_hints(&self, puzzle: PuzzleId, team: TeamId) -> HuntResult<Vec<Hint>> {
        let mut out = Vec::new();
        for hint in self.store.hints(puzzle)? {
            if self.hint_time(&hint, team)?.is_some_and(|shown| shown < self.now) {
                out.push(hint);
            }
        }
        Ok(out)
    }

    /// Hints that became visible after `since`; every visible hint when `since` is None.
    pub fn hints_since(&self, puzzle: &Puzzle, team: TeamId, since: Option<DateTime<Utc>>) -> HuntResult<Vec<Hint>> {
        let Some(since) = since else {
            return self.visible_hints(puzzle.id, team);
        };
        let mut out = Vec::new();
        for hint in self.visible_hints(puzzle.id, team)? {
            if self.hint_time(&hint, team)?.is_some_and(|shown| shown > since) {
                out.push(hint);
            }
        }
        Ok(out)
    }

    pub fn unlock_matches(&self, answer: &UnlockAnswer, guess: &Guess, ctx: &RuntimeContext) -> HuntResult<bool> {
        Ok(self.runtimes.validate_guess(answer.runtime, &answer.guess, &guess.guess, ctx)?)
    }

    /// The team's guesses on the unlock's puzzle that match any of its answers.
    pub fn unlock_guesses(&self, unlock: &Unlock, team: TeamId) -> HuntResult<Vec<Guess>> {
        let answers = self.store.unlock_answers(unlock.id)?;
        if answers.is_empty() {
            return Ok(Vec::new());
        }
        let ctx = self.validation_context(unlock.puzzle, Some(team))?;
        let mut out = Vec::new();
        for guess in self.store.team_guesses(unlock.puzzle, team)? {
            for answer in &answers {
                if self.unlock_matches(answer, &guess, &ctx)? {
                    out.push(guess);
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Every unlock the team has triggered on the puzzle, flagged `new` when
    /// `latest` is among the guesses that triggered it.
    pub fn triggered_unlocks(&self, puzzle: &Puzzle, team: TeamId, latest: Option<GuessId>) -> HuntResult<Vec<UnlockNotice>> {
        let mut out = Vec::new();
        for unlock in self.store.unlocks(puzzle.id)? {
            let guesses = self.unlock_guesses(&unlock, team)?;
            if guesses.is_empty() {
                continue;
            }
            let new = latest.is_some_and(|id| guesses.iter().any(|g| g.id == id));
            out.push(UnlockNotice { unlock, new });
        }
        Ok(out)
    }
}

impl Hunt {
    pub fn add_hint(&self, puzzle: PuzzleId, text: impl Into<String>, delay: TimeDelta) -> HuntResult<Hint> {
        self.view().puzzle(puzzle)?;
        let hint = Hint { id: HintId(self.next_id()?), puzzle, text: text.into(), delay };
        self.store().put_hint(hint.clone())?;
        Ok(hint)
    }

    pub fn add_unlock(&self, puzzle: PuzzleId, text: impl Into<String>) -> HuntResult<Unlock> {
        self.view().puzzle(puzzle)?;
        let unlock = Unlock { id: UnlockId(self.next_id()?), puzzle, text: text.into() };
        self.store().put_unlock(unlock.clone())?;
        Ok(unlock)
    }

    pub fn add_unlock_answer(&self, unlock: UnlockId, draft: AnswerDraft) -> HuntResult<UnlockAnswer> {
        self.store().unlock(unlock)?.ok_or_else(|| HuntError::not_found(unlock))?;
        self.runtimes().check_validator(draft.runtime, &draft.answer)?;
        let answer = UnlockAnswer::new(UnlockAnswerId(self.next_id()?), unlock, draft.runtime, draft.answer);
        self.store().put_unlock_answer(answer.clone())?;
        Ok(answer)
    }

    /// Changes an unlock answer's runtime and text. `unlock` must be the one it already belongs to.
    pub fn update_unlock_answer(&self, id: UnlockAnswerId, unlock: UnlockId, draft: AnswerDraft) -> HuntResult<UnlockAnswer> {
        let existing = self.store().unlock_answer(id)?.ok_or_else(|| HuntError::not_found(id))?;
        if existing.unlock() != unlock {
            return Err(HuntError::ImmutableUnlock);
        }
        self.runtimes().check_validator(draft.runtime, &draft.answer)?;
        let answer = UnlockAnswer::new(id, unlock, draft.runtime, draft.answer);
        self.store().put_unlock_answer(answer.clone())?;
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::HuntConfig;
    use crate::runtime::{Runtime, RuntimeError};
    use crate::store::new_store;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn setup() -> (Hunt, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(at(0)));
        let hunt = Hunt::new(new_store(), clock.clone(), HuntConfig::default());
        hunt.add_event(Event::new(EventId(1), "hunt", at(-100), at(100_000))).unwrap();
        hunt.add_episode(Episode::new(EpisodeId(1), EventId(1), "e", at(-10))).unwrap();
        hunt.add_puzzle(Puzzle::new(PuzzleId(1), EpisodeId(1), "p")).unwrap();
        hunt.save_answer(PuzzleId(1), AnswerDraft::static_text("owl")).unwrap();
        hunt.add_team(Team::new(TeamId(3), EventId(1), "t")).unwrap();
        hunt.set_team_members(TeamId(3), BTreeSet::from([UserId(30), UserId(31)])).unwrap();
        (hunt, clock)
    }

    #[test]
    fn hints_appear_after_delay_from_first_view() {
        let (hunt, clock) = setup();
        let soon = hunt.add_hint(PuzzleId(1), "think nocturnal", TimeDelta::minutes(10)).unwrap();
        let later = hunt.add_hint(PuzzleId(1), "it hoots", TimeDelta::minutes(30)).unwrap();
        assert!(hunt.view().visible_hints(PuzzleId(1), TeamId(3)).unwrap().is_empty());

        hunt.render_puzzle(UserId(30), PuzzleId(1)).unwrap();
        clock.advance(TimeDelta::minutes(10));
        assert!(hunt.view().visible_hints(PuzzleId(1), TeamId(3)).unwrap().is_empty());
        clock.advance(TimeDelta::minutes(1));
        assert_eq!(hunt.view().visible_hints(PuzzleId(1), TeamId(3)).unwrap(), vec![soon.clone()]);

        let checked = hunt.now();
        clock.advance(TimeDelta::minutes(30));
        let puzzle = hunt.view().puzzle(PuzzleId(1)).unwrap();
        assert_eq!(hunt.view().hints_since(&puzzle, TeamId(3), Some(checked)).unwrap(), vec![later]);
        assert_eq!(hunt.view().hints_since(&puzzle, TeamId(3), None).unwrap().len(), 2);
    }

    #[test]
    fn unlocks_are_reported_once_and_flag_new_guesses() {
        let (hunt, clock) = setup();
        let unlock = hunt.add_unlock(PuzzleId(1), "Birds, not mammals").unwrap();
        hunt.add_unlock_answer(unlock.id, AnswerDraft::static_text("bat")).unwrap();
        hunt.add_unlock_answer(unlock.id, AnswerDraft::new(Runtime::Regex, "[Bb]at.*")).unwrap();

        let first = hunt.submit_guess(UserId(30), PuzzleId(1), "bat", None).unwrap();
        assert_eq!(first.unlocks, vec![UnlockNotice { unlock: unlock.clone(), new: true }]);

        clock.advance(TimeDelta::minutes(1));
        let second = hunt.submit_guess(UserId(31), PuzzleId(1), "cat", None).unwrap();
        assert_eq!(second.unlocks, vec![UnlockNotice { unlock: unlock.clone(), new: false }]);

        assert_eq!(hunt.view().unlock_guesses(&unlock, TeamId(3)).unwrap().len(), 1);
    }

    #[test]
    fn unlock_answers_keep_their_unlock() {
        let (hunt, _clock) = setup();
        let a = hunt.add_unlock(PuzzleId(1), "a").unwrap();
        let b = hunt.add_unlock(PuzzleId(1), "b").unwrap();
        let answer = hunt.add_unlock_answer(a.id, AnswerDraft::static_text("x")).unwrap();
        assert!(matches!(
            hunt.update_unlock_answer(answer.id, b.id, AnswerDraft::static_text("y")),
            Err(HuntError::ImmutableUnlock)
        ));
        let updated = hunt.update_unlock_answer(answer.id, a.id, AnswerDraft::static_text("y")).unwrap();
        assert_eq!(updated.guess, "y");
        assert!(matches!(
            hunt.add_unlock_answer(a.id, AnswerDraft::new(Runtime::Regex, "[Rr")),
            Err(HuntError::Runtime(_))
        ));
        assert!(matches!(
            hunt.update_unlock_answer(answer.id, a.id, AnswerDraft::new(Runtime::IFrame, "https://example.com")),
            Err(HuntError::Runtime(RuntimeError::NotImplemented { .. }))
        ));
    }
}
