//! The [`Hunt`] facade.
//!
//! `Hunt` owns the collaborators (store, runtimes, clock, config) and performs
//! every mutation. Reads go through a [`HuntView`], a borrow of the same
//! collaborators pinned at one instant, so a whole decision (unlocks,
//! headstarts, finishing order) sees a single "now". The domain modules extend
//! both types with their own `impl` blocks.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use log::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::HuntConfig;
use crate::error::{HuntError, HuntResult};
use crate::ids::*;
use crate::model::*;
use crate::progress::{Access, Visibility};
use crate::runtime::{Runtime, RuntimeContext, RuntimeRegistry};
use crate::store::{new_store, DataWrite, Store, StoreError, StoreTrait};

/// Callbacks for collaborators that mirror hunt activity elsewhere, such as a
/// live leaderboard. Called after the change is persisted.
pub trait HuntEventHandler: Send + Sync {
    fn on_guess(&self, outcome: &GuessOutcome);
    fn on_answer_changed(&self, puzzle: PuzzleId, answer: AnswerId, invalidated: usize);
    fn on_membership_changed(&self, team: TeamId, changed: &BTreeSet<UserId>);
}

/// Result of a guess submission, as shown to the guessing team.
#[derive(Clone, Debug, PartialEq)]
pub struct GuessOutcome {
    pub guess: Guess,
    pub correct: bool,
    /// Position of the team's next puzzle in the episode, only when the guess was correct.
    pub next_puzzle: Option<usize>,
    /// Hints that became visible since the caller's `last_updated`.
    pub hints: Vec<Hint>,
    pub unlocks: Vec<UnlockNotice>,
}

/// An unlock the team has triggered. `new` is set when this very guess triggered it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnlockNotice {
    pub unlock: Unlock,
    pub new: bool,
}

const DATA_COMMIT_ATTEMPTS: usize = 16;

pub struct Hunt {
    store: Store,
    runtimes: RuntimeRegistry,
    clock: Arc<dyn Clock>,
    config: HuntConfig,
    handlers: Vec<Arc<dyn HuntEventHandler>>,
}

/// Read access to a hunt pinned at `now`.
#[derive(Clone, Copy)]
pub struct HuntView<'a> {
    pub(crate) store: &'a (dyn StoreTrait + Send + Sync),
    pub(crate) runtimes: &'a RuntimeRegistry,
    pub(crate) now: DateTime<Utc>,
}

impl Hunt {
    pub fn new(store: Store, clock: Arc<dyn Clock>, config: HuntConfig) -> Self {
        let runtimes = RuntimeRegistry::new(config.sandbox);
        Self { store, runtimes, clock, config, handlers: Vec::new() }
    }

    /// In-memory store, wall clock, default limits.
    pub fn in_memory() -> Self {
        Self::new(new_store(), Arc::new(SystemClock), HuntConfig::default())
    }

    pub fn with_handler(mut self, handler: Arc<dyn HuntEventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn runtimes(&self) -> &RuntimeRegistry {
        &self.runtimes
    }

    pub fn config(&self) -> &HuntConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn view(&self) -> HuntView<'_> {
        self.view_at(self.clock.now())
    }

    pub fn view_at(&self, now: DateTime<Utc>) -> HuntView<'_> {
        HuntView { store: &*self.store, runtimes: &self.runtimes, now }
    }

    pub(crate) fn next_id(&self) -> HuntResult<u64> {
        Ok(self.store.allocate_id()?)
    }

    pub(crate) fn notify(&self, f: impl Fn(&dyn HuntEventHandler)) {
        for handler in &self.handlers {
            f(handler.as_ref());
        }
    }

    // ---------------------------------------------------------------- structure

    pub fn add_event(&self, event: Event) -> HuntResult<Event> {
        self.store.put_event(event.clone())?;
        Ok(event)
    }

    /// Stores a new episode. Its prequels are checked like [`Hunt::add_prequel`].
    pub fn add_episode(&self, episode: Episode) -> HuntResult<Episode> {
        self.view().event(episode.event)?;
        let prequels = episode.prequels.clone();
        let mut stored = episode;
        stored.prequels.clear();
        self.store.put_episode(stored.clone())?;
        for prequel in prequels {
            stored = self.add_prequel(stored.id, prequel)?;
        }
        Ok(stored)
    }

    /// Makes `prequel` a prerequisite of `episode`, rejecting self references and cycles.
    pub fn add_prequel(&self, episode: EpisodeId, prequel: EpisodeId) -> HuntResult<Episode> {
        if episode == prequel {
            return Err(HuntError::SelfReference { episode });
        }
        let view = self.view();
        let mut stored = view.episode(episode)?;
        view.episode(prequel)?;
        if view.follows(prequel, episode)? {
            warn!("rejected prequel {prequel} for {episode}: cycle");
            return Err(HuntError::PrequelCycle { episode, prequel });
        }
        stored.prequels.insert(prequel);
        self.store.put_episode(stored.clone())?;
        Ok(stored)
    }

    pub fn add_headstart_source(&self, episode: EpisodeId, source: EpisodeId) -> HuntResult<Episode> {
        let view = self.view();
        let mut stored = view.episode(episode)?;
        view.episode(source)?;
        stored.headstart_from.insert(source);
        self.store.put_episode(stored.clone())?;
        Ok(stored)
    }

    /// Stores a new puzzle at the end of its episode unless it carries an explicit order.
    pub fn add_puzzle(&self, mut puzzle: Puzzle) -> HuntResult<Puzzle> {
        self.view().episode(puzzle.episode)?;
        self.check_puzzle_scripts(&puzzle)?;
        if puzzle.order == 0 {
            let last = self.store.puzzles(puzzle.episode)?.iter().map(|p| p.order).max().unwrap_or(0);
            puzzle.order = last + 1;
        }
        self.store.put_puzzle(puzzle.clone())?;
        Ok(puzzle)
    }

    pub fn update_puzzle(&self, puzzle: Puzzle) -> HuntResult<Puzzle> {
        self.view().puzzle(puzzle.id)?;
        self.check_puzzle_scripts(&puzzle)?;
        self.store.put_puzzle(puzzle.clone())?;
        Ok(puzzle)
    }

    fn check_puzzle_scripts(&self, puzzle: &Puzzle) -> HuntResult<()> {
        for (runtime, script) in [
            (puzzle.runtime, &puzzle.content),
            (puzzle.cb_runtime, &puzzle.cb_content),
            (puzzle.soln_runtime, &puzzle.soln_content),
        ] {
            if !script.is_empty() {
                self.runtimes.check_script(runtime, script)?;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------- teams

    /// At most one admin team per event.
    pub fn add_team(&self, team: Team) -> HuntResult<Team> {
        self.view().event(team.event)?;
        if team.is_admin && self.store.teams(team.event)?.iter().any(|t| t.is_admin && t.id != team.id) {
            return Err(HuntError::DuplicateAdminTeam { event: team.event });
        }
        self.store.put_team(team.clone())?;
        Ok(team)
    }

    /// Replaces a team's roster and re-derives the team of every guess made by
    /// a user whose team at the event changed.
    pub fn set_team_members(&self, team: TeamId, members: BTreeSet<UserId>) -> HuntResult<BTreeSet<UserId>> {
        let event = self.view().team(team)?.event;
        let changed = self.store.set_team_members(team, members)?;
        for user in &changed {
            let current = self.store.team_for(*user, event)?;
            let updated = self.store.reassign_guesses(*user, event, current)?;
            debug!("{user} moved to {current:?}, {updated} guesses re-attributed");
        }
        if !changed.is_empty() {
            info!("{team} roster changed for {} users", changed.len());
            self.notify(|h| h.on_membership_changed(team, &changed));
        }
        Ok(changed)
    }

    // ------------------------------------------------------------------ guesses

    /// Records a guess for the user's team and evaluates it.
    ///
    /// A validator malfunction is returned as an error after the guess has been
    /// stored; the guess stays stale and is re-evaluated on the next read.
    pub fn submit_guess(
        &self,
        user: UserId,
        puzzle: PuzzleId,
        text: &str,
        last_updated: Option<DateTime<Utc>>,
    ) -> HuntResult<GuessOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(HuntError::EmptyGuess);
        }
        let view = self.view();
        let puzzle = view.puzzle(puzzle)?;
        let episode = view.episode(puzzle.episode)?;
        let event = view.event(episode.event)?;
        if event.is_over(view.now) {
            return Err(HuntError::EventOver);
        }
        let team = self.store.team_for(user, event.id)?.ok_or(HuntError::NoTeam)?;
        let access = view.access_for(team)?;
        if view.puzzle_visibility(&puzzle, team, access)? != Visibility::Visible {
            return Err(HuntError::Locked);
        }

        let cooldown = self.config.guesses.cooldown();
        if let Some(previous) = self.store.user_guesses(puzzle.id, user)?.last() {
            let elapsed = view.now - previous.given;
            if elapsed < cooldown {
                return Err(HuntError::TooFast { retry_after: cooldown - elapsed });
            }
        }

        let mut guess = Guess::new(GuessId(self.next_id()?), puzzle.id, user, text, view.now);
        guess.by_team = Some(team);
        self.store.insert_guess(guess.clone())?;

        let correct = match view.correct_for(&guess) {
            Ok(answer) => answer.is_some(),
            Err(e) => {
                warn!("validator malfunction on {} for {}: {e}", puzzle.id, guess.id);
                return Err(e);
            }
        };
        let next_puzzle = if correct { view.next_puzzle(&episode, team)? } else { None };
        let hints = view.hints_since(&puzzle, team, last_updated)?;
        let unlocks = view.triggered_unlocks(&puzzle, team, Some(guess.id))?;
        let guess = self.store.guess(guess.id)?.unwrap_or(guess);
        info!("{user} ({team}) guessed on {}: correct={correct}", puzzle.id);

        let outcome = GuessOutcome { guess, correct, next_puzzle, hints, unlocks };
        self.notify(|h| h.on_guess(&outcome));
        Ok(outcome)
    }

    /// Changes a guess's text or timestamp. The guess is re-evaluated.
    pub fn edit_guess(&self, id: GuessId, text: Option<&str>, given: Option<DateTime<Utc>>) -> HuntResult<Guess> {
        if text.is_some_and(|t| t.trim().is_empty()) {
            return Err(HuntError::EmptyGuess);
        }
        let edited = self.store.update_guess(id, &mut |guess: &mut Guess| {
            if let Some(text) = text {
                guess.guess = text.trim().to_string();
            }
            if let Some(given) = given {
                guess.given = given;
            }
            guess.mark_stale();
        })?;
        self.view().correct_for(&edited)?;
        Ok(self.store.guess(id)?.unwrap_or(edited))
    }

    pub fn delete_guess(&self, id: GuessId) -> HuntResult<Guess> {
        self.store.delete_guess(id)?.ok_or_else(|| HuntError::not_found(id))
    }

    // ------------------------------------------------------------------ content

    /// Renders a puzzle page for a user, recording when their team first opened it.
    pub fn render_puzzle(&self, user: UserId, puzzle: PuzzleId) -> HuntResult<String> {
        let view = self.view();
        let puzzle = view.puzzle(puzzle)?;
        let team = self.visible_team(&view, user, &puzzle)?;
        self.store.start_team_puzzle(team, puzzle.id, view.now)?;
        self.evaluate_with_data(user, team, &puzzle, puzzle.runtime, &puzzle.content)
    }

    /// Runs the puzzle's callback script, persisting any data it wrote.
    pub fn callback(&self, user: UserId, puzzle: PuzzleId) -> HuntResult<String> {
        let view = self.view();
        let puzzle = view.puzzle(puzzle)?;
        let team = self.visible_team(&view, user, &puzzle)?;
        self.evaluate_with_data(user, team, &puzzle, puzzle.cb_runtime, &puzzle.cb_content)
    }

    /// Solutions are published once the event is over; admins see them at any time.
    pub fn render_solution(&self, user: UserId, puzzle: PuzzleId) -> HuntResult<String> {
        let view = self.view();
        let puzzle = view.puzzle(puzzle)?;
        let event = view.event(view.episode(puzzle.episode)?.event)?;
        let team = self.store.team_for(user, event.id)?;
        let access = match team {
            Some(team) => view.access_for(team)?,
            None => Access::Player,
        };
        if !event.is_over(view.now) && access != Access::Admin {
            return Err(HuntError::Locked);
        }
        match team {
            Some(team) => self.evaluate_with_data(user, team, &puzzle, puzzle.soln_runtime, &puzzle.soln_content),
            None => {
                let mut ctx = RuntimeContext::default();
                Ok(self.runtimes.evaluate(puzzle.soln_runtime, &puzzle.soln_content, &mut ctx)?)
            }
        }
    }

    /// Resolves an iframe token back to the attempt it was issued for.
    pub fn puzzle_info(&self, token: uuid::Uuid) -> HuntResult<Option<(UserId, PuzzleId)>> {
        Ok(match self.store.data_by_token(token)? {
            Some(ScopedData { scope: DataScope::UserPuzzle(user, puzzle), .. }) => Some((user, puzzle)),
            _ => None,
        })
    }

    fn visible_team(&self, view: &HuntView<'_>, user: UserId, puzzle: &Puzzle) -> HuntResult<TeamId> {
        let event = view.episode(puzzle.episode)?.event;
        let team = self.store.team_for(user, event)?.ok_or(HuntError::NoTeam)?;
        if view.puzzle_visibility(puzzle, team, view.access_for(team)?)? != Visibility::Visible {
            return Err(HuntError::Locked);
        }
        Ok(team)
    }

    /// Evaluates `script` with the four blobs and commits what it wrote. If a
    /// blob changed while the script ran, the script runs again on fresh data.
    fn evaluate_with_data(
        &self,
        user: UserId,
        team: TeamId,
        puzzle: &Puzzle,
        runtime: Runtime,
        script: &str,
    ) -> HuntResult<String> {
        let event = self.view().episode(puzzle.episode)?.event;
        for attempt in 1..=DATA_COMMIT_ATTEMPTS {
            let data = PuzzleData {
                team: self.store.data(DataScope::Team(team))?,
                team_puzzle: self.store.data(DataScope::TeamPuzzle(team, puzzle.id))?,
                user: Some(self.store.data(DataScope::User(user, event))?),
                user_puzzle: Some(self.store.data(DataScope::UserPuzzle(user, puzzle.id))?),
            };
            let mut ctx = data.context();
            let content = self.runtimes.evaluate(runtime, script, &mut ctx)?;

            let written = [
                (Some(data.team_puzzle), ctx.team_puzzle_data),
                (data.user_puzzle, ctx.user_puzzle_data),
                (Some(data.team), ctx.team_data),
                (data.user, ctx.user_data),
            ];
            let writes: Vec<DataWrite> = written
                .into_iter()
                .filter_map(|(blob, value)| Some((blob?, value?)))
                .filter(|(blob, value)| blob.data != *value)
                .map(|(blob, value)| DataWrite { scope: blob.scope, expected: blob.data, data: value })
                .collect();
            if writes.is_empty() || self.store.commit_data(&writes)? {
                return Ok(content);
            }
            debug!("data for {} changed during evaluation (attempt {attempt}), running again", puzzle.id);
        }
        warn!("gave up committing data for {} after {DATA_COMMIT_ATTEMPTS} attempts", puzzle.id);
        Err(StoreError::Conflict(format!("data for {} kept changing during evaluation", puzzle.id)).into())
    }
}

impl PuzzleData {
    pub fn context(&self) -> RuntimeContext {
        RuntimeContext {
            team_puzzle_data: Some(self.team_puzzle.data.clone()),
            user_puzzle_data: self.user_puzzle.as_ref().map(|d| d.data.clone()),
            team_data: Some(self.team.data.clone()),
            user_data: self.user.as_ref().map(|d| d.data.clone()),
            token: self.user_puzzle.as_ref().and_then(|d| d.token),
        }
    }
}

impl<'a> HuntView<'a> {
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn event(&self, id: EventId) -> HuntResult<Event> {
        self.store.event(id)?.ok_or_else(|| HuntError::not_found(id))
    }

    pub fn episode(&self, id: EpisodeId) -> HuntResult<Episode> {
        self.store.episode(id)?.ok_or_else(|| HuntError::not_found(id))
    }

    pub fn puzzle(&self, id: PuzzleId) -> HuntResult<Puzzle> {
        self.store.puzzle(id)?.ok_or_else(|| HuntError::not_found(id))
    }

    pub fn team(&self, id: TeamId) -> HuntResult<Team> {
        self.store.team(id)?.ok_or_else(|| HuntError::not_found(id))
    }

    pub fn event_of(&self, episode: &Episode) -> HuntResult<Event> {
        self.event(episode.event)
    }

    /// Competing teams of an event: no admins, nobody-home teams left out.
    pub fn competing_teams(&self, event: EventId) -> HuntResult<Vec<Team>> {
        let mut out = Vec::new();
        for team in self.store.teams(event)?.into_iter().filter(|t| !t.is_admin) {
            if !self.store.team_members(team.id)?.is_empty() {
                out.push(team);
            }
        }
        Ok(out.into_iter().sorted_by_key(|t| t.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeDelta;
    use std::sync::Mutex;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        guesses: Mutex<Vec<bool>>,
        memberships: Mutex<Vec<TeamId>>,
    }

    impl HuntEventHandler for Recorder {
        fn on_guess(&self, outcome: &GuessOutcome) {
            self.guesses.lock().unwrap().push(outcome.correct);
        }

        fn on_answer_changed(&self, _puzzle: PuzzleId, _answer: AnswerId, _invalidated: usize) {}

        fn on_membership_changed(&self, team: TeamId, _changed: &BTreeSet<UserId>) {
            self.memberships.lock().unwrap().push(team);
        }
    }

    struct Fixture {
        hunt: Hunt,
        clock: Arc<ManualClock>,
        recorder: Arc<Recorder>,
        puzzle: PuzzleId,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(at(0)));
        let recorder = Arc::new(Recorder::default());
        let hunt = Hunt::new(new_store(), clock.clone(), HuntConfig::default()).with_handler(recorder.clone());
        let event = hunt.add_event(Event::new(EventId(1), "hunt", at(-10), at(10_000))).unwrap();
        let episode = hunt.add_episode(Episode::new(EpisodeId(2), event.id, "one", at(-10))).unwrap();
        let puzzle = hunt
            .add_puzzle(Puzzle::new(PuzzleId(3), episode.id, "p").with_content(Runtime::Static, "Find the bird"))
            .unwrap();
        hunt.save_answer(puzzle.id, AnswerDraft::static_text("owl")).unwrap();
        hunt.add_team(Team::new(TeamId(4), event.id, "t")).unwrap();
        hunt.set_team_members(TeamId(4), BTreeSet::from([UserId(5)])).unwrap();
        Fixture { hunt, clock, recorder, puzzle: puzzle.id }
    }

    #[test]
    fn submit_guess_reports_correctness_and_notifies() {
        let f = fixture();
        let wrong = f.hunt.submit_guess(UserId(5), f.puzzle, "cat", None).unwrap();
        assert!(!wrong.correct);
        f.clock.advance(TimeDelta::seconds(10));
        let right = f.hunt.submit_guess(UserId(5), f.puzzle, "  owl ", None).unwrap();
        assert!(right.correct);
        assert_eq!(right.guess.guess, "owl");
        assert_eq!(right.guess.by_team, Some(TeamId(4)));
        assert_eq!(right.next_puzzle, None);
        assert_eq!(*f.recorder.guesses.lock().unwrap(), vec![false, true]);
        assert_eq!(*f.recorder.memberships.lock().unwrap(), vec![TeamId(4)]);
    }

    #[test]
    fn submit_guess_rejections() {
        let f = fixture();
        assert!(matches!(f.hunt.submit_guess(UserId(5), f.puzzle, "   ", None), Err(HuntError::EmptyGuess)));
        assert!(matches!(f.hunt.submit_guess(UserId(99), f.puzzle, "owl", None), Err(HuntError::NoTeam)));

        f.hunt.submit_guess(UserId(5), f.puzzle, "cat", None).unwrap();
        f.clock.advance(TimeDelta::seconds(2));
        match f.hunt.submit_guess(UserId(5), f.puzzle, "dog", None) {
            Err(HuntError::TooFast { retry_after }) => assert_eq!(retry_after, TimeDelta::seconds(3)),
            other => panic!("expected TooFast, got {other:?}"),
        }

        f.clock.set(at(20_000));
        assert!(matches!(f.hunt.submit_guess(UserId(5), f.puzzle, "owl", None), Err(HuntError::EventOver)));
    }

    #[test]
    fn edit_guess_reevaluates() {
        let f = fixture();
        let guess = f.hunt.submit_guess(UserId(5), f.puzzle, "cat", None).unwrap().guess;
        let edited = f.hunt.edit_guess(guess.id, Some("owl"), None).unwrap();
        assert!(edited.cache_current());
        assert!(edited.cached_correct_for().is_some());
        assert!(matches!(f.hunt.edit_guess(guess.id, Some(" "), None), Err(HuntError::EmptyGuess)));
        f.hunt.delete_guess(guess.id).unwrap();
        assert!(matches!(f.hunt.delete_guess(guess.id), Err(HuntError::NotFound(_))));
    }

    #[test]
    fn only_one_admin_team_per_event() {
        let f = fixture();
        f.hunt.add_team(Team::admin(TeamId(10), EventId(1))).unwrap();
        let err = f.hunt.add_team(Team::admin(TeamId(11), EventId(1))).unwrap_err();
        assert!(matches!(err, HuntError::DuplicateAdminTeam { event: EventId(1) }));
    }

    #[test]
    fn render_marks_start_time_once() {
        let f = fixture();
        assert_eq!(f.hunt.render_puzzle(UserId(5), f.puzzle).unwrap(), "Find the bird");
        f.clock.advance(TimeDelta::minutes(5));
        f.hunt.render_puzzle(UserId(5), f.puzzle).unwrap();
        let data = f.hunt.store().find_data(DataScope::TeamPuzzle(TeamId(4), f.puzzle)).unwrap().unwrap();
        assert_eq!(data.start_time, Some(at(0)));
    }

    #[test]
    fn solutions_wait_for_the_end_of_the_event() {
        let f = fixture();
        let mut puzzle = f.hunt.view().puzzle(f.puzzle).unwrap();
        puzzle = puzzle.with_solution(Runtime::Static, "It was an owl");
        f.hunt.update_puzzle(puzzle).unwrap();
        assert!(matches!(f.hunt.render_solution(UserId(5), f.puzzle), Err(HuntError::Locked)));
        f.hunt.add_team(Team::admin(TeamId(10), EventId(1))).unwrap();
        f.hunt.set_team_members(TeamId(10), BTreeSet::from([UserId(6)])).unwrap();
        assert_eq!(f.hunt.render_solution(UserId(6), f.puzzle).unwrap(), "It was an owl");
        f.clock.set(at(20_000));
        assert_eq!(f.hunt.render_solution(UserId(5), f.puzzle).unwrap(), "It was an owl");
    }

    #[test]
    fn iframe_token_resolves_to_attempt() {
        let f = fixture();
        let mut puzzle = f.hunt.view().puzzle(f.puzzle).unwrap();
        puzzle = puzzle.with_content(Runtime::IFrame, "https://example.com/");
        f.hunt.update_puzzle(puzzle).unwrap();
        let html = f.hunt.render_puzzle(UserId(5), f.puzzle).unwrap();
        let token = f.hunt.store().find_data(DataScope::UserPuzzle(UserId(5), f.puzzle)).unwrap().unwrap().token.unwrap();
        assert!(html.contains(&token.to_string()));
        assert_eq!(f.hunt.puzzle_info(token).unwrap(), Some((UserId(5), f.puzzle)));
        assert_eq!(f.hunt.puzzle_info(uuid::Uuid::new_v4()).unwrap(), None);
    }

    #[cfg(feature = "lua")]
    #[test]
    fn callback_persists_script_data() {
        let f = fixture();
        let mut puzzle = f.hunt.view().puzzle(f.puzzle).unwrap();
        puzzle = puzzle.with_callback(
            Runtime::Lua,
            "team_puzzle_data.calls = (team_puzzle_data.calls or 0) + 1 return tostring(team_puzzle_data.calls)",
        );
        f.hunt.update_puzzle(puzzle).unwrap();
        assert_eq!(f.hunt.callback(UserId(5), f.puzzle).unwrap(), "1");
        assert_eq!(f.hunt.callback(UserId(5), f.puzzle).unwrap(), "2");
        let data = f.hunt.store().find_data(DataScope::TeamPuzzle(TeamId(4), f.puzzle)).unwrap().unwrap();
        assert_eq!(data.data, serde_json::json!({"calls": 2}));
    }

    #[test]
    fn malformed_puzzle_scripts_block_saving() {
        let f = fixture();
        let puzzle = Puzzle::new(PuzzleId(30), EpisodeId(2), "bad").with_callback(Runtime::Regex, "[Rr");
        assert!(matches!(f.hunt.add_puzzle(puzzle), Err(HuntError::Runtime(crate::runtime::RuntimeError::Syntax(_)))));
    }
}
