use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use hunt::clock::ManualClock;
use hunt::config::HuntConfig;
use hunt::ids::*;
use hunt::model::*;
use hunt::runtime::Runtime;
use hunt::store::new_store;
use hunt::{GuessOutcome, Hunt, HuntEventHandler};

/// Fixed origin for scenario clocks.
pub const T0: i64 = 1_700_000_000;

pub fn at_minute(minute: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(T0 + minute * 60, 0).expect("valid timestamp")
}

#[derive(Clone, Debug, Default)]
pub struct HandlerState {
    pub guesses: Vec<GuessEvent>,
    pub answer_changes: Vec<AnswerEvent>,
    pub membership_changes: Vec<(TeamId, BTreeSet<UserId>)>,
}

#[derive(Clone, Debug)]
pub struct GuessEvent {
    pub guess: GuessId,
    pub team: Option<TeamId>,
    pub correct: bool,
}

#[derive(Clone, Debug)]
pub struct AnswerEvent {
    pub puzzle: PuzzleId,
    pub answer: AnswerId,
    pub invalidated: usize,
}

#[derive(Clone, Default)]
pub struct RecordingHandler {
    state: Arc<Mutex<HandlerState>>,
}

impl RecordingHandler {
    pub fn new() -> (Self, Arc<Mutex<HandlerState>>) {
        let state = Arc::new(Mutex::new(HandlerState::default()));
        (Self { state: Arc::clone(&state) }, state)
    }
}

impl HuntEventHandler for RecordingHandler {
    fn on_guess(&self, outcome: &GuessOutcome) {
        let mut guard = self.state.lock().expect("handler state poisoned");
        guard.guesses.push(GuessEvent { guess: outcome.guess.id, team: outcome.guess.by_team, correct: outcome.correct });
    }

    fn on_answer_changed(&self, puzzle: PuzzleId, answer: AnswerId, invalidated: usize) {
        let mut guard = self.state.lock().expect("handler state poisoned");
        guard.answer_changes.push(AnswerEvent { puzzle, answer, invalidated });
    }

    fn on_membership_changed(&self, team: TeamId, changed: &BTreeSet<UserId>) {
        let mut guard = self.state.lock().expect("handler state poisoned");
        guard.membership_changes.push((team, changed.clone()));
    }
}

pub fn handler_state_snapshot(state: &Arc<Mutex<HandlerState>>) -> HandlerState {
    state.lock().expect("handler state poisoned").clone()
}

/// A hunt with one event running from an hour before `T0` to thirty days after,
/// a manual clock at `T0` and a recording handler.
pub struct Scenario {
    pub hunt: Hunt,
    pub clock: Arc<ManualClock>,
    pub event: EventId,
    pub handler: Arc<Mutex<HandlerState>>,
}

impl Scenario {
    pub fn new() -> Self {
        Self::with_config(HuntConfig::default())
    }

    pub fn with_config(config: HuntConfig) -> Self {
        let clock = Arc::new(ManualClock::new(at_minute(0)));
        let (handler, state) = RecordingHandler::new();
        let hunt = Hunt::new(new_store(), clock.clone(), config).with_handler(Arc::new(handler));
        let event = EventId(hunt.store().allocate_id().expect("allocate id"));
        hunt.add_event(Event::new(event, "Scenario Hunt", at_minute(-60), at_minute(30 * 24 * 60))).expect("add event");
        Self { hunt, clock, event, handler: state }
    }

    pub fn id(&self) -> u64 {
        self.hunt.store().allocate_id().expect("allocate id")
    }

    /// An episode starting `start_minute` minutes after `T0`, not yet stored.
    pub fn draft_episode(&self, name: &str, start_minute: i64) -> Episode {
        Episode::new(EpisodeId(self.id()), self.event, name, at_minute(start_minute))
    }

    pub fn add_episode(&self, episode: Episode) -> Episode {
        self.hunt.add_episode(episode).expect("add episode")
    }

    /// Adds `count` puzzles, each with the single static answer from [`answer_for`].
    pub fn add_puzzles(&self, episode: &Episode, count: usize) -> Vec<Puzzle> {
        (0..count).map(|n| self.add_puzzle(episode, &format!("{} #{}", episode.name, n + 1), TimeDelta::zero())).collect()
    }

    pub fn add_puzzle(&self, episode: &Episode, title: &str, headstart: TimeDelta) -> Puzzle {
        let id = PuzzleId(self.id());
        let puzzle = Puzzle::new(id, episode.id, title)
            .with_content(Runtime::Static, format!("<p>{title}</p>"))
            .granting(headstart);
        let puzzle = self.hunt.add_puzzle(puzzle).expect("add puzzle");
        self.hunt.save_answer(puzzle.id, AnswerDraft::static_text(answer_for(&puzzle))).expect("save answer");
        puzzle
    }

    pub fn add_team(&self, name: &str, members: &[u64]) -> TeamId {
        let id = TeamId(self.id());
        self.hunt.add_team(Team::new(id, self.event, name)).expect("add team");
        self.hunt
            .set_team_members(id, members.iter().copied().map(UserId).collect())
            .expect("set team members");
        id
    }

    pub fn advance(&self, minutes: i64) {
        self.clock.advance(TimeDelta::minutes(minutes));
    }

    /// Moves the clock one minute on, then submits the right answer.
    pub fn solve(&self, user: u64, puzzle: &Puzzle) -> GuessOutcome {
        self.advance(1);
        let outcome = self.hunt.submit_guess(UserId(user), puzzle.id, &answer_for(puzzle), None).expect("submit guess");
        assert!(outcome.correct, "{} should be correct", outcome.guess.guess);
        outcome
    }

    /// Moves the clock one minute on, then submits a wrong answer.
    pub fn miss(&self, user: u64, puzzle: &Puzzle) -> GuessOutcome {
        self.advance(1);
        let outcome = self.hunt.submit_guess(UserId(user), puzzle.id, "definitely wrong", None).expect("submit guess");
        assert!(!outcome.correct);
        outcome
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}

pub fn answer_for(puzzle: &Puzzle) -> String {
    format!("answer-{}", puzzle.id.0)
}
