use std::thread;

use hunt::config::{GuessPolicy, HuntConfig};
use hunt::ids::*;
use hunt::model::*;
use hunt::runtime::Runtime;
use integration_tests::support::*;
use serde_json::json;

fn without_cooldown() -> HuntConfig {
    HuntConfig { guesses: GuessPolicy { cooldown_secs: 0 }, ..HuntConfig::default() }
}

#[test]
fn guesses_racing_answer_edits_never_cache_an_old_answer() {
    let s = Scenario::with_config(without_cooldown());
    let episode = s.add_episode(s.draft_episode("Opening", -30));
    let puzzle = s.add_puzzles(&episode, 1).remove(0);
    let owls = s.add_team("Owls", &[1, 2]);
    let larks = s.add_team("Larks", &[3, 4]);
    let toggled = s.hunt.save_answer(puzzle.id, AnswerDraft::static_text("alpha")).unwrap();

    thread::scope(|scope| {
        let (s, puzzle) = (&s, &puzzle);
        for user in 1..=4u64 {
            scope.spawn(move || {
                for round in 0..25u64 {
                    let text = if (round + user) % 2 == 0 { "alpha" } else { "beta" };
                    s.hunt.submit_guess(UserId(user), puzzle.id, text, None).unwrap();
                }
            });
        }
        scope.spawn(move || {
            for round in 0..50 {
                let text = if round % 2 == 0 { "beta" } else { "alpha" };
                s.hunt.update_answer(toggled.id, AnswerDraft::static_text(text)).unwrap();
            }
        });
    });

    let current = s.hunt.store().answer(toggled.id).unwrap().unwrap().answer;
    let guesses = s.hunt.store().guesses(puzzle.id).unwrap();
    assert_eq!(guesses.len(), 100);
    for guess in &guesses {
        if guess.cache_current() {
            let expected = (guess.guess == current).then_some(toggled.id);
            assert_eq!(guess.cached_correct_for(), expected, "{} cached against an old answer", guess.id);
        }
    }

    let view = s.hunt.view();
    for guess in &guesses {
        assert_eq!(view.is_correct(guess).unwrap(), guess.guess == current);
    }
    assert!(view.answered_by(puzzle.id, owls).unwrap());
    assert!(view.answered_by(puzzle.id, larks).unwrap());
    assert_eq!(handler_state_snapshot(&s.handler).guesses.len(), 100);
}

#[test]
fn answer_deletion_racing_reads_falls_back_cleanly() {
    let s = Scenario::with_config(without_cooldown());
    let episode = s.add_episode(s.draft_episode("Opening", -30));
    let puzzle = s.add_puzzles(&episode, 1).remove(0);
    let owls = s.add_team("Owls", &[1]);
    let exact = s.hunt.save_answer(puzzle.id, AnswerDraft::static_text("Heron")).unwrap();
    let loose = s.hunt.save_answer(puzzle.id, AnswerDraft::new(Runtime::Regex, "(?i)heron")).unwrap();
    for _ in 0..20 {
        s.hunt.submit_guess(UserId(1), puzzle.id, "Heron", None).unwrap();
    }

    thread::scope(|scope| {
        let s = &s;
        for _ in 0..3 {
            scope.spawn(move || {
                for _ in 0..20 {
                    assert!(s.hunt.view().answered_by(puzzle.id, owls).unwrap());
                }
            });
        }
        scope.spawn(move || {
            s.hunt.delete_answer(exact.id).unwrap();
        });
    });

    for guess in s.hunt.store().guesses(puzzle.id).unwrap() {
        if guess.cache_current() {
            assert_eq!(guess.cached_correct_for(), Some(loose.id));
        }
        assert_eq!(s.hunt.view().correct_for(&guess).unwrap().map(|a| a.id), Some(loose.id));
    }
}

const SLOW_COUNTER: &str = r#"
    local spin = 0
    for i = 1, 50000 do spin = spin + i end
    team_puzzle_data.calls = (team_puzzle_data.calls or 0) + 1
    return "ok"
"#;

fn counter_puzzle(s: &Scenario) -> Puzzle {
    let episode = s.add_episode(s.draft_episode("Opening", -30));
    let puzzle = Puzzle::new(PuzzleId(s.id()), episode.id, "Counter")
        .with_content(Runtime::Static, "<p>Count with us.</p>")
        .with_callback(Runtime::Lua, SLOW_COUNTER);
    s.hunt.add_puzzle(puzzle).unwrap()
}

#[test]
fn first_view_during_a_callback_keeps_its_start_time() {
    let s = Scenario::new();
    let puzzle = counter_puzzle(&s);
    let owls = s.add_team("Owls", &[1, 2]);

    thread::scope(|scope| {
        let (s, puzzle) = (&s, &puzzle);
        scope.spawn(move || s.hunt.callback(UserId(1), puzzle.id).unwrap());
        scope.spawn(move || s.hunt.render_puzzle(UserId(2), puzzle.id).unwrap());
    });

    let blob = s.hunt.store().find_data(DataScope::TeamPuzzle(owls, puzzle.id)).unwrap().unwrap();
    assert_eq!(blob.start_time, Some(at_minute(0)));
    assert_eq!(blob.data, json!({"calls": 1}));
}

#[test]
fn concurrent_callbacks_do_not_lose_writes() {
    let s = Scenario::new();
    let puzzle = counter_puzzle(&s);
    let owls = s.add_team("Owls", &[1, 2]);

    thread::scope(|scope| {
        let (s, puzzle) = (&s, &puzzle);
        for user in [1, 2] {
            scope.spawn(move || {
                for _ in 0..10 {
                    assert_eq!(s.hunt.callback(UserId(user), puzzle.id).unwrap(), "ok");
                }
            });
        }
    });

    let blob = s.hunt.store().find_data(DataScope::TeamPuzzle(owls, puzzle.id)).unwrap().unwrap();
    assert_eq!(blob.data, json!({"calls": 20}));
}
