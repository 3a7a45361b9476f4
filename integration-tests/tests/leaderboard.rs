use chrono::TimeDelta;
use hunt::ids::*;
use hunt::model::{AnswerDraft, Team};
use integration_tests::support::*;
use itertools::Itertools;

fn order(finishes: &[hunt::leaderboard::Finish]) -> Vec<TeamId> {
    finishes.iter().map(|f| f.team).collect_vec()
}

#[test]
fn linear_episode_ranks_by_last_puzzle() {
    let s = Scenario::new();
    let episode = s.add_episode(s.draft_episode("Opening", -30));
    let puzzles = s.add_puzzles(&episode, 2);
    let owls = s.add_team("Owls", &[1]);
    let larks = s.add_team("Larks", &[2]);
    let admins = TeamId(s.id());
    s.hunt.add_team(Team::admin(admins, s.event)).unwrap();
    s.hunt.set_team_members(admins, [UserId(9)].into()).unwrap();

    s.solve(9, &puzzles[0]);
    s.solve(9, &puzzles[1]);
    s.solve(1, &puzzles[0]);
    s.solve(2, &puzzles[0]);
    let larks_done = s.solve(2, &puzzles[1]).guess;
    let owls_done = s.solve(1, &puzzles[1]).guess;

    let view = s.hunt.view();
    let positions = view.finished_positions(&episode).unwrap();
    assert_eq!(order(&positions), vec![larks, owls]);
    assert_eq!(positions[0].finished_at, larks_done.given);
    assert_eq!(view.finished_time(&episode, admins).unwrap(), None);

    // Back-dating the owls' final guess puts them in front.
    s.hunt.edit_guess(owls_done.id, None, Some(larks_done.given - TimeDelta::seconds(30))).unwrap();
    assert_eq!(order(&s.hunt.view().finished_positions(&episode).unwrap()), vec![owls, larks]);
}

#[test]
fn a_revoked_earlier_answer_unfinishes_the_episode() {
    let s = Scenario::new();
    let episode = s.add_episode(s.draft_episode("Opening", -30).winning());
    let puzzles = s.add_puzzles(&episode, 2);
    let owls = s.add_team("Owls", &[1]);
    s.solve(1, &puzzles[0]);
    s.solve(1, &puzzles[1]);
    assert_eq!(order(&s.hunt.view().event_finishing_positions(s.event).unwrap()), vec![owls]);

    let first_answer = s.hunt.store().answers(puzzles[0].id).unwrap().remove(0);
    s.hunt.update_answer(first_answer.id, AnswerDraft::static_text("something else")).unwrap();

    let view = s.hunt.view();
    assert!(!view.episode_finished(&episode, owls).unwrap());
    assert_eq!(view.finished_time(&episode, owls).unwrap(), None);
    assert!(view.finished_positions(&episode).unwrap().is_empty());
    assert!(view.event_finishing_positions(s.event).unwrap().is_empty());
}

#[test]
fn parallel_episode_finishes_at_the_latest_first_solve() {
    let s = Scenario::new();
    let episode = s.add_episode(s.draft_episode("Side quests", -30).parallel());
    let puzzles = s.add_puzzles(&episode, 2);
    let owls = s.add_team("Owls", &[1]);
    let larks = s.add_team("Larks", &[2]);

    let late = {
        s.solve(1, &puzzles[1]);
        s.solve(1, &puzzles[0]).guess
    };
    s.solve(2, &puzzles[0]);

    let times = s.hunt.view().finishing_times(&episode).unwrap();
    assert_eq!(times.get(&owls), Some(&late.given));
    assert!(!times.contains_key(&larks));
}

#[test]
fn event_order_needs_every_winning_episode() {
    let s = Scenario::new();
    let first = s.add_episode(s.draft_episode("First", -30).winning());
    let finale = s.add_episode(s.draft_episode("Finale", -20).winning());
    let bonus = s.add_episode(s.draft_episode("Bonus", -10));
    let first_puzzles = s.add_puzzles(&first, 1);
    let finale_puzzles = s.add_puzzles(&finale, 1);
    let bonus_puzzles = s.add_puzzles(&bonus, 1);
    let owls = s.add_team("Owls", &[1]);
    let larks = s.add_team("Larks", &[2]);
    let wrens = s.add_team("Wrens", &[3]);

    s.solve(2, &first_puzzles[0]);
    s.solve(1, &finale_puzzles[0]);
    s.solve(1, &bonus_puzzles[0]);
    s.solve(3, &first_puzzles[0]);
    let owls_done = s.solve(1, &first_puzzles[0]).guess;
    let larks_done = s.solve(2, &finale_puzzles[0]).guess;

    let positions = s.hunt.view().event_finishing_positions(s.event).unwrap();
    assert_eq!(order(&positions), vec![owls, larks]);
    assert_eq!(positions[0].finished_at, owls_done.given);
    assert_eq!(positions[1].finished_at, larks_done.given);
    assert!(!order(&positions).contains(&wrens));
}

#[test]
fn stats_follow_opening_and_solving() {
    let s = Scenario::new();
    let episode = s.add_episode(s.draft_episode("Opening", -30).parallel());
    let puzzles = s.add_puzzles(&episode, 2);
    let owls = s.add_team("Owls", &[1]);
    let larks = s.add_team("Larks", &[2]);

    s.hunt.render_puzzle(UserId(1), puzzles[0].id).unwrap();
    s.hunt.render_puzzle(UserId(2), puzzles[0].id).unwrap();
    s.advance(9);
    s.solve(1, &puzzles[0]);
    s.advance(10);

    let stats = s.hunt.view().episode_stats(s.event, None).unwrap();
    let first = &stats.puzzles[0];
    assert_eq!(first.completions, 1);
    assert_eq!(first.average_solve, Some(TimeDelta::minutes(10)));
    assert_eq!(first.average_stuck, Some(TimeDelta::minutes(20)));
    assert_eq!(stats.puzzles[1].completions, 0);
    assert_eq!(stats.puzzles[1].average_stuck, None);

    let owls_progress = stats.teams.iter().find(|t| t.team == owls).unwrap();
    assert!(owls_progress.solved.contains_key(&puzzles[0].id));
    let larks_progress = stats.teams.iter().find(|t| t.team == larks).unwrap();
    assert_eq!(larks_progress.stuck.get(&puzzles[0].id), Some(&TimeDelta::minutes(20)));

    let nothing: &[EpisodeId] = &[];
    let filtered = s.hunt.view().episode_stats(s.event, Some(nothing)).unwrap();
    assert!(filtered.puzzles.is_empty());
}
