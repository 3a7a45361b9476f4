//! Puzzle hunt progression and answer evaluation.
//!
//! Teams guess at puzzles grouped in episodes. Guesses are checked by pluggable
//! runtimes (exact text, regex, sandboxed Lua), cached per guess, and feed the
//! unlock rules, headstarts and finishing order. See [`engine::Hunt`].

pub mod clock;
pub mod clues;
pub mod config;
pub mod correctness;
pub mod engine;
pub mod error;
pub mod headstart;
pub mod ids;
pub mod leaderboard;
pub mod model;
pub mod progress;
pub mod runtime;
pub mod stats;
pub mod store;

pub use engine::{GuessOutcome, Hunt, HuntEventHandler, HuntView, UnlockNotice};
pub use error::{HuntError, HuntResult};
