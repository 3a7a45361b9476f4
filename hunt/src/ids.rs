use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(EventId, "event");
id_type!(EpisodeId, "episode");
id_type!(PuzzleId, "puzzle");
id_type!(
    /// Answers are ordered by id; ids are allocated monotonically so this is creation order.
    AnswerId,
    "answer"
);
id_type!(GuessId, "guess");
id_type!(TeamId, "team");
id_type!(UserId, "user");
id_type!(HintId, "hint");
id_type!(UnlockId, "unlock");
id_type!(UnlockAnswerId, "unlock-answer");
