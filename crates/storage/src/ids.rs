use std::fmt;

use uuid::Uuid;

macro_rules! define_storage_id {
    ($name:ident) => {
        /// Time-ordered identifier minted in-process; never parsed back from text.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a UUIDv7 id, ordered by creation time at millisecond resolution.
            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0.hyphenated())
            }
        }
    };
}

define_storage_id!(SessionId);
define_storage_id!(TurnId);
