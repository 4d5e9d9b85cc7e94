use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(ReviewerId);
id_newtype!(TalkId);
id_newtype!(TagId);
id_newtype!(VoteId);
id_newtype!(CommentId);

pub const MIN_SCORE: i64 = 1;
pub const MAX_SCORE: i64 = 5;
pub const MAX_COMMENT_CHARS: usize = 140;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a closed enum together with its wire encoding. Every variant
/// has exactly one string form; decoding anything else is an error.
macro_rules! wire_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $wire:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_wire(self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($wire => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_wire())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_wire())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

/// Review outcome of a talk. A talk with no status has not been decided yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TalkStatus {
    Accepted,
    Rejected,
    Waitlisted,
}

wire_enum!(TalkStatus, "talk status", {
    Accepted => "ACCEPTE",
    Rejected => "REJETE",
    Waitlisted => "ATTENTE",
});

/// Global voting phase. Only moves when an administrator says so.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VotePhase {
    #[default]
    NotBegin,
    Open,
    Closed,
}

wire_enum!(VotePhase, "vote phase", {
    NotBegin => "NOT_BEGIN",
    Open => "OPEN",
    Closed => "CLOSED",
});

/// The reviewer on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub reviewer_id: ReviewerId,
    pub email: String,
    pub full_name: String,
    pub admin: bool,
}
