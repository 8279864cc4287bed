//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings so store records stay
//! readable with `jq`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Opaque random token identifying one staging session to its owner.
    StageId
);

string_newtype!(
    /// Identity of the caller that owns a store record (user, session, service account).
    OwnerId
);

string_newtype!(
    /// Identifies the concrete stage variant; half of the ownership lock.
    TypeTag
);

/// Number of random bytes behind a [`StageId`].
const STAGE_ID_BYTES: usize = 32;

impl StageId {
    /// Generate a fresh URL-safe random id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; STAGE_ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// First 12 characters, for log lines and terminal output.
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(12).map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl AsRef<std::path::Path> for StageId {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

/// Describes a concrete stage variant.
///
/// `implementation` is a locatable reference (module path and source file) to
/// the code driving the stage; it ends up in the failure marker so an
/// operator can find out which tool left the target directory half-written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageType {
    pub tag: TypeTag,
    pub implementation: String,
    pub failure_message: String,
}

pub const DEFAULT_FAILURE_MESSAGE: &str = "Staged changes failed to apply to the target directory.";

impl StageType {
    pub fn new(tag: &str, implementation: &str) -> Self {
        Self {
            tag: TypeTag::new(tag),
            implementation: implementation.to_owned(),
            failure_message: DEFAULT_FAILURE_MESSAGE.to_owned(),
        }
    }

    #[must_use]
    pub fn with_failure_message(mut self, message: &str) -> Self {
        message.clone_into(&mut self.failure_message);
        self
    }
}

/// Build a [`StageType`] whose implementation reference points at the call site.
///
/// ```
/// let updater = sluice_schema::stage_type!("updater");
/// assert_eq!(updater.tag, "updater");
/// assert!(!updater.implementation.is_empty());
/// ```
#[macro_export]
macro_rules! stage_type {
    ($tag:expr) => {
        $crate::StageType::new($tag, concat!(module_path!(), " (", file!(), ")"))
    };
}
