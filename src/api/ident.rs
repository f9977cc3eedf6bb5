//! Typed identifiers for lands, players, clients and sessions.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::IdParseError;

/// Generates a string-backed newtype identifier.
macro_rules! string_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Draw a fresh random identifier.
            pub fn random() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id! {
    /// Stable identity of a player within a land. Survives reconnects.
    PlayerId
}

string_id! {
    /// Identity of one live connection. A reconnect gets a new one.
    ClientId
}

string_id! {
    /// Transport session identity, assigned at connection time.
    SessionId
}

string_id! {
    /// Device fingerprint carried by the join request, if any.
    DeviceId
}

/// Identity of a land instance: a land type plus an instance id.
///
/// Canonical string form is `"type:instance"`. Parsing a bare `"type"` draws
/// a random instance id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LandId {
    land_type: String,
    instance: String,
}

impl LandId {
    pub fn new(land_type: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            land_type: land_type.into(),
            instance: instance.into(),
        }
    }

    /// A fresh instance of the given type with a random instance id.
    pub fn generate(land_type: impl Into<String>) -> Self {
        Self {
            land_type: land_type.into(),
            instance: Uuid::new_v4().to_string(),
        }
    }

    /// Parse `"type"` or `"type:instance"`. The bare form draws a random
    /// instance id.
    pub fn parse(value: &str) -> Result<Self, IdParseError> {
        match value.split_once(':') {
            Some((land_type, instance)) => {
                if land_type.is_empty() || instance.is_empty() {
                    return Err(IdParseError::Malformed(value.to_string()));
                }
                Ok(Self::new(land_type, instance))
            }
            None => {
                if value.is_empty() {
                    return Err(IdParseError::Malformed(value.to_string()));
                }
                Ok(Self::generate(value))
            }
        }
    }

    pub fn land_type(&self) -> &str {
        &self.land_type
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Canonical `"type:instance"` form.
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.land_type, self.instance)
    }
}

impl fmt::Display for LandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.land_type, self.instance)
    }
}

impl Serialize for LandId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for LandId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        match raw.split_once(':') {
            Some((land_type, instance)) if !land_type.is_empty() && !instance.is_empty() => {
                Ok(Self::new(land_type, instance))
            }
            _ => Err(serde::de::Error::custom("expected `type:instance`")),
        }
    }
}
