use serde::{Deserialize, Serialize};

mod volume;
pub use volume::*;

/// The various resource kinds handled by the control plane, mostly used to
/// qualify log messages and errors.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum ResourceKind {
    /// Unknown or unspecified resource.
    Unknown,
    /// Volume.
    Volume,
    /// Volume attachment.
    Attachment,
    /// Volume snapshot.
    Snapshot,
    /// Volume type.
    VolumeType,
    /// Quota reservation.
    Quota,
}

/// Implements the common conversions and accessors of a string backed
/// identifier newtype.
#[macro_export]
macro_rules! impl_string_id_inner {
    ($Name:ident, $Doc:literal) => {
        #[doc = $Doc]
        #[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq, Hash)]
        pub struct $Name(String);

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl $Name {
            /// Borrow the identifier as a plain string.
            pub fn as_str<'a>(&'a self) -> &'a str {
                self.0.as_str()
            }
        }

        impl From<&str> for $Name {
            fn from(id: &str) -> Self {
                $Name::from(id)
            }
        }
        impl From<String> for $Name {
            fn from(id: String) -> Self {
                $Name::from(id.as_str())
            }
        }
        impl From<&$Name> for $Name {
            fn from(id: &$Name) -> $Name {
                id.clone()
            }
        }
        impl From<$Name> for String {
            fn from(id: $Name) -> String {
                id.to_string()
            }
        }
        impl From<&$Name> for String {
            fn from(id: &$Name) -> String {
                id.to_string()
            }
        }
    };
}

/// Defines a string backed identifier newtype.
#[macro_export]
macro_rules! impl_string_id {
    ($Name:ident, $Doc:literal) => {
        $crate::impl_string_id_inner!($Name, $Doc);
        impl Default for $Name {
            /// Generates new blank identifier.
            fn default() -> Self {
                $Name("".to_string())
            }
        }
        impl $Name {
            /// Build Self from a string trait id.
            pub fn from<T: Into<String>>(id: T) -> Self {
                $Name(id.into())
            }
            /// Generates new random identifier.
            pub fn new() -> Self {
                $Name(uuid::Uuid::new_v4().to_string())
            }
        }
    };
}

/// Defines a uuid backed identifier newtype which displays as its canonical
/// string form.
#[macro_export]
macro_rules! impl_string_uuid {
    ($Name:ident, $Doc:literal) => {
        #[doc = $Doc]
        #[derive(Debug, Clone, Eq, PartialEq, Hash)]
        pub struct $Name(uuid::Uuid, String);

        impl Serialize for $Name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $Name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let uuid = uuid::Uuid::deserialize(deserializer)?;
                Ok($Name(uuid, uuid.to_string()))
            }
        }

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl $Name {
            /// Borrow the identifier as a plain string.
            pub fn as_str<'a>(&'a self) -> &'a str {
                self.1.as_str()
            }
            /// Get a reference to the `uuid::Uuid` container.
            pub fn uuid(&self) -> &uuid::Uuid {
                &self.0
            }
            /// Generates new random identifier.
            pub fn new() -> Self {
                let uuid = uuid::Uuid::new_v4();
                $Name(uuid, uuid.to_string())
            }
        }

        impl Default for $Name {
            /// Generates new blank identifier.
            fn default() -> Self {
                let uuid = uuid::Uuid::default();
                $Name(uuid, uuid.to_string())
            }
        }

        impl From<&$Name> for $Name {
            fn from(id: &$Name) -> $Name {
                id.clone()
            }
        }
        impl From<$Name> for String {
            fn from(id: $Name) -> String {
                id.to_string()
            }
        }
        impl From<&$Name> for String {
            fn from(id: &$Name) -> String {
                id.to_string()
            }
        }
        impl From<&uuid::Uuid> for $Name {
            fn from(uuid: &uuid::Uuid) -> $Name {
                $Name(*uuid, uuid.to_string())
            }
        }
        impl From<uuid::Uuid> for $Name {
            fn from(uuid: uuid::Uuid) -> $Name {
                $Name::from(&uuid)
            }
        }
        impl std::convert::TryFrom<&str> for $Name {
            type Error = uuid::Error;
            fn try_from(value: &str) -> Result<Self, Self::Error> {
                let uuid: uuid::Uuid = std::str::FromStr::from_str(value)?;
                Ok($Name::from(uuid))
            }
        }
        impl std::convert::TryFrom<String> for $Name {
            type Error = uuid::Error;
            fn try_from(value: String) -> Result<Self, Self::Error> {
                let uuid: uuid::Uuid = std::str::FromStr::from_str(&value)?;
                Ok($Name::from(uuid))
            }
        }
    };
}
