use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::ops::Deref;

/// Serializable wrapper around [`SecretString`].
///
/// Provider inputs are persisted as state by the caller, so passwords must
/// round-trip through serde. The value is only exposed while serializing and
/// while comparing; `Debug` output stays redacted.
#[derive(Clone, Debug)]
pub struct SerializableSecretString(SecretString);

impl SerializableSecretString {
    /// Returns whether two secrets hold the same value.
    ///
    /// Walks the full length of both values so the comparison time depends
    /// only on the lengths.
    pub fn same_value(&self, other: &SerializableSecretString) -> bool {
        let a = self.0.expose_secret().as_bytes();
        let b = other.0.expose_secret().as_bytes();
        if a.len() != b.len() {
            return false;
        }

        a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

impl Deref for SerializableSecretString {
    type Target = SecretString;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialEq for SerializableSecretString {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl Eq for SerializableSecretString {}

impl From<String> for SerializableSecretString {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

impl From<&str> for SerializableSecretString {
    fn from(value: &str) -> Self {
        Self(value.to_owned().into())
    }
}

impl From<SerializableSecretString> for SecretString {
    fn from(value: SerializableSecretString) -> Self {
        value.0
    }
}

impl Serialize for SerializableSecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.0.expose_secret())
    }
}

impl<'de> Deserialize<'de> for SerializableSecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(deserializer)?;
        Ok(Self(string.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_is_redacted() {
        let secret = SerializableSecretString::from("hunter2");
        assert!(!format!("{secret:?}").contains("hunter2"));
    }

    #[test]
    fn compares_by_value() {
        let a = SerializableSecretString::from("hunter2");
        let b = SerializableSecretString::from("hunter2".to_owned());
        let c = SerializableSecretString::from("hunter3");
        let d = SerializableSecretString::from("hunter22");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn serializes_as_plain_string() {
        let secret = SerializableSecretString::from("pw");
        let json = serde_json::to_string(&secret).unwrap();
        assert_eq!(json, "\"pw\"");

        let back: SerializableSecretString = serde_json::from_str(&json).unwrap();
        assert_eq!(back.expose_secret(), "pw");
    }
}
