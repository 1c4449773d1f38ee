//! Per-order payment metadata.
//!
//! [`PaymentMetadata`] is an insertion-ordered map whose keys compare
//! case-insensitively. The subset of keys listed in the merchant's required
//! derivation keys feeds the canonical metadata string from which deposit
//! addresses are derived.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::proto::ArgumentError;

/// Ordered, case-insensitive string metadata supplied with each payment.
///
/// Inserting a key that differs from an existing one only by case replaces
/// the existing value but keeps the original key spelling and position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentMetadata(Vec<(String, String)>);

impl PaymentMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds metadata from key/value pairs.
    ///
    /// Fails with [`ArgumentError::BlankMetadataKey`] on the first blank key.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ArgumentError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut metadata = Self::new();
        for (key, value) in pairs {
            metadata.insert(key, value)?;
        }
        Ok(metadata)
    }

    /// Inserts a value, returning the previous value for the same key.
    pub fn insert<K, V>(&mut self, key: K, value: V) -> Result<Option<String>, ArgumentError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(ArgumentError::BlankMetadataKey);
        }
        let value = value.into();
        match self.position(&key) {
            Some(index) => Ok(Some(std::mem::replace(&mut self.0[index].1, value))),
            None => {
                self.0.push((key, value));
                Ok(None)
            }
        }
    }

    /// Builder-style [`PaymentMetadata::insert`].
    pub fn with<K, V>(mut self, key: K, value: V) -> Result<Self, ArgumentError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.insert(key, value)?;
        Ok(self)
    }

    /// Looks a value up by key, ignoring case.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key).map(|index| self.0[index].1.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Checks that every required key is present with a non-blank value.
    pub fn ensure_required(&self, required_keys: &[String]) -> Result<(), ArgumentError> {
        for key in required_keys {
            match self.get(key) {
                Some(value) if !value.trim().is_empty() => {}
                _ => return Err(ArgumentError::MissingMetadata(key.trim().to_string())),
            }
        }
        Ok(())
    }

    /// Serializes the required keys into the canonical derivation string.
    ///
    /// Each entry is `trim(key) + "=" + trim(value)`; entries follow the order
    /// of `required_keys` and are joined with `\n`. The metadata's own order
    /// never affects the result.
    pub fn canonical_string(&self, required_keys: &[String]) -> Result<String, ArgumentError> {
        self.ensure_required(required_keys)?;
        let entries: Vec<String> = required_keys
            .iter()
            .map(|key| {
                let value = self.get(key).unwrap_or_default();
                format!("{}={}", key.trim(), value.trim())
            })
            .collect();
        Ok(entries.join("\n"))
    }

    /// Keys match after trimming, ignoring case.
    fn position(&self, key: &str) -> Option<usize> {
        let needle = key.trim().to_lowercase();
        self.0
            .iter()
            .position(|(k, _)| k.trim().to_lowercase() == needle)
    }
}

impl Serialize for PaymentMetadata {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for PaymentMetadata {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{MapAccess, Visitor};
        use std::fmt;

        struct MetadataVisitor;

        impl<'de> Visitor<'de> for MetadataVisitor {
            type Value = PaymentMetadata;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of metadata keys to string values")
            }

            fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut metadata = PaymentMetadata::new();
                while let Some((key, value)) = access.next_entry::<String, String>()? {
                    metadata
                        .insert(key, value)
                        .map_err(serde::de::Error::custom)?;
                }
                Ok(metadata)
            }
        }

        deserializer.deserialize_map(MetadataVisitor)
    }
}
