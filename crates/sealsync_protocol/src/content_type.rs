//! Content type discriminator.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Discriminator carried in clear text next to every record.
///
/// Unknown discriminators are kept as [`ContentType::Other`] so that records
/// written by newer clients survive a round trip through this one. They can
/// be stored and re-pushed but never decoded into a [`crate::DomainRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContentType {
    /// Plain text note.
    Note,
    /// Tag grouping other records through references.
    Tag,
    /// Editor or extension component.
    Component,
    /// Wrapping key, encrypted directly by the root key.
    ItemsKey,
    /// Any discriminator this client does not model.
    Other(String),
}

impl ContentType {
    /// Returns the wire name.
    pub fn as_str(&self) -> &str {
        match self {
            ContentType::Note => "Note",
            ContentType::Tag => "Tag",
            ContentType::Component => "SN|Component",
            ContentType::ItemsKey => "SN|ItemsKey",
            ContentType::Other(name) => name,
        }
    }

    /// Parses a wire name. Never fails; unknown names become `Other`.
    pub fn parse(name: &str) -> Self {
        match name {
            "Note" => ContentType::Note,
            "Tag" => ContentType::Tag,
            "SN|Component" => ContentType::Component,
            "SN|ItemsKey" => ContentType::ItemsKey,
            other => ContentType::Other(other.to_string()),
        }
    }

    /// Returns true for the one class of records wrapped by the root key
    /// instead of by a wrapping key.
    pub fn is_root_key_encrypted(&self) -> bool {
        matches!(self, ContentType::ItemsKey)
    }

    /// Returns true if this client has a typed payload for the type.
    pub fn is_known(&self) -> bool {
        !matches!(self, ContentType::Other(_))
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ContentType {
    fn from(name: &str) -> Self {
        ContentType::parse(name)
    }
}

impl Serialize for ContentType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ContentType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(ContentType::parse(&name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn wire_names() {
        for ct in [
            ContentType::Note,
            ContentType::Tag,
            ContentType::Component,
            ContentType::ItemsKey,
        ] {
            assert_eq!(ContentType::parse(ct.as_str()), ct);
            assert!(ct.is_known());
        }
    }

    #[test]
    fn unknown_types_are_preserved() {
        let ct = ContentType::parse("SN|Theme");
        assert_eq!(ct, ContentType::Other("SN|Theme".into()));
        assert_eq!(ct.to_string(), "SN|Theme");
        assert!(!ct.is_known());
    }

    #[test]
    fn only_items_keys_use_root_key() {
        assert!(ContentType::ItemsKey.is_root_key_encrypted());
        assert!(!ContentType::Note.is_root_key_encrypted());
        assert!(!ContentType::Other("SN|ItemsKeyV2".into()).is_root_key_encrypted());
    }

    #[test]
    fn serde_as_string() {
        let json = serde_json::to_string(&ContentType::Component).unwrap();
        assert_eq!(json, "\"SN|Component\"");
        let back: ContentType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ContentType::Component);
    }

    proptest! {
        #[test]
        fn any_wire_name_survives(name in "\\PC{0,24}") {
            let ct = ContentType::parse(&name);
            prop_assert_eq!(ct.as_str(), name.as_str());
            let json = serde_json::to_string(&ct).unwrap();
            prop_assert_eq!(serde_json::from_str::<ContentType>(&json).unwrap(), ct);
        }
    }
}
