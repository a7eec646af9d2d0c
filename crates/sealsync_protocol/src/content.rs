//! Typed record payloads.
//!
//! Every payload keeps the JSON fields it does not model in `extra`, so a
//! record written by a newer client can be decrypted, have its references
//! rewritten and be re-encrypted without losing anything.

use crate::content_type::ContentType;
use crate::error::{ProtocolError, ProtocolResult};
use crate::key_params::PROTOCOL_VERSION;
use crate::record::{timestamp_now, DecryptedRecord, RecordMeta};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Namespace inside `appData` owned by this client.
pub const APP_DATA_DOMAIN: &str = "org.sealsync.app";

const CLIENT_UPDATED_AT: &str = "client_updated_at";

/// A pointer from one record to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Target identity.
    pub uuid: Uuid,
    /// Target discriminator.
    pub content_type: ContentType,
}

impl Reference {
    /// Creates a reference.
    pub fn new(uuid: Uuid, content_type: ContentType) -> Self {
        Self { uuid, content_type }
    }
}

/// Capabilities shared by every payload.
pub trait RecordContent {
    /// Records this one points at.
    fn references(&self) -> &[Reference];

    /// Replaces the outgoing references.
    fn set_references(&mut self, references: Vec<Reference>);

    /// Human-readable title, if the type has one.
    fn title(&self) -> Option<&str>;

    /// Last time a client edited the payload, if recorded.
    fn update_time(&self) -> Option<DateTime<Utc>>;

    /// Rewrites every reference found in `remap`. Returns true if anything
    /// changed.
    fn remap_references(&mut self, remap: &BTreeMap<Uuid, Uuid>) -> bool {
        if !self.references().iter().any(|r| remap.contains_key(&r.uuid)) {
            return false;
        }
        let rewritten = self
            .references()
            .iter()
            .map(|r| Reference {
                uuid: remap.get(&r.uuid).copied().unwrap_or(r.uuid),
                content_type: r.content_type.clone(),
            })
            .collect();
        self.set_references(rewritten);
        true
    }
}

/// Note payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NoteContent {
    /// Title.
    #[serde(default)]
    pub title: String,
    /// Body text.
    #[serde(default)]
    pub text: String,
    /// Outgoing references.
    #[serde(default)]
    pub references: Vec<Reference>,
    /// Per-client application data.
    #[serde(rename = "appData", default, skip_serializing_if = "Map::is_empty")]
    pub app_data: Map<String, Value>,
    /// Fields this client does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NoteContent {
    /// Creates a note.
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Tag payload. A tag's references are the records it groups.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TagContent {
    /// Title.
    #[serde(default)]
    pub title: String,
    /// Tagged records.
    #[serde(default)]
    pub references: Vec<Reference>,
    /// Per-client application data.
    #[serde(rename = "appData", default, skip_serializing_if = "Map::is_empty")]
    pub app_data: Map<String, Value>,
    /// Fields this client does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TagContent {
    /// Creates an empty tag.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Tags another record.
    pub fn with_reference(mut self, uuid: Uuid, content_type: ContentType) -> Self {
        self.references.push(Reference::new(uuid, content_type));
        self
    }
}

/// Component payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComponentContent {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Where the component is served from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosted_url: Option<String>,
    /// UI area the component attaches to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    /// Records the component is associated with.
    #[serde(default)]
    pub references: Vec<Reference>,
    /// Per-client application data.
    #[serde(rename = "appData", default, skip_serializing_if = "Map::is_empty")]
    pub app_data: Map<String, Value>,
    /// Fields this client does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Wrapping key payload. `items_key` is the hex-encoded key material.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ItemsKeyContent {
    /// Hex-encoded symmetric key.
    #[serde(rename = "itemsKey")]
    pub items_key: String,
    /// Protocol version the key belongs to.
    #[serde(default)]
    pub version: String,
    /// Whether this key wraps newly created records.
    #[serde(rename = "isDefault", default)]
    pub is_default: bool,
    /// Always empty in practice, kept for the shared capability set.
    #[serde(default)]
    pub references: Vec<Reference>,
    /// Per-client application data.
    #[serde(rename = "appData", default, skip_serializing_if = "Map::is_empty")]
    pub app_data: Map<String, Value>,
    /// Fields this client does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ItemsKeyContent {
    /// Creates a payload for hex-encoded key material.
    pub fn new(items_key: impl Into<String>, is_default: bool) -> Self {
        Self {
            items_key: items_key.into(),
            version: PROTOCOL_VERSION.to_string(),
            is_default,
            ..Self::default()
        }
    }
}

fn client_updated_at(app_data: &Map<String, Value>) -> Option<DateTime<Utc>> {
    let raw = app_data
        .get(APP_DATA_DOMAIN)?
        .get(CLIENT_UPDATED_AT)?
        .as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn set_client_updated_at(app_data: &mut Map<String, Value>, at: DateTime<Utc>) {
    let domain = app_data
        .entry(APP_DATA_DOMAIN.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !domain.is_object() {
        *domain = Value::Object(Map::new());
    }
    if let Value::Object(map) = domain {
        map.insert(
            CLIENT_UPDATED_AT.to_string(),
            Value::String(at.to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
    }
}

macro_rules! impl_record_content {
    ($ty:ty, |$this:ident| $title:expr) => {
        impl RecordContent for $ty {
            fn references(&self) -> &[Reference] {
                &self.references
            }

            fn set_references(&mut self, references: Vec<Reference>) {
                self.references = references;
            }

            fn title(&self) -> Option<&str> {
                let $this = self;
                $title
            }

            fn update_time(&self) -> Option<DateTime<Utc>> {
                client_updated_at(&self.app_data)
            }
        }
    };
}

impl_record_content!(NoteContent, |this| Some(this.title.as_str()));
impl_record_content!(TagContent, |this| Some(this.title.as_str()));
impl_record_content!(ComponentContent, |this| Some(this.name.as_str()));
impl_record_content!(ItemsKeyContent, |_this| None);

/// Closed set of payloads, dispatched by content type.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// Note payload.
    Note(NoteContent),
    /// Tag payload.
    Tag(TagContent),
    /// Component payload.
    Component(ComponentContent),
    /// Wrapping key payload.
    ItemsKey(ItemsKeyContent),
}

impl Content {
    /// Returns the discriminator for this payload.
    pub fn content_type(&self) -> ContentType {
        match self {
            Content::Note(_) => ContentType::Note,
            Content::Tag(_) => ContentType::Tag,
            Content::Component(_) => ContentType::Component,
            Content::ItemsKey(_) => ContentType::ItemsKey,
        }
    }

    /// Parses a plaintext body as the given content type.
    ///
    /// # Errors
    ///
    /// `UnknownContentType` for [`ContentType::Other`]; `InvalidContent` if
    /// the JSON does not match the payload shape.
    pub fn parse(uuid: Uuid, content_type: &ContentType, json: &str) -> ProtocolResult<Self> {
        let invalid = |e: serde_json::Error| ProtocolError::InvalidContent {
            uuid,
            content_type: content_type.to_string(),
            message: e.to_string(),
        };
        Ok(match content_type {
            ContentType::Note => Content::Note(serde_json::from_str(json).map_err(invalid)?),
            ContentType::Tag => Content::Tag(serde_json::from_str(json).map_err(invalid)?),
            ContentType::Component => {
                Content::Component(serde_json::from_str(json).map_err(invalid)?)
            }
            ContentType::ItemsKey => {
                Content::ItemsKey(serde_json::from_str(json).map_err(invalid)?)
            }
            ContentType::Other(name) => {
                return Err(ProtocolError::UnknownContentType(name.clone()))
            }
        })
    }

    /// Serializes the payload to its plaintext JSON body.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(match self {
            Content::Note(c) => serde_json::to_string(c)?,
            Content::Tag(c) => serde_json::to_string(c)?,
            Content::Component(c) => serde_json::to_string(c)?,
            Content::ItemsKey(c) => serde_json::to_string(c)?,
        })
    }

    fn app_data_mut(&mut self) -> &mut Map<String, Value> {
        match self {
            Content::Note(c) => &mut c.app_data,
            Content::Tag(c) => &mut c.app_data,
            Content::Component(c) => &mut c.app_data,
            Content::ItemsKey(c) => &mut c.app_data,
        }
    }

    fn inner(&self) -> &dyn RecordContent {
        match self {
            Content::Note(c) => c,
            Content::Tag(c) => c,
            Content::Component(c) => c,
            Content::ItemsKey(c) => c,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn RecordContent {
        match self {
            Content::Note(c) => c,
            Content::Tag(c) => c,
            Content::Component(c) => c,
            Content::ItemsKey(c) => c,
        }
    }
}

impl RecordContent for Content {
    fn references(&self) -> &[Reference] {
        self.inner().references()
    }

    fn set_references(&mut self, references: Vec<Reference>) {
        self.inner_mut().set_references(references);
    }

    fn title(&self) -> Option<&str> {
        self.inner().title()
    }

    fn update_time(&self) -> Option<DateTime<Utc>> {
        self.inner().update_time()
    }
}

/// A decrypted record with a typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainRecord {
    /// Identity and timestamps.
    pub meta: RecordMeta,
    /// Typed payload.
    pub content: Content,
}

impl DomainRecord {
    /// Creates a new record with a random identity.
    pub fn new(content: Content) -> Self {
        Self {
            meta: RecordMeta::generate(),
            content,
        }
    }

    /// Returns the identity.
    pub fn uuid(&self) -> Uuid {
        self.meta.uuid
    }

    /// Returns the discriminator.
    pub fn content_type(&self) -> ContentType {
        self.content.content_type()
    }

    /// Converts a decrypted record into its typed variant.
    ///
    /// # Errors
    ///
    /// Unknown content types are a hard failure: skipping them would lose
    /// data on the next push.
    pub fn from_decrypted(record: DecryptedRecord) -> ProtocolResult<Self> {
        let content = Content::parse(record.meta.uuid, &record.content_type, &record.content)?;
        Ok(Self {
            meta: record.meta,
            content,
        })
    }

    /// Serializes back to a decrypted record.
    pub fn to_decrypted(&self) -> ProtocolResult<DecryptedRecord> {
        Ok(DecryptedRecord {
            meta: self.meta.clone(),
            content_type: self.content_type(),
            content: self.content.to_json()?,
        })
    }

    /// Marks the record as edited now, locally.
    pub fn touch(&mut self) {
        let (text, micros) = timestamp_now();
        self.meta.updated_at = text;
        self.meta.updated_at_timestamp = micros;
        set_client_updated_at(self.content.app_data_mut(), Utc::now());
    }
}

impl RecordContent for DomainRecord {
    fn references(&self) -> &[Reference] {
        self.content.references()
    }

    fn set_references(&mut self, references: Vec<Reference>) {
        self.content.set_references(references);
    }

    fn title(&self) -> Option<&str> {
        self.content.title()
    }

    fn update_time(&self) -> Option<DateTime<Utc>> {
        self.content.update_time()
    }
}
