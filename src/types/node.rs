//! Node types for the tiered graph.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::value::{Meta, MetaValue};

/// Persistence tier of a node.
///
/// The tier is part of the node itself: a store only accepts nodes whose
/// state matches its own tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Immutable, durable, federated-scale content.
    Ice,
    /// Mutable, cache-like content with a time-to-live.
    Water,
    /// Transient content derived on demand and never stored.
    Gas,
}

impl NodeState {
    /// Parse a tier from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ice" => Some(Self::Ice),
            "water" => Some(Self::Water),
            "gas" => Some(Self::Gas),
            _ => None,
        }
    }

    /// Whether nodes in this tier can be persisted by any store.
    pub fn is_storable(&self) -> bool {
        !matches!(self, Self::Gas)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ice => write!(f, "ice"),
            Self::Water => write!(f, "water"),
            Self::Gas => write!(f, "gas"),
        }
    }
}

/// Where a content payload lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPayload {
    /// Payload carried inline.
    Inline {
        /// The payload itself.
        data: MetaValue,
    },
    /// Payload stored elsewhere and referenced by URI.
    External {
        /// Location of the payload.
        uri: String,
    },
}

/// Opaque content reference attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// Media type of the payload (e.g. `text/markdown`).
    pub media_type: String,
    /// Inline data or external reference.
    pub payload: ContentPayload,
}

impl Content {
    /// Inline content.
    pub fn inline(media_type: impl Into<String>, data: impl Into<MetaValue>) -> Self {
        Self {
            media_type: media_type.into(),
            payload: ContentPayload::Inline { data: data.into() },
        }
    }

    /// Content stored at an external URI.
    pub fn external(media_type: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            payload: ContentPayload::External { uri: uri.into() },
        }
    }
}

/// A graph vertex.
///
/// Field-for-field equality is what the stores round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Globally unique identifier.
    pub id: String,
    /// Schema the node conforms to. Not validated by storage.
    pub type_id: String,
    /// Persistence tier.
    pub state: NodeState,
    /// Locale of the display strings.
    pub locale: Option<String>,
    /// Display title.
    pub title: Option<String>,
    /// Display description.
    pub description: Option<String>,
    /// Opaque content reference.
    pub content: Option<Content>,
    /// Open-ended metadata.
    pub meta: Option<Meta>,
}

impl Node {
    /// Create a node with only the required fields set.
    pub fn new(id: impl Into<String>, type_id: impl Into<String>, state: NodeState) -> Self {
        Self {
            id: id.into(),
            type_id: type_id.into(),
            state,
            locale: None,
            title: None,
            description: None,
            content: None,
            meta: None,
        }
    }

    /// Create an Ice node.
    pub fn ice(id: impl Into<String>, type_id: impl Into<String>) -> Self {
        Self::new(id, type_id, NodeState::Ice)
    }

    /// Create a Water node.
    pub fn water(id: impl Into<String>, type_id: impl Into<String>) -> Self {
        Self::new(id, type_id, NodeState::Water)
    }

    /// Set the locale.
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the content reference.
    pub fn with_content(mut self, content: Content) -> Self {
        self.content = Some(content);
        self
    }

    /// Insert one metadata entry, creating the map if needed.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.meta
            .get_or_insert_with(Meta::new)
            .insert(key.into(), value.into());
        self
    }

    /// Metadata lookup.
    pub fn meta_value(&self, key: &str) -> Option<&MetaValue> {
        self.meta.as_ref().and_then(|m| m.get(key))
    }

    /// Source node this one was derived from, read from the
    /// `generated_from` metadata key.
    pub fn generated_from(&self) -> Option<&str> {
        self.meta_value(GENERATED_FROM_KEY).and_then(MetaValue::as_str)
    }
}

/// Metadata key naming the source a Water node was derived from.
pub const GENERATED_FROM_KEY: &str = "generated_from";
