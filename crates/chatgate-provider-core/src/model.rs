//! Public model names and the mode-suffix convention.
//!
//! A public name decomposes into a base model plus zero or more trailing
//! suffixes (`GLM-4.5-Air-Thinking` → base `GLM-4.5` + {Air, Thinking}).
//! Parsing is greedy from the right and order-insensitive in the result.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureFlag {
    Thinking,
    Search,
    Air,
    Vision,
    Image,
    ImageEdit,
    Video,
    LongContext,
    Code,
}

/// Suffix vocabulary, longest-first so `-image_edit` wins over `-image`.
const SUFFIXES: &[(&str, FeatureFlag)] = &[
    ("-image_edit", FeatureFlag::ImageEdit),
    ("-Thinking", FeatureFlag::Thinking),
    ("-thinking", FeatureFlag::Thinking),
    ("-Search", FeatureFlag::Search),
    ("-search", FeatureFlag::Search),
    ("-image", FeatureFlag::Image),
    ("-video", FeatureFlag::Video),
    ("-Air", FeatureFlag::Air),
];

/// One registry entry: the string clients send, the adapter that owns it,
/// and the identifier the upstream actually understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub public_name: String,
    pub provider_id: String,
    pub upstream_name: String,
    #[serde(default)]
    pub feature_flags: BTreeSet<FeatureFlag>,
}

impl ModelDescriptor {
    pub fn new(
        public_name: impl Into<String>,
        provider_id: impl Into<String>,
        upstream_name: impl Into<String>,
    ) -> Self {
        Self {
            public_name: public_name.into(),
            provider_id: provider_id.into(),
            upstream_name: upstream_name.into(),
            feature_flags: BTreeSet::new(),
        }
    }

    pub fn with_flags(mut self, flags: impl IntoIterator<Item = FeatureFlag>) -> Self {
        self.feature_flags.extend(flags);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedModel {
    pub base: String,
    pub flags: BTreeSet<FeatureFlag>,
}

pub fn parse_model_name(name: &str) -> ParsedModel {
    let mut base = name.to_string();
    let mut flags = BTreeSet::new();
    'outer: loop {
        for (suffix, flag) in SUFFIXES {
            if let Some(stripped) = base.strip_suffix(suffix)
                && !stripped.is_empty()
            {
                base = stripped.to_string();
                flags.insert(*flag);
                continue 'outer;
            }
        }
        break;
    }
    ParsedModel { base, flags }
}

/// The routing decision for one request: the matched base descriptor plus
/// the union of its flags and the suffix-derived ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    /// The name the client sent, suffixes included.
    pub public_name: String,
    pub descriptor: ModelDescriptor,
    pub flags: BTreeSet<FeatureFlag>,
}

impl RouteTarget {
    pub fn has(&self, flag: FeatureFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Image/video targets buffer their stream into a single envelope.
    pub fn is_generation(&self) -> bool {
        self.has(FeatureFlag::Image)
            || self.has(FeatureFlag::ImageEdit)
            || self.has(FeatureFlag::Video)
    }
}
