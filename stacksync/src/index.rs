//! Stack catalog documents.
//!
//! A catalog (usually `index.yaml`) lists every published version of every
//! stack in a repository. Decoding is lenient; [`Index::normalize`] then
//! drops malformed entries and fills in derived fields.

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<String>,
    #[serde(default)]
    pub stacks: Vec<StackEntry>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StackEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Single image reference used by catalogs that predate `images`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub pipelines: Vec<Pipeline>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Image {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pipeline {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub sha256: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Trigger {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub sha256: String,
}

/// A catalog entry left out of the normalized index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedEntry {
    pub id: String,
    pub version: String,
    pub reason: DropReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NoId,
    NoImage,
    NoImageReference,
}

impl DropReason {
    pub fn describe(&self) -> &'static str {
        match self {
            DropReason::NoId => "index entry has no id",
            DropReason::NoImage => "index entry must contain at least one image or images[]",
            DropReason::NoImageReference => "no images[].image found",
        }
    }
}

impl Index {
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(DecodeError::Empty);
        }
        Ok(serde_yaml::from_slice(bytes)?)
    }

    /// Applies fallback pipelines and triggers and removes entries that have no
    /// usable image. Returns the entries that were removed.
    pub fn normalize(&mut self, pipelines: &[Pipeline], triggers: &[Trigger]) -> Vec<DroppedEntry> {
        let mut dropped = Vec::new();

        self.stacks.retain_mut(|stack| {
            if !pipelines.is_empty() {
                stack.pipelines = pipelines.to_vec();
            }

            let reason = if stack.id.is_empty() {
                Some(DropReason::NoId)
            } else if stack.images.is_empty() {
                if stack.image.is_empty() {
                    Some(DropReason::NoImage)
                } else {
                    stack.images = vec![Image {
                        id: stack.id.clone(),
                        image: stack.image.clone(),
                    }];
                    None
                }
            } else if stack.images.iter().any(|image| !image.image.is_empty()) {
                None
            } else {
                Some(DropReason::NoImageReference)
            };

            match reason {
                Some(reason) => {
                    info!(
                        stack = %stack.id,
                        version = %stack.version,
                        "stack not indexed: {}",
                        reason.describe()
                    );
                    dropped.push(DroppedEntry {
                        id: stack.id.clone(),
                        version: stack.version.clone(),
                        reason,
                    });
                    false
                }
                None => true,
            }
        });

        if self.triggers.is_empty() {
            self.triggers = triggers.to_vec();
        }

        dropped
    }

    /// Every entry published under the given identity.
    pub fn search_stack(&self, id: &str) -> Vec<&StackEntry> {
        self.stacks.iter().filter(|stack| stack.id == id).collect()
    }
}
