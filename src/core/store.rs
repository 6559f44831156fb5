//! Persistent message and reaction document
//!
//! `store.json` holds the predefined messages and the reaction list. Older
//! documents kept reactions in a trigger-keyed dictionary; those are
//! migrated into the list on load and never written back.

use crate::core::message::{DefinitionError, MessageDefinition, ReactionRule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Default document file name
pub const STORE_FILE_NAME: &str = "store.json";

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// File could not be read or written
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Document could not be encoded
    #[error("Store serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialized message definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageDto {
    /// Display name
    pub name: String,
    /// Hex content
    pub content: String,
    /// Delay before sending, in milliseconds
    pub delay_ms: u64,
    /// Paused flag
    pub is_paused: bool,
    /// Priority
    pub priority: i32,
    /// Stop-after-match flag
    pub stop_after_match: bool,
}

impl From<&MessageDefinition> for MessageDto {
    fn from(def: &MessageDefinition) -> Self {
        Self {
            name: def.name.clone(),
            content: def.content().to_string(),
            delay_ms: def.delay_ms,
            is_paused: def.is_paused,
            priority: def.priority,
            stop_after_match: def.stop_after_match,
        }
    }
}

impl MessageDto {
    /// Build the validated definition
    pub fn to_definition(&self) -> Result<MessageDefinition, DefinitionError> {
        Ok(MessageDefinition::new(&self.name, &self.content)?
            .delay_ms(self.delay_ms)
            .paused(self.is_paused)
            .priority(self.priority)
            .stop_after_match(self.stop_after_match))
    }
}

/// Serialized reaction rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReactionDto {
    /// Hex trigger
    pub trigger: String,
    /// Response name
    pub name: String,
    /// Response hex content
    pub content: String,
    /// Delay before sending, in milliseconds
    pub delay_ms: u64,
    /// Paused flag
    pub is_paused: bool,
    /// Priority
    pub priority: i32,
    /// Stop-after-match flag
    pub stop_after_match: bool,
}

impl From<&ReactionRule> for ReactionDto {
    fn from(rule: &ReactionRule) -> Self {
        let response = MessageDto::from(&rule.response);
        Self {
            trigger: rule.trigger().to_string(),
            name: response.name,
            content: response.content,
            delay_ms: response.delay_ms,
            is_paused: response.is_paused,
            priority: response.priority,
            stop_after_match: response.stop_after_match,
        }
    }
}

impl ReactionDto {
    /// Build the validated rule
    pub fn to_rule(&self) -> Result<ReactionRule, DefinitionError> {
        let response = MessageDto {
            name: self.name.clone(),
            content: self.content.clone(),
            delay_ms: self.delay_ms,
            is_paused: self.is_paused,
            priority: self.priority,
            stop_after_match: self.stop_after_match,
        }
        .to_definition()?;
        ReactionRule::new(&self.trigger, response)
    }
}

/// On-disk document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageModel {
    /// Predefined messages
    pub predefined_messages: Vec<MessageDto>,
    /// Legacy trigger-keyed reactions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reactions: Option<BTreeMap<String, MessageDto>>,
    /// Reactions
    pub reactions_list: Vec<ReactionDto>,
}

impl StorageModel {
    /// Build a document from live definitions
    pub fn from_definitions(messages: &[MessageDefinition], rules: &[ReactionRule]) -> Self {
        Self {
            predefined_messages: messages.iter().map(MessageDto::from).collect(),
            reactions: None,
            reactions_list: rules.iter().map(ReactionDto::from).collect(),
        }
    }

    /// Move legacy dictionary entries into the list when the list is empty
    pub fn migrate_legacy(&mut self) {
        let Some(legacy) = self.reactions.take() else {
            return;
        };
        if !self.reactions_list.is_empty() || legacy.is_empty() {
            return;
        }

        debug!("Migrating {} legacy reactions", legacy.len());
        self.reactions_list = legacy
            .into_iter()
            .map(|(trigger, msg)| ReactionDto {
                trigger,
                name: msg.name,
                content: msg.content,
                delay_ms: msg.delay_ms,
                is_paused: msg.is_paused,
                ..ReactionDto::default()
            })
            .collect();
    }

    /// Validated definitions; invalid entries are skipped with a warning
    pub fn into_definitions(self) -> (Vec<MessageDefinition>, Vec<ReactionRule>) {
        let messages = self
            .predefined_messages
            .iter()
            .filter_map(|dto| match dto.to_definition() {
                Ok(def) => Some(def),
                Err(e) => {
                    warn!("Skipping stored message '{}': {}", dto.name, e);
                    None
                }
            })
            .collect();

        let rules = self
            .reactions_list
            .iter()
            .filter_map(|dto| match dto.to_rule() {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!("Skipping stored reaction '{}': {}", dto.trigger, e);
                    None
                }
            })
            .collect();

        (messages, rules)
    }
}

/// JSON document store for messages and reactions
#[derive(Debug, Clone)]
pub struct MessageStore {
    path: PathBuf,
}

impl MessageStore {
    /// Store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store in the application data directory
    pub fn default_location() -> Option<Self> {
        crate::config::data_dir().map(|dir| Self::new(dir.join(STORE_FILE_NAME)))
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document; a missing or corrupt file yields an empty one
    pub fn load(&self) -> Result<StorageModel, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StorageModel::default()),
            Err(e) => return Err(e.into()),
        };

        let mut model = match serde_json::from_str::<StorageModel>(&content) {
            Ok(model) => model,
            Err(e) => {
                warn!("Ignoring corrupt store {}: {}", self.path.display(), e);
                return Ok(StorageModel::default());
            }
        };
        model.migrate_legacy();
        Ok(model)
    }

    /// Write the document as pretty JSON, legacy dictionary omitted
    pub fn save(&self, model: &StorageModel) -> Result<(), StoreError> {
        let mut model = model.clone();
        model.reactions = None;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(&model)?;
        std::fs::write(&self.path, content)?;
        debug!("Saved store to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, MessageStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MessageStore::new(dir.path().join(STORE_FILE_NAME));
        (dir, store)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let (_dir, store) = store();
        assert_eq!(store.load().unwrap(), StorageModel::default());
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let (_dir, store) = store();
        std::fs::write(store.path(), "{ not json").unwrap();
        assert_eq!(store.load().unwrap(), StorageModel::default());
    }

    #[test]
    fn test_save_and_load() {
        let (_dir, store) = store();
        let msg = MessageDefinition::new("Poll", "02 41 03").unwrap();
        let rule = ReactionRule::new(
            "0241",
            MessageDefinition::new("Ack", "06").unwrap().delay_ms(50).priority(2).stop_after_match(true),
        )
        .unwrap();

        store.save(&StorageModel::from_definitions(&[msg.clone()], &[rule.clone()])).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"predefinedMessages\""));
        assert!(raw.contains("\"stopAfterMatch\": true"));
        assert!(!raw.contains("\"reactions\":"));

        let (messages, rules) = store.load().unwrap().into_definitions();
        assert_eq!(messages, vec![msg]);
        assert_eq!(rules, vec![rule]);
    }

    #[test]
    fn test_legacy_reactions_migrated() {
        let (_dir, store) = store();
        std::fs::write(
            store.path(),
            r#"{
                "predefinedMessages": [],
                "reactions": {
                    "4142": { "name": "Ack", "content": "06", "delayMs": 10, "isPaused": true }
                }
            }"#,
        )
        .unwrap();

        let model = store.load().unwrap();
        assert!(model.reactions.is_none());
        assert_eq!(model.reactions_list.len(), 1);
        assert_eq!(model.reactions_list[0].trigger, "4142");
        assert_eq!(model.reactions_list[0].delay_ms, 10);
        assert!(model.reactions_list[0].is_paused);
    }

    #[test]
    fn test_legacy_ignored_when_list_present() {
        let mut model = StorageModel {
            reactions: Some(BTreeMap::from([(
                "41".to_string(),
                MessageDto {
                    name: "old".into(),
                    content: "00".into(),
                    ..MessageDto::default()
                },
            )])),
            reactions_list: vec![ReactionDto {
                trigger: "42".into(),
                name: "new".into(),
                content: "01".into(),
                ..ReactionDto::default()
            }],
            ..StorageModel::default()
        };

        model.migrate_legacy();
        assert_eq!(model.reactions_list.len(), 1);
        assert_eq!(model.reactions_list[0].name, "new");
    }

    #[test]
    fn test_invalid_entries_skipped() {
        let model = StorageModel {
            predefined_messages: vec![
                MessageDto {
                    name: "good".into(),
                    content: "0D0A".into(),
                    ..MessageDto::default()
                },
                MessageDto {
                    name: "bad".into(),
                    content: "ABC".into(),
                    ..MessageDto::default()
                },
            ],
            reactions: None,
            reactions_list: vec![ReactionDto {
                trigger: "".into(),
                name: "empty".into(),
                content: "06".into(),
                ..ReactionDto::default()
            }],
        };

        let (messages, rules) = model.into_definitions();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].name, "good");
        assert!(rules.is_empty());
    }
}
