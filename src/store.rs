// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Groove Layer - Trait Store
//
// Slow traits are the only state that outlives a session. Loads and saves
// happen at session boundaries only, never in the window path.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::latent::SlowTraits;
use crate::types::PlayerId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("trait store I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("stored traits for {player} are malformed: {source}")]
    Malformed {
        player: PlayerId,
        #[source]
        source: serde_json::Error,
    },

    #[error("player id {0:?} cannot be used as a file name")]
    InvalidPlayerId(PlayerId),
}

/// Persistence seam for cross-session traits. One writer per player is the
/// caller's contract.
pub trait TraitStore {
    fn load_trait_state(&mut self, player: &PlayerId) -> Result<Option<SlowTraits>, StoreError>;
    fn save_trait_state(&mut self, player: &PlayerId, traits: &SlowTraits) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MemoryTraitStore {
    traits: HashMap<PlayerId, SlowTraits>,
}

impl MemoryTraitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, player: &PlayerId) -> Option<&SlowTraits> {
        self.traits.get(player)
    }
}

impl TraitStore for MemoryTraitStore {
    fn load_trait_state(&mut self, player: &PlayerId) -> Result<Option<SlowTraits>, StoreError> {
        Ok(self.traits.get(player).map(SlowTraits::clamped))
    }

    fn save_trait_state(&mut self, player: &PlayerId, traits: &SlowTraits) -> Result<(), StoreError> {
        self.traits.insert(player.clone(), *traits);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON files
// ---------------------------------------------------------------------------

/// One `<player>.json` document per player under a directory.
#[derive(Debug, Clone)]
pub struct JsonFileTraitStore {
    dir: PathBuf,
}

impl JsonFileTraitStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, player: &PlayerId) -> Result<PathBuf, StoreError> {
        let id = &player.0;
        let usable = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !id.starts_with('.');
        if !usable {
            return Err(StoreError::InvalidPlayerId(player.clone()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }
}

impl TraitStore for JsonFileTraitStore {
    fn load_trait_state(&mut self, player: &PlayerId) -> Result<Option<SlowTraits>, StoreError> {
        let path = self.path_for(player)?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let traits: SlowTraits = serde_json::from_str(&raw)
            .map_err(|source| StoreError::Malformed { player: player.clone(), source })?;
        debug!(player = %player, path = %path.display(), "slow traits loaded");
        Ok(Some(traits.clamped()))
    }

    fn save_trait_state(&mut self, player: &PlayerId, traits: &SlowTraits) -> Result<(), StoreError> {
        let path = self.path_for(player)?;
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io { path: self.dir.clone(), source })?;
        let json = serde_json::to_string_pretty(traits)
            .map_err(|source| StoreError::Malformed { player: player.clone(), source })?;
        // Write-then-rename so a crash never leaves a truncated document.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| StoreError::Io { path: tmp.clone(), source })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io { path: path.clone(), source })?;
        debug!(player = %player, path = %path.display(), "slow traits saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrip() {
        let mut store = MemoryTraitStore::new();
        let player = PlayerId::from("ada");
        assert!(store.load_trait_state(&player).unwrap().is_none());

        let mut traits = SlowTraits::default();
        traits.timing_stability = 0.8;
        store.save_trait_state(&player, &traits).unwrap();
        assert_eq!(store.load_trait_state(&player).unwrap(), Some(traits));
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let player = PlayerId::from("player-1");
        let mut traits = SlowTraits::default();
        traits.exploration_appetite = 0.9;

        JsonFileTraitStore::new(dir.path())
            .save_trait_state(&player, &traits)
            .unwrap();
        let loaded = JsonFileTraitStore::new(dir.path())
            .load_trait_state(&player)
            .unwrap();
        assert_eq!(loaded, Some(traits));
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let mut store = JsonFileTraitStore::new(dir.path());
        assert!(store.load_trait_state(&PlayerId::from("nobody")).unwrap().is_none());
    }

    #[test]
    fn out_of_range_file_values_are_clamped() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let json = serde_json::to_string(&SlowTraits::uniform(0.5))
            .unwrap()
            .replace("\"cognitive_load\":0.5", "\"cognitive_load\":7.0");
        std::fs::write(dir.path().join("p.json"), json).unwrap();
        let loaded = JsonFileTraitStore::new(dir.path())
            .load_trait_state(&PlayerId::from("p"))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.cognitive_load, 1.0);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        std::fs::write(dir.path().join("p.json"), "{not json").unwrap();
        let err = JsonFileTraitStore::new(dir.path())
            .load_trait_state(&PlayerId::from("p"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
    }

    #[test]
    fn path_traversal_rejected() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let mut store = JsonFileTraitStore::new(dir.path());
        let err = store.load_trait_state(&PlayerId::from("../etc/passwd")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPlayerId(_)));
    }
}
