//! Stable per-installation player identity.
//!
//! The first run generates a `p_<random>_<time>` id and persists it; every
//! later run returns the stored id so that rejoining a room reuses the same
//! player record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::protocol::{PlayerId, Timestamp};

/// Storage key under which the player id is kept.
pub const PLAYER_ID_KEY: &str = "bloomcraft-player-id";

const RANDOM_PART_LEN: usize = 8;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Durable client-local key/value storage.
pub trait IdentityStorage: Send + Sync {
    /// Read a previously stored value.
    fn load(&self, key: &str) -> Option<String>;

    /// Persist a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value could not be persisted.
    fn store(&self, key: &str, value: &str) -> Result<()>;
}

/// Return the persisted player id, or generate, persist and return a new one.
///
/// Persistence failures are logged and the freshly generated id is still
/// returned; it will simply not survive a restart.
pub fn get_or_create_local_id(storage: &dyn IdentityStorage) -> PlayerId {
    get_or_create_local_id_with(storage, &SystemClock)
}

/// [`get_or_create_local_id`] with an explicit clock for the time component.
pub fn get_or_create_local_id_with(storage: &dyn IdentityStorage, clock: &dyn Clock) -> PlayerId {
    if let Some(existing) = storage.load(PLAYER_ID_KEY).filter(|id| !id.trim().is_empty()) {
        debug!(player = %existing, "reusing stored player id");
        return PlayerId::new(existing);
    }
    let id = generate_player_id(clock.now_ms());
    if let Err(e) = storage.store(PLAYER_ID_KEY, id.as_str()) {
        warn!(player = %id, "failed to persist player id: {e}");
    } else {
        debug!(player = %id, "generated new player id");
    }
    id
}

/// Build a `p_<8 random base-36 chars>_<base-36 millis>` id.
pub fn generate_player_id(now_ms: Timestamp) -> PlayerId {
    PlayerId::new(format!(
        "{}{}_{}",
        PlayerId::PREFIX,
        random_token(RANDOM_PART_LEN),
        to_base36(now_ms)
    ))
}

/// `len` random lowercase base-36 characters.
pub(crate) fn random_token(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| base36_digit(rng.random_range(0..BASE36.len())))
        .collect()
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".into();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(base36_digit(usize::try_from(value % 36).unwrap_or(0)));
        value /= 36;
    }
    digits.iter().rev().collect()
}

fn base36_digit(index: usize) -> char {
    BASE36.get(index).map_or('0', |b| char::from(*b))
}

// ── Storage backends ────────────────────────────────────────────────

/// Process-local storage; ids do not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryIdentityStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryIdentityStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStorage for MemoryIdentityStorage {
    fn load(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn store(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredValues {
    v: u8,
    #[serde(default)]
    values: HashMap<String, String>,
}

/// JSON file storage, one file holding every key.
#[derive(Debug)]
pub struct FileIdentityStorage {
    path: PathBuf,
}

impl FileIdentityStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<StoredValues> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoredValues {
                v: 1,
                values: HashMap::new(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

impl IdentityStorage for FileIdentityStorage {
    fn load(&self, key: &str) -> Option<String> {
        match self.read() {
            Ok(mut stored) => stored.values.remove(key),
            Err(e) => {
                warn!(path = %self.path.display(), "unreadable identity file: {e}");
                None
            }
        }
    }

    fn store(&self, key: &str, value: &str) -> Result<()> {
        // A corrupt file is replaced rather than blocking identity creation.
        let mut stored = self.read().unwrap_or_default();
        stored.v = 1;
        stored.values.insert(key.to_string(), value.to_string());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(&stored)?)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::BloomcraftError;

    struct ReadOnlyStorage;

    impl IdentityStorage for ReadOnlyStorage {
        fn load(&self, _key: &str) -> Option<String> {
            None
        }

        fn store(&self, _key: &str, _value: &str) -> Result<()> {
            Err(BloomcraftError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }
    }

    #[test]
    fn generated_id_has_prefix_random_part_and_time() {
        let id = generate_player_id(36 * 36);
        let parts: Vec<&str> = id.as_str().split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "p");
        assert_eq!(parts[1].len(), RANDOM_PART_LEN);
        assert!(parts[1].chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_eq!(parts[2], "100");
    }

    #[test]
    fn random_tokens_differ() {
        assert_ne!(random_token(8), random_token(8));
        assert_eq!(random_token(40).len(), 40);
    }

    #[test]
    fn random_tokens_stay_in_the_base36_alphabet() {
        let token = random_token(500);
        assert!(token.bytes().all(|b| BASE36.contains(&b)));
        let distinct: std::collections::HashSet<char> = token.chars().collect();
        assert!(distinct.len() > 20);
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
    }

    #[test]
    fn second_call_returns_stored_id() {
        let storage = MemoryIdentityStorage::new();
        let clock = ManualClock::new(1_700_000_000_000);
        let first = get_or_create_local_id_with(&storage, &clock);
        let second = get_or_create_local_id_with(&storage, &clock);
        assert_eq!(first, second);
        assert_eq!(storage.load(PLAYER_ID_KEY).as_deref(), Some(first.as_str()));
    }

    #[test]
    fn persistence_failure_still_yields_an_id() {
        let id = get_or_create_local_id(&ReadOnlyStorage);
        assert!(id.as_str().starts_with(PlayerId::PREFIX));
    }

    #[test]
    fn file_storage_survives_new_instances() {
        let path = std::env::temp_dir()
            .join(format!("bloomcraft-identity-{}", uuid::Uuid::new_v4()))
            .join("identity.json");
        let first = get_or_create_local_id(&FileIdentityStorage::new(&path));
        let second = get_or_create_local_id(&FileIdentityStorage::new(&path));
        assert_eq!(first, second);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn corrupt_file_is_replaced() {
        let path = std::env::temp_dir().join(format!("bloomcraft-corrupt-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, "not json").unwrap();
        let storage = FileIdentityStorage::new(&path);
        assert!(storage.load(PLAYER_ID_KEY).is_none());
        let id = get_or_create_local_id(&storage);
        assert_eq!(storage.load(PLAYER_ID_KEY).as_deref(), Some(id.as_str()));
        let _ = std::fs::remove_file(&path);
    }
}
