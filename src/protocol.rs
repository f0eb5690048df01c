//! Wire-compatible types for the shared room document.
//!
//! A room lives at `rooms/<room_id>` in the document store and looks like:
//!
//! ```json
//! {
//!   "createdAt": 1700000000000,
//!   "gameStarted": false,
//!   "startedAt": null,
//!   "p_k3j9x2aa_lq1w2e": {
//!     "playerName": "Ada",
//!     "selectedPlant": "lotus",
//!     "currentStage": 1,
//!     "collectedElements": [],
//!     "completedAt": null
//!   }
//! }
//! ```
//!
//! Room metadata and player records share one flat object on the wire. On
//! the Rust side they are split: the three metadata keys are named fields of
//! [`RoomDocument`] and every other key must hold a [`PlayerRecord`]. A
//! payload that fits neither shape is rejected as a whole.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BloomcraftError, Result};

/// Milliseconds since the Unix epoch, as written by the clients.
pub type Timestamp = u64;

/// Highest stage a plant can reach. Reaching it completes the round.
pub const MAX_STAGE: u8 = 6;

// ── Identifiers ─────────────────────────────────────────────────────

/// Stable per-installation player identifier (conventionally `p_…`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Conventional prefix of generated player ids.
    pub const PREFIX: &'static str = "p_";

    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Room identifier (conventionally `room_…`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Conventional prefix of room ids.
    pub const PREFIX: &'static str = "room_";

    /// Length of the random suffix of generated room ids.
    const GENERATED_SUFFIX_LEN: usize = 6;

    /// Wrap an existing identifier verbatim.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh `room_xxxxxx` identifier.
    pub fn generate() -> Self {
        Self(format!(
            "{}{}",
            Self::PREFIX,
            crate::identity::random_token(Self::GENERATED_SUFFIX_LEN)
        ))
    }

    /// Turn a user-entered join code into a room id.
    ///
    /// Surrounding whitespace is trimmed and the `room_` prefix is added when
    /// missing. Returns `None` for an empty code.
    ///
    /// ```
    /// use bloomcraft_client::protocol::RoomId;
    ///
    /// assert_eq!(RoomId::from_code(" ab12cd ").unwrap().as_str(), "room_ab12cd");
    /// assert_eq!(RoomId::from_code("room_ab12cd").unwrap().as_str(), "room_ab12cd");
    /// assert!(RoomId::from_code("   ").is_none());
    /// ```
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        if code.is_empty() {
            return None;
        }
        if code.starts_with(Self::PREFIX) {
            Some(Self(code.to_string()))
        } else {
            Some(Self(format!("{}{code}", Self::PREFIX)))
        }
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Enums ───────────────────────────────────────────────────────────

/// The plant a player is growing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlantKind {
    #[default]
    Lotus,
    Rose,
    Sunflower,
}

impl PlantKind {
    /// Every selectable plant.
    pub const ALL: [PlantKind; 3] = [PlantKind::Lotus, PlantKind::Rose, PlantKind::Sunflower];
}

/// An element a player collects to grow their plant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Element {
    Sun,
    Water,
    Soil,
    Food,
}

impl Element {
    /// The elements that must all be collected to advance one stage.
    pub const REQUIRED: [Element; 4] = [Element::Sun, Element::Water, Element::Soil, Element::Food];
}

/// Growth stage of a plant, always within `1..=MAX_STAGE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Stage(u8);

impl Stage {
    /// The stage every plant starts at.
    pub const FIRST: Stage = Stage(1);
    /// The fully grown stage.
    pub const FINAL: Stage = Stage(MAX_STAGE);

    /// Build a stage, returning `None` outside `1..=MAX_STAGE`.
    pub fn new(value: u8) -> Option<Self> {
        (1..=MAX_STAGE).contains(&value).then_some(Self(value))
    }

    /// The numeric stage.
    pub fn get(self) -> u8 {
        self.0
    }

    /// The following stage, saturating at [`Stage::FINAL`].
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1).min(MAX_STAGE))
    }

    /// Whether this is the fully grown stage.
    pub fn is_final(self) -> bool {
        self.0 == MAX_STAGE
    }
}

impl Default for Stage {
    fn default() -> Self {
        Self::FIRST
    }
}

impl TryFrom<u8> for Stage {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("stage {value} outside 1..={MAX_STAGE}"))
    }
}

impl From<Stage> for u8 {
    fn from(stage: Stage) -> Self {
        stage.0
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Records ─────────────────────────────────────────────────────────

fn is_false(value: &bool) -> bool {
    !*value
}

/// One player's entry inside a room.
///
/// Only the owning client ever writes its record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub player_name: String,
    #[serde(default)]
    pub selected_plant: PlantKind,
    pub current_stage: Stage,
    /// Elements gathered towards the next stage. Stores drop empty arrays,
    /// so a missing key means an empty set.
    #[serde(default)]
    pub collected_elements: BTreeSet<Element>,
    /// Set when `current_stage` reached [`Stage::FINAL`].
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub ready_for_restart: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<Timestamp>,
}

impl PlayerRecord {
    /// A fresh stage-1 record.
    pub fn new(player_name: impl Into<String>, plant: PlantKind) -> Self {
        Self {
            player_name: player_name.into(),
            selected_plant: plant,
            current_stage: Stage::FIRST,
            collected_elements: BTreeSet::new(),
            completed_at: None,
            ready_for_restart: false,
            joined_at: None,
        }
    }

    /// Set the join timestamp.
    #[must_use]
    pub fn with_joined_at(mut self, joined_at: Timestamp) -> Self {
        self.joined_at = Some(joined_at);
        self
    }

    /// Whether this player has fully grown their plant.
    pub fn is_done(&self) -> bool {
        self.current_stage.is_final() && self.completed_at.is_some()
    }
}

/// A full snapshot of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDocument {
    pub created_at: Timestamp,
    /// Flipped to `true` once by the host; never reset.
    pub game_started: bool,
    /// Shared instant both clients wait for before entering the game.
    #[serde(default)]
    pub started_at: Option<Timestamp>,
    /// Every remaining key is a player id mapped to its record.
    #[serde(flatten)]
    pub players: BTreeMap<PlayerId, PlayerRecord>,
}

impl RoomDocument {
    /// A fresh, not-yet-started room holding only its host.
    pub fn new(created_at: Timestamp, host_id: PlayerId, host: PlayerRecord) -> Self {
        let mut players = BTreeMap::new();
        players.insert(host_id, host);
        Self {
            created_at,
            game_started: false,
            started_at: None,
            players,
        }
    }

    /// Interpret a raw store payload as a room.
    ///
    /// # Errors
    ///
    /// Returns [`BloomcraftError::MalformedSnapshot`] for `null`, non-object
    /// or empty payloads, missing metadata, and keys that are neither room
    /// metadata nor a valid player record.
    pub fn from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Object(map) if map.is_empty() => {
                return Err(BloomcraftError::MalformedSnapshot("empty room".into()));
            }
            Value::Object(_) => {}
            Value::Null => {
                return Err(BloomcraftError::MalformedSnapshot("room is absent".into()));
            }
            other => {
                return Err(BloomcraftError::MalformedSnapshot(format!(
                    "expected an object, got {}",
                    json_kind(other)
                )));
            }
        }
        serde_json::from_value(value).map_err(|e| BloomcraftError::MalformedSnapshot(e.to_string()))
    }

    /// Serialize to the flat wire shape.
    ///
    /// # Errors
    ///
    /// Returns [`BloomcraftError::Serialization`] if encoding fails.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Look up one player's record.
    pub fn player(&self, id: &PlayerId) -> Option<&PlayerRecord> {
        self.players.get(id)
    }

    /// The opponent of `self_id`: the first other player id in key order.
    ///
    /// Rooms are meant for two players; any further entries are ignored.
    pub fn opponent_of(&self, self_id: &PlayerId) -> Option<(&PlayerId, &PlayerRecord)> {
        self.players.iter().find(|(id, _)| *id != self_id)
    }

    /// Number of player records in the room.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── Partial updates ─────────────────────────────────────────────────

/// A non-destructive merge into one player's record.
///
/// Only fields that are set are written. `completed_at` is doubly optional
/// so that it can be explicitly cleared (`Some(None)` writes `null`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_plant: Option<PlantKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collected_elements: Option<BTreeSet<Element>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Option<Timestamp>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_for_restart: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<Timestamp>,
}

impl PlayerUpdate {
    /// An empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// The fields a client clears for itself when a new round begins.
    pub fn round_reset() -> Self {
        Self::new()
            .with_stage(Stage::FIRST)
            .with_collected(BTreeSet::new())
            .with_completed_at(None)
            .with_ready_for_restart(false)
    }

    #[must_use]
    pub fn with_player_name(mut self, name: impl Into<String>) -> Self {
        self.player_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_plant(mut self, plant: PlantKind) -> Self {
        self.selected_plant = Some(plant);
        self
    }

    #[must_use]
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.current_stage = Some(stage);
        self
    }

    #[must_use]
    pub fn with_collected(mut self, collected: BTreeSet<Element>) -> Self {
        self.collected_elements = Some(collected);
        self
    }

    #[must_use]
    pub fn with_completed_at(mut self, completed_at: Option<Timestamp>) -> Self {
        self.completed_at = Some(completed_at);
        self
    }

    #[must_use]
    pub fn with_ready_for_restart(mut self, ready: bool) -> Self {
        self.ready_for_restart = Some(ready);
        self
    }

    #[must_use]
    pub fn with_joined_at(mut self, joined_at: Timestamp) -> Self {
        self.joined_at = Some(joined_at);
        self
    }

    /// Whether the update writes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// The update as a field map for a store merge.
    ///
    /// # Errors
    ///
    /// Returns [`BloomcraftError::Serialization`] if encoding fails.
    pub fn to_fields(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(BloomcraftError::MalformedSnapshot(format!(
                "player update encoded as {}",
                json_kind(&other)
            ))),
        }
    }
}

impl From<&PlayerRecord> for PlayerUpdate {
    fn from(record: &PlayerRecord) -> Self {
        Self {
            player_name: Some(record.player_name.clone()),
            selected_plant: Some(record.selected_plant),
            current_stage: Some(record.current_stage),
            collected_elements: Some(record.collected_elements.clone()),
            completed_at: Some(record.completed_at),
            ready_for_restart: record.ready_for_restart.then_some(true),
            joined_at: record.joined_at,
        }
    }
}
