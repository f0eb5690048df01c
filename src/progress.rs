//! Local stage progression.
//!
//! [`ProgressTracker`] is the authoritative copy of the local player's own
//! growth. It never reads the store back: the store only ever receives what
//! the tracker produced, so a failed write leaves the tracker ahead of what
//! the opponent can see until a later write lands.

use std::collections::BTreeSet;

use tracing::debug;

use crate::protocol::{Element, PlantKind, PlayerRecord, PlayerUpdate, Stage, Timestamp};

/// What a single [`ProgressTracker::collect`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectOutcome {
    /// The plant is fully grown; nothing changes.
    AlreadyComplete,
    /// The element was already in the collected set.
    Duplicate,
    /// The element was added; more are needed before the next stage.
    Collected,
    /// The set was completed and the stage advanced. The update must be
    /// pushed to the store.
    Advanced(PlayerUpdate),
}

/// Accumulates collected elements into stage advances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressTracker {
    plant: PlantKind,
    stage: Stage,
    collected: BTreeSet<Element>,
    completed_at: Option<Timestamp>,
}

impl ProgressTracker {
    /// A stage-1 tracker growing `plant`.
    pub fn new(plant: PlantKind) -> Self {
        Self {
            plant,
            stage: Stage::FIRST,
            collected: BTreeSet::new(),
            completed_at: None,
        }
    }

    pub fn plant(&self) -> PlantKind {
        self.plant
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn collected(&self) -> &BTreeSet<Element> {
        &self.collected
    }

    pub fn completed_at(&self) -> Option<Timestamp> {
        self.completed_at
    }

    /// Add `element` to the collected set at time `now`.
    ///
    /// Once every [required element](Element::REQUIRED) is present the stage
    /// goes up by one (never past [`Stage::FINAL`]), the set is cleared and,
    /// on reaching the final stage, `completed_at` is stamped.
    pub fn collect(&mut self, element: Element, now: Timestamp) -> CollectOutcome {
        if self.stage.is_final() {
            return CollectOutcome::AlreadyComplete;
        }
        if !self.collected.insert(element) {
            return CollectOutcome::Duplicate;
        }
        if !Element::REQUIRED.iter().all(|e| self.collected.contains(e)) {
            return CollectOutcome::Collected;
        }

        self.stage = self.stage.next();
        self.collected.clear();
        let mut update = PlayerUpdate::new()
            .with_stage(self.stage)
            .with_collected(BTreeSet::new())
            .with_plant(self.plant);
        if self.stage.is_final() {
            self.completed_at = Some(now);
            update = update.with_completed_at(Some(now));
        }
        debug!(stage = %self.stage, "stage advanced");
        CollectOutcome::Advanced(update)
    }

    /// Switch plants. Growth restarts from stage 1.
    ///
    /// Returns the update that mirrors the reset in the store.
    pub fn select_plant(&mut self, plant: PlantKind) -> PlayerUpdate {
        self.plant = plant;
        self.reset();
        PlayerUpdate::new()
            .with_plant(plant)
            .with_stage(Stage::FIRST)
            .with_collected(BTreeSet::new())
            .with_completed_at(None)
    }

    /// Back to stage 1 with nothing collected, keeping the plant.
    pub fn reset(&mut self) {
        self.stage = Stage::FIRST;
        self.collected.clear();
        self.completed_at = None;
    }

    /// The full record this tracker describes, for creating or joining a room.
    pub fn to_record(&self, player_name: &str) -> PlayerRecord {
        PlayerRecord {
            player_name: player_name.to_string(),
            selected_plant: self.plant,
            current_stage: self.stage,
            collected_elements: self.collected.clone(),
            completed_at: self.completed_at,
            ready_for_restart: false,
            joined_at: None,
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(PlantKind::default())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn advance(tracker: &mut ProgressTracker, now: Timestamp) -> PlayerUpdate {
        let mut last = None;
        for element in Element::REQUIRED {
            last = Some(tracker.collect(element, now));
        }
        match last {
            Some(CollectOutcome::Advanced(update)) => update,
            other => panic!("expected an advance, got {other:?}"),
        }
    }

    #[test]
    fn full_set_in_any_order_with_duplicates_advances_once() {
        let mut tracker = ProgressTracker::new(PlantKind::Rose);
        let sequence = [
            Element::Food,
            Element::Food,
            Element::Soil,
            Element::Sun,
            Element::Soil,
            Element::Water,
        ];
        let outcomes: Vec<_> = sequence.iter().map(|e| tracker.collect(*e, 10)).collect();

        assert_eq!(outcomes[0], CollectOutcome::Collected);
        assert_eq!(outcomes[1], CollectOutcome::Duplicate);
        assert_eq!(outcomes[4], CollectOutcome::Duplicate);
        assert!(matches!(outcomes[5], CollectOutcome::Advanced(_)));
        assert_eq!(tracker.stage().get(), 2);
        assert!(tracker.collected().is_empty());
    }

    #[test]
    fn duplicate_does_not_grow_the_set() {
        let mut tracker = ProgressTracker::default();
        tracker.collect(Element::Sun, 0);
        assert_eq!(tracker.collect(Element::Sun, 0), CollectOutcome::Duplicate);
        assert_eq!(tracker.collected().len(), 1);
        assert_eq!(tracker.stage(), Stage::FIRST);
    }

    #[test]
    fn advance_update_carries_stage_plant_and_cleared_set() {
        let mut tracker = ProgressTracker::new(PlantKind::Sunflower);
        let update = advance(&mut tracker, 42);
        assert_eq!(update.current_stage, Stage::new(2));
        assert_eq!(update.selected_plant, Some(PlantKind::Sunflower));
        assert_eq!(update.collected_elements, Some(BTreeSet::new()));
        assert_eq!(update.completed_at, None);
    }

    #[test]
    fn final_stage_stamps_completion_once() {
        let mut tracker = ProgressTracker::default();
        for round in 0..4 {
            advance(&mut tracker, round);
            assert_eq!(tracker.completed_at(), None);
        }
        let update = advance(&mut tracker, 500);
        assert_eq!(tracker.stage(), Stage::FINAL);
        assert_eq!(tracker.completed_at(), Some(500));
        assert_eq!(update.completed_at, Some(Some(500)));

        for element in Element::REQUIRED {
            assert_eq!(tracker.collect(element, 900), CollectOutcome::AlreadyComplete);
        }
        assert_eq!(tracker.completed_at(), Some(500));
        assert_eq!(tracker.stage(), Stage::FINAL);
        assert!(tracker.collected().is_empty());
    }

    #[test]
    fn selecting_a_plant_restarts_growth() {
        let mut tracker = ProgressTracker::default();
        advance(&mut tracker, 1);
        tracker.collect(Element::Water, 2);
        let update = tracker.select_plant(PlantKind::Rose);
        assert_eq!(tracker.plant(), PlantKind::Rose);
        assert_eq!(tracker.stage(), Stage::FIRST);
        assert!(tracker.collected().is_empty());
        assert_eq!(update.completed_at, Some(None));
        assert_eq!(update.current_stage, Some(Stage::FIRST));
    }

    #[test]
    fn record_reflects_tracker() {
        let mut tracker = ProgressTracker::new(PlantKind::Lotus);
        tracker.collect(Element::Soil, 0);
        let record = tracker.to_record("Ada");
        assert_eq!(record.player_name, "Ada");
        assert_eq!(record.current_stage, Stage::FIRST);
        assert!(record.collected_elements.contains(&Element::Soil));
        assert!(!record.ready_for_restart);
    }
}
