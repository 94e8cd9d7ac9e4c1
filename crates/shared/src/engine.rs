use crate::diff::{diff, MarkerDelta};
use crate::filter;
use crate::models::{
    attr, Attributes, Category, Entity, EntityKind, FilterState, LngLat, OfficeLocation,
    PositionSample, Snapshot,
};
use crate::selection::SelectionController;
use crate::store::{Ingest, MarkerStore, SnapshotReport, TrackedVehicle};

/// Payload handed to visible-list listeners.
#[derive(Debug, Clone, Copy)]
pub struct VisibleChange<'a> {
    pub markers: &'a [Entity],
    pub deltas: &'a [MarkerDelta],
}

type Listener = Box<dyn FnMut(&VisibleChange<'_>) + Send>;

/// The live map: one store, one filter, one selection, and the derived visible list.
///
/// Every input is applied synchronously. Listeners fire only when the visible list
/// actually differs from the previous one.
#[derive(Default)]
pub struct FleetMap {
    store: MarkerStore,
    filter: FilterState,
    selection: SelectionController,
    visible: Vec<Entity>,
    synced_version: u64,
    listeners: Vec<Listener>,
}

impl std::fmt::Debug for FleetMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetMap")
            .field("store", &self.store)
            .field("filter", &self.filter)
            .field("selection", &self.selection)
            .field("visible", &self.visible.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl FleetMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &MarkerStore {
        &self.store
    }

    /// Post-filter, post-placement markers in store order.
    pub fn visible_markers(&self) -> &[Entity] {
        &self.visible
    }

    pub fn on_visible_markers_changed(
        &mut self,
        listener: impl FnMut(&VisibleChange<'_>) + Send + 'static,
    ) {
        self.listeners.push(Box::new(listener));
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn set_filter(&mut self, category: Category, query: impl Into<String>) {
        let next = FilterState::new(category, query);
        if next != self.filter {
            self.filter = next;
            self.refresh(true);
        }
    }

    pub fn selection(&self) -> Option<&str> {
        self.selection.active()
    }

    /// Select the marker `id`. Filtering does not matter, but the entity must exist.
    /// Returns false for ids the store does not hold.
    ///
    /// # Panics
    ///
    /// Panics if no snapshot has been loaded yet.
    pub fn select_marker(&mut self, id: &str) -> bool {
        assert!(
            self.store.is_initialized(),
            "select_marker called before the first snapshot was loaded"
        );
        if !self.store.contains(id) {
            return false;
        }
        if !self.selection.is_selected(id) {
            self.selection.select(id);
            self.refresh(false);
        }
        true
    }

    pub fn clear_selection(&mut self) {
        if self.selection.clear().is_some() {
            self.refresh(false);
        }
    }

    pub fn tracked_vehicles(&self) -> &[TrackedVehicle] {
        self.store.tracked_vehicles()
    }

    pub fn load_snapshot(&mut self, snapshot: &Snapshot) -> SnapshotReport {
        let report = self.store.load_snapshot(snapshot);
        self.refresh(false);
        report
    }

    pub fn apply_push_update(
        &mut self,
        kind: EntityKind,
        id: &str,
        position: LngLat,
        patch: &Attributes,
    ) -> Ingest {
        let outcome = self.store.apply_push_update(kind, id, position, patch);
        self.refresh(false);
        outcome
    }

    pub fn apply_office_update(&mut self, office: &OfficeLocation) -> Ingest {
        let outcome = self.store.apply_office_update(office);
        self.refresh(false);
        outcome
    }

    /// A live position for the vehicle driving `trip_id`.
    pub fn apply_location_update(
        &mut self,
        vehicle_id: &str,
        trip_id: &str,
        position: LngLat,
        mut patch: Attributes,
    ) -> Ingest {
        patch.insert(attr::VEHICLE_ID.to_string(), vehicle_id.into());
        let id = EntityKind::Trip.entity_id(trip_id);
        self.apply_push_update(EntityKind::Trip, &id, position, &patch)
    }

    pub fn apply_poll_update(&mut self, vehicle_id: &str, sample: &PositionSample) -> Ingest {
        let outcome = self.store.apply_poll_update(vehicle_id, sample);
        self.refresh(false);
        outcome
    }

    /// Apply the most recent sample of one poll response; earlier samples are ignored.
    pub fn apply_poll_samples(&mut self, vehicle_id: &str, samples: &[PositionSample]) -> Ingest {
        match samples.last() {
            Some(sample) => self.apply_poll_update(vehicle_id, sample),
            None => Ingest::Unchanged,
        }
    }

    /// Re-derive highlight and the visible list, then notify if the list changed.
    fn refresh(&mut self, filter_changed: bool) {
        let store = &self.store;
        self.selection.retain(|id| store.contains(id));
        self.store.set_highlight(self.selection.active());

        if !filter_changed && self.store.version() == self.synced_version {
            return;
        }
        self.synced_version = self.store.version();

        let next = filter::apply(self.store.entities(), &self.filter);
        if next == self.visible {
            return;
        }
        let deltas = diff(&self.visible, &next);
        self.visible = next;

        let change = VisibleChange {
            markers: &self.visible,
            deltas: &deltas,
        };
        for listener in &mut self.listeners {
            listener(&change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DriverRecord, Position, TripRecord, VehicleRecord};
    use std::sync::{Arc, Mutex};

    fn snapshot(vehicles: &[&str], drivers: &[&str], trips: &[(&str, &str)]) -> Snapshot {
        Snapshot {
            office: Some(OfficeLocation {
                longitude: Some(78.0),
                latitude: Some(20.0),
                company_name: Some("Acme".to_string()),
                ..Default::default()
            }),
            vehicles: vehicles
                .iter()
                .map(|id| VehicleRecord {
                    id: id.to_string(),
                    registration_number: Some(format!("REG{}", id)),
                    ..Default::default()
                })
                .collect(),
            drivers: drivers
                .iter()
                .map(|id| DriverRecord {
                    id: id.to_string(),
                    full_name: Some(format!("Driver {}", id)),
                    ..Default::default()
                })
                .collect(),
            trips: trips
                .iter()
                .map(|(id, vehicle)| TripRecord {
                    id: id.to_string(),
                    vehicle_id: Some(vehicle.to_string()),
                    current_position: Some(LngLat {
                        longitude: 78.2,
                        latitude: 20.2,
                    }),
                    ..Default::default()
                })
                .collect(),
        }
    }

    fn recorder(map: &mut FleetMap) -> Arc<Mutex<Vec<Vec<MarkerDelta>>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        map.on_visible_markers_changed(move |change| {
            sink.lock().unwrap().push(change.deltas.to_vec());
        });
        seen
    }

    fn visible_ids(map: &FleetMap) -> Vec<&str> {
        map.visible_markers().iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn test_empty_snapshot_has_no_markers() {
        let mut map = FleetMap::new();
        let report = map.load_snapshot(&Snapshot::default());
        assert_eq!(report.entities, 0);
        assert!(map.visible_markers().is_empty());
        assert!(map.store().is_initialized());
    }

    #[test]
    fn test_snapshot_notifies_with_additions() {
        let mut map = FleetMap::new();
        let seen = recorder(&mut map);
        map.load_snapshot(&snapshot(&["1", "2", "3"], &["1", "2"], &[]));
        assert_eq!(map.visible_markers().len(), 6);
        let calls = seen.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].iter().all(|d| matches!(d, MarkerDelta::Added(_))));
        assert_eq!(calls[0].len(), 6);
    }

    #[test]
    fn test_vehicle_category_keeps_insertion_order() {
        let mut map = FleetMap::new();
        map.load_snapshot(&snapshot(&["3", "1", "2"], &["1"], &[]));
        map.set_filter(Category::Vehicle, "");
        assert_eq!(visible_ids(&map), ["vehicle-3", "vehicle-1", "vehicle-2"]);
    }

    #[test]
    fn test_exclusivity_holds_for_every_trip() {
        let mut map = FleetMap::new();
        map.load_snapshot(&snapshot(&["1", "2", "3"], &[], &[("10", "1"), ("11", "3")]));
        for e in map.visible_markers() {
            if e.kind == EntityKind::Trip {
                let vehicle = e.attr_str(attr::VEHICLE_ID).unwrap();
                assert!(!map.store().contains(&EntityKind::Vehicle.entity_id(vehicle)));
            }
        }
        assert_eq!(visible_ids(&map), ["office", "vehicle-2", "trip-10", "trip-11"]);
    }

    #[test]
    fn test_selection_survives_filter_change() {
        let mut map = FleetMap::new();
        map.load_snapshot(&snapshot(&["1"], &["1"], &[]));
        assert!(map.select_marker("driver-1"));
        map.set_filter(Category::Vehicle, "");
        assert_eq!(map.selection(), Some("driver-1"));
        assert!(map.store().get("driver-1").unwrap().highlighted);
    }

    #[test]
    fn test_selection_cleared_when_reload_omits_entity() {
        let mut map = FleetMap::new();
        map.load_snapshot(&snapshot(&["1", "2"], &[], &[]));
        assert!(map.select_marker("vehicle-2"));
        map.load_snapshot(&snapshot(&["1"], &[], &[]));
        assert_eq!(map.selection(), None);
        assert!(map.visible_markers().iter().all(|e| !e.highlighted));
    }

    #[test]
    fn test_selection_kept_across_reload_is_rehighlighted() {
        let mut map = FleetMap::new();
        map.load_snapshot(&snapshot(&["1", "2"], &[], &[]));
        map.select_marker("vehicle-1");
        map.load_snapshot(&snapshot(&["1"], &[], &[]));
        assert_eq!(map.selection(), Some("vehicle-1"));
        let lit: Vec<&str> = map
            .visible_markers()
            .iter()
            .filter(|e| e.highlighted)
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(lit, ["vehicle-1"]);
    }

    #[test]
    fn test_select_unknown_id_is_refused() {
        let mut map = FleetMap::new();
        map.load_snapshot(&snapshot(&["1"], &[], &[]));
        assert!(!map.select_marker("vehicle-404"));
        assert_eq!(map.selection(), None);
    }

    #[test]
    #[should_panic(expected = "before the first snapshot")]
    fn test_select_before_snapshot_panics() {
        let mut map = FleetMap::new();
        map.select_marker("office");
    }

    #[test]
    fn test_selection_change_notifies_with_highlight_updates() {
        let mut map = FleetMap::new();
        map.load_snapshot(&snapshot(&["1", "2"], &[], &[]));
        let seen = recorder(&mut map);
        map.select_marker("vehicle-1");
        map.select_marker("vehicle-2");
        map.clear_selection();
        let calls = seen.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].len(), 2);
        assert!(calls[1].iter().all(|d| matches!(d, MarkerDelta::Updated(_))));
    }

    #[test]
    fn test_update_outside_visible_set_does_not_notify() {
        let mut map = FleetMap::new();
        map.load_snapshot(&snapshot(&["1"], &["1"], &[]));
        map.set_filter(Category::Office, "");
        let seen = recorder(&mut map);
        let mut patch = Attributes::new();
        patch.insert(attr::STATUS.to_string(), "ON_BREAK".into());
        let outcome = map.apply_push_update(
            EntityKind::Driver,
            "driver-1",
            LngLat {
                longitude: 78.5,
                latitude: 20.5,
            },
            &patch,
        );
        assert_eq!(outcome, Ingest::Updated);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_repeated_identical_event_does_not_notify() {
        let mut map = FleetMap::new();
        map.load_snapshot(&snapshot(&[], &[], &[]));
        let seen = recorder(&mut map);
        let at = LngLat {
            longitude: 10.0,
            latitude: 10.0,
        };
        map.apply_location_update("7", "9", at, Attributes::new());
        let again = map.apply_location_update("7", "9", at, Attributes::new());
        assert_eq!(again, Ingest::Unchanged);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_location_update_starts_trip_for_idle_vehicle() {
        let mut map = FleetMap::new();
        map.load_snapshot(&snapshot(&["1", "2"], &[], &[]));
        let seen = recorder(&mut map);
        map.apply_location_update(
            "2",
            "50",
            LngLat {
                longitude: 78.3,
                latitude: 20.3,
            },
            Attributes::new(),
        );
        assert!(!map.store().contains("vehicle-2"));
        assert!(map.store().contains("trip-50"));
        let calls = seen.lock().unwrap();
        let removed: Vec<&str> = calls[0]
            .iter()
            .filter(|d| matches!(d, MarkerDelta::Removed { .. }))
            .map(MarkerDelta::id)
            .collect();
        assert_eq!(removed, ["vehicle-2"]);
    }

    #[test]
    fn test_poll_samples_use_latest() {
        let mut map = FleetMap::new();
        map.load_snapshot(&snapshot(&["1"], &[], &[]));
        let fix = |lng: f64| PositionSample {
            longitude: Some(lng),
            latitude: Some(20.0),
            ..Default::default()
        };
        map.apply_poll_samples("1", &[fix(78.1), fix(78.9)]);
        assert_eq!(
            map.store().get("vehicle-1").unwrap().position,
            Position::new(78.9, 20.0).unwrap()
        );
        assert_eq!(map.apply_poll_samples("1", &[]), Ingest::Unchanged);
    }

    #[test]
    fn test_category_echo_query_shows_category() {
        let mut map = FleetMap::new();
        map.load_snapshot(&snapshot(&["1"], &["1"], &[]));
        map.set_filter(Category::Driver, "Drivers");
        assert_eq!(visible_ids(&map), ["driver-1"]);
    }
}
