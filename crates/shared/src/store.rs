use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::models::{
    attr, label_or_default, Attributes, DriverRecord, Entity, EntityKind, LngLat, OfficeLocation,
    PlacementGroup, Position, PositionSample, Snapshot, TripRecord, VehicleRecord, OFFICE_ID,
};
use crate::placement::PlacementResolver;

/// Outcome of a single incremental update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    Created,
    Updated,
    /// The update carried nothing new.
    Unchanged,
    Rejected(RejectReason),
}

impl Ingest {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Ingest::Rejected(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Missing, non-finite or out-of-range coordinates.
    InvalidPosition,
    /// The id is not namespaced for the kind it was sent with.
    IdKindMismatch,
}

/// Counts produced by a snapshot load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotReport {
    pub entities: usize,
    /// Vehicles and drivers waiting for an office to be placed around.
    pub held: usize,
    /// Vehicles left out because an active trip represents them.
    pub vehicles_on_trip: usize,
    /// Trips without a usable current position.
    pub trips_dropped: usize,
    pub duplicates: usize,
}

/// A vehicle the external provider should be polled for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedVehicle {
    pub vehicle_id: String,
    pub device_id: String,
}

/// An entity that needs ring placement but has no office to anchor to yet.
#[derive(Debug, Clone, PartialEq)]
struct HeldEntity {
    id: String,
    kind: EntityKind,
    label: String,
    attributes: Attributes,
    group: PlacementGroup,
}

impl HeldEntity {
    fn place_at(self, anchor: Position) -> Entity {
        Entity {
            id: self.id,
            kind: self.kind,
            position: anchor,
            label: self.label,
            attributes: self.attributes,
            placement_group: Some(self.group),
            highlighted: false,
        }
    }
}

/// The canonical entity set. All mutation of map entities goes through here.
#[derive(Debug, Default)]
pub struct MarkerStore {
    entities: Vec<Entity>,
    index: HashMap<String, usize>,
    held: Vec<HeldEntity>,
    /// Raw vehicle id -> raw trip id, for every trip currently known.
    trip_vehicles: HashMap<String, String>,
    tracked: Vec<TrackedVehicle>,
    placement: PlacementResolver,
    version: u64,
    rejected: u64,
    initialized: bool,
}

impl MarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entities in insertion order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.index.get(id).map(|&i| &self.entities[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Number of entities waiting for an office anchor.
    pub fn held_len(&self) -> usize {
        self.held.len()
    }

    /// Bumped on every change to the entity set.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Total updates rejected as malformed since construction.
    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    /// True once a snapshot has been loaded.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn office_position(&self) -> Option<Position> {
        self.get(OFFICE_ID).map(|e| e.position)
    }

    pub fn tracked_vehicles(&self) -> &[TrackedVehicle] {
        &self.tracked
    }

    /// Number of placement passes run so far.
    pub fn placement_runs(&self) -> u64 {
        self.placement.runs()
    }

    pub fn count_by_kind(&self, kind: EntityKind) -> usize {
        self.entities.iter().filter(|e| e.kind == kind).count()
    }

    /// Replace the whole entity set from a REST snapshot.
    pub fn load_snapshot(&mut self, snapshot: &Snapshot) -> SnapshotReport {
        let mut report = SnapshotReport::default();
        let mut entities: Vec<Entity> = Vec::new();
        let mut held: Vec<HeldEntity> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let anchor = snapshot.office.as_ref().and_then(|office| {
            let position = Position::from_parts(office.longitude, office.latitude)?;
            seen.insert(OFFICE_ID.to_string());
            entities.push(office_entity(office, position));
            Some(position)
        });

        let trip_vehicles: HashMap<String, String> = snapshot
            .trips
            .iter()
            .filter_map(|t| Some((t.vehicle_id.clone()?, t.id.clone())))
            .collect();

        let mut grouped: Vec<HeldEntity> = Vec::new();
        for vehicle in &snapshot.vehicles {
            if trip_vehicles.contains_key(&vehicle.id) {
                report.vehicles_on_trip += 1;
                continue;
            }
            grouped.push(vehicle_entity(vehicle));
        }
        grouped.extend(snapshot.drivers.iter().map(driver_entity));

        for member in grouped {
            if !seen.insert(member.id.clone()) {
                report.duplicates += 1;
                continue;
            }
            match anchor {
                Some(anchor) => entities.push(member.place_at(anchor)),
                None => held.push(member),
            }
        }

        for trip in &snapshot.trips {
            let Some(entity) = trip_entity(trip) else {
                report.trips_dropped += 1;
                continue;
            };
            if !seen.insert(entity.id.clone()) {
                report.duplicates += 1;
                continue;
            }
            entities.push(entity);
        }

        let tracked = snapshot
            .vehicles
            .iter()
            .filter(|v| v.live_tracking)
            .filter_map(|v| {
                Some(TrackedVehicle {
                    vehicle_id: v.id.clone(),
                    device_id: v.tracking_device_id.clone()?,
                })
            })
            .collect();

        let previous = std::mem::take(&mut self.entities);
        let previous_held = std::mem::take(&mut self.held);
        self.entities = entities;
        self.held = held;
        self.trip_vehicles = trip_vehicles;
        self.tracked = tracked;
        self.initialized = true;
        self.reindex();
        self.placement.reset();
        self.relayout();

        if self.entities != previous || self.held != previous_held {
            self.version += 1;
        }

        report.entities = self.entities.len();
        report.held = self.held.len();
        report
    }

    /// Upsert an entity from a push event. `id` must already be namespaced for `kind`.
    ///
    /// A vehicle that an active trip represents updates that trip instead.
    pub fn apply_push_update(
        &mut self,
        kind: EntityKind,
        id: &str,
        position: LngLat,
        patch: &Attributes,
    ) -> Ingest {
        if !id_matches_kind(kind, id) {
            return self.reject(RejectReason::IdKindMismatch);
        }
        let Some(position) = Position::new(position.longitude, position.latitude) else {
            return self.reject(RejectReason::InvalidPosition);
        };
        let mut patch = patch.clone();
        let (kind, id) = match kind {
            EntityKind::Trip => {
                if let Some(vehicle_id) = patch.get(attr::VEHICLE_ID).and_then(Value::as_str) {
                    let trip_id = id.trim_start_matches("trip-");
                    self.assign_trip(vehicle_id, trip_id);
                }
                (kind, id.to_string())
            }
            EntityKind::Vehicle => {
                let vehicle_id = id.trim_start_matches("vehicle-");
                match self.trip_vehicles.get(vehicle_id) {
                    Some(trip_id) => {
                        let trip = EntityKind::Trip.entity_id(trip_id);
                        patch.insert(attr::VEHICLE_ID.to_string(), Value::from(vehicle_id));
                        (EntityKind::Trip, trip)
                    }
                    None => (kind, id.to_string()),
                }
            }
            _ => (kind, id.to_string()),
        };
        let outcome = self.upsert_absolute(kind, &id, position, &patch);
        let outcome = if kind == EntityKind::Office {
            self.anchor_held(position, outcome)
        } else {
            outcome
        };
        self.finish(outcome)
    }

    /// Upsert the office entity. A moved office re-places every ring around it.
    pub fn apply_office_update(&mut self, office: &OfficeLocation) -> Ingest {
        let Some(position) = Position::from_parts(office.longitude, office.latitude) else {
            return self.reject(RejectReason::InvalidPosition);
        };
        let fresh = office_entity(office, position);
        let outcome = match self.index.get(OFFICE_ID).copied() {
            Some(i) => {
                let entity = &mut self.entities[i];
                let before = entity.clone();
                entity.position = position;
                merge_attributes(&mut entity.attributes, &fresh.attributes);
                if office.company_name.as_deref().is_some_and(|n| !n.trim().is_empty()) {
                    entity.label = fresh.label;
                }
                if *entity == before {
                    Ingest::Unchanged
                } else {
                    Ingest::Updated
                }
            }
            None => {
                self.push_entity(fresh);
                Ingest::Created
            }
        };
        let outcome = self.anchor_held(position, outcome);
        self.finish(outcome)
    }

    /// Upsert from one external GPS fix for `vehicle_id` (raw id).
    ///
    /// A vehicle that is the subject of an active trip updates the trip entity instead,
    /// so the vehicle never shows up twice.
    pub fn apply_poll_update(&mut self, vehicle_id: &str, sample: &PositionSample) -> Ingest {
        let Some(position) = Position::from_parts(sample.longitude, sample.latitude) else {
            return self.reject(RejectReason::InvalidPosition);
        };

        let mut patch = Attributes::new();
        patch.insert(attr::LIVE_TRACKING.to_string(), Value::Bool(true));
        if let Some(speed) = sample.speed.filter(|s| s.is_finite()) {
            patch.insert(attr::SPEED.to_string(), Value::from(speed));
        }
        if let Some(course) = sample.course.filter(|c| c.is_finite()) {
            patch.insert(attr::COURSE.to_string(), Value::from(course));
        }
        if let Some(fix_time) = &sample.fix_time {
            patch.insert(attr::LAST_UPDATE.to_string(), Value::from(fix_time.clone()));
        }

        let (kind, id) = match self.trip_vehicles.get(vehicle_id) {
            Some(trip_id) => {
                patch.insert(attr::VEHICLE_ID.to_string(), Value::from(vehicle_id));
                (EntityKind::Trip, EntityKind::Trip.entity_id(trip_id))
            }
            None => (EntityKind::Vehicle, EntityKind::Vehicle.entity_id(vehicle_id)),
        };
        let outcome = self.upsert_absolute(kind, &id, position, &patch);
        self.finish(outcome)
    }

    /// Mark `id` as highlighted and clear every other highlight. Display only.
    pub fn set_highlight(&mut self, id: Option<&str>) {
        let mut changed = false;
        for entity in &mut self.entities {
            let want = Some(entity.id.as_str()) == id;
            if entity.highlighted != want {
                entity.highlighted = want;
                changed = true;
            }
        }
        if changed {
            self.version += 1;
        }
    }

    fn reject(&mut self, reason: RejectReason) -> Ingest {
        self.rejected += 1;
        Ingest::Rejected(reason)
    }

    /// Re-place rings if membership moved, and bump the version if anything changed.
    fn finish(&mut self, outcome: Ingest) -> Ingest {
        let moved = self.relayout();
        let outcome = match outcome {
            Ingest::Unchanged if moved => Ingest::Updated,
            other => other,
        };
        if matches!(outcome, Ingest::Created | Ingest::Updated) {
            self.version += 1;
        }
        outcome
    }

    /// Upsert an entity whose position is authoritative: it leaves any placement group.
    fn upsert_absolute(
        &mut self,
        kind: EntityKind,
        id: &str,
        position: Position,
        patch: &Attributes,
    ) -> Ingest {
        let suppressed = self.suppress_vehicle_on_trip(kind, patch);

        if let Some(&i) = self.index.get(id) {
            let entity = &mut self.entities[i];
            let before = entity.clone();
            entity.position = position;
            entity.placement_group = None;
            merge_attributes(&mut entity.attributes, patch);
            entity.label = derive_label(kind, &entity.attributes, Some(&entity.label));
            return if *entity == before && !suppressed {
                Ingest::Unchanged
            } else {
                Ingest::Updated
            };
        }

        let entity = match self.held.iter().position(|h| h.id == id) {
            Some(i) => {
                let held = self.held.remove(i);
                let mut entity = held.place_at(position);
                entity.placement_group = None;
                merge_attributes(&mut entity.attributes, patch);
                entity.label = derive_label(kind, &entity.attributes, Some(&entity.label));
                entity
            }
            None => Entity {
                id: id.to_string(),
                kind,
                position,
                label: derive_label(kind, patch, None),
                attributes: patch.clone(),
                placement_group: None,
                highlighted: false,
            },
        };
        self.push_entity(entity);
        Ingest::Created
    }

    /// A trip update naming a vehicle takes over that vehicle's marker.
    fn suppress_vehicle_on_trip(&mut self, kind: EntityKind, patch: &Attributes) -> bool {
        if kind != EntityKind::Trip {
            return false;
        }
        let Some(vehicle_id) = patch.get(attr::VEHICLE_ID).and_then(Value::as_str) else {
            return false;
        };
        let vehicle_entity_id = EntityKind::Vehicle.entity_id(vehicle_id);
        let held_before = self.held.len();
        self.held.retain(|h| h.id != vehicle_entity_id);
        let mut removed = self.held.len() != held_before;
        if let Some(i) = self.index.get(&vehicle_entity_id).copied() {
            self.entities.remove(i);
            self.reindex();
            removed = true;
        }
        removed
    }

    /// Point `vehicle_id` at `trip_id`, dropping the vehicle the trip used to name.
    fn assign_trip(&mut self, vehicle_id: &str, trip_id: &str) {
        self.trip_vehicles
            .retain(|vehicle, trip| trip != trip_id || vehicle == vehicle_id);
        self.trip_vehicles
            .insert(vehicle_id.to_string(), trip_id.to_string());
    }

    /// Release held members around a freshly placed office.
    fn anchor_held(&mut self, anchor: Position, outcome: Ingest) -> Ingest {
        let released = self.release_held(anchor);
        if released && outcome == Ingest::Unchanged {
            Ingest::Updated
        } else {
            outcome
        }
    }

    /// Move held entities onto the map once an anchor exists.
    fn release_held(&mut self, anchor: Position) -> bool {
        if self.held.is_empty() {
            return false;
        }
        for held in std::mem::take(&mut self.held) {
            self.push_entity(held.place_at(anchor));
        }
        true
    }

    /// Run placement for every group; returns true if any entity moved.
    fn relayout(&mut self) -> bool {
        let Some(anchor) = self.office_position() else {
            return false;
        };
        let mut moved = false;
        for group in PlacementGroup::ALL {
            let members: Vec<String> = self
                .entities
                .iter()
                .filter(|e| e.placement_group == Some(group))
                .map(|e| e.id.clone())
                .collect();
            let Some(assignments) = self.placement.resolve(group, anchor, members) else {
                continue;
            };
            for (id, position) in assignments {
                if let Some(&i) = self.index.get(&id) {
                    if self.entities[i].position != position {
                        self.entities[i].position = position;
                        moved = true;
                    }
                }
            }
        }
        moved
    }

    fn push_entity(&mut self, entity: Entity) {
        self.index.insert(entity.id.clone(), self.entities.len());
        self.entities.push(entity);
    }

    fn reindex(&mut self) {
        self.index = self
            .entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();
    }
}

fn id_matches_kind(kind: EntityKind, id: &str) -> bool {
    match kind {
        EntityKind::Office => id == OFFICE_ID,
        EntityKind::Vehicle => id.strip_prefix("vehicle-").is_some_and(|r| !r.is_empty()),
        EntityKind::Driver => id.strip_prefix("driver-").is_some_and(|r| !r.is_empty()),
        EntityKind::Trip => id.strip_prefix("trip-").is_some_and(|r| !r.is_empty()),
    }
}

fn merge_attributes(target: &mut Attributes, patch: &Attributes) {
    for (key, value) in patch {
        target.insert(key.clone(), value.clone());
    }
}

/// Label from the kind's identity field, keeping `current` over the generic default.
fn derive_label(kind: EntityKind, attributes: &Attributes, current: Option<&str>) -> String {
    let key = match kind {
        EntityKind::Office => attr::COMPANY_NAME,
        EntityKind::Vehicle | EntityKind::Trip => attr::REGISTRATION_NUMBER,
        EntityKind::Driver => attr::FULL_NAME,
    };
    label_or_default(kind, [attributes.get(key).and_then(Value::as_str), current])
}

fn insert_opt(attributes: &mut Attributes, key: &str, value: Option<&String>) {
    if let Some(v) = value {
        attributes.insert(key.to_string(), Value::from(v.clone()));
    }
}

fn office_entity(office: &OfficeLocation, position: Position) -> Entity {
    let mut attributes = Attributes::new();
    insert_opt(&mut attributes, attr::COMPANY_NAME, office.company_name.as_ref());
    insert_opt(&mut attributes, attr::ADDRESS, office.address.as_ref());
    insert_opt(&mut attributes, attr::CONTACT, office.contact.as_ref());
    Entity {
        id: OFFICE_ID.to_string(),
        kind: EntityKind::Office,
        position,
        label: label_or_default(EntityKind::Office, [office.company_name.as_deref()]),
        attributes,
        placement_group: None,
        highlighted: false,
    }
}

fn vehicle_entity(vehicle: &VehicleRecord) -> HeldEntity {
    let mut attributes = vehicle.extra.clone();
    insert_opt(&mut attributes, attr::REGISTRATION_NUMBER, vehicle.registration_number.as_ref());
    insert_opt(&mut attributes, attr::STATUS, vehicle.status.as_ref());
    insert_opt(&mut attributes, attr::TRACKING_DEVICE_ID, vehicle.tracking_device_id.as_ref());
    attributes.insert(attr::LIVE_TRACKING.to_string(), Value::Bool(vehicle.live_tracking));
    HeldEntity {
        id: EntityKind::Vehicle.entity_id(&vehicle.id),
        kind: EntityKind::Vehicle,
        label: label_or_default(EntityKind::Vehicle, [vehicle.registration_number.as_deref()]),
        attributes,
        group: PlacementGroup::IdleAtOffice,
    }
}

fn driver_entity(driver: &DriverRecord) -> HeldEntity {
    let mut attributes = driver.extra.clone();
    insert_opt(&mut attributes, attr::FULL_NAME, driver.full_name.as_ref());
    insert_opt(&mut attributes, attr::STATUS, driver.status.as_ref());
    HeldEntity {
        id: EntityKind::Driver.entity_id(&driver.id),
        kind: EntityKind::Driver,
        label: label_or_default(EntityKind::Driver, [driver.full_name.as_deref()]),
        attributes,
        group: PlacementGroup::DriversAtOffice,
    }
}

fn trip_entity(trip: &TripRecord) -> Option<Entity> {
    let current = trip.current_position?;
    let position = Position::new(current.longitude, current.latitude)?;
    let mut attributes = trip.extra.clone();
    insert_opt(&mut attributes, attr::VEHICLE_ID, trip.vehicle_id.as_ref());
    insert_opt(&mut attributes, attr::STATUS, trip.status.as_ref());
    let label = derive_label(EntityKind::Trip, &attributes, None);
    Some(Entity {
        id: EntityKind::Trip.entity_id(&trip.id),
        kind: EntityKind::Trip,
        position,
        label,
        attributes,
        placement_group: None,
        highlighted: false,
    })
}
