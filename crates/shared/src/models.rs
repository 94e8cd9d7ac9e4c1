use serde::{Deserialize, Serialize};

/// Opaque, kind-specific payload carried by every entity.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Attribute keys the core reads or overwrites. Everything else is passed through.
pub mod attr {
    pub const LIVE_TRACKING: &str = "liveTracking";
    pub const SPEED: &str = "speed";
    pub const COURSE: &str = "course";
    pub const LAST_UPDATE: &str = "lastUpdate";
    pub const STATUS: &str = "status";
    pub const REGISTRATION_NUMBER: &str = "registrationNumber";
    pub const FULL_NAME: &str = "fullName";
    pub const COMPANY_NAME: &str = "companyName";
    pub const CONTACT: &str = "contact";
    pub const ADDRESS: &str = "address";
    pub const VEHICLE_ID: &str = "vehicleId";
    pub const TRACKING_DEVICE_ID: &str = "trackingDeviceId";
}

pub const OFFICE_ID: &str = "office";

/// A WGS84 coordinate. Only constructed through [`Position::new`], so it is always valid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    lng: f64,
    lat: f64,
}

impl Position {
    /// Returns `None` unless both components are finite and in range.
    pub fn new(lng: f64, lat: f64) -> Option<Self> {
        let valid = lng.is_finite()
            && lat.is_finite()
            && (-180.0..=180.0).contains(&lng)
            && (-90.0..=90.0).contains(&lat);
        valid.then_some(Position { lng, lat })
    }

    /// Fold a coordinate that stepped past a pole back over it, then wrap longitude
    /// into range. Input must be finite and at most 180 degrees past a pole.
    pub(crate) fn normalized(lng: f64, lat: f64) -> Self {
        debug_assert!(lng.is_finite() && lat.is_finite());
        let (lng, lat) = if lat > 90.0 {
            (lng + 180.0, 180.0 - lat)
        } else if lat < -90.0 {
            (lng + 180.0, -180.0 - lat)
        } else {
            (lng, lat)
        };
        let lng = if (-180.0..=180.0).contains(&lng) {
            lng
        } else {
            (lng + 180.0).rem_euclid(360.0) - 180.0
        };
        Position {
            lng,
            lat: lat.clamp(-90.0, 90.0),
        }
    }

    /// Build from optional components, as delivered by upstream records.
    pub fn from_parts(lng: Option<f64>, lat: Option<f64>) -> Option<Self> {
        Position::new(lng?, lat?)
    }

    pub fn lng(&self) -> f64 {
        self.lng
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    /// Planar distance in degrees. Only meaningful for the small offsets used by ring placement.
    pub fn degrees_to(&self, other: Position) -> f64 {
        let dx = other.lng - self.lng;
        let dy = other.lat - self.lat;
        (dx * dx + dy * dy).sqrt()
    }
}

impl<'de> Deserialize<'de> for Position {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            lng: f64,
            lat: f64,
        }
        let raw = Raw::deserialize(deserializer)?;
        Position::new(raw.lng, raw.lat).ok_or_else(|| {
            serde::de::Error::custom(format!("coordinate out of range: ({}, {})", raw.lng, raw.lat))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Office,
    Vehicle,
    Driver,
    Trip,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Office,
        EntityKind::Vehicle,
        EntityKind::Driver,
        EntityKind::Trip,
    ];

    /// Namespaced entity id for a raw upstream id.
    pub fn entity_id(&self, raw_id: &str) -> String {
        match self {
            EntityKind::Office => OFFICE_ID.to_string(),
            EntityKind::Vehicle => format!("vehicle-{}", raw_id),
            EntityKind::Driver => format!("driver-{}", raw_id),
            EntityKind::Trip => format!("trip-{}", raw_id),
        }
    }

    /// Label used when upstream supplies nothing usable.
    pub fn default_label(&self) -> &'static str {
        match self {
            EntityKind::Office => "Office",
            EntityKind::Vehicle => "Vehicle",
            EntityKind::Driver => "Driver",
            EntityKind::Trip => "Trip",
        }
    }

    /// Category name as shown in the map legend.
    pub fn category_name(&self) -> &'static str {
        match self {
            EntityKind::Office => "Office",
            EntityKind::Vehicle => "Vehicles",
            EntityKind::Driver => "Drivers",
            EntityKind::Trip => "Trips",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Office => write!(f, "office"),
            EntityKind::Vehicle => write!(f, "vehicle"),
            EntityKind::Driver => write!(f, "driver"),
            EntityKind::Trip => write!(f, "trip"),
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "office" => Ok(EntityKind::Office),
            "vehicle" => Ok(EntityKind::Vehicle),
            "driver" => Ok(EntityKind::Driver),
            "trip" => Ok(EntityKind::Trip),
            other => Err(format!("unknown entity kind: {}", other)),
        }
    }
}

/// Entities sharing a group are spread on a ring around the office.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementGroup {
    IdleAtOffice,
    DriversAtOffice,
}

impl PlacementGroup {
    pub const ALL: [PlacementGroup; 2] = [PlacementGroup::IdleAtOffice, PlacementGroup::DriversAtOffice];

    pub fn key(&self) -> &'static str {
        match self {
            PlacementGroup::IdleAtOffice => "idle-at-office",
            PlacementGroup::DriversAtOffice => "drivers-at-office",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    pub kind: EntityKind,
    pub position: Position,
    pub label: String,
    pub attributes: Attributes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement_group: Option<PlacementGroup>,
    /// Display-only selection highlight.
    #[serde(default)]
    pub highlighted: bool,
}

impl Entity {
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

/// Pick the first non-blank candidate, falling back to the kind's default label.
pub fn label_or_default<'a>(
    kind: EntityKind,
    candidates: impl IntoIterator<Item = Option<&'a str>>,
) -> String {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or(kind.default_label())
        .to_string()
}

// Upstream records

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficeLocation {
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub company_name: Option<String>,
    pub address: Option<String>,
    pub contact: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleRecord {
    pub id: String,
    pub registration_number: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub live_tracking: bool,
    pub tracking_device_id: Option<String>,
    #[serde(flatten)]
    pub extra: Attributes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverRecord {
    pub id: String,
    pub full_name: Option<String>,
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Attributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    #[serde(alias = "lng")]
    pub longitude: f64,
    #[serde(alias = "lat")]
    pub latitude: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripRecord {
    pub id: String,
    pub vehicle_id: Option<String>,
    pub status: Option<String>,
    pub current_position: Option<LngLat>,
    #[serde(flatten)]
    pub extra: Attributes,
}

/// Everything the one-shot REST fetch returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub office: Option<OfficeLocation>,
    #[serde(default)]
    pub vehicles: Vec<VehicleRecord>,
    #[serde(default)]
    pub drivers: Vec<DriverRecord>,
    #[serde(default)]
    pub trips: Vec<TripRecord>,
}

/// One raw fix from the external tracking provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSample {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub altitude: Option<f64>,
    #[serde(default)]
    pub valid: bool,
    pub device_id: Option<i64>,
    pub fix_time: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

// Filter state

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    None,
    Office,
    Vehicle,
    Driver,
    Trip,
}

impl Category {
    pub fn admits(&self, kind: EntityKind) -> bool {
        match self {
            Category::None => true,
            Category::Office => kind == EntityKind::Office,
            Category::Vehicle => kind == EntityKind::Vehicle,
            Category::Driver => kind == EntityKind::Driver,
            Category::Trip => kind == EntityKind::Trip,
        }
    }
}

impl From<EntityKind> for Category {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Office => Category::Office,
            EntityKind::Vehicle => Category::Vehicle,
            EntityKind::Driver => Category::Driver,
            EntityKind::Trip => Category::Trip,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterState {
    pub active_category: Category,
    pub query: String,
}

impl FilterState {
    pub fn new(active_category: Category, query: impl Into<String>) -> Self {
        FilterState {
            active_category,
            query: query.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_rejects_nan() {
        assert!(Position::new(f64::NAN, 10.0).is_none());
        assert!(Position::new(10.0, f64::INFINITY).is_none());
    }

    #[test]
    fn test_position_rejects_out_of_range() {
        assert!(Position::new(180.5, 0.0).is_none());
        assert!(Position::new(0.0, -90.1).is_none());
        assert!(Position::new(-180.0, 90.0).is_some());
    }

    #[test]
    fn test_position_from_parts_requires_both() {
        assert!(Position::from_parts(Some(1.0), None).is_none());
        assert!(Position::from_parts(None, Some(1.0)).is_none());
        let p = Position::from_parts(Some(78.0), Some(20.0)).unwrap();
        assert!((p.lng() - 78.0).abs() < 1e-9);
        assert!((p.lat() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_position_deserialize_validates() {
        let ok: Position = serde_json::from_str(r#"{"lng": 10.0, "lat": 10.0}"#).unwrap();
        assert_eq!(ok, Position::new(10.0, 10.0).unwrap());
        assert!(serde_json::from_str::<Position>(r#"{"lng": 200.0, "lat": 10.0}"#).is_err());
    }

    #[test]
    fn test_entity_ids_are_namespaced() {
        assert_eq!(EntityKind::Office.entity_id("ignored"), "office");
        assert_eq!(EntityKind::Vehicle.entity_id("7"), "vehicle-7");
        assert_eq!(EntityKind::Driver.entity_id("a"), "driver-a");
        assert_eq!(EntityKind::Trip.entity_id("9"), "trip-9");
    }

    #[test]
    fn test_label_falls_back_to_kind_default() {
        assert_eq!(label_or_default(EntityKind::Driver, [None, Some("  ")]), "Driver");
        assert_eq!(
            label_or_default(EntityKind::Vehicle, [Some(""), Some("MH12 AB 1234")]),
            "MH12 AB 1234"
        );
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.to_string().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("truck".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_category_none_admits_everything() {
        for kind in EntityKind::ALL {
            assert!(Category::None.admits(kind));
            assert!(Category::from(kind).admits(kind));
        }
        assert!(!Category::Vehicle.admits(EntityKind::Driver));
    }

    #[test]
    fn test_vehicle_record_keeps_unknown_fields() {
        let json = r#"{"id": "5", "registrationNumber": "KA01", "liveTracking": true, "make": "Tata"}"#;
        let v: VehicleRecord = serde_json::from_str(json).unwrap();
        assert!(v.live_tracking);
        assert_eq!(v.registration_number.as_deref(), Some("KA01"));
        assert_eq!(v.extra.get("make").and_then(|m| m.as_str()), Some("Tata"));
    }

    #[test]
    fn test_trip_position_accepts_short_keys() {
        let json = r#"{"trips": [
            {"id": "9", "vehicleId": "2", "currentPosition": {"lng": 78.1, "lat": 20.1}},
            {"id": "10", "currentPosition": {"longitude": 78.2, "latitude": 20.2}}
        ]}"#;
        let s: Snapshot = serde_json::from_str(json).unwrap();
        let first = s.trips[0].current_position.unwrap();
        assert!((first.longitude - 78.1).abs() < 1e-9);
        assert!((first.latitude - 20.1).abs() < 1e-9);
        assert!((s.trips[1].current_position.unwrap().latitude - 20.2).abs() < 1e-9);
    }

    #[test]
    fn test_normalized_reflects_over_the_pole() {
        let p = Position::normalized(10.0, 90.5);
        assert!((p.lat() - 89.5).abs() < 1e-9);
        assert!((p.lng() - -170.0).abs() < 1e-9);
        let q = Position::normalized(0.0, -90.25);
        assert!((q.lat() - -89.75).abs() < 1e-9);
        assert!((q.lng() - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_defaults_missing_lists() {
        let s: Snapshot = serde_json::from_str(r#"{"office": null}"#).unwrap();
        assert!(s.office.is_none());
        assert!(s.vehicles.is_empty() && s.drivers.is_empty() && s.trips.is_empty());
    }
}
