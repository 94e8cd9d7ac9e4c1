use std::collections::HashMap;
use std::f64::consts::{PI, TAU};

use crate::models::{PlacementGroup, Position};

/// Ring radius in degrees for vehicles parked at the office (~45m at the equator).
pub const VEHICLE_RING_RADIUS: f64 = 0.0004;

/// Ring radius in degrees for drivers at the office. Must differ from the vehicle ring.
pub const DRIVER_RING_RADIUS: f64 = 0.0007;

/// Offset pattern for one placement group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ring {
    pub radius: f64,
    /// Rotation of index 0, in radians.
    pub phase: f64,
}

impl Ring {
    pub fn for_group(group: PlacementGroup) -> Ring {
        match group {
            PlacementGroup::IdleAtOffice => Ring {
                radius: VEHICLE_RING_RADIUS,
                phase: 0.0,
            },
            // Rotated half a turn so small populations separate visually.
            PlacementGroup::DriversAtOffice => Ring {
                radius: DRIVER_RING_RADIUS,
                phase: PI,
            },
        }
    }
}

/// Coordinate of member `index` out of `count` on `ring` around `anchor`.
///
/// The radius is always applied, so even a lone member never sits on the anchor itself.
pub fn ring_position(anchor: Position, ring: Ring, index: usize, count: usize) -> Position {
    let angle = TAU * index as f64 / count as f64 + ring.phase;
    Position::normalized(
        anchor.lng() + ring.radius * angle.cos(),
        anchor.lat() + ring.radius * angle.sin(),
    )
}

/// Positions for `count` members, in member order. Empty for `count == 0`.
pub fn ring_positions(anchor: Position, ring: Ring, count: usize) -> Vec<Position> {
    (0..count)
        .map(|i| ring_position(anchor, ring, i, count))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
struct GroupLayout {
    anchor: Position,
    members: Vec<String>,
}

/// Remembers the last layout of each group so unchanged groups are never re-placed.
///
/// Members are ordered by id rather than by arrival, so the ring slot an entity
/// occupies depends only on who is in the group.
#[derive(Debug, Clone, Default)]
pub struct PlacementResolver {
    layouts: HashMap<PlacementGroup, GroupLayout>,
    runs: u64,
}

impl PlacementResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `(id, position)` assignments when the group needs re-placing, `None` when
    /// the anchor and membership match the previous layout.
    pub fn resolve(
        &mut self,
        group: PlacementGroup,
        anchor: Position,
        mut members: Vec<String>,
    ) -> Option<Vec<(String, Position)>> {
        members.sort();
        members.dedup();
        let layout = GroupLayout { anchor, members };
        if self.layouts.get(&group) == Some(&layout) {
            return None;
        }

        let ring = Ring::for_group(group);
        let count = layout.members.len();
        let assignments: Vec<(String, Position)> = layout
            .members
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), ring_position(anchor, ring, i, count)))
            .collect();
        self.layouts.insert(group, layout);

        if assignments.is_empty() {
            return None;
        }
        self.runs += 1;
        Some(assignments)
    }

    /// Forget all layouts; the next `resolve` for every group will place from scratch.
    pub fn reset(&mut self) {
        self.layouts.clear();
    }

    /// Number of placement passes that produced assignments.
    pub fn runs(&self) -> u64 {
        self.runs
    }
}
