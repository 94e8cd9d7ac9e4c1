use async_graphql::{Context, Enum, InputObject, Json, Object, SimpleObject};
use fleetmap_shared::models::{
    Attributes, Category, Entity, EntityKind, FilterState, LngLat, OfficeLocation,
};
use fleetmap_shared::SnapshotReport;

use crate::push::{LocationUpdate, PushHub};
use crate::service::{MapHandle, MapStats};

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(name = "Category")]
pub enum GqlCategory {
    None,
    Office,
    Vehicle,
    Driver,
    Trip,
}

impl From<Category> for GqlCategory {
    fn from(c: Category) -> Self {
        match c {
            Category::None => GqlCategory::None,
            Category::Office => GqlCategory::Office,
            Category::Vehicle => GqlCategory::Vehicle,
            Category::Driver => GqlCategory::Driver,
            Category::Trip => GqlCategory::Trip,
        }
    }
}

impl From<GqlCategory> for Category {
    fn from(c: GqlCategory) -> Self {
        match c {
            GqlCategory::None => Category::None,
            GqlCategory::Office => Category::Office,
            GqlCategory::Vehicle => Category::Vehicle,
            GqlCategory::Driver => Category::Driver,
            GqlCategory::Trip => Category::Trip,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(name = "EntityKind")]
pub enum GqlEntityKind {
    Office,
    Vehicle,
    Driver,
    Trip,
}

impl From<EntityKind> for GqlEntityKind {
    fn from(k: EntityKind) -> Self {
        match k {
            EntityKind::Office => GqlEntityKind::Office,
            EntityKind::Vehicle => GqlEntityKind::Vehicle,
            EntityKind::Driver => GqlEntityKind::Driver,
            EntityKind::Trip => GqlEntityKind::Trip,
        }
    }
}

// GraphQL output types

#[derive(SimpleObject)]
#[graphql(name = "Marker")]
pub struct GqlMarker {
    pub id: String,
    pub kind: GqlEntityKind,
    pub lng: f64,
    pub lat: f64,
    pub label: String,
    pub attributes: Json<Attributes>,
    pub placement_group: Option<String>,
    pub highlighted: bool,
}

impl From<Entity> for GqlMarker {
    fn from(e: Entity) -> Self {
        GqlMarker {
            lng: e.position.lng(),
            lat: e.position.lat(),
            kind: e.kind.into(),
            placement_group: e.placement_group.map(|g| g.key().to_string()),
            id: e.id,
            label: e.label,
            attributes: Json(e.attributes),
            highlighted: e.highlighted,
        }
    }
}

#[derive(SimpleObject)]
#[graphql(name = "Filter")]
pub struct GqlFilter {
    pub category: GqlCategory,
    pub query: String,
}

impl From<FilterState> for GqlFilter {
    fn from(f: FilterState) -> Self {
        GqlFilter {
            category: f.active_category.into(),
            query: f.query,
        }
    }
}

#[derive(SimpleObject)]
#[graphql(name = "Stats")]
pub struct GqlStats {
    pub offices: u64,
    pub vehicles: u64,
    pub drivers: u64,
    pub trips: u64,
    pub held: u64,
    pub tracked_vehicles: u64,
    pub rejected_samples: u64,
    pub store_version: u64,
    pub last_snapshot_at: Option<String>,
}

impl From<MapStats> for GqlStats {
    fn from(s: MapStats) -> Self {
        GqlStats {
            offices: s.offices as u64,
            vehicles: s.vehicles as u64,
            drivers: s.drivers as u64,
            trips: s.trips as u64,
            held: s.held as u64,
            tracked_vehicles: s.tracked_vehicles as u64,
            rejected_samples: s.rejected_samples,
            store_version: s.store_version,
            last_snapshot_at: s.last_snapshot_at,
        }
    }
}

#[derive(SimpleObject)]
#[graphql(name = "SnapshotReport")]
pub struct GqlSnapshotReport {
    pub entities: u64,
    pub held: u64,
    pub vehicles_on_trip: u64,
    pub trips_dropped: u64,
    pub duplicates: u64,
}

impl From<SnapshotReport> for GqlSnapshotReport {
    fn from(r: SnapshotReport) -> Self {
        GqlSnapshotReport {
            entities: r.entities as u64,
            held: r.held as u64,
            vehicles_on_trip: r.vehicles_on_trip as u64,
            trips_dropped: r.trips_dropped as u64,
            duplicates: r.duplicates as u64,
        }
    }
}

// Input types

#[derive(InputObject)]
pub struct OfficeUpdateInput {
    pub longitude: f64,
    pub latitude: f64,
    pub company_name: Option<String>,
    pub address: Option<String>,
    pub contact: Option<String>,
}

#[derive(InputObject)]
pub struct LocationUpdateInput {
    pub vehicle_id: String,
    pub trip_id: String,
    pub longitude: f64,
    pub latitude: f64,
    /// RFC 3339; stored as the trip's `lastUpdate`.
    pub timestamp: Option<String>,
}

// Query root

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// The visible marker list, after filtering.
    async fn markers(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<GqlMarker>> {
        let handle = ctx.data::<MapHandle>()?;
        let view = handle.view().await.map_err(|e| async_graphql::Error::new(e.to_string()))?;
        Ok(view.markers.into_iter().map(GqlMarker::from).collect())
    }

    async fn selection(&self, ctx: &Context<'_>) -> async_graphql::Result<Option<String>> {
        let handle = ctx.data::<MapHandle>()?;
        let view = handle.view().await.map_err(|e| async_graphql::Error::new(e.to_string()))?;
        Ok(view.selection)
    }

    async fn filter(&self, ctx: &Context<'_>) -> async_graphql::Result<GqlFilter> {
        let handle = ctx.data::<MapHandle>()?;
        let view = handle.view().await.map_err(|e| async_graphql::Error::new(e.to_string()))?;
        Ok(view.filter.into())
    }

    /// Bumps every time the visible list changes; poll this to know when to refetch.
    async fn markers_version(&self, ctx: &Context<'_>) -> async_graphql::Result<u64> {
        let handle = ctx.data::<MapHandle>()?;
        Ok(handle.visible_revision())
    }

    async fn stats(&self, ctx: &Context<'_>) -> async_graphql::Result<GqlStats> {
        let handle = ctx.data::<MapHandle>()?;
        let view = handle.view().await.map_err(|e| async_graphql::Error::new(e.to_string()))?;
        Ok(view.stats.into())
    }
}

// Mutation root

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    async fn set_filter(
        &self,
        ctx: &Context<'_>,
        category: GqlCategory,
        query: Option<String>,
    ) -> async_graphql::Result<GqlFilter> {
        let handle = ctx.data::<MapHandle>()?;
        let filter = handle
            .set_filter(category.into(), query.unwrap_or_default())
            .await
            .map_err(|e| async_graphql::Error::new(e.to_string()))?;
        Ok(filter.into())
    }

    /// Returns false when no entity has this id.
    async fn select_marker(&self, ctx: &Context<'_>, id: String) -> async_graphql::Result<bool> {
        let handle = ctx.data::<MapHandle>()?;
        handle.select(id).await.map_err(|e| async_graphql::Error::new(e.to_string()))
    }

    async fn clear_selection(&self, ctx: &Context<'_>) -> async_graphql::Result<bool> {
        let handle = ctx.data::<MapHandle>()?;
        handle
            .clear_selection()
            .await
            .map_err(|e| async_graphql::Error::new(e.to_string()))?;
        Ok(true)
    }

    async fn reload_snapshot(&self, ctx: &Context<'_>) -> async_graphql::Result<GqlSnapshotReport> {
        let handle = ctx.data::<MapHandle>()?;
        let report = handle.reload().await.map_err(|e| async_graphql::Error::new(e.to_string()))?;
        Ok(report.into())
    }

    /// Feed an office push event. Returns whether any subscriber received it.
    async fn ingest_office_update(
        &self,
        ctx: &Context<'_>,
        input: OfficeUpdateInput,
    ) -> async_graphql::Result<bool> {
        let hub = ctx.data::<PushHub>()?;
        let reached = hub.publish_office(OfficeLocation {
            longitude: Some(input.longitude),
            latitude: Some(input.latitude),
            company_name: input.company_name,
            address: input.address,
            contact: input.contact,
        });
        Ok(reached > 0)
    }

    async fn ingest_location_update(
        &self,
        ctx: &Context<'_>,
        input: LocationUpdateInput,
    ) -> async_graphql::Result<bool> {
        let hub = ctx.data::<PushHub>()?;
        let reached = hub.publish_location(LocationUpdate {
            vehicle_id: input.vehicle_id,
            trip_id: input.trip_id,
            position: LngLat {
                longitude: input.longitude,
                latitude: input.latitude,
            },
            timestamp: input.timestamp,
        });
        Ok(reached > 0)
    }
}

pub type Schema = async_graphql::Schema<QueryRoot, MutationRoot, async_graphql::EmptySubscription>;

pub fn build_schema(handle: MapHandle, hub: PushHub) -> Schema {
    async_graphql::Schema::build(QueryRoot, MutationRoot, async_graphql::EmptySubscription)
        .data(handle)
        .data(hub)
        .finish()
}
