use crate::models::{attr, Entity, EntityKind, FilterState};

/// True when `query` is just a category name echoed into the search box.
pub fn is_category_echo(query: &str) -> bool {
    let query = query.trim();
    EntityKind::ALL
        .iter()
        .any(|kind| kind.category_name() == query)
}

/// Case-insensitive substring match against the label and the kind's identity fields.
/// `needle` must already be lowercase.
pub fn matches_query(entity: &Entity, needle: &str) -> bool {
    let identity = match entity.kind {
        EntityKind::Office => entity.attr_str(attr::COMPANY_NAME),
        EntityKind::Vehicle => entity.attr_str(attr::REGISTRATION_NUMBER),
        EntityKind::Driver => entity.attr_str(attr::FULL_NAME),
        EntityKind::Trip => None,
    };
    [Some(entity.label.as_str()), identity, entity.attr_str(attr::STATUS)]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(needle))
}

/// Visible subset of `entities` under `state`, in input order.
pub fn apply<'a>(entities: impl IntoIterator<Item = &'a Entity>, state: &FilterState) -> Vec<Entity> {
    let query = state.query.trim();
    let needle = if query.is_empty() || is_category_echo(query) {
        None
    } else {
        Some(query.to_lowercase())
    };

    entities
        .into_iter()
        .filter(|e| state.active_category.admits(e.kind))
        .filter(|e| needle.as_deref().map_or(true, |n| matches_query(e, n)))
        .cloned()
        .collect()
}
