//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

/// Replace the entity with the same id in place, or append it.
///
/// Collections are ordered; an edit keeps the entity's position.
pub fn upsert_by_id<T: Entity>(items: &mut Vec<T>, item: T) {
    match items.iter_mut().find(|existing| existing.id() == item.id()) {
        Some(slot) => *slot = item,
        None => items.push(item),
    }
}

/// Remove the entity with `id`, returning it if it was present.
pub fn remove_by_id<T: Entity>(items: &mut Vec<T>, id: &T::Id) -> Option<T> {
    let idx = items.iter().position(|item| item.id() == id)?;
    Some(items.remove(idx))
}
