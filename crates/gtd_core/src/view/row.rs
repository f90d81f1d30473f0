//! Tagged row values shown by view stores.
//!
//! Views switch on the tag instead of inspecting concrete entity types, so a
//! sentinel "None" row, a real entity and a "create new ..." affordance can
//! never be confused with one another.

use crate::model::entity::{
    EntityId, EntityKind, EntityRef, AREA_NONE, PROJECT_NONE, REALM_NONE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowValue {
    RealmNone,
    AreaNone,
    ProjectNone,
    /// Ordinary domain entity.
    Entity(EntityRef),
    /// Synthetic "create new <kind>..." row. Not domain data.
    Action(EntityKind),
}

impl RowValue {
    /// Maps sentinel ids to their dedicated variants.
    pub fn from_entity(kind: EntityKind, id: EntityId) -> Self {
        if id == REALM_NONE {
            Self::RealmNone
        } else if id == AREA_NONE {
            Self::AreaNone
        } else if id == PROJECT_NONE {
            Self::ProjectNone
        } else {
            Self::Entity(EntityRef::new(kind, id))
        }
    }

    /// Entity behind the row; `None` for synthetic rows.
    pub fn entity(&self) -> Option<EntityRef> {
        match self {
            Self::RealmNone => Some(EntityRef::new(EntityKind::Realm, REALM_NONE)),
            Self::AreaNone => Some(EntityRef::new(EntityKind::Area, AREA_NONE)),
            Self::ProjectNone => Some(EntityRef::new(EntityKind::Project, PROJECT_NONE)),
            Self::Entity(entity) => Some(*entity),
            Self::Action(_) => None,
        }
    }

    pub fn id(&self) -> Option<EntityId> {
        self.entity().map(|entity| entity.id)
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::RealmNone => EntityKind::Realm,
            Self::AreaNone => EntityKind::Area,
            Self::ProjectNone => EntityKind::Project,
            Self::Entity(entity) => entity.kind,
            Self::Action(kind) => *kind,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, Self::RealmNone | Self::AreaNone | Self::ProjectNone)
    }

    pub fn is_action(&self) -> bool {
        matches!(self, Self::Action(_))
    }
}

/// One base-collection row. `depth` is 1 for areas nested under a realm in
/// structural stores and 0 everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreRow {
    pub value: RowValue,
    pub depth: u8,
}

impl StoreRow {
    pub fn top(value: RowValue) -> Self {
        Self { value, depth: 0 }
    }

    pub fn nested(value: RowValue) -> Self {
        Self { value, depth: 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::RowValue;
    use crate::model::entity::{EntityKind, AREA_NONE, PROJECT_NONE};
    use uuid::Uuid;

    #[test]
    fn sentinel_ids_map_to_sentinel_variants() {
        assert_eq!(
            RowValue::from_entity(EntityKind::Area, AREA_NONE),
            RowValue::AreaNone
        );
        let row = RowValue::from_entity(EntityKind::Project, PROJECT_NONE);
        assert!(row.is_sentinel());
        assert_eq!(row.id(), Some(PROJECT_NONE));
    }

    #[test]
    fn action_rows_carry_no_entity() {
        let row = RowValue::Action(EntityKind::Project);
        assert!(row.is_action());
        assert_eq!(row.entity(), None);
        assert_eq!(row.kind(), EntityKind::Project);
    }

    #[test]
    fn ordinary_entities_keep_kind_and_id() {
        let id = Uuid::new_v4();
        let row = RowValue::from_entity(EntityKind::Task, id);
        assert!(!row.is_sentinel());
        assert_eq!(row.id(), Some(id));
    }
}
