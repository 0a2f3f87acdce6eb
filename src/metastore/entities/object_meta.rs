//! Object metadata rows: one per stored SNAP/DIFF, independent of its body (spec §4.3).
//! Used by `cleanup`/`prune` to compute the reachable set without touching the object
//! store's bodies, and by `show -v`/`cleanup --dry-run` for reporting.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "object_meta")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub object_id: String,
    pub kind: String,
    pub parent_id: Option<String>,
    pub size: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
