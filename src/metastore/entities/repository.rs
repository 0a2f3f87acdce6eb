//! Repository rows, keyed by the `namespace/name` schema string (spec §3).

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "repositories")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub schema: String,
    pub namespace: String,
    pub name: String,
    /// The image hash `HEAD` currently resolves to, or `NULL` if nothing is checked out.
    pub checked_out_image: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
