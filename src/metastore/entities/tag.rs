//! Tag rows: `(repository_schema, tag_name) -> image_hash` (spec §3). Reserved names
//! (`HEAD`, `latest`) are never persisted here — `HEAD` lives on `repository::Model`'s
//! `checked_out_image`, and `latest` is computed dynamically by `repo::Catalog`.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "tags")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i32,
    #[sea_orm(indexed)]
    pub repository_schema: String,
    pub tag_name: String,
    pub image_hash: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
