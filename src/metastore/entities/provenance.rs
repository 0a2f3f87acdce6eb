//! Provenance rows for Splitfile-built images: the source images and reconstructable
//! script text (spec §3, §4.5). `sources_json` is a JSON array of `SourceRef`.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "provenance")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub image_hash: String,
    pub repository_schema: String,
    pub sources_json: String,
    pub script: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
