//! Image (commit) rows. `tables_json` holds the `table_name -> TableEntry` map serialized
//! as JSON rather than normalized into join tables — `repo::Catalog` is the sole writer
//! and reader of this shape, so there is no independent query surface that would benefit
//! from a relational table layout (spec §3).

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "images")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub image_hash: String,
    pub repository_schema: String,
    pub parent_id: Option<String>,
    pub created_at: DateTimeUtc,
    pub comment: Option<String>,
    pub tables_json: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
