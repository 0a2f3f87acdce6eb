//! `sea-orm`-backed `MetadataStore`, persisted to a single SQLite file (spec §6: the
//! catalog is small embedded state, not a clustered service — SQLite via `sqlx-sqlite`
//! is the natural fit, matching the size class `sea-orm`'s own SQLite backend targets).

use std::collections::BTreeMap;

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, Database, DatabaseConnection, EntityTrait,
    QueryFilter, Schema, Set,
};

use crate::Result;
use crate::errors::Error;
use crate::hash::ObjectHash;
use crate::metastore::MetadataStore;
use crate::metastore::entities::{image, object_meta, provenance, repository, tag, upstream};
use crate::model::{Image, ObjectKind, ObjectMeta, ProvenanceRecord, Repository, SourceRef, Tag, TableEntry, Upstream};

pub struct SeaMetadataStore {
    conn: DatabaseConnection,
}

impl SeaMetadataStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let conn = Database::connect(database_url)
            .await
            .map_err(|e| Error::engine(e.to_string(), "sea_orm::connect"))?;
        let store = Self { conn };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        let builder = self.conn.get_database_backend();
        let schema = Schema::new(builder);
        for stmt in [
            builder.build(schema.create_table_from_entity(repository::Entity).if_not_exists()),
            builder.build(schema.create_table_from_entity(image::Entity).if_not_exists()),
            builder.build(schema.create_table_from_entity(tag::Entity).if_not_exists()),
            builder.build(schema.create_table_from_entity(upstream::Entity).if_not_exists()),
            builder.build(schema.create_table_from_entity(provenance::Entity).if_not_exists()),
            builder.build(schema.create_table_from_entity(object_meta::Entity).if_not_exists()),
        ] {
            self.conn
                .execute(stmt)
                .await
                .map_err(|e| Error::engine(e.to_string(), "ensure_schema"))?;
        }
        Ok(())
    }
}

fn image_to_model(image: &Image) -> Result<image::ActiveModel> {
    let tables_json = serde_json::to_string(&image.tables)
        .map_err(|e| Error::ObjectCorruption(format!("image tables serialize failed: {e}")))?;
    Ok(image::ActiveModel {
        image_hash: Set(image.image_hash.to_hex()),
        repository_schema: Set(image.repository.schema()),
        parent_id: Set(image.parent_id.map(|h| h.to_hex())),
        created_at: Set(image.created_at),
        comment: Set(image.comment.clone()),
        tables_json: Set(tables_json),
    })
}

fn model_to_image(model: image::Model, repository: Repository) -> Result<Image> {
    let tables: BTreeMap<String, TableEntry> = serde_json::from_str(&model.tables_json)
        .map_err(|e| Error::ObjectCorruption(format!("stored image tables unreadable: {e}")))?;
    Ok(Image {
        repository,
        image_hash: parse_hash(&model.image_hash)?,
        parent_id: model.parent_id.map(|s| parse_hash(&s)).transpose()?,
        created_at: model.created_at,
        comment: model.comment,
        tables,
    })
}

fn parse_hash(s: &str) -> Result<ObjectHash> {
    s.parse()
        .map_err(|_| Error::ObjectCorruption(format!("stored hash `{s}` is not valid")))
}

#[async_trait]
impl MetadataStore for SeaMetadataStore {
    async fn create_repository(&self, repository: &Repository) -> Result<()> {
        let model = repository::ActiveModel {
            schema: Set(repository.schema()),
            namespace: Set(repository.namespace.clone()),
            name: Set(repository.name.clone()),
            checked_out_image: Set(None),
        };
        model
            .insert(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "create_repository"))?;
        Ok(())
    }

    async fn repository_exists(&self, repository: &Repository) -> Result<bool> {
        Ok(repository::Entity::find_by_id(repository.schema())
            .one(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "repository_exists"))?
            .is_some())
    }

    async fn drop_repository(&self, repository: &Repository) -> Result<()> {
        let schema = repository.schema();
        repository::Entity::delete_by_id(schema.clone())
            .exec(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "drop_repository"))?;
        image::Entity::delete_many()
            .filter(image::Column::RepositorySchema.eq(schema.clone()))
            .exec(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "drop_repository"))?;
        tag::Entity::delete_many()
            .filter(tag::Column::RepositorySchema.eq(schema.clone()))
            .exec(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "drop_repository"))?;
        upstream::Entity::delete_by_id(schema.clone())
            .exec(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "drop_repository"))?;
        provenance::Entity::delete_many()
            .filter(provenance::Column::RepositorySchema.eq(schema))
            .exec(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "drop_repository"))?;
        Ok(())
    }

    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let rows = repository::Entity::find()
            .all(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "list_repositories"))?;
        Ok(rows
            .into_iter()
            .map(|r| Repository::new(r.namespace, r.name))
            .collect())
    }

    async fn checked_out_image(&self, repository: &Repository) -> Result<Option<ObjectHash>> {
        let row = repository::Entity::find_by_id(repository.schema())
            .one(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "checked_out_image"))?
            .ok_or_else(|| Error::RepositoryNotFound(repository.schema()))?;
        row.checked_out_image.map(|s| parse_hash(&s)).transpose()
    }

    async fn set_checked_out_image(&self, repository: &Repository, image_hash: Option<ObjectHash>) -> Result<()> {
        let row = repository::Entity::find_by_id(repository.schema())
            .one(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "set_checked_out_image"))?
            .ok_or_else(|| Error::RepositoryNotFound(repository.schema()))?;
        let mut active: repository::ActiveModel = row.into();
        active.checked_out_image = Set(image_hash.map(|h| h.to_hex()));
        active
            .update(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "set_checked_out_image"))?;
        Ok(())
    }

    async fn put_image(&self, image: &Image) -> Result<()> {
        let model = image_to_model(image)?;
        image::Entity::insert(model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(image::Column::ImageHash)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "put_image"))?;
        Ok(())
    }

    async fn get_image(&self, repository: &Repository, image_hash: ObjectHash) -> Result<Option<Image>> {
        let row = image::Entity::find_by_id(image_hash.to_hex())
            .one(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "get_image"))?;
        row.map(|m| model_to_image(m, repository.clone())).transpose()
    }

    async fn list_images(&self, repository: &Repository) -> Result<Vec<Image>> {
        let rows = image::Entity::find()
            .filter(image::Column::RepositorySchema.eq(repository.schema()))
            .all(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "list_images"))?;
        rows.into_iter()
            .map(|m| model_to_image(m, repository.clone()))
            .collect()
    }

    async fn delete_image(&self, _repository: &Repository, image_hash: ObjectHash) -> Result<()> {
        image::Entity::delete_by_id(image_hash.to_hex())
            .exec(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "delete_image"))?;
        Ok(())
    }

    async fn set_tag(&self, tag: &Tag) -> Result<()> {
        let Some(image_hash) = tag.image_hash else {
            return Err(Error::ObjectCorruption("cannot persist a tag with no image_hash".into()));
        };
        let existing = tag::Entity::find()
            .filter(tag::Column::RepositorySchema.eq(tag.repository.schema()))
            .filter(tag::Column::TagName.eq(&tag.tag_name))
            .one(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "set_tag"))?;

        if let Some(existing) = existing {
            let mut active: tag::ActiveModel = existing.into();
            active.image_hash = Set(image_hash.to_hex());
            active
                .update(&self.conn)
                .await
                .map_err(|e| Error::engine(e.to_string(), "set_tag"))?;
        } else {
            let active = tag::ActiveModel {
                id: sea_orm::NotSet,
                repository_schema: Set(tag.repository.schema()),
                tag_name: Set(tag.tag_name.clone()),
                image_hash: Set(image_hash.to_hex()),
            };
            active
                .insert(&self.conn)
                .await
                .map_err(|e| Error::engine(e.to_string(), "set_tag"))?;
        }
        Ok(())
    }

    async fn get_tag(&self, repository: &Repository, tag_name: &str) -> Result<Option<Tag>> {
        let row = tag::Entity::find()
            .filter(tag::Column::RepositorySchema.eq(repository.schema()))
            .filter(tag::Column::TagName.eq(tag_name))
            .one(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "get_tag"))?;
        row.map(|r| {
            Ok(Tag {
                repository: repository.clone(),
                tag_name: r.tag_name,
                image_hash: Some(parse_hash(&r.image_hash)?),
            })
        })
        .transpose()
    }

    async fn remove_tag(&self, repository: &Repository, tag_name: &str) -> Result<()> {
        tag::Entity::delete_many()
            .filter(tag::Column::RepositorySchema.eq(repository.schema()))
            .filter(tag::Column::TagName.eq(tag_name))
            .exec(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "remove_tag"))?;
        Ok(())
    }

    async fn list_tags(&self, repository: &Repository) -> Result<Vec<Tag>> {
        let rows = tag::Entity::find()
            .filter(tag::Column::RepositorySchema.eq(repository.schema()))
            .all(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "list_tags"))?;
        rows.into_iter()
            .map(|r| {
                Ok(Tag {
                    repository: repository.clone(),
                    tag_name: r.tag_name,
                    image_hash: Some(parse_hash(&r.image_hash)?),
                })
            })
            .collect()
    }

    async fn set_upstream(&self, upstream: &Upstream) -> Result<()> {
        let schema = upstream.repository.schema();
        let existing = upstream::Entity::find_by_id(schema.clone())
            .one(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "set_upstream"))?;
        let active = upstream::ActiveModel {
            repository_schema: Set(schema),
            remote_engine: Set(upstream.remote_engine.clone()),
            remote_namespace: Set(upstream.remote_repository.namespace.clone()),
            remote_name: Set(upstream.remote_repository.name.clone()),
        };
        if existing.is_some() {
            active
                .update(&self.conn)
                .await
                .map_err(|e| Error::engine(e.to_string(), "set_upstream"))?;
        } else {
            active
                .insert(&self.conn)
                .await
                .map_err(|e| Error::engine(e.to_string(), "set_upstream"))?;
        }
        Ok(())
    }

    async fn get_upstream(&self, repository: &Repository) -> Result<Option<Upstream>> {
        let row = upstream::Entity::find_by_id(repository.schema())
            .one(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "get_upstream"))?;
        Ok(row.map(|r| Upstream {
            repository: repository.clone(),
            remote_engine: r.remote_engine,
            remote_repository: Repository::new(r.remote_namespace, r.remote_name),
        }))
    }

    async fn remove_upstream(&self, repository: &Repository) -> Result<()> {
        upstream::Entity::delete_by_id(repository.schema())
            .exec(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "remove_upstream"))?;
        Ok(())
    }

    async fn put_provenance(&self, record: &ProvenanceRecord) -> Result<()> {
        let sources_json = serde_json::to_string(&record.sources)
            .map_err(|e| Error::ObjectCorruption(format!("provenance sources serialize failed: {e}")))?;
        let active = provenance::ActiveModel {
            image_hash: Set(record.image_hash.to_hex()),
            repository_schema: Set(record.repository.schema()),
            sources_json: Set(sources_json),
            script: Set(record.script.clone()),
        };
        provenance::Entity::insert(active)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(provenance::Column::ImageHash)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "put_provenance"))?;
        Ok(())
    }

    async fn get_provenance(&self, repository: &Repository, image_hash: ObjectHash) -> Result<Option<ProvenanceRecord>> {
        let row = provenance::Entity::find_by_id(image_hash.to_hex())
            .one(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "get_provenance"))?;
        row.map(|r| {
            let sources: Vec<SourceRef> = serde_json::from_str(&r.sources_json)
                .map_err(|e| Error::ObjectCorruption(format!("stored provenance sources unreadable: {e}")))?;
            Ok(ProvenanceRecord {
                repository: repository.clone(),
                image_hash,
                sources,
                script: r.script,
            })
        })
        .transpose()
    }

    async fn put_object_meta(&self, meta: &ObjectMeta) -> Result<()> {
        let active = object_meta::ActiveModel {
            object_id: Set(meta.object_id.to_hex()),
            kind: Set(meta.kind.to_string()),
            parent_id: Set(meta.parent_id.map(|h| h.to_hex())),
            size: Set(meta.size as i64),
        };
        object_meta::Entity::insert(active)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(object_meta::Column::ObjectId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "put_object_meta"))?;
        Ok(())
    }

    async fn list_object_meta(&self) -> Result<Vec<ObjectMeta>> {
        let rows = object_meta::Entity::find()
            .all(&self.conn)
            .await
            .map_err(|e| Error::engine(e.to_string(), "list_object_meta"))?;
        rows.into_iter()
            .map(|r| {
                Ok(ObjectMeta {
                    object_id: parse_hash(&r.object_id)?,
                    kind: if r.kind == "SNAP" { ObjectKind::Snap } else { ObjectKind::Diff },
                    parent_id: r.parent_id.map(|s| parse_hash(&s)).transpose()?,
                    size: r.size as u64,
                })
            })
            .collect()
    }
}
