//! `sea-orm` entity definitions for the persisted catalog (spec §3, §6). Each entity
//! mirrors one data-model type from `model::`; the mapping is deliberately narrow (no
//! ORM-level relations beyond what queries need) since the catalog's real invariants
//! (parent chains, tag uniqueness, chain ordering) are enforced by `repo::Catalog`, not by
//! foreign keys.

pub mod image;
pub mod object_meta;
pub mod provenance;
pub mod repository;
pub mod tag;
pub mod upstream;
