//! Core data model: repositories, images, table entries, objects, tags, upstreams, and
//! provenance records (spec §3).

pub mod image;
pub mod object;
pub mod provenance;
pub mod repository;
pub mod table;
pub mod tag;
pub mod upstream;

pub use image::Image;
pub use object::{ChangeKind, ChangeRow, ObjectKind, ObjectMeta};
pub use provenance::{ProvenanceRecord, SourceRef};
pub use repository::Repository;
pub use table::{ColumnDef, TableEntry};
pub use tag::{TAG_HEAD, TAG_LATEST, Tag};
pub use upstream::Upstream;
