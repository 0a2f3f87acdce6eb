//! HTTP transport for the sync protocol (spec §4.6): an `axum` server exposing a
//! `SyncProtocol` peer, and a `reqwest`-backed client implementing the same trait against
//! it. Both crates are already in the teacher's dependency table.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::errors::Error;
use crate::hash::ObjectHash;
use crate::model::{Image, Repository, Tag};
use crate::objectstore::StoredObject;
use crate::sync::SyncProtocol;

fn encode_repo(repository: &Repository) -> String {
    format!("{}::{}", repository.namespace, repository.name)
}

fn decode_repo(segment: &str) -> Result<Repository> {
    match segment.split_once("::") {
        Some((namespace, name)) => Ok(Repository::new(namespace, name)),
        None => Err(Error::ParseError(format!("malformed repository segment: `{segment}`"))),
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::RepositoryNotFound(_) | Error::ImageNotFound(_) | Error::TagNotFound(_) => StatusCode::NOT_FOUND,
            Error::RepositoryExists(_) | Error::TagExists(_) => StatusCode::CONFLICT,
            Error::ParseError(_) | Error::UnresolvedParameter(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Builds the server-side router for any `SyncProtocol` implementation — in practice
/// `sync::LocalPeer<E, M, O>` wrapping a live `repo::Catalog`.
pub fn build_router<P: SyncProtocol + 'static>(peer: Arc<P>) -> Router {
    Router::new()
        .route("/repos/{repo}/images", get(list_images::<P>).put(put_image::<P>))
        .route("/repos/{repo}/images/{hash}", get(get_image::<P>))
        .route("/repos/{repo}/tags", get(list_tags::<P>).put(put_tag::<P>))
        .route("/objects/{hash}/exists", get(has_object::<P>))
        .route("/objects/{hash}", get(get_object::<P>).put(put_object::<P>))
        .with_state(peer)
}

async fn list_images<P: SyncProtocol>(State(peer): State<Arc<P>>, Path(repo): Path<String>) -> std::result::Result<Json<Vec<String>>, Error> {
    let repository = decode_repo(&repo)?;
    let hashes = peer.list_image_hashes(&repository).await?;
    Ok(Json(hashes.into_iter().map(|h| h.to_hex()).collect()))
}

async fn get_image<P: SyncProtocol>(State(peer): State<Arc<P>>, Path((repo, hash)): Path<(String, String)>) -> std::result::Result<Json<Image>, Error> {
    let repository = decode_repo(&repo)?;
    let hash: ObjectHash = hash.parse().map_err(|_| Error::ImageNotFound(hash))?;
    let image = peer.get_image(&repository, hash).await?;
    Ok(Json(image))
}

async fn put_image<P: SyncProtocol>(State(peer): State<Arc<P>>, Path(_repo): Path<String>, Json(image): Json<Image>) -> std::result::Result<StatusCode, Error> {
    peer.put_image(&image).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_tags<P: SyncProtocol>(State(peer): State<Arc<P>>, Path(repo): Path<String>) -> std::result::Result<Json<Vec<Tag>>, Error> {
    let repository = decode_repo(&repo)?;
    Ok(Json(peer.list_tags(&repository).await?))
}

async fn put_tag<P: SyncProtocol>(State(peer): State<Arc<P>>, Path(_repo): Path<String>, Json(tag): Json<Tag>) -> std::result::Result<StatusCode, Error> {
    peer.set_tag(&tag).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn has_object<P: SyncProtocol>(State(peer): State<Arc<P>>, Path(hash): Path<String>) -> std::result::Result<Json<bool>, Error> {
    let hash: ObjectHash = hash.parse().map_err(|_| Error::ObjectCorruption(format!("bad object id `{hash}`")))?;
    Ok(Json(peer.has_object(hash).await?))
}

async fn get_object<P: SyncProtocol>(State(peer): State<Arc<P>>, Path(hash): Path<String>) -> std::result::Result<Json<StoredObject>, Error> {
    let hash: ObjectHash = hash.parse().map_err(|_| Error::ObjectCorruption(format!("bad object id `{hash}`")))?;
    Ok(Json(peer.get_object(hash).await?))
}

async fn put_object<P: SyncProtocol>(State(peer): State<Arc<P>>, Path(hash): Path<String>, Json(object): Json<StoredObject>) -> std::result::Result<StatusCode, Error> {
    let hash: ObjectHash = hash.parse().map_err(|_| Error::ObjectCorruption(format!("bad object id `{hash}`")))?;
    peer.put_object(hash, object).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Client-side `SyncProtocol` implementation speaking to a server built with
/// `build_router`.
pub struct HttpPeer {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPeer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| Error::NetworkError(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::NetworkError(e.to_string()))?;
        response.json().await.map_err(|e| Error::NetworkError(e.to_string()))
    }

    async fn put_json<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<()> {
        self.client
            .put(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::NetworkError(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::NetworkError(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl SyncProtocol for HttpPeer {
    async fn list_image_hashes(&self, repository: &Repository) -> Result<Vec<ObjectHash>> {
        let hexes: Vec<String> = self.get_json(&format!("/repos/{}/images", encode_repo(repository))).await?;
        hexes
            .into_iter()
            .map(|h| h.parse().map_err(|_| Error::ObjectCorruption(format!("bad image hash from remote: `{h}`"))))
            .collect()
    }

    async fn get_image(&self, repository: &Repository, image_hash: ObjectHash) -> Result<Image> {
        self.get_json(&format!("/repos/{}/images/{}", encode_repo(repository), image_hash)).await
    }

    async fn put_image(&self, image: &Image) -> Result<()> {
        self.put_json(&format!("/repos/{}/images", encode_repo(&image.repository)), image).await
    }

    async fn has_object(&self, object_id: ObjectHash) -> Result<bool> {
        self.get_json(&format!("/objects/{object_id}/exists")).await
    }

    async fn get_object(&self, object_id: ObjectHash) -> Result<StoredObject> {
        self.get_json(&format!("/objects/{object_id}")).await
    }

    async fn put_object(&self, object_id: ObjectHash, object: StoredObject) -> Result<()> {
        self.put_json(&format!("/objects/{object_id}"), &object).await
    }

    async fn list_tags(&self, repository: &Repository) -> Result<Vec<Tag>> {
        self.get_json(&format!("/repos/{}/tags", encode_repo(repository))).await
    }

    async fn set_tag(&self, tag: &Tag) -> Result<()> {
        self.put_json(&format!("/repos/{}/tags", encode_repo(&tag.repository)), tag).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_segment_roundtrips() {
        let repo = Repository::new("alice", "fruits");
        let decoded = decode_repo(&encode_repo(&repo)).unwrap();
        assert_eq!(decoded, repo);
    }
}
