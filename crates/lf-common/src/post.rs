use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use thiserror::Error;

use crate::embedding::Embedding;
use crate::geo::GeoPoint;

/// LOST/FOUND partition. A post is only ever matched against the other side.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum PostType {
    Lost,
    Found,
}

impl PostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::Lost => "LOST",
            PostType::Found => "FOUND",
        }
    }

    /// Missing or unrecognised values fall back to `LOST`.
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        raw.map(str::trim)
            .and_then(|value| PostType::from_str(value).ok())
            .unwrap_or(PostType::Lost)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Location {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub post_type: PostType,
    pub category: String,
    pub contact_info: Option<String>,
    pub location: Option<Location>,
    pub image_url: Option<String>,
    pub embedding: Option<Embedding>,
    pub owner: String,
    pub created_by_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Post {
    pub fn point(&self) -> Option<GeoPoint> {
        self.location.as_ref().map(Location::point)
    }

    /// Image reference that enrichment can act on, if any.
    pub fn image_ref(&self) -> Option<&str> {
        self.image_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn awaiting_embedding(&self) -> bool {
        self.image_ref().is_some() && self.embedding.is_none()
    }
}

/// Validated post ready for the first write. The store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPost {
    pub title: String,
    pub description: String,
    pub post_type: PostType,
    pub category: String,
    pub contact_info: Option<String>,
    pub location: Option<Location>,
    pub image_url: Option<String>,
    pub owner: String,
    pub created_by_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewPost {
    pub fn into_post(self, id: i64) -> Post {
        Post {
            id,
            title: self.title,
            description: self.description,
            post_type: self.post_type,
            category: self.category,
            contact_info: self.contact_info,
            location: self.location,
            image_url: self.image_url,
            embedding: None,
            owner: self.owner,
            created_by_name: self.created_by_name,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("authentication required to post")]
    Unauthenticated,
    #[error("location out of range: lat={lat}, lng={lng}")]
    InvalidLocation { lat: String, lng: String },
}
