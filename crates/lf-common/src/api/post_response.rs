use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::post::{Location, Post, PostType};

/// Post as exposed over HTTP. The vector itself stays server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostResponse {
    pub id: i64,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub post_type: PostType,
    pub category: String,
    pub contact_info: Option<String>,
    pub location: Option<Location>,
    pub image_url: Option<String>,
    pub user_id: String,
    pub created_by_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub has_embedding: bool,
    pub embedding_dimension: Option<usize>,
}

impl From<&Post> for PostResponse {
    fn from(post: &Post) -> Self {
        Self {
            id: post.id,
            title: post.title.clone(),
            description: post.description.clone(),
            post_type: post.post_type,
            category: post.category.clone(),
            contact_info: post.contact_info.clone(),
            location: post.location.clone(),
            image_url: post.image_url.clone(),
            user_id: post.owner.clone(),
            created_by_name: post.created_by_name.clone(),
            created_at: post.created_at,
            has_embedding: post.embedding.is_some(),
            embedding_dimension: post.embedding.as_ref().map(|e| e.dimension()),
        }
    }
}
