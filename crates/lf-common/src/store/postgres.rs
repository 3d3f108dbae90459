use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use tokio_postgres::Row;
use tracing::{info, instrument};

use super::{
    PgPool, PostStore, StoreError, create_pool_from_url, run_migrations,
    util::{TimedClientExt, escape_like},
};
use crate::{
    embedding::Embedding,
    geo::{EARTH_RADIUS_METERS, GeoPoint},
    post::{Location, NewPost, Post, PostType},
};

const POST_COLUMNS: &str = "id, title, description, post_type, category, contact_info, \
     location_lat, location_lng, location_name, image_url, embedding, owner_id, \
     created_by_name, created_at";

/// Postgres-backed store over `lf.posts`.
#[derive(Clone)]
pub struct PgPostStore {
    pool: PgPool,
}

impl PgPostStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Builds the pool and brings the schema up to date.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = create_pool_from_url(database_url)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        run_migrations(&pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        info!("post store ready");
        Ok(Self::new(pool))
    }
}

fn row_to_post(row: &Row) -> Result<Post, StoreError> {
    let post_type: String = row.try_get("post_type")?;
    let post_type = PostType::from_str(&post_type)
        .map_err(|_| StoreError::Mapping(format!("unknown post_type {post_type}")))?;

    let lat: Option<f64> = row.try_get("location_lat")?;
    let lng: Option<f64> = row.try_get("location_lng")?;
    let location = match (lat, lng) {
        (Some(lat), Some(lng)) => Some(Location {
            lat,
            lng,
            name: row.try_get("location_name")?,
        }),
        _ => None,
    };

    let embedding: Option<Vec<f32>> = row.try_get("embedding")?;

    Ok(Post {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        post_type,
        category: row.try_get("category")?,
        contact_info: row.try_get("contact_info")?,
        location,
        image_url: row.try_get("image_url")?,
        embedding: embedding.filter(|v| !v.is_empty()).map(Embedding::new),
        owner: row.try_get("owner_id")?,
        created_by_name: row.try_get("created_by_name")?,
        created_at: row.try_get("created_at")?,
    })
}

fn rows_to_posts(rows: &[Row]) -> Result<Vec<Post>, StoreError> {
    rows.iter().map(row_to_post).collect()
}

#[async_trait]
impl PostStore for PgPostStore {
    #[instrument(skip(self, post), fields(title = %post.title))]
    async fn create(&self, post: NewPost) -> Result<Post, StoreError> {
        let client = self.pool.get().await?;
        let (lat, lng, name) = match &post.location {
            Some(loc) => (Some(loc.lat), Some(loc.lng), loc.name.clone()),
            None => (None, None, None),
        };

        let sql = format!(
            "INSERT INTO lf.posts (
                title, description, post_type, category, contact_info,
                location_lat, location_lng, location_name, image_url,
                owner_id, created_by_name, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {POST_COLUMNS}"
        );
        let row = client
            .timed_query_one(
                sql.as_str(),
                &[
                    &post.title,
                    &post.description,
                    &post.post_type.as_str(),
                    &post.category,
                    &post.contact_info,
                    &lat,
                    &lng,
                    &name,
                    &post.image_url,
                    &post.owner,
                    &post.created_by_name,
                    &post.created_at,
                ],
                "posts.create",
            )
            .await?;

        row_to_post(&row)
    }

    #[instrument(skip(self, embedding), fields(dim = embedding.dimension()))]
    async fn update_embedding(&self, id: i64, embedding: &Embedding) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        let dim = embedding.dimension() as i32;
        let updated = client
            .timed_execute(
                "UPDATE lf.posts
                 SET embedding = $2, embedding_dim = $3, embedded_at = $4
                 WHERE id = $1",
                &[&id, &embedding.vector, &dim, &Utc::now()],
                "posts.update_embedding",
            )
            .await?;

        if updated == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<Post>, StoreError> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {POST_COLUMNS} FROM lf.posts WHERE id = $1");
        client
            .timed_query_opt(sql.as_str(), &[&id], "posts.get")
            .await?
            .as_ref()
            .map(row_to_post)
            .transpose()
    }

    async fn get_all(&self) -> Result<Vec<Post>, StoreError> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {POST_COLUMNS} FROM lf.posts ORDER BY created_at, id");
        let rows = client.timed_query(sql.as_str(), &[], "posts.get_all").await?;
        rows_to_posts(&rows)
    }

    async fn find_by_title_substring(&self, text: &str) -> Result<Vec<Post>, StoreError> {
        let client = self.pool.get().await?;
        let pattern = format!("%{}%", escape_like(text));
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM lf.posts
             WHERE title ILIKE $1 ESCAPE '\\'
             ORDER BY created_at, id"
        );
        let rows = client
            .timed_query(sql.as_str(), &[&pattern], "posts.find_by_title")
            .await?;
        rows_to_posts(&rows)
    }

    async fn find_near(&self, point: GeoPoint, radius_meters: f64) -> Result<Vec<Post>, StoreError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM lf.posts
             WHERE location_lat IS NOT NULL
               AND 2 * $3::float8 * asin(least(1.0, sqrt(
                     power(sin(radians(location_lat - $1) / 2), 2)
                     + cos(radians($1)) * cos(radians(location_lat))
                       * power(sin(radians(location_lng - $2) / 2), 2)
                   ))) <= $4
             ORDER BY created_at, id"
        );
        let rows = client
            .timed_query(
                sql.as_str(),
                &[&point.lat, &point.lng, &EARTH_RADIUS_METERS, &radius_meters],
                "posts.find_near",
            )
            .await?;
        rows_to_posts(&rows)
    }

    async fn find_pending_enrichment(&self, limit: usize) -> Result<Vec<Post>, StoreError> {
        let client = self.pool.get().await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM lf.posts
             WHERE embedding IS NULL AND image_url IS NOT NULL AND btrim(image_url) <> ''
             ORDER BY created_at, id
             LIMIT $1"
        );
        let rows = client
            .timed_query(sql.as_str(), &[&limit], "posts.find_pending_enrichment")
            .await?;
        rows_to_posts(&rows)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client.timed_execute("SELECT 1", &[], "posts.ping").await?;
        Ok(())
    }
}
