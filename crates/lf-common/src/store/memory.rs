use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;

use super::{PostStore, StoreError};
use crate::{
    embedding::Embedding,
    geo::GeoPoint,
    post::{NewPost, Post},
};

/// Process-local store keyed by id. Ids are handed out in creation order,
/// so map order is creation order.
#[derive(Default)]
pub struct InMemoryPostStore {
    posts: RwLock<BTreeMap<i64, Post>>,
    next_id: AtomicI64,
}

impl InMemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&BTreeMap<i64, Post>) -> T) -> Result<T, StoreError> {
        let guard = self
            .posts
            .read()
            .map_err(|_| StoreError::Unavailable("post map lock poisoned".into()))?;
        Ok(f(&guard))
    }

    fn select(&self, predicate: impl Fn(&Post) -> bool) -> Result<Vec<Post>, StoreError> {
        self.read(|posts| posts.values().filter(|p| predicate(p)).cloned().collect())
    }
}

#[async_trait]
impl PostStore for InMemoryPostStore {
    async fn create(&self, post: NewPost) -> Result<Post, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let post = post.into_post(id);

        let mut guard = self
            .posts
            .write()
            .map_err(|_| StoreError::Unavailable("post map lock poisoned".into()))?;
        guard.insert(id, post.clone());

        Ok(post)
    }

    async fn update_embedding(&self, id: i64, embedding: &Embedding) -> Result<(), StoreError> {
        let mut guard = self
            .posts
            .write()
            .map_err(|_| StoreError::Unavailable("post map lock poisoned".into()))?;
        let post = guard.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        post.embedding = Some(embedding.clone());
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<Post>, StoreError> {
        self.read(|posts| posts.get(&id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Post>, StoreError> {
        self.select(|_| true)
    }

    async fn find_by_title_substring(&self, text: &str) -> Result<Vec<Post>, StoreError> {
        let needle = text.to_lowercase();
        self.select(|post| post.title.to_lowercase().contains(&needle))
    }

    async fn find_near(&self, point: GeoPoint, radius_meters: f64) -> Result<Vec<Post>, StoreError> {
        self.select(|post| {
            post.point()
                .is_some_and(|p| p.within(&point, radius_meters))
        })
    }

    async fn find_pending_enrichment(&self, limit: usize) -> Result<Vec<Post>, StoreError> {
        self.read(|posts| {
            posts
                .values()
                .filter(|p| p.awaiting_embedding())
                .take(limit)
                .cloned()
                .collect()
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.read(|_| ())
    }
}
