//! Tag index held in the backing store.
//!
//! Two mirrored set families live under a reserved prefix:
//!
//! - `{prefix}tag:{tag}` → keys carrying the tag
//! - `{prefix}key:{key}` → tags attached to the key
//!
//! Both sides are written on [`attach`](TagIndex::attach) and removed on
//! [`detach`](TagIndex::detach), so `t ∈ tags(k)` iff `k ∈ keys(t)`.

use std::collections::HashSet;

use tiercache_store::{DynBackingStore, StoreResult};

#[derive(Clone)]
pub struct TagIndex {
    store: DynBackingStore,
    prefix: String,
}

impl TagIndex {
    pub fn new(store: DynBackingStore, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    #[inline]
    fn tag_key(&self, tag: &str) -> String {
        format!("{}tag:{tag}", self.prefix)
    }

    #[inline]
    fn key_tags_key(&self, key: &str) -> String {
        format!("{}key:{key}", self.prefix)
    }

    /// Returns `true` for keys that belong to the index itself.
    pub fn is_index_key(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }

    pub async fn attach(&self, key: &str, tags: &[String]) -> StoreResult<()> {
        if tags.is_empty() {
            return Ok(());
        }
        let member = [key.to_string()];
        for tag in tags {
            self.store.sadd(&self.tag_key(tag), &member).await?;
        }
        self.store.sadd(&self.key_tags_key(key), tags).await
    }

    pub async fn resolve(&self, tag: &str) -> StoreResult<HashSet<String>> {
        self.store.smembers(&self.tag_key(tag)).await
    }

    pub async fn tags_of(&self, key: &str) -> StoreResult<HashSet<String>> {
        self.store.smembers(&self.key_tags_key(key)).await
    }

    pub async fn detach(&self, key: &str) -> StoreResult<()> {
        let tags = self.tags_of(key).await?;
        let member = [key.to_string()];
        for tag in &tags {
            self.store.srem(&self.tag_key(tag), &member).await?;
        }
        self.store.del(&self.key_tags_key(key)).await?;
        Ok(())
    }
}

impl std::fmt::Debug for TagIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagIndex")
            .field("store", &self.store.name())
            .field("prefix", &self.prefix)
            .finish()
    }
}
