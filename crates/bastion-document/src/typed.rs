//! Bastion Typed Store
//!
//! The generic document-store contract and its implementation for any model
//! type, given an encode/decode pair.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::store::DocumentStore;
use crate::types::{Entry, Metadata};
use async_trait::async_trait;
use bastion_common::{BastionError, Result};
use bastion_query::Query;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;

// =============================================================================
// Codec
// =============================================================================

/// Converts models to and from JSON payloads.
pub trait Codec<T>: Send + Sync {
    fn encode(&self, item: &T) -> Result<Value>;
    fn decode(&self, value: Value) -> Result<T>;
}

/// [`Codec`] for any serde model.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerdeCodec;

impl<T> Codec<T> for SerdeCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, item: &T) -> Result<Value> {
        Ok(serde_json::to_value(item)?)
    }

    fn decode(&self, value: Value) -> Result<T> {
        Ok(serde_json::from_value(value)?)
    }
}

// =============================================================================
// Store Contract
// =============================================================================

/// Transform applied to locked documents by [`JsonDataStore::query_and_update`].
pub type Updater<T> = Box<dyn FnOnce(Vec<(String, T)>) -> Result<Vec<(String, T)>> + Send>;

/// Document-store contract over a model type.
#[async_trait]
pub trait JsonDataStore<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    async fn save(&self, item: &T, key: &str) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<T>>;
    async fn get_all(&self) -> Result<Vec<T>>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn delete_all(&self, keys: &[String]) -> Result<u64>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn save_all(&self, items: &[T], keys: &[String]) -> Result<()>;
    async fn query(&self, query: &Query) -> Result<Vec<T>>;
    async fn count(&self, query: &Query) -> Result<i64>;
    async fn delete_query(&self, query: &Query) -> Result<Vec<String>>;
    async fn query_and_update(&self, query: &Query, update: Updater<T>) -> Result<Vec<(String, T)>>;
    async fn metadata(&self, keys: &[String]) -> Result<Vec<Metadata>>;
    async fn check(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

// =============================================================================
// Typed Store
// =============================================================================

/// A [`DocumentStore`] that speaks model values instead of raw JSON.
pub struct TypedStore<T, C = SerdeCodec> {
    inner: DocumentStore,
    codec: C,
    _model: PhantomData<fn() -> T>,
}

impl<T> TypedStore<T, SerdeCodec>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(inner: DocumentStore) -> Self {
        Self::with_codec(inner, SerdeCodec)
    }
}

impl<T, C> TypedStore<T, C>
where
    C: Codec<T>,
{
    pub fn with_codec(inner: DocumentStore, codec: C) -> Self {
        Self {
            inner,
            codec,
            _model: PhantomData,
        }
    }

    /// The untyped store underneath.
    pub fn inner(&self) -> &DocumentStore {
        &self.inner
    }

    fn decode_all(&self, values: Vec<Value>) -> Result<Vec<T>> {
        values.into_iter().map(|v| self.codec.decode(v)).collect()
    }

    fn decode_entry(&self, entry: Entry) -> Result<(String, T)> {
        let Entry { key, data } = entry;
        match self.codec.decode(data) {
            Ok(item) => Ok((key, item)),
            Err(e) => Err(BastionError::MalformedDocument {
                key,
                reason: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl<T, C> JsonDataStore<T> for TypedStore<T, C>
where
    T: Send + Sync + 'static,
    C: Codec<T>,
{
    async fn save(&self, item: &T, key: &str) -> Result<()> {
        let data = self.codec.encode(item)?;
        self.inner.save(key, &data).await
    }

    async fn get(&self, key: &str) -> Result<Option<T>> {
        match self.inner.get(key).await? {
            Some(data) => self
                .codec
                .decode(data)
                .map(Some)
                .map_err(|e| BastionError::MalformedDocument {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    async fn get_all(&self) -> Result<Vec<T>> {
        let values = self.inner.get_all().await?;
        self.decode_all(values)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn delete_all(&self, keys: &[String]) -> Result<u64> {
        self.inner.delete_all(keys).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn save_all(&self, items: &[T], keys: &[String]) -> Result<()> {
        let values = items
            .iter()
            .map(|item| self.codec.encode(item))
            .collect::<Result<Vec<_>>>()?;
        self.inner.save_all(&values, keys).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<T>> {
        let values = self.inner.query(query).await?;
        self.decode_all(values)
    }

    async fn count(&self, query: &Query) -> Result<i64> {
        self.inner.count(query).await
    }

    async fn delete_query(&self, query: &Query) -> Result<Vec<String>> {
        self.inner.delete_query(query).await
    }

    async fn query_and_update(&self, query: &Query, update: Updater<T>) -> Result<Vec<(String, T)>> {
        let mut decoded_updates = Vec::new();
        self.inner
            .query_and_update(query, |locked| {
                let items = locked
                    .into_iter()
                    .map(|entry| self.decode_entry(entry))
                    .collect::<Result<Vec<_>>>()?;
                let updated = update(items)?;
                let mut encoded = Vec::with_capacity(updated.len());
                for (key, item) in &updated {
                    encoded.push(Entry::new(key.clone(), self.codec.encode(item)?));
                }
                decoded_updates = updated;
                Ok(encoded)
            })
            .await?;
        Ok(decoded_updates)
    }

    async fn metadata(&self, keys: &[String]) -> Result<Vec<Metadata>> {
        self.inner.metadata(keys).await
    }

    async fn check(&self) -> Result<()> {
        self.inner.check().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close();
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
