use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
    decode::id_of, EventKind, FeedEvent, FeedManager, Fetched, OpsDeckError, RequestDescriptor,
    RequestExecutor, Result, Subscription,
};

/// A REST collection served under `/<COLLECTION>`.
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: &'static str;
    /// Real-time feed carrying changes to this collection.
    const FEED: Option<&'static str> = None;
    /// Keep only the newest N items after feed events.
    const RETAIN: Option<usize> = None;

    fn id(&self) -> &str;

    /// Applied on `item_resolved` events.
    fn mark_resolved(&mut self) {}
}

/// Cached view of a collection.
///
/// `items` always holds the last data that was fetched successfully; a failed
/// refresh only sets `error` (and `degraded` when the fallback answered).
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot<T> {
    pub items: Vec<T>,
    pub error: Option<String>,
    pub degraded: bool,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            error: None,
            degraded: false,
            fetched_at: None,
        }
    }
}

/// CRUD cache over one collection. Clones share the cache.
#[derive(Clone, Debug)]
pub struct ResourceStore<T> {
    executor: RequestExecutor,
    state: Arc<Mutex<Snapshot<T>>>,
}

impl<T: Resource> ResourceStore<T> {
    pub fn new(executor: RequestExecutor) -> Self {
        Self {
            executor,
            state: Arc::new(Mutex::new(Snapshot::default())),
        }
    }

    pub fn snapshot(&self) -> Snapshot<T> {
        self.lock().clone()
    }

    /// Refreshes the whole collection. Never fails; see [`Snapshot`].
    pub async fn fetch_all(&self) -> Snapshot<T> {
        self.fetch(RequestDescriptor::get(collection_path::<T>()))
            .await
    }

    /// Refreshes the collection with query filters, e.g. `[("server", "srv-002")]`.
    pub async fn fetch_where(&self, params: &[(&str, &str)]) -> Snapshot<T> {
        let request = params
            .iter()
            .fold(RequestDescriptor::get(collection_path::<T>()), |request, (key, value)| {
                request.with_param(*key, value)
            });
        self.fetch(request).await
    }

    async fn fetch(&self, request: RequestDescriptor) -> Snapshot<T> {
        let outcome = self.executor.execute_json::<Vec<T>>(&request).await;

        let mut state = self.lock();
        match outcome {
            Ok(Fetched::Live(items)) => {
                state.items = items;
                state.error = None;
                state.degraded = false;
                state.fetched_at = Some(Utc::now());
            }
            Ok(Fetched::Degraded(fallback)) => {
                state.error = Some(fallback.error);
                state.degraded = true;
            }
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::error!("error fetching {}: {}", T::COLLECTION, err);
                state.error = Some(format!("Failed to fetch {}: {err}", T::COLLECTION));
                state.degraded = false;
            }
        }
        state.clone()
    }

    /// Creates an item and appends the server's copy to the cache.
    pub async fn create(&self, item: &T) -> Result<T> {
        let body = serde_json::to_value(item)
            .map_err(|err| OpsDeckError::Decode(format!("cannot encode item: {err}")))?;
        let created = self
            .write(RequestDescriptor::post(collection_path::<T>(), body), "create")
            .await?;
        upsert(&mut self.lock().items, created.clone());
        Ok(created)
    }

    /// Patches an item; the cached copy is replaced by the server's answer.
    pub async fn update(&self, id: &str, patch: Value) -> Result<T> {
        let updated = self
            .write(RequestDescriptor::patch(item_path::<T>(id), patch), "update")
            .await?;
        let mut state = self.lock();
        if let Some(slot) = state.items.iter_mut().find(|item| item.id() == id) {
            *slot = updated.clone();
        }
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let outcome = self
            .executor
            .execute(&RequestDescriptor::delete(item_path::<T>(id)))
            .await;
        match outcome {
            Ok(_) => {
                self.lock().items.retain(|item| item.id() != id);
                Ok(())
            }
            Err(err) => {
                self.lock().error = Some(format!("Failed to delete {}: {err}", T::COLLECTION));
                Err(err)
            }
        }
    }

    async fn write(&self, request: RequestDescriptor, action: &str) -> Result<T> {
        let outcome = self
            .executor
            .execute_json::<T>(&request)
            .await
            .and_then(|fetched| {
                fetched.live().ok_or_else(|| {
                    OpsDeckError::Decode("fallback data returned for a write".to_owned())
                })
            });
        if let Err(err) = &outcome {
            self.lock().error = Some(format!("Failed to {action} {}: {err}", T::COLLECTION));
        }
        outcome
    }

    /// Folds the collection's feed into the cache, then calls `on_event`
    /// with the event and the updated snapshot.
    pub fn subscribe<F>(&self, feeds: &FeedManager, mut on_event: F) -> Result<Subscription>
    where
        F: FnMut(&FeedEvent, &Snapshot<T>) + Send + 'static,
    {
        let feed = T::FEED.ok_or_else(|| {
            OpsDeckError::Channel(format!("{} has no real-time feed", T::COLLECTION))
        })?;
        let store = self.clone();
        feeds.subscribe(feed, move |event| {
            let snapshot = store.apply_event(&event);
            on_event(&event, &snapshot);
        })
    }

    /// Applies one feed event to the cache and returns the result.
    pub fn apply_event(&self, event: &FeedEvent) -> Snapshot<T> {
        let mut state = self.lock();
        match event.kind {
            EventKind::NewItem | EventKind::ItemUpdated => {
                match serde_json::from_value::<T>(event.payload.clone()) {
                    Ok(item) => upsert(&mut state.items, item),
                    Err(_err) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("ignoring {} event payload: {}", T::COLLECTION, _err);
                    }
                }
            }
            EventKind::ItemResolved => {
                if let Some(id) = id_of(&event.payload) {
                    if let Some(item) = state.items.iter_mut().find(|item| item.id() == id) {
                        item.mark_resolved();
                    }
                }
            }
            EventKind::Batch => match serde_json::from_value::<Vec<T>>(event.payload.clone()) {
                Ok(items) => {
                    state.items = items;
                    state.error = None;
                    state.degraded = false;
                    state.fetched_at = Some(event.received_at);
                }
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("ignoring {} batch payload: {}", T::COLLECTION, _err);
                }
            },
            EventKind::Error => {
                let message = event
                    .payload
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_else(|| event.payload.to_string());
                state.error = Some(message);
            }
        }

        if let Some(limit) = T::RETAIN {
            let excess = state.items.len().saturating_sub(limit);
            state.items.drain(..excess);
        }
        state.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn collection_path<T: Resource>() -> String {
    format!("/{}", T::COLLECTION)
}

fn item_path<T: Resource>(id: &str) -> String {
    format!("/{}/{id}", T::COLLECTION)
}

fn upsert<T: Resource>(items: &mut Vec<T>, item: T) {
    let existing = (!item.id().is_empty())
        .then(|| items.iter().position(|current| current.id() == item.id()))
        .flatten();
    match existing {
        Some(index) => items[index] = item,
        None => items.push(item),
    }
}
