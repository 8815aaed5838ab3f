//! In-memory item repository.
//!
//! Items live in a concurrent map keyed by id. A monotonically increasing
//! sequence number gives a stable "newest first" order even when two items
//! share a creation timestamp.

use crate::api::models::{Item, ItemCreate, ItemUpdate, Status};
use crate::core::error::{AppError, Result};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Default page size for listings.
pub const DEFAULT_LIMIT: u32 = 50;

/// Largest page size; larger requests are clamped.
pub const MAX_LIMIT: u32 = 200;

/// Maximum title length in characters.
pub const MAX_TITLE_LEN: usize = 255;

#[derive(Debug, Clone)]
struct StoredItem {
    seq: u64,
    item: Item,
}

/// Thread-safe item store. Clones share the same data.
#[derive(Clone, Default)]
pub struct ItemService {
    items: Arc<DashMap<Uuid, StoredItem>>,
    next_seq: Arc<AtomicU64>,
}

/// Trim and validate a title.
fn normalize_title(title: &str) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("title must not be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::BadRequest(format!(
            "title must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(trimmed.to_string())
}

impl ItemService {
    pub fn new() -> Self {
        Self::default()
    }

    /// List items newest first.
    ///
    /// `limit` defaults to [`DEFAULT_LIMIT`] and is clamped to [`MAX_LIMIT`];
    /// a zero limit is rejected.
    pub fn list(
        &self,
        limit: Option<u32>,
        offset: Option<u64>,
        status: Option<Status>,
    ) -> Result<Vec<Item>> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT);
        if limit == 0 {
            return Err(AppError::BadRequest(
                "limit must be at least 1".to_string(),
            ));
        }
        let limit = limit.min(MAX_LIMIT) as usize;
        let offset = offset.unwrap_or(0) as usize;

        let mut matching: Vec<StoredItem> = self
            .items
            .iter()
            .filter(|entry| status.map_or(true, |s| entry.item.status == s))
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by(|a, b| b.seq.cmp(&a.seq));

        Ok(matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|stored| stored.item)
            .collect())
    }

    pub fn get(&self, id: Uuid) -> Option<Item> {
        self.items.get(&id).map(|entry| entry.item.clone())
    }

    pub fn create(&self, input: ItemCreate) -> Result<Item> {
        let title = normalize_title(&input.title)?;
        let now = Utc::now();

        let item = Item {
            id: Uuid::new_v4(),
            title,
            description: input.description,
            status: input.status.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.items.insert(
            item.id,
            StoredItem {
                seq,
                item: item.clone(),
            },
        );

        tracing::info!(item_id = %item.id, status = %item.status, "Item created");
        Ok(item)
    }

    /// Apply a partial update. Fields absent from `input` keep their values.
    pub fn update(&self, id: Uuid, input: ItemUpdate) -> Result<Item> {
        let title = input.title.as_deref().map(normalize_title).transpose()?;

        let mut entry = self
            .items
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Item {} not found", id)))?;
        let item = &mut entry.item;

        if let Some(title) = title {
            item.title = title;
        }
        if let Some(description) = input.description {
            item.description = Some(description);
        }
        if let Some(status) = input.status {
            item.status = status;
        }
        item.updated_at = Utc::now();

        tracing::info!(item_id = %id, status = %item.status, "Item updated");
        Ok(item.clone())
    }

    /// Remove an item. Returns `false` if it did not exist.
    pub fn delete(&self, id: Uuid) -> bool {
        let removed = self.items.remove(&id).is_some();
        if removed {
            tracing::info!(item_id = %id, "Item deleted");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(service: &ItemService, title: &str) -> Item {
        service
            .create(ItemCreate {
                title: title.to_string(),
                description: None,
                status: None,
            })
            .unwrap()
    }

    #[test]
    fn test_create_trims_title_and_defaults_status() {
        let service = ItemService::new();
        let item = create(&service, "  Buy milk  ");

        assert_eq!(item.title, "Buy milk");
        assert_eq!(item.status, Status::Pending);
        assert_eq!(item.created_at, item.updated_at);
        assert_eq!(service.get(item.id), Some(item));
    }

    #[test]
    fn test_create_rejects_blank_title() {
        let service = ItemService::new();
        let result = service.create(ItemCreate {
            title: "   ".to_string(),
            description: None,
            status: None,
        });

        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert!(service.is_empty());
    }

    #[test]
    fn test_create_rejects_long_title() {
        let service = ItemService::new();
        let result = service.create(ItemCreate {
            title: "x".repeat(MAX_TITLE_LEN + 1),
            description: None,
            status: None,
        });
        assert!(matches!(result, Err(AppError::BadRequest(_))));

        let item = create(&service, &"y".repeat(MAX_TITLE_LEN));
        assert_eq!(item.title.len(), MAX_TITLE_LEN);
    }

    #[test]
    fn test_list_newest_first_with_paging() {
        let service = ItemService::new();
        let first = create(&service, "first");
        let second = create(&service, "second");
        let third = create(&service, "third");

        let all = service.list(None, None, None).unwrap();
        let ids: Vec<Uuid> = all.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![third.id, second.id, first.id]);

        let page = service.list(Some(1), Some(1), None).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, second.id);

        assert!(service.list(None, Some(10), None).unwrap().is_empty());
    }

    #[test]
    fn test_list_limit_is_clamped_and_validated() {
        let service = ItemService::new();
        for n in 0..(MAX_LIMIT + 5) {
            create(&service, &format!("item {}", n));
        }

        let items = service.list(Some(1000), None, None).unwrap();
        assert_eq!(items.len(), MAX_LIMIT as usize);

        let items = service.list(None, None, None).unwrap();
        assert_eq!(items.len(), DEFAULT_LIMIT as usize);

        assert!(matches!(
            service.list(Some(0), None, None),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_list_filters_by_status() {
        let service = ItemService::new();
        let done = service
            .create(ItemCreate {
                title: "done".to_string(),
                description: None,
                status: Some(Status::Done),
            })
            .unwrap();
        create(&service, "pending");

        let items = service.list(None, None, Some(Status::Done)).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, done.id);
    }

    #[test]
    fn test_partial_update() {
        let service = ItemService::new();
        let item = create(&service, "original");

        let updated = service
            .update(
                item.id,
                ItemUpdate {
                    status: Some(Status::InProgress),
                    ..ItemUpdate::default()
                },
            )
            .unwrap();

        assert_eq!(updated.title, "original");
        assert_eq!(updated.status, Status::InProgress);
        assert!(updated.updated_at >= item.updated_at);
        assert_eq!(updated.created_at, item.created_at);
    }

    #[test]
    fn test_update_validates_title_and_existence() {
        let service = ItemService::new();
        let item = create(&service, "original");

        let blank = ItemUpdate {
            title: Some(" ".to_string()),
            ..ItemUpdate::default()
        };
        assert!(matches!(
            service.update(item.id, blank),
            Err(AppError::BadRequest(_))
        ));
        assert_eq!(service.get(item.id).unwrap().title, "original");

        assert!(matches!(
            service.update(Uuid::new_v4(), ItemUpdate::default()),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete() {
        let service = ItemService::new();
        let item = create(&service, "doomed");

        assert!(service.delete(item.id));
        assert!(!service.delete(item.id));
        assert!(service.get(item.id).is_none());
    }
}
