//! Read-side queries over stored metadata: paginated listing, tag counts and
//! random picks.

use pixstash_core::{MediaItem, Variant};
use pixstash_storage::{Storage, StorageResult};
use rand::seq::IndexedRandom;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 100;

/// Listing request. Out-of-range values are normalized, never rejected.
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub page: i64,
    pub limit: i64,
    pub tag: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT as i64,
            tag: None,
        }
    }
}

/// A stored item with its public URLs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    #[serde(flatten)]
    pub item: MediaItem,
    pub url: String,
    pub thumbnail_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogPage {
    pub items: Vec<CatalogEntry>,
    /// Matching items across all pages
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub name: String,
    pub count: usize,
}

#[derive(Clone)]
pub struct CatalogService {
    storage: Arc<dyn Storage>,
}

impl CatalogService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// One page of items, newest first, optionally restricted to a tag.
    ///
    /// `page < 1` becomes 1, a limit outside 1-100 becomes 20, and a page
    /// starting past the last item falls back to page 1.
    pub async fn list_page(&self, query: &ListQuery) -> StorageResult<CatalogPage> {
        let mut page = usize::try_from(query.page).ok().filter(|p| *p >= 1).unwrap_or(1);
        let limit = usize::try_from(query.limit)
            .ok()
            .filter(|l| (1..=MAX_PAGE_LIMIT).contains(l))
            .unwrap_or(DEFAULT_PAGE_LIMIT);

        let mut items = self.storage.list().await?;
        if let Some(tag) = query.tag.as_deref().filter(|t| !t.is_empty()) {
            items.retain(|item| item.has_tag(tag));
        }
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let total = items.len();
        let mut start = (page - 1).saturating_mul(limit);
        if start >= total {
            start = 0;
            page = 1;
        }

        let items = items
            .into_iter()
            .skip(start)
            .take(limit)
            .map(|item| self.entry(item))
            .collect();

        Ok(CatalogPage {
            items,
            total,
            page,
            limit,
        })
    }

    /// Every tag in use with the number of items carrying it, most used first.
    pub async fn tag_counts(&self) -> StorageResult<Vec<TagCount>> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for item in self.storage.list().await? {
            for tag in item.tags {
                *counts.entry(tag).or_insert(0) += 1;
            }
        }

        let mut tags: Vec<TagCount> = counts
            .into_iter()
            .map(|(name, count)| TagCount { name, count })
            .collect();
        tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        Ok(tags)
    }

    /// A uniformly chosen item, or `None` when nothing is stored.
    pub async fn random_item(&self) -> StorageResult<Option<CatalogEntry>> {
        let items = self.storage.list().await?;
        let picked = items.choose(&mut rand::rng()).cloned();
        Ok(picked.map(|item| self.entry(item)))
    }

    fn entry(&self, item: MediaItem) -> CatalogEntry {
        CatalogEntry {
            url: self
                .storage
                .get_url(&item.id, Variant::Original, item.orientation),
            thumbnail_url: self
                .storage
                .get_url(&item.id, Variant::WebP, item.orientation),
            item,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use pixstash_core::ImageFormat;
    use pixstash_storage::LocalStorage;
    use tempfile::{tempdir, TempDir};

    /// `count` items created one minute apart; item 0 is the oldest.
    async fn catalog(count: usize) -> (TempDir, CatalogService) {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().to_path_buf(), "/img".to_string())
            .await
            .unwrap();
        let base = Utc::now() - Duration::days(1);
        for i in 0..count {
            let mut item = MediaItem::new(format!("item{:02}", i), "a.png", ImageFormat::Png, 4, 3, 1);
            item.created_at = base + Duration::minutes(i as i64);
            if i % 2 == 0 {
                item.tags = vec!["even".to_string()];
            }
            if i % 3 == 0 {
                item.tags.push("third".to_string());
            }
            storage.save_info(&item).await.unwrap();
        }
        (dir, CatalogService::new(Arc::new(storage)))
    }

    fn ids(page: &CatalogPage) -> Vec<&str> {
        page.items.iter().map(|e| e.item.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_pages_newest_first() {
        let (_dir, catalog) = catalog(5).await;
        let query = ListQuery {
            page: 2,
            limit: 2,
            tag: None,
        };

        let page = catalog.list_page(&query).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!((page.page, page.limit), (2, 2));
        assert_eq!(ids(&page), vec!["item02", "item01"]);
        assert_eq!(page.items[0].url, "/img/original/landscape/item02");
        assert_eq!(page.items[0].thumbnail_url, "/img/webp/landscape/item02.webp");
    }

    #[tokio::test]
    async fn test_pagination_normalization() {
        let (_dir, catalog) = catalog(3).await;

        let page = catalog
            .list_page(&ListQuery {
                page: 0,
                limit: 500,
                tag: None,
            })
            .await
            .unwrap();
        assert_eq!((page.page, page.limit), (1, DEFAULT_PAGE_LIMIT));
        assert_eq!(page.items.len(), 3);

        let past_end = catalog
            .list_page(&ListQuery {
                page: 9,
                limit: 2,
                tag: None,
            })
            .await
            .unwrap();
        assert_eq!(past_end.page, 1);
        assert_eq!(ids(&past_end), vec!["item02", "item01"]);

        let negative = catalog
            .list_page(&ListQuery {
                page: -3,
                limit: -1,
                tag: None,
            })
            .await
            .unwrap();
        assert_eq!((negative.page, negative.limit), (1, DEFAULT_PAGE_LIMIT));
    }

    #[tokio::test]
    async fn test_tag_filter() {
        let (_dir, catalog) = catalog(6).await;
        let page = catalog
            .list_page(&ListQuery {
                tag: Some("third".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(ids(&page), vec!["item03", "item00"]);
    }

    #[tokio::test]
    async fn test_empty_catalog() {
        let (_dir, catalog) = catalog(0).await;
        let page = catalog.list_page(&ListQuery::default()).await.unwrap();
        assert_eq!(page.total, 0);
        assert!(page.items.is_empty());
        assert!(catalog.random_item().await.unwrap().is_none());
        assert!(catalog.tag_counts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tag_counts_sorted_by_usage() {
        let (_dir, catalog) = catalog(6).await;
        let counts = catalog.tag_counts().await.unwrap();
        assert_eq!(
            counts,
            vec![
                TagCount {
                    name: "even".to_string(),
                    count: 3
                },
                TagCount {
                    name: "third".to_string(),
                    count: 2
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_random_item_comes_from_catalog() {
        let (_dir, catalog) = catalog(4).await;
        let entry = catalog.random_item().await.unwrap().unwrap();
        assert!(entry.item.id.starts_with("item"));
        assert!(entry.url.ends_with(&entry.item.id));
    }
}
