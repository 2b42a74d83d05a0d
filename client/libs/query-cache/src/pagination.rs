//! Cursor-checked pagination
//!
//! A paginated view is an ordered list of pages. A page is only appended when
//! the cursor it was requested with still equals the view's current
//! `next_cursor`; anything else is a stale or surplus page and is dropped.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::debug;

use crate::error::describe_cursor;
use crate::{CacheKey, EntityStore, PaginationError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T, C> {
    pub items: Vec<T>,
    pub next_cursor: Option<C>,
}

impl<T, C> Page<T, C> {
    pub fn new(items: Vec<T>, next_cursor: Option<C>) -> Self {
        Self { items, next_cursor }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T, C> {
    pages: Vec<Page<T, C>>,
}

impl<T, C> Paginated<T, C>
where
    T: Clone,
    C: Clone + PartialEq + Debug,
{
    /// A view holding only the first page
    pub fn first(page: Page<T, C>) -> Self {
        Self { pages: vec![page] }
    }

    pub fn pages(&self) -> &[Page<T, C>] {
        &self.pages
    }

    /// Cursor for the next page, taken from the last loaded page
    pub fn next_cursor(&self) -> Option<&C> {
        self.pages.last().and_then(|page| page.next_cursor.as_ref())
    }

    pub fn has_next(&self) -> bool {
        self.next_cursor().is_some()
    }

    /// Total item count across all pages
    pub fn len(&self) -> usize {
        self.pages.iter().map(|page| page.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.pages.iter().flat_map(|page| page.items.iter())
    }

    /// All items in page order
    pub fn flatten(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    pub fn find<P>(&self, predicate: P) -> Option<&T>
    where
        P: Fn(&T) -> bool,
    {
        self.iter().find(|item| predicate(item))
    }

    /// Append `page` if it answers the current next cursor
    pub fn push_page(&mut self, requested: Option<&C>, page: Page<T, C>) -> Result<(), PaginationError> {
        let current = self.next_cursor();
        match (requested, current) {
            (Some(requested), Some(current)) if requested == current => {
                self.pages.push(page);
                Ok(())
            }
            (_, None) => Err(PaginationError::Exhausted(describe_cursor(requested))),
            (_, Some(current)) => Err(PaginationError::StaleCursor {
                requested: describe_cursor(requested),
                current: describe_cursor(Some(current)),
            }),
        }
    }

    /// Rewrite every item, keeping page boundaries and cursors
    pub fn map_items<F>(&self, mut f: F) -> Self
    where
        F: FnMut(&T) -> T,
    {
        Self {
            pages: self
                .pages
                .iter()
                .map(|page| Page {
                    items: page.items.iter().map(&mut f).collect(),
                    next_cursor: page.next_cursor.clone(),
                })
                .collect(),
        }
    }

    /// Drop items rejected by `keep`, keeping page boundaries and cursors
    pub fn retain_items<F>(&self, keep: F) -> Self
    where
        F: Fn(&T) -> bool,
    {
        Self {
            pages: self
                .pages
                .iter()
                .map(|page| Page {
                    items: page.items.iter().filter(|item| keep(item)).cloned().collect(),
                    next_cursor: page.next_cursor.clone(),
                })
                .collect(),
        }
    }
}

/// Views that may carry a paginated list
///
/// Lets an enum of cached views expose its paginated variants to the store.
pub trait PageSlot<T, C>: Sized {
    fn page_slot(&self) -> Option<&Paginated<T, C>>;

    fn page_slot_mut(&mut self) -> Option<&mut Paginated<T, C>>;

    fn from_pages(pages: Paginated<T, C>) -> Self;
}

impl<T, C> PageSlot<T, C> for Paginated<T, C> {
    fn page_slot(&self) -> Option<&Paginated<T, C>> {
        Some(self)
    }

    fn page_slot_mut(&mut self) -> Option<&mut Paginated<T, C>> {
        Some(self)
    }

    fn from_pages(pages: Paginated<T, C>) -> Self {
        pages
    }
}

impl<K, V> EntityStore<K, V>
where
    K: CacheKey,
    V: Clone + Send + Sync + 'static,
{
    /// Append a fetched page to the view under `key`.
    ///
    /// With nothing cached, only an initial request (`requested == None`)
    /// is accepted and becomes the first page. Returns the total item count
    /// after the append.
    pub fn append_page<T, C>(
        &self,
        key: &K,
        requested: Option<&C>,
        page: Page<T, C>,
    ) -> Result<usize, PaginationError>
    where
        V: PageSlot<T, C>,
        T: Clone,
        C: Clone + PartialEq + Debug,
    {
        let result = self.modify(key, |slot| {
            if slot.is_none() {
                if requested.is_some() {
                    return Err(PaginationError::StaleCursor {
                        requested: describe_cursor(requested),
                        current: describe_cursor::<C>(None),
                    });
                }
                let pages = Paginated::first(page);
                let total = pages.len();
                *slot = Some(V::from_pages(pages));
                return Ok(total);
            }
            match slot.as_mut().and_then(|view| view.page_slot_mut()) {
                Some(pages) => {
                    pages.push_page(requested, page)?;
                    Ok(pages.len())
                }
                None => Err(PaginationError::NotPaginated(key.to_string())),
            }
        });

        match &result {
            Ok(total) => {
                debug!(key = %key, total, "Page appended");
                self.metrics().record_write(key.entity());
            }
            Err(err) => {
                debug!(key = %key, error = %err, "Page discarded");
                let reason = match err {
                    PaginationError::Exhausted(_) => "exhausted",
                    _ => "stale_cursor",
                };
                self.metrics().record_discarded_fetch(key.entity(), reason);
            }
        }
        result
    }

    /// Replace the view under `key` with a freshly fetched first page
    pub fn reset_pages<T, C>(&self, key: K, page: Page<T, C>)
    where
        V: PageSlot<T, C>,
        T: Clone,
        C: Clone + PartialEq + Debug,
    {
        self.set(key, V::from_pages(Paginated::first(page)));
    }

    /// Whether the view under `key` has another page to load
    pub fn has_next<T, C>(&self, key: &K) -> bool
    where
        V: PageSlot<T, C>,
        T: Clone,
        C: Clone + PartialEq + Debug,
    {
        self.peek(key)
            .as_ref()
            .and_then(|view| view.page_slot())
            .map_or(false, |pages| pages.has_next())
    }

    pub fn next_cursor<T, C>(&self, key: &K) -> Option<C>
    where
        V: PageSlot<T, C>,
        T: Clone,
        C: Clone + PartialEq + Debug,
    {
        self.peek(key)
            .as_ref()
            .and_then(|view| view.page_slot())
            .and_then(|pages| pages.next_cursor().cloned())
    }

    /// Items of every loaded page, in order
    pub fn flatten<T, C>(&self, key: &K) -> Vec<T>
    where
        V: PageSlot<T, C>,
        T: Clone,
        C: Clone + PartialEq + Debug,
    {
        self.peek(key)
            .as_ref()
            .and_then(|view| view.page_slot())
            .map(|pages| pages.flatten())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct FeedKey;

    impl fmt::Display for FeedKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "feed")
        }
    }

    impl CacheKey for FeedKey {
        fn entity(&self) -> &'static str {
            "feed"
        }
    }

    type Feed = Paginated<u32, u32>;

    fn page(items: &[u32], next: Option<u32>) -> Page<u32, u32> {
        Page::new(items.to_vec(), next)
    }

    #[test]
    fn test_push_page_requires_matching_cursor() {
        let mut feed = Feed::first(page(&[1, 2], Some(2)));

        assert!(feed.push_page(Some(&2), page(&[3], Some(3))).is_ok());
        assert_eq!(feed.flatten(), vec![1, 2, 3]);

        // Page 2 again after page 3 was requested
        let err = feed.push_page(Some(&2), page(&[9], Some(3))).unwrap_err();
        assert!(matches!(err, PaginationError::StaleCursor { .. }));
        assert_eq!(feed.len(), 3);
    }

    #[test]
    fn test_push_page_after_last_page_is_rejected() {
        let mut feed = Feed::first(page(&[1], None));
        assert!(!feed.has_next());

        let err = feed.push_page(Some(&2), page(&[2], None)).unwrap_err();
        assert_eq!(err, PaginationError::Exhausted("2".to_string()));
        assert_eq!(feed.flatten(), vec![1]);
    }

    #[test]
    fn test_map_and_retain_keep_cursors() {
        let feed = Feed::first(page(&[1, 2, 3], Some(2)));
        let doubled = feed.map_items(|n| n * 2);
        assert_eq!(doubled.flatten(), vec![2, 4, 6]);
        assert_eq!(doubled.next_cursor(), Some(&2));

        let odd = feed.retain_items(|n| n % 2 == 1);
        assert_eq!(odd.flatten(), vec![1, 3]);
        assert!(odd.has_next());
    }

    #[test]
    fn test_store_append_creates_first_page() {
        let store: EntityStore<FeedKey, Feed> = EntityStore::new();
        let total = store.append_page(&FeedKey, None, page(&[1, 2], Some(2))).unwrap();
        assert_eq!(total, 2);
        assert!(store.has_next::<u32, u32>(&FeedKey));
        assert_eq!(store.next_cursor::<u32, u32>(&FeedKey), Some(2));
    }

    #[test]
    fn test_store_discards_out_of_order_page() {
        let store: EntityStore<FeedKey, Feed> = EntityStore::new();
        store.reset_pages(FeedKey, page(&[1, 2], Some(2)));
        store.append_page(&FeedKey, Some(&2), page(&[3, 4], Some(3))).unwrap();

        // A delayed response for cursor 2 arrives after cursor 3 is current
        let late = store.append_page(&FeedKey, Some(&2), page(&[3, 4], Some(3)));
        assert!(late.is_err());
        assert_eq!(store.flatten::<u32, u32>(&FeedKey), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_store_rejects_follow_up_page_without_first() {
        let store: EntityStore<FeedKey, Feed> = EntityStore::new();
        assert!(store.append_page(&FeedKey, Some(&2), page(&[3], None)).is_err());
        assert!(store.flatten::<u32, u32>(&FeedKey).is_empty());
    }

    #[test]
    fn test_reset_pages_replaces_view() {
        let store: EntityStore<FeedKey, Feed> = EntityStore::new();
        store.reset_pages(FeedKey, page(&[1, 2], Some(2)));
        store.append_page(&FeedKey, Some(&2), page(&[3], None)).unwrap();
        store.reset_pages(FeedKey, page(&[7], Some(2)));
        assert_eq!(store.flatten::<u32, u32>(&FeedKey), vec![7]);
        assert!(store.has_next::<u32, u32>(&FeedKey));
    }

    #[test]
    fn test_rejected_page_keeps_view_age() {
        let store: EntityStore<FeedKey, Feed> =
            EntityStore::with_stale_after(std::time::Duration::from_millis(40));
        store.reset_pages(FeedKey, page(&[1, 2], None));
        std::thread::sleep(std::time::Duration::from_millis(60));
        assert!(store.is_stale(&FeedKey));

        let err = store
            .append_page(&FeedKey, Some(&2), page(&[3], None))
            .unwrap_err();
        assert!(matches!(err, PaginationError::Exhausted(_)));
        assert!(store.is_stale(&FeedKey));
        assert_eq!(store.flatten::<u32, u32>(&FeedKey), vec![1, 2]);
    }
}
