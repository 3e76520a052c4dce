//! Pagination Helper
//!
//! Slices an ordered sequence into pages.

use serde::Serialize;

/// Page size used when the caller asks for less than one item per page
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// One page of an ordered sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    /// Length of the whole sequence
    pub total: u32,
    /// Number of pages at the effective page size
    pub max_page: u32,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    /// A page with no items and no pages
    pub fn empty() -> Self {
        Self {
            total: 0,
            max_page: 0,
            items: Vec::new(),
        }
    }

    /// Convert every item, keeping the counters
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            total: self.total,
            max_page: self.max_page,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}

/// Slice `items` into page `page` of `page_size` entries.
///
/// - An empty sequence yields `(0, 0, [])`.
/// - `page_size < 1` falls back to [`DEFAULT_PAGE_SIZE`].
/// - A sequence that fits in one page is returned whole with `max_page = 1`.
/// - `page < 1` returns the *entire* sequence together with `max_page`.
/// - Pages past the end are clamped to the last page.
pub fn paginate<T>(page: u32, page_size: u32, items: Vec<T>) -> Page<T> {
    let total = items.len() as u32;
    if total == 0 {
        return Page::empty();
    }

    let page_size = if page_size < 1 {
        DEFAULT_PAGE_SIZE
    } else {
        page_size
    };

    if total <= page_size {
        return Page {
            total,
            max_page: 1,
            items,
        };
    }

    let max_page = total.div_ceil(page_size);
    if page < 1 {
        return Page {
            total,
            max_page,
            items,
        };
    }

    let page = page.min(max_page);
    let start = ((page - 1) * page_size) as usize;
    let end = (page * page_size).min(total) as usize;

    Page {
        total,
        max_page,
        items: items.into_iter().skip(start).take(end - start).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sequence() {
        let page = paginate::<u32>(1, 10, Vec::new());
        assert_eq!(page, Page::empty());
    }

    #[test]
    fn test_single_page_returns_everything() {
        let page = paginate(3, 10, vec![1, 2, 3]);
        assert_eq!(page.total, 3);
        assert_eq!(page.max_page, 1);
        assert_eq!(page.items, vec![1, 2, 3]);
    }

    #[test]
    fn test_zero_page_size_defaults_to_ten() {
        let items: Vec<u32> = (0..25).collect();
        let page = paginate(2, 0, items);
        assert_eq!(page.max_page, 3);
        assert_eq!(page.items, (10..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_page_zero_returns_whole_sequence() {
        let items: Vec<u32> = (0..25).collect();
        let page = paginate(0, 10, items.clone());
        assert_eq!(page.total, 25);
        assert_eq!(page.max_page, 3);
        assert_eq!(page.items, items);
    }

    #[test]
    fn test_last_page_is_partial() {
        let page = paginate(3, 10, (0..25).collect::<Vec<u32>>());
        assert_eq!(page.items, (20..25).collect::<Vec<_>>());
    }

    #[test]
    fn test_exact_multiple_has_no_extra_page() {
        let page = paginate(1, 10, (0..30).collect::<Vec<u32>>());
        assert_eq!(page.max_page, 3);
    }

    #[test]
    fn test_page_past_end_is_clamped() {
        let page = paginate(99, 10, (0..25).collect::<Vec<u32>>());
        assert_eq!(page.items, (20..25).collect::<Vec<_>>());
    }

    #[test]
    fn test_pages_concatenate_to_original() {
        for total in 1..40u32 {
            for size in 1..12u32 {
                let items: Vec<u32> = (0..total).collect();
                let first = paginate(1, size, items.clone());
                assert_eq!(first.max_page, total.div_ceil(size));

                let mut joined = Vec::new();
                for p in 1..=first.max_page {
                    joined.extend(paginate(p, size, items.clone()).items);
                }
                assert_eq!(joined, items, "total={} size={}", total, size);
            }
        }
    }

    #[test]
    fn test_map_keeps_counters() {
        let page = paginate(1, 2, vec![1, 2, 3]).map(|n| n * 10);
        assert_eq!(page.total, 3);
        assert_eq!(page.max_page, 2);
        assert_eq!(page.items, vec![10, 20]);
    }
}
