//! Pagination helpers for reading cached rows back to the UI

use serde::{Deserialize, Serialize};

/// Window over the cached rows of one fingerprint.
///
/// `page` counts windows of `page_size` rows, independent of the API page
/// the rows were fetched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// 0-indexed window number
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    /// ```
    /// use core_data::repositories::PageRequest;
    ///
    /// let request = PageRequest::new(2, 20);
    /// assert_eq!(request.offset(), 40);
    /// ```
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    pub fn offset(&self) -> u32 {
        self.page.saturating_mul(self.page_size)
    }

    pub fn limit(&self) -> u32 {
        self.page_size
    }

    pub fn next(&self) -> Self {
        Self::new(self.page + 1, self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            page_size: 100,
        }
    }
}

/// One window of rows plus the keys to the neighbouring windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Rows stored for the fingerprint across all windows
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub prev_page: Option<u32>,
    pub next_page: Option<u32>,
}

impl<T> Page<T> {
    /// ```
    /// use core_data::repositories::{Page, PageRequest};
    ///
    /// let page = Page::new(vec![1, 2, 3], 25, PageRequest::new(0, 10));
    /// assert_eq!(page.next_page, Some(1));
    /// assert_eq!(page.prev_page, None);
    /// ```
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        let end = u64::from(request.offset()) + items.len() as u64;
        let next_page = (request.page_size > 0 && !items.is_empty() && end < total)
            .then(|| request.page + 1);
        let prev_page = request.page.checked_sub(1);

        Self {
            items,
            total,
            page: request.page,
            page_size: request.page_size,
            prev_page,
            next_page,
        }
    }

    pub fn empty(request: PageRequest) -> Self {
        Self::new(Vec::new(), 0, request)
    }

    pub fn has_next(&self) -> bool {
        self.next_page.is_some()
    }

    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            prev_page: self.prev_page,
            next_page: self.next_page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_offset_saturates() {
        assert_eq!(PageRequest::new(0, 20).offset(), 0);
        assert_eq!(PageRequest::new(u32::MAX, 20).offset(), u32::MAX);
        assert_eq!(PageRequest::default().next().page, 1);
    }

    #[test]
    fn test_last_window_has_no_next() {
        let page = Page::new(vec![1, 2, 3, 4, 5], 25, PageRequest::new(2, 10));
        assert!(!page.has_next());
        assert_eq!(page.prev_page, Some(1));
    }

    #[test]
    fn test_empty_window_has_no_next() {
        let page: Page<i32> = Page::empty(PageRequest::new(0, 10));
        assert!(!page.has_next());
        assert_eq!(page.total, 0);
    }

    #[test]
    fn test_page_map_keeps_keys() {
        let page = Page::new(vec![1, 2, 3], 25, PageRequest::new(1, 3));
        let mapped = page.map(|x| x * 2);

        assert_eq!(mapped.items, vec![2, 4, 6]);
        assert_eq!(mapped.next_page, Some(2));
        assert_eq!(mapped.prev_page, Some(0));
    }
}
