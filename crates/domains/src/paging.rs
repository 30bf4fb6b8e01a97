//! # Paging
//!
//! Page-window arithmetic shared by every paginated listing.

use serde::{Deserialize, Serialize};

/// Number of page links shown in one navigation block.
pub const NAV_SIZE: u64 = 10;

pub const DEFAULT_PAGE_SIZE: u64 = 10;

/// A 1-based page request. Both fields are always at least 1, and `page` is
/// small enough that `offset()` fits in a `u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    page: u64,
    page_size: u64,
}

impl PageRequest {
    /// Zero values coming from a form are treated as 1. Pages beyond the
    /// last addressable row are capped; they are past the end of any listing.
    pub fn new(page: u64, page_size: u64) -> Self {
        let page_size = page_size.max(1);
        let max_page = (u64::MAX / page_size).saturating_add(1);
        Self {
            page: page.clamp(1, max_page),
            page_size,
        }
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1) * self.page_size
    }

    pub fn limit(&self) -> u64 {
        self.page_size
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

/// Navigation metadata for one page of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageWindow {
    pub total_count: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
    pub begin_page: u64,
    pub end_page: u64,
    pub show_prev: bool,
    pub show_next: bool,
}

impl PageWindow {
    pub fn new(total_count: u64, request: &PageRequest) -> Self {
        let page = request.page();
        let page_size = request.page_size();

        let total_pages = total_count.div_ceil(page_size);
        let begin_page = (page - 1) / NAV_SIZE * NAV_SIZE + 1;
        let end_page = if total_pages == 0 {
            1
        } else {
            begin_page.saturating_add(NAV_SIZE - 1).min(total_pages)
        };

        Self {
            total_count,
            page,
            page_size,
            total_pages,
            begin_page,
            end_page,
            show_prev: begin_page != 1,
            show_next: total_pages != 0 && end_page != total_pages,
        }
    }

    /// The page numbers to render as links.
    pub fn pages(&self) -> std::ops::RangeInclusive<u64> {
        self.begin_page..=self.end_page
    }
}

/// One page of rows plus the window describing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub window: PageWindow,
}

impl<T> Paged<T> {
    pub fn new(items: Vec<T>, total_count: u64, request: &PageRequest) -> Self {
        Self {
            items,
            total_count,
            window: PageWindow::new(total_count, request),
        }
    }
}

/// Page to show after one row is removed while `page` was displayed.
///
/// Steps back one page when the removed row was the only one left on it.
pub fn page_after_removal(total_before: u64, page: u64, page_size: u64) -> u64 {
    let request = PageRequest::new(page, page_size);
    let remaining = total_before.saturating_sub(1);
    if remaining <= request.offset() && request.page() > 1 {
        request.page() - 1
    } else {
        request.page()
    }
}

/// Last page of a listing in creation order, where a new row shows up.
pub fn landing_page(total_count: u64, page_size: u64) -> u64 {
    total_count.div_ceil(page_size.max(1)).max(1)
}
