//! Pagination helpers shared by the list accessors

use flowforge_core::dto::Page;

pub const MIN_PAGE_SIZE: i64 = 1;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Clamps a requested page size into the supported [1, 100] window.
pub fn clamp_page_size(requested: i64) -> i64 {
    requested.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
}

/// Resolves a page request into a (limit, offset) pair.
pub fn limit_offset(page: Page) -> (i64, i64) {
    let limit = clamp_page_size(page.page_size);
    let page_number = page.page.max(1);
    (limit, (page_number - 1) * limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_page_size() {
        assert_eq!(clamp_page_size(0), 1);
        assert_eq!(clamp_page_size(-5), 1);
        assert_eq!(clamp_page_size(20), 20);
        assert_eq!(clamp_page_size(100), 100);
        assert_eq!(clamp_page_size(1000), 100);
    }

    #[test]
    fn test_limit_offset() {
        assert_eq!(limit_offset(Page { page: 1, page_size: 20 }), (20, 0));
        assert_eq!(limit_offset(Page { page: 3, page_size: 50 }), (50, 100));
        // Page numbers below 1 are treated as the first page.
        assert_eq!(limit_offset(Page { page: 0, page_size: 10 }), (10, 0));
        assert_eq!(limit_offset(Page { page: 2, page_size: 500 }), (100, 100));
    }
}
