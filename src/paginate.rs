use std::ops::{Range, RangeInclusive};

pub const DEFAULT_PAGE_SIZE: usize = 10;
const PAGE_BUTTONS: usize = 5;

/// Page state over an ordered sequence. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pager {
    page_size: usize,
    current: usize,
    total_items: usize,
}

/// What the pagination bar shows for the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageControls {
    pub current: usize,
    pub total_pages: usize,
    pub pages: RangeInclusive<usize>,
    pub first_enabled: bool,
    pub prev_enabled: bool,
    pub next_enabled: bool,
    pub last_enabled: bool,
    pub summary: String,
}

impl Pager {
    pub fn new(page_size: usize, initial_page: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            current: initial_page.max(1),
            total_items: 0,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn total_items(&self) -> usize {
        self.total_items
    }

    pub fn total_pages(&self) -> usize {
        self.total_items.div_ceil(self.page_size)
    }

    /// Re-targets the pager at a sequence of `total_items` entries.
    ///
    /// Without `maintain_page` the pager returns to page 1. The current page
    /// is then clamped into `1..=total_pages`; an empty sequence leaves it as is.
    pub fn reset_for(&mut self, total_items: usize, maintain_page: bool) {
        self.total_items = total_items;
        if !maintain_page {
            self.current = 1;
        }
        let total_pages = self.total_pages();
        if total_pages > 0 && self.current > total_pages {
            self.current = total_pages;
        }
        if self.current < 1 {
            self.current = 1;
        }
    }

    /// Moves to `page`. Out-of-range requests and the current page are no-ops.
    pub fn go_to(&mut self, page: usize) -> bool {
        if page < 1 || page > self.total_pages() || page == self.current {
            return false;
        }
        self.current = page;
        true
    }

    pub fn range(&self) -> Range<usize> {
        let start = (self.current - 1)
            .saturating_mul(self.page_size)
            .min(self.total_items);
        let end = self
            .current
            .saturating_mul(self.page_size)
            .min(self.total_items);
        start..end
    }

    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let range = self.range();
        let end = range.end.min(items.len());
        let start = range.start.min(end);
        &items[start..end]
    }

    /// Up to five page numbers centred on the current page, shifted to stay
    /// within bounds.
    pub fn page_window(&self) -> RangeInclusive<usize> {
        let total = self.total_pages();
        if total == 0 {
            return 1..=0;
        }
        let current = self.current.min(total);
        let mut start = current.saturating_sub(2).max(1);
        let mut end = (current + 2).min(total);
        if current <= 3 {
            end = PAGE_BUTTONS.min(total);
        }
        if current + 3 > total {
            start = total.saturating_sub(PAGE_BUTTONS - 1).max(1);
        }
        start..=end
    }

    pub fn summary(&self) -> String {
        if self.total_items == 0 {
            return "No patients to show".to_string();
        }
        let first = ((self.current - 1) * self.page_size + 1).min(self.total_items);
        let last = (self.current * self.page_size).min(self.total_items);
        format!("Showing {first}-{last} of {} patients", self.total_items)
    }

    /// `None` when there is nothing to paginate and the bar stays hidden.
    pub fn controls(&self) -> Option<PageControls> {
        if self.total_items == 0 {
            return None;
        }
        let total_pages = self.total_pages();
        Some(PageControls {
            current: self.current,
            total_pages,
            pages: self.page_window(),
            first_enabled: self.current != 1,
            prev_enabled: self.current != 1,
            next_enabled: self.current != total_pages,
            last_enabled: self.current != total_pages,
            summary: self.summary(),
        })
    }
}

impl Default for Pager {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pager_over(total: usize, page: usize) -> Pager {
        let mut pager = Pager::new(DEFAULT_PAGE_SIZE, page);
        pager.reset_for(total, true);
        pager
    }

    #[test]
    fn twenty_five_items_make_three_pages() {
        let items = (0..25).collect::<Vec<_>>();
        let mut pager = pager_over(items.len(), 1);
        assert_eq!(pager.total_pages(), 3);
        assert_eq!(pager.slice(&items), &items[0..10]);
        assert!(pager.go_to(3));
        assert_eq!(pager.slice(&items), &items[20..25]);
        assert_eq!(pager.summary(), "Showing 21-25 of 25 patients");
    }

    #[test]
    fn pages_reassemble_the_sequence_exactly_once() {
        for total in [0usize, 1, 9, 10, 11, 30, 47] {
            let items = (0..total).collect::<Vec<_>>();
            let mut pager = pager_over(total, 1);
            assert_eq!(pager.total_pages(), total.div_ceil(DEFAULT_PAGE_SIZE));
            let mut rebuilt = Vec::new();
            for page in 1..=pager.total_pages() {
                pager.go_to(page);
                rebuilt.extend_from_slice(pager.slice(&items));
            }
            assert_eq!(rebuilt, items);
        }
    }

    #[test]
    fn invalid_navigation_is_a_no_op() {
        let mut pager = pager_over(25, 2);
        assert!(!pager.go_to(0));
        assert!(!pager.go_to(4));
        assert!(!pager.go_to(2));
        assert_eq!(pager.current(), 2);
    }

    #[test]
    fn shrinking_set_clamps_current_page() {
        let mut pager = pager_over(50, 5);
        assert_eq!(pager.current(), 5);
        pager.reset_for(12, true);
        assert_eq!(pager.current(), 2);
        pager.reset_for(40, false);
        assert_eq!(pager.current(), 1);
    }

    #[test]
    fn empty_set_keeps_page_and_hides_controls() {
        let items: Vec<u8> = Vec::new();
        let pager = pager_over(0, 3);
        assert_eq!(pager.total_pages(), 0);
        assert_eq!(pager.current(), 3);
        assert!(pager.slice(&items).is_empty());
        assert!(pager.controls().is_none());
        assert_eq!(pager.summary(), "No patients to show");
    }

    #[test]
    fn page_window_stays_within_bounds() {
        assert_eq!(pager_over(100, 1).page_window(), 1..=5);
        assert_eq!(pager_over(100, 3).page_window(), 1..=5);
        assert_eq!(pager_over(100, 6).page_window(), 4..=8);
        assert_eq!(pager_over(100, 10).page_window(), 6..=10);
        assert_eq!(pager_over(100, 9).page_window(), 6..=10);
        assert_eq!(pager_over(25, 2).page_window(), 1..=3);
        assert_eq!(pager_over(5, 1).page_window(), 1..=1);
    }

    #[test]
    fn boundary_shortcuts_are_disabled() {
        let first = pager_over(30, 1).controls().expect("controls");
        assert!(!first.first_enabled && !first.prev_enabled);
        assert!(first.next_enabled && first.last_enabled);

        let last = pager_over(30, 3).controls().expect("controls");
        assert!(last.first_enabled && last.prev_enabled);
        assert!(!last.next_enabled && !last.last_enabled);
    }
}
