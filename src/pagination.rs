use serde::Serialize;

pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageQuery {
    pub offset: u64,
    pub limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// The load-more control stays; `remaining` is known when the backend
    /// reports a total.
    More { remaining: Option<u64> },
    /// The control is removed.
    Exhausted,
}

/// Issued with every older-page query. Reloading or clearing the list
/// invalidates tickets issued before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTicket {
    pub query: PageQuery,
    generation: u64,
}

/// Tracks how far back the endpoint's request list has been loaded.
#[derive(Debug, Clone)]
pub struct Paginator {
    offset: u64,
    total: Option<u64>,
    page_size: u32,
    has_more: bool,
    loading: bool,
    generation: u64,
}

impl Paginator {
    pub fn new(page_size: u32) -> Self {
        Self {
            offset: 0,
            total: None,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            has_more: false,
            loading: false,
            generation: 0,
        }
    }

    pub fn first_page(&self) -> PageQuery {
        PageQuery {
            offset: 0,
            limit: self.page_size,
        }
    }

    /// Restarts tracking from a freshly loaded first page.
    pub fn reset(&mut self, loaded: usize, has_more: bool, total: Option<u64>) -> PageOutcome {
        self.offset = 0;
        self.total = None;
        self.has_more = true;
        self.loading = false;
        self.generation += 1;
        self.record(loaded, has_more, total)
    }

    /// Ticket for the next page, or `None` while a page is in flight or
    /// once nothing remains. Marks the paginator as loading.
    pub fn begin(&mut self) -> Option<PageTicket> {
        if self.loading || !self.has_more {
            return None;
        }
        self.loading = true;
        Some(PageTicket {
            query: PageQuery {
                offset: self.offset,
                limit: self.page_size,
            },
            generation: self.generation,
        })
    }

    /// False once the list was reloaded or cleared after `ticket` was issued.
    pub fn is_current(&self, ticket: &PageTicket) -> bool {
        ticket.generation == self.generation
    }

    pub fn record(&mut self, returned: usize, has_more: bool, total: Option<u64>) -> PageOutcome {
        self.loading = false;
        if total.is_some() {
            self.total = total;
        }
        self.offset += returned as u64;

        let reached_total = self.total.is_some_and(|total| self.offset >= total);
        if returned == 0 || !has_more || reached_total {
            self.has_more = false;
            return PageOutcome::Exhausted;
        }
        self.has_more = true;
        PageOutcome::More {
            remaining: self.remaining(),
        }
    }

    /// A failed fetch leaves the control in place so it can be retried.
    pub fn abort(&mut self) {
        self.loading = false;
    }

    /// A request was prepended live; the backend's newest-first window has
    /// moved one slot.
    pub fn item_inserted(&mut self) {
        self.offset += 1;
        if let Some(total) = self.total.as_mut() {
            *total += 1;
        }
    }

    /// A loaded request was deleted on the backend.
    pub fn item_removed(&mut self) {
        self.offset = self.offset.saturating_sub(1);
        if let Some(total) = self.total.as_mut() {
            *total = total.saturating_sub(1);
        }
    }

    pub fn clear(&mut self) {
        self.offset = 0;
        self.total = Some(0);
        self.has_more = false;
        self.loading = false;
        self.generation += 1;
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn remaining(&self) -> Option<u64> {
        self.total.map(|total| total.saturating_sub(self.offset))
    }

    /// Text of the load-more control, if it is shown.
    pub fn control_label(&self) -> Option<String> {
        if !self.has_more {
            return None;
        }
        Some(match self.remaining() {
            Some(remaining) => format!("Load More ({remaining} remaining)"),
            None => "Load More".to_string(),
        })
    }
}
