//! Client-held render state: the endpoint board and one endpoint's request
//! list. Both are plain values; the session mutates them, nothing else does.

use chrono::{DateTime, Local, Utc};

use crate::decode::NewRequest;
use crate::detail::DetailPane;
use crate::models::{EndpointRef, RequestId, RequestPage, RequestSummary, WebhookEndpoint};
use crate::pagination::{PageOutcome, PageTicket, Paginator};
use crate::render::format_entry_time;

/// Shown until the backend reports a real status for the request.
pub const STATUS_PLACEHOLDER: &str = "200 OK";

#[derive(Debug, Clone, PartialEq)]
pub struct RequestEntry {
    pub request_id: RequestId,
    pub timestamp: Option<DateTime<Utc>>,
    pub body_length: Option<u64>,
    pub path: String,
    pub status: String,
    pub active: bool,
    pub highlighted: bool,
}

impl RequestEntry {
    pub fn from_event(event: &NewRequest, slug: &str) -> Self {
        Self {
            request_id: event.request_id,
            timestamp: Some(event.timestamp),
            body_length: event.body_length,
            path: format!("/{slug}"),
            status: STATUS_PLACEHOLDER.to_string(),
            active: false,
            highlighted: true,
        }
    }

    pub fn from_summary(summary: &RequestSummary, slug: &str) -> Self {
        Self {
            request_id: summary.id,
            timestamp: summary.timestamp,
            body_length: summary.body_length,
            path: format!("/{slug}"),
            status: STATUS_PLACEHOLDER.to_string(),
            active: false,
            highlighted: false,
        }
    }

    pub fn time_label(&self) -> String {
        match &self.timestamp {
            Some(timestamp) => format_entry_time(timestamp, &Local),
            None => "Unknown".to_string(),
        }
    }

    pub fn size_label(&self) -> String {
        match self.body_length {
            Some(length) => format!("{length} bytes"),
            None => "-- bytes".to_string(),
        }
    }
}

/// One endpoint's captured requests, newest first. Index 0 is the head of
/// the list; older pages are appended behind the loaded entries.
#[derive(Debug, Clone)]
pub struct RequestList {
    slug: String,
    entries: Vec<RequestEntry>,
    total: u64,
    pager: Paginator,
    paged: bool,
}

impl RequestList {
    pub fn new(slug: impl Into<String>, page_size: u32) -> Self {
        Self {
            slug: slug.into(),
            entries: Vec::new(),
            total: 0,
            pager: Paginator::new(page_size),
            paged: false,
        }
    }

    /// Replaces the list with a freshly fetched first page.
    pub fn load_first_page(&mut self, page: &RequestPage) -> PageOutcome {
        self.entries = page
            .requests
            .iter()
            .map(|summary| RequestEntry::from_summary(summary, &self.slug))
            .collect();
        self.total = page.total.unwrap_or(self.entries.len() as u64);
        self.paged = false;
        self.pager
            .reset(self.entries.len(), page.has_more, Some(self.total))
    }

    /// Appends an older page behind the loaded entries. Returns `None`, and
    /// leaves the list alone, when the list was reloaded or cleared after
    /// `ticket` was issued.
    pub fn append_page(
        &mut self,
        ticket: &PageTicket,
        page: &RequestPage,
    ) -> Option<PageOutcome> {
        if !self.pager.is_current(ticket) {
            return None;
        }
        self.entries.extend(
            page.requests
                .iter()
                .map(|summary| RequestEntry::from_summary(summary, &self.slug)),
        );
        if let Some(total) = page.total {
            self.total = total;
        }
        self.paged = true;
        Some(
            self.pager
                .record(page.requests.len(), page.has_more, page.total),
        )
    }

    pub fn prepend(&mut self, entry: RequestEntry) {
        self.entries.insert(0, entry);
        self.total += 1;
        self.pager.item_inserted();
    }

    pub fn remove(&mut self, request_id: RequestId) -> Option<RequestEntry> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.request_id == request_id)?;
        let removed = self.entries.remove(index);
        self.total = self.total.saturating_sub(1);
        self.pager.item_removed();
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total = 0;
        self.paged = false;
        self.pager.clear();
    }

    /// Marks one entry active and every other entry inactive.
    pub fn select(&mut self, request_id: RequestId) -> bool {
        let mut found = false;
        for entry in &mut self.entries {
            entry.active = !found && entry.request_id == request_id;
            found |= entry.active;
        }
        found
    }

    pub fn selected(&self) -> Option<RequestId> {
        self.entries
            .iter()
            .find(|entry| entry.active)
            .map(|entry| entry.request_id)
    }

    pub fn clear_highlight(&mut self, request_id: RequestId) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.highlighted && entry.request_id == request_id)
        {
            Some(entry) => {
                entry.highlighted = false;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, request_id: RequestId) -> bool {
        self.entries.iter().any(|entry| entry.request_id == request_id)
    }

    pub fn entries(&self) -> &[RequestEntry] {
        &self.entries
    }

    pub fn first(&self) -> Option<&RequestEntry> {
        self.entries.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn pager(&self) -> &Paginator {
        &self.pager
    }

    pub fn pager_mut(&mut self) -> &mut Paginator {
        &mut self.pager
    }

    /// Sidebar title. After paging it reports loaded against total.
    pub fn count_label(&self) -> String {
        if self.paged {
            format!("REQUESTS ({}/{})", self.entries.len(), self.total)
        } else {
            format!("REQUESTS ({})", self.total)
        }
    }
}

/// The global listing: one card per endpoint.
#[derive(Debug, Clone, Default)]
pub struct EndpointBoard {
    cards: Vec<WebhookEndpoint>,
}

impl EndpointBoard {
    pub fn new(cards: Vec<WebhookEndpoint>) -> Self {
        Self { cards }
    }

    pub fn find_mut(&mut self, key: &EndpointRef) -> Option<&mut WebhookEndpoint> {
        self.cards.iter_mut().find(|card| card.key().matches(key))
    }

    pub fn get(&self, slug: &str) -> Option<&WebhookEndpoint> {
        self.cards.iter().find(|card| card.slug == slug)
    }

    pub fn get_mut(&mut self, slug: &str) -> Option<&mut WebhookEndpoint> {
        self.cards.iter_mut().find(|card| card.slug == slug)
    }

    pub fn insert(&mut self, card: WebhookEndpoint) {
        match self.get_mut(&card.slug) {
            Some(existing) => *existing = card,
            None => self.cards.push(card),
        }
    }

    pub fn remove(&mut self, slug: &str) -> Option<WebhookEndpoint> {
        let index = self.cards.iter().position(|card| card.slug == slug)?;
        Some(self.cards.remove(index))
    }

    pub fn cards(&self) -> &[WebhookEndpoint] {
        &self.cards
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// The single-endpoint page: its request list and the detail pane.
#[derive(Debug, Clone)]
pub struct EndpointPage {
    pub endpoint: EndpointRef,
    pub list: RequestList,
    pub detail: DetailPane,
}

impl EndpointPage {
    pub fn new(endpoint: EndpointRef, slug: impl Into<String>, page_size: u32) -> Self {
        Self {
            endpoint,
            list: RequestList::new(slug, page_size),
            detail: DetailPane::default(),
        }
    }

    pub fn slug(&self) -> &str {
        self.list.slug()
    }

    /// Removes a request and resets the detail pane if it was on display.
    pub fn remove_request(&mut self, request_id: RequestId) -> Option<RequestEntry> {
        let removed = self.list.remove(request_id);
        let was_selected = removed.as_ref().is_some_and(|entry| entry.active);
        if was_selected || self.detail.shown_request() == Some(request_id) {
            self.detail.reset();
        }
        removed
    }

    /// Drops the whole list, e.g. after "delete all".
    pub fn clear(&mut self) {
        self.list.clear();
        self.detail.reset();
    }

    /// Swaps in a reloaded first page, keeping the selection if it survived.
    pub fn reload(&mut self, page: &RequestPage) -> PageOutcome {
        let selected = self.list.selected();
        let outcome = self.list.load_first_page(page);
        match selected {
            Some(request_id) if self.list.select(request_id) => {}
            _ => self.detail.reset(),
        }
        outcome
    }
}

#[derive(Debug, Clone)]
pub enum PageContext {
    Board(EndpointBoard),
    Endpoint(EndpointPage),
}

impl PageContext {
    pub fn as_endpoint(&self) -> Option<&EndpointPage> {
        match self {
            PageContext::Endpoint(page) => Some(page),
            PageContext::Board(_) => None,
        }
    }

    pub fn as_endpoint_mut(&mut self) -> Option<&mut EndpointPage> {
        match self {
            PageContext::Endpoint(page) => Some(page),
            PageContext::Board(_) => None,
        }
    }

    pub fn as_board(&self) -> Option<&EndpointBoard> {
        match self {
            PageContext::Board(board) => Some(board),
            PageContext::Endpoint(_) => None,
        }
    }

    pub fn as_board_mut(&mut self) -> Option<&mut EndpointBoard> {
        match self {
            PageContext::Board(board) => Some(board),
            PageContext::Endpoint(_) => None,
        }
    }
}
