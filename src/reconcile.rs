use std::time::Duration;
use tracing::{debug, info};

use crate::decode::{NewRequest, PushEvent};
use crate::models::RequestId;
use crate::view::{EndpointBoard, EndpointPage, PageContext, RequestEntry};

pub const DEFAULT_HIGHLIGHT_FADE: Duration = Duration::from_millis(100);
pub const DEFAULT_RELOAD_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Synthesize the new entry locally.
    Incremental,
    /// Reload the whole page after the given delay, letting the backend
    /// finish the write that triggered the event.
    ReloadAfter(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The event belongs to another endpoint.
    Ignored,
    CounterIncremented { slug: String, count: u64 },
    Prepended { request_id: RequestId, fade_after: Duration },
    /// Local state cannot absorb the event cheaply.
    Reload { after: Duration },
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    mode: ReconcileMode,
    highlight_fade: Duration,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(ReconcileMode::Incremental, DEFAULT_HIGHLIGHT_FADE)
    }
}

impl Reconciler {
    pub fn new(mode: ReconcileMode, highlight_fade: Duration) -> Self {
        Self {
            mode,
            highlight_fade,
        }
    }

    pub fn mode(&self) -> ReconcileMode {
        self.mode
    }

    pub fn apply(&self, page: &mut PageContext, event: &PushEvent) -> Reconciliation {
        match event {
            PushEvent::NewRequest(event) => match page {
                PageContext::Board(board) => self.apply_to_board(board, event),
                PageContext::Endpoint(page) => self.apply_to_endpoint(page, event),
            },
        }
    }

    fn apply_to_board(&self, board: &mut EndpointBoard, event: &NewRequest) -> Reconciliation {
        match board.find_mut(&event.endpoint) {
            Some(card) => {
                card.request_count += 1;
                card.last_activity = Some(event.timestamp);
                debug!("card {} now at {} requests", card.slug, card.request_count);
                Reconciliation::CounterIncremented {
                    slug: card.slug.clone(),
                    count: card.request_count,
                }
            }
            None => {
                info!("no card for {}, reloading board", event.endpoint);
                Reconciliation::Reload {
                    after: Duration::ZERO,
                }
            }
        }
    }

    fn apply_to_endpoint(&self, page: &mut EndpointPage, event: &NewRequest) -> Reconciliation {
        if !page.endpoint.matches(&event.endpoint) {
            debug!(
                "request {} is for {}, not {}",
                event.request_id, event.endpoint, page.endpoint
            );
            return Reconciliation::Ignored;
        }

        match self.mode {
            ReconcileMode::ReloadAfter(after) => Reconciliation::Reload { after },
            ReconcileMode::Incremental => {
                let entry = RequestEntry::from_event(event, page.slug());
                page.list.prepend(entry);
                Reconciliation::Prepended {
                    request_id: event.request_id,
                    fade_after: self.highlight_fade,
                }
            }
        }
    }
}
