use chrono::Local;
use std::collections::BTreeMap;

use crate::models::{RequestDetail, RequestId};
use crate::render::{
    BodyFormat, RenderedBody, format_detail_time, render_body, render_raw, render_table_rows,
};
use crate::view::STATUS_PLACEHOLDER;

pub const DETAIL_PLACEHOLDER: &str = "Select a request to view details";
/// The backend does not record response latency.
pub const LATENCY_PLACEHOLDER: &str = "--";

/// Identifies one detail fetch. Only the most recently issued ticket may
/// update the pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    seq: u64,
    pub request_id: RequestId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDetail {
    pub request_id: RequestId,
    pub status_label: String,
    pub timestamp_label: String,
    pub latency_label: String,
    pub size_label: String,
    pub body: RenderedBody,
    raw_body: String,
    pub headers: BTreeMap<String, String>,
    pub headers_html: String,
    pub query_params: BTreeMap<String, String>,
    pub query_html: String,
}

impl RenderedDetail {
    pub fn render(request_id: RequestId, detail: &RequestDetail) -> Self {
        let status_label = match detail.status_code {
            Some(code) => match reqwest::StatusCode::from_u16(code)
                .ok()
                .and_then(|status| status.canonical_reason())
            {
                Some(reason) => format!("{code} {reason}"),
                None => code.to_string(),
            },
            None => STATUS_PLACEHOLDER.to_string(),
        };
        let latency_label = detail
            .response_time_ms
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| LATENCY_PLACEHOLDER.to_string());
        let timestamp_label = detail
            .timestamp
            .map(|timestamp| format_detail_time(&timestamp, &Local))
            .unwrap_or_else(|| "N/A".to_string());

        Self {
            request_id,
            status_label,
            timestamp_label,
            latency_label,
            size_label: format!("{} bytes", detail.body.len()),
            body: render_body(&detail.body),
            raw_body: detail.body.clone(),
            headers: detail.headers.clone(),
            headers_html: render_table_rows(&detail.headers, "No headers"),
            query_params: detail.query_params.clone(),
            query_html: render_table_rows(&detail.query_params, "No query parameters"),
        }
    }

    pub fn raw_body(&self) -> &str {
        &self.raw_body
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetailState {
    Empty,
    Loading {
        ticket: FetchTicket,
        previous: Option<Box<RenderedDetail>>,
    },
    Loaded(Box<RenderedDetail>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailOutcome {
    Applied,
    Stale,
    Failed,
}

#[derive(Debug, Clone)]
pub struct DetailPane {
    state: DetailState,
    issued: u64,
}

impl Default for DetailPane {
    fn default() -> Self {
        Self {
            state: DetailState::Empty,
            issued: 0,
        }
    }
}

impl DetailPane {
    /// Issues a ticket for a new fetch; any older ticket becomes stale.
    pub fn begin(&mut self, request_id: RequestId) -> FetchTicket {
        self.issued += 1;
        let ticket = FetchTicket {
            seq: self.issued,
            request_id,
        };
        let previous = match std::mem::replace(&mut self.state, DetailState::Empty) {
            DetailState::Empty => None,
            DetailState::Loading { previous, .. } => previous,
            DetailState::Loaded(rendered) => Some(rendered),
        };
        self.state = DetailState::Loading { ticket, previous };
        ticket
    }

    pub fn complete<E>(
        &mut self,
        ticket: FetchTicket,
        result: Result<RequestDetail, E>,
    ) -> DetailOutcome {
        if ticket.seq != self.issued {
            return DetailOutcome::Stale;
        }
        let previous = match std::mem::replace(&mut self.state, DetailState::Empty) {
            DetailState::Loading { previous, .. } => previous,
            DetailState::Loaded(rendered) => Some(rendered),
            DetailState::Empty => None,
        };
        match result {
            Ok(detail) => {
                let rendered = RenderedDetail::render(ticket.request_id, &detail);
                self.state = DetailState::Loaded(Box::new(rendered));
                DetailOutcome::Applied
            }
            Err(_) => {
                self.state = match previous {
                    Some(rendered) => DetailState::Loaded(rendered),
                    None => DetailState::Empty,
                };
                DetailOutcome::Failed
            }
        }
    }

    /// Back to the placeholder. Outstanding fetches become stale.
    pub fn reset(&mut self) {
        self.issued += 1;
        self.state = DetailState::Empty;
    }

    /// Switches the body view between formatted JSON and raw text. Returns
    /// false when nothing is loaded or the body is not JSON.
    pub fn set_body_format(&mut self, format: BodyFormat) -> bool {
        let DetailState::Loaded(rendered) = &mut self.state else {
            return false;
        };
        let body = match format {
            BodyFormat::Json => render_body(&rendered.raw_body),
            BodyFormat::Raw => render_raw(&rendered.raw_body),
        };
        if body.format != format {
            return false;
        }
        rendered.body = body;
        true
    }

    pub fn state(&self) -> &DetailState {
        &self.state
    }

    pub fn loaded(&self) -> Option<&RenderedDetail> {
        match &self.state {
            DetailState::Loaded(rendered) => Some(&**rendered),
            _ => None,
        }
    }

    /// Request whose data is on screen, if any.
    pub fn shown_request(&self) -> Option<RequestId> {
        self.loaded().map(|rendered| rendered.request_id)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, DetailState::Loading { .. })
    }

    /// Body text currently shown, or the placeholder.
    pub fn body_text(&self) -> &str {
        match &self.state {
            DetailState::Loaded(rendered) => &rendered.body.text,
            DetailState::Loading {
                previous: Some(rendered),
                ..
            } => &rendered.body.text,
            _ => DETAIL_PLACEHOLDER,
        }
    }
}
