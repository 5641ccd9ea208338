//! The client-state object for one open page. A session owns the push
//! channel, the render state and every pending timer, and is driven from a
//! single task.

use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::decode::decode;
use crate::detail::{DetailOutcome, FetchTicket};
use crate::error::ClientError;
use crate::models::{EndpointRef, RequestDetail, RequestId, RequestPage, WebhookEndpoint};
use crate::pagination::{PageOutcome, PageQuery, PageTicket};
use crate::reconcile::{Reconciler, Reconciliation};
use crate::render::BodyFormat;
use crate::transport::{ConnectionState, PushChannel};
use crate::view::{EndpointBoard, EndpointPage, PageContext};

/// User actions fed to [`Session::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Select(RequestId),
    LoadMore,
    Delete(RequestId),
    DeleteAll,
    Format(BodyFormat),
    Quit,
}

/// What changed after one step of the session.
#[derive(Debug)]
pub enum Update {
    Reconciled(Reconciliation),
    /// Frames were lost to a slow consumer; a reload is on its way.
    Lagged(u64),
    HighlightCleared(RequestId),
    Selected(RequestId),
    Detail(DetailOutcome),
    Page(PageOutcome),
    PageFailed,
    /// A page requested before the list was reloaded or cleared; dropped.
    PageStale,
    /// Nothing left to load, or a page is already in flight.
    PageSkipped,
    Reloaded,
    ReloadFailed,
    Deleted(RequestId),
    Cleared(String),
    FormatChanged(bool),
    /// A user action the backend refused. Shown to the user.
    Failed(ClientError),
    Closed,
}

enum Internal {
    FadeHighlight(RequestId),
    Reload,
    DetailLoaded(FetchTicket, Result<RequestDetail, ClientError>),
    PageLoaded(PageTicket, Result<RequestPage, ClientError>),
    Reloaded(Result<Refreshed, ClientError>),
}

enum Refreshed {
    Endpoint(RequestPage),
    /// Per card: the backend total, or `None` once the endpoint is gone.
    Board(Vec<(String, Option<u64>)>),
}

pub struct Session<C: PushChannel> {
    api: ApiClient,
    channel: C,
    frames: broadcast::Receiver<String>,
    context: PageContext,
    reconciler: Reconciler,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    reload_pending: bool,
}

impl<C: PushChannel> Session<C> {
    /// Binds a session to already-rendered state and connects the channel.
    pub fn new(
        api: ApiClient,
        mut channel: C,
        context: PageContext,
        reconciler: Reconciler,
    ) -> Self {
        let frames = channel.subscribe();
        channel.ensure_connected();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            api,
            channel,
            frames,
            context,
            reconciler,
            internal_tx,
            internal_rx,
            reload_pending: false,
        }
    }

    /// Opens one endpoint's page: loads the newest page, then connects.
    pub async fn open_endpoint(
        api: ApiClient,
        channel: C,
        endpoint: EndpointRef,
        reconciler: Reconciler,
        page_size: u32,
    ) -> Result<Self, ClientError> {
        let slug = endpoint
            .slug
            .clone()
            .ok_or_else(|| ClientError::new(format!("{endpoint} has no slug to load")))?;
        let mut page = EndpointPage::new(endpoint, slug.as_str(), page_size);
        let first = api
            .fetch_requests(&slug, page.list.pager().first_page())
            .await?;
        page.list.load_first_page(&first);
        info!("loaded {} of {} requests for {slug}", page.list.len(), page.list.total());
        Ok(Self::new(api, channel, PageContext::Endpoint(page), reconciler))
    }

    pub fn open_board(
        api: ApiClient,
        channel: C,
        cards: Vec<WebhookEndpoint>,
        reconciler: Reconciler,
    ) -> Self {
        Self::new(api, channel, PageContext::Board(EndpointBoard::new(cards)), reconciler)
    }

    pub fn context(&self) -> &PageContext {
        &self.context
    }

    pub fn page(&self) -> Option<&EndpointPage> {
        self.context.as_endpoint()
    }

    pub fn board(&self) -> Option<&EndpointBoard> {
        self.context.as_board()
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.channel.state()
    }

    pub fn reload_pending(&self) -> bool {
        self.reload_pending
    }

    pub fn close(&mut self) {
        self.channel.close();
    }

    /// Drives the session until `Quit` or until the command sender goes
    /// away. Every update is handed to `on_update` after it was applied.
    pub async fn run<F>(mut self, mut commands: mpsc::Receiver<Command>, mut on_update: F)
    where
        F: FnMut(&Self, &Update),
    {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let command = match command {
                        Some(Command::Quit) | None => break,
                        Some(command) => command,
                    };
                    let update = self.handle(command).await;
                    on_update(&self, &update);
                }
                update = self.next_update() => on_update(&self, &update),
            }
        }
        self.close();
    }

    pub async fn handle(&mut self, command: Command) -> Update {
        match command {
            Command::Select(request_id) => match self.select(request_id) {
                Ok(_) => Update::Selected(request_id),
                Err(err) => Update::Failed(err),
            },
            Command::LoadMore => {
                if self.load_more() {
                    self.next_page_update().await
                } else {
                    Update::PageSkipped
                }
            }
            Command::Delete(request_id) => match self.delete_request(request_id).await {
                Ok(_) => Update::Deleted(request_id),
                Err(err) => Update::Failed(err),
            },
            Command::DeleteAll => match self.delete_all().await {
                Ok(message) => Update::Cleared(message),
                Err(err) => Update::Failed(err),
            },
            Command::Format(format) => Update::FormatChanged(self.set_body_format(format)),
            Command::Quit => {
                self.close();
                Update::Closed
            }
        }
    }

    /// Waits for the next inbound frame or timer and applies it. Frames
    /// that fail to decode, or that carry unknown kinds, are dropped here.
    /// Cancel safe: nothing is applied before a message has been received.
    pub async fn next_update(&mut self) -> Update {
        loop {
            tokio::select! {
                frame = self.frames.recv() => match frame {
                    Ok(raw) => {
                        if let Some(update) = self.on_frame(&raw) {
                            return update;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("missed {missed} push frames, reloading");
                        self.schedule_reload(Duration::ZERO);
                        return Update::Lagged(missed);
                    }
                    Err(RecvError::Closed) => {
                        // The channel lives as long as the session; only
                        // timers can still arrive.
                        let message = self.internal_rx.recv().await;
                        let update = message.and_then(|message| self.on_internal(message));
                        if let Some(update) = update {
                            return update;
                        }
                    }
                },
                Some(message) = self.internal_rx.recv() => {
                    if let Some(update) = self.on_internal(message) {
                        return update;
                    }
                }
            }
        }
    }

    /// Makes `request_id` the active entry and fetches its payload.
    pub fn select(&mut self, request_id: RequestId) -> Result<FetchTicket, ClientError> {
        let page = self.endpoint_page_mut()?;
        if !page.list.select(request_id) {
            return Err(ClientError::new(format!("request {request_id} is not listed")));
        }
        let ticket = page.detail.begin(request_id);

        let api = self.api.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_request(request_id).await;
            let _ = tx.send(Internal::DetailLoaded(ticket, result));
        });
        Ok(ticket)
    }

    /// Starts fetching the next older page. Returns false when there is
    /// nothing to load or a page is already in flight.
    pub fn load_more(&mut self) -> bool {
        let Some(page) = self.context.as_endpoint_mut() else {
            return false;
        };
        let Some(ticket) = page.list.pager_mut().begin() else {
            return false;
        };
        let slug = page.slug().to_string();
        debug!("loading page at offset {} for {slug}", ticket.query.offset);
        self.spawn_page_fetch(slug, ticket);
        true
    }

    pub async fn delete_request(&mut self, request_id: RequestId) -> Result<(), ClientError> {
        self.endpoint_page_mut()?;
        self.api.delete_request(request_id).await?;
        if let Some(page) = self.context.as_endpoint_mut() {
            page.remove_request(request_id);
        }
        Ok(())
    }

    /// Deletes every captured request of the bound endpoint.
    pub async fn delete_all(&mut self) -> Result<String, ClientError> {
        let slug = self.endpoint_page_mut()?.slug().to_string();
        let message = self.api.delete_all_requests(&slug).await?;
        if let Some(page) = self.context.as_endpoint_mut() {
            page.clear();
        }
        info!("{message}");
        Ok(message)
    }

    pub fn set_body_format(&mut self, format: BodyFormat) -> bool {
        self.context
            .as_endpoint_mut()
            .is_some_and(|page| page.detail.set_body_format(format))
    }

    pub async fn create_webhook(&mut self, name: &str) -> Result<WebhookEndpoint, ClientError> {
        let card = self.api.create_webhook(name).await?;
        if let Some(board) = self.context.as_board_mut() {
            board.insert(card.clone());
        }
        Ok(card)
    }

    pub async fn toggle_pause(&mut self, slug: &str) -> Result<bool, ClientError> {
        let active = self.api.toggle_pause(slug).await?;
        if let Some(card) = self.context.as_board_mut().and_then(|board| board.get_mut(slug)) {
            card.active = active;
        }
        Ok(active)
    }

    pub async fn delete_webhook(&mut self, slug: &str) -> Result<(), ClientError> {
        self.api.delete_webhook(slug).await?;
        if let Some(board) = self.context.as_board_mut() {
            board.remove(slug);
        }
        Ok(())
    }

    fn endpoint_page_mut(&mut self) -> Result<&mut EndpointPage, ClientError> {
        self.context
            .as_endpoint_mut()
            .ok_or_else(|| ClientError::new("no endpoint page is open"))
    }

    fn on_frame(&mut self, raw: &str) -> Option<Update> {
        let event = match decode(raw) {
            Ok(Some(event)) => event,
            Ok(None) => return None,
            Err(err) => {
                warn!("dropping push frame: {err}");
                return None;
            }
        };

        let outcome = self.reconciler.apply(&mut self.context, &event);
        match &outcome {
            Reconciliation::Prepended {
                request_id,
                fade_after,
            } => self.post_after(*fade_after, Internal::FadeHighlight(*request_id)),
            Reconciliation::Reload { after } => self.schedule_reload(*after),
            Reconciliation::CounterIncremented { .. } | Reconciliation::Ignored => {}
        }
        Some(Update::Reconciled(outcome))
    }

    fn on_internal(&mut self, message: Internal) -> Option<Update> {
        match message {
            Internal::FadeHighlight(request_id) => {
                let page = self.context.as_endpoint_mut()?;
                page.list
                    .clear_highlight(request_id)
                    .then_some(Update::HighlightCleared(request_id))
            }
            Internal::Reload => {
                self.spawn_reload();
                None
            }
            Internal::DetailLoaded(ticket, result) => {
                if let Err(err) = &result {
                    warn!("loading request {} failed: {err}", ticket.request_id);
                }
                let page = self.context.as_endpoint_mut()?;
                Some(Update::Detail(page.detail.complete(ticket, result)))
            }
            Internal::PageLoaded(ticket, result) => {
                let page = self.context.as_endpoint_mut()?;
                if !page.list.pager().is_current(&ticket) {
                    debug!(
                        "dropping page at offset {} fetched before a reload",
                        ticket.query.offset
                    );
                    return Some(Update::PageStale);
                }
                match result {
                    Ok(next) => page.list.append_page(&ticket, &next).map(Update::Page),
                    Err(err) => {
                        warn!("loading older requests for {} failed: {err}", page.slug());
                        page.list.pager_mut().abort();
                        Some(Update::PageFailed)
                    }
                }
            }
            Internal::Reloaded(result) => {
                self.reload_pending = false;
                match result {
                    Ok(refreshed) => {
                        self.apply_refresh(refreshed);
                        Some(Update::Reloaded)
                    }
                    Err(err) => {
                        warn!("reload failed: {err}");
                        Some(Update::ReloadFailed)
                    }
                }
            }
        }
    }

    async fn next_page_update(&mut self) -> Update {
        loop {
            match self.next_update().await {
                update @ (Update::Page(_) | Update::PageFailed | Update::PageStale) => {
                    return update;
                }
                other => debug!("applied {other:?} while a page was loading"),
            }
        }
    }

    fn apply_refresh(&mut self, refreshed: Refreshed) {
        match (refreshed, &mut self.context) {
            (Refreshed::Endpoint(first), PageContext::Endpoint(page)) => {
                page.reload(&first);
            }
            (Refreshed::Board(counts), PageContext::Board(board)) => {
                for (slug, total) in counts {
                    match total {
                        Some(total) => {
                            if let Some(card) = board.get_mut(&slug) {
                                card.request_count = total;
                            }
                        }
                        None => {
                            info!("endpoint {slug} no longer exists");
                            board.remove(&slug);
                        }
                    }
                }
            }
            _ => debug!("dropping a refresh for a page that is no longer open"),
        }
    }

    /// Arms the delayed reload unless one is already pending.
    fn schedule_reload(&mut self, after: Duration) {
        if self.reload_pending {
            debug!("reload already pending");
            return;
        }
        self.reload_pending = true;
        self.post_after(after, Internal::Reload);
    }

    fn spawn_reload(&self) {
        let api = self.api.clone();
        let tx = self.internal_tx.clone();
        match &self.context {
            PageContext::Endpoint(page) => {
                let slug = page.slug().to_string();
                let query = page.list.pager().first_page();
                tokio::spawn(async move {
                    let result = api
                        .fetch_requests(&slug, query)
                        .await
                        .map(Refreshed::Endpoint);
                    let _ = tx.send(Internal::Reloaded(result));
                });
            }
            PageContext::Board(board) => {
                let slugs: Vec<String> =
                    board.cards().iter().map(|card| card.slug.clone()).collect();
                tokio::spawn(async move {
                    let mut counts = Vec::with_capacity(slugs.len());
                    for slug in slugs {
                        let probe = PageQuery { offset: 0, limit: 1 };
                        match api.fetch_requests(&slug, probe).await {
                            Ok(page) => {
                                let total = page.total.unwrap_or(page.requests.len() as u64);
                                counts.push((slug, Some(total)));
                            }
                            Err(err) if err.is_not_found() => counts.push((slug, None)),
                            Err(err) => {
                                let _ = tx.send(Internal::Reloaded(Err(err)));
                                return;
                            }
                        }
                    }
                    let _ = tx.send(Internal::Reloaded(Ok(Refreshed::Board(counts))));
                });
            }
        }
    }

    fn spawn_page_fetch(&self, slug: String, ticket: PageTicket) {
        let api = self.api.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_requests(&slug, ticket.query).await;
            let _ = tx.send(Internal::PageLoaded(ticket, result));
        });
    }

    fn post_after(&self, after: Duration, message: Internal) {
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            if !after.is_zero() {
                tokio::time::sleep(after).await;
            }
            let _ = tx.send(message);
        });
    }
}
