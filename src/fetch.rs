//! Client-side "load more" driven by a sentinel element.
//!
//! The controller runs on a single UI thread. When the sentinel scrolls into
//! view it asks for the next page only if more pages exist and no fetch is in
//! flight. Every fetch carries a ticket; results for stale tickets or for a
//! torn-down controller are dropped.

use crate::message::Page;
use async_trait::async_trait;
use std::{cell::RefCell, rc::Rc};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Handle for one active sentinel observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObservationId(Uuid);

impl ObservationId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Visibility primitive of the host environment (an intersection observer,
/// a scroll-position poll, ...).
pub trait VisibilityObserver {
    type Target;

    fn observe(&mut self, id: ObservationId, target: &Self::Target);
    fn disconnect(&mut self, id: ObservationId);
}

/// Instruction to fetch one page, issued by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub ticket: u64,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The page was stored; `loaded` items were added.
    Applied { loaded: usize },
    /// The result arrived after teardown or for a superseded request.
    Discarded,
}

pub struct FetchController<O: VisibilityObserver, T> {
    observer: O,
    observation: Option<ObservationId>,
    // Newest page first, each page chronological
    pages: Vec<Vec<T>>,
    next_cursor: Option<String>,
    has_next_page: bool,
    in_flight: Option<u64>,
    next_ticket: u64,
    torn_down: bool,
}

impl<O: VisibilityObserver, T> FetchController<O, T> {
    pub fn new(observer: O) -> Self {
        Self {
            observer,
            observation: None,
            pages: Vec::new(),
            next_cursor: None,
            has_next_page: true,
            in_flight: None,
            next_ticket: 1,
            torn_down: false,
        }
    }

    pub fn has_next_page(&self) -> bool {
        self.has_next_page
    }

    pub fn is_fetching_next_page(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Everything loaded so far, oldest first.
    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.pages.iter().rev().flatten()
    }

    /// Observe a (possibly new) sentinel after the list re-rendered.
    /// The previous observation is disconnected first, so there is never
    /// more than one.
    pub fn rearm(&mut self, target: &O::Target) {
        if self.torn_down {
            return;
        }
        if let Some(previous) = self.observation.take() {
            self.observer.disconnect(previous);
        }
        let id = ObservationId::new();
        self.observer.observe(id, target);
        self.observation = Some(id);
    }

    /// The sentinel entered the viewport.
    pub fn sentinel_visible(&mut self) -> Option<FetchRequest> {
        if self.torn_down || !self.has_next_page || self.in_flight.is_some() {
            return None;
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.in_flight = Some(ticket);

        debug!(ticket, "Requesting next page");
        Some(FetchRequest {
            ticket,
            cursor: self.next_cursor.clone(),
        })
    }

    /// Hand back the result of a fetch issued by `sentinel_visible`.
    /// A failure clears the in-flight guard so a later visibility event can
    /// retry; the error is returned to the caller.
    pub fn complete<E>(
        &mut self,
        ticket: u64,
        result: Result<Page<T>, E>,
    ) -> Result<FetchOutcome, E> {
        if self.torn_down || self.in_flight != Some(ticket) {
            debug!(ticket, "Dropping stale page");
            return Ok(FetchOutcome::Discarded);
        }
        self.in_flight = None;

        let page = result?;
        let loaded = page.items.len();
        self.has_next_page = page.has_next_page && page.next_cursor.is_some();
        self.next_cursor = page.next_cursor;
        if loaded > 0 {
            self.pages.push(page.items);
        }

        Ok(FetchOutcome::Applied { loaded })
    }

    /// The view closed: stop observing and ignore whatever is still in flight.
    pub fn teardown(&mut self) {
        if let Some(id) = self.observation.take() {
            self.observer.disconnect(id);
        }
        self.torn_down = true;
    }
}

/// Where pages come from, typically the HTTP client.
#[async_trait(?Send)]
pub trait PageSource {
    type Item;
    type Error;

    async fn fetch_page(&self, cursor: Option<String>) -> Result<Page<Self::Item>, Self::Error>;
}

/// Couples a controller with a page source on a tokio `LocalSet`.
/// Fetches run as local tasks so the UI thread keeps handling events while
/// one is suspended on the network.
pub struct HistoryFeed<O: VisibilityObserver, S: PageSource> {
    controller: Rc<RefCell<FetchController<O, S::Item>>>,
    source: Rc<S>,
}

impl<O, S> HistoryFeed<O, S>
where
    O: VisibilityObserver + 'static,
    S: PageSource + 'static,
    S::Item: 'static,
    S::Error: 'static,
{
    pub fn new(observer: O, source: S) -> Self {
        Self {
            controller: Rc::new(RefCell::new(FetchController::new(observer))),
            source: Rc::new(source),
        }
    }

    pub fn controller(&self) -> std::cell::Ref<'_, FetchController<O, S::Item>> {
        self.controller.borrow()
    }

    pub fn rearm(&self, target: &O::Target) {
        self.controller.borrow_mut().rearm(target);
    }

    pub fn teardown(&self) {
        self.controller.borrow_mut().teardown();
    }

    /// Must be called from within a `LocalSet`. Returns the spawned fetch,
    /// or `None` when the guards suppressed it.
    pub fn sentinel_visible(&self) -> Option<JoinHandle<Result<FetchOutcome, S::Error>>> {
        let request = self.controller.borrow_mut().sentinel_visible()?;
        let controller = Rc::clone(&self.controller);
        let source = Rc::clone(&self.source);

        Some(tokio::task::spawn_local(async move {
            let result = source.fetch_page(request.cursor).await;
            controller.borrow_mut().complete(request.ticket, result)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::Cell, collections::VecDeque};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingObserver {
        active: Vec<ObservationId>,
        observed: usize,
    }

    impl VisibilityObserver for RecordingObserver {
        type Target = &'static str;

        fn observe(&mut self, id: ObservationId, _target: &Self::Target) {
            self.active.push(id);
            self.observed += 1;
        }

        fn disconnect(&mut self, id: ObservationId) {
            self.active.retain(|a| *a != id);
        }
    }

    fn page(items: &[i32], next: Option<&str>) -> Page<i32> {
        Page {
            items: items.to_vec(),
            next_cursor: next.map(str::to_string),
            has_next_page: next.is_some(),
        }
    }

    #[test]
    fn one_fetch_per_visible_event() {
        let mut ctl: FetchController<_, i32> = FetchController::new(RecordingObserver::default());

        let first = ctl.sentinel_visible().unwrap();
        assert_eq!(first.cursor, None);
        assert!(ctl.is_fetching_next_page());
        // Still in flight: repeated visibility is ignored
        assert!(ctl.sentinel_visible().is_none());
        assert!(ctl.sentinel_visible().is_none());

        let outcome = ctl.complete::<()>(first.ticket, Ok(page(&[4, 5, 6], Some("c1"))));
        assert_eq!(outcome, Ok(FetchOutcome::Applied { loaded: 3 }));

        let second = ctl.sentinel_visible().unwrap();
        assert_eq!(second.cursor.as_deref(), Some("c1"));
        ctl.complete::<()>(second.ticket, Ok(page(&[1, 2, 3], None))).unwrap();

        // Exhausted: no more fetches
        assert!(!ctl.has_next_page());
        assert!(ctl.sentinel_visible().is_none());
        assert_eq!(ctl.items().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn failure_clears_the_guard() {
        let mut ctl: FetchController<_, i32> = FetchController::new(RecordingObserver::default());

        let request = ctl.sentinel_visible().unwrap();
        let outcome = ctl.complete(request.ticket, Err("network down"));
        assert_eq!(outcome, Err("network down"));
        assert!(!ctl.is_fetching_next_page());

        let retry = ctl.sentinel_visible().unwrap();
        assert_eq!(retry.cursor, None);
        assert_ne!(retry.ticket, request.ticket);
    }

    #[test]
    fn rearm_replaces_the_observation() {
        let mut ctl: FetchController<_, i32> = FetchController::new(RecordingObserver::default());

        ctl.rearm(&"sentinel-1");
        ctl.rearm(&"sentinel-2");
        ctl.rearm(&"sentinel-3");
        assert_eq!(ctl.observer().observed, 3);
        assert_eq!(ctl.observer().active.len(), 1);

        ctl.teardown();
        assert!(ctl.observer().active.is_empty());

        // Nothing re-arms after teardown
        ctl.rearm(&"sentinel-4");
        assert!(ctl.observer().active.is_empty());
        assert!(ctl.sentinel_visible().is_none());
    }

    #[test]
    fn stale_tickets_are_ignored() {
        let mut ctl: FetchController<_, i32> = FetchController::new(RecordingObserver::default());
        let request = ctl.sentinel_visible().unwrap();

        let outcome = ctl.complete::<()>(request.ticket + 10, Ok(page(&[1], None)));
        assert_eq!(outcome, Ok(FetchOutcome::Discarded));
        assert!(ctl.is_fetching_next_page());
    }

    struct GatedSource {
        gate: Rc<Notify>,
        pages: RefCell<VecDeque<Page<i32>>>,
        calls: Cell<usize>,
    }

    #[async_trait(?Send)]
    impl PageSource for GatedSource {
        type Item = i32;
        type Error = String;

        async fn fetch_page(&self, _cursor: Option<String>) -> Result<Page<i32>, String> {
            self.calls.set(self.calls.get() + 1);
            self.gate.notified().await;
            self.pages
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| "no more pages".to_string())
        }
    }

    fn feed(gate: Rc<Notify>, pages: Vec<Page<i32>>) -> HistoryFeed<RecordingObserver, GatedSource> {
        HistoryFeed::new(
            RecordingObserver::default(),
            GatedSource {
                gate,
                pages: RefCell::new(pages.into()),
                calls: Cell::new(0),
            },
        )
    }

    #[tokio::test]
    async fn feed_guards_against_reentrant_triggers() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let gate = Rc::new(Notify::new());
                let feed = feed(gate.clone(), vec![page(&[3, 4], Some("c")), page(&[1, 2], None)]);
                feed.rearm(&"sentinel");

                let fetch = feed.sentinel_visible().unwrap();
                assert!(feed.sentinel_visible().is_none());

                gate.notify_one();
                assert_eq!(fetch.await.unwrap(), Ok(FetchOutcome::Applied { loaded: 2 }));

                let fetch = feed.sentinel_visible().unwrap();
                gate.notify_one();
                fetch.await.unwrap().unwrap();

                assert!(feed.sentinel_visible().is_none());
                assert_eq!(feed.source.calls.get(), 2);
                assert_eq!(
                    feed.controller().items().copied().collect::<Vec<_>>(),
                    vec![1, 2, 3, 4]
                );
            })
            .await;
    }

    #[tokio::test]
    async fn results_after_teardown_are_discarded() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let gate = Rc::new(Notify::new());
                let feed = feed(gate.clone(), vec![page(&[1, 2], None)]);
                feed.rearm(&"sentinel");

                let fetch = feed.sentinel_visible().unwrap();
                feed.teardown();
                gate.notify_one();

                assert_eq!(fetch.await.unwrap(), Ok(FetchOutcome::Discarded));
                assert_eq!(feed.controller().items().count(), 0);
                assert!(feed.controller().observer().active.is_empty());
            })
            .await;
    }
}
