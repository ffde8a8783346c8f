//! Client-side notification list
//!
//! Holds the visible list for one screen and reconciles it with REST pages,
//! pushed notifications and the user's optimistic edits.
//!
//! Mutation policy:
//! - read marking flips local state first and syncs best-effort; a failed
//!   sync is logged and not rolled back (marking read is idempotent)
//! - delete removes first and restores the exact previous list if the
//!   server rejects it
//!
//! Every state change that follows an `.await` or a delay checks the feed's
//! cancellation token first, so results arriving after [`NotificationFeed::close`]
//! are dropped.

use koi_common::{ClientError, FeedConfig, Notification, NotificationFilter, Result};
use koi_realtime::{NotificationDispatcher, Subscription};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::NotificationsApi;
use crate::ordering::{merge_unique, sort_for_filter};

#[derive(Clone)]
pub struct NotificationFeed {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    api: Arc<dyn NotificationsApi>,
    config: FeedConfig,
    state: Mutex<FeedState>,
    cancel: CancellationToken,
    attachment: Mutex<Option<Attachment>>,
}

#[derive(Default)]
struct FeedState {
    filter: NotificationFilter,
    items: Vec<Notification>,
    page_number: u32,
    has_more: bool,
    /// Bumped when a `fetch` starts and again when its page is committed;
    /// page results carrying an older value are discarded
    fetch_seq: u64,
}

struct Attachment {
    dispatcher: NotificationDispatcher,
    subscription: Subscription,
    previous_show_toast: bool,
}

impl NotificationFeed {
    pub fn new(api: Arc<dyn NotificationsApi>, config: FeedConfig) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                api,
                config,
                state: Mutex::new(FeedState::default()),
                cancel: CancellationToken::new(),
                attachment: Mutex::new(None),
            }),
        }
    }

    /// Replace the list with page 1 under `filter`.
    ///
    /// The active filter only changes once the page is accepted; a failed
    /// fetch leaves the previous list and filter in place.
    pub async fn fetch(&self, filter: NotificationFilter) -> Result<()> {
        self.ensure_open()?;

        let seq = {
            let mut state = self.inner.state.lock();
            state.fetch_seq += 1;
            state.fetch_seq
        };

        let page = self
            .inner
            .api
            .fetch_page(filter, 1, self.inner.config.page_size)
            .await;
        self.ensure_open()?;
        let page = page?;

        let mut state = self.inner.state.lock();
        if state.fetch_seq != seq {
            debug!("Discarding superseded notification page");
            return Ok(());
        }

        let has_more = page.has_more();
        let mut items = merge_unique(Vec::new(), page.items);
        sort_for_filter(&mut items, filter);

        state.filter = filter;
        state.items = items;
        state.page_number = 1;
        state.has_more = has_more;
        state.fetch_seq += 1;
        debug!(count = state.items.len(), ?filter, "Notifications fetched");
        Ok(())
    }

    /// Append the next page. Returns `false` when there was nothing more to load.
    pub async fn load_more(&self) -> Result<bool> {
        self.ensure_open()?;

        let (filter, next_page, seq) = {
            let state = self.inner.state.lock();
            if !state.has_more {
                return Ok(false);
            }
            (state.filter, state.page_number + 1, state.fetch_seq)
        };

        let page = self
            .inner
            .api
            .fetch_page(filter, next_page, self.inner.config.page_size)
            .await;
        self.ensure_open()?;
        let page = page?;

        let mut state = self.inner.state.lock();
        if state.fetch_seq != seq || state.page_number + 1 != next_page {
            debug!("Discarding stale notification page");
            return Ok(false);
        }

        let has_more = page.has_more();
        let mut items = merge_unique(std::mem::take(&mut state.items), page.items);
        sort_for_filter(&mut items, filter);

        state.items = items;
        state.page_number = next_page;
        state.has_more = has_more;
        Ok(true)
    }

    /// Mark one notification read, optimistically
    pub async fn mark_as_read(&self, id: &str) -> Result<()> {
        self.ensure_open()?;

        let hide_after_delay = {
            let mut state = self.inner.state.lock();
            let Some(item) = state.items.iter_mut().find(|n| n.id == id) else {
                debug!(%id, "Notification not in list");
                return Ok(());
            };
            if item.is_read {
                return Ok(());
            }
            item.is_read = true;
            state.filter == NotificationFilter::Unread
        };

        if hide_after_delay {
            self.schedule_read_removal(Some(id.to_string()));
        }

        if let Err(e) = self.inner.api.mark_as_read(id).await {
            warn!(%id, error = %e, "Failed to sync read state, keeping local change");
        }
        self.ensure_open()
    }

    /// Mark every listed notification read, optimistically
    pub async fn mark_all_as_read(&self) -> Result<()> {
        self.ensure_open()?;

        let hide_after_delay = {
            let mut state = self.inner.state.lock();
            for item in state.items.iter_mut() {
                item.is_read = true;
            }
            state.filter == NotificationFilter::Unread
        };

        if hide_after_delay {
            self.schedule_read_removal(None);
        }

        if let Err(e) = self.inner.api.mark_all_as_read().await {
            warn!(error = %e, "Failed to sync mark-all-read, keeping local change");
        }
        self.ensure_open()
    }

    /// Remove a notification; restores the previous list if the server rejects it
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.ensure_open()?;

        let snapshot = {
            let mut state = self.inner.state.lock();
            if !state.items.iter().any(|n| n.id == id) {
                debug!(%id, "Notification not in list");
                return Ok(());
            }
            let snapshot = state.items.clone();
            state.items.retain(|n| n.id != id);
            snapshot
        };

        let result = self.inner.api.delete(id).await;
        self.ensure_open()?;

        if let Err(e) = result {
            warn!(%id, error = %e, "Delete rejected, restoring list");
            self.inner.state.lock().items = snapshot;
            return Err(e);
        }

        info!(%id, "Notification deleted");
        Ok(())
    }

    /// Merge a pushed notification. Returns whether it was added.
    pub fn apply_push(&self, notification: Notification) -> bool {
        self.inner.apply_push(notification)
    }

    /// Feed pushes from `dispatcher` into this list and suppress its toasts
    /// while attached
    pub fn attach_to(&self, dispatcher: &NotificationDispatcher) {
        self.detach();

        let weak = Arc::downgrade(&self.inner);
        let subscription = dispatcher.on_notification(move |notification| {
            if let Some(inner) = weak.upgrade() {
                inner.apply_push(notification.clone());
            }
        });

        let previous_show_toast = dispatcher.show_toast();
        dispatcher.set_show_toast(false);

        *self.inner.attachment.lock() = Some(Attachment {
            dispatcher: dispatcher.clone(),
            subscription,
            previous_show_toast,
        });
    }

    pub fn detach(&self) {
        let attachment = self.inner.attachment.lock().take();
        if let Some(attachment) = attachment {
            attachment.subscription.unsubscribe();
            attachment
                .dispatcher
                .set_show_toast(attachment.previous_show_toast);
        }
    }

    /// Stop accepting results; pending requests and delayed removals are dropped
    pub fn close(&self) {
        self.inner.cancel.cancel();
        self.detach();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn items(&self) -> Vec<Notification> {
        self.inner.state.lock().items.clone()
    }

    pub fn filter(&self) -> NotificationFilter {
        self.inner.state.lock().filter
    }

    pub fn has_more(&self) -> bool {
        self.inner.state.lock().has_more
    }

    pub fn unread_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .items
            .iter()
            .filter(|n| !n.is_read)
            .count()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            Err(ClientError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// After the transition delay, drop read items (all, or just `id`) if the
    /// list is still filtered to unread
    fn schedule_read_removal(&self, id: Option<String>) {
        let inner = self.inner.clone();
        let delay = self.inner.config.read_transition_delay;

        tokio::spawn(async move {
            tokio::select! {
                _ = inner.cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let mut state = inner.state.lock();
                    if state.filter != NotificationFilter::Unread {
                        return;
                    }
                    match &id {
                        Some(id) => state.items.retain(|n| !(n.id == *id && n.is_read)),
                        None => state.items.retain(|n| !n.is_read),
                    }
                }
            }
        });
    }
}

impl FeedInner {
    fn apply_push(&self, notification: Notification) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }

        let mut state = self.state.lock();
        if state.items.iter().any(|n| n.id == notification.id) {
            debug!(id = %notification.id, "Duplicate push ignored");
            return false;
        }
        if !state.filter.matches(&notification) {
            return false;
        }

        state.items.insert(0, notification);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockNotificationsApi;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use koi_common::{ChannelToastSink, NotificationPage, NotificationType};
    use std::collections::HashSet;
    use std::time::Duration;

    fn at(id: &str, minutes: i64, is_read: bool) -> Notification {
        let base = Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).unwrap();
        let mut n = Notification::new(
            id,
            NotificationType::Registration,
            format!("Title {}", id),
            "Body",
            base + ChronoDuration::minutes(minutes),
        );
        n.is_read = is_read;
        n
    }

    fn page(items: Vec<Notification>, page_number: u32, total_pages: u32) -> NotificationPage {
        let total_items = items.len() as u64;
        NotificationPage {
            items,
            page_number,
            page_size: 10,
            total_items,
            total_pages,
        }
    }

    fn config() -> FeedConfig {
        FeedConfig {
            page_size: 10,
            read_transition_delay: Duration::from_millis(30),
        }
    }

    fn feed_with(api: MockNotificationsApi) -> NotificationFeed {
        NotificationFeed::new(Arc::new(api), config())
    }

    fn ids(feed: &NotificationFeed) -> Vec<String> {
        feed.items().into_iter().map(|n| n.id).collect()
    }

    fn rejected() -> ClientError {
        ClientError::Http {
            status: 500,
            message: Some("Could not delete".to_string()),
        }
    }

    #[tokio::test]
    async fn test_fetch_all_orders_unread_first() {
        let mut api = MockNotificationsApi::new();
        api.expect_fetch_page()
            .withf(|filter, page, size| *filter == NotificationFilter::All && *page == 1 && *size == 10)
            .returning(|_, _, _| {
                Ok(page(
                    vec![at("r1", 50, true), at("u1", 10, false), at("u2", 40, false), at("r2", 5, true)],
                    1,
                    1,
                ))
            });

        let feed = feed_with(api);
        feed.fetch(NotificationFilter::All).await.unwrap();

        assert_eq!(ids(&feed), ["u2", "u1", "r1", "r2"]);
        assert_eq!(feed.unread_count(), 2);
        assert!(!feed.has_more());
    }

    #[tokio::test]
    async fn test_fetch_read_filter_orders_by_date() {
        let mut api = MockNotificationsApi::new();
        api.expect_fetch_page().returning(|_, _, _| {
            Ok(page(vec![at("a", 5, true), at("b", 50, true), at("c", 20, true)], 1, 1))
        });

        let feed = feed_with(api);
        feed.fetch(NotificationFilter::Read).await.unwrap();

        assert_eq!(ids(&feed), ["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_load_more_appends_unique_and_sorted() {
        let mut api = MockNotificationsApi::new();
        api.expect_fetch_page()
            .withf(|_, page, _| *page == 1)
            .times(1)
            .returning(|_, _, _| {
                let items = (0..10).map(|i| at(&format!("p1-{}", i), 100 - i, false)).collect();
                Ok(page(items, 1, 2))
            });
        api.expect_fetch_page()
            .withf(|_, page, _| *page == 2)
            .times(1)
            .returning(|_, _, _| {
                // Overlaps the first page by one id
                let mut items: Vec<_> = (0..5).map(|i| at(&format!("p2-{}", i), 50 - i, false)).collect();
                items.push(at("p1-9", 91, false));
                Ok(page(items, 2, 2))
            });

        let feed = feed_with(api);
        feed.fetch(NotificationFilter::Unread).await.unwrap();
        assert!(feed.has_more());
        assert!(feed.load_more().await.unwrap());

        let items = feed.items();
        assert_eq!(items.len(), 15);
        let unique: HashSet<_> = items.iter().map(|n| n.id.clone()).collect();
        assert_eq!(unique.len(), 15);
        assert!(items.windows(2).all(|w| w[0].sent_date >= w[1].sent_date));

        assert!(!feed.has_more());
        assert!(!feed.load_more().await.unwrap());
    }

    #[tokio::test]
    async fn test_rejected_delete_restores_exact_list() {
        let mut api = MockNotificationsApi::new();
        api.expect_fetch_page().returning(|_, _, _| {
            Ok(page(vec![at("a", 30, false), at("b", 20, true), at("c", 10, false)], 1, 1))
        });
        api.expect_delete()
            .withf(|id| id == "b")
            .times(1)
            .returning(|_| Err(rejected()));

        let feed = feed_with(api);
        feed.fetch(NotificationFilter::All).await.unwrap();
        let before = feed.items();

        let err = feed.delete("b").await.unwrap_err();
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(feed.items(), before);
    }

    #[tokio::test]
    async fn test_delete_success_removes_item() {
        let mut api = MockNotificationsApi::new();
        api.expect_fetch_page()
            .returning(|_, _, _| Ok(page(vec![at("a", 30, false), at("b", 20, false)], 1, 1)));
        api.expect_delete().times(1).returning(|_| Ok(()));

        let feed = feed_with(api);
        feed.fetch(NotificationFilter::All).await.unwrap();
        feed.delete("a").await.unwrap();

        assert_eq!(ids(&feed), ["b"]);
    }

    #[tokio::test]
    async fn test_mark_as_read_is_not_rolled_back() {
        let mut api = MockNotificationsApi::new();
        api.expect_fetch_page()
            .returning(|_, _, _| Ok(page(vec![at("a", 30, false), at("b", 20, false)], 1, 1)));
        api.expect_mark_as_read()
            .withf(|id| id == "a")
            .times(1)
            .returning(|_| Err(ClientError::Timeout(Duration::from_secs(15))));

        let feed = feed_with(api);
        feed.fetch(NotificationFilter::All).await.unwrap();
        feed.mark_as_read("a").await.unwrap();

        let items = feed.items();
        assert!(items.iter().find(|n| n.id == "a").unwrap().is_read);
        assert_eq!(feed.unread_count(), 1);
    }

    #[tokio::test]
    async fn test_mark_as_read_under_unread_hides_after_delay() {
        let mut api = MockNotificationsApi::new();
        api.expect_fetch_page()
            .returning(|_, _, _| Ok(page(vec![at("a", 30, false), at("b", 20, false)], 1, 1)));
        api.expect_mark_as_read().returning(|_| Ok(()));

        let feed = feed_with(api);
        feed.fetch(NotificationFilter::Unread).await.unwrap();
        feed.mark_as_read("a").await.unwrap();

        // Still visible during the transition
        assert_eq!(ids(&feed), ["a", "b"]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ids(&feed), ["b"]);
    }

    #[tokio::test]
    async fn test_mark_all_under_unread_empties_list() {
        let mut api = MockNotificationsApi::new();
        api.expect_fetch_page().returning(|_, _, _| {
            Ok(page(vec![at("a", 30, false), at("b", 20, false), at("c", 10, false)], 1, 1))
        });
        api.expect_mark_all_as_read().times(1).returning(|| Ok(()));

        let feed = feed_with(api);
        feed.fetch(NotificationFilter::Unread).await.unwrap();
        feed.mark_all_as_read().await.unwrap();
        assert_eq!(feed.unread_count(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(feed.items().is_empty());
    }

    #[tokio::test]
    async fn test_mark_all_under_all_keeps_items() {
        let mut api = MockNotificationsApi::new();
        api.expect_fetch_page()
            .returning(|_, _, _| Ok(page(vec![at("a", 30, false), at("b", 20, false)], 1, 1)));
        api.expect_mark_all_as_read()
            .returning(|| Err(ClientError::Transport("offline".to_string())));

        let feed = feed_with(api);
        feed.fetch(NotificationFilter::All).await.unwrap();
        feed.mark_all_as_read().await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(feed.items().len(), 2);
        assert!(feed.items().iter().all(|n| n.is_read));
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_filter_and_list() {
        let mut api = MockNotificationsApi::new();
        api.expect_fetch_page()
            .withf(|filter, _, _| *filter == NotificationFilter::All)
            .returning(|_, _, _| Ok(page(vec![at("r", 30, true)], 1, 1)));
        api.expect_fetch_page()
            .withf(|filter, _, _| *filter == NotificationFilter::Unread)
            .times(1)
            .returning(|_, _, _| Err(ClientError::Transport("offline".to_string())));

        let feed = feed_with(api);
        feed.fetch(NotificationFilter::All).await.unwrap();
        assert!(feed.fetch(NotificationFilter::Unread).await.is_err());

        assert_eq!(feed.filter(), NotificationFilter::All);
        assert_eq!(ids(&feed), ["r"]);
        assert!(feed.items().iter().all(|n| feed.filter().matches(n)));

        // Pushes and load_more still follow the list that is shown
        assert!(feed.apply_push(at("read-push", 40, true)));
        assert!(!feed.load_more().await.unwrap());
    }

    #[tokio::test]
    async fn test_load_more_started_during_fetch_is_discarded() {
        let feed = NotificationFeed::new(Arc::new(SlowApi), config());
        {
            let mut state = feed.inner.state.lock();
            state.page_number = 1;
            state.has_more = true;
        }

        let refetch = {
            let feed = feed.clone();
            tokio::spawn(async move { feed.fetch(NotificationFilter::Read).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let appended = feed.load_more().await.unwrap();
        refetch.await.unwrap().unwrap();

        assert!(!appended);
        assert_eq!(feed.filter(), NotificationFilter::Read);
        assert_eq!(ids(&feed), ["late"]);
    }

    #[tokio::test]
    async fn test_push_dedup_and_filter() {
        let mut api = MockNotificationsApi::new();
        api.expect_fetch_page()
            .returning(|_, _, _| Ok(page(vec![at("a", 30, false)], 1, 1)));

        let feed = feed_with(api);
        feed.fetch(NotificationFilter::Unread).await.unwrap();

        assert!(!feed.apply_push(at("a", 30, false)));
        assert!(!feed.apply_push(at("old-read", 60, true)));
        assert!(feed.apply_push(at("new", 1, false)));
        assert!(feed.apply_push(at("newer", 2, false)));

        // Receipt order, newest push first
        assert_eq!(ids(&feed), ["newer", "new", "a"]);
    }

    #[tokio::test]
    async fn test_attach_routes_pushes_and_suppresses_toasts() {
        let mut api = MockNotificationsApi::new();
        api.expect_fetch_page()
            .returning(|_, _, _| Ok(page(Vec::new(), 1, 1)));

        let (sink, mut toasts) = ChannelToastSink::channel();
        let dispatcher = NotificationDispatcher::new(Arc::new(sink));
        let feed = feed_with(api);
        feed.fetch(NotificationFilter::All).await.unwrap();

        feed.attach_to(&dispatcher);
        dispatcher.emit(&at("p1", 1, false));
        dispatcher.emit(&at("p1", 1, false));

        assert_eq!(ids(&feed), ["p1"]);
        assert!(toasts.try_recv().is_err());

        feed.detach();
        assert_eq!(dispatcher.subscriber_count(), 0);
        dispatcher.emit(&at("p2", 2, false));
        assert_eq!(ids(&feed), ["p1"]);
        assert!(toasts.try_recv().is_ok());
    }

    /// API that answers after a delay, to race responses against `close`
    struct SlowApi;

    #[async_trait]
    impl NotificationsApi for SlowApi {
        async fn fetch_page(
            &self,
            _filter: NotificationFilter,
            page_number: u32,
            _page_size: u32,
        ) -> Result<NotificationPage> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(page(vec![at("late", 1, false)], page_number, 1))
        }

        async fn mark_as_read(&self, _id: &str) -> Result<()> {
            Ok(())
        }

        async fn mark_all_as_read(&self) -> Result<()> {
            Ok(())
        }

        async fn delete(&self, _id: &str) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(rejected())
        }
    }

    #[tokio::test]
    async fn test_results_after_close_are_dropped() {
        let feed = NotificationFeed::new(Arc::new(SlowApi), config());

        let pending = {
            let feed = feed.clone();
            tokio::spawn(async move { feed.fetch(NotificationFilter::All).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        feed.close();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert!(feed.items().is_empty());
        assert!(!feed.apply_push(at("push", 2, false)));
        assert!(feed.is_closed());
    }

    #[tokio::test]
    async fn test_superseded_fetch_is_discarded() {
        let feed = NotificationFeed::new(Arc::new(SlowApi), config());

        let first = {
            let feed = feed.clone();
            tokio::spawn(async move { feed.fetch(NotificationFilter::Read).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        feed.fetch(NotificationFilter::All).await.unwrap();
        first.await.unwrap().unwrap();

        assert_eq!(feed.filter(), NotificationFilter::All);
        assert_eq!(ids(&feed), ["late"]);
    }
}
