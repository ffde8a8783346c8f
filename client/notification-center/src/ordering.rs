//! Ordering and merging rules of the notification list

use koi_common::{Notification, NotificationFilter};
use std::cmp::Reverse;
use std::collections::HashSet;

/// Sort in display order for `filter`.
///
/// `Unread` and `Read` lists share one read state, so they are ordered by
/// `sent_date` newest first. Every other filter puts unread items first.
pub fn sort_for_filter(items: &mut [Notification], filter: NotificationFilter) {
    if filter.read_state().is_some() {
        items.sort_by_key(|n| Reverse(n.sent_date));
    } else {
        items.sort_by_key(|n| (n.is_read, Reverse(n.sent_date)));
    }
}

/// Append `incoming` to `existing`, skipping ids already present
pub fn merge_unique(existing: Vec<Notification>, incoming: Vec<Notification>) -> Vec<Notification> {
    let mut seen: HashSet<String> = HashSet::with_capacity(existing.len() + incoming.len());
    let mut merged = Vec::with_capacity(existing.len() + incoming.len());

    for notification in existing.into_iter().chain(incoming) {
        if seen.insert(notification.id.clone()) {
            merged.push(notification);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use koi_common::NotificationType;

    fn at(id: &str, minutes: i64, is_read: bool) -> Notification {
        let base = Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).unwrap();
        let mut n = Notification::new(
            id,
            NotificationType::System,
            id,
            "",
            base + Duration::minutes(minutes),
        );
        n.is_read = is_read;
        n
    }

    fn ids(items: &[Notification]) -> Vec<&str> {
        items.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_all_puts_unread_first() {
        let mut items = vec![
            at("read-new", 30, true),
            at("unread-old", 10, false),
            at("read-old", 5, true),
            at("unread-new", 20, false),
        ];

        sort_for_filter(&mut items, NotificationFilter::All);
        assert_eq!(ids(&items), ["unread-new", "unread-old", "read-new", "read-old"]);
    }

    #[test]
    fn test_type_filter_uses_unread_first_rule() {
        let mut items = vec![at("read", 30, true), at("unread", 10, false)];
        sort_for_filter(&mut items, NotificationFilter::Type(NotificationType::System));
        assert_eq!(ids(&items), ["unread", "read"]);
    }

    #[test]
    fn test_read_state_filters_sort_by_date_only() {
        let mut items = vec![at("a", 10, true), at("b", 30, false), at("c", 20, true)];

        sort_for_filter(&mut items, NotificationFilter::Unread);
        assert_eq!(ids(&items), ["b", "c", "a"]);

        sort_for_filter(&mut items, NotificationFilter::Read);
        assert_eq!(ids(&items), ["b", "c", "a"]);
    }

    #[test]
    fn test_merge_unique_keeps_first_occurrence() {
        let merged = merge_unique(
            vec![at("a", 1, false), at("b", 2, false)],
            vec![at("b", 3, true), at("c", 4, false), at("c", 5, false)],
        );

        assert_eq!(ids(&merged), ["a", "b", "c"]);
        assert!(!merged[1].is_read);
    }
}
