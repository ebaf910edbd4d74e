// ABOUTME: Integration tests for the SQLite history store on disk.
// ABOUTME: Verifies monotonic sort keys, per-chat isolation and persistence across reopen.

use maria_core::history::{HistoryEntry, HistoryRole, HistoryStore, SqliteHistoryStore};
use tempfile::TempDir;

#[tokio::test]
async fn test_sort_keys_are_strictly_monotonic_across_chats() {
    let store = SqliteHistoryStore::in_memory().unwrap();
    let mut last = 0;
    for i in 0..10 {
        let chat = if i % 2 == 0 { "a" } else { "b" };
        let item = store
            .append(HistoryEntry::user("telegram", chat, format!("m{}", i)))
            .await
            .unwrap();
        assert!(item.sort_key > last);
        last = item.sort_key;
    }
}

#[tokio::test]
async fn test_recent_is_per_chat_and_oldest_first() {
    let store = SqliteHistoryStore::in_memory().unwrap();
    for i in 0..6 {
        store
            .append(HistoryEntry::user("slack", "chat-1", format!("q{}", i)))
            .await
            .unwrap();
        store
            .append(HistoryEntry::assistant("slack", "chat-2", format!("a{}", i)))
            .await
            .unwrap();
    }

    let items = store.recent("slack", "chat-1", 4).await.unwrap();
    let messages: Vec<&str> = items.iter().map(|i| i.message.as_str()).collect();
    assert_eq!(messages, vec!["q2", "q3", "q4", "q5"]);
    assert!(items.iter().all(|i| i.chat_id == "chat-1"));

    let other = store.recent("slack", "chat-2", 100).await.unwrap();
    assert_eq!(other.len(), 6);
    assert!(other.iter().all(|i| i.role == HistoryRole::Assistant));

    assert!(store.recent("slack", "nobody", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_same_chat_id_on_two_platforms_is_two_chats() {
    let store = SqliteHistoryStore::in_memory().unwrap();
    store
        .append(HistoryEntry::user("telegram", "12345", "from telegram"))
        .await
        .unwrap();
    store
        .append(HistoryEntry::user("slack", "12345", "from slack"))
        .await
        .unwrap();
    store
        .set_summary("telegram", "12345", "telegram summary")
        .await
        .unwrap();

    let telegram = store.recent("TELEGRAM", "12345", 10).await.unwrap();
    assert_eq!(telegram.len(), 1);
    assert_eq!(telegram[0].message, "from telegram");

    let slack = store.recent("slack", "12345", 10).await.unwrap();
    assert_eq!(slack.len(), 1);
    assert_eq!(slack[0].message, "from slack");

    assert!(store.summary("slack", "12345").await.unwrap().is_none());
    assert_eq!(
        store.summary("telegram", "12345").await.unwrap().as_deref(),
        Some("telegram summary")
    );
}

#[tokio::test]
async fn test_history_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("history.db");

    {
        let store = SqliteHistoryStore::open(&path).unwrap();
        store
            .append(HistoryEntry::user("slack", "C1", "remember me"))
            .await
            .unwrap();
        store.set_summary("slack", "C1", "first summary").await.unwrap();
        store.set_summary("slack", "C1", "second summary").await.unwrap();
    }

    let store = SqliteHistoryStore::open(&path).unwrap();
    let items = store.recent("slack", "C1", 5).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].message, "remember me");
    assert_eq!(
        store.summary("slack", "C1").await.unwrap().as_deref(),
        Some("second summary")
    );
    assert!(store.summary("slack", "C2").await.unwrap().is_none());
}
