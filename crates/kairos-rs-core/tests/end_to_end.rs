//! Memory, history eviction, and compaction working together.

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::{HOME, harness};
use kairos_rs_core::{Heartbeat, HeartbeatSettings};
use kairos_rs_protocol::Role;
use kairos_rs_store::HistoryLimits;
use kairos_rs_test_utils::ScriptedModel;
use pretty_assertions::assert_eq;
use std::sync::Arc;

/// Saving a fact, filling the ring, and compacting after the cooldown records
/// exactly one flush.
#[tokio::test]
async fn fill_history_then_compact_once_after_cooldown() {
    let model = ScriptedModel::new(r#"{"action": "none"}"#);
    model.push_reply("[MEMORY_SAVE: key=favorite_drink, value=green tea, tags=prefs]");
    let limits = HistoryLimits {
        max_messages: 6,
        compaction_threshold: 0.8,
        compaction_cooldown: Duration::hours(4),
    };
    let h = harness(Arc::new(model.clone()), limits);
    let memory = h.services.memory.clone();
    let history = h.services.history.clone();

    memory.save("user_name", "Alice", &[]).expect("save");
    assert_eq!(
        memory.get("user_name").expect("get").expect("record").value,
        "Alice"
    );

    for i in 0..=limits.max_messages {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        history
            .append(HOME, role, &format!("turn {i}"))
            .expect("append");
        assert!(history.count(HOME).expect("count") <= limits.max_messages);
    }
    assert_eq!(history.count(HOME).expect("count"), limits.max_messages);
    let entries = history.recent(HOME, 100).expect("recent");
    assert_eq!(entries.first().expect("oldest").content, "turn 1");
    assert_eq!(entries.last().expect("newest").content, "turn 6");

    let t0 = Utc.with_ymd_and_hms(2030, 1, 1, 8, 0, 0).unwrap();
    history.record_flush_at(HOME, t0).expect("earlier flush");
    let heartbeat = Heartbeat::new(h.services.clone(), HeartbeatSettings::default());

    let cooling = heartbeat
        .compact_due(t0 + Duration::hours(1))
        .await
        .expect("compact during cooldown");
    assert_eq!(cooling, 0);
    assert_eq!(model.call_count(), 0);

    let later = t0 + Duration::hours(4) + Duration::minutes(1);
    let compacted = heartbeat.compact_due(later).await.expect("compact");
    assert_eq!(compacted, 1);
    assert_eq!(model.call_count(), 1);
    assert_eq!(history.last_flush(HOME).expect("flush"), Some(later));
    assert_eq!(
        memory
            .get("favorite_drink")
            .expect("get")
            .expect("saved by compaction")
            .value,
        "green tea"
    );

    let again = heartbeat
        .compact_due(later + Duration::minutes(1))
        .await
        .expect("compact again");
    assert_eq!(again, 0);
    assert_eq!(model.call_count(), 1);
    assert_eq!(history.last_flush(HOME).expect("flush"), Some(later));
}

/// The compaction request carries the conversation transcript and existing
/// memory, and only memory saves from the reply are applied.
#[tokio::test]
async fn compaction_applies_only_memory_saves() {
    let model = ScriptedModel::new("");
    model.push_reply(
        "[MEMORY_SAVE: key=city, value=Seoul] [SCHEDULE: name=x, prompt=y, cron=09:00] chatter",
    );
    let limits = HistoryLimits {
        max_messages: 2,
        ..HistoryLimits::default()
    };
    let h = harness(Arc::new(model.clone()), limits);
    h.services.memory.save("user_name", "Alice", &[]).expect("save");
    h.services
        .history
        .append("room-9", Role::User, "I live in Seoul")
        .expect("append");
    h.services
        .history
        .append("room-9", Role::Assistant, "Nice")
        .expect("append");

    let heartbeat = Heartbeat::new(h.services.clone(), HeartbeatSettings::default());
    assert_eq!(heartbeat.compact_due(Utc::now()).await.expect("compact"), 1);

    let request = &model.requests()[0];
    assert!(request[0].content.contains("- user_name: Alice"));
    assert_eq!(request[1].content, "user: I live in Seoul\nassistant: Nice");
    assert!(h.services.memory.get("city").expect("get").is_some());
    assert!(h.services.jobs.get("x").expect("get").is_none());
    assert!(h.messenger.sent().is_empty());
}
