//! Conversation pipeline: debounced batches through the model and back out.

mod common;

use common::{HOME, harness};
use kairos_rs_core::{
    Debouncer, InboundMessage, MessageBatch, MessagePipeline, RetryPolicy, RetryingMessenger,
    RetryingModel,
};
use kairos_rs_protocol::{Messenger, ModelClient, Role};
use kairos_rs_store::HistoryLimits;
use kairos_rs_test_utils::{FailingModel, RecordingMessenger, RecordingModel, ScriptedModel};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn batch(conversation: &str, content: &str) -> MessageBatch {
    MessageBatch {
        conversation_id: conversation.to_string(),
        sender_ids: vec!["3".to_string()],
        content: content.to_string(),
    }
}

/// A reply is delivered without directive syntax, directives are applied, and
/// both turns land in history.
#[tokio::test]
async fn reply_is_stripped_applied_and_recorded() {
    let model = ScriptedModel::with_replies([
        "Nice to meet you, Alice! [MEMORY_SAVE: key=user_name, value=Alice, tags=profile]",
    ]);
    let h = harness(Arc::new(model.clone()), HistoryLimits::default());
    let pipeline = MessagePipeline::new(h.services.clone());

    pipeline
        .process(&batch(HOME, "Hi, I'm Alice"))
        .await
        .expect("process");

    assert_eq!(h.messenger.sent_to(HOME), vec!["Nice to meet you, Alice!"]);
    assert_eq!(
        h.messenger.typing_events(),
        vec![(HOME.to_string(), true), (HOME.to_string(), false)]
    );
    let record = h
        .services
        .memory
        .get("user_name")
        .expect("get")
        .expect("saved");
    assert_eq!(record.tags, vec!["profile"]);

    let turns = h.services.history.recent(HOME, 10).expect("history");
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[0].content, "Hi, I'm Alice");
    assert_eq!(turns[1].content, "Nice to meet you, Alice!");

    let request = &model.requests()[0];
    assert_eq!(request[0].role, Role::System);
    assert!(request[0].content.contains("## Directives"));
    assert_eq!(request.last().expect("user").content, "Hi, I'm Alice");
}

/// A reply made only of directives shows the placeholder.
#[tokio::test]
async fn directive_only_reply_shows_placeholder() {
    let model = ScriptedModel::with_replies(["[DAILY_LOG: met Alice]"]);
    let h = harness(Arc::new(model), HistoryLimits::default());
    MessagePipeline::new(h.services.clone())
        .process(&batch(HOME, "log it"))
        .await
        .expect("process");
    assert_eq!(h.messenger.sent_to(HOME), vec!["..."]);
}

/// Model failure produces one error reply and still clears typing.
#[tokio::test]
async fn model_failure_sends_one_error_reply() {
    let model = FailingModel::new();
    let h = harness(Arc::new(model), HistoryLimits::default());
    let result = MessagePipeline::new(h.services.clone())
        .process(&batch("room-5", "hello"))
        .await;

    assert!(result.is_err());
    let sent = h.messenger.sent_to("room-5");
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("can't reach"));
    assert_eq!(
        h.messenger.typing_events().last(),
        Some(&("room-5".to_string(), false))
    );
    assert_eq!(h.services.history.count("room-5").expect("count"), 0);
}

/// A refused model request or a failed delivery gets the generic error reply.
#[tokio::test]
async fn non_transient_failures_get_the_generic_reply() {
    let h = harness(
        Arc::new(FailingModel::rejecting(400)),
        HistoryLimits::default(),
    );
    let result = MessagePipeline::new(h.services.clone())
        .process(&batch("room-5", "hello"))
        .await;
    assert!(result.is_err());
    let sent = h.messenger.sent_to("room-5");
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("went wrong"));

    let h = harness(
        Arc::new(ScriptedModel::new("Hello there.")),
        HistoryLimits::default(),
    );
    h.messenger.fail_next_sends(1);
    let result = MessagePipeline::new(h.services.clone())
        .process(&batch("room-6", "hello"))
        .await;
    assert!(result.is_err());
    let sent = h.messenger.sent_to("room-6");
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("went wrong"));
}

/// Long replies are split to the messenger's size limit.
#[tokio::test]
async fn long_reply_is_chunked() {
    let model = ScriptedModel::with_replies(["First paragraph here.\n\nSecond paragraph here."]);
    let mut h = harness(Arc::new(model), HistoryLimits::default());
    h.services.max_message_chars = 25;
    MessagePipeline::new(h.services.clone())
        .process(&batch(HOME, "talk"))
        .await
        .expect("process");
    assert_eq!(
        h.messenger.sent_to(HOME),
        vec!["First paragraph here.", "Second paragraph here."]
    );
}

/// A burst through the debouncer becomes a single model call with the
/// messages joined in arrival order.
#[tokio::test(start_paused = true)]
async fn debounced_burst_is_one_model_call() {
    let model = ScriptedModel::new("Got it.");
    let h = harness(Arc::new(model.clone()), HistoryLimits::default());
    let debouncer = Debouncer::new(
        Duration::from_millis(1500),
        Arc::new(MessagePipeline::new(h.services.clone())),
    );
    for content in ["buy milk", "and eggs", "and bread"] {
        debouncer.push(HOME, InboundMessage::new("3", content));
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(model.call_count(), 1);
    assert_eq!(
        model.requests()[0].last().expect("user").content,
        "buy milk\nand eggs\nand bread"
    );
    assert_eq!(h.messenger.sent_to(HOME), vec!["Got it."]);
}

/// Transient send failures are retried with backoff.
#[tokio::test(start_paused = true)]
async fn retrying_messenger_recovers_from_transient_failures() {
    let inner = RecordingMessenger::new();
    inner.fail_next_sends(2);
    let messenger = RetryingMessenger::new(
        Arc::new(inner.clone()),
        RetryPolicy::new(3, Duration::from_secs(1)),
    );
    messenger.send_text("1", "hello").await.expect("send");
    assert_eq!(inner.sent(), vec![("1".to_string(), "hello".to_string())]);

    inner.fail_next_sends(3);
    assert!(messenger.send_text("1", "again").await.is_err());
    assert_eq!(inner.sent().len(), 1);
}

/// Earlier turns of the same conversation are sent ahead of the new input.
#[tokio::test]
async fn prompt_carries_recent_history() {
    let (model, requests) = RecordingModel::new("Sure.");
    let h = harness(Arc::new(model), HistoryLimits::default());
    h.services
        .history
        .append("room-4", Role::User, "my cat is Tom")
        .expect("append");
    h.services
        .history
        .append("room-4", Role::Assistant, "Hi Tom!")
        .expect("append");
    h.services
        .history
        .append(HOME, Role::User, "unrelated")
        .expect("append");

    MessagePipeline::new(h.services.clone())
        .process(&batch("room-4", "what is my cat called?"))
        .await
        .expect("process");

    let requests = requests.lock();
    let contents: Vec<&str> = requests[0][1..]
        .iter()
        .map(|message| message.content.as_str())
        .collect();
    assert_eq!(
        contents,
        vec!["my cat is Tom", "Hi Tom!", "what is my cat called?"]
    );
}

/// Client errors from the model are not retried.
#[tokio::test(start_paused = true)]
async fn rejected_model_request_is_not_retried() {
    let inner = FailingModel::rejecting(400);
    let model = RetryingModel::new(
        Arc::new(inner.clone()),
        RetryPolicy::new(3, Duration::from_secs(1)),
    );
    assert!(model.complete(&[]).await.is_err());
    assert_eq!(inner.call_count(), 1);

    let inner = FailingModel::rejecting(503);
    let model = RetryingModel::new(
        Arc::new(inner.clone()),
        RetryPolicy::new(3, Duration::from_secs(1)),
    );
    assert!(model.complete(&[]).await.is_err());
    assert_eq!(inner.call_count(), 3);
}
