//! 流水线端到端测试（内存存储 + 假渠道 + 脚本化 LLM）

mod common;

use common::{Harness, RecordingChannel, ORDER_REPLY};
use salesbee::core::GeneratorError;
use salesbee::llm::MockLlmClient;
use salesbee::pipeline::{InboundMessage, Stage, APOLOGY_REPLY};
use salesbee::responder::FALLBACK_REPLY;
use salesbee::store::{ConversationStatus, Direction, OrderStatus, SenderType, Store};

const HAPPY_PATH: [Stage; 7] = [
    Stage::Received,
    Stage::Identified,
    Stage::Threaded,
    Stage::LoggedIn,
    Stage::Generated,
    Stage::LoggedOut,
    Stage::Delivered,
];

#[tokio::test]
async fn test_first_message_on_fresh_store() {
    let h = Harness::new(MockLlmClient::replying("Hello! 👋 How can I help you today?"), RecordingChannel::new());

    let report = h
        .pipeline
        .handle(&InboundMessage::new("whatsapp:+254712345678", "Hi", "SM001"))
        .await;

    assert_eq!(report.trace, HAPPY_PATH);
    assert_eq!(report.final_stage(), Stage::Delivered);
    assert_eq!(h.store.inner.counts().await, (1, 1, 2, 0));

    let customer = h
        .store
        .find_customer_by_address("+254712345678")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.customer_id.as_deref(), Some(customer.id.as_str()));

    let conversation = h.store.find_active_conversation(&customer.id).await.unwrap().unwrap();
    assert_eq!(conversation.status, ConversationStatus::Active);

    let messages = h.store.inner.all_messages().await;
    assert_eq!(messages[0].direction, Direction::Inbound);
    assert_eq!(messages[0].sender_type, SenderType::Customer);
    assert_eq!(messages[0].whatsapp_message_id.as_deref(), Some("SM001"));
    assert!(!messages[0].is_automated);
    assert_eq!(messages[1].direction, Direction::Outbound);
    assert!(messages[1].is_automated);

    let sent = h.channel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "+254712345678");
    assert!(!sent[0].1.is_empty());
    assert_eq!(report.delivery_id.as_deref(), Some("SM-out-1"));
}

#[tokio::test]
async fn test_follow_up_reuses_customer_and_thread() {
    let h = Harness::new(MockLlmClient::echo(), RecordingChannel::new());

    let first = h.pipeline.handle(&InboundMessage::new("whatsapp:+1555", "Hi", "SM1")).await;
    let second = h
        .pipeline
        .handle(&InboundMessage::new("whatsapp:+1555", "Do you have wallets?", "SM2"))
        .await;

    assert_eq!(first.customer_id, second.customer_id);
    assert_eq!(first.conversation_id, second.conversation_id);
    assert_eq!(h.store.inner.counts().await, (1, 1, 4, 0));

    // 第二次调用：系统 + 历史 4 条（当前消息已在历史末尾，不重复）
    let calls = h.llm.calls();
    let prompt = &calls[1];
    assert_eq!(prompt.len(), 4);
    assert_eq!(
        prompt.iter().filter(|m| m.content == "Do you have wallets?").count(),
        1
    );
}

#[tokio::test]
async fn test_confirmed_order_creates_order_row() {
    let h = Harness::new(MockLlmClient::replying(ORDER_REPLY), RecordingChannel::new());

    let report = h
        .pipeline
        .handle(&InboundMessage::new("whatsapp:+254700000001", "Yes, confirm 2 leather wallets", "SM9"))
        .await;

    assert_eq!(report.final_stage(), Stage::Delivered);
    assert_eq!(h.store.inner.counts().await, (1, 1, 2, 1));

    let order = report.order.expect("order created");
    assert_eq!(order.total, 30.0);
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].name, "Leather Wallet");
    assert_eq!(order.items[0].quantity, 2);
    assert_eq!(order.status, OrderStatus::PendingPayment);
    assert!(order.order_number.starts_with("ORD-"));
    assert_eq!(order.customer_id, report.customer_id.unwrap());
    assert_eq!(order.source_message_id.as_deref(), Some("SM9"));

    // 客户看到的文本不含结构块，存库的出站文本与发送的一致
    let sent = h.channel.sent();
    assert!(!sent[0].1.contains("ORDER_DETAILS"));
    let outbound = h.store.inner.all_messages().await.pop().unwrap();
    assert_eq!(outbound.message_text, sent[0].1);
}

#[tokio::test]
async fn test_retried_webhook_does_not_duplicate_order() {
    let h = Harness::new(
        MockLlmClient::scripted(vec![Ok(ORDER_REPLY.into()), Ok(ORDER_REPLY.into())]),
        RecordingChannel::new(),
    );
    let inbound = InboundMessage::new("whatsapp:+254700000002", "Confirm", "SM42");

    let first = h.pipeline.handle(&inbound).await;
    let second = h.pipeline.handle(&inbound).await;

    assert_eq!(first.order.unwrap().id, second.order.unwrap().id);
    assert_eq!(h.store.inner.counts().await.3, 1);
}

#[tokio::test]
async fn test_malformed_order_block_is_ignored() {
    let h = Harness::new(
        MockLlmClient::replying("Noted!\n<ORDER_DETAILS>{\"items\": oops}</ORDER_DETAILS>"),
        RecordingChannel::new(),
    );
    let report = h.pipeline.handle(&InboundMessage::new("+1", "Buy", "SM1")).await;

    assert_eq!(report.final_stage(), Stage::Delivered);
    assert!(report.order.is_none());
    assert_eq!(h.store.inner.counts().await.3, 0);
    assert_eq!(h.channel.sent()[0].1, "Noted!");
}

#[tokio::test]
async fn test_generator_failure_sends_fallback_and_still_logs() {
    let h = Harness::new(
        MockLlmClient::failing(GeneratorError::Upstream("quota exceeded".into())),
        RecordingChannel::new(),
    );
    let report = h.pipeline.handle(&InboundMessage::new("+1", "Hi", "SM1")).await;

    assert_eq!(report.trace, HAPPY_PATH);
    assert!(report.used_fallback);
    assert_eq!(h.channel.sent()[0].1, FALLBACK_REPLY);
    let outbound = h.store.inner.all_messages().await.pop().unwrap();
    assert_eq!(outbound.message_text, FALLBACK_REPLY);
}

#[tokio::test]
async fn test_delivery_failure_keeps_outbound_row() {
    let h = Harness::new(MockLlmClient::replying("Here is our catalogue"), RecordingChannel::failing());

    let report = h.pipeline.handle(&InboundMessage::new("+1555", "Hi", "SM1")).await;

    assert_eq!(report.final_stage(), Stage::FailedSilent);
    assert!(report.reached(Stage::LoggedOut));
    assert!(!report.reached(Stage::Delivered));
    assert!(!report.reached(Stage::FailedReplySent));

    let conversation_id = report.conversation_id.unwrap();
    let stored = h.store.conversation_messages(&conversation_id).await.unwrap();
    let outbound: Vec<_> = stored
        .iter()
        .filter(|m| m.direction == Direction::Outbound)
        .collect();
    assert_eq!(outbound.len(), 1);
    assert_eq!(outbound[0].message_text, "Here is our catalogue");
}

#[tokio::test]
async fn test_identity_store_failure_sends_apology_to_raw_address() {
    let h = Harness::new(MockLlmClient::echo(), RecordingChannel::new());
    h.store.fail_on("find_customer");

    let report = h
        .pipeline
        .handle(&InboundMessage::new("whatsapp:+254712345678", "Hi", "SM1"))
        .await;

    assert_eq!(report.trace, vec![Stage::Received, Stage::FailedReplySent]);
    assert!(report.customer_id.is_none());
    assert_eq!(
        h.channel.sent(),
        vec![("+254712345678".to_string(), APOLOGY_REPLY.to_string())]
    );
    assert!(h.llm.calls().is_empty());
    assert_eq!(h.store.inner.counts().await, (0, 0, 0, 0));
}

#[tokio::test]
async fn test_thread_and_inbound_failures_abort_before_generation() {
    for op in ["insert_conversation", "insert_inbound"] {
        let h = Harness::new(MockLlmClient::echo(), RecordingChannel::new());
        h.store.fail_on(op);

        let report = h.pipeline.handle(&InboundMessage::new("+1", "Hi", "SM1")).await;

        assert_eq!(report.final_stage(), Stage::FailedReplySent, "op {}", op);
        assert!(!report.reached(Stage::Generated), "op {}", op);
        assert!(h.llm.calls().is_empty(), "op {}", op);
        assert_eq!(h.channel.sent()[0].1, APOLOGY_REPLY);
    }
}

#[tokio::test]
async fn test_outbound_store_failure_takes_apology_path() {
    let h = Harness::new(MockLlmClient::replying("Hello!"), RecordingChannel::new());
    h.store.fail_on("insert_outbound");

    let report = h.pipeline.handle(&InboundMessage::new("+1", "Hi", "SM1")).await;

    assert!(report.reached(Stage::Generated));
    assert!(!report.reached(Stage::LoggedOut));
    assert_eq!(report.final_stage(), Stage::FailedReplySent);
    // 未落库的回复不发送
    assert_eq!(h.channel.sent(), vec![("+1".to_string(), APOLOGY_REPLY.to_string())]);
}

#[tokio::test]
async fn test_apology_delivery_failure_is_silent() {
    let h = Harness::new(MockLlmClient::echo(), RecordingChannel::failing());
    h.store.fail_on("insert_customer");

    let report = h.pipeline.handle(&InboundMessage::new("+1", "Hi", "SM1")).await;

    assert_eq!(
        report.trace,
        vec![Stage::Received, Stage::FailedReplySent, Stage::FailedSilent]
    );
    assert!(report.delivery_id.is_none());
}

#[tokio::test]
async fn test_history_failure_degrades_to_no_context() {
    let h = Harness::new(MockLlmClient::echo(), RecordingChannel::new());
    h.store.fail_on("recent_messages");

    let report = h.pipeline.handle(&InboundMessage::new("+1", "Hi", "SM1")).await;

    assert_eq!(report.final_stage(), Stage::Delivered);
    let prompt = &h.llm.calls()[0];
    assert_eq!(prompt.len(), 2);
}

#[tokio::test]
async fn test_order_store_failure_does_not_abort() {
    let h = Harness::new(MockLlmClient::replying(ORDER_REPLY), RecordingChannel::new());
    h.store.fail_on("insert_order");

    let report = h.pipeline.handle(&InboundMessage::new("+1", "Confirm", "SM1")).await;

    assert_eq!(report.final_stage(), Stage::Delivered);
    assert!(report.order.is_none());
    assert_eq!(h.channel.sent().len(), 1);
}

#[tokio::test]
async fn test_customer_cached_after_first_message() {
    let h = Harness::new(MockLlmClient::echo(), RecordingChannel::new());
    h.pipeline.handle(&InboundMessage::new("whatsapp:+1777", "Hi", "SM1")).await;

    // 缓存命中后，身份查询失败也不影响
    h.store.fail_on("find_customer");
    let report = h.pipeline.handle(&InboundMessage::new("whatsapp:+1777", "Again", "SM2")).await;
    assert_eq!(report.final_stage(), Stage::Delivered);
    assert_eq!(h.store.inner.counts().await.0, 1);
}
