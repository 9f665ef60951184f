//! 集成测试共用的假实现：可注入故障的存储与记录投递的渠道

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use salesbee::cache::InMemoryCache;
use salesbee::channel::Channel;
use salesbee::core::{DeliveryError, StoreError};
use salesbee::llm::MockLlmClient;
use salesbee::pipeline::{Pipeline, PipelineSettings};
use salesbee::store::{
    Conversation, Customer, InMemoryStore, MessageRecord, NewMessage, NewOrder, Order, Store,
};

/// 记录每次投递；可设置为全部失败
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    async fn send_text(&self, to: &str, body: &str) -> Result<String, DeliveryError> {
        if self.fail {
            return Err(DeliveryError::Transport("connection reset".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.to_string(), body.to_string()));
        Ok(format!("SM-out-{}", sent.len()))
    }

    async fn send_media(&self, to: &str, body: &str, _media_url: &str) -> Result<String, DeliveryError> {
        self.send_text(to, body).await
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// 包装 InMemoryStore，按操作名注入 Unavailable
#[derive(Default)]
pub struct FaultyStore {
    pub inner: InMemoryStore,
    failing: Mutex<HashSet<&'static str>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    fn check(&self, op: &'static str) -> Result<(), StoreError> {
        if self.failing.lock().unwrap().contains(op) {
            Err(StoreError::Unavailable(format!("{} injected failure", op)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn find_customer_by_address(&self, address: &str) -> Result<Option<Customer>, StoreError> {
        self.check("find_customer")?;
        self.inner.find_customer_by_address(address).await
    }

    async fn insert_customer(&self, address: &str) -> Result<Customer, StoreError> {
        self.check("insert_customer")?;
        self.inner.insert_customer(address).await
    }

    async fn find_active_conversation(&self, customer_id: &str) -> Result<Option<Conversation>, StoreError> {
        self.check("find_conversation")?;
        self.inner.find_active_conversation(customer_id).await
    }

    async fn insert_conversation(&self, customer_id: &str, address: &str) -> Result<Conversation, StoreError> {
        self.check("insert_conversation")?;
        self.inner.insert_conversation(customer_id, address).await
    }

    async fn close_conversation(&self, conversation_id: &str) -> Result<(), StoreError> {
        self.inner.close_conversation(conversation_id).await
    }

    async fn insert_message(&self, message: NewMessage) -> Result<MessageRecord, StoreError> {
        let op = match message.direction {
            salesbee::store::Direction::Inbound => "insert_inbound",
            salesbee::store::Direction::Outbound => "insert_outbound",
        };
        self.check(op)?;
        self.inner.insert_message(message).await
    }

    async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<MessageRecord>, StoreError> {
        self.check("recent_messages")?;
        self.inner.recent_messages(conversation_id, limit).await
    }

    async fn conversation_messages(&self, conversation_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        self.inner.conversation_messages(conversation_id).await
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        self.check("insert_order")?;
        self.inner.insert_order(order).await
    }

    async fn find_order_by_source_message(&self, message_id: &str) -> Result<Option<Order>, StoreError> {
        self.inner.find_order_by_source_message(message_id).await
    }

    async fn list_customers(&self, limit: usize) -> Result<Vec<Customer>, StoreError> {
        self.check("list")?;
        self.inner.list_customers(limit).await
    }

    async fn list_conversations(&self, limit: usize) -> Result<Vec<Conversation>, StoreError> {
        self.check("list")?;
        self.inner.list_conversations(limit).await
    }

    async fn list_orders(&self, limit: usize) -> Result<Vec<Order>, StoreError> {
        self.check("list")?;
        self.inner.list_orders(limit).await
    }
}

pub const ORDER_REPLY: &str = "Perfect! I've noted your order. The store owner will contact you shortly to arrange payment and delivery.\n<ORDER_DETAILS>\n{\"items\": [{\"name\": \"Leather Wallet\", \"quantity\": 2, \"price\": 15}], \"total\": 30}\n</ORDER_DETAILS>";

/// 流水线 + 其依赖的句柄
pub struct Harness {
    pub store: Arc<FaultyStore>,
    pub cache: Arc<InMemoryCache>,
    pub llm: Arc<MockLlmClient>,
    pub channel: Arc<RecordingChannel>,
    pub pipeline: Pipeline,
}

impl Harness {
    pub fn new(llm: MockLlmClient, channel: RecordingChannel) -> Self {
        let store = Arc::new(FaultyStore::new());
        let cache = Arc::new(InMemoryCache::new());
        let llm = Arc::new(llm);
        let channel = Arc::new(channel);
        let pipeline = Pipeline::new(
            store.clone(),
            cache.clone(),
            llm.clone(),
            channel.clone(),
            PipelineSettings {
                system_prompt: "You are SalesBot.".into(),
                ..PipelineSettings::default()
            },
        );
        Self {
            store,
            cache,
            llm,
            channel,
            pipeline,
        }
    }
}
