//! Shared stubs for service-layer tests: an in-memory mail provider, a
//! canned triage model, and a fully wired in-process `AppState`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mail_graph_module::{MailContent, MailError, MailProvider};
use triage_module::{
    ClassificationResult, TeamDirectory, ThreadEntry, TriageError, TriageModel,
    UpdateSummaryResult,
};

use crate::classification_queue::MemoryClassificationQueue;
use crate::dedup_store::MemoryDedupStore;
use crate::ticket_store::MemoryTicketStore;

use super::config::{ServiceConfig, StoreBackend};
use super::state::AppState;
use super::webhook::{ChangeNotification, ResourceData};

pub(crate) struct StubMail {
    messages: Mutex<HashMap<String, MailContent>>,
    sent: Mutex<Vec<(String, String)>>,
    subscriptions: Mutex<Vec<String>>,
    fail_send: AtomicBool,
}

impl StubMail {
    pub(crate) fn new() -> Self {
        Self {
            messages: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            fail_send: AtomicBool::new(false),
        }
    }

    pub(crate) fn add_message(
        &self,
        message_id: &str,
        conversation_id: &str,
        subject: &str,
        body: &str,
        from: &str,
    ) {
        let content = MailContent {
            subject: subject.to_string(),
            body: body.to_string(),
            html_body: format!("<p>{}</p>", body),
            from: from.to_string(),
            from_name: None,
            conversation_id: conversation_id.to_string(),
            has_attachments: false,
            attachments: Vec::new(),
        };
        self.messages
            .lock()
            .expect("messages lock")
            .insert(message_id.to_string(), content);
    }

    pub(crate) fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub(crate) fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().expect("subscriptions lock").clone()
    }

    pub(crate) fn fail_sends(&self) {
        self.fail_send.store(true, Ordering::SeqCst);
    }
}

impl MailProvider for StubMail {
    fn fetch_message(&self, message_id: &str) -> Result<MailContent, MailError> {
        self.messages
            .lock()
            .expect("messages lock")
            .get(message_id)
            .cloned()
            .ok_or(MailError::Api {
                status: 404,
                body: format!("unknown message {}", message_id),
            })
    }

    fn send_reply(&self, parent_message_id: &str, html_body: &str) -> Result<String, MailError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(MailError::Api {
                status: 502,
                body: "send failed".to_string(),
            });
        }
        self.sent
            .lock()
            .expect("sent lock")
            .push((parent_message_id.to_string(), html_body.to_string()));
        Ok(format!("reply-{}", parent_message_id))
    }

    fn create_subscription(&self, webhook_url: &str) -> Result<(), MailError> {
        self.subscriptions
            .lock()
            .expect("subscriptions lock")
            .push(webhook_url.to_string());
        Ok(())
    }
}

pub(crate) struct StubModel {
    detected_language: Mutex<String>,
    classification: Mutex<ClassificationResult>,
    update: Mutex<UpdateSummaryResult>,
    fail: AtomicBool,
}

impl StubModel {
    pub(crate) fn new() -> Self {
        Self {
            detected_language: Mutex::new("en".to_string()),
            classification: Mutex::new(ClassificationResult {
                category: "refund_request".to_string(),
                priority: "high".to_string(),
                language: "en".to_string(),
                summary: "Customer asks for a refund.".to_string(),
                translated_subject: "Help".to_string(),
                translated_body: "I need a refund".to_string(),
                suggested_assignee: "mara".to_string(),
                draft_reply: "Hi, we are on it.".to_string(),
                should_auto_close: false,
            }),
            update: Mutex::new(UpdateSummaryResult {
                summary: "Thread summary so far.".to_string(),
                translated_body: "Latest message in English.".to_string(),
            }),
            fail: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_detected_language(&self, language: &str) {
        *self.detected_language.lock().expect("language lock") = language.to_string();
    }

    pub(crate) fn set_classification(&self, result: ClassificationResult) {
        *self.classification.lock().expect("classification lock") = result;
    }

    pub(crate) fn fail_all(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    fn check_failure(&self) -> Result<(), TriageError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(TriageError::EmptyContent)
        } else {
            Ok(())
        }
    }
}

impl TriageModel for StubModel {
    fn detect_language(
        &self,
        _subject: &str,
        _body: &str,
        _from: &str,
    ) -> Result<String, TriageError> {
        self.check_failure()?;
        Ok(self.detected_language.lock().expect("language lock").clone())
    }

    fn classify_and_draft(
        &self,
        _subject: &str,
        _body: &str,
        _from: &str,
    ) -> Result<ClassificationResult, TriageError> {
        self.check_failure()?;
        Ok(self.classification.lock().expect("classification lock").clone())
    }

    fn generate_draft_reply(
        &self,
        _subject: &str,
        _body: &str,
        _from: &str,
        requested_language: &str,
    ) -> Result<String, TriageError> {
        self.check_failure()?;
        Ok(format!("draft in {}", requested_language))
    }

    fn update_summary(
        &self,
        _thread: &[ThreadEntry],
        _subject: &str,
        _language: &str,
    ) -> Result<UpdateSummaryResult, TriageError> {
        self.check_failure()?;
        Ok(self.update.lock().expect("update lock").clone())
    }

    fn translate_to_language(
        &self,
        text: &str,
        target_language: &str,
    ) -> Result<String, TriageError> {
        self.check_failure()?;
        Ok(format!("[{}] {}", target_language, text))
    }
}

pub(crate) struct TestHarness {
    pub(crate) state: AppState,
    pub(crate) store: Arc<MemoryTicketStore>,
    pub(crate) queue: Arc<MemoryClassificationQueue>,
    pub(crate) mail: Arc<StubMail>,
    pub(crate) model: Arc<StubModel>,
}

pub(crate) fn test_config() -> ServiceConfig {
    ServiceConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        webhook_secret: "maildesk-webhook-secret".to_string(),
        mailbox_address: "support@notely.app".to_string(),
        store_backend: StoreBackend::Memory,
        db_url: None,
        worker_poll_interval: Duration::from_millis(10),
        queue_lease: Duration::from_secs(300),
        queue_max_attempts: 3,
        dedup_retention: Duration::from_secs(7 * 24 * 60 * 60),
        team_directory: TeamDirectory::default(),
        webhook_public_url: None,
        auto_ack_enabled: true,
        inbound_body_max_bytes: 1024 * 1024,
    }
}

pub(crate) fn test_state() -> TestHarness {
    let store = Arc::new(MemoryTicketStore::new());
    let queue = Arc::new(MemoryClassificationQueue::with_timing(
        Duration::from_secs(300),
        Duration::ZERO,
        3,
    ));
    let mail = Arc::new(StubMail::new());
    let model = Arc::new(StubModel::new());
    let state = AppState {
        config: Arc::new(test_config()),
        store: store.clone(),
        dedup: Arc::new(MemoryDedupStore::new()),
        queue: queue.clone(),
        mail: mail.clone(),
        model: model.clone(),
    };
    TestHarness {
        state,
        store,
        queue,
        mail,
        model,
    }
}

pub(crate) fn notification(message_id: &str, client_state: &str) -> ChangeNotification {
    ChangeNotification {
        client_state: Some(client_state.to_string()),
        resource_data: Some(ResourceData {
            id: Some(message_id.to_string()),
        }),
    }
}
