use std::sync::Arc;

use mail_graph_module::MailProvider;
use triage_module::TriageModel;

use crate::classification_queue::ClassificationQueue;
use crate::dedup_store::DedupClaimStore;
use crate::ticket_store::TicketStore;

use super::config::ServiceConfig;

/// Shared handles for the webhook gateway, the worker and the agent API.
/// Everything behind the trait objects is stateless per request/job; all
/// coordination happens in the stores.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub store: Arc<dyn TicketStore>,
    pub dedup: Arc<dyn DedupClaimStore>,
    pub queue: Arc<dyn ClassificationQueue>,
    pub mail: Arc<dyn MailProvider>,
    pub model: Arc<dyn TriageModel>,
}
