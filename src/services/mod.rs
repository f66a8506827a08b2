//! Services module for payment event processing and reconciliation

pub mod commerce;
pub mod invoice;
pub mod notification;
pub mod payment_state;
pub mod reconciliation;
pub mod retry_queue;
pub mod side_effects;
pub mod webhook_processor;

pub use reconciliation::{ReconciliationReport, ReconciliationRequest, ReconciliationService};
pub use retry_queue::RetryQueueProcessor;
pub use side_effects::SideEffectOrchestrator;
pub use webhook_processor::{WebhookAck, WebhookProcessor};
