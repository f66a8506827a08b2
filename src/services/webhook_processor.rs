//! Inbound gateway webhook handling.
//!
//! Verifies the signature over the raw body, routes the event to a handler,
//! resolves the owning order or subscription and applies the state machine
//! decision as a guarded update. Every outcome, including failures, is folded
//! into a [`WebhookAck`] so the HTTP layer can always answer 200.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::database::error::DatabaseError;
use crate::database::repository::{GuardedUpdate, LedgerPatch, LedgerStore, StatusGuard};
use crate::payments::signature::SignatureVerifier;
use crate::payments::types::{
    EntityRef, EntityType, GatewayEventKind, LedgerEntry, PaymentHistoryEntry, PaymentStatus,
    SubscriptionStatus, WebhookEnvelope,
};
use crate::services::payment_state::{decide, Decision};
use crate::services::side_effects::{DocumentOutcome, SideEffectOrchestrator};

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("No order or subscription matches the event")]
    UnresolvedEntity,
    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Ok,
    SignatureInvalid,
    Error,
}

/// Body returned to the gateway with HTTP 200
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub status: AckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    pub processed: bool,
    pub message: String,
}

/// Result of one event handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOutcome {
    pub success: bool,
    pub message: String,
    /// Status the intent moved to, when this delivery performed a transition
    pub transitioned_to: Option<PaymentStatus>,
    pub document: Option<DocumentOutcome>,
}

impl HandlerOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            transitioned_to: None,
            document: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            transitioned_to: None,
            document: None,
        }
    }
}

/// Fields pulled out of the event payload, whatever entity carried them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventContext {
    pub payment_id: Option<String>,
    pub gateway_order_id: Option<String>,
    pub refund_id: Option<String>,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub error_description: Option<String>,
    pub receipt: Option<String>,
    pub notes: JsonValue,
}

fn str_field(value: &JsonValue, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl EventContext {
    pub fn from_payload(payload: &JsonValue) -> Self {
        let entity = |name: &str| {
            payload
                .get(name)
                .and_then(|v| v.get("entity").or(Some(v)))
                .filter(|v| v.is_object())
                .cloned()
        };
        let payment = entity("payment");
        let refund = entity("refund");
        let order = entity("order");

        let mut ctx = EventContext {
            notes: JsonValue::Null,
            ..Default::default()
        };

        if let Some(p) = &payment {
            ctx.payment_id = str_field(p, "id");
            ctx.gateway_order_id = str_field(p, "order_id");
            ctx.amount_minor = p.get("amount").and_then(|v| v.as_i64());
            ctx.currency = str_field(p, "currency");
            ctx.error_description = str_field(p, "error_description");
            ctx.notes = p.get("notes").cloned().unwrap_or(JsonValue::Null);
        }
        if let Some(r) = &refund {
            ctx.refund_id = str_field(r, "id");
            ctx.payment_id = ctx.payment_id.take().or_else(|| str_field(r, "payment_id"));
            if ctx.amount_minor.is_none() {
                ctx.amount_minor = r.get("amount").and_then(|v| v.as_i64());
            }
            if !ctx.notes.is_object() {
                ctx.notes = r.get("notes").cloned().unwrap_or(JsonValue::Null);
            }
        }
        if let Some(o) = &order {
            ctx.gateway_order_id = ctx.gateway_order_id.take().or_else(|| str_field(o, "id"));
            ctx.receipt = str_field(o, "receipt");
            if ctx.amount_minor.is_none() {
                ctx.amount_minor = o.get("amount").and_then(|v| v.as_i64());
            }
            if !ctx.notes.is_object() {
                ctx.notes = o.get("notes").cloned().unwrap_or(JsonValue::Null);
            }
        }

        // Flattened payloads
        ctx.payment_id = ctx.payment_id.or_else(|| str_field(payload, "payment_id"));
        ctx.gateway_order_id = ctx.gateway_order_id.or_else(|| str_field(payload, "order_id"));
        ctx.refund_id = ctx.refund_id.or_else(|| str_field(payload, "refund_id"));
        ctx.amount_minor = ctx
            .amount_minor
            .or_else(|| payload.get("amount").and_then(|v| v.as_i64()));
        if !ctx.notes.is_object() {
            ctx.notes = payload.get("notes").cloned().unwrap_or(JsonValue::Null);
        }

        ctx
    }

    /// `(entity_type, identifier)` hints carried in the gateway notes.
    fn note_hints(&self) -> Vec<(EntityType, String)> {
        let mut hints = Vec::new();
        let explicit_type = str_field(&self.notes, "entity_type")
            .and_then(|t| t.parse::<EntityType>().ok());
        if let (Some(entity_type), Some(id)) = (explicit_type, str_field(&self.notes, "entity_id")) {
            hints.push((entity_type, id));
        }
        if let Some(id) = str_field(&self.notes, "subscription_id") {
            hints.push((EntityType::Subscription, id));
        }
        if let Some(id) = str_field(&self.notes, "order_id") {
            hints.push((EntityType::Order, id));
        }
        hints
    }
}

pub struct WebhookProcessor {
    verifier: SignatureVerifier,
    ledger: Arc<dyn LedgerStore>,
    side_effects: Arc<SideEffectOrchestrator>,
    provider: String,
    auto_capture: bool,
}

impl WebhookProcessor {
    pub fn new(
        verifier: SignatureVerifier,
        ledger: Arc<dyn LedgerStore>,
        side_effects: Arc<SideEffectOrchestrator>,
        provider: impl Into<String>,
        auto_capture: bool,
    ) -> Self {
        Self {
            verifier,
            ledger,
            side_effects,
            provider: provider.into(),
            auto_capture,
        }
    }

    pub async fn handle(&self, raw_body: &[u8], signature: Option<&str>) -> WebhookAck {
        self.handle_at(raw_body, signature, Utc::now()).await
    }

    pub async fn handle_at(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> WebhookAck {
        let verified = signature
            .map(|sig| self.verifier.verify(raw_body, sig))
            .unwrap_or(false);
        if !verified {
            warn!(
                security = true,
                signature_present = signature.is_some(),
                body_len = raw_body.len(),
                "rejected webhook with invalid signature"
            );
            return WebhookAck {
                status: AckStatus::SignatureInvalid,
                event: None,
                processed: false,
                message: "Invalid signature".to_string(),
            };
        }

        let envelope: WebhookEnvelope = match serde_json::from_slice(raw_body) {
            Ok(envelope) => envelope,
            Err(e) => {
                let err = WebhookProcessorError::MalformedPayload(e.to_string());
                error!(error = %err, "failed to parse webhook body");
                return WebhookAck {
                    status: AckStatus::Error,
                    event: None,
                    processed: false,
                    message: err.to_string(),
                };
            }
        };

        let Some(kind) = GatewayEventKind::parse(&envelope.event) else {
            info!(event = %envelope.event, "unhandled webhook event acknowledged");
            return WebhookAck {
                status: AckStatus::Ok,
                event: Some(envelope.event),
                processed: false,
                message: "Event acknowledged, not processed".to_string(),
            };
        };

        let outcome = self.dispatch(kind, &envelope.payload, now).await;
        info!(
            event = %envelope.event,
            success = outcome.success,
            transitioned_to = ?outcome.transitioned_to,
            message = %outcome.message,
            "webhook handled"
        );

        WebhookAck {
            status: if outcome.success {
                AckStatus::Ok
            } else {
                AckStatus::Error
            },
            event: Some(envelope.event),
            processed: outcome.success,
            message: outcome.message,
        }
    }

    /// Handles an already verified event. Never returns an error.
    pub async fn dispatch(
        &self,
        kind: GatewayEventKind,
        payload: &JsonValue,
        now: DateTime<Utc>,
    ) -> HandlerOutcome {
        let ctx = EventContext::from_payload(payload);
        match self.apply_event(kind, &ctx, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                match &e {
                    WebhookProcessorError::UnresolvedEntity => warn!(
                        event = kind.as_str(),
                        payment_id = ?ctx.payment_id,
                        gateway_order_id = ?ctx.gateway_order_id,
                        "webhook did not match any order or subscription"
                    ),
                    _ => error!(event = kind.as_str(), error = %e, "webhook handler failed"),
                }
                HandlerOutcome::failed(e.to_string())
            }
        }
    }

    /// Resolution order: notes, gateway order id, gateway payment id, then the
    /// receipt or order id read as our own id or reference code.
    pub async fn resolve_entry(
        &self,
        ctx: &EventContext,
    ) -> Result<Option<LedgerEntry>, WebhookProcessorError> {
        for (entity_type, identifier) in ctx.note_hints() {
            if let Some(entry) = self.resolve_identifier(entity_type, &identifier).await? {
                return Ok(Some(entry));
            }
        }
        if let Some(order_id) = ctx.gateway_order_id.as_deref() {
            if let Some(entry) = self.ledger.find_by_gateway_order_id(order_id).await? {
                return Ok(Some(entry));
            }
        }
        if let Some(payment_id) = ctx.payment_id.as_deref() {
            if let Some(entry) = self.ledger.find_by_gateway_payment_id(payment_id).await? {
                return Ok(Some(entry));
            }
        }
        // Merchant-side ids: the receipt, or a bare `order_id` naming our own order.
        for identifier in [ctx.receipt.as_deref(), ctx.gateway_order_id.as_deref()]
            .into_iter()
            .flatten()
        {
            for entity_type in [EntityType::Order, EntityType::Subscription] {
                if let Some(entry) = self.resolve_identifier(entity_type, identifier).await? {
                    return Ok(Some(entry));
                }
            }
        }
        Ok(None)
    }

    async fn resolve_identifier(
        &self,
        entity_type: EntityType,
        identifier: &str,
    ) -> Result<Option<LedgerEntry>, WebhookProcessorError> {
        let Some(entity_id) = self
            .ledger
            .resolve_entity_id(entity_type, identifier)
            .await?
        else {
            return Ok(None);
        };
        Ok(self
            .ledger
            .get(&EntityRef::new(entity_type, entity_id))
            .await?)
    }

    async fn apply_event(
        &self,
        kind: GatewayEventKind,
        ctx: &EventContext,
        now: DateTime<Utc>,
    ) -> Result<HandlerOutcome, WebhookProcessorError> {
        let entry = self
            .resolve_entry(ctx)
            .await?
            .ok_or(WebhookProcessorError::UnresolvedEntity)?;
        let entity = entry.entity();

        // An order id that named our own entry is not a gateway order id.
        let mut ctx = ctx.clone();
        if ctx
            .gateway_order_id
            .as_deref()
            .is_some_and(|id| id == entry.entity_id || id == entry.reference_code)
        {
            ctx.gateway_order_id = None;
        }
        let ctx = &ctx;

        // A guard rejection means another delivery moved the intent first;
        // re-decide once against the status that won.
        let mut current = entry.payment_status();
        for _ in 0..2 {
            match decide(current, kind, self.auto_capture) {
                Decision::AlreadyProcessed { message } => {
                    info!(entity = %entity, event = kind.as_str(), "{}", message);
                    return Ok(HandlerOutcome::ok(message));
                }
                Decision::RecordOnly { reason } => {
                    let history = self.history(kind, None, ctx, now).with_note(reason);
                    self.ledger
                        .update(
                            &entity,
                            &StatusGuard::any(),
                            LedgerPatch::history_only(history),
                            now,
                        )
                        .await?;
                    info!(
                        entity = %entity,
                        event = kind.as_str(),
                        payment_id = ?ctx.payment_id,
                        status = ?current,
                        "{}", reason
                    );
                    return Ok(HandlerOutcome::ok(reason));
                }
                Decision::Transition { to, guard } => {
                    let patch = self.transition_patch(kind, to, ctx, now);
                    match self.ledger.update(&entity, &guard, patch, now).await? {
                        GuardedUpdate::Applied(updated) => {
                            return Ok(self.after_transition(&updated, to, now).await);
                        }
                        GuardedUpdate::Rejected { current: persisted } => {
                            info!(
                                entity = %entity,
                                event = kind.as_str(),
                                persisted = ?persisted,
                                "guarded update lost a race, re-evaluating"
                            );
                            current = persisted;
                        }
                    }
                }
            }
        }

        Ok(HandlerOutcome::ok("Concurrent update detected; event not applied"))
    }

    fn history(
        &self,
        kind: GatewayEventKind,
        status: Option<PaymentStatus>,
        ctx: &EventContext,
        now: DateTime<Utc>,
    ) -> PaymentHistoryEntry {
        PaymentHistoryEntry::new(kind.as_str(), status, now).with_payment_id(ctx.payment_id.clone())
    }

    fn transition_patch(
        &self,
        kind: GatewayEventKind,
        to: PaymentStatus,
        ctx: &EventContext,
        now: DateTime<Utc>,
    ) -> LedgerPatch {
        let mut patch = LedgerPatch {
            status: Some(to),
            provider: Some(self.provider.clone()),
            gateway_order_id: ctx.gateway_order_id.clone(),
            gateway_payment_id: ctx.payment_id.clone(),
            history: Some(self.history(kind, Some(to), ctx, now)),
            ..Default::default()
        };

        match to {
            PaymentStatus::Paid => {
                patch.amount_minor = ctx.amount_minor;
                patch.currency = ctx.currency.clone();
                patch.paid_at = Some(now);
                patch.clear_failure_reason = true;
                patch.subscription_status = Some(SubscriptionStatus::Active);
            }
            PaymentStatus::Authorized | PaymentStatus::Pending => {
                patch.amount_minor = ctx.amount_minor;
                patch.currency = ctx.currency.clone();
            }
            PaymentStatus::Failed => {
                patch.failure_reason = Some(
                    ctx.error_description
                        .clone()
                        .unwrap_or_else(|| "Payment failed".to_string()),
                );
            }
            PaymentStatus::Refunded => {
                // A refund never rewrites which payment it refunds.
                patch.gateway_payment_id = None;
                patch.gateway_order_id = None;
                patch.refund_id = ctx.refund_id.clone();
            }
        }
        patch
    }

    async fn after_transition(
        &self,
        entry: &LedgerEntry,
        to: PaymentStatus,
        now: DateTime<Utc>,
    ) -> HandlerOutcome {
        let mut outcome = HandlerOutcome::ok(match to {
            PaymentStatus::Paid => "Payment captured",
            PaymentStatus::Authorized => "Payment authorized",
            PaymentStatus::Failed => "Payment failure recorded",
            PaymentStatus::Refunded => "Refund processed",
            PaymentStatus::Pending => "Pending payment recorded",
        });
        outcome.transitioned_to = Some(to);

        info!(
            entity = %entry.entity(),
            status = to.as_str(),
            payment_id = ?entry.gateway_payment_id(),
            "payment status updated"
        );

        match to {
            PaymentStatus::Paid => {
                outcome.document = Some(self.side_effects.on_paid(entry, now).await);
            }
            PaymentStatus::Refunded => {
                outcome.document = Some(self.side_effects.on_refunded(entry, now).await);
            }
            PaymentStatus::Failed => self.side_effects.on_failed(entry).await,
            PaymentStatus::Authorized | PaymentStatus::Pending => {}
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_reads_nested_payment_entity() {
        let ctx = EventContext::from_payload(&json!({
            "payment": {"entity": {
                "id": "P1",
                "order_id": "order_G1",
                "amount": 10500,
                "currency": "INR",
                "notes": {"order_id": "O1"}
            }}
        }));
        assert_eq!(ctx.payment_id.as_deref(), Some("P1"));
        assert_eq!(ctx.gateway_order_id.as_deref(), Some("order_G1"));
        assert_eq!(ctx.amount_minor, Some(10500));
        assert_eq!(ctx.note_hints(), vec![(EntityType::Order, "O1".to_string())]);
    }

    #[test]
    fn context_reads_refund_entity() {
        let ctx = EventContext::from_payload(&json!({
            "refund": {"entity": {"id": "rfnd_1", "payment_id": "P1", "amount": 500}}
        }));
        assert_eq!(ctx.refund_id.as_deref(), Some("rfnd_1"));
        assert_eq!(ctx.payment_id.as_deref(), Some("P1"));
    }

    #[test]
    fn context_accepts_flattened_payload() {
        let ctx = EventContext::from_payload(&json!({
            "payment_id": "P9",
            "order_id": "order_9",
            "notes": {"entity_type": "subscription", "entity_id": "SUB-9"}
        }));
        assert_eq!(ctx.payment_id.as_deref(), Some("P9"));
        assert_eq!(ctx.gateway_order_id.as_deref(), Some("order_9"));
        assert_eq!(
            ctx.note_hints(),
            vec![(EntityType::Subscription, "SUB-9".to_string())]
        );
    }
}
