//! Payment state machine
//!
//! Pure decision logic: given the persisted status and an inbound gateway
//! event, decide whether the event moves the intent, is already reflected, or
//! is only recorded. The caller applies a [`Decision::Transition`] through a
//! guarded store update, so the decision is re-checked atomically against
//! whatever status is persisted at write time.
//!
//! ```text
//!  <none> ──pending──▶ pending ──authorized──▶ authorized
//!     │                   │                        │
//!     └──────captured─────┴────────captured────────┴──▶ paid ──refund──▶ refunded
//!     │                   │                        │      ▲
//!     └──────failed───────┴────────failed──────────┴──▶ failed
//!                                                         │ captured
//!                                                         └──────────▶ paid
//! ```

use crate::database::repository::StatusGuard;
use crate::payments::types::{GatewayEventKind, PaymentStatus};

pub const ALREADY_PROCESSED: &str = "Payment already processed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Move to `to` provided the persisted status still passes `guard`
    Transition { to: PaymentStatus, guard: StatusGuard },
    /// Event is already reflected; succeed without side effects
    AlreadyProcessed { message: &'static str },
    /// Keep an audit record, leave the status untouched
    RecordOnly { reason: &'static str },
}

fn transition(to: PaymentStatus, from: &[PaymentStatus], allow_missing: bool) -> Decision {
    Decision::Transition {
        to,
        guard: StatusGuard::from_statuses(from, allow_missing),
    }
}

/// Statuses from which a capture may complete the payment.
pub const CAPTURABLE: [PaymentStatus; 3] = [
    PaymentStatus::Pending,
    PaymentStatus::Authorized,
    PaymentStatus::Failed,
];

pub fn decide(
    current: Option<PaymentStatus>,
    event: GatewayEventKind,
    auto_capture: bool,
) -> Decision {
    use GatewayEventKind as E;
    use PaymentStatus as S;

    if event.is_audit_only() {
        return Decision::RecordOnly {
            reason: "Event recorded for audit",
        };
    }

    let captures = matches!(event, E::PaymentCaptured | E::OrderPaid)
        || (event == E::PaymentAuthorized && auto_capture);

    if captures {
        return match current {
            Some(S::Paid) | Some(S::Refunded) => Decision::AlreadyProcessed {
                message: ALREADY_PROCESSED,
            },
            _ => transition(S::Paid, &CAPTURABLE, true),
        };
    }

    match event {
        E::PaymentAuthorized => match current {
            None | Some(S::Pending) => transition(S::Authorized, &[S::Pending], true),
            Some(S::Authorized) | Some(S::Paid) | Some(S::Refunded) => {
                Decision::AlreadyProcessed {
                    message: ALREADY_PROCESSED,
                }
            }
            Some(S::Failed) => Decision::RecordOnly {
                reason: "Authorization after failure recorded",
            },
        },
        E::PaymentFailed => match current {
            None | Some(S::Pending) | Some(S::Authorized) => {
                transition(S::Failed, &[S::Pending, S::Authorized], true)
            }
            Some(S::Failed) => Decision::AlreadyProcessed {
                message: "Payment failure already recorded",
            },
            Some(S::Paid) | Some(S::Refunded) => Decision::RecordOnly {
                reason: "Stale failure ignored for completed payment",
            },
        },
        E::RefundProcessed => match current {
            Some(S::Paid) => transition(S::Refunded, &[S::Paid], false),
            Some(S::Refunded) => Decision::AlreadyProcessed {
                message: "Refund already processed",
            },
            _ => Decision::RecordOnly {
                reason: "Refund for unpaid payment recorded",
            },
        },
        E::PaymentPending => match current {
            None => transition(S::Pending, &[], true),
            Some(_) => Decision::AlreadyProcessed {
                message: "Payment already tracked",
            },
        },
        _ => Decision::RecordOnly {
            reason: "Event recorded for audit",
        },
    }
}
