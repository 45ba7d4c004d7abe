//! Ledger data model
//!
//! Row types for tenants, subscriptions, plans, invoices, estimates and
//! payment records. Status enums are stored as TEXT and parsed through the
//! `as_str`/`FromStr` pairs below.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

pub use fieldpay_shared::BillingInterval;

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(
                        concat!("unknown ", stringify!($name), ": {}"), other
                    )),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }
    };
}

text_enum!(TenantStatus {
    Trial => "trial",
    Active => "active",
    PastDue => "past_due",
    PaymentFailed => "payment_failed",
    Cancelled => "cancelled",
});

text_enum!(SubscriptionStatus {
    Active => "active",
    PaymentFailed => "payment_failed",
    Cancelled => "cancelled",
});

text_enum!(PaymentMethod {
    CardOnFile => "card_on_file",
    Invoice => "invoice",
});

text_enum!(InvoiceStatus {
    Draft => "draft",
    Sent => "sent",
    Paid => "paid",
    Overdue => "overdue",
});

text_enum!(EstimateStatus {
    Draft => "draft",
    Sent => "sent",
    Accepted => "accepted",
    Declined => "declined",
    Converted => "converted",
});

text_enum!(PaymentStatus {
    Succeeded => "succeeded",
    Failed => "failed",
});

text_enum!(ProcessorKind {
    CardOnFile => "card_on_file",
    RedirectOrder => "redirect_order",
});

/// A company on the platform. Soft-deleted rather than removed; the engine
/// maintains `deleted_at != NULL => is_active == false`.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub subscription_status: TenantStatus,
    pub subscription_plan: Option<Uuid>,
    pub trial_ends_at: Option<OffsetDateTime>,
    pub processor_customer_ref: Option<String>,
    pub processor_card_ref: Option<String>,
    pub is_active: bool,
    pub deleted_at: Option<OffsetDateTime>,
}

/// Immutable plan reference data.
#[derive(Debug, Clone)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub amount_cents: i64,
    pub billing_interval: BillingInterval,
}

/// A recurring billing agreement for one of a tenant's clients.
///
/// Advanced only by a successful reconciliation; degraded to `payment_failed`
/// only by a failed capture attempt.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub plan_id: Uuid,
    pub payment_method: PaymentMethod,
    pub status: SubscriptionStatus,
    pub processor: ProcessorKind,
    pub current_period_start: OffsetDateTime,
    pub current_period_end: OffsetDateTime,
    pub processor_card_ref: Option<String>,
}

impl Subscription {
    /// A subscription is eligible for a scheduled charge when it is not
    /// cancelled, pays by card-on-file, and has a stored card reference.
    /// Payment-failed subscriptions stay eligible so the next cycle
    /// retries them; success flips them back to active.
    pub fn charge_eligible(&self) -> bool {
        self.status != SubscriptionStatus::Cancelled
            && self.payment_method == PaymentMethod::CardOnFile
            && self.processor_card_ref.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineItem {
    pub description: String,
    pub quantity: i64,
    pub unit_amount_cents: i64,
}

#[derive(Debug, Clone)]
pub struct Invoice {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub invoice_number: String,
    pub status: InvoiceStatus,
    pub amount_cents: i64,
    pub due_date: OffsetDateTime,
    pub line_items: Vec<LineItem>,
    pub paid_at: Option<OffsetDateTime>,
    pub processor_payment_ref: Option<String>,
    /// "processor" when settled through a capture, "manual" when marked paid
    /// by an operator.
    pub payment_source: Option<String>,
    pub subscription_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

impl Invoice {
    /// Overdue is a read-time derived status, never a stored transition; a
    /// background job can therefore never race `mark_paid`.
    pub fn effective_status(&self, now: OffsetDateTime) -> InvoiceStatus {
        if self.status == InvoiceStatus::Sent && self.due_date < now {
            InvoiceStatus::Overdue
        } else {
            self.status
        }
    }
}

#[derive(Debug, Clone)]
pub struct Estimate {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub estimate_number: String,
    pub status: EstimateStatus,
    pub amount_cents: i64,
    pub line_items: Vec<LineItem>,
    pub converted_to_invoice_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

/// Append-only audit ledger of payment attempts. Exactly one record per
/// attempt regardless of outcome; uniqueness on `processor_payment_ref` is
/// the primary idempotency guard.
#[derive(Debug, Clone)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub amount_cents: i64,
    pub status: PaymentStatus,
    /// Unique; NULL only on failures without a processor round-trip.
    pub processor_payment_ref: Option<String>,
    pub idempotency_key: String,
    pub description: String,
    pub error: Option<String>,
    pub related_subscription_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
}
