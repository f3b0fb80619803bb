//! Invoice lifecycle.
//!
//! Invoices carry the balance invariants (`total == subtotal + tax`,
//! `amount_due == total - amount_paid`) through every payment
//! application. Overdue is a derived display state, never stored: the
//! persisted status stays `Pending`/`PartiallyPaid` and reads fold the
//! due-date check in via [`Invoice::effective_status`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BillingError, Result};

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Being assembled; editable.
    Draft,
    /// Issued and awaiting payment.
    Pending,
    /// Fully paid.
    Paid,
    /// Partially paid.
    PartiallyPaid,
    /// Past due date and not fully paid. Derived on read in this crate;
    /// accepted off the wire for backends that persist it.
    Overdue,
    /// Administratively cancelled. Terminal apart from nothing.
    Void,
    /// Paid and subsequently refunded.
    Refunded,
}

impl InvoiceStatus {
    /// Convert to the wire string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::PartiallyPaid => "partially_paid",
            Self::Overdue => "overdue",
            Self::Void => "void",
            Self::Refunded => "refunded",
        }
    }

    /// Statuses that still accept payment application.
    #[must_use]
    pub fn is_payable(&self) -> bool {
        matches!(self, Self::Pending | Self::PartiallyPaid | Self::Overdue)
    }
}

impl std::str::FromStr for InvoiceStatus {
    type Err = InvoiceStatusParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "pending" | "open" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "partially_paid" => Ok(Self::PartiallyPaid),
            "overdue" => Ok(Self::Overdue),
            "void" => Ok(Self::Void),
            "refunded" => Ok(Self::Refunded),
            _ => Err(InvoiceStatusParseError(s.to_string())),
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown invoice status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceStatusParseError(pub String);

impl std::fmt::Display for InvoiceStatusParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown invoice status: {}", self.0)
    }
}

impl std::error::Error for InvoiceStatusParseError {}

/// One line on an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLineItem {
    /// Human-readable description.
    pub description: String,
    /// Units billed.
    pub quantity: u32,
    /// Price per unit.
    pub unit_price: Decimal,
    /// Line total (`quantity * unit_price`).
    pub amount: Decimal,
}

impl InvoiceLineItem {
    /// Create a line item, computing the amount from quantity and price.
    #[must_use]
    pub fn new(description: impl Into<String>, quantity: u32, unit_price: Decimal) -> Self {
        Self {
            description: description.into(),
            quantity,
            unit_price,
            amount: unit_price * Decimal::from(quantity),
        }
    }
}

/// A billing statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Invoice identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Subscription this invoice bills, if any. Weak reference by id;
    /// the subscription is looked up, never embedded.
    pub subscription_id: Option<Uuid>,
    /// Unique, sequential per account (e.g. "INV-2026-0042").
    pub number: String,
    /// Lifecycle status as stored.
    pub status: InvoiceStatus,
    /// When the invoice was issued.
    pub issued_at: Option<DateTime<Utc>>,
    /// Payment deadline.
    pub due_at: Option<DateTime<Utc>>,
    /// When the invoice became fully paid.
    pub paid_at: Option<DateTime<Utc>>,
    /// Sum of line item amounts.
    pub subtotal: Decimal,
    /// Tax on the subtotal.
    pub tax_amount: Decimal,
    /// `subtotal + tax_amount`.
    pub total_amount: Decimal,
    /// Payments applied so far.
    pub amount_paid: Decimal,
    /// `total_amount - amount_paid`.
    pub amount_due: Decimal,
    /// ISO 4217 currency code, lowercase.
    pub currency: String,
    /// Ordered line items.
    pub line_items: Vec<InvoiceLineItem>,
}

impl Invoice {
    /// Assemble a draft invoice from line items, computing the balance
    /// fields so the invariants hold from the start.
    #[must_use]
    pub fn draft(
        user_id: Uuid,
        subscription_id: Option<Uuid>,
        number: impl Into<String>,
        line_items: Vec<InvoiceLineItem>,
        tax_amount: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        let subtotal: Decimal = line_items.iter().map(|li| li.amount).sum();
        let total_amount = subtotal + tax_amount;
        Self {
            id: Uuid::new_v4(),
            user_id,
            subscription_id,
            number: number.into(),
            status: InvoiceStatus::Draft,
            issued_at: None,
            due_at: None,
            paid_at: None,
            subtotal,
            tax_amount,
            total_amount,
            amount_paid: Decimal::ZERO,
            amount_due: total_amount,
            currency: currency.into().to_lowercase(),
            line_items,
        }
    }

    /// Validate the balance invariants.
    pub fn validate(&self) -> Result<()> {
        if self.total_amount != self.subtotal + self.tax_amount {
            return Err(BillingError::validation(
                "total_amount must equal subtotal + tax_amount",
            ));
        }
        if self.amount_due != self.total_amount - self.amount_paid {
            return Err(BillingError::validation(
                "amount_due must equal total_amount - amount_paid",
            ));
        }
        let line_sum: Decimal = self.line_items.iter().map(|li| li.amount).sum();
        if !self.line_items.is_empty() && line_sum != self.subtotal {
            return Err(BillingError::validation(
                "line item amounts must sum to the subtotal",
            ));
        }
        Ok(())
    }

    /// Check if the invoice carries no outstanding balance.
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.amount_due <= Decimal::ZERO
    }

    /// Check if the invoice is past its due date and not settled.
    /// A paid, void or refunded invoice is never overdue.
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        if matches!(
            self.status,
            InvoiceStatus::Paid | InvoiceStatus::Void | InvoiceStatus::Refunded
        ) {
            return false;
        }
        self.due_at.is_some_and(|due| now > due)
    }

    /// Whole days past the due date, rounded down, zero if not overdue.
    #[must_use]
    pub fn days_overdue(&self, now: DateTime<Utc>) -> i64 {
        match self.due_at {
            Some(due) if self.is_overdue(now) => ((now - due).num_seconds() / 86_400).max(0),
            _ => 0,
        }
    }

    /// The status to display: folds the derived overdue check into the
    /// stored status.
    #[must_use]
    pub fn effective_status(&self, now: DateTime<Utc>) -> InvoiceStatus {
        if self.is_overdue(now)
            && matches!(
                self.status,
                InvoiceStatus::Pending | InvoiceStatus::PartiallyPaid
            )
        {
            InvoiceStatus::Overdue
        } else {
            self.status
        }
    }

    /// Issue the invoice: `Draft → Pending`, stamping issue and due dates.
    pub fn issue(&mut self, issued_at: DateTime<Utc>, due_at: DateTime<Utc>) -> Result<()> {
        if self.status != InvoiceStatus::Draft {
            return Err(self.invalid_state("issue"));
        }
        self.status = InvoiceStatus::Pending;
        self.issued_at = Some(issued_at);
        self.due_at = Some(due_at);
        Ok(())
    }

    /// Apply a payment, maintaining the balance invariants.
    ///
    /// Overpayment fails with [`BillingError::Overpayment`] unless
    /// `allow_credit` is set, in which case the excess is carried as a
    /// negative balance.
    pub fn apply_payment(
        &mut self,
        amount: Decimal,
        now: DateTime<Utc>,
        allow_credit: bool,
    ) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(BillingError::validation(
                "payment amount must be positive",
            ));
        }
        if !self.status.is_payable() {
            return Err(self.invalid_state("apply a payment to"));
        }
        if amount > self.amount_due && !allow_credit {
            return Err(BillingError::Overpayment {
                invoice_id: self.number.clone(),
                attempted: amount,
                outstanding: self.amount_due,
            });
        }

        self.amount_paid += amount;
        self.amount_due = self.total_amount - self.amount_paid;

        if self.amount_due <= Decimal::ZERO {
            self.status = InvoiceStatus::Paid;
            self.paid_at = Some(now);
        } else {
            self.status = InvoiceStatus::PartiallyPaid;
        }
        Ok(())
    }

    /// Administratively void the invoice. Legal from any state except
    /// `Paid` and `Refunded`.
    pub fn void(&mut self) -> Result<()> {
        if matches!(self.status, InvoiceStatus::Paid | InvoiceStatus::Refunded) {
            return Err(self.invalid_state("void"));
        }
        self.status = InvoiceStatus::Void;
        Ok(())
    }

    /// Refund a paid invoice, reversing the net paid amount.
    ///
    /// The balance invariant holds throughout: the reversed payment
    /// reopens `amount_due`, but a `Refunded` invoice is not payable and
    /// never reads as overdue.
    pub fn refund(&mut self) -> Result<()> {
        if self.status != InvoiceStatus::Paid {
            return Err(self.invalid_state("refund"));
        }
        self.status = InvoiceStatus::Refunded;
        self.amount_paid = Decimal::ZERO;
        self.amount_due = self.total_amount;
        Ok(())
    }

    fn invalid_state(&self, operation: &str) -> BillingError {
        BillingError::InvalidInvoiceState {
            status: self.status.as_str().to_string(),
            operation: operation.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_invoice() -> Invoice {
        Invoice::draft(
            Uuid::new_v4(),
            Some(Uuid::new_v4()),
            "INV-2026-0001",
            vec![
                InvoiceLineItem::new("Pro plan (monthly)", 1, Decimal::new(10000, 2)),
            ],
            Decimal::new(800, 2),
            "usd",
        )
    }

    #[test]
    fn test_draft_balances() {
        let inv = sample_invoice();
        assert_eq!(inv.subtotal, Decimal::new(10000, 2));
        assert_eq!(inv.total_amount, Decimal::new(10800, 2));
        assert_eq!(inv.amount_due, Decimal::new(10800, 2));
        assert!(inv.validate().is_ok());
    }

    #[test]
    fn test_partial_payment_keeps_invariants() {
        let now = Utc::now();
        let mut inv = sample_invoice();
        inv.issue(now, now + Duration::days(30)).unwrap();

        inv.apply_payment(Decimal::new(5000, 2), now, false).unwrap();
        assert_eq!(inv.status, InvoiceStatus::PartiallyPaid);
        assert_eq!(inv.amount_due, Decimal::new(5800, 2));
        assert!(inv.validate().is_ok());
        assert!(!inv.is_paid());

        inv.apply_payment(Decimal::new(5800, 2), now, false).unwrap();
        assert_eq!(inv.status, InvoiceStatus::Paid);
        assert!(inv.is_paid());
        assert!(inv.paid_at.is_some());
        assert!(inv.validate().is_ok());
    }

    #[test]
    fn test_overpayment_rejected_without_credit_flag() {
        let now = Utc::now();
        let mut inv = sample_invoice();
        inv.issue(now, now + Duration::days(30)).unwrap();

        let before = inv.clone();
        let err = inv
            .apply_payment(Decimal::new(20000, 2), now, false)
            .unwrap_err();
        assert!(matches!(err, BillingError::Overpayment { .. }));
        assert_eq!(inv, before);

        // Allowed as credit: balance goes negative, invoice reads paid.
        inv.apply_payment(Decimal::new(20000, 2), now, true).unwrap();
        assert_eq!(inv.status, InvoiceStatus::Paid);
        assert!(inv.amount_due < Decimal::ZERO);
        assert!(inv.validate().is_ok());
    }

    #[test]
    fn test_payment_on_draft_rejected() {
        let now = Utc::now();
        let mut inv = sample_invoice();
        let err = inv
            .apply_payment(Decimal::new(100, 2), now, false)
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidInvoiceState { .. }));
    }

    #[test]
    fn test_overdue_derivation() {
        let now = Utc::now();
        let mut inv = sample_invoice();
        inv.issue(now - Duration::days(40), now - Duration::days(10))
            .unwrap();

        assert!(inv.is_overdue(now));
        assert_eq!(inv.days_overdue(now), 10);
        // Stored status is untouched; only the view folds it in.
        assert_eq!(inv.status, InvoiceStatus::Pending);
        assert_eq!(inv.effective_status(now), InvoiceStatus::Overdue);
    }

    #[test]
    fn test_paid_invoice_never_overdue() {
        let now = Utc::now();
        let mut inv = sample_invoice();
        inv.issue(now - Duration::days(40), now - Duration::days(10))
            .unwrap();
        inv.apply_payment(Decimal::new(10800, 2), now, false).unwrap();

        assert!(!inv.is_overdue(now));
        assert_eq!(inv.days_overdue(now), 0);
        assert_eq!(inv.effective_status(now), InvoiceStatus::Paid);
    }

    #[test]
    fn test_void_and_refund_guards() {
        let now = Utc::now();
        let mut inv = sample_invoice();
        inv.issue(now, now + Duration::days(30)).unwrap();

        // Refund requires paid.
        assert!(inv.refund().is_err());

        inv.apply_payment(Decimal::new(10800, 2), now, false).unwrap();
        // Paid invoices cannot be voided.
        assert!(inv.void().is_err());

        inv.refund().unwrap();
        assert_eq!(inv.status, InvoiceStatus::Refunded);
        assert_eq!(inv.amount_paid, Decimal::ZERO);
        assert!(inv.validate().is_ok());
        assert!(!inv.is_overdue(now + Duration::days(60)));

        // Refunded invoices cannot be voided either.
        assert!(inv.void().is_err());
    }

    #[test]
    fn test_wire_round_trip() {
        let now = Utc::now();
        let mut inv = sample_invoice();
        inv.issue(now, now + Duration::days(30)).unwrap();
        inv.apply_payment(Decimal::new(2500, 2), now, false).unwrap();

        let json = serde_json::to_string(&inv).unwrap();
        let back: Invoice = serde_json::from_str(&json).unwrap();
        assert_eq!(back, inv);
        assert!(back.validate().is_ok());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("pending".parse::<InvoiceStatus>().unwrap(), InvoiceStatus::Pending);
        // Stripe spelling accepted off the wire.
        assert_eq!("open".parse::<InvoiceStatus>().unwrap(), InvoiceStatus::Pending);
        assert_eq!("overdue".parse::<InvoiceStatus>().unwrap(), InvoiceStatus::Overdue);
        assert!("uncollectible".parse::<InvoiceStatus>().is_err());
    }
}
