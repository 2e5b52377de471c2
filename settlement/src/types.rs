//! Core types for the settlement engine

use crate::catalog::RailDescriptor;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Tenant identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    /// Create new tenant ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// External settlement rail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rail {
    /// USDC on the stablecoin ledger
    CircleUsdc,
    /// Brazilian instant payments
    Pix,
    /// Mexican interbank transfers
    Spei,
    /// Visa card-network push/pull
    VisaDirect,
    /// Mastercard card-network push/pull
    MastercardSend,
    /// US ACH batches
    Ach,
    /// Wire transfer
    Wire,
    /// SEPA credit transfer
    Sepa,
}

impl Rail {
    /// Every rail known to the catalog
    pub const ALL: [Rail; 8] = [
        Rail::CircleUsdc,
        Rail::Pix,
        Rail::Spei,
        Rail::VisaDirect,
        Rail::MastercardSend,
        Rail::Ach,
        Rail::Wire,
        Rail::Sepa,
    ];

    /// Wire identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Rail::CircleUsdc => "circle_usdc",
            Rail::Pix => "pix",
            Rail::Spei => "spei",
            Rail::VisaDirect => "visa_direct",
            Rail::MastercardSend => "mastercard_send",
            Rail::Ach => "ach",
            Rail::Wire => "wire",
            Rail::Sepa => "sepa",
        }
    }
}

impl fmt::Display for Rail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rail {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Rail::ALL
            .iter()
            .copied()
            .find(|rail| rail.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownRail(s.to_string()))
    }
}

/// Payment protocol that originated the transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// HTTP 402 crypto-native payments
    X402,
    /// Agent payments protocol
    Ap2,
    /// Agentic commerce protocol
    Acp,
    /// Universal commerce protocol
    Ucp,
    /// Generic cross-border payout
    CrossBorder,
}

impl Protocol {
    /// Wire identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::X402 => "x402",
            Protocol::Ap2 => "ap2",
            Protocol::Acp => "acp",
            Protocol::Ucp => "ucp",
            Protocol::CrossBorder => "cross_border",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "x402" => Ok(Protocol::X402),
            "ap2" => Ok(Protocol::Ap2),
            "acp" => Ok(Protocol::Acp),
            "ucp" => Ok(Protocol::Ucp),
            "cross_border" => Ok(Protocol::CrossBorder),
            other => Err(Error::UnknownProtocol(other.to_string())),
        }
    }
}

/// Payout recipient forwarded to the rail executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recipient {
    /// Pix key recipient
    Pix {
        /// Pix key value
        pix_key: String,
        /// Key type (email, phone, cpf, cnpj, evp)
        pix_key_type: String,
        /// Beneficiary name
        name: String,
        /// CPF/CNPJ
        tax_id: Option<String>,
    },
    /// SPEI CLABE recipient
    Spei {
        /// 18-digit CLABE
        clabe: String,
        /// Beneficiary name
        name: String,
        /// RFC tax id
        rfc: Option<String>,
    },
    /// Bank account recipient (ACH, wire, SEPA)
    BankAccount {
        /// Account number or IBAN
        account: String,
        /// Routing number or BIC
        routing: String,
        /// Beneficiary name
        name: String,
    },
    /// On-chain wallet
    Wallet {
        /// Wallet address
        address: String,
    },
    /// Tokenized card
    Card {
        /// Network token
        token: String,
    },
}

/// Logical transfer request handed to the router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRequest {
    /// Transfer ID
    pub transfer_id: Uuid,

    /// Owning tenant
    pub tenant_id: TenantId,

    /// Originating protocol
    pub protocol: Protocol,

    /// Gross amount (must be positive)
    pub amount: Decimal,

    /// Source currency (ISO 4217 or token symbol)
    pub source_currency: String,

    /// Destination currency
    #[serde(default)]
    pub destination_currency: Option<String>,

    /// Destination country (ISO 3166 alpha-2)
    #[serde(default)]
    pub destination_country: Option<String>,

    /// Recipient details
    #[serde(default)]
    pub recipient: Option<Recipient>,

    /// Attempts already made by the caller
    #[serde(default)]
    pub retry_count: Option<u32>,

    /// Override for the router's default retry ceiling
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Caller-supplied idempotency key
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl SettlementRequest {
    /// Create a minimal request
    pub fn new(
        tenant_id: TenantId,
        protocol: Protocol,
        amount: Decimal,
        source_currency: impl Into<String>,
    ) -> Self {
        Self {
            transfer_id: Uuid::new_v4(),
            tenant_id,
            protocol,
            amount,
            source_currency: source_currency.into().to_uppercase(),
            destination_currency: None,
            destination_country: None,
            recipient: None,
            retry_count: None,
            max_retries: None,
            idempotency_key: None,
        }
    }

    /// Set destination country
    pub fn to_country(mut self, country: impl Into<String>) -> Self {
        self.destination_country = Some(country.into().to_uppercase());
        self
    }

    /// Set destination currency
    pub fn to_currency(mut self, currency: impl Into<String>) -> Self {
        self.destination_currency = Some(currency.into().to_uppercase());
        self
    }

    /// Set recipient
    pub fn with_recipient(mut self, recipient: Recipient) -> Self {
        self.recipient = Some(recipient);
        self
    }

    /// Reject malformed requests before routing
    pub fn validate(&self) -> Result<()> {
        if self.amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        if self.source_currency.trim().is_empty() {
            return Err(Error::InvalidAmount("source currency is required".to_string()));
        }
        Ok(())
    }
}

/// Ledger status of a settlement
///
/// Transitions are monotonic: `pending -> processing -> {completed | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    /// Routed, not yet submitted
    Pending,
    /// Submitted to the rail
    Processing,
    /// Settled on the rail
    Completed,
    /// Terminally failed
    Failed,
}

impl SettlementStatus {
    /// Completed or failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, SettlementStatus::Completed | SettlementStatus::Failed)
    }

    /// Whether `next` is reachable from `self`
    pub fn can_transition_to(&self, next: SettlementStatus) -> bool {
        use SettlementStatus::*;
        match (self, next) {
            (Completed, _) | (Failed, _) => false,
            (Pending, _) => true,
            (Processing, Pending) => false,
            (Processing, _) => true,
        }
    }

    /// Wire identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Processing => "processing",
            SettlementStatus::Completed => "completed",
            SettlementStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementFailure {
    /// Machine code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Whether another attempt may succeed
    pub retryable: bool,
}

impl SettlementFailure {
    /// Build a failure
    pub fn new(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable,
        }
    }
}

impl From<&Error> for SettlementFailure {
    fn from(err: &Error) -> Self {
        Self::new(err.code(), err.to_string(), err.is_retryable())
    }
}

/// Outcome of a routing call, persisted as settlement metadata for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Transfer ID
    pub transfer_id: Uuid,

    /// Protocol that drove preference
    pub protocol: Protocol,

    /// Chosen rail
    pub selected_rail: Rail,

    /// Catalog snapshot of the chosen rail
    pub rail: RailDescriptor,

    /// Remaining candidates in preference order
    pub alternatives: Vec<Rail>,

    /// Destination country used for eligibility
    pub destination_country: String,

    /// Time spent routing
    pub latency_micros: u64,

    /// Why this rail won
    pub rationale: String,

    /// Decision timestamp
    pub decided_at: DateTime<Utc>,
}

/// Ledger truth for a single settlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    /// Settlement ID
    pub id: Uuid,

    /// Transfer ID
    pub transfer_id: Uuid,

    /// Owning tenant
    pub tenant_id: TenantId,

    /// Rail carrying the transfer
    pub rail: Rail,

    /// Originating protocol
    pub protocol: Protocol,

    /// Status (monotonic)
    pub status: SettlementStatus,

    /// Gross amount
    pub gross_amount: Decimal,

    /// Fee charged by the rail
    pub fee_amount: Decimal,

    /// Gross minus fee
    pub net_amount: Decimal,

    /// Currency of the amounts
    pub currency: String,

    /// Rail-side identifier, assigned once
    pub external_settlement_id: Option<String>,

    /// First submission to the rail
    pub submitted_at: Option<DateTime<Utc>>,

    /// Completion on the rail
    pub settled_at: Option<DateTime<Utc>>,

    /// Expected completion for asynchronous rails
    pub estimated_completion: Option<DateTime<Utc>>,

    /// Retries performed so far
    pub retry_count: u32,

    /// Retry ceiling
    pub max_retries: u32,

    /// When the retry sweep may pick this record up
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Most recent failure
    pub last_error: Option<SettlementFailure>,

    /// Routing audit trail
    pub routing: Option<RoutingDecision>,

    /// Original request, kept for retries and queue drains
    pub request: SettlementRequest,

    /// Last reconciliation that saw this record
    pub reconciled_at: Option<DateTime<Utc>>,

    /// Whether that reconciliation matched cleanly
    pub reconciliation_matched: Option<bool>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl SettlementRecord {
    /// Move to `next`, refusing regressions
    pub fn transition(&mut self, next: SettlementStatus) -> Result<()> {
        if self.status == next && !next.is_terminal() {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record the rail identifier; it never changes once set
    pub fn assign_external_id(&mut self, external_id: &str) -> Result<()> {
        match &self.external_settlement_id {
            None => {
                self.external_settlement_id = Some(external_id.to_string());
                Ok(())
            }
            Some(existing) if existing == external_id => Ok(()),
            Some(existing) => Err(Error::Conflict(format!(
                "settlement {} already bound to external id {}, rail returned {}",
                self.id, existing, external_id
            ))),
        }
    }

    /// Timestamp used to place the record in a reconciliation period
    pub fn period_timestamp(&self) -> DateTime<Utc> {
        self.submitted_at.unwrap_or(self.created_at)
    }
}

/// Result of `settle`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementResponse {
    /// Settlement ID
    pub settlement_id: Uuid,
    /// Transfer ID
    pub transfer_id: Uuid,
    /// Rail
    pub rail: Rail,
    /// Status after this call
    pub status: SettlementStatus,
    /// Gross amount
    pub gross_amount: Decimal,
    /// Fee
    pub fee_amount: Decimal,
    /// Net amount
    pub net_amount: Decimal,
    /// Rail identifier
    pub external_settlement_id: Option<String>,
    /// Expected completion for asynchronous rails
    pub estimated_completion: Option<DateTime<Utc>>,
    /// Scheduled retry, if one was booked
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Window the transfer was queued for, if the rail was closed
    pub queued_until: Option<DateTime<Utc>>,
    /// Failure details
    pub error: Option<SettlementFailure>,
}

impl SettlementResponse {
    /// Snapshot a record
    pub fn from_record(record: &SettlementRecord) -> Self {
        Self {
            settlement_id: record.id,
            transfer_id: record.transfer_id,
            rail: record.rail,
            status: record.status,
            gross_amount: record.gross_amount,
            fee_amount: record.fee_amount,
            net_amount: record.net_amount,
            external_settlement_id: record.external_settlement_id.clone(),
            estimated_completion: record.estimated_completion,
            next_retry_at: record.next_retry_at,
            queued_until: None,
            error: record.last_error.clone(),
        }
    }
}

/// Operator role for privileged operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorRole {
    /// Calendar and configuration administration
    Admin,
    /// Day-to-day operations (emergency overrides, resolutions)
    Operator,
    /// Read-only
    Viewer,
}

/// Identity performing a privileged operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    /// Operator ID (email, service account)
    pub id: String,
    /// Role
    pub role: OperatorRole,
}

impl Operator {
    /// Admin identity
    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: OperatorRole::Admin,
        }
    }

    /// Operator identity
    pub fn operator(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: OperatorRole::Operator,
        }
    }

    /// Viewer identity
    pub fn viewer(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: OperatorRole::Viewer,
        }
    }

    /// Require admin
    pub fn require_admin(&self, action: &str) -> Result<()> {
        if self.role == OperatorRole::Admin {
            Ok(())
        } else {
            Err(Error::Unauthorized(format!("{} requires admin, {} is {:?}", action, self.id, self.role)))
        }
    }

    /// Require operator or admin
    pub fn require_operator(&self, action: &str) -> Result<()> {
        match self.role {
            OperatorRole::Admin | OperatorRole::Operator => Ok(()),
            OperatorRole::Viewer => Err(Error::Unauthorized(format!(
                "{} requires operator, {} is read-only",
                action, self.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record() -> SettlementRecord {
        let request = SettlementRequest::new(TenantId::new("t1"), Protocol::CrossBorder, dec!(100), "USD");
        SettlementRecord {
            id: Uuid::new_v4(),
            transfer_id: request.transfer_id,
            tenant_id: request.tenant_id.clone(),
            rail: Rail::Pix,
            protocol: Protocol::CrossBorder,
            status: SettlementStatus::Pending,
            gross_amount: dec!(100),
            fee_amount: dec!(0.7),
            net_amount: dec!(99.3),
            currency: "USD".to_string(),
            external_settlement_id: None,
            submitted_at: None,
            settled_at: None,
            estimated_completion: None,
            retry_count: 0,
            max_retries: 3,
            next_retry_at: None,
            last_error: None,
            routing: None,
            request,
            reconciled_at: None,
            reconciliation_matched: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_never_leaves_terminal() {
        for terminal in [SettlementStatus::Completed, SettlementStatus::Failed] {
            for next in [
                SettlementStatus::Pending,
                SettlementStatus::Processing,
                SettlementStatus::Completed,
                SettlementStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(!SettlementStatus::Processing.can_transition_to(SettlementStatus::Pending));
    }

    #[test]
    fn test_record_transition() {
        let mut rec = record();
        rec.transition(SettlementStatus::Processing).unwrap();
        rec.transition(SettlementStatus::Processing).unwrap();
        rec.transition(SettlementStatus::Completed).unwrap();
        assert!(rec.transition(SettlementStatus::Failed).is_err());
        assert_eq!(rec.status, SettlementStatus::Completed);
    }

    #[test]
    fn test_external_id_set_once() {
        let mut rec = record();
        rec.assign_external_id("PIX-1").unwrap();
        rec.assign_external_id("PIX-1").unwrap();
        assert!(rec.assign_external_id("PIX-2").is_err());
        assert_eq!(rec.external_settlement_id.as_deref(), Some("PIX-1"));
    }

    #[test]
    fn test_request_validation() {
        let req = SettlementRequest::new(TenantId::new("t1"), Protocol::X402, dec!(0), "USDC");
        assert!(matches!(req.validate(), Err(Error::InvalidAmount(_))));

        let req = SettlementRequest::new(TenantId::new("t1"), Protocol::X402, dec!(-5), "USDC");
        assert!(req.validate().is_err());

        let req = SettlementRequest::new(TenantId::new("t1"), Protocol::X402, dec!(5), "USDC");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_rail_parse_roundtrip() {
        for rail in Rail::ALL {
            assert_eq!(rail.as_str().parse::<Rail>().unwrap(), rail);
        }
        assert!("carrier_pigeon".parse::<Rail>().is_err());
        assert_eq!("CROSS_BORDER".parse::<Protocol>().unwrap(), Protocol::CrossBorder);
    }

    #[test]
    fn test_operator_roles() {
        assert!(Operator::admin("a").require_admin("x").is_ok());
        assert!(Operator::operator("o").require_admin("x").is_err());
        assert!(Operator::operator("o").require_operator("x").is_ok());
        assert!(Operator::viewer("v").require_operator("x").is_err());
    }
}
