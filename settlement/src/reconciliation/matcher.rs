//! Ledger-vs-rail matching
//!
//! Pure function over two snapshots; the engine handles I/O and persistence.

use super::config::ToleranceConfig;
use super::report::{DiscrepancyType, ReconciliationDiscrepancy, ResolutionStatus, Severity};
use crate::adapters::ExternalTransaction;
use crate::types::{Rail, SettlementRecord, SettlementStatus, TenantId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use uuid::Uuid;

/// Identity and period of the run doing the matching
#[derive(Debug, Clone)]
pub struct MatchContext {
    /// Report the discrepancies belong to
    pub report_id: Uuid,
    /// Tenant scope
    pub tenant_id: Option<TenantId>,
    /// Rail
    pub rail: Rail,
    /// Core period start (inclusive)
    pub period_start: DateTime<Utc>,
    /// Core period end (exclusive)
    pub period_end: DateTime<Utc>,
    /// Detection timestamp stamped on discrepancies
    pub detected_at: DateTime<Utc>,
}

/// Result of matching
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    /// Core-period ledger records that reached the rail
    pub ledger_count: usize,
    /// External transactions considered
    pub external_count: usize,
    /// Ledger records matched with no discrepancy
    pub matched_count: usize,
    /// Net total of completed ledger records
    pub expected_total: Decimal,
    /// Total of completed rail transactions
    pub actual_total: Decimal,
    /// Discrepancies in ledger order, then unclaimed rail transactions
    pub discrepancies: Vec<ReconciliationDiscrepancy>,
    /// `(settlement_id, matched cleanly)` for every core-period record examined
    pub reconciled: Vec<(Uuid, bool)>,
}

/// Severity of an amount difference
///
/// `>5% or >100` critical, `>1% or >10` high, `>0.1% or >1` medium, else low.
pub fn amount_severity(expected: Decimal, difference: Decimal) -> Severity {
    let diff = difference.abs();
    let pct = if expected.is_zero() {
        dec!(100)
    } else {
        diff / expected.abs() * dec!(100)
    };

    if pct > dec!(5) || diff > dec!(100) {
        Severity::Critical
    } else if pct > dec!(1) || diff > dec!(10) {
        Severity::High
    } else if pct > dec!(0.1) || diff > dec!(1) {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Severity of a status disagreement
pub fn status_severity(ledger: SettlementStatus, rail: SettlementStatus) -> Severity {
    if ledger == SettlementStatus::Completed && rail != SettlementStatus::Completed {
        Severity::Critical
    } else if rail == SettlementStatus::Failed && ledger != SettlementStatus::Failed {
        Severity::High
    } else {
        Severity::Medium
    }
}

/// Whether the ledger expects the rail to have seen the record
fn reached_rail(record: &SettlementRecord) -> bool {
    match record.status {
        SettlementStatus::Pending => record.submitted_at.is_some(),
        SettlementStatus::Failed => record.external_settlement_id.is_some(),
        SettlementStatus::Processing | SettlementStatus::Completed => true,
    }
}

struct Builder<'a> {
    ctx: &'a MatchContext,
}

impl Builder<'_> {
    fn new_discrepancy(
        &self,
        kind: DiscrepancyType,
        severity: Severity,
        description: String,
    ) -> ReconciliationDiscrepancy {
        ReconciliationDiscrepancy {
            id: Uuid::new_v4(),
            report_id: self.ctx.report_id,
            tenant_id: self.ctx.tenant_id.clone(),
            rail: self.ctx.rail,
            kind,
            severity,
            settlement_id: None,
            transfer_id: None,
            external_id: None,
            expected_amount: None,
            actual_amount: None,
            expected_status: None,
            actual_status: None,
            description,
            detected_at: self.ctx.detected_at,
            resolution: ResolutionStatus::Open,
            resolved_by: None,
            resolved_at: None,
            resolution_note: None,
            resolution_reason: None,
        }
    }

    fn for_record(
        &self,
        record: &SettlementRecord,
        tx: Option<&ExternalTransaction>,
        kind: DiscrepancyType,
        severity: Severity,
        description: String,
    ) -> ReconciliationDiscrepancy {
        let mut d = self.new_discrepancy(kind, severity, description);
        d.tenant_id = Some(record.tenant_id.clone());
        d.settlement_id = Some(record.id);
        d.transfer_id = Some(record.transfer_id);
        d.external_id = tx
            .map(|t| t.external_id.clone())
            .or_else(|| record.external_settlement_id.clone());
        d.expected_amount = Some(record.net_amount);
        d.actual_amount = tx.map(|t| t.amount);
        d.expected_status = Some(record.status);
        d.actual_status = tx.map(|t| t.status);
        d
    }
}

/// Match ledger records against the rail's feed
///
/// Both `records` and `external` may cover a period wider than the core one.
/// Records outside the core period only claim their rail transactions;
/// unclaimed transactions outside the core period are ignored.
pub fn match_transactions(
    ctx: &MatchContext,
    records: &[SettlementRecord],
    external: &[ExternalTransaction],
    tolerance: &ToleranceConfig,
) -> MatchOutcome {
    let builder = Builder { ctx };
    let in_core = |at: DateTime<Utc>| at >= ctx.period_start && at < ctx.period_end;

    let mut external: Vec<&ExternalTransaction> = external.iter().collect();
    external.sort_by(|a, b| {
        a.submitted_at
            .cmp(&b.submitted_at)
            .then_with(|| a.external_id.cmp(&b.external_id))
    });

    let mut by_external_id: HashMap<&str, usize> = HashMap::new();
    let mut by_transfer_id: HashMap<Uuid, usize> = HashMap::new();
    for (idx, tx) in external.iter().enumerate() {
        by_external_id.entry(tx.external_id.as_str()).or_insert(idx);
        if let Some(transfer_id) = tx.transfer_id {
            by_transfer_id.entry(transfer_id).or_insert(idx);
        }
    }
    let mut claimed = vec![false; external.len()];
    // rows claimed by records of a neighbouring period
    let mut foreign = vec![false; external.len()];

    // core-period records claim first
    let mut records: Vec<(&SettlementRecord, bool)> = records
        .iter()
        .map(|r| (r, in_core(r.period_timestamp())))
        .collect();
    records.sort_by(|(a, a_core), (b, b_core)| {
        b_core
            .cmp(a_core)
            .then_with(|| a.period_timestamp().cmp(&b.period_timestamp()))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut outcome = MatchOutcome::default();

    for (record, core) in records {
        let found = record
            .external_settlement_id
            .as_deref()
            .and_then(|id| by_external_id.get(id).copied())
            .filter(|idx| !claimed[*idx])
            .or_else(|| {
                by_transfer_id
                    .get(&record.transfer_id)
                    .copied()
                    .filter(|idx| !claimed[*idx])
            });

        if !core {
            if let Some(idx) = found {
                claimed[idx] = true;
                foreign[idx] = true;
            }
            continue;
        }

        let idx = match found {
            Some(idx) => idx,
            // never submitted, or failed before the rail answered
            None if !reached_rail(record) => continue,
            None => {
                outcome.ledger_count += 1;
                if record.status == SettlementStatus::Completed {
                    outcome.expected_total += record.net_amount;
                }
                outcome.discrepancies.push(builder.for_record(
                    record,
                    None,
                    DiscrepancyType::MissingInRail,
                    Severity::High,
                    format!(
                        "{} settlement {} ({} {}) has no transaction on the rail",
                        record.status, record.id, record.net_amount, record.currency
                    ),
                ));
                outcome.reconciled.push((record.id, false));
                continue;
            }
        };
        outcome.ledger_count += 1;
        if record.status == SettlementStatus::Completed {
            outcome.expected_total += record.net_amount;
        }
        claimed[idx] = true;
        let tx = external[idx];
        let mut clean = true;

        let difference = tx.amount - record.net_amount;
        if difference.abs() > tolerance.amount_tolerance(record.net_amount) {
            clean = false;
            outcome.discrepancies.push(builder.for_record(
                record,
                Some(tx),
                DiscrepancyType::AmountMismatch,
                amount_severity(record.net_amount, difference),
                format!(
                    "ledger {} vs rail {} (difference {})",
                    record.net_amount, tx.amount, difference
                ),
            ));
        }

        if tx.status != record.status {
            clean = false;
            outcome.discrepancies.push(builder.for_record(
                record,
                Some(tx),
                DiscrepancyType::StatusMismatch,
                status_severity(record.status, tx.status),
                format!("ledger says {}, rail says {}", record.status, tx.status),
            ));
        }

        if clean {
            outcome.matched_count += 1;
        }
        outcome.reconciled.push((record.id, clean));
    }

    for (idx, tx) in external.iter().enumerate() {
        if foreign[idx] || (!claimed[idx] && !in_core(tx.submitted_at)) {
            continue;
        }
        outcome.external_count += 1;
        if tx.status == SettlementStatus::Completed {
            outcome.actual_total += tx.amount;
        }
        if claimed[idx] {
            continue;
        }

        let mut d = builder.new_discrepancy(
            DiscrepancyType::MissingInLedger,
            Severity::Critical,
            format!(
                "rail transaction {} ({} {}) has no ledger record",
                tx.external_id, tx.amount, tx.status
            ),
        );
        d.transfer_id = tx.transfer_id;
        d.external_id = Some(tx.external_id.clone());
        d.actual_amount = Some(tx.amount);
        d.actual_status = Some(tx.status);
        outcome.discrepancies.push(d);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Protocol, SettlementRequest};
    use chrono::{Duration, TimeZone};

    fn ctx() -> MatchContext {
        let now = Utc::now();
        MatchContext {
            report_id: Uuid::new_v4(),
            tenant_id: None,
            rail: Rail::Pix,
            period_start: now - Duration::hours(1),
            period_end: now + Duration::hours(1),
            detected_at: now,
        }
    }

    fn record(net: Decimal, status: SettlementStatus, external_id: &str) -> SettlementRecord {
        let request = SettlementRequest::new(TenantId::new("t1"), Protocol::CrossBorder, net, "BRL");
        let now = Utc::now();
        SettlementRecord {
            id: Uuid::new_v4(),
            transfer_id: request.transfer_id,
            tenant_id: request.tenant_id.clone(),
            rail: Rail::Pix,
            protocol: Protocol::CrossBorder,
            status,
            gross_amount: net,
            fee_amount: Decimal::ZERO,
            net_amount: net,
            currency: "BRL".to_string(),
            external_settlement_id: Some(external_id.to_string()),
            submitted_at: Some(now),
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
            created_at: now,
            updated_at: now,
        }
    }

    fn tx(external_id: &str, amount: Decimal, status: SettlementStatus) -> ExternalTransaction {
        ExternalTransaction {
            external_id: external_id.to_string(),
            transfer_id: None,
            amount,
            status,
            submitted_at: Utc::now(),
            completed_at: None,
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_severity_thresholds() {
        assert_eq!(amount_severity(dec!(100), dec!(0.02)), Severity::Low);
        assert_eq!(amount_severity(dec!(100), dec!(0.5)), Severity::Medium);
        assert_eq!(amount_severity(dec!(100000), dec!(2)), Severity::Medium);
        assert_eq!(amount_severity(dec!(100), dec!(2)), Severity::High);
        assert_eq!(amount_severity(dec!(100), dec!(6)), Severity::Critical);
        assert_eq!(amount_severity(dec!(1000000), dec!(101)), Severity::Critical);
        assert_eq!(amount_severity(Decimal::ZERO, dec!(0.01)), Severity::Critical);

        use SettlementStatus::*;
        assert_eq!(status_severity(Completed, Processing), Severity::Critical);
        assert_eq!(status_severity(Processing, Failed), Severity::High);
        assert_eq!(status_severity(Processing, Completed), Severity::Medium);
    }

    #[test]
    fn test_clean_match() {
        let rec = record(dec!(100), SettlementStatus::Completed, "PIX-1");
        let outcome = match_transactions(
            &ctx(),
            &[rec.clone()],
            &[tx("PIX-1", dec!(100.005), SettlementStatus::Completed)],
            &ToleranceConfig::default(),
        );
        assert!(outcome.discrepancies.is_empty());
        assert_eq!(outcome.matched_count, 1);
        assert_eq!(outcome.reconciled, vec![(rec.id, true)]);
        assert_eq!(outcome.expected_total, dec!(100));
    }

    #[test]
    fn test_amount_and_status_mismatch() {
        let rec = record(dec!(100), SettlementStatus::Completed, "PIX-1");
        let outcome = match_transactions(
            &ctx(),
            &[rec],
            &[tx("PIX-1", dec!(100.02), SettlementStatus::Processing)],
            &ToleranceConfig::default(),
        );
        let kinds: Vec<_> = outcome
            .discrepancies
            .iter()
            .map(|d| (d.kind, d.severity))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (DiscrepancyType::AmountMismatch, Severity::Low),
                (DiscrepancyType::StatusMismatch, Severity::Critical),
            ]
        );
        assert_eq!(outcome.matched_count, 0);
        assert_eq!(outcome.discrepancies[0].difference(), Some(dec!(0.02)));
    }

    #[test]
    fn test_match_falls_back_to_transfer_id() {
        let mut rec = record(dec!(50), SettlementStatus::Completed, "PIX-9");
        rec.external_settlement_id = None;
        let mut feed = tx("PIX-9", dec!(50), SettlementStatus::Completed);
        feed.transfer_id = Some(rec.transfer_id);

        let outcome = match_transactions(&ctx(), &[rec], &[feed], &ToleranceConfig::default());
        assert!(outcome.discrepancies.is_empty());
    }

    #[test]
    fn test_missing_on_each_side() {
        let ledger_only = record(dec!(10), SettlementStatus::Processing, "PIX-A");
        let mut never_submitted = record(dec!(10), SettlementStatus::Pending, "unused");
        never_submitted.submitted_at = None;
        never_submitted.external_settlement_id = None;

        let outcome = match_transactions(
            &ctx(),
            &[ledger_only, never_submitted],
            &[tx("PIX-B", dec!(0.01), SettlementStatus::Completed)],
            &ToleranceConfig::default(),
        );
        assert_eq!(outcome.ledger_count, 1);
        assert_eq!(outcome.discrepancies.len(), 2);
        assert_eq!(outcome.discrepancies[0].kind, DiscrepancyType::MissingInRail);
        assert_eq!(outcome.discrepancies[0].severity, Severity::High);
        assert_eq!(outcome.discrepancies[1].kind, DiscrepancyType::MissingInLedger);
        assert_eq!(outcome.discrepancies[1].severity, Severity::Critical);
    }

    #[test]
    fn test_failed_record_claims_row_by_transfer_id() {
        let mut rec = record(dec!(100), SettlementStatus::Failed, "unused");
        rec.external_settlement_id = None;
        let mut feed = tx("PIX-X", dec!(100), SettlementStatus::Completed);
        feed.transfer_id = Some(rec.transfer_id);

        let outcome = match_transactions(&ctx(), &[rec.clone()], &[feed], &ToleranceConfig::default());
        assert_eq!(outcome.discrepancies.len(), 1);
        let d = &outcome.discrepancies[0];
        assert_eq!(d.kind, DiscrepancyType::StatusMismatch);
        assert_eq!(d.severity, Severity::Medium);
        assert_eq!(d.settlement_id, Some(rec.id));
        assert_eq!(d.external_id.as_deref(), Some("PIX-X"));
        assert_eq!(outcome.ledger_count, 1);
    }

    #[test]
    fn test_boundary_traffic_matched_in_both_periods() {
        let hour = |h: u32| Utc.with_ymd_and_hms(2026, 3, 10, h, 0, 0).unwrap();
        let period = |start: DateTime<Utc>| MatchContext {
            report_id: Uuid::new_v4(),
            tenant_id: None,
            rail: Rail::Pix,
            period_start: start,
            period_end: start + Duration::hours(1),
            detected_at: start + Duration::hours(1),
        };

        let mut rec = record(dec!(100), SettlementStatus::Completed, "PIX-1");
        rec.submitted_at = Some(hour(11) - Duration::seconds(1));
        let mut feed = tx("PIX-1", dec!(100), SettlementStatus::Completed);
        feed.submitted_at = hour(11) + Duration::seconds(1);
        let (records, external) = (vec![rec.clone()], vec![feed]);

        let first = match_transactions(&period(hour(10)), &records, &external, &ToleranceConfig::default());
        assert!(first.discrepancies.is_empty());
        assert_eq!(first.matched_count, 1);
        assert_eq!(first.actual_total, dec!(100));
        assert_eq!(first.reconciled, vec![(rec.id, true)]);

        let second = match_transactions(&period(hour(11)), &records, &external, &ToleranceConfig::default());
        assert!(second.discrepancies.is_empty());
        assert_eq!(second.ledger_count, 0);
        assert_eq!(second.external_count, 0);
        assert_eq!(second.actual_total, Decimal::ZERO);
        assert!(second.reconciled.is_empty());
    }

    #[test]
    fn test_unclaimed_outside_period_ignored() {
        let c = ctx();
        let mut early = tx("PIX-OLD", dec!(5), SettlementStatus::Completed);
        early.submitted_at = c.period_start - Duration::minutes(30);

        let outcome = match_transactions(&c, &[], &[early], &ToleranceConfig::default());
        assert!(outcome.discrepancies.is_empty());
        assert_eq!(outcome.external_count, 0);
    }
}
