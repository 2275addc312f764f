// Scan traversal for Aperture
// Walks every operation of the contract, gates it, pairs identities and runs
// the control/test comparison one request at a time

use crate::contract::Contract;
use crate::engine::AttackEngine;
use crate::error::ExchangeError;
use crate::identity::{Identity, IdentityPool};
use crate::models::{Exchange, Method, Operation};
use crate::pairing::{eligible_owners, pairs_for_owners, references_identity_fields, Pairing};
use crate::progress::{ExecutionContext, ProgressEvent};
use crate::requirements::required_inputs;
use crate::verdict::{decide_verdict, Classification, Verdict};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const SKIP_DELETE: &str = "delete requests are skipped";
pub const SKIP_NO_SECURITY: &str = "no security requirement";
pub const SKIP_TOO_FEW_USERS: &str = "need ≥2 users in config";
pub const SKIP_NO_ELIGIBLE_OWNER: &str = "need ≥1 user with required endpoint fields (path/query)";
pub const SKIP_NO_IDENTIFIERS: &str = "no object identifiers referenced by this operation";

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    pub skip_delete: bool,
}

/// Outcome of one operation, or of one owner/attacker pair on it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    pub endpoint: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<Exchange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<Exchange>,
    #[serde(rename = "result")]
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    /// Identity whose identifiers were used (`object`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Identity whose credentials made the test call (`creds`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attacker: Option<String>,
}

impl ResultRecord {
    fn skipped(operation: &Operation, reason: &str) -> Self {
        Self {
            endpoint: operation.path.clone(),
            method: operation.method.to_string(),
            control: None,
            test: None,
            verdict: Verdict::Skipped,
            skipped_reason: Some(reason.to_string()),
            notes: Vec::new(),
            owner: None,
            attacker: None,
        }
    }

    fn skipped_pair(operation: &Operation, pair: Pairing<'_>, reason: &str) -> Self {
        Self {
            owner: Some(pair.owner.name.clone()),
            attacker: Some(pair.attacker.name.clone()),
            ..Self::skipped(operation, reason)
        }
    }

    fn unknown_fields(user: &Identity, names: &[&str]) -> Self {
        Self {
            endpoint: "-".to_string(),
            method: "-".to_string(),
            control: None,
            test: None,
            verdict: Verdict::Skipped,
            skipped_reason: None,
            notes: vec![format!(
                "user {} has unknown fields not in spec: {}",
                user.name,
                names.join(", ")
            )],
            owner: None,
            attacker: None,
        }
    }

    fn classified(
        operation: &Operation,
        pair: Pairing<'_>,
        control: Option<Exchange>,
        test: Option<Exchange>,
        classification: Classification,
    ) -> Self {
        Self {
            endpoint: operation.path.clone(),
            method: operation.method.to_string(),
            control,
            test,
            verdict: classification.verdict,
            skipped_reason: None,
            notes: classification.notes,
            owner: Some(pair.owner.name.clone()),
            attacker: Some(pair.attacker.name.clone()),
        }
    }
}

/// Everything a finished (or interrupted) scan produced
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub records: Vec<ResultRecord>,
    /// Pairs whose control and test calls both completed with a 2xx control.
    pub tested_pairs: usize,
    pub cancelled: bool,
}

impl ScanReport {
    pub fn count(&self, verdict: Verdict) -> usize {
        self.records.iter().filter(|r| r.verdict == verdict).count()
    }

    pub fn findings(&self) -> impl Iterator<Item = &ResultRecord> {
        self.records.iter().filter(|r| r.verdict == Verdict::IdorFound)
    }
}

// Gate result for one operation
enum Plan<'a> {
    Skip(&'static str),
    Pairs(Vec<Pairing<'a>>),
}

pub struct Scanner<'a> {
    contract: &'a Contract,
    pool: &'a IdentityPool,
    engine: AttackEngine,
    options: ScanOptions,
}

impl<'a> Scanner<'a> {
    pub fn new(
        contract: &'a Contract,
        pool: &'a IdentityPool,
        engine: AttackEngine,
        options: ScanOptions,
    ) -> Self {
        Self {
            contract,
            pool,
            engine,
            options,
        }
    }

    // Gates in order: delete, security, identity count, eligibility
    fn plan(&self, operation: &Operation) -> Plan<'a> {
        if self.options.skip_delete && operation.method == Method::DELETE {
            return Plan::Skip(SKIP_DELETE);
        }
        if !self.contract.requires_auth(operation) {
            return Plan::Skip(SKIP_NO_SECURITY);
        }
        if self.pool.len() < 2 {
            return Plan::Skip(SKIP_TOO_FEW_USERS);
        }
        let requirements = required_inputs(operation);
        let eligible = eligible_owners(&requirements, &self.pool.users);
        if eligible.is_empty() {
            return Plan::Skip(SKIP_NO_ELIGIBLE_OWNER);
        }
        Plan::Pairs(pairs_for_owners(&eligible, &self.pool.users))
    }

    /// Number of requests a full run will send: two per pair that passes
    /// every gate and references the owner's fields.
    pub fn estimate_total_requests(&self) -> usize {
        self.contract
            .operations()
            .iter()
            .map(|op| match self.plan(op) {
                Plan::Skip(_) => 0,
                Plan::Pairs(pairs) => {
                    pairs
                        .iter()
                        .filter(|p| references_identity_fields(op, p.owner))
                        .count()
                        * 2
                }
            })
            .sum()
    }

    /// One SKIPPED record per identity carrying fields the contract never mentions.
    pub fn audit_identity_fields(&self) -> Vec<ResultRecord> {
        let known = self.contract.known_field_names();
        self.pool
            .unknown_fields(&known)
            .into_iter()
            .map(|(user, names)| {
                warn!(user = %user.name, fields = %names.join(", "), "identity has fields unknown to the contract");
                ResultRecord::unknown_fields(user, &names)
            })
            .collect()
    }

    /// Run the scan. Setting `cancel` to `true` drops the in-flight request and
    /// stops traversal; the interrupted pair produces no record.
    pub async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        mut cancel: watch::Receiver<bool>,
    ) -> ScanReport {
        let mut report = ScanReport {
            records: self.audit_identity_fields(),
            ..ScanReport::default()
        };

        ctx.emit(ProgressEvent::PathsDiscovered {
            count: self.contract.path_count,
        });
        let total = self.estimate_total_requests();
        ctx.set_total(total);
        ctx.emit(ProgressEvent::TotalRequests { total });

        for operation in self.contract.operations() {
            if *cancel.borrow() {
                report.cancelled = true;
                break;
            }
            ctx.emit(ProgressEvent::EndpointStarting {
                method: operation.method,
                path: operation.path.clone(),
            });

            let pairs = match self.plan(operation) {
                Plan::Skip(reason) => {
                    debug!(method = %operation.method, path = %operation.path, "skipping: {}", reason);
                    report.records.push(ResultRecord::skipped(operation, reason));
                    continue;
                }
                Plan::Pairs(pairs) => pairs,
            };

            for pair in pairs {
                if !references_identity_fields(operation, pair.owner) {
                    debug!(
                        method = %operation.method,
                        path = %operation.path,
                        object = %pair.owner.name,
                        "skipping: {}",
                        SKIP_NO_IDENTIFIERS
                    );
                    report
                        .records
                        .push(ResultRecord::skipped_pair(operation, pair, SKIP_NO_IDENTIFIERS));
                    continue;
                }

                match self.run_pair(ctx, operation, pair, &mut cancel).await {
                    Some((record, classified)) => {
                        if classified {
                            report.tested_pairs += 1;
                        }
                        report.records.push(record);
                    }
                    None => {
                        info!("scan cancelled");
                        report.cancelled = true;
                        return report;
                    }
                }
            }
        }
        report
    }

    // `None` when cancelled. The flag tells whether the pair was fully compared.
    async fn run_pair(
        &self,
        ctx: &mut ExecutionContext,
        operation: &Operation,
        pair: Pairing<'_>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Option<(ResultRecord, bool)> {
        let Pairing { owner, attacker } = pair;

        let control = tokio::select! {
            res = self.engine.send_one(ctx, self.contract, operation, owner, owner) => res,
            _ = cancelled(cancel) => return None,
        };
        let control = match control {
            Ok(exchange) => exchange,
            Err(err) => {
                debug!(method = %operation.method, path = %operation.path, user = %owner.name, "control error: {}", err);
                let record = ResultRecord::classified(
                    operation,
                    pair,
                    None,
                    None,
                    Classification::control_error(&err),
                );
                return Some((record, false));
            }
        };

        let test = tokio::select! {
            res = self.engine.send_one(ctx, self.contract, operation, owner, attacker) => res,
            _ = cancelled(cancel) => return None,
        };

        let classification = decide_verdict(
            Ok(&control.response),
            test.as_ref().map(|x| &x.response),
            &owner.fields,
        );
        let classified = control.response.is_success() && test.is_ok();
        log_verdict(operation, pair, &classification, test.as_ref().err());

        let record = ResultRecord::classified(
            operation,
            pair,
            Some(control),
            test.ok(),
            classification,
        );
        Some((record, classified))
    }
}

fn log_verdict(
    operation: &Operation,
    pair: Pairing<'_>,
    classification: &Classification,
    test_error: Option<&ExchangeError>,
) {
    let (method, path) = (operation.method, operation.path.as_str());
    let (creds, object) = (pair.attacker.name.as_str(), pair.owner.name.as_str());
    match classification.verdict {
        Verdict::IdorFound => {
            warn!(%method, path, creds, object, "IDOR FOUND")
        }
        _ if test_error.is_some() => {
            debug!(%method, path, creds, object, "test error: {}", test_error.map(|e| e.to_string()).unwrap_or_default())
        }
        verdict => info!(%method, path, creds, object, notes = ?classification.notes, "{}", verdict),
    }
}

// Resolves once the flag is set. A dropped sender means no cancellation can come.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
