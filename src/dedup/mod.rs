//! Duplicate slot resolution.
//!
//! Slots are grouped by their normalized code. In every group with more than
//! one member the oldest slot (ties broken by ascending id) survives and the
//! others become deletion candidates. A run either reports the candidates
//! (`Mode::DryRun`) or deletes them (`Mode::Apply`), collecting per-record
//! failures instead of stopping at the first one.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::{CleanupError, StoreError};
use crate::models::{CleanupReport, DeletionFailure, DuplicateGroup, NonconformingCode, Slot};
use crate::store::SlotStore;

pub use crate::models::Mode;

static SLOT_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9_-]{1,32}$").expect("slot code pattern is valid"));

/// Key two slots are compared by: surrounding whitespace removed, uppercased.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Whether a stored code already satisfies the admin slot code format.
pub fn is_conforming_code(code: &str) -> bool {
    SLOT_CODE.is_match(code)
}

/// Duplicate groups for `records`, ordered by normalized key.
pub fn plan(records: &[Slot]) -> Vec<DuplicateGroup> {
    let mut by_code: BTreeMap<String, Vec<&Slot>> = BTreeMap::new();
    for slot in records {
        by_code.entry(normalize_code(&slot.code)).or_default().push(slot);
    }

    by_code
        .into_iter()
        .filter(|(_, group)| group.len() > 1)
        .map(|(key, mut group)| {
            group.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            let survivor = group[0].to_ref();
            let candidates = group[1..].iter().map(|s| s.to_ref()).collect();
            DuplicateGroup { key, survivor, candidates }
        })
        .collect()
}

/// Surviving slots whose stored code does not match the slot code format.
pub fn nonconforming_survivors(
    records: &[Slot],
    groups: &[DuplicateGroup],
) -> Vec<NonconformingCode> {
    let doomed: HashSet<&str> = groups
        .iter()
        .flat_map(|g| g.candidates.iter().map(|c| c.id.as_str()))
        .collect();

    let mut found: Vec<NonconformingCode> = records
        .iter()
        .filter(|s| !doomed.contains(s.id.as_str()) && !is_conforming_code(&s.code))
        .map(|s| NonconformingCode { id: s.id.clone(), code: s.code.clone() })
        .collect();
    found.sort_by(|a, b| a.code.cmp(&b.code).then_with(|| a.id.cmp(&b.id)));
    found
}

#[derive(Debug, Clone)]
pub struct Resolver {
    mode: Mode,
    concurrency: usize,
    deadline: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct ResolverBuilder {
    mode: Mode,
    concurrency: Option<usize>,
    deadline: Option<Duration>,
}

impl ResolverBuilder {
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Maximum number of deletes in flight. Values below 1 are raised to 1.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Time budget for the whole run, measured from the start of `run`.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn build(self) -> Resolver {
        Resolver {
            mode: self.mode,
            concurrency: self.concurrency.unwrap_or(1).max(1),
            deadline: self.deadline,
        }
    }
}

#[derive(Default)]
struct ApplyOutcome {
    attempted: usize,
    deleted: Vec<(usize, String)>,
    failures: Vec<(usize, DeletionFailure)>,
    skipped: Vec<String>,
}

impl ApplyOutcome {
    fn record(&mut self, index: usize, key: String, id: String, result: Result<(), StoreError>) {
        match result {
            Ok(()) => {
                tracing::debug!(id = %id, key = %key, "Deleted duplicate slot");
                self.deleted.push((index, id));
            }
            Err(err) => {
                tracing::warn!(id = %id, key = %key, "Failed to delete duplicate slot: {err}");
                self.failures.push((index, DeletionFailure { id, key, reason: err.to_string() }));
            }
        }
    }
}

impl Resolver {
    pub fn builder() -> ResolverBuilder {
        ResolverBuilder::default()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub async fn run<S>(&self, store: Arc<S>) -> Result<CleanupReport, CleanupError>
    where
        S: SlotStore + ?Sized + 'static,
    {
        self.run_until(store, std::future::pending()).await
    }

    /// Like [`Resolver::run`], but stops starting new deletes once `cancel` resolves.
    /// Candidates never started are reported as skipped. With a deadline, deletes
    /// still running when it passes are abandoned and reported as failures.
    pub async fn run_until<S, F>(
        &self,
        store: Arc<S>,
        cancel: F,
    ) -> Result<CleanupReport, CleanupError>
    where
        S: SlotStore + ?Sized + 'static,
        F: Future<Output = ()>,
    {
        let deadline = self.deadline.map(|d| Instant::now() + d);

        let records = match deadline {
            Some(at) => tokio::time::timeout_at(at, store.find_all())
                .await
                .map_err(|_| CleanupError::DeadlineExceeded)?,
            None => store.find_all().await,
        }
        .map_err(CleanupError::Load)?;

        tracing::info!("Total slots in database: {}", records.len());

        let groups = plan(&records);
        for group in &groups {
            tracing::info!(
                key = %group.key,
                survivor = %group.survivor.id,
                "Found {} slots for code", group.size()
            );
        }

        let nonconforming = nonconforming_survivors(&records, &groups);
        for code in &nonconforming {
            tracing::warn!(
                id = %code.id,
                code = %code.code,
                "Surviving slot has a nonconforming code"
            );
        }

        let duplicates_found = groups.iter().map(|g| g.candidates.len()).sum();
        tracing::info!(mode = %self.mode, "Total duplicates to delete: {}", duplicates_found);

        let outcome = match self.mode {
            Mode::DryRun => ApplyOutcome::default(),
            Mode::Apply => self.apply(store, &groups, deadline, cancel).await,
        };

        let mut deleted = outcome.deleted;
        deleted.sort_by_key(|(index, _)| *index);
        let mut failures = outcome.failures;
        failures.sort_by_key(|(index, _)| *index);

        let report = CleanupReport {
            mode: self.mode,
            records_scanned: records.len(),
            groups,
            duplicates_found,
            deletions_attempted: outcome.attempted,
            deleted: deleted.into_iter().map(|(_, id)| id).collect(),
            failures: failures.into_iter().map(|(_, f)| f).collect(),
            skipped: outcome.skipped,
            nonconforming,
        };

        tracing::info!(
            deleted = report.deleted.len(),
            failed = report.failures.len(),
            skipped = report.skipped.len(),
            "Slot cleanup finished"
        );

        Ok(report)
    }

    async fn apply<S, F>(
        &self,
        store: Arc<S>,
        groups: &[DuplicateGroup],
        deadline: Option<Instant>,
        cancel: F,
    ) -> ApplyOutcome
    where
        S: SlotStore + ?Sized + 'static,
        F: Future<Output = ()>,
    {
        let mut queue: VecDeque<(usize, String, String)> = groups
            .iter()
            .flat_map(|g| g.candidates.iter().map(move |c| (g.key.clone(), c.id.clone())))
            .enumerate()
            .map(|(index, (key, id))| (index, key, id))
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut in_flight: HashMap<usize, (String, String)> = HashMap::new();
        let mut outcome = ApplyOutcome::default();

        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expired);
        tokio::pin!(cancel);

        while let Some((index, key, id)) = queue.pop_front() {
            let permit = tokio::select! {
                biased;
                _ = &mut cancel => {
                    tracing::warn!("Cleanup cancelled, not starting remaining deletions");
                    None
                }
                _ = &mut expired => {
                    tracing::warn!("Cleanup deadline exceeded, not starting remaining deletions");
                    None
                }
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                outcome.skipped.push(id);
                outcome.skipped.extend(queue.drain(..).map(|(_, _, id)| id));
                break;
            };

            outcome.attempted += 1;
            let store = Arc::clone(&store);
            let task_id = id.clone();
            tasks.spawn(async move {
                let result = match deadline {
                    Some(at) => tokio::time::timeout_at(at, store.delete(&task_id))
                        .await
                        .unwrap_or_else(|_| {
                            Err(StoreError::Unavailable("deadline exceeded".to_string()))
                        }),
                    None => store.delete(&task_id).await,
                };
                drop(permit);
                (index, result)
            });
            in_flight.insert(index, (key, id));
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    if let Some((key, id)) = in_flight.remove(&index) {
                        outcome.record(index, key, id, result);
                    }
                }
                Err(err) => tracing::error!("Delete task failed: {err}"),
            }
        }

        // tasks that panicked never reported back
        for (index, (key, id)) in in_flight {
            let err = StoreError::Unavailable("delete task did not complete".to_string());
            outcome.record(index, key, id, Err(err));
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

    fn t(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + ChronoDuration::seconds(offset_secs)
    }

    fn slot(id: &str, code: &str, created_at: DateTime<Utc>) -> Slot {
        Slot::new(code, code, created_at).with_id(id)
    }

    #[test]
    fn normalization_ignores_case_and_whitespace() {
        assert_eq!(normalize_code("abc"), "ABC");
        assert_eq!(normalize_code(" abc "), "ABC");
        assert_eq!(normalize_code("\tGk\n"), "GK");
    }

    #[test]
    fn example_scenario_keeps_oldest() {
        let records = vec![slot("1", "GK", t(0)), slot("2", "gk", t(10)), slot("3", "DEF", t(20))];

        let groups = plan(&records);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key, "GK");
        assert_eq!(groups[0].survivor.id, "1");
        let candidates: Vec<&str> = groups[0].candidates.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(candidates, vec!["2"]);
    }

    #[test]
    fn variant_spellings_form_one_group() {
        let records = vec![
            slot("a", "abc", t(2)),
            slot("b", "ABC", t(1)),
            slot("c", " abc ", t(3)),
        ];

        let groups = plan(&records);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].survivor.id, "b");
        assert_eq!(groups[0].size(), 3);
    }

    #[test]
    fn survivor_is_never_newer_than_candidates() {
        let records = vec![
            slot("x1", "MID", t(50)),
            slot("x2", "mid", t(5)),
            slot("x3", "Mid ", t(30)),
            slot("x4", "FWD", t(1)),
            slot("x5", "fwd", t(0)),
        ];

        for group in plan(&records) {
            for candidate in &group.candidates {
                assert!(group.survivor.created_at <= candidate.created_at);
            }
        }
    }

    #[test]
    fn identical_timestamps_break_ties_by_id() {
        let records = vec![slot("b", "GK", t(0)), slot("c", "GK", t(0)), slot("a", "gk", t(0))];

        let groups = plan(&records);

        assert_eq!(groups[0].survivor.id, "a");
        let candidates: Vec<&str> = groups[0].candidates.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(candidates, vec!["b", "c"]);
    }

    #[test]
    fn unique_codes_produce_no_groups() {
        let records = vec![slot("1", "GK", t(0)), slot("2", "DEF", t(1))];
        assert!(plan(&records).is_empty());
        assert!(plan(&[]).is_empty());
    }

    #[test]
    fn groups_are_ordered_by_key() {
        let records = vec![
            slot("1", "wk", t(0)),
            slot("2", "WK", t(1)),
            slot("3", "bat", t(0)),
            slot("4", "BAT", t(1)),
        ];

        let keys: Vec<String> = plan(&records).into_iter().map(|g| g.key).collect();
        assert_eq!(keys, vec!["BAT", "WK"]);
    }

    #[test]
    fn nonconforming_codes_only_count_survivors() {
        let records = vec![
            slot("1", "gk", t(0)),
            slot("2", "GK", t(1)),
            slot("3", "ALL ROUNDER", t(0)),
            slot("4", "BOWL", t(0)),
        ];
        let groups = plan(&records);

        let found = nonconforming_survivors(&records, &groups);

        let ids: Vec<&str> = found.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "1"]);
    }

    #[test]
    fn code_format_matches_admin_schema() {
        assert!(is_conforming_code("WK_1"));
        assert!(is_conforming_code("ALL-ROUNDER"));
        assert!(!is_conforming_code(""));
        assert!(!is_conforming_code("gk"));
        assert!(!is_conforming_code(&"A".repeat(33)));
    }

    #[test]
    fn builder_defaults_to_dry_run_and_single_delete() {
        let resolver = Resolver::builder().concurrency(0).build();
        assert_eq!(resolver.mode(), Mode::DryRun);
        assert_eq!(resolver.concurrency, 1);
        assert!(resolver.deadline.is_none());
    }
}
