use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{LinkHalf, ReckonError, Result};
use crate::store::RecordStore;

/// Link one of `user_id`'s receipts and transactions to each other.
///
/// Two separate writes: the receipt first, then the transaction. If the
/// second write fails the receipt stays linked and `reconcile_links` can
/// finish the job later. The one exception is a transaction already held by
/// another receipt: the receipt goes back to what it pointed at before and
/// `AlreadyClaimed` is returned, so a lost race never leaves two receipts on
/// one transaction. Moving a receipt to a new transaction releases the old
/// one.
pub fn link_receipt_to_transaction(
    store: &dyn RecordStore,
    user_id: &str,
    receipt_id: &str,
    transaction_id: &str,
    image_url: &str,
    vat_amount: Option<f64>,
    vat_rate: Option<f64>,
) -> Result<()> {
    let receipt = store
        .get_receipt(receipt_id)?
        .filter(|r| r.user_id == user_id)
        .ok_or_else(|| ReckonError::UnknownReceipt(receipt_id.to_string()))?;
    let txn = store
        .get_transaction(transaction_id)?
        .filter(|t| t.user_id == user_id)
        .ok_or_else(|| ReckonError::UnknownTransaction(transaction_id.to_string()))?;
    if let Some(owner) = txn.receipt_id.filter(|owner| owner != receipt_id) {
        return Err(ReckonError::AlreadyClaimed {
            transaction_id: transaction_id.to_string(),
            receipt_id: owner,
        });
    }
    let previous = receipt.transaction_id.filter(|prev| prev != transaction_id);

    store
        .set_receipt_transaction(receipt_id, transaction_id)
        .map_err(|e| ReckonError::Link {
            half: LinkHalf::Receipt,
            message: e.to_string(),
        })?;

    match store.attach_receipt(transaction_id, receipt_id, image_url, vat_amount, vat_rate) {
        Ok(()) => {
            info!(receipt_id, transaction_id, "linked receipt");
            if let Some(old) = &previous {
                match store.release_transaction(old, receipt_id) {
                    Ok(_) => debug!(receipt_id, transaction_id = %old, "released previous transaction"),
                    Err(e) => warn!(receipt_id, transaction_id = %old, error = %e, "previous transaction left for sweep"),
                }
            }
            Ok(())
        }
        Err(claimed @ ReckonError::AlreadyClaimed { .. }) => {
            match &previous {
                Some(old) => store.set_receipt_transaction(receipt_id, old)?,
                None => {
                    store.clear_receipt_transaction(receipt_id, transaction_id)?;
                }
            }
            Err(claimed)
        }
        Err(e) => Err(ReckonError::Link {
            half: LinkHalf::Transaction,
            message: e.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchOptions {
    pub batch_size: usize,
    /// Pause between consecutive batches.
    pub delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub total: usize,
    pub updated: usize,
    pub failed: usize,
    pub failed_ids: Vec<String>,
}

/// Move a set of `user_id`'s transactions to a new category.
///
/// Items run in chunks of `batch_size`; the items of a chunk run
/// concurrently and a failing item never stops its siblings. `on_progress`
/// sees the running totals after every chunk and `invalidate` runs exactly
/// once when everything is done.
pub fn bulk_recategorize(
    store: &dyn RecordStore,
    user_id: &str,
    transaction_ids: &[String],
    category_id: i64,
    vat_rate: Option<f64>,
    options: &BatchOptions,
    mut on_progress: impl FnMut(&BatchSummary),
    invalidate: impl FnOnce(&BatchSummary),
) -> BatchSummary {
    let mut summary = BatchSummary {
        total: transaction_ids.len(),
        ..Default::default()
    };
    let batch_size = options.batch_size.max(1);

    for (index, chunk) in transaction_ids.chunks(batch_size).enumerate() {
        if index > 0 && !options.delay.is_zero() {
            thread::sleep(options.delay);
        }

        let outcomes: Vec<(&String, Result<()>)> = thread::scope(|scope| {
            let handles: Vec<_> = chunk
                .iter()
                .map(|id| (id, scope.spawn(move || store.update_category(user_id, id, category_id, vat_rate))))
                .collect();
            handles
                .into_iter()
                .map(|(id, handle)| {
                    let outcome = handle
                        .join()
                        .unwrap_or_else(|_| Err(ReckonError::Other("worker panicked".to_string())));
                    (id, outcome)
                })
                .collect()
        });

        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => summary.updated += 1,
                Err(e) => {
                    warn!(transaction_id = %id, error = %e, "recategorize failed");
                    summary.failed += 1;
                    summary.failed_ids.push(id.clone());
                }
            }
        }
        debug!(batch = index, updated = summary.updated, failed = summary.failed, "batch done");
        on_progress(&summary);
    }

    info!(
        total = summary.total,
        updated = summary.updated,
        failed = summary.failed,
        "bulk recategorize finished"
    );
    invalidate(&summary);
    summary
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub checked: usize,
    /// Transactions freed because their receipt points somewhere else.
    pub detached: usize,
    /// Transactions that got their missing back-reference.
    pub repaired: usize,
    /// Receipts whose target belongs to another receipt; their stale
    /// reference was cleared so they can be matched again.
    pub released: usize,
    pub failed: usize,
}

/// Put half-finished links right, in both directions.
///
/// Transactions holding a receipt that points elsewhere are freed first.
/// Then receipts pointing at a transaction that does not point back are
/// either completed or released.
pub fn reconcile_links(store: &dyn RecordStore, user_id: &str) -> Result<SweepReport> {
    let orphans = store.orphaned_transaction_links(user_id)?;
    let mut report = SweepReport {
        checked: orphans.len(),
        ..Default::default()
    };
    for orphan in orphans {
        match store.release_transaction(&orphan.transaction_id, &orphan.receipt_id) {
            Ok(released) => {
                if released {
                    report.detached += 1;
                }
                info!(transaction_id = %orphan.transaction_id, receipt_id = %orphan.receipt_id, "detached transaction");
            }
            Err(e) => {
                warn!(transaction_id = %orphan.transaction_id, error = %e, "sweep failed");
                report.failed += 1;
            }
        }
    }

    let dangling = store.dangling_receipt_links(user_id)?;
    report.checked += dangling.len();

    for link in dangling {
        let outcome = match &link.current_owner {
            None => store
                .attach_receipt(
                    &link.transaction_id,
                    &link.receipt_id,
                    &link.image_ref,
                    link.vat_amount,
                    link.vat_rate,
                )
                .map(|()| {
                    report.repaired += 1;
                }),
            Some(_) => store
                .clear_receipt_transaction(&link.receipt_id, &link.transaction_id)
                .map(|cleared| {
                    if cleared {
                        report.released += 1;
                    }
                }),
        };
        match outcome {
            Ok(()) => info!(receipt_id = %link.receipt_id, transaction_id = %link.transaction_id, "swept link"),
            Err(e) => {
                warn!(receipt_id = %link.receipt_id, error = %e, "sweep failed");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::NaiveDate;

    use super::*;
    use crate::models::{MatchCandidate, Receipt, Transaction};
    use crate::store::tests::{add_receipt, add_txn, test_store};
    use crate::store::{DanglingLink, OrphanedLink, SqliteStore};

    /// Delegates to a real store but fails chosen writes.
    struct FlakyStore {
        inner: SqliteStore,
        fail_category_for: Option<String>,
        fail_attach: bool,
        fail_set_receipt: bool,
        /// Serve transactions as if no receipt held them yet.
        stale_reads: bool,
        category_calls: AtomicUsize,
    }

    impl FlakyStore {
        fn new(inner: SqliteStore) -> Self {
            Self {
                inner,
                fail_category_for: None,
                fail_attach: false,
                fail_set_receipt: false,
                stale_reads: false,
                category_calls: AtomicUsize::new(0),
            }
        }
    }

    impl RecordStore for FlakyStore {
        fn unlinked_candidates(
            &self,
            user_id: &str,
            window: Option<(NaiveDate, NaiveDate)>,
        ) -> Result<Vec<MatchCandidate>> {
            self.inner.unlinked_candidates(user_id, window)
        }
        fn get_transaction(&self, id: &str) -> Result<Option<Transaction>> {
            let txn = self.inner.get_transaction(id)?;
            if self.stale_reads {
                return Ok(txn.map(|t| Transaction {
                    receipt_id: None,
                    ..t
                }));
            }
            Ok(txn)
        }
        fn get_receipt(&self, id: &str) -> Result<Option<Receipt>> {
            self.inner.get_receipt(id)
        }
        fn set_receipt_transaction(&self, r: &str, t: &str) -> Result<()> {
            if self.fail_set_receipt {
                return Err(ReckonError::Other("timeout".to_string()));
            }
            self.inner.set_receipt_transaction(r, t)
        }
        fn clear_receipt_transaction(&self, r: &str, t: &str) -> Result<bool> {
            self.inner.clear_receipt_transaction(r, t)
        }
        fn attach_receipt(
            &self,
            t: &str,
            r: &str,
            i: &str,
            a: Option<f64>,
            v: Option<f64>,
        ) -> Result<()> {
            if self.fail_attach {
                return Err(ReckonError::Other("timeout".to_string()));
            }
            self.inner.attach_receipt(t, r, i, a, v)
        }
        fn release_transaction(&self, t: &str, r: &str) -> Result<bool> {
            self.inner.release_transaction(t, r)
        }
        fn update_category(&self, u: &str, t: &str, c: i64, v: Option<f64>) -> Result<()> {
            self.category_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_category_for.as_deref() == Some(t) {
                return Err(ReckonError::Other("write rejected".to_string()));
            }
            self.inner.update_category(u, t, c, v)
        }
        fn dangling_receipt_links(&self, u: &str) -> Result<Vec<DanglingLink>> {
            self.inner.dangling_receipt_links(u)
        }
        fn orphaned_transaction_links(&self, u: &str) -> Result<Vec<OrphanedLink>> {
            self.inner.orphaned_transaction_links(u)
        }
    }

    fn no_delay() -> BatchOptions {
        BatchOptions {
            batch_size: 10,
            delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_link_sets_both_sides() {
        let (_dir, store) = test_store();
        let txn = add_txn(&store, "u1", "2024-06-15", "SCREWFIX", -42.5);
        let receipt = add_receipt(&store, "u1", "Screwfix", 42.5);

        link_receipt_to_transaction(&store, "u1", &receipt, &txn, "img.jpg", Some(7.95), None).unwrap();

        let r = store.get_receipt(&receipt).unwrap().unwrap();
        assert_eq!(r.transaction_id.as_deref(), Some(txn.as_str()));
        let t = store.get_transaction(&txn).unwrap().unwrap();
        assert_eq!(t.receipt_id.as_deref(), Some(receipt.as_str()));
        assert_eq!(t.receipt_image_url.as_deref(), Some("img.jpg"));
        assert_eq!(t.vat_amount, Some(7.95));
        assert_eq!(t.vat_rate, None);
    }

    #[test]
    fn test_receipt_half_failure_names_receipt() {
        let (_dir, inner) = test_store();
        let txn = add_txn(&inner, "u1", "2024-06-15", "SCREWFIX", -42.5);
        let receipt = add_receipt(&inner, "u1", "Screwfix", 42.5);
        let mut store = FlakyStore::new(inner);
        store.fail_set_receipt = true;

        let err =
            link_receipt_to_transaction(&store, "u1", &receipt, &txn, "img", None, None).unwrap_err();
        assert!(matches!(err, ReckonError::Link { half: LinkHalf::Receipt, .. }));
        assert!(err.to_string().contains("receipt"));
        assert!(store.get_transaction(&txn).unwrap().unwrap().receipt_id.is_none());
    }

    #[test]
    fn test_link_unknown_records_write_nothing() {
        let (_dir, store) = test_store();
        let txn = add_txn(&store, "u1", "2024-06-15", "SCREWFIX", -42.5);
        let receipt = add_receipt(&store, "u1", "Screwfix", 42.5);

        assert!(matches!(
            link_receipt_to_transaction(&store, "u1", "nope", &txn, "img", None, None),
            Err(ReckonError::UnknownReceipt(_))
        ));
        assert!(matches!(
            link_receipt_to_transaction(&store, "u1", &receipt, "ghost", "img", None, None),
            Err(ReckonError::UnknownTransaction(_))
        ));
        assert!(store.get_receipt(&receipt).unwrap().unwrap().transaction_id.is_none());
        assert!(store.get_transaction(&txn).unwrap().unwrap().receipt_id.is_none());
    }

    #[test]
    fn test_link_across_users_is_refused() {
        let (_dir, store) = test_store();
        let theirs = add_txn(&store, "u2", "2024-06-15", "SCREWFIX", -42.5);
        let mine = add_receipt(&store, "u1", "Screwfix", 42.5);

        assert!(matches!(
            link_receipt_to_transaction(&store, "u1", &mine, &theirs, "img", None, None),
            Err(ReckonError::UnknownTransaction(_))
        ));
        assert!(matches!(
            link_receipt_to_transaction(&store, "u2", &mine, &theirs, "img", None, None),
            Err(ReckonError::UnknownReceipt(_))
        ));
        assert!(store.get_transaction(&theirs).unwrap().unwrap().receipt_id.is_none());
        assert!(store.get_receipt(&mine).unwrap().unwrap().transaction_id.is_none());
    }

    #[test]
    fn test_relink_releases_previous_transaction() {
        let (_dir, store) = test_store();
        let first = add_txn(&store, "u1", "2024-06-15", "SCREWFIX", -42.5);
        let second = add_txn(&store, "u1", "2024-06-16", "SCREWFIX", -42.5);
        let receipt = add_receipt(&store, "u1", "Screwfix", 42.5);

        link_receipt_to_transaction(&store, "u1", &receipt, &first, "img", None, None).unwrap();
        link_receipt_to_transaction(&store, "u1", &receipt, &second, "img", None, None).unwrap();

        let r = store.get_receipt(&receipt).unwrap().unwrap();
        assert_eq!(r.transaction_id.as_deref(), Some(second.as_str()));
        let old = store.get_transaction(&first).unwrap().unwrap();
        assert!(old.receipt_id.is_none());
        let candidates = store.unlinked_candidates("u1", None).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, first);
        assert_eq!(reconcile_links(&store, "u1").unwrap().checked, 0);
    }

    #[test]
    fn test_relink_lost_to_claim_keeps_previous_link() {
        let (_dir, inner) = test_store();
        let first = add_txn(&inner, "u1", "2024-06-15", "SCREWFIX", -42.5);
        let second = add_txn(&inner, "u1", "2024-06-16", "SCREWFIX", -42.5);
        let receipt = add_receipt(&inner, "u1", "Screwfix", 42.5);
        let other = add_receipt(&inner, "u1", "Screwfix", 42.5);
        link_receipt_to_transaction(&inner, "u1", &receipt, &first, "img", None, None).unwrap();
        // another receipt takes the target after the ownership check
        inner.attach_receipt(&second, &other, "img", None, None).unwrap();
        let mut store = FlakyStore::new(inner);
        store.stale_reads = true;

        let err = link_receipt_to_transaction(&store, "u1", &receipt, &second, "img", None, None)
            .unwrap_err();
        assert!(matches!(err, ReckonError::AlreadyClaimed { .. }));
        let r = store.get_receipt(&receipt).unwrap().unwrap();
        assert_eq!(r.transaction_id.as_deref(), Some(first.as_str()));
        store.stale_reads = false;
        let t = store.get_transaction(&first).unwrap().unwrap();
        assert_eq!(t.receipt_id.as_deref(), Some(receipt.as_str()));
        let t = store.get_transaction(&second).unwrap().unwrap();
        assert_eq!(t.receipt_id.as_deref(), Some(other.as_str()));
    }

    #[test]
    fn test_sweep_detaches_transaction_whose_receipt_moved() {
        let (_dir, store) = test_store();
        let first = add_txn(&store, "u1", "2024-06-15", "SCREWFIX", -42.5);
        let second = add_txn(&store, "u1", "2024-06-16", "SCREWFIX", -42.5);
        let receipt = add_receipt(&store, "u1", "Screwfix", 42.5);
        link_receipt_to_transaction(&store, "u1", &receipt, &first, "img", None, None).unwrap();
        // receipt moved without the old transaction being released
        store.set_receipt_transaction(&receipt, &second).unwrap();

        let report = reconcile_links(&store, "u1").unwrap();
        assert_eq!(report.detached, 1);
        assert_eq!(report.repaired, 1);
        assert_eq!(report.failed, 0);
        assert!(store.get_transaction(&first).unwrap().unwrap().receipt_id.is_none());
        let t = store.get_transaction(&second).unwrap().unwrap();
        assert_eq!(t.receipt_id.as_deref(), Some(receipt.as_str()));
    }

    #[test]
    fn test_transaction_half_failure_leaves_receipt_linked() {
        let (_dir, inner) = test_store();
        let txn = add_txn(&inner, "u1", "2024-06-15", "SCREWFIX", -42.5);
        let receipt = add_receipt(&inner, "u1", "Screwfix", 42.5);
        let mut store = FlakyStore::new(inner);
        store.fail_attach = true;

        let err = link_receipt_to_transaction(&store, "u1", &receipt, &txn, "img", None, None).unwrap_err();
        assert!(matches!(err, ReckonError::Link { half: LinkHalf::Transaction, .. }));

        let r = store.get_receipt(&receipt).unwrap().unwrap();
        assert_eq!(r.transaction_id.as_deref(), Some(txn.as_str()));

        store.fail_attach = false;
        let report = reconcile_links(&store, "u1").unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.repaired, 1);
        let t = store.get_transaction(&txn).unwrap().unwrap();
        assert_eq!(t.receipt_id.as_deref(), Some(receipt.as_str()));
    }

    #[test]
    fn test_link_refuses_claimed_transaction() {
        let (_dir, store) = test_store();
        let txn = add_txn(&store, "u1", "2024-06-15", "SCREWFIX", -42.5);
        let first = add_receipt(&store, "u1", "Screwfix", 42.5);
        let second = add_receipt(&store, "u1", "Screwfix", 42.5);
        link_receipt_to_transaction(&store, "u1", &first, &txn, "a", None, None).unwrap();

        let err = link_receipt_to_transaction(&store, "u1", &second, &txn, "b", None, None).unwrap_err();
        assert!(matches!(err, ReckonError::AlreadyClaimed { .. }));
        let r = store.get_receipt(&second).unwrap().unwrap();
        assert!(r.transaction_id.is_none());
    }

    #[test]
    fn test_link_is_idempotent() {
        let (_dir, store) = test_store();
        let txn = add_txn(&store, "u1", "2024-06-15", "SCREWFIX", -42.5);
        let receipt = add_receipt(&store, "u1", "Screwfix", 42.5);
        link_receipt_to_transaction(&store, "u1", &receipt, &txn, "a", None, None).unwrap();
        link_receipt_to_transaction(&store, "u1", &receipt, &txn, "a", None, None).unwrap();
        assert!(store.dangling_receipt_links("u1").unwrap().is_empty());
    }

    #[test]
    fn test_sweep_releases_receipt_pointing_at_claimed_transaction() {
        let (_dir, store) = test_store();
        let txn = add_txn(&store, "u1", "2024-06-15", "SCREWFIX", -42.5);
        let owner = add_receipt(&store, "u1", "Screwfix", 42.5);
        let stale = add_receipt(&store, "u1", "Screwfix", 42.5);
        link_receipt_to_transaction(&store, "u1", &owner, &txn, "a", None, None).unwrap();
        store.set_receipt_transaction(&stale, &txn).unwrap();

        let report = reconcile_links(&store, "u1").unwrap();
        assert_eq!(report.released, 1);
        assert_eq!(report.repaired, 0);
        assert!(store.get_receipt(&stale).unwrap().unwrap().transaction_id.is_none());
    }

    #[test]
    fn test_bulk_recategorize_tallies_failures() {
        let (_dir, inner) = test_store();
        let ids: Vec<String> = (0..25)
            .map(|i| add_txn(&inner, "u1", "2024-06-15", &format!("HOTEL {i}"), -10.0))
            .collect();
        let category: i64 = inner
            .conn()
            .unwrap()
            .query_row("SELECT id FROM categories WHERE name = 'Accommodation'", [], |r| r.get(0))
            .unwrap();
        let mut store = FlakyStore::new(inner);
        store.fail_category_for = Some(ids[12].clone());

        let mut progress = Vec::new();
        let mut invalidations = 0;
        let summary = bulk_recategorize(
            &store,
            "u1",
            &ids,
            category,
            None,
            &no_delay(),
            |s| progress.push(s.updated + s.failed),
            |_| invalidations += 1,
        );

        assert_eq!(summary.total, 25);
        assert_eq!(summary.updated, 24);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failed_ids, vec![ids[12].clone()]);
        assert_eq!(progress, vec![10, 20, 25]);
        assert_eq!(invalidations, 1);
        assert_eq!(store.category_calls.load(Ordering::SeqCst), 25);

        let updated = store.get_transaction(&ids[0]).unwrap().unwrap();
        assert_eq!(updated.category_id, Some(category));
        let failed = store.get_transaction(&ids[12]).unwrap().unwrap();
        assert_eq!(failed.category_id, None);
    }

    #[test]
    fn test_bulk_recategorize_unknown_ids_fail_individually() {
        let (_dir, store) = test_store();
        let real = add_txn(&store, "u1", "2024-06-15", "X", -1.0);
        let ids = vec![real, "ghost".to_string()];
        let summary = bulk_recategorize(&store, "u1", &ids, 1, Some(23.0), &no_delay(), |_| {}, |_| {});
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_bulk_recategorize_skips_other_users_transactions() {
        let (_dir, store) = test_store();
        let mine = add_txn(&store, "u1", "2024-06-15", "X", -1.0);
        let theirs = add_txn(&store, "u2", "2024-06-15", "Y", -1.0);
        let ids = vec![mine.clone(), theirs.clone()];
        let summary = bulk_recategorize(&store, "u1", &ids, 1, None, &no_delay(), |_| {}, |_| {});
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.failed_ids, vec![theirs.clone()]);
        assert_eq!(store.get_transaction(&mine).unwrap().unwrap().category_id, Some(1));
        assert_eq!(store.get_transaction(&theirs).unwrap().unwrap().category_id, None);
    }

    #[test]
    fn test_bulk_recategorize_empty_still_invalidates_once() {
        let (_dir, store) = test_store();
        let mut invalidations = 0;
        let summary =
            bulk_recategorize(&store, "u1", &[], 1, None, &no_delay(), |_| {}, |_| invalidations += 1);
        assert_eq!(summary, BatchSummary::default());
        assert_eq!(invalidations, 1);
    }
}
