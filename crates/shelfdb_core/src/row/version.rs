//! Row versions and version chains.

use crate::document::Document;
use crate::types::{CommitId, RowKey, TransactionId};
use std::collections::BTreeMap;

/// What a version holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A live document.
    Document(Document),
    /// The row was deleted.
    Tombstone,
}

impl Payload {
    /// Returns the document, or `None` for a tombstone.
    pub fn document(&self) -> Option<&Document> {
        match self {
            Payload::Document(doc) => Some(doc),
            Payload::Tombstone => None,
        }
    }

    /// Returns true for a tombstone.
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Payload::Tombstone)
    }
}

/// One transaction's version of a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowVersion {
    /// Writer.
    pub transaction_id: TransactionId,
    /// `None` until the writer commits.
    pub commit_id: Option<CommitId>,
    /// Document or tombstone.
    pub payload: Payload,
    /// Set once the version has been written to a snapshot.
    pub persisted: bool,
}

impl RowVersion {
    /// An uncommitted version.
    pub fn pending(transaction_id: TransactionId, payload: Payload) -> Self {
        Self {
            transaction_id,
            commit_id: None,
            payload,
            persisted: false,
        }
    }

    /// A version that is committed as it is installed.
    pub fn committed(transaction_id: TransactionId, commit_id: CommitId, payload: Payload) -> Self {
        Self {
            transaction_id,
            commit_id: Some(commit_id),
            payload,
            persisted: false,
        }
    }
}

/// The point of view a read resolves versions against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadView {
    /// Versions committed at or before this id are visible.
    pub snapshot: u64,
    /// The reading transaction, whose own versions are always visible.
    pub owner: Option<TransactionId>,
}

impl ReadView {
    /// A view of everything committed up to `snapshot`.
    pub fn at(snapshot: u64) -> Self {
        Self {
            snapshot,
            owner: None,
        }
    }

    /// The view of an open transaction: its own writes plus everything
    /// committed before it began.
    pub fn owned_by(txid: TransactionId) -> Self {
        Self {
            snapshot: txid.as_u64(),
            owner: Some(txid),
        }
    }
}

/// A row and its versions, keyed by writing transaction.
#[derive(Debug, Clone)]
pub struct Row {
    key: RowKey,
    versions: BTreeMap<TransactionId, RowVersion>,
}

impl Row {
    /// Creates a row without versions.
    pub fn new(key: RowKey) -> Self {
        Self {
            key,
            versions: BTreeMap::new(),
        }
    }

    /// The row key.
    pub fn key(&self) -> &RowKey {
        &self.key
    }

    /// Number of versions held.
    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    /// Every version, by writing transaction.
    pub fn versions(&self) -> impl Iterator<Item = &RowVersion> {
        self.versions.values()
    }

    /// Resolves the version `view` sees.
    ///
    /// The owner's own version wins regardless of commit state. Otherwise
    /// the version with the greatest commit id not after the snapshot is
    /// chosen; uncommitted versions of other transactions are ignored.
    pub fn visible(&self, view: &ReadView) -> Option<&RowVersion> {
        if let Some(own) = view.owner.and_then(|owner| self.versions.get(&owner)) {
            return Some(own);
        }
        self.versions
            .values()
            .filter(|v| v.commit_id.is_some_and(|c| c.as_u64() <= view.snapshot))
            .max_by_key(|v| v.commit_id)
    }

    /// The live document `view` sees, if any.
    pub fn visible_document(&self, view: &ReadView) -> Option<&Document> {
        self.visible(view).and_then(|v| v.payload.document())
    }

    /// Installs a version, replacing the same transaction's earlier one.
    pub fn install(&mut self, version: RowVersion) {
        self.versions.insert(version.transaction_id, version);
    }

    /// Removes the version written by `txid`.
    pub fn remove_transaction(&mut self, txid: TransactionId) -> Option<RowVersion> {
        self.versions.remove(&txid)
    }

    /// Returns the commit id of a version by another transaction that
    /// committed after `txid` began.
    pub fn conflicts_with(&self, txid: TransactionId) -> Option<CommitId> {
        self.versions
            .values()
            .filter(|v| v.transaction_id != txid)
            .filter_map(|v| v.commit_id)
            .filter(|c| c.as_u64() > txid.as_u64())
            .max()
    }

    /// Stamps `txid`'s version with its commit id.
    pub fn stamp(&mut self, txid: TransactionId, commit_id: CommitId) -> bool {
        match self.versions.get_mut(&txid) {
            Some(version) => {
                version.commit_id = Some(commit_id);
                true
            }
            None => false,
        }
    }

    /// Marks `txid`'s version as persisted.
    pub fn mark_persisted(&mut self, txid: TransactionId) {
        if let Some(version) = self.versions.get_mut(&txid) {
            version.persisted = true;
        }
    }

    /// Drops committed versions no reader can see any more and returns how
    /// many were dropped.
    ///
    /// Kept: every uncommitted version, every version committed at or after
    /// `low_water`, and the newest version committed before it.
    pub fn prune(&mut self, low_water: u64) -> usize {
        let newest_below = self
            .versions
            .values()
            .filter_map(|v| v.commit_id)
            .filter(|c| c.as_u64() < low_water)
            .max();
        let before = self.versions.len();
        self.versions.retain(|_, v| match v.commit_id {
            None => true,
            Some(c) => c.as_u64() >= low_water || Some(c) == newest_below,
        });
        before - self.versions.len()
    }

    /// Returns true if the row can be removed from its table: it holds no
    /// version, or only a tombstone committed before `low_water`.
    pub fn is_obsolete(&self, low_water: u64) -> bool {
        let mut versions = self.versions.values();
        match (versions.next(), versions.next()) {
            (None, _) => true,
            (Some(only), None) => {
                only.payload.is_tombstone()
                    && only.commit_id.is_some_and(|c| c.as_u64() < low_water)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txid(n: u64) -> TransactionId {
        TransactionId::new(n)
    }

    fn doc(n: i64) -> Payload {
        Payload::Document(Document::from(n))
    }

    fn committed(tx: u64, commit: u64, payload: Payload) -> RowVersion {
        RowVersion::committed(txid(tx), CommitId::new(commit), payload)
    }

    fn create_row() -> Row {
        let mut row = Row::new(RowKey::Int(1));
        row.install(committed(1, 2, doc(10)));
        row.install(committed(3, 5, doc(30)));
        row.install(RowVersion::pending(txid(6), doc(60)));
        row
    }

    #[test]
    fn visibility_picks_greatest_commit_at_or_before_snapshot() {
        let row = create_row();
        assert_eq!(row.visible_document(&ReadView::at(1)), None);
        assert_eq!(row.visible_document(&ReadView::at(2)), Some(&Document::from(10)));
        assert_eq!(row.visible_document(&ReadView::at(4)), Some(&Document::from(10)));
        assert_eq!(row.visible_document(&ReadView::at(100)), Some(&Document::from(30)));
    }

    #[test]
    fn owner_sees_own_uncommitted_version() {
        let row = create_row();
        assert_eq!(
            row.visible_document(&ReadView::owned_by(txid(6))),
            Some(&Document::from(60))
        );
        assert_eq!(
            row.visible_document(&ReadView::owned_by(txid(7))),
            Some(&Document::from(30))
        );
        assert_eq!(
            row.visible_document(&ReadView::owned_by(txid(4))),
            Some(&Document::from(10))
        );
    }

    #[test]
    fn tombstones_hide_the_row() {
        let mut row = create_row();
        row.install(committed(8, 9, Payload::Tombstone));
        assert!(row.visible(&ReadView::at(9)).is_some());
        assert_eq!(row.visible_document(&ReadView::at(9)), None);
    }

    #[test]
    fn conflicts_are_later_commits_by_others() {
        let row = create_row();
        assert_eq!(row.conflicts_with(txid(4)), Some(CommitId::new(5)));
        assert_eq!(row.conflicts_with(txid(6)), None);
        assert_eq!(row.conflicts_with(txid(3)), None);
    }

    #[test]
    fn stamp_and_remove() {
        let mut row = create_row();
        assert!(row.stamp(txid(6), CommitId::new(11)));
        assert!(!row.stamp(txid(99), CommitId::new(12)));
        assert_eq!(row.visible_document(&ReadView::at(11)), Some(&Document::from(60)));

        assert!(row.remove_transaction(txid(6)).is_some());
        assert!(row.remove_transaction(txid(6)).is_none());
        assert_eq!(row.version_count(), 2);
    }

    #[test]
    fn prune_keeps_newest_below_mark() {
        let mut row = create_row();
        row.install(committed(7, 8, doc(80)));

        assert_eq!(row.prune(2), 0);
        assert_eq!(row.prune(6), 1);
        assert_eq!(row.version_count(), 3);
        assert_eq!(row.visible_document(&ReadView::at(5)), Some(&Document::from(30)));

        assert_eq!(row.prune(100), 1);
        assert_eq!(row.version_count(), 2);
        assert_eq!(row.visible_document(&ReadView::at(100)), Some(&Document::from(80)));
    }

    #[test]
    fn obsolete_rows() {
        let mut row = Row::new(RowKey::Int(2));
        assert!(row.is_obsolete(0));

        row.install(committed(1, 2, Payload::Tombstone));
        assert!(!row.is_obsolete(2));
        assert!(row.is_obsolete(3));

        row.install(RowVersion::pending(txid(4), doc(1)));
        assert!(!row.is_obsolete(100));
    }
}
