//! The catalog store: this peer's mirror of every advertised file.
//!
//! Entries are unique per `(id, owner_id)`. The store itself enforces that
//! invariant and nothing else; deciding *when* to mutate is the catalog sync
//! engine's job, and it is the only holder of a mutable reference.

use dropline_core::{CatalogEntry, DownloadOverlay, FileId, PeerId};

/// Result of inserting an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// A new `(id, owner)` pair.
    Inserted,
    /// An entry for the same `(id, owner)` existed and was overwritten.
    Replaced,
}

/// In-memory catalog, in listing order.
#[derive(Debug, Default, Clone)]
pub struct CatalogStore {
    entries: Vec<CatalogEntry>,
}

impl CatalogStore {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, in listing order.
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Owned copy of the catalog for readers outside the engine.
    pub fn snapshot(&self) -> Vec<CatalogEntry> {
        self.entries.clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// The entry for a specific `(id, owner)` pair.
    pub fn get(&self, id: &FileId, owner: &PeerId) -> Option<&CatalogEntry> {
        self.entries
            .iter()
            .find(|e| &e.id == id && &e.owner_id == owner)
    }

    /// The entry this peer owns for `id`, if any.
    pub fn find_owned(&self, id: &FileId) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| &e.id == id && e.is_owner)
    }

    /// Any entry for `id`, preferring the one this peer owns.
    pub fn find_by_id(&self, id: &FileId) -> Option<&CatalogEntry> {
        self.find_owned(id)
            .or_else(|| self.entries.iter().find(|e| &e.id == id))
    }

    /// All entries advertised by `owner`.
    pub fn by_owner<'a>(&'a self, owner: &'a PeerId) -> impl Iterator<Item = &'a CatalogEntry> + 'a {
        self.entries.iter().filter(move |e| &e.owner_id == owner)
    }

    /// Whether the `(id, file_name, file_size)` triple is already listed.
    pub fn contains_file(&self, id: &FileId, file_name: &str, file_size: u64) -> bool {
        self.entries
            .iter()
            .any(|e| e.is_same_file(id, file_name, file_size))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert an entry, replacing any existing entry for the same `(id, owner)`.
    pub fn insert(&mut self, entry: CatalogEntry) -> InsertResult {
        match self
            .entries
            .iter_mut()
            .find(|e| e.id == entry.id && e.owner_id == entry.owner_id)
        {
            Some(existing) => {
                *existing = entry;
                InsertResult::Replaced
            }
            None => {
                self.entries.push(entry);
                InsertResult::Inserted
            }
        }
    }

    /// Remove every entry with `id`, whoever owns it.
    pub fn remove_by_id(&mut self, id: &FileId) -> Vec<CatalogEntry> {
        self.remove_where(|e| &e.id == id)
    }

    /// Remove every entry advertised by `owner`.
    pub fn remove_by_owner(&mut self, owner: &PeerId) -> Vec<CatalogEntry> {
        self.remove_where(|e| &e.owner_id == owner)
    }

    /// Set the password flag on the `(id, owner)` entry. Returns matches.
    pub fn set_password(&mut self, id: &FileId, owner: &PeerId, with_password: bool) -> usize {
        self.update_where(
            |e| &e.id == id && &e.owner_id == owner,
            |e| e.with_password = with_password,
        )
    }

    /// Relabel every entry advertised by `owner`. Returns matches.
    pub fn rename_device(&mut self, owner: &PeerId, device_name: &str) -> usize {
        self.update_where(
            |e| &e.owner_id == owner,
            |e| e.device_name = device_name.to_string(),
        )
    }

    /// Set the download tally on every entry with `id`, across owners.
    pub fn set_total_downloads(&mut self, id: &FileId, total_downloads: u64) -> usize {
        self.update_where(|e| &e.id == id, |e| e.total_downloads = total_downloads)
    }

    /// Set the download overlay of the `(id, owner)` entry.
    pub fn set_overlay(&mut self, id: &FileId, owner: &PeerId, overlay: DownloadOverlay) -> usize {
        self.update_where(
            |e| &e.id == id && &e.owner_id == owner,
            |e| e.overlay = overlay,
        )
    }

    /// Reset every in-progress overlay back to not-downloading.
    pub fn reset_in_progress(&mut self) -> usize {
        self.update_where(
            |e| e.overlay.is_downloading,
            |e| e.overlay = DownloadOverlay::default(),
        )
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn remove_where<F>(&mut self, pred: F) -> Vec<CatalogEntry>
    where
        F: Fn(&CatalogEntry) -> bool,
    {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| pred(e));
        self.entries = kept;
        removed
    }

    fn update_where<P, U>(&mut self, pred: P, update: U) -> usize
    where
        P: Fn(&CatalogEntry) -> bool,
        U: Fn(&mut CatalogEntry),
    {
        let mut count = 0;
        for entry in self.entries.iter_mut().filter(|e| pred(e)) {
            update(entry);
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, owner: &str, name: &str) -> CatalogEntry {
        CatalogEntry {
            id: FileId::from(id),
            owner_id: PeerId::from(owner),
            file_name: name.to_string(),
            file_size: 10,
            device_name: format!("{}-device", owner),
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_unique_per_id_and_owner() {
        let mut store = CatalogStore::new();
        assert_eq!(store.insert(entry("f1", "a", "x")), InsertResult::Inserted);
        assert_eq!(store.insert(entry("f1", "b", "x")), InsertResult::Inserted);
        assert_eq!(store.insert(entry("f1", "a", "renamed")), InsertResult::Replaced);

        assert_eq!(store.len(), 2);
        let a = store.get(&FileId::from("f1"), &PeerId::from("a")).unwrap();
        assert_eq!(a.file_name, "renamed");
    }

    #[test]
    fn test_remove_by_owner_keeps_others() {
        let mut store = CatalogStore::new();
        store.insert(entry("f1", "a", "x"));
        store.insert(entry("f2", "a", "y"));
        store.insert(entry("f1", "b", "x"));

        let removed = store.remove_by_owner(&PeerId::from("a"));
        assert_eq!(removed.len(), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.entries()[0].owner_id, PeerId::from("b"));
    }

    #[test]
    fn test_remove_by_id_crosses_owners() {
        let mut store = CatalogStore::new();
        store.insert(entry("f1", "a", "x"));
        store.insert(entry("f1", "b", "x"));
        store.insert(entry("f2", "b", "y"));

        store.remove_by_id(&FileId::from("f1"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.entries()[0].id, FileId::from("f2"));
    }

    #[test]
    fn test_set_password_requires_both_keys() {
        let mut store = CatalogStore::new();
        store.insert(entry("f1", "a", "x"));
        store.insert(entry("f1", "b", "x"));

        assert_eq!(store.set_password(&FileId::from("f1"), &PeerId::from("a"), true), 1);
        assert_eq!(store.set_password(&FileId::from("f1"), &PeerId::from("zzz"), true), 0);
        assert!(store.get(&FileId::from("f1"), &PeerId::from("a")).unwrap().with_password);
        assert!(!store.get(&FileId::from("f1"), &PeerId::from("b")).unwrap().with_password);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_total_downloads_is_broadcast_by_id() {
        let mut store = CatalogStore::new();
        store.insert(entry("f1", "a", "x"));
        store.insert(entry("f1", "b", "x"));
        store.insert(entry("f2", "a", "y"));

        assert_eq!(store.set_total_downloads(&FileId::from("f1"), 5), 2);
        let totals: Vec<u64> = store.entries().iter().map(|e| e.total_downloads).collect();
        assert_eq!(totals, vec![5, 5, 0]);
    }

    #[test]
    fn test_find_by_id_prefers_owned() {
        let mut store = CatalogStore::new();
        store.insert(entry("f1", "a", "x"));
        let mut owned = entry("f1", "me", "x");
        owned.is_owner = true;
        store.insert(owned);

        let found = store.find_by_id(&FileId::from("f1")).unwrap();
        assert_eq!(found.owner_id, PeerId::from("me"));
        assert!(store.find_owned(&FileId::from("f2")).is_none());
    }

    #[test]
    fn test_rename_device_and_contains_file() {
        let mut store = CatalogStore::new();
        store.insert(entry("f1", "a", "x"));
        store.insert(entry("f2", "a", "y"));

        assert_eq!(store.rename_device(&PeerId::from("a"), "laptop"), 2);
        assert!(store.by_owner(&PeerId::from("a")).all(|e| e.device_name == "laptop"));
        assert!(store.contains_file(&FileId::from("f1"), "x", 10));
        assert!(!store.contains_file(&FileId::from("f1"), "x", 11));
    }
}
