/// Tracks topology changes since the last segment rebuild.
///
/// States are clean and dirty only. Anything that adds, removes or
/// (de)activates a tile marks the tracker dirty; a rebuild calls
/// [`mark_clean`](DirtyTracker::mark_clean).
#[derive(Debug, Clone)]
pub struct DirtyTracker {
    topology_dirty: bool,
    fingerprint: Option<u64>,
}

impl Default for DirtyTracker {
    /// A fresh tracker starts dirty: nothing has been built yet.
    fn default() -> Self {
        Self {
            topology_dirty: true,
            fingerprint: None,
        }
    }
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the whole topology changed.
    pub fn mark_topology(&mut self) {
        self.topology_dirty = true;
    }

    /// Compare a topology fingerprint with the last one seen.
    ///
    /// Returns `true` (and marks dirty) when it differs.
    pub fn observe(&mut self, fingerprint: u64) -> bool {
        if self.fingerprint == Some(fingerprint) {
            return false;
        }
        self.fingerprint = Some(fingerprint);
        self.topology_dirty = true;
        true
    }

    pub fn is_dirty(&self) -> bool {
        self.topology_dirty
    }

    pub fn fingerprint(&self) -> Option<u64> {
        self.fingerprint
    }

    /// Reset to clean. The last fingerprint is kept.
    pub fn mark_clean(&mut self) {
        self.topology_dirty = false;
    }
}
