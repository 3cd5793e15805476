//! Root and child context lifecycle (§4.1).

use dataservice_base::{Cap, CapSet, StatusCode, StatusResult, MAX_CHILD_CONTEXTS};
use dataservice_store::Env;
use std::path::Path;

enum Slot {
    Free { next: Option<usize> },
    Occupied(CapSet),
}

/// A fixed-size free-list pool of child capability sets. Closing a slot
/// pushes it back onto the free list head: `child.next = head; head =
/// child`.
pub struct ChildPool {
    slots: Vec<Slot>,
    free_head: Option<usize>,
}

impl ChildPool {
    fn new() -> ChildPool {
        let mut slots = Vec::with_capacity(MAX_CHILD_CONTEXTS);
        for i in 0..MAX_CHILD_CONTEXTS {
            let next = if i + 1 < MAX_CHILD_CONTEXTS { Some(i + 1) } else { None };
            slots.push(Slot::Free { next });
        }
        ChildPool { slots, free_head: Some(0) }
    }

    fn create(&mut self, mask: &CapSet, root_caps: &CapSet) -> StatusResult<u32> {
        let idx = self.free_head.ok_or(StatusCode::OutOfChildInstances)?;
        let next = match self.slots[idx] {
            Slot::Free { next } => next,
            Slot::Occupied(_) => unreachable!("free_head pointed at an occupied slot"),
        };
        let mut child_caps = mask.clone();
        child_caps.intersect(root_caps);
        self.slots[idx] = Slot::Occupied(child_caps);
        self.free_head = next;
        Ok(idx as u32)
    }

    fn close(&mut self, idx: u32) -> StatusResult<()> {
        let idx = idx as usize;
        if idx >= self.slots.len() {
            return Err(StatusCode::ChildContextBadIndex);
        }
        match self.slots[idx] {
            Slot::Occupied(_) => {
                self.slots[idx] = Slot::Free { next: self.free_head };
                self.free_head = Some(idx);
                Ok(())
            }
            Slot::Free { .. } => Err(StatusCode::ChildContextInvalid),
        }
    }

    pub fn caps(&self, idx: u32) -> StatusResult<CapSet> {
        match self.slots.get(idx as usize) {
            Some(Slot::Occupied(caps)) => Ok(caps.clone()),
            Some(Slot::Free { .. }) => Err(StatusCode::ChildContextInvalid),
            None => Err(StatusCode::ChildContextBadIndex),
        }
    }
}

/// The root context: owns the environment, the full capability set minus
/// [`Cap::RootContextCreate`], and the child pool.
pub struct RootContext {
    pub caps: CapSet,
    pub env: Env,
    pub children: ChildPool,
}

impl RootContext {
    /// Creates the root context. `requested` must carry
    /// [`Cap::RootContextCreate`]; the resulting context's own caps are
    /// every bit *except* that one, regardless of what else `requested`
    /// set — root ownership is all-or-nothing by design (§4.1).
    pub fn create(requested: &CapSet, data_dir: impl AsRef<Path>) -> StatusResult<RootContext> {
        if !requested.is_set(Cap::RootContextCreate) {
            return Err(StatusCode::NotAuthorized);
        }
        let mut caps = CapSet::init_true();
        caps.clear(Cap::RootContextCreate);
        let env = Env::open(data_dir)?;
        Ok(RootContext { caps, env, children: ChildPool::new() })
    }

    /// Bitwise-ANDs the root's caps with `mask`. Caps can only shrink.
    pub fn reduce_caps(&mut self, mask: &CapSet) -> StatusResult<()> {
        if !self.caps.is_set(Cap::RootContextReduceCaps) {
            return Err(StatusCode::NotAuthorized);
        }
        self.caps.intersect(mask);
        Ok(())
    }

    /// Allocates a child context carrying `mask` intersected with the
    /// root's current caps.
    pub fn child_create(&mut self, mask: &CapSet) -> StatusResult<u32> {
        if !self.caps.is_set(Cap::ChildContextCreate) {
            return Err(StatusCode::NotAuthorized);
        }
        self.children.create(mask, &self.caps)
    }

    /// Closes a child context. Gated on the *child's* own
    /// [`Cap::ChildContextClose`] bit, not the root's.
    pub fn child_close(&mut self, idx: u32) -> StatusResult<()> {
        let caps = self.children.caps(idx)?;
        if !caps.is_set(Cap::ChildContextClose) {
            return Err(StatusCode::NotAuthorized);
        }
        self.children.close(idx)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn root_create_requires_cap() {
        let dir = tmp_dir();
        let caps = CapSet::init_false();
        assert_eq!(
            RootContext::create(&caps, dir.path()).unwrap_err(),
            StatusCode::NotAuthorized
        );
    }

    #[test]
    fn root_create_strips_create_bit_keeps_rest() {
        let dir = tmp_dir();
        let mut caps = CapSet::init_false();
        caps.set(Cap::RootContextCreate);
        let root = RootContext::create(&caps, dir.path()).unwrap();
        assert!(!root.caps.is_set(Cap::RootContextCreate));
        assert!(root.caps.is_set(Cap::BlockWrite));
    }

    #[test]
    fn reduce_caps_can_only_shrink() {
        let dir = tmp_dir();
        let mut caps = CapSet::init_false();
        caps.set(Cap::RootContextCreate);
        let mut root = RootContext::create(&caps, dir.path()).unwrap();

        let mut mask = CapSet::init_false();
        mask.set(Cap::BlockRead);
        mask.set(Cap::RootContextReduceCaps);
        root.reduce_caps(&mask).unwrap();
        assert!(root.caps.is_set(Cap::BlockRead));
        assert!(!root.caps.is_set(Cap::BlockWrite));
    }

    #[test]
    fn child_caps_are_subset_of_root_and_mask() {
        let dir = tmp_dir();
        let mut caps = CapSet::init_false();
        caps.set(Cap::RootContextCreate);
        let mut root = RootContext::create(&caps, dir.path()).unwrap();

        let mut mask = CapSet::init_false();
        mask.set(Cap::BlockRead);
        mask.set(Cap::TxnRead);
        mask.set(Cap::ChildContextClose);
        let idx = root.child_create(&mask).unwrap();
        let child_caps = root.children.caps(idx).unwrap();
        assert!(child_caps.is_subset_of(&root.caps));
        assert!(child_caps.is_subset_of(&mask));
    }

    #[test]
    fn child_slot_pool_exhausts_and_recycles() {
        let dir = tmp_dir();
        let mut caps = CapSet::init_false();
        caps.set(Cap::RootContextCreate);
        let mut root = RootContext::create(&caps, dir.path()).unwrap();

        let mask = CapSet::init_true();
        let mut indices = Vec::new();
        for _ in 0..MAX_CHILD_CONTEXTS {
            indices.push(root.child_create(&mask).unwrap());
        }
        assert_eq!(
            root.child_create(&mask).unwrap_err(),
            StatusCode::OutOfChildInstances
        );

        root.child_close(indices[0]).unwrap();
        let recycled = root.child_create(&mask).unwrap();
        assert_eq!(recycled, indices[0]);
    }

    #[test]
    fn child_close_requires_close_cap_on_child() {
        let dir = tmp_dir();
        let mut caps = CapSet::init_false();
        caps.set(Cap::RootContextCreate);
        let mut root = RootContext::create(&caps, dir.path()).unwrap();

        let mut mask = CapSet::init_false();
        mask.set(Cap::BlockRead);
        let idx = root.child_create(&mask).unwrap();
        assert_eq!(
            root.child_close(idx).unwrap_err(),
            StatusCode::NotAuthorized
        );
    }
}
