//! Owned (in-flight) GTIDs
//!
//! Maps every GTID currently claimed by a connection or replication worker to
//! its owner. A GTID is either owned, logged or neither; never owned and
//! logged at once.

use std::collections::HashMap;

use tracing::error;

use super::error::{oom, GtidError, GtidResult};
use super::{Gno, Gtid, OwnerId, Sidno};

/// Owners of in-flight GNOs for one sidno
#[derive(Debug, Clone)]
pub struct OwnedGnos {
    sidno: Sidno,
    owners: HashMap<Gno, OwnerId>,
}

impl OwnedGnos {
    pub fn new(sidno: Sidno) -> Self {
        Self {
            sidno,
            owners: HashMap::new(),
        }
    }

    pub fn sidno(&self) -> Sidno {
        self.sidno
    }

    /// Record `owner` for `gno`. Claiming a GNO that is already owned is a
    /// locking bug in the caller and is reported as `AlreadyOwned`.
    pub fn add_owner(&mut self, gno: Gno, owner: OwnerId) -> GtidResult<()> {
        debug_assert!(owner != 0, "owner id 0 is reserved");
        if let Some(&current) = self.owners.get(&gno) {
            let gtid = Gtid::new(self.sidno, gno);
            error!(%gtid, current, owner, "GTID claimed twice");
            return Err(GtidError::AlreadyOwned {
                gtid,
                owner: current,
            });
        }
        self.owners.try_reserve(1).map_err(oom("owned gtids"))?;
        self.owners.insert(gno, owner);
        Ok(())
    }

    /// Drop ownership of `gno`; absent entries are ignored
    pub fn remove(&mut self, gno: Gno) -> Option<OwnerId> {
        self.owners.remove(&gno)
    }

    pub fn owner(&self, gno: Gno) -> Option<OwnerId> {
        self.owners.get(&gno).copied()
    }

    pub fn is_owned(&self, gno: Gno) -> bool {
        self.owners.contains_key(&gno)
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// `(gno, owner)` pairs in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (Gno, OwnerId)> + '_ {
        self.owners.iter().map(|(&gno, &owner)| (gno, owner))
    }
}

/// Owned GTIDs across all sidnos
#[derive(Debug, Clone, Default)]
pub struct OwnedGtids {
    /// Index `sidno - 1`
    sidnos: Vec<OwnedGnos>,
}

impl OwnedGtids {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_sidno(&mut self, sidno: Sidno) -> GtidResult<()> {
        let len = self.sidnos.len();
        let wanted = sidno as usize;
        if wanted > len {
            self.sidnos
                .try_reserve(wanted - len)
                .map_err(oom("owned gtids"))?;
            self.sidnos
                .extend((len + 1..=wanted).map(|s| OwnedGnos::new(s as Sidno)));
        }
        Ok(())
    }

    pub fn max_sidno(&self) -> Sidno {
        self.sidnos.len() as Sidno
    }

    fn gnos(&self, sidno: Sidno) -> Option<&OwnedGnos> {
        let index = sidno.checked_sub(1)? as usize;
        self.sidnos.get(index)
    }

    fn gnos_mut(&mut self, sidno: Sidno) -> GtidResult<&mut OwnedGnos> {
        let index = sidno
            .checked_sub(1)
            .ok_or(GtidError::UnknownSidno(sidno))? as usize;
        self.sidnos
            .get_mut(index)
            .ok_or(GtidError::UnknownSidno(sidno))
    }

    /// Claim `gtid` for `owner`; the sidno must have been ensured first
    pub fn add_gtid_owner(&mut self, gtid: Gtid, owner: OwnerId) -> GtidResult<()> {
        self.gnos_mut(gtid.sidno)?.add_owner(gtid.gno, owner)
    }

    /// Release `gtid`; no-op when it is not owned
    pub fn remove_gtid(&mut self, gtid: Gtid) -> Option<OwnerId> {
        self.gnos_mut(gtid.sidno).ok()?.remove(gtid.gno)
    }

    pub fn get_owner(&self, gtid: Gtid) -> Option<OwnerId> {
        self.gnos(gtid.sidno)?.owner(gtid.gno)
    }

    pub fn is_owned_by(&self, gtid: Gtid, owner: OwnerId) -> bool {
        self.get_owner(gtid) == Some(owner)
    }

    pub fn is_empty(&self) -> bool {
        self.sidnos.iter().all(OwnedGnos::is_empty)
    }

    pub fn len(&self) -> usize {
        self.sidnos.iter().map(OwnedGnos::len).sum()
    }

    pub(crate) fn set_gnos(&mut self, gnos: OwnedGnos) -> GtidResult<()> {
        let sidno = gnos.sidno();
        self.ensure_sidno(sidno)?;
        *self.gnos_mut(sidno)? = gnos;
        Ok(())
    }

    /// All `(gtid, owner)` pairs sorted by GTID
    pub fn to_sorted_vec(&self) -> Vec<(Gtid, OwnerId)> {
        let mut all: Vec<(Gtid, OwnerId)> = self
            .sidnos
            .iter()
            .flat_map(|g| g.iter().map(move |(gno, owner)| (Gtid::new(g.sidno(), gno), owner)))
            .collect();
        all.sort_unstable();
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_get_remove() {
        let mut owned = OwnedGtids::new();
        owned.ensure_sidno(2).unwrap();
        let gtid = Gtid::new(2, 10);

        assert_eq!(owned.get_owner(gtid), None);
        owned.add_gtid_owner(gtid, 7).unwrap();
        assert_eq!(owned.get_owner(gtid), Some(7));
        assert!(owned.is_owned_by(gtid, 7));
        assert!(!owned.is_empty());

        assert_eq!(owned.remove_gtid(gtid), Some(7));
        assert!(owned.is_empty());
    }

    #[test]
    fn test_double_claim_is_error() {
        let mut owned = OwnedGtids::new();
        owned.ensure_sidno(1).unwrap();
        owned.add_gtid_owner(Gtid::new(1, 1), 3).unwrap();

        let err = owned.add_gtid_owner(Gtid::new(1, 1), 4).unwrap_err();
        assert!(matches!(err, GtidError::AlreadyOwned { owner: 3, .. }));
        assert_eq!(owned.get_owner(Gtid::new(1, 1)), Some(3));
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut owned = OwnedGtids::new();
        assert_eq!(owned.remove_gtid(Gtid::new(9, 1)), None);
        owned.ensure_sidno(1).unwrap();
        assert_eq!(owned.remove_gtid(Gtid::new(1, 1)), None);
        assert_eq!(owned.remove_gtid(Gtid::new(1, 1)), None);
    }

    #[test]
    fn test_unknown_sidno_rejected() {
        let mut owned = OwnedGtids::new();
        let err = owned.add_gtid_owner(Gtid::new(3, 1), 1).unwrap_err();
        assert!(matches!(err, GtidError::UnknownSidno(3)));
    }

    #[test]
    fn test_sorted_listing() {
        let mut owned = OwnedGtids::new();
        owned.ensure_sidno(2).unwrap();
        owned.add_gtid_owner(Gtid::new(2, 1), 1).unwrap();
        owned.add_gtid_owner(Gtid::new(1, 9), 2).unwrap();
        owned.add_gtid_owner(Gtid::new(1, 3), 3).unwrap();

        assert_eq!(
            owned.to_sorted_vec(),
            vec![
                (Gtid::new(1, 3), 3),
                (Gtid::new(1, 9), 2),
                (Gtid::new(2, 1), 1)
            ]
        );
        assert_eq!(owned.len(), 3);
    }
}
