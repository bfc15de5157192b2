//! Bidirectional Sid <-> sidno mapping
//!
//! Sidnos are handed out densely starting at 1 and are never removed or
//! reused, so every per-sidno array elsewhere only ever grows. The map does no
//! locking of its own: lookups of known sids are done under the global sid
//! lock in read mode, registering a new sid requires it in write mode.

use std::collections::HashMap;

use tracing::debug;

use super::error::{oom, GtidError, GtidResult};
use super::{Sid, Sidno};

#[derive(Debug, Clone, Default)]
pub struct SidMap {
    sid_to_sidno: HashMap<Sid, Sidno>,
    /// Index `sidno - 1`
    sidno_to_sid: Vec<Sid>,
}

impl SidMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the sidno for `sid`, registering it if it is new
    pub fn add(&mut self, sid: Sid) -> GtidResult<Sidno> {
        if let Some(&sidno) = self.sid_to_sidno.get(&sid) {
            return Ok(sidno);
        }

        let sidno = Sidno::try_from(self.sidno_to_sid.len() + 1)
            .map_err(|_| GtidError::OutOfMemory { what: "sid map" })?;
        self.sidno_to_sid.try_reserve(1).map_err(oom("sid map"))?;
        self.sid_to_sidno.try_reserve(1).map_err(oom("sid map"))?;

        self.sidno_to_sid.push(sid);
        self.sid_to_sidno.insert(sid, sidno);
        debug!(%sid, sidno, "Registered source identity");
        Ok(sidno)
    }

    pub fn sid_to_sidno(&self, sid: &Sid) -> Option<Sidno> {
        self.sid_to_sidno.get(sid).copied()
    }

    pub fn sidno_to_sid(&self, sidno: Sidno) -> Option<&Sid> {
        let index = sidno.checked_sub(1)? as usize;
        self.sidno_to_sid.get(index)
    }

    /// Highest sidno handed out so far (0 when empty)
    pub fn max_sidno(&self) -> Sidno {
        self.sidno_to_sid.len() as Sidno
    }

    pub fn len(&self) -> usize {
        self.sidno_to_sid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sidno_to_sid.is_empty()
    }

    /// All sidnos ordered by their Sid value (canonical text order)
    pub fn sorted_sidnos(&self) -> Vec<Sidno> {
        let mut sidnos: Vec<Sidno> = (1..=self.max_sidno()).collect();
        sidnos.sort_by_key(|&sidno| self.sidno_to_sid[sidno as usize - 1]);
        sidnos
    }
}
