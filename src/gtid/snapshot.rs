//! Read-only views of the GTID state for status output

use serde::Serialize;

use super::{GtidResult, GtidState, OwnedGtid, OwnerId, SessionGtidContext, Sid, Sidno};
use crate::config::GtidMode;

/// Point-in-time copy of the server-wide GTID state
#[derive(Debug, Clone, Serialize)]
pub struct GtidStateSnapshot {
    pub server_uuid: Sid,
    pub server_sidno: Sidno,
    pub gtid_mode: GtidMode,
    /// Executed GTIDs (`gtid_executed`)
    pub executed: String,
    /// Purged GTIDs (`gtid_purged`)
    pub purged: String,
    /// In-flight GTIDs, sorted
    pub owned: Vec<OwnedGtidRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnedGtidRow {
    pub gtid: String,
    pub owner: OwnerId,
}

/// One session's GTID variables
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionGtidRow {
    pub connection_id: OwnerId,
    pub next_gtid: String,
    pub next_gtid_list: Option<String>,
    /// What the session currently owns, empty when nothing
    pub owned: String,
}

impl GtidState {
    /// Copy logged, lost and owned state into a serializable snapshot.
    ///
    /// Each part is read under its own locks, so a snapshot taken while
    /// sessions are committing may mix adjacent moments.
    pub fn snapshot(&self) -> GtidResult<GtidStateSnapshot> {
        let executed = self.logged_gtids()?;
        let purged = self.lost_gtids()?;
        let owned = self
            .owned_gtids()?
            .to_sorted_vec()
            .into_iter()
            .map(|(gtid, owner)| OwnedGtidRow {
                gtid: self.gtid_to_text(gtid),
                owner,
            })
            .collect();

        Ok(GtidStateSnapshot {
            server_uuid: self.server_sid(),
            server_sidno: self.server_sidno(),
            gtid_mode: self.gtid_mode(),
            executed: self.gtid_set_to_text(&executed),
            purged: self.gtid_set_to_text(&purged),
            owned,
        })
    }

    pub fn session_row(&self, ctx: &SessionGtidContext) -> SessionGtidRow {
        let owned = match ctx.owned_gtid() {
            OwnedGtid::Nothing => String::new(),
            OwnedGtid::Single(gtid) => self.gtid_to_text(gtid),
            OwnedGtid::Set => self.gtid_set_to_text(ctx.owned_gtid_set()),
        };
        SessionGtidRow {
            connection_id: ctx.owner_id(),
            next_gtid: self.next_gtid_to_text(ctx.next_gtid()),
            next_gtid_list: ctx.next_gtid_set().map(|set| self.gtid_set_to_text(set)),
            owned,
        }
    }
}
