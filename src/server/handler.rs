//! Statement hooks for RooDB sessions
//!
//! The executor calls into these at fixed points of a transaction:
//! - `set_gtid_next` / `set_gtid_next_list` when the client changes its directive
//! - `before_statement` before each statement
//! - `on_flush` once the transaction is in the binary log
//! - `on_commit` / `on_rollback` when the transaction ends
//!
//! `run_transaction` strings them together for single-statement transactions.

use thiserror::Error;
use tracing::{debug, warn};

use crate::gtid::{check_claim_size, GtidError, GtidState, RejectReason, StatementVerdict};
use crate::server::session::Session;

#[derive(Error, Debug)]
pub enum StatementError {
    #[error("GTID error: {0}")]
    Gtid(#[from] GtidError),

    #[error("{0}")]
    Rejected(RejectReason),

    /// The directive cannot change while the session owns a GTID
    #[error("Cannot change GTID_NEXT while the session owns a GTID")]
    OwnershipHeld,

    #[error("Statement failed: {0}")]
    Execution(String),
}

pub type StatementResult<T> = Result<T, StatementError>;

/// `SET @@SESSION.GTID_NEXT = '<text>'`
pub fn set_gtid_next(state: &GtidState, session: &mut Session, text: &str) -> StatementResult<()> {
    if session.gtid().owns_gtids() {
        return Err(StatementError::OwnershipHeld);
    }
    let next = state.parse_next_gtid(text)?;
    session.gtid_mut().set_next_gtid(next);
    debug!(connection_id = session.connection_id, gtid_next = text, "GTID_NEXT changed");
    Ok(())
}

/// `SET @@SESSION.GTID_NEXT_LIST = '<set>'`; `None` clears it
pub fn set_gtid_next_list(
    state: &GtidState,
    session: &mut Session,
    text: Option<&str>,
) -> StatementResult<()> {
    if session.gtid().owns_gtids() {
        return Err(StatementError::OwnershipHeld);
    }
    let set = text.map(|t| state.parse_gtid_set(t)).transpose()?;
    if let Some(set) = &set {
        check_claim_size(set)?;
    }
    session.gtid_mut().set_next_gtid_set(set);
    Ok(())
}

/// Ask the GTID state what to do with the next statement
pub fn before_statement(state: &GtidState, session: &mut Session) -> StatementResult<StatementVerdict> {
    let verdict = state.before_statement(session.gtid_mut())?;
    if let StatementVerdict::Cancel(reason) = verdict {
        warn!(connection_id = session.connection_id, %reason, "Statement cancelled");
    }
    Ok(verdict)
}

pub fn on_flush(state: &GtidState, session: &mut Session) -> StatementResult<()> {
    state.update_on_flush(session.gtid_mut())?;
    Ok(())
}

pub fn on_commit(state: &GtidState, session: &mut Session) -> StatementResult<()> {
    state.update_on_commit(session.gtid_mut())?;
    session.end_transaction();
    Ok(())
}

pub fn on_rollback(state: &GtidState, session: &mut Session) -> StatementResult<()> {
    state.update_on_rollback(session.gtid_mut())?;
    session.end_transaction();
    Ok(())
}

/// Run one transaction through the GTID hooks.
///
/// `body` stands in for statement execution and the binary log write. A
/// skipped transaction still goes through commit bookkeeping; a failed
/// body rolls back and releases ownership.
pub fn run_transaction<F>(
    state: &GtidState,
    session: &mut Session,
    body: F,
) -> StatementResult<StatementVerdict>
where
    F: FnOnce(&mut Session) -> Result<(), String>,
{
    let verdict = before_statement(state, session)?;
    match verdict {
        StatementVerdict::Cancel(reason) => return Err(StatementError::Rejected(reason)),
        StatementVerdict::Skip => {
            on_commit(state, session)?;
            return Ok(verdict);
        }
        StatementVerdict::Execute => {}
    }

    session.begin_transaction();
    if let Err(msg) = body(session) {
        on_rollback(state, session)?;
        return Err(StatementError::Execution(msg));
    }

    let flushed = on_flush(state, session);
    if let Err(e) = flushed {
        on_rollback(state, session)?;
        return Err(e);
    }
    on_commit(state, session)?;
    Ok(verdict)
}
