//! Integration tests for GTID ownership, flush/commit/rollback and verdicts

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use roodb_gtid::gtid::{
    AcquireOutcome, Gtid, GtidError, GtidSet, NextGtid, RejectReason, SessionGtidContext,
    StatementVerdict,
};
use roodb_gtid::server::handler::{self, StatementError};
use roodb_gtid::{GtidConfig, GtidMode, GtidState, ServerContext};

const SERVER_UUID: &str = "aaaaaaaa-0000-4000-8000-000000000001";
const OTHER_UUID: &str = "bbbbbbbb-0000-4000-8000-000000000002";

fn new_state() -> GtidState {
    GtidState::new(&GtidConfig::new().with_server_uuid(SERVER_UUID.parse().unwrap())).unwrap()
}

fn commit(state: &GtidState, ctx: &mut SessionGtidContext) {
    state.update_on_flush(ctx).unwrap();
    state.update_on_commit(ctx).unwrap();
}

// ============ Scenarios ============

#[test]
fn test_blocked_session_skips_after_commit() {
    let state = new_state();
    let gtid = Gtid::new(1, 5);

    let mut a = SessionGtidContext::new(1);
    a.set_next_gtid(NextGtid::Explicit(gtid));
    assert_eq!(state.before_statement(&mut a).unwrap(), StatementVerdict::Execute);

    thread::scope(|s| {
        let (tx, rx) = mpsc::channel();
        let state = &state;
        s.spawn(move || {
            let mut b = SessionGtidContext::new(2);
            b.set_next_gtid(NextGtid::Explicit(gtid));
            tx.send(state.before_statement(&mut b).unwrap()).unwrap();
        });

        // B must still be blocked while A owns the GTID
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(state.get_owner(gtid), Some(1));

        commit(state, &mut a);
        let verdict = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(verdict, StatementVerdict::Skip);
    });
    assert!(state.is_logged(gtid));
    assert_eq!(state.get_owner(gtid), None);
}

#[test]
fn test_automatic_gno_reused_after_rollback() {
    let state = new_state();

    let mut a = SessionGtidContext::new(1);
    assert_eq!(state.acquire_automatic(&mut a).unwrap(), Gtid::new(1, 1));
    state.update_on_rollback(&mut a).unwrap();
    assert_eq!(state.get_owner(Gtid::new(1, 1)), None);

    let mut b = SessionGtidContext::new(2);
    assert_eq!(state.acquire_automatic(&mut b).unwrap(), Gtid::new(1, 1));
}

#[test]
fn test_automatic_past_seeded_interval() {
    let state = GtidState::new(
        &GtidConfig::new()
            .with_server_uuid(SERVER_UUID.parse().unwrap())
            .with_gtid_executed(format!("{}:1-10", OTHER_UUID)),
    )
    .unwrap();
    let sidno = state.sid_to_sidno(&OTHER_UUID.parse().unwrap()).unwrap();
    assert_eq!(sidno, 2);
    assert_eq!(state.get_automatic_gno(sidno).unwrap(), 10);
    // The server's own sidno is untouched
    assert_eq!(state.get_automatic_gno(1).unwrap(), 1);
}

#[test]
fn test_set_lost_refused_while_owned() {
    let state = new_state();
    let mut a = SessionGtidContext::new(1);
    state.acquire_ownership_single(&mut a, Gtid::new(1, 3)).unwrap();

    let lost = state.parse_gtid_set(&format!("{}:1-3", OTHER_UUID)).unwrap();
    let err = state.set_lost(&lost).unwrap_err();
    assert!(matches!(err, GtidError::HistoryNotEmpty));
    assert!(state.lost_gtids().unwrap().is_empty());
    assert!(state.logged_gtids().unwrap().is_empty());
}

// ============ Properties ============

#[test]
fn test_automatic_allocation_never_repeats() {
    let state = new_state();
    let mut seen = std::collections::HashSet::new();
    for i in 0..500u32 {
        let mut ctx = SessionGtidContext::new(i % 7 + 1);
        let gtid = state.acquire_automatic(&mut ctx).unwrap();
        assert!(seen.insert(gtid.gno), "gno {} handed out twice", gtid.gno);
        commit(&state, &mut ctx);
    }
    assert_eq!(
        state.gtid_set_to_text(&state.logged_gtids().unwrap()),
        format!("{}:1-501", SERVER_UUID)
    );
}

#[test]
fn test_rollback_releases_for_second_session() {
    let state = new_state();
    let gtid = Gtid::new(1, 42);

    let mut a = SessionGtidContext::new(1);
    state.acquire_ownership_single(&mut a, gtid).unwrap();
    state.update_on_rollback(&mut a).unwrap();
    assert_eq!(state.get_owner(gtid), None);

    let mut b = SessionGtidContext::new(2);
    assert_eq!(
        state.acquire_ownership_single(&mut b, gtid).unwrap(),
        AcquireOutcome::Acquired
    );
    assert_eq!(state.get_owner(gtid), Some(2));
}

#[test]
fn test_commit_makes_permanent() {
    let state = new_state();
    let gtid = Gtid::new(1, 8);

    let mut a = SessionGtidContext::new(1);
    state.acquire_ownership_single(&mut a, gtid).unwrap();
    commit(&state, &mut a);
    assert!(state.is_logged(gtid));
    assert_eq!(state.get_owner(gtid), None);
    assert!(state.owned_gtids().unwrap().is_empty());

    let mut b = SessionGtidContext::new(2);
    assert_eq!(
        state.acquire_ownership_single(&mut b, gtid).unwrap(),
        AcquireOutcome::AlreadyLogged
    );
    assert!(!b.owns_gtids());
}

#[test]
fn test_commit_without_flush_releases() {
    let state = new_state();
    let gtid = Gtid::new(1, 2);
    let mut a = SessionGtidContext::new(1);
    state.acquire_ownership_single(&mut a, gtid).unwrap();
    state.update_on_commit(&mut a).unwrap();
    assert_eq!(state.get_owner(gtid), None);
    assert!(!state.is_logged(gtid));
}

// ============ Verdict Rules ============

#[test]
fn test_verdict_undefined() {
    let state = new_state();
    let mut ctx = SessionGtidContext::new(1);
    ctx.set_next_gtid(NextGtid::Undefined);
    assert_eq!(
        state.before_statement(&mut ctx).unwrap(),
        StatementVerdict::Cancel(RejectReason::UndefinedNextGtid)
    );
}

#[test]
fn test_verdict_automatic_with_set() {
    let state = new_state();
    let mut ctx = SessionGtidContext::new(1);
    ctx.set_next_gtid_set(Some(state.parse_gtid_set(&format!("{}:1-3", SERVER_UUID)).unwrap()));
    assert_eq!(
        state.before_statement(&mut ctx).unwrap(),
        StatementVerdict::Cancel(RejectReason::AutomaticWithSet)
    );
}

#[test]
fn test_verdict_explicit_outside_set() {
    let state = new_state();
    let mut ctx = SessionGtidContext::new(1);
    ctx.set_next_gtid_set(Some(state.parse_gtid_set(&format!("{}:1-3", SERVER_UUID)).unwrap()));
    ctx.set_next_gtid(NextGtid::Explicit(Gtid::new(1, 9)));
    assert_eq!(
        state.before_statement(&mut ctx).unwrap(),
        StatementVerdict::Cancel(RejectReason::GtidNotInSet)
    );
    assert!(!ctx.owns_gtids());
}

#[test]
fn test_verdict_mode_off_rejects_explicit() {
    let state = GtidState::new(&GtidConfig::new().with_gtid_mode(GtidMode::Off)).unwrap();
    let mut ctx = SessionGtidContext::new(1);
    ctx.set_next_gtid(NextGtid::Explicit(Gtid::new(1, 1)));
    assert_eq!(
        state.before_statement(&mut ctx).unwrap(),
        StatementVerdict::Cancel(RejectReason::ExplicitWhenGtidModeOff)
    );

    ctx.set_next_gtid(NextGtid::Anonymous);
    assert_eq!(state.before_statement(&mut ctx).unwrap(), StatementVerdict::Execute);
    assert!(!ctx.owns_gtids());
}

#[test]
fn test_multi_statement_transaction_keeps_ownership() {
    let state = new_state();
    let mut ctx = SessionGtidContext::new(1);
    assert_eq!(state.before_statement(&mut ctx).unwrap(), StatementVerdict::Execute);
    let owned = ctx.owned_gtid();
    assert_eq!(state.before_statement(&mut ctx).unwrap(), StatementVerdict::Execute);
    assert_eq!(ctx.owned_gtid(), owned);
    assert_eq!(state.owned_gtids().unwrap().len(), 1);
}

// ============ Set Acquisition ============

#[test]
fn test_set_acquisition_claims_unlogged_members() {
    let state = new_state();
    state
        .set_lost_from_text(&format!("{}:1-3", SERVER_UUID))
        .unwrap();

    let mut ctx = SessionGtidContext::new(1);
    let set = state
        .parse_gtid_set(&format!("{}:1-6,{}:4", SERVER_UUID, OTHER_UUID))
        .unwrap();
    ctx.set_next_gtid_set(Some(set.clone()));
    ctx.set_next_gtid(NextGtid::Explicit(Gtid::new(1, 4)));

    assert_eq!(state.before_statement(&mut ctx).unwrap(), StatementVerdict::Execute);
    assert_eq!(
        state.gtid_set_to_text(ctx.owned_gtid_set()),
        format!("{}:3-6,{}:4", SERVER_UUID, OTHER_UUID)
    );
    assert_eq!(state.get_owner(Gtid::new(1, 1)), None);
    assert_eq!(state.get_owner(Gtid::new(1, 5)), Some(1));
    assert_eq!(state.get_owner(Gtid::new(2, 4)), Some(1));

    commit(&state, &mut ctx);
    assert!(set.is_subset(&state.logged_gtids().unwrap()));
    assert!(state.owned_gtids().unwrap().is_empty());
    // Explicit directives are used up by the flush
    assert_eq!(ctx.next_gtid(), NextGtid::Undefined);
    assert!(ctx.next_gtid_set().is_none());
}

#[test]
fn test_set_acquisition_all_logged_skips() {
    let state = new_state();
    state
        .set_lost_from_text(&format!("{}:1-10", SERVER_UUID))
        .unwrap();

    let mut ctx = SessionGtidContext::new(1);
    let mut set = GtidSet::new();
    set.add_interval(1, 2, 5).unwrap();
    assert_eq!(
        state.acquire_ownership_multiple(&mut ctx, &set).unwrap(),
        AcquireOutcome::AlreadyLogged
    );
    assert!(!ctx.owns_gtids());
}

#[test]
fn test_set_acquisition_rollback_releases_everything() {
    let state = new_state();
    let set = state
        .parse_gtid_set(&format!("{}:1-4,{}:1-4", SERVER_UUID, OTHER_UUID))
        .unwrap();

    let mut a = SessionGtidContext::new(1);
    state.acquire_ownership_multiple(&mut a, &set).unwrap();
    assert_eq!(state.owned_gtids().unwrap().len(), 6);

    state.update_on_rollback(&mut a).unwrap();
    assert!(state.owned_gtids().unwrap().is_empty());
    assert!(state.logged_gtids().unwrap().is_empty());
}

// ============ Lost / Reset ============

#[test]
fn test_purge_history() {
    let state = new_state();
    let mut ctx = SessionGtidContext::new(1);
    for _ in 0..5 {
        state.acquire_automatic(&mut ctx).unwrap();
        commit(&state, &mut ctx);
    }
    let purge = state.parse_gtid_set(&format!("{}:1-3", SERVER_UUID)).unwrap();
    state.add_purged(&purge).unwrap();
    assert!(state.is_lost(Gtid::new(1, 2)));
    assert!(!state.is_lost(Gtid::new(1, 3)));
    // Purged GTIDs stay logged
    assert!(state.is_logged(Gtid::new(1, 2)));
    assert_eq!(state.get_automatic_gno(1).unwrap(), 6);

    state.reset().unwrap();
    assert!(state.lost_gtids().unwrap().is_empty());
    assert_eq!(state.get_automatic_gno(1).unwrap(), 1);
}

// ============ Server Context / Channels ============

#[test]
fn test_channel_and_session_share_state() {
    let server = ServerContext::init(
        &GtidConfig::new().with_server_uuid(SERVER_UUID.parse().unwrap()),
    )
    .unwrap();
    let state = server.gtid_state();
    let channel = server.create_channel("upstream").unwrap();

    let gtid = state
        .parse_next_gtid(&format!("{}:1", OTHER_UUID))
        .map(|next| match next {
            NextGtid::Explicit(gtid) => gtid,
            other => panic!("unexpected {:?}", other),
        })
        .unwrap();
    channel
        .apply(state, gtid, || Ok::<_, GtidError>(()))
        .unwrap();

    let mut session = server.new_session();
    handler::set_gtid_next(state, &mut session, &format!("{}:1", OTHER_UUID)).unwrap();
    let verdict = handler::run_transaction(state, &mut session, |_| Ok(())).unwrap();
    assert_eq!(verdict, StatementVerdict::Skip);

    assert!(matches!(
        server.channels().remove("upstream"),
        Err(roodb_gtid::server::ChannelError::InUse { .. })
    ));
    drop(channel);
    server.channels().remove("upstream").unwrap();
}

#[test]
fn test_handler_rejection_surfaces_reason() {
    let state = new_state();
    let mut session = roodb_gtid::server::Session::new(9);
    session.gtid_mut().set_next_gtid(NextGtid::Undefined);
    let err = handler::run_transaction(&state, &mut session, |_| Ok(())).unwrap_err();
    assert!(matches!(
        err,
        StatementError::Rejected(RejectReason::UndefinedNextGtid)
    ));
    assert_eq!(
        err.to_string(),
        "@@SESSION.GTID_NEXT is UNDEFINED; set it before the next statement"
    );
}
