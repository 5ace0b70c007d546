use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::tempdir;

use plume_core::config::LoginSection;
use plume_core::login::{
    CapturedSession, LoginOrchestrator, LoginResult, LoginSurface, SessionStatus,
};
use plume_core::session::{CookieRecord, SessionRecord, SessionStore};

#[derive(Debug, Default)]
struct SurfaceLog {
    applied: usize,
    probes: usize,
    interactive_begun: usize,
    polls: usize,
}

struct FakeLoginSurface {
    probe_result: bool,
    poll_script: VecDeque<bool>,
    log: Rc<RefCell<SurfaceLog>>,
}

impl FakeLoginSurface {
    fn new(probe_result: bool, polls: &[bool]) -> Self {
        Self {
            probe_result,
            poll_script: polls.iter().copied().collect(),
            log: Rc::new(RefCell::new(SurfaceLog::default())),
        }
    }
}

#[async_trait(?Send)]
impl LoginSurface for FakeLoginSurface {
    async fn apply_session(&mut self, _record: &SessionRecord) -> LoginResult<()> {
        self.log.borrow_mut().applied += 1;
        Ok(())
    }

    async fn probe_authenticated(&mut self) -> LoginResult<bool> {
        self.log.borrow_mut().probes += 1;
        Ok(self.probe_result)
    }

    async fn begin_interactive(&mut self) -> LoginResult<Option<String>> {
        self.log.borrow_mut().interactive_begun += 1;
        Ok(Some("cXItcG5n".to_string()))
    }

    async fn poll_authenticated(&mut self) -> LoginResult<bool> {
        self.log.borrow_mut().polls += 1;
        Ok(self.poll_script.pop_front().unwrap_or(false))
    }

    async fn capture_session(&mut self) -> LoginResult<CapturedSession> {
        Ok(CapturedSession {
            cookies: vec![CookieRecord {
                name: "web_session".into(),
                value: "abc123".into(),
                domain: ".social.example".into(),
                path: Some("/".into()),
                expires: None,
                secure: true,
                http_only: true,
            }],
            local_storage: BTreeMap::from([("device_id".to_string(), "d-42".to_string())]),
            account_hint: Some("tester".into()),
        })
    }
}

fn login_section(timeout: u64) -> LoginSection {
    LoginSection {
        interactive_timeout_seconds: timeout,
        poll_interval_seconds: 1,
        probe_timeout_seconds: 5,
        capture_qr: true,
    }
}

fn fresh_record(platform: &str) -> SessionRecord {
    SessionRecord::new(platform, 7)
}

fn aged_record(platform: &str, days: i64) -> SessionRecord {
    let mut record = SessionRecord::new(platform, 7);
    record.created_at = chrono::Utc::now() - chrono::Duration::days(days);
    record
}

#[tokio::test]
async fn fresh_record_with_passing_probe_skips_interactive_login() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SessionStore::new(dir.path(), true).unwrap());
    store.save("rednote", &fresh_record("rednote")).unwrap();
    let before = store.load("rednote").unwrap().unwrap().last_validated_at;

    let orchestrator = LoginOrchestrator::new(Arc::clone(&store), login_section(60), 30);
    let mut surface = FakeLoginSurface::new(true, &[]);
    let log = Rc::clone(&surface.log);

    let status = orchestrator
        .ensure_login("rednote", &mut surface)
        .await
        .unwrap();
    assert_eq!(status, SessionStatus::Valid);
    assert_eq!(log.borrow().interactive_begun, 0);
    assert_eq!(log.borrow().applied, 1);

    let after = store.load("rednote").unwrap().unwrap().last_validated_at;
    assert!(after >= before);
}

#[tokio::test]
async fn stale_record_goes_interactive() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SessionStore::new(dir.path(), true).unwrap());
    store.save("rednote", &aged_record("rednote", 31)).unwrap();

    let orchestrator = LoginOrchestrator::new(Arc::clone(&store), login_section(60), 30);
    let mut surface = FakeLoginSurface::new(true, &[true]);
    let log = Rc::clone(&surface.log);

    let status = orchestrator
        .ensure_login("rednote", &mut surface)
        .await
        .unwrap();
    assert_eq!(status, SessionStatus::Valid);
    // The stale record must never be validated; interactive login runs.
    assert_eq!(log.borrow().applied, 0);
    assert_eq!(log.borrow().interactive_begun, 1);

    // A fresh record replaced the stale one, keeping the fingerprint seed.
    let record = store.load("rednote").unwrap().unwrap();
    assert!(record.age_days() < 1);
    assert_eq!(record.fingerprint_seed, 7);
    assert_eq!(record.cookies.len(), 1);
}

#[tokio::test]
async fn failed_probe_goes_interactive() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SessionStore::new(dir.path(), true).unwrap());
    store.save("rednote", &fresh_record("rednote")).unwrap();

    let orchestrator = LoginOrchestrator::new(Arc::clone(&store), login_section(60), 30);
    let mut surface = FakeLoginSurface::new(false, &[true]);
    let log = Rc::clone(&surface.log);

    let status = orchestrator
        .ensure_login("rednote", &mut surface)
        .await
        .unwrap();
    assert_eq!(status, SessionStatus::Valid);
    assert_eq!(log.borrow().applied, 1);
    assert_eq!(log.borrow().probes, 1);
    assert_eq!(log.borrow().interactive_begun, 1);
}

#[tokio::test(start_paused = true)]
async fn missing_record_goes_interactive() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SessionStore::new(dir.path(), true).unwrap());

    let orchestrator = LoginOrchestrator::new(Arc::clone(&store), login_section(60), 30);
    let mut surface = FakeLoginSurface::new(true, &[false, false, true]);
    let log = Rc::clone(&surface.log);

    let status = orchestrator
        .ensure_login("rednote", &mut surface)
        .await
        .unwrap();
    assert_eq!(status, SessionStatus::Valid);
    assert_eq!(log.borrow().applied, 0);
    assert_eq!(log.borrow().polls, 3);
    assert!(store.load("rednote").unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn interactive_timeout_is_a_bounded_failure() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SessionStore::new(dir.path(), true).unwrap());

    let orchestrator = LoginOrchestrator::new(Arc::clone(&store), login_section(3), 30);
    let mut surface = FakeLoginSurface::new(true, &[]);

    let status = orchestrator
        .ensure_login("rednote", &mut surface)
        .await
        .unwrap();
    assert!(matches!(status, SessionStatus::Failed(_)));
    assert!(store.load("rednote").unwrap().is_none());
}

#[tokio::test]
async fn zero_timeout_returns_awaiting_user() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SessionStore::new(dir.path(), true).unwrap());

    let orchestrator = LoginOrchestrator::new(Arc::clone(&store), login_section(0), 30);
    let mut surface = FakeLoginSurface::new(true, &[]);
    let log = Rc::clone(&surface.log);

    let status = orchestrator
        .ensure_login("rednote", &mut surface)
        .await
        .unwrap();
    assert_eq!(status, SessionStatus::AwaitingUser);
    assert_eq!(log.borrow().interactive_begun, 1);
    assert_eq!(log.borrow().polls, 0);
}

#[tokio::test]
async fn concurrent_callers_share_one_interactive_flow() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SessionStore::new(dir.path(), true).unwrap());

    let orchestrator = LoginOrchestrator::new(Arc::clone(&store), login_section(60), 30);
    let mut winner = FakeLoginSurface::new(true, &[true]);
    let mut waiter = FakeLoginSurface::new(true, &[true]);
    let winner_log = Rc::clone(&winner.log);
    let waiter_log = Rc::clone(&waiter.log);

    let (first, second) = futures::join!(
        orchestrator.ensure_login("rednote", &mut winner),
        orchestrator.ensure_login("rednote", &mut waiter),
    );
    assert_eq!(first.unwrap(), SessionStatus::Valid);
    assert_eq!(second.unwrap(), SessionStatus::Valid);

    // Exactly one caller drove the interactive flow; the other validated the
    // record the winner persisted.
    let total_interactive =
        winner_log.borrow().interactive_begun + waiter_log.borrow().interactive_begun;
    assert_eq!(total_interactive, 1);
}
