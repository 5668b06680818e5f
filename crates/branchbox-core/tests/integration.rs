use branchbox_core::{Config, Engine, ErrorKind};
use branchbox_runtime::mock::{MockDriver, FAIL_MARKER};
use branchbox_store::{StateStore, StoreLayout, WriteAheadLog};
use branchbox_tunnel::{MockTunnel, OpenedTunnel, TunnelError, TunnelProvider};
use branchbox_vcs::MockVcs;
use chrono::{Duration, Utc};
use std::path::Path;
use std::sync::Arc;

const SHA: &str = "abc1234def5678900";

fn test_config(base: &Path) -> Config {
    let mut config = Config::default();
    config.base_dir = base.to_path_buf();
    config.driver.driver = "mock".to_owned();
    config.port_range = (8100, 8110);
    config
}

fn mock_vcs() -> MockVcs {
    MockVcs::new()
        .with_branch("feature/x", SHA)
        .with_branch("main", "1234567fffeee")
        .with_branch("fix/login", "7654321aabbcc")
        .with_branch("chore/deps", "9999999aabbcc")
}

fn mock_engine(base: &Path) -> Engine {
    Engine::with_collaborators(
        test_config(base),
        Box::new(mock_vcs()),
        Box::new(MockTunnel::new()),
    )
    .unwrap()
}

/// Delegating wrapper so tests keep a handle on the tunnel the engine owns.
struct SharedTunnel(Arc<MockTunnel>);

impl TunnelProvider for SharedTunnel {
    fn open(&self, port: u16) -> Result<OpenedTunnel, TunnelError> {
        self.0.open(port)
    }

    fn close(&self, pid: u32) {
        self.0.close(pid);
    }
}

fn raw_store(base: &Path) -> StateStore {
    StateStore::open(StoreLayout::new(base)).unwrap()
}

#[test]
fn provision_commits_running_record() {
    let dir = tempfile::tempdir().unwrap();
    let engine = mock_engine(dir.path());

    let store = raw_store(dir.path());
    assert!(store.list_all().unwrap().is_empty());

    let receipt = engine.provision("feature/x", "web", Some(10)).unwrap();
    assert!(receipt.env_id.starts_with("feature-x-abc1234-"));
    assert_eq!(receipt.commit, SHA);
    assert!(receipt.url.contains("mock.example"));

    let record = store.get(&receipt.env_id).unwrap();
    assert_eq!(record.state, branchbox_store::EnvState::Running);
    assert_eq!(record.branch, "feature/x");
    assert_eq!(record.service, "web");
    assert!(record.commit.starts_with("abc1234"));
    assert!(record.workdir.exists());
    assert!(MockDriver::is_running(&record.workdir));

    // expires_at ≈ now + 600s
    let delta = (record.expires_at - Utc::now()).num_seconds();
    assert!((540..=600).contains(&delta), "delta was {delta}");
}

#[test]
fn list_reports_requested_ttl() {
    let dir = tempfile::tempdir().unwrap();
    let engine = mock_engine(dir.path());

    let receipt = engine.provision("feature/x", "web", Some(10)).unwrap();
    let envs = engine.list().unwrap();
    assert_eq!(envs.len(), 1);
    assert_eq!(envs[0].record.env_id, receipt.env_id);
    assert!(
        (9..=10).contains(&envs[0].minutes_remaining),
        "minutes_remaining was {}",
        envs[0].minutes_remaining
    );
}

#[test]
fn unknown_branch_leaves_no_trace() {
    let dir = tempfile::tempdir().unwrap();
    let engine = mock_engine(dir.path());

    let err = engine.provision("gone/branch", "web", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    assert!(raw_store(dir.path()).list_all().unwrap().is_empty());
    let workdirs = StoreLayout::new(dir.path()).workdirs_dir();
    assert_eq!(std::fs::read_dir(workdirs).unwrap().count(), 0);
}

#[test]
fn unlisted_service_is_invalid_input() {
    let dir = tempfile::tempdir().unwrap();
    let engine = mock_engine(dir.path());

    let err = engine.provision("feature/x", "db", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(raw_store(dir.path()).list_all().unwrap().is_empty());
}

#[test]
fn empty_branch_is_invalid_input() {
    let dir = tempfile::tempdir().unwrap();
    let engine = mock_engine(dir.path());
    let err = engine.provision("  ", "web", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn non_positive_ttl_falls_back_to_default() {
    let dir = tempfile::tempdir().unwrap();
    let engine = mock_engine(dir.path());

    let receipt = engine.provision("feature/x", "web", Some(0)).unwrap();
    let record = raw_store(dir.path()).get(&receipt.env_id).unwrap();
    let minutes = (record.expires_at - record.created_at).num_minutes();
    assert_eq!(minutes, 120);
}

#[test]
fn destroy_removes_record_workdir_and_tunnel() {
    let dir = tempfile::tempdir().unwrap();
    let tunnel = Arc::new(MockTunnel::new());
    let engine = Engine::with_collaborators(
        test_config(dir.path()),
        Box::new(mock_vcs()),
        Box::new(SharedTunnel(Arc::clone(&tunnel))),
    )
    .unwrap();

    let receipt = engine.provision("feature/x", "web", None).unwrap();
    let record = raw_store(dir.path()).get(&receipt.env_id).unwrap();
    let workdir = record.workdir.clone();
    let pid = record.tunnel_pid.unwrap();

    engine.destroy(&receipt.env_id).unwrap();

    assert!(!raw_store(dir.path()).contains(&receipt.env_id));
    assert!(!workdir.exists());
    assert_eq!(tunnel.closed_pids(), vec![pid]);
}

#[test]
fn destroy_unknown_id_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let engine = mock_engine(dir.path());
    let err = engine.destroy("nope").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn destroy_twice_second_observes_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let engine = mock_engine(dir.path());

    let receipt = engine.provision("feature/x", "web", None).unwrap();
    engine.destroy(&receipt.env_id).unwrap();

    let err = engine.destroy(&receipt.env_id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn concurrent_destroys_race_safely() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(mock_engine(dir.path()));
    let receipt = engine.provision("feature/x", "web", None).unwrap();

    let barrier = Arc::new(std::sync::Barrier::new(2));
    let mut handles = Vec::new();
    for _ in 0..2 {
        let engine = Arc::clone(&engine);
        let env_id = receipt.env_id.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(std::thread::spawn(move || {
            barrier.wait();
            engine.destroy(&env_id)
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(()) => successes += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::NotFound),
        }
    }
    assert!(successes >= 1, "at least one destroy must succeed");
    assert!(!raw_store(dir.path()).contains(&receipt.env_id));
}

#[test]
fn launch_failure_rolls_back_completely() {
    let dir = tempfile::tempdir().unwrap();
    let vcs = mock_vcs().with_files(vec![
        ("Dockerfile".to_owned(), "FROM scratch\n".to_owned()),
        (FAIL_MARKER.to_owned(), String::new()),
    ]);
    let engine = Engine::with_collaborators(
        test_config(dir.path()),
        Box::new(vcs),
        Box::new(MockTunnel::new()),
    )
    .unwrap();

    let err = engine.provision("feature/x", "web", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CommandFailed);

    // No record, no workdir, no pending WAL entry
    assert!(raw_store(dir.path()).list_all().unwrap().is_empty());
    let layout = StoreLayout::new(dir.path());
    assert_eq!(std::fs::read_dir(layout.workdirs_dir()).unwrap().count(), 0);
    let wal = WriteAheadLog::new(&layout);
    assert!(wal.list_incomplete().unwrap().is_empty());
}

#[test]
fn tunnel_failure_tears_down_started_stack() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::with_collaborators(
        test_config(dir.path()),
        Box::new(mock_vcs()),
        Box::new(MockTunnel::failing()),
    )
    .unwrap();

    let err = engine.provision("feature/x", "web", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TunnelUnavailable);

    assert!(raw_store(dir.path()).list_all().unwrap().is_empty());
    let layout = StoreLayout::new(dir.path());
    assert_eq!(std::fs::read_dir(layout.workdirs_dir()).unwrap().count(), 0);
}

#[test]
fn port_exhaustion_is_conflict_and_unwinds() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.port_range = (8100, 8101);
    let engine = Engine::with_collaborators(
        config,
        Box::new(mock_vcs()),
        Box::new(MockTunnel::new()),
    )
    .unwrap();

    engine.provision("feature/x", "web", None).unwrap();
    engine.provision("main", "web", None).unwrap();
    let err = engine.provision("fix/login", "web", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // The failed attempt left nothing behind
    assert_eq!(raw_store(dir.path()).list_all().unwrap().len(), 2);
    let layout = StoreLayout::new(dir.path());
    assert_eq!(std::fs::read_dir(layout.workdirs_dir()).unwrap().count(), 2);
}

#[test]
fn concurrent_provisions_get_distinct_ports_and_workdirs() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(mock_engine(dir.path()));

    let branches = ["feature/x", "main", "fix/login", "chore/deps"];
    let barrier = Arc::new(std::sync::Barrier::new(branches.len()));
    let mut handles = Vec::new();
    for branch in branches {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        handles.push(std::thread::spawn(move || {
            barrier.wait();
            engine.provision(branch, "web", None).unwrap()
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let records = raw_store(dir.path()).list_all().unwrap();
    assert_eq!(records.len(), 4);

    let ports: std::collections::HashSet<u16> = records.iter().map(|r| r.port).collect();
    assert_eq!(ports.len(), 4, "no two running records may share a port");

    let workdirs: std::collections::HashSet<_> =
        records.iter().map(|r| r.workdir.clone()).collect();
    assert_eq!(workdirs.len(), 4);
}

#[test]
fn gc_spares_unexpired_environments() {
    let dir = tempfile::tempdir().unwrap();
    let engine = mock_engine(dir.path());

    let receipt = engine.provision("feature/x", "web", Some(10)).unwrap();
    let report = engine.garbage_collect().unwrap();
    assert!(report.destroyed.is_empty());
    assert!(report.failed.is_empty());
    assert!(raw_store(dir.path()).contains(&receipt.env_id));
}

#[test]
fn gc_reclaims_expired_environment_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let engine = mock_engine(dir.path());

    let receipt = engine.provision("feature/x", "web", Some(10)).unwrap();

    // Artificially expire the record
    let store = raw_store(dir.path());
    let mut record = store.get(&receipt.env_id).unwrap();
    store.delete(&receipt.env_id).unwrap();
    record.expires_at = Utc::now() - Duration::minutes(1);
    record.checksum = None;
    store.create(&record).unwrap();

    let report = engine.garbage_collect().unwrap();
    assert_eq!(report.destroyed, vec![receipt.env_id.clone()]);
    assert!(!store.contains(&receipt.env_id));
    assert!(!record.workdir.exists());

    // Sweep again: nothing left to collect
    let report = engine.garbage_collect().unwrap();
    assert!(report.destroyed.is_empty());
}

#[test]
fn gc_boundary_one_second_in_the_future_survives() {
    let dir = tempfile::tempdir().unwrap();
    let engine = mock_engine(dir.path());

    let receipt = engine.provision("feature/x", "web", Some(60)).unwrap();
    let store = raw_store(dir.path());
    let mut record = store.get(&receipt.env_id).unwrap();
    store.delete(&receipt.env_id).unwrap();
    record.expires_at = Utc::now() + Duration::seconds(1);
    record.checksum = None;
    store.create(&record).unwrap();

    let report = engine.garbage_collect().unwrap();
    assert!(report.destroyed.is_empty());
    assert!(store.contains(&receipt.env_id));
}

#[test]
fn interrupted_destroy_is_finished_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let workdir;
    let env_id;
    {
        let engine = mock_engine(dir.path());
        let receipt = engine.provision("feature/x", "web", None).unwrap();
        env_id = receipt.env_id;

        let store = raw_store(dir.path());
        let record = store.mark_destroying(&env_id).unwrap().unwrap();
        workdir = record.workdir;
        // Crash here: claim persisted, cleanup never ran
    }

    let _engine = mock_engine(dir.path());
    let store = raw_store(dir.path());
    assert!(!store.contains(&env_id), "restart must finish the destroy");
    assert!(!workdir.exists());
}

#[test]
fn crashed_provision_is_rolled_back_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StoreLayout::new(dir.path());
    layout.initialize().unwrap();

    // Simulate a provision that died after workdir creation + checkout
    let workdir = layout.workdir_path("main-1234567-deadbe");
    std::fs::create_dir_all(&workdir).unwrap();
    std::fs::write(workdir.join("Dockerfile"), "FROM scratch\n").unwrap();
    let wal = WriteAheadLog::new(&layout);
    wal.initialize().unwrap();
    let op = wal
        .begin(branchbox_store::WalOpKind::Provision, "main-1234567-deadbe")
        .unwrap();
    wal.add_rollback_step(&op, branchbox_store::RollbackStep::RemoveDir(workdir.clone()))
        .unwrap();

    let _engine = mock_engine(dir.path());
    assert!(!workdir.exists(), "orphaned workdir must be rolled back");
    assert!(wal.list_incomplete().unwrap().is_empty());
}

// The end-to-end walk from the original service's happy path: provision,
// observe, destroy, sweep.
#[test]
fn full_lifecycle_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let engine = mock_engine(dir.path());

    let receipt = engine.provision("feature/x", "web", Some(10)).unwrap();
    assert!(receipt.commit.starts_with("abc1234"));
    let delta = (receipt.expires_at - Utc::now()).num_seconds();
    assert!((540..=600).contains(&delta));

    let envs = engine.list().unwrap();
    assert_eq!(envs.len(), 1);
    assert_eq!(envs[0].record.branch, "feature/x");

    // GC before expiry leaves it alone
    assert!(engine.garbage_collect().unwrap().destroyed.is_empty());

    let workdir = envs[0].record.workdir.clone();
    engine.destroy(&receipt.env_id).unwrap();
    assert!(!raw_store(dir.path()).contains(&receipt.env_id));
    assert!(!workdir.exists());
    assert!(engine.list().unwrap().is_empty());
}
