use crate::concurrency::StoreLock;
use crate::config::Config;
use crate::identity::derive_env_id;
use crate::lifecycle::validate_transition;
use crate::{CoreError, ErrorKind};
use branchbox_runtime::{detect_stack, select_driver, StackDriver, StackKind};
use branchbox_store::{
    validate_service_name, EnvRecord, EnvState, RollbackStep, StateStore, StoreError, StoreLayout,
    WalOpKind, WriteAheadLog,
};
use branchbox_tunnel::TunnelProvider;
use branchbox_vcs::VcsClient;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Central orchestrator for the preview environment lifecycle.
///
/// Coordinates the state store, VCS client, stack drivers, and tunnel
/// provider to provide provision, destroy, list, and garbage-collect
/// operations. Shared behind `Arc` by the transports; every method takes
/// `&self` and is safe to call from concurrent request handlers.
pub struct Engine {
    config: Config,
    layout: StoreLayout,
    store: StateStore,
    wal: WriteAheadLog,
    vcs: Box<dyn VcsClient>,
    tunnel: Box<dyn TunnelProvider>,
}

/// What a successful provision hands back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReceipt {
    pub env_id: String,
    pub url: String,
    pub commit: String,
    pub expires_at: DateTime<Utc>,
}

/// One environment as reported by `list`.
#[derive(Debug, Clone, Serialize)]
pub struct EnvSummary {
    #[serde(flatten)]
    pub record: EnvRecord,
    pub minutes_remaining: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GcFailure {
    pub env_id: String,
    pub error: String,
}

/// Outcome of one garbage-collection sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GcReport {
    pub destroyed: Vec<String>,
    pub failed: Vec<GcFailure>,
}

impl Engine {
    /// Create an engine with the real GitHub and ngrok collaborators.
    pub fn new(config: Config) -> Result<Self, CoreError> {
        let vcs = Box::new(branchbox_vcs::GithubClient::new(config.vcs.clone()));
        let tunnel = Box::new(branchbox_tunnel::NgrokTunnel::new(config.tunnel.clone()));
        Self::with_collaborators(config, vcs, tunnel)
    }

    /// Create an engine with explicit collaborators (tests, other VCS/tunnel
    /// backends).
    ///
    /// On construction, incomplete WAL entries from previous runs are rolled
    /// back and destroys interrupted mid-flight are finished, unless another
    /// process holds the store lock.
    pub fn with_collaborators(
        config: Config,
        vcs: Box<dyn VcsClient>,
        tunnel: Box<dyn TunnelProvider>,
    ) -> Result<Self, CoreError> {
        let layout = StoreLayout::new(&config.base_dir);
        let store = StateStore::open(layout.clone())?;
        let wal = WriteAheadLog::new(&layout);
        wal.initialize()?;

        let engine = Self {
            config,
            layout,
            store,
            wal,
            vcs,
            tunnel,
        };

        // Recovery mutates the store; skip it while another process holds
        // the lock.
        match StoreLock::try_acquire(&engine.layout.lock_file()) {
            Ok(Some(_lock)) => {
                if let Err(e) = engine.wal.recover() {
                    warn!("WAL recovery failed: {e}");
                }
                engine.finish_stranded_destroys();
            }
            Ok(None) => {
                debug!("store lock held; skipping startup recovery");
            }
            Err(e) => {
                warn!("store lock check failed; skipping startup recovery: {e}");
            }
        }

        Ok(engine)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Provision a preview environment for `branch`.
    ///
    /// Either the environment reaches `Running` and its record is committed
    /// atomically, or every resource created along the way is unwound and
    /// the original error surfaces. Nothing in between is ever observable.
    pub fn provision(
        &self,
        branch: &str,
        service: &str,
        ttl_minutes: Option<i64>,
    ) -> Result<ProvisionReceipt, CoreError> {
        if branch.trim().is_empty() {
            return Err(CoreError::InvalidInput("branch must not be empty".to_owned()));
        }
        if !self.config.allowed_services.iter().any(|s| s == service) {
            return Err(CoreError::InvalidInput(format!(
                "unknown service '{service}', allowed: {}",
                self.config.allowed_services.join(", ")
            )));
        }
        validate_service_name(service)?;

        let commit = self.vcs.resolve_branch(branch)?;
        let env_id = derive_env_id(branch, &commit);
        info!(
            "provisioning {env_id} from {branch}@{}",
            &commit[..7.min(commit.len())]
        );

        let workdir = self.layout.workdir_path(&env_id);

        // Register rollback before creating side effects.
        let wal_op = self.wal.begin(WalOpKind::Provision, &env_id)?;
        self.wal
            .add_rollback_step(&wal_op, RollbackStep::RemoveDir(workdir.clone()))?;

        // Exclusive workdir creation doubles as the earliest id-collision
        // check. A pre-existing directory belongs to someone else, so the
        // pending rollback must be discarded, not executed.
        match fs::create_dir(&workdir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = self.wal.commit(&wal_op);
                return Err(CoreError::Store(StoreError::Conflict(env_id)));
            }
            Err(e) => {
                let _ = self.wal.commit(&wal_op);
                return Err(e.into());
            }
        }

        if let Err(e) = self.vcs.checkout(&workdir, branch) {
            self.unwind(&wal_op, &env_id, &workdir, None, None);
            return Err(e.into());
        }

        let kind = detect_stack(&workdir, &self.config.driver.compose_file);
        debug!("{env_id}: detected {kind} stack");
        let driver = match select_driver(&self.config.driver, kind) {
            Ok(d) => d,
            Err(e) => {
                self.unwind(&wal_op, &env_id, &workdir, None, None);
                return Err(e.into());
            }
        };

        let (lo, hi) = self.config.port_range;
        let lease = match self.store.reserve_port(lo, hi) {
            Ok(lease) => lease,
            Err(e) => {
                self.unwind(&wal_op, &env_id, &workdir, None, None);
                return Err(e.into());
            }
        };

        // Registered before launch so a crash between the two still tears
        // the stack down on recovery.
        let (program, args, cwd) = driver.teardown_command(&workdir, &env_id);
        if let Err(e) =
            self.wal
                .add_rollback_step(&wal_op, RollbackStep::RunCommand { program, args, cwd })
        {
            self.unwind(&wal_op, &env_id, &workdir, None, None);
            return Err(e.into());
        }

        if let Err(e) = driver.launch(&workdir, &env_id, lease.port()) {
            self.unwind(&wal_op, &env_id, &workdir, Some(driver.as_ref()), None);
            return Err(e.into());
        }

        let opened = match self.tunnel.open(lease.port()) {
            Ok(opened) => opened,
            Err(e) => {
                self.unwind(&wal_op, &env_id, &workdir, Some(driver.as_ref()), None);
                return Err(e.into());
            }
        };

        let created_at = Utc::now();
        let ttl = self.config.effective_ttl(ttl_minutes);
        let expires_at = created_at + Duration::minutes(ttl);

        let record = EnvRecord {
            env_id: env_id.clone(),
            branch: branch.to_owned(),
            commit: commit.clone(),
            service: service.to_owned(),
            workdir: workdir.clone(),
            public_url: opened.public_url.clone(),
            port: lease.port(),
            tunnel_pid: opened.pid,
            created_at,
            expires_at,
            state: EnvState::Running,
            checksum: None,
        };

        let commit_result = validate_transition(EnvState::Provisioning, EnvState::Running)
            .and_then(|()| self.store.create(&record).map_err(CoreError::from));
        if let Err(e) = commit_result {
            self.unwind(
                &wal_op,
                &env_id,
                &workdir,
                Some(driver.as_ref()),
                opened.pid,
            );
            return Err(e);
        }

        self.wal.commit(&wal_op)?;
        drop(lease);

        info!("environment {env_id} running at {}", opened.public_url);
        Ok(ProvisionReceipt {
            env_id,
            url: opened.public_url,
            commit,
            expires_at,
        })
    }

    /// Destroy an environment. Unknown ids fail with `NotFound`; an id
    /// already being destroyed by a racing call is treated as done. Cleanup
    /// is best-effort and never blocks removal of the record.
    pub fn destroy(&self, env_id: &str) -> Result<(), CoreError> {
        let claimed = self.store.mark_destroying(env_id).map_err(|e| match e {
            StoreError::EnvNotFound(id) => CoreError::EnvNotFound(id),
            other => other.into(),
        })?;
        let Some(record) = claimed else {
            debug!("destroy of {env_id} already in flight; treating as done");
            return Ok(());
        };

        info!("destroying {env_id}");
        let failures = self.cleanup_record(&record);
        if !failures.is_empty() {
            warn!(
                "cleanup of {env_id} incomplete ({}); removing record anyway",
                failures.join("; ")
            );
        }

        self.store.delete(env_id)?;
        info!("environment {env_id} destroyed");
        Ok(())
    }

    /// Snapshot of all environments with derived minutes-to-expiry.
    pub fn list(&self) -> Result<Vec<EnvSummary>, CoreError> {
        let now = Utc::now();
        Ok(self
            .store
            .list_all()?
            .into_iter()
            .map(|record| {
                let minutes_remaining = record.minutes_remaining(now);
                EnvSummary {
                    record,
                    minutes_remaining,
                }
            })
            .collect())
    }

    /// Destroy every environment whose TTL has elapsed, isolating per-id
    /// failures so one stuck teardown cannot stall the sweep.
    pub fn garbage_collect(&self) -> Result<GcReport, CoreError> {
        let now = Utc::now();
        let expired = self.store.expired_ids(now)?;
        let mut report = GcReport::default();

        for env_id in expired {
            match self.destroy(&env_id) {
                Ok(()) => {
                    info!("gc reclaimed {env_id}");
                    report.destroyed.push(env_id);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    // Raced an explicit destroy between scan and claim
                    debug!("gc: {env_id} already gone");
                }
                Err(e) => {
                    warn!("gc failed to destroy {env_id}: {e}");
                    report.failed.push(GcFailure {
                        env_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Finish destroys a crash interrupted after the claim but before the
    /// record was removed.
    fn finish_stranded_destroys(&self) {
        let stranded = match self.store.stranded_destroying() {
            Ok(records) => records,
            Err(e) => {
                warn!("scan for interrupted destroys failed: {e}");
                return;
            }
        };
        for record in stranded {
            info!("finishing interrupted destroy of {}", record.env_id);
            let failures = self.cleanup_record(&record);
            if !failures.is_empty() {
                warn!(
                    "cleanup of {} incomplete ({})",
                    record.env_id,
                    failures.join("; ")
                );
            }
            if let Err(e) = self.store.delete(&record.env_id) {
                warn!("failed to remove record {}: {e}", record.env_id);
            }
        }
    }

    /// Best-effort teardown of a record's resources: stack, tunnel process,
    /// workdir. Returns human-readable notes for whatever could not be
    /// reclaimed.
    fn cleanup_record(&self, record: &EnvRecord) -> Vec<String> {
        let mut failures = Vec::new();

        if record.workdir.exists() {
            let kind = detect_stack(&record.workdir, &self.config.driver.compose_file);
            match select_driver(&self.config.driver, kind) {
                Ok(driver) => {
                    if let Err(e) = driver.teardown(&record.workdir, &record.env_id) {
                        failures.push(format!("stack teardown: {e}"));
                    }
                }
                Err(e) => failures.push(format!("driver selection: {e}")),
            }
        } else if let Ok(driver) = select_driver(&self.config.driver, StackKind::Image) {
            // Workdir already gone; the container may still be around, and
            // image teardown needs nothing but the id.
            let _ = driver.teardown(&record.workdir, &record.env_id);
        }

        if let Some(pid) = record.tunnel_pid {
            self.tunnel.close(pid);
        }

        if record.workdir.exists() {
            if let Err(e) = fs::remove_dir_all(&record.workdir) {
                failures.push(format!("workdir removal: {e}"));
            }
        }

        failures
    }

    /// Reverse cleanup of everything a failing provision created so far.
    ///
    /// On full success the WAL entry is cleared; on partial failure the
    /// entry stays behind so startup recovery retries, and the incident is
    /// surfaced to the operator log as a rollback failure. The caller still
    /// returns the original provisioning error.
    fn unwind(
        &self,
        wal_op: &str,
        env_id: &str,
        workdir: &Path,
        driver: Option<&dyn StackDriver>,
        tunnel_pid: Option<u32>,
    ) {
        let mut failures = Vec::new();

        if let Some(pid) = tunnel_pid {
            self.tunnel.close(pid);
        }
        if let Some(driver) = driver {
            if let Err(e) = driver.teardown(workdir, env_id) {
                failures.push(format!("stack teardown: {e}"));
            }
        }
        if workdir.exists() {
            if let Err(e) = fs::remove_dir_all(workdir) {
                failures.push(format!("workdir removal: {e}"));
            }
        }

        if failures.is_empty() {
            if let Err(e) = self.wal.commit(wal_op) {
                warn!("failed to clear WAL entry {wal_op}: {e}");
            }
            debug!("provision of {env_id} rolled back cleanly");
        } else {
            let err = CoreError::RollbackFailed {
                env_id: env_id.to_owned(),
                detail: failures.join("; "),
            };
            error!("{err}; WAL entry {wal_op} retained for startup retry");
        }
    }
}
