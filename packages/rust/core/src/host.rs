//! Staging store lifecycle for a run: optional hosting process, readiness
//! polling, and a lazily opened connection shared by the steps.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use khub_shared::{KhubError, Result, StoreConfig, StoreHostConfig, StoreLocation};
use khub_storage::StagingStore;

/// A process serving the staging store (e.g. `docker compose up` running `sqld`).
pub struct StoreHost {
    config: StoreHostConfig,
    child: Child,
}

impl StoreHost {
    /// Spawn the host command.
    pub fn start(config: &StoreHostConfig) -> Result<Self> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| KhubError::config("store.host.command must not be empty"))?;

        info!(command = ?config.command, "starting staging store host");

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        let child = command
            .spawn()
            .map_err(|e| KhubError::Process(format!("failed to start store host `{program}`: {e}")))?;

        Ok(Self {
            config: config.clone(),
            child,
        })
    }

    /// Kill the host process and run the stop command, if any.
    pub async fn stop(mut self) {
        match self.child.try_wait() {
            Ok(Some(status)) => debug!(?status, "store host already exited"),
            _ => {
                if let Err(e) = self.child.kill().await {
                    warn!(error = %e, "unable to kill store host");
                }
            }
        }

        let Some((program, args)) = self.config.stop_command.split_first() else {
            info!("staging store host stopped");
            return;
        };

        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null());
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        match command.status().await {
            Ok(status) if status.success() => info!("staging store host stopped"),
            Ok(status) => warn!(%status, "store host stop command failed"),
            Err(e) => warn!(error = %e, "unable to run store host stop command"),
        }
    }
}

/// Open the store and ping it.
async fn connect(location: &StoreLocation) -> Result<StagingStore> {
    let store = StagingStore::open(location).await?;
    store.ping().await?;
    Ok(store)
}

/// Poll `location` until it answers or `timeout` elapses.
pub async fn wait_until_ready(
    location: &StoreLocation,
    interval: Duration,
    timeout: Duration,
) -> Result<StagingStore> {
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match connect(location).await {
            Ok(store) => {
                info!(store = %location, attempts, "staging store is ready");
                return Ok(store);
            }
            Err(e) if Instant::now() + interval >= deadline => {
                return Err(KhubError::Storage(format!(
                    "{location} not ready after {}s: {e}",
                    timeout.as_secs()
                )));
            }
            Err(e) => debug!(store = %location, attempts, error = %e, "staging store not ready yet"),
        }
        tokio::time::sleep(interval).await;
    }
}

/// The run's staging store: opened on first use, then reused.
pub struct StoreSession {
    config: StoreConfig,
    store: Option<StagingStore>,
    host: Option<StoreHost>,
    host_started: bool,
}

impl StoreSession {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            store: None,
            host: None,
            host_started: false,
        }
    }

    /// Where the store lives.
    pub fn location(&self) -> StoreLocation {
        self.config.location()
    }

    pub fn is_open(&self) -> bool {
        self.store.is_some()
    }

    /// The open store, connecting (and starting the host) on first call.
    pub async fn acquire(&mut self) -> Result<&StagingStore> {
        if self.store.is_none() {
            let store = self.open().await?;
            self.store = Some(store);
        }
        self.store
            .as_ref()
            .ok_or_else(|| KhubError::Storage("staging store is not open".into()))
    }

    async fn open(&mut self) -> Result<StagingStore> {
        let location = self.config.location();

        let host_config = match &self.config.host {
            None => return connect(&location).await,
            Some(host) => host.clone(),
        };

        // A host that is already up (e.g. from a previous run) is reused.
        if let Ok(store) = connect(&location).await {
            return Ok(store);
        }

        if !self.host_started {
            self.host_started = true;
            self.host = Some(StoreHost::start(&host_config)?);
        }

        wait_until_ready(
            &location,
            Duration::from_millis(host_config.poll_interval_ms),
            Duration::from_secs(host_config.ready_timeout_secs),
        )
        .await
    }

    /// Close the connection and stop the host if this session started it.
    pub async fn release(&mut self) {
        if self.store.take().is_some() {
            debug!("staging store connection closed");
        }
        if let Some(host) = self.host.take() {
            host.stop().await;
        }
    }
}
