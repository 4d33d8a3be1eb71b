//! Recording in-memory runtime for tests.
//!
//! Keeps containers in a map, logs every call, and can be told to fail a
//! given operation. Both optional capabilities can be toggled so callers'
//! fallback paths are exercised.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{
    BackendKind, ContainerInfo, ContainerStatus, CreateOptions, ExecOptions, ExecOutput,
    GracefulStop, LogViewer, Runtime, RuntimeError, RuntimeResult,
};
use crate::generator::ContainerSpec;

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum FakeOp {
    Create,
    Start,
    Stop,
    Destroy,
    Status,
    Exec,
    List,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RuntimeCall {
    Create(String),
    Start(String),
    Stop(String),
    StopWithTimeout(String, u64),
    Destroy(String),
    Status(String),
    Exec(String, Vec<String>),
    ExecInteractive(String),
    List,
    Logs(String),
}

#[derive(Debug, Clone)]
struct FakeContainer {
    info: ContainerInfo,
    spec: Option<ContainerSpec>,
}

pub(crate) struct FakeRuntime {
    containers: Mutex<BTreeMap<String, FakeContainer>>,
    calls: Mutex<Vec<RuntimeCall>>,
    failures: Mutex<BTreeSet<FakeOp>>,
    exec_exit_code: AtomicI64,
    graceful: bool,
    logs: bool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(BTreeSet::new()),
            exec_exit_code: AtomicI64::new(0),
            graceful: true,
            logs: true,
        }
    }

    pub fn with_graceful_stop(mut self, enabled: bool) -> Self {
        self.graceful = enabled;
        self
    }

    pub fn with_logs(mut self, enabled: bool) -> Self {
        self.logs = enabled;
        self
    }

    /// Adds a container labelled with its own name as the sandbox.
    pub fn insert_container(&self, name: &str, running: bool) {
        self.insert_labelled(name, Some(name), running);
    }

    /// Adds a container with an explicit (or missing) sandbox label.
    pub fn insert_labelled(&self, name: &str, sandbox: Option<&str>, running: bool) {
        let now = Utc::now();
        let info = ContainerInfo {
            name: name.to_string(),
            sandbox: sandbox.map(ToString::to_string),
            status: if running {
                ContainerStatus::Running
            } else {
                ContainerStatus::Stopped
            },
            created_at: Some(now),
            started_at: running.then_some(now),
        };
        self.containers
            .lock()
            .unwrap()
            .insert(name.to_string(), FakeContainer { info, spec: None });
    }

    pub fn fail_on(&self, op: FakeOp) {
        self.failures.lock().unwrap().insert(op);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Exit code returned by every subsequent `exec`.
    pub fn set_exec_exit_code(&self, code: i64) {
        self.exec_exit_code.store(code, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Names of all containers, running or not.
    pub fn container_names(&self) -> BTreeSet<String> {
        self.containers.lock().unwrap().keys().cloned().collect()
    }

    pub fn has_container(&self, name: &str) -> bool {
        self.containers.lock().unwrap().contains_key(name)
    }

    /// Spec the container was created from, if it went through `create`.
    pub fn spec(&self, name: &str) -> Option<ContainerSpec> {
        self.containers
            .lock()
            .unwrap()
            .get(name)
            .and_then(|c| c.spec.clone())
    }

    /// Flips a container's state without recording a call.
    pub fn set_running(&self, name: &str, running: bool) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(name) {
            c.info.status = if running {
                ContainerStatus::Running
            } else {
                ContainerStatus::Stopped
            };
        }
    }

    fn record(&self, call: RuntimeCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, op: FakeOp) -> RuntimeResult<()> {
        if self.failures.lock().unwrap().contains(&op) {
            Err(RuntimeError::command_failed(format!("injected {op:?} failure")))
        } else {
            Ok(())
        }
    }

    fn set_status(&self, name: &str, status: ContainerStatus) -> RuntimeResult<()> {
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .get_mut(name)
            .ok_or_else(|| RuntimeError::not_found(name))?;
        container.info.status = status;
        if status == ContainerStatus::Running {
            container.info.started_at = Some(Utc::now());
        }
        Ok(())
    }
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Runtime for FakeRuntime {
    fn kind(&self) -> BackendKind {
        BackendKind::Docker
    }

    async fn create(&self, opts: &CreateOptions) -> RuntimeResult<()> {
        self.record(RuntimeCall::Create(opts.container.clone()));
        self.check(FakeOp::Create)?;
        let mut containers = self.containers.lock().unwrap();
        if containers.contains_key(&opts.container) {
            return Err(RuntimeError::command_failed(format!(
                "container {} already exists",
                opts.container
            )));
        }
        let now = Utc::now();
        containers.insert(
            opts.container.clone(),
            FakeContainer {
                info: ContainerInfo {
                    name: opts.container.clone(),
                    sandbox: Some(opts.sandbox.clone()),
                    status: if opts.start {
                        ContainerStatus::Running
                    } else {
                        ContainerStatus::Stopped
                    },
                    created_at: Some(now),
                    started_at: opts.start.then_some(now),
                },
                spec: Some(opts.spec.clone()),
            },
        );
        Ok(())
    }

    async fn start(&self, name: &str) -> RuntimeResult<()> {
        self.record(RuntimeCall::Start(name.to_string()));
        self.check(FakeOp::Start)?;
        self.set_status(name, ContainerStatus::Running)
    }

    async fn stop(&self, name: &str) -> RuntimeResult<()> {
        self.record(RuntimeCall::Stop(name.to_string()));
        self.check(FakeOp::Stop)?;
        self.set_status(name, ContainerStatus::Stopped)
    }

    async fn destroy(&self, name: &str) -> RuntimeResult<()> {
        self.record(RuntimeCall::Destroy(name.to_string()));
        self.check(FakeOp::Destroy)?;
        self.containers.lock().unwrap().remove(name);
        Ok(())
    }

    async fn status(&self, name: &str) -> RuntimeResult<ContainerInfo> {
        self.record(RuntimeCall::Status(name.to_string()));
        self.check(FakeOp::Status)?;
        Ok(self
            .containers
            .lock()
            .unwrap()
            .get(name)
            .map_or_else(|| ContainerInfo::not_found(name), |c| c.info.clone()))
    }

    async fn exec(
        &self,
        name: &str,
        argv: &[String],
        opts: &ExecOptions,
    ) -> RuntimeResult<ExecOutput> {
        self.record(RuntimeCall::Exec(name.to_string(), argv.to_vec()));
        self.check(FakeOp::Exec)?;
        let running = self
            .containers
            .lock()
            .unwrap()
            .get(name)
            .map(|c| c.info.is_running())
            .ok_or_else(|| RuntimeError::not_found(name))?;
        if !running {
            return Err(RuntimeError::command_failed(format!("{name} is not running")));
        }
        let stdin = opts
            .stdin
            .as_deref()
            .map(String::from_utf8_lossy)
            .unwrap_or_default();
        Ok(ExecOutput {
            exit_code: self.exec_exit_code.load(Ordering::SeqCst),
            stdout: format!("{}{stdin}", argv.join(" ")),
            stderr: String::new(),
        })
    }

    async fn exec_interactive(&self, name: &str, _argv: &[String]) -> RuntimeResult<i32> {
        self.record(RuntimeCall::ExecInteractive(name.to_string()));
        self.check(FakeOp::Exec)?;
        if self.has_container(name) {
            Ok(0)
        } else {
            Err(RuntimeError::not_found(name))
        }
    }

    async fn list(&self) -> RuntimeResult<Vec<ContainerInfo>> {
        self.record(RuntimeCall::List);
        self.check(FakeOp::List)?;
        Ok(self
            .containers
            .lock()
            .unwrap()
            .values()
            .map(|c| c.info.clone())
            .collect())
    }

    fn graceful_stop(&self) -> Option<&dyn GracefulStop> {
        self.graceful.then_some(self as &dyn GracefulStop)
    }

    fn log_viewer(&self) -> Option<&dyn LogViewer> {
        self.logs.then_some(self as &dyn LogViewer)
    }
}

#[async_trait]
impl GracefulStop for FakeRuntime {
    async fn stop_with_timeout(&self, name: &str, timeout: Duration) -> RuntimeResult<()> {
        self.record(RuntimeCall::StopWithTimeout(name.to_string(), timeout.as_secs()));
        self.check(FakeOp::Stop)?;
        self.set_status(name, ContainerStatus::Stopped)
    }
}

#[async_trait]
impl LogViewer for FakeRuntime {
    async fn logs(&self, name: &str, tail: Option<usize>) -> RuntimeResult<String> {
        self.record(RuntimeCall::Logs(name.to_string()));
        if !self.has_container(name) {
            return Err(RuntimeError::not_found(name));
        }
        let lines: Vec<String> = (1..=5).map(|i| format!("{name} line {i}")).collect();
        let skip = tail.map_or(0, |t| lines.len().saturating_sub(t));
        Ok(lines[skip..].join("\n"))
    }
}
