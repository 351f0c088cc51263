/*
 * Licensed to the Apache Software Foundation (ASF) under one
 * or more contributor license agreements.  See the NOTICE file
 * distributed with this work for additional information
 * regarding copyright ownership.  The ASF licenses this file
 * to you under the Apache License, Version 2.0 (the
 * "License"); you may not use this file except in compliance
 * with the License.  You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing,
 * software distributed under the License is distributed on an
 * "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
 * KIND, either express or implied.  See the License for the
 * specific language governing permissions and limitations
 * under the License.
 */

//! Supervision of the server as an external OS process.
//!
//! One shared lifecycle state machine drives either container; the
//! container-specific launch commands, one-time file patches, and shutdown
//! handshakes live behind the [`Container`] variant.

mod jetty;
mod tomcat;

pub use jetty::JettyLauncher;
pub use tomcat::TomcatLauncher;

use crate::harness::config::{ContainerKind, ServerConfig};
use crate::harness::context::TestContext;
use crate::harness::error::HarnessError;
use crate::harness::patch::ConfigPatcher;
use crate::harness::ports::PortSet;
use crate::harness::probe::{await_condition, AwaitOutcome, StatusProbe};
use crate::harness::stage::DistributionHome;
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::panicking;
use tracing::{info, warn};

/// Lifecycle of one supervised server process. Not reusable after `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

/// Container-specific launch and shutdown mechanics.
#[derive(Debug)]
pub enum Container {
    Jetty(JettyLauncher),
    Tomcat(TomcatLauncher),
}

impl Container {
    pub fn create(kind: ContainerKind, home: &DistributionHome) -> Result<Self, HarnessError> {
        match kind {
            ContainerKind::Jetty => Ok(Container::Jetty(JettyLauncher::new(home))),
            ContainerKind::Tomcat => Ok(Container::Tomcat(TomcatLauncher::new(home)?)),
        }
    }

    pub fn kind(&self) -> ContainerKind {
        match self {
            Container::Jetty(_) => ContainerKind::Jetty,
            Container::Tomcat(_) => ContainerKind::Tomcat,
        }
    }

    fn validate(&self) -> Result<(), HarnessError> {
        match self {
            Container::Jetty(launcher) => launcher.validate(),
            Container::Tomcat(launcher) => launcher.validate(),
        }
    }

    fn apply_patches(
        &self,
        patcher: &ConfigPatcher,
        ports: &PortSet,
        extra_args: &[String],
    ) -> Result<(), HarnessError> {
        match self {
            Container::Jetty(launcher) => launcher.apply_patches(patcher, ports, extra_args),
            Container::Tomcat(launcher) => launcher.apply_patches(patcher, ports, extra_args),
        }
    }

    fn build_command(
        &self,
        java: &str,
        home: &DistributionHome,
        extra_args: &[String],
    ) -> Vec<String> {
        match self {
            Container::Jetty(launcher) => launcher.build_command(java, home.root(), extra_args),
            Container::Tomcat(launcher) => launcher.build_command(java, home.root()),
        }
    }

    fn build_envs(&self, config: &ServerConfig) -> HashMap<String, String> {
        match self {
            Container::Jetty(launcher) => launcher.build_envs(),
            Container::Tomcat(launcher) => launcher.build_envs(config.java_home.as_deref()),
        }
    }

    fn graceful_shutdown(&self, child: &mut Child) -> std::io::Result<()> {
        match self {
            Container::Jetty(launcher) => launcher.graceful_shutdown(child),
            Container::Tomcat(launcher) => launcher.graceful_shutdown(child),
        }
    }
}

/// Builds, launches, and supervises the server child process.
///
/// `initialize()` validates paths and assembles the command, `start()`
/// spawns and blocks until the status sentinel is observed, `stop()` runs
/// the graceful-then-forceful shutdown protocol. The `Drop` impl stops the
/// child as a leak guard and dumps captured logs when unwinding.
pub struct ServerProcess {
    config: ServerConfig,
    container: Container,
    home: DistributionHome,
    ports: PortSet,
    context: Arc<TestContext>,
    state: ServerState,
    command: Vec<String>,
    envs: HashMap<String, String>,
    status_url: String,
    child: Option<Child>,
    stdout_path: Option<PathBuf>,
    stderr_path: Option<PathBuf>,
}

impl std::fmt::Debug for ServerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerProcess")
            .field("container", &self.container.kind().name())
            .field("state", &self.state)
            .field("status_url", &self.status_url)
            .field("is_running", &self.child.is_some())
            .finish_non_exhaustive()
    }
}

impl ServerProcess {
    pub fn new(
        kind: ContainerKind,
        home: DistributionHome,
        ports: PortSet,
        status_url: String,
        config: ServerConfig,
        context: Arc<TestContext>,
    ) -> Result<Self, HarnessError> {
        let container = Container::create(kind, &home)?;
        let status_url = config.status_url_override.clone().unwrap_or(status_url);
        Ok(Self {
            config,
            container,
            home,
            ports,
            context,
            state: ServerState::Uninitialized,
            command: Vec::new(),
            envs: HashMap::new(),
            status_url,
            child: None,
            stdout_path: None,
            stderr_path: None,
        })
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn status_url(&self) -> &str {
        &self.status_url
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(|c| c.id())
    }

    pub fn collect_logs(&self) -> (String, String) {
        let stdout = self
            .stdout_path
            .as_ref()
            .and_then(|p| fs::read_to_string(p).ok())
            .unwrap_or_else(|| "[No stdout log]".to_string());

        let stderr = self
            .stderr_path
            .as_ref()
            .and_then(|p| fs::read_to_string(p).ok())
            .unwrap_or_else(|| "[No stderr log]".to_string());

        (stdout, stderr)
    }

    /// Validates paths, applies container-specific one-time patches, and
    /// assembles the launch command. Fails fast before anything is spawned.
    pub fn initialize(&mut self) -> Result<(), HarnessError> {
        if self.state != ServerState::Uninitialized {
            return Err(HarnessError::InvalidState {
                message: format!("initialize() called in state {:?}", self.state),
            });
        }

        if let Some(command) = &self.config.command_override {
            self.command = command.clone();
            self.envs = self.config.extra_envs.clone();
            self.state = ServerState::Initialized;
            return Ok(());
        }

        if !self.home.root().is_dir() {
            return Err(HarnessError::MissingPath {
                path: self.home.root().to_path_buf(),
            });
        }
        self.container.validate()?;
        let java = java_executable(&self.config)?;

        let patcher = ConfigPatcher::new(self.home.root());
        self.container
            .apply_patches(&patcher, &self.ports, &self.config.extra_args)?;

        self.command = self
            .container
            .build_command(&java, &self.home, &self.config.extra_args);
        self.envs = self.container.build_envs(&self.config);
        self.envs.extend(self.config.extra_envs.clone());

        self.state = ServerState::Initialized;
        Ok(())
    }

    /// Spawns the child and blocks until the status sentinel is observed.
    ///
    /// Never returns successfully without having seen the sentinel at least
    /// once. A child that exits during the wait, a wrong-service status
    /// body, or an exhausted retry budget are all fatal; the child is killed
    /// before the error is surfaced.
    pub fn start(&mut self) -> Result<(), HarnessError> {
        if self.state != ServerState::Initialized {
            return Err(HarnessError::InvalidState {
                message: format!("start() called in state {:?}", self.state),
            });
        }
        let Some(program) = self.command.first().cloned() else {
            return Err(HarnessError::InvalidState {
                message: "launch command is empty".to_string(),
            });
        };
        let binary = self.container.kind().name();

        let mut command = Command::new(&program);
        command.args(&self.command[1..]);
        command.envs(&self.envs);
        if self.home.root().is_dir() {
            command.current_dir(self.home.root());
        }

        if self.config.verbose {
            command.stdout(Stdio::inherit());
            command.stderr(Stdio::inherit());
        } else {
            let stdout_path = self.context.server_stdout_path();
            let stderr_path = self.context.server_stderr_path();
            let stdout_file =
                File::create(&stdout_path).map_err(|e| HarnessError::FileWrite {
                    path: stdout_path.clone(),
                    source: e,
                })?;
            let stderr_file =
                File::create(&stderr_path).map_err(|e| HarnessError::FileWrite {
                    path: stderr_path.clone(),
                    source: e,
                })?;
            command.stdout(stdout_file);
            command.stderr(stderr_file);
            self.stdout_path = Some(stdout_path);
            self.stderr_path = Some(stderr_path);
        }

        let child = command.spawn().map_err(|e| HarnessError::ProcessSpawn {
            binary: program.clone(),
            source: e,
        })?;
        self.child = Some(child);
        info!(%program, url = %self.status_url, "server process spawned, awaiting readiness");

        let probe = StatusProbe::new(&self.status_url, &self.config.status_sentinel)?;
        let attempts = self.config.startup_attempts;
        let interval = self.config.startup_interval;

        let outcome = await_condition(
            |_attempt| {
                let exited = match self.child.as_mut() {
                    Some(child) => child.try_wait().ok().flatten(),
                    None => None,
                };
                if let Some(status) = exited {
                    let (stdout, stderr) = self.collect_logs();
                    return Err(HarnessError::ProcessCrashed {
                        binary: binary.to_string(),
                        exit_code: status.code(),
                        stdout,
                        stderr,
                    });
                }
                probe.check_ready()
            },
            attempts,
            interval,
        );

        match outcome {
            Ok(AwaitOutcome::Ready) => {
                self.state = ServerState::Running;
                info!(url = %self.status_url, "server ready");
                Ok(())
            }
            Ok(AwaitOutcome::TimedOut) => {
                self.force_kill();
                Err(HarnessError::StartupTimeout {
                    binary: binary.to_string(),
                    url: self.status_url.clone(),
                    attempts,
                })
            }
            Err(e) => {
                self.force_kill();
                Err(e)
            }
        }
    }

    /// Graceful-then-forceful shutdown.
    ///
    /// The graceful handshake and the bounded wait for the status endpoint
    /// to stop answering are both best-effort (failures are warnings); the
    /// forceful kill always runs, so the child is never alive when this
    /// returns. Safe to call repeatedly and from `Drop`.
    pub fn stop(&mut self) -> Result<(), HarnessError> {
        if self.child.is_none() {
            self.state = ServerState::Stopped;
            return Ok(());
        }

        let container = &self.container;
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = container.graceful_shutdown(child) {
                warn!(error = %e, "graceful shutdown request failed");
            }
        }

        match StatusProbe::new(&self.status_url, &self.config.status_sentinel) {
            Ok(probe) => {
                let waited = await_condition(
                    |_attempt| Ok(probe.check_stopped()),
                    self.config.shutdown_attempts,
                    self.config.shutdown_interval,
                );
                if let Ok(AwaitOutcome::TimedOut) = waited {
                    warn!(
                        url = %self.status_url,
                        "status endpoint still answering after graceful shutdown wait"
                    );
                }
            }
            Err(e) => warn!(error = %e, "skipping shutdown confirmation"),
        }

        self.force_kill();
        self.state = ServerState::Stopped;
        Ok(())
    }

    fn force_kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            unsafe {
                libc::kill(child.id() as libc::pid_t, libc::SIGKILL);
            }
            // Reap, so the child is observably gone before returning.
            let _ = child.wait();
        }
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        let _ = self.stop();
        if panicking() {
            let (stdout, stderr) = self.collect_logs();
            eprintln!("server stdout:\n{stdout}");
            eprintln!("server stderr:\n{stderr}");
        }
    }
}

fn java_executable(config: &ServerConfig) -> Result<String, HarnessError> {
    match &config.java_home {
        Some(java_home) => {
            let java = java_home.join("bin/java");
            if !java.is_file() {
                return Err(HarnessError::MissingPath { path: java });
            }
            Ok(java.display().to_string())
        }
        None => Ok("java".to_string()),
    }
}
