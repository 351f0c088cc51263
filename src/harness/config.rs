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

//! Harness-level configuration.
//!
//! Ambient knobs (build directory, container selection, bind addresses,
//! artifact retention) are read once from the environment into an immutable
//! [`HarnessSettings`] value and passed explicitly to each component, instead
//! of being consulted as global state throughout the run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable enabling inherited (non-captured) server output.
pub const TEST_VERBOSITY_ENV_VAR: &str = "IDP_TEST_VERBOSE";
/// Build output directory holding the distribution and container homes.
pub const BUILD_DIR_ENV_VAR: &str = "IDP_TEST_BUILD_DIR";
/// Selects the servlet container; `tomcat` switches away from the default.
pub const CONTAINER_ENV_VAR: &str = "IDP_TEST_CONTAINER";
/// Address advertised in base URLs handed to protocol flows.
pub const PUBLIC_ADDRESS_ENV_VAR: &str = "IDP_TEST_PUBLIC_ADDRESS";
/// Address the container binds and the status probe connects to.
pub const PRIVATE_ADDRESS_ENV_VAR: &str = "IDP_TEST_PRIVATE_ADDRESS";
/// Retain the staged home even after a fully successful test class.
pub const KEEP_ARTIFACTS_ENV_VAR: &str = "IDP_TEST_KEEP_ARTIFACTS";
/// Advertise the plain-HTTP base URL instead of the HTTPS one.
pub const NON_SECURE_PORT_ENV_VAR: &str = "IDP_TEST_NO_SECURE_PORT";

pub const DEFAULT_STARTUP_ATTEMPTS: u32 = 120;
pub const DEFAULT_STARTUP_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_SHUTDOWN_ATTEMPTS: u32 = 10;
pub const DEFAULT_SHUTDOWN_INTERVAL: Duration = Duration::from_millis(500);

/// First line of the status page when the server is actually the one
/// answering the port.
pub const DEFAULT_STATUS_SENTINEL: &str = "### Operating Environment";

/// The servlet container hosting the IdP web application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContainerKind {
    #[default]
    Jetty,
    Tomcat,
}

impl ContainerKind {
    pub fn name(&self) -> &'static str {
        match self {
            ContainerKind::Jetty => "jetty",
            ContainerKind::Tomcat => "tomcat",
        }
    }

    fn from_env_value(value: &str) -> Self {
        if value.eq_ignore_ascii_case("tomcat") {
            ContainerKind::Tomcat
        } else {
            ContainerKind::Jetty
        }
    }
}

/// Immutable per-run settings, resolved from the environment exactly once.
#[derive(Debug, Clone)]
pub struct HarnessSettings {
    pub build_dir: PathBuf,
    pub container: ContainerKind,
    pub public_address: String,
    pub private_address: String,
    pub keep_artifacts: bool,
    pub non_secure_port: bool,
    pub verbose: bool,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            build_dir: PathBuf::from("target/it"),
            container: ContainerKind::default(),
            public_address: "localhost".to_string(),
            private_address: "localhost".to_string(),
            keep_artifacts: false,
            non_secure_port: false,
            verbose: false,
        }
    }
}

impl HarnessSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            build_dir: std::env::var(BUILD_DIR_ENV_VAR)
                .map(PathBuf::from)
                .unwrap_or(defaults.build_dir),
            container: std::env::var(CONTAINER_ENV_VAR)
                .map(|v| ContainerKind::from_env_value(&v))
                .unwrap_or(defaults.container),
            public_address: std::env::var(PUBLIC_ADDRESS_ENV_VAR)
                .unwrap_or(defaults.public_address),
            private_address: std::env::var(PRIVATE_ADDRESS_ENV_VAR)
                .unwrap_or(defaults.private_address),
            keep_artifacts: env_flag(KEEP_ARTIFACTS_ENV_VAR),
            non_secure_port: env_flag(NON_SECURE_PORT_ENV_VAR),
            verbose: env_flag(TEST_VERBOSITY_ENV_VAR),
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes") || v == "1"
        })
        .unwrap_or(false)
}

/// Per-server configuration, built fluently and handed to [`crate::harness::server::ServerProcess`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the container binds its listeners to.
    pub bind_address: String,
    /// Expected prefix of the status page body.
    pub status_sentinel: String,
    /// Explicit JDK to launch with; falls back to `java` on the PATH.
    pub java_home: Option<PathBuf>,
    /// Extra launch arguments appended verbatim (typically `-D` flags).
    pub extra_args: Vec<String>,
    /// Extra environment variables for the child process.
    pub extra_envs: HashMap<String, String>,
    pub startup_attempts: u32,
    pub startup_interval: Duration,
    pub shutdown_attempts: u32,
    pub shutdown_interval: Duration,
    /// Inherit stdout/stderr instead of capturing to log files.
    pub verbose: bool,
    /// Replaces the assembled container command. Skips container validation
    /// and patching; intended for tests that supervise a stand-in process.
    pub command_override: Option<Vec<String>>,
    /// Replaces the computed status URL; intended for tests.
    pub status_url_override: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "localhost".to_string(),
            status_sentinel: DEFAULT_STATUS_SENTINEL.to_string(),
            java_home: None,
            extra_args: Vec::new(),
            extra_envs: HashMap::new(),
            startup_attempts: DEFAULT_STARTUP_ATTEMPTS,
            startup_interval: DEFAULT_STARTUP_INTERVAL,
            shutdown_attempts: DEFAULT_SHUTDOWN_ATTEMPTS,
            shutdown_interval: DEFAULT_SHUTDOWN_INTERVAL,
            verbose: false,
            command_override: None,
            status_url_override: None,
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn bind_address(mut self, address: impl Into<String>) -> Self {
        self.config.bind_address = address.into();
        self
    }

    pub fn status_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.config.status_sentinel = sentinel.into();
        self
    }

    pub fn java_home(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.java_home = Some(path.into());
        self
    }

    pub fn extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.config.extra_args.push(arg.into());
        self
    }

    pub fn extra_envs(mut self, envs: HashMap<String, String>) -> Self {
        self.config.extra_envs.extend(envs);
        self
    }

    pub fn startup_budget(mut self, attempts: u32, interval: Duration) -> Self {
        self.config.startup_attempts = attempts;
        self.config.startup_interval = interval;
        self
    }

    pub fn shutdown_budget(mut self, attempts: u32, interval: Duration) -> Self {
        self.config.shutdown_attempts = attempts;
        self.config.shutdown_interval = interval;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn command_override(mut self, command: Vec<String>) -> Self {
        self.config.command_override = Some(command);
        self
    }

    pub fn status_url_override(mut self, url: impl Into<String>) -> Self {
        self.config.status_url_override = Some(url.into());
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}
