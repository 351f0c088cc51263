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

//! Per-test-class orchestration: a data-driven table of setup hooks, ordered
//! by their declared dependencies, takes a test class from a bare build
//! directory to a running, patched server; teardown undoes it conditionally.

use crate::harness::config::{ContainerKind, HarnessSettings, ServerConfig};
use crate::harness::context::TestContext;
use crate::harness::error::HarnessError;
use crate::harness::patch::ConfigPatcher;
use crate::harness::ports::PortSet;
use crate::harness::server::ServerProcess;
use crate::harness::stage::{DistributionHome, DistributionStager};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Base URLs derived from the allocated ports, computed once during setup.
#[derive(Debug, Clone)]
pub struct BaseUrls {
    /// Plain-HTTP base, `http://{public}:{http_port}/idp`.
    pub http_base: String,
    /// TLS base, `https://{public}:{https_port}/idp`.
    pub https_base: String,
    /// SOAP backchannel base on its dedicated TLS listener.
    pub backchannel_base: String,
    /// Status page polled for readiness, always over plain HTTP on the
    /// private address.
    pub status_url: String,
    advertise_http: bool,
}

impl BaseUrls {
    fn compute(settings: &HarnessSettings, ports: &PortSet) -> Self {
        let public = &settings.public_address;
        let private = &settings.private_address;
        Self {
            http_base: format!("http://{public}:{}/idp", ports.http),
            https_base: format!("https://{public}:{}/idp", ports.https),
            backchannel_base: format!("https://{public}:{}/idp", ports.backchannel),
            status_url: format!("http://{private}:{}/idp/status", ports.http),
            advertise_http: settings.non_secure_port,
        }
    }

    /// The base URL protocol flows should treat as the entity's address:
    /// HTTPS normally, plain HTTP when the secure port was disabled.
    pub fn advertised(&self) -> &str {
        if self.advertise_http {
            &self.http_base
        } else {
            &self.https_base
        }
    }
}

/// One named setup step. Hooks run exactly once per class, in an order
/// satisfying `depends_on`; ties keep declaration order.
struct Hook {
    name: &'static str,
    depends_on: &'static [&'static str],
    run: fn(&mut TestOrchestrator) -> Result<(), HarnessError>,
}

const SETUP_HOOKS: &[Hook] = &[
    Hook {
        name: "resolve-distribution",
        depends_on: &[],
        run: TestOrchestrator::resolve_distribution,
    },
    Hook {
        name: "select-container",
        depends_on: &[],
        run: TestOrchestrator::select_container,
    },
    Hook {
        name: "stage-home",
        depends_on: &["resolve-distribution", "select-container"],
        run: TestOrchestrator::stage_home,
    },
    Hook {
        name: "allocate-ports",
        depends_on: &["stage-home"],
        run: TestOrchestrator::allocate_ports,
    },
    Hook {
        name: "compute-base-urls",
        depends_on: &["allocate-ports"],
        run: TestOrchestrator::compute_base_urls,
    },
    Hook {
        name: "patch-configuration",
        depends_on: &["compute-base-urls"],
        run: TestOrchestrator::patch_configuration,
    },
    Hook {
        name: "downgrade-to-non-secure",
        depends_on: &["patch-configuration"],
        run: TestOrchestrator::downgrade_to_non_secure,
    },
    Hook {
        name: "start-server",
        depends_on: &["select-container", "downgrade-to-non-secure"],
        run: TestOrchestrator::start_server,
    },
];

/// Orders hooks so every hook runs after all of its dependencies. Unknown
/// dependency names and cycles are setup failures, not silent reordering.
fn execution_order(hooks: &[Hook]) -> Result<Vec<usize>, HarnessError> {
    let index_of = |name: &str| hooks.iter().position(|h| h.name == name);

    let mut remaining_deps: Vec<Vec<usize>> = Vec::with_capacity(hooks.len());
    for hook in hooks {
        let mut deps = Vec::with_capacity(hook.depends_on.len());
        for dep in hook.depends_on {
            let Some(index) = index_of(dep) else {
                return Err(HarnessError::UnknownHookDependency {
                    hook: hook.name.to_string(),
                    dependency: dep.to_string(),
                });
            };
            deps.push(index);
        }
        remaining_deps.push(deps);
    }

    let mut order = Vec::with_capacity(hooks.len());
    let mut done = vec![false; hooks.len()];
    while order.len() < hooks.len() {
        // First-declared runnable hook keeps ordering deterministic.
        let next = (0..hooks.len()).find(|&i| {
            !done[i] && remaining_deps[i].iter().all(|&dep| done[dep])
        });
        match next {
            Some(i) => {
                done[i] = true;
                order.push(i);
            }
            None => {
                let stuck = (0..hooks.len())
                    .find(|&i| !done[i])
                    .map(|i| hooks[i].name.to_string())
                    .unwrap_or_default();
                return Err(HarnessError::HookCycle { hook: stuck });
            }
        }
    }
    Ok(order)
}

/// Drives the full lifecycle for one test class: stage, patch, start on
/// `set_up()`; stop and conditionally remove on `tear_down()`.
pub struct TestOrchestrator {
    settings: HarnessSettings,
    server_config: ServerConfig,
    context: Arc<TestContext>,
    stager: DistributionStager,
    container_kind: ContainerKind,
    distribution: Option<(PathBuf, String)>,
    home: Option<DistributionHome>,
    ports: Option<PortSet>,
    urls: Option<BaseUrls>,
    server: Option<ServerProcess>,
    class_failed: bool,
    set_up: bool,
}

impl std::fmt::Debug for TestOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestOrchestrator")
            .field("test_name", &self.context.test_name())
            .field("container", &self.container_kind.name())
            .field("set_up", &self.set_up)
            .field("class_failed", &self.class_failed)
            .finish_non_exhaustive()
    }
}

impl TestOrchestrator {
    pub fn builder() -> TestOrchestratorBuilder {
        TestOrchestratorBuilder::default()
    }

    /// Runs every setup hook in dependency order. On return the server is
    /// running and `base_urls()` is available. Not restartable after failure.
    pub fn set_up(&mut self) -> Result<(), HarnessError> {
        if self.set_up {
            return Err(HarnessError::InvalidState {
                message: "set_up() called twice".to_string(),
            });
        }
        self.set_up = true;

        for index in execution_order(SETUP_HOOKS)? {
            let hook = &SETUP_HOOKS[index];
            info!(hook = hook.name, test = self.context.test_name(), "running setup hook");
            (hook.run)(self)?;
        }
        Ok(())
    }

    /// Stops the server and removes the staged home unless the class failed
    /// or retention was requested. Server stop failures are logged, never
    /// allowed to mask the teardown of the directory tree.
    pub fn tear_down(&mut self) -> Result<(), HarnessError> {
        if let Some(mut server) = self.server.take() {
            if let Err(e) = server.stop() {
                warn!(error = %e, "server stop failed during teardown");
            }
        }
        self.stager
            .teardown(&self.context, self.class_failed, self.settings.keep_artifacts)
    }

    /// Marks the class failed so `tear_down()` retains the staged home.
    pub fn record_failure(&mut self) {
        self.class_failed = true;
    }

    pub fn context(&self) -> &TestContext {
        &self.context
    }

    pub fn container_kind(&self) -> ContainerKind {
        self.container_kind
    }

    pub fn home(&self) -> Option<&DistributionHome> {
        self.home.as_ref()
    }

    pub fn ports(&self) -> Option<&PortSet> {
        self.ports.as_ref()
    }

    pub fn base_urls(&self) -> Option<&BaseUrls> {
        self.urls.as_ref()
    }

    pub fn server(&self) -> Option<&ServerProcess> {
        self.server.as_ref()
    }

    fn resolve_distribution(&mut self) -> Result<(), HarnessError> {
        let (template, version) = self.stager.resolve_distribution()?;
        info!(version, template = %template.display(), "resolved distribution");
        self.distribution = Some((template, version));
        Ok(())
    }

    fn select_container(&mut self) -> Result<(), HarnessError> {
        self.container_kind = self.settings.container;
        info!(container = self.container_kind.name(), "selected container");
        Ok(())
    }

    fn stage_home(&mut self) -> Result<(), HarnessError> {
        let Some((template, version)) = self.distribution.clone() else {
            return Err(HarnessError::InvalidState {
                message: "stage-home ran before resolve-distribution".to_string(),
            });
        };
        let home = self
            .stager
            .stage(&template, &version, &self.context, self.container_kind)?;
        self.home = Some(home);
        Ok(())
    }

    fn allocate_ports(&mut self) -> Result<(), HarnessError> {
        let ports = PortSet::allocate()?;
        info!(
            http = ports.http,
            https = ports.https,
            backchannel = ports.backchannel,
            auxiliary = ports.auxiliary,
            "allocated listener ports"
        );
        self.ports = Some(ports);
        Ok(())
    }

    fn compute_base_urls(&mut self) -> Result<(), HarnessError> {
        let Some(ports) = &self.ports else {
            return Err(HarnessError::InvalidState {
                message: "compute-base-urls ran before allocate-ports".to_string(),
            });
        };
        self.urls = Some(BaseUrls::compute(&self.settings, ports));
        Ok(())
    }

    /// Rewrites the staged configuration so the IdP advertises the test
    /// base URLs instead of the distribution's `localhost` defaults.
    fn patch_configuration(&mut self) -> Result<(), HarnessError> {
        let (home, ports, urls) = match (&self.home, &self.ports, &self.urls) {
            (Some(home), Some(ports), Some(urls)) => (home, ports, urls),
            _ => {
                return Err(HarnessError::InvalidState {
                    message: "patch-configuration ran before its dependencies".to_string(),
                })
            }
        };
        let patcher = ConfigPatcher::new(home.root());

        patcher.replace_property("conf/idp.properties", "idp.baseurl", &urls.https_base, false)?;
        patcher.replace_property(
            "conf/idp.properties",
            "idp.backchannel.port",
            &ports.backchannel.to_string(),
            true,
        )?;
        patcher.replace_property(
            "conf/ldap.properties",
            "idp.authn.LDAP.ldapURL",
            &format!("ldap://{}:{}", self.settings.private_address, ports.auxiliary),
            true,
        )?;

        // Backchannel endpoints carry the explicit default port 8443 in the
        // shipped metadata; front-channel endpoints carry no port. Matching
        // the portless form second keeps the freshly written backchannel
        // locations intact.
        patcher.replace(
            "metadata/idp-metadata.xml",
            r"https://localhost:8443/idp",
            &urls.backchannel_base,
        )?;
        patcher.replace(
            "metadata/idp-metadata.xml",
            r"https://localhost/idp",
            &urls.https_base,
        )?;
        Ok(())
    }

    /// When the secure port is disabled, the advertised base URL drops back
    /// to plain HTTP. The HTTPS listener still exists; only the URL the
    /// flows are handed changes.
    fn downgrade_to_non_secure(&mut self) -> Result<(), HarnessError> {
        if !self.settings.non_secure_port {
            return Ok(());
        }
        let (home, urls) = match (&self.home, &self.urls) {
            (Some(home), Some(urls)) => (home, urls),
            _ => {
                return Err(HarnessError::InvalidState {
                    message: "downgrade-to-non-secure ran before its dependencies".to_string(),
                })
            }
        };
        info!(base = %urls.http_base, "advertising non-secure base URL");
        let patcher = ConfigPatcher::new(home.root());
        patcher.replace_property("conf/idp.properties", "idp.baseurl", &urls.http_base, false)
    }

    fn start_server(&mut self) -> Result<(), HarnessError> {
        let (home, ports, urls) = match (&self.home, &self.ports, &self.urls) {
            (Some(home), Some(ports), Some(urls)) => (home.clone(), *ports, urls.clone()),
            _ => {
                return Err(HarnessError::InvalidState {
                    message: "start-server ran before its dependencies".to_string(),
                })
            }
        };
        let mut server = ServerProcess::new(
            self.container_kind,
            home,
            ports,
            urls.status_url,
            self.server_config.clone(),
            Arc::clone(&self.context),
        )?;
        server.initialize()?;
        server.start()?;
        self.server = Some(server);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct TestOrchestratorBuilder {
    settings: Option<HarnessSettings>,
    server_config: Option<ServerConfig>,
    test_name: Option<String>,
}

impl TestOrchestratorBuilder {
    /// Explicit settings instead of the environment-derived defaults.
    pub fn settings(mut self, settings: HarnessSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn server(mut self, config: ServerConfig) -> Self {
        self.server_config = Some(config);
        self
    }

    pub fn test_name(mut self, name: impl Into<String>) -> Self {
        self.test_name = Some(name.into());
        self
    }

    pub fn build(self) -> TestOrchestrator {
        let settings = self.settings.unwrap_or_else(HarnessSettings::from_env);
        let mut server_config = self.server_config.unwrap_or_default();
        if settings.verbose {
            server_config.verbose = true;
        }
        let context = Arc::new(TestContext::new(self.test_name, &settings.build_dir));
        let stager = DistributionStager::new(&settings.build_dir);
        let container_kind = settings.container;
        TestOrchestrator {
            settings,
            server_config,
            context,
            stager,
            container_kind,
            distribution: None,
            home: None,
            ports: None,
            urls: None,
            server: None,
            class_failed: false,
            set_up: false,
        }
    }
}

impl Drop for TestOrchestrator {
    fn drop(&mut self) {
        // Leak guard for tests that panic before reaching tear_down(). An
        // unwinding class counts as failed, so its staged home survives.
        if std::thread::panicking() {
            self.class_failed = true;
        }
        if let Err(e) = self.tear_down() {
            warn!(error = %e, "teardown during drop failed");
        }
    }
}
