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

use crate::harness::error::HarnessError;
use crate::harness::patch::ConfigPatcher;
use crate::harness::ports::PortSet;
use crate::harness::stage::DistributionHome;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Child;

const START_INI: &str = "jetty-base/start.ini";

/// Launch and shutdown mechanics for the Jetty container.
///
/// Jetty is driven through `start.jar` with the staged `jetty-base`; test
/// listeners and the test webapp descriptor are injected into `start.ini`
/// once, at initialization. Graceful shutdown is a SIGTERM to the launcher
/// process itself.
#[derive(Debug)]
pub struct JettyLauncher {
    container_home: PathBuf,
    container_base: PathBuf,
}

impl JettyLauncher {
    pub fn new(home: &DistributionHome) -> Self {
        Self {
            container_home: home.container_home().to_path_buf(),
            container_base: home.container_base().to_path_buf(),
        }
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        let start_jar = self.container_home.join("start.jar");
        for path in [&self.container_home, &self.container_base, &start_jar] {
            if !path.exists() {
                return Err(HarnessError::MissingPath { path: path.clone() });
            }
        }
        Ok(())
    }

    pub fn apply_patches(
        &self,
        patcher: &ConfigPatcher,
        ports: &PortSet,
        _extra_args: &[String],
    ) -> Result<(), HarnessError> {
        patcher.replace_property(START_INI, "jetty.http.port", &ports.http.to_string(), true)?;
        patcher.replace_property(START_INI, "jetty.ssl.port", &ports.https.to_string(), true)?;
        patcher.replace_property(
            START_INI,
            "idp.backchannel.port",
            &ports.backchannel.to_string(),
            true,
        )?;
        // The probe and the flows connect by address, not hostname.
        patcher.replace_property(START_INI, "jetty.ssl.sniRequired", "false", true)?;
        patcher.replace_property(START_INI, "jetty.ssl.sniHostCheck", "false", true)?;
        // Deploy the test SP webapp alongside the IdP.
        patcher.append_at_end(
            START_INI,
            "jetty.deploy.extraWebapp=webapps/test-webapp.xml\n",
        )?;
        Ok(())
    }

    pub fn build_command(
        &self,
        java: &str,
        home_root: &Path,
        extra_args: &[String],
    ) -> Vec<String> {
        let mut command = vec![
            java.to_string(),
            format!("-Didp.home={}", home_root.display()),
            "-jar".to_string(),
            self.container_home.join("start.jar").display().to_string(),
            format!("jetty.base={}", self.container_base.display()),
        ];
        command.extend(extra_args.iter().cloned());
        command
    }

    pub fn build_envs(&self) -> HashMap<String, String> {
        HashMap::from([(
            "JETTY_BASE".to_string(),
            self.container_base.display().to_string(),
        )])
    }

    pub fn graceful_shutdown(&self, child: &mut Child) -> std::io::Result<()> {
        unsafe {
            libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
        }
        Ok(())
    }
}
