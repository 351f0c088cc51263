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
use crate::harness::ports::{self, PortSet, DISCOVERY_RANGE_HIGH, DISCOVERY_RANGE_LOW};
use crate::harness::stage::DistributionHome;
use std::collections::HashMap;
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::process::Child;
use std::time::Duration;
use uuid::Uuid;

const CATALINA_PROPERTIES: &str = "tomcat-base/conf/catalina.properties";
const SETENV: &str = "tomcat-base/bin/setenv.sh";

/// Launch and shutdown mechanics for the Tomcat container.
///
/// Tomcat is started through `catalina.sh run` so that the staged
/// `setenv.sh` is sourced; `-D` arguments therefore go into `CATALINA_OPTS`
/// lines rather than onto the command line. Each instance gets a freshly
/// allocated shutdown port and a random shutdown token written into
/// `catalina.properties`; graceful shutdown writes that token to the port.
#[derive(Debug)]
pub struct TomcatLauncher {
    container_home: PathBuf,
    container_base: PathBuf,
    shutdown_port: u16,
    shutdown_token: String,
}

impl TomcatLauncher {
    pub fn new(home: &DistributionHome) -> Result<Self, HarnessError> {
        let shutdown_port = ports::allocate(1, DISCOVERY_RANGE_LOW, DISCOVERY_RANGE_HIGH)?[0];
        Ok(Self {
            container_home: home.container_home().to_path_buf(),
            container_base: home.container_base().to_path_buf(),
            shutdown_port,
            shutdown_token: format!("shutdown-{}", Uuid::new_v4()),
        })
    }

    pub fn shutdown_port(&self) -> u16 {
        self.shutdown_port
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        let catalina = self.container_home.join("bin/catalina.sh");
        for path in [&self.container_home, &self.container_base, &catalina] {
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
        extra_args: &[String],
    ) -> Result<(), HarnessError> {
        patcher.replace_property(
            CATALINA_PROPERTIES,
            "tomcat.http.port",
            &ports.http.to_string(),
            true,
        )?;
        patcher.replace_property(
            CATALINA_PROPERTIES,
            "tomcat.https.port",
            &ports.https.to_string(),
            true,
        )?;
        patcher.replace_property(
            CATALINA_PROPERTIES,
            "tomcat.backchannel.port",
            &ports.backchannel.to_string(),
            true,
        )?;
        patcher.replace_property(
            CATALINA_PROPERTIES,
            "tomcat.shutdown.port",
            &self.shutdown_port.to_string(),
            true,
        )?;
        patcher.replace_property(
            CATALINA_PROPERTIES,
            "tomcat.shutdown.token",
            &self.shutdown_token,
            true,
        )?;

        // catalina.sh sources setenv.sh, so -D flags travel through
        // CATALINA_OPTS instead of the command line.
        let idp_home_arg = format!("-Didp.home={}", patcher.home().display());
        let system_props = std::iter::once(&idp_home_arg)
            .chain(extra_args.iter().filter(|arg| arg.starts_with("-D")));
        for arg in system_props {
            patcher.append_at_end(
                SETENV,
                &format!("CATALINA_OPTS=\"$CATALINA_OPTS {arg}\"\n"),
            )?;
        }
        Ok(())
    }

    pub fn build_command(&self, _java: &str, _home_root: &Path) -> Vec<String> {
        vec![
            self.container_home
                .join("bin/catalina.sh")
                .display()
                .to_string(),
            "run".to_string(),
        ]
    }

    pub fn build_envs(&self, java_home: Option<&Path>) -> HashMap<String, String> {
        let mut envs = HashMap::from([
            (
                "CATALINA_HOME".to_string(),
                self.container_home.display().to_string(),
            ),
            (
                "CATALINA_BASE".to_string(),
                self.container_base.display().to_string(),
            ),
            (
                "CATALINA_TMPDIR".to_string(),
                self.container_base.join("temp").display().to_string(),
            ),
        ]);
        if let Some(java_home) = java_home {
            envs.insert("JAVA_HOME".to_string(), java_home.display().to_string());
        }
        envs
    }

    /// Token-based shutdown handshake: connect to the shutdown port, write
    /// the shared token, close. The caller still force-kills afterwards.
    pub fn graceful_shutdown(&self, _child: &mut Child) -> std::io::Result<()> {
        let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), self.shutdown_port);
        let mut stream = TcpStream::connect_timeout(&addr, Duration::from_secs(2))?;
        stream.write_all(self.shutdown_token.as_bytes())?;
        stream.flush()
    }
}
