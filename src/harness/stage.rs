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

//! Staging of an isolated, mutable server home from the shared read-only
//! distribution template, and its conditional removal after the test class.

use crate::harness::config::ContainerKind;
use crate::harness::context::TestContext;
use crate::harness::error::HarnessError;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory-name pattern of the unpacked product distribution.
const DISTRIBUTION_PATTERN: &str = r"^idp-server-(.+)$";

/// Subtrees copied from the template into every staged home. `logs` and `tmp`
/// ship empty but must exist before the server starts, so their absence in
/// the template is caught here rather than at startup.
const COMMON_SUBTREES: &[&str] = &["conf", "credentials", "metadata", "webapp", "logs", "tmp"];

/// An isolated, mutable copy of the server product owned by exactly one test
/// class for its lifetime.
#[derive(Debug, Clone)]
pub struct DistributionHome {
    root: PathBuf,
    version: String,
    container_base: PathBuf,
    container_home: PathBuf,
}

impl DistributionHome {
    pub fn new(
        root: impl Into<PathBuf>,
        version: impl Into<String>,
        container_base: impl Into<PathBuf>,
        container_home: impl Into<PathBuf>,
    ) -> Self {
        Self {
            root: root.into(),
            version: version.into(),
            container_base: container_base.into(),
            container_home: container_home.into(),
        }
    }

    /// Root of the mutable per-class copy.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Product version parsed from the distribution directory name.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Container-specific configuration subtree inside the home.
    pub fn container_base(&self) -> &Path {
        &self.container_base
    }

    /// Shared, read-only unpacked container binaries.
    pub fn container_home(&self) -> &Path {
        &self.container_home
    }
}

/// Derives fresh server homes from the shared distribution template and
/// removes them after a clean run.
#[derive(Debug)]
pub struct DistributionStager {
    build_dir: PathBuf,
}

impl DistributionStager {
    pub fn new(build_dir: impl Into<PathBuf>) -> Self {
        Self {
            build_dir: build_dir.into(),
        }
    }

    /// Finds the single unpacked distribution under the build directory and
    /// parses its version from the directory name. Zero or multiple matches
    /// fail fast.
    pub fn resolve_distribution(&self) -> Result<(PathBuf, String), HarnessError> {
        resolve_unique(&self.build_dir, DISTRIBUTION_PATTERN)
    }

    /// Finds the single unpacked container-home directory for `kind`.
    pub fn resolve_container_home(&self, kind: ContainerKind) -> Result<PathBuf, HarnessError> {
        let pattern = match kind {
            ContainerKind::Jetty => r"^jetty-home-(.+)$",
            ContainerKind::Tomcat => r"^apache-tomcat-(.+)$",
        };
        resolve_unique(&self.build_dir, pattern).map(|(path, _)| path)
    }

    /// Deep-copies the template subtrees into a fresh home under the test
    /// context directory and verifies the runtime directories the product
    /// expects are present.
    pub fn stage(
        &self,
        template: &Path,
        version: &str,
        context: &TestContext,
        kind: ContainerKind,
    ) -> Result<DistributionHome, HarnessError> {
        context.ensure_created()?;
        let root = context.base_dir().join(format!("idp-server-{version}"));
        fs::create_dir_all(&root).map_err(|e| HarnessError::DirectoryCreation {
            path: root.clone(),
            source: e,
        })?;

        let base_name = container_base_name(kind);
        let mut subtrees: Vec<&str> = COMMON_SUBTREES.to_vec();
        subtrees.push(base_name);

        for name in subtrees {
            let from = template.join(name);
            if !from.is_dir() {
                return Err(HarnessError::MissingPath { path: from });
            }
            copy_dir_all(&from, &root.join(name))?;
        }

        for relative in required_runtime_dirs(kind) {
            let dir = root.join(relative);
            if !dir.is_dir() {
                return Err(HarnessError::MissingPath { path: dir });
            }
        }

        let container_home = self.resolve_container_home(kind)?;
        info!(home = %root.display(), version, container = kind.name(), "staged server home");
        Ok(DistributionHome::new(
            root.clone(),
            version,
            root.join(base_name),
            container_home,
        ))
    }

    /// Removes the per-class directory tree, unless the class failed or
    /// retention was requested; debugging evidence wins over disk hygiene.
    pub fn teardown(
        &self,
        context: &TestContext,
        class_failed: bool,
        keep_override: bool,
    ) -> Result<(), HarnessError> {
        if class_failed || keep_override {
            info!(
                dir = %context.base_dir().display(),
                class_failed,
                keep_override,
                "retaining staged home"
            );
            return Ok(());
        }
        if context.base_dir().exists() {
            fs::remove_dir_all(context.base_dir())?;
            debug!(dir = %context.base_dir().display(), "removed staged home");
        }
        Ok(())
    }
}

fn container_base_name(kind: ContainerKind) -> &'static str {
    match kind {
        ContainerKind::Jetty => "jetty-base",
        ContainerKind::Tomcat => "tomcat-base",
    }
}

fn required_runtime_dirs(kind: ContainerKind) -> &'static [&'static str] {
    match kind {
        ContainerKind::Jetty => &["logs", "tmp", "jetty-base/logs", "jetty-base/tmp"],
        ContainerKind::Tomcat => &[
            "logs",
            "tmp",
            "tomcat-base/logs",
            "tomcat-base/temp",
            "tomcat-base/webapps",
        ],
    }
}

fn resolve_unique(dir: &Path, pattern: &str) -> Result<(PathBuf, String), HarnessError> {
    let re = Regex::new(pattern).map_err(|e| HarnessError::InvalidPattern {
        pattern: pattern.to_string(),
        source: e,
    })?;

    let entries = fs::read_dir(dir).map_err(|e| HarnessError::FileRead {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut matches = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(caps) = re.captures(name) {
            let captured = caps
                .get(1)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            matches.push((entry.path(), captured));
        }
    }

    match matches.len() {
        0 => Err(HarnessError::DistributionNotFound {
            dir: dir.to_path_buf(),
            pattern: pattern.to_string(),
        }),
        1 => Ok(matches.remove(0)),
        count => Err(HarnessError::DistributionAmbiguous {
            dir: dir.to_path_buf(),
            pattern: pattern.to_string(),
            count,
        }),
    }
}

fn copy_dir_all(from: &Path, to: &Path) -> Result<(), HarnessError> {
    fs::create_dir_all(to).map_err(|e| HarnessError::DirectoryCreation {
        path: to.to_path_buf(),
        source: e,
    })?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        if source.is_dir() {
            copy_dir_all(&source, &target)?;
        } else {
            fs::copy(&source, &target).map_err(|e| HarnessError::CopyFailed {
                from: source.clone(),
                to: target.clone(),
                source: e,
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_template(build_dir: &Path, version: &str) -> PathBuf {
        let template = build_dir.join(format!("idp-server-{version}"));
        for subtree in COMMON_SUBTREES {
            fs::create_dir_all(template.join(subtree)).unwrap();
        }
        fs::create_dir_all(template.join("jetty-base/logs")).unwrap();
        fs::create_dir_all(template.join("jetty-base/tmp")).unwrap();
        fs::write(template.join("jetty-base/start.ini"), "jetty.http.port=8080\n").unwrap();
        fs::write(template.join("conf/idp.properties"), "idp.entityID = https://idp.example.org\n")
            .unwrap();
        fs::write(template.join("credentials/idp.key"), "key material").unwrap();
        template
    }

    fn make_jetty_home(build_dir: &Path) {
        let home = build_dir.join("jetty-home-12.0.9");
        fs::create_dir_all(&home).unwrap();
        fs::write(home.join("start.jar"), "").unwrap();
    }

    #[test]
    fn resolve_distribution_parses_version() {
        let dir = TempDir::new().unwrap();
        make_template(dir.path(), "5.1.3");
        let stager = DistributionStager::new(dir.path());
        let (path, version) = stager.resolve_distribution().unwrap();
        assert_eq!(version, "5.1.3");
        assert!(path.ends_with("idp-server-5.1.3"));
    }

    #[test]
    fn resolve_distribution_fails_on_zero_matches() {
        let dir = TempDir::new().unwrap();
        let stager = DistributionStager::new(dir.path());
        assert!(matches!(
            stager.resolve_distribution(),
            Err(HarnessError::DistributionNotFound { .. })
        ));
    }

    #[test]
    fn resolve_distribution_fails_on_ambiguous_matches() {
        let dir = TempDir::new().unwrap();
        make_template(dir.path(), "5.1.3");
        make_template(dir.path(), "5.1.4");
        let stager = DistributionStager::new(dir.path());
        assert!(matches!(
            stager.resolve_distribution(),
            Err(HarnessError::DistributionAmbiguous { count: 2, .. })
        ));
    }

    #[test]
    fn stage_copies_subtrees_and_preserves_empty_dirs() {
        let dir = TempDir::new().unwrap();
        let template = make_template(dir.path(), "5.1.3");
        make_jetty_home(dir.path());
        let stager = DistributionStager::new(dir.path());
        let context = TestContext::new(Some("StageTest".to_string()), dir.path());

        let home = stager
            .stage(&template, "5.1.3", &context, ContainerKind::Jetty)
            .unwrap();

        assert_eq!(home.version(), "5.1.3");
        assert!(home.root().join("conf/idp.properties").is_file());
        assert!(home.root().join("credentials/idp.key").is_file());
        assert!(home.root().join("logs").is_dir());
        assert!(home.root().join("tmp").is_dir());
        assert!(home.container_base().join("start.ini").is_file());
        assert!(home.container_home().ends_with("jetty-home-12.0.9"));
    }

    #[test]
    fn stage_twice_produces_non_colliding_homes() {
        let dir = TempDir::new().unwrap();
        let template = make_template(dir.path(), "5.1.3");
        make_jetty_home(dir.path());
        let stager = DistributionStager::new(dir.path());

        let ctx_a = TestContext::new(Some("ClassA".to_string()), dir.path());
        let ctx_b = TestContext::new(Some("ClassB".to_string()), dir.path());
        let home_a = stager
            .stage(&template, "5.1.3", &ctx_a, ContainerKind::Jetty)
            .unwrap();
        let home_b = stager
            .stage(&template, "5.1.3", &ctx_b, ContainerKind::Jetty)
            .unwrap();
        assert_ne!(home_a.root(), home_b.root());
    }

    #[test]
    fn stage_fails_fast_on_missing_template_subtree() {
        let dir = TempDir::new().unwrap();
        let template = make_template(dir.path(), "5.1.3");
        make_jetty_home(dir.path());
        fs::remove_dir_all(template.join("tmp")).unwrap();
        let stager = DistributionStager::new(dir.path());
        let context = TestContext::new(Some("MissingTmp".to_string()), dir.path());

        let err = stager
            .stage(&template, "5.1.3", &context, ContainerKind::Jetty)
            .unwrap_err();
        match err {
            HarnessError::MissingPath { path } => assert!(path.ends_with("tmp")),
            other => panic!("expected MissingPath, got {other}"),
        }
    }

    #[test]
    fn teardown_deletes_on_success_and_retains_on_failure() {
        let dir = TempDir::new().unwrap();
        let template = make_template(dir.path(), "5.1.3");
        make_jetty_home(dir.path());
        let stager = DistributionStager::new(dir.path());

        let clean = TestContext::new(Some("CleanRun".to_string()), dir.path());
        stager
            .stage(&template, "5.1.3", &clean, ContainerKind::Jetty)
            .unwrap();
        stager.teardown(&clean, false, false).unwrap();
        assert!(!clean.base_dir().exists());

        let failed = TestContext::new(Some("FailedRun".to_string()), dir.path());
        stager
            .stage(&template, "5.1.3", &failed, ContainerKind::Jetty)
            .unwrap();
        stager.teardown(&failed, true, false).unwrap();
        assert!(failed.base_dir().exists());

        let kept = TestContext::new(Some("KeptRun".to_string()), dir.path());
        stager
            .stage(&template, "5.1.3", &kept, ContainerKind::Jetty)
            .unwrap();
        stager.teardown(&kept, false, true).unwrap();
        assert!(kept.base_dir().exists());
    }
}
