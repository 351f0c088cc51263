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
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Process-wide discriminator so two classes staged within the same clock
/// millisecond never collide on directory name.
static STAGE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Per-test-class working directory under the shared build output directory.
///
/// Everything one test class touches on disk (the staged server home, captured
/// stdout/stderr) lives below [`TestContext::base_dir`]; the directory name
/// combines a timestamp, the test-class name, and a sequence number.
#[derive(Debug)]
pub struct TestContext {
    test_name: String,
    base_dir: PathBuf,
}

impl TestContext {
    /// Creates a context named after `test_name`, falling back to the current
    /// thread name (the test-runner convention) or a fresh UUID.
    pub fn new(test_name: Option<String>, parent_dir: &Path) -> Self {
        let test_name = test_name
            .or_else(|| std::thread::current().name().map(sanitize_name))
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let sequence = STAGE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let stamp = chrono::Utc::now().timestamp_millis();
        let base_dir = parent_dir.join(format!("{stamp}-{test_name}-{sequence:04}"));
        Self {
            test_name,
            base_dir,
        }
    }

    pub fn ensure_created(&self) -> Result<(), HarnessError> {
        fs::create_dir_all(&self.base_dir).map_err(|e| HarnessError::DirectoryCreation {
            path: self.base_dir.clone(),
            source: e,
        })
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn server_stdout_path(&self) -> PathBuf {
        self.base_dir.join("server_stdout.log")
    }

    pub fn server_stderr_path(&self) -> PathBuf {
        self.base_dir.join("server_stderr.log")
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' {
            c
        } else {
            '-'
        })
        .collect()
}
