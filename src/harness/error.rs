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

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while staging, patching, or supervising the server under test.
///
/// Every precondition variant names the offending path or setting so a failed
/// test class is diagnosable from the message alone.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("required path does not exist: {path}")]
    MissingPath { path: PathBuf },

    #[error("config file to patch does not exist: {path}")]
    PatchTargetMissing { path: PathBuf },

    #[error("invalid patch pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to create directory {path}: {source}")]
    DirectoryCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to copy {from} to {to}: {source}")]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[error("needed {needed} free ports in [{low}, {high}] but only found {found}")]
    PortExhaustion {
        needed: usize,
        found: usize,
        low: u16,
        high: u16,
    },

    #[error("no directory matching `{pattern}` under {dir}")]
    DistributionNotFound { dir: PathBuf, pattern: String },

    #[error("{count} directories match `{pattern}` under {dir}, expected exactly one")]
    DistributionAmbiguous {
        dir: PathBuf,
        pattern: String,
        count: usize,
    },

    #[error("failed to spawn {binary}: {source}")]
    ProcessSpawn {
        binary: String,
        source: std::io::Error,
    },

    #[error(
        "{binary} exited during startup with code {exit_code:?}\n\
         === STDOUT ===\n{stdout}\n\n=== STDERR ===\n{stderr}"
    )]
    ProcessCrashed {
        binary: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("{binary} did not become ready at {url} after {attempts} attempts")]
    StartupTimeout {
        binary: String,
        url: String,
        attempts: u32,
    },

    #[error("unexpected status body from {url}: expected prefix {expected:?}, got {got:?}")]
    UnexpectedStatusBody {
        url: String,
        expected: String,
        got: String,
    },

    #[error("hook `{hook}` depends on unknown hook `{dependency}`")]
    UnknownHookDependency { hook: String, dependency: String },

    #[error("hook dependency cycle involving `{hook}`")]
    HookCycle { hook: String },

    #[error("invalid lifecycle state: {message}")]
    InvalidState { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
