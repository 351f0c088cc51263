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

//! Test harness for running integration tests against a real server
//! distribution: per-class staging, configuration patching, port discovery,
//! and supervision of the container process.
//!
//! The usual entry point is [`TestOrchestrator`]:
//!
//! ```rust,ignore
//! let mut orchestrator = TestOrchestrator::builder()
//!     .test_name("Saml2SsoFlow")
//!     .build();
//! orchestrator.set_up()?;
//! let base = orchestrator.base_urls().unwrap().advertised();
//! // ... drive protocol flows against `base` ...
//! orchestrator.tear_down()?;
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod patch;
pub mod ports;
pub mod probe;
pub mod server;
pub mod stage;

pub use config::{ContainerKind, HarnessSettings, ServerConfig, ServerConfigBuilder};
pub use context::TestContext;
pub use error::HarnessError;
pub use orchestrator::{BaseUrls, TestOrchestrator, TestOrchestratorBuilder};
pub use patch::ConfigPatcher;
pub use ports::PortSet;
pub use probe::{await_condition, AwaitOutcome, Readiness, StatusProbe};
pub use server::{Container, ServerProcess, ServerState};
pub use stage::{DistributionHome, DistributionStager};
