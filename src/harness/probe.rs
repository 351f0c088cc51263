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

//! Bounded-retry polling used to synchronize with an externally-started
//! process: once for startup readiness, once for shutdown confirmation.

use crate::harness::error::HarnessError;
use std::thread;
use std::time::Duration;

/// Result of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Pending,
}

/// Terminal outcome of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwaitOutcome {
    Ready,
    TimedOut,
}

/// Polls `check` up to `max_attempts` times, sleeping `interval` between
/// attempts. A fatal error from `check` aborts the wait immediately; budget
/// exhaustion yields [`AwaitOutcome::TimedOut`] for the caller to convert
/// into its own failure.
pub fn await_condition<F>(
    mut check: F,
    max_attempts: u32,
    interval: Duration,
) -> Result<AwaitOutcome, HarnessError>
where
    F: FnMut(u32) -> Result<Readiness, HarnessError>,
{
    for attempt in 0..max_attempts {
        match check(attempt)? {
            Readiness::Ready => return Ok(AwaitOutcome::Ready),
            Readiness::Pending => {
                if attempt + 1 < max_attempts {
                    thread::sleep(interval);
                }
            }
        }
    }
    Ok(AwaitOutcome::TimedOut)
}

/// Blocking HTTP poll against the server's status page.
///
/// Readiness means more than an accepting socket: the response body must
/// begin with the expected sentinel. A 2xx answer carrying anything else
/// indicates some other service answered the port and is fatal immediately,
/// since further polling cannot fix a wrong-service-on-port condition.
#[derive(Debug)]
pub struct StatusProbe {
    client: reqwest::blocking::Client,
    url: String,
    sentinel: String,
}

impl StatusProbe {
    pub fn new(url: impl Into<String>, sentinel: impl Into<String>) -> Result<Self, HarnessError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| HarnessError::InvalidState {
                message: format!("failed to build status probe client: {e}"),
            })?;
        Ok(Self {
            client,
            url: url.into(),
            sentinel: sentinel.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One startup poll. Connection errors and non-2xx statuses (503, 404
    /// while the container is still deploying) are retryable.
    pub fn check_ready(&self) -> Result<Readiness, HarnessError> {
        let response = match self.client.get(&self.url).send() {
            Ok(response) => response,
            // Not listening yet.
            Err(_) => return Ok(Readiness::Pending),
        };

        if !response.status().is_success() {
            return Ok(Readiness::Pending);
        }

        let body = response.text().unwrap_or_default();
        if body.trim_start().starts_with(&self.sentinel) {
            Ok(Readiness::Ready)
        } else {
            Err(HarnessError::UnexpectedStatusBody {
                url: self.url.clone(),
                expected: self.sentinel.clone(),
                got: first_line(&body),
            })
        }
    }

    /// One shutdown poll: ready once the endpoint stops answering.
    pub fn check_stopped(&self) -> Readiness {
        match self.client.get(&self.url).send() {
            Ok(_) => Readiness::Pending,
            Err(_) => Readiness::Ready,
        }
    }
}

fn first_line(body: &str) -> String {
    let line = body.lines().next().unwrap_or("");
    let mut line = line.to_string();
    if line.len() > 120 {
        line.truncate(120);
    }
    line
}
