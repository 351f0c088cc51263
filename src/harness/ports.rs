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

//! Ephemeral port discovery for one test class.
//!
//! Ports are probed with a loopback bind and released immediately, so a
//! window exists between allocation and the container actually binding them.
//! That check-then-act race is a known, accepted flake source for a test
//! harness sharing a host; the wide discovery range keeps the probability
//! low, and no reservation is held.

use crate::harness::error::HarnessError;
use rand::seq::SliceRandom;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};

pub const DISCOVERY_RANGE_LOW: u16 = 20000;
pub const DISCOVERY_RANGE_HIGH: u16 = 29999;

/// Returns `n` pairwise-distinct free ports from `[low, high]`, sorted
/// ascending so callers can assign roles positionally.
///
/// Every port in the range is probed at most once, in random order; finding
/// fewer than `n` free ports is an error, never a short result.
pub fn allocate(n: usize, low: u16, high: u16) -> Result<Vec<u16>, HarnessError> {
    if low > high {
        return Err(HarnessError::PortExhaustion {
            needed: n,
            found: 0,
            low,
            high,
        });
    }

    let mut candidates: Vec<u16> = (low..=high).collect();
    candidates.shuffle(&mut rand::rng());

    let mut free = Vec::with_capacity(n);
    for port in candidates {
        if free.len() == n {
            break;
        }
        let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port);
        if TcpListener::bind(addr).is_ok() {
            free.push(port);
        }
    }

    if free.len() < n {
        return Err(HarnessError::PortExhaustion {
            needed: n,
            found: free.len(),
            low,
            high,
        });
    }

    free.sort_unstable();
    Ok(free)
}

/// The four listener ports one server instance needs, assigned positionally
/// from an ascending allocation: HTTP, HTTPS, backchannel, auxiliary
/// (directory service). Immutable once allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSet {
    pub http: u16,
    pub https: u16,
    pub backchannel: u16,
    pub auxiliary: u16,
}

impl PortSet {
    pub fn allocate() -> Result<Self, HarnessError> {
        Self::allocate_in(DISCOVERY_RANGE_LOW, DISCOVERY_RANGE_HIGH)
    }

    pub fn allocate_in(low: u16, high: u16) -> Result<Self, HarnessError> {
        let ports = allocate(4, low, high)?;
        Ok(Self {
            http: ports[0],
            https: ports[1],
            backchannel: ports[2],
            auxiliary: ports[3],
        })
    }
}
