// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! This crate contains the core types shared by the cadence engine components.

pub mod config;
pub mod config_loader;
pub mod errors;
pub mod expression;
pub mod identifiers;
pub mod process;
pub mod time;

/// Variables carried by records and stored per scope. Ordered so that serialized forms are stable.
pub type Variables = std::collections::BTreeMap<String, serde_json::Value>;
