// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Building blocks shared by the command processors.

pub(crate) mod catch_event;
pub(crate) mod command_distribution;
pub(crate) mod element_activation;
pub(crate) mod event_trigger;
pub(crate) mod expression;
pub(crate) mod incident;
pub(crate) mod variables;
