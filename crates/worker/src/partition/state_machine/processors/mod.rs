// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! One command handler per command which the partition processes.

pub(crate) mod bpmn;
pub(crate) mod creation;
pub(crate) mod distribution;
pub(crate) mod message;
pub(crate) mod message_subscription;
pub(crate) mod modification;
pub(crate) mod process_message_subscription;
pub(crate) mod signal;
pub(crate) mod timer;
