// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use cadence_wal_protocol::Position;

use crate::Result;

pub trait ReadOnlyFsmTable {
    /// Position of the last command which was processed, `None` before the first one.
    fn get_last_processed_position(&self) -> Result<Option<Position>>;

    /// The next value of the partition local key counter.
    fn get_next_key_counter(&self) -> Result<u64>;
}

pub trait FsmTable: ReadOnlyFsmTable {
    fn put_last_processed_position(&mut self, position: Position) -> Result<()>;

    fn put_next_key_counter(&mut self, counter: u64) -> Result<()>;
}
