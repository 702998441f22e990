// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Order preserving key encoding.
//!
//! Integers are written big endian so that byte order equals numeric order. Strings are written
//! with a length prefix which makes every encoded component self delimiting, so a prefix of
//! whole components can be used to scan all keys starting with these components.

use cadence_storage_api::{Result, StorageError};
use cadence_types::identifiers::Key;

#[derive(Debug, Default, Clone)]
pub struct KeyBuilder(Vec<u8>);

impl KeyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u64(mut self, value: u64) -> Self {
        self.0.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn key(self, key: Key) -> Self {
        self.u64(key.as_u64())
    }

    pub fn str(mut self, value: &str) -> Self {
        // strings longer than u32::MAX are not supported as key components
        self.0
            .extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.0.extend_from_slice(value.as_bytes());
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.0
    }
}

/// Reads the components of a key in the order they were written.
pub struct KeyReader<'a>(&'a [u8]);

impl<'a> KeyReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self(buf)
    }

    pub fn u64(&mut self) -> Result<u64> {
        let (head, tail) = self
            .0
            .split_first_chunk::<8>()
            .ok_or_else(|| StorageError::DataIntegrityError("truncated key".to_owned()))?;
        self.0 = tail;
        Ok(u64::from_be_bytes(*head))
    }

    pub fn key(&mut self) -> Result<Key> {
        self.u64().map(Key::from_raw)
    }

    pub fn str(&mut self) -> Result<&'a str> {
        let (len, tail) = self
            .0
            .split_first_chunk::<4>()
            .ok_or_else(|| StorageError::DataIntegrityError("truncated key".to_owned()))?;
        let len = u32::from_be_bytes(*len) as usize;
        if tail.len() < len {
            return Err(StorageError::DataIntegrityError(
                "truncated key".to_owned(),
            ));
        }
        let (value, tail) = tail.split_at(len);
        self.0 = tail;
        std::str::from_utf8(value).map_err(|e| StorageError::Conversion(e.into()))
    }
}
