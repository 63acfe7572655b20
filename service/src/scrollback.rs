//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

use bytes::Bytes;
use std::collections::VecDeque;

/// Bounded ring of the most recent serial bytes of a session, replayed to
/// late-joining subscribers before live data resumes.
#[derive(Debug)]
pub struct ScrollbackRing {
    buffer: VecDeque<u8>,
    capacity: usize,
}

impl ScrollbackRing {
    /// Creates a ring holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Appends bytes, evicting the oldest beyond capacity.
    pub fn push(&mut self, bytes: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        // A chunk larger than the ring reduces to its tail
        if bytes.len() >= self.capacity {
            self.buffer.clear();
            self.buffer
                .extend(&bytes[bytes.len() - self.capacity..]);
            return;
        }
        let overflow = (self.buffer.len() + bytes.len()).saturating_sub(self.capacity);
        self.buffer.drain(..overflow);
        self.buffer.extend(bytes);
    }

    /// The retained bytes, oldest first.
    pub fn snapshot(&self) -> Bytes {
        let (front, back) = self.buffer.as_slices();
        let mut out = Vec::with_capacity(self.buffer.len());
        out.extend_from_slice(front);
        out.extend_from_slice(back);
        Bytes::from(out)
    }

    /// Number of retained bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
