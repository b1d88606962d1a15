// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Packet timestamps.
//!
//! A [`Timestamp`] is a totally ordered `i64`. The extremes of the range are
//! reserved for sentinels:
//!
//! ```text
//! UNSET < UNSTARTED < PRE_STREAM < MIN <= ordinary range <= MAX
//!       < POST_STREAM < ONE_OVER_POST_STREAM < DONE
//! ```
//!
//! `PRE_STREAM` and `POST_STREAM` may carry a single packet on a stream that
//! holds nothing else (a whole-stream summary). `DONE` is only ever used as a
//! timestamp bound meaning "this stream will never carry another packet".

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const UNSET: Self = Self(i64::MIN);
    pub const UNSTARTED: Self = Self(i64::MIN + 1);
    pub const PRE_STREAM: Self = Self(i64::MIN + 2);
    pub const MIN: Self = Self(i64::MIN + 3);
    pub const MAX: Self = Self(i64::MAX - 3);
    pub const POST_STREAM: Self = Self(i64::MAX - 2);
    pub const ONE_OVER_POST_STREAM: Self = Self(i64::MAX - 1);
    pub const DONE: Self = Self(i64::MAX);

    /// Creates a timestamp from a raw value. Values outside the ordinary range
    /// alias the corresponding sentinel.
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i64 {
        self.0
    }

    /// True for `MIN..=MAX`.
    pub const fn is_range_value(self) -> bool {
        self.0 >= Self::MIN.0 && self.0 <= Self::MAX.0
    }

    pub const fn is_special_value(self) -> bool {
        !self.is_range_value()
    }

    /// True when a packet may legitimately carry this timestamp.
    pub const fn is_allowed_in_stream(self) -> bool {
        self.is_range_value() || self.0 == Self::PRE_STREAM.0 || self.0 == Self::POST_STREAM.0
    }

    /// The lowest timestamp a stream may carry after a packet at `self`.
    ///
    /// Pre- and post-stream packets are the only packet of their stream, so the
    /// next allowed timestamp after either is `ONE_OVER_POST_STREAM`.
    pub const fn next_allowed_in_stream(self) -> Self {
        if self.0 == Self::PRE_STREAM.0 || self.0 >= Self::MAX.0 {
            Self::ONE_OVER_POST_STREAM
        } else {
            Self(self.0 + 1)
        }
    }

    /// Next timestamp in the ordinary range, saturating at the sentinels.
    pub const fn successor(self) -> Self {
        if self.is_range_value() && self.0 < Self::MAX.0 {
            Self(self.0 + 1)
        } else {
            self
        }
    }

    /// Adds a non-negative offset, saturating at `MAX` for range values.
    pub const fn saturating_offset(self, offset: i64) -> Self {
        if !self.is_range_value() {
            return self;
        }
        let sum = self.0.saturating_add(offset);
        if sum > Self::MAX.0 {
            Self::MAX
        } else {
            Self(sum)
        }
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::UNSET
    }
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UNSET => f.write_str("Timestamp::Unset"),
            Self::UNSTARTED => f.write_str("Timestamp::Unstarted"),
            Self::PRE_STREAM => f.write_str("Timestamp::PreStream"),
            Self::MIN => f.write_str("Timestamp::Min"),
            Self::MAX => f.write_str("Timestamp::Max"),
            Self::POST_STREAM => f.write_str("Timestamp::PostStream"),
            Self::ONE_OVER_POST_STREAM => f.write_str("Timestamp::OneOverPostStream"),
            Self::DONE => f.write_str("Timestamp::Done"),
            Self(v) => write!(f, "{v}"),
        }
    }
}
