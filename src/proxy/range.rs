// Media Stream Core - remote media download-and-stream engine
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! `Range: bytes=...` handling

use crate::error::{Result, StreamError};

/// Inclusive byte range of a response. `end` is `None` when the total size
/// is unknown and the client asked for everything from `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    /// Number of bytes in the range, if bounded
    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| end - self.start + 1)
    }

    /// `Content-Range` value for a known total size
    pub fn content_range(&self, size: u64) -> String {
        match self.end {
            Some(end) => format!("bytes {}-{}/{}", self.start, end, size),
            None => format!("bytes {}-/{}", self.start, size),
        }
    }

    /// Whether `position` is past the last byte of the range
    pub fn is_delivered(&self, position: u64) -> bool {
        matches!(self.end, Some(end) if position > end)
    }
}

/// Resolve the requested range against an optional known size.
///
/// A size of 0 counts as unknown. A missing or unparseable header means the
/// whole file. Only the first
/// range of a multi-range request is honoured. The end is clamped to the
/// last byte; a range starting past its end is `InvalidRange`.
pub fn parse_range(header: Option<&str>, size: Option<u64>) -> Result<ByteRange> {
    let last = size.filter(|s| *s > 0).map(|s| s - 1);
    let full = ByteRange {
        start: 0,
        end: last,
    };

    let Some(spec) = header.and_then(|h| h.trim().strip_prefix("bytes=")) else {
        return Ok(full);
    };
    let spec = spec.split(',').next().unwrap_or("").trim();
    let Some((start, end)) = spec.split_once('-') else {
        return Ok(full);
    };
    let (start, end) = (start.trim(), end.trim());

    let range = if start.is_empty() {
        // Suffix form: the last n bytes
        let Ok(suffix) = end.parse::<u64>() else {
            return Ok(full);
        };
        match last {
            Some(last) if suffix > 0 => ByteRange {
                start: (last + 1).saturating_sub(suffix),
                end: Some(last),
            },
            _ => return Err(StreamError::InvalidRange),
        }
    } else {
        let Ok(start) = start.parse::<u64>() else {
            return Ok(full);
        };
        let requested_end = if end.is_empty() {
            None
        } else {
            match end.parse::<u64>() {
                Ok(end) => Some(end),
                Err(_) => return Ok(full),
            }
        };

        let end = match (requested_end, last) {
            (Some(end), Some(last)) => Some(end.min(last)),
            (Some(end), None) => Some(end),
            (None, last) => last,
        };
        ByteRange { start, end }
    };

    match range.end {
        Some(end) if range.start > end => Err(StreamError::InvalidRange),
        _ => Ok(range),
    }
}
