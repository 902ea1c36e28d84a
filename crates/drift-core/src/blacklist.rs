//! IP blacklist file parsing and containment testing.
//!
//! Three line-oriented formats are understood:
//!
//! - CIDR: `1.2.3.0/24`
//! - P2P: `label:1.2.3.4-1.2.3.8`
//! - DAT: `1.2.3.4 - 1.2.3.8 , 0 , label`
//!
//! Lookup is O(1) average: ranges are clipped into 256 buckets keyed by the
//! address's first octet, and each bucket holds a small sorted list searched
//! by binary search. Re-emission produces a CIDR list covering exactly the
//! same addresses, not necessarily the original text.

use crate::error::{CoreError, Result};
use std::net::Ipv4Addr;

/// One inclusive IPv4 range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    /// First address, as a big-endian integer.
    pub start: u32,
    /// Last address, inclusive.
    pub end: u32,
}

/// Recognised blacklist file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlacklistFormat {
    /// One CIDR block per line.
    Cidr,
    /// `label:start-end` per line.
    P2p,
    /// `start - end , score , label` per line.
    Dat,
}

/// A parsed blacklist with constant-time average containment checks.
pub struct Blacklist {
    /// Ranges clipped to each first-octet bucket, sorted by start.
    buckets: Vec<Vec<IpRange>>,
    /// Number of merged ranges before clipping.
    range_count: usize,
}

impl Blacklist {
    /// An empty blacklist that contains nothing.
    #[must_use]
    pub fn empty() -> Self {
        Blacklist {
            buckets: vec![Vec::new(); 256],
            range_count: 0,
        }
    }

    /// Parse blacklist text in the given format.
    ///
    /// Blank lines and `#`-comments are ignored. A malformed line fails the
    /// whole parse; a blacklist silently missing entries is worse than a
    /// startup error.
    pub fn parse(text: &str, format: BlacklistFormat) -> Result<Self> {
        let mut ranges = Vec::new();
        for (number, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let range = match format {
                BlacklistFormat::Cidr => parse_cidr_line(line),
                BlacklistFormat::P2p => parse_p2p_line(line),
                BlacklistFormat::Dat => parse_dat_line(line),
            }
            .map_err(|err| {
                CoreError::Configuration(format!("blacklist line {}: {err}", number + 1))
            })?;
            ranges.push(range);
        }
        Ok(Blacklist::from_ranges(ranges))
    }

    /// Build from raw ranges, merging overlaps.
    #[must_use]
    pub fn from_ranges(mut ranges: Vec<IpRange>) -> Self {
        ranges.sort_by_key(|r| r.start);

        let mut merged: Vec<IpRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if range.start <= last.end.saturating_add(1) => {
                    last.end = last.end.max(range.end);
                }
                _ => merged.push(range),
            }
        }

        let mut buckets = vec![Vec::new(); 256];
        for range in &merged {
            let first_bucket = (range.start >> 24) as usize;
            let last_bucket = (range.end >> 24) as usize;
            for bucket in first_bucket..=last_bucket {
                let bucket_start = (bucket as u32) << 24;
                let bucket_end = bucket_start | 0x00FF_FFFF;
                buckets[bucket].push(IpRange {
                    start: range.start.max(bucket_start),
                    end: range.end.min(bucket_end),
                });
            }
        }

        Blacklist {
            buckets,
            range_count: merged.len(),
        }
    }

    /// True when the address is covered.
    #[must_use]
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let value = u32::from(addr);
        let bucket = &self.buckets[(value >> 24) as usize];

        // Last range starting at or before the address.
        let idx = match bucket.binary_search_by_key(&value, |r| r.start) {
            Ok(_) => return true,
            Err(0) => return false,
            Err(idx) => idx - 1,
        };
        value <= bucket[idx].end
    }

    /// Number of merged ranges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.range_count
    }

    /// True when nothing is covered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.range_count == 0
    }

    /// All merged ranges in ascending order.
    #[must_use]
    pub fn ranges(&self) -> Vec<IpRange> {
        let mut out: Vec<IpRange> = Vec::with_capacity(self.range_count);
        for bucket in &self.buckets {
            for range in bucket {
                // Clipped continuations rejoin their predecessor.
                match out.last_mut() {
                    Some(last) if range.start == last.end.wrapping_add(1) && range.start != 0 => {
                        last.end = range.end;
                    }
                    _ => out.push(*range),
                }
            }
        }
        out
    }

    /// Emit the covered address space as CIDR blocks.
    #[must_use]
    pub fn emit_cidr(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for range in self.ranges() {
            let mut start = range.start;
            loop {
                // Largest aligned power-of-two block fitting at `start`.
                let max_align = if start == 0 { 32 } else { start.trailing_zeros() };
                let remaining = (range.end - start) as u64 + 1;
                let max_size = 63 - remaining.leading_zeros(); // floor(log2)
                let bits = max_align.min(max_size);
                let prefix = 32 - bits;
                lines.push(format!("{}/{prefix}", Ipv4Addr::from(start)));

                let block = 1u64 << bits;
                let next = start as u64 + block;
                if next > range.end as u64 {
                    break;
                }
                start = next as u32;
            }
        }
        lines
    }
}

fn parse_addr(text: &str) -> Result<u32> {
    text.trim()
        .parse::<Ipv4Addr>()
        .map(u32::from)
        .map_err(|_| CoreError::Configuration(format!("invalid IPv4 address '{text}'")))
}

fn parse_cidr_line(line: &str) -> Result<IpRange> {
    let (addr, prefix) = match line.split_once('/') {
        Some((addr, prefix)) => {
            let prefix: u32 = prefix
                .trim()
                .parse()
                .map_err(|_| CoreError::Configuration(format!("invalid prefix in '{line}'")))?;
            if prefix > 32 {
                return Err(CoreError::Configuration(format!(
                    "prefix out of range in '{line}'"
                )));
            }
            (parse_addr(addr)?, prefix)
        }
        None => (parse_addr(line)?, 32),
    };

    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    let start = addr & mask;
    Ok(IpRange {
        start,
        end: start | !mask,
    })
}

fn parse_p2p_line(line: &str) -> Result<IpRange> {
    // The label may itself contain ':'; the range follows the last one.
    let (_, range_text) = line
        .rsplit_once(':')
        .ok_or_else(|| CoreError::Configuration(format!("missing ':' in '{line}'")))?;
    let (start, end) = range_text
        .split_once('-')
        .ok_or_else(|| CoreError::Configuration(format!("missing '-' in '{line}'")))?;
    ordered_range(parse_addr(start)?, parse_addr(end)?, line)
}

fn parse_dat_line(line: &str) -> Result<IpRange> {
    let range_text = line
        .split(',')
        .next()
        .unwrap_or_default();
    let (start, end) = range_text
        .split_once('-')
        .ok_or_else(|| CoreError::Configuration(format!("missing '-' in '{line}'")))?;
    ordered_range(parse_addr(start)?, parse_addr(end)?, line)
}

fn ordered_range(start: u32, end: u32, line: &str) -> Result<IpRange> {
    if start > end {
        return Err(CoreError::Configuration(format!(
            "range start after end in '{line}'"
        )));
    }
    Ok(IpRange { start, end })
}
