//! Event record wire and file format.
//!
//! One record serializes the channel buffers of one acquisition cycle.
//! The same bytes go to disk and onto the wire, little-endian throughout:
//!
//! ```text
//! offset  size            field
//! ------  --------------  ------------------------------------------
//! 0       2               magic 0xABCD
//! 2       2               header length in 32-bit words
//! 4       4 * mask_words  channel mask, one bit per declared channel,
//!                         LSB first, zero-padded to a word boundary
//! ...     2 * enabled     sample counts of the enabled channels in
//!                         ascending channel order, plus one zero
//!                         half-word of padding when the count is odd
//! ...     4 * sum(len)    samples of the enabled channels, ascending
//!                         channel order, each channel contiguous
//! ```
//!
//! With `mask_words = ceil(ceil(declared / 8) / 4)`, the header length is
//! `1 + mask_words + ceil(enabled / 2)` words, computed before any payload
//! is appended.
//!
//! The header is self-describing: given the header length, exactly one
//! split between mask words and length-table words is consistent (growing
//! the mask can only grow the population count while it must shrink the
//! table), so a decoder recovers the full channel structure from the bytes
//! alone. Channel identity comes from bit position in the mask, never from
//! payload order, because enabled channels may be a sparse subset.

use crate::error::CodecError;
use bytes::{BufMut, Bytes, BytesMut};

/// Magic word opening every event record.
pub const EVENT_MAGIC: u16 = 0xABCD;

/// Per-channel buffers of one acquisition cycle, ready for serialization.
///
/// A channel is *enabled* in the record when it holds at least one
/// sample; empty buffers and never-filled channels are equivalent and
/// occupy no space beyond their cleared mask bit.
#[derive(Debug, Clone)]
pub struct EventRecord {
    channels: Vec<Option<Vec<u32>>>,
}

impl EventRecord {
    /// A record with `declared` channels, all absent.
    pub fn new(declared: usize) -> Self {
        Self {
            channels: vec![None; declared],
        }
    }

    /// Store samples for channel `index`. An empty buffer marks the
    /// channel absent.
    pub fn set_channel(&mut self, index: usize, samples: Vec<u32>) {
        if index >= self.channels.len() {
            return;
        }
        self.channels[index] = if samples.is_empty() {
            None
        } else {
            Some(samples)
        };
    }

    /// The samples of channel `index`, if enabled.
    pub fn channel(&self, index: usize) -> Option<&[u32]> {
        self.channels.get(index)?.as_deref()
    }

    /// Number of declared channels (mask bits).
    pub fn declared_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of enabled channels (set mask bits).
    pub fn enabled_channels(&self) -> usize {
        self.channels.iter().filter(|c| c.is_some()).count()
    }

    /// Indices and samples of the enabled channels, ascending.
    pub fn enabled(&self) -> impl Iterator<Item = (usize, &[u32])> {
        self.channels
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_deref().map(|s| (i, s)))
    }

    fn mask_bytes(&self) -> usize {
        self.channels.len().div_ceil(8)
    }

    fn mask_words(&self) -> usize {
        self.mask_bytes().div_ceil(4)
    }

    /// Header length in 32-bit words, as stored in the record.
    pub fn header_words(&self) -> u16 {
        (1 + self.mask_words() + self.enabled_channels().div_ceil(2)) as u16
    }

    /// Total encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        let payload: usize = self.enabled().map(|(_, s)| s.len()).sum();
        usize::from(self.header_words()) * 4 + payload * 4
    }

    /// Serialize the record.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        for (index, samples) in self.enabled() {
            if samples.len() > usize::from(u16::MAX) {
                return Err(CodecError::ChannelTooLong {
                    channel: index,
                    len: samples.len(),
                });
            }
        }

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u16_le(EVENT_MAGIC);
        buf.put_u16_le(self.header_words());

        let mut mask = vec![0u8; self.mask_words() * 4];
        for (index, _) in self.enabled() {
            mask[index / 8] |= 1 << (index % 8);
        }
        buf.put_slice(&mask);

        for (_, samples) in self.enabled() {
            buf.put_u16_le(samples.len() as u16);
        }
        if self.enabled_channels() % 2 == 1 {
            buf.put_u16_le(0);
        }

        for (_, samples) in self.enabled() {
            for &sample in samples {
                buf.put_u32_le(sample);
            }
        }

        Ok(buf.freeze())
    }

    /// Deserialize one record from the front of `buf`.
    ///
    /// Returns the record and the number of bytes consumed, so callers
    /// can walk a file of concatenated records. Declared channel count is
    /// recovered at mask granularity (a whole number of mask words).
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), CodecError> {
        if buf.len() < 4 {
            return Err(CodecError::Truncated {
                needed: 4,
                have: buf.len(),
            });
        }
        let magic = u16::from_le_bytes([buf[0], buf[1]]);
        if magic != EVENT_MAGIC {
            return Err(CodecError::BadMagic { found: magic });
        }
        let header_words = u16::from_le_bytes([buf[2], buf[3]]);
        if header_words == 0 {
            return Err(CodecError::MalformedHeader { header_words });
        }
        let header_len = usize::from(header_words) * 4;
        if buf.len() < header_len {
            return Err(CodecError::Truncated {
                needed: header_len,
                have: buf.len(),
            });
        }

        if header_words == 1 {
            return Ok((Self::new(0), 4));
        }

        // Find the unique mask-word count consistent with the header
        // length: popcount(mask) grows with the mask while the space left
        // for the length table shrinks, so at most one split fits.
        let spare_words = usize::from(header_words) - 1;
        let mut split = None;
        for mask_words in 1..=spare_words {
            let mask = &buf[4..4 + mask_words * 4];
            let enabled: usize = mask.iter().map(|b| b.count_ones() as usize).sum();
            if enabled.div_ceil(2) == spare_words - mask_words {
                split = Some((mask_words, enabled));
                break;
            }
        }
        let Some((mask_words, enabled)) = split else {
            return Err(CodecError::MalformedHeader { header_words });
        };

        let mask = &buf[4..4 + mask_words * 4];
        let declared = mask_words * 32;
        let mut record = Self::new(declared);

        let mut lengths = Vec::with_capacity(enabled);
        let table = &buf[4 + mask_words * 4..header_len];
        for i in 0..enabled {
            lengths.push(usize::from(u16::from_le_bytes([
                table[2 * i],
                table[2 * i + 1],
            ])));
        }

        let payload_words: usize = lengths.iter().sum();
        let total_len = header_len + payload_words * 4;
        if buf.len() < total_len {
            return Err(CodecError::Truncated {
                needed: total_len,
                have: buf.len(),
            });
        }

        let mut offset = header_len;
        let mut nth = 0;
        for index in 0..declared {
            if mask[index / 8] & (1 << (index % 8)) == 0 {
                continue;
            }
            let len = lengths[nth];
            nth += 1;
            let mut samples = Vec::with_capacity(len);
            for i in 0..len {
                let at = offset + i * 4;
                samples.push(u32::from_le_bytes([
                    buf[at],
                    buf[at + 1],
                    buf[at + 2],
                    buf[at + 3],
                ]));
            }
            offset += len * 4;
            record.set_channel(index, samples);
        }

        Ok((record, total_len))
    }
}
