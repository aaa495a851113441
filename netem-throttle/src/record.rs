//! In-band framing of delayed bytes.
//!
//! Each payload byte crosses the queue as a 9-byte record: an 8-byte big-endian deadline followed
//! by the byte. End of stream is a lone 8-byte all-zero deadline. The encoding never leaves the
//! process.
use crate::clock::Timestamp;

pub(crate) const DEADLINE_LEN: usize = 8;
pub(crate) const DATA_LEN: usize = DEADLINE_LEN + 1;

/// A decoded queue record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaggedByte {
    Data { deadline: Timestamp, payload: u8 },
    EndOfStream,
}

impl TaggedByte {
    /// Writes the wire form into `out` and returns the number of bytes used.
    pub(crate) fn encode(self, out: &mut [u8; DATA_LEN]) -> usize {
        match self {
            TaggedByte::Data { deadline, payload } => {
                out[..DEADLINE_LEN].copy_from_slice(&deadline.as_nanos().to_be_bytes());
                out[DEADLINE_LEN] = payload;
                DATA_LEN
            }
            TaggedByte::EndOfStream => {
                out[..DEADLINE_LEN].fill(0);
                DEADLINE_LEN
            }
        }
    }
}

/// Reads a deadline header. `None` is the end-of-stream sentinel.
pub(crate) fn decode_deadline(header: [u8; DEADLINE_LEN]) -> Option<Timestamp> {
    Timestamp::from_nanos(u64::from_be_bytes(header))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;

    #[test]
    fn data_record_is_deadline_then_payload() {
        let deadline = Timestamp::from_nanos(0x0102_0304_0506_0708).unwrap();
        let mut out = [0xffu8; DATA_LEN];
        let n = TaggedByte::Data {
            deadline,
            payload: 0x42,
        }
        .encode(&mut out);

        assert_eq!(n, 9);
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8, 0x42]);

        let mut header = [0u8; DEADLINE_LEN];
        header.copy_from_slice(&out[..DEADLINE_LEN]);
        assert_eq!(decode_deadline(header), Some(deadline));
    }

    #[test]
    fn sentinel_is_eight_zero_bytes() {
        let mut out = [0xffu8; DATA_LEN];
        let n = TaggedByte::EndOfStream.encode(&mut out);
        assert_eq!(n, 8);
        assert_eq!(&out[..n], &[0u8; 8]);
        assert_eq!(decode_deadline([0; DEADLINE_LEN]), None);
    }

    #[test]
    fn live_deadlines_never_collide_with_sentinel() {
        let deadline = clock::now();
        let mut out = [0u8; DATA_LEN];
        TaggedByte::Data {
            deadline,
            payload: 0,
        }
        .encode(&mut out);
        assert_ne!(&out[..DEADLINE_LEN], &[0u8; DEADLINE_LEN]);
    }
}
