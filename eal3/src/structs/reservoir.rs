//! MP3 bit reservoir.
//!
//! Main data of a frame may start in the bytes left over by earlier frames.
//! The reservoir keeps those bytes so the decomposer can hand each granule its
//! complete main data. Occupancy is checked on every refill instead of
//! trusting the input.

use anyhow::{Result, bail};

use crate::structs::mpeg::MAX_MPEG_FRAME_BUFFER;
use crate::utils::errors::ReservoirError;

#[derive(Debug, Clone)]
pub struct Reservoir {
    buf: Vec<u8>,
    used: usize,
}

impl Default for Reservoir {
    fn default() -> Self {
        Self::with_capacity(MAX_MPEG_FRAME_BUFFER)
    }
}

impl Reservoir {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            used: 0,
        }
    }

    #[inline(always)]
    pub fn occupancy(&self) -> usize {
        self.used
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// The last `len` bytes, where a frame with `main_data_start == len`
    /// begins its main data.
    pub fn tail(&self, len: usize) -> Result<&[u8]> {
        if len > self.used {
            bail!(ReservoirError::Underflow {
                requested: len,
                available: self.used,
            });
        }
        Ok(&self.buf[self.used - len..self.used])
    }

    /// Keeps the last `keep` bytes at the front and appends `fresh` after them.
    pub fn refill(&mut self, keep: usize, fresh: &[u8]) -> Result<()> {
        if keep > self.used {
            bail!(ReservoirError::Underflow {
                requested: keep,
                available: self.used,
            });
        }

        let requested = keep + fresh.len();
        if requested > self.capacity() {
            bail!(ReservoirError::Overflow {
                requested,
                capacity: self.capacity(),
            });
        }

        self.buf.copy_within(self.used - keep..self.used, 0);
        self.buf[keep..requested].copy_from_slice(fresh);
        self.used = requested;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_unread_tail() -> anyhow::Result<()> {
        let mut res = Reservoir::with_capacity(8);
        res.refill(0, &[1, 2, 3, 4])?;
        assert_eq!(res.tail(2)?, &[3, 4]);

        res.refill(1, &[5, 6])?;
        assert_eq!(res.occupancy(), 3);
        assert_eq!(res.tail(3)?, &[4, 5, 6]);
        Ok(())
    }

    #[test]
    fn checked_occupancy() {
        let mut res = Reservoir::with_capacity(4);
        assert!(res.tail(1).is_err());

        let err = res.refill(0, &[0; 5]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReservoirError>(),
            Some(ReservoirError::Overflow {
                requested: 5,
                capacity: 4
            })
        ));

        let err = res.refill(2, &[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReservoirError>(),
            Some(ReservoirError::Underflow { .. })
        ));
    }
}
