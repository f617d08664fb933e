//! Bit-addressable cursor over a fixed byte buffer.
//!
//! Reads and writes address the buffer directly, so the cursor can move
//! freely. Writes patch bits in place so a field can be rewritten after the
//! data around it has been laid out (bitrate index and `main_data_start` are
//! only known once a whole stream has been seen).
//!
//! Every operation clamps at the end of the buffer instead of failing: reads
//! past the end return the bits that were available (or 0), writes past the end
//! are dropped. Callers validate counts against [`BitStream::bits_remaining`]
//! where correctness matters.

#[derive(Debug, Clone)]
pub struct BitStream<B> {
    buf: B,
    pos: u64,
}

pub type SliceBitStream<'a> = BitStream<&'a [u8]>;
pub type SliceBitStreamMut<'a> = BitStream<&'a mut [u8]>;

impl<B: AsRef<[u8]>> BitStream<B> {
    pub fn new(buf: B) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn get_ref(&self) -> &B {
        &self.buf
    }

    pub fn into_inner(self) -> B {
        self.buf
    }

    #[inline(always)]
    pub fn size_in_bytes(&self) -> usize {
        self.buf.as_ref().len()
    }

    #[inline(always)]
    pub fn len_bits(&self) -> u64 {
        (self.size_in_bytes() as u64) << 3
    }

    /// Current position in bits from the start of the buffer.
    #[inline(always)]
    pub fn tell(&self) -> u64 {
        self.pos
    }

    #[inline(always)]
    pub fn bits_remaining(&self) -> u64 {
        self.len_bits() - self.pos
    }

    /// True once the byte cursor has reached the end. A partially consumed
    /// last byte does not count as the end.
    #[inline(always)]
    pub fn eos(&self) -> bool {
        (self.pos >> 3) as usize >= self.size_in_bytes()
    }

    pub fn seek_absolute(&mut self, bit_offset: u64) {
        self.pos = bit_offset.min(self.len_bits());
    }

    pub fn seek_relative(&mut self, bit_offset: i64) {
        self.seek_absolute(self.pos.saturating_add_signed(bit_offset));
    }

    pub fn seek_to_end(&mut self) {
        self.pos = self.len_bits();
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    pub fn seek_to_next_byte(&mut self) {
        if !self.eos() {
            self.pos = (self.pos + 7) & !7;
        }
    }

    #[inline(always)]
    pub fn read_bit(&mut self) -> bool {
        self.read_bits(1) != 0
    }

    /// Reads up to 32 bits, most significant first. Fewer bits are returned
    /// (right-justified) when the buffer ends early.
    pub fn read_bits(&mut self, n: u32) -> u32 {
        debug_assert!(n <= 32, "read_bits({n})");

        let n = u64::from(n.min(32)).min(self.bits_remaining()) as u32;
        if n == 0 {
            return 0;
        }

        let value = self.peek(n);
        self.pos += u64::from(n);
        value
    }

    /// `n` is 1 to 32 and within the buffer.
    #[inline]
    fn peek(&self, n: u32) -> u32 {
        let bytes = self.buf.as_ref();
        let start = (self.pos >> 3) as usize;
        let skip = (self.pos & 7) as u32;

        // 40 bits cover any 32-bit read at a bit offset below 8
        let window = (0..5).fold(0u64, |acc, i| {
            acc << 8 | u64::from(bytes.get(start + i).copied().unwrap_or(0))
        });
        ((window >> (40 - skip - n)) & ((1u64 << n) - 1)) as u32
    }

    fn read_aligned_bytes<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.seek_to_next_byte();
        if self.bits_remaining() < (N as u64) << 3 {
            self.seek_to_end();
            return None;
        }

        let start = (self.pos >> 3) as usize;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf.as_ref()[start..start + N]);
        self.pos += (N as u64) << 3;
        Some(out)
    }

    /// Aligned reads first move to the next byte boundary.
    pub fn read_aligned8(&mut self) -> u8 {
        self.read_aligned_bytes::<1>().map_or(0, |b| b[0])
    }

    pub fn read_aligned16(&mut self) -> u16 {
        self.read_aligned_bytes::<2>().map_or(0, u16::from_be_bytes)
    }

    pub fn read_aligned32(&mut self) -> u32 {
        self.read_aligned_bytes::<4>().map_or(0, u32::from_be_bytes)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> BitStream<B> {
    /// Writes the low `n` bits of `value`, preserving the neighbouring bits of
    /// partially covered bytes.
    pub fn write_bits(&mut self, value: u32, n: u32) {
        debug_assert!(n <= 32, "write_bits({n})");

        let mut remaining = u64::from(n.min(32)).min(self.bits_remaining()) as u32;
        let bytes = self.buf.as_mut();

        while remaining > 0 {
            let byte = (self.pos >> 3) as usize;
            let offset = (self.pos & 7) as u32;
            let chunk = remaining.min(8 - offset);
            let lsb = 8 - offset - chunk;

            let mask = (((1u16 << chunk) - 1) as u8) << lsb;
            let bits = (((value >> (remaining - chunk)) & ((1 << chunk) - 1)) as u8) << lsb;
            bytes[byte] = (bytes[byte] & !mask) | bits;

            self.pos += u64::from(chunk);
            remaining -= chunk;
        }
    }

    #[inline(always)]
    pub fn write_bit(&mut self, bit: bool) {
        self.write_bits(u32::from(bit), 1);
    }

    /// Zero-pads up to the next byte boundary.
    pub fn write_to_next_byte(&mut self) {
        let into = (self.pos & 7) as u32;
        if into != 0 {
            self.write_bits(0, 8 - into);
        }
    }

    fn write_aligned_bytes(&mut self, data: &[u8]) {
        self.write_to_next_byte();
        if self.bits_remaining() < (data.len() as u64) << 3 {
            self.seek_to_end();
            return;
        }

        let start = (self.pos >> 3) as usize;
        self.buf.as_mut()[start..start + data.len()].copy_from_slice(data);
        self.pos += (data.len() as u64) << 3;
    }

    pub fn write_aligned8(&mut self, value: u8) {
        self.write_aligned_bytes(&[value]);
    }

    pub fn write_aligned16(&mut self, value: u16) {
        self.write_aligned_bytes(&value.to_be_bytes());
    }

    pub fn write_aligned32(&mut self, value: u32) {
        self.write_aligned_bytes(&value.to_be_bytes());
    }

    /// Copies `count` bits from `src` at its current position, 32 bits at a time.
    pub fn copy_bits_from<S: AsRef<[u8]>>(&mut self, src: &mut BitStream<S>, count: u64) {
        let mut left = count;
        while left > 0 {
            let n = left.min(32) as u32;
            let bits = src.read_bits(n);
            self.write_bits(bits, n);
            left -= u64::from(n);
        }
    }
}
