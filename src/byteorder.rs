use std::mem::size_of;

pub trait WriteBytesBe {
    fn write_be(&self, dst: &mut Vec<u8>);
}

pub trait ReadBytesBe: Sized {
    /// Reads a value off the front of `src` and advances it.
    fn read_be(src: &mut &[u8]) -> Option<Self>;
}

macro_rules! impl_num_be {
    ($($t:ty),+) => { $(
        impl WriteBytesBe for $t {
            #[inline]
            fn write_be(&self, dst: &mut Vec<u8>) { dst.extend_from_slice(&self.to_be_bytes()); }
        }
        impl ReadBytesBe for $t {
            #[inline]
            fn read_be(src: &mut &[u8]) -> Option<Self> {
                let (bytes, rest) = src.split_first_chunk::<{ size_of::<$t>() }>()?;
                *src = rest;
                Some(<$t>::from_be_bytes(*bytes))
            }
        }
    )+ }
}

impl_num_be!(u8, u16, u32, u64);

impl<T: WriteBytesBe> WriteBytesBe for [T] {
    #[inline]
    fn write_be(&self, dst: &mut Vec<u8>) {
        self.iter().for_each(|item| item.write_be(dst));
    }
}

impl<T: WriteBytesBe, const N: usize> WriteBytesBe for [T; N] {
    #[inline]
    fn write_be(&self, dst: &mut Vec<u8>) {
        self.as_slice().write_be(dst);
    }
}

#[macro_export]
macro_rules! join_bytes_be {
    ( $($value:expr),+ $(,)? ) => {{
        let mut vec = Vec::<u8>::new();
        $( $crate::byteorder::WriteBytesBe::write_be(&$value, &mut vec); )+
        vec
    }};
}
