//! Copy-in sub-protocol: data chunks and the two ways to end them.

use crate::{errors::EncodeError, memory::MAX_SLAB_SIZE};

use super::{FrontendFrame, SlabWriter, cstr_len};

/// Largest CopyData payload that still fits a single slab.
pub const MAX_COPY_CHUNK: usize = MAX_SLAB_SIZE - 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyDataFrame<'a> {
    pub data: &'a [u8],
}

impl FrontendFrame for CopyDataFrame<'_> {
    const TAG: Option<u8> = Some(b'd');

    fn body_size(&self) -> usize {
        self.data.len()
    }

    fn write_body(&self, out: &mut SlabWriter<'_>) -> Result<(), EncodeError> {
        out.put_slice(self.data);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyDoneFrame;

impl FrontendFrame for CopyDoneFrame {
    const TAG: Option<u8> = Some(b'c');

    fn body_size(&self) -> usize {
        0
    }

    fn write_body(&self, _out: &mut SlabWriter<'_>) -> Result<(), EncodeError> {
        Ok(())
    }
}

/// Abort a copy-in; the server answers with an ErrorResponse carrying
/// `message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyFailFrame<'a> {
    pub message: &'a str,
}

impl FrontendFrame for CopyFailFrame<'_> {
    const TAG: Option<u8> = Some(b'f');

    fn body_size(&self) -> usize {
        cstr_len(self.message)
    }

    fn write_body(&self, out: &mut SlabWriter<'_>) -> Result<(), EncodeError> {
        out.put_cstr("copy fail message", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::SlabError, memory::SlabPool};

    #[test]
    fn copy_data_carries_raw_bytes() {
        let pool = SlabPool::new();
        let msg = CopyDataFrame { data: b"1\tx\n" }.encode(&pool).unwrap();
        assert_eq!(msg.as_bytes(), b"d\0\0\0\x081\tx\n");
    }

    #[test]
    fn copy_done_and_fail() {
        let pool = SlabPool::new();
        assert_eq!(CopyDoneFrame.encode(&pool).unwrap().as_bytes(), b"c\0\0\0\x04");
        assert_eq!(
            CopyFailFrame { message: "bad" }.encode(&pool).unwrap().as_bytes(),
            b"f\0\0\0\x08bad\0"
        );
    }

    #[test]
    fn largest_chunk_fits_one_slab() {
        let pool = SlabPool::new();
        let data = vec![0u8; MAX_COPY_CHUNK];
        assert_eq!(
            CopyDataFrame { data: &data }.encode(&pool).unwrap().len(),
            MAX_SLAB_SIZE
        );

        let data = vec![0u8; MAX_COPY_CHUNK + 1];
        let err = CopyDataFrame { data: &data }.encode(&pool).unwrap_err();
        assert!(matches!(err, EncodeError::Slab(SlabError::TooLarge { .. })));
    }
}
