use crate::error::{DbError, Result};

/// A block-sized byte buffer with typed accessors at absolute byte offsets.
///
/// Integers are 4 bytes big-endian. Strings and raw byte slices are stored as a
/// 4 byte length prefix followed by the bytes themselves.
#[derive(Debug, Clone)]
pub struct Page {
    contents: Vec<u8>,
}

impl Page {
    pub const INT_BYTES: usize = 4;

    pub fn new(block_size: usize) -> Self {
        Self {
            contents: vec![0; block_size],
        }
    }

    /// Create a new page from the given bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { contents: bytes }
    }

    /// The number of bytes a string of at most `strlen` bytes occupies on a page
    pub fn max_length(strlen: usize) -> usize {
        Self::INT_BYTES + strlen
    }

    pub fn size(&self) -> usize {
        self.contents.len()
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    pub fn contents_mut(&mut self) -> &mut [u8] {
        &mut self.contents
    }

    /// Zero the whole page
    pub fn clear(&mut self) {
        self.contents.fill(0);
    }

    fn check_bounds(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.contents.len() => Ok(()),
            _ => Err(DbError::PageOutOfBounds {
                offset,
                len,
                page_size: self.contents.len(),
            }),
        }
    }

    /// Get an integer from the page at the given offset
    pub fn get_int(&self, offset: usize) -> Result<i32> {
        self.check_bounds(offset, Self::INT_BYTES)?;
        let mut bytes = [0; Self::INT_BYTES];
        bytes.copy_from_slice(&self.contents[offset..offset + Self::INT_BYTES]);
        Ok(i32::from_be_bytes(bytes))
    }

    /// Set an integer at the given offset
    pub fn set_int(&mut self, offset: usize, n: i32) -> Result<()> {
        self.check_bounds(offset, Self::INT_BYTES)?;
        self.contents[offset..offset + Self::INT_BYTES].copy_from_slice(&n.to_be_bytes());
        Ok(())
    }

    /// Get a slice of bytes from the page at the given offset. Read the length and then the bytes
    pub fn get_bytes(&self, offset: usize) -> Result<Vec<u8>> {
        let length = self.get_int(offset)? as u32 as usize;
        let start = offset + Self::INT_BYTES;
        self.check_bounds(start, length)?;
        Ok(self.contents[start..start + length].to_vec())
    }

    /// Set a slice of bytes at the given offset. Write the length and then the bytes
    pub fn set_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check_bounds(offset, Self::INT_BYTES + bytes.len())?;
        let length = bytes.len() as u32;
        self.contents[offset..offset + Self::INT_BYTES].copy_from_slice(&length.to_be_bytes());
        let start = offset + Self::INT_BYTES;
        self.contents[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Get a string from the page at the given offset
    pub fn get_string(&self, offset: usize) -> Result<String> {
        let bytes = self.get_bytes(offset)?;
        String::from_utf8(bytes)
            .map_err(|e| DbError::CorruptPage(format!("invalid utf-8 at offset {offset}: {e}")))
    }

    /// Set a string at the given offset
    pub fn set_string(&mut self, offset: usize, string: &str) -> Result<()> {
        self.set_bytes(offset, string.as_bytes())
    }
}
