use std::fmt;

use crate::error::Fault;

/// Bytes per row of [`StackMemory::hexdump`].
pub const HEXDUMP_WIDTH: usize = 16;

/// Fixed-size, zero-initialized stack memory, addressed from `base`.
///
/// All multi-byte values are little-endian.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StackMemory {
    base: u64,
    bytes: Box<[u8]>,
}

impl StackMemory {
    pub fn new(base: u64, size: usize) -> Self {
        StackMemory {
            base,
            bytes: vec![0; size].into_boxed_slice(),
        }
    }

    /// Absolute address of the first byte.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// One past the last byte. The initial stack pointer.
    pub fn top(&self) -> u64 {
        self.base.wrapping_add(self.bytes.len() as u64)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `len` bytes starting `offset` bytes after the base.
    pub fn read(&self, offset: i64, len: usize) -> Result<&[u8], Fault> {
        let range = self.check(offset as i128, len)?;
        Ok(&self.bytes[range])
    }

    /// Write `data` starting `offset` bytes after the base. Nothing is written if any byte is
    /// out of bounds.
    pub fn write(&mut self, offset: i64, data: &[u8]) -> Result<(), Fault> {
        let range = self.check(offset as i128, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Translate an absolute address to an offset from the base, checking that `len` bytes fit.
    pub fn translate(&self, addr: u64, len: usize) -> Result<usize, Fault> {
        let offset = addr as i128 - self.base as i128;
        self.check(offset, len).map(|range| range.start)
    }

    pub fn read_u64(&self, addr: u64) -> Result<u64, Fault> {
        let offset = self.translate(addr, 8)?;
        let mut word = [0; 8];
        word.copy_from_slice(&self.bytes[offset..offset + 8]);
        Ok(u64::from_le_bytes(word))
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) -> Result<(), Fault> {
        let offset = self.translate(addr, 8)?;
        self.bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn read_u8(&self, addr: u64) -> Result<u8, Fault> {
        let offset = self.translate(addr, 1)?;
        Ok(self.bytes[offset])
    }

    pub fn write_u8(&mut self, addr: u64, value: u8) -> Result<(), Fault> {
        let offset = self.translate(addr, 1)?;
        self.bytes[offset] = value;
        Ok(())
    }

    fn check(&self, offset: i128, len: usize) -> Result<std::ops::Range<usize>, Fault> {
        if offset < 0 || offset + len as i128 > self.bytes.len() as i128 {
            return Err(Fault::MemoryBounds {
                addr: (self.base as i128).wrapping_add(offset) as u64,
                len,
            });
        }
        let start = offset as usize;
        Ok(start..start + len)
    }

    /// Rows of 16 bytes, for display.
    pub fn hexdump(&self) -> impl Iterator<Item = HexRow<'_>> + '_ {
        self.bytes
            .chunks(HEXDUMP_WIDTH)
            .enumerate()
            .map(|(i, bytes)| HexRow {
                addr: self.base.wrapping_add((i * HEXDUMP_WIDTH) as u64),
                bytes,
            })
    }
}

/// One line of a hexdump: address, hex bytes and printable characters.
#[derive(Clone, Copy, Debug)]
pub struct HexRow<'a> {
    pub addr: u64,
    pub bytes: &'a [u8],
}

impl HexRow<'_> {
    pub fn hex(&self) -> String {
        self.bytes
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn ascii(&self) -> String {
        self.bytes
            .iter()
            .map(|&b| match b {
                0x20..=0x7e => b as char,
                _ => '.',
            })
            .collect()
    }
}

impl fmt::Display for HexRow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}  {:<width$}  |{}|",
            self.addr,
            self.hex(),
            self.ascii(),
            width = HEXDUMP_WIDTH * 3 - 1
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_zeroed() {
        let stack = StackMemory::new(0x1000, 64);
        assert_eq!(stack.len(), 64);
        assert_eq!(stack.top(), 0x1040);
        assert!(stack.bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn little_endian_words() {
        let mut stack = StackMemory::new(0x1000, 32);
        stack.write_u64(0x1008, 0x0102_0304_0506_0708).unwrap();
        assert_eq!(stack.read(8, 8).unwrap(), [8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(stack.read_u64(0x1008), Ok(0x0102_0304_0506_0708));
        assert_eq!(stack.read_u8(0x1008), Ok(0x08));
    }

    #[test]
    fn bounds_are_checked() {
        let mut stack = StackMemory::new(0x1000, 16);
        assert!(stack.read(0, 16).is_ok());
        assert!(stack.read(15, 1).is_ok());
        assert!(stack.read(-1, 1).is_err());
        assert!(stack.read(9, 8).is_err());
        assert!(stack.read(16, 0).is_ok());
        assert!(stack.read(17, 0).is_err());

        assert_eq!(
            stack.write_u64(0x1009, u64::MAX),
            Err(Fault::MemoryBounds {
                addr: 0x1009,
                len: 8
            })
        );
        assert!(stack.bytes().iter().all(|&b| b == 0));
        assert!(stack.read_u8(0xFFF).is_err());
        assert!(stack.write_u8(0x1010, 1).is_err());
        assert!(stack.write(-4, &[1, 2]).is_err());
    }

    #[test]
    fn hexdump_rows() {
        let mut stack = StackMemory::new(0x20, 20);
        stack.write(0, b"Hi!\n").unwrap();
        let rows: Vec<_> = stack.hexdump().map(|row| row.to_string()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            "00000020  48 69 21 0a 00 00 00 00 00 00 00 00 00 00 00 00  |Hi!.............|"
        );
        assert_eq!(
            rows[1],
            "00000030  00 00 00 00                                      |....|"
        );
    }
}
