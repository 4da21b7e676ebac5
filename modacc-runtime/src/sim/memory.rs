//! Sparse byte-addressed memory

use super::Fault;
use std::collections::HashMap;

/// Page granularity of [`SparseMemory`]
pub const PAGE_SIZE: usize = 4096;

/// Memory of a fixed size that only stores pages it has seen written.
/// Unwritten bytes read as zero.
#[derive(Debug, Clone)]
pub struct SparseMemory {
    name: &'static str,
    size: u64,
    pages: HashMap<u64, Box<[u8; PAGE_SIZE]>>,
}

impl SparseMemory {
    pub fn new(name: &'static str, size: u64) -> Self {
        Self {
            name,
            size,
            pages: HashMap::new(),
        }
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Pages currently backed by storage
    pub fn resident_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }

    fn check(&self, address: u64, length: usize) -> Result<(), Fault> {
        match address.checked_add(length as u64) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(Fault::OutOfRange {
                target: self.name,
                address,
                length: length as u64,
                limit: self.size,
            }),
        }
    }

    pub fn write(&mut self, address: u64, data: &[u8]) -> Result<(), Fault> {
        self.check(address, data.len())?;
        let mut address = address;
        let mut rest = data;
        while !rest.is_empty() {
            let page = address / PAGE_SIZE as u64;
            let offset = (address % PAGE_SIZE as u64) as usize;
            let n = rest.len().min(PAGE_SIZE - offset);
            let frame = self
                .pages
                .entry(page)
                .or_insert_with(|| Box::new([0u8; PAGE_SIZE]));
            frame[offset..offset + n].copy_from_slice(&rest[..n]);
            address += n as u64;
            rest = &rest[n..];
        }
        Ok(())
    }

    pub fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), Fault> {
        self.check(address, buf.len())?;
        let mut address = address;
        let mut filled = 0;
        while filled < buf.len() {
            let page = address / PAGE_SIZE as u64;
            let offset = (address % PAGE_SIZE as u64) as usize;
            let n = (buf.len() - filled).min(PAGE_SIZE - offset);
            let dest = &mut buf[filled..filled + n];
            match self.pages.get(&page) {
                Some(frame) => dest.copy_from_slice(&frame[offset..offset + n]),
                None => dest.fill(0),
            }
            address += n as u64;
            filled += n;
        }
        Ok(())
    }

    pub fn read_vec(&self, address: u64, length: usize) -> Result<Vec<u8>, Fault> {
        let mut buf = vec![0u8; length];
        self.read(address, &mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwritten_reads_zero() {
        let memory = SparseMemory::new("ddr", 1 << 20);
        assert_eq!(memory.read_vec(0x1234, 8).unwrap(), vec![0; 8]);
        assert_eq!(memory.resident_pages(), 0);
    }

    #[test]
    fn test_write_across_pages() {
        let mut memory = SparseMemory::new("ddr", 1 << 20);
        let data: Vec<u8> = (0..=255).cycle().take(3 * PAGE_SIZE).map(|b: u32| b as u8).collect();
        memory.write(PAGE_SIZE as u64 - 10, &data).unwrap();
        assert_eq!(memory.resident_pages(), 4);
        assert_eq!(memory.read_vec(PAGE_SIZE as u64 - 10, data.len()).unwrap(), data);
        assert_eq!(memory.read_vec(PAGE_SIZE as u64 - 12, 2).unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_bounds() {
        let mut memory = SparseMemory::new("sram", 64);
        assert!(memory.write(60, &[1, 2, 3, 4]).is_ok());
        let err = memory.write(61, &[1, 2, 3, 4]).unwrap_err();
        assert_eq!(err.to_string(), "sram access at 0x3d of 4 bytes exceeds 0x40");
        assert!(memory.read_vec(u64::MAX, 2).is_err());
    }

    #[test]
    fn test_clear() {
        let mut memory = SparseMemory::new("ddr", 1 << 16);
        memory.write(0, &[7; 16]).unwrap();
        memory.clear();
        assert_eq!(memory.read_vec(0, 16).unwrap(), vec![0; 16]);
    }
}
