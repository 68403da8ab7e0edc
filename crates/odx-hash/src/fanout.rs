//! The 256-entry cumulative fanout table.

use crate::ObjectId;

/// Fan-out table mapping first byte to cumulative count.
///
/// Entry *i* holds the number of objects whose first hash byte is ≤ *i*; the
/// last entry is the total object count. Both the commit-graph `OIDF` chunk
/// and the MIDX `OIDF` chunk are exactly this table in big-endian form.
#[derive(Debug, Clone)]
pub struct FanoutTable {
    table: [u32; 256],
}

/// Size of the encoded table in bytes.
pub const FANOUT_SIZE: usize = 256 * 4;

impl FanoutTable {
    /// Build a fan-out table from a sorted slice of OIDs.
    ///
    /// The OIDs **must** be sorted; this function does not verify order.
    pub fn build(oids: &[ObjectId]) -> Self {
        Self::build_from(oids.iter().map(|oid| oid.first_byte()))
    }

    /// Build from an iterator of first bytes (sorted ascending).
    pub fn build_from(first_bytes: impl IntoIterator<Item = u8>) -> Self {
        let mut table = [0u32; 256];
        for b in first_bytes {
            table[b as usize] += 1;
        }
        for i in 1..256 {
            table[i] += table[i - 1];
        }
        Self { table }
    }

    /// The index range for OIDs whose first byte equals `first_byte`.
    pub fn range(&self, first_byte: u8) -> std::ops::Range<usize> {
        let end = self.table[first_byte as usize] as usize;
        let start = if first_byte == 0 {
            0
        } else {
            self.table[(first_byte - 1) as usize] as usize
        };
        start..end
    }

    /// Total number of objects tracked by this fan-out table.
    pub fn total(&self) -> u32 {
        self.table[255]
    }

    /// Encode as 256 big-endian u32 values (1024 bytes).
    pub fn to_bytes(&self) -> [u8; FANOUT_SIZE] {
        let mut buf = [0u8; FANOUT_SIZE];
        for i in 0..256 {
            buf[i * 4..i * 4 + 4].copy_from_slice(&self.table[i].to_be_bytes());
        }
        buf
    }
}
