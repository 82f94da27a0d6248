//! The firmware's integrity checksum.
//!
//! This is CRC-32/MPEG-2: MSB-first, generator `0x04C11DB7`, seeded with all
//! ones, no reflection and no final XOR. The firmware only sums the tail of
//! the image, starting after a 512-byte header, so the header (which holds
//! the checksum field itself) never feeds into its own value.

/// Generator polynomial, normal (non-reflected) form.
pub const POLYNOMIAL: u32 = 0x04C1_1DB7;

/// First byte covered by the checksum. Everything before it is header.
pub const COVERAGE_START: usize = 512;

const INIT: u32 = 0xFFFF_FFFF;

pub type Table = [u32; 256];

/// Derives the 256-entry lookup table from [`POLYNOMIAL`].
pub const fn build_table() -> Table {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = (i as u32) << 24;
        let mut round = 0;
        while round < 8 {
            c = if c & 0x8000_0000 != 0 {
                (c << 1) ^ POLYNOMIAL
            } else {
                c << 1
            };
            round += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

/// Checksums `bytes[COVERAGE_START..]`. A buffer that doesn't reach past the
/// header sums nothing and yields the seed, `0xFFFF_FFFF`.
pub fn compute(table: &Table, bytes: &[u8]) -> u32 {
    compute_from(table, bytes, COVERAGE_START)
}

/// Like [`compute`], but with the header length given explicitly.
pub fn compute_from(table: &Table, bytes: &[u8], start: usize) -> u32 {
    let tail = bytes.get(start..).unwrap_or(&[]);
    tail.iter().fold(INIT, |c, &b| {
        (c << 8) ^ table[((c >> 24) as u8 ^ b) as usize]
    })
}

/// A table plus the coverage rule it is applied with. Build one per run and
/// reuse it; the table never changes after construction.
#[derive(Clone)]
pub struct ChecksumEngine {
    table: Table,
    coverage_start: usize,
}

impl ChecksumEngine {
    pub fn new() -> Self {
        Self::with_coverage_start(COVERAGE_START)
    }

    pub fn with_coverage_start(coverage_start: usize) -> Self {
        Self {
            table: build_table(),
            coverage_start,
        }
    }

    pub fn coverage_start(&self) -> usize {
        self.coverage_start
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn compute(&self, bytes: &[u8]) -> u32 {
        compute_from(&self.table, bytes, self.coverage_start)
    }
}

impl Default for ChecksumEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for ChecksumEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChecksumEngine")
            .field("coverage_start", &self.coverage_start)
            .finish_non_exhaustive()
    }
}
