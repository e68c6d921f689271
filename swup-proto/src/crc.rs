//! Streaming CRC-32 (IEEE 802.3 polynomial)
//!
//! The checksum written to the checksum attribute is the CRC-32/ISO-HDLC of the whole
//! image. Both ends feed it chunk by chunk, so the result must not depend on where the
//! chunk boundaries fall.

const POLYNOMIAL: u32 = 0xEDB8_8320;
const INITIAL: u32 = 0xFFFF_FFFF;

const TABLE: [u32; 256] = make_table();

const fn make_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLYNOMIAL
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Incremental CRC-32 accumulator
///
/// `finalize` consumes the accumulator; start a new attempt with `reset` or `new`.
#[derive(Debug, Clone)]
pub struct Crc32 {
    state: u32,
}

impl Crc32 {
    pub fn new() -> Self {
        Self { state: INITIAL }
    }

    pub fn reset(&mut self) {
        self.state = INITIAL;
    }

    pub fn update(&mut self, data: &[u8]) {
        let mut crc = self.state;
        for &byte in data {
            crc = TABLE[((crc ^ byte as u32) & 0xff) as usize] ^ (crc >> 8);
        }
        self.state = crc;
    }

    pub fn finalize(self) -> u32 {
        !self.state
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// CRC-32 of a complete buffer
pub fn checksum(data: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(data);
    crc.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn empty_input() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(Crc32::new().finalize(), 0);
    }

    #[test]
    fn chunking_does_not_change_the_result() {
        let data: Vec<u8> = (0..2000u32).map(|i| (i * 31 % 251) as u8).collect();
        let whole = checksum(&data);

        for chunk_size in [1, 7, 20, 512, 1999, 4096] {
            let mut crc = Crc32::new();
            for chunk in data.chunks(chunk_size) {
                crc.update(chunk);
            }
            assert_eq!(crc.finalize(), whole, "chunk size {chunk_size}");
        }

        // uneven splits, including empty chunks
        let mut crc = Crc32::new();
        crc.update(&data[..3]);
        crc.update(&[]);
        crc.update(&data[3..1500]);
        crc.update(&data[1500..]);
        assert_eq!(crc.finalize(), whole);
    }

    #[test]
    fn order_matters() {
        let mut ab = Crc32::new();
        ab.update(b"ab");
        ab.update(b"cd");
        let mut ba = Crc32::new();
        ba.update(b"cd");
        ba.update(b"ab");
        assert_ne!(ab.finalize(), ba.finalize());
    }

    #[test]
    fn reset_discards_previous_bytes() {
        let mut crc = Crc32::new();
        crc.update(b"stale data from an abandoned attempt");
        crc.reset();
        crc.update(b"123456789");
        assert_eq!(crc.finalize(), 0xCBF4_3926);
    }
}
