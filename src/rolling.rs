/*!
Rolling checksums over a sliding byte window.

`rotate` must agree with `compute` over the shifted window, so the delta
scanner can slide one byte at a time in O(1).
*/

/// Rolling checksum capability.
pub trait RollingChecksum: Send + Sync {
    /// Name written into artifacts.
    fn name(&self) -> &'static str;

    /// Width of the serialized checksum in bytes.
    fn checksum_len(&self) -> usize {
        4
    }

    /// Checksum of a whole window.
    fn compute(&self, window: &[u8]) -> u32;

    /// Slide the window by one byte: drop `outgoing` at the front and append
    /// `incoming` at the back of a window of `window_len` bytes.
    fn rotate(&self, checksum: u32, outgoing: u8, incoming: u8, window_len: usize) -> u32;
}

/// Adler-32 style sums kept in 16-bit wrapping arithmetic.
///
/// Collisions are frequent on purpose-built inputs; the strong hash settles
/// them.
#[derive(Debug, Clone, Copy, Default)]
pub struct Adler32;

impl Adler32 {
    pub const NAME: &'static str = "Adler32";
}

impl RollingChecksum for Adler32 {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn compute(&self, window: &[u8]) -> u32 {
        let mut a: u16 = 1;
        let mut b: u16 = 0;
        for &x in window.iter() {
            a = a.wrapping_add(x as u16);
            b = b.wrapping_add(a);
        }
        (b as u32) << 16 | a as u32
    }

    fn rotate(&self, checksum: u32, outgoing: u8, incoming: u8, window_len: usize) -> u32 {
        let mut a = checksum as u16;
        let mut b = (checksum >> 16) as u16;
        let out = outgoing as u16;
        a = a.wrapping_sub(out).wrapping_add(incoming as u16);
        b = b
            .wrapping_sub((window_len as u16).wrapping_mul(out))
            .wrapping_add(a)
            .wrapping_sub(1);
        (b as u32) << 16 | a as u32
    }
}

const MOD_ADLER: i64 = 65521;

/// Classic Adler-32 with both sums reduced modulo 65521.
#[derive(Debug, Clone, Copy, Default)]
pub struct Adler32V2;

impl Adler32V2 {
    pub const NAME: &'static str = "Adler32V2";
}

impl RollingChecksum for Adler32V2 {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn compute(&self, window: &[u8]) -> u32 {
        let mut a: i64 = 1;
        let mut b: i64 = 0;
        // 5552 is the longest run that cannot overflow before reducing.
        for piece in window.chunks(5552) {
            for &x in piece.iter() {
                a += x as i64;
                b += a;
            }
            a %= MOD_ADLER;
            b %= MOD_ADLER;
        }
        (b as u32) << 16 | a as u32
    }

    fn rotate(&self, checksum: u32, outgoing: u8, incoming: u8, window_len: usize) -> u32 {
        let a = (checksum & 0xffff) as i64;
        let b = (checksum >> 16) as i64;
        let out = outgoing as i64;
        let n = window_len as i64 % MOD_ADLER;
        let a = (a - out + incoming as i64).rem_euclid(MOD_ADLER);
        let b = (b - n * out + a - 1).rem_euclid(MOD_ADLER);
        (b as u32) << 16 | a as u32
    }
}

/// Default rolling checksum.
pub const DEFAULT_ROLLING: &dyn RollingChecksum = &Adler32;

/// Every rolling checksum known to this build.
pub fn rolling_checksums() -> [&'static dyn RollingChecksum; 2] {
    [&Adler32, &Adler32V2]
}

/// Find a rolling checksum by its artifact name.
pub fn rolling_checksum(name: &str) -> Option<&'static dyn RollingChecksum> {
    rolling_checksums().into_iter().find(|r| r.name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn cyclic_bytes(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i * 7 + i / 13) as u8).collect()
    }

    /// Rotating across the whole tape agrees with recomputing each window.
    #[test]
    fn rotate_equals_compute() {
        let tape = cyclic_bytes(4096);
        for algorithm in rolling_checksums().iter() {
            for &chunk in [1, 2, 8, 41, 1024, 3000].iter() {
                let mut sum = algorithm.compute(&tape[..chunk]);
                for i in 1..=tape.len() - chunk {
                    sum = algorithm.rotate(sum, tape[i - 1], tape[i + chunk - 1], chunk);
                    assert_eq!(sum, algorithm.compute(&tape[i..i + chunk]));
                }
            }
        }
    }

    #[test]
    fn adler32_known_values() {
        assert_eq!(Adler32.compute(b""), 1);
        assert_eq!(Adler32V2.compute(b""), 1);
        // Reference Adler-32 of "Wikipedia".
        assert_eq!(Adler32V2.compute(b"Wikipedia"), 0x11E60398);
        // Short inputs never reach the modulus, so both variants agree.
        assert_eq!(Adler32.compute(b"Wikipedia"), 0x11E60398);
    }

    #[test]
    fn wraparound_collision() {
        // Same byte sum and same weighted sum.
        assert_eq!(Adler32.compute(&[1, 0, 0, 1]), Adler32.compute(&[0, 1, 1, 0]));
        assert_eq!(
            Adler32V2.compute(&[1, 0, 0, 1]),
            Adler32V2.compute(&[0, 1, 1, 0])
        );
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(rolling_checksum("Adler32").unwrap().name(), "Adler32");
        assert_eq!(rolling_checksum("Adler32V2").unwrap().name(), "Adler32V2");
        assert!(rolling_checksum("adler32").is_none());
    }

    #[quickcheck]
    fn rotate_matches_shifted_window(data: Vec<u8>, window: u8) -> bool {
        let window = window as usize + 1;
        if data.len() <= window {
            return true;
        }
        rolling_checksums().iter().all(|algorithm| {
            let mut sum = algorithm.compute(&data[..window]);
            (1..=data.len() - window).all(|i| {
                sum = algorithm.rotate(sum, data[i - 1], data[i + window - 1], window);
                sum == algorithm.compute(&data[i..i + window])
            })
        })
    }
}
