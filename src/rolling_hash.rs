/// Weak checksum over a fixed-size window.
///
/// `a` is the plain byte sum and `b` the position-weighted sum (each byte
/// counted once per position it has been in the window), both modulo the
/// largest 16-bit prime. Sliding the window by one byte is O(1).
const MOD_ADLER: u32 = 65521;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollingHash {
    a: u32,
    b: u32,
    window: u32,
}

impl RollingHash {
    /// Checksum of `window` computed from scratch.
    pub fn over(window: &[u8]) -> Self {
        // u64 accumulators defer the modular reduction to the end.
        let mut a: u64 = 1;
        let mut b: u64 = 0;
        for &byte in window {
            a += byte as u64;
            b += a;
        }
        Self {
            a: (a % MOD_ADLER as u64) as u32,
            b: (b % MOD_ADLER as u64) as u32,
            window: (window.len() as u64 % MOD_ADLER as u64) as u32,
        }
    }

    /// Slide the window one byte: `leaving` drops off the front, `entering` joins at the back.
    pub fn roll(&mut self, leaving: u8, entering: u8) {
        let leaving = leaving as u32;
        let entering = entering as u32;

        self.a = (self.a + MOD_ADLER - leaving + entering) % MOD_ADLER;
        self.b = (self.b + MOD_ADLER - 1 + self.a + MOD_ADLER
            - (leaving * self.window) % MOD_ADLER)
            % MOD_ADLER;
    }

    pub fn digest(&self) -> u32 {
        (self.b << 16) | self.a
    }
}
