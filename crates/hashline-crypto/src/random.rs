//! Random protocol token generation.
//!
//! Line identifiers and channel ids are plain random tokens, not derived
//! values; they only need uniqueness, not secrecy. Both generators take
//! the caller's RNG like every other key-producing routine in this crate,
//! so there is no hidden entropy source to fail at runtime.

use crate::LINE_ID_SIZE;
use rand_core::{CryptoRng, RngCore};

/// Generate a random 16-byte line identifier.
#[must_use]
pub fn line_id<R: RngCore + CryptoRng>(rng: &mut R) -> [u8; LINE_ID_SIZE] {
    let mut bytes = [0u8; LINE_ID_SIZE];
    rng.fill_bytes(&mut bytes);
    bytes
}

/// Generate a random non-zero u32, used for initiator channel ids.
#[must_use]
pub fn channel_id<R: RngCore + CryptoRng>(rng: &mut R) -> u32 {
    loop {
        let id = rng.next_u32();
        if id != 0 {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    /// Replays a fixed word sequence; only `next_u32` is meaningful.
    struct Replay(Vec<u32>);

    impl RngCore for Replay {
        fn next_u32(&mut self) -> u32 {
            self.0.remove(0)
        }
        fn next_u64(&mut self) -> u64 {
            u64::from(self.next_u32())
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0x5A);
        }
        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    impl CryptoRng for Replay {}

    #[test]
    fn test_line_ids_are_unique() {
        assert_ne!(line_id(&mut OsRng), line_id(&mut OsRng));
    }

    #[test]
    fn test_channel_id_nonzero() {
        for _ in 0..64 {
            assert_ne!(channel_id(&mut OsRng), 0);
        }
    }

    #[test]
    fn test_channel_id_skips_zero_draws() {
        assert_eq!(channel_id(&mut Replay(vec![0, 0, 9])), 9);
    }
}
