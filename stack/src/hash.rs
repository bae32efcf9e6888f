//! FNV-1a hashing for cache and socket keys.
//!
//! All sharded tables derive both their shard (lock) index and their bucket
//! index from the same 32-bit FNV-1a hash, taken over the key's packed byte
//! form.

const FNV_OFFSET: u32 = 0x811C_9DC5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over a byte slice.
#[inline]
pub fn fnv1a(data: &[u8]) -> u32 {
    let mut h = FNV_OFFSET;
    for &b in data {
        h ^= b as u32;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

/// Incremental FNV-1a, for keys assembled from several fields.
pub struct Fnv1a(u32);

impl Fnv1a {
    #[inline]
    pub const fn new() -> Self {
        Self(FNV_OFFSET)
    }

    #[inline]
    pub fn write(&mut self, data: &[u8]) {
        for &b in data {
            self.0 ^= b as u32;
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    #[inline]
    pub fn finish(&self) -> u32 {
        self.0
    }
}

impl Default for Fnv1a {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        // Standard FNV-1a test vectors.
        assert_eq!(fnv1a(b""), 0x811C_9DC5);
        assert_eq!(fnv1a(b"a"), 0xE40C_292C);
        assert_eq!(fnv1a(b"foobar"), 0xBF9C_F968);
    }

    #[test]
    fn incremental_matches_oneshot() {
        let mut h = Fnv1a::new();
        h.write(b"foo");
        h.write(b"bar");
        assert_eq!(h.finish(), fnv1a(b"foobar"));
    }
}
