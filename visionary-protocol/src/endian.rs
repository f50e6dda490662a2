//! Byte order helpers and the CoLa password digest.
//!
//! Everything framed by the device is big-endian, so values read from or
//! written to raw buffers pass through [`ConvertEndianness`]. On a big-endian
//! host the conversion is the identity.
use md5::{Digest, Md5};

/// Conversion between big-endian (network) order and host order.
///
/// The conversion is its own inverse: converting twice yields the original value.
pub trait ConvertEndianness: Sized {
    fn convert_endianness(self) -> Self;
}

macro_rules! impl_convert_endianness {
    ($($t:ty),*) => {
        $(
            impl ConvertEndianness for $t {
                fn convert_endianness(self) -> Self {
                    <$t>::from_be(self)
                }
            }
        )*
    };
}

impl_convert_endianness!(u16, u32, u64, i16, i32, i64);

/// Computes the 4 byte access digest the device expects for `password`.
///
/// The MD5 hash of the password is folded to four bytes by XOR-ing its four
/// quarters. The folded bytes form a little-endian integer, which is then sent
/// big-endian as part of `SetAccessMode`.
pub fn password_hash(password: &str) -> u32 {
    let hash = Md5::digest(password.as_bytes());
    let mut folded = [0u8; 4];
    for (i, byte) in folded.iter_mut().enumerate() {
        *byte = hash[i] ^ hash[i + 4] ^ hash[i + 8] ^ hash[i + 12];
    }
    u32::from_le_bytes(folded)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn conversion_is_involution() {
        assert_eq!(0x1234_u16.convert_endianness().convert_endianness(), 0x1234);
        assert_eq!(
            0xDEAD_BEEF_u32.convert_endianness().convert_endianness(),
            0xDEAD_BEEF
        );
        assert_eq!(
            0x0102_0304_0506_0708_u64
                .convert_endianness()
                .convert_endianness(),
            0x0102_0304_0506_0708
        );
        assert_eq!((-2_i32).convert_endianness().convert_endianness(), -2);
    }

    #[test]
    #[cfg(target_endian = "little")]
    fn conversion_swaps_on_little_endian_hosts() {
        assert_eq!(0x1234_u16.convert_endianness(), 0x3412);
        assert_eq!(0x0102_0304_u32.convert_endianness(), 0x0403_0201);
        assert_eq!(
            0x0102_0304_0506_0708_u64.convert_endianness(),
            0x0807_0605_0403_0201
        );
    }

    #[test]
    fn conversion_matches_big_endian_bytes() {
        let raw = u32::from_ne_bytes([0x00, 0x00, 0x01, 0x02]);
        assert_eq!(raw.convert_endianness(), 0x0102);
    }

    #[test]
    fn default_password_digests() {
        assert_eq!(password_hash("client"), 0xF472_4744);
        assert_eq!(password_hash("main"), 0xB21A_CE26);
        assert_eq!(password_hash("servicelevel"), 0x81BE_23AA);
    }
}
