//! COSE key encoding, restricted to the EC2/ES256 shape CTAP2 puts in
//! attested credential data.
//!
//! A COSE key is a CBOR map keyed by the IANA "COSE Key Common
//! Parameters" registry; EC2 keys carry the curve in -1 and the point
//! coordinates in -2/-3.

use crate::cbor::Writer;

/// COSE algorithm identifier for ECDSA with SHA-256.
pub const ES256: i32 = -7;

const KTY_EC2: u64 = 2;
const CRV_P256: u64 = 1;

/// P-256 public key in COSE_Key form.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct P256PublicKey {
    pub x: [u8; 32],
    pub y: [u8; 32],
}

impl P256PublicKey {
    /// Split an uncompressed SEC1 point (`0x04 ‖ X ‖ Y`) into coordinates.
    pub fn from_uncompressed(point: &[u8; 65]) -> Self {
        debug_assert_eq!(point[0], 0x04);
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(&point[1..33]);
        y.copy_from_slice(&point[33..65]);
        Self { x, y }
    }

    /// `{1: kty, 3: alg, -1: crv, -2: x, -3: y}` in CTAP2 canonical order.
    pub fn encode(&self, writer: &mut Writer) {
        writer.map(5);
        writer.unsigned(1);
        writer.unsigned(KTY_EC2);
        writer.unsigned(3);
        writer.integer(ES256.into());
        writer.integer(-1);
        writer.unsigned(CRV_P256);
        writer.integer(-2);
        writer.byte_string(&self.x);
        writer.integer(-3);
        writer.byte_string(&self.y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbor::Reader;

    #[test]
    fn encodes_canonical_es256_map() {
        let mut point = [0u8; 65];
        point[0] = 0x04;
        point[1..33].copy_from_slice(&[0xaa; 32]);
        point[33..65].copy_from_slice(&[0xbb; 32]);

        let key = P256PublicKey::from_uncompressed(&point);
        let mut buf = [0u8; 128];
        let mut writer = Writer::new(&mut buf);
        key.encode(&mut writer);
        let length = writer.finish().unwrap();

        let mut reader = Reader::new(&buf[..length]);
        assert_eq!(reader.map().unwrap(), 5);
        assert_eq!(reader.unsigned().unwrap(), 1);
        assert_eq!(reader.unsigned().unwrap(), 2);
        assert_eq!(reader.unsigned().unwrap(), 3);
        assert_eq!(reader.integer().unwrap(), -7);
        assert_eq!(reader.integer().unwrap(), -1);
        assert_eq!(reader.unsigned().unwrap(), 1);
        assert_eq!(reader.integer().unwrap(), -2);
        assert_eq!(reader.byte_string().unwrap(), &[0xaa; 32]);
        assert_eq!(reader.integer().unwrap(), -3);
        assert_eq!(reader.byte_string().unwrap(), &[0xbb; 32]);
        assert!(reader.is_at_end());
    }
}
