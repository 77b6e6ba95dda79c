//! `uniqueidentifier` wire glue.
//!
//! SQL Server stores a GUID with its first three fields little-endian and
//! the trailing eight bytes as-is, which is the layout `uuid` reads with
//! [`Uuid::from_bytes_le`] and writes with [`Uuid::to_bytes_le`].

pub use uuid::{Uuid, Variant};

use crate::error::TypeError;

/// Wire width of a `uniqueidentifier`.
pub const WIRE_LEN: usize = 16;

/// Decode a 16-byte wire value.
pub fn decode_guid(bytes: &[u8]) -> Result<Uuid, TypeError> {
    let raw: [u8; WIRE_LEN] = bytes.try_into().map_err(|_| TypeError::InvalidLength {
        type_name: "uniqueidentifier",
        actual: bytes.len(),
    })?;
    Ok(Uuid::from_bytes_le(raw))
}

/// The mixed-endian wire layout.
#[must_use]
pub fn encode_guid(id: &Uuid) -> [u8; WIRE_LEN] {
    id.to_bytes_le()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TAIL: [u8; 8] = [0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];

    #[test]
    fn test_fields_and_wire_layout() {
        let id = Uuid::from_fields(0x0011_2233, 0x4455, 0x6677, &TAIL);
        assert_eq!(id.as_fields(), (0x0011_2233, 0x4455, 0x6677, &TAIL));
        assert_eq!(
            encode_guid(&id),
            [
                0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66, 0x88, 0x99, 0xAA, 0xBB, 0xCC,
                0xDD, 0xEE, 0xFF
            ]
        );
        assert_eq!(id.as_u128(), 0x0011_2233_4455_6677_8899_AABB_CCDD_EEFF);
        assert_eq!(id.to_string(), "00112233-4455-6677-8899-aabbccddeeff");
        assert_eq!(decode_guid(&encode_guid(&id)).unwrap(), id);
    }

    #[test]
    fn test_decode_rejects_short_payload() {
        assert!(matches!(
            decode_guid(&[0; 15]),
            Err(TypeError::InvalidLength { actual: 15, .. })
        ));
    }

    #[test]
    fn test_variant_and_version() {
        assert_eq!(Uuid::NAMESPACE_DNS.get_variant(), Variant::RFC4122);
        assert_eq!(Uuid::NAMESPACE_DNS.get_version_num(), 1);
        assert_eq!(Uuid::nil().get_variant(), Variant::NCS);
        assert_eq!(Uuid::from_u128(u128::MAX).get_variant(), Variant::Future);
        let ms = Uuid::from_fields(0, 0, 0, &[0xC0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(ms.get_variant(), Variant::Microsoft);
    }

    #[test]
    fn test_parse() {
        let id = Uuid::parse_str("{6BA7B810-9DAD-11D1-80B4-00C04FD430C8}").unwrap();
        assert_eq!(id, Uuid::NAMESPACE_DNS);
        let simple = Uuid::parse_str("6ba7b8109dad11d180b400c04fd430c8").unwrap();
        assert_eq!(simple, Uuid::NAMESPACE_DNS);
        assert!(Uuid::parse_str("6ba7b810-9dad").is_err());
    }

    #[test]
    fn test_v5_matches_reference_value() {
        let id = Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"python.org");
        assert_eq!(id.to_string(), "886313e1-3b8a-5372-9b90-0c9aee199e5d");
        assert_eq!(id.get_version_num(), 5);
        // name-based ids survive the wire swap
        assert_eq!(decode_guid(&encode_guid(&id)).unwrap(), id);
    }

    proptest! {
        #[test]
        fn prop_fields_round_trip(d1 in any::<u32>(), d2 in any::<u16>(), d3 in any::<u16>(), d4 in any::<[u8; 8]>()) {
            let id = Uuid::from_fields(d1, d2, d3, &d4);
            prop_assert_eq!(id.as_fields(), (d1, d2, d3, &d4));
            prop_assert_eq!(decode_guid(&encode_guid(&id)).unwrap(), id);
        }
    }
}
