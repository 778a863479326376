//! Base64 `serde(with = "...")` helpers for the fixed-size byte arrays that show up in
//! connection tokens and handshake payloads. `serde`'s `with` attribute needs one module per
//! concrete array length, so the sizes actually used on the wire are generated below.

macro_rules! byte_array_codec {
    ($name:ident, $len:expr) => {
        pub mod $name {
            use serde::{de, Deserialize, Deserializer, Serializer};

            pub fn serialize<S>(bytes: &[u8; $len], serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&base64::encode(&bytes[..]))
            }

            pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; $len], D::Error>
            where
                D: Deserializer<'de>,
            {
                let encoded = <&str>::deserialize(deserializer)?;
                let decoded = base64::decode(encoded).map_err(de::Error::custom)?;

                if decoded.len() != $len {
                    return Err(de::Error::custom("unexpected decoded length"));
                }

                let mut out = [0u8; $len];
                out.copy_from_slice(&decoded);
                Ok(out)
            }
        }
    };
}

// Version id.
byte_array_codec!(b16, 16);
// Channel server/client keys.
byte_array_codec!(b32, 32);
// Encrypted `PrivateData` (72 bytes plain + 16 byte MAC).
byte_array_codec!(b88, 88);
