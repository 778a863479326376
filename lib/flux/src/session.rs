/// Shared infrastructure pertaining to the Server Session, that is an authenticated game server
/// connected to a sibling component (e.g. a login node's channel to the database component).
pub mod server {
    use crate::encoding::b32;
    use serde::{de, Deserialize, Deserializer};
    use serde_derive::{Deserialize, Serialize};
    use std::ops::{Deref, DerefMut};

    const SESSION_KEY_SIZE: usize = 32;

    #[derive(Serialize, Deserialize, Clone)]
    pub struct SessionKey(
        #[serde(
            serialize_with = "b32::serialize",
            deserialize_with = "deserialize_b64_key"
        )]
        [u8; SESSION_KEY_SIZE],
    );

    #[inline]
    fn deserialize_b64_key<'de, D>(deserializer: D) -> Result<[u8; SESSION_KEY_SIZE], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <&str>::deserialize(deserializer)?;
        let decoded_raw = base64::decode(s).map_err(de::Error::custom)?;

        if decoded_raw.len() != SESSION_KEY_SIZE {
            return Err(de::Error::custom("unexpected decoded length"));
        }

        let mut decoded = [0u8; SESSION_KEY_SIZE];
        decoded.copy_from_slice(&decoded_raw);
        Ok(decoded)
    }

    impl SessionKey {
        pub const SIZE: usize = SESSION_KEY_SIZE;

        #[inline]
        pub fn new(key: [u8; Self::SIZE]) -> SessionKey {
            SessionKey(key)
        }
    }

    impl Deref for SessionKey {
        type Target = [u8; SessionKey::SIZE];

        #[inline]
        fn deref(&self) -> &[u8; SessionKey::SIZE] {
            &self.0
        }
    }

    impl DerefMut for SessionKey {
        #[inline]
        fn deref_mut(&mut self) -> &mut [u8; SessionKey::SIZE] {
            &mut self.0
        }
    }
}

/// Shared infrastructure pertaining to the User Session, that is an authenticated user connected
/// to a game server.
pub mod user {
    use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
    use std::io::{Error, Read, Write};

    /// Private data part (visible only to the server) of the connection token.
    pub struct PrivateData {
        pub user_id: u64,
        pub server_key: [u8; 32],
        pub client_key: [u8; 32],
    }

    impl PrivateData {
        pub const SIZE: usize = 72;

        /// Parse the supplied stream as a private data structure.
        #[inline]
        pub fn read<R: Read>(mut stream: R) -> Result<PrivateData, Error> {
            let user_id = stream.read_u64::<BigEndian>()?;

            let mut server_key = [0u8; 32];
            stream.read_exact(&mut server_key)?;

            let mut client_key = [0u8; 32];
            stream.read_exact(&mut client_key)?;

            Ok(PrivateData {
                user_id,
                server_key,
                client_key,
            })
        }

        /// Write the private data to the supplied stream.
        #[inline]
        pub fn write<W: Write>(&self, mut stream: W) -> Result<(), Error> {
            stream.write_u64::<BigEndian>(self.user_id)?;
            stream.write_all(&self.server_key)?;
            stream.write_all(&self.client_key).map_err(Into::into)
        }

        /// Construct the additional encryption data binding version, protocol and expiry into the
        /// AEAD tag.
        #[inline]
        pub fn additional_data(version: &[u8], protocol: u16, expires: u64) -> Result<[u8; 26], Error> {
            let mut additional_data = [0u8; 26];
            let mut additional_data_slice = &mut additional_data[..];

            additional_data_slice.write_all(version)?;
            additional_data_slice.write_u16::<LittleEndian>(protocol)?;
            additional_data_slice.write_u64::<LittleEndian>(expires)?;

            Ok(additional_data)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn private_data_round_trips() {
            let original = PrivateData {
                user_id: 42,
                server_key: [1u8; 32],
                client_key: [2u8; 32],
            };

            let mut buf = [0u8; PrivateData::SIZE];
            original.write(&mut buf[..]).unwrap();

            let parsed = PrivateData::read(&buf[..]).unwrap();
            assert_eq!(parsed.user_id, 42);
            assert_eq!(parsed.server_key, [1u8; 32]);
            assert_eq!(parsed.client_key, [2u8; 32]);
        }
    }
}
