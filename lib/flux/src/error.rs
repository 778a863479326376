use std::io;
use std::net;

pub type NetworkResult<T> = Result<T, NetworkError>;

/// Outcome of a non-blocking network operation. `Wait` means "try again later" and is not a
/// failure; every other variant is fatal to the channel it occurred on.
#[derive(Debug, Eq, PartialEq)]
pub enum NetworkError {
    Wait,
    Fatal(ErrorType),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorType {
    Expired,
    Duplicate,
    AlreadyConnected,
    PayloadTooLarge,
    EmptyPayload,
    IncorrectCategory,
    ProtocolMismatch,
    VersionMismatch,
    SequenceMismatch,
    Serialization,
    Crypto,
    AddrParse,
    Io(io::ErrorKind),
}

impl From<io::Error> for NetworkError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => NetworkError::Wait,
            kind => NetworkError::Fatal(ErrorType::Io(kind)),
        }
    }
}

impl From<net::AddrParseError> for NetworkError {
    #[inline]
    fn from(_: net::AddrParseError) -> Self {
        NetworkError::Fatal(ErrorType::AddrParse)
    }
}

pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for NetworkResult<T> {
    fn has_failed(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(NetworkError::Wait) => false,
            _ => true,
        }
    }
}

/// Augmented `io::Write` that is aware of the amount of remaining free capacity in the
/// destination.
pub trait SizedWrite: io::Write {
    fn free_capacity(&self) -> usize;
}

/// Augmented `io::Read` that is aware of the amount of remaining data in the source.
pub trait SizedRead: io::Read {
    fn remaining_data(&self) -> usize;
}

impl SizedWrite for io::Cursor<&mut [u8]> {
    #[inline]
    fn free_capacity(&self) -> usize {
        self.get_ref().len() - self.position() as usize
    }
}

impl SizedRead for io::Cursor<&[u8]> {
    #[inline]
    fn remaining_data(&self) -> usize {
        self.get_ref().len() - self.position() as usize
    }
}

/// Trait for manually serialized wire objects. Implementors must check the remaining free
/// capacity upfront and only write if everything fits, returning `NetworkError::Wait` otherwise.
pub trait Serialize {
    fn serialize<W: SizedWrite>(&self, stream: &mut W) -> NetworkResult<()>;
}

/// Trait for manually deserialized wire objects.
pub trait Deserialize: Sized {
    fn deserialize<R: SizedRead>(stream: &mut R) -> NetworkResult<Self>;
}

/// Batched payload messages for efficient, best-effort partial serialization/deserialization.
pub struct PayloadBatch<P> {
    data: Vec<P>,
}

impl<P> PayloadBatch<P> {
    #[inline]
    pub fn new() -> PayloadBatch<P> {
        PayloadBatch { data: Vec::new() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl<P: Serialize> PayloadBatch<P> {
    #[inline]
    pub fn push(&mut self, payload: P) {
        self.data.push(payload)
    }

    #[inline]
    pub fn drain(&mut self) -> impl Iterator<Item = P> + '_ {
        self.data.drain(..)
    }

    /// Write as many payload messages as possible to the destination stream.
    #[inline]
    pub fn write<W: SizedWrite>(&mut self, stream: &mut W) -> NetworkResult<()> {
        let mut remaining = self.data.len();

        for payload in self.data.iter_mut() {
            match payload.serialize(stream) {
                Ok(_) => remaining -= 1,
                Err(NetworkError::Wait) => break,
                Err(error) => return Err(error),
            }
        }

        // Bail out if nothing at all could be written into the stream.
        if remaining == self.data.len() {
            return Err(NetworkError::Wait);
        }

        self.data.truncate(remaining);
        Ok(())
    }
}

impl<P: Deserialize> PayloadBatch<P> {
    /// Read as many messages as possible from the source stream into the current batch.
    #[inline]
    pub fn read<R: SizedRead>(&mut self, stream: &mut R) -> NetworkResult<()> {
        while stream.remaining_data() > 0 {
            self.data.push(P::deserialize(stream)?)
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_becomes_wait() {
        let io_err = io::Error::from(io::ErrorKind::WouldBlock);
        assert_eq!(NetworkError::from(io_err), NetworkError::Wait);
    }

    #[test]
    fn other_io_errors_are_fatal() {
        let io_err = io::Error::from(io::ErrorKind::ConnectionReset);
        assert_eq!(
            NetworkError::from(io_err),
            NetworkError::Fatal(ErrorType::Io(io::ErrorKind::ConnectionReset))
        );
    }

    #[test]
    fn has_failed_treats_wait_as_non_fatal() {
        let waiting: NetworkResult<()> = Err(NetworkError::Wait);
        let fatal: NetworkResult<()> = Err(NetworkError::Fatal(ErrorType::Crypto));
        let ok: NetworkResult<()> = Ok(());

        assert!(!waiting.has_failed());
        assert!(fatal.has_failed());
        assert!(!ok.has_failed());
    }
}
