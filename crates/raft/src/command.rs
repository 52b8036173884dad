//! Log entry payload: one mutation, serialized with bincode.
//!
//! The framing is self-describing per field (variant tag, then
//! length-prefixed byte strings), so followers decode entries without any
//! out-of-band schema.

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command encode failed: {0}")]
    Encode(#[source] bincode::Error),
    #[error("malformed command entry: {0}")]
    Decode(#[source] bincode::Error),
}

/// A single replicated mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl Command {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Self::Delete { key: key.into() }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CommandError> {
        bincode::serialize(self).map_err(CommandError::Encode)
    }

    pub fn decode(entry: &[u8]) -> Result<Self, CommandError> {
        bincode::deserialize(entry).map_err(CommandError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_put_and_delete() {
        let put = Command::put(b"key".to_vec(), b"value".to_vec());
        assert_eq!(Command::decode(&put.encode().unwrap()).unwrap(), put);

        let delete = Command::delete(b"key".to_vec());
        assert_eq!(Command::decode(&delete.encode().unwrap()).unwrap(), delete);
    }

    #[test]
    fn test_binary_keys_and_values_survive() {
        let cmd = Command::put(vec![0u8, 255, 1, 128], vec![0u8; 1024]);
        let decoded = Command::decode(&cmd.encode().unwrap()).unwrap();
        assert_eq!(decoded, cmd);
        assert_eq!(decoded.key(), &[0u8, 255, 1, 128]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Command::decode(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF]),
            Err(CommandError::Decode(_))
        ));
        assert!(matches!(
            Command::decode(&[]),
            Err(CommandError::Decode(_))
        ));
    }
}
