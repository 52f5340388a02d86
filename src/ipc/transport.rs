//! Cross-platform IPC transport layer
//!
//! Abstracts Unix domain sockets (Unix/macOS) and named pipes (Windows)
//! using the interprocess crate.

use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::common::paths;

/// Maximum message size (10 MB)
const MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

// Platform-specific imports and type aliases
#[cfg(unix)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
    pub use interprocess::local_socket::{GenericFilePath, ListenerOptions};
}

#[cfg(windows)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
    pub use interprocess::local_socket::{GenericNamespaced, ListenerOptions};
}

use platform::*;

/// Re-export Stream and Listener for use in other modules
pub use platform::{Listener, Stream};

/// Create a listener for inspection connections at `endpoint`
pub fn create_listener(endpoint: &str) -> io::Result<Listener> {
    // Ensure socket directory exists (Unix) and clean up a stale socket
    paths::ensure_socket_dir()?;
    paths::remove_endpoint(endpoint)?;

    #[cfg(unix)]
    let listener = {
        let name = endpoint.to_fs_name::<GenericFilePath>()?;
        ListenerOptions::new().name(name).create_tokio()?
    };

    #[cfg(windows)]
    let listener = {
        let name = endpoint.to_ns_name::<GenericNamespaced>()?;
        ListenerOptions::new().name(name).create_tokio()?
    };

    // Only the owner may talk to a task
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(endpoint, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(listener)
}

/// Connect to a runtime process's inspection endpoint
pub async fn connect(endpoint: &str) -> io::Result<Stream> {
    #[cfg(unix)]
    let stream = {
        let name = endpoint.to_fs_name::<GenericFilePath>()?;
        Stream::connect(name).await?
    };

    #[cfg(windows)]
    let stream = {
        let name = endpoint.to_ns_name::<GenericNamespaced>()?;
        Stream::connect(name).await?
    };

    Ok(stream)
}

/// Send a length-prefixed message
pub async fn send_message<W: AsyncWriteExt + Unpin>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    if data.len() > MAX_MESSAGE_SIZE as usize {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "Message too large"));
    }

    let len = data.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Receive a length-prefixed message
pub async fn recv_message<R: AsyncReadExt + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);

    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Message too large: {} bytes", len),
        ));
    }

    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data).await?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_survive_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(64);
        send_message(&mut a, b"{\"id\":1}").await.unwrap();
        send_message(&mut a, b"").await.unwrap();

        assert_eq!(recv_message(&mut b).await.unwrap(), b"{\"id\":1}");
        assert!(recv_message(&mut b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_length_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(MAX_MESSAGE_SIZE + 1).to_le_bytes()).await.unwrap();

        let err = recv_message(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_closed_peer_is_unexpected_eof() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);

        let err = recv_message(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
