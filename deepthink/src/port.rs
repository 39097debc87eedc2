//! Listening port selection

use tokio::net::TcpListener;

use crate::{Error, Result};

/// Whether a transient listener can be bound on `host:port`
pub async fn is_port_available(host: &str, port: u16) -> bool {
    match TcpListener::bind((host, port)).await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(_) => false,
    }
}

/// Find the first port at or above `start` that can be bound on `host`.
///
/// Probes at most `max_attempts` consecutive ports and never wraps past
/// 65535; when every probe fails the search is reported as
/// [`Error::NoAvailablePort`].
pub async fn find_available_port(host: &str, start: u16, max_attempts: u16) -> Result<u16> {
    let end = (u32::from(start) + u32::from(max_attempts)).min(u32::from(u16::MAX) + 1);
    let mut attempts = 0u32;

    for port in u32::from(start)..end {
        // `end` is capped at 65536, so every `port` fits in a u16
        let port = port as u16;
        attempts += 1;
        if is_port_available(host, port).await {
            return Ok(port);
        }
        tracing::debug!("Port {} is not available", port);
    }

    Err(Error::NoAvailablePort {
        start,
        end,
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_free_port_is_returned_as_is() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let found = find_available_port("127.0.0.1", port, 10).await.unwrap();
        assert_eq!(found, port);
    }

    #[tokio::test]
    async fn test_occupied_port_is_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let found = find_available_port("127.0.0.1", port, 50).await.unwrap();
        assert!(found > port);
        drop(listener);
    }

    #[tokio::test]
    async fn test_search_is_bounded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let err = find_available_port("127.0.0.1", port, 1).await.unwrap_err();
        match err {
            Error::NoAvailablePort { start, attempts, .. } => {
                assert_eq!(start, port);
                assert_eq!(attempts, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_search_stops_at_last_port() {
        // Only port 65535 is in range; whatever its state, nothing past it is probed.
        match find_available_port("127.0.0.1", u16::MAX, 10).await {
            Ok(port) => assert_eq!(port, u16::MAX),
            Err(Error::NoAvailablePort { attempts, .. }) => assert_eq!(attempts, 1),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
}
