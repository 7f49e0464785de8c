//! Integration tests for the TCP stream factory.
//!
//! These tests open real sockets on the loopback interface. Each test
//! binds port 0 so the OS picks a free port.

#[cfg(feature = "tcp")]
mod tcp {
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use pairlink_transport::{
        ByteReader, ByteStream, ByteWriter, CancelSource, CancelToken,
        StreamFactory, TransportError,
    };

    const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    /// Polls `reader` until `len` bytes have been collected.
    async fn read_exactly(reader: &mut impl ByteReader, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            if !reader.data_available().expect("stream should stay open") {
                tokio::time::sleep(Duration::from_millis(5)).await;
                continue;
            }
            filled += reader.read(&mut out[filled..]).unwrap();
        }
        out
    }

    #[tokio::test]
    async fn test_accept_and_connect_exchange_bytes() {
        let factory = StreamFactory::new();
        let never = CancelToken::never();

        let listener = factory.bind(LOOPBACK, 0, &never).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn({
            let factory = factory.clone();
            async move {
                factory
                    .accept(listener, &CancelToken::never())
                    .await
                    .expect("should accept")
            }
        });
        let client = factory
            .connect(LOOPBACK, port, &never)
            .await
            .expect("should connect");
        let server = server.await.expect("task should complete");

        let (mut server_read, mut server_write) = server.into_split();
        let (mut client_read, mut client_write) = client.into_split();

        // --- Client sends, server receives ---
        client_write.write(b"hello from client", &never).await.unwrap();
        assert_eq!(read_exactly(&mut server_read, 17).await, b"hello from client");

        // --- Server sends, client receives ---
        server_write.write(b"hi", &never).await.unwrap();
        assert_eq!(read_exactly(&mut client_read, 2).await, b"hi");
    }

    #[tokio::test]
    async fn test_listen_and_accept_is_cancellable() {
        let factory = StreamFactory::new();
        let source = CancelSource::new();
        source.cancel_after(Duration::from_millis(50));

        let result = factory
            .listen_and_accept(LOOPBACK, 0, &source.token())
            .await;

        assert!(matches!(result, Err(TransportError::Cancelled)));
    }

    #[tokio::test]
    async fn test_listener_is_released_after_accept() {
        let factory = StreamFactory::new();
        let never = CancelToken::never();

        let listener = factory.bind(LOOPBACK, 0, &never).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn({
            let factory = factory.clone();
            async move { factory.accept(listener, &CancelToken::never()).await }
        });
        let _client = factory.connect(LOOPBACK, port, &never).await.unwrap();
        let _server = server.await.unwrap().unwrap();

        // Nobody listens on the port any more, so a second connect fails.
        let second = factory.connect(LOOPBACK, port, &never).await;
        assert!(matches!(second, Err(TransportError::ConnectFailed(_))));
    }

    #[tokio::test]
    async fn test_write_to_stalled_peer_times_out() {
        let factory =
            StreamFactory::new().write_timeout(Duration::from_millis(300));
        let never = CancelToken::never();

        let listener = factory.bind(LOOPBACK, 0, &never).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn({
            let factory = factory.clone();
            async move { factory.accept(listener, &CancelToken::never()).await }
        });
        let client = factory.connect(LOOPBACK, port, &never).await.unwrap();
        // Kept open but never read, so the socket buffers fill up.
        let _server = server.await.unwrap().unwrap();

        let (_client_read, mut client_write) = client.into_split();
        let flood = vec![0u8; 64 * 1024 * 1024];
        let err = client_write.write(&flood, &never).await.unwrap_err();

        assert!(err.is_timeout(), "got: {err}");
        assert!(matches!(err, TransportError::TimedOut(_)));
        assert!(err.to_string().contains("300ms"), "got: {err}");
    }

    #[tokio::test]
    async fn test_reader_reports_peer_close() {
        let factory = StreamFactory::new();
        let never = CancelToken::never();

        let listener = factory.bind(LOOPBACK, 0, &never).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn({
            let factory = factory.clone();
            async move { factory.accept(listener, &CancelToken::never()).await }
        });
        let client = factory.connect(LOOPBACK, port, &never).await.unwrap();
        let server = server.await.unwrap().unwrap();
        drop(client);

        let (mut reader, _writer) = server.into_split();
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match reader.data_available() {
                    Ok(false) => {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                    Ok(true) => panic!("no data was sent"),
                    Err(e) => return e,
                }
            }
        })
        .await
        .expect("close should be observed");

        assert!(matches!(closed, TransportError::ConnectionClosed(_)));
    }
}
