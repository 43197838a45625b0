//! TCP transport for [`P2pServer`].
//!
//! Each connection starts with a hello exchange: both sides send a
//! [`Frame::Hello`] carrying their identity and capabilities, then run
//! [`match_protocols`] on what they received. No shared protocol means the
//! connection is dropped. Otherwise a [`ChannelPeer`] bound to the primary
//! matched protocol is registered with the server, together with one
//! sibling handle per other matched protocol (see [`P2pServer::peer_for`]).
//! Two Tokio tasks then take over the socket:
//!
//! - the **writer** drains the handle's outbound queue onto the socket, with
//!   a deadline per frame. A stalled or failed write closes the handle.
//! - the **reader** decodes inbound frames, maps wire codes back to
//!   protocol-relative codes and forwards them on the inbound channel.
//!
//! Either task ending closes the handle, which is the only cancellation
//! signal a consensus engine sees.

use {
    crate::{
        error::{Result, TransportError},
        message::{Frame, Hello},
        node::NodeId,
        peer::{ChannelPeer, CloseSignal, Peer},
        protocol::{match_protocols, primary_protocol, NegotiatedProtocol},
        server::P2pServer,
    },
    log::{debug, error, info, warn},
    std::{net::SocketAddr, sync::Arc, time::Duration},
    tokio::{
        io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
        net::{
            tcp::{OwnedReadHalf, OwnedWriteHalf},
            TcpListener, TcpStream,
        },
        sync::mpsc,
        task::JoinHandle,
        time::timeout,
    },
};

/// Room for the frame envelope around a maximum-size payload.
const FRAME_OVERHEAD: usize = 64;

/// A protocol message received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Sender identity.
    pub from: NodeId,
    /// Protocol the message belongs to.
    pub protocol: String,
    /// Protocol-relative message code.
    pub code: u64,
    /// Encoded message body.
    pub payload: Vec<u8>,
}

/// Connects sockets to a [`P2pServer`].
pub struct Transport<B> {
    server: Arc<P2pServer<B>>,
    inbound_tx: mpsc::Sender<InboundMessage>,
}

impl<B> Clone for Transport<B> {
    fn clone(&self) -> Self {
        Self {
            server: self.server.clone(),
            inbound_tx: self.inbound_tx.clone(),
        }
    }
}

impl<B: Send + 'static> Transport<B> {
    /// Create a transport and the channel delivering every inbound message.
    pub fn new(server: Arc<P2pServer<B>>) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(server.config().channel_buffer_size);
        (Self { server, inbound_tx }, inbound_rx)
    }

    pub fn server(&self) -> &Arc<P2pServer<B>> {
        &self.server
    }

    /// Accept connections on `listener` until the task is aborted.
    pub fn listen(&self, listener: TcpListener) -> JoinHandle<()> {
        let transport = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!("accepted connection from {}", addr);
                        let transport = transport.clone();
                        tokio::spawn(async move {
                            if let Err(e) = transport.setup(stream, addr).await {
                                warn!("inbound connection from {} failed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("accept error: {}", e);
                    }
                }
            }
        })
    }

    /// Connect to `addr`, handshake and register the peer.
    pub async fn dial(&self, addr: SocketAddr) -> Result<Arc<ChannelPeer>> {
        let stream = TcpStream::connect(addr).await?;
        self.setup(stream, addr).await
    }

    async fn setup(&self, mut stream: TcpStream, addr: SocketAddr) -> Result<Arc<ChannelPeer>> {
        let config = self.server.config();
        let max_frame = config.max_message_size.saturating_add(FRAME_OVERHEAD);
        let handshake_timeout_ms = config.handshake_timeout_ms;

        let remote = timeout(
            Duration::from_millis(handshake_timeout_ms),
            handshake(&mut stream, addr, self.server.hello(), max_frame),
        )
        .await
        .map_err(|_| TransportError::HandshakeTimeout {
            addr,
            timeout_ms: handshake_timeout_ms,
        })??;

        let matched = match_protocols(self.server.protocols(), &remote.capabilities);
        let Some(primary) = primary_protocol(&matched).cloned() else {
            info!("no common protocol with {}, disconnecting", remote.node);
            disconnect(&mut stream, "no common protocol", max_frame).await;
            return Err(TransportError::NoCommonProtocol(remote.node.id));
        };

        let (peer, outbound_rx) = ChannelPeer::new(
            remote.node,
            primary,
            config.send_queue_capacity,
            config.max_message_size,
        );
        let secondary: Vec<Arc<dyn Peer>> = matched
            .iter()
            .filter(|p| p.name != peer.protocol().name)
            .map(|p| Arc::new(peer.for_protocol(p.clone())) as Arc<dyn Peer>)
            .collect();
        let peer = Arc::new(peer);
        if let Err(e) = self.server.add_connection(peer.clone(), secondary) {
            disconnect(&mut stream, &e.to_string(), max_frame).await;
            return Err(e.into());
        }
        info!(
            "connected {} speaking {} v{}",
            remote.node,
            peer.protocol().name,
            peer.protocol().version
        );

        let (reader, writer) = stream.into_split();
        tokio::spawn(write_loop(
            writer,
            outbound_rx,
            peer.close_signal(),
            max_frame,
            Duration::from_millis(config.write_timeout_ms),
        ));
        tokio::spawn(read_loop(
            reader,
            remote.node.id,
            matched,
            self.inbound_tx.clone(),
            peer.close_signal(),
            max_frame,
        ));
        Ok(peer)
    }
}

/// Send our hello and wait for theirs.
async fn handshake(
    stream: &mut TcpStream,
    addr: SocketAddr,
    ours: Hello,
    max_frame: usize,
) -> Result<Hello> {
    write_frame(stream, &Frame::Hello(ours), max_frame).await?;
    match read_frame(stream, max_frame).await? {
        Some(Frame::Hello(theirs)) => Ok(theirs),
        Some(other) => Err(TransportError::UnexpectedFrame {
            addr,
            expected: "hello",
            got: other.kind(),
        }),
        None => Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into()),
    }
}

/// Best-effort disconnect notice before dropping the socket.
async fn disconnect<W: AsyncWrite + Unpin>(writer: &mut W, reason: &str, max_frame: usize) {
    let frame = Frame::Disconnect {
        reason: reason.to_string(),
    };
    if let Err(e) = write_frame(writer, &frame, max_frame).await {
        debug!("failed to send disconnect: {}", e);
    }
}

/// Write one length-prefixed frame.
async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
    max_frame: usize,
) -> Result<()> {
    let bytes = frame.serialize_framed(max_frame)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame. `None` on clean EOF.
async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame: usize,
) -> Result<Option<Frame>> {
    let mut header = [0u8; 4];
    if let Err(e) = reader.read_exact(&mut header).await {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(e.into());
    }
    let len = Frame::read_frame_len(&header);
    if len > max_frame {
        return Err(TransportError::FrameTooLarge {
            size: len,
            max: max_frame,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Frame::deserialize(&payload).map(Some)
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound_rx: mpsc::Receiver<Frame>,
    closed: CloseSignal,
    max_frame: usize,
    write_timeout: Duration,
) {
    loop {
        let notified = closed.notified();
        if closed.is_closed() {
            disconnect(&mut writer, "closed", max_frame).await;
            break;
        }
        let frame = tokio::select! {
            _ = notified => continue,
            frame = outbound_rx.recv() => frame,
        };
        let Some(frame) = frame else {
            break;
        };
        match timeout(write_timeout, write_frame(&mut writer, &frame, max_frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("write to {} failed: {}", peer_addr(&writer), e);
                break;
            }
            Err(_) => {
                warn!(
                    "write to {} stalled for {:?}, dropping peer",
                    peer_addr(&writer),
                    write_timeout
                );
                break;
            }
        }
    }
    closed.close();
    let _ = writer.shutdown().await;
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    from: NodeId,
    matched: Vec<NegotiatedProtocol>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    closed: CloseSignal,
    max_frame: usize,
) {
    loop {
        let notified = closed.notified();
        tokio::pin!(notified);
        if closed.is_closed() {
            break;
        }
        let frame = tokio::select! {
            _ = &mut notified => break,
            frame = read_frame(&mut reader, max_frame) => frame,
        };
        match frame {
            Ok(Some(Frame::Message { code, payload })) => {
                let Some((protocol, code)) = matched
                    .iter()
                    .find_map(|p| p.local_code(code).map(|local| (p, local)))
                else {
                    warn!("peer {} sent unknown message code {}, disconnecting", from, code);
                    break;
                };
                let message = InboundMessage {
                    from,
                    protocol: protocol.name.clone(),
                    code,
                    payload,
                };
                let sent = tokio::select! {
                    _ = &mut notified => break,
                    sent = inbound_tx.send(message) => sent,
                };
                if sent.is_err() {
                    info!("inbound channel closed, stopping reader for {}", from);
                    break;
                }
            }
            Ok(Some(Frame::Disconnect { reason })) => {
                info!("peer {} disconnected: {}", from, reason);
                break;
            }
            Ok(Some(other)) => {
                warn!("unexpected {} frame from {}, disconnecting", other.kind(), from);
                break;
            }
            Ok(None) => {
                debug!("connection to {} closed by remote", from);
                break;
            }
            Err(e) => {
                warn!("read error from {}: {}", from, e);
                break;
            }
        }
    }
    closed.close();
}

fn peer_addr(writer: &OwnedWriteHalf) -> String {
    writer
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string())
}
