use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket, tcp::OwnedWriteHalf};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    ClientGuard, StreamHub,
    message::{self, Incoming, Request, Response, TransportSpec},
    rtp::{RtpPacketizer, interleaved},
    sdp::{self, PAYLOAD_TYPE},
};
use crate::media::types::EncodedFrame;

/// A single write (response or one access unit) slower than this drops the
/// client.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(2);
const SESSION_TIMEOUT_SECS: u64 = 60;
const PUBLIC_METHODS: &str = "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN, GET_PARAMETER, SET_PARAMETER";

pub struct RtspServer {
    listener: TcpListener,
    hub: Arc<StreamHub>,
    mount: String,
}

impl RtspServer {
    pub async fn bind(addr: SocketAddr, mount: &str, hub: Arc<StreamHub>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("bind rtsp server on {}: {}", addr, e))?;
        Ok(Self {
            listener,
            hub,
            mount: mount.trim_end_matches('/').to_string(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts clients until `cancel` fires. Each client runs in its own task
    /// and is torn down with the server.
    pub async fn run(self, cancel: CancellationToken) {
        match self.local_addr() {
            Ok(addr) => log::info!("[RTSPServer] serving rtsp://{}{}", addr, self.mount),
            Err(e) => log::warn!("[RTSPServer] serving {} (address unknown: {})", self.mount, e),
        }
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        log::info!("[RTSPServer] client {} connected", peer);
                        let session = Session::new(peer, self.hub.clone(), self.mount.clone());
                        let session_cancel = cancel.child_token();
                        tokio::spawn(session.serve(stream, session_cancel));
                    }
                    Err(e) => {
                        log::warn!("[RTSPServer] accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
        log::info!("[RTSPServer] stopped");
    }
}

enum ClientTransport {
    Interleaved { rtp: u8 },
    Udp { socket: Arc<UdpSocket>, dest: SocketAddr },
}

enum Action {
    None,
    Play(broadcast::Receiver<EncodedFrame>),
    Close,
}

struct Session {
    id: String,
    peer: SocketAddr,
    hub: Arc<StreamHub>,
    mount: String,
    ssrc: u32,
    initial_sequence: u16,
    rtp_base: u32,
    transport: Option<ClientTransport>,
    playing: Option<JoinHandle<()>>,
}

impl Session {
    fn new(peer: SocketAddr, hub: Arc<StreamHub>, mount: String) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            id: format!("{:016X}", rng.r#gen::<u64>()),
            peer,
            hub,
            mount,
            ssrc: rng.r#gen(),
            initial_sequence: rng.r#gen(),
            rtp_base: rng.r#gen(),
            transport: None,
            playing: None,
        }
    }

    async fn serve(mut self, stream: TcpStream, cancel: CancellationToken) {
        let (mut reader, writer) = stream.into_split();
        let writer = Arc::new(Mutex::new(writer));
        let mut buf = BytesMut::with_capacity(4096);

        'conn: loop {
            loop {
                let request = match message::parse(&mut buf) {
                    Ok(Some(Incoming::Request(request))) => request,
                    Ok(Some(Incoming::Interleaved { .. })) => continue,
                    Ok(None) => break,
                    Err(e) => {
                        log::debug!("[RTSPServer] client {} sent garbage: {}", self.peer, e);
                        let _ = write_all(&writer, &Response::new(400).encode(None)).await;
                        break 'conn;
                    }
                };
                log::debug!("[RTSPServer] client {} {} {}", self.peer, request.method, request.uri);

                let (response, action) = self.handle(&request).await;
                if let Err(e) = write_all(&writer, &response.encode(request.cseq())).await {
                    log::info!("[RTSPServer] client {} write failed: {}", self.peer, e);
                    break 'conn;
                }
                match action {
                    Action::None => {}
                    Action::Close => break 'conn,
                    Action::Play(frames) => self.start_playing(frames, &writer, &cancel),
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                read = reader.read_buf(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        log::debug!("[RTSPServer] client {} read failed: {}", self.peer, e);
                        break;
                    }
                },
            }
        }

        cancel.cancel();
        if let Some(task) = self.playing.take() {
            let _ = task.await;
        }
        log::info!("[RTSPServer] client {} disconnected", self.peer);
    }

    fn matches_mount(&self, request: &Request) -> bool {
        let path = request.path();
        path == self.mount
            || path
                .strip_prefix(self.mount.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }

    fn session_header(&self) -> String {
        format!("{};timeout={}", self.id, SESSION_TIMEOUT_SECS)
    }

    /// True when the request names another session than ours.
    fn foreign_session(&self, request: &Request) -> bool {
        request
            .header("Session")
            .map(|s| s.split(';').next().unwrap_or_default().trim())
            .is_some_and(|s| s != self.id)
    }

    async fn handle(&mut self, request: &Request) -> (Response, Action) {
        let method = request.method.to_ascii_uppercase();
        match method.as_str() {
            "OPTIONS" => (Response::ok().header("Public", PUBLIC_METHODS), Action::None),
            "DESCRIBE" => {
                if !self.matches_mount(request) {
                    return (Response::new(404), Action::None);
                }
                let body = sdp::session_description(
                    &self.hub.parameter_sets(),
                    u64::from(self.ssrc),
                    self.hub.fps(),
                );
                let response = Response::ok()
                    .header("Content-Base", format!("{}/", request.uri.trim_end_matches('/')))
                    .body("application/sdp", body);
                (response, Action::None)
            }
            "SETUP" => (self.setup(request).await, Action::None),
            "PLAY" => self.play(request),
            "TEARDOWN" => {
                let response = Response::ok().header("Session", self.id.clone());
                (response, Action::Close)
            }
            "GET_PARAMETER" | "SET_PARAMETER" => {
                let mut response = Response::ok();
                if self.transport.is_some() {
                    response = response.header("Session", self.session_header());
                }
                (response, Action::None)
            }
            _ => (Response::new(405).header("Allow", PUBLIC_METHODS), Action::None),
        }
    }

    async fn setup(&mut self, request: &Request) -> Response {
        if !self.matches_mount(request) {
            return Response::new(404);
        }
        if self.playing.is_some() {
            return Response::new(455);
        }
        if self.foreign_session(request) {
            return Response::new(454);
        }
        let Some(spec) = request.header("Transport").and_then(TransportSpec::parse) else {
            return Response::new(461);
        };

        let transport_header = match spec {
            TransportSpec::Interleaved { rtp, rtcp } => {
                self.transport = Some(ClientTransport::Interleaved { rtp });
                format!(
                    "RTP/AVP/TCP;unicast;interleaved={}-{};ssrc={:08X}",
                    rtp, rtcp, self.ssrc
                )
            }
            TransportSpec::Udp {
                rtp_port,
                rtcp_port,
            } => {
                let socket = match UdpSocket::bind("0.0.0.0:0").await {
                    Ok(socket) => socket,
                    Err(e) => {
                        log::warn!("[RTSPServer] client {} udp bind failed: {}", self.peer, e);
                        return Response::new(500);
                    }
                };
                let server_port = match socket.local_addr() {
                    Ok(addr) => addr.port(),
                    Err(_) => return Response::new(500),
                };
                self.transport = Some(ClientTransport::Udp {
                    socket: Arc::new(socket),
                    dest: SocketAddr::new(self.peer.ip(), rtp_port),
                });
                format!(
                    "RTP/AVP;unicast;client_port={}-{};server_port={}-{};ssrc={:08X}",
                    rtp_port,
                    rtcp_port,
                    server_port,
                    server_port.wrapping_add(1),
                    self.ssrc
                )
            }
        };

        Response::ok()
            .header("Transport", transport_header)
            .header("Session", self.session_header())
    }

    fn play(&mut self, request: &Request) -> (Response, Action) {
        if self.transport.is_none() {
            return (Response::new(455), Action::None);
        }
        if self.foreign_session(request) {
            return (Response::new(454), Action::None);
        }
        let response = Response::ok()
            .header("Session", self.session_header())
            .header("Range", "npt=0.000-")
            .header(
                "RTP-Info",
                format!(
                    "url={}/{};seq={};rtptime={}",
                    request.uri.trim_end_matches('/'),
                    sdp::TRACK_CONTROL,
                    self.initial_sequence,
                    self.rtp_base
                ),
            );
        if self.playing.is_some() {
            return (response, Action::None);
        }
        // subscribe before answering so nothing published after the reply is missed
        (response, Action::Play(self.hub.subscribe()))
    }

    fn start_playing(
        &mut self,
        frames: broadcast::Receiver<EncodedFrame>,
        writer: &Arc<Mutex<OwnedWriteHalf>>,
        cancel: &CancellationToken,
    ) {
        let sink = match &self.transport {
            Some(ClientTransport::Interleaved { rtp }) => RtpSink::Tcp {
                writer: writer.clone(),
                channel: *rtp,
            },
            Some(ClientTransport::Udp { socket, dest }) => RtpSink::Udp {
                socket: socket.clone(),
                dest: *dest,
            },
            None => return,
        };
        let packetizer = RtpPacketizer::new(self.ssrc, self.initial_sequence, PAYLOAD_TYPE);
        log::info!(
            "[RTSPServer] client {} playing (total {})",
            self.peer,
            self.hub.client_count() + 1
        );
        self.playing = Some(tokio::spawn(stream_to_client(
            frames,
            sink,
            packetizer,
            self.rtp_base,
            self.hub.client_guard(),
            cancel.clone(),
            self.peer,
        )));
    }
}

enum RtpSink {
    Tcp {
        writer: Arc<Mutex<OwnedWriteHalf>>,
        channel: u8,
    },
    Udp {
        socket: Arc<UdpSocket>,
        dest: SocketAddr,
    },
}

impl RtpSink {
    async fn send(&self, packets: &[Bytes]) -> io::Result<()> {
        match self {
            RtpSink::Tcp { writer, channel } => {
                let mut framed = BytesMut::new();
                for packet in packets {
                    framed.extend_from_slice(&interleaved(*channel, packet));
                }
                write_all(writer, &framed).await
            }
            RtpSink::Udp { socket, dest } => {
                for packet in packets {
                    socket.send_to(packet, dest).await?;
                }
                Ok(())
            }
        }
    }
}

async fn write_all(writer: &Mutex<OwnedWriteHalf>, data: &[u8]) -> io::Result<()> {
    let mut writer = writer.lock().await;
    match tokio::time::timeout(WRITE_TIMEOUT, writer.write_all(data)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
    }
}

/// Per-client send loop. Starts at the next keyframe and resynchronizes on
/// the next keyframe after falling behind the broadcast.
async fn stream_to_client(
    mut frames: broadcast::Receiver<EncodedFrame>,
    sink: RtpSink,
    mut packetizer: RtpPacketizer,
    rtp_base: u32,
    _guard: ClientGuard,
    cancel: CancellationToken,
    peer: SocketAddr,
) {
    let mut waiting_for_key = true;
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = frames.recv() => received,
        };
        let frame = match received {
            Ok(frame) => frame,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::debug!("[RTSPServer] client {} lagged {} frames, waiting for keyframe", peer, n);
                waiting_for_key = true;
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if waiting_for_key {
            if !frame.is_key {
                continue;
            }
            waiting_for_key = false;
        }

        let packets = packetizer.packetize(&frame.data, rtp_base.wrapping_add(frame.rtp_time()));
        if let Err(e) = sink.send(&packets).await {
            log::info!("[RTSPServer] client {} dropped: {}", peer, e);
            break;
        }
    }
    cancel.cancel();
}

#[cfg(test)]
#[path = "server_test.rs"]
mod server_test;
