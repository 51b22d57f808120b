//! TCP chat server: listener, shared state, and request dispatch
//!
//! The accept loop spawns one session per connection; the sessions share a
//! [`ServerState`] holding the wire format, the room registry behind its
//! mutex, the reply encoder, and the quit signal. Request handlers run
//! synchronously under the registry lock, so a broadcast fan-out can never
//! observe a membership change halfway through.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::protocol::codec::{MessageCodec, WireFormat};
use crate::protocol::messages::{
    ClientId, ClientRequest, CsChat, CsCreateRoom, CsJoinRoom, CsName, RoomInfo, ScChat,
    ScRoomsResult, ServerReply, LOBBY,
};
use crate::server::connection;
use crate::server::registry::Registry;

/// Listen backlog
const LISTEN_BACKLOG: u32 = 10;

/// Process-wide server context shared by the accept loop and every session
pub(crate) struct ServerState {
    format: WireFormat,
    registry: Mutex<Registry>,
    encoder: Box<dyn MessageCodec>,
    shutdown: watch::Sender<bool>,
}

impl ServerState {
    pub(crate) fn format(&self) -> WireFormat {
        self.format
    }

    /// Register a newly accepted client, named after its peer address
    pub(crate) fn register_client(
        &self,
        addr: SocketAddr,
        outbox: mpsc::UnboundedSender<Bytes>,
    ) -> ClientId {
        let name = format!("({}, {})", addr.ip(), addr.port());
        self.registry.lock().add_client(name, outbox)
    }

    /// Erase a client on disconnect, leaving its room first
    pub(crate) fn drop_client(&self, id: ClientId) {
        let mut registry = self.registry.lock();
        if let Some(outcome) = registry.remove_client(id) {
            if outcome.deleted {
                info!("room {} deleted: last member disconnected", outcome.room_id);
            }
        }
    }

    /// Route one decoded request to its handler
    pub(crate) fn dispatch(&self, id: ClientId, request: ClientRequest) -> Result<()> {
        match request {
            ClientRequest::Name(body) => self.on_name(id, body),
            ClientRequest::Rooms => self.on_rooms(id),
            ClientRequest::CreateRoom(body) => self.on_create_room(id, body),
            ClientRequest::JoinRoom(body) => self.on_join_room(id, body),
            ClientRequest::LeaveRoom => self.on_leave_room(id),
            ClientRequest::Chat(body) => self.on_chat(id, body),
            ClientRequest::Shutdown => self.on_shutdown(id),
        }
    }

    fn system_reply(&self, text: String) -> Result<Bytes> {
        self.encoder.encode_replies(&[ServerReply::system(text)])
    }

    fn on_name(&self, id: ClientId, body: CsName) -> Result<()> {
        let mut registry = self.registry.lock();
        let Some(old) = registry.rename_client(id, body.name.clone()) else {
            return Ok(());
        };

        let wire =
            self.system_reply(format!("{} 의 이름이 {} 으로 변경되었습니다", old, body.name))?;
        registry.send_to(id, &wire);
        if registry.client(id).is_some_and(|c| c.room != LOBBY) {
            registry.broadcast(id, &wire);
        }
        Ok(())
    }

    fn on_rooms(&self, id: ClientId) -> Result<()> {
        let registry = self.registry.lock();

        let wire = if registry.room_count() == 0 {
            self.system_reply("개설된 방이 없습니다.".to_string())?
        } else {
            let rooms = registry
                .rooms()
                .map(|room| RoomInfo {
                    room_id: room.id,
                    title: room.title.clone(),
                    members: registry.member_names(room),
                })
                .collect();
            self.encoder
                .encode_replies(&[ServerReply::RoomsResult(ScRoomsResult { rooms })])?
        };
        registry.send_to(id, &wire);
        Ok(())
    }

    fn on_create_room(&self, id: ClientId, body: CsCreateRoom) -> Result<()> {
        let mut registry = self.registry.lock();
        let Some(client) = registry.client(id) else {
            return Ok(());
        };

        let wire = if client.room != LOBBY {
            self.system_reply("대화 방에 있을 때는 방을 개설 할 수 없습니다.".to_string())?
        } else {
            let room_id = registry.create_room(body.title.clone(), id);
            info!("room {} created: {}", room_id, body.title);
            self.system_reply(format!("방제[{}] 방에 입장했습니다.", body.title))?
        };
        registry.send_to(id, &wire);
        Ok(())
    }

    fn on_join_room(&self, id: ClientId, body: CsJoinRoom) -> Result<()> {
        let mut registry = self.registry.lock();
        let Some(client) = registry.client(id) else {
            return Ok(());
        };

        if client.room != LOBBY {
            let wire =
                self.system_reply("대화 방에 있을 때는 다른 방에 들어갈 수 없습니다.".to_string())?;
            registry.send_to(id, &wire);
            return Ok(());
        }

        let name = client.name.clone();
        let Some(room) = registry.room(body.room_id) else {
            let wire = self.system_reply("대화방이 존재하지 않습니다.".to_string())?;
            registry.send_to(id, &wire);
            return Ok(());
        };
        let title = room.title.clone();

        // Joining precedes the announcement; the broadcast excludes the
        // joiner, so only the pre-existing members hear it. The author's
        // own reply comes after the broadcast.
        registry.join_room(id, body.room_id);
        let announce = self.system_reply(format!("[{}] 님이 입장했습니다.", name))?;
        registry.broadcast(id, &announce);

        let wire = self.system_reply(format!("방제[{}] 방에 입장했습니다.", title))?;
        registry.send_to(id, &wire);
        Ok(())
    }

    fn on_leave_room(&self, id: ClientId) -> Result<()> {
        let mut registry = self.registry.lock();
        let Some(client) = registry.client(id) else {
            return Ok(());
        };

        if client.room == LOBBY {
            let wire = self.system_reply("현재 대화방에 들어가 있지 않습니다.".to_string())?;
            registry.send_to(id, &wire);
            return Ok(());
        }

        let name = client.name.clone();
        let announce = self.system_reply(format!("[{}] 님이 퇴장했습니다.", name))?;
        registry.broadcast(id, &announce);

        let Some(outcome) = registry.leave_room(id) else {
            return Ok(());
        };
        if outcome.deleted {
            info!("room {} deleted: last member left", outcome.room_id);
        }

        let wire = self.system_reply(format!("방제[{}] 대화 방에서 퇴장했습니다.", outcome.title))?;
        registry.send_to(id, &wire);
        Ok(())
    }

    fn on_chat(&self, id: ClientId, body: CsChat) -> Result<()> {
        let registry = self.registry.lock();
        let Some(client) = registry.client(id) else {
            return Ok(());
        };

        if client.room == LOBBY {
            let wire = self.system_reply("현재 대화방에 들어가 있지 않습니다.".to_string())?;
            registry.send_to(id, &wire);
            return Ok(());
        }

        let wire = self.encoder.encode_replies(&[ServerReply::Chat(ScChat {
            member: client.name.clone(),
            text: body.text,
        })])?;
        registry.send_to(id, &wire);
        registry.broadcast(id, &wire);
        Ok(())
    }

    fn on_shutdown(&self, id: ClientId) -> Result<()> {
        info!("shutdown requested by client {}", id);
        let _ = self.shutdown.send(true);
        Ok(())
    }
}

/// The chat server: a bound listener plus the shared state
pub struct ChatServer {
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ChatServer {
    /// Bind the listening socket and assemble the shared state
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: &ServerConfig) -> Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(ServerState {
            format: config.format,
            registry: Mutex::new(Registry::new()),
            encoder: config.format.codec(),
            shutdown: shutdown_tx,
        });

        Ok(Self {
            listener,
            state,
            shutdown_rx,
        })
    }

    /// Address the listener actually bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the quit signal fires, then drain sessions
    pub async fn run(self) -> Result<()> {
        let ChatServer {
            listener,
            state,
            shutdown_rx,
        } = self;
        info!(
            "listening on {} ({} encoding)",
            listener.local_addr()?,
            state.format
        );

        let mut tasks = JoinSet::new();
        let mut shutdown = shutdown_rx.clone();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        tasks.spawn(connection::serve(
                            Arc::clone(&state),
                            stream,
                            addr,
                            shutdown_rx.clone(),
                        ));
                    }
                    Err(e) => error!("accept() failed: {}", e),
                },
            }
        }

        info!("shutting down, draining {} sessions", tasks.len());
        while tasks.join_next().await.is_some() {}
        state.registry.lock().clear();
        info!("server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{encode_frame, FrameCodec};
    use crate::protocol::messages::{MessageType, ScSystemMessage};
    use bytes::BytesMut;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    fn test_state(format: WireFormat) -> (Arc<ServerState>, watch::Receiver<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(ServerState {
            format,
            registry: Mutex::new(Registry::new()),
            encoder: format.codec(),
            shutdown: shutdown_tx,
        });
        (state, shutdown_rx)
    }

    fn fake_peer(n: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000 + n))
    }

    fn decode_frames(wire: &[u8]) -> Vec<Bytes> {
        let mut frames = FrameCodec::new();
        frames.feed(wire);
        let mut payloads = Vec::new();
        while let Some(payload) = frames.next_payload() {
            payloads.push(payload);
        }
        payloads
    }

    fn drain_outbox(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Vec<ServerReply> {
        let mut wire = BytesMut::new();
        while let Ok(chunk) = rx.try_recv() {
            wire.extend_from_slice(&chunk);
        }
        decode_frames(&wire)
            .iter()
            .map(|payload| serde_json::from_slice(payload).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_dispatch_chat_refused_in_lobby() {
        let (state, _shutdown) = test_state(WireFormat::Textual);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = state.register_client(fake_peer(1), tx);

        state
            .dispatch(id, ClientRequest::Chat(CsChat { text: "hi".into() }))
            .unwrap();

        let replies = drain_outbox(&mut rx);
        assert_eq!(
            replies,
            vec![ServerReply::system("현재 대화방에 들어가 있지 않습니다.")]
        );
    }

    #[tokio::test]
    async fn test_dispatch_join_missing_room() {
        let (state, _shutdown) = test_state(WireFormat::Textual);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = state.register_client(fake_peer(2), tx);

        state
            .dispatch(id, ClientRequest::JoinRoom(CsJoinRoom { room_id: 9 }))
            .unwrap();

        let replies = drain_outbox(&mut rx);
        assert_eq!(
            replies,
            vec![ServerReply::system("대화방이 존재하지 않습니다.")]
        );
    }

    #[tokio::test]
    async fn test_dispatch_create_refused_while_in_room() {
        let (state, _shutdown) = test_state(WireFormat::Textual);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = state.register_client(fake_peer(3), tx);

        state
            .dispatch(
                id,
                ClientRequest::CreateRoom(CsCreateRoom { title: "r1".into() }),
            )
            .unwrap();
        state
            .dispatch(
                id,
                ClientRequest::CreateRoom(CsCreateRoom { title: "r2".into() }),
            )
            .unwrap();

        let replies = drain_outbox(&mut rx);
        assert_eq!(
            replies,
            vec![
                ServerReply::system("방제[r1] 방에 입장했습니다."),
                ServerReply::system("대화 방에 있을 때는 방을 개설 할 수 없습니다."),
            ]
        );
        assert_eq!(state.registry.lock().room_count(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_shutdown_sets_quit() {
        let (state, shutdown) = test_state(WireFormat::Textual);
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = state.register_client(fake_peer(4), tx);

        assert!(!*shutdown.borrow());
        state.dispatch(id, ClientRequest::Shutdown).unwrap();
        assert!(*shutdown.borrow());
    }

    // --- End-to-end scenarios over real sockets ---

    async fn start_server(format: WireFormat) -> (SocketAddr, tokio::task::JoinHandle<Result<()>>) {
        let config = ServerConfig {
            format,
            workers: 2,
            port: 0,
        };
        let server = ChatServer::bind(&config).unwrap();
        let addr = server.local_addr().unwrap();
        (addr, tokio::spawn(server.run()))
    }

    struct TestClient {
        stream: TcpStream,
        frames: FrameCodec,
    }

    impl TestClient {
        async fn connect(addr: SocketAddr) -> Self {
            Self {
                stream: TcpStream::connect(addr).await.unwrap(),
                frames: FrameCodec::new(),
            }
        }

        async fn send_payload(&mut self, payload: &[u8]) {
            let mut buf = BytesMut::new();
            encode_frame(payload, &mut buf).unwrap();
            self.stream.write_all(&buf).await.unwrap();
        }

        async fn send_request(&mut self, request: &ClientRequest) {
            self.send_payload(&serde_json::to_vec(request).unwrap())
                .await;
        }

        async fn recv_payload(&mut self) -> Bytes {
            loop {
                if let Some(payload) = self.frames.next_payload() {
                    return payload;
                }
                let mut buf = [0u8; 4096];
                let n = timeout(Duration::from_secs(2), self.stream.read(&mut buf))
                    .await
                    .expect("timed out waiting for a reply")
                    .unwrap();
                assert!(n > 0, "server closed the connection");
                self.frames.feed(&buf[..n]);
            }
        }

        async fn recv_reply(&mut self) -> ServerReply {
            serde_json::from_slice(&self.recv_payload().await).unwrap()
        }

        async fn system_text(&mut self) -> String {
            match self.recv_reply().await {
                ServerReply::SystemMessage(m) => m.text,
                other => panic!("expected system message, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_rename_replies_and_broadcasts() {
        let (addr, _server) = start_server(WireFormat::Textual).await;

        let mut a = TestClient::connect(addr).await;
        a.send_request(&ClientRequest::Name(CsName {
            name: "alice".into(),
        }))
        .await;
        assert!(a.system_text().await.contains("alice"));

        a.send_request(&ClientRequest::CreateRoom(CsCreateRoom { title: "r1".into() }))
            .await;
        a.system_text().await;

        let mut b = TestClient::connect(addr).await;
        b.send_request(&ClientRequest::JoinRoom(CsJoinRoom { room_id: 1 }))
            .await;
        assert!(a.system_text().await.contains("님이 입장했습니다"));
        b.system_text().await;

        a.send_request(&ClientRequest::Name(CsName {
            name: "alice2".into(),
        }))
        .await;
        assert!(a.system_text().await.contains("alice2"));
        assert_eq!(
            b.system_text().await,
            "alice 의 이름이 alice2 으로 변경되었습니다"
        );
    }

    #[tokio::test]
    async fn test_create_then_list() {
        let (addr, _server) = start_server(WireFormat::Textual).await;

        let mut a = TestClient::connect(addr).await;
        a.send_request(&ClientRequest::Name(CsName {
            name: "alice".into(),
        }))
        .await;
        a.system_text().await;
        a.send_request(&ClientRequest::CreateRoom(CsCreateRoom { title: "r1".into() }))
            .await;
        assert_eq!(a.system_text().await, "방제[r1] 방에 입장했습니다.");

        let mut b = TestClient::connect(addr).await;
        b.send_request(&ClientRequest::Rooms).await;
        match b.recv_reply().await {
            ServerReply::RoomsResult(result) => {
                assert_eq!(result.rooms.len(), 1);
                assert_eq!(result.rooms[0].room_id, 1);
                assert_eq!(result.rooms[0].title, "r1");
                assert_eq!(result.rooms[0].members, vec!["alice"]);
            }
            other => panic!("expected rooms result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_join_announces_to_existing_members() {
        let (addr, _server) = start_server(WireFormat::Textual).await;

        let mut a = TestClient::connect(addr).await;
        a.send_request(&ClientRequest::CreateRoom(CsCreateRoom { title: "r1".into() }))
            .await;
        a.system_text().await;

        let mut b = TestClient::connect(addr).await;
        b.send_request(&ClientRequest::JoinRoom(CsJoinRoom { room_id: 1 }))
            .await;

        let to_a = a.system_text().await;
        assert!(to_a.ends_with("님이 입장했습니다."));
        assert_eq!(b.system_text().await, "방제[r1] 방에 입장했습니다.");
    }

    #[tokio::test]
    async fn test_leave_deletes_empty_room() {
        let (addr, _server) = start_server(WireFormat::Textual).await;

        let mut a = TestClient::connect(addr).await;
        a.send_request(&ClientRequest::CreateRoom(CsCreateRoom { title: "r1".into() }))
            .await;
        a.system_text().await;
        a.send_request(&ClientRequest::LeaveRoom).await;
        assert_eq!(a.system_text().await, "방제[r1] 대화 방에서 퇴장했습니다.");

        let mut c = TestClient::connect(addr).await;
        c.send_request(&ClientRequest::Rooms).await;
        assert_eq!(c.system_text().await, "개설된 방이 없습니다.");
    }

    #[tokio::test]
    async fn test_chat_echoes_and_broadcasts() {
        let (addr, _server) = start_server(WireFormat::Textual).await;

        let mut a = TestClient::connect(addr).await;
        a.send_request(&ClientRequest::Name(CsName {
            name: "alice".into(),
        }))
        .await;
        a.system_text().await;
        a.send_request(&ClientRequest::CreateRoom(CsCreateRoom { title: "r1".into() }))
            .await;
        a.system_text().await;

        let mut b = TestClient::connect(addr).await;
        b.send_request(&ClientRequest::JoinRoom(CsJoinRoom { room_id: 1 }))
            .await;
        a.system_text().await;
        b.system_text().await;

        a.send_request(&ClientRequest::Chat(CsChat { text: "hi".into() }))
            .await;

        for client in [&mut a, &mut b] {
            match client.recv_reply().await {
                ServerReply::Chat(chat) => {
                    assert_eq!(chat.member, "alice");
                    assert_eq!(chat.text, "hi");
                }
                other => panic!("expected chat, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_split_and_coalesced_sends_decode_in_order() {
        let (addr, _server) = start_server(WireFormat::Textual).await;

        let mut client = TestClient::connect(addr).await;

        // One frame dribbled out byte by byte.
        let mut wire = BytesMut::new();
        let rename = serde_json::to_vec(&ClientRequest::Name(CsName {
            name: "alice".into(),
        }))
        .unwrap();
        encode_frame(&rename, &mut wire).unwrap();
        for byte in wire.iter() {
            client
                .stream
                .write_all(std::slice::from_ref(byte))
                .await
                .unwrap();
        }
        assert!(client.system_text().await.contains("alice"));

        // Two messages coalesced into a single write.
        let mut wire = BytesMut::new();
        let create = serde_json::to_vec(&ClientRequest::CreateRoom(CsCreateRoom {
            title: "r1".into(),
        }))
        .unwrap();
        let leave = serde_json::to_vec(&ClientRequest::LeaveRoom).unwrap();
        encode_frame(&create, &mut wire).unwrap();
        encode_frame(&leave, &mut wire).unwrap();
        client.stream.write_all(&wire).await.unwrap();

        assert_eq!(client.system_text().await, "방제[r1] 방에 입장했습니다.");
        assert_eq!(
            client.system_text().await,
            "방제[r1] 대화 방에서 퇴장했습니다."
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_closes_connection() {
        let (addr, _server) = start_server(WireFormat::Textual).await;

        let mut client = TestClient::connect(addr).await;
        client.send_payload(b"{not json").await;

        let mut buf = [0u8; 16];
        let n = timeout(Duration::from_secs(2), client.stream.read(&mut buf))
            .await
            .expect("timed out waiting for close")
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_binary_session_uses_two_frame_replies() {
        let (addr, _server) = start_server(WireFormat::Binary).await;

        let mut client = TestClient::connect(addr).await;
        client
            .send_payload(&bincode::serialize(&MessageType::CsName).unwrap())
            .await;
        client
            .send_payload(
                &bincode::serialize(&CsName {
                    name: "alice".into(),
                })
                .unwrap(),
            )
            .await;

        let header: MessageType = bincode::deserialize(&client.recv_payload().await).unwrap();
        assert_eq!(header, MessageType::ScSystemMessage);
        let body: ScSystemMessage = bincode::deserialize(&client.recv_payload().await).unwrap();
        assert!(body.text.contains("alice"));
    }

    #[tokio::test]
    async fn test_shutdown_terminates_server() {
        let (addr, server) = start_server(WireFormat::Textual).await;

        let mut client = TestClient::connect(addr).await;
        client.send_request(&ClientRequest::Shutdown).await;

        let result = timeout(Duration::from_secs(1), server)
            .await
            .expect("server did not stop after CSShutdown")
            .unwrap();
        assert!(result.is_ok());
    }
}
