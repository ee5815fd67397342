//! 서버 엔진
//!
//! - accept 루프: 연결마다 reader/writer 태스크 한 쌍
//! - `Engine`: 연결별 프로토콜 상태 머신. 자기 연결의 reader
//!   태스크에서만 접근하고, 공유 상태는 [`SessionState`]와
//!   [`Registry`]를 통해서만 만진다
//! - 파일 작업은 전부 `<base>/<유저명>/<파일명>` 샌드박스 아래로만 해석

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::codec::FrameDecoder;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::frame::{ErrorCode, Frame};
use crate::registry::Registry;
use crate::session::SessionState;
use crate::telemetry::TelemetryClient;
use crate::{ConnectionId, BLOCK_SIZE};

/// 진행 중인 전송 (연결당 최대 하나, 파이프라이닝 없음)
enum Transfer {
    /// 전송 없음
    Idle,
    /// RRQ: 파일을 512바이트 블록으로 송신 중
    SendingFile { file: File, filename: String, block: u16 },
    /// DIRQ: 파일명 스냅샷을 블록으로 송신 중
    SendingDir { names: Vec<String>, cursor: usize, block: u16 },
    /// WRQ: 클라이언트 DATA 수신 중
    Receiving,
}

/// 연결별 프로토콜 엔진
///
/// 상태 전이: 미로그인 → 로그인, 로그인 중에는 Idle/전송 중 하나.
/// 요청 단위 실패는 ERROR 프레임으로 변환되고 연결은 유지된다
pub struct Engine {
    id: ConnectionId,
    config: Arc<Config>,
    session: Arc<SessionState>,
    registry: Arc<Registry>,
    telemetry: Arc<TelemetryClient>,
    transfer: Transfer,
    terminate: bool,
}

impl Engine {
    /// 새 엔진 생성 (연결 하나당 하나)
    pub fn new(
        id: ConnectionId,
        config: Arc<Config>,
        session: Arc<SessionState>,
        registry: Arc<Registry>,
        telemetry: Arc<TelemetryClient>,
    ) -> Self {
        Self {
            id,
            config,
            session,
            registry,
            telemetry,
            transfer: Transfer::Idle,
            terminate: false,
        }
    }

    /// DISC 처리 후 true. reader 루프는 즉시 종료해야 한다
    pub fn should_terminate(&self) -> bool {
        self.terminate
    }

    /// 디코딩된 프레임 하나 처리
    pub fn handle_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Logrq { username } => self.handle_logrq(&username),
            Frame::Dirq => self.handle_dirq(),
            Frame::Rrq { filename } => self.handle_rrq(&filename),
            Frame::Wrq { filename } => self.handle_wrq(&filename),
            Frame::Data { block, payload } => self.handle_data(block, &payload),
            Frame::Ack { block } => self.handle_ack(block),
            Frame::Delrq { filename } => self.handle_delrq(&filename),
            Frame::Disc => self.handle_disc(),
            // 서버가 ERROR/BCAST를 받을 일은 없다 (무시)
            Frame::Error { .. } | Frame::Bcast { .. } => {}
        }
    }

    /// 디코더가 거부한 입력 처리 (스트림은 계속 유지)
    pub fn handle_invalid(&mut self, err: &Error) {
        debug!("connection {} sent invalid input: {}", self.id, err);
        match err {
            Error::UnknownOpcode { .. } => {
                self.send_error(ErrorCode::IllegalOperation, "Illegal operation - unknown opcode");
            }
            _ => self.send_error(ErrorCode::NotDefined, "Malformed frame"),
        }
    }

    /// 전송 계층 종료 경로 (소켓 끊김 등)
    ///
    /// DISC와 같은 해제를 수행하되 ACK는 보내지 않는다.
    /// DISC 이후에 다시 불려도 무해하다
    pub fn teardown(&mut self) {
        self.terminate = true;
        self.transfer = Transfer::Idle;
        if let Some(user) = self.session.release_connection(self.id) {
            self.telemetry.disconnect(&user);
        }
        self.registry.disconnect(self.id);
    }

    // ─────────────────────────────────────────────────────────────────
    // opcode별 핸들러
    // ─────────────────────────────────────────────────────────────────

    fn handle_logrq(&mut self, username: &str) {
        if validate_name(username, self.config.max_name_len).is_err() {
            self.send_error(ErrorCode::NotDefined, "Bad username");
            return;
        }
        if !self.session.try_login(self.id, username) {
            self.send_error(ErrorCode::AlreadyLoggedIn, "User already logged in");
            return;
        }
        if let Err(e) = fs::create_dir_all(self.config.base_dir.join(username)) {
            warn!("failed to create user dir for {}: {}", username, e);
        }
        self.send_ack(0);
        self.telemetry.login(username);
        info!("connection {} logged in as {}", self.id, username);
    }

    fn handle_dirq(&mut self) {
        let Some(dir) = self.require_login_dir() else { return };
        if self.reject_if_busy() {
            return;
        }

        // 정규 파일만, 업로드 중인 이름은 목록에서 제외
        let mut names = Vec::new();
        if let Ok(entries) = fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let Ok(file_type) = entry.file_type() else { continue };
                if !file_type.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                if !self.session.is_uploading(&name) {
                    names.push(name);
                }
            }
        }
        names.sort();

        self.transfer = Transfer::SendingDir { names, cursor: 0, block: 0 };
        self.send_next_dir_block();
    }

    fn handle_rrq(&mut self, filename: &str) {
        let Some(dir) = self.require_login_dir() else { return };
        if self.reject_if_busy() {
            return;
        }
        if validate_name(filename, self.config.max_name_len).is_err() {
            self.send_error(ErrorCode::AccessViolation, "Access violation - bad file name");
            return;
        }
        // 업로드가 끝나지 않은 파일은 읽기 금지
        if self.session.is_uploading(filename) {
            self.send_error(ErrorCode::AccessViolation, "Access violation - file is uploading");
            return;
        }

        let path = dir.join(filename);
        if !path.is_file() {
            self.send_error(ErrorCode::FileNotFound, "File not found");
            return;
        }
        match File::open(&path) {
            Ok(file) => {
                self.transfer = Transfer::SendingFile {
                    file,
                    filename: filename.to_string(),
                    block: 0,
                };
                // 첫 블록은 즉시, 이후는 ACK마다 하나씩
                self.send_next_file_block();
            }
            Err(e) => {
                warn!("open {:?} failed: {}", path, e);
                self.send_error(ErrorCode::AccessViolation, "Access violation - open failed");
            }
        }
    }

    fn handle_wrq(&mut self, filename: &str) {
        let Some(dir) = self.require_login_dir() else { return };
        if self.reject_if_busy() {
            return;
        }
        if validate_name(filename, self.config.max_name_len).is_err() {
            self.send_error(ErrorCode::AccessViolation, "Access violation - bad file name");
            return;
        }

        let path = dir.join(filename);
        if path.exists() || !self.session.try_begin_upload(self.id, filename) {
            self.send_error(ErrorCode::FileExists, "File already exists");
            return;
        }

        self.transfer = Transfer::Receiving;
        // 클라이언트는 이 ACK를 받고 블록 1부터 DATA를 밀기 시작한다
        self.send_ack(0);
    }

    fn handle_data(&mut self, block: u16, payload: &[u8]) {
        if !self.session.is_logged_in(self.id) {
            self.send_error(ErrorCode::NotLoggedIn, "Not logged in");
            return;
        }
        let Some(filename) = self.session.upload_of(self.id) else {
            self.send_error(ErrorCode::AccessViolation, "Unexpected DATA - no upload in progress");
            return;
        };
        let Some(dir) = self.require_login_dir() else { return };

        let path = dir.join(&filename);
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(payload));
        if let Err(e) = written {
            warn!("append to {:?} failed: {}", path, e);
            self.send_error(ErrorCode::AccessViolation, "Write failed");
            return;
        }

        self.send_ack(block);

        if payload.len() < BLOCK_SIZE {
            // 마지막 블록: 업로드 완료
            self.session.finish_upload(self.id);
            self.transfer = Transfer::Idle;

            let user = self.session.username(self.id).unwrap_or_default();
            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            self.telemetry.file_add(&user, &filename, size);
            self.broadcast(true, &filename);
            info!("upload complete: {}/{} ({} bytes)", user, filename, size);
        }
    }

    fn handle_ack(&mut self, _block: u16) {
        match self.transfer {
            Transfer::SendingFile { .. } => self.send_next_file_block(),
            Transfer::SendingDir { .. } => self.send_next_dir_block(),
            // 전송 중이 아닌 ACK는 무시
            _ => {}
        }
    }

    fn handle_delrq(&mut self, filename: &str) {
        let Some(dir) = self.require_login_dir() else { return };
        if self.reject_if_busy() {
            return;
        }
        if validate_name(filename, self.config.max_name_len).is_err() {
            self.send_error(ErrorCode::AccessViolation, "Access violation - bad file name");
            return;
        }
        if self.session.is_uploading(filename) {
            self.send_error(ErrorCode::AccessViolation, "Access violation - file is uploading");
            return;
        }

        let path = dir.join(filename);
        if !path.is_file() {
            self.send_error(ErrorCode::FileNotFound, "File not found");
            return;
        }
        if let Err(e) = fs::remove_file(&path) {
            warn!("delete {:?} failed: {}", path, e);
            self.send_error(ErrorCode::AccessViolation, "Delete failed");
            return;
        }

        self.send_ack(0);
        let user = self.session.username(self.id).unwrap_or_default();
        self.telemetry.file_delete(&user, filename);
        self.broadcast(false, filename);
    }

    fn handle_disc(&mut self) {
        self.send_ack(0);
        self.terminate = true;
        self.transfer = Transfer::Idle;

        let user = self.session.release_connection(self.id);
        self.registry.disconnect(self.id);
        self.telemetry.disconnect(user.as_deref().unwrap_or(""));
        info!("connection {} disconnected", self.id);
    }

    // ─────────────────────────────────────────────────────────────────
    // 전송 스트리밍
    // ─────────────────────────────────────────────────────────────────

    /// RRQ 다음 블록 송신. 512 미만 블록이 마지막
    fn send_next_file_block(&mut self) {
        let transfer = std::mem::replace(&mut self.transfer, Transfer::Idle);
        let (mut file, filename, block) = match transfer {
            Transfer::SendingFile { file, filename, block } => (file, filename, block),
            other => {
                self.transfer = other;
                return;
            }
        };

        let mut buf = [0u8; BLOCK_SIZE];
        let n = match read_block(&mut file, &mut buf) {
            Ok(n) => n,
            Err(e) => {
                warn!("read {} failed: {}", filename, e);
                self.send_error(ErrorCode::AccessViolation, "Read failed");
                return;
            }
        };

        let block = block.wrapping_add(1);
        self.send_frame(&Frame::Data { block, payload: Bytes::copy_from_slice(&buf[..n]) });

        if n < BLOCK_SIZE {
            let user = self.session.username(self.id).unwrap_or_default();
            self.telemetry.file_access(&user, &filename);
        } else {
            // 아직 남았다. 다음 ACK에서 이어서
            self.transfer = Transfer::SendingFile { file, filename, block };
        }
    }

    /// DIRQ 다음 블록 송신: 파일명 + 0x00을 512바이트 한도까지 패킹
    fn send_next_dir_block(&mut self) {
        let transfer = std::mem::replace(&mut self.transfer, Transfer::Idle);
        let (names, mut cursor, block) = match transfer {
            Transfer::SendingDir { names, cursor, block } => (names, cursor, block),
            other => {
                self.transfer = other;
                return;
            }
        };

        let mut payload = Vec::with_capacity(BLOCK_SIZE);
        while cursor < names.len() {
            let name = names[cursor].as_bytes();
            if payload.len() + name.len() + 1 > BLOCK_SIZE {
                break;
            }
            payload.extend_from_slice(name);
            payload.push(0);
            cursor += 1;
        }

        let block = block.wrapping_add(1);
        let done = payload.len() < BLOCK_SIZE;
        self.send_frame(&Frame::Data { block, payload: Bytes::from(payload) });

        if !done {
            self.transfer = Transfer::SendingDir { names, cursor, block };
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // 헬퍼
    // ─────────────────────────────────────────────────────────────────

    /// 유저 샌드박스 디렉토리. 미로그인이면 ERROR(6)을 보내고 None
    fn require_login_dir(&mut self) -> Option<PathBuf> {
        let Some(user) = self.session.username(self.id) else {
            self.send_error(ErrorCode::NotLoggedIn, "Not logged in");
            return None;
        };
        let dir = self.config.base_dir.join(&user);
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!("user dir {:?} unavailable: {}", dir, e);
            self.send_error(ErrorCode::AccessViolation, "Access violation - user dir unavailable");
            return None;
        }
        Some(dir)
    }

    /// 전송이 진행 중이면 ERROR(2)를 보내고 true
    fn reject_if_busy(&mut self) -> bool {
        if matches!(self.transfer, Transfer::Idle) {
            return false;
        }
        self.send_error(ErrorCode::AccessViolation, "Transfer already in progress");
        true
    }

    /// 로그인된 모든 연결에 BCAST 송신
    fn broadcast(&self, added: bool, filename: &str) {
        let bytes = Frame::Bcast { added, filename: filename.to_string() }.to_bytes();
        for conn in self.session.logged_in_connections() {
            self.registry.send(conn, bytes.clone());
        }
        if added {
            self.telemetry.bcast_add(filename);
        } else {
            self.telemetry.bcast_del(filename);
        }
    }

    fn send_frame(&self, frame: &Frame) {
        if !self.registry.send(self.id, frame.to_bytes()) {
            debug!("connection {} gone, {:?} dropped", self.id, frame.opcode());
        }
    }

    fn send_ack(&self, block: u16) {
        self.send_frame(&Frame::Ack { block });
        if let Some(user) = self.session.username(self.id) {
            self.telemetry.ack(&user, block);
        }
    }

    fn send_error(&self, code: ErrorCode, message: &str) {
        self.send_frame(&Frame::Error { code, message: message.to_string() });
        let user = self.session.username(self.id).unwrap_or_default();
        self.telemetry.error(&user, code.code(), message);
    }
}

/// 유저명/파일명 검증
///
/// 비어 있지 않고, 길이 제한 내, 경로 구분자와 상위 디렉토리 참조 없음.
/// 검증을 통과한 이름은 join해도 샌드박스를 벗어날 수 없다
pub fn validate_name(name: &str, max_len: usize) -> Result<()> {
    let bad = name.is_empty()
        || name.len() > max_len
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(Error::InvalidName { name: name.to_string() });
    }
    Ok(())
}

/// 버퍼가 차거나 EOF까지 읽는다 (짧은 read가 블록 경계를 깨지 않도록)
fn read_block(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// BFTP 서버
///
/// 공유 상태(세션, 레지스트리, 텔레메트리)를 소유하고
/// accept되는 연결마다 엔진을 하나씩 돌린다
pub struct Server {
    config: Arc<Config>,
    session: Arc<SessionState>,
    registry: Arc<Registry>,
    telemetry: Arc<TelemetryClient>,
    next_id: AtomicU64,
}

impl Server {
    /// 새 서버 생성
    pub fn new(config: Config) -> Self {
        let telemetry = Arc::new(TelemetryClient::new(config.telemetry_addr));
        Self {
            config: Arc::new(config),
            session: Arc::new(SessionState::new()),
            registry: Arc::new(Registry::new()),
            telemetry,
            next_id: AtomicU64::new(1),
        }
    }

    /// accept 루프. 연결마다 reader/writer 태스크를 띄운다
    pub async fn serve(self: Arc<Self>, bind_addr: SocketAddr) -> Result<()> {
        fs::create_dir_all(&self.config.base_dir)?;
        let listener = TcpListener::bind(bind_addr).await?;
        info!("BFTP server listening on {}", bind_addr);

        loop {
            let (stream, peer) = listener.accept().await?;
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            info!("connection {} accepted from {}", id, peer);

            let server = self.clone();
            tokio::spawn(async move {
                server.run_connection(id, stream).await;
            });
        }
    }

    /// 연결 하나의 수명: reader 루프 + writer 태스크
    async fn run_connection(&self, id: ConnectionId, stream: TcpStream) {
        let (mut read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        self.registry.register(id, tx);

        // writer: 송신 큐를 순서대로 소켓에 기록. 큐가 닫히면
        // 남은 프레임을 모두 내보낸 뒤 write half 드랍 → FIN
        let writer = tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if write_half.write_all(&bytes).await.is_err() {
                    break;
                }
            }
        });

        let mut engine = Engine::new(
            id,
            self.config.clone(),
            self.session.clone(),
            self.registry.clone(),
            self.telemetry.clone(),
        );
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 4096];

        'read: loop {
            let n = match read_half.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!("connection {} read error: {}", id, e);
                    break;
                }
            };
            for &byte in &buf[..n] {
                match decoder.decode_next_byte(byte) {
                    Ok(Some(frame)) => engine.handle_frame(frame),
                    Ok(None) => {}
                    Err(e) => engine.handle_invalid(&e),
                }
                if engine.should_terminate() {
                    break 'read;
                }
            }
        }

        engine.teardown();
        let _ = writer.await;
        info!("connection {} closed", id);
    }
}
