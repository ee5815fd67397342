//! 텔레메트리 클라이언트
//!
//! UDP 데이터그램으로 플랫 JSON 이벤트를 쏘는 fire-and-forget 채널.
//! 전송 실패는 조용히 버린다. 텔레메트리가 프로토콜 처리를
//! 막거나 실패시키는 일은 없어야 한다

use std::net::{SocketAddr, UdpSocket};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::debug;

/// 텔레메트리 이벤트 (플랫 JSON으로 직렬화)
///
/// `user`/`file`은 해당 없음이면 빈 문자열, 선택 필드는 생략
#[derive(Debug, Serialize)]
pub struct TelemetryEvent<'a> {
    /// epoch 밀리초
    pub ts: u64,
    /// 이벤트 타입
    pub event: &'a str,
    /// 유저명
    pub user: &'a str,
    /// 파일명
    pub file: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

/// UDP 텔레메트리 클라이언트
pub struct TelemetryClient {
    socket: Option<UdpSocket>,
    target: SocketAddr,
}

impl TelemetryClient {
    /// 새 클라이언트 생성
    ///
    /// 소켓 바인딩에 실패해도 에러 대신 전송만 생략하는
    /// 클라이언트를 만든다
    pub fn new(target: SocketAddr) -> Self {
        let socket = UdpSocket::bind("0.0.0.0:0").ok();
        if let Some(s) = &socket {
            let _ = s.set_nonblocking(true);
        }
        if socket.is_none() {
            debug!("telemetry socket bind failed, events will be dropped");
        }
        Self { socket, target }
    }

    /// 로그인 성공
    pub fn login(&self, user: &str) {
        self.emit(Self::base("LOGIN", user, ""));
    }

    /// 연결 종료
    pub fn disconnect(&self, user: &str) {
        self.emit(Self::base("DISC", user, ""));
    }

    /// 업로드 완료
    pub fn file_add(&self, user: &str, file: &str, size: u64) {
        let mut event = Self::base("FILE_ADD", user, file);
        event.msg = Some("WRQ complete");
        event.size = Some(size);
        self.emit(event);
    }

    /// 파일 삭제 완료
    pub fn file_delete(&self, user: &str, file: &str) {
        let mut event = Self::base("FILE_DELETE", user, file);
        event.msg = Some("DELRQ complete");
        self.emit(event);
    }

    /// 다운로드 완료
    pub fn file_access(&self, user: &str, file: &str) {
        let mut event = Self::base("FILE_ACCESS", user, file);
        event.msg = Some("RRQ complete");
        self.emit(event);
    }

    /// 서버가 보낸 ACK
    pub fn ack(&self, user: &str, block: u16) {
        let mut event = Self::base("ACK", user, "");
        event.block = Some(block);
        self.emit(event);
    }

    /// 서버가 보낸 ERROR
    pub fn error(&self, user: &str, code: u16, msg: &str) {
        let mut event = Self::base("ERROR", user, "");
        event.msg = Some(msg);
        event.code = Some(code);
        self.emit(event);
    }

    /// 파일 추가 브로드캐스트
    pub fn bcast_add(&self, file: &str) {
        self.emit(Self::base("BCAST_ADD", "", file));
    }

    /// 파일 삭제 브로드캐스트
    pub fn bcast_del(&self, file: &str) {
        self.emit(Self::base("BCAST_DEL", "", file));
    }

    fn base<'a>(event: &'a str, user: &'a str, file: &'a str) -> TelemetryEvent<'a> {
        TelemetryEvent {
            ts: now_millis(),
            event,
            user,
            file,
            msg: None,
            size: None,
            block: None,
            code: None,
        }
    }

    fn emit(&self, event: TelemetryEvent<'_>) {
        let Some(socket) = &self.socket else { return };
        match serde_json::to_vec(&event) {
            Ok(json) => {
                let _ = socket.send_to(&json, self.target);
            }
            Err(e) => debug!("telemetry serialize failed: {}", e),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
