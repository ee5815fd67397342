//! # BFTP (Block File Transfer Protocol)
//!
//! TCP 기반 블록 단위 파일 전송 프로토콜 (TFTP 유사)
//!
//! ## 핵심 특징
//! - **바이트 단위 디코딩**: 구분자 없는 스트림에서 opcode별 길이 규칙으로 프레임 조립
//! - **Stop-and-wait**: ACK/DATA 쌍으로만 흐름 제어, 파이프라이닝 없음
//! - **로그인 세션**: 유저명 중복 로그인 차단
//! - **샌드박스**: 유저별 디렉토리 밖 경로 접근 차단
//! - **브로드캐스트**: 파일 추가/삭제를 로그인된 전체 연결에 통지
//! - **텔레메트리**: UDP 플랫 JSON 이벤트 (fire-and-forget)

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod registry;
pub mod server;
pub mod session;
pub mod telemetry;

pub use client::ClientEngine;
pub use codec::FrameDecoder;
pub use config::Config;
pub use error::{Error, Result};
pub use frame::{ErrorCode, Frame, Opcode};
pub use registry::Registry;
pub use server::Server;
pub use session::SessionState;
pub use telemetry::TelemetryClient;

/// 연결 ID (프로세스 내 유일, accept 순서대로 증가)
pub type ConnectionId = u64;

/// DATA 블록 최대 페이로드 크기 (바이트)
///
/// 이보다 작은 블록이 전송 종료 신호다. 원본 길이가 512의 배수면
/// 길이 0짜리 마지막 블록을 하나 더 보낸다
pub const BLOCK_SIZE: usize = 512;

/// 기본 서버 포트
pub const DEFAULT_PORT: u16 = 7777;

/// 기본 텔레메트리 수신 주소 (UDP)
pub const DEFAULT_TELEMETRY_ADDR: &str = "127.0.0.1:9099";

/// 유저명/파일명 최대 길이 (UTF-8 바이트)
pub const MAX_NAME_LEN: usize = 255;
