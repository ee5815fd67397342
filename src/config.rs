//! 프로토콜 설정

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::{DEFAULT_TELEMETRY_ADDR, MAX_NAME_LEN};

/// BFTP 서버 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 파일 저장 루트 디렉토리
    ///
    /// 유저마다 `<base_dir>/<username>/` 하위 디렉토리가 만들어지고
    /// 모든 파일 작업은 그 아래로만 해석된다
    pub base_dir: PathBuf,

    /// 텔레메트리 수신 주소 (UDP)
    pub telemetry_addr: SocketAddr,

    /// 유저명/파일명 최대 길이 (UTF-8 바이트)
    pub max_name_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("files"),
            telemetry_addr: DEFAULT_TELEMETRY_ADDR.parse().unwrap(),
            max_name_len: MAX_NAME_LEN,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }
}
