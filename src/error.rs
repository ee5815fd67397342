//! 에러 타입 정의

use thiserror::Error;

/// BFTP 프로토콜 에러 타입
///
/// 디코드/파일 작업 실패는 연결을 끊지 않고 와이어 ERROR 프레임으로
/// 변환된다. 연결이 끊기는 건 전송 계층 에러나 DISC뿐이다
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("알 수 없는 opcode: {opcode}")]
    UnknownOpcode { opcode: u16 },

    #[error("DATA 페이로드 크기 초과: size={size}, max={max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("프레임 형식 오류: {0}")]
    MalformedFrame(&'static str),

    #[error("유효하지 않은 UTF-8 문자열")]
    InvalidUtf8,

    #[error("유효하지 않은 이름: {name}")]
    InvalidName { name: String },
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
