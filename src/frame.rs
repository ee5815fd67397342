//! 프로토콜 프레임 정의
//!
//! 모든 멀티바이트 값은 big-endian. opcode에 따라 프레임 형태가 다름:
//! - opcode만 (DIRQ, DISC)
//! - opcode + 고정 길이 (ACK)
//! - opcode + 널 종단 문자열 (RRQ, WRQ, LOGRQ, DELRQ)
//! - opcode + 고정 접두 + 널 종단 문자열 (ERROR, BCAST)
//! - opcode + size(2) + block(2) + size 바이트 페이로드 (DATA)

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::BLOCK_SIZE;

/// 프레임 opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    /// 파일 다운로드 요청
    Rrq = 1,
    /// 파일 업로드 요청
    Wrq = 2,
    /// 데이터 블록
    Data = 3,
    /// 블록 확인 응답
    Ack = 4,
    /// 프로토콜 에러
    Error = 5,
    /// 디렉토리 목록 요청
    Dirq = 6,
    /// 로그인 요청
    Logrq = 7,
    /// 파일 삭제 요청
    Delrq = 8,
    /// 파일 추가/삭제 통지
    Bcast = 9,
    /// 연결 종료 요청
    Disc = 10,
}

impl Opcode {
    /// 와이어 값에서 opcode 변환
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(Self::Rrq),
            2 => Some(Self::Wrq),
            3 => Some(Self::Data),
            4 => Some(Self::Ack),
            5 => Some(Self::Error),
            6 => Some(Self::Dirq),
            7 => Some(Self::Logrq),
            8 => Some(Self::Delrq),
            9 => Some(Self::Bcast),
            10 => Some(Self::Disc),
            _ => None,
        }
    }
}

/// ERROR 프레임 에러 코드 (16비트)
///
/// 프로토콜 수준의 복구 가능한 에러 분류. ERROR를 보낸 뒤에도
/// 연결은 유지되고 Idle로 돌아간다
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// 0: 잘못된/누락된 인자
    NotDefined,
    /// 1: 파일 없음
    FileNotFound,
    /// 2: 접근 위반 / IO 실패 / 프로토콜 위반
    AccessViolation,
    /// 4: 알 수 없는 opcode
    IllegalOperation,
    /// 5: WRQ 파일명 충돌
    FileExists,
    /// 6: 로그인 필요
    NotLoggedIn,
    /// 7: 중복 로그인
    AlreadyLoggedIn,
    /// 와이어에서 수신한 미정의 코드
    Other(u16),
}

impl ErrorCode {
    /// 와이어 값
    pub fn code(&self) -> u16 {
        match self {
            Self::NotDefined => 0,
            Self::FileNotFound => 1,
            Self::AccessViolation => 2,
            Self::IllegalOperation => 4,
            Self::FileExists => 5,
            Self::NotLoggedIn => 6,
            Self::AlreadyLoggedIn => 7,
            Self::Other(v) => *v,
        }
    }

    /// 와이어 값에서 변환
    pub fn from_u16(v: u16) -> Self {
        match v {
            0 => Self::NotDefined,
            1 => Self::FileNotFound,
            2 => Self::AccessViolation,
            4 => Self::IllegalOperation,
            5 => Self::FileExists,
            6 => Self::NotLoggedIn,
            7 => Self::AlreadyLoggedIn,
            other => Self::Other(other),
        }
    }
}

/// 디코딩된 프로토콜 프레임
///
/// 코덱에서 완성되는 순간 소유권이 엔진으로 넘어가고 이후 불변
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// 파일 다운로드 요청
    Rrq { filename: String },
    /// 파일 업로드 요청
    Wrq { filename: String },
    /// 데이터 블록 (페이로드 512 미만이면 마지막 블록)
    Data { block: u16, payload: Bytes },
    /// 블록 확인 응답
    Ack { block: u16 },
    /// 프로토콜 에러
    Error { code: ErrorCode, message: String },
    /// 디렉토리 목록 요청
    Dirq,
    /// 로그인 요청
    Logrq { username: String },
    /// 파일 삭제 요청
    Delrq { filename: String },
    /// 파일 추가(flag=1)/삭제(flag=0) 통지, 서버 → 로그인된 전체 연결
    Bcast { added: bool, filename: String },
    /// 연결 종료 요청
    Disc,
}

impl Frame {
    /// 이 프레임의 opcode
    pub fn opcode(&self) -> Opcode {
        match self {
            Frame::Rrq { .. } => Opcode::Rrq,
            Frame::Wrq { .. } => Opcode::Wrq,
            Frame::Data { .. } => Opcode::Data,
            Frame::Ack { .. } => Opcode::Ack,
            Frame::Error { .. } => Opcode::Error,
            Frame::Dirq => Opcode::Dirq,
            Frame::Logrq { .. } => Opcode::Logrq,
            Frame::Delrq { .. } => Opcode::Delrq,
            Frame::Bcast { .. } => Opcode::Bcast,
            Frame::Disc => Opcode::Disc,
        }
    }

    /// 프레임을 와이어 바이트로 직렬화
    pub fn to_bytes(&self) -> Vec<u8> {
        let op = (self.opcode() as u16).to_be_bytes();
        match self {
            Frame::Rrq { filename }
            | Frame::Wrq { filename }
            | Frame::Delrq { filename } => zstring_frame(op, filename),
            Frame::Logrq { username } => zstring_frame(op, username),
            Frame::Data { block, payload } => {
                let mut buf = Vec::with_capacity(6 + payload.len());
                buf.extend_from_slice(&op);
                buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
                buf.extend_from_slice(&block.to_be_bytes());
                buf.extend_from_slice(payload);
                buf
            }
            Frame::Ack { block } => {
                let mut buf = Vec::with_capacity(4);
                buf.extend_from_slice(&op);
                buf.extend_from_slice(&block.to_be_bytes());
                buf
            }
            Frame::Error { code, message } => {
                let mut buf = Vec::with_capacity(5 + message.len());
                buf.extend_from_slice(&op);
                buf.extend_from_slice(&code.code().to_be_bytes());
                buf.extend_from_slice(message.as_bytes());
                buf.push(0);
                buf
            }
            Frame::Bcast { added, filename } => {
                let mut buf = Vec::with_capacity(4 + filename.len());
                buf.extend_from_slice(&op);
                buf.push(u8::from(*added));
                buf.extend_from_slice(filename.as_bytes());
                buf.push(0);
                buf
            }
            Frame::Dirq | Frame::Disc => op.to_vec(),
        }
    }

    /// 완성된 프레임 바이트에서 파싱
    ///
    /// 프레임 경계는 코덱이 보장하므로 여기서는 형식 검증만 한다
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < 2 {
            return Err(Error::MalformedFrame("frame shorter than opcode"));
        }
        let op = u16::from_be_bytes([raw[0], raw[1]]);
        let opcode = Opcode::from_u16(op).ok_or(Error::UnknownOpcode { opcode: op })?;

        match opcode {
            Opcode::Rrq => Ok(Frame::Rrq { filename: read_zstring(raw, 2)? }),
            Opcode::Wrq => Ok(Frame::Wrq { filename: read_zstring(raw, 2)? }),
            Opcode::Logrq => Ok(Frame::Logrq { username: read_zstring(raw, 2)? }),
            Opcode::Delrq => Ok(Frame::Delrq { filename: read_zstring(raw, 2)? }),
            Opcode::Dirq => Ok(Frame::Dirq),
            Opcode::Disc => Ok(Frame::Disc),
            Opcode::Ack => {
                if raw.len() != 4 {
                    return Err(Error::MalformedFrame("bad ACK length"));
                }
                Ok(Frame::Ack { block: u16::from_be_bytes([raw[2], raw[3]]) })
            }
            Opcode::Error => {
                if raw.len() < 5 {
                    return Err(Error::MalformedFrame("bad ERROR length"));
                }
                let code = ErrorCode::from_u16(u16::from_be_bytes([raw[2], raw[3]]));
                Ok(Frame::Error { code, message: read_zstring(raw, 4)? })
            }
            Opcode::Data => {
                if raw.len() < 6 {
                    return Err(Error::MalformedFrame("bad DATA length"));
                }
                let size = u16::from_be_bytes([raw[2], raw[3]]) as usize;
                if size > BLOCK_SIZE {
                    return Err(Error::PayloadTooLarge { size, max: BLOCK_SIZE });
                }
                if raw.len() != 6 + size {
                    return Err(Error::MalformedFrame("DATA size/payload mismatch"));
                }
                Ok(Frame::Data {
                    block: u16::from_be_bytes([raw[4], raw[5]]),
                    payload: Bytes::copy_from_slice(&raw[6..]),
                })
            }
            Opcode::Bcast => {
                if raw.len() < 4 {
                    return Err(Error::MalformedFrame("bad BCAST length"));
                }
                Ok(Frame::Bcast { added: raw[2] != 0, filename: read_zstring(raw, 3)? })
            }
        }
    }
}

/// opcode + 문자열 + 0x00 형태 프레임 조립
fn zstring_frame(op: [u8; 2], s: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(3 + s.len());
    buf.extend_from_slice(&op);
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    buf
}

/// `from`부터 마지막 널 종단 직전까지를 UTF-8 문자열로 읽는다
fn read_zstring(raw: &[u8], from: usize) -> Result<String> {
    if raw.len() <= from || raw[raw.len() - 1] != 0 {
        return Err(Error::MalformedFrame("missing terminator"));
    }
    String::from_utf8(raw[from..raw.len() - 1].to_vec()).map_err(|_| Error::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zstring_frames_round_trip() {
        for frame in [
            Frame::Rrq { filename: "notes.txt".into() },
            Frame::Wrq { filename: "photo.png".into() },
            Frame::Logrq { username: "alice".into() },
            Frame::Delrq { filename: "old.bin".into() },
        ] {
            let bytes = frame.to_bytes();
            assert_eq!(bytes[bytes.len() - 1], 0);
            assert_eq!(Frame::parse(&bytes).unwrap(), frame);
        }
    }

    #[test]
    fn test_data_round_trip() {
        let frame = Frame::Data { block: 7, payload: Bytes::from(vec![1u8, 2, 3, 4, 5]) };
        let bytes = frame.to_bytes();
        assert_eq!(&bytes[..6], &[0, 3, 0, 5, 0, 7]);
        assert_eq!(Frame::parse(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_empty_data_block() {
        let frame = Frame::Data { block: 3, payload: Bytes::new() };
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), 6);
        assert_eq!(Frame::parse(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_ack_and_bare_frames() {
        assert_eq!(Frame::Ack { block: 0 }.to_bytes(), vec![0, 4, 0, 0]);
        assert_eq!(Frame::parse(&[0, 4, 1, 2]).unwrap(), Frame::Ack { block: 258 });
        assert_eq!(Frame::parse(&[0, 6]).unwrap(), Frame::Dirq);
        assert_eq!(Frame::parse(&[0, 10]).unwrap(), Frame::Disc);
    }

    #[test]
    fn test_error_frame() {
        let frame = Frame::Error {
            code: ErrorCode::AlreadyLoggedIn,
            message: "User already logged in".into(),
        };
        let bytes = frame.to_bytes();
        assert_eq!(&bytes[..4], &[0, 5, 0, 7]);
        assert_eq!(Frame::parse(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_bcast_flag() {
        let add = Frame::Bcast { added: true, filename: "f.txt".into() };
        let del = Frame::Bcast { added: false, filename: "f.txt".into() };
        assert_eq!(add.to_bytes()[2], 1);
        assert_eq!(del.to_bytes()[2], 0);
        assert_eq!(Frame::parse(&add.to_bytes()).unwrap(), add);
        assert_eq!(Frame::parse(&del.to_bytes()).unwrap(), del);
    }

    #[test]
    fn test_error_code_mapping() {
        for code in 0u16..8 {
            if code == 3 {
                assert_eq!(ErrorCode::from_u16(3), ErrorCode::Other(3));
                continue;
            }
            assert_eq!(ErrorCode::from_u16(code).code(), code);
        }
        assert_eq!(ErrorCode::Other(42).code(), 42);
    }

    #[test]
    fn test_unknown_opcode() {
        assert!(matches!(
            Frame::parse(&[0, 99, b'x', 0]),
            Err(Error::UnknownOpcode { opcode: 99 })
        ));
    }

    #[test]
    fn test_oversize_data_rejected() {
        let mut bytes = vec![0, 3, 2, 1, 0, 1];
        bytes.resize(6 + 513, 0xAB);
        assert!(matches!(Frame::parse(&bytes), Err(Error::PayloadTooLarge { size: 513, .. })));
    }
}
