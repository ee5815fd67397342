//! 클라이언트 엔진
//!
//! 입력 줄을 프레임으로 바꾸는 커맨드 파서와, 서버 프레임을 받아
//! 전송을 진행시키는 응답 핸들러. 소켓 없이 테스트할 수 있도록
//! 네트워크와는 분리되어 있다

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;

use bytes::Bytes;
use tracing::debug;

use crate::error::Result;
use crate::frame::Frame;
use crate::BLOCK_SIZE;

/// 진행 중인 클라이언트 측 전송
enum ClientMode {
    Idle,
    /// RRQ: 서버 DATA를 받아 로컬 파일에 기록 중
    Download { path: PathBuf, out: Option<File> },
    /// WRQ: ACK마다 다음 블록을 밀어올리는 중
    Upload { file: File, next_block: u16 },
    /// DIRQ: 파일명 목록 수신 중
    Listing,
}

/// 대화형 클라이언트의 프로토콜 상태
///
/// [`build_command`]가 사용자 입력을 프레임으로, [`handle_frame`]이
/// 서버 응답을 후속 프레임들로 바꾼다. 두 번째 반환값이 true면
/// 연결을 닫아야 한다
///
/// [`build_command`]: ClientEngine::build_command
/// [`handle_frame`]: ClientEngine::handle_frame
pub struct ClientEngine {
    mode: ClientMode,
    /// DISC를 보냈고 종료 ACK를 기다리는 중
    awaiting_disc_ack: bool,
    /// 마지막으로 요청에 쓴 파일명 (완료 메시지용)
    pending_name: Option<String>,
}

impl Default for ClientEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientEngine {
    pub fn new() -> Self {
        Self {
            mode: ClientMode::Idle,
            awaiting_disc_ack: false,
            pending_name: None,
        }
    }

    /// 입력 한 줄을 송신할 프레임으로 변환
    ///
    /// 로컬에서 걸러지는 경우(잘못된 커맨드, 파일 존재 여부)는
    /// 메시지를 출력하고 None을 돌려준다
    pub fn build_command(&mut self, line: &str) -> Result<Option<Frame>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (cmd, arg) = match line.split_once(' ') {
            Some((cmd, arg)) => (cmd, arg.trim()),
            None => (line, ""),
        };

        let frame = match cmd {
            "LOGRQ" => {
                if arg.is_empty() {
                    println!("LOGRQ <username>");
                    return Ok(None);
                }
                Frame::Logrq { username: arg.to_string() }
            }
            "RRQ" => {
                if arg.is_empty() {
                    println!("RRQ <filename>");
                    return Ok(None);
                }
                // 다운로드가 기존 파일을 덮어쓰지 않게 먼저 확인
                if PathBuf::from(arg).exists() {
                    println!("file already exists");
                    return Ok(None);
                }
                self.mode = ClientMode::Download { path: PathBuf::from(arg), out: None };
                self.pending_name = Some(arg.to_string());
                Frame::Rrq { filename: arg.to_string() }
            }
            "WRQ" => {
                if arg.is_empty() {
                    println!("WRQ <filename>");
                    return Ok(None);
                }
                let path = PathBuf::from(arg);
                if !path.is_file() {
                    println!("file does not exist");
                    return Ok(None);
                }
                let file = File::open(&path)?;
                self.mode = ClientMode::Upload { file, next_block: 1 };
                self.pending_name = Some(arg.to_string());
                Frame::Wrq { filename: arg.to_string() }
            }
            "DELRQ" => {
                if arg.is_empty() {
                    println!("DELRQ <filename>");
                    return Ok(None);
                }
                Frame::Delrq { filename: arg.to_string() }
            }
            "DIRQ" => {
                self.mode = ClientMode::Listing;
                Frame::Dirq
            }
            "DISC" => {
                self.awaiting_disc_ack = true;
                Frame::Disc
            }
            _ => {
                println!("unknown command: {}", cmd);
                return Ok(None);
            }
        };
        Ok(Some(frame))
    }

    /// 서버 프레임 처리. (후속 송신 프레임들, 연결 종료 여부) 반환
    pub fn handle_frame(&mut self, frame: &Frame) -> Result<(Vec<Frame>, bool)> {
        match frame {
            Frame::Ack { block } => {
                println!("ACK {}", block);
                if self.awaiting_disc_ack {
                    println!("Disconnected.");
                    return Ok((Vec::new(), true));
                }
                self.handle_ack(*block)
            }
            Frame::Data { block, payload } => self.handle_data(*block, payload),
            Frame::Error { code, message } => {
                println!("Error {} {}", code.code(), message);
                // 진행 중이던 전송은 포기
                self.reset_mode();
                self.awaiting_disc_ack = false;
                Ok((Vec::new(), false))
            }
            Frame::Bcast { added, filename } => {
                println!("BCAST {} {}", if *added { "add" } else { "del" }, filename);
                Ok((Vec::new(), false))
            }
            other => {
                debug!("unexpected frame from server: {:?}", other.opcode());
                Ok((Vec::new(), false))
            }
        }
    }

    fn handle_ack(&mut self, _block: u16) -> Result<(Vec<Frame>, bool)> {
        if !matches!(self.mode, ClientMode::Upload { .. }) {
            return Ok((Vec::new(), false));
        }
        match self.next_upload_block()? {
            Some(frame) => Ok((vec![frame], false)),
            None => Ok((Vec::new(), false)),
        }
    }

    fn handle_data(&mut self, block: u16, payload: &[u8]) -> Result<(Vec<Frame>, bool)> {
        let last = payload.len() < BLOCK_SIZE;
        match std::mem::replace(&mut self.mode, ClientMode::Idle) {
            ClientMode::Download { path, out } => {
                let mut file = match out {
                    Some(file) => file,
                    None => File::create(&path)?,
                };
                file.write_all(payload)?;
                if last {
                    if let Some(name) = self.pending_name.take() {
                        println!("RRQ {} complete", name);
                    }
                    println!("File download complete.");
                } else {
                    self.mode = ClientMode::Download { path, out: Some(file) };
                }
            }
            ClientMode::Listing => {
                for name in payload.split(|b| *b == 0).filter(|s| !s.is_empty()) {
                    println!("{}", String::from_utf8_lossy(name));
                }
                if last {
                    println!("End of directory listing.");
                } else {
                    self.mode = ClientMode::Listing;
                }
            }
            other => {
                debug!("DATA without a transfer in progress, ignored");
                self.mode = other;
                return Ok((Vec::new(), false));
            }
        }
        // 블록 수신 확인
        Ok((vec![Frame::Ack { block }], false))
    }

    /// 업로드 다음 블록. 512 미만 블록을 보낸 뒤에는 None
    fn next_upload_block(&mut self) -> Result<Option<Frame>> {
        let ClientMode::Upload { file, next_block } = &mut self.mode else {
            return Ok(None);
        };

        let mut buf = [0u8; BLOCK_SIZE];
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        let block = *next_block;
        *next_block = next_block.wrapping_add(1);
        let frame = Frame::Data { block, payload: Bytes::copy_from_slice(&buf[..filled]) };

        if filled < BLOCK_SIZE {
            // 마지막 블록을 내보내면 업로드 종료
            self.mode = ClientMode::Idle;
            if let Some(name) = self.pending_name.take() {
                println!("WRQ {} complete", name);
            }
            println!("File upload complete.");
        }
        Ok(Some(frame))
    }

    fn reset_mode(&mut self) {
        if let ClientMode::Download { path, out } = &self.mode {
            // 실패한 다운로드의 부분 파일은 남기지 않는다
            if out.is_some() {
                let _ = std::fs::remove_file(path);
            }
        }
        self.mode = ClientMode::Idle;
        self.pending_name = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ErrorCode;
    use std::fs;

    #[test]
    fn test_build_logrq() {
        let mut engine = ClientEngine::new();
        let frame = engine.build_command("LOGRQ alice").unwrap();
        assert_eq!(frame, Some(Frame::Logrq { username: "alice".into() }));
    }

    #[test]
    fn test_build_command_rejects_unknown_and_empty() {
        let mut engine = ClientEngine::new();
        assert_eq!(engine.build_command("").unwrap(), None);
        assert_eq!(engine.build_command("   ").unwrap(), None);
        assert_eq!(engine.build_command("FETCH f.txt").unwrap(), None);
        assert_eq!(engine.build_command("LOGRQ").unwrap(), None);
    }

    #[test]
    fn test_rrq_refuses_existing_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("have.txt");
        fs::write(&path, b"x").unwrap();

        let mut engine = ClientEngine::new();
        let cmd = format!("RRQ {}", path.display());
        assert_eq!(engine.build_command(&cmd).unwrap(), None);
    }

    #[test]
    fn test_wrq_requires_existing_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.txt");

        let mut engine = ClientEngine::new();
        let cmd = format!("WRQ {}", missing.display());
        assert_eq!(engine.build_command(&cmd).unwrap(), None);
    }

    #[test]
    fn test_upload_flow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("up.bin");
        fs::write(&path, vec![5u8; 600]).unwrap();

        let mut engine = ClientEngine::new();
        let frame = engine.build_command(&format!("WRQ {}", path.display())).unwrap();
        assert!(matches!(frame, Some(Frame::Wrq { .. })));

        // 서버 ACK(0) → 블록 1 (512바이트)
        let (out, done) = engine.handle_frame(&Frame::Ack { block: 0 }).unwrap();
        assert!(!done);
        assert!(matches!(&out[..], [Frame::Data { block: 1, payload }] if payload.len() == 512));

        // ACK(1) → 마지막 블록 2 (88바이트)
        let (out, done) = engine.handle_frame(&Frame::Ack { block: 1 }).unwrap();
        assert!(!done);
        assert!(matches!(&out[..], [Frame::Data { block: 2, payload }] if payload.len() == 88));

        // 이후 ACK에는 더 보낼 것이 없다
        let (out, done) = engine.handle_frame(&Frame::Ack { block: 2 }).unwrap();
        assert!(!done);
        assert!(out.is_empty());
    }

    #[test]
    fn test_download_flow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("down.bin");

        let mut engine = ClientEngine::new();
        let frame = engine.build_command(&format!("RRQ {}", path.display())).unwrap();
        assert!(matches!(frame, Some(Frame::Rrq { .. })));

        let (out, done) = engine
            .handle_frame(&Frame::Data { block: 1, payload: Bytes::from(vec![3u8; 512]) })
            .unwrap();
        assert!(!done);
        assert_eq!(out, vec![Frame::Ack { block: 1 }]);

        let (out, done) = engine
            .handle_frame(&Frame::Data { block: 2, payload: Bytes::from(vec![4u8; 10]) })
            .unwrap();
        assert!(!done);
        assert_eq!(out, vec![Frame::Ack { block: 2 }]);

        let content = fs::read(&path).unwrap();
        assert_eq!(content.len(), 522);
        assert_eq!(&content[..512], &[3u8; 512][..]);
    }

    #[test]
    fn test_download_error_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.bin");

        let mut engine = ClientEngine::new();
        engine.build_command(&format!("RRQ {}", path.display())).unwrap();
        engine
            .handle_frame(&Frame::Data { block: 1, payload: Bytes::from(vec![1u8; 512]) })
            .unwrap();
        assert!(path.exists());

        let (out, done) = engine
            .handle_frame(&Frame::Error {
                code: ErrorCode::AccessViolation,
                message: "Read failed".into(),
            })
            .unwrap();
        assert!(!done);
        assert!(out.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_listing_acks_each_block() {
        let mut engine = ClientEngine::new();
        assert_eq!(engine.build_command("DIRQ").unwrap(), Some(Frame::Dirq));

        let (out, done) = engine
            .handle_frame(&Frame::Data { block: 1, payload: Bytes::from_static(b"a.txt\0b.txt\0") })
            .unwrap();
        assert!(!done);
        assert_eq!(out, vec![Frame::Ack { block: 1 }]);
    }

    #[test]
    fn test_disc_ack_terminates() {
        let mut engine = ClientEngine::new();
        assert_eq!(engine.build_command("DISC").unwrap(), Some(Frame::Disc));

        let (out, done) = engine.handle_frame(&Frame::Ack { block: 0 }).unwrap();
        assert!(done);
        assert!(out.is_empty());
    }

    #[test]
    fn test_bcast_does_not_disturb_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("up2.bin");
        fs::write(&path, b"short").unwrap();

        let mut engine = ClientEngine::new();
        engine.build_command(&format!("WRQ {}", path.display())).unwrap();

        let (out, done) = engine
            .handle_frame(&Frame::Bcast { added: true, filename: "other.txt".into() })
            .unwrap();
        assert!(!done);
        assert!(out.is_empty());

        // 업로드는 그대로 진행된다
        let (out, _) = engine.handle_frame(&Frame::Ack { block: 0 }).unwrap();
        assert!(matches!(&out[..], [Frame::Data { block: 1, payload }] if payload.len() == 5));
    }
}
