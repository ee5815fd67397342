//! 증분 프레임 디코더
//!
//! 바이트를 하나씩 받아 프레임이 닫히는 순간 반환한다.
//! opcode마다 길이 규칙이 달라서 태그된 상태 enum으로 추적:
//! - opcode 2바이트 대기
//! - 고정 길이 구간 대기 (ACK 블록, ERROR 코드, DATA 헤더, BCAST 플래그)
//! - 0x00 종단 바이트 대기 (문자열 프레임)
//! - 페이로드 대기 (DATA size 바이트)

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::BLOCK_SIZE;

/// 고정 길이 구간 수신 후 다음 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextStep {
    /// 프레임 완성 (ACK)
    Complete,
    /// 널 종단 문자열이 이어짐 (ERROR 메시지, BCAST 파일명)
    Terminator,
    /// DATA 헤더의 size로 페이로드 길이 결정
    DataPayload,
}

/// 디코더 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// opcode 2바이트 대기
    Opcode,
    /// 고정 길이 구간 대기
    FixedSuffix { need: usize, then: NextStep },
    /// 0x00 종단 바이트 대기
    Terminator,
    /// DATA 페이로드 대기
    Payload { need: usize },
}

/// 증분 프레임 디코더
///
/// 연결마다 하나씩 생성. 프레임이 완성되면 상태가 opcode 대기로
/// 초기화되므로 간격 없는 연속 프레임도 손실 없이 처리한다
pub struct FrameDecoder {
    buf: Vec<u8>,
    state: DecodeState,
}

impl FrameDecoder {
    /// 새 디코더 생성
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(BLOCK_SIZE + 6),
            state: DecodeState::Opcode,
        }
    }

    /// 바이트 하나를 공급. 프레임이 닫히면 파싱해서 반환
    ///
    /// 에러를 반환한 경우에도 상태는 초기화되어 다음 프레임을
    /// 계속 받을 수 있다 (연결은 호출측이 유지)
    pub fn decode_next_byte(&mut self, byte: u8) -> Result<Option<Frame>> {
        self.buf.push(byte);

        match self.state {
            DecodeState::Opcode => {
                if self.buf.len() < 2 {
                    return Ok(None);
                }
                let opcode = u16::from_be_bytes([self.buf[0], self.buf[1]]);
                match opcode {
                    // <문자열>\0
                    1 | 2 | 7 | 8 => self.state = DecodeState::Terminator,
                    // opcode만으로 완성
                    6 | 10 => return self.complete(),
                    // block(2)
                    4 => self.state = DecodeState::FixedSuffix { need: 2, then: NextStep::Complete },
                    // code(2) + 메시지\0
                    5 => self.state = DecodeState::FixedSuffix { need: 2, then: NextStep::Terminator },
                    // size(2) + block(2) + 페이로드
                    3 => self.state = DecodeState::FixedSuffix { need: 4, then: NextStep::DataPayload },
                    // flag(1) + 파일명\0
                    9 => self.state = DecodeState::FixedSuffix { need: 1, then: NextStep::Terminator },
                    // 모르는 opcode도 널 종단까지 소비해서 스트림 동기화 유지
                    _ => self.state = DecodeState::Terminator,
                }
                Ok(None)
            }
            DecodeState::Terminator => {
                if byte == 0 {
                    self.complete()
                } else {
                    Ok(None)
                }
            }
            DecodeState::FixedSuffix { need, then } => {
                let need = need - 1;
                if need > 0 {
                    self.state = DecodeState::FixedSuffix { need, then };
                    return Ok(None);
                }
                match then {
                    NextStep::Complete => self.complete(),
                    NextStep::Terminator => {
                        self.state = DecodeState::Terminator;
                        Ok(None)
                    }
                    NextStep::DataPayload => {
                        let size = u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize;
                        if size > BLOCK_SIZE {
                            self.reset();
                            return Err(Error::PayloadTooLarge { size, max: BLOCK_SIZE });
                        }
                        if size == 0 {
                            // 빈 마지막 블록: 헤더 4바이트만으로 완성
                            self.complete()
                        } else {
                            self.state = DecodeState::Payload { need: size };
                            Ok(None)
                        }
                    }
                }
            }
            DecodeState::Payload { need } => {
                let need = need - 1;
                if need == 0 {
                    self.complete()
                } else {
                    self.state = DecodeState::Payload { need };
                    Ok(None)
                }
            }
        }
    }

    /// 인코딩은 패스스루: 송신측이 와이어 바이트를 직접 만든다
    pub fn encode(&self, frame: &Frame) -> Vec<u8> {
        frame.to_bytes()
    }

    /// 완성된 프레임을 파싱하고 opcode 대기 상태로 복귀
    fn complete(&mut self) -> Result<Option<Frame>> {
        let raw = std::mem::take(&mut self.buf);
        self.state = DecodeState::Opcode;
        Frame::parse(&raw).map(Some)
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.state = DecodeState::Opcode;
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ErrorCode;
    use bytes::Bytes;

    /// 바이트를 하나씩 먹여서 나온 프레임들을 모은다
    fn feed_all(dec: &mut FrameDecoder, bytes: &[u8]) -> Vec<Result<Frame>> {
        let mut out = Vec::new();
        for &b in bytes {
            match dec.decode_next_byte(b) {
                Ok(Some(frame)) => out.push(Ok(frame)),
                Ok(None) => {}
                Err(e) => out.push(Err(e)),
            }
        }
        out
    }

    #[test]
    fn test_chunking_independence() {
        // 한 바이트씩 넣어도 한 번에 파싱한 결과와 같아야 한다
        let frames = [
            Frame::Logrq { username: "alice".into() },
            Frame::Rrq { filename: "a.txt".into() },
            Frame::Data { block: 1, payload: Bytes::from(vec![9u8; 100]) },
            Frame::Ack { block: 1 },
            Frame::Error { code: ErrorCode::FileNotFound, message: "File not found".into() },
            Frame::Bcast { added: true, filename: "a.txt".into() },
            Frame::Dirq,
            Frame::Disc,
        ];
        for frame in frames {
            let bytes = frame.to_bytes();
            let mut dec = FrameDecoder::new();
            let got = feed_all(&mut dec, &bytes);
            assert_eq!(got.len(), 1, "exactly one frame for {:?}", frame);
            assert_eq!(*got[0].as_ref().unwrap(), frame);
            assert_eq!(*got[0].as_ref().unwrap(), Frame::parse(&bytes).unwrap());
        }
    }

    #[test]
    fn test_back_to_back_frames() {
        let a = Frame::Logrq { username: "alice".into() };
        let b = Frame::Wrq { filename: "f.bin".into() };
        let c = Frame::Ack { block: 3 };
        let mut stream = a.to_bytes();
        stream.extend(b.to_bytes());
        stream.extend(c.to_bytes());

        let mut dec = FrameDecoder::new();
        let got = feed_all(&mut dec, &stream);
        assert_eq!(got.len(), 3);
        assert_eq!(*got[0].as_ref().unwrap(), a);
        assert_eq!(*got[1].as_ref().unwrap(), b);
        assert_eq!(*got[2].as_ref().unwrap(), c);
    }

    #[test]
    fn test_zero_length_data_completes() {
        // size=0인 DATA는 6바이트 헤더만으로 완성되어야 한다
        let mut dec = FrameDecoder::new();
        let got = feed_all(&mut dec, &[0, 3, 0, 0, 0, 5]);
        assert_eq!(got.len(), 1);
        assert_eq!(
            *got[0].as_ref().unwrap(),
            Frame::Data { block: 5, payload: Bytes::new() }
        );
    }

    #[test]
    fn test_full_block_data() {
        let frame = Frame::Data { block: 2, payload: Bytes::from(vec![0x5Au8; 512]) };
        let mut dec = FrameDecoder::new();
        let got = feed_all(&mut dec, &frame.to_bytes());
        assert_eq!(got.len(), 1);
        assert_eq!(*got[0].as_ref().unwrap(), frame);
    }

    #[test]
    fn test_unknown_opcode_resyncs_on_terminator() {
        // 모르는 opcode는 널 종단까지 소비한 뒤 에러로 보고하고,
        // 그다음 프레임은 정상 디코딩되어야 한다
        let mut dec = FrameDecoder::new();
        let mut stream = vec![0, 99, b'j', b'u', b'n', b'k', 0];
        stream.extend(Frame::Ack { block: 1 }.to_bytes());

        let got = feed_all(&mut dec, &stream);
        assert_eq!(got.len(), 2);
        assert!(matches!(got[0], Err(Error::UnknownOpcode { opcode: 99 })));
        assert_eq!(*got[1].as_ref().unwrap(), Frame::Ack { block: 1 });
    }

    #[test]
    fn test_oversize_data_rejected_then_recovers() {
        let mut dec = FrameDecoder::new();
        // size=513은 DATA 헤더가 닫히는 순간 거부
        let mut stream = vec![0, 3, 2, 1, 0, 1];
        stream.extend(Frame::Disc.to_bytes());

        let got = feed_all(&mut dec, &stream);
        assert_eq!(got.len(), 2);
        assert!(matches!(got[0], Err(Error::PayloadTooLarge { size: 513, .. })));
        assert_eq!(*got[1].as_ref().unwrap(), Frame::Disc);
    }

    #[test]
    fn test_empty_string_frame() {
        // LOGRQ에 유저명이 비어 있어도 프레임 자체는 완성된다 (검증은 엔진 몫)
        let mut dec = FrameDecoder::new();
        let got = feed_all(&mut dec, &[0, 7, 0]);
        assert_eq!(got.len(), 1);
        assert_eq!(*got[0].as_ref().unwrap(), Frame::Logrq { username: String::new() });
    }

    #[test]
    fn test_encode_is_passthrough() {
        let dec = FrameDecoder::new();
        let frame = Frame::Ack { block: 9 };
        assert_eq!(dec.encode(&frame), frame.to_bytes());
    }
}
