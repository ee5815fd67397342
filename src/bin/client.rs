//! BFTP 클라이언트 - Block File Transfer Protocol
//!
//! 대화형 커맨드라인 클라이언트
//! - LOGRQ / DIRQ / RRQ / WRQ / DELRQ / DISC 커맨드 지원
//! - 서버 브로드캐스트(BCAST) 실시간 출력
//!
//! 사용법:
//!   cargo run --release --bin bftp-client -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin bftp-client -- --server 127.0.0.1:7777

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use bftp::{ClientEngine, FrameDecoder, DEFAULT_PORT};

/// 클라이언트 설정
struct ClientArgs {
    server_addr: SocketAddr,
}

impl Default for ClientArgs {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{}", DEFAULT_PORT).parse().unwrap(),
        }
    }
}

fn parse_args() -> ClientArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    config.server_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"BFTP Client - Block File Transfer Protocol 클라이언트

대화형 커맨드라인 클라이언트

사용법:
  cargo run --release --bin bftp-client -- [OPTIONS]

옵션:
  -s, --server <ADDR>     서버 주소 (기본: 127.0.0.1:{port})
  -h, --help              이 도움말 출력

커맨드:
  LOGRQ <username>        로그인
  DIRQ                    내 디렉토리 파일 목록
  RRQ <filename>          파일 다운로드
  WRQ <filename>          파일 업로드
  DELRQ <filename>        파일 삭제
  DISC                    연결 종료
"#,
                    port = DEFAULT_PORT,
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args();

    info!("Connecting to {}...", args.server_addr);
    let stream = TcpStream::connect(args.server_addr).await?;
    info!("Connected.");
    let (mut reader, mut writer) = stream.into_split();

    let mut engine = ClientEngine::new();
    let mut decoder = FrameDecoder::new();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut buf = [0u8; 4096];

    'session: loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                if let Some(frame) = engine.build_command(&line)? {
                    writer.write_all(&frame.to_bytes()).await?;
                }
            }
            n = reader.read(&mut buf) => {
                let n = n?;
                if n == 0 {
                    println!("Server closed the connection.");
                    break;
                }
                for &byte in &buf[..n] {
                    let frame = match decoder.decode_next_byte(byte) {
                        Ok(Some(frame)) => frame,
                        Ok(None) => continue,
                        Err(e) => {
                            println!("protocol error: {}", e);
                            continue;
                        }
                    };
                    let (replies, done) = engine.handle_frame(&frame)?;
                    for reply in replies {
                        writer.write_all(&reply.to_bytes()).await?;
                    }
                    if done {
                        break 'session;
                    }
                }
            }
        }
    }

    Ok(())
}
