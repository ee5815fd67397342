//! BFTP 서버 - Block File Transfer Protocol
//!
//! TFTP 스타일 블록 전송 파일 서버
//! - 로그인 / 유저별 샌드박스 디렉토리
//! - 512바이트 블록 업로드·다운로드, 파일 추가/삭제 브로드캐스트
//! - UDP JSON 텔레메트리 (best-effort)
//!
//! 사용법:
//!   cargo run --release --bin bftp-server -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin bftp-server -- --bind 0.0.0.0:7777 --base files

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use bftp::{Config, Server, DEFAULT_PORT, DEFAULT_TELEMETRY_ADDR};

/// 서버 설정
struct ServerArgs {
    bind_addr: SocketAddr,
    config: Config,
}

impl Default for ServerArgs {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_PORT).parse().unwrap(),
            config: Config::default(),
        }
    }
}

fn parse_args() -> ServerArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--base" | "-d" => {
                if i + 1 < args.len() {
                    config.config.base_dir = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--telemetry" => {
                if i + 1 < args.len() {
                    config.config.telemetry_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"BFTP Server - Block File Transfer Protocol 서버

TFTP 스타일 블록 전송 파일 서버
- 로그인 / 유저별 샌드박스 디렉토리
- 파일 추가·삭제 브로드캐스트 + UDP JSON 텔레메트리

사용법:
  cargo run --release --bin bftp-server -- [OPTIONS]

옵션:
  -b, --bind <ADDR>       바인드 주소 (기본: 0.0.0.0:{port})
  -d, --base <DIR>        파일 저장 루트 디렉토리 (기본: files)
  --telemetry <ADDR>      텔레메트리 UDP 수신 주소 (기본: {telemetry})
  -h, --help              이 도움말 출력

예시:
  cargo run --release --bin bftp-server -- -b 0.0.0.0:7777 -d /srv/bftp
"#,
                    port = DEFAULT_PORT,
                    telemetry = DEFAULT_TELEMETRY_ADDR,
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

    info!("BFTP Server starting...");
    info!("Bind address: {}", args.bind_addr);
    info!("Base directory: {:?}", args.config.base_dir);
    info!("Telemetry target: {}", args.config.telemetry_addr);

    let server = Arc::new(Server::new(args.config));
    server.serve(args.bind_addr).await?;
    Ok(())
}
