//! 연결 레지스트리
//!
//! 연결 ID → 송신 큐 매핑. 각 연결의 writer 태스크가 자기 큐를
//! 소비해 소켓 write half에 순서대로 기록하므로, 한 연결로 가는
//! 프레임은 항상 큐에 넣은 순서대로 나간다.
//!
//! 브로드캐스트는 다른 연결의 태스크에서 send를 호출하므로
//! DashMap으로 동시 접근을 허용한다

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::ConnectionId;

/// 연결별 송신 큐 레지스트리
#[derive(Debug, Default)]
pub struct Registry {
    senders: DashMap<ConnectionId, mpsc::UnboundedSender<Vec<u8>>>,
}

impl Registry {
    /// 새 레지스트리 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 연결 등록
    pub fn register(&self, id: ConnectionId, tx: mpsc::UnboundedSender<Vec<u8>>) {
        self.senders.insert(id, tx);
    }

    /// 프레임 바이트를 해당 연결의 송신 큐에 넣는다
    ///
    /// 모르는 ID거나 이미 닫힌 연결이면 false를 반환하고 끝.
    /// 호출한 엔진은 영향 없이 계속 진행한다
    pub fn send(&self, id: ConnectionId, bytes: Vec<u8>) -> bool {
        match self.senders.get(&id) {
            Some(tx) => tx.send(bytes).is_ok(),
            None => {
                debug!("send to unknown connection {}", id);
                false
            }
        }
    }

    /// 연결 제거
    ///
    /// 송신 큐가 드랍되면 writer 태스크가 남은 프레임을 모두
    /// 내보낸 뒤 소켓을 닫는다
    pub fn disconnect(&self, id: ConnectionId) {
        self.senders.remove(&id);
    }

    /// 등록된 연결 수
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// 등록된 연결이 없는지
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_send() {
        let registry = Registry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(1, tx);

        assert!(registry.send(1, vec![0, 4, 0, 0]));
        assert_eq!(rx.try_recv().unwrap(), vec![0, 4, 0, 0]);
    }

    #[test]
    fn test_send_to_unknown_connection() {
        let registry = Registry::new();
        assert!(!registry.send(42, vec![1, 2, 3]));
    }

    #[test]
    fn test_disconnect_closes_queue() {
        let registry = Registry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(1, tx);
        registry.send(1, vec![7]);

        registry.disconnect(1);
        assert!(registry.is_empty());
        assert!(!registry.send(1, vec![8]));

        // 제거 전에 큐에 들어간 프레임은 여전히 소비 가능
        assert_eq!(rx.try_recv().unwrap(), vec![7]);
        assert!(rx.try_recv().is_err());
    }
}
