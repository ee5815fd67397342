//! 공유 세션 상태
//!
//! 모든 연결 태스크가 공유하는 프로세스 전역 맵:
//! - 연결 ID → 로그인 유저명 (유저명은 전체에서 유일)
//! - 업로드 진행 중인 파일명 집합
//! - 연결 ID → 해당 연결이 소유한 업로드 파일명
//!
//! 로그인 유일성과 업로드 배타성 판정은 여기서만 이루어진다

use std::collections::HashSet;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::ConnectionId;

/// 공유 세션 상태
///
/// 서버 생성 시 하나 만들어 `Arc`로 모든 연결 태스크에 전달
#[derive(Debug, Default)]
pub struct SessionState {
    /// 연결 ID → 로그인 유저명
    user_by_conn: DashMap<ConnectionId, String>,

    /// 로그인 중인 유저명 집합
    ///
    /// 유일성 검사와 등록을 한 락 아래에서 처리해 동시 로그인 경합을 차단
    active_users: Mutex<HashSet<String>>,

    /// WRQ로 수신 중인 파일명 집합
    uploading_now: Mutex<HashSet<String>>,

    /// 연결 ID → 그 연결이 소유한 업로드 파일명
    current_upload: DashMap<ConnectionId, String>,
}

impl SessionState {
    /// 새 세션 상태 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 로그인 시도
    ///
    /// 이 연결이 이미 로그인했거나 유저명이 다른 연결에 잡혀 있으면 실패
    pub fn try_login(&self, id: ConnectionId, username: &str) -> bool {
        if self.user_by_conn.contains_key(&id) {
            return false;
        }
        let mut users = self.active_users.lock();
        if !users.insert(username.to_string()) {
            return false;
        }
        self.user_by_conn.insert(id, username.to_string());
        true
    }

    /// 연결의 로그인 유저명
    pub fn username(&self, id: ConnectionId) -> Option<String> {
        self.user_by_conn.get(&id).map(|u| u.clone())
    }

    /// 로그인 여부
    pub fn is_logged_in(&self, id: ConnectionId) -> bool {
        self.user_by_conn.contains_key(&id)
    }

    /// 현재 로그인된 연결 ID 목록 (브로드캐스트 대상 스냅샷)
    pub fn logged_in_connections(&self) -> Vec<ConnectionId> {
        self.user_by_conn.iter().map(|e| *e.key()).collect()
    }

    /// 업로드 시작 등록
    ///
    /// 같은 이름이 이미 업로드 중이면 실패 (두 번째 WRQ는 거절, 대기 아님)
    pub fn try_begin_upload(&self, id: ConnectionId, filename: &str) -> bool {
        let mut uploading = self.uploading_now.lock();
        if !uploading.insert(filename.to_string()) {
            return false;
        }
        self.current_upload.insert(id, filename.to_string());
        true
    }

    /// 이 연결이 소유한 업로드 파일명
    pub fn upload_of(&self, id: ConnectionId) -> Option<String> {
        self.current_upload.get(&id).map(|n| n.clone())
    }

    /// 파일명이 업로드 중인지
    ///
    /// 여기에 있는 이름은 RRQ/DIRQ/DELRQ 대상에서 제외된다
    pub fn is_uploading(&self, filename: &str) -> bool {
        self.uploading_now.lock().contains(filename)
    }

    /// 업로드 종료: 소유권과 업로드 중 표시를 함께 해제
    pub fn finish_upload(&self, id: ConnectionId) {
        if let Some((_, name)) = self.current_upload.remove(&id) {
            self.uploading_now.lock().remove(&name);
        }
    }

    /// 연결 해제 시 전체 정리
    ///
    /// 미완료 업로드와 로그인 매핑을 해제해 이후 세션이 굶지 않게 한다.
    /// 해제된 유저명을 반환 (텔레메트리용)
    pub fn release_connection(&self, id: ConnectionId) -> Option<String> {
        self.finish_upload(id);
        if let Some((_, user)) = self.user_by_conn.remove(&id) {
            self.active_users.lock().remove(&user);
            Some(user)
        } else {
            None
        }
    }
}
