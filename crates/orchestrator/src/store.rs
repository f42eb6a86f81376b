//! Finding 영구 저장소
//!
//! - [`JsonlFindingStore`]: 한 줄에 Finding JSON 하나씩 파일 끝에 추가
//! - [`MemoryFindingStore`]: 테스트용 메모리 저장소

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use fleetwatch_core::event::Finding;
use fleetwatch_core::health::BoxFuture;

use crate::error::OrchestratorError;

/// Finding 저장소
///
/// 오케스트레이터 이벤트 루프가 유일한 기록자입니다.
pub trait FindingStore: Send + Sync {
    /// Finding 하나를 저장합니다.
    fn append<'a>(&'a self, finding: &'a Finding) -> BoxFuture<'a, Result<(), OrchestratorError>>;

    /// 저장소 설명 (로그용)
    fn describe(&self) -> String;
}

/// JSON Lines 파일 저장소
pub struct JsonlFindingStore {
    path: PathBuf,
    file: Mutex<Option<tokio::fs::File>>,
}

impl JsonlFindingStore {
    /// 경로만 지정합니다. 파일은 첫 기록 때 엽니다.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    /// 저장 경로
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self, reason: impl ToString) -> OrchestratorError {
        OrchestratorError::Store {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    async fn open(&self) -> Result<tokio::fs::File, OrchestratorError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.error(e))?;
        }
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.error(e))
    }

    async fn append_inner(&self, finding: &Finding) -> Result<(), OrchestratorError> {
        let mut line = serde_json::to_vec(finding).map_err(|e| self.error(e))?;
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        let Some(file) = guard.as_mut() else {
            return Err(self.error("file handle unavailable"));
        };

        let written = async {
            file.write_all(&line).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            // 다음 기록에서 다시 열도록 핸들을 버림
            *guard = None;
            return Err(self.error(e));
        }
        Ok(())
    }
}

impl FindingStore for JsonlFindingStore {
    fn append<'a>(&'a self, finding: &'a Finding) -> BoxFuture<'a, Result<(), OrchestratorError>> {
        Box::pin(self.append_inner(finding))
    }

    fn describe(&self) -> String {
        format!("jsonl:{}", self.path.display())
    }
}

/// 메모리 저장소
#[derive(Default)]
pub struct MemoryFindingStore {
    findings: Mutex<Vec<Finding>>,
}

impl MemoryFindingStore {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장된 Finding 복사본
    pub async fn snapshot(&self) -> Vec<Finding> {
        self.findings.lock().await.clone()
    }

    /// 저장된 Finding 수
    pub async fn len(&self) -> usize {
        self.findings.lock().await.len()
    }

    /// 비어 있는지
    pub async fn is_empty(&self) -> bool {
        self.findings.lock().await.is_empty()
    }
}

impl FindingStore for MemoryFindingStore {
    fn append<'a>(&'a self, finding: &'a Finding) -> BoxFuture<'a, Result<(), OrchestratorError>> {
        Box::pin(async move {
            self.findings.lock().await.push(finding.clone());
            Ok(())
        })
    }

    fn describe(&self) -> String {
        "memory".to_owned()
    }
}
