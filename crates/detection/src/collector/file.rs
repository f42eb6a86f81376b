//! 파일 기반 로그 수집기
//!
//! 저장된 로그 파일을 처음부터 끝까지 한 줄씩 읽어 채널로 보냅니다.
//! `ingest` 명령의 재생 경로에서 사용합니다.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{CollectorStatus, RawLine};
use crate::error::DetectionError;

/// 파일 기반 로그 수집기
pub struct FileCollector {
    /// 읽을 파일 경로
    path: PathBuf,
    /// 수집된 라인 전송 채널
    tx: mpsc::Sender<RawLine>,
    /// 현재 상태
    status: CollectorStatus,
    /// 지금까지 읽은 라인 수
    lines_read: u64,
}

impl FileCollector {
    /// 새 파일 수집기를 생성합니다.
    pub fn new(path: impl Into<PathBuf>, tx: mpsc::Sender<RawLine>) -> Self {
        Self {
            path: path.into(),
            tx,
            status: CollectorStatus::Idle,
            lines_read: 0,
        }
    }

    /// 파일을 끝까지 읽습니다.
    ///
    /// 취소되거나 수신 측이 닫히면 중간에 멈춥니다.
    /// 빈 줄은 건너뛰며, 읽은 (비어 있지 않은) 라인 수를 반환합니다.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<u64, DetectionError> {
        self.status = CollectorStatus::Running;
        match self.read_all(&cancel).await {
            Ok(()) => {
                self.status = CollectorStatus::Stopped;
                tracing::info!(
                    path = %self.path.display(),
                    lines = self.lines_read,
                    "file replay finished"
                );
                Ok(self.lines_read)
            }
            Err(e) => {
                self.status = CollectorStatus::Error(e.to_string());
                Err(e)
            }
        }
    }

    async fn read_all(&mut self, cancel: &CancellationToken) -> Result<(), DetectionError> {
        let file = File::open(&self.path)
            .await
            .map_err(|e| DetectionError::Collector {
                source_type: "file".to_owned(),
                reason: format!("failed to open {}: {e}", self.path.display()),
            })?;
        let mut reader = BufReader::new(file);
        let source = format!("file:{}", self.path.display());
        let mut buf = Vec::with_capacity(1024);

        loop {
            buf.clear();
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(path = %self.path.display(), "file replay cancelled");
                    return Ok(());
                }
                read = reader.read_until(b'\n', &mut buf) => read?,
            };
            if read == 0 {
                return Ok(());
            }

            let line = trim_line_ending(&buf);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            self.lines_read += 1;
            let raw = RawLine::new(Bytes::copy_from_slice(line), source.clone());
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                sent = self.tx.send(raw) => sent,
            };
            if sent.is_err() {
                tracing::debug!("line receiver closed, stopping file replay");
                return Ok(());
            }
        }
    }

    /// 파일 경로를 반환합니다.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 지금까지 읽은 라인 수
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// 현재 상태를 반환합니다.
    pub fn status(&self) -> &CollectorStatus {
        &self.status
    }
}

fn trim_line_ending(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}
