use crate::analyzer::{AnalysisConfig, VideoAnalyzer};
use crate::error::{AnalysisError, Result};
use crate::frame_source::FrameSource;
use crate::report::AnalysisResult;
use crate::video_decoder::FfmpegSource;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use walkdir::WalkDir;

/// 支持的视频扩展名
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm", "flv", "wmv"];

/// 为每个任务打开独立的帧源
pub trait SourceOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>>;
}

/// 默认的 FFmpeg 帧源
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegOpener;

impl SourceOpener for FfmpegOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(FfmpegSource::open(path)?))
    }
}

/// 单个任务的最终结果，成功或带路径的错误
#[derive(Debug)]
pub struct BatchOutcome {
    pub path: PathBuf,
    pub result: Result<AnalysisResult>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// 进度回调：(已完成数, 总数, 文件路径)
pub type ProgressCallback = Arc<dyn Fn(usize, usize, &Path) + Send + Sync>;

/// 批量分析器：有界并发，单个文件失败不影响其他文件
pub struct BatchRunner {
    analyzer: Arc<VideoAnalyzer>,
    opener: Arc<dyn SourceOpener>,
    max_workers: usize,
    progress: Option<ProgressCallback>,
}

impl BatchRunner {
    pub fn new(config: AnalysisConfig) -> Self {
        Self::with_analyzer(VideoAnalyzer::new(config))
    }

    pub fn with_analyzer(analyzer: VideoAnalyzer) -> Self {
        let max_workers = analyzer.config().max_workers.max(1);
        Self {
            analyzer: Arc::new(analyzer),
            opener: Arc::new(FfmpegOpener),
            max_workers,
            progress: None,
        }
    }

    pub fn with_opener(mut self, opener: impl SourceOpener + 'static) -> Self {
        self.opener = Arc::new(opener);
        self
    }

    pub fn with_progress(mut self, callback: impl Fn(usize, usize, &Path) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    /// 并发分析一组文件，每个输入都恰好产生一个结果，顺序按完成先后
    pub async fn run(&self, paths: Vec<PathBuf>) -> Vec<BatchOutcome> {
        let total = paths.len();
        let batch_start = Instant::now();
        info!("🚀 [批量分析] 共 {} 个视频，并发数: {}", total, self.max_workers);
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut pending: Vec<Option<PathBuf>> = paths.iter().cloned().map(Some).collect();
        let mut tasks = JoinSet::new();

        for (slot, path) in paths.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let analyzer = Arc::clone(&self.analyzer);
            let opener = Arc::clone(&self.opener);

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        let result = Err(AnalysisError::Worker {
                            path: path.clone(),
                            reason: format!("无法获取并发许可: {}", e),
                        });
                        return (slot, BatchOutcome { path, result });
                    }
                };

                // 解码和分析都是 CPU 密集的同步代码
                let task_path = path.clone();
                let result = tokio::task::spawn_blocking(move || {
                    let mut source = opener.open(&task_path)?;
                    analyzer.analyze_source(&task_path, source.as_mut())
                })
                .await
                .unwrap_or_else(|e| {
                    Err(AnalysisError::Worker {
                        path: path.clone(),
                        reason: format!("分析任务异常退出: {}", e),
                    })
                });

                (slot, BatchOutcome { path, result })
            });
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, outcome)) => {
                    pending[slot] = None;
                    self.record(outcome, &mut outcomes, total);
                }
                Err(e) => error!("❌ [批量分析] 任务异常退出: {}", e),
            }
        }

        // 外层任务本身异常时仍然为其输入补一条错误结果
        for path in pending.into_iter().flatten() {
            let result = Err(AnalysisError::Worker {
                path: path.clone(),
                reason: "任务未返回结果".to_string(),
            });
            self.record(BatchOutcome { path, result }, &mut outcomes, total);
        }

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!("🎉 [批量分析] 全部完成！总耗时: {:.2}秒", batch_start.elapsed().as_secs_f64());
        info!("  • 成功: {} 个", succeeded);
        info!("  • 失败: {} 个", total - succeeded);
        outcomes
    }

    fn record(&self, outcome: BatchOutcome, outcomes: &mut Vec<BatchOutcome>, total: usize) {
        match &outcome.result {
            Ok(result) => info!(
                "✅ [批量分析] {}: {:.2} 分（{}）",
                outcome.path.display(),
                result.score.total,
                result.score.grade
            ),
            Err(e) => error!("❌ [批量分析] {}", e),
        }
        let completed = outcomes.len() + 1;
        if let Some(progress) = &self.progress {
            progress(completed, total, outcome.path.as_path());
        }
        outcomes.push(outcome);
    }
}

fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// 查找目录下的视频文件（扩展名不区分大小写），按路径排序。不跟随符号链接
pub fn find_videos(dir: &Path, recursive: bool) -> std::io::Result<Vec<PathBuf>> {
    let mut walker = WalkDir::new(dir);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut found = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            // 根目录本身不可读时报错，子目录出错只跳过
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                warn!("⚠️  [批量分析] 跳过无法读取的路径: {}", e);
                continue;
            }
        };
        if entry.file_type().is_file() && is_video_file(entry.path()) {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_source::MemorySource;
    use crate::report::{BatchEntry, BatchReport};
    use image::{GrayImage, ImageBuffer, Luma};
    use std::collections::HashSet;
    use std::sync::{mpsc, Mutex};
    use std::time::Duration;

    fn clip(seed: u32) -> Vec<GrayImage> {
        (0..15u32)
            .map(|i| {
                ImageBuffer::from_fn(32, 24, move |x, y| {
                    let v = (x.wrapping_add(i * 3) ^ y.wrapping_mul(31) ^ seed).wrapping_mul(2654435761) >> 24;
                    Luma([v as u8])
                })
            })
            .collect()
    }

    /// 内存帧源，指定的路径模拟缺失文件
    struct SyntheticOpener {
        missing: PathBuf,
    }

    impl SourceOpener for SyntheticOpener {
        fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
            if path == self.missing {
                return Err(AnalysisError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            let seed = path.to_string_lossy().len() as u32;
            Ok(Box::new(MemorySource::constant_rate(30.0, clip(seed))))
        }
    }

    struct PanickingOpener;

    impl SourceOpener for PanickingOpener {
        fn open(&self, _path: &Path) -> Result<Box<dyn FrameSource>> {
            panic!("decoder crashed");
        }
    }

    fn paths(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("/videos/clip_{}.mp4", i))).collect()
    }

    #[tokio::test]
    async fn test_one_missing_file_is_isolated() {
        let inputs = paths(5);
        let missing = inputs[2].clone();
        let progress = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&progress);

        let runner = BatchRunner::new(AnalysisConfig::default())
            .max_workers(2)
            .with_opener(SyntheticOpener {
                missing: missing.clone(),
            })
            .with_progress(move |done, total, path| {
                seen.lock().unwrap().push((done, total, path.to_path_buf()));
            });
        let outcomes = runner.run(inputs.clone()).await;

        assert_eq!(outcomes.len(), 5);
        let failures: Vec<&BatchOutcome> = outcomes.iter().filter(|o| !o.is_success()).collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].path, missing);
        match &failures[0].result {
            Err(e) => assert_eq!(e.path(), missing.as_path()),
            Ok(_) => panic!("expected an error outcome"),
        }

        let unique: HashSet<&PathBuf> = outcomes.iter().map(|o| &o.path).collect();
        assert_eq!(unique.len(), 5);
        for outcome in outcomes.iter().filter(|o| o.is_success()) {
            let result = outcome.result.as_ref().unwrap();
            assert_eq!(result.path, outcome.path);
        }

        let calls = progress.lock().unwrap();
        assert_eq!(calls.len(), 5);
        assert!(calls.iter().all(|(_, total, _)| *total == 5));
        let counts: Vec<usize> = calls.iter().map(|(done, _, _)| *done).collect();
        assert_eq!(counts, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_panicking_task_keeps_its_path() {
        let runner = BatchRunner::new(AnalysisConfig::default()).with_opener(PanickingOpener);
        let outcomes = runner.run(paths(2)).await;

        assert_eq!(outcomes.len(), 2);
        for outcome in &outcomes {
            match &outcome.result {
                Err(AnalysisError::Worker { path, .. }) => assert_eq!(path, &outcome.path),
                other => panic!("unexpected outcome: {:?}", other.as_ref().map(|r| r.score.total)),
            }
        }
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let runner = BatchRunner::new(AnalysisConfig::default());
        assert!(runner.run(Vec::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_report() {
        let inputs = paths(3);
        let runner = BatchRunner::new(AnalysisConfig::default()).with_opener(SyntheticOpener {
            missing: inputs[0].clone(),
        });
        let report = BatchReport::from_outcomes(runner.run(inputs.clone()).await);

        assert_eq!(report.total, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert!(report.mean_score.is_some());
        assert!(chrono::DateTime::parse_from_rfc3339(&report.generated_at).is_ok());

        let error = report
            .entries
            .iter()
            .find(|e| matches!(e, BatchEntry::Error { .. }))
            .unwrap();
        assert_eq!(error.path(), inputs[0].as_path());

        let json = serde_json::to_value(&report).unwrap();
        let statuses: Vec<&str> = json["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["status"].as_str().unwrap())
            .collect();
        assert_eq!(statuses.iter().filter(|s| **s == "error").count(), 1);
        assert_eq!(statuses.iter().filter(|s| **s == "success").count(), 2);
    }

    #[test]
    fn test_find_videos() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join("nested")).unwrap();
        for name in ["b.mkv", "a.MP4", "notes.txt", "nested/c.webm", "nested/d.avi.bak"] {
            std::fs::write(root.join(name), b"").unwrap();
        }

        let flat = find_videos(root, false).unwrap();
        assert_eq!(flat, vec![root.join("a.MP4"), root.join("b.mkv")]);

        let deep = find_videos(root, true).unwrap();
        assert_eq!(deep, vec![root.join("a.MP4"), root.join("b.mkv"), root.join("nested/c.webm")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_find_videos_ignores_symlink_loops() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join("clips")).unwrap();
        std::fs::write(root.join("clips/a.mp4"), b"").unwrap();
        std::os::unix::fs::symlink(root, root.join("clips/back")).unwrap();

        let found = find_videos(root, true).unwrap();
        assert_eq!(found, vec![root.join("clips/a.mp4")]);
    }

    #[test]
    fn test_find_videos_missing_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_videos(&dir.path().join("gone"), true).is_err());
    }

    /// 指定路径的解码一直阻塞，直到收到放行信号
    struct BlockingOpener {
        blocked: PathBuf,
        release: Mutex<mpsc::Receiver<()>>,
        finished: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl SourceOpener for BlockingOpener {
        fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
            if path == self.blocked {
                let released = self.release.lock().unwrap().recv_timeout(Duration::from_secs(10));
                if released.is_err() {
                    return Err(AnalysisError::Worker {
                        path: path.to_path_buf(),
                        reason: "never released".to_string(),
                    });
                }
            }
            self.finished.lock().unwrap().push(path.to_path_buf());
            Ok(Box::new(MemorySource::constant_rate(30.0, clip(7))))
        }
    }

    #[tokio::test]
    async fn test_hung_decode_does_not_block_other_results() {
        let inputs = paths(4);
        let blocked = inputs[0].clone();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let finished = Arc::new(Mutex::new(Vec::new()));
        let progress = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&progress);

        let runner = BatchRunner::new(AnalysisConfig::default())
            .max_workers(2)
            .with_opener(BlockingOpener {
                blocked: blocked.clone(),
                release: Mutex::new(rx),
                finished: Arc::clone(&finished),
            })
            .with_progress(move |done, total, path| {
                seen.lock().unwrap().push(path.to_path_buf());
                if done == total - 1 {
                    tx.lock().unwrap().send(()).unwrap();
                }
            });
        let outcomes = runner.run(inputs.clone()).await;

        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(|o| o.is_success()));

        // 其余三个结果都在阻塞任务放行之前被收集
        let calls = progress.lock().unwrap();
        assert_eq!(calls.len(), 4);
        assert!(calls[..3].iter().all(|p| p != &blocked));
        assert_eq!(calls[3], blocked);
        assert_eq!(finished.lock().unwrap().last(), Some(&blocked));
    }
}
