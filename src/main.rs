use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};
use video_quality::batch::{find_videos, BatchRunner};
use video_quality::config::{AppConfig, ConfigLoader, PartialConfig};
use video_quality::{BatchReport, VideoAnalyzer};

/// 视频质量分析工具 - 评估帧率稳定性、重复帧、运动连续性和果冻效应
#[derive(Parser, Debug)]
#[command(name = "video-quality")]
#[command(about = "视频质量分析工具：帧率/抖动、重复帧、运动连续性、果冻效应与综合评分", long_about = None)]
struct Args {
    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// 分析参数，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
#[derive(clap::Args, Debug)]
struct AnalysisArgs {
    /// 配置文件路径（可选，支持 .ini 格式）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 帧采样步长，1 表示每帧都分析
    /// 可通过环境变量 VIDEO_QUALITY_SAMPLE_RATE 或配置文件设置
    #[arg(long)]
    sample_rate: Option<usize>,

    /// 近似重复帧的差异百分比阈值 (0.0-1.0)
    /// 可通过环境变量 VIDEO_QUALITY_DUPLICATE_THRESHOLD 或配置文件设置
    #[arg(long)]
    duplicate_threshold: Option<f64>,

    /// 近似重复帧的 SSIM 阈值 (0.0-1.0)
    /// 可通过环境变量 VIDEO_QUALITY_SSIM_THRESHOLD 或配置文件设置
    #[arg(long)]
    ssim_threshold: Option<f64>,

    /// 不输出每秒的帧动态统计
    #[arg(long)]
    no_dynamics: bool,
}

impl AnalysisArgs {
    fn overrides(&self, max_workers: Option<usize>) -> PartialConfig {
        PartialConfig {
            sample_rate: self.sample_rate,
            duplicate_threshold: self.duplicate_threshold,
            ssim_threshold: self.ssim_threshold,
            max_workers,
            frame_dynamics: self.no_dynamics.then_some(false),
            ..PartialConfig::default()
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 分析单个视频文件
    Analyze {
        /// 输入视频文件路径
        input: PathBuf,

        /// 输出 JSON 文件（默认打印到标准输出）
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },
    /// 批量分析多个视频文件或目录
    Batch {
        /// 输入视频文件或目录
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// 递归查找子目录
        #[arg(short, long)]
        recursive: bool,

        /// 最大并发数
        /// 可通过环境变量 VIDEO_QUALITY_MAX_WORKERS 或配置文件设置
        #[arg(short, long)]
        workers: Option<usize>,

        /// 输出批量报告 JSON 文件（默认打印到标准输出）
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },
    /// 生成默认配置文件
    InitConfig {
        /// 配置文件路径
        path: PathBuf,
    },
}

impl Commands {
    fn config_file(&self) -> Option<&Path> {
        match self {
            Commands::Analyze { analysis, .. } | Commands::Batch { analysis, .. } => analysis.config.as_deref(),
            Commands::InitConfig { .. } => None,
        }
    }
}

fn init_logging(level: &str) {
    let level = tracing::Level::from_str(level).unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn load_config(analysis: &AnalysisArgs, max_workers: Option<usize>, verbose: bool) -> Result<AppConfig> {
    let config = ConfigLoader::load_config(analysis.config.as_deref(), &analysis.overrides(max_workers), verbose)
        .context("加载配置失败")?;
    if let Some(path) = &config.config_file {
        info!("使用配置文件: {}", path.display());
    }
    info!(
        "使用配置: sample_rate={}, duplicate_threshold={:.3}, ssim_threshold={:.3}, max_workers={}",
        config.analysis.sample_rate,
        config.analysis.duplicate_threshold,
        config.analysis.ssim_threshold,
        config.analysis.max_workers
    );
    Ok(config)
}

fn write_json<T: serde::Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("序列化结果失败")?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).context("创建输出目录失败")?;
            }
            std::fs::write(path, json).with_context(|| format!("写入结果失败: {}", path.display()))?;
            info!("结果已保存到: {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// 展开输入：目录替换为其中的视频文件
fn expand_inputs(inputs: &[PathBuf], recursive: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let found = find_videos(input, recursive).with_context(|| format!("读取目录失败: {}", input.display()))?;
            if found.is_empty() {
                warn!("⚠️  目录中没有视频文件: {}", input.display());
            }
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    init_logging(&ConfigLoader::load_log_level(args.command.config_file(), args.verbose));

    match args.command {
        Commands::Analyze {
            input,
            output,
            analysis,
        } => {
            let config = load_config(&analysis, None, args.verbose)?;
            let analyzer = VideoAnalyzer::new(config.analysis);

            // 解码是同步且 CPU 密集的操作
            let result = tokio::task::spawn_blocking(move || analyzer.analyze_path(&input))
                .await
                .context("分析任务异常退出")?
                .context("分析视频失败")?;

            info!("总分: {:.2}（{}）", result.score.total, result.score.grade);
            write_json(&result, output.as_deref())?;
        }
        Commands::Batch {
            inputs,
            recursive,
            workers,
            output,
            analysis,
        } => {
            let config = load_config(&analysis, workers, args.verbose)?;
            let files = expand_inputs(&inputs, recursive)?;
            if files.is_empty() {
                anyhow::bail!("没有找到任何视频文件");
            }

            let runner = BatchRunner::new(config.analysis).with_progress(|done, total, path| {
                info!("📈 [批量分析] 进度: {}/{} {}", done, total, path.display());
            });
            let report = BatchReport::from_outcomes(runner.run(files).await);
            write_json(&report, output.as_deref())?;

            if report.succeeded == 0 {
                anyhow::bail!("全部 {} 个视频分析失败", report.total);
            }
        }
        Commands::InitConfig { path } => {
            ConfigLoader::create_default_config(&path).context("创建配置文件失败")?;
            info!("已生成默认配置文件: {}", path.display());
        }
    }

    Ok(())
}
