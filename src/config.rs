use crate::analyzer::AnalysisConfig;
use anyhow::{Context, Result};
use configparser::ini::Ini;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

const SECTION: &str = "video_quality";
const ENV_PREFIX: &str = "VIDEO_QUALITY_";
const DEFAULT_LOG_LEVEL: &str = "info";

/// 解析单个配置值，失败时记录警告并忽略
fn parse_value<T: FromStr>(key: &str, raw: &str) -> Option<T> {
    let value = raw.trim().to_ascii_lowercase();
    if value.is_empty() {
        return None;
    }
    match value.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("⚠️  [配置] 无法解析 {} = {}，已忽略", key, raw);
            None
        }
    }
}

macro_rules! partial_config {
    ($($field:ident: $ty:ty),* $(,)?) => {
        /// 某一个配置来源（命令行/环境变量/配置文件）中出现的字段
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct PartialConfig {
            $(pub $field: Option<$ty>,)*
        }

        impl PartialConfig {
            /// 按字段名逐个查询
            pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
                Self {
                    $($field: lookup(stringify!($field)).and_then(|v| parse_value(stringify!($field), &v)),)*
                }
            }

            fn apply_to(&self, config: &mut AnalysisConfig) {
                $(if let Some(v) = &self.$field {
                    config.$field = v.clone();
                })*
            }
        }

        fn write_values(ini: &mut Ini, config: &AnalysisConfig) {
            $(ini.set(SECTION, stringify!($field), Some(config.$field.to_string()));)*
        }
    };
}

partial_config! {
    duplicate_threshold: f64,
    ssim_threshold: f64,
    exact_duplicate_threshold: f64,
    exact_ssim_threshold: f64,
    duplicate_grid_width: u32,
    duplicate_grid_height: u32,
    motion_threshold: f64,
    min_discontinuity_motion: f64,
    jerk_spike_sigma: f64,
    jerk_spike_weight: f64,
    jerk_mean_weight: f64,
    wobble_threshold: f64,
    wobble_grid: usize,
    wobble_direction_weight: f64,
    wobble_scale: f64,
    fps_drop_threshold: f64,
    sample_rate: usize,
    max_workers: usize,
    block_size: u32,
    search_radius: u32,
    max_reported_indices: usize,
    frame_dynamics: bool,
}

/// 完整的运行配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub analysis: AnalysisConfig,
    /// 日志级别（trace, debug, info, warn, error）
    pub log_level: String,
    /// 实际加载的配置文件
    pub config_file: Option<PathBuf>,
}

/// 从INI文件读取到的内容
#[derive(Debug, Clone, Default)]
struct FileConfig {
    values: PartialConfig,
    log_level: Option<String>,
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从多个源加载配置，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    ///
    /// 显式指定的配置文件读取失败会返回错误，默认位置找不到文件时只使用默认值。
    pub fn load_config(config_file: Option<&Path>, cli: &PartialConfig, verbose: bool) -> Result<AppConfig> {
        // 1. 配置文件
        let (file_path, file_config) = match config_file {
            Some(path) => (Some(path.to_path_buf()), Self::load_from_file(path)?),
            None => match Self::load_from_default_locations() {
                Some((path, config)) => (Some(path), config),
                None => {
                    debug!("未找到配置文件，使用默认配置");
                    (None, FileConfig::default())
                }
            },
        };

        // 2. 环境变量
        let env_config = Self::load_from_env();
        let env_log_level = env::var(format!("{}LOG_LEVEL", ENV_PREFIX)).ok();

        // 3. 合并
        let analysis = Self::merge(&[&file_config.values, &env_config, cli]);
        let log_level = resolve_log_level(verbose, env_log_level, file_config.log_level);

        Ok(AppConfig {
            analysis,
            log_level,
            config_file: file_path,
        })
    }

    /// 只解析日志级别，用于在加载完整配置之前初始化日志
    pub fn load_log_level(config_file: Option<&Path>, verbose: bool) -> String {
        let file_level = match config_file {
            Some(path) => Self::load_from_file(path).ok(),
            None => Self::load_from_default_locations().map(|(_, config)| config),
        }
        .and_then(|config| config.log_level);
        let env_level = env::var(format!("{}LOG_LEVEL", ENV_PREFIX)).ok();
        resolve_log_level(verbose, env_level, file_level)
    }

    /// 按优先级从低到高依次覆盖默认值，最后校验
    pub fn merge(layers: &[&PartialConfig]) -> AnalysisConfig {
        let mut config = AnalysisConfig::default();
        for layer in layers {
            layer.apply_to(&mut config);
        }
        Self::sanitize(config)
    }

    /// 非法值替换为默认值
    pub fn sanitize(mut config: AnalysisConfig) -> AnalysisConfig {
        let defaults = AnalysisConfig::default();

        let ratio_fields = [
            ("duplicate_threshold", &mut config.duplicate_threshold, defaults.duplicate_threshold),
            ("ssim_threshold", &mut config.ssim_threshold, defaults.ssim_threshold),
            (
                "exact_duplicate_threshold",
                &mut config.exact_duplicate_threshold,
                defaults.exact_duplicate_threshold,
            ),
            ("exact_ssim_threshold", &mut config.exact_ssim_threshold, defaults.exact_ssim_threshold),
            ("motion_threshold", &mut config.motion_threshold, defaults.motion_threshold),
            ("fps_drop_threshold", &mut config.fps_drop_threshold, defaults.fps_drop_threshold),
        ];
        for (key, value, default) in ratio_fields {
            if !(*value > 0.0 && *value <= 1.0) {
                warn!("⚠️  [配置] {} = {} 超出范围 (0, 1]，使用默认值 {}", key, value, default);
                *value = default;
            }
        }

        let non_negative_fields = [
            ("wobble_threshold", &mut config.wobble_threshold, defaults.wobble_threshold),
            (
                "min_discontinuity_motion",
                &mut config.min_discontinuity_motion,
                defaults.min_discontinuity_motion,
            ),
            ("jerk_spike_sigma", &mut config.jerk_spike_sigma, defaults.jerk_spike_sigma),
            ("jerk_spike_weight", &mut config.jerk_spike_weight, defaults.jerk_spike_weight),
            ("jerk_mean_weight", &mut config.jerk_mean_weight, defaults.jerk_mean_weight),
            (
                "wobble_direction_weight",
                &mut config.wobble_direction_weight,
                defaults.wobble_direction_weight,
            ),
            ("wobble_scale", &mut config.wobble_scale, defaults.wobble_scale),
        ];
        for (key, value, default) in non_negative_fields {
            if !(*value >= 0.0 && value.is_finite()) {
                warn!("⚠️  [配置] {} = {} 不能为负数，使用默认值 {}", key, value, default);
                *value = default;
            }
        }

        if config.sample_rate == 0 {
            warn!("⚠️  [配置] sample_rate 不能为 0，按 1 处理");
            config.sample_rate = 1;
        }
        if config.max_workers == 0 {
            warn!("⚠️  [配置] max_workers 不能为 0，使用默认值 {}", defaults.max_workers);
            config.max_workers = defaults.max_workers;
        }
        if config.wobble_grid == 0 {
            warn!("⚠️  [配置] wobble_grid 不能为 0，使用默认值 {}", defaults.wobble_grid);
            config.wobble_grid = defaults.wobble_grid;
        }
        if config.block_size == 0 {
            warn!("⚠️  [配置] block_size 不能为 0，使用默认值 {}", defaults.block_size);
            config.block_size = defaults.block_size;
        }
        if config.duplicate_grid_width == 0 || config.duplicate_grid_height == 0 {
            warn!("⚠️  [配置] 重复帧网格尺寸不能为 0，使用默认值");
            config.duplicate_grid_width = defaults.duplicate_grid_width;
            config.duplicate_grid_height = defaults.duplicate_grid_height;
        }
        config
    }

    /// 从环境变量加载配置（VIDEO_QUALITY_ + 大写字段名）
    fn load_from_env() -> PartialConfig {
        PartialConfig::from_lookup(|key| env::var(format!("{}{}", ENV_PREFIX, key.to_uppercase())).ok())
    }

    /// 从INI配置文件加载配置
    fn load_from_file(config_path: &Path) -> Result<FileConfig> {
        if !config_path.exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {}", config_path.display()));
        }

        let mut config_parser = Ini::new();
        config_parser
            .load(config_path)
            .map_err(|e| anyhow::anyhow!("读取配置文件失败: {}: {}", config_path.display(), e))?;

        // 尝试从 [video_quality] 节读取，如果没有则使用 [DEFAULT] 节
        let values = PartialConfig::from_lookup(|key| {
            config_parser.get(SECTION, key).or_else(|| config_parser.get("DEFAULT", key))
        });
        let log_level = config_parser
            .get("logging", "level")
            .or_else(|| config_parser.get("DEFAULT", "log_level"))
            .filter(|v| !v.is_empty());

        debug!("已加载配置文件: {}", config_path.display());
        Ok(FileConfig { values, log_level })
    }

    /// 依次尝试默认位置，返回第一个存在的配置文件
    fn load_from_default_locations() -> Option<(PathBuf, FileConfig)> {
        Self::default_locations()
            .into_iter()
            .filter(|path| path.exists())
            .find_map(|path| match Self::load_from_file(&path) {
                Ok(config) => Some((path, config)),
                Err(e) => {
                    warn!("⚠️  [配置] {}", e);
                    None
                }
            })
    }

    /// 默认配置文件位置：当前目录、用户主目录、/etc
    pub fn default_locations() -> Vec<PathBuf> {
        let mut locations = vec![PathBuf::from("video-quality.ini"), PathBuf::from(".video-quality.ini")];
        if let Some(home) = env::var_os("HOME") {
            locations.push(PathBuf::from(home).join(".video-quality.ini"));
        }
        locations.push(PathBuf::from("/etc/video-quality.ini"));
        locations
    }

    /// 创建默认配置文件
    pub fn create_default_config(config_path: &Path) -> Result<()> {
        let mut config_parser = Ini::new();
        write_values(&mut config_parser, &AnalysisConfig::default());
        config_parser.set("logging", "level", Some(DEFAULT_LOG_LEVEL.to_string()));

        config_parser
            .write(config_path)
            .with_context(|| format!("写入配置文件失败: {}", config_path.display()))?;

        Ok(())
    }
}

/// 日志级别：--verbose > 环境变量 > 配置文件 > info
pub fn resolve_log_level(verbose: bool, env_level: Option<String>, file_level: Option<String>) -> String {
    if verbose {
        return "debug".to_string();
    }
    env_level
        .or(file_level)
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn write_ini(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("video-quality.ini");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_from_file_with_default_section_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ini(
            &dir,
            "[DEFAULT]\nssim_threshold = 0.9\n\n[video_quality]\nsample_rate = 2\nframe_dynamics = False\n\n[logging]\nlevel = warn\n",
        );

        let file = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(file.values.sample_rate, Some(2));
        assert_eq!(file.values.ssim_threshold, Some(0.9));
        assert_eq!(file.values.frame_dynamics, Some(false));
        assert_eq!(file.values.duplicate_threshold, None);
        assert_eq!(file.log_level.as_deref(), Some("warn"));
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.ini");
        assert!(ConfigLoader::load_config(Some(&missing), &PartialConfig::default(), false).is_err());
    }

    #[test]
    fn test_precedence() {
        let file = PartialConfig {
            sample_rate: Some(2),
            ssim_threshold: Some(0.9),
            max_workers: Some(8),
            ..PartialConfig::default()
        };
        let env_vars: HashMap<&str, &str> = [("sample_rate", "3"), ("wobble_threshold", "0.05")].into_iter().collect();
        let env = PartialConfig::from_lookup(|key| env_vars.get(key).map(|v| v.to_string()));
        let cli = PartialConfig {
            ssim_threshold: Some(0.8),
            ..PartialConfig::default()
        };

        let config = ConfigLoader::merge(&[&file, &env, &cli]);
        assert_eq!(config.sample_rate, 3);
        assert_eq!(config.ssim_threshold, 0.8);
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.wobble_threshold, 0.05);
        assert_eq!(config.duplicate_threshold, 0.98);
    }

    #[test]
    fn test_invalid_values_are_replaced() {
        let layer = PartialConfig {
            sample_rate: Some(0),
            max_workers: Some(0),
            duplicate_threshold: Some(1.5),
            fps_drop_threshold: Some(f64::NAN),
            wobble_threshold: Some(-1.0),
            ..PartialConfig::default()
        };
        let config = ConfigLoader::merge(&[&layer]);
        assert_eq!(config.sample_rate, 1);
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.duplicate_threshold, 0.98);
        assert_eq!(config.fps_drop_threshold, 0.8);
        assert_eq!(config.wobble_threshold, 0.02);
    }

    #[test]
    fn test_unparsable_value_is_ignored() {
        let partial = PartialConfig::from_lookup(|key| (key == "sample_rate").then(|| "fast".to_string()));
        assert_eq!(partial.sample_rate, None);
    }

    #[test]
    fn test_create_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("generated.ini");
        ConfigLoader::create_default_config(&path).unwrap();

        let loaded = ConfigLoader::load_config(Some(&path), &PartialConfig::default(), false).unwrap();
        assert_eq!(loaded.analysis, AnalysisConfig::default());
        assert_eq!(loaded.config_file.as_deref(), Some(path.as_path()));

        let file = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(file.values.max_workers, Some(4));
        assert_eq!(file.log_level.as_deref(), Some("info"));
    }

    #[test]
    fn test_log_level_resolution() {
        assert_eq!(resolve_log_level(true, Some("warn".into()), None), "debug");
        assert_eq!(resolve_log_level(false, Some("WARN".into()), Some("error".into())), "warn");
        assert_eq!(resolve_log_level(false, None, Some("error".into())), "error");
        assert_eq!(resolve_log_level(false, None, None), "info");
    }
}
