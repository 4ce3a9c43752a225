use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub editor: EditorConfig,
    #[serde(default)]
    pub demo: DemoConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 自动发现配置文件：优先读取环境变量 `GEODRAW_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os("GEODRAW_CONFIG") {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 编辑器交互参数。
#[derive(Debug, Clone, Deserialize)]
pub struct EditorConfig {
    /// 新点与已有锚点距离小于该值时复用锚点（米）。
    #[serde(default = "EditorConfig::default_snap_radius")]
    pub snap_radius: f64,
    #[serde(default)]
    pub gizmo: GizmoConfig,
    #[serde(default)]
    pub drawing: DrawingConfig,
    #[serde(default)]
    pub extrusion: ExtrusionConfig,
    #[serde(default)]
    pub projection: ProjectionConfig,
}

impl EditorConfig {
    fn default_snap_radius() -> f64 {
        1.0
    }
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            snap_radius: Self::default_snap_radius(),
            gizmo: GizmoConfig::default(),
            drawing: DrawingConfig::default(),
            extrusion: ExtrusionConfig::default(),
            projection: ProjectionConfig::default(),
        }
    }
}

/// 平移控件的轴数：平面（东/北）或空间（东/北/天）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GizmoMode {
    Planar,
    #[default]
    Spatial,
}

impl GizmoMode {
    #[inline]
    pub fn axis_count(self) -> usize {
        match self {
            GizmoMode::Planar => 2,
            GizmoMode::Spatial => 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GizmoConfig {
    #[serde(default = "GizmoConfig::default_axis_length")]
    pub axis_length: f64,
    #[serde(default = "GizmoConfig::default_handle_offset")]
    pub handle_offset: f64,
    #[serde(default = "GizmoConfig::default_drag_speed")]
    pub drag_speed: f64,
    #[serde(default = "GizmoConfig::default_width")]
    pub width: f64,
    #[serde(default = "GizmoConfig::default_hover_width")]
    pub hover_width: f64,
    #[serde(default)]
    pub area_axes: GizmoMode,
    #[serde(default = "GizmoConfig::default_line_gizmo")]
    pub line_gizmo: bool,
}

impl GizmoConfig {
    fn default_axis_length() -> f64 {
        20.0
    }

    fn default_handle_offset() -> f64 {
        10.0
    }

    fn default_drag_speed() -> f64 {
        0.5
    }

    fn default_width() -> f64 {
        4.0
    }

    fn default_hover_width() -> f64 {
        8.0
    }

    fn default_line_gizmo() -> bool {
        true
    }
}

impl Default for GizmoConfig {
    fn default() -> Self {
        Self {
            axis_length: Self::default_axis_length(),
            handle_offset: Self::default_handle_offset(),
            drag_speed: Self::default_drag_speed(),
            width: Self::default_width(),
            hover_width: Self::default_hover_width(),
            area_axes: GizmoMode::default(),
            line_gizmo: Self::default_line_gizmo(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DrawingConfig {
    /// 长按结束绘制的判定时长（毫秒）。
    #[serde(default = "DrawingConfig::default_long_press_ms")]
    pub long_press_ms: u64,
}

impl DrawingConfig {
    fn default_long_press_ms() -> u64 {
        1500
    }
}

impl Default for DrawingConfig {
    fn default() -> Self {
        Self {
            long_press_ms: Self::default_long_press_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtrusionConfig {
    #[serde(default = "ExtrusionConfig::default_arrow_length")]
    pub arrow_length: f64,
    #[serde(default = "ExtrusionConfig::default_width")]
    pub width: f64,
    #[serde(default = "ExtrusionConfig::default_hover_width")]
    pub hover_width: f64,
}

impl ExtrusionConfig {
    fn default_arrow_length() -> f64 {
        20.0
    }

    fn default_width() -> f64 {
        4.0
    }

    fn default_hover_width() -> f64 {
        8.0
    }
}

impl Default for ExtrusionConfig {
    fn default() -> Self {
        Self {
            arrow_length: Self::default_arrow_length(),
            width: Self::default_width(),
            hover_width: Self::default_hover_width(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectionConfig {
    /// 投影面相对地形抬升的高度（米）。
    #[serde(default = "ProjectionConfig::default_height_offset")]
    pub height_offset: f64,
    #[serde(default = "ProjectionConfig::default_grid_cell_size")]
    pub grid_cell_size: f64,
    #[serde(default = "ProjectionConfig::default_max_grid_cells")]
    pub max_grid_cells: usize,
    #[serde(default = "ProjectionConfig::default_measure_surface")]
    pub measure_surface_on_close: bool,
}

impl ProjectionConfig {
    fn default_height_offset() -> f64 {
        20.0
    }

    fn default_grid_cell_size() -> f64 {
        10.0
    }

    fn default_max_grid_cells() -> usize {
        2500
    }

    fn default_measure_surface() -> bool {
        true
    }
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            height_offset: Self::default_height_offset(),
            grid_cell_size: Self::default_grid_cell_size(),
            max_grid_cells: Self::default_max_grid_cells(),
            measure_surface_on_close: Self::default_measure_surface(),
        }
    }
}

/// 无界面演示使用的相机与视口参数。
#[derive(Debug, Clone, Deserialize)]
pub struct DemoConfig {
    #[serde(default = "DemoConfig::default_longitude")]
    pub origin_longitude: f64,
    #[serde(default = "DemoConfig::default_latitude")]
    pub origin_latitude: f64,
    #[serde(default = "DemoConfig::default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "DemoConfig::default_viewport_height")]
    pub viewport_height: u32,
    #[serde(default = "DemoConfig::default_camera_range")]
    pub camera_range: f64,
}

impl DemoConfig {
    fn default_longitude() -> f64 {
        -123.102943
    }

    fn default_latitude() -> f64 {
        49.271094
    }

    fn default_viewport_width() -> u32 {
        1280
    }

    fn default_viewport_height() -> u32 {
        720
    }

    fn default_camera_range() -> f64 {
        400.0
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            origin_longitude: Self::default_longitude(),
            origin_latitude: Self::default_latitude(),
            viewport_width: Self::default_viewport_width(),
            viewport_height: Self::default_viewport_height(),
            camera_range: Self::default_camera_range(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}
