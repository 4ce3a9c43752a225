//! 编辑器与渲染场景之间的窄接口。
//!
//! 编辑器只通过这里的 trait 访问拾取、相机与图元，不依赖具体渲染引擎。

use std::future::Future;

use geodraw_core::geometry::{Cartographic, OrientedBox, Ray};
use glam::DVec3;
use thiserror::Error;

/// 屏幕像素坐标，原点在左上角。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    #[inline]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn distance(self, other: ScreenPoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// 渲染图元句柄，由后端分配。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderHandle(u64);

impl RenderHandle {
    #[inline]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const RED: Color = Color::rgb(1.0, 0.0, 0.0);
    pub const GREEN: Color = Color::rgb(0.0, 0.5, 0.0);
    pub const BLUE: Color = Color::rgb(0.0, 0.0, 1.0);
    pub const YELLOW: Color = Color::rgb(1.0, 1.0, 0.0);
    pub const ORANGE: Color = Color::rgb(1.0, 0.647, 0.0);
    pub const CYAN: Color = Color::rgb(0.0, 1.0, 1.0);
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);

    #[inline]
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    #[inline]
    pub const fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointGraphics {
    pub position: DVec3,
    pub color: Color,
    pub pixel_size: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolylineGraphics {
    pub positions: Vec<DVec3>,
    pub color: Color,
    pub width: f64,
    /// 末端绘制箭头。
    pub arrow: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolygonGraphics {
    pub positions: Vec<DVec3>,
    pub color: Color,
    /// 相对多边形的拉伸高度，0 表示平面。
    pub extrusion: f64,
    /// 为 `true` 时按各顶点自身高度绘制，否则贴地。
    pub per_position_height: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelGraphics {
    pub position: DVec3,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Graphics {
    Point(PointGraphics),
    Polyline(PolylineGraphics),
    Polygon(PolygonGraphics),
    Label(LabelGraphics),
}

/// 可拾取的建筑要素几何。
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureGeometry {
    Box(OrientedBox),
    Mesh(Vec<[DVec3; 3]>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PickHit {
    Entity(RenderHandle),
    Feature(FeatureGeometry),
}

/// 相机交互开关。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationFlags {
    pub rotate: bool,
    pub translate: bool,
    pub zoom: bool,
    pub tilt: bool,
    pub look: bool,
}

impl NavigationFlags {
    pub const ENABLED: NavigationFlags = NavigationFlags {
        rotate: true,
        translate: true,
        zoom: true,
        tilt: true,
        look: true,
    };

    pub const DISABLED: NavigationFlags = NavigationFlags {
        rotate: false,
        translate: false,
        zoom: false,
        tilt: false,
        look: false,
    };
}

impl Default for NavigationFlags {
    fn default() -> Self {
        Self::ENABLED
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub position: DVec3,
    pub direction: DVec3,
    pub up: DVec3,
}

/// 渲染场景协作方。
pub trait SceneBackend {
    /// 像素处最上层的可拾取对象。
    fn pick(&self, point: ScreenPoint) -> Option<PickHit>;

    fn pick_ray(&self, point: ScreenPoint) -> Option<Ray>;

    /// 射线与地形/模型求交，失败时回退到椭球面。
    fn resolve_ground_position(&self, point: ScreenPoint) -> Option<DVec3>;

    fn camera(&self) -> CameraPose;

    fn navigation(&self) -> NavigationFlags;

    fn set_navigation(&mut self, flags: NavigationFlags);

    fn add_graphics(&mut self, graphics: Graphics) -> RenderHandle;

    /// 替换已有图元的属性；句柄不存在时返回 `false`。
    fn update_graphics(&mut self, handle: RenderHandle, graphics: Graphics) -> bool;

    fn remove_graphics(&mut self, handle: RenderHandle) -> bool;
}

#[derive(Debug, Error)]
pub enum TerrainError {
    #[error("地形采样失败: {0}")]
    Unavailable(String),
    #[error("采样结果数量不匹配: 期望 {expected}, 实际 {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// 批量地形高度查询，可能失败。
pub trait TerrainSampler {
    fn sample_heights(
        &self,
        points: Vec<Cartographic>,
    ) -> impl Future<Output = Result<Vec<Cartographic>, TerrainError>>;
}
