//! 无渲染窗口的场景实现：针孔相机从西南方向斜视一块平坦地面，拾取在屏幕空间完成。
//!
//! 测试与命令行演示都通过它驱动编辑器。

use std::collections::BTreeMap;
use std::future::{Future, ready};

use geodraw_config::DemoConfig;
use geodraw_core::geometry::{
    Cartographic, Ellipsoid, LocalFrame, OrientedBox, Plane, Ray, point_in_polygon, ray_plane,
};
use glam::{DVec2, DVec3};

use crate::backend::{
    CameraPose, FeatureGeometry, Graphics, NavigationFlags, PickHit, RenderHandle, SceneBackend,
    ScreenPoint, TerrainError, TerrainSampler,
};

/// 点与线的拾取容差（像素）。
pub const PICK_TOLERANCE: f64 = 6.0;

const VERTICAL_FOV_DEGREES: f64 = 60.0;
const CAMERA_PITCH_DEGREES: f64 = 60.0;

#[derive(Debug, Clone, Copy)]
struct PinholeCamera {
    position: DVec3,
    direction: DVec3,
    up: DVec3,
    right: DVec3,
    focal_length: f64,
    width: f64,
    height: f64,
}

impl PinholeCamera {
    /// 位于 `frame` 原点西南方向上空，视线指向原点。
    fn looking_at(frame: &LocalFrame, range: f64, width: f64, height: f64) -> Self {
        let pitch = CAMERA_PITCH_DEGREES.to_radians();
        let horizontal = range * pitch.cos() * std::f64::consts::FRAC_1_SQRT_2;
        let position = frame.to_world(DVec3::new(-horizontal, -horizontal, range * pitch.sin()));
        let direction = (frame.origin - position).normalize();
        let right = direction.cross(frame.up).normalize();
        let up = right.cross(direction);
        let focal_length = (height * 0.5) / (VERTICAL_FOV_DEGREES.to_radians() * 0.5).tan();
        Self {
            position,
            direction,
            up,
            right,
            focal_length,
            width,
            height,
        }
    }

    fn project(&self, world: DVec3) -> Option<ScreenPoint> {
        let v = world - self.position;
        let depth = v.dot(self.direction);
        if depth <= 1e-6 {
            return None;
        }
        Some(ScreenPoint::new(
            self.width * 0.5 + self.focal_length * v.dot(self.right) / depth,
            self.height * 0.5 - self.focal_length * v.dot(self.up) / depth,
        ))
    }

    fn ray(&self, point: ScreenPoint) -> Ray {
        let direction = self.direction * self.focal_length
            + self.right * (point.x - self.width * 0.5)
            - self.up * (point.y - self.height * 0.5);
        Ray::new(self.position, direction)
    }
}

#[derive(Debug, Clone)]
pub struct HeadlessScene {
    ellipsoid: Ellipsoid,
    frame: LocalFrame,
    ground: Plane,
    camera: PinholeCamera,
    navigation: NavigationFlags,
    graphics: BTreeMap<RenderHandle, Graphics>,
    features: Vec<FeatureGeometry>,
    next_handle: u64,
}

impl HeadlessScene {
    pub fn new(origin: Cartographic, range: f64, width: u32, height: u32) -> Self {
        let ellipsoid = Ellipsoid::wgs84();
        let frame = ellipsoid.east_north_up(ellipsoid.cartographic_to_cartesian(origin));
        Self {
            ellipsoid,
            frame,
            ground: Plane::from_point_normal(frame.origin, frame.up),
            camera: PinholeCamera::looking_at(&frame, range, f64::from(width), f64::from(height)),
            navigation: NavigationFlags::ENABLED,
            graphics: BTreeMap::new(),
            features: Vec::new(),
            next_handle: 1,
        }
    }

    pub fn from_demo(config: &DemoConfig) -> Self {
        Self::new(
            Cartographic::from_degrees(config.origin_longitude, config.origin_latitude, 0.0),
            config.camera_range,
            config.viewport_width,
            config.viewport_height,
        )
    }

    #[inline]
    pub fn ellipsoid(&self) -> &Ellipsoid {
        &self.ellipsoid
    }

    /// 以场景原点为中心的东-北-天坐标系。
    #[inline]
    pub fn frame(&self) -> &LocalFrame {
        &self.frame
    }

    /// 原点以东 `east`、以北 `north` 米处的地面点。
    #[inline]
    pub fn ground_point(&self, east: f64, north: f64) -> DVec3 {
        self.frame.to_world(DVec3::new(east, north, 0.0))
    }

    #[inline]
    pub fn world_to_screen(&self, world: DVec3) -> Option<ScreenPoint> {
        self.camera.project(world)
    }

    #[inline]
    pub fn screen_of_ground(&self, east: f64, north: f64) -> Option<ScreenPoint> {
        self.world_to_screen(self.ground_point(east, north))
    }

    /// 注册可拾取的建筑要素。
    pub fn add_feature(&mut self, feature: FeatureGeometry) {
        self.features.push(feature);
    }

    /// 以局部坐标描述的长方体建筑，底面贴地。
    pub fn add_building(&mut self, east: f64, north: f64, half_width: f64, half_depth: f64, height: f64) {
        let center = self.frame.to_world(DVec3::new(east, north, height * 0.5));
        let half_axes = glam::DMat3::from_cols(
            self.frame.east * half_width,
            self.frame.north * half_depth,
            self.frame.up * (height * 0.5),
        );
        self.add_feature(FeatureGeometry::Box(OrientedBox::new(center, half_axes)));
    }

    #[inline]
    pub fn graphics(&self, handle: RenderHandle) -> Option<&Graphics> {
        self.graphics.get(&handle)
    }

    pub fn iter_graphics(&self) -> impl Iterator<Item = (RenderHandle, &Graphics)> {
        self.graphics.iter().map(|(handle, graphics)| (*handle, graphics))
    }

    #[inline]
    pub fn graphics_count(&self) -> usize {
        self.graphics.len()
    }

    fn screen_positions(&self, positions: &[DVec3]) -> Option<Vec<DVec2>> {
        positions
            .iter()
            .map(|p| self.world_to_screen(*p).map(|s| DVec2::new(s.x, s.y)))
            .collect()
    }

    fn pick_entity(&self, point: ScreenPoint) -> Option<RenderHandle> {
        let cursor = DVec2::new(point.x, point.y);
        let mut best_point: Option<(f64, RenderHandle)> = None;
        let mut best_line: Option<(f64, RenderHandle)> = None;
        let mut top_polygon: Option<RenderHandle> = None;

        for (handle, graphics) in &self.graphics {
            match graphics {
                Graphics::Point(p) => {
                    let Some(screen) = self.world_to_screen(p.position) else {
                        continue;
                    };
                    let distance = screen.distance(point);
                    if distance <= PICK_TOLERANCE.max(p.pixel_size * 0.5)
                        && best_point.is_none_or(|(d, _)| distance < d)
                    {
                        best_point = Some((distance, *handle));
                    }
                }
                Graphics::Polyline(line) => {
                    let Some(screen) = self.screen_positions(&line.positions) else {
                        continue;
                    };
                    let tolerance = (line.width * 0.5).max(PICK_TOLERANCE * 0.5);
                    for segment in screen.windows(2) {
                        let distance = segment_distance(cursor, segment[0], segment[1]);
                        if distance <= tolerance && best_line.is_none_or(|(d, _)| distance < d) {
                            best_line = Some((distance, *handle));
                        }
                    }
                }
                Graphics::Polygon(polygon) => {
                    let Some(screen) = self.screen_positions(&polygon.positions) else {
                        continue;
                    };
                    if point_in_polygon(cursor, &screen) {
                        // 句柄递增，后添加的多边形在上层
                        top_polygon = Some(*handle);
                    }
                }
                Graphics::Label(_) => {}
            }
        }

        best_point
            .or(best_line)
            .map(|(_, handle)| handle)
            .or(top_polygon)
    }

    fn pick_feature(&self, point: ScreenPoint) -> Option<FeatureGeometry> {
        let ray = self.camera.ray(point);
        self.features
            .iter()
            .filter_map(|feature| ray_feature_distance(&ray, feature).map(|t| (t, feature)))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, feature)| feature.clone())
    }
}

impl Default for HeadlessScene {
    fn default() -> Self {
        Self::from_demo(&DemoConfig::default())
    }
}

impl SceneBackend for HeadlessScene {
    fn pick(&self, point: ScreenPoint) -> Option<PickHit> {
        self.pick_entity(point)
            .map(PickHit::Entity)
            .or_else(|| self.pick_feature(point).map(PickHit::Feature))
    }

    fn pick_ray(&self, point: ScreenPoint) -> Option<Ray> {
        Some(self.camera.ray(point))
    }

    fn resolve_ground_position(&self, point: ScreenPoint) -> Option<DVec3> {
        ray_plane(&self.camera.ray(point), &self.ground)
    }

    fn camera(&self) -> CameraPose {
        CameraPose {
            position: self.camera.position,
            direction: self.camera.direction,
            up: self.camera.up,
        }
    }

    fn navigation(&self) -> NavigationFlags {
        self.navigation
    }

    fn set_navigation(&mut self, flags: NavigationFlags) {
        self.navigation = flags;
    }

    fn add_graphics(&mut self, graphics: Graphics) -> RenderHandle {
        let handle = RenderHandle::new(self.next_handle);
        self.next_handle += 1;
        self.graphics.insert(handle, graphics);
        handle
    }

    fn update_graphics(&mut self, handle: RenderHandle, graphics: Graphics) -> bool {
        match self.graphics.get_mut(&handle) {
            Some(slot) => {
                *slot = graphics;
                true
            }
            None => false,
        }
    }

    fn remove_graphics(&mut self, handle: RenderHandle) -> bool {
        self.graphics.remove(&handle).is_some()
    }
}

fn segment_distance(p: DVec2, a: DVec2, b: DVec2) -> f64 {
    let ab = b - a;
    let len2 = ab.length_squared();
    if len2 <= f64::EPSILON {
        return p.distance(a);
    }
    let t = ((p - a).dot(ab) / len2).clamp(0.0, 1.0);
    p.distance(a + ab * t)
}

fn ray_feature_distance(ray: &Ray, feature: &FeatureGeometry) -> Option<f64> {
    match feature {
        FeatureGeometry::Box(obb) => ray_box_distance(ray, obb),
        FeatureGeometry::Mesh(triangles) => triangles
            .iter()
            .filter_map(|tri| ray_triangle_distance(ray, tri))
            .min_by(|a, b| a.total_cmp(b)),
    }
}

/// 射线与定向包围盒的分离轴（slab）求交。
fn ray_box_distance(ray: &Ray, obb: &OrientedBox) -> Option<f64> {
    let mut t_min = f64::MIN;
    let mut t_max = f64::MAX;
    let offset = obb.center - ray.origin;
    for axis in [obb.half_axes.x_axis, obb.half_axes.y_axis, obb.half_axes.z_axis] {
        let half = axis.length();
        if half <= f64::EPSILON {
            continue;
        }
        let normal = axis / half;
        let e = normal.dot(offset);
        let f = normal.dot(ray.direction);
        if f.abs() > 1e-12 {
            let mut t1 = (e + half) / f;
            let mut t2 = (e - half) / f;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            t_min = t_min.max(t1);
            t_max = t_max.min(t2);
            if t_min > t_max || t_max < 0.0 {
                return None;
            }
        } else if -e - half > 0.0 || -e + half < 0.0 {
            return None;
        }
    }
    Some(if t_min > 0.0 { t_min } else { t_max })
}

/// Möller–Trumbore 射线三角形求交。
fn ray_triangle_distance(ray: &Ray, triangle: &[DVec3; 3]) -> Option<f64> {
    let edge1 = triangle[1] - triangle[0];
    let edge2 = triangle[2] - triangle[0];
    let p = ray.direction.cross(edge2);
    let det = edge1.dot(p);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv = 1.0 / det;
    let s = ray.origin - triangle[0];
    let u = s.dot(p) * inv;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(edge1);
    let v = ray.direction.dot(q) * inv;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = edge2.dot(q) * inv;
    (t > 0.0).then_some(t)
}

/// 由平面高度模型回答采样请求的地形：`base + grade_east * e + grade_north * n`。
#[derive(Debug, Clone)]
pub struct SyntheticTerrain {
    ellipsoid: Ellipsoid,
    frame: LocalFrame,
    base_height: f64,
    grade_east: f64,
    grade_north: f64,
    failing: bool,
}

impl SyntheticTerrain {
    pub fn flat(frame: LocalFrame, base_height: f64) -> Self {
        Self::sloped(frame, base_height, 0.0, 0.0)
    }

    pub fn sloped(frame: LocalFrame, base_height: f64, grade_east: f64, grade_north: f64) -> Self {
        Self {
            ellipsoid: Ellipsoid::wgs84(),
            frame,
            base_height,
            grade_east,
            grade_north,
            failing: false,
        }
    }

    /// 每次采样都返回错误。
    pub fn failing(frame: LocalFrame) -> Self {
        Self {
            failing: true,
            ..Self::flat(frame, 0.0)
        }
    }

    pub fn height_at(&self, position: Cartographic) -> f64 {
        let surface = self
            .ellipsoid
            .cartographic_to_cartesian(position.with_height(0.0));
        let local = self.frame.to_local(surface);
        self.base_height + self.grade_east * local.x + self.grade_north * local.y
    }
}

impl TerrainSampler for SyntheticTerrain {
    fn sample_heights(
        &self,
        points: Vec<Cartographic>,
    ) -> impl Future<Output = Result<Vec<Cartographic>, TerrainError>> {
        let result = if self.failing {
            Err(TerrainError::Unavailable("synthetic terrain offline".to_string()))
        } else {
            Ok(points
                .into_iter()
                .map(|p| p.with_height(self.height_at(p)))
                .collect())
        };
        ready(result)
    }
}
