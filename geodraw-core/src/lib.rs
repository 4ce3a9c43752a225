pub mod footprint;
pub mod grid;

pub mod geometry {
    use glam::{DMat3, DVec2, DVec3};
    use serde::{Deserialize, Serialize};

    /// 面积低于该阈值的多边形视为退化。
    pub const DEGENERATE_AREA: f64 = 1e-12;

    const CENTER_TOLERANCE_SQUARED: f64 = 0.1;
    const SURFACE_EPSILON: f64 = 1e-12;
    const MAX_SURFACE_ITERATIONS: usize = 64;

    /// 大地坐标：经纬度以弧度表示，高度为椭球高（米）。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Cartographic {
        pub longitude: f64,
        pub latitude: f64,
        pub height: f64,
    }

    impl Cartographic {
        #[inline]
        pub fn new(longitude: f64, latitude: f64, height: f64) -> Self {
            Self {
                longitude,
                latitude,
                height,
            }
        }

        #[inline]
        pub fn from_degrees(longitude: f64, latitude: f64, height: f64) -> Self {
            Self::new(longitude.to_radians(), latitude.to_radians(), height)
        }

        #[inline]
        pub fn with_height(self, height: f64) -> Self {
            Self { height, ..self }
        }
    }

    /// 旋转椭球，默认使用 WGS84 参数。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Ellipsoid {
        radii: DVec3,
        radii_squared: DVec3,
        one_over_radii_squared: DVec3,
    }

    impl Ellipsoid {
        pub fn new(radii: DVec3) -> Self {
            let radii_squared = radii * radii;
            Self {
                radii,
                radii_squared,
                one_over_radii_squared: radii_squared.recip(),
            }
        }

        #[inline]
        pub fn wgs84() -> Self {
            Self::new(DVec3::new(6_378_137.0, 6_378_137.0, 6_356_752.314_245_179))
        }

        #[inline]
        pub fn radii(&self) -> DVec3 {
            self.radii
        }

        /// 椭球面在 `position` 处的外法向。
        #[inline]
        pub fn geodetic_surface_normal(&self, position: DVec3) -> DVec3 {
            (position * self.one_over_radii_squared).normalize_or_zero()
        }

        #[inline]
        pub fn geodetic_surface_normal_cartographic(&self, cartographic: Cartographic) -> DVec3 {
            let cos_lat = cartographic.latitude.cos();
            DVec3::new(
                cos_lat * cartographic.longitude.cos(),
                cos_lat * cartographic.longitude.sin(),
                cartographic.latitude.sin(),
            )
            .normalize_or_zero()
        }

        pub fn cartographic_to_cartesian(&self, cartographic: Cartographic) -> DVec3 {
            let normal = self.geodetic_surface_normal_cartographic(cartographic);
            let k = self.radii_squared * normal;
            let gamma = normal.dot(k).sqrt();
            k / gamma + normal * cartographic.height
        }

        /// 将三维点转换为大地坐标；位于椭球中心附近时无解。
        pub fn cartesian_to_cartographic(&self, position: DVec3) -> Option<Cartographic> {
            let surface = self.scale_to_geodetic_surface(position)?;
            let normal = self.geodetic_surface_normal(surface);
            let offset = position - surface;
            let longitude = normal.y.atan2(normal.x);
            let latitude = normal.z.clamp(-1.0, 1.0).asin();
            let height = offset.dot(position).signum() * offset.length();
            Some(Cartographic::new(longitude, latitude, height))
        }

        /// 沿大地法向把点投影到椭球面（牛顿迭代）。
        pub fn scale_to_geodetic_surface(&self, position: DVec3) -> Option<DVec3> {
            let inv = self.one_over_radii_squared;
            let x2 = position.x * position.x * inv.x;
            let y2 = position.y * position.y * inv.y;
            let z2 = position.z * position.z * inv.z;

            let squared_norm = x2 + y2 + z2;
            let ratio = (1.0 / squared_norm).sqrt();
            let intersection = position * ratio;

            if squared_norm < CENTER_TOLERANCE_SQUARED {
                return ratio.is_finite().then_some(intersection);
            }

            let gradient = intersection * inv * 2.0;
            let mut lambda = (1.0 - ratio) * position.length() / (0.5 * gradient.length());
            let mut correction = 0.0;
            let mut multiplier = DVec3::ONE;

            for _ in 0..MAX_SURFACE_ITERATIONS {
                lambda -= correction;
                multiplier = DVec3::new(
                    1.0 / (1.0 + lambda * inv.x),
                    1.0 / (1.0 + lambda * inv.y),
                    1.0 / (1.0 + lambda * inv.z),
                );
                let m2 = multiplier * multiplier;
                let m3 = m2 * multiplier;
                let func = x2 * m2.x + y2 * m2.y + z2 * m2.z - 1.0;
                if func.abs() <= SURFACE_EPSILON {
                    break;
                }
                let denominator = x2 * m3.x * inv.x + y2 * m3.y * inv.y + z2 * m3.z * inv.z;
                let derivative = -2.0 * denominator;
                correction = func / derivative;
            }

            let scaled = position * multiplier;
            scaled.is_finite().then_some(scaled)
        }

        /// 沿地心方向把点缩放到椭球面。
        pub fn scale_to_geocentric_surface(&self, position: DVec3) -> Option<DVec3> {
            let beta = 1.0 / (position * position * self.one_over_radii_squared).element_sum().sqrt();
            beta.is_finite().then(|| position * beta)
        }

        /// 在 `origin` 处构建东-北-天局部坐标系。
        pub fn east_north_up(&self, origin: DVec3) -> LocalFrame {
            let up = self.geodetic_surface_normal(origin);
            let mut east = DVec3::new(-origin.y, origin.x, 0.0).normalize_or_zero();
            if east == DVec3::ZERO {
                // 极点处经度无定义，取固定东向。
                east = DVec3::Y;
            }
            let north = up.cross(east);
            LocalFrame {
                origin,
                east,
                north,
                up,
            }
        }
    }

    impl Default for Ellipsoid {
        fn default() -> Self {
            Self::wgs84()
        }
    }

    /// 局部正交坐标系（东、北、天）。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct LocalFrame {
        pub origin: DVec3,
        pub east: DVec3,
        pub north: DVec3,
        pub up: DVec3,
    }

    impl LocalFrame {
        #[inline]
        pub fn rotation(&self) -> DMat3 {
            DMat3::from_cols(self.east, self.north, self.up)
        }

        #[inline]
        pub fn to_local(&self, world: DVec3) -> DVec3 {
            let diff = world - self.origin;
            DVec3::new(diff.dot(self.east), diff.dot(self.north), diff.dot(self.up))
        }

        #[inline]
        pub fn to_world(&self, local: DVec3) -> DVec3 {
            self.origin + self.rotation() * local
        }
    }

    /// 射线，方向始终为单位向量。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Ray {
        pub origin: DVec3,
        pub direction: DVec3,
    }

    impl Ray {
        #[inline]
        pub fn new(origin: DVec3, direction: DVec3) -> Self {
            Self {
                origin,
                direction: direction.normalize_or_zero(),
            }
        }

        #[inline]
        pub fn point_at(&self, t: f64) -> DVec3 {
            self.origin + self.direction * t
        }
    }

    /// Hesse 形式的平面：`normal · p + distance = 0`。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Plane {
        pub normal: DVec3,
        pub distance: f64,
    }

    impl Plane {
        #[inline]
        pub fn from_point_normal(point: DVec3, normal: DVec3) -> Self {
            let normal = normal.normalize_or_zero();
            Self {
                normal,
                distance: -normal.dot(point),
            }
        }

        #[inline]
        pub fn signed_distance(&self, point: DVec3) -> f64 {
            self.normal.dot(point) + self.distance
        }
    }

    /// 射线与平面求交；平行或交点在射线后方时返回 `None`。
    pub fn ray_plane(ray: &Ray, plane: &Plane) -> Option<DVec3> {
        let denominator = plane.normal.dot(ray.direction);
        if denominator.abs() < 1e-15 {
            return None;
        }
        let t = (-plane.distance - plane.normal.dot(ray.origin)) / denominator;
        if t < 0.0 {
            return None;
        }
        Some(ray.point_at(t))
    }

    /// 定向包围盒，`half_axes` 的三列为半轴向量。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct OrientedBox {
        pub center: DVec3,
        pub half_axes: DMat3,
    }

    impl OrientedBox {
        #[inline]
        pub fn new(center: DVec3, half_axes: DMat3) -> Self {
            Self { center, half_axes }
        }

        pub fn corners(&self) -> [DVec3; 8] {
            let u = self.half_axes.x_axis;
            let v = self.half_axes.y_axis;
            let w = self.half_axes.z_axis;
            let c = self.center;
            [
                c - u - v - w,
                c + u - v - w,
                c + u + v - w,
                c - u + v - w,
                c - u - v + w,
                c + u - v + w,
                c + u + v + w,
                c - u + v + w,
            ]
        }
    }

    /// 多边形的面积与质心。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct AreaMeasure {
        pub area: f64,
        pub centroid: DVec3,
    }

    /// 由若干点拟合的切平面，原点位于点集包围盒中心在椭球面上的投影。
    #[derive(Debug, Clone, Copy)]
    pub struct TangentPlane {
        ellipsoid: Ellipsoid,
        origin: DVec3,
        x_axis: DVec3,
        y_axis: DVec3,
        plane: Plane,
    }

    impl TangentPlane {
        pub fn from_points(points: &[DVec3], ellipsoid: &Ellipsoid) -> Option<Self> {
            let first = points.first()?;
            let (min, max) = points
                .iter()
                .fold((*first, *first), |(min, max), p| (min.min(*p), max.max(*p)));
            let center = (min + max) * 0.5;
            let origin = ellipsoid.scale_to_geodetic_surface(center)?;
            let frame = ellipsoid.east_north_up(origin);
            Some(Self {
                ellipsoid: *ellipsoid,
                origin,
                x_axis: frame.east,
                y_axis: frame.north,
                plane: Plane::from_point_normal(origin, frame.up),
            })
        }

        #[inline]
        pub fn origin(&self) -> DVec3 {
            self.origin
        }

        /// 沿地心射线把点投影到切平面，返回平面内二维坐标。
        pub fn project_point(&self, point: DVec3) -> Option<DVec2> {
            let mut ray = Ray::new(point, point);
            let hit = ray_plane(&ray, &self.plane).or_else(|| {
                ray.direction = -ray.direction;
                ray_plane(&ray, &self.plane)
            })?;
            let diff = hit - self.origin;
            Some(DVec2::new(self.x_axis.dot(diff), self.y_axis.dot(diff)))
        }

        #[inline]
        pub fn plane_point(&self, point: DVec2) -> DVec3 {
            self.origin + self.x_axis * point.x + self.y_axis * point.y
        }

        /// 把平面内二维坐标抬回椭球面。
        pub fn lift_to_ellipsoid(&self, point: DVec2) -> Option<DVec3> {
            self.ellipsoid
                .scale_to_geocentric_surface(self.plane_point(point))
        }
    }

    /// 平面多边形（隐式闭合）的面积与质心；面积为零时返回 `None`。
    pub fn polygon_area_centroid(points: &[DVec2]) -> Option<(f64, DVec2)> {
        if points.len() < 3 {
            return None;
        }
        let mut signed_area = 0.0;
        let mut cx = 0.0;
        let mut cy = 0.0;
        let mut j = points.len() - 1;
        for i in 0..points.len() {
            let p0 = points[j];
            let p1 = points[i];
            let f = p0.x * p1.y - p1.x * p0.y;
            signed_area += f;
            cx += (p0.x + p1.x) * f;
            cy += (p0.y + p1.y) * f;
            j = i;
        }
        signed_area *= 0.5;
        if signed_area.abs() <= DEGENERATE_AREA {
            return None;
        }
        let factor = 1.0 / (6.0 * signed_area);
        Some((signed_area.abs(), DVec2::new(cx * factor, cy * factor)))
    }

    /// 在局部切平面上计算面积与质心，质心置于顶点平均高度。
    pub fn compute_area_and_centroid(
        positions: &[DVec3],
        ellipsoid: &Ellipsoid,
    ) -> Option<AreaMeasure> {
        if positions.len() < 3 {
            return None;
        }
        let plane = TangentPlane::from_points(positions, ellipsoid)?;
        let projected: Vec<DVec2> = positions
            .iter()
            .filter_map(|p| plane.project_point(*p))
            .collect();
        let (area, centroid_2d) = polygon_area_centroid(&projected)?;
        let on_surface = plane.lift_to_ellipsoid(centroid_2d)?;

        let heights: Vec<f64> = positions
            .iter()
            .filter_map(|p| ellipsoid.cartesian_to_cartographic(*p))
            .map(|c| c.height)
            .collect();
        let centroid = match ellipsoid.cartesian_to_cartographic(on_surface) {
            Some(carto) if !heights.is_empty() => {
                let mean = heights.iter().sum::<f64>() / heights.len() as f64;
                ellipsoid.cartographic_to_cartesian(carto.with_height(mean))
            }
            _ => on_surface,
        };
        Some(AreaMeasure { area, centroid })
    }

    /// 以第一个顶点为扇心三角化，累加三维面积并按面积加权求质心。
    ///
    /// 三角形面积按其法向与多边形整体法向（Newell 法）的朝向取符号，
    /// 凹多边形跨过凹口的扇形会被抵消。
    pub fn surface_area_and_centroid(positions: &[DVec3]) -> Option<AreaMeasure> {
        if positions.len() < 3 {
            return None;
        }
        let normal = newell_normal(positions).try_normalize()?;
        let base = positions[0];
        let mut signed_area = 0.0;
        let mut weighted = DVec3::ZERO;
        for pair in positions[1..].windows(2) {
            let (b, c) = (pair[0], pair[1]);
            let cross = (b - base).cross(c - base);
            let tri_area = cross.length() * 0.5 * cross.dot(normal).signum();
            signed_area += tri_area;
            weighted += (base + b + c) / 3.0 * tri_area;
        }
        if signed_area.abs() <= DEGENERATE_AREA {
            return None;
        }
        Some(AreaMeasure {
            area: signed_area.abs(),
            centroid: weighted / signed_area,
        })
    }

    /// 各边叉积之和，方向即多边形的整体法向。以首顶点为原点以免地心坐标相消。
    fn newell_normal(positions: &[DVec3]) -> DVec3 {
        let origin = positions[0];
        positions
            .iter()
            .zip(positions.iter().cycle().skip(1))
            .fold(DVec3::ZERO, |normal, (a, b)| normal + (*a - origin).cross(*b - origin))
    }

    /// 射线奇偶法判断点是否在多边形内。
    pub fn point_in_polygon(point: DVec2, polygon: &[DVec2]) -> bool {
        if polygon.len() < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = polygon.len() - 1;
        for i in 0..polygon.len() {
            let pi = polygon[i];
            let pj = polygon[j];
            if (pi.y > point.y) != (pj.y > point.y)
                && point.x < (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

}

pub mod document {
    use std::collections::{BTreeMap, BTreeSet};

    use glam::DVec3;
    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    use crate::geometry::{AreaMeasure, Ellipsoid, compute_area_and_centroid};

    /// 默认吸附半径（米）。
    pub const DEFAULT_SNAP_RADIUS: f64 = 1.0;

    macro_rules! entity_id {
        ($(#[$meta:meta])* $name:ident) => {
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            pub struct $name(u64);

            impl $name {
                #[inline]
                pub fn new(raw: u64) -> Self {
                    Self(raw)
                }

                /// 提供原始数值，便于序列化或日志输出。
                #[inline]
                pub fn get(self) -> u64 {
                    self.0
                }
            }
        };
    }

    entity_id!(
        /// 锚点标识。
        AnchorId
    );
    entity_id!(
        /// 线段标识。
        LineId
    );
    entity_id!(
        /// 面标识。
        AreaId
    );

    #[derive(Debug, Error, PartialEq, Eq)]
    pub enum DocumentError {
        #[error("锚点 {0} 不存在")]
        UnknownAnchor(u64),
        #[error("线段两端为同一锚点 {0}")]
        DegenerateLine(u64),
        #[error("连接关系不一致: {0}")]
        Inconsistent(String),
    }

    /// 锚点只保存反向引用，不拥有线段。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Anchor {
        position: DVec3,
        connected_lines: BTreeSet<LineId>,
    }

    impl Anchor {
        #[inline]
        pub fn position(&self) -> DVec3 {
            self.position
        }

        #[inline]
        pub fn connected_lines(&self) -> impl Iterator<Item = LineId> + '_ {
            self.connected_lines.iter().copied()
        }

        #[inline]
        pub fn connection_count(&self) -> usize {
            self.connected_lines.len()
        }
    }

    #[derive(Debug, Clone, Copy, Serialize, Deserialize)]
    pub struct Line {
        anchors: [AnchorId; 2],
    }

    impl Line {
        #[inline]
        pub fn anchors(&self) -> [AnchorId; 2] {
            self.anchors
        }
    }

    /// 闭合多边形。面积与质心总是由同一组顶点一起重算。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Area {
        positions: Vec<DVec3>,
        measure: Option<AreaMeasure>,
        surface: Option<AreaMeasure>,
        extruded_height: f64,
        revision: u64,
    }

    impl Area {
        #[inline]
        pub fn positions(&self) -> &[DVec3] {
            &self.positions
        }

        #[inline]
        pub fn measure(&self) -> Option<AreaMeasure> {
            self.measure
        }

        #[inline]
        pub fn centroid(&self) -> Option<DVec3> {
            self.measure.map(|m| m.centroid)
        }

        /// 基于地形采样后的三维表面量测。
        #[inline]
        pub fn surface_measure(&self) -> Option<AreaMeasure> {
            self.surface
        }

        #[inline]
        pub fn extruded_height(&self) -> f64 {
            self.extruded_height
        }

        /// 顶点每次变化都会递增，用于丢弃过期的异步结果。
        #[inline]
        pub fn revision(&self) -> u64 {
            self.revision
        }

        pub fn label_text(&self) -> Option<String> {
            let measure = self.measure?;
            Some(match self.surface {
                Some(surface) => format!(
                    "{} m² (surface {} m²)",
                    measure.area.round(),
                    surface.area.round()
                ),
                None => format!("{} m²", measure.area.round()),
            })
        }
    }

    /// 一次删除操作实际移除的实体（含级联）。
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct Removal {
        pub lines: Vec<LineId>,
        pub anchors: Vec<AnchorId>,
    }

    impl Removal {
        #[inline]
        pub fn is_empty(&self) -> bool {
            self.lines.is_empty() && self.anchors.is_empty()
        }

        fn merge(&mut self, other: Removal) {
            self.lines.extend(other.lines);
            self.anchors.extend(other.anchors);
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AnchorInsert {
        pub id: AnchorId,
        /// `false` 表示复用了吸附半径内的已有锚点。
        pub created: bool,
    }

    /// 锚点、线段与面的集合，维护锚点与线段之间的双向连接。
    #[derive(Debug, Clone)]
    pub struct Document {
        anchors: BTreeMap<AnchorId, Anchor>,
        lines: BTreeMap<LineId, Line>,
        areas: BTreeMap<AreaId, Area>,
        next_entity_id: u64,
        snap_radius: f64,
        ellipsoid: Ellipsoid,
    }

    impl Document {
        pub fn new() -> Self {
            Self::with_settings(DEFAULT_SNAP_RADIUS, Ellipsoid::wgs84())
        }

        pub fn with_settings(snap_radius: f64, ellipsoid: Ellipsoid) -> Self {
            Self {
                anchors: BTreeMap::new(),
                lines: BTreeMap::new(),
                areas: BTreeMap::new(),
                next_entity_id: 0,
                snap_radius,
                ellipsoid,
            }
        }

        #[inline]
        pub fn snap_radius(&self) -> f64 {
            self.snap_radius
        }

        #[inline]
        pub fn ellipsoid(&self) -> &Ellipsoid {
            &self.ellipsoid
        }

        #[inline]
        pub fn anchor(&self, id: AnchorId) -> Option<&Anchor> {
            self.anchors.get(&id)
        }

        #[inline]
        pub fn line(&self, id: LineId) -> Option<&Line> {
            self.lines.get(&id)
        }

        #[inline]
        pub fn area(&self, id: AreaId) -> Option<&Area> {
            self.areas.get(&id)
        }

        pub fn anchors(&self) -> impl Iterator<Item = (AnchorId, &Anchor)> {
            self.anchors.iter().map(|(id, anchor)| (*id, anchor))
        }

        pub fn lines(&self) -> impl Iterator<Item = (LineId, &Line)> {
            self.lines.iter().map(|(id, line)| (*id, line))
        }

        pub fn areas(&self) -> impl Iterator<Item = (AreaId, &Area)> {
            self.areas.iter().map(|(id, area)| (*id, area))
        }

        /// 吸附半径内距离最近的锚点。
        pub fn find_anchor_near(&self, position: DVec3) -> Option<AnchorId> {
            self.anchors
                .iter()
                .map(|(id, anchor)| (*id, anchor.position.distance(position)))
                .filter(|(_, distance)| *distance < self.snap_radius)
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(id, _)| id)
        }

        /// 若吸附半径内已有锚点则直接复用，否则新建一个无连接的锚点。
        pub fn add_anchor(&mut self, position: DVec3) -> AnchorInsert {
            if let Some(id) = self.find_anchor_near(position) {
                return AnchorInsert { id, created: false };
            }
            let id = AnchorId::new(self.next_id());
            self.anchors.insert(
                id,
                Anchor {
                    position,
                    connected_lines: BTreeSet::new(),
                },
            );
            AnchorInsert { id, created: true }
        }

        pub fn add_line(&mut self, start: AnchorId, end: AnchorId) -> Result<LineId, DocumentError> {
            if start == end {
                return Err(DocumentError::DegenerateLine(start.get()));
            }
            for anchor in [start, end] {
                if !self.anchors.contains_key(&anchor) {
                    return Err(DocumentError::UnknownAnchor(anchor.get()));
                }
            }
            let id = LineId::new(self.next_id());
            self.lines.insert(
                id,
                Line {
                    anchors: [start, end],
                },
            );
            for anchor in [start, end] {
                if let Some(anchor) = self.anchors.get_mut(&anchor) {
                    anchor.connected_lines.insert(id);
                }
            }
            Ok(id)
        }

        pub fn line_positions(&self, id: LineId) -> Option<[DVec3; 2]> {
            let line = self.lines.get(&id)?;
            let start = self.anchors.get(&line.anchors[0])?;
            let end = self.anchors.get(&line.anchors[1])?;
            Some([start.position, end.position])
        }

        /// 删除线段；端点失去最后一条连接时一并删除。
        /// 线段不存在时视为已删除，返回空结果。
        pub fn remove_line(&mut self, id: LineId) -> Removal {
            let mut removal = Removal::default();
            let Some(line) = self.lines.remove(&id) else {
                return removal;
            };
            removal.lines.push(id);
            for anchor_id in line.anchors {
                let orphaned = match self.anchors.get_mut(&anchor_id) {
                    Some(anchor) => {
                        anchor.connected_lines.remove(&id);
                        anchor.connected_lines.is_empty()
                    }
                    None => false,
                };
                if orphaned {
                    self.anchors.remove(&anchor_id);
                    removal.anchors.push(anchor_id);
                }
            }
            removal
        }

        /// 删除锚点及其全部连接线段，级联清理因此失去连接的其他锚点。
        pub fn remove_anchor(&mut self, id: AnchorId) -> Removal {
            let mut removal = Removal::default();
            let Some(anchor) = self.anchors.remove(&id) else {
                return removal;
            };
            removal.anchors.push(id);
            for line in anchor.connected_lines {
                removal.merge(self.remove_line(line));
            }
            removal
        }

        pub fn add_area(&mut self, positions: Vec<DVec3>) -> AreaId {
            let measure = compute_area_and_centroid(&positions, &self.ellipsoid);
            let id = AreaId::new(self.next_id());
            self.areas.insert(
                id,
                Area {
                    positions,
                    measure,
                    surface: None,
                    extruded_height: 0.0,
                    revision: 0,
                },
            );
            id
        }

        pub fn remove_area(&mut self, id: AreaId) -> Option<Area> {
            self.areas.remove(&id)
        }

        /// 平移面的全部顶点并重算量测；旧的地表量测随之失效。
        pub fn translate_area(&mut self, id: AreaId, delta: DVec3) -> bool {
            let ellipsoid = self.ellipsoid;
            let Some(area) = self.areas.get_mut(&id) else {
                return false;
            };
            for position in &mut area.positions {
                *position += delta;
            }
            area.measure = compute_area_and_centroid(&area.positions, &ellipsoid);
            area.surface = None;
            area.revision += 1;
            true
        }

        pub fn set_extruded_height(&mut self, id: AreaId, height: f64) -> bool {
            match self.areas.get_mut(&id) {
                Some(area) => {
                    area.extruded_height = height;
                    true
                }
                None => false,
            }
        }

        pub fn set_surface_measure(&mut self, id: AreaId, surface: Option<AreaMeasure>) -> bool {
            match self.areas.get_mut(&id) {
                Some(area) => {
                    area.surface = surface;
                    true
                }
                None => false,
            }
        }

        /// 平移锚点，返回需要重绘的线段。
        pub fn move_anchor(&mut self, id: AnchorId, delta: DVec3) -> Option<Vec<LineId>> {
            let anchor = self.anchors.get_mut(&id)?;
            anchor.position += delta;
            Some(anchor.connected_lines.iter().copied().collect())
        }

        /// 平移线段两端锚点，共享锚点的其他线段随之变化。
        pub fn translate_line(&mut self, id: LineId, delta: DVec3) -> Option<Vec<LineId>> {
            let anchors = self.lines.get(&id)?.anchors;
            let mut affected = BTreeSet::new();
            for anchor in anchors {
                if let Some(lines) = self.move_anchor(anchor, delta) {
                    affected.extend(lines);
                }
            }
            Some(affected.into_iter().collect())
        }

        /// 无任何连接的锚点（仅在绘制过程中短暂存在）。
        pub fn orphan_anchors(&self) -> Vec<AnchorId> {
            self.anchors
                .iter()
                .filter(|(_, anchor)| anchor.connected_lines.is_empty())
                .map(|(id, _)| *id)
                .collect()
        }

        /// 校验锚点与线段的双向引用是否一致。
        pub fn check_connectivity(&self) -> Result<(), DocumentError> {
            for (line_id, line) in &self.lines {
                for anchor_id in line.anchors {
                    let anchor = self.anchors.get(&anchor_id).ok_or_else(|| {
                        DocumentError::Inconsistent(format!(
                            "线段 {} 引用了不存在的锚点 {}",
                            line_id.get(),
                            anchor_id.get()
                        ))
                    })?;
                    if !anchor.connected_lines.contains(line_id) {
                        return Err(DocumentError::Inconsistent(format!(
                            "锚点 {} 缺少到线段 {} 的反向引用",
                            anchor_id.get(),
                            line_id.get()
                        )));
                    }
                }
            }
            for (anchor_id, anchor) in &self.anchors {
                for line_id in &anchor.connected_lines {
                    let line = self.lines.get(line_id).ok_or_else(|| {
                        DocumentError::Inconsistent(format!(
                            "锚点 {} 引用了不存在的线段 {}",
                            anchor_id.get(),
                            line_id.get()
                        ))
                    })?;
                    if !line.anchors.contains(anchor_id) {
                        return Err(DocumentError::Inconsistent(format!(
                            "线段 {} 未连接锚点 {}",
                            line_id.get(),
                            anchor_id.get()
                        )));
                    }
                }
            }
            Ok(())
        }

        fn next_id(&mut self) -> u64 {
            let id = self.next_entity_id;
            self.next_entity_id += 1;
            id
        }
    }

    impl Default for Document {
        fn default() -> Self {
            Self::new()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn p(x: f64, y: f64) -> DVec3 {
            DVec3::new(x, y, 0.0)
        }

        /// 正方形 a-b-c-d 加一条挂在 c 上的尾巴 c-e。
        fn square_with_tail(doc: &mut Document) -> ([AnchorId; 5], [LineId; 5]) {
            let a = doc.add_anchor(p(0.0, 0.0)).id;
            let b = doc.add_anchor(p(10.0, 0.0)).id;
            let c = doc.add_anchor(p(10.0, 10.0)).id;
            let d = doc.add_anchor(p(0.0, 10.0)).id;
            let e = doc.add_anchor(p(20.0, 20.0)).id;
            let ab = doc.add_line(a, b).unwrap();
            let bc = doc.add_line(b, c).unwrap();
            let cd = doc.add_line(c, d).unwrap();
            let da = doc.add_line(d, a).unwrap();
            let ce = doc.add_line(c, e).unwrap();
            ([a, b, c, d, e], [ab, bc, cd, da, ce])
        }

        #[test]
        fn anchors_within_snap_radius_are_reused() {
            let mut doc = Document::new();
            let first = doc.add_anchor(p(0.0, 0.0));
            assert!(first.created);
            let near = doc.add_anchor(p(0.5, 0.5));
            assert!(!near.created);
            assert_eq!(near.id, first.id);
            let far = doc.add_anchor(p(1.5, 0.0));
            assert!(far.created);
            assert_ne!(far.id, first.id);
            assert_eq!(doc.anchors().count(), 2);
        }

        #[test]
        fn lines_register_back_references() {
            let mut doc = Document::new();
            let a = doc.add_anchor(p(0.0, 0.0)).id;
            let b = doc.add_anchor(p(5.0, 0.0)).id;
            let line = doc.add_line(a, b).unwrap();
            assert_eq!(doc.anchor(a).unwrap().connected_lines().collect::<Vec<_>>(), vec![line]);
            assert_eq!(doc.anchor(b).unwrap().connection_count(), 1);
            assert_eq!(doc.line_positions(line), Some([p(0.0, 0.0), p(5.0, 0.0)]));
            doc.check_connectivity().unwrap();

            assert_eq!(doc.add_line(a, a), Err(DocumentError::DegenerateLine(a.get())));
            let missing = AnchorId::new(999);
            assert_eq!(doc.add_line(a, missing), Err(DocumentError::UnknownAnchor(999)));
        }

        #[test]
        fn removing_a_line_collects_orphaned_anchors() {
            let mut doc = Document::new();
            let ([_, _, c, _, e], [.., ce]) = square_with_tail(&mut doc);
            let removal = doc.remove_line(ce);
            assert_eq!(removal.lines, vec![ce]);
            assert_eq!(removal.anchors, vec![e]);
            assert!(doc.anchor(c).is_some());
            assert_eq!(doc.anchor(c).unwrap().connection_count(), 2);
            doc.check_connectivity().unwrap();

            // 重复删除视为已删除
            assert!(doc.remove_line(ce).is_empty());
        }

        #[test]
        fn removing_an_anchor_cascades() {
            let mut doc = Document::new();
            let ([a, b, c, d, e], [ab, bc, cd, da, ce]) = square_with_tail(&mut doc);
            let removal = doc.remove_anchor(c);

            let mut lines = removal.lines.clone();
            lines.sort();
            assert_eq!(lines, vec![bc, cd, ce]);
            let mut anchors = removal.anchors.clone();
            anchors.sort();
            assert_eq!(anchors, vec![c, e]);

            assert!(doc.line(ab).is_some());
            assert!(doc.line(da).is_some());
            for anchor in [a, b, d] {
                assert!(doc.anchor(anchor).is_some());
            }
            doc.check_connectivity().unwrap();
            assert!(doc.orphan_anchors().is_empty());
        }

        #[test]
        fn removing_every_anchor_leaves_an_empty_graph() {
            let mut doc = Document::new();
            let (anchors, _) = square_with_tail(&mut doc);
            for anchor in anchors {
                doc.remove_anchor(anchor);
                doc.check_connectivity().unwrap();
                assert!(doc.orphan_anchors().is_empty());
            }
            assert_eq!(doc.anchors().count(), 0);
            assert_eq!(doc.lines().count(), 0);
        }

        #[test]
        fn translating_a_line_moves_shared_anchors() {
            let mut doc = Document::new();
            let ([a, b, ..], [ab, bc, _, da, _]) = square_with_tail(&mut doc);
            let affected = doc.translate_line(ab, DVec3::new(0.0, -5.0, 0.0)).unwrap();
            assert_eq!(affected, vec![ab, bc, da]);
            assert_eq!(doc.anchor(a).unwrap().position(), p(0.0, -5.0));
            assert_eq!(doc.anchor(b).unwrap().position(), p(10.0, -5.0));
        }

        #[test]
        fn area_translation_recomputes_measure_and_revision() {
            let mut doc = Document::new();
            let ellipsoid = *doc.ellipsoid();
            let origin = ellipsoid.cartographic_to_cartesian(
                crate::geometry::Cartographic::from_degrees(10.0, 45.0, 0.0),
            );
            let frame = ellipsoid.east_north_up(origin);
            let square: Vec<DVec3> = [(0.0, 0.0), (20.0, 0.0), (20.0, 20.0), (0.0, 20.0)]
                .iter()
                .map(|(e, n)| frame.to_world(DVec3::new(*e, *n, 0.0)))
                .collect();
            let id = doc.add_area(square);
            let area = doc.area(id).unwrap();
            assert!((area.measure().unwrap().area - 400.0).abs() < 0.1);
            assert_eq!(area.label_text().as_deref(), Some("400 m²"));
            assert_eq!(area.revision(), 0);

            doc.set_surface_measure(
                id,
                Some(AreaMeasure {
                    area: 410.0,
                    centroid: origin,
                }),
            );
            assert_eq!(
                doc.area(id).unwrap().label_text().as_deref(),
                Some("400 m² (surface 410 m²)")
            );

            assert!(doc.translate_area(id, frame.east * 5.0));
            let area = doc.area(id).unwrap();
            assert_eq!(area.revision(), 1);
            assert!(area.surface_measure().is_none());
            let centroid = frame.to_local(area.centroid().unwrap());
            assert!((centroid.x - 15.0).abs() < 0.01);
            assert!((centroid.y - 10.0).abs() < 0.01);

            assert!(doc.set_extruded_height(id, 12.0));
            assert_eq!(doc.area(id).unwrap().extruded_height(), 12.0);
            assert!(doc.remove_area(id).is_some());
            assert!(!doc.translate_area(id, DVec3::X));
        }
    }
}
