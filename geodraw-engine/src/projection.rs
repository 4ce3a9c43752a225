//! 地形投影与异步采样请求。
//!
//! 采样请求先进入队列，由宿主取出后交给 [`TerrainSampler`]，结果再交还编辑器应用。
//! 同一个面、同一用途的新请求会顶替旧请求；过期结果直接丢弃。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use geodraw_core::document::AreaId;
use geodraw_core::geometry::{Cartographic, Ellipsoid};
use geodraw_core::grid::GridLayout;
use glam::DVec3;
use tracing::debug;

use crate::backend::{Color, Graphics, PolygonGraphics, TerrainError, TerrainSampler};

pub const PROJECTION_ALPHA: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionKind {
    /// 逐顶点采样，整体作为一个面绘制。
    Drape,
    /// 按网格单元采样，每个单元单独绘制。
    Grid,
}

impl FromStr for ProjectionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drape" => Ok(ProjectionKind::Drape),
            "grid" => Ok(ProjectionKind::Grid),
            other => Err(format!("unknown projection kind `{other}`")),
        }
    }
}

impl fmt::Display for ProjectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectionKind::Drape => f.write_str("drape"),
            ProjectionKind::Grid => f.write_str("grid"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SamplePurpose {
    Drape,
    Grid(GridLayout),
    SurfaceMeasure,
}

impl SamplePurpose {
    /// 贴合与网格共用投影槽位，互相顶替。
    fn slot(&self) -> SampleSlot {
        match self {
            SamplePurpose::Drape | SamplePurpose::Grid(_) => SampleSlot::Projection,
            SamplePurpose::SurfaceMeasure => SampleSlot::Surface,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SampleSlot {
    Projection,
    Surface,
}

/// 一次采样请求的凭据，记录发起时面的几何版本。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleTicket {
    id: u64,
    area: AreaId,
    revision: u64,
}

impl SampleTicket {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn area(&self) -> AreaId {
        self.area
    }

    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[derive(Debug, Clone)]
pub struct SampleRequest {
    pub ticket: SampleTicket,
    pub points: Vec<Cartographic>,
}

/// 采样结果交还编辑器后的处理结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    Applied(AreaId),
    Discarded,
}

/// 已登记、尚未交还的采样。
#[derive(Debug, Clone)]
pub struct PendingSample {
    pub ticket: SampleTicket,
    pub purpose: SamplePurpose,
    /// 采样失败时使用的原始位置。
    pub original: Vec<Cartographic>,
}

#[derive(Debug, Default)]
pub struct SampleQueue {
    next_id: u64,
    pending: HashMap<u64, PendingSample>,
    latest: HashMap<(AreaId, SampleSlot), u64>,
    outbox: Vec<SampleRequest>,
}

impl SampleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记新请求；同一面同一槽位的旧请求作废，若尚未取出则直接撤回。
    pub fn submit(
        &mut self,
        area: AreaId,
        revision: u64,
        purpose: SamplePurpose,
        points: Vec<Cartographic>,
    ) -> SampleTicket {
        self.next_id += 1;
        let ticket = SampleTicket {
            id: self.next_id,
            area,
            revision,
        };
        if let Some(previous) = self.latest.insert((area, purpose.slot()), ticket.id) {
            self.pending.remove(&previous);
            self.outbox.retain(|request| request.ticket.id != previous);
            debug!(area = area.get(), previous, "旧的采样请求被顶替");
        }
        self.outbox.push(SampleRequest {
            ticket,
            points: points.clone(),
        });
        self.pending.insert(
            ticket.id,
            PendingSample {
                ticket,
                purpose,
                original: points,
            },
        );
        ticket
    }

    /// 取出所有待发送的请求。
    pub fn drain(&mut self) -> Vec<SampleRequest> {
        std::mem::take(&mut self.outbox)
    }

    /// 认领结果对应的请求；已被顶替或未知的凭据返回 `None`。
    pub fn take(&mut self, ticket: SampleTicket) -> Option<PendingSample> {
        let pending = self.pending.remove(&ticket.id)?;
        let key = (ticket.area, pending.purpose.slot());
        if self.latest.get(&key) == Some(&ticket.id) {
            self.latest.remove(&key);
        }
        Some(pending)
    }

    /// 面被删除时撤销它的全部请求。
    pub fn forget_area(&mut self, area: AreaId) {
        self.pending.retain(|_, pending| pending.ticket.area != area);
        self.latest.retain(|(id, _), _| *id != area);
        self.outbox.retain(|request| request.ticket.area != area);
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn has_outgoing(&self) -> bool {
        !self.outbox.is_empty()
    }
}

/// 执行一次采样请求，并校验返回数量。
pub async fn sample<S: TerrainSampler>(
    sampler: &S,
    request: SampleRequest,
) -> (SampleTicket, Result<Vec<Cartographic>, TerrainError>) {
    let expected = request.points.len();
    let result = sampler
        .sample_heights(request.points)
        .await
        .and_then(|heights| {
            if heights.len() == expected {
                Ok(heights)
            } else {
                Err(TerrainError::LengthMismatch {
                    expected,
                    actual: heights.len(),
                })
            }
        });
    (request.ticket, result)
}

pub fn to_cartographic(positions: &[DVec3], ellipsoid: &Ellipsoid) -> Option<Vec<Cartographic>> {
    positions
        .iter()
        .map(|p| ellipsoid.cartesian_to_cartographic(*p))
        .collect()
}

/// 把采样高度抬升 `offset` 后换回笛卡尔坐标。
pub fn elevate(sampled: &[Cartographic], offset: f64, ellipsoid: &Ellipsoid) -> Vec<DVec3> {
    sampled
        .iter()
        .map(|c| ellipsoid.cartographic_to_cartesian(c.with_height(c.height + offset)))
        .collect()
}

fn projection_polygon(positions: Vec<DVec3>) -> Graphics {
    Graphics::Polygon(PolygonGraphics {
        positions,
        color: Color::CYAN.with_alpha(PROJECTION_ALPHA),
        extrusion: 0.0,
        per_position_height: true,
    })
}

pub fn drape_graphics(sampled: &[Cartographic], offset: f64, ellipsoid: &Ellipsoid) -> Vec<Graphics> {
    if sampled.len() < 3 {
        return Vec::new();
    }
    vec![projection_polygon(elevate(sampled, offset, ellipsoid))]
}

/// 每个网格单元一个四边形；`sampled` 与 `layout.corners` 一一对应。
pub fn grid_graphics(
    layout: &GridLayout,
    sampled: &[Cartographic],
    offset: f64,
    ellipsoid: &Ellipsoid,
) -> Vec<Graphics> {
    let corners = elevate(sampled, offset, ellipsoid);
    layout
        .cells
        .iter()
        .filter_map(|cell| {
            let quad = cell
                .iter()
                .map(|index| corners.get(*index).copied())
                .collect::<Option<Vec<DVec3>>>()?;
            Some(projection_polygon(quad))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessScene, SyntheticTerrain};
    use futures::executor::block_on;
    use geodraw_core::grid::subdivide;

    fn points(n: usize) -> Vec<Cartographic> {
        (0..n)
            .map(|i| Cartographic::from_degrees(-123.1 + i as f64 * 1e-4, 49.27, 0.0))
            .collect()
    }

    #[test]
    fn kinds_parse_case_insensitively() {
        assert_eq!("Drape".parse::<ProjectionKind>(), Ok(ProjectionKind::Drape));
        assert_eq!("grid".parse::<ProjectionKind>(), Ok(ProjectionKind::Grid));
        assert!("mesh".parse::<ProjectionKind>().is_err());
        assert_eq!(ProjectionKind::Grid.to_string(), "grid");
    }

    #[test]
    fn newer_request_supersedes_older_one() {
        let mut queue = SampleQueue::new();
        let area = AreaId::new(7);
        let first = queue.submit(area, 0, SamplePurpose::Drape, points(3));
        let second = queue.submit(area, 0, SamplePurpose::Grid(GridLayout::default()), points(4));
        let surface = queue.submit(area, 0, SamplePurpose::SurfaceMeasure, points(3));

        // 第一个请求尚未发出就被撤回
        let outgoing = queue.drain();
        let tickets: Vec<_> = outgoing.iter().map(|r| r.ticket).collect();
        assert_eq!(tickets, vec![second, surface]);
        assert!(!queue.has_outgoing());

        assert!(queue.take(first).is_none());
        assert!(matches!(queue.take(second).map(|p| p.purpose), Some(SamplePurpose::Grid(_))));
        assert!(queue.take(second).is_none());
        assert_eq!(queue.pending_count(), 1);

        queue.forget_area(area);
        assert!(queue.take(surface).is_none());
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn drained_requests_can_still_be_superseded() {
        let mut queue = SampleQueue::new();
        let area = AreaId::new(3);
        let stale = queue.submit(area, 0, SamplePurpose::Drape, points(3));
        assert_eq!(queue.drain().len(), 1);
        let fresh = queue.submit(area, 1, SamplePurpose::Drape, points(3));
        assert!(queue.take(stale).is_none());
        assert_eq!(queue.take(fresh).map(|p| p.ticket.revision()), Some(1));
    }

    #[test]
    fn sampling_reports_length_mismatch_and_failures() {
        struct Truncating;
        impl TerrainSampler for Truncating {
            fn sample_heights(
                &self,
                mut points: Vec<Cartographic>,
            ) -> impl std::future::Future<Output = Result<Vec<Cartographic>, TerrainError>> {
                points.pop();
                std::future::ready(Ok(points))
            }
        }

        let mut queue = SampleQueue::new();
        queue.submit(AreaId::new(1), 0, SamplePurpose::Drape, points(3));
        let request = queue.drain().remove(0);
        let (_, result) = block_on(sample(&Truncating, request.clone()));
        assert!(matches!(
            result,
            Err(TerrainError::LengthMismatch { expected: 3, actual: 2 })
        ));

        let scene = HeadlessScene::default();
        let offline = SyntheticTerrain::failing(*scene.frame());
        let (ticket, result) = block_on(sample(&offline, request.clone()));
        assert_eq!(ticket, request.ticket);
        assert!(matches!(result, Err(TerrainError::Unavailable(_))));
    }

    #[test]
    fn drape_and_grid_are_lifted_above_the_samples() {
        let scene = HeadlessScene::default();
        let ellipsoid = *scene.ellipsoid();
        let square = vec![
            scene.ground_point(0.0, 0.0),
            scene.ground_point(30.0, 0.0),
            scene.ground_point(30.0, 30.0),
            scene.ground_point(0.0, 30.0),
        ];
        let terrain = SyntheticTerrain::flat(*scene.frame(), 50.0);

        let vertices = to_cartographic(&square, &ellipsoid).unwrap();
        let sampled = block_on(terrain.sample_heights(vertices)).unwrap();
        let drape = drape_graphics(&sampled, 20.0, &ellipsoid);
        assert_eq!(drape.len(), 1);
        match &drape[0] {
            Graphics::Polygon(polygon) => {
                assert!(polygon.per_position_height);
                assert_eq!(polygon.color, Color::CYAN.with_alpha(PROJECTION_ALPHA));
                for position in &polygon.positions {
                    let height = ellipsoid.cartesian_to_cartographic(*position).unwrap().height;
                    assert!((height - 70.0).abs() < 1e-3);
                }
            }
            other => panic!("unexpected graphics {other:?}"),
        }

        let layout = subdivide(&square, &ellipsoid, 10.0, 100).unwrap();
        let corners = to_cartographic(&layout.corners, &ellipsoid).unwrap();
        let sampled = block_on(terrain.sample_heights(corners)).unwrap();
        let cells = grid_graphics(&layout, &sampled, 20.0, &ellipsoid);
        assert_eq!(cells.len(), layout.cell_count());
        assert_eq!(cells.len(), 9);

        assert!(drape_graphics(&sampled[..2], 20.0, &ellipsoid).is_empty());
    }
}
