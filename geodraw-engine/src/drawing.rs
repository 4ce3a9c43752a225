//! 逐点绘制线段与多边形的会话状态机。
//!
//! 状态：`Idle` → `Placing`（已放置起点，橡皮筋线跟随指针）→ 闭合或结束 → `Idle`。
//! 工具保持激活直到取消；结束只是回到 `Idle`。

use std::time::Duration;

use geodraw_config::DrawingConfig;
use geodraw_core::document::{AnchorId, AreaId, LineId};
use geodraw_core::footprint::{footprint_from_box, footprint_from_triangles};
use glam::DVec3;
use tracing::debug;

use crate::backend::{Color, FeatureGeometry, Graphics, PolylineGraphics, RenderHandle, SceneBackend, ScreenPoint};
use crate::scene::{LINE_WIDTH, PickTarget, Scene, ScenePick};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawingMode {
    Line,
    Area,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawingSettings {
    pub long_press: Duration,
}

impl From<&DrawingConfig> for DrawingSettings {
    fn from(config: &DrawingConfig) -> Self {
        Self {
            long_press: Duration::from_millis(config.long_press_ms),
        }
    }
}

impl Default for DrawingSettings {
    fn default() -> Self {
        Self::from(&DrawingConfig::default())
    }
}

/// 一次输入在会话中产生的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawingEvent {
    Ignored,
    Started(AnchorId),
    Placed { line: LineId, anchor: AnchorId },
    Closed(AreaId),
    Footprint(AreaId),
    Finished,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Placing {
        start: AnchorId,
        rubber_band: RenderHandle,
    },
}

#[derive(Debug)]
pub struct DrawingSession {
    settings: DrawingSettings,
    mode: Option<DrawingMode>,
    phase: Phase,
    first: Option<AnchorId>,
    polygon: Vec<DVec3>,
    vertices: Vec<AnchorId>,
    scaffold: Vec<LineId>,
    press_deadline: Option<Duration>,
    ignore_next_click: bool,
}

impl Default for DrawingSession {
    fn default() -> Self {
        Self::new(DrawingSettings::default())
    }
}

fn rubber_band_graphics(start: DVec3, end: DVec3) -> Graphics {
    Graphics::Polyline(PolylineGraphics {
        positions: vec![start, end],
        color: Color::WHITE.with_alpha(0.8),
        width: LINE_WIDTH,
        arrow: false,
    })
}

impl DrawingSession {
    pub fn new(settings: DrawingSettings) -> Self {
        Self {
            settings,
            mode: None,
            phase: Phase::Idle,
            first: None,
            polygon: Vec::new(),
            vertices: Vec::new(),
            scaffold: Vec::new(),
            press_deadline: None,
            ignore_next_click: false,
        }
    }

    #[inline]
    pub fn mode(&self) -> Option<DrawingMode> {
        self.mode
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.mode.is_some()
    }

    #[inline]
    pub fn is_placing(&self) -> bool {
        matches!(self.phase, Phase::Placing { .. })
    }

    #[inline]
    pub fn start_anchor(&self) -> Option<AnchorId> {
        match self.phase {
            Phase::Placing { start, .. } => Some(start),
            Phase::Idle => None,
        }
    }

    #[inline]
    pub fn rubber_band(&self) -> Option<RenderHandle> {
        match self.phase {
            Phase::Placing { rubber_band, .. } => Some(rubber_band),
            Phase::Idle => None,
        }
    }

    /// 已累计的多边形顶点数（仅面模式）。
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.polygon.len()
    }

    /// 激活工具；切换到另一种模式时先结束当前会话。
    pub fn activate<B: SceneBackend>(&mut self, scene: &mut Scene<B>, mode: DrawingMode) {
        if self.mode == Some(mode) {
            return;
        }
        self.finish(scene);
        self.mode = Some(mode);
        debug!(?mode, "绘制工具激活");
    }

    /// 取消进行中的会话并退出工具。
    pub fn cancel<B: SceneBackend>(&mut self, scene: &mut Scene<B>) -> DrawingEvent {
        let Some(mode) = self.mode.take() else {
            return DrawingEvent::Ignored;
        };
        self.finish(scene);
        self.ignore_next_click = false;
        debug!(?mode, "绘制工具退出");
        DrawingEvent::Cancelled
    }

    /// 不闭合地结束当前会话：移除橡皮筋线，丢弃没有任何连接的起点。
    pub fn finish<B: SceneBackend>(&mut self, scene: &mut Scene<B>) -> DrawingEvent {
        self.press_deadline = None;
        let Phase::Placing { start, rubber_band } = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return DrawingEvent::Ignored;
        };
        scene.remove_overlay(rubber_band);
        if scene
            .document()
            .anchor(start)
            .is_some_and(|anchor| anchor.connection_count() == 0)
        {
            scene.remove_anchor(start);
        }
        let placed = self.scaffold.len();
        self.reset();
        debug!(lines = placed, "绘制结束");
        DrawingEvent::Finished
    }

    pub fn click<B: SceneBackend>(&mut self, scene: &mut Scene<B>, point: ScreenPoint) -> DrawingEvent {
        if std::mem::take(&mut self.ignore_next_click) {
            return DrawingEvent::Ignored;
        }
        let Some(mode) = self.mode else {
            return DrawingEvent::Ignored;
        };
        let pick = scene.resolve_pick(point);

        if let (Phase::Idle, DrawingMode::Area, Some(ScenePick::Feature(feature))) = (self.phase, mode, &pick) {
            return self.place_footprint(scene, feature);
        }

        let picked_anchor = match pick {
            Some(ScenePick::Target(PickTarget::Anchor(id))) => Some(id),
            _ => None,
        };
        let position = match picked_anchor.and_then(|id| scene.document().anchor(id)) {
            Some(anchor) => anchor.position(),
            None => match scene.backend().resolve_ground_position(point) {
                Some(position) => position,
                None => return DrawingEvent::Ignored,
            },
        };

        match self.phase {
            Phase::Idle => self.begin(scene, picked_anchor, position),
            Phase::Placing { start, rubber_band } => {
                self.place(scene, mode, start, rubber_band, picked_anchor, position)
            }
        }
    }

    /// 橡皮筋线跟随指针；同时取消长按计时。
    pub fn pointer_move<B: SceneBackend>(&mut self, scene: &mut Scene<B>, point: ScreenPoint) {
        self.press_deadline = None;
        let Phase::Placing { start, rubber_band } = self.phase else {
            return;
        };
        let Some(origin) = scene.document().anchor(start).map(|a| a.position()) else {
            return;
        };
        let Some(cursor) = scene.backend().resolve_ground_position(point) else {
            return;
        };
        scene.update_overlay(rubber_band, rubber_band_graphics(origin, cursor));
    }

    /// 放置点期间按下指针开始长按计时。
    pub fn pointer_down(&mut self, now: Duration) {
        if self.is_placing() {
            self.press_deadline = Some(now + self.settings.long_press);
        }
    }

    pub fn pointer_up(&mut self) {
        self.press_deadline = None;
    }

    /// 长按到时后结束会话，并忽略随后松开产生的单击。
    pub fn tick<B: SceneBackend>(&mut self, scene: &mut Scene<B>, now: Duration) -> Option<DrawingEvent> {
        let deadline = self.press_deadline?;
        if now < deadline {
            return None;
        }
        self.press_deadline = None;
        let event = self.finish(scene);
        self.ignore_next_click = true;
        debug!("长按结束绘制");
        Some(event)
    }

    fn begin<B: SceneBackend>(
        &mut self,
        scene: &mut Scene<B>,
        picked: Option<AnchorId>,
        position: DVec3,
    ) -> DrawingEvent {
        let start = match picked {
            Some(id) => id,
            None => scene.add_anchor(position).id,
        };
        let Some(origin) = scene.document().anchor(start).map(|a| a.position()) else {
            return DrawingEvent::Ignored;
        };
        let rubber_band = scene.add_overlay(rubber_band_graphics(origin, position), None);
        self.phase = Phase::Placing { start, rubber_band };
        self.first = Some(start);
        self.polygon = vec![origin];
        self.vertices = vec![start];
        debug!(anchor = start.get(), "开始绘制");
        DrawingEvent::Started(start)
    }

    fn place<B: SceneBackend>(
        &mut self,
        scene: &mut Scene<B>,
        mode: DrawingMode,
        start: AnchorId,
        rubber_band: RenderHandle,
        picked: Option<AnchorId>,
        position: DVec3,
    ) -> DrawingEvent {
        let snapped = picked.or_else(|| scene.document().find_anchor_near(position));
        if snapped == Some(start) {
            return DrawingEvent::Ignored;
        }

        if mode == DrawingMode::Area && snapped.is_some() && snapped == self.first && self.polygon.len() >= 3 {
            return self.close(scene, rubber_band);
        }
        // 面的边界不能回到已有顶点
        if mode == DrawingMode::Area && snapped.is_some_and(|id| self.vertices.contains(&id)) {
            return DrawingEvent::Ignored;
        }

        let end = match snapped {
            Some(id) => id,
            None => scene.add_anchor(position).id,
        };
        let line = match scene.add_line(start, end) {
            Ok(line) => line,
            Err(error) => {
                debug!(%error, "线段创建失败，忽略本次点击");
                return DrawingEvent::Ignored;
            }
        };
        let Some(end_position) = scene.document().anchor(end).map(|a| a.position()) else {
            return DrawingEvent::Ignored;
        };
        self.scaffold.push(line);
        if mode == DrawingMode::Area {
            self.polygon.push(end_position);
            self.vertices.push(end);
        }
        scene.update_overlay(rubber_band, rubber_band_graphics(end_position, end_position));
        self.phase = Phase::Placing { start: end, rubber_band };
        debug!(line = line.get(), anchor = end.get(), "放置顶点");
        DrawingEvent::Placed { line, anchor: end }
    }

    /// 闭合多边形：生成面并拆除绘制时的辅助线段。
    fn close<B: SceneBackend>(&mut self, scene: &mut Scene<B>, rubber_band: RenderHandle) -> DrawingEvent {
        scene.remove_overlay(rubber_band);
        for line in std::mem::take(&mut self.scaffold) {
            scene.remove_line(line);
        }
        let positions = std::mem::take(&mut self.polygon);
        let vertices = positions.len();
        let area = scene.add_area(positions);
        self.phase = Phase::Idle;
        self.reset();
        debug!(area = area.get(), vertices, "多边形闭合");
        DrawingEvent::Closed(area)
    }

    fn place_footprint<B: SceneBackend>(&mut self, scene: &mut Scene<B>, feature: &FeatureGeometry) -> DrawingEvent {
        let ellipsoid = *scene.document().ellipsoid();
        let outline = match feature {
            FeatureGeometry::Box(obb) => footprint_from_box(obb, &ellipsoid),
            FeatureGeometry::Mesh(triangles) => footprint_from_triangles(triangles, &ellipsoid),
        };
        let Some(outline) = outline else {
            debug!("要素轮廓无法提取");
            return DrawingEvent::Ignored;
        };
        let area = scene.add_area(outline);
        debug!(area = area.get(), "由建筑轮廓生成面");
        DrawingEvent::Footprint(area)
    }

    fn reset(&mut self) {
        self.first = None;
        self.polygon.clear();
        self.vertices.clear();
        self.scaffold.clear();
        self.press_deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessScene;
    use geodraw_core::document::Document;

    fn scene() -> Scene<HeadlessScene> {
        Scene::new(HeadlessScene::default(), Document::new())
    }

    fn at(scene: &Scene<HeadlessScene>, east: f64, north: f64) -> ScreenPoint {
        scene.backend().screen_of_ground(east, north).unwrap()
    }

    #[test]
    fn line_mode_chains_segments_until_finished() {
        let mut scene = scene();
        let mut session = DrawingSession::default();
        session.activate(&mut scene, DrawingMode::Line);

        let p0 = at(&scene, 0.0, 0.0);
        let p1 = at(&scene, 20.0, 0.0);
        let p2 = at(&scene, 20.0, 20.0);
        assert!(matches!(session.click(&mut scene, p0), DrawingEvent::Started(_)));
        session.pointer_move(&mut scene, p1);
        assert!(matches!(session.click(&mut scene, p1), DrawingEvent::Placed { .. }));
        assert!(matches!(session.click(&mut scene, p2), DrawingEvent::Placed { .. }));
        assert_eq!(scene.document().lines().count(), 2);
        assert_eq!(scene.document().anchors().count(), 3);

        let rubber_band = session.rubber_band().unwrap();
        assert_eq!(session.finish(&mut scene), DrawingEvent::Finished);
        assert!(scene.backend().graphics(rubber_band).is_none());
        assert!(session.is_active());
        assert!(!session.is_placing());
        // 线段在结束后保留
        assert_eq!(scene.document().lines().count(), 2);
        assert_eq!(scene.backend().graphics_count(), 5);
        scene.document().check_connectivity().unwrap();
    }

    #[test]
    fn triangle_closes_into_one_area_without_scaffold() {
        let mut scene = scene();
        let mut session = DrawingSession::default();
        session.activate(&mut scene, DrawingMode::Area);

        let corners = [(0.0, 0.0), (30.0, 0.0), (0.0, 30.0)];
        for (east, north) in corners {
            let point = at(&scene, east, north);
            session.click(&mut scene, point);
        }
        assert_eq!(session.vertex_count(), 3);
        assert_eq!(scene.document().lines().count(), 2);

        let back_to_start = at(&scene, 0.0, 0.0);
        let DrawingEvent::Closed(area) = session.click(&mut scene, back_to_start) else {
            panic!("polygon should close");
        };
        let area = scene.document().area(area).unwrap();
        let frame = *scene.backend().frame();
        let vertices: Vec<DVec3> = area.positions().iter().map(|p| frame.to_local(*p)).collect();
        assert_eq!(vertices.len(), 3);
        for (vertex, (east, north)) in vertices.iter().zip(corners) {
            assert!((vertex.x - east).abs() < 1e-6 && (vertex.y - north).abs() < 1e-6);
        }
        assert!((area.measure().unwrap().area - 450.0).abs() < 0.5);

        assert_eq!(scene.document().lines().count(), 0);
        assert_eq!(scene.document().anchors().count(), 0);
        // 只剩多边形与标签
        assert_eq!(scene.backend().graphics_count(), 2);
        assert!(!session.is_placing());
        assert!(session.is_active());
    }

    #[test]
    fn revisiting_start_early_does_not_close() {
        let mut scene = scene();
        let mut session = DrawingSession::default();
        session.activate(&mut scene, DrawingMode::Area);
        let a = at(&scene, 0.0, 0.0);
        let b = at(&scene, 30.0, 0.0);
        session.click(&mut scene, a);
        session.click(&mut scene, b);
        assert_eq!(session.click(&mut scene, a), DrawingEvent::Ignored);
        assert_eq!(scene.document().areas().count(), 0);
        assert_eq!(scene.document().lines().count(), 1);
        assert_eq!(session.vertex_count(), 2);
    }

    #[test]
    fn area_boundary_skips_earlier_vertices() {
        let mut scene = scene();
        let mut session = DrawingSession::default();
        session.activate(&mut scene, DrawingMode::Area);
        let a = at(&scene, 0.0, 0.0);
        let b = at(&scene, 30.0, 0.0);
        let c = at(&scene, 30.0, 30.0);
        for point in [a, b, c] {
            session.click(&mut scene, point);
        }
        // 回到 B 不产生重复线段，也不记录重复顶点
        assert_eq!(session.click(&mut scene, b), DrawingEvent::Ignored);
        assert_eq!(scene.document().lines().count(), 2);
        assert_eq!(session.vertex_count(), 3);

        let DrawingEvent::Closed(area) = session.click(&mut scene, a) else {
            panic!("polygon should close");
        };
        let area = scene.document().area(area).unwrap();
        assert_eq!(area.positions().len(), 3);
        assert!((area.measure().unwrap().area - 450.0).abs() < 0.5);
    }

    #[test]
    fn clicking_the_current_start_is_ignored() {
        let mut scene = scene();
        let mut session = DrawingSession::default();
        session.activate(&mut scene, DrawingMode::Line);
        let a = at(&scene, 0.0, 0.0);
        session.click(&mut scene, a);
        assert_eq!(session.click(&mut scene, a), DrawingEvent::Ignored);
        assert_eq!(scene.document().lines().count(), 0);
    }

    #[test]
    fn finishing_drops_a_dangling_start_anchor() {
        let mut scene = scene();
        let mut session = DrawingSession::default();
        session.activate(&mut scene, DrawingMode::Line);
        let a = at(&scene, 0.0, 0.0);
        session.click(&mut scene, a);
        assert_eq!(scene.document().anchors().count(), 1);
        assert_eq!(session.finish(&mut scene), DrawingEvent::Finished);
        assert_eq!(scene.document().anchors().count(), 0);
        assert_eq!(scene.backend().graphics_count(), 0);
        assert_eq!(session.finish(&mut scene), DrawingEvent::Ignored);
    }

    #[test]
    fn cancel_cleans_up_and_leaves_the_tool() {
        let mut scene = scene();
        let mut session = DrawingSession::default();
        session.activate(&mut scene, DrawingMode::Area);
        let a = at(&scene, 0.0, 0.0);
        session.click(&mut scene, a);
        assert_eq!(session.cancel(&mut scene), DrawingEvent::Cancelled);
        assert!(!session.is_active());
        assert_eq!(scene.backend().graphics_count(), 0);
        assert_eq!(session.click(&mut scene, a), DrawingEvent::Ignored);
        assert_eq!(session.cancel(&mut scene), DrawingEvent::Ignored);
    }

    #[test]
    fn long_press_finishes_and_swallows_the_release_click() {
        let mut scene = scene();
        let mut session = DrawingSession::default();
        session.activate(&mut scene, DrawingMode::Line);
        let a = at(&scene, 0.0, 0.0);
        let b = at(&scene, 25.0, 0.0);
        session.click(&mut scene, a);
        session.click(&mut scene, b);

        session.pointer_down(Duration::from_millis(10_000));
        assert_eq!(session.tick(&mut scene, Duration::from_millis(11_000)), None);
        assert_eq!(
            session.tick(&mut scene, Duration::from_millis(11_600)),
            Some(DrawingEvent::Finished)
        );
        assert!(!session.is_placing());
        assert_eq!(session.click(&mut scene, b), DrawingEvent::Ignored);
        assert!(matches!(session.click(&mut scene, b), DrawingEvent::Started(_)));
    }

    #[test]
    fn moving_cancels_the_long_press() {
        let mut scene = scene();
        let mut session = DrawingSession::default();
        session.activate(&mut scene, DrawingMode::Line);
        let a = at(&scene, 0.0, 0.0);
        session.click(&mut scene, a);
        session.pointer_down(Duration::ZERO);
        let b = at(&scene, 5.0, 5.0);
        session.pointer_move(&mut scene, b);
        assert_eq!(session.tick(&mut scene, Duration::from_secs(5)), None);
        assert!(session.is_placing());
    }

    #[test]
    fn clicking_a_building_creates_its_footprint() {
        let mut scene = scene();
        scene.backend_mut().add_building(30.0, 30.0, 8.0, 5.0, 12.0);
        let roof = scene
            .backend()
            .world_to_screen(scene.backend().frame().to_world(DVec3::new(30.0, 30.0, 12.0)))
            .unwrap();

        let mut session = DrawingSession::default();
        session.activate(&mut scene, DrawingMode::Line);
        assert!(matches!(session.click(&mut scene, roof), DrawingEvent::Started(_)));
        session.cancel(&mut scene);

        session.activate(&mut scene, DrawingMode::Area);
        let DrawingEvent::Footprint(area) = session.click(&mut scene, roof) else {
            panic!("footprint expected");
        };
        let area = scene.document().area(area).unwrap();
        assert_eq!(area.positions().len(), 4);
        assert!((area.measure().unwrap().area - 160.0).abs() < 0.5);
        assert!(!session.is_placing());
    }
}
