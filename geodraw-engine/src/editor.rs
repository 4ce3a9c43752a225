//! 编辑器：把指针与键盘输入分发给绘制、拉伸、平移控件与选择管理。
//!
//! 分发顺序为拉伸会话、绘制会话、平移控件，最后才是选择。

use std::time::Duration;

use geodraw_config::EditorConfig;
use geodraw_core::document::{AreaId, Document};
use geodraw_core::geometry::{Cartographic, Ellipsoid, surface_area_and_centroid};
use geodraw_core::grid::subdivide;
use glam::DVec3;
use tracing::{debug, info, warn};

use crate::backend::{SceneBackend, ScreenPoint, TerrainError, TerrainSampler};
use crate::drawing::{DrawingEvent, DrawingMode, DrawingSession, DrawingSettings};
use crate::errors::EngineError;
use crate::extrusion::{ExtrusionSession, ExtrusionSettings};
use crate::gizmo::{AxisGizmo, GizmoSettings, GizmoTarget};
use crate::projection::{
    ProjectionKind, SampleOutcome, SamplePurpose, SampleQueue, SampleRequest, SampleTicket,
    drape_graphics, grid_graphics, sample, to_cartographic,
};
use crate::scene::{PickTarget, Scene, ScenePick, Selection};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down(ScreenPoint),
    Up(ScreenPoint),
    Move(ScreenPoint),
    Click(ScreenPoint),
    DoubleClick(ScreenPoint),
    RightClick(ScreenPoint),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
    Delete,
}

pub struct Editor<B: SceneBackend> {
    scene: Scene<B>,
    config: EditorConfig,
    gizmo: AxisGizmo,
    drawing: DrawingSession,
    extrusion: ExtrusionSession,
    samples: SampleQueue,
    swallow_click: bool,
}

impl<B: SceneBackend> Editor<B> {
    pub fn new(backend: B, config: EditorConfig) -> Self {
        let document = Document::with_settings(config.snap_radius, Ellipsoid::wgs84());
        Self {
            scene: Scene::new(backend, document),
            gizmo: AxisGizmo::new(GizmoSettings::from(&config.gizmo)),
            drawing: DrawingSession::new(DrawingSettings::from(&config.drawing)),
            extrusion: ExtrusionSession::new(ExtrusionSettings::from(&config.extrusion)),
            samples: SampleQueue::new(),
            swallow_click: false,
            config,
        }
    }

    #[inline]
    pub fn scene(&self) -> &Scene<B> {
        &self.scene
    }

    #[inline]
    pub fn scene_mut(&mut self) -> &mut Scene<B> {
        &mut self.scene
    }

    #[inline]
    pub fn document(&self) -> &Document {
        self.scene.document()
    }

    #[inline]
    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    #[inline]
    pub fn gizmo(&self) -> &AxisGizmo {
        &self.gizmo
    }

    #[inline]
    pub fn drawing(&self) -> &DrawingSession {
        &self.drawing
    }

    #[inline]
    pub fn extrusion(&self) -> &ExtrusionSession {
        &self.extrusion
    }

    /// 当前选中对象，供外部面板只读查询。
    #[inline]
    pub fn selection(&self) -> Selection {
        self.scene.selection()
    }

    pub fn toggle_line_mode(&mut self) -> bool {
        self.toggle_drawing(DrawingMode::Line)
    }

    pub fn toggle_area_mode(&mut self) -> bool {
        self.toggle_drawing(DrawingMode::Area)
    }

    /// 再次点击同一工具即取消；激活绘制时清空选中并结束拉伸。
    fn toggle_drawing(&mut self, mode: DrawingMode) -> bool {
        if self.drawing.mode() == Some(mode) {
            self.drawing.cancel(&mut self.scene);
            return false;
        }
        self.stop_extrusion();
        self.clear_selection();
        self.drawing.activate(&mut self.scene, mode);
        true
    }

    /// 对选中的面开启或关闭拉伸，返回拉伸会话是否处于激活状态。
    pub fn toggle_extrude_mode(&mut self) -> bool {
        if self.extrusion.is_active() {
            self.stop_extrusion();
            return false;
        }
        let Some(area) = self.scene.selection().area() else {
            debug!("未选中面，无法拉伸");
            return false;
        };
        self.gizmo.remove(&mut self.scene);
        if self.extrusion.start(&mut self.scene, area) {
            true
        } else {
            self.sync_gizmo();
            false
        }
    }

    fn stop_extrusion(&mut self) {
        if self.extrusion.stop(&mut self.scene).is_some() {
            self.sync_gizmo();
        }
    }

    pub fn handle_pointer(&mut self, event: PointerEvent, now: Duration) -> bool {
        match event {
            PointerEvent::Down(point) => {
                self.swallow_click = false;
                if self.extrusion.is_active() && self.extrusion.pointer_down(&mut self.scene, point) {
                    return true;
                }
                if self.drawing.is_active() {
                    self.drawing.pointer_down(now);
                    return true;
                }
                match self.scene.resolve_pick(point) {
                    Some(ScenePick::Target(PickTarget::GizmoHandle(axis))) => {
                        self.gizmo.begin_drag(&mut self.scene, axis, point)
                    }
                    _ => false,
                }
            }
            PointerEvent::Move(point) => {
                if self.extrusion.is_active() {
                    return self.extrusion.pointer_move(&mut self.scene, point);
                }
                if self.drawing.is_active() {
                    self.drawing.pointer_move(&mut self.scene, point);
                    return true;
                }
                self.gizmo.pointer_move(&mut self.scene, point)
            }
            PointerEvent::Up(_) => {
                self.drawing.pointer_up();
                let ended = self.extrusion.pointer_up(&mut self.scene) | self.end_gizmo_drag();
                self.swallow_click = ended;
                ended
            }
            PointerEvent::Click(point) => {
                if std::mem::take(&mut self.swallow_click) {
                    return false;
                }
                if self.drawing.is_active() {
                    let event = self.drawing.click(&mut self.scene, point);
                    self.after_drawing(event);
                    return event != DrawingEvent::Ignored;
                }
                self.click_select(point)
            }
            PointerEvent::DoubleClick(_) | PointerEvent::RightClick(_) => {
                if !self.drawing.is_active() {
                    return false;
                }
                self.drawing.finish(&mut self.scene) != DrawingEvent::Ignored
            }
        }
    }

    pub fn handle_key(&mut self, key: Key) -> bool {
        match key {
            Key::Escape => {
                if self.drawing.is_active() {
                    self.drawing.cancel(&mut self.scene);
                    true
                } else if self.extrusion.is_active() {
                    self.stop_extrusion();
                    true
                } else {
                    self.end_gizmo_drag()
                }
            }
            Key::Delete => {
                if self.drawing.is_placing() {
                    return false;
                }
                self.delete_selection().is_ok()
            }
        }
    }

    /// 推进计时器（长按结束绘制）。
    pub fn tick(&mut self, now: Duration) -> bool {
        self.drawing.tick(&mut self.scene, now).is_some()
    }

    /// 结束控件拖拽；移动过的面重新量测地表面积。
    fn end_gizmo_drag(&mut self) -> bool {
        if !self.gizmo.end_drag(&mut self.scene) {
            return false;
        }
        if let Some(GizmoTarget::Area(id)) = self.gizmo.target() {
            let stale = self
                .scene
                .document()
                .area(id)
                .is_some_and(|area| area.surface_measure().is_none());
            if stale && self.config.projection.measure_surface_on_close {
                self.request_surface_measure(id);
            }
        }
        true
    }

    fn click_select(&mut self, point: ScreenPoint) -> bool {
        let selection = match self.scene.resolve_pick(point) {
            Some(ScenePick::Target(PickTarget::GizmoHandle(_) | PickTarget::ExtrusionArrow)) => return false,
            Some(ScenePick::Target(PickTarget::Anchor(id))) => Selection::Anchor(id),
            Some(ScenePick::Target(PickTarget::Line(id))) => Selection::Line(id),
            Some(ScenePick::Target(PickTarget::Area(id))) => Selection::Area(id),
            Some(ScenePick::Feature(_)) | None => Selection::None,
        };
        self.select(selection).is_ok()
    }

    pub fn select(&mut self, selection: Selection) -> Result<(), EngineError> {
        if self.extrusion.area().is_some_and(|area| selection != Selection::Area(area)) {
            self.stop_extrusion();
        }
        self.scene.select(selection)?;
        self.sync_gizmo();
        Ok(())
    }

    pub fn clear_selection(&mut self) -> bool {
        self.stop_extrusion();
        let cleared = self.scene.clear_selection();
        self.sync_gizmo();
        cleared
    }

    /// 删除选中对象（锚点与线段按级联规则删除）。
    pub fn delete_selection(&mut self) -> Result<(), EngineError> {
        match self.scene.selection() {
            Selection::None => return Err(EngineError::NoSelection),
            Selection::Anchor(id) => {
                self.scene.remove_anchor(id);
            }
            Selection::Line(id) => {
                self.scene.remove_line(id);
            }
            Selection::Area(id) => {
                if self.extrusion.area() == Some(id) {
                    self.extrusion.stop(&mut self.scene);
                }
                self.gizmo.remove(&mut self.scene);
                self.samples.forget_area(id);
                self.scene.remove_area(id);
            }
        }
        self.sync_gizmo();
        Ok(())
    }

    /// 让平移控件跟随选中对象：面按配置显示，线段显示平面控件，锚点不显示。
    fn sync_gizmo(&mut self) {
        if self.extrusion.is_active() {
            return;
        }
        let desired = match self.scene.selection() {
            Selection::Area(id) => Some((GizmoTarget::Area(id), self.config.gizmo.area_axes.axis_count())),
            Selection::Line(id) if self.config.gizmo.line_gizmo => Some((GizmoTarget::Line(id), 2)),
            _ => None,
        };
        match desired {
            Some((target, _)) if self.gizmo.target() == Some(target) => {}
            Some((target, axes)) => {
                self.gizmo.show(&mut self.scene, target, axes);
            }
            None => self.gizmo.remove(&mut self.scene),
        }
    }

    fn after_drawing(&mut self, event: DrawingEvent) {
        if let DrawingEvent::Closed(area) | DrawingEvent::Footprint(area) = event {
            info!(area = area.get(), "新面已创建");
            if self.config.projection.measure_surface_on_close {
                self.request_surface_measure(area);
            }
        }
    }

    fn request_surface_measure(&mut self, id: AreaId) -> Option<SampleTicket> {
        let area = self.scene.document().area(id)?;
        let points = to_cartographic(area.positions(), self.scene.document().ellipsoid())?;
        let revision = area.revision();
        Some(self.samples.submit(id, revision, SamplePurpose::SurfaceMeasure, points))
    }

    /// 为选中的面发起地形投影。结果在采样返回后才出现。
    pub fn project_terrain(&mut self, kind: ProjectionKind) -> Result<SampleTicket, EngineError> {
        let id = self.scene.selection().area().ok_or(EngineError::NoAreaSelected)?;
        let area = self
            .scene
            .document()
            .area(id)
            .ok_or(EngineError::EntityNotFound(id.get()))?;
        let ellipsoid = self.scene.document().ellipsoid();
        let (purpose, points) = match kind {
            ProjectionKind::Drape => (SamplePurpose::Drape, to_cartographic(area.positions(), ellipsoid)),
            ProjectionKind::Grid => {
                let projection = &self.config.projection;
                let layout = subdivide(
                    area.positions(),
                    ellipsoid,
                    projection.grid_cell_size,
                    projection.max_grid_cells,
                )
                .ok_or(EngineError::DegenerateArea(id.get()))?;
                let points = to_cartographic(&layout.corners, ellipsoid);
                (SamplePurpose::Grid(layout), points)
            }
        };
        let points = points.ok_or(EngineError::DegenerateArea(id.get()))?;
        let revision = area.revision();
        debug!(area = id.get(), %kind, points = points.len(), "发起地形投影");
        Ok(self.samples.submit(id, revision, purpose, points))
    }

    #[inline]
    pub fn pending_samples(&self) -> usize {
        self.samples.pending_count()
    }

    pub fn drain_sample_requests(&mut self) -> Vec<SampleRequest> {
        self.samples.drain()
    }

    /// 应用一次采样结果。面已删除、几何已变化或请求已被顶替时丢弃；
    /// 采样失败时退回原始高度。
    pub fn complete_sample(
        &mut self,
        ticket: SampleTicket,
        result: Result<Vec<Cartographic>, TerrainError>,
    ) -> SampleOutcome {
        let id = ticket.area();
        let Some(pending) = self.samples.take(ticket) else {
            debug!(area = id.get(), ticket = ticket.id(), "采样请求已被顶替，丢弃结果");
            return SampleOutcome::Discarded;
        };
        let Some(area) = self.scene.document().area(id) else {
            debug!(area = id.get(), "面已删除，丢弃采样结果");
            return SampleOutcome::Discarded;
        };
        if area.revision() != ticket.revision() {
            debug!(
                area = id.get(),
                requested = ticket.revision(),
                current = area.revision(),
                "面已移动，丢弃采样结果"
            );
            return SampleOutcome::Discarded;
        }
        let sampled = match result {
            Ok(sampled) => sampled,
            Err(error) => {
                warn!(area = id.get(), %error, "地形采样失败，使用原始高度");
                pending.original
            }
        };

        let ellipsoid = *self.scene.document().ellipsoid();
        let offset = self.config.projection.height_offset;
        match pending.purpose {
            SamplePurpose::Drape => {
                let graphics = drape_graphics(&sampled, offset, &ellipsoid);
                self.scene.set_projection(id, graphics);
            }
            SamplePurpose::Grid(layout) => {
                let graphics = grid_graphics(&layout, &sampled, offset, &ellipsoid);
                self.scene.set_projection(id, graphics);
            }
            SamplePurpose::SurfaceMeasure => {
                let positions: Vec<DVec3> = sampled
                    .iter()
                    .map(|c| ellipsoid.cartographic_to_cartesian(*c))
                    .collect();
                self.scene
                    .set_surface_measure(id, surface_area_and_centroid(&positions));
            }
        }
        SampleOutcome::Applied(id)
    }

    /// 依次完成所有排队的采样请求，直到队列为空。
    pub async fn resolve_samples<S: TerrainSampler>(&mut self, sampler: &S) -> Vec<SampleOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let requests = self.drain_sample_requests();
            if requests.is_empty() {
                break;
            }
            for request in requests {
                let (ticket, result) = sample(sampler, request).await;
                outcomes.push(self.complete_sample(ticket, result));
            }
        }
        outcomes
    }

    /// 结束全部会话并清空选中；相机交互一定会被恢复。
    pub fn teardown(&mut self) {
        self.drawing.cancel(&mut self.scene);
        self.extrusion.stop(&mut self.scene);
        self.gizmo.remove(&mut self.scene);
        self.scene.clear_selection();
    }
}

impl<B: SceneBackend> Drop for Editor<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}
