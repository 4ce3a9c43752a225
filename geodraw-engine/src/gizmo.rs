//! 轴向平移控件。
//!
//! 控件在目标位置处建立东-北-天坐标系，沿各轴绘制手柄；拖拽手柄时把指针位移投影到轴向，
//! 以增量方式平移目标。坐标系只在 `show` 时计算一次。

use geodraw_config::GizmoConfig;
use geodraw_core::document::{AreaId, LineId};
use geodraw_core::geometry::{LocalFrame, Plane, ray_plane};
use glam::DVec3;
use tracing::debug;

use crate::backend::{CameraPose, Color, Graphics, PolylineGraphics, RenderHandle, SceneBackend, ScreenPoint};
use crate::camera_lock::CameraLock;
use crate::scene::{PickTarget, Scene, ScenePick};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GizmoAxis {
    X,
    Y,
    Z,
}

impl GizmoAxis {
    pub const ALL: [GizmoAxis; 3] = [GizmoAxis::X, GizmoAxis::Y, GizmoAxis::Z];

    #[inline]
    pub fn direction(self, frame: &LocalFrame) -> DVec3 {
        match self {
            GizmoAxis::X => frame.east,
            GizmoAxis::Y => frame.north,
            GizmoAxis::Z => frame.up,
        }
    }

    #[inline]
    pub fn color(self) -> Color {
        match self {
            GizmoAxis::X => Color::RED,
            GizmoAxis::Y => Color::GREEN,
            GizmoAxis::Z => Color::BLUE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GizmoTarget {
    Area(AreaId),
    Line(LineId),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GizmoSettings {
    pub axis_length: f64,
    pub handle_offset: f64,
    pub drag_speed: f64,
    pub width: f64,
    pub hover_width: f64,
}

impl From<&GizmoConfig> for GizmoSettings {
    fn from(config: &GizmoConfig) -> Self {
        Self {
            axis_length: config.axis_length,
            handle_offset: config.handle_offset,
            drag_speed: config.drag_speed,
            width: config.width,
            hover_width: config.hover_width,
        }
    }
}

impl Default for GizmoSettings {
    fn default() -> Self {
        Self::from(&GizmoConfig::default())
    }
}

/// 包含拖拽轴并朝向相机的平面。法向为相机视线与轴向的叉积，
/// 二者平行时改用相机上方向。
pub fn drag_plane(camera: &CameraPose, axis: DVec3, through: DVec3) -> Option<Plane> {
    let mut normal = camera.direction.cross(axis);
    if normal.length_squared() <= f64::EPSILON * f64::EPSILON {
        normal = camera.up.cross(axis);
    }
    if normal.length_squared() <= f64::EPSILON * f64::EPSILON {
        return None;
    }
    Some(Plane::from_point_normal(through, normal))
}

/// 位移在轴向上的分量乘以速度系数。
#[inline]
pub fn axis_translation(from: DVec3, to: DVec3, axis: DVec3, speed: f64) -> DVec3 {
    axis * ((to - from).dot(axis) * speed)
}

/// 目标当前位置：面取质心，线段取中点。
pub fn target_position<B: SceneBackend>(scene: &Scene<B>, target: GizmoTarget) -> Option<DVec3> {
    match target {
        GizmoTarget::Area(id) => scene.document().area(id)?.centroid(),
        GizmoTarget::Line(id) => {
            let [start, end] = scene.document().line_positions(id)?;
            Some((start + end) * 0.5)
        }
    }
}

#[derive(Debug)]
struct Drag {
    axis: GizmoAxis,
    plane: Plane,
    last: DVec3,
    lock: CameraLock,
}

#[derive(Debug)]
struct Shown {
    target: GizmoTarget,
    frame: LocalFrame,
    handles: Vec<(GizmoAxis, RenderHandle)>,
    hovered: Option<GizmoAxis>,
    drag: Option<Drag>,
}

#[derive(Debug, Default)]
pub struct AxisGizmo {
    settings: GizmoSettings,
    shown: Option<Shown>,
}

impl AxisGizmo {
    pub fn new(settings: GizmoSettings) -> Self {
        Self {
            settings,
            shown: None,
        }
    }

    #[inline]
    pub fn target(&self) -> Option<GizmoTarget> {
        self.shown.as_ref().map(|shown| shown.target)
    }

    #[inline]
    pub fn is_shown(&self) -> bool {
        self.shown.is_some()
    }

    #[inline]
    pub fn is_dragging(&self) -> bool {
        self.shown.as_ref().is_some_and(|shown| shown.drag.is_some())
    }

    #[inline]
    pub fn handle_count(&self) -> usize {
        self.shown.as_ref().map_or(0, |shown| shown.handles.len())
    }

    #[inline]
    pub fn hovered(&self) -> Option<GizmoAxis> {
        self.shown.as_ref().and_then(|shown| shown.hovered)
    }

    pub fn handle(&self, axis: GizmoAxis) -> Option<RenderHandle> {
        self.shown
            .as_ref()?
            .handles
            .iter()
            .find(|(a, _)| *a == axis)
            .map(|(_, handle)| *handle)
    }

    /// 手柄中点，便于在屏幕上定位手柄。
    pub fn handle_midpoint<B: SceneBackend>(&self, scene: &Scene<B>, axis: GizmoAxis) -> Option<DVec3> {
        let shown = self.shown.as_ref()?;
        let [start, end] = self.handle_segment(scene, shown, axis)?;
        Some((start + end) * 0.5)
    }

    /// 在目标位置显示 `axis_count` 个手柄（2 为平面模式，3 为空间模式）。
    /// 目标位置无法确定时不做任何事。
    pub fn show<B: SceneBackend>(&mut self, scene: &mut Scene<B>, target: GizmoTarget, axis_count: usize) -> bool {
        self.remove(scene);
        let Some(center) = target_position(scene, target) else {
            debug!(?target, "目标位置未知，跳过显示控件");
            return false;
        };
        let frame = scene.document().ellipsoid().east_north_up(center);
        let mut shown = Shown {
            target,
            frame,
            handles: Vec::new(),
            hovered: None,
            drag: None,
        };
        for axis in GizmoAxis::ALL.into_iter().take(axis_count.clamp(1, 3)) {
            let Some(graphics) = self.handle_graphics(scene, &shown, axis) else {
                continue;
            };
            let handle = scene.add_overlay(graphics, Some(PickTarget::GizmoHandle(axis)));
            shown.handles.push((axis, handle));
        }
        debug!(?target, handles = shown.handles.len(), "显示平移控件");
        self.shown = Some(shown);
        true
    }

    /// 移除手柄并结束拖拽；未显示时调用也是安全的。
    pub fn remove<B: SceneBackend>(&mut self, scene: &mut Scene<B>) {
        let Some(shown) = self.shown.take() else {
            return;
        };
        if let Some(drag) = shown.drag {
            drag.lock.release(scene.backend_mut());
        }
        for (_, handle) in shown.handles {
            scene.remove_overlay(handle);
        }
        debug!(target = ?shown.target, "移除平移控件");
    }

    /// 在手柄上按下指针，开始沿该轴拖拽。
    pub fn begin_drag<B: SceneBackend>(&mut self, scene: &mut Scene<B>, axis: GizmoAxis, point: ScreenPoint) -> bool {
        let Some(shown) = self.shown.as_mut() else {
            return false;
        };
        if shown.drag.is_some() || !shown.handles.iter().any(|(a, _)| *a == axis) {
            return false;
        }
        let Some(start) = scene.backend().resolve_ground_position(point) else {
            return false;
        };
        let direction = axis.direction(&shown.frame);
        let Some(plane) = drag_plane(&scene.backend().camera(), direction, start) else {
            return false;
        };
        let lock = CameraLock::acquire(scene.backend_mut());
        shown.drag = Some(Drag {
            axis,
            plane,
            last: start,
            lock,
        });
        debug!(?axis, target = ?shown.target, "开始拖拽控件");
        true
    }

    /// 拖拽中移动指针：射线与拖拽平面求交，按增量平移目标。
    /// 返回本次施加的平移量；射线未命中时跳过。
    pub fn drag_to<B: SceneBackend>(&mut self, scene: &mut Scene<B>, point: ScreenPoint) -> Option<DVec3> {
        let speed = self.settings.drag_speed;
        let shown = self.shown.as_mut()?;
        let drag = shown.drag.as_mut()?;
        let ray = scene.backend().pick_ray(point)?;
        let end = ray_plane(&ray, &drag.plane)?;
        let delta = axis_translation(drag.last, end, drag.axis.direction(&shown.frame), speed);
        drag.last = end;
        let target = shown.target;
        let applied = match target {
            GizmoTarget::Area(id) => scene.translate_area(id, delta),
            GizmoTarget::Line(id) => scene.translate_line(id, delta),
        };
        if !applied {
            return None;
        }
        self.refresh(scene);
        Some(delta)
    }

    /// 结束拖拽并恢复相机交互。
    pub fn end_drag<B: SceneBackend>(&mut self, scene: &mut Scene<B>) -> bool {
        let Some(drag) = self.shown.as_mut().and_then(|shown| shown.drag.take()) else {
            return false;
        };
        drag.lock.release(scene.backend_mut());
        debug!(axis = ?drag.axis, "结束拖拽控件");
        true
    }

    /// 指针移动：拖拽中则平移目标，否则更新悬停高亮。返回是否处于拖拽。
    pub fn pointer_move<B: SceneBackend>(&mut self, scene: &mut Scene<B>, point: ScreenPoint) -> bool {
        if self.is_dragging() {
            self.drag_to(scene, point);
            return true;
        }
        let hovered = match scene.resolve_pick(point) {
            Some(ScenePick::Target(PickTarget::GizmoHandle(axis))) => Some(axis),
            _ => None,
        };
        let Some(shown) = self.shown.as_mut() else {
            return false;
        };
        if shown.hovered != hovered {
            shown.hovered = hovered;
            self.refresh(scene);
        }
        false
    }

    /// 按目标当前位置重绘手柄，坐标系保持不变。
    pub fn refresh<B: SceneBackend>(&mut self, scene: &mut Scene<B>) {
        let Some(shown) = self.shown.as_ref() else {
            return;
        };
        let updates: Vec<(RenderHandle, Graphics)> = shown
            .handles
            .iter()
            .filter_map(|(axis, handle)| {
                self.handle_graphics(scene, shown, *axis)
                    .map(|graphics| (*handle, graphics))
            })
            .collect();
        for (handle, graphics) in updates {
            scene.update_overlay(handle, graphics);
        }
    }

    fn handle_segment<B: SceneBackend>(&self, scene: &Scene<B>, shown: &Shown, axis: GizmoAxis) -> Option<[DVec3; 2]> {
        let center = target_position(scene, shown.target)?;
        let base = center + shown.frame.east * self.settings.handle_offset;
        let tip = base + axis.direction(&shown.frame) * self.settings.axis_length;
        Some([base, tip])
    }

    fn handle_graphics<B: SceneBackend>(&self, scene: &Scene<B>, shown: &Shown, axis: GizmoAxis) -> Option<Graphics> {
        let [base, tip] = self.handle_segment(scene, shown, axis)?;
        let width = if shown.hovered == Some(axis) && shown.drag.is_none() {
            self.settings.hover_width
        } else {
            self.settings.width
        };
        Some(Graphics::Polyline(PolylineGraphics {
            positions: vec![base, tip],
            color: axis.color(),
            width,
            arrow: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NavigationFlags;
    use crate::headless::HeadlessScene;
    use geodraw_core::document::Document;

    fn scene_with_area() -> (Scene<HeadlessScene>, AreaId) {
        let mut scene = Scene::new(HeadlessScene::default(), Document::new());
        let backend = scene.backend();
        let square = vec![
            backend.ground_point(-10.0, 20.0),
            backend.ground_point(10.0, 20.0),
            backend.ground_point(10.0, 40.0),
            backend.ground_point(-10.0, 40.0),
        ];
        let area = scene.add_area(square);
        (scene, area)
    }

    fn handle_screen(gizmo: &AxisGizmo, scene: &Scene<HeadlessScene>, axis: GizmoAxis) -> ScreenPoint {
        let mid = gizmo.handle_midpoint(scene, axis).unwrap();
        scene.backend().world_to_screen(mid).unwrap()
    }

    /// 手柄在屏幕上由基点指向末端的单位方向。
    fn axis_screen_direction(gizmo: &AxisGizmo, scene: &Scene<HeadlessScene>, axis: GizmoAxis) -> (f64, f64) {
        let mid = gizmo.handle_midpoint(scene, axis).unwrap();
        let a = scene.backend().world_to_screen(mid).unwrap();
        let frame = scene.backend().frame();
        let b = scene
            .backend()
            .world_to_screen(mid + GizmoAxis::direction(axis, frame) * 5.0)
            .unwrap();
        let length = a.distance(b);
        ((b.x - a.x) / length, (b.y - a.y) / length)
    }

    #[test]
    fn translation_is_projected_onto_the_axis() {
        let delta = axis_translation(DVec3::ZERO, DVec3::new(4.0, 3.0, -2.0), DVec3::X, 0.5);
        assert_eq!(delta, DVec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn drag_plane_contains_the_axis() {
        let camera = CameraPose {
            position: DVec3::new(0.0, -10.0, 10.0),
            direction: DVec3::new(0.0, 1.0, -1.0).normalize(),
            up: DVec3::new(0.0, 1.0, 1.0).normalize(),
        };
        let plane = drag_plane(&camera, DVec3::X, DVec3::new(1.0, 2.0, 0.0)).unwrap();
        assert!(plane.normal.dot(DVec3::X).abs() < 1e-12);
        assert!(plane.signed_distance(DVec3::new(1.0, 2.0, 0.0)).abs() < 1e-12);

        // 轴与视线平行时退回到相机上方向
        let along_view = drag_plane(&camera, camera.direction, DVec3::ZERO).unwrap();
        assert!(along_view.normal.dot(camera.direction).abs() < 1e-12);
    }

    #[test]
    fn show_and_remove_are_idempotent() {
        let (mut scene, area) = scene_with_area();
        let baseline = scene.backend().graphics_count();
        let mut gizmo = AxisGizmo::default();

        gizmo.remove(&mut scene);
        assert!(gizmo.show(&mut scene, GizmoTarget::Area(area), 3));
        assert_eq!(gizmo.handle_count(), 3);
        assert_eq!(scene.backend().graphics_count(), baseline + 3);

        // 重新显示会先移除旧手柄
        assert!(gizmo.show(&mut scene, GizmoTarget::Area(area), 2));
        assert_eq!(scene.backend().graphics_count(), baseline + 2);

        gizmo.remove(&mut scene);
        gizmo.remove(&mut scene);
        assert!(!gizmo.is_shown());
        assert_eq!(scene.backend().graphics_count(), baseline);

        let missing = AreaId::new(999);
        assert!(!gizmo.show(&mut scene, GizmoTarget::Area(missing), 3));
        assert_eq!(scene.backend().graphics_count(), baseline);
    }

    #[test]
    fn dragging_east_handle_moves_area_east_and_restores_camera() {
        let (mut scene, area) = scene_with_area();
        let frozen_zoom = NavigationFlags {
            zoom: false,
            ..NavigationFlags::ENABLED
        };
        scene.backend_mut().set_navigation(frozen_zoom);
        let mut gizmo = AxisGizmo::default();
        gizmo.show(&mut scene, GizmoTarget::Area(area), 3);

        let start = handle_screen(&gizmo, &scene, GizmoAxis::X);
        let toward_tip = axis_screen_direction(&gizmo, &scene, GizmoAxis::X);
        assert!(gizmo.begin_drag(&mut scene, GizmoAxis::X, start));
        assert_eq!(scene.backend().navigation(), NavigationFlags::DISABLED);

        let before = scene.document().area(area).unwrap().centroid().unwrap();
        let mut total = DVec3::ZERO;
        for step in 1..=4 {
            let offset = 10.0 * step as f64;
            let point = ScreenPoint::new(start.x + toward_tip.0 * offset, start.y + toward_tip.1 * offset);
            total += gizmo.drag_to(&mut scene, point).unwrap();
        }
        let after = scene.document().area(area).unwrap().centroid().unwrap();
        let frame = scene.backend().frame();
        let moved = frame.to_local(after) - frame.to_local(before);
        assert!(moved.x > 1.0, "area should move east: {moved:?}");
        assert!(moved.y.abs() < 1e-3);
        assert!((after - before - total).length() < 1e-3);

        assert!(gizmo.end_drag(&mut scene));
        assert_eq!(scene.backend().navigation(), frozen_zoom);
        assert!(!gizmo.end_drag(&mut scene));
    }

    #[test]
    fn removing_mid_drag_restores_camera() {
        let (mut scene, area) = scene_with_area();
        let mut gizmo = AxisGizmo::default();
        gizmo.show(&mut scene, GizmoTarget::Area(area), 3);
        let start = handle_screen(&gizmo, &scene, GizmoAxis::Z);
        assert!(gizmo.begin_drag(&mut scene, GizmoAxis::Z, start));
        gizmo.remove(&mut scene);
        assert_eq!(scene.backend().navigation(), NavigationFlags::ENABLED);
    }

    #[test]
    fn hover_widens_handle() {
        let (mut scene, area) = scene_with_area();
        let mut gizmo = AxisGizmo::default();
        gizmo.show(&mut scene, GizmoTarget::Area(area), 3);
        let over = handle_screen(&gizmo, &scene, GizmoAxis::X);
        gizmo.pointer_move(&mut scene, over);
        assert_eq!(gizmo.hovered(), Some(GizmoAxis::X));
        let handle = gizmo.handle(GizmoAxis::X).unwrap();
        match scene.backend().graphics(handle) {
            Some(Graphics::Polyline(line)) => assert_eq!(line.width, 8.0),
            other => panic!("unexpected graphics {other:?}"),
        }

        let away = scene.backend().screen_of_ground(-80.0, -60.0).unwrap();
        gizmo.pointer_move(&mut scene, away);
        assert_eq!(gizmo.hovered(), None);
        match scene.backend().graphics(handle) {
            Some(Graphics::Polyline(line)) => assert_eq!(line.width, 4.0),
            other => panic!("unexpected graphics {other:?}"),
        }
    }
}
