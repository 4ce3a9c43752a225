//! 拉伸会话：选中面上方显示一个竖直箭头，拖拽箭头改变面的拉伸高度。

use geodraw_config::ExtrusionConfig;
use geodraw_core::document::AreaId;
use geodraw_core::geometry::{LocalFrame, Plane, ray_plane};
use glam::DVec3;
use tracing::debug;

use crate::backend::{Color, Graphics, PolylineGraphics, RenderHandle, SceneBackend, ScreenPoint};
use crate::camera_lock::CameraLock;
use crate::gizmo::drag_plane;
use crate::scene::{PickTarget, Scene, ScenePick};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtrusionSettings {
    pub arrow_length: f64,
    pub width: f64,
    pub hover_width: f64,
}

impl From<&ExtrusionConfig> for ExtrusionSettings {
    fn from(config: &ExtrusionConfig) -> Self {
        Self {
            arrow_length: config.arrow_length,
            width: config.width,
            hover_width: config.hover_width,
        }
    }
}

impl Default for ExtrusionSettings {
    fn default() -> Self {
        Self::from(&ExtrusionConfig::default())
    }
}

#[derive(Debug)]
struct Drag {
    plane: Plane,
    last: DVec3,
    lock: CameraLock,
}

#[derive(Debug)]
struct Active {
    area: AreaId,
    base: DVec3,
    frame: LocalFrame,
    arrow: RenderHandle,
    hovered: bool,
    drag: Option<Drag>,
}

#[derive(Debug, Default)]
pub struct ExtrusionSession {
    settings: ExtrusionSettings,
    active: Option<Active>,
}

impl ExtrusionSession {
    pub fn new(settings: ExtrusionSettings) -> Self {
        Self {
            settings,
            active: None,
        }
    }

    #[inline]
    pub fn area(&self) -> Option<AreaId> {
        self.active.as_ref().map(|active| active.area)
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    #[inline]
    pub fn is_dragging(&self) -> bool {
        self.active.as_ref().is_some_and(|active| active.drag.is_some())
    }

    #[inline]
    pub fn arrow(&self) -> Option<RenderHandle> {
        self.active.as_ref().map(|active| active.arrow)
    }

    /// 箭头中点，便于在屏幕上定位箭头。
    pub fn arrow_midpoint<B: SceneBackend>(&self, scene: &Scene<B>) -> Option<DVec3> {
        let active = self.active.as_ref()?;
        let [start, end] = self.arrow_segment(scene, active)?;
        Some((start + end) * 0.5)
    }

    /// 在面的质心上方显示箭头。面不存在或无法量测时返回 `false`。
    pub fn start<B: SceneBackend>(&mut self, scene: &mut Scene<B>, area: AreaId) -> bool {
        self.stop(scene);
        let Some(base) = scene.document().area(area).and_then(|a| a.centroid()) else {
            return false;
        };
        let frame = scene.document().ellipsoid().east_north_up(base);
        let mut active = Active {
            area,
            base,
            frame,
            arrow: RenderHandle::new(0),
            hovered: false,
            drag: None,
        };
        let Some(graphics) = self.arrow_graphics(scene, &active) else {
            return false;
        };
        active.arrow = scene.add_overlay(graphics, Some(PickTarget::ExtrusionArrow));
        debug!(
            area = area.get(),
            height = scene.document().area(area).map(|a| a.extruded_height()),
            "进入拉伸"
        );
        self.active = Some(active);
        true
    }

    /// 移除箭头并结束拖拽，返回之前作用的面。
    pub fn stop<B: SceneBackend>(&mut self, scene: &mut Scene<B>) -> Option<AreaId> {
        let active = self.active.take()?;
        if let Some(drag) = active.drag {
            drag.lock.release(scene.backend_mut());
        }
        scene.remove_overlay(active.arrow);
        debug!(area = active.area.get(), "退出拉伸");
        Some(active.area)
    }

    /// 在箭头上按下指针时开始拖拽，返回是否命中箭头。
    pub fn pointer_down<B: SceneBackend>(&mut self, scene: &mut Scene<B>, point: ScreenPoint) -> bool {
        if !matches!(
            scene.resolve_pick(point),
            Some(ScenePick::Target(PickTarget::ExtrusionArrow))
        ) {
            return false;
        }
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        if active.drag.is_some() {
            return true;
        }
        let Some(plane) = drag_plane(&scene.backend().camera(), active.frame.up, active.base) else {
            return false;
        };
        let Some(start) = scene
            .backend()
            .pick_ray(point)
            .and_then(|ray| ray_plane(&ray, &plane))
        else {
            return false;
        };
        let lock = CameraLock::acquire(scene.backend_mut());
        active.drag = Some(Drag {
            plane,
            last: start,
            lock,
        });
        debug!(area = active.area.get(), "开始拖拽拉伸箭头");
        true
    }

    /// 拖拽中把位移在天向上的分量累加到拉伸高度（不低于 0）；否则更新悬停状态。
    /// 返回是否处于拖拽。
    pub fn pointer_move<B: SceneBackend>(&mut self, scene: &mut Scene<B>, point: ScreenPoint) -> bool {
        let hovered = matches!(
            scene.resolve_pick(point),
            Some(ScenePick::Target(PickTarget::ExtrusionArrow))
        );
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        if active.drag.is_none() {
            if active.hovered != hovered {
                active.hovered = hovered;
                self.refresh(scene);
            }
            return false;
        }
        let Some(drag) = active.drag.as_mut() else {
            return false;
        };
        let Some(end) = scene
            .backend()
            .pick_ray(point)
            .and_then(|ray| ray_plane(&ray, &drag.plane))
        else {
            return true;
        };
        let amount = (end - drag.last).dot(active.frame.up);
        drag.last = end;
        let area = active.area;
        let current = scene
            .document()
            .area(area)
            .map_or(0.0, |a| a.extruded_height());
        scene.set_extrusion(area, (current + amount).max(0.0));
        self.refresh(scene);
        true
    }

    pub fn pointer_up<B: SceneBackend>(&mut self, scene: &mut Scene<B>) -> bool {
        let Some(drag) = self.active.as_mut().and_then(|active| active.drag.take()) else {
            return false;
        };
        drag.lock.release(scene.backend_mut());
        debug!(
            height = self
                .area()
                .and_then(|id| scene.document().area(id))
                .map(|a| a.extruded_height()),
            "结束拖拽拉伸箭头"
        );
        true
    }

    fn refresh<B: SceneBackend>(&self, scene: &mut Scene<B>) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        if let Some(graphics) = self.arrow_graphics(scene, active) {
            scene.update_overlay(active.arrow, graphics);
        }
    }

    fn arrow_segment<B: SceneBackend>(&self, scene: &Scene<B>, active: &Active) -> Option<[DVec3; 2]> {
        let height = scene.document().area(active.area)?.extruded_height();
        let start = active.base + active.frame.up * height;
        Some([start, start + active.frame.up * self.settings.arrow_length])
    }

    fn arrow_graphics<B: SceneBackend>(&self, scene: &Scene<B>, active: &Active) -> Option<Graphics> {
        let [start, end] = self.arrow_segment(scene, active)?;
        let width = if active.hovered && active.drag.is_none() {
            self.settings.hover_width
        } else {
            self.settings.width
        };
        Some(Graphics::Polyline(PolylineGraphics {
            positions: vec![start, end],
            color: Color::BLUE,
            width,
            arrow: true,
        }))
    }
}
