pub mod backend;
pub mod camera_lock;
pub mod command;
pub mod drawing;
pub mod editor;
pub mod extrusion;
pub mod gizmo;
pub mod headless;
pub mod projection;

pub mod errors {
    use geodraw_core::document::DocumentError;
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error("entity with id {0} not found")]
        EntityNotFound(u64),
        #[error("nothing is selected")]
        NoSelection,
        #[error("the current selection is not an area")]
        NoAreaSelected,
        #[error("area {0} has no usable geometry")]
        DegenerateArea(u64),
        #[error("tool `{0}` is not available right now")]
        ToolUnavailable(&'static str),
        #[error(transparent)]
        Document(#[from] DocumentError),
    }
}

pub mod scene {
    use std::collections::HashMap;

    use geodraw_core::document::{AnchorId, AnchorInsert, Area, AreaId, Document, LineId, Removal};
    use geodraw_core::geometry::AreaMeasure;
    use glam::DVec3;
    use tracing::debug;

    use crate::backend::{
        Color, FeatureGeometry, Graphics, LabelGraphics, PickHit, PointGraphics, PolygonGraphics,
        PolylineGraphics, RenderHandle, SceneBackend, ScreenPoint,
    };
    use crate::errors::EngineError;
    use crate::gizmo::GizmoAxis;

    pub const ANCHOR_PIXEL_SIZE: f64 = 8.0;
    pub const ANCHOR_HIGHLIGHT_PIXEL_SIZE: f64 = 10.0;
    pub const LINE_WIDTH: f64 = 2.0;
    pub const LINE_HIGHLIGHT_WIDTH: f64 = 3.0;
    pub const AREA_ALPHA: f32 = 0.5;

    /// 渲染句柄对应的领域对象，拾取时查表得到。
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PickTarget {
        Anchor(AnchorId),
        Line(LineId),
        Area(AreaId),
        GizmoHandle(GizmoAxis),
        ExtrusionArrow,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum ScenePick {
        Target(PickTarget),
        Feature(FeatureGeometry),
    }

    /// 唯一的选中槽位，同一时刻最多选中一种对象。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum Selection {
        #[default]
        None,
        Anchor(AnchorId),
        Line(LineId),
        Area(AreaId),
    }

    impl Selection {
        #[inline]
        pub fn is_none(self) -> bool {
            matches!(self, Selection::None)
        }

        #[inline]
        pub fn anchor(self) -> Option<AnchorId> {
            match self {
                Selection::Anchor(id) => Some(id),
                _ => None,
            }
        }

        #[inline]
        pub fn line(self) -> Option<LineId> {
            match self {
                Selection::Line(id) => Some(id),
                _ => None,
            }
        }

        #[inline]
        pub fn area(self) -> Option<AreaId> {
            match self {
                Selection::Area(id) => Some(id),
                _ => None,
            }
        }
    }

    pub fn anchor_graphics(position: DVec3, highlighted: bool) -> Graphics {
        Graphics::Point(PointGraphics {
            position,
            color: if highlighted { Color::RED } else { Color::ORANGE },
            pixel_size: if highlighted {
                ANCHOR_HIGHLIGHT_PIXEL_SIZE
            } else {
                ANCHOR_PIXEL_SIZE
            },
        })
    }

    pub fn line_graphics(positions: Vec<DVec3>, highlighted: bool) -> Graphics {
        Graphics::Polyline(PolylineGraphics {
            positions,
            color: if highlighted { Color::RED } else { Color::YELLOW },
            width: if highlighted {
                LINE_HIGHLIGHT_WIDTH
            } else {
                LINE_WIDTH
            },
            arrow: false,
        })
    }

    pub fn area_graphics(area: &Area, highlighted: bool) -> Graphics {
        let color = if highlighted { Color::RED } else { Color::YELLOW };
        Graphics::Polygon(PolygonGraphics {
            positions: area.positions().to_vec(),
            color: color.with_alpha(AREA_ALPHA),
            extrusion: area.extruded_height(),
            per_position_height: false,
        })
    }

    pub fn area_label(area: &Area) -> Option<Graphics> {
        Some(Graphics::Label(LabelGraphics {
            position: area.centroid()?,
            text: area.label_text()?,
        }))
    }

    #[derive(Debug)]
    struct AreaVisuals {
        polygon: RenderHandle,
        label: Option<RenderHandle>,
        projection: Vec<RenderHandle>,
    }

    /// 把文档与渲染后端绑在一起：每次变更都同步到图元，并维护拾取查找表。
    #[derive(Debug)]
    pub struct Scene<B> {
        document: Document,
        backend: B,
        targets: HashMap<RenderHandle, PickTarget>,
        anchors: HashMap<AnchorId, RenderHandle>,
        lines: HashMap<LineId, RenderHandle>,
        areas: HashMap<AreaId, AreaVisuals>,
        selection: Selection,
    }

    impl<B: SceneBackend> Scene<B> {
        pub fn new(backend: B, document: Document) -> Self {
            Self {
                document,
                backend,
                targets: HashMap::new(),
                anchors: HashMap::new(),
                lines: HashMap::new(),
                areas: HashMap::new(),
                selection: Selection::None,
            }
        }

        #[inline]
        pub fn document(&self) -> &Document {
            &self.document
        }

        #[inline]
        pub fn backend(&self) -> &B {
            &self.backend
        }

        #[inline]
        pub fn backend_mut(&mut self) -> &mut B {
            &mut self.backend
        }

        #[inline]
        pub fn selection(&self) -> Selection {
            self.selection
        }

        #[inline]
        pub fn anchor_handle(&self, id: AnchorId) -> Option<RenderHandle> {
            self.anchors.get(&id).copied()
        }

        #[inline]
        pub fn line_handle(&self, id: LineId) -> Option<RenderHandle> {
            self.lines.get(&id).copied()
        }

        #[inline]
        pub fn area_handle(&self, id: AreaId) -> Option<RenderHandle> {
            self.areas.get(&id).map(|visuals| visuals.polygon)
        }

        #[inline]
        pub fn projection_handles(&self, id: AreaId) -> &[RenderHandle] {
            self.areas
                .get(&id)
                .map(|visuals| visuals.projection.as_slice())
                .unwrap_or_default()
        }

        pub fn add_anchor(&mut self, position: DVec3) -> AnchorInsert {
            let insert = self.document.add_anchor(position);
            if insert.created {
                let handle = self.backend.add_graphics(anchor_graphics(position, false));
                self.anchors.insert(insert.id, handle);
                self.targets.insert(handle, PickTarget::Anchor(insert.id));
                debug!(anchor = insert.id.get(), "新建锚点");
            }
            insert
        }

        pub fn add_line(&mut self, start: AnchorId, end: AnchorId) -> Result<LineId, EngineError> {
            let id = self.document.add_line(start, end)?;
            let positions = self
                .document
                .line_positions(id)
                .ok_or(EngineError::EntityNotFound(id.get()))?;
            let handle = self
                .backend
                .add_graphics(line_graphics(positions.to_vec(), false));
            self.lines.insert(id, handle);
            self.targets.insert(handle, PickTarget::Line(id));
            debug!(line = id.get(), start = start.get(), end = end.get(), "新建线段");
            Ok(id)
        }

        pub fn remove_line(&mut self, id: LineId) -> Removal {
            let removal = self.document.remove_line(id);
            self.drop_visuals(&removal);
            removal
        }

        pub fn remove_anchor(&mut self, id: AnchorId) -> Removal {
            let removal = self.document.remove_anchor(id);
            self.drop_visuals(&removal);
            removal
        }

        pub fn add_area(&mut self, positions: Vec<DVec3>) -> AreaId {
            let id = self.document.add_area(positions);
            if let Some(area) = self.document.area(id) {
                let polygon = self.backend.add_graphics(area_graphics(area, false));
                let label = area_label(area).map(|g| self.backend.add_graphics(g));
                self.targets.insert(polygon, PickTarget::Area(id));
                self.areas.insert(
                    id,
                    AreaVisuals {
                        polygon,
                        label,
                        projection: Vec::new(),
                    },
                );
                debug!(area = id.get(), vertices = area.positions().len(), "新建面");
            }
            id
        }

        /// 删除面及其投影结果。
        pub fn remove_area(&mut self, id: AreaId) -> bool {
            if self.document.remove_area(id).is_none() {
                return false;
            }
            if let Some(visuals) = self.areas.remove(&id) {
                self.targets.remove(&visuals.polygon);
                self.backend.remove_graphics(visuals.polygon);
                for handle in visuals.label.into_iter().chain(visuals.projection) {
                    self.backend.remove_graphics(handle);
                }
            }
            if self.selection == Selection::Area(id) {
                self.selection = Selection::None;
            }
            debug!(area = id.get(), "删除面");
            true
        }

        /// 平移面；旧的投影结果对应旧几何，一并移除。
        pub fn translate_area(&mut self, id: AreaId, delta: DVec3) -> bool {
            if !self.document.translate_area(id, delta) {
                return false;
            }
            self.clear_projection(id);
            self.restyle_area(id);
            true
        }

        /// 平移线段两端锚点，并重绘所有共享这两个锚点的线段。
        pub fn translate_line(&mut self, id: LineId, delta: DVec3) -> bool {
            let Some(affected) = self.document.translate_line(id, delta) else {
                return false;
            };
            if let Some(line) = self.document.line(id) {
                for anchor in line.anchors() {
                    self.restyle_anchor(anchor);
                }
            }
            for line in affected {
                self.restyle_line(line);
            }
            true
        }

        pub fn set_extrusion(&mut self, id: AreaId, height: f64) -> bool {
            if !self.document.set_extruded_height(id, height) {
                return false;
            }
            self.restyle_area(id);
            true
        }

        pub fn set_surface_measure(&mut self, id: AreaId, surface: Option<AreaMeasure>) -> bool {
            if !self.document.set_surface_measure(id, surface) {
                return false;
            }
            self.restyle_area(id);
            true
        }

        /// 用新的投影图元替换该面已有的投影。
        pub fn set_projection(&mut self, id: AreaId, graphics: Vec<Graphics>) -> bool {
            if !self.areas.contains_key(&id) {
                return false;
            }
            self.clear_projection(id);
            let handles: Vec<RenderHandle> = graphics
                .into_iter()
                .map(|g| self.backend.add_graphics(g))
                .collect();
            debug!(area = id.get(), count = handles.len(), "更新地形投影");
            if let Some(visuals) = self.areas.get_mut(&id) {
                visuals.projection = handles;
            }
            true
        }

        fn clear_projection(&mut self, id: AreaId) {
            let Some(visuals) = self.areas.get_mut(&id) else {
                return;
            };
            for handle in visuals.projection.drain(..) {
                self.backend.remove_graphics(handle);
            }
        }

        /// 切换选中对象：先取消旧对象的高亮，再高亮新对象。
        pub fn select(&mut self, selection: Selection) -> Result<(), EngineError> {
            let exists = match selection {
                Selection::None => true,
                Selection::Anchor(id) => self.document.anchor(id).is_some(),
                Selection::Line(id) => self.document.line(id).is_some(),
                Selection::Area(id) => self.document.area(id).is_some(),
            };
            if !exists {
                return Err(EngineError::EntityNotFound(selection_raw_id(selection)));
            }
            if selection == self.selection {
                return Ok(());
            }
            let previous = std::mem::replace(&mut self.selection, selection);
            self.restyle(previous);
            self.restyle(selection);
            debug!(?previous, current = ?selection, "选中状态变更");
            Ok(())
        }

        /// 清空选中，返回之前是否有选中对象。
        pub fn clear_selection(&mut self) -> bool {
            if self.selection.is_none() {
                return false;
            }
            // 取消选中不会失败
            let _ = self.select(Selection::None);
            true
        }

        /// 拾取像素处的对象，并通过查找表还原为领域对象。
        pub fn resolve_pick(&self, point: ScreenPoint) -> Option<ScenePick> {
            match self.backend.pick(point)? {
                PickHit::Entity(handle) => self.targets.get(&handle).copied().map(ScenePick::Target),
                PickHit::Feature(feature) => Some(ScenePick::Feature(feature)),
            }
        }

        /// 添加不属于文档的辅助图元（控件、橡皮筋线）。
        pub fn add_overlay(&mut self, graphics: Graphics, target: Option<PickTarget>) -> RenderHandle {
            let handle = self.backend.add_graphics(graphics);
            if let Some(target) = target {
                self.targets.insert(handle, target);
            }
            handle
        }

        #[inline]
        pub fn update_overlay(&mut self, handle: RenderHandle, graphics: Graphics) -> bool {
            self.backend.update_graphics(handle, graphics)
        }

        pub fn remove_overlay(&mut self, handle: RenderHandle) -> bool {
            self.targets.remove(&handle);
            self.backend.remove_graphics(handle)
        }

        fn drop_visuals(&mut self, removal: &Removal) {
            for line in &removal.lines {
                if let Some(handle) = self.lines.remove(line) {
                    self.targets.remove(&handle);
                    self.backend.remove_graphics(handle);
                }
                if self.selection == Selection::Line(*line) {
                    self.selection = Selection::None;
                }
            }
            for anchor in &removal.anchors {
                if let Some(handle) = self.anchors.remove(anchor) {
                    self.targets.remove(&handle);
                    self.backend.remove_graphics(handle);
                }
                if self.selection == Selection::Anchor(*anchor) {
                    self.selection = Selection::None;
                }
            }
            if !removal.is_empty() {
                debug!(
                    lines = removal.lines.len(),
                    anchors = removal.anchors.len(),
                    "级联删除完成"
                );
            }
        }

        fn restyle(&mut self, selection: Selection) {
            match selection {
                Selection::None => {}
                Selection::Anchor(id) => self.restyle_anchor(id),
                Selection::Line(id) => self.restyle_line(id),
                Selection::Area(id) => self.restyle_area(id),
            }
        }

        fn restyle_anchor(&mut self, id: AnchorId) {
            let highlighted = self.selection == Selection::Anchor(id);
            if let (Some(anchor), Some(handle)) = (self.document.anchor(id), self.anchors.get(&id)) {
                self.backend
                    .update_graphics(*handle, anchor_graphics(anchor.position(), highlighted));
            }
        }

        fn restyle_line(&mut self, id: LineId) {
            let highlighted = self.selection == Selection::Line(id);
            if let (Some(positions), Some(handle)) =
                (self.document.line_positions(id), self.lines.get(&id))
            {
                self.backend
                    .update_graphics(*handle, line_graphics(positions.to_vec(), highlighted));
            }
        }

        fn restyle_area(&mut self, id: AreaId) {
            let highlighted = self.selection == Selection::Area(id);
            let (Some(area), Some(visuals)) = (self.document.area(id), self.areas.get_mut(&id)) else {
                return;
            };
            self.backend
                .update_graphics(visuals.polygon, area_graphics(area, highlighted));
            match (visuals.label, area_label(area)) {
                (Some(handle), Some(label)) => {
                    self.backend.update_graphics(handle, label);
                }
                (None, Some(label)) => visuals.label = Some(self.backend.add_graphics(label)),
                (Some(handle), None) => {
                    self.backend.remove_graphics(handle);
                    visuals.label = None;
                }
                (None, None) => {}
            }
        }
    }

    fn selection_raw_id(selection: Selection) -> u64 {
        match selection {
            Selection::None => 0,
            Selection::Anchor(id) => id.get(),
            Selection::Line(id) => id.get(),
            Selection::Area(id) => id.get(),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::headless::HeadlessScene;

        fn scene() -> Scene<HeadlessScene> {
            Scene::new(HeadlessScene::default(), Document::new())
        }

        fn triangle(scene: &Scene<HeadlessScene>) -> Vec<DVec3> {
            let backend = scene.backend();
            vec![
                backend.ground_point(0.0, 0.0),
                backend.ground_point(30.0, 0.0),
                backend.ground_point(0.0, 30.0),
            ]
        }

        #[test]
        fn entities_are_rendered_and_pickable() {
            let mut scene = scene();
            let a_pos = scene.backend().ground_point(-20.0, 0.0);
            let b_pos = scene.backend().ground_point(20.0, 0.0);
            let a = scene.add_anchor(a_pos).id;
            let b = scene.add_anchor(b_pos).id;
            let line = scene.add_line(a, b).unwrap();
            assert_eq!(scene.backend().graphics_count(), 3);

            let on_a = scene.backend().world_to_screen(a_pos).unwrap();
            assert_eq!(scene.resolve_pick(on_a), Some(ScenePick::Target(PickTarget::Anchor(a))));
            let mid = scene.backend().screen_of_ground(0.0, 0.0).unwrap();
            assert_eq!(scene.resolve_pick(mid), Some(ScenePick::Target(PickTarget::Line(line))));

            // 吸附到已有锚点时不产生新图元
            let again = scene.add_anchor(a_pos + DVec3::splat(0.1));
            assert!(!again.created);
            assert_eq!(scene.backend().graphics_count(), 3);
        }

        #[test]
        fn highlight_is_an_exact_inverse() {
            let mut scene = scene();
            let a = scene.add_anchor(scene.backend().ground_point(0.0, 0.0)).id;
            let handle = scene.anchor_handle(a).unwrap();
            let before = scene.backend().graphics(handle).cloned();

            scene.select(Selection::Anchor(a)).unwrap();
            match scene.backend().graphics(handle) {
                Some(Graphics::Point(point)) => {
                    assert_eq!(point.color, Color::RED);
                    assert_eq!(point.pixel_size, ANCHOR_HIGHLIGHT_PIXEL_SIZE);
                }
                other => panic!("unexpected graphics {other:?}"),
            }
            assert!(scene.clear_selection());
            assert_eq!(scene.backend().graphics(handle).cloned(), before);
            assert!(!scene.clear_selection());
        }

        #[test]
        fn selection_slot_is_exclusive() {
            let mut scene = scene();
            let positions = triangle(&scene);
            let a = scene.add_anchor(positions[0]).id;
            let b = scene.add_anchor(positions[1]).id;
            let line = scene.add_line(a, b).unwrap();
            let area = scene.add_area(positions);

            scene.select(Selection::Line(line)).unwrap();
            scene.select(Selection::Area(area)).unwrap();
            assert_eq!(scene.selection(), Selection::Area(area));
            let line_handle = scene.line_handle(line).unwrap();
            match scene.backend().graphics(line_handle) {
                Some(Graphics::Polyline(polyline)) => assert_eq!(polyline.width, LINE_WIDTH),
                other => panic!("unexpected graphics {other:?}"),
            }

            let missing = AnchorId::new(4242);
            assert!(matches!(
                scene.select(Selection::Anchor(missing)),
                Err(EngineError::EntityNotFound(4242))
            ));
            assert_eq!(scene.selection(), Selection::Area(area));
        }

        #[test]
        fn removing_selected_entities_clears_selection_and_graphics() {
            let mut scene = scene();
            let positions = triangle(&scene);
            let a = scene.add_anchor(positions[0]).id;
            let b = scene.add_anchor(positions[1]).id;
            let line = scene.add_line(a, b).unwrap();
            scene.select(Selection::Line(line)).unwrap();

            let removal = scene.remove_anchor(a);
            assert_eq!(removal.lines, vec![line]);
            assert_eq!(scene.selection(), Selection::None);
            assert_eq!(scene.backend().graphics_count(), 0);

            let area = scene.add_area(positions);
            scene.select(Selection::Area(area)).unwrap();
            let cyan = Graphics::Polygon(PolygonGraphics {
                positions: triangle(&scene),
                color: Color::CYAN,
                extrusion: 0.0,
                per_position_height: true,
            });
            assert!(scene.set_projection(area, vec![cyan.clone(), cyan]));
            assert_eq!(scene.projection_handles(area).len(), 2);
            // 多边形、标签与两个投影
            assert_eq!(scene.backend().graphics_count(), 4);
            assert!(scene.remove_area(area));
            assert_eq!(scene.selection(), Selection::None);
            assert_eq!(scene.backend().graphics_count(), 0);
            assert!(!scene.remove_area(area));
        }

        #[test]
        fn translating_an_area_moves_polygon_and_label() {
            let mut scene = scene();
            let positions = triangle(&scene);
            let area = scene.add_area(positions);
            let before = scene.document().area(area).unwrap().centroid().unwrap();
            let delta = scene.backend().frame().east * 4.0;
            assert!(scene.translate_area(area, delta));
            let after = scene.document().area(area).unwrap().centroid().unwrap();
            assert!((after - before - delta).length() < 0.01);

            let handle = scene.area_handle(area).unwrap();
            match scene.backend().graphics(handle) {
                Some(Graphics::Polygon(polygon)) => {
                    assert_eq!(polygon.positions, scene.document().area(area).unwrap().positions())
                }
                other => panic!("unexpected graphics {other:?}"),
            }
        }
    }
}
