use std::path::Path;
use std::time::Duration;

use futures::executor::block_on;
use geodraw_config::AppConfig;
use geodraw_core::geometry::LocalFrame;
use geodraw_engine::backend::ScreenPoint;
use geodraw_engine::command::{CommandBus, CommandContext, CommandRequest};
use geodraw_engine::editor::{Editor, Key, PointerEvent};
use geodraw_engine::gizmo::GizmoAxis;
use geodraw_engine::headless::{HeadlessScene, SyntheticTerrain};
use geodraw_engine::scene::Selection;
use glam::DVec3;
use tracing::{debug, info, warn};

use crate::errors::FrontendError;
use crate::loader::{AxisName, KeyName, Location, ScriptSource, Step, ToolName, load_script_or_demo};

/// 每个脚本步骤推进的时钟。
const STEP_INTERVAL: Duration = Duration::from_millis(16);
/// 拖拽步骤拆分成的移动次数。
const DRAG_SEGMENTS: u32 = 4;

/// 演示运行结束后的实体统计。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub anchors: usize,
    pub lines: usize,
    pub areas: usize,
}

/// 在无界面场景中执行脚本，并打印实体概览。
pub fn run_demo(config: &AppConfig, script: Option<&Path>) -> Result<Summary, FrontendError> {
    let loaded = load_script_or_demo(script)?;
    let backend = HeadlessScene::from_demo(&config.demo);
    let frame = *backend.frame();
    let terrain = SyntheticTerrain::sloped(frame, 12.0, 0.05, -0.02);
    let mut runner = Runner {
        editor: Editor::new(backend, config.editor.clone()),
        bus: CommandBus::new(),
        terrain,
        clock: Duration::ZERO,
    };

    for (index, step) in loaded.script.steps.iter().enumerate() {
        debug!(index, ?step, "执行脚本步骤");
        runner.apply(step);
        runner.settle();
    }

    println!("GeoDraw CLI 演示");
    match &loaded.source {
        ScriptSource::File(path) => println!("脚本来源: {}", path.display()),
        ScriptSource::Demo => println!(
            "脚本来源: {}",
            loaded.script.name.as_deref().unwrap_or("内置示例")
        ),
    }
    let mut commands: Vec<&str> = runner.bus.available_commands().copied().collect();
    commands.sort_unstable();
    println!("支持的命令: {}", commands.join(", "));

    let summary = runner.print_summary(&frame);
    info!(
        anchors = summary.anchors,
        lines = summary.lines,
        areas = summary.areas,
        "CLI 演示结束"
    );
    Ok(summary)
}

struct Runner {
    editor: Editor<HeadlessScene>,
    bus: CommandBus<HeadlessScene>,
    terrain: SyntheticTerrain,
    clock: Duration,
}

impl Runner {
    fn screen(&self, location: &Location) -> Option<ScreenPoint> {
        let backend = self.editor.scene().backend();
        let world = backend
            .frame()
            .to_world(DVec3::new(location.east, location.north, location.height));
        backend.world_to_screen(world)
    }

    fn pointer(&mut self, location: &Location, event: fn(ScreenPoint) -> PointerEvent) {
        let Some(point) = self.screen(location) else {
            warn!(?location, "位置不在视野内，跳过");
            return;
        };
        self.editor.handle_pointer(event(point), self.clock);
    }

    fn apply(&mut self, step: &Step) {
        self.clock += STEP_INTERVAL;
        match step {
            Step::Tool { tool } => {
                let active = match tool {
                    ToolName::Line => self.editor.toggle_line_mode(),
                    ToolName::Area => self.editor.toggle_area_mode(),
                    ToolName::Extrude => self.editor.toggle_extrude_mode(),
                };
                debug!(?tool, active, "切换工具");
            }
            Step::Click(location) => self.pointer(location, PointerEvent::Click),
            Step::DoubleClick(location) => self.pointer(location, PointerEvent::DoubleClick),
            Step::RightClick(location) => self.pointer(location, PointerEvent::RightClick),
            Step::Down(location) => self.pointer(location, PointerEvent::Down),
            Step::Move(location) => self.pointer(location, PointerEvent::Move),
            Step::Up(location) => self.pointer(location, PointerEvent::Up),
            Step::Key { key } => {
                let key = match key {
                    KeyName::Escape => Key::Escape,
                    KeyName::Delete => Key::Delete,
                };
                self.editor.handle_key(key);
            }
            Step::Command { line } => {
                let Some(request) = CommandRequest::parse(line) else {
                    return;
                };
                let mut context = CommandContext {
                    editor: &mut self.editor,
                };
                let response = self.bus.dispatch(&request, &mut context);
                if response.success {
                    info!(command = %request.name, message = ?response.message, "命令执行成功");
                } else {
                    warn!(command = %request.name, message = ?response.message, "命令执行失败");
                }
            }
            Step::Wait { ms } => {
                self.clock += Duration::from_millis(*ms);
            }
            Step::DragGizmo { axis, pixels } => {
                let axis = match axis {
                    AxisName::X => GizmoAxis::X,
                    AxisName::Y => GizmoAxis::Y,
                    AxisName::Z => GizmoAxis::Z,
                };
                let frame = *self.editor.scene().backend().frame();
                let Some(mid) = self.editor.gizmo().handle_midpoint(self.editor.scene(), axis) else {
                    warn!(?axis, "平移控件未显示，跳过拖拽");
                    return;
                };
                self.drag(mid, axis.direction(&frame), *pixels);
            }
            Step::DragExtrusion { pixels } => {
                let up = self.editor.scene().backend().frame().up;
                let Some(mid) = self.editor.extrusion().arrow_midpoint(self.editor.scene()) else {
                    warn!("拉伸箭头未显示，跳过拖拽");
                    return;
                };
                self.drag(mid, up, *pixels);
            }
            Step::Building {
                east,
                north,
                half_width,
                half_depth,
                height,
            } => {
                self.editor
                    .scene_mut()
                    .backend_mut()
                    .add_building(*east, *north, *half_width, *half_depth, *height);
            }
        }
        self.editor.tick(self.clock);
    }

    /// 从 `start` 沿 `direction` 在屏幕上的投影方向拖动 `pixels` 像素。
    fn drag(&mut self, start: DVec3, direction: DVec3, pixels: f64) {
        let backend = self.editor.scene().backend();
        let (Some(from), Some(toward)) = (
            backend.world_to_screen(start),
            backend.world_to_screen(start + direction),
        ) else {
            return;
        };
        let length = from.distance(toward);
        if length <= f64::EPSILON {
            return;
        }
        let step_x = (toward.x - from.x) / length * pixels / DRAG_SEGMENTS as f64;
        let step_y = (toward.y - from.y) / length * pixels / DRAG_SEGMENTS as f64;

        self.editor.handle_pointer(PointerEvent::Down(from), self.clock);
        let mut last = from;
        for segment in 1..=DRAG_SEGMENTS {
            self.clock += STEP_INTERVAL;
            last = ScreenPoint::new(from.x + step_x * segment as f64, from.y + step_y * segment as f64);
            self.editor.handle_pointer(PointerEvent::Move(last), self.clock);
        }
        self.editor.handle_pointer(PointerEvent::Up(last), self.clock);
        // 浏览器在抬起后仍会派发一次点击
        self.editor.handle_pointer(PointerEvent::Click(last), self.clock);
    }

    /// 完成所有排队的地形采样。
    fn settle(&mut self) {
        let outcomes = block_on(self.editor.resolve_samples(&self.terrain));
        if !outcomes.is_empty() {
            debug!(count = outcomes.len(), "地形采样完成");
        }
    }

    fn print_summary(&self, frame: &LocalFrame) -> Summary {
        let document = self.editor.document();
        let summary = Summary {
            anchors: document.anchors().count(),
            lines: document.lines().count(),
            areas: document.areas().count(),
        };
        println!(
            "实体统计: 锚点 {} 个, 线段 {} 条, 面 {} 个",
            summary.anchors, summary.lines, summary.areas
        );
        for (id, anchor) in document.anchors() {
            let local = frame.to_local(anchor.position());
            println!(
                "  - 锚点 #{}: ({:.2}, {:.2}, {:.2}), 连接 {} 条线段",
                id.get(),
                local.x,
                local.y,
                local.z,
                anchor.connection_count()
            );
        }
        for (id, line) in document.lines() {
            let [start, end] = line.anchors();
            let length = document
                .line_positions(id)
                .map_or(0.0, |[a, b]| a.distance(b));
            println!(
                "  - 线段 #{}: #{} -> #{}, 长度 {:.2} m",
                id.get(),
                start.get(),
                end.get(),
                length
            );
        }
        for (id, area) in document.areas() {
            let Some(measure) = area.measure() else {
                println!("  - 面 #{}: 顶点 {}, 几何退化", id.get(), area.positions().len());
                continue;
            };
            let centroid = frame.to_local(measure.centroid);
            print!(
                "  - 面 #{}: 顶点 {}, 面积 {:.2} m², 质心 ({:.2}, {:.2}, {:.2}), 拉伸 {:.2} m",
                id.get(),
                area.positions().len(),
                measure.area,
                centroid.x,
                centroid.y,
                centroid.z,
                area.extruded_height()
            );
            match area.surface_measure() {
                Some(surface) => println!(", 地表面积 {:.2} m²", surface.area),
                None => println!(),
            }
        }
        match self.editor.selection() {
            Selection::None => println!("当前尚未选中任何实体。"),
            Selection::Anchor(id) => println!("当前选中锚点 #{}", id.get()),
            Selection::Line(id) => println!("当前选中线段 #{}", id.get()),
            Selection::Area(id) => println!("当前选中面 #{}", id.get()),
        }
        summary
    }
}
