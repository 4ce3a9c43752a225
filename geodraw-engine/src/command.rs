use std::collections::HashMap;

use crate::backend::SceneBackend;
use crate::editor::Editor;
use crate::projection::ProjectionKind;

#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub name: String,
    pub args: Vec<String>,
}

impl CommandRequest {
    /// 按空白拆分一行命令文本，首个词为命令名。
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let name = parts.next()?.to_string();
        Some(Self {
            name,
            args: parts.map(str::to_string).collect(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub success: bool,
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

pub trait CommandHandler<B: SceneBackend>: Send + Sync {
    fn name(&self) -> &'static str;
    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_, B>,
    ) -> CommandResponse;
}

pub struct CommandContext<'a, B: SceneBackend> {
    pub editor: &'a mut Editor<B>,
}

pub struct CommandBus<B: SceneBackend> {
    handlers: HashMap<&'static str, Box<dyn CommandHandler<B>>>,
}

impl<B: SceneBackend + 'static> CommandBus<B> {
    pub fn new() -> Self {
        let mut bus = Self {
            handlers: HashMap::new(),
        };
        bus.register(ToggleToolCommand::Line);
        bus.register(ToggleToolCommand::Area);
        bus.register(ToggleToolCommand::Extrude);
        bus.register(DeleteSelectionCommand);
        bus.register(ClearSelectionCommand);
        bus.register(CancelCommand);
        bus.register(ProjectTerrainCommand);
        bus
    }

    pub fn register<H: CommandHandler<B> + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.name(), Box::new(handler));
    }

    pub fn dispatch(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_, B>,
    ) -> CommandResponse {
        if let Some(handler) = self.handlers.get(request.name.as_str()) {
            handler.execute(request, context)
        } else {
            CommandResponse::err(format!("未知命令: {}", request.name))
        }
    }

    pub fn available_commands(&self) -> impl Iterator<Item = &&'static str> {
        self.handlers.keys()
    }
}

impl<B: SceneBackend + 'static> Default for CommandBus<B> {
    fn default() -> Self {
        Self::new()
    }
}

enum ToggleToolCommand {
    Line,
    Area,
    Extrude,
}

impl<B: SceneBackend> CommandHandler<B> for ToggleToolCommand {
    fn name(&self) -> &'static str {
        match self {
            ToggleToolCommand::Line => "toggle_line",
            ToggleToolCommand::Area => "toggle_area",
            ToggleToolCommand::Extrude => "toggle_extrude",
        }
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_, B>,
    ) -> CommandResponse {
        let editor = &mut *context.editor;
        let (active, label) = match self {
            ToggleToolCommand::Line => (editor.toggle_line_mode(), "画线"),
            ToggleToolCommand::Area => (editor.toggle_area_mode(), "画面"),
            ToggleToolCommand::Extrude => {
                let was_active = editor.extrusion().is_active();
                let active = editor.toggle_extrude_mode();
                if !active && !was_active {
                    return CommandResponse::err("拉伸需要先选中一个面");
                }
                (active, "拉伸")
            }
        };
        if active {
            CommandResponse::ok(format!("{label}工具已开启"))
        } else {
            CommandResponse::ok(format!("{label}工具已关闭"))
        }
    }
}

struct DeleteSelectionCommand;

impl<B: SceneBackend> CommandHandler<B> for DeleteSelectionCommand {
    fn name(&self) -> &'static str {
        "delete_selection"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_, B>,
    ) -> CommandResponse {
        if context.editor.drawing().is_placing() {
            return CommandResponse::err("绘制中不能删除");
        }
        match context.editor.delete_selection() {
            Ok(()) => CommandResponse::ok("选中对象已删除"),
            Err(error) => CommandResponse::err(error.to_string()),
        }
    }
}

struct ClearSelectionCommand;

impl<B: SceneBackend> CommandHandler<B> for ClearSelectionCommand {
    fn name(&self) -> &'static str {
        "clear_selection"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_, B>,
    ) -> CommandResponse {
        context.editor.clear_selection();
        CommandResponse::ok("选中已清空")
    }
}

struct CancelCommand;

impl<B: SceneBackend> CommandHandler<B> for CancelCommand {
    fn name(&self) -> &'static str {
        "cancel"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_, B>,
    ) -> CommandResponse {
        if context.editor.handle_key(crate::editor::Key::Escape) {
            CommandResponse::ok("当前会话已取消")
        } else {
            CommandResponse::ok("没有进行中的会话")
        }
    }
}

struct ProjectTerrainCommand;

impl<B: SceneBackend> CommandHandler<B> for ProjectTerrainCommand {
    fn name(&self) -> &'static str {
        "project_terrain"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_, B>,
    ) -> CommandResponse {
        let kind = match request.args.first() {
            None => ProjectionKind::Grid,
            Some(arg) => match arg.parse::<ProjectionKind>() {
                Ok(kind) => kind,
                Err(message) => return CommandResponse::err(message),
            },
        };
        match context.editor.project_terrain(kind) {
            Ok(ticket) => CommandResponse::ok(format!(
                "已提交{kind}投影请求 #{} (面 {})",
                ticket.id(),
                ticket.area().get()
            )),
            Err(error) => CommandResponse::err(error.to_string()),
        }
    }
}
