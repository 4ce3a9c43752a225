use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use crate::errors::FrontendError;

/// 脚本来源，便于前端呈现加载信息。
#[derive(Debug, Clone)]
pub enum ScriptSource {
    File(PathBuf),
    Demo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolName {
    Line,
    Area,
    Extrude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyName {
    Escape,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisName {
    X,
    Y,
    Z,
}

/// 以原点为基准的局部坐标（米）：东、北、高。
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Location {
    pub east: f64,
    pub north: f64,
    #[serde(default)]
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    Tool { tool: ToolName },
    Click(Location),
    DoubleClick(Location),
    RightClick(Location),
    Down(Location),
    Move(Location),
    Up(Location),
    Key { key: KeyName },
    Command { line: String },
    Wait { ms: u64 },
    DragGizmo { axis: AxisName, pixels: f64 },
    DragExtrusion { pixels: f64 },
    Building {
        east: f64,
        north: f64,
        half_width: f64,
        half_depth: f64,
        height: f64,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub name: Option<String>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone)]
pub struct LoadedScript {
    pub script: Script,
    pub source: ScriptSource,
}

pub fn load_script(path: impl AsRef<Path>) -> Result<Script, FrontendError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| FrontendError::ScriptIo {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| FrontendError::ScriptParse {
        path: path.to_path_buf(),
        source,
    })
}

/// 显式路径优先且必须可读；否则读取环境变量 `GEODRAW_CLI_SCRIPT`，
/// 失败时回退到内置示例。
pub fn load_script_or_demo(explicit: Option<&Path>) -> Result<LoadedScript, FrontendError> {
    if let Some(path) = explicit {
        let script = load_script(path)?;
        info!(path = %path.display(), steps = script.steps.len(), "加载脚本成功");
        return Ok(LoadedScript {
            script,
            source: ScriptSource::File(path.to_path_buf()),
        });
    }
    if let Some(path) = env::var_os("GEODRAW_CLI_SCRIPT") {
        let path = PathBuf::from(path);
        match load_script(&path) {
            Ok(script) => {
                info!(path = %path.display(), steps = script.steps.len(), "从环境变量加载脚本成功");
                return Ok(LoadedScript {
                    script,
                    source: ScriptSource::File(path),
                });
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "加载脚本失败，回退到内置示例");
            }
        }
    }
    Ok(LoadedScript {
        script: demo_script(),
        source: ScriptSource::Demo,
    })
}

fn at(east: f64, north: f64) -> Location {
    Location {
        east,
        north,
        height: 0.0,
    }
}

/// 内置示例：画面、平移、投影、拉伸，再画一条折线并删除中间锚点，最后点选一栋建筑生成轮廓。
pub fn demo_script() -> Script {
    let mut steps = vec![Step::Tool {
        tool: ToolName::Area,
    }];
    for (east, north) in [(-10.0, 20.0), (10.0, 20.0), (10.0, 40.0), (-10.0, 40.0), (-10.0, 20.0)] {
        steps.push(Step::Click(at(east, north)));
    }
    steps.extend([
        Step::Tool {
            tool: ToolName::Area,
        },
        Step::Click(at(0.0, 30.0)),
        Step::DragGizmo {
            axis: AxisName::X,
            pixels: 30.0,
        },
        Step::Command {
            line: "project_terrain grid".to_string(),
        },
        Step::Tool {
            tool: ToolName::Extrude,
        },
        Step::DragExtrusion { pixels: 25.0 },
        Step::Key {
            key: KeyName::Escape,
        },
        Step::Command {
            line: "clear_selection".to_string(),
        },
        Step::Tool {
            tool: ToolName::Line,
        },
        Step::Click(at(-60.0, -40.0)),
        Step::Click(at(-20.0, -40.0)),
        Step::Click(at(-20.0, -70.0)),
        Step::Click(at(10.0, -70.0)),
        Step::RightClick(at(10.0, -70.0)),
        Step::Tool {
            tool: ToolName::Line,
        },
        Step::Click(at(-20.0, -40.0)),
        Step::Key {
            key: KeyName::Delete,
        },
        Step::Building {
            east: 60.0,
            north: -20.0,
            half_width: 10.0,
            half_depth: 6.0,
            height: 15.0,
        },
        Step::Tool {
            tool: ToolName::Area,
        },
        Step::Click(Location {
            east: 60.0,
            north: -20.0,
            height: 15.0,
        }),
        Step::Tool {
            tool: ToolName::Area,
        },
    ]);
    Script {
        name: Some("内置示例".to_string()),
        steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_tagged_steps() {
        let json = r#"{
            "name": "triangle",
            "steps": [
                {"step": "tool", "tool": "area"},
                {"step": "click", "east": 0, "north": 0},
                {"step": "move", "east": 5.5, "north": -2, "height": 3},
                {"step": "key", "key": "escape"},
                {"step": "command", "line": "project_terrain drape"},
                {"step": "wait", "ms": 1600},
                {"step": "drag_gizmo", "axis": "z", "pixels": 20},
                {"step": "building", "east": 1, "north": 2, "half_width": 3, "half_depth": 4, "height": 5}
            ]
        }"#;
        let script: Script = serde_json::from_str(json).unwrap();
        assert_eq!(script.name.as_deref(), Some("triangle"));
        assert_eq!(script.steps.len(), 8);
        assert_eq!(script.steps[0], Step::Tool { tool: ToolName::Area });
        assert_eq!(
            script.steps[2],
            Step::Move(Location {
                east: 5.5,
                north: -2.0,
                height: 3.0
            })
        );
        assert_eq!(
            script.steps[6],
            Step::DragGizmo {
                axis: AxisName::Z,
                pixels: 20.0
            }
        );
    }

    #[test]
    fn load_errors_carry_the_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"steps\": [{{\"step\": \"teleport\"}}]}}").unwrap();
        let error = load_script(file.path()).unwrap_err();
        assert!(matches!(error, FrontendError::ScriptParse { .. }));

        let missing = file.path().with_extension("missing");
        assert!(matches!(
            load_script_or_demo(Some(&missing)),
            Err(FrontendError::ScriptIo { .. })
        ));
    }

    #[test]
    fn demo_script_is_well_formed() {
        let demo = demo_script();
        assert!(demo.steps.len() > 20);
        assert_eq!(demo.steps.first(), Some(&Step::Tool { tool: ToolName::Area }));
    }
}
