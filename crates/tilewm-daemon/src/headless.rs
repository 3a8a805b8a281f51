//! Headless window manager
//!
//! A layout model without a window system: outputs and workspaces come from
//! the configuration, and a small command language moves focus between
//! workspaces, manages marks and switches binding modes. It answers every
//! query the IPC layer makes, which is enough to drive bars and scripts
//! against the daemon without an X server.

use serde_json::{json, Value};
use tilewm_config::{BarConfig, Config};
use tilewm_ipc::{BarConfigReply, CommandReply, OutputReply, Rect, WorkspaceReply};
use tracing::{debug, info};

use crate::events::IpcContext;
use crate::wm::{CommandOutcome, WindowManager};

/// Name of the binding mode active at startup
const DEFAULT_MODE: &str = "default";

#[derive(Debug, Clone)]
struct Output {
    name: String,
    rect: Rect,
    primary: bool,
    /// Index of the workspace shown on this output
    current: Option<usize>,
}

#[derive(Debug, Clone)]
struct Workspace {
    name: String,
    /// Index into `HeadlessWm::outputs`
    output: usize,
    urgent: bool,
}

impl Workspace {
    /// Leading decimal digits of the name, if any.
    fn num(&self) -> Option<i32> {
        workspace_number(&self.name)
    }
}

fn workspace_number(name: &str) -> Option<i32> {
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[derive(Debug, Clone)]
pub struct HeadlessWm {
    outputs: Vec<Output>,
    workspaces: Vec<Workspace>,
    focused: Option<usize>,
    marks: Vec<String>,
    mode: String,
    bars: Vec<BarConfig>,
    renders: usize,
}

impl HeadlessWm {
    pub fn from_config(config: &Config) -> Self {
        let mut outputs: Vec<Output> = config
            .outputs
            .iter()
            .map(|o| Output {
                name: o.name.clone(),
                rect: Rect::new(o.x, o.y, o.width, o.height),
                primary: o.primary,
                current: None,
            })
            .collect();

        if outputs.is_empty() {
            outputs.push(Output {
                name: "headless-0".to_string(),
                rect: Rect::new(0, 0, 1920, 1080),
                primary: true,
                current: None,
            });
        }

        let workspaces = config
            .workspaces
            .iter()
            .map(|ws| Workspace {
                name: ws.name.clone(),
                output: ws
                    .output
                    .as_deref()
                    .and_then(|name| outputs.iter().position(|o| o.name == name))
                    .unwrap_or(0),
                urgent: false,
            })
            .collect();

        let mut wm = Self {
            outputs,
            workspaces,
            focused: None,
            marks: Vec::new(),
            mode: DEFAULT_MODE.to_string(),
            bars: config.bars.clone(),
            renders: 0,
        };

        // Every output shows something
        for output in 0..wm.outputs.len() {
            let current = match wm.workspaces.iter().position(|ws| ws.output == output) {
                Some(index) => index,
                None => {
                    let name = wm.next_free_number().to_string();
                    wm.workspaces.push(Workspace {
                        name,
                        output,
                        urgent: false,
                    });
                    wm.workspaces.len() - 1
                }
            };
            wm.outputs[output].current = Some(current);
        }

        let focus_output = wm.outputs.iter().position(|o| o.primary).unwrap_or(0);
        wm.focused = wm.outputs[focus_output].current;

        info!(
            "Headless layout: {} output(s), {} workspace(s)",
            wm.outputs.len(),
            wm.workspaces.len()
        );
        wm
    }

    /// How many times the layout was rendered
    pub fn render_count(&self) -> usize {
        self.renders
    }

    pub fn focused_workspace(&self) -> Option<&str> {
        self.focused.map(|i| self.workspaces[i].name.as_str())
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    fn next_free_number(&self) -> i32 {
        (1..)
            .find(|n| self.workspaces.iter().all(|ws| ws.num() != Some(*n)))
            .unwrap_or(1)
    }

    fn focused_output(&self) -> usize {
        self.focused.map(|i| self.workspaces[i].output).unwrap_or(0)
    }

    fn workspace_json(&self, index: Option<usize>) -> Value {
        match index {
            Some(i) => {
                let ws = &self.workspaces[i];
                json!({ "name": ws.name, "num": ws.num(), "output": self.outputs[ws.output].name })
            }
            None => Value::Null,
        }
    }

    /// Switch to `name`, creating it on the focused output if needed.
    ///
    /// Returns whether focus moved.
    fn focus_workspace(&mut self, name: &str, ipc: &mut IpcContext<'_>) -> bool {
        let index = match self.workspaces.iter().position(|ws| ws.name == name) {
            Some(index) => index,
            None => {
                self.workspaces.push(Workspace {
                    name: name.to_string(),
                    output: self.focused_output(),
                    urgent: false,
                });
                let index = self.workspaces.len() - 1;
                let payload = json!({ "change": "init", "current": self.workspace_json(Some(index)) });
                ipc.publish("workspace", &payload.to_string());
                index
            }
        };

        if self.focused == Some(index) {
            return false;
        }

        let old = self.focused;
        self.focused = Some(index);
        let output = self.workspaces[index].output;
        self.outputs[output].current = Some(index);
        self.workspaces[index].urgent = false;

        let payload = json!({
            "change": "focus",
            "current": self.workspace_json(Some(index)),
            "old": self.workspace_json(old),
        });
        ipc.publish("workspace", &payload.to_string());
        true
    }

    fn run_one(&mut self, command: &str, ipc: &mut IpcContext<'_>) -> (CommandReply, bool) {
        let mut words = command.split_whitespace();
        let Some(verb) = words.next() else {
            return (CommandReply::failed("Empty command"), false);
        };
        let argument = words.collect::<Vec<_>>().join(" ");

        match verb.to_lowercase().as_str() {
            "workspace" => {
                if argument.is_empty() {
                    return (CommandReply::failed("workspace: missing name"), false);
                }
                let changed = self.focus_workspace(&argument, ipc);
                (CommandReply::ok(), changed)
            }
            "mark" => {
                if argument.is_empty() {
                    return (CommandReply::failed("mark: missing name"), false);
                }
                if !self.marks.contains(&argument) {
                    self.marks.push(argument);
                }
                (CommandReply::ok(), false)
            }
            "unmark" => {
                if argument.is_empty() {
                    self.marks.clear();
                } else {
                    self.marks.retain(|mark| *mark != argument);
                }
                (CommandReply::ok(), false)
            }
            "mode" => {
                if argument.is_empty() {
                    return (CommandReply::failed("mode: missing name"), false);
                }
                self.mode = argument;
                let payload = json!({ "change": self.mode });
                ipc.publish("mode", &payload.to_string());
                (CommandReply::ok(), false)
            }
            "nop" => (CommandReply::ok(), false),
            _ => (
                CommandReply::failed(format!("Unknown command: {}", verb)),
                false,
            ),
        }
    }
}

impl WindowManager for HeadlessWm {
    fn run_command(&mut self, command: &str, ipc: &mut IpcContext<'_>) -> CommandOutcome {
        let mut outcome = CommandOutcome::default();

        for part in command.split([';', ',']).map(str::trim) {
            if part.is_empty() {
                continue;
            }
            let (reply, changed) = self.run_one(part, ipc);
            if let Some(error) = &reply.error {
                debug!("Command {:?} failed: {}", part, error);
            }
            outcome.results.push(reply);
            outcome.needs_render |= changed;
        }

        outcome
    }

    fn tree(&self) -> Value {
        let mut next_id = 1u64;
        let mut id = || {
            next_id += 1;
            next_id
        };

        let outputs: Vec<Value> = self
            .outputs
            .iter()
            .enumerate()
            .map(|(index, output)| {
                let workspaces: Vec<Value> = self
                    .workspaces
                    .iter()
                    .enumerate()
                    .filter(|(_, ws)| ws.output == index)
                    .map(|(ws_index, ws)| {
                        json!({
                            "id": id(),
                            "type": "workspace",
                            "name": ws.name,
                            "num": ws.num(),
                            "rect": output.rect,
                            "focused": self.focused == Some(ws_index),
                            "urgent": ws.urgent,
                            "nodes": [],
                        })
                    })
                    .collect();

                json!({
                    "id": id(),
                    "type": "output",
                    "name": output.name,
                    "rect": output.rect,
                    "primary": output.primary,
                    "nodes": [{
                        "id": id(),
                        "type": "con",
                        "name": "content",
                        "rect": output.rect,
                        "nodes": workspaces,
                    }],
                })
            })
            .collect();

        // Far edges in i64: any i32 offset plus any u32 extent fits
        let (right, bottom) = self.outputs.iter().fold((0i64, 0i64), |(right, bottom), o| {
            (
                right.max(i64::from(o.rect.x) + i64::from(o.rect.width)),
                bottom.max(i64::from(o.rect.y) + i64::from(o.rect.height)),
            )
        });
        let extent = |edge: i64| u32::try_from(edge).unwrap_or(u32::MAX);
        let root_rect = Rect::new(0, 0, extent(right), extent(bottom));

        json!({
            "id": 1,
            "type": "root",
            "name": "root",
            "rect": root_rect,
            "nodes": outputs,
        })
    }

    fn workspaces(&self) -> Vec<WorkspaceReply> {
        self.workspaces
            .iter()
            .enumerate()
            .map(|(index, ws)| {
                let output = &self.outputs[ws.output];
                WorkspaceReply {
                    num: ws.num(),
                    name: ws.name.clone(),
                    visible: output.current == Some(index),
                    focused: self.focused == Some(index),
                    rect: output.rect,
                    output: output.name.clone(),
                    urgent: ws.urgent,
                }
            })
            .collect()
    }

    fn outputs(&self) -> Vec<OutputReply> {
        self.outputs
            .iter()
            .map(|output| OutputReply {
                name: output.name.clone(),
                active: true,
                primary: output.primary,
                rect: output.rect,
                current_workspace: output.current.map(|i| self.workspaces[i].name.clone()),
            })
            .collect()
    }

    fn marks(&self) -> Vec<String> {
        self.marks.clone()
    }

    fn bar_ids(&self) -> Vec<String> {
        self.bars.iter().map(|bar| bar.id.clone()).collect()
    }

    fn bar_config(&self, id: &str) -> Option<BarConfigReply> {
        self.bars.iter().find(|bar| bar.id == id).map(bar_reply)
    }

    fn render(&mut self) {
        self.renders += 1;
        debug!(
            "Render #{}: focused workspace {:?}",
            self.renders,
            self.focused_workspace()
        );
    }
}

fn bar_reply(bar: &BarConfig) -> BarConfigReply {
    BarConfigReply {
        id: bar.id.clone(),
        outputs: bar.outputs.clone(),
        tray_output: bar.tray_output.clone(),
        socket_path: bar.socket_path.clone(),
        mode: bar.mode.as_str().to_string(),
        hidden_state: bar.hidden_state.as_str().to_string(),
        modifier: bar.modifier.as_str().to_string(),
        position: bar.position.as_str().to_string(),
        status_command: bar.status_command.clone(),
        font: bar.font.clone(),
        workspace_buttons: bar.workspace_buttons,
        binding_mode_indicator: bar.binding_mode_indicator,
        verbose: bar.verbose,
        colors: bar.colors.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientRegistry;
    use tilewm_config::parse_config_str;
    use bytes::BytesMut;
    use std::io::Read;
    use std::os::unix::net::UnixStream as StdUnixStream;
    use tilewm_ipc::{EventType, IpcCodec, Message};
    use tokio::net::UnixStream;
    use tokio_util::codec::Decoder;

    const TWO_OUTPUTS: &str = r#"
output "DP-1" {
    rect 0 0 2560 1440
}
output "HDMI-1" {
    rect 2560 0 1920 1080
    primary
}
workspace "1" {
    output "DP-1"
}
workspace "2: mail" {
    output "HDMI-1"
}
workspace "web" {
    output "HDMI-1"
}
"#;

    fn wm(src: &str) -> HeadlessWm {
        HeadlessWm::from_config(&parse_config_str(src).unwrap())
    }

    fn run(wm: &mut HeadlessWm, clients: &mut ClientRegistry, command: &str) -> CommandOutcome {
        let mut ipc = IpcContext::new(clients);
        wm.run_command(command, &mut ipc)
    }

    /// Registry with one client subscribed to `events`, plus its peer end.
    fn subscribed(events: &[&str]) -> (ClientRegistry, StdUnixStream) {
        let mut clients = ClientRegistry::new(1024 * 1024, 1024 * 1024);
        let (stream, peer) = StdUnixStream::pair().unwrap();
        stream.set_nonblocking(true).unwrap();
        peer.set_nonblocking(true).unwrap();
        let fd = clients.register(UnixStream::from_std(stream).unwrap());
        clients
            .find_mut(fd)
            .unwrap()
            .subscribe(events.iter().map(|e| e.to_string()));
        (clients, peer)
    }

    /// Every message delivered to `peer` so far.
    async fn drain(clients: &mut ClientRegistry, peer: &mut StdUnixStream) -> Vec<Message> {
        clients.settle().await;

        let mut buf = BytesMut::new();
        let mut chunk = [0u8; 4096];
        while let Ok(n) = peer.read(&mut chunk) {
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        let mut codec = IpcCodec::new();
        let mut messages = Vec::new();
        while let Some(message) = codec.decode(&mut buf).unwrap() {
            messages.push(message);
        }
        messages
    }

    // ========================================================================
    // Layout
    // ========================================================================

    #[test]
    fn test_default_layout_without_config() {
        let wm = wm("");
        let outputs = wm.outputs();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].name, "headless-0");
        assert_eq!(outputs[0].current_workspace.as_deref(), Some("1"));
        assert_eq!(wm.focused_workspace(), Some("1"));
        assert_eq!(wm.mode(), "default");
    }

    #[test]
    fn test_focus_starts_on_primary_output() {
        let wm = wm(TWO_OUTPUTS);
        assert_eq!(wm.focused_workspace(), Some("2: mail"));

        let workspaces = wm.workspaces();
        let visible: Vec<&str> = workspaces
            .iter()
            .filter(|ws| ws.visible)
            .map(|ws| ws.name.as_str())
            .collect();
        assert_eq!(visible, vec!["1", "2: mail"]);
        assert_eq!(workspaces[1].num, Some(2));
        assert_eq!(workspaces[2].num, None);
        assert_eq!(workspaces[2].rect, Rect::new(2560, 0, 1920, 1080));
    }

    #[test]
    fn test_output_without_workspace_gets_one() {
        let wm = wm(r#"
output "A" { rect 0 0 800 600; }
output "B" { rect 800 0 800 600; }
workspace "1" { output "A"; }
"#);
        let outputs = wm.outputs();
        assert_eq!(outputs[1].current_workspace.as_deref(), Some("2"));
    }

    #[test]
    fn test_tree_nests_workspaces_under_outputs() {
        let tree = wm(TWO_OUTPUTS).tree();
        assert_eq!(tree["type"], "root");
        assert_eq!(tree["rect"]["width"], 4480);

        let hdmi = &tree["nodes"][1];
        assert_eq!(hdmi["name"], "HDMI-1");
        let names: Vec<&str> = hdmi["nodes"][0]["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|ws| ws["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["2: mail", "web"]);
        assert_eq!(hdmi["nodes"][0]["nodes"][0]["focused"], true);
    }

    // ========================================================================
    // Commands
    // ========================================================================

    #[tokio::test]
    async fn test_workspace_switch_publishes_focus() {
        let mut wm = wm(TWO_OUTPUTS);
        let (mut clients, mut peer) = subscribed(&["workspace"]);

        let outcome = run(&mut wm, &mut clients, "workspace web");
        assert_eq!(outcome.results, vec![CommandReply::ok()]);
        assert!(outcome.needs_render);
        assert_eq!(wm.focused_workspace(), Some("web"));

        let events = drain(&mut clients, &mut peer).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventType::Workspace.code());
        let payload: Value = serde_json::from_slice(&events[0].payload).unwrap();
        assert_eq!(payload["change"], "focus");
        assert_eq!(payload["current"]["name"], "web");
        assert_eq!(payload["old"]["name"], "2: mail");
    }

    #[tokio::test]
    async fn test_new_workspace_publishes_init_then_focus() {
        let mut wm = wm(TWO_OUTPUTS);
        let (mut clients, mut peer) = subscribed(&["workspace"]);

        run(&mut wm, &mut clients, "workspace 7");

        let changes: Vec<String> = drain(&mut clients, &mut peer)
            .await
            .iter()
            .map(|m| {
                let v: Value = serde_json::from_slice(&m.payload).unwrap();
                v["change"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(changes, vec!["init", "focus"]);

        let created = wm.workspaces().into_iter().find(|ws| ws.name == "7").unwrap();
        assert_eq!(created.output, "HDMI-1");
        assert!(created.focused);
    }

    #[tokio::test]
    async fn test_focusing_current_workspace_is_noop() {
        let mut wm = wm("");
        let (mut clients, mut peer) = subscribed(&["workspace"]);

        let outcome = run(&mut wm, &mut clients, "workspace 1");
        assert!(!outcome.needs_render);
        assert!(drain(&mut clients, &mut peer).await.is_empty());
    }

    #[tokio::test]
    async fn test_mode_event() {
        let mut wm = wm("");
        let (mut clients, mut peer) = subscribed(&["mode"]);

        run(&mut wm, &mut clients, "mode resize");
        assert_eq!(wm.mode(), "resize");

        let events = drain(&mut clients, &mut peer).await;
        assert_eq!(events[0].kind, EventType::Mode.code());
        assert_eq!(&events[0].payload[..], br#"{"change":"resize"}"#);
    }

    #[tokio::test]
    async fn test_marks() {
        let mut wm = wm("");
        let (mut clients, _peer) = subscribed(&[]);

        run(&mut wm, &mut clients, "mark a; mark b, mark a");
        assert_eq!(wm.marks(), vec!["a", "b"]);

        run(&mut wm, &mut clients, "unmark a");
        assert_eq!(wm.marks(), vec!["b"]);

        run(&mut wm, &mut clients, "unmark");
        assert!(wm.marks().is_empty());
    }

    #[tokio::test]
    async fn test_one_result_per_subcommand() {
        let mut wm = wm("");
        let (mut clients, _peer) = subscribed(&[]);

        let outcome = run(&mut wm, &mut clients, "nop; bogus arg ; workspace");
        assert_eq!(outcome.results.len(), 3);
        assert!(outcome.results[0].success);
        assert_eq!(
            outcome.results[1].error.as_deref(),
            Some("Unknown command: bogus")
        );
        assert!(!outcome.results[2].success);
    }

    #[test]
    fn test_root_rect_covers_outputs_far_from_origin() {
        let wm = wm(r#"
output "far" { rect 2147483000 0 1920 1080; }
output "huge" { rect 0 2147483647 640 4294967295; }
"#);
        let tree = wm.tree();
        assert_eq!(tree["rect"]["width"], 2147483000u64 + 1920);
        assert_eq!(tree["rect"]["height"], u64::from(u32::MAX));
    }

    #[test]
    fn test_render_counts() {
        let mut wm = wm("");
        wm.render();
        wm.render();
        assert_eq!(wm.render_count(), 2);
    }

    #[test]
    fn test_bar_reply_from_config() {
        let wm = wm(r##"
bar "top" {
    mode "hide"
    modifier "Mod1"
    colors {
        background "#000000"
    }
}
"##);
        assert_eq!(wm.bar_ids(), vec!["top"]);
        let bar = wm.bar_config("top").unwrap();
        assert_eq!(bar.mode, "hide");
        assert_eq!(bar.modifier, "Mod1");
        assert_eq!(bar.position, "bottom");
        assert_eq!(bar.colors["background"], "#000000");
        assert!(wm.bar_config("bottom").is_none());
    }

    #[test]
    fn test_workspace_number_prefix() {
        assert_eq!(workspace_number("3"), Some(3));
        assert_eq!(workspace_number("12: code"), Some(12));
        assert_eq!(workspace_number("web"), None);
        assert_eq!(workspace_number(""), None);
    }
}
