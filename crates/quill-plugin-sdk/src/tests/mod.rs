//! Plugin SDK tests against an in-process fake host.

use std::collections::HashMap;
use std::io::{BufReader, Cursor, pipe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use quill_plugins::methods::{host as host_methods, plugin as plugin_methods};
use quill_plugins::{
    AddHookParams, BufferEdit, BufferInfo, BufferTarget, CommandSpec, EditBufferParams,
    ExecuteCommandParams, InitializeParams, InitializeResult, MessageParams, TriggerHookParams,
    handshake_config,
};
use quill_rpc::{
    ChannelId, Connection, HandshakeError, RpcClient, RpcError, RpcFault, Service, codes,
    decode_params, encode_result,
};
use rstest::{fixture, rstest};
use serde_json::{Value, json};

use crate::{
    BufferProxy, Capability, CapabilitySet, HostClient, Plugin, PluginFailure, ServeError,
    serve_with,
};

// ---------------------------------------------------------------------------
// Fake host
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeState {
    buffers: HashMap<String, BufferInfo>,
    current: Option<String>,
    status: Vec<String>,
    hooks: Vec<AddHookParams>,
}

struct FakeHost {
    state: Mutex<FakeState>,
    triggered: Mutex<Sender<TriggerHookParams>>,
}

impl FakeHost {
    fn new() -> (Arc<Self>, Receiver<TriggerHookParams>) {
        let (sender, receiver) = mpsc::channel();
        let host = Arc::new(Self {
            state: Mutex::new(FakeState::default()),
            triggered: Mutex::new(sender),
        });
        (host, receiver)
    }

    fn with_buffer(self: Arc<Self>, name: &str, content: &str) -> Arc<Self> {
        {
            let mut state = self.state.lock().expect("state lock");
            state.buffers.insert(
                name.to_owned(),
                BufferInfo {
                    name: name.to_owned(),
                    content: content.to_owned(),
                    ..BufferInfo::default()
                },
            );
            state.current = Some(name.to_owned());
        }
        self
    }

    fn buffer(&self, name: &str) -> Option<BufferInfo> {
        self.state
            .lock()
            .expect("state lock")
            .buffers
            .get(name)
            .cloned()
    }

    fn overwrite(&self, name: &str, content: &str) {
        let mut state = self.state.lock().expect("state lock");
        let buffer = state.buffers.get_mut(name).expect("buffer exists");
        buffer.content = content.to_owned();
    }

    fn status(&self) -> Vec<String> {
        self.state.lock().expect("state lock").status.clone()
    }

    fn hooks(&self) -> Vec<AddHookParams> {
        self.state.lock().expect("state lock").hooks.clone()
    }
}

impl Service for FakeHost {
    fn call(&self, method: &str, params: Value) -> Result<Value, RpcFault> {
        let mut state = self.state.lock().expect("state lock");
        match method {
            host_methods::GET_CURRENT_BUFFER => {
                let current = state
                    .current
                    .as_ref()
                    .and_then(|name| state.buffers.get(name));
                encode_result(&current)
            }
            host_methods::FIND_BUFFER => {
                let target: BufferTarget = decode_params(method, params)?;
                encode_result(&state.buffers.get(&target.name))
            }
            host_methods::EDIT_BUFFER => {
                let request: EditBufferParams = decode_params(method, params)?;
                let buffer = state
                    .buffers
                    .get_mut(&request.buffer)
                    .ok_or_else(|| RpcFault::application("no such buffer"))?;
                match request.edit {
                    BufferEdit::SetContent { content } => buffer.content = content,
                    BufferEdit::SetCursor { position } => buffer.position = position,
                    _ => return Err(RpcFault::application("unsupported edit")),
                }
                buffer.is_dirty = true;
                encode_result(buffer)
            }
            host_methods::SET_STATUS => {
                let message: MessageParams = decode_params(method, params)?;
                state.status.push(message.text);
                Ok(Value::Null)
            }
            host_methods::ADD_HOOK => {
                let hook: AddHookParams = decode_params(method, params)?;
                state.hooks.push(hook);
                Ok(Value::Null)
            }
            other => Err(RpcFault::method_not_found(other)),
        }
    }

    fn notify(&self, method: &str, params: Value) {
        if method == host_methods::TRIGGER_HOOK {
            let trigger: TriggerHookParams =
                serde_json::from_value(params).expect("trigger params");
            self.triggered
                .lock()
                .expect("trigger lock")
                .send(trigger)
                .expect("receiver alive");
        }
    }
}

// ---------------------------------------------------------------------------
// Test plugin
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Shouter {
    manifest_queries: AtomicUsize,
}

impl Plugin for Shouter {
    fn name(&self) -> &str {
        "shouter"
    }

    fn version(&self) -> &str {
        "0.3.0"
    }

    fn description(&self) -> &str {
        "Upper-cases buffers"
    }

    fn initialize(&self, host: &HostClient) -> Result<(), PluginFailure> {
        host.add_hook("after-save", "shout")?;
        Ok(())
    }

    fn capabilities(&self) -> CapabilitySet {
        [Capability::Completions, Capability::Hooks]
            .into_iter()
            .collect()
    }

    fn commands(&self) -> Vec<CommandSpec> {
        let calls = self.manifest_queries.fetch_add(1, Ordering::SeqCst);
        let mut commands = vec![
            CommandSpec::new("shout", "Upper-case the current buffer"),
            CommandSpec::new("ping-hook", "Fire the ping hook"),
            CommandSpec::new("fail", "Always fails"),
        ];
        if calls > 0 {
            commands.push(CommandSpec::new("late", "Appears on later queries"));
        }
        commands
    }

    fn execute_command(
        &self,
        host: &HostClient,
        name: &str,
        args: &[String],
    ) -> Result<(), PluginFailure> {
        match name {
            "shout" => {
                let mut buffer = host
                    .current_buffer_proxy()?
                    .ok_or_else(|| PluginFailure::Other(String::from("no current buffer")))?;
                let loud = buffer.content().to_uppercase();
                buffer.set_content(loud)?;
                host.set_status("shouted")?;
                Ok(())
            }
            "ping-hook" => {
                host.trigger_hook("ping", args)?;
                Ok(())
            }
            "fail" => Err(PluginFailure::Other(String::from("boom"))),
            other => Err(PluginFailure::UnknownCommand {
                name: other.to_owned(),
            }),
        }
    }

    fn completions(&self, command: &str, prefix: &str) -> Vec<String> {
        if command != "shout" {
            return Vec::new();
        }
        ["loud", "louder", "quiet"]
            .into_iter()
            .filter(|candidate| candidate.starts_with(prefix))
            .map(String::from)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    plugin: RpcClient,
    callback: ChannelId,
    fake: Arc<FakeHost>,
    triggered: Receiver<TriggerHookParams>,
    connection: Connection,
    serving: Option<JoinHandle<Result<(), ServeError>>>,
}

impl Harness {
    fn initialize_with(&self, host_broker_id: Option<ChannelId>) -> Result<InitializeResult, RpcError> {
        self.plugin.call(
            plugin_methods::INITIALIZE,
            &InitializeParams {
                host_broker_id,
                host_version: String::from("test"),
            },
        )
    }

    fn initialize(&self) -> InitializeResult {
        self.initialize_with(Some(self.callback))
            .expect("initialize should succeed")
    }

    fn execute(&self, name: &str, args: &[&str]) -> Result<(), RpcError> {
        self.plugin.call(
            plugin_methods::EXECUTE_COMMAND,
            &ExecuteCommandParams {
                name: name.to_owned(),
                args: args.iter().map(|arg| (*arg).to_owned()).collect(),
            },
        )
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.connection.close();
        if let Some(serving) = self.serving.take() {
            serving
                .join()
                .expect("serve thread")
                .expect("serve should end cleanly");
        }
    }
}

#[fixture]
fn harness() -> Harness {
    let (plugin_in, host_out) = pipe().expect("pipe");
    let (host_in, plugin_out) = pipe().expect("pipe");
    let env: HashMap<String, String> = handshake_config().environment().into_iter().collect();
    let serving = thread::spawn(move || {
        serve_with(
            Shouter::default(),
            BufReader::new(plugin_in),
            plugin_out,
            move |key| env.get(key).cloned(),
        )
    });

    let mut reader = BufReader::new(host_in);
    handshake_config()
        .await_announcement(&mut reader)
        .expect("plugin should announce itself");

    let connection = Connection::new("host", host_out);
    let (fake, triggered) = FakeHost::new();
    let fake = fake.with_buffer("notes", "hello world");
    let callback = connection
        .broker()
        .register(Arc::clone(&fake) as Arc<dyn Service>)
        .expect("register callbacks");
    connection.start(reader).expect("start");
    let plugin = connection
        .broker()
        .dial(ChannelId::PLUGIN)
        .expect("dial plugin");

    Harness {
        plugin,
        callback,
        fake,
        triggered,
        connection,
        serving: Some(serving),
    }
}

fn fault_code(error: &RpcError) -> Option<i64> {
    error.fault().map(|fault| fault.code)
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[rstest]
fn refuses_to_serve_without_handshake_environment() {
    let error = serve_with(
        Shouter::default(),
        Cursor::new(Vec::new()),
        Vec::new(),
        |_| None,
    )
    .expect_err("serve should refuse");

    assert!(
        matches!(
            error,
            ServeError::Handshake(HandshakeError::MissingCookie { .. })
        ),
        "unexpected error: {error:?}"
    );
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[rstest]
fn identity_is_answered_before_initialize(harness: Harness) {
    let name: String = harness
        .plugin
        .call(plugin_methods::NAME, &Value::Null)
        .expect("name");
    let version: String = harness
        .plugin
        .call(plugin_methods::VERSION, &Value::Null)
        .expect("version");

    assert_eq!(name, "shouter");
    assert_eq!(version, "0.3.0");
}

#[rstest]
fn commands_are_rejected_before_initialize(harness: Harness) {
    let error = harness.execute("shout", &[]).expect_err("not initialised");
    assert_eq!(fault_code(&error), Some(codes::NOT_INITIALISED));
    assert_eq!(harness.fake.buffer("notes").expect("buffer").content, "hello world");
}

#[rstest]
fn initialize_without_broker_id_fails_and_can_be_retried(harness: Harness) {
    let error = harness
        .initialize_with(None)
        .expect_err("missing broker id");
    assert!(error.is_application_error(), "unexpected error: {error:?}");

    harness.initialize();
}

#[rstest]
fn initialize_with_unserved_channel_fails(harness: Harness) {
    let error = harness
        .initialize_with(Some(ChannelId::new(77)))
        .expect_err("dial should fail");
    assert!(error.is_application_error(), "unexpected error: {error:?}");
    assert!(harness.fake.hooks().is_empty());
}

#[rstest]
fn initialize_reports_capabilities_and_dials_back(harness: Harness) {
    let result = harness.initialize();

    let declared: Vec<Capability> = result.capabilities.iter().collect();
    assert_eq!(
        declared,
        [Capability::Commands, Capability::Completions, Capability::Hooks]
    );
    assert_eq!(
        harness.fake.hooks(),
        [AddHookParams {
            event: String::from("after-save"),
            command: String::from("shout"),
        }]
    );
}

#[rstest]
fn second_initialize_is_rejected(harness: Harness) {
    harness.initialize();
    let error = harness
        .initialize_with(Some(harness.callback))
        .expect_err("second initialize");
    assert!(error.is_application_error());
}

#[rstest]
fn cleanup_runs_exactly_once(harness: Harness) {
    harness.initialize();
    harness
        .plugin
        .call::<_, ()>(plugin_methods::CLEANUP, &Value::Null)
        .expect("first cleanup");

    let again = harness
        .plugin
        .call::<_, ()>(plugin_methods::CLEANUP, &Value::Null)
        .expect_err("second cleanup");
    assert!(again.is_application_error());

    let after = harness.execute("shout", &[]).expect_err("cleaned up");
    assert_eq!(fault_code(&after), Some(codes::NOT_INITIALISED));
}

// ---------------------------------------------------------------------------
// Manifest and commands
// ---------------------------------------------------------------------------

#[rstest]
fn manifest_is_captured_once(harness: Harness) {
    let first: Vec<CommandSpec> = harness
        .plugin
        .call(plugin_methods::GET_COMMANDS, &Value::Null)
        .expect("commands");
    let second: Vec<CommandSpec> = harness
        .plugin
        .call(plugin_methods::GET_COMMANDS, &Value::Null)
        .expect("commands");

    assert_eq!(first, second);
    assert!(first.iter().all(|command| command.name != "late"));
}

#[rstest]
fn command_edits_the_host_buffer_through_the_proxy(harness: Harness) {
    harness.initialize();
    harness.execute("shout", &[]).expect("shout");

    let buffer = harness.fake.buffer("notes").expect("buffer");
    assert_eq!(buffer.content, "HELLO WORLD");
    assert!(buffer.is_dirty);
    assert_eq!(harness.fake.status(), ["shouted"]);
}

#[rstest]
#[case::unknown("whisper", "unknown command 'whisper'")]
#[case::failing("fail", "boom")]
fn command_failures_are_application_errors(
    harness: Harness,
    #[case] command: &str,
    #[case] message: &str,
) {
    harness.initialize();
    let error = harness.execute(command, &[]).expect_err("command fails");

    let fault = error.fault().expect("remote fault");
    assert!(fault.is_application(), "unexpected fault: {fault:?}");
    assert!(fault.message.contains(message), "unexpected fault: {fault:?}");
}

#[rstest]
fn hook_triggers_arrive_as_notifications(harness: Harness) {
    harness.initialize();
    harness.execute("ping-hook", &["a", "b"]).expect("ping");

    let trigger = harness
        .triggered
        .recv_timeout(Duration::from_secs(5))
        .expect("trigger delivered");
    assert_eq!(trigger.event, "ping");
    assert_eq!(trigger.args, ["a", "b"]);
}

#[rstest]
#[case::filtered("shout", "lo", vec!["loud", "louder"])]
#[case::unknown_command("whisper", "", Vec::new())]
fn completions_never_fail(
    harness: Harness,
    #[case] command: &str,
    #[case] prefix: &str,
    #[case] expected: Vec<&str>,
) {
    let completions: Vec<String> = harness
        .plugin
        .call(
            plugin_methods::GET_COMPLETIONS,
            &json!({"command": command, "prefix": prefix}),
        )
        .expect("completions");
    assert_eq!(completions, expected);
}

// ---------------------------------------------------------------------------
// Buffer proxy
// ---------------------------------------------------------------------------

struct CallbackLink {
    client: HostClient,
    fake: Arc<FakeHost>,
    _host: Connection,
    _plugin: Connection,
}

#[fixture]
fn link() -> CallbackLink {
    let (plugin_in, host_out) = pipe().expect("pipe");
    let (host_in, plugin_out) = pipe().expect("pipe");
    let host = Connection::new("host", host_out);
    let plugin = Connection::new("plugin", plugin_out);
    let (fake, _triggered) = FakeHost::new();
    let fake = fake.with_buffer("notes", "draft");
    let channel = host
        .broker()
        .register(Arc::clone(&fake) as Arc<dyn Service>)
        .expect("register");
    host.start(BufReader::new(host_in)).expect("start host");
    plugin
        .start(BufReader::new(plugin_in))
        .expect("start plugin");
    let client = HostClient::new(plugin.broker().dial(channel).expect("dial"));
    CallbackLink {
        client,
        fake,
        _host: host,
        _plugin: plugin,
    }
}

fn proxy(link: &CallbackLink) -> BufferProxy {
    link.client
        .current_buffer_proxy()
        .expect("callback")
        .expect("current buffer")
}

#[rstest]
fn snapshots_do_not_follow_host_changes_until_refreshed(link: CallbackLink) {
    let mut buffer = proxy(&link);
    link.fake.overwrite("notes", "rewritten elsewhere");

    assert_eq!(buffer.content(), "draft");
    assert!(buffer.refresh().expect("refresh"));
    assert_eq!(buffer.content(), "rewritten elsewhere");
}

#[rstest]
fn local_snapshot_changes_never_reach_the_host(link: CallbackLink) {
    let mut snapshot = proxy(&link).into_snapshot();
    snapshot.content.push_str(" (local)");

    assert_eq!(link.fake.buffer("notes").expect("buffer").content, "draft");
}

#[rstest]
fn mutators_adopt_the_host_snapshot(link: CallbackLink) {
    let mut buffer = proxy(&link);
    buffer.set_content("final").expect("set content");
    buffer.set_cursor_position(3).expect("set cursor");

    assert_eq!(buffer.content(), "final");
    assert_eq!(buffer.position(), 3);
    assert!(buffer.is_dirty());
    assert_eq!(link.fake.buffer("notes").expect("buffer").content, "final");
}

#[rstest]
fn rejected_edits_leave_the_snapshot_alone(link: CallbackLink) {
    let mut buffer = proxy(&link);
    let error = buffer.delete_range(0, 2).expect_err("unsupported edit");

    assert!(error.is_application_error());
    assert_eq!(buffer.content(), "draft");
}

#[rstest]
fn missing_buffers_are_none(link: CallbackLink) {
    assert_eq!(link.client.find_buffer("nowhere").expect("callback"), None);
}
