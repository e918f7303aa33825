//! Unit tests for the host callback service.

use std::sync::Mutex;
use std::thread;

use camino::Utf8PathBuf;
use quill_plugins::{
    BufferEdit, BufferInfo, CommandSpec, MajorModeSpec, PluginIdentity, PluginManifest,
};
use quill_rpc::codes;
use rstest::{fixture, rstest};
use serde_json::json;
use tempfile::TempDir;

use super::*;
use crate::commands::CommandTable;
use crate::editor::{MemoryEditor, SCRATCH_BUFFER};

struct Fixture {
    editor: Arc<Mutex<MemoryEditor>>,
    commands: Arc<CommandTable>,
    hooks: Arc<HookRegistry>,
    service: HostCallbackService,
    recorded: Arc<Mutex<Vec<String>>>,
}

#[fixture]
fn fixture() -> Fixture {
    let editor = Arc::new(Mutex::new(MemoryEditor::new()));
    let commands = Arc::new(CommandTable::new());
    let hooks = Arc::new(HookRegistry::new());
    let modes = Arc::new(ModeRegistry::new());
    let recorded = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&recorded);
    commands
        .register(
            "test",
            CommandSpec::new("record", "Record arguments"),
            Arc::new(move |args: &[String]| {
                sink.lock().expect("sink").extend_from_slice(args);
                Ok(())
            }),
        )
        .expect("register record");

    let mut manifest = PluginManifest::new(PluginIdentity::new("test", "1", "Test"));
    manifest.major_modes = vec![MajorModeSpec::new("text-mode", "Text", Vec::new())];
    manifest.minor_modes = vec![quill_plugins::MinorModeSpec::new(
        "word-count-mode",
        "Counts words",
        " WC",
    )];
    modes.register("test", &manifest).expect("register modes");

    let shared: SharedEditor = Arc::clone(&editor) as SharedEditor;
    let context = HostContext {
        editor: shared,
        commands: Arc::clone(&commands) as Arc<dyn CommandRegistry>,
        hooks: Arc::clone(&hooks),
        modes,
    };
    Fixture {
        editor,
        commands,
        hooks,
        service: HostCallbackService::new(context, "test"),
        recorded,
    }
}

fn buffer(value: Value) -> Option<BufferInfo> {
    serde_json::from_value(value).expect("buffer snapshot")
}

#[rstest]
fn current_buffer_is_a_snapshot(fixture: Fixture) {
    let current = buffer(
        fixture
            .service
            .call(host::GET_CURRENT_BUFFER, Value::Null)
            .expect("current buffer"),
    )
    .expect("scratch buffer");
    assert_eq!(current.name, SCRATCH_BUFFER);
}

#[rstest]
fn missing_buffers_are_null(fixture: Fixture) {
    let found = fixture
        .service
        .call(host::FIND_BUFFER, json!({"name": "missing"}))
        .expect("find buffer");
    assert_eq!(found, Value::Null);
}

#[rstest]
fn edits_return_the_updated_snapshot(fixture: Fixture) {
    let edited: BufferInfo = serde_json::from_value(
        fixture
            .service
            .call(
                host::EDIT_BUFFER,
                json!({
                    "buffer": SCRATCH_BUFFER,
                    "edit": {"kind": "insert", "position": 0, "text": "hello"},
                }),
            )
            .expect("edit"),
    )
    .expect("snapshot");

    assert_eq!(edited.content, "hello");
    assert!(edited.is_dirty);
    let stored = fixture
        .editor
        .lock()
        .expect("editor")
        .find_buffer(SCRATCH_BUFFER)
        .expect("scratch");
    assert_eq!(stored, edited);
}

#[rstest]
fn status_and_messages_reach_the_editor(fixture: Fixture) {
    fixture
        .service
        .call(host::SET_STATUS, json!({"text": "3 words"}))
        .expect("status");
    fixture
        .service
        .call(host::SHOW_MESSAGE, json!({"text": "hi"}))
        .expect("message");

    let editor = fixture.editor.lock().expect("editor");
    assert_eq!(editor.status(), Some("3 words"));
    assert_eq!(editor.messages(), ["hi"]);
}

#[rstest]
fn saving_runs_after_save_hooks(fixture: Fixture) {
    let dir = TempDir::new().expect("temp dir");
    let path = Utf8PathBuf::from_path_buf(dir.path().join("draft.txt")).expect("utf8 path");
    std::fs::write(&path, "draft").expect("write file");
    fixture.hooks.add(AFTER_SAVE, "record");

    fixture
        .service
        .call(host::OPEN_FILE, json!({"path": path.as_str()}))
        .expect("open");
    fixture
        .service
        .call(host::SAVE_BUFFER, json!({"name": "draft.txt"}))
        .expect("save");

    assert_eq!(*fixture.recorded.lock().expect("recorded"), ["draft.txt"]);
}

#[rstest]
fn failed_saves_are_application_faults(fixture: Fixture) {
    let fault = fixture
        .service
        .call(host::SAVE_BUFFER, json!({"name": SCRATCH_BUFFER}))
        .expect_err("scratch has no file");
    assert!(fault.is_application());
    assert!(fixture.recorded.lock().expect("recorded").is_empty());
}

#[rstest]
#[case::known("text-mode", true)]
#[case::unknown("lisp-mode", false)]
fn major_modes_must_be_registered(fixture: Fixture, #[case] mode: &str, #[case] accepted: bool) {
    let outcome = fixture
        .service
        .call(
            host::SET_MAJOR_MODE,
            json!({"buffer": SCRATCH_BUFFER, "mode": mode}),
        );

    assert_eq!(outcome.is_ok(), accepted);
    let editor = fixture.editor.lock().expect("editor");
    assert_eq!(editor.major_mode(SCRATCH_BUFFER) == Some(mode), accepted);
}

#[rstest]
fn minor_modes_toggle(fixture: Fixture) {
    let first = fixture
        .service
        .call(
            host::TOGGLE_MINOR_MODE,
            json!({"buffer": SCRATCH_BUFFER, "mode": "word-count-mode"}),
        )
        .expect("toggle on");
    let second = fixture
        .service
        .call(
            host::TOGGLE_MINOR_MODE,
            json!({"buffer": SCRATCH_BUFFER, "mode": "word-count-mode"}),
        )
        .expect("toggle off");
    assert_eq!((first, second), (json!(true), json!(false)));
}

#[rstest]
fn modes_apply_to_the_named_buffer_not_the_current_one(fixture: Fixture) {
    fixture
        .service
        .call(host::CREATE_BUFFER, json!({"name": "notes"}))
        .expect("create");
    fixture
        .service
        .call(host::SWITCH_TO_BUFFER, json!({"name": SCRATCH_BUFFER}))
        .expect("switch back");

    fixture
        .service
        .call(host::SET_MAJOR_MODE, json!({"buffer": "notes", "mode": "text-mode"}))
        .expect("major mode");
    fixture
        .service
        .call(
            host::TOGGLE_MINOR_MODE,
            json!({"buffer": "notes", "mode": "word-count-mode"}),
        )
        .expect("minor mode");

    let editor = fixture.editor.lock().expect("editor");
    assert_eq!(editor.major_mode("notes"), Some("text-mode"));
    assert!(editor.minor_mode_enabled("notes", "word-count-mode"));
    assert_eq!(editor.major_mode(SCRATCH_BUFFER), None);
    assert!(!editor.minor_mode_enabled(SCRATCH_BUFFER, "word-count-mode"));
}

#[rstest]
fn modes_on_unknown_buffers_are_application_faults(fixture: Fixture) {
    let fault = fixture
        .service
        .call(
            host::SET_MAJOR_MODE,
            json!({"buffer": "missing", "mode": "text-mode"}),
        )
        .expect_err("unknown buffer");
    assert!(fault.is_application());
}

#[rstest]
fn commands_run_through_the_registry(fixture: Fixture) {
    fixture
        .service
        .call(
            host::EXECUTE_COMMAND,
            json!({"name": "record", "args": ["x"]}),
        )
        .expect("execute");
    let fault = fixture
        .service
        .call(host::EXECUTE_COMMAND, json!({"name": "missing"}))
        .expect_err("unknown command");

    assert_eq!(*fixture.recorded.lock().expect("recorded"), ["x"]);
    assert!(fault.is_application());
    assert!(fixture.commands.get("record").is_some());
}

#[rstest]
fn hook_triggers_are_notifications(fixture: Fixture) {
    fixture
        .service
        .call(
            host::ADD_HOOK,
            json!({"event": "buffer-changed", "command": "record"}),
        )
        .expect("add hook");
    fixture.service.notify(
        host::TRIGGER_HOOK,
        json!({"event": "buffer-changed", "args": ["a", "b"]}),
    );

    assert_eq!(*fixture.recorded.lock().expect("recorded"), ["a", "b"]);
}

#[rstest]
fn options_round_trip(fixture: Fixture) {
    fixture
        .service
        .call(host::SET_OPTION, json!({"name": "fill-column", "value": 72}))
        .expect("set option");
    let value = fixture
        .service
        .call(host::GET_OPTION, json!({"name": "fill-column"}))
        .expect("get option");
    let missing = fixture
        .service
        .call(host::GET_OPTION, json!({"name": "tab-width"}))
        .expect("get missing option");
    assert_eq!((value, missing), (json!(72), Value::Null));
}

#[rstest]
#[case::unknown_method("host/frobnicate", json!({}), codes::METHOD_NOT_FOUND)]
#[case::bad_params(host::FIND_BUFFER, json!({"title": 3}), codes::INVALID_PARAMS)]
fn protocol_faults_use_json_rpc_codes(
    fixture: Fixture,
    #[case] method: &str,
    #[case] params: Value,
    #[case] code: i64,
) {
    let fault = fixture.service.call(method, params).expect_err("fault");
    assert_eq!(fault.code, code);
}

#[rstest]
fn concurrent_plugins_see_whole_current_buffers(fixture: Fixture) {
    {
        let mut editor = fixture.editor.lock().expect("editor");
        for name in ["left", "right"] {
            editor.create_buffer(name).expect("create");
            editor
                .edit_buffer(
                    name,
                    &BufferEdit::SetContent {
                        content: name.to_owned(),
                    },
                )
                .expect("seed");
        }
    }
    let other = HostCallbackService::new(fixture.service.context.clone(), "other");

    thread::scope(|scope| {
        for (service, target) in [(&fixture.service, "left"), (&other, "right")] {
            scope.spawn(move || {
                for _ in 0..200 {
                    service
                        .call(host::SWITCH_TO_BUFFER, json!({"name": target}))
                        .expect("switch");
                    let current = buffer(
                        service
                            .call(host::GET_CURRENT_BUFFER, Value::Null)
                            .expect("current buffer"),
                    )
                    .expect("a buffer is current");
                    assert!(
                        matches!(current.name.as_str(), "left" | "right"),
                        "unexpected current buffer {}",
                        current.name
                    );
                    assert_eq!(current.content, current.name);
                }
            });
        }
    });
}
