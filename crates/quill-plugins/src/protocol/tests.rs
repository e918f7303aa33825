//! Wire-shape tests for protocol payloads.

use rstest::rstest;
use serde_json::json;

use super::*;

#[rstest]
fn initialize_without_broker_id_decodes_as_none() {
    let params: InitializeParams =
        serde_json::from_value(json!({"host_version": "0.1.0"})).expect("decode");
    assert_eq!(params.host_broker_id, None);
}

#[rstest]
fn initialize_carries_broker_id_as_integer() {
    let params = InitializeParams {
        host_broker_id: Some(ChannelId::new(2)),
        host_version: String::from("0.1.0"),
    };
    assert_eq!(
        serde_json::to_value(&params).expect("encode"),
        json!({"host_broker_id": 2, "host_version": "0.1.0"})
    );
}

#[rstest]
#[case::set_content(
    BufferEdit::SetContent { content: String::from("hi") },
    json!({"kind": "set_content", "content": "hi"})
)]
#[case::insert(
    BufferEdit::Insert { position: 3, text: String::from("x") },
    json!({"kind": "insert", "position": 3, "text": "x"})
)]
#[case::delete(
    BufferEdit::Delete { start: 1, end: 4 },
    json!({"kind": "delete", "start": 1, "end": 4})
)]
#[case::mark_dirty(
    BufferEdit::MarkDirty { dirty: false },
    json!({"kind": "mark_dirty", "dirty": false})
)]
fn buffer_edits_are_tagged(#[case] edit: BufferEdit, #[case] expected: serde_json::Value) {
    assert_eq!(serde_json::to_value(&edit).expect("encode"), expected);
}

#[rstest]
fn buffer_snapshot_without_file_decodes() {
    let info: BufferInfo = serde_json::from_value(json!({
        "name": "*scratch*",
        "content": "",
        "position": 0,
        "is_dirty": false
    }))
    .expect("decode");
    assert_eq!(info.filename, None);
}

#[rstest]
fn missing_buffer_is_null_on_the_wire() {
    let none: Option<BufferInfo> = None;
    assert_eq!(serde_json::to_value(none).expect("encode"), serde_json::Value::Null);
}
