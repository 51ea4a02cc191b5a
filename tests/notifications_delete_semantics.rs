use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_attendd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn attendd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn notifications_for(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    user: &str,
) -> Vec<serde_json::Value> {
    let listed = request_ok(
        stdin,
        reader,
        id,
        "notifications.list",
        json!({ "userId": user }),
    );
    listed
        .get("notifications")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("notifications array")
}

#[test]
fn lifecycle_events_notify_counterparties() {
    let workspace = temp_dir("attendd-notify");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "requests.create",
        json!({
            "kind": "substitution",
            "senderId": "FAC-A",
            "receiverId": "FAC-B",
            "date": "2024-02-01",
            "slotId": "P3"
        }),
    );
    let req_id = created
        .pointer("/request/id")
        .and_then(|v| v.as_str())
        .expect("request id")
        .to_string();

    // creation pings the receiver
    let b_inbox = notifications_for(&mut stdin, &mut reader, "3", "FAC-B");
    assert_eq!(b_inbox.len(), 1);
    assert_eq!(
        b_inbox[0].get("kind").and_then(|v| v.as_str()),
        Some("request.created")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "requests.respond",
        json!({ "requestId": req_id, "responderId": "FAC-B", "action": "accept" }),
    );

    // the applied transition pings the sender
    let a_inbox = notifications_for(&mut stdin, &mut reader, "5", "FAC-A");
    assert_eq!(a_inbox.len(), 1);
    assert_eq!(
        a_inbox[0].get("kind").and_then(|v| v.as_str()),
        Some("request.accepted")
    );
}

#[test]
fn delete_is_owner_scoped_and_idempotent() {
    let workspace = temp_dir("attendd-notify-delete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "requests.create",
        json!({
            "kind": "substitution",
            "senderId": "FAC-A",
            "receiverId": "FAC-B",
            "date": "2024-02-01",
            "slotId": "P3"
        }),
    );

    let b_inbox = notifications_for(&mut stdin, &mut reader, "3", "FAC-B");
    let note_id = b_inbox[0]
        .get("id")
        .and_then(|v| v.as_str())
        .expect("notification id")
        .to_string();

    // someone else's delete removes nothing
    let foreign = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "notifications.delete",
        json!({ "userId": "FAC-A", "notificationId": note_id }),
    );
    assert_eq!(foreign.get("removed").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(notifications_for(&mut stdin, &mut reader, "5", "FAC-B").len(), 1);

    // the owner's delete really removes the row
    let own = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "notifications.delete",
        json!({ "userId": "FAC-B", "notificationId": note_id }),
    );
    assert_eq!(own.get("removed").and_then(|v| v.as_bool()), Some(true));
    assert!(notifications_for(&mut stdin, &mut reader, "7", "FAC-B").is_empty());

    let again = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "notifications.delete",
        json!({ "userId": "FAC-B", "notificationId": note_id }),
    );
    assert_eq!(again.get("removed").and_then(|v| v.as_bool()), Some(false));
}

#[test]
fn hidden_notifications_drop_out_of_the_list_but_survive() {
    let workspace = temp_dir("attendd-notify-hide");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "requests.create",
        json!({
            "kind": "substitution",
            "senderId": "FAC-A",
            "receiverId": "FAC-B",
            "date": "2024-02-01",
            "slotId": "P3"
        }),
    );

    let b_inbox = notifications_for(&mut stdin, &mut reader, "3", "FAC-B");
    let note_id = b_inbox[0]
        .get("id")
        .and_then(|v| v.as_str())
        .expect("notification id")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "items.hide",
        json!({ "userId": "FAC-B", "itemId": note_id, "itemType": "notification" }),
    );
    assert!(notifications_for(&mut stdin, &mut reader, "5", "FAC-B").is_empty());

    // unlike a delete, the row is still there: deleting it afterwards
    // reports an actual removal
    let removed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "notifications.delete",
        json!({ "userId": "FAC-B", "notificationId": note_id }),
    );
    assert_eq!(removed.get("removed").and_then(|v| v.as_bool()), Some(true));
}
