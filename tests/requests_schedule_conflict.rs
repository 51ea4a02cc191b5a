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

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error object")
}

#[test]
fn accept_conflicts_then_override_wins() {
    let workspace = temp_dir("attendd-conflict");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // B already teaches P3 on the target date
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.put",
        json!({
            "facultyId": "FAC-B",
            "date": "2024-02-01",
            "slotId": "P3",
            "classId": "CSE-A",
            "subject": "Data Structures"
        }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
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

    let conflict = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "requests.respond",
        json!({ "requestId": req_id, "responderId": "FAC-B", "action": "accept" }),
    );
    assert_eq!(
        conflict.get("code").and_then(|v| v.as_str()),
        Some("schedule_conflict")
    );
    assert_eq!(
        conflict
            .pointer("/details/session/slotId")
            .and_then(|v| v.as_str()),
        Some("P3")
    );

    // a failed accept leaves the request pending
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "requests.list",
        json!({ "userId": "FAC-B" }),
    );
    assert_eq!(
        listed
            .pointer("/requests/0/status")
            .and_then(|v| v.as_str()),
        Some("pending")
    );

    // explicit confirmation takes the slot anyway
    let accepted = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "requests.respond",
        json!({
            "requestId": req_id,
            "responderId": "FAC-B",
            "action": "accept",
            "override": true
        }),
    );
    assert_eq!(accepted.get("applied").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        accepted.get("status").and_then(|v| v.as_str()),
        Some("accepted")
    );
}

#[test]
fn accept_with_a_free_slot_needs_no_override() {
    let workspace = temp_dir("attendd-free-slot");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // B has a session, but in a different slot
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.put",
        json!({ "facultyId": "FAC-B", "date": "2024-02-01", "slotId": "P4" }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
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

    let accepted = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "requests.respond",
        json!({ "requestId": req_id, "responderId": "FAC-B", "action": "accept" }),
    );
    assert_eq!(accepted.get("applied").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        accepted.get("status").and_then(|v| v.as_str()),
        Some("accepted")
    );
}

#[test]
fn swap_accept_checks_the_senders_offered_slot() {
    let workspace = temp_dir("attendd-swap");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // accepting the swap means B takes over A's slot P2; B's own P5
    // session is what they're giving away, so it must not count
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.put",
        json!({ "facultyId": "FAC-B", "date": "2024-02-05", "slotId": "P5" }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "requests.create",
        json!({
            "kind": "swap",
            "senderId": "FAC-A",
            "receiverId": "FAC-B",
            "date": "2024-02-05",
            "slotAId": "P2",
            "slotBId": "P5"
        }),
    );
    let req_id = created
        .pointer("/request/id")
        .and_then(|v| v.as_str())
        .expect("request id")
        .to_string();

    let accepted = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "requests.respond",
        json!({ "requestId": req_id, "responderId": "FAC-B", "action": "accept" }),
    );
    assert_eq!(accepted.get("applied").and_then(|v| v.as_bool()), Some(true));

    // now the conflicting case: B is double-booked at A's offered slot
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schedule.put",
        json!({ "facultyId": "FAC-B", "date": "2024-02-06", "slotId": "P2" }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "requests.create",
        json!({
            "kind": "swap",
            "senderId": "FAC-A",
            "receiverId": "FAC-B",
            "date": "2024-02-06",
            "slotAId": "P2",
            "slotBId": "P6"
        }),
    );
    let req_id = created
        .pointer("/request/id")
        .and_then(|v| v.as_str())
        .expect("request id")
        .to_string();

    let conflict = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "requests.respond",
        json!({ "requestId": req_id, "responderId": "FAC-B", "action": "accept" }),
    );
    assert_eq!(
        conflict
            .pointer("/details/session/slotId")
            .and_then(|v| v.as_str()),
        Some("P2")
    );
}
