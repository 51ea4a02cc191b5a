use serde_json::json;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
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

#[test]
fn bundle_export_import_carries_the_workspace() {
    let workspace_src = temp_dir("attendd-backup-src");
    let workspace_dst = temp_dir("attendd-backup-dst");
    let out_dir = temp_dir("attendd-backup-out");
    let bundle_path = out_dir.join("workspace.attendbackup.zip");

    // build a workspace with one permission and export it
    {
        let (_child, mut stdin, mut reader) = spawn_sidecar();
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "workspace.select",
            json!({ "path": workspace_src.to_string_lossy() }),
        );
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "permissions.grant",
            json!({
                "studentId": "S1",
                "kind": "leave",
                "reason": "medical",
                "startDate": "2024-01-10",
                "endDate": "2024-01-12",
                "grantedBy": "FAC01"
            }),
        );
        let exported = request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "workspace.exportBundle",
            json!({ "outPath": bundle_path.to_string_lossy() }),
        );
        assert_eq!(
            exported.get("bundleFormat").and_then(|v| v.as_str()),
            Some("attend-workspace-v1")
        );
        assert_eq!(exported.get("entryCount").and_then(|v| v.as_u64()), Some(4));
    }

    // the zip itself carries the manifest and both databases
    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest).expect("manifest json");
    assert_eq!(
        manifest.get("format").and_then(|v| v.as_str()),
        Some("attend-workspace-v1")
    );
    assert!(archive.by_name("db/attend.sqlite3").is_ok());
    assert!(archive.by_name("db/outbox.sqlite3").is_ok());

    // import into a fresh workspace and read the data back
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace_dst.to_string_lossy() }),
    );
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.importBundle",
        json!({ "inPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(
        imported
            .get("bundleFormatDetected")
            .and_then(|v| v.as_str()),
        Some("attend-workspace-v1")
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "permissions.list",
        json!({ "studentId": "S1" }),
    );
    let rows = listed
        .get("permissions")
        .and_then(|v| v.as_array())
        .expect("permissions array");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("reason").and_then(|v| v.as_str()),
        Some("medical")
    );
}
