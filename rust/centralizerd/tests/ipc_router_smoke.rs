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
    let exe = env!("CARGO_BIN_EXE_centralizerd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn centralizerd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn read_response(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response");
    serde_json::from_str(line.trim()).expect("parse response json")
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

    let value = read_response(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn is_ok(value: &serde_json::Value) -> bool {
    value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false)
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("centralizerd-router-smoke");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(is_ok(&health));
    assert!(health["result"]["workspacePath"].is_null());

    let no_ws = request(
        &mut stdin,
        &mut reader,
        "2",
        "ledger.get",
        json!({
            "scope": { "schoolId": "S", "level": "primary", "grade": 1, "section": "A" },
            "term": 1,
            "periodId": "p1"
        }),
    );
    assert_eq!(no_ws["error"]["code"], json!("no_workspace"));

    let selected = request(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(is_ok(&selected));
    assert!(workspace.join("centralizer.sqlite3").is_file());

    let health = request(&mut stdin, &mut reader, "4", "health", json!({}));
    let expected = workspace.to_string_lossy().to_string();
    assert_eq!(
        health["result"]["workspacePath"].as_str(),
        Some(expected.as_str())
    );

    let scope = json!({ "schoolId": "S", "level": "primary", "grade": 1, "section": "A" });
    for (i, (method, params)) in [
        ("setup.get", json!({})),
        ("periods.upsert", json!({ "id": "p1", "active": true })),
        ("periods.list", json!({})),
        ("actors.upsert", json!({ "id": "a1", "role": "teacher" })),
        (
            "roster.offerings.upsert",
            json!({ "classroomId": "c1", "scope": scope, "subjectCode": "mat", "periodId": "p1" }),
        ),
        (
            "roster.enrollments.upsert",
            json!({ "enrollmentId": "e1", "classroomId": "c1", "studentId": "s1" }),
        ),
        (
            "gradebook.finalScores.set",
            json!({ "enrollmentId": "e1", "term": 1, "score": 88 }),
        ),
        (
            "catalog.subjectSets.set",
            json!({ "level": "primary", "grade": 1, "subjects": ["MAT"] }),
        ),
        ("catalog.subjectSets.get", json!({ "level": "primary", "grade": 1 })),
        (
            "centralize.classroom",
            json!({ "classroomId": "c1", "term": 1, "actorId": "a1" }),
        ),
        (
            "ledger.get",
            json!({ "scope": scope, "term": 1, "periodId": "p1" }),
        ),
        (
            "statistics.compute",
            json!({ "scope": scope, "term": 1, "periodId": "p1" }),
        ),
    ]
    .into_iter()
    .enumerate()
    {
        let resp = request(&mut stdin, &mut reader, &format!("f{}", i), method, params);
        assert!(is_ok(&resp), "{} failed: {}", method, resp);
    }

    let unknown = request_raw(&mut stdin, &mut reader, "u1", "grades.explode");
    assert_eq!(unknown["error"]["code"], json!("not_implemented"));
}

fn request_raw(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
) -> serde_json::Value {
    writeln!(stdin, "{}", json!({ "id": id, "method": method, "params": {} }))
        .expect("write request");
    stdin.flush().expect("flush request");
    read_response(reader)
}

#[test]
fn malformed_lines_get_bad_json_and_the_loop_continues() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let resp = read_response(&mut reader);
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("bad_json"));

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(is_ok(&health));
}

#[test]
fn setup_update_validates_and_persists() {
    let workspace = temp_dir("centralizerd-setup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let defaults = request(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(defaults["result"]["statistics"]["passPercent"].as_f64(), Some(51.0));
    assert_eq!(
        defaults["result"]["centralization"]["allowedRoles"],
        json!(["teacher", "director", "administrator"])
    );

    let rejected = request(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "statistics", "patch": { "honorPercent": 40 } }),
    );
    assert_eq!(rejected["error"]["code"], json!("invalid_settings"));

    let updated = request(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "centralization", "patch": { "allowedRoles": ["Director"] } }),
    );
    assert!(is_ok(&updated), "{}", updated);
    assert_eq!(
        updated["result"]["centralization"]["allowedRoles"],
        json!(["director"])
    );

    // A fresh process sees the persisted value.
    drop(stdin);
    let (_child2, mut stdin2, mut reader2) = spawn_sidecar();
    request(
        &mut stdin2,
        &mut reader2,
        "5",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let reread = request(&mut stdin2, &mut reader2, "6", "setup.get", json!({}));
    assert_eq!(
        reread["result"]["centralization"]["allowedRoles"],
        json!(["director"])
    );
    assert_eq!(reread["result"]["statistics"]["honorPercent"].as_f64(), Some(85.0));
}

#[test]
fn seed_tiered_rejects_non_integer_grades() {
    let workspace = temp_dir("centralizerd-seed-grades");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let params = |grades: serde_json::Value| {
        json!({
            "level": "primary",
            "grades": grades,
            "base": ["MAT"],
            "extension": ["ING"],
            "extensionFromGrade": 6
        })
    };
    let mixed = request(
        &mut stdin,
        &mut reader,
        "2",
        "catalog.subjectSets.seedTiered",
        params(json!([5, "6"])),
    );
    assert_eq!(mixed["error"]["code"], json!("bad_params"));
    let fractional = request(
        &mut stdin,
        &mut reader,
        "3",
        "catalog.subjectSets.seedTiered",
        params(json!([5, 6.5])),
    );
    assert_eq!(fractional["error"]["code"], json!("bad_params"));

    // Nothing was seeded by the rejected calls.
    let grade5 = request(
        &mut stdin,
        &mut reader,
        "4",
        "catalog.subjectSets.get",
        json!({ "level": "primary", "grade": 5 }),
    );
    assert!(!is_ok(&grade5), "{}", grade5);

    let seeded = request(
        &mut stdin,
        &mut reader,
        "5",
        "catalog.subjectSets.seedTiered",
        params(json!([5, 6])),
    );
    assert!(is_ok(&seeded), "{}", seeded);
    assert_eq!(seeded["result"]["subjectSets"].as_array().map(|a| a.len()), Some(2));
}
