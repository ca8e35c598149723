use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
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

fn request_ok(
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
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn scope() -> serde_json::Value {
    json!({ "schoolId": "SCH1", "level": "secondary", "grade": 2, "section": "B" })
}

const STUDENTS: usize = 20;
const SUBJECTS: [&str; 4] = ["MATH", "SCIENCE", "HISTORY", "ART"];

fn seed(workspace: &Path) {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "period",
        "periods.upsert",
        json!({ "id": "p1", "active": true }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "actor",
        "actors.upsert",
        json!({ "id": "adm", "role": "administrator" }),
    );
    for subject in SUBJECTS {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("off-{}", subject),
            "roster.offerings.upsert",
            json!({
                "classroomId": format!("cls-{}", subject),
                "scope": scope(),
                "subjectCode": subject,
                "periodId": "p1"
            }),
        );
        for n in 0..STUDENTS {
            request_ok(
                &mut stdin,
                &mut reader,
                &format!("enr-{}-{}", subject, n),
                "roster.enrollments.upsert",
                json!({
                    "enrollmentId": format!("e-{}-{}", subject, n),
                    "classroomId": format!("cls-{}", subject),
                    "studentId": format!("s{:02}", n)
                }),
            );
        }
    }
}

fn batch(subjects: &[&str], score: f64) -> serde_json::Value {
    let mut items = Vec::new();
    for subject in subjects {
        for n in 0..STUDENTS {
            items.push(json!({
                "enrollmentId": format!("e-{}-{}", subject, n),
                "studentId": format!("s{:02}", n),
                "score": score
            }));
        }
    }
    json!(items)
}

/// Runs `rounds` centralizations of `subjects` from a separate sidecar process.
fn writer(workspace: PathBuf, subjects: Vec<&'static str>, score: f64, rounds: usize) {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    for round in 0..rounds {
        let out = request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", round),
            "centralize",
            json!({
                "scope": scope(),
                "term": 1,
                "periodId": "p1",
                "actorId": "adm",
                "scores": batch(&subjects, score)
            }),
        );
        assert_eq!(
            out.get("recordsWritten").and_then(|v| v.as_u64()),
            Some((subjects.len() * STUDENTS) as u64)
        );
    }
}

fn ledger_counts(workspace: &Path) -> (i64, i64) {
    let conn =
        rusqlite::Connection::open(workspace.join("centralizer.sqlite3")).expect("open db");
    let total: i64 = conn
        .query_row("SELECT COUNT(*) FROM centralized_records", [], |r| r.get(0))
        .expect("count");
    let distinct: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM (
               SELECT DISTINCT student_id, subject_code, term FROM centralized_records
             )",
            [],
            |r| r.get(0),
        )
        .expect("distinct");
    (total, distinct)
}

#[test]
fn disjoint_subject_sets_from_two_processes_both_land() {
    let workspace = temp_dir("centralizerd-concurrent-disjoint");
    seed(&workspace);

    let a = {
        let ws = workspace.clone();
        std::thread::spawn(move || writer(ws, vec!["MATH", "SCIENCE"], 70.0, 5))
    };
    let b = {
        let ws = workspace.clone();
        std::thread::spawn(move || writer(ws, vec!["HISTORY", "ART"], 80.0, 5))
    };
    a.join().expect("writer a");
    b.join().expect("writer b");

    let (total, distinct) = ledger_counts(&workspace);
    assert_eq!(total, (SUBJECTS.len() * STUDENTS) as i64);
    assert_eq!(total, distinct);

    let conn =
        rusqlite::Connection::open(workspace.join("centralizer.sqlite3")).expect("open db");
    let math: f64 = conn
        .query_row(
            "SELECT score FROM centralized_records WHERE student_id = 's00' AND subject_code = 'MATH'",
            [],
            |r| r.get(0),
        )
        .expect("math score");
    let art: f64 = conn
        .query_row(
            "SELECT score FROM centralized_records WHERE student_id = 's00' AND subject_code = 'ART'",
            [],
            |r| r.get(0),
        )
        .expect("art score");
    assert_eq!(math, 70.0);
    assert_eq!(art, 80.0);
}

#[test]
fn racing_writers_on_the_same_keys_leave_one_record_per_key() {
    let workspace = temp_dir("centralizerd-concurrent-same-key");
    seed(&workspace);

    let a = {
        let ws = workspace.clone();
        std::thread::spawn(move || writer(ws, vec!["MATH"], 60.0, 5))
    };
    let b = {
        let ws = workspace.clone();
        std::thread::spawn(move || writer(ws, vec!["MATH"], 90.0, 5))
    };
    a.join().expect("writer a");
    b.join().expect("writer b");

    let (total, distinct) = ledger_counts(&workspace);
    assert_eq!(total, STUDENTS as i64);
    assert_eq!(total, distinct);

    // Each batch commits whole, so every student carries the last writer's score.
    let conn =
        rusqlite::Connection::open(workspace.join("centralizer.sqlite3")).expect("open db");
    let scores: i64 = conn
        .query_row(
            "SELECT COUNT(DISTINCT score) FROM centralized_records",
            [],
            |r| r.get(0),
        )
        .expect("distinct scores");
    assert_eq!(scores, 1);
}
