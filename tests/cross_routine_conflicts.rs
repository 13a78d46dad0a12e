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
    let exe = env!("CARGO_BIN_EXE_routined");
    let mut child = Command::new(exe)
        .env_remove("ROUTINED_WORKSPACE")
        .env("ROUTINED_COMMIT_SETTLE_MS", "0")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn routined");
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
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    seq: u64,
}

impl Sidecar {
    fn start(workspace: &PathBuf) -> Self {
        let (child, stdin, reader) = spawn_sidecar();
        let mut s = Sidecar {
            child,
            stdin,
            reader,
            seq: 0,
        };
        s.ok("workspace.select", json!({ "path": workspace.to_string_lossy() }));
        s
    }

    fn next_id(&mut self) -> String {
        self.seq += 1;
        self.seq.to_string()
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let id = self.next_id();
        request(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let id = self.next_id();
        request_ok(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    /// Opens a cell, picks the subject and teacher, returns the token and the selection verdict.
    fn draft(
        &mut self,
        routine: &str,
        day: &str,
        period: i64,
        subject: &str,
        teacher: &str,
    ) -> (u64, serde_json::Value) {
        let opened = self.ok(
            "edit.open",
            json!({ "routineId": routine, "day": day, "period": period }),
        );
        let token = opened["token"].as_u64().expect("token");
        self.ok(
            "edit.setSubject",
            json!({ "routineId": routine, "token": token, "subjectCode": subject }),
        );
        let picked = self.ok(
            "edit.selectTeacher",
            json!({ "routineId": routine, "token": token, "teacherId": teacher }),
        );
        (token, picked)
    }

    fn commit(&mut self, routine: &str, token: u64) -> serde_json::Value {
        self.ok("edit.commit", json!({ "routineId": routine, "token": token }))
    }

    fn stop(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
    }
}

fn seed(s: &mut Sidecar) -> String {
    s.ok("routines.create", json!({ "id": "IT1" }));
    s.ok("routines.create", json!({ "id": "IT2" }));
    s.ok("routines.rename", json!({ "id": "IT1", "name": "IT Year 1" }));
    s.ok("subjects.upsert", json!({ "code": "CS1", "name": "Programming" }));
    let teacher = s.ok("teachers.add", json!({ "subjectCode": "CS1", "name": "Alice" }));
    teacher["id"].as_str().expect("teacher id").to_string()
}

#[test]
fn teacher_booked_in_one_routine_is_refused_in_another() {
    let workspace = temp_dir("routined-conflicts");
    let mut s = Sidecar::start(&workspace);
    let alice = seed(&mut s);

    s.ok("board.open", json!({ "routineId": "IT1" }));
    s.ok("board.open", json!({ "routineId": "IT2" }));

    let (token, picked) = s.draft("IT1", "mon", 2, "CS1", &alice);
    assert_eq!(picked["verdict"]["status"], "clear");
    assert_eq!(picked["edit"]["draft"]["teacherName"], "Alice");
    let saved = s.commit("IT1", token);
    assert_eq!(saved["status"], "saved");
    assert!(saved["updatedAt"].as_str().is_some());

    let check = s.ok(
        "board.check",
        json!({ "routineId": "IT2", "day": "mon", "period": 2, "teacherId": alice }),
    );
    assert_eq!(check["available"], false);
    assert_eq!(check["conflictingRoutineId"], "IT1");
    assert_eq!(check["conflictingRoutineName"], "IT Year 1");

    let (_, picked) = s.draft("IT2", "mon", 2, "CS1", &alice);
    assert_eq!(picked["verdict"]["status"], "conflict");
    assert_eq!(picked["verdict"]["source"], "local");
    assert_eq!(picked["verdict"]["routineName"], "IT Year 1");
    assert!(picked["edit"]["draft"]["teacherId"].is_null());
    assert_eq!(
        picked["edit"]["notice"],
        "Cannot assign Alice. Already scheduled in IT Year 1."
    );

    // Same teacher, another period: allowed.
    let (token, picked) = s.draft("IT2", "mon", 3, "CS1", &alice);
    assert_eq!(picked["verdict"]["status"], "clear");
    assert_eq!(s.commit("IT2", token)["status"], "saved");

    let probe = s.ok(
        "conflicts.find",
        json!({ "teacherId": alice, "day": "mon", "period": 2, "excludeRoutineId": "IT2" }),
    );
    assert_eq!(probe["status"], "conflict");
    assert_eq!(probe["routineId"], "IT1");
    let probe = s.ok(
        "conflicts.find",
        json!({ "teacherId": alice, "day": "mon", "period": 2, "excludeRoutineId": "IT1" }),
    );
    assert_eq!(probe["status"], "clear");

    let grid = s.ok("schedule.get", json!({ "routineId": "IT2" }));
    let monday = &grid["days"][0]["periods"];
    assert_eq!(monday[2]["assignment"]["teacherId"], alice.as_str());
    assert!(monday[1]["assignment"].is_null());
    assert_eq!(monday[3]["isBreak"], true);

    let teacher = s.ok("board.teacher", json!({ "teacherId": alice }));
    assert_eq!(teacher["slots"].as_array().map(Vec::len), Some(2));

    s.stop();
    let _ = std::fs::remove_dir_all(&workspace);
}

#[test]
fn reassigning_within_a_routine_and_clearing_release_claims() {
    let workspace = temp_dir("routined-release");
    let mut s = Sidecar::start(&workspace);
    let alice = seed(&mut s);
    let bob = s.ok("teachers.add", json!({ "subjectCode": "CS1", "name": "Bob" }))["id"]
        .as_str()
        .expect("bob")
        .to_string();

    let (token, _) = s.draft("IT1", "tue", 5, "CS1", &alice);
    s.commit("IT1", token);

    // Editing the same cell again with the same teacher is not a conflict.
    let (token, picked) = s.draft("IT1", "tue", 5, "CS1", &alice);
    assert_eq!(picked["verdict"]["status"], "clear");
    s.commit("IT1", token);

    // Swapping to Bob frees Alice for IT2.
    let (token, _) = s.draft("IT1", "tue", 5, "CS1", &bob);
    s.commit("IT1", token);
    s.ok("board.open", json!({ "routineId": "IT2" }));
    let check = s.ok(
        "board.check",
        json!({ "routineId": "IT2", "day": "tue", "period": 5, "teacherId": alice }),
    );
    assert_eq!(check["available"], true);

    let opened = s.ok("edit.open", json!({ "routineId": "IT1", "day": "tue", "period": 5 }));
    let token = opened["token"].as_u64().expect("token");
    assert_eq!(opened["draft"]["teacherId"], bob.as_str());
    let cleared = s.ok("edit.clear", json!({ "routineId": "IT1", "token": token }));
    assert_eq!(cleared["status"], "cleared");
    assert_eq!(cleared["removed"], true);
    assert_eq!(cleared["state"]["phase"], "idle");
    let check = s.ok(
        "board.check",
        json!({ "routineId": "IT2", "day": "tue", "period": 5, "teacherId": bob }),
    );
    assert_eq!(check["available"], true);

    s.stop();
    let _ = std::fs::remove_dir_all(&workspace);
}

#[test]
fn empty_subject_commit_removes_the_cell_and_stale_tokens_are_refused() {
    let workspace = temp_dir("routined-empty");
    let mut s = Sidecar::start(&workspace);
    let alice = seed(&mut s);

    let (first, _) = s.draft("IT1", "wed", 1, "CS1", &alice);
    s.commit("IT1", first);

    let opened = s.ok("edit.open", json!({ "routineId": "IT1", "day": "wed", "period": 1 }));
    let token = opened["token"].as_u64().expect("token");
    s.ok(
        "edit.setSubject",
        json!({ "routineId": "IT1", "token": token, "subjectCode": "" }),
    );
    let out = s.commit("IT1", token);
    assert_eq!(out["status"], "cleared");

    let grid = s.ok("schedule.get", json!({ "routineId": "IT1" }));
    assert!(grid["days"][2]["periods"][0]["assignment"].is_null());

    let stale = s.call(
        "edit.setRoom",
        json!({ "routineId": "IT1", "token": first, "room": "R9" }),
    );
    assert_eq!(error_code(&stale), "stale_edit");

    let opened = s.ok("edit.open", json!({ "routineId": "IT1", "day": "wed", "period": 1 }));
    let current = opened["token"].as_u64().expect("token");
    let reopened = s.ok("edit.open", json!({ "routineId": "IT1", "day": "wed", "period": 2 }));
    assert_ne!(reopened["token"], opened["token"]);
    let stale = s.call(
        "edit.commit",
        json!({ "routineId": "IT1", "token": current }),
    );
    assert_eq!(error_code(&stale), "stale_edit");

    s.ok("edit.cancel", json!({ "routineId": "IT1" }));
    let state = s.ok("edit.state", json!({ "routineId": "IT1" }));
    assert_eq!(state["state"]["phase"], "idle");

    s.stop();
    let _ = std::fs::remove_dir_all(&workspace);
}

#[test]
fn break_period_and_foreign_teacher_are_rejected() {
    let workspace = temp_dir("routined-validation");
    let mut s = Sidecar::start(&workspace);
    let alice = seed(&mut s);
    s.ok("subjects.upsert", json!({ "code": "MA1", "name": "Maths" }));

    let lunch = s.call("edit.open", json!({ "routineId": "IT1", "day": "mon", "period": 4 }));
    assert_eq!(error_code(&lunch), "bad_params");
    assert_eq!(lunch["error"]["details"]["field"], "period");

    let bad_day = s.call(
        "conflicts.find",
        json!({ "teacherId": alice, "day": "sun", "period": 1 }),
    );
    assert_eq!(bad_day["error"]["details"]["field"], "day");

    let missing = s.call("edit.open", json!({ "routineId": "NOPE", "day": "mon", "period": 1 }));
    assert_eq!(error_code(&missing), "not_found");

    let slashed = s.call("routines.create", json!({ "id": "IT/3" }));
    assert_eq!(error_code(&slashed), "bad_params");

    let opened = s.ok("edit.open", json!({ "routineId": "IT1", "day": "mon", "period": 1 }));
    let token = opened["token"].as_u64().expect("token");
    let no_subject = s.call(
        "edit.selectTeacher",
        json!({ "routineId": "IT1", "token": token, "teacherId": alice }),
    );
    assert_eq!(error_code(&no_subject), "bad_params");
    s.ok(
        "edit.setSubject",
        json!({ "routineId": "IT1", "token": token, "subjectCode": "MA1" }),
    );
    let foreign = s.call(
        "edit.selectTeacher",
        json!({ "routineId": "IT1", "token": token, "teacherId": alice }),
    );
    assert_eq!(error_code(&foreign), "not_found");

    s.stop();
    let _ = std::fs::remove_dir_all(&workspace);
}
