use crate::commit::{CellEdit, CommitOutcome, EditError};
use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{id_param, opt_str, slot_params, str_param, token_param};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::time::Instant;

type HandlerResult = Result<serde_json::Value, HandlerErr>;

fn workspace_conn(conn: &Option<Connection>) -> Result<&Connection, HandlerErr> {
    conn.as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn edit_json(routine_id: &str, edit: &CellEdit) -> serde_json::Value {
    json!({
        "routineId": routine_id,
        "day": edit.slot.day().key(),
        "period": edit.slot.period(),
        "token": edit.token,
        "draft": edit.draft,
        "notice": edit.notice,
    })
}

fn handle_edit_open(state: &mut AppState, req: &Request) -> HandlerResult {
    let routine_id = id_param(req, "routineId")?;
    let slot = slot_params(req)?;
    let AppState { db: conn, board, .. } = state;
    let conn = workspace_conn(conn)?;
    match db::routine_exists(conn, &routine_id) {
        Ok(true) => {}
        Ok(false) => return Err(HandlerErr::new("not_found", "routine not found")),
        Err(e) => return Err(HandlerErr::failed("db_query_failed", e)),
    }
    let edit = board
        .edit_open(conn, &routine_id, slot)
        .map_err(|e| HandlerErr::failed("db_query_failed", e))?;
    Ok(edit_json(&routine_id, &edit))
}

fn handle_edit_set_subject(state: &mut AppState, req: &Request) -> HandlerResult {
    let routine_id = id_param(req, "routineId")?;
    let token = token_param(req)?;
    let code = opt_str(req, "subjectCode").unwrap_or("").trim().to_string();
    let AppState { db: conn, board, .. } = state;
    let conn = workspace_conn(conn)?;

    let name = if code.is_empty() {
        String::new()
    } else {
        db::subject_name(conn, &code)
            .map_err(|e| HandlerErr::failed("db_query_failed", e))?
            .ok_or_else(|| HandlerErr::new("not_found", "subject not found"))?
    };
    let editor = board.editor_mut(&routine_id).ok_or(EditError::NoActiveEdit)?;
    let edit = editor.set_subject(token, &code, &name)?;
    Ok(edit_json(&routine_id, edit))
}

fn handle_edit_select_teacher(state: &mut AppState, req: &Request) -> HandlerResult {
    let routine_id = id_param(req, "routineId")?;
    let token = token_param(req)?;
    let teacher_id = opt_str(req, "teacherId").unwrap_or("").trim().to_string();
    let AppState { db: conn, board, .. } = state;
    let conn = workspace_conn(conn)?;

    let subject_code = {
        let editor = board.editor_mut(&routine_id).ok_or(EditError::NoActiveEdit)?;
        editor.edit(token)?.draft.subject_code.clone()
    };
    let teacher_name = if teacher_id.is_empty() {
        String::new()
    } else {
        if subject_code.is_empty() {
            return Err(HandlerErr::bad_params("select a subject first"));
        }
        db::teacher_in_subject(conn, &subject_code, &teacher_id)
            .map_err(|e| HandlerErr::failed("db_query_failed", e))?
            .ok_or_else(|| HandlerErr::new("not_found", "teacher does not teach this subject"))?
    };

    let verdict =
        board.edit_select_teacher(conn, &routine_id, token, &teacher_id, &teacher_name, Instant::now())?;
    let editor = board.editor_mut(&routine_id).ok_or(EditError::NoActiveEdit)?;
    let edit = editor.edit(token)?;
    Ok(json!({
        "verdict": verdict.to_json(),
        "edit": edit_json(&routine_id, edit),
    }))
}

fn handle_edit_set_room(state: &mut AppState, req: &Request) -> HandlerResult {
    let routine_id = id_param(req, "routineId")?;
    let token = token_param(req)?;
    let room = str_param(req, "room")?;
    let editor = state
        .board
        .editor_mut(&routine_id)
        .ok_or(EditError::NoActiveEdit)?;
    let edit = editor.set_room(token, room)?;
    Ok(edit_json(&routine_id, edit))
}

fn outcome_json(outcome: &CommitOutcome) -> serde_json::Value {
    match outcome {
        CommitOutcome::Saved {
            updated_at,
            verdict,
        } => json!({
            "status": "saved",
            "updatedAt": updated_at,
            "verdict": verdict.to_json(),
        }),
        CommitOutcome::Cleared { removed } => json!({ "status": "cleared", "removed": removed }),
        CommitOutcome::Rejected(verdict) => json!({
            "status": "rejected",
            "verdict": verdict.to_json(),
        }),
    }
}

fn finish_edit(state: &mut AppState, req: &Request, clear: bool) -> HandlerResult {
    let routine_id = id_param(req, "routineId")?;
    let token = token_param(req)?;
    let now = Instant::now();
    let AppState { db: conn, board, .. } = state;
    let conn = workspace_conn(conn)?;

    let outcome = board.edit_commit(conn, &routine_id, token, clear, now)?;
    let mut result = outcome_json(&outcome);
    if let Some(editor) = board.editor_mut(&routine_id) {
        result["state"] = editor.state_json(now);
    }
    Ok(result)
}

fn handle_edit_cancel(state: &mut AppState, req: &Request) -> HandlerResult {
    let routine_id = id_param(req, "routineId")?;
    let cancelled = match state.board.editor_mut(&routine_id) {
        Some(editor) => {
            editor.cancel();
            true
        }
        None => false,
    };
    Ok(json!({ "routineId": routine_id, "cancelled": cancelled }))
}

fn handle_edit_state(state: &mut AppState, req: &Request) -> HandlerResult {
    let routine_id = id_param(req, "routineId")?;
    let Some(editor) = state.board.editor_mut(&routine_id) else {
        return Ok(json!({ "routineId": routine_id, "state": { "phase": "idle" } }));
    };
    let phase = editor.state_json(Instant::now());
    Ok(json!({ "routineId": editor.routine_id(), "state": phase }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "edit.open" => handle_edit_open(state, req),
        "edit.setSubject" => handle_edit_set_subject(state, req),
        "edit.selectTeacher" => handle_edit_select_teacher(state, req),
        "edit.setRoom" => handle_edit_set_room(state, req),
        "edit.commit" => finish_edit(state, req, false),
        "edit.clear" => finish_edit(state, req, true),
        "edit.cancel" => handle_edit_cancel(state, req),
        "edit.state" => handle_edit_state(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
