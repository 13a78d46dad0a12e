use crate::board::OpenRoutine;
use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{conn, id_param, opt_str, slot_params};
use crate::ipc::types::{AppState, Request};
use crate::prober::find_conflict;
use crate::timetable::validate_id;
use serde_json::json;

type HandlerResult = Result<serde_json::Value, HandlerErr>;

fn routine_json(routine_id: &str, routine: &OpenRoutine) -> serde_json::Value {
    let days: serde_json::Map<String, serde_json::Value> = routine
        .days
        .iter()
        .map(|(day, docs)| {
            let cells: serde_json::Map<String, serde_json::Value> = docs
                .iter()
                .map(|d| (d.period.to_string(), json!(d.assignment)))
                .collect();
            (day.key().to_string(), serde_json::Value::Object(cells))
        })
        .collect();
    json!({
        "routineId": routine_id,
        "name": routine.name,
        "days": days,
    })
}

fn handle_board_open(state: &mut AppState, req: &Request) -> HandlerResult {
    let routine_id = id_param(req, "routineId")?;
    let AppState { db: conn, board, .. } = state;
    let conn = conn
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
    match db::routine_exists(conn, &routine_id) {
        Ok(true) => {}
        Ok(false) => return Err(HandlerErr::new("not_found", "routine not found")),
        Err(e) => return Err(HandlerErr::failed("db_query_failed", e)),
    }
    let routine = board
        .open_routine(conn, &routine_id)
        .map_err(|e| HandlerErr::failed("db_query_failed", e))?;
    Ok(routine_json(&routine_id, routine))
}

fn handle_board_close(state: &mut AppState, req: &Request) -> HandlerResult {
    let routine_id = id_param(req, "routineId")?;
    let closed = state.board.close_routine(&routine_id);
    Ok(json!({ "routineId": routine_id, "closed": closed }))
}

fn handle_board_list(state: &mut AppState, _req: &Request) -> HandlerResult {
    let routines: Vec<_> = state
        .board
        .open_routines()
        .map(|(id, _)| json!({ "routineId": id, "name": state.board.display_name(id) }))
        .collect();
    Ok(json!({
        "routines": routines,
        "teachers": state.board.index().teacher_count(),
        "claims": state.board.index().claim_count(),
    }))
}

fn handle_board_check(state: &mut AppState, req: &Request) -> HandlerResult {
    let routine_id = id_param(req, "routineId")?;
    let teacher_id = id_param(req, "teacherId")?;
    let slot = slot_params(req)?;
    Ok(json!(state.board.check(&routine_id, slot, &teacher_id)))
}

fn handle_board_sync(state: &mut AppState, _req: &Request) -> HandlerResult {
    let AppState { db: conn, board, .. } = state;
    let conn = conn
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
    let report = board
        .sync(conn)
        .map_err(|e| HandlerErr::failed("db_query_failed", e))?;
    Ok(json!(report))
}

fn handle_board_teacher(state: &mut AppState, req: &Request) -> HandlerResult {
    let teacher_id = id_param(req, "teacherId")?;
    let slots: Vec<_> = state
        .board
        .index()
        .teacher_slots(&teacher_id)
        .into_iter()
        .map(|(slot, routines)| {
            let routines: Vec<_> = routines
                .into_iter()
                .map(|id| json!({ "routineId": id, "name": state.board.display_name(id) }))
                .collect();
            json!({
                "day": slot.day().key(),
                "period": slot.period(),
                "routines": routines,
            })
        })
        .collect();
    Ok(json!({ "teacherId": teacher_id, "slots": slots }))
}

fn handle_conflicts_find(state: &mut AppState, req: &Request) -> HandlerResult {
    let teacher_id = id_param(req, "teacherId")?;
    let slot = slot_params(req)?;
    let exclude = match opt_str(req, "excludeRoutineId") {
        Some(raw) => validate_id(raw, "excludeRoutineId")?,
        None => String::new(),
    };
    let conn = conn(state)?;
    Ok(find_conflict(conn, &teacher_id, slot, &exclude).to_json())
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "board.open" => handle_board_open(state, req),
        "board.close" => handle_board_close(state, req),
        "board.list" => handle_board_list(state, req),
        "board.check" => handle_board_check(state, req),
        "board.sync" => handle_board_sync(state, req),
        "board.teacher" => handle_board_teacher(state, req),
        "conflicts.find" => handle_conflicts_find(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
