use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{conn, id_param, str_param};
use crate::ipc::types::{AppState, Request};
use crate::store::ScheduleStore;
use crate::subjects_import;
use crate::timetable::{teaching_periods, validate_name, Day, BREAK_LABEL, TIME_SLOTS};
use serde_json::json;
use std::path::Path;

type HandlerResult = Result<serde_json::Value, HandlerErr>;

fn require_routine(conn: &rusqlite::Connection, routine_id: &str) -> Result<(), HandlerErr> {
    match db::routine_exists(conn, routine_id) {
        Ok(true) => Ok(()),
        Ok(false) => Err(HandlerErr::new("not_found", "routine not found")),
        Err(e) => Err(HandlerErr::failed("db_query_failed", e)),
    }
}

fn handle_routines_list(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = conn(state)?;
    let routines = db::routines_list(conn).map_err(|e| HandlerErr::failed("db_query_failed", e))?;
    Ok(json!({ "routines": routines }))
}

fn handle_routines_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = conn(state)?;
    let id = id_param(req, "id")?;
    let created = db::routine_create(conn, &id).map_err(|e| HandlerErr::failed("db_insert_failed", e))?;
    Ok(json!({ "id": id, "created": created }))
}

fn handle_routines_rename(state: &mut AppState, req: &Request) -> HandlerResult {
    let id = id_param(req, "id")?;
    let name = validate_name(str_param(req, "name")?, "name")?;
    let conn = conn(state)?;
    require_routine(conn, &id)?;
    db::routine_set_name(conn, &id, &name).map_err(|e| HandlerErr::failed("db_update_failed", e))?;
    state.board.rename_routine(&id, &name);
    Ok(json!({ "id": id, "name": name }))
}

fn handle_subjects_list(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = conn(state)?;
    let subjects = db::subjects_list(conn).map_err(|e| HandlerErr::failed("db_query_failed", e))?;
    Ok(json!({ "subjects": subjects }))
}

fn handle_subjects_upsert(state: &mut AppState, req: &Request) -> HandlerResult {
    let code = id_param(req, "code")?;
    let name = validate_name(str_param(req, "name")?, "name")?;
    let conn = conn(state)?;
    db::subject_upsert(conn, &code, &name).map_err(|e| HandlerErr::failed("db_insert_failed", e))?;
    Ok(json!({ "code": code, "name": name }))
}

fn handle_teachers_add(state: &mut AppState, req: &Request) -> HandlerResult {
    let subject_code = id_param(req, "subjectCode")?;
    let name = validate_name(str_param(req, "name")?, "name")?;
    let conn = conn(state)?;
    let exists = db::subject_name(conn, &subject_code)
        .map_err(|e| HandlerErr::failed("db_query_failed", e))?
        .is_some();
    if !exists {
        return Err(HandlerErr::new("not_found", "subject not found"));
    }
    let id = db::teacher_add(conn, &subject_code, &name)
        .map_err(|e| HandlerErr::failed("db_insert_failed", e))?;
    Ok(json!({ "id": id, "subjectCode": subject_code, "name": name }))
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let subject_code = id_param(req, "subjectCode")?;
    let conn = conn(state)?;
    let teachers = db::teachers_for_subject(conn, &subject_code)
        .map_err(|e| HandlerErr::failed("db_query_failed", e))?;
    Ok(json!({ "teachers": teachers }))
}

fn handle_teachers_list_all(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = conn(state)?;
    let teachers = db::teachers_all(conn).map_err(|e| HandlerErr::failed("db_query_failed", e))?;
    Ok(json!({ "teachers": teachers }))
}

fn handle_subjects_preview_csv(_state: &mut AppState, req: &Request) -> HandlerResult {
    let path = str_param(req, "path")?;
    let rows = subjects_import::preview(Path::new(path))
        .map_err(|e| HandlerErr::failed("import_failed", e))?;
    Ok(json!({ "rows": rows }))
}

fn handle_subjects_import_csv(state: &mut AppState, req: &Request) -> HandlerResult {
    let path = str_param(req, "path")?;
    let conn = conn(state)?;
    let summary = subjects_import::import(conn, Path::new(path))
        .map_err(|e| HandlerErr::failed("import_failed", e))?;
    Ok(json!(summary))
}

fn handle_schedule_layout(_state: &mut AppState, _req: &Request) -> HandlerResult {
    let days: Vec<_> = Day::ALL
        .iter()
        .map(|d| json!({ "key": d.key(), "name": d.display_name() }))
        .collect();
    Ok(json!({
        "days": days,
        "timeSlots": TIME_SLOTS,
        "teachingPeriods": teaching_periods().collect::<Vec<_>>(),
        "breakLabel": BREAK_LABEL,
    }))
}

fn handle_schedule_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let routine_id = id_param(req, "routineId")?;
    let conn = conn(state)?;
    require_routine(conn, &routine_id)?;
    let query = |e: anyhow::Error| HandlerErr::failed("db_query_failed", e);

    let mut days = Vec::with_capacity(Day::ALL.len());
    for day in Day::ALL {
        let docs = conn.day_periods(&routine_id, day).map_err(query)?;
        let periods: Vec<_> = TIME_SLOTS
            .iter()
            .map(|slot| {
                let assignment = docs
                    .iter()
                    .find(|d| d.period == slot.period && !slot.is_break)
                    .map(|d| &d.assignment);
                json!({
                    "period": slot.period,
                    "time": slot.time,
                    "isBreak": slot.is_break,
                    "assignment": assignment,
                })
            })
            .collect();
        days.push(json!({ "day": day.key(), "name": day.display_name(), "periods": periods }));
    }
    let name = conn.routine_name(&routine_id).map_err(query)?;
    Ok(json!({ "routineId": routine_id, "name": name, "days": days }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "routines.list" => handle_routines_list(state, req),
        "routines.create" => handle_routines_create(state, req),
        "routines.rename" => handle_routines_rename(state, req),
        "subjects.list" => handle_subjects_list(state, req),
        "subjects.upsert" => handle_subjects_upsert(state, req),
        "subjects.previewCsv" => handle_subjects_preview_csv(state, req),
        "subjects.importCsv" => handle_subjects_import_csv(state, req),
        "teachers.add" => handle_teachers_add(state, req),
        "teachers.list" => handle_teachers_list(state, req),
        "teachers.listAll" => handle_teachers_list_all(state, req),
        "schedule.layout" => handle_schedule_layout(state, req),
        "schedule.get" => handle_schedule_get(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
