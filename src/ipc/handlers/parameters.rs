use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{conn, str_param};
use crate::ipc::types::{AppState, Request};
use crate::parameters::{self, ParameterKey};
use serde_json::json;

type HandlerResult = Result<serde_json::Value, HandlerErr>;

fn handle_parameters_get(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = conn(state)?;
    let all = parameters::load_all(conn).map_err(|e| HandlerErr::failed("db_query_failed", e))?;
    Ok(json!({ "parameters": all }))
}

fn handle_parameters_set(state: &mut AppState, req: &Request) -> HandlerResult {
    let key = ParameterKey::parse(str_param(req, "key")?)?;
    let Some(value) = req.params.get("value") else {
        return Err(HandlerErr::bad_params("missing value"));
    };
    let value = key.normalize(value)?;
    let conn = conn(state)?;
    let doc = parameters::store(conn, key, &value)
        .map_err(|e| HandlerErr::failed("db_update_failed", e))?;
    Ok(json!({ "key": key.key(), "value": doc["value"], "updatedAt": doc["updatedAt"] }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "parameters.get" => handle_parameters_get(state, req),
        "parameters.set" => handle_parameters_set(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
