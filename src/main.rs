mod assignment_index;
mod board;
mod commit;
mod config;
mod db;
mod ipc;
mod parameters;
mod prober;
mod store;
mod subjects_import;
mod timetable;

use std::io::{self, BufRead, Write};
use tracing::{debug, info, warn};

fn main() {
    let config = config::Config::from_env();
    config::init_tracing(&config);

    let mut state = ipc::AppState::new(config.clone());
    if let Some(path) = config.workspace {
        if let Err(e) = state.open_workspace(path.clone()) {
            warn!(workspace = %path.display(), error = %e, "could not open configured workspace");
        }
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        strict_probe = config.strict_probe,
        "routined ready"
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to answer to.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{resp}");
                let _ = stdout.flush();
                continue;
            }
        };

        let method = req.method.clone();
        let resp = ipc::handle_request(&mut state, req);
        if resp.get("ok").and_then(|v| v.as_bool()) == Some(false) {
            debug!(method = %method, error = %resp["error"]["code"], "request failed");
        }
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
