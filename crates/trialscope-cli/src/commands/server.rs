use std::sync::Arc;

use trialscope_core::{CalibrationOrchestrator, MemoryStore, Settings, Store};
use trialscope_server::ServerState;

use super::{fail, make_source, open_session};

pub fn run(settings: Settings, host: &str, port: u16, source_name: &str, session: Option<&str>) {
    let store: Arc<dyn Store> = match session {
        Some(path) => Arc::new(open_session(path)),
        None => Arc::new(MemoryStore::new()),
    };
    let orchestrator =
        CalibrationOrchestrator::new(settings, make_source(source_name)).with_store(store.clone());

    let base = format!("http://{host}:{port}");
    println!("trialscope server v{}", trialscope_core::VERSION);
    println!("   {base}");
    println!("   source: {source_name}");
    match session {
        Some(path) => println!("   session: {path}"),
        None => println!("   session: none (in-memory store)"),
    }
    println!();
    println!("   Endpoints:");
    println!("     GET  /                     API index");
    println!("     GET  /health               Liveness and host resource score");
    println!("     GET  /calibration/status   Calibration state and progress");
    println!("     POST /calibration/standard Start a standard calibration");
    println!("     POST /calibration/cancel   Cancel it");
    println!("     GET  /calibration/result   Latest calibration result");
    println!("     GET  /events               Drain queued engine events");
    println!("     GET  /quality?minutes=N    Quality scan over recent trials");
    println!();
    println!("   Examples:");
    println!("     curl -X POST {base}/calibration/standard");
    println!("     curl {base}/calibration/status");
    println!("     curl {base}/quality?minutes=30");
    println!();

    let rt = tokio::runtime::Runtime::new().unwrap_or_else(|e| fail(e));
    let state = ServerState::new(orchestrator, store);
    if let Err(e) = rt.block_on(trialscope_server::run_server(state, host, port)) {
        fail(format!("server stopped: {e}"));
    }
}
