use tapeflow_engine::EngineHandle;

/// Shared application state accessible by all route handlers. Everything
/// goes through the engine handle: snapshot reads are lock-free clones of
/// the latest `Arc`, controls go down the command channel.
pub struct AppState {
    pub engine: EngineHandle,
}

impl AppState {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}
