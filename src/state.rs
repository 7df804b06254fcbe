use crate::service::TradeService;

/// Shared HTTP state. The engine holds no per-session data, so one instance
/// serves every request.
pub struct AppState {
    pub service: TradeService,
}

impl AppState {
    pub fn new(service: TradeService) -> Self {
        Self { service }
    }
}
