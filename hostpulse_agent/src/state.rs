//! Shared agent state handed to every request.

use std::sync::Arc;

use crate::collector::Collector;

#[derive(Clone)]
pub struct AppState {
    // Owns the metric source, and through it the network rate baseline
    pub collector: Arc<Collector>,
}

impl AppState {
    pub fn new(collector: Collector) -> Self {
        Self {
            collector: Arc::new(collector),
        }
    }
}
