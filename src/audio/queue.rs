use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::audio::RequestContext;

/// A request to play one URL, queued on behalf of a user.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRequest {
    pub url: String,
    pub context: RequestContext,
    pub added_at: DateTime<Utc>,
}

impl TrackRequest {
    pub fn new(url: impl Into<String>, context: RequestContext) -> Self {
        Self {
            url: url.into(),
            context,
            added_at: Utc::now(),
        }
    }
}

/// Pending requests of one guild, strict FIFO and unbounded.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    items: VecDeque<TrackRequest>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega un request al final de la cola y devuelve su posición (1 = siguiente)
    pub fn enqueue(&mut self, request: TrackRequest) -> usize {
        info!("➕ Agregado a la cola: {}", request.url);
        self.items.push_back(request);
        self.items.len()
    }

    /// Obtiene el siguiente request (FIFO - First In, First Out)
    pub fn next_request(&mut self) -> Option<TrackRequest> {
        let next = self.items.pop_front();
        match &next {
            Some(request) => info!("➡️ Siguiente en cola (FIFO): {}", request.url),
            None => debug!("📭 Cola vacía, no hay siguiente request"),
        }
        next
    }

    /// Limpia la cola y devuelve cuántos requests se descartaron
    pub fn clear(&mut self) -> usize {
        let discarded = self.items.len();
        self.items.clear();
        if discarded > 0 {
            info!("🗑️ Cola limpiada ({} descartados)", discarded);
        }
        discarded
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// URLs pendientes en orden de reproducción
    pub fn urls(&self) -> Vec<String> {
        self.items.iter().map(|request| request.url.clone()).collect()
    }
}
