// SPDX-License-Identifier: GPL-2.0-or-later

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Barrier;
use tokio::time::timeout;

/// Gate used in race mode: request heads are written immediately, the
/// bodies are released together once every parallel request is ready to
/// write, approximating simultaneous arrival at the endpoint.
#[derive(Clone)]
pub struct OpenGate {
    barrier: Arc<Barrier>,
    max_wait: Duration,
}

impl OpenGate {
    pub fn new(participants: usize) -> Self {
        Self {
            barrier: Arc::new(Barrier::new(participants.max(1))),
            max_wait: Duration::from_secs(2),
        }
    }

    /// Waits for all participants; a straggler can hold the gate for at
    /// most the timeout before the others proceed.
    pub async fn wait(&self) {
        let _ = timeout(self.max_wait, self.barrier.wait()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn gate_releases_all_participants_together() {
        let gate = OpenGate::new(3);
        let ready = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..3 {
            let gate = gate.clone();
            let ready = ready.clone();
            handles.push(tokio::spawn(async move {
                ready.fetch_add(1, Ordering::SeqCst);
                gate.wait().await;
                ready.load(Ordering::SeqCst)
            }));
        }
        for handle in handles {
            // every participant observed all three arrivals
            assert_eq!(handle.await.unwrap(), 3);
        }
    }
}
