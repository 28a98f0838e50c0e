use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// Delayed deliveries into one event inbox. Everything still pending is
/// aborted when the set is dropped.
pub struct TimerSet<E: Send + 'static> {
    inbox: UnboundedSender<E>,
    pending: Vec<JoinHandle<()>>,
}

impl<E: Send + 'static> TimerSet<E> {
    pub fn new(inbox: UnboundedSender<E>) -> Self {
        Self {
            inbox,
            pending: Vec::new(),
        }
    }

    pub fn schedule(&mut self, delay: Duration, event: E) {
        self.pending.retain(|task| !task.is_finished());
        let inbox = self.inbox.clone();
        self.pending.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inbox.send(event);
        }));
    }

    pub fn pending(&self) -> usize {
        self.pending.iter().filter(|task| !task.is_finished()).count()
    }

    pub fn cancel_all(&mut self) {
        for task in self.pending.drain(..) {
            task.abort();
        }
    }
}

impl<E: Send + 'static> Drop for TimerSet<E> {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
