use tokio::sync::watch;

/// Raises the abort signal. Held by whoever listens for Ctrl-C.
#[derive(Debug)]
pub struct AbortHandle(watch::Sender<bool>);

/// Receiving side of the abort signal, cloned into every external call.
#[derive(Debug, Clone)]
pub struct Abort(watch::Receiver<bool>);

pub fn signal() -> (AbortHandle, Abort) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle(tx), Abort(rx))
}

impl AbortHandle {
    pub fn raise(&self) {
        // send_replace never fails, even with no receivers left.
        self.0.send_replace(true);
    }
}

impl Abort {
    /// A signal that is never raised.
    pub fn never() -> Self {
        let (_, abort) = signal();
        abort
    }

    pub fn is_raised(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the signal is raised.
    /// If the handle is dropped without raising, this never resolves.
    pub async fn raised(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
