use tokio_util::sync::CancellationToken;

/// Carried through every handler invocation and every blocking I/O call
/// (repository reads/writes, UoW commit, provider/FX calls). Handlers must
/// abort promptly on cancellation and return `CoreError::Transient` instead
/// of completing the operation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancellation: CancellationToken,
}

impl Context {
    pub fn new() -> Self {
        Self {
            cancellation: CancellationToken::new(),
        }
    }

    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}
