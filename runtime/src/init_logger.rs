/// Sink for progress lines emitted by a (possibly slow) `initWorkspace` call
/// — cloning a repo, running a bundle sync, waiting on a managed remote to
/// boot. Implementations typically forward to a chat/log UI; tests can
/// collect into a `Vec<String>`.
pub trait InitLogger: Send + Sync {
    fn log(&self, line: &str);
}

/// An `InitLogger` that discards everything — the default when a caller
/// doesn't care about progress output.
pub struct NullInitLogger;

impl InitLogger for NullInitLogger {
    fn log(&self, _line: &str) {}
}

/// An `InitLogger` that appends to an in-memory buffer, for tests and for
/// callers that want to replay progress after the fact.
#[derive(Default)]
pub struct CollectingInitLogger {
    lines: std::sync::Mutex<Vec<String>>,
}

impl InitLogger for CollectingInitLogger {
    fn log(&self, line: &str) {
        self.lines.lock().expect("logger mutex poisoned").push(line.to_string());
    }
}

impl CollectingInitLogger {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("logger mutex poisoned").clone()
    }
}
