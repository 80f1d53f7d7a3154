/*!
 * Disposable
 * A labeled, one-shot release action owned by exactly one scope
 */

/// A cleanup action registered under a scope. Released exactly once when the
/// owning scope is disposed; construction consumes the release closure.
pub struct Disposable {
    label: String,
    release: Box<dyn FnOnce() + Send>,
}

impl Disposable {
    pub fn new(label: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            release: Box::new(release),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Consume the disposable and run its release action
    pub(crate) fn release(self) {
        (self.release)();
    }
}

impl std::fmt::Debug for Disposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposable")
            .field("label", &self.label)
            .finish()
    }
}
