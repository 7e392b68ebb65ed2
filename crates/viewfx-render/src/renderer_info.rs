use parking_lot::Mutex;

/// Description of the renderer that served the last warp, owned by one effect
/// instance. Empty until the first render after construction or a reset.
#[derive(Debug, Default)]
pub struct RendererInfo {
    text: Mutex<String>,
}

impl RendererInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached description; empty when not yet available.
    pub fn get(&self) -> String {
        self.text.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.text.lock().is_empty()
    }

    pub fn clear(&self) {
        self.text.lock().clear();
    }

    /// Return the cached description, computing it with `describe` if empty.
    ///
    /// `describe` runs without the lock held. When two renders race, the
    /// first stored description is kept.
    pub fn query_or_insert_with<F>(&self, describe: F) -> String
    where
        F: FnOnce() -> String,
    {
        {
            let text = self.text.lock();
            if !text.is_empty() {
                return text.clone();
            }
        }
        let fresh = describe();
        let mut text = self.text.lock();
        if text.is_empty() {
            *text = fresh;
        }
        text.clone()
    }
}
