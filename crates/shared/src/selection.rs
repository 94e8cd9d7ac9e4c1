/// Which marker, if any, the user last clicked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionController {
    active: Option<String>,
}

impl SelectionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select `id`, returning the previously selected id.
    pub fn select(&mut self, id: impl Into<String>) -> Option<String> {
        self.active.replace(id.into())
    }

    pub fn clear(&mut self) -> Option<String> {
        self.active.take()
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.active.as_deref() == Some(id)
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Drop the selection if `exists` says its entity is gone. Returns true if cleared.
    pub fn retain(&mut self, exists: impl FnOnce(&str) -> bool) -> bool {
        match self.active.as_deref() {
            Some(id) if !exists(id) => {
                self.active = None;
                true
            }
            _ => false,
        }
    }
}
