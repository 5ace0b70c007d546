use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Opaque marker of transient DOM state: scroll position plus which panels the
/// page has expanded. Captured at the start of a feature operation, discarded
/// at its end, never persisted. Used to detect that a prior operation (a
/// comment read, typically) left residue that would break input resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct PageStateToken {
    pub id: Uuid,
    pub scroll_y: f64,
    pub expanded_panels: Vec<String>,
    pub captured_at: DateTime<Utc>,
}

impl PageStateToken {
    pub fn new(scroll_y: f64, expanded_panels: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scroll_y,
            expanded_panels,
            captured_at: Utc::now(),
        }
    }

    /// Whether the live state still matches what this token captured. Scroll
    /// offsets within half a viewport-ish tolerance count as unchanged; panel
    /// expansion must match exactly.
    pub fn matches(&self, current: &PageStateToken) -> bool {
        (self.scroll_y - current.scroll_y).abs() < 300.0
            && self.expanded_panels == current.expanded_panels
    }

    pub fn is_pristine(&self) -> bool {
        self.scroll_y < 1.0 && self.expanded_panels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pristine_token_has_no_residue() {
        let token = PageStateToken::new(0.0, vec![]);
        assert!(token.is_pristine());
        let scrolled = PageStateToken::new(1200.0, vec!["comments".into()]);
        assert!(!scrolled.is_pristine());
    }

    #[test]
    fn matches_tolerates_small_scroll_drift() {
        let a = PageStateToken::new(1000.0, vec!["comments".into()]);
        let b = PageStateToken::new(1150.0, vec!["comments".into()]);
        assert!(a.matches(&b));
        let c = PageStateToken::new(2000.0, vec!["comments".into()]);
        assert!(!a.matches(&c));
        let d = PageStateToken::new(1000.0, vec![]);
        assert!(!a.matches(&d));
    }
}
