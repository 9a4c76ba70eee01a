/// Soft-delete visibility for store reads. Every read takes one explicitly;
/// only administrative reactivation asks for `IncludeInactive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveFilter {
    #[default]
    ActiveOnly,
    IncludeInactive,
}

impl ActiveFilter {
    pub fn admits(self, active: bool) -> bool {
        match self {
            ActiveFilter::ActiveOnly => active,
            ActiveFilter::IncludeInactive => true,
        }
    }

    /// Bound into SQL as `($n OR active)`.
    pub fn include_inactive(self) -> bool {
        self == ActiveFilter::IncludeInactive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hides_inactive() {
        let filter = ActiveFilter::default();
        assert!(filter.admits(true));
        assert!(!filter.admits(false));
        assert!(!filter.include_inactive());
    }

    #[test]
    fn include_inactive_admits_everything() {
        assert!(ActiveFilter::IncludeInactive.admits(false));
        assert!(ActiveFilter::IncludeInactive.include_inactive());
    }
}
