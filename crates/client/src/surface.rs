//! Chat surface view state: closed / expanded / minimized, plus the unread badge.

/// Visibility of one conversation surface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SurfaceState {
    #[default]
    Closed,
    OpenExpanded,
    OpenMinimized,
}

/// Outcome of a requested transition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transition {
    pub changed: bool,
    /// The caller must run a full history fetch.
    pub refetch: bool,
}

impl Transition {
    const NONE: Transition = Transition {
        changed: false,
        refetch: false,
    };
}

/// Unread count resets to 0 exactly when the surface becomes expanded (and on close).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatSurface {
    state: SurfaceState,
    unread: u32,
}

impl ChatSurface {
    pub fn new(state: SurfaceState) -> Self {
        Self { state, unread: 0 }
    }

    pub fn state(&self) -> SurfaceState {
        self.state
    }

    pub fn unread(&self) -> u32 {
        self.unread
    }

    pub fn is_expanded(&self) -> bool {
        self.state == SurfaceState::OpenExpanded
    }

    /// Open from closed, or restore from minimized.
    pub fn open(&mut self) -> Transition {
        match self.state {
            SurfaceState::OpenExpanded => Transition::NONE,
            SurfaceState::Closed | SurfaceState::OpenMinimized => {
                self.state = SurfaceState::OpenExpanded;
                self.unread = 0;
                Transition {
                    changed: true,
                    refetch: true,
                }
            }
        }
    }

    pub fn minimize(&mut self) -> Transition {
        match self.state {
            SurfaceState::OpenExpanded => {
                self.state = SurfaceState::OpenMinimized;
                Transition {
                    changed: true,
                    refetch: false,
                }
            }
            SurfaceState::Closed | SurfaceState::OpenMinimized => Transition::NONE,
        }
    }

    pub fn close(&mut self) -> Transition {
        match self.state {
            SurfaceState::Closed => Transition::NONE,
            SurfaceState::OpenExpanded | SurfaceState::OpenMinimized => {
                self.state = SurfaceState::Closed;
                self.unread = 0;
                Transition {
                    changed: true,
                    refetch: false,
                }
            }
        }
    }

    /// Account for a relevant push. Returns true when the unread count moved.
    pub fn record_signal(&mut self) -> bool {
        if self.is_expanded() {
            return false;
        }
        self.unread = self.unread.saturating_add(1);
        true
    }

    /// Toggle-button badge: nothing at zero, "1".."9", then "9+".
    pub fn badge(&self) -> Option<String> {
        match self.unread {
            0 => None,
            n if n > 9 => Some("9+".to_string()),
            n => Some(n.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_resets_unread_and_requests_fetch() {
        let mut surface = ChatSurface::new(SurfaceState::Closed);
        surface.record_signal();
        surface.record_signal();
        assert_eq!(surface.unread(), 2);

        let t = surface.open();
        assert!(t.changed && t.refetch);
        assert_eq!(surface.unread(), 0);
        assert_eq!(surface.state(), SurfaceState::OpenExpanded);
    }

    #[test]
    fn expanded_surface_does_not_count_signals() {
        let mut surface = ChatSurface::new(SurfaceState::OpenExpanded);
        assert!(!surface.record_signal());
        assert_eq!(surface.unread(), 0);
    }

    #[test]
    fn minimize_then_restore() {
        let mut surface = ChatSurface::new(SurfaceState::OpenExpanded);
        let t = surface.minimize();
        assert!(t.changed && !t.refetch);
        assert!(surface.record_signal());
        assert_eq!(surface.unread(), 1);

        let t = surface.open();
        assert!(t.refetch);
        assert_eq!(surface.unread(), 0);
    }

    #[test]
    fn close_zeroes_unread_without_fetch() {
        let mut surface = ChatSurface::new(SurfaceState::OpenMinimized);
        surface.record_signal();
        let t = surface.close();
        assert!(t.changed && !t.refetch);
        assert_eq!(surface.unread(), 0);
        assert_eq!(surface.state(), SurfaceState::Closed);
    }

    #[test]
    fn invalid_transitions_are_no_ops() {
        let mut closed = ChatSurface::new(SurfaceState::Closed);
        closed.record_signal();
        assert_eq!(closed.minimize(), Transition::NONE);
        assert_eq!(closed.close(), Transition::NONE);
        assert_eq!(closed.unread(), 1);

        let mut expanded = ChatSurface::new(SurfaceState::OpenExpanded);
        assert_eq!(expanded.open(), Transition::NONE);
    }

    #[test]
    fn badge_caps_at_nine_plus() {
        let mut surface = ChatSurface::new(SurfaceState::Closed);
        assert_eq!(surface.badge(), None);
        for _ in 0..9 {
            surface.record_signal();
        }
        assert_eq!(surface.badge().as_deref(), Some("9"));
        surface.record_signal();
        assert_eq!(surface.badge().as_deref(), Some("9+"));
    }
}
