use crate::animation::{ActionHandle, AnimationMixer};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Paused,
    Playing,
}

impl PlaybackState {
    pub fn toggled(self) -> Self {
        match self {
            PlaybackState::Paused => PlaybackState::Playing,
            PlaybackState::Playing => PlaybackState::Paused,
        }
    }

    pub fn is_paused(self) -> bool {
        self == PlaybackState::Paused
    }
}

/// Which glyph the play/pause button shows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IconVisibility {
    pub play: bool,
    pub pause: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToggleOutcome {
    Started,
    Paused,
    NotReady,
}

/// Two-state play/pause controller for the first animation action.
///
/// The controller owns the state; [`PlaybackController::apply`] copies it
/// into the action each frame.
#[derive(Debug, Default)]
pub struct PlaybackController {
    state: PlaybackState,
    action: Option<ActionHandle>,
}

impl PlaybackController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the controller to an action in the paused state.
    pub fn attach(&mut self, action: ActionHandle) {
        self.action = Some(action);
        self.state = PlaybackState::Paused;
    }

    pub fn is_attached(&self) -> bool {
        self.action.is_some()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn toggle(&mut self) -> ToggleOutcome {
        if self.action.is_none() {
            log::info!("Animation or mixer not initialized");
            return ToggleOutcome::NotReady;
        }
        self.state = self.state.toggled();
        match self.state {
            PlaybackState::Playing => {
                log::info!("Animation started");
                ToggleOutcome::Started
            }
            PlaybackState::Paused => {
                log::info!("Animation paused");
                ToggleOutcome::Paused
            }
        }
    }

    pub fn icons(&self) -> IconVisibility {
        IconVisibility { play: self.state.is_paused(), pause: !self.state.is_paused() }
    }

    pub fn apply(&self, mixer: &mut AnimationMixer) {
        let Some(handle) = self.action else {
            return;
        };
        if let Some(action) = mixer.action_mut(handle) {
            action.paused = self.state.is_paused();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_before_attach_is_a_no_op() {
        let mut controller = PlaybackController::new();
        assert_eq!(controller.toggle(), ToggleOutcome::NotReady);
        assert_eq!(controller.state(), PlaybackState::Paused);
        assert_eq!(controller.icons(), IconVisibility { play: true, pause: false });
    }

    #[test]
    fn double_toggle_restores_state() {
        let mut controller = PlaybackController::new();
        controller.attach(ActionHandle::from_index(0));
        assert_eq!(controller.toggle(), ToggleOutcome::Started);
        assert_eq!(controller.icons(), IconVisibility { play: false, pause: true });
        assert_eq!(controller.toggle(), ToggleOutcome::Paused);
        assert_eq!(controller.state(), PlaybackState::Paused);
        assert_eq!(controller.icons(), IconVisibility { play: true, pause: false });
    }

    #[test]
    fn icons_are_complementary() {
        for state in [PlaybackState::Paused, PlaybackState::Playing] {
            let controller = PlaybackController { state, action: None };
            let icons = controller.icons();
            assert_ne!(icons.play, icons.pause);
            assert_eq!(icons.play, state.is_paused());
        }
    }
}
