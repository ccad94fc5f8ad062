//! Server-requested cork handling
//!
//! The server may ask a stream to cork, e.g. while a phone call is active.
//! We remember that the pause came from the server so a later uncork
//! request only resumes playback the server itself paused, never a pause
//! the user asked for.

use crate::output::PlaybackState;
use crate::server::StreamEventKind;

/// What the session should do in response to a server request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorkAction {
    Ignore,
    /// Flush, cork, go to Paused and tell the host
    Pause,
    /// Uncork, go to Playing and tell the host
    Resume,
}

#[derive(Debug, Default)]
pub struct CorkCoordinator {
    requested: bool,
}

impl CorkCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current pause was triggered by the server
    pub fn is_requested(&self) -> bool {
        self.requested
    }

    pub fn on_server_request(&mut self, kind: StreamEventKind, state: PlaybackState, pause_on_cork: bool) -> CorkAction {
        match kind {
            StreamEventKind::RequestCork => {
                if !pause_on_cork || state != PlaybackState::Playing {
                    return CorkAction::Ignore;
                }
                self.requested = true;
                CorkAction::Pause
            }
            StreamEventKind::RequestUncork => {
                if !self.requested {
                    return CorkAction::Ignore;
                }
                self.requested = false;
                if state == PlaybackState::Paused {
                    CorkAction::Resume
                } else {
                    CorkAction::Ignore
                }
            }
        }
    }

    /// The user paused; the pause is theirs from now on
    pub fn on_user_pause(&mut self) {
        self.requested = false;
    }

    pub fn on_user_unpause(&mut self) {
        self.requested = false;
    }

    pub fn reset(&mut self) {
        self.requested = false;
    }
}
