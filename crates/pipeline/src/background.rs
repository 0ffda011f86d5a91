//! Background audio (e.g. thinking/typing sounds) played while the agent
//! is composing a response. Not present in the original's scope, but
//! implied by its barge-in step 1 ("background-audio-stop"); supplied here
//! as a minimal player so that step has something concrete to act on.

use std::sync::atomic::{AtomicBool, Ordering};

/// Tracks whether ambient audio is currently playing and notifies a
/// `Room`'s audio egress track to start/stop it. Left provider-agnostic:
/// callers own the actual egress track and are simply told when to play.
#[derive(Default)]
pub struct BackgroundAudioPlayer {
    playing: AtomicBool,
}

impl BackgroundAudioPlayer {
    pub fn new() -> Self {
        Self { playing: AtomicBool::new(false) }
    }

    pub fn start(&self) {
        self.playing.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.playing.store(false, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_stop_toggles_state() {
        let player = BackgroundAudioPlayer::new();
        assert!(!player.is_playing());
        player.start();
        assert!(player.is_playing());
        player.stop();
        assert!(!player.is_playing());
    }
}
