use anyhow::bail;

/// Explicit lifecycle for one viewing session. The sampling gate is a
/// deterministic function of these states: samples are accepted exactly while
/// the player is `Playing` and the gate is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Loading,
    Playing,
    Paused,
    Ended,
    Destroyed,
}

impl PlayerState {
    pub fn as_str(self) -> &'static str {
        match self {
            PlayerState::Idle => "idle",
            PlayerState::Loading => "loading",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::Ended => "ended",
            PlayerState::Destroyed => "destroyed",
        }
    }
}

/// Events the playback widget delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    Ready,
    Playing,
    Paused,
    Buffering,
    Ended,
}

impl PlaybackEvent {
    pub fn parse(raw: &str) -> Option<PlaybackEvent> {
        match raw {
            "ready" => Some(PlaybackEvent::Ready),
            "playing" => Some(PlaybackEvent::Playing),
            "paused" => Some(PlaybackEvent::Paused),
            "buffering" => Some(PlaybackEvent::Buffering),
            "ended" => Some(PlaybackEvent::Ended),
            _ => None,
        }
    }
}

/// What an event did to the session, beyond the state change itself. The
/// caller persists completion when it sees `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    SamplingStarted,
    SamplingStopped,
    Completed,
    NoChange,
}

#[derive(Debug)]
pub struct ViewerSession {
    pub user_id: String,
    pub video_id: String,
    pub player_ref: String,
    state: PlayerState,
    sampling: bool,
}

impl ViewerSession {
    pub fn open(user_id: &str, video_id: &str, player_ref: &str) -> ViewerSession {
        ViewerSession {
            user_id: user_id.to_string(),
            video_id: video_id.to_string(),
            player_ref: player_ref.to_string(),
            state: PlayerState::Loading,
            sampling: false,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn sampling(&self) -> bool {
        self.sampling
    }

    /// True when a position sample may be recorded right now.
    pub fn accepts_samples(&self) -> bool {
        self.state == PlayerState::Playing && self.sampling
    }

    /// Drives the state machine. Events are accepted in any order the widget
    /// produces them; only a torn-down session rejects further events.
    pub fn on_event(&mut self, event: PlaybackEvent) -> anyhow::Result<EventOutcome> {
        if self.state == PlayerState::Destroyed {
            bail!("viewer session already destroyed");
        }

        let outcome = match event {
            PlaybackEvent::Ready => {
                if self.state == PlayerState::Loading {
                    self.state = PlayerState::Paused;
                }
                EventOutcome::NoChange
            }
            PlaybackEvent::Playing => {
                self.state = PlayerState::Playing;
                let started = !self.sampling;
                self.sampling = true;
                if started {
                    EventOutcome::SamplingStarted
                } else {
                    EventOutcome::NoChange
                }
            }
            PlaybackEvent::Paused | PlaybackEvent::Buffering => {
                self.state = PlayerState::Paused;
                let stopped = self.sampling;
                self.sampling = false;
                if stopped {
                    EventOutcome::SamplingStopped
                } else {
                    EventOutcome::NoChange
                }
            }
            PlaybackEvent::Ended => {
                self.state = PlayerState::Ended;
                self.sampling = false;
                EventOutcome::Completed
            }
        };
        Ok(outcome)
    }

    /// Called when a progress write fails: the gate drops so a broken store
    /// is not hammered every sampling tick. The next `playing` event re-arms.
    pub fn halt_sampling(&mut self) {
        self.sampling = false;
    }

    /// Deterministic teardown. No sample is accepted afterwards.
    pub fn close(&mut self) {
        self.state = PlayerState::Destroyed;
        self.sampling = false;
    }
}
