//! Events delivered to the presentation layer.
//!
//! A front end renders a game purely from these: the setup screen, the
//! lobby's start button, the countdown overlay, both plant images, the
//! winner banner and its play-again button.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::protocol::{Element, PlantKind, PlayerId, RoomId, Stage};

/// Which of the two players an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The local player.
    Me,
    /// The other player in the room.
    Opponent,
}

/// One step of the pre-round countdown overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CountdownTick {
    Three,
    Two,
    One,
    /// Final tick; the overlay dismisses itself one tick later.
    Grow,
}

impl CountdownTick {
    /// The tick shown after this one, `None` after [`CountdownTick::Grow`].
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Three => Some(Self::Two),
            Self::Two => Some(Self::One),
            Self::One => Some(Self::Grow),
            Self::Grow => None,
        }
    }

    /// Overlay text for this tick.
    pub fn label(self) -> &'static str {
        match self {
            Self::Three => "3",
            Self::Two => "2",
            Self::One => "1",
            Self::Grow => "Grow!",
        }
    }
}

/// User-initiated actions whose failure is reported back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserAction {
    CreateRoom,
    JoinRoom,
    /// Host only: stamping `gameStarted`/`startedAt` failed.
    StartGame,
}

/// Events emitted by a [`GameClient`](crate::GameClient) session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    /// The host's room was written and is being watched.
    RoomCreated { room_id: RoomId },
    /// The local player's record was added to an existing room.
    RoomJoined { room_id: RoomId },
    /// Creating, joining or starting failed; show `message` to the user.
    ActionFailed { action: UserAction, message: String },

    /// Host lobby: no named opponent yet, `player_count` of 2 present.
    WaitingForOpponent { player_count: usize },
    /// Host lobby: an opponent arrived, the start action is enabled.
    StartEnabled {
        opponent: PlayerId,
        opponent_name: String,
    },
    /// The opponent's display name appeared or changed.
    OpponentUpdated { opponent: PlayerId, name: String },

    /// The room was started; gameplay begins after `starts_in`.
    GameScheduled { starts_in: Duration },
    /// The game screen is live and the countdown begins.
    GameEntered,
    /// Countdown overlay step.
    Countdown(CountdownTick),
    /// Countdown overlay removed.
    CountdownDismissed,

    /// Immediate local feedback after an accepted collect.
    ProgressUpdated {
        stage: Stage,
        collected: BTreeSet<Element>,
    },
    /// A plant's stage changed in the room; re-render and animate it.
    StageChanged {
        side: Side,
        stage: Stage,
        plant: PlantKind,
    },

    /// The round has a winner; the banner follows after a short delay.
    WinnerDecided { winner: Side, player: PlayerId },
    /// Show the banner and celebration, and enable "play again".
    WinnerRevealed { winner: Side },
    /// The local player asked for a rematch and waits for the opponent.
    RestartRequested,
    /// Both players agreed to a rematch: the banner is hidden and both plants
    /// go back to stage 1.
    RoundReset {
        my_plant: PlantKind,
        opponent_plant: PlantKind,
    },

    /// The session loop stopped. Always the last event.
    SessionClosed { reason: Option<String> },
}
