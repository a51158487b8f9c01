//! # Link State Machine
//!
//! Main states and substates shared by the connectionless bus and every
//! connection-oriented link.
//!
//! ```text
//!                      accept / connect
//!   Conles:  Ready     Conet:  Connecting ──► Connected ──► Closing ──► Closed
//!                                                │
//!                                                └──────────► Broken
//! ```
//!
//! | Substate | Meaning |
//! |----------|---------|
//! | `Idle`   | no exclusive operation in progress |
//! | `Locked` | registry mutation (bus) or link operation (conet) in progress |
//!
//! The pair is stored in one atomic word so a diagnostic reader never sees a
//! torn value.

use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};

/// Main link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MainState {
    /// Connectionless bus, always usable
    Ready = 1,
    /// Connection being established
    Connecting = 2,
    /// Connection usable
    Connected = 3,
    /// Explicit close in progress
    Closing = 4,
    /// Closed by this side or by an orderly peer shutdown (terminal)
    Closed = 5,
    /// Torn down by a transport failure (terminal)
    Broken = 6,
}

impl MainState {
    fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            1 => Self::Ready,
            2 => Self::Connecting,
            3 => Self::Connected,
            4 => Self::Closing,
            5 => Self::Closed,
            6 => Self::Broken,
            _ => return None,
        })
    }

    /// `Closed` and `Broken` admit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Broken)
    }

    /// Whether the state machine permits `self -> next`.
    pub fn can_transition_to(self, next: MainState) -> bool {
        use MainState::*;
        matches!(
            (self, next),
            (Connecting, Connected)
                | (Connecting, Broken)
                | (Connected, Closing)
                | (Connected, Closed)
                | (Connected, Broken)
                | (Closing, Closed)
                | (Closing, Broken)
        )
    }
}

/// Substate within a main state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SubState {
    Idle = 1,
    Locked = 2,
}

impl SubState {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            1 => Some(Self::Idle),
            2 => Some(Self::Locked),
            _ => None,
        }
    }
}

/// Snapshot returned by `get_link_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkState {
    pub main: MainState,
    pub sub: SubState,
}

impl LinkState {
    pub const fn new(main: MainState, sub: SubState) -> Self {
        Self { main, sub }
    }

    const fn encode(self) -> u16 {
        ((self.main as u16) << 8) | self.sub as u16
    }

    fn decode(word: u16) -> Option<Self> {
        let main = MainState::from_bits((word >> 8) as u8)?;
        let sub = SubState::from_bits((word & 0xff) as u8)?;
        Some(Self { main, sub })
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.main, self.sub)
    }
}

/// Error returned when a transition is not allowed from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: MainState,
    pub to: MainState,
}

/// Atomic `(MainState, SubState)` cell.
///
/// Only values built from the two enums are ever stored, so [`LinkStateCell::load`]
/// always decodes to a defined pair.
#[derive(Debug)]
pub struct LinkStateCell {
    word: AtomicU16,
}

impl LinkStateCell {
    pub fn new(initial: LinkState) -> Self {
        Self {
            word: AtomicU16::new(initial.encode()),
        }
    }

    /// Read the current pair.
    pub fn load(&self) -> LinkState {
        let word = self.word.load(Ordering::Acquire);
        // Every stored word came from `encode`.
        LinkState::decode(word).unwrap_or(LinkState::new(MainState::Broken, SubState::Idle))
    }

    pub fn main(&self) -> MainState {
        self.load().main
    }

    /// Set the substate, keeping the main state.
    pub fn set_sub(&self, sub: SubState) {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            let next = (current & 0xff00) | sub as u16;
            match self
                .word
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Move to `next` if the transition is legal. The substate becomes `Idle`
    /// when entering a terminal state and is kept otherwise.
    pub fn transition(&self, next: MainState) -> Result<LinkState, InvalidTransition> {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            let state = LinkState::decode(current).unwrap_or(LinkState::new(
                MainState::Broken,
                SubState::Idle,
            ));
            if !state.main.can_transition_to(next) {
                return Err(InvalidTransition {
                    from: state.main,
                    to: next,
                });
            }
            let sub = if next.is_terminal() {
                SubState::Idle
            } else {
                state.sub
            };
            let updated = LinkState::new(next, sub);
            match self.word.compare_exchange_weak(
                current,
                updated.encode(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(updated),
                Err(actual) => current = actual,
            }
        }
    }
}

/// Holds a cell in `Locked` and restores `Idle` on drop.
pub struct SubStateGuard<'a> {
    cell: &'a LinkStateCell,
}

impl<'a> SubStateGuard<'a> {
    pub fn lock(cell: &'a LinkStateCell) -> Self {
        cell.set_sub(SubState::Locked);
        Self { cell }
    }
}

impl Drop for SubStateGuard<'_> {
    fn drop(&mut self) {
        self.cell.set_sub(SubState::Idle);
    }
}
