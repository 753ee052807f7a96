//! Input prediction for ticks whose input has not been confirmed yet.
//!
//! Predicted frames are thrown away once verification catches up, so a bad
//! prediction only costs a visible correction. A prediction must still be a
//! pure function of its arguments: the same predicted frame is re-simulated
//! every update and must not flicker between runs.

use crate::{Frame, PlayerHandle};

/// Chooses the input used for a player on a predicted tick.
#[cfg(feature = "sync-send")]
pub trait PredictionStrategy<I: Copy + Default>: Send + Sync {
    /// Returns the input to simulate for `player` at `tick`.
    ///
    /// `last_confirmed` is the player's newest confirmed input at or before `tick`.
    fn predict(&self, tick: Frame, last_confirmed: Option<I>, player: PlayerHandle) -> I;
}

/// Chooses the input used for a player on a predicted tick.
#[cfg(not(feature = "sync-send"))]
pub trait PredictionStrategy<I: Copy + Default> {
    /// Returns the input to simulate for `player` at `tick`.
    ///
    /// `last_confirmed` is the player's newest confirmed input at or before `tick`.
    fn predict(&self, tick: Frame, last_confirmed: Option<I>, player: PlayerHandle) -> I;
}

/// Repeats the newest confirmed input, or the default input before any arrived.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RepeatLastConfirmed;

impl<I: Copy + Default> PredictionStrategy<I> for RepeatLastConfirmed {
    fn predict(&self, _tick: Frame, last_confirmed: Option<I>, _player: PlayerHandle) -> I {
        last_confirmed.unwrap_or_default()
    }
}

/// Always predicts the default ("no buttons held") input.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlankPrediction;

impl<I: Copy + Default> PredictionStrategy<I> for BlankPrediction {
    fn predict(&self, _tick: Frame, _last_confirmed: Option<I>, _player: PlayerHandle) -> I {
        I::default()
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
    struct Buttons(u8);

    #[test]
    fn repeat_last_confirmed_falls_back_to_default() {
        let strategy = RepeatLastConfirmed;
        let repeated: Buttons = strategy.predict(Frame::new(5), Some(Buttons(9)), PlayerHandle::new(0));
        assert_eq!(repeated, Buttons(9));
        let blank: Buttons = strategy.predict(Frame::new(5), None, PlayerHandle::new(1));
        assert_eq!(blank, Buttons::default());
    }

    #[test]
    fn blank_prediction_ignores_history() {
        for player in 0..4 {
            let predicted: Buttons =
                BlankPrediction.predict(Frame::new(1), Some(Buttons(3)), PlayerHandle::new(player));
            assert_eq!(predicted, Buttons::default());
        }
    }
}
