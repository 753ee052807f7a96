//! Recorded sessions.
//!
//! A [`ReplayFile`] holds everything needed to re-simulate a session from its
//! initial frame: the session parameters, the game's opaque runtime config,
//! the complete confirmed input history, and the tick the recording ends at.
//! It may also embed the serialized terminal frame and the recorded checksum
//! log, in which case a replay session verifies itself against them.
//!
//! ```
//! use fortress_lockstep::replay::ReplayFile;
//! use fortress_lockstep::input_history::InputHistory;
//! use fortress_lockstep::{Frame, SessionConfig};
//!
//! let history = InputHistory::new(2, Frame::new(1)).unwrap();
//! let replay = ReplayFile::new(SessionConfig::default(), b"arena-3".to_vec(), history.export(Frame::NULL));
//! let bytes = replay.to_bytes().unwrap();
//! assert_eq!(ReplayFile::from_bytes(&bytes).unwrap(), replay);
//! ```

use serde::{Deserialize, Serialize};

use crate::checksum::ChecksumLog;
use crate::codec;
use crate::error::LockstepError;
use crate::input_history::InputExport;
use crate::sessions::config::SessionConfig;
use crate::Frame;

/// Leading bytes of an encoded replay.
pub const REPLAY_MAGIC: [u8; 4] = *b"FLRP";

/// Current replay format version.
pub const REPLAY_FORMAT_VERSION: u16 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope {
    magic: [u8; 4],
    version: u16,
    replay: ReplayFile,
}

/// A recorded session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayFile {
    /// Parameters of the recorded session.
    pub session: SessionConfig,
    /// Opaque game configuration (map, rules) supplied when the session was built.
    pub runtime_config: Vec<u8>,
    /// Complete confirmed input from the first simulated tick to `terminal_tick`.
    pub inputs: InputExport,
    /// Last tick of the recording. `0` if nothing was simulated.
    pub terminal_tick: Frame,
    /// The terminal frame serialized with
    /// [`SerializeMode::Replay`](crate::SerializeMode::Replay).
    pub terminal_frame: Option<Vec<u8>>,
    /// Checksums recorded by the session.
    pub checksums: Option<ChecksumLog>,
}

impl ReplayFile {
    /// A replay of `inputs` without terminal frame or checksums.
    #[must_use]
    pub fn new(session: SessionConfig, runtime_config: Vec<u8>, inputs: InputExport) -> Self {
        let terminal_tick = match inputs.last_tick() {
            tick if tick.is_null() => Frame::new(0),
            tick => tick,
        };
        Self {
            session,
            runtime_config,
            inputs,
            terminal_tick,
            terminal_frame: None,
            checksums: None,
        }
    }

    /// Encodes the replay with a magic/version header.
    pub fn to_bytes(&self) -> Result<Vec<u8>, LockstepError> {
        #[derive(Serialize)]
        struct EnvelopeRef<'a> {
            magic: [u8; 4],
            version: u16,
            replay: &'a ReplayFile,
        }
        Ok(codec::encode(&EnvelopeRef {
            magic: REPLAY_MAGIC,
            version: REPLAY_FORMAT_VERSION,
            replay: self,
        })?)
    }

    /// Decodes and validates a replay.
    ///
    /// # Errors
    ///
    /// Returns [`LockstepError::Serialization`] if the bytes are not a replay of
    /// this format version, or if the recorded inputs do not cover exactly the
    /// ticks up to `terminal_tick`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LockstepError> {
        let envelope: Envelope = codec::decode_exact(bytes)?;
        if envelope.magic != REPLAY_MAGIC {
            return Err(LockstepError::serialization("not a replay file"));
        }
        if envelope.version != REPLAY_FORMAT_VERSION {
            return Err(LockstepError::serialization(format!(
                "unsupported replay format version {} (expected {})",
                envelope.version, REPLAY_FORMAT_VERSION
            )));
        }
        envelope.replay.validate()?;
        Ok(envelope.replay)
    }

    /// Checks that the parts of the replay agree with each other.
    pub fn validate(&self) -> Result<(), LockstepError> {
        self.session.validate()?;
        if self.inputs.player_count != self.session.player_count {
            return Err(LockstepError::serialization(format!(
                "replay inputs are for {} players but the session has {}",
                self.inputs.player_count, self.session.player_count
            )));
        }
        let last = self.inputs.last_tick();
        let covered = if last.is_null() { Frame::new(0) } else { last };
        if covered != self.terminal_tick {
            return Err(LockstepError::serialization(format!(
                "replay terminal tick {} but inputs end at {}",
                self.terminal_tick, covered
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::input_history::{InputFlags, InputHistory};
    use crate::PlayerHandle;

    fn recorded(ticks: i32) -> ReplayFile {
        let mut history = InputHistory::new(2, Frame::new(1)).unwrap();
        for tick in 1..=ticks {
            for player in 0..2 {
                history
                    .on_input_confirmed(
                        Frame::new(tick),
                        PlayerHandle::new(player),
                        &[tick as u8, player as u8],
                        InputFlags::NONE,
                    )
                    .unwrap();
            }
        }
        ReplayFile::new(
            SessionConfig::default(),
            b"rules".to_vec(),
            history.export(Frame::new(ticks)),
        )
    }

    #[test]
    fn terminal_tick_follows_inputs() {
        assert_eq!(recorded(5).terminal_tick, Frame::new(5));
        assert_eq!(recorded(0).terminal_tick, Frame::new(0));
    }

    #[test]
    fn bytes_round_trip_with_optional_parts() {
        let mut replay = recorded(3);
        let mut log = ChecksumLog::new(1);
        log.record(Frame::new(1), 0xabcd).unwrap();
        replay.checksums = Some(log);
        replay.terminal_frame = Some(vec![1, 2, 3]);
        let decoded = ReplayFile::from_bytes(&replay.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, replay);
    }

    #[test]
    fn rejects_foreign_magic_and_versions() {
        let replay = recorded(1);
        let mut bytes = replay.to_bytes().unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            ReplayFile::from_bytes(&bytes),
            Err(LockstepError::Serialization { .. })
        ));

        let mut bytes = replay.to_bytes().unwrap();
        bytes[4] = 9;
        let err = ReplayFile::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn rejects_inconsistent_terminal_tick() {
        let mut replay = recorded(4);
        replay.terminal_tick = Frame::new(7);
        assert!(ReplayFile::from_bytes(&replay.to_bytes().unwrap()).is_err());
    }
}
