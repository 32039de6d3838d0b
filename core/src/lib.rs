pub mod engine;
pub mod error;
pub mod handle;
pub mod input;
pub mod library;
pub mod persistence;
pub mod savestate;
pub mod session;

pub mod prelude {
    pub use crate::engine::{CoreEngine, EngineError, FRAME_LEN, InstanceHandle, NativeFrame};
    pub use crate::error::{ImportError, SessionError};
    pub use crate::handle::{EmulatorHandle, StateDump};
    pub use crate::input::{ActionButton, ButtonSet, Direction, InputAggregator, InputMask};
    pub use crate::persistence::{Game, GameId, PersistenceError, PersistenceGateway};
    pub use crate::savestate::{PreviewImage, Savestate, SavestateCodec};
    pub use crate::session::{SessionController, SessionState};
}
