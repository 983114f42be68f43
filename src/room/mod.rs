// Party room: replicated roster plus the relay that multiplexes an
// embedded game between its frame and the other peers

pub mod frame;
pub mod relay;
pub mod state;

pub use frame::{frame_pair, FrameLink};
pub use relay::Room;
pub use state::{RoomAction, RoomLogic, RoomState, User};
