pub mod macros;
pub mod types;

pub use types::{
    Behaviour, ButtonPress, ButtonType, CarState, ClearOrderDirection, Direction, FsmEvent,
    MessageType, NetworkMessage, OrderUpdate, WorldView,
};
