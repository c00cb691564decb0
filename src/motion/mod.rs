pub mod fsm;

pub use fsm::MotionFsm;
