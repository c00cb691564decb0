/***************************************/
/*        3rd party libraries          */
/***************************************/
use driver_rust::elevio::elev::{DIRN_DOWN, DIRN_STOP, DIRN_UP};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/***************************************/
/*       Public data structures        */
/***************************************/

/// A car's operating mode. `MotorFault` is never sent to the hall request
/// assigner: a car in this state has already disconnected from the peer
/// beacon and its outstanding hall calls are redistributed to everyone else.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "moving")]
    Moving,
    #[serde(rename = "doorOpen")]
    DoorOpen,
    #[serde(rename = "error")]
    MotorFault,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Stop,
}

impl Direction {
    pub fn to_u8(self) -> u8 {
        match self {
            Direction::Up => DIRN_UP,
            Direction::Down => DIRN_DOWN,
            Direction::Stop => DIRN_STOP,
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Stop => Direction::Stop,
        }
    }
}

/// Which hall/cab button a request refers to. `HallUp`/`HallDown` index the
/// `hall_calls` matrix; `Cab` addresses the owning car's own `cab_calls`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonType {
    HallUp,
    HallDown,
    Cab,
}

/// The direction a `ClearOrder` event just served, or `NoHall` when only a
/// cab call (or nothing) was cleared at that stop.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClearOrderDirection {
    Up,
    Down,
    NoHall,
}

/// One car's observable snapshot: what the rest of the fleet needs to know
/// about it to assign hall calls and to render its lamps.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CarState {
    pub behaviour: Behaviour,
    pub floor: u8,
    pub direction: Direction,
    #[serde(rename = "cabRequests")]
    pub cab_calls: Vec<bool>,
}

impl CarState {
    pub fn new(n_floors: u8) -> CarState {
        CarState {
            behaviour: Behaviour::Idle,
            floor: 0,
            direction: Direction::Up,
            cab_calls: vec![false; n_floors as usize],
        }
    }
}

/// The replicated fleet-wide state: the hall-call matrix (floor x {up,
/// down}) plus one `CarState` per live peer, including self.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorldView {
    #[serde(rename = "hallRequests")]
    pub hall_calls: Vec<[bool; 2]>,
    pub cars: HashMap<String, CarState>,
}

impl WorldView {
    pub fn new(n_floors: u8) -> WorldView {
        WorldView {
            hall_calls: vec![[false, false]; n_floors as usize],
            cars: HashMap::new(),
        }
    }

    pub fn n_floors(&self) -> u8 {
        self.hall_calls.len() as u8
    }
}

/// Tag identifying what a `NetworkMessage` represents; also doubles as the
/// `event_type` tag on messages the Motion FSM sends to the State Store.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    StateUpdate,
    ClearOrder,
    MotorProblems,
    MotorWorksAgain,
}

/// Wire format broadcast on the fixed-cadence network tick. All fields are
/// present in every message; unused fields carry their zero value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NetworkMessage {
    pub id: String,
    #[serde(rename = "messageType")]
    pub message_type: MessageType,
    #[serde(rename = "remoteState")]
    pub remote_state: CarState,
    #[serde(rename = "hallRequests")]
    pub hall_calls: Vec<[bool; 2]>,
    #[serde(rename = "clearOrderDirection")]
    pub clear_order_direction: ClearOrderDirection,
}

impl NetworkMessage {
    /// The empty-id sentinel the Network module checks every tick before
    /// transmitting; nothing has been produced by the State Store yet.
    pub fn blank() -> NetworkMessage {
        NetworkMessage {
            id: String::new(),
            message_type: MessageType::StateUpdate,
            remote_state: CarState::new(0),
            hall_calls: Vec::new(),
            clear_order_direction: ClearOrderDirection::NoHall,
        }
    }
}

/// Event the Motion FSM raises on every behaviour change. Carries exactly
/// the fields named in the design: the State Store never needs more.
#[derive(Debug, Clone)]
pub struct FsmEvent {
    pub event_type: MessageType,
    pub floor: u8,
    pub behaviour: Behaviour,
    pub direction: Direction,
    pub clear_order_direction: ClearOrderDirection,
}

/// A button press observed by the hardware driver.
#[derive(Debug, Clone, Copy)]
pub struct ButtonPress {
    pub floor: u8,
    pub button: ButtonType,
}

/// The assignment the Dispatcher hands to the Motion FSM: this car's share
/// of the hall-call matrix, paired with its own current state.
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub hall_calls: Vec<[bool; 2]>,
    pub state: CarState,
}
