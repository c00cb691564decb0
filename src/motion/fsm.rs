/**
 * Drives a single car through its floor-service state machine.
 *
 * The Motion FSM owns the motor, door, floor indicator and stop lamp
 * commands for this car. It reacts to floor-sensor edges from the
 * hardware driver and to `OrderUpdate`s from the Dispatcher, and emits
 * `FsmEvent`s that the State Store folds into the replicated world view.
 * It has no notion of peers, the network, or persistence.
 *
 * # Fields
 * - `hw_motor_direction_tx`:   Motor direction commands (up/down/stop).
 * - `hw_floor_sensor_rx`:      Floor-edge events from the driver.
 * - `hw_door_light_tx`:        Door lamp commands.
 * - `hw_floor_indicator_tx`:   Floor indicator commands.
 * - `hw_stop_lamp_tx`:         Stop lamp commands.
 * - `hw_obstruction_rx`:       Obstruction-edge events from the driver.
 * - `hw_stop_button_rx`:       Stop-button edge events from the driver.
 * - `order_update_rx`:         This car's assigned orders from the Dispatcher.
 * - `fsm_event_tx`:            Lifecycle events to the State Store.
 * - `terminate_rx`:            Termination signal, used by the integration test harness.
 * - `state`:                   This car's own `CarState` (behaviour, floor, direction, cab calls).
 * - `hall_calls`:               This car's currently assigned share of the hall-call matrix.
 * - `n_floors`:                Fleet-constant floor count.
 * - `obstruction`:             Whether the obstruction switch currently reads active.
 * - `door_open_time`:          How long the door stays open once armed.
 * - `motor_watchdog_initial`:  Watchdog budget armed when starting to move from a stop.
 * - `motor_watchdog_resume`:   Watchdog budget armed when resuming after the door closes.
 * - `door_timer_rx`:           Fires when the door should close; `never()` while disarmed.
 * - `motor_watchdog_rx`:       Fires on a stalled floor-to-floor crossing; `never()` while disarmed.
 */

/***************************************/
/*        3rd party libraries          */
/***************************************/
use crossbeam_channel as cbc;
use log::{info, warn};
use std::time::Duration;

/***************************************/
/*           Local modules             */
/***************************************/
use crate::config::ElevatorConfig;
use crate::shared::Behaviour::{DoorOpen, Idle, Moving, MotorFault};
use crate::shared::Direction::{Down, Stop, Up};
use crate::shared::{
    CarState, ClearOrderDirection, Direction, FsmEvent, MessageType, OrderUpdate,
};

/***************************************/
/*             Public API              */
/***************************************/
pub struct MotionFsm {
    hw_motor_direction_tx: cbc::Sender<u8>,
    hw_floor_sensor_rx: cbc::Receiver<u8>,
    hw_door_light_tx: cbc::Sender<bool>,
    hw_floor_indicator_tx: cbc::Sender<u8>,
    hw_stop_lamp_tx: cbc::Sender<bool>,
    hw_obstruction_rx: cbc::Receiver<bool>,
    hw_stop_button_rx: cbc::Receiver<bool>,

    order_update_rx: cbc::Receiver<OrderUpdate>,
    fsm_event_tx: cbc::Sender<FsmEvent>,
    terminate_rx: cbc::Receiver<()>,

    state: CarState,
    hall_calls: Vec<[bool; 2]>,
    n_floors: u8,
    obstruction: bool,

    door_open_time: Duration,
    motor_watchdog_initial: Duration,
    motor_watchdog_resume: Duration,

    door_timer_rx: cbc::Receiver<std::time::Instant>,
    motor_watchdog_rx: cbc::Receiver<std::time::Instant>,
    door_armed: bool,
    motor_watchdog_armed: bool,
}

impl MotionFsm {
    pub fn new(
        config: &ElevatorConfig,

        hw_motor_direction_tx: cbc::Sender<u8>,
        hw_floor_sensor_rx: cbc::Receiver<u8>,
        hw_door_light_tx: cbc::Sender<bool>,
        hw_floor_indicator_tx: cbc::Sender<u8>,
        hw_stop_lamp_tx: cbc::Sender<bool>,
        hw_obstruction_rx: cbc::Receiver<bool>,
        hw_stop_button_rx: cbc::Receiver<bool>,

        order_update_rx: cbc::Receiver<OrderUpdate>,
        fsm_event_tx: cbc::Sender<FsmEvent>,
        terminate_rx: cbc::Receiver<()>,
    ) -> MotionFsm {
        MotionFsm {
            hw_motor_direction_tx,
            hw_floor_sensor_rx,
            hw_door_light_tx,
            hw_floor_indicator_tx,
            hw_stop_lamp_tx,
            hw_obstruction_rx,
            hw_stop_button_rx,

            order_update_rx,
            fsm_event_tx,
            terminate_rx,

            state: CarState::new(config.n_floors),
            hall_calls: vec![[false, false]; config.n_floors as usize],
            n_floors: config.n_floors,
            obstruction: false,

            door_open_time: Duration::from_secs(config.door_open_time_s),
            motor_watchdog_initial: Duration::from_secs(config.motor_watchdog_initial_s),
            motor_watchdog_resume: Duration::from_secs(config.motor_watchdog_resume_s),

            door_timer_rx: cbc::never(),
            motor_watchdog_rx: cbc::never(),
            door_armed: false,
            motor_watchdog_armed: false,
        }
    }

    pub fn run(mut self) {
        self.init_position();

        loop {
            cbc::select! {
                recv(self.hw_floor_sensor_rx) -> floor => {
                    match floor {
                        Ok(f) => self.on_floor_sensor(f),
                        Err(_) => return,
                    }
                }
                recv(self.order_update_rx) -> update => {
                    match update {
                        Ok(update) => self.on_order_update(update),
                        Err(_) => return,
                    }
                }
                recv(self.hw_obstruction_rx) -> obstruction => {
                    match obstruction {
                        Ok(value) => self.on_obstruction(value),
                        Err(_) => return,
                    }
                }
                recv(self.hw_stop_button_rx) -> stop_button => {
                    match stop_button {
                        Ok(value) => self.on_stop_button(value),
                        Err(_) => return,
                    }
                }
                recv(self.door_timer_rx) -> _ => self.on_door_timer_expired(),
                recv(self.motor_watchdog_rx) -> _ => self.on_motor_watchdog_expired(),
                recv(self.terminate_rx) -> _ => return,
            }
        }
    }

    /// Drives down until the floor sensor confirms floor 0, matching a freshly
    /// booted car that doesn't know where it is.
    fn init_position(&mut self) {
        let _ = self.hw_motor_direction_tx.send(Down.to_u8());
        loop {
            match self.hw_floor_sensor_rx.recv() {
                Ok(floor) => {
                    let _ = self.hw_floor_indicator_tx.send(floor);
                    if floor == 0 {
                        let _ = self.hw_motor_direction_tx.send(Stop.to_u8());
                        self.state.floor = 0;
                        self.state.behaviour = Idle;
                        self.state.direction = Up;
                        self.emit(MessageType::StateUpdate, ClearOrderDirection::NoHall);
                        return;
                    }
                }
                Err(_) => return,
            }
        }
    }

    fn on_floor_sensor(&mut self, floor: u8) {
        self.state.floor = floor;
        let _ = self.hw_floor_indicator_tx.send(floor);

        match self.state.behaviour {
            MotorFault => {
                self.disarm_motor_watchdog();
                let _ = self.hw_motor_direction_tx.send(Stop.to_u8());
                self.state.behaviour = Idle;
                self.emit(MessageType::MotorWorksAgain, ClearOrderDirection::NoHall);
            }
            Moving => {
                if self.should_stop(self.state.direction, floor, false) {
                    self.stop_and_open_door();
                } else {
                    self.rearm_motor_watchdog(self.motor_watchdog_initial);
                    self.emit(MessageType::StateUpdate, ClearOrderDirection::NoHall);
                }
            }
            DoorOpen => {
                if self.should_stop(self.state.direction, floor, true) {
                    self.rearm_door_timer();
                    let clear = self.tie_break_clear(floor, self.state.direction);
                    self.emit(MessageType::ClearOrder, clear);
                }
            }
            Idle => {}
        }
    }

    fn on_order_update(&mut self, update: OrderUpdate) {
        self.hall_calls = update.hall_calls;
        // Cab calls are owned by the State Store (button presses never pass
        // through this FSM); every assignment carries the current truth.
        self.state.cab_calls = update.state.cab_calls;

        if self.state.behaviour != Idle {
            // Moving: committed until the next floor sensor. DoorOpen/MotorFault:
            // the door timer / recovery sub-loop owns the next transition.
            return;
        }

        let floor = self.state.floor;
        match self.choose_direction(floor) {
            dir @ (Up | Down) => {
                self.rearm_motor_watchdog(self.motor_watchdog_initial);
                self.state.direction = dir;
                self.state.behaviour = Moving;
                let _ = self.hw_motor_direction_tx.send(dir.to_u8());
                self.emit(MessageType::StateUpdate, ClearOrderDirection::NoHall);
            }
            Stop => {
                if self.order_at_floor(floor) {
                    let _ = self.hw_door_light_tx.send(true);
                    self.rearm_door_timer();
                    self.state.behaviour = DoorOpen;
                    let clear = self.tie_break_clear(floor, self.state.direction);
                    self.emit(MessageType::ClearOrder, clear);
                }
            }
        }
    }

    fn on_obstruction(&mut self, value: bool) {
        self.obstruction = value;
        if self.obstruction && self.state.behaviour == DoorOpen {
            // Held open for as long as the obstruction is active; no event, no
            // behaviour change, just a postponed door-timer-expires transition.
            self.rearm_door_timer();
        }
    }

    fn on_stop_button(&mut self, pressed: bool) {
        let _ = self.hw_stop_lamp_tx.send(pressed);
        if !pressed {
            return;
        }
        let _ = self.hw_motor_direction_tx.send(Stop.to_u8());
        self.disarm_motor_watchdog();
        if self.state.behaviour == Moving {
            // Stopped between floors: no sensor edge will ever confirm a
            // floor to open the door at, so drop straight to Idle instead
            // of wedging. The next OrderUpdate re-drives from the last
            // known floor, same recovery shape as MotorFault.
            self.state.behaviour = Idle;
        } else {
            let _ = self.hw_door_light_tx.send(true);
            self.rearm_door_timer();
            self.state.behaviour = DoorOpen;
        }
        // Local safety input only: never replicated, never clears a call.
    }

    fn on_door_timer_expired(&mut self) {
        if self.obstruction {
            self.rearm_door_timer();
            return;
        }
        let _ = self.hw_door_light_tx.send(false);
        let floor = self.state.floor;
        match self.choose_direction(floor) {
            Stop => {
                self.state.behaviour = Idle;
                self.emit(MessageType::StateUpdate, ClearOrderDirection::NoHall);
            }
            dir @ (Up | Down) => {
                self.rearm_motor_watchdog(self.motor_watchdog_resume);
                self.state.direction = dir;
                self.state.behaviour = Moving;
                let _ = self.hw_motor_direction_tx.send(dir.to_u8());
                self.emit(MessageType::StateUpdate, ClearOrderDirection::NoHall);
            }
        }
    }

    fn on_motor_watchdog_expired(&mut self) {
        warn!(
            "motor watchdog expired at floor {} heading {:?}",
            self.state.floor, self.state.direction
        );
        self.disarm_motor_watchdog();
        self.disarm_door_timer();
        self.state.behaviour = MotorFault;
        self.emit(MessageType::MotorProblems, ClearOrderDirection::NoHall);

        let reverse = self.state.direction.opposite();
        let _ = self.hw_motor_direction_tx.send(reverse.to_u8());
        info!("reversing to {:?} to clear a possible obstruction", reverse);
    }

    fn stop_and_open_door(&mut self) {
        let _ = self.hw_motor_direction_tx.send(Stop.to_u8());
        let _ = self.hw_door_light_tx.send(true);
        self.rearm_door_timer();
        self.disarm_motor_watchdog();
        self.state.behaviour = DoorOpen;
        let clear = self.tie_break_clear(self.state.floor, self.state.direction);
        self.emit(MessageType::ClearOrder, clear);
    }

    fn rearm_door_timer(&mut self) {
        self.door_timer_rx = cbc::after(self.door_open_time);
        self.door_armed = true;
    }

    fn disarm_door_timer(&mut self) {
        self.door_timer_rx = cbc::never();
        self.door_armed = false;
    }

    fn rearm_motor_watchdog(&mut self, budget: Duration) {
        self.motor_watchdog_rx = cbc::after(budget);
        self.motor_watchdog_armed = true;
    }

    fn disarm_motor_watchdog(&mut self) {
        self.motor_watchdog_rx = cbc::never();
        self.motor_watchdog_armed = false;
    }

    fn emit(&mut self, event_type: MessageType, clear_order_direction: ClearOrderDirection) {
        let event = FsmEvent {
            event_type,
            floor: self.state.floor,
            behaviour: self.state.behaviour,
            direction: self.state.direction,
            clear_order_direction,
        };
        let _ = self.fsm_event_tx.send(event);
    }

    /// True if any hall or cab order exists strictly above `floor`.
    fn orders_above(&self, floor: u8) -> bool {
        ((floor + 1)..self.n_floors).any(|f| self.order_at_floor(f))
    }

    /// True if any hall or cab order exists strictly below `floor`.
    fn orders_below(&self, floor: u8) -> bool {
        (0..floor).any(|f| self.order_at_floor(f))
    }

    fn order_at_floor(&self, floor: u8) -> bool {
        let f = floor as usize;
        self.hall_calls[f][0] || self.hall_calls[f][1] || self.state.cab_calls[f]
    }

    fn should_stop(&self, direction: Direction, floor: u8, door_open: bool) -> bool {
        let f = floor as usize;
        match direction {
            Up => {
                self.hall_calls[f][0]
                    || self.state.cab_calls[f]
                    || (!self.orders_above(floor) && !door_open)
            }
            Down | Stop => {
                self.hall_calls[f][1]
                    || self.state.cab_calls[f]
                    || (!self.orders_below(floor) && !door_open)
            }
        }
    }

    fn choose_direction(&self, floor: u8) -> Direction {
        match self.state.direction {
            Up | Stop => {
                if self.orders_above(floor) {
                    Up
                } else if self.orders_below(floor) {
                    Down
                } else {
                    Stop
                }
            }
            Down => {
                if self.orders_below(floor) {
                    Down
                } else if self.orders_above(floor) {
                    Up
                } else {
                    Stop
                }
            }
        }
    }

    /// Decides which hall direction a stop at `floor` clears, preferring the
    /// direction of travel `last_direction` unless there is nothing left to
    /// serve that way — the passenger waiting the other way still gets the
    /// clear signal instead of being stranded.
    fn tie_break_clear(&self, floor: u8, last_direction: Direction) -> ClearOrderDirection {
        let f = floor as usize;
        let opposite = last_direction.opposite();

        let last_is_exhausted = match last_direction {
            Up => !self.orders_below(floor),
            Down | Stop => !self.orders_above(floor),
        };

        let last_idx = match last_direction {
            Up => 0,
            Down | Stop => 1,
        };
        let opposite_idx = 1 - last_idx;

        if self.hall_calls[f][last_idx] && last_is_exhausted {
            match last_direction {
                Up => ClearOrderDirection::Up,
                Down | Stop => ClearOrderDirection::Down,
            }
        } else if self.hall_calls[f][opposite_idx] {
            match opposite {
                Up => ClearOrderDirection::Up,
                Down | Stop => ClearOrderDirection::Down,
            }
        } else {
            ClearOrderDirection::NoHall
        }
    }
}

/***************************************/
/*              Test API               */
/***************************************/
#[cfg(test)]
pub mod testing {
    use super::MotionFsm;
    use crate::shared::{CarState, ClearOrderDirection, Direction};

    impl MotionFsm {
        pub fn test_get_state(&self) -> &CarState {
            &self.state
        }

        pub fn test_set_state(&mut self, state: CarState) {
            self.state = state;
        }

        pub fn test_set_hall_calls(&mut self, hall_calls: Vec<[bool; 2]>) {
            self.hall_calls = hall_calls;
        }

        pub fn test_choose_direction(&self, floor: u8) -> Direction {
            self.choose_direction(floor)
        }

        pub fn test_should_stop(&self, direction: Direction, floor: u8, door_open: bool) -> bool {
            self.should_stop(direction, floor, door_open)
        }

        pub fn test_tie_break_clear(&self, floor: u8, last_direction: Direction) -> ClearOrderDirection {
            self.tie_break_clear(floor, last_direction)
        }

        pub fn test_on_floor_sensor(&mut self, floor: u8) {
            self.on_floor_sensor(floor)
        }

        pub fn test_on_order_update(&mut self, update: crate::shared::OrderUpdate) {
            self.on_order_update(update)
        }

        pub fn test_on_door_timer_expired(&mut self) {
            self.on_door_timer_expired()
        }

        pub fn test_on_motor_watchdog_expired(&mut self) {
            self.on_motor_watchdog_expired()
        }

        pub fn test_on_obstruction(&mut self, value: bool) {
            self.on_obstruction(value)
        }

        pub fn test_on_stop_button_for_test(&mut self, pressed: bool) {
            self.on_stop_button(pressed)
        }

        pub fn test_door_armed(&self) -> bool {
            self.door_armed
        }

        pub fn test_motor_watchdog_armed(&self) -> bool {
            self.motor_watchdog_armed
        }
    }
}

/***************************************/
/*             Unit tests              */
/***************************************/
