/**
 * Bridges the State Store / Motion FSM to the physical elevator.
 *
 * Owns the only `Elevator` handle in the process. Polls floor sensor,
 * button, obstruction and stop-button state at a fixed interval and
 * forwards edge-triggered events over channels; applies motor/lamp
 * commands received from the Motion FSM and State Store. No task other
 * than this one touches the driver socket.
 *
 * # Fields
 * - `elevator`:                Low-level driver handle (TCP to the hardware simulator/rig).
 * - `thread_sleep_time`:       Poll interval.
 * - `current_floor`:           Last floor reported, `u8::MAX` before the first sensor reading.
 * - `obstruction`:              Last obstruction reading, to only send on change.
 * - `requests`:                Last button-pressed state per floor/kind, to only send on change.
 * - `hw_motor_direction_rx`:   Motor direction commands from the Motion FSM.
 * - `hw_door_light_rx`:        Door lamp commands from the Motion FSM.
 * - `hw_floor_indicator_rx`:   Floor indicator commands from the Motion FSM.
 * - `hw_stop_lamp_rx`:         Stop lamp commands from the Motion FSM.
 * - `hw_button_light_rx`:      Hall/cab lamp commands from the State Store.
 * - `hw_floor_sensor_tx`:      Floor-edge events to the Motion FSM.
 * - `hw_obstruction_tx`:       Obstruction-edge events to the Motion FSM.
 * - `hw_stop_button_tx`:       Stop button edge events to the Motion FSM.
 * - `hw_button_tx`:            Button-press events to the State Store.
 * - `terminate_rx`:            Termination signal, used by the integration test harness.
 */

/***************************************/
/*        3rd party libraries          */
/***************************************/
use crossbeam_channel as cbc;
use driver_rust::elevio::elev::Elevator;
use driver_rust::elevio::elev::{CAB, HALL_DOWN, HALL_UP};
use log::error;
use std::time::Duration;

/***************************************/
/*           Local modules             */
/***************************************/
use crate::config::HardwareConfig;
use crate::shared::{ButtonPress, ButtonType};
use crate::unwrap_or_exit;

/***************************************/
/*             Constants               */
/***************************************/
const HW_NUM_REQUEST_TYPES: usize = 3;

/***************************************/
/*             Public API              */
/***************************************/
pub struct ElevatorDriver {
    elevator: Elevator,
    thread_sleep_time: u64,
    current_floor: u8,
    obstruction: bool,
    stop_button: bool,
    requests: Vec<Vec<bool>>,

    hw_motor_direction_rx: cbc::Receiver<u8>,
    hw_door_light_rx: cbc::Receiver<bool>,
    hw_floor_indicator_rx: cbc::Receiver<u8>,
    hw_stop_lamp_rx: cbc::Receiver<bool>,
    hw_button_light_rx: cbc::Receiver<(u8, u8, bool)>,

    hw_floor_sensor_tx: cbc::Sender<u8>,
    hw_obstruction_tx: cbc::Sender<bool>,
    hw_stop_button_tx: cbc::Sender<bool>,
    hw_button_tx: cbc::Sender<ButtonPress>,

    terminate_rx: cbc::Receiver<()>,
}

impl ElevatorDriver {
    pub fn new(
        config: &HardwareConfig,

        hw_motor_direction_rx: cbc::Receiver<u8>,
        hw_door_light_rx: cbc::Receiver<bool>,
        hw_floor_indicator_rx: cbc::Receiver<u8>,
        hw_stop_lamp_rx: cbc::Receiver<bool>,
        hw_button_light_rx: cbc::Receiver<(u8, u8, bool)>,

        hw_floor_sensor_tx: cbc::Sender<u8>,
        hw_obstruction_tx: cbc::Sender<bool>,
        hw_stop_button_tx: cbc::Sender<bool>,
        hw_button_tx: cbc::Sender<ButtonPress>,

        terminate_rx: cbc::Receiver<()>,
    ) -> ElevatorDriver {
        ElevatorDriver {
            elevator: unwrap_or_exit!(Elevator::init(
                &format!("{}:{}", config.driver_address, config.driver_port),
                config.n_floors
            )),
            thread_sleep_time: config.hw_thread_sleep_time_ms,
            current_floor: u8::MAX,
            obstruction: false,
            stop_button: false,
            requests: vec![vec![false; HW_NUM_REQUEST_TYPES]; config.n_floors as usize],

            hw_motor_direction_rx,
            hw_door_light_rx,
            hw_floor_indicator_rx,
            hw_stop_lamp_rx,
            hw_button_light_rx,

            hw_floor_sensor_tx,
            hw_obstruction_tx,
            hw_stop_button_tx,
            hw_button_tx,

            terminate_rx,
        }
    }

    pub fn run(mut self) {
        for floor in 0..self.elevator.num_floors {
            self.elevator.call_button_light(floor, HALL_UP, false);
            self.elevator.call_button_light(floor, HALL_DOWN, false);
            self.elevator.call_button_light(floor, CAB, false);
        }
        self.obstruction = self.elevator.obstruction();

        loop {
            if let Some(floor) = self.elevator.floor_sensor() {
                if floor != self.current_floor {
                    self.current_floor = floor;
                    if self.hw_floor_sensor_tx.send(floor).is_err() {
                        error!("hw_floor_sensor_tx: Motion FSM is gone, shutting down driver");
                        return;
                    }
                }
            }

            if self.elevator.stop_button() != self.stop_button {
                self.stop_button = !self.stop_button;
                let _ = self.hw_stop_button_tx.send(self.stop_button);
            }

            if self.elevator.obstruction() != self.obstruction {
                self.obstruction = !self.obstruction;
                let _ = self.hw_obstruction_tx.send(self.obstruction);
            }

            for floor in 0..self.elevator.num_floors {
                if !self.requests[floor as usize][HALL_UP as usize]
                    && self.elevator.call_button(floor, HALL_UP)
                {
                    self.requests[floor as usize][HALL_UP as usize] = true;
                    let _ = self.hw_button_tx.send(ButtonPress {
                        floor,
                        button: ButtonType::HallUp,
                    });
                }
                if !self.requests[floor as usize][HALL_DOWN as usize]
                    && self.elevator.call_button(floor, HALL_DOWN)
                {
                    self.requests[floor as usize][HALL_DOWN as usize] = true;
                    let _ = self.hw_button_tx.send(ButtonPress {
                        floor,
                        button: ButtonType::HallDown,
                    });
                }
                if !self.requests[floor as usize][CAB as usize]
                    && self.elevator.call_button(floor, CAB)
                {
                    self.requests[floor as usize][CAB as usize] = true;
                    let _ = self.hw_button_tx.send(ButtonPress {
                        floor,
                        button: ButtonType::Cab,
                    });
                }
            }

            cbc::select! {
                recv(self.hw_motor_direction_rx) -> msg => {
                    match msg {
                        Ok(dirn) => self.elevator.motor_direction(dirn),
                        Err(_) => return,
                    }
                }
                recv(self.hw_door_light_rx) -> msg => {
                    match msg {
                        Ok(on) => self.elevator.door_light(on),
                        Err(_) => return,
                    }
                }
                recv(self.hw_floor_indicator_rx) -> msg => {
                    match msg {
                        Ok(floor) => self.elevator.floor_indicator(floor),
                        Err(_) => return,
                    }
                }
                recv(self.hw_stop_lamp_rx) -> msg => {
                    match msg {
                        Ok(on) => self.elevator.stop_button_light(on),
                        Err(_) => return,
                    }
                }
                recv(self.hw_button_light_rx) -> msg => {
                    match msg {
                        Ok((floor, kind, on)) => {
                            self.elevator.call_button_light(floor, kind, on);
                            if !on {
                                // A served call stops being a "known pressed" button so the
                                // next physical press is detected as an edge again.
                                self.requests[floor as usize][kind as usize] = false;
                            }
                        }
                        Err(_) => return,
                    }
                }
                recv(self.terminate_rx) -> _ => {
                    return;
                }
                default(Duration::from_millis(self.thread_sleep_time)) => {}
            }
        }
    }
}
