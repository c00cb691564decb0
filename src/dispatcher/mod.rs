/**
 * Turns a WorldView snapshot into this car's share of the hall calls.
 *
 * A pure, stateless transformer: every incoming `WorldView` is serialized
 * into the external assignment oracle's input format, the oracle is
 * invoked as a subprocess, and this car's entry in its output is paired
 * with this car's own `CarState` into an `OrderUpdate` for the Motion FSM.
 * Cars in `MotorFault` are excluded from the oracle's input entirely — a
 * quarantined car has already dropped off the peer beacon, so its
 * outstanding calls must be picked up by someone else.
 *
 * # Fields
 * - `id`:               This node's id, used to pick this car's row out of the oracle output.
 * - `oracle_path`:       Absolute path to the assignment oracle executable.
 * - `snapshot_rx`:       WorldView snapshots from the State Store.
 * - `order_update_tx`:   This car's assignment, delivered to the Motion FSM.
 * - `terminate_rx`:      Termination signal, used by the integration test harness.
 */

/***************************************/
/*        3rd party libraries          */
/***************************************/
use crossbeam_channel as cbc;
use log::warn;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

/***************************************/
/*           Local modules             */
/***************************************/
use crate::config::DispatcherConfig;
use crate::shared::{Behaviour, CarState, OrderUpdate, WorldView};

/***************************************/
/*             Public API              */
/***************************************/
pub struct Dispatcher {
    id: String,
    oracle_path: PathBuf,

    snapshot_rx: cbc::Receiver<WorldView>,
    order_update_tx: cbc::Sender<OrderUpdate>,
    terminate_rx: cbc::Receiver<()>,
}

impl Dispatcher {
    pub fn new(
        id: String,
        config: &DispatcherConfig,

        snapshot_rx: cbc::Receiver<WorldView>,
        order_update_tx: cbc::Sender<OrderUpdate>,
        terminate_rx: cbc::Receiver<()>,
    ) -> Dispatcher {
        Dispatcher {
            id,
            oracle_path: resolve_oracle_path(&config.oracle_path),
            snapshot_rx,
            order_update_tx,
            terminate_rx,
        }
    }

    pub fn run(self) {
        loop {
            cbc::select! {
                recv(self.snapshot_rx) -> world => {
                    match world {
                        Ok(world) => self.handle_snapshot(world),
                        Err(_) => return,
                    }
                }
                recv(self.terminate_rx) -> _ => return,
            }
        }
    }

    fn handle_snapshot(&self, world: WorldView) {
        let own_state = match world.cars.get(&self.id) {
            Some(state) => state.clone(),
            None => return,
        };

        let live_cars: HashMap<String, CarState> = world
            .cars
            .iter()
            .filter(|(_, state)| state.behaviour != Behaviour::MotorFault)
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect();

        if live_cars.is_empty() {
            self.send_update(world.hall_calls.clone(), own_state);
            return;
        }

        let assigned = match self.invoke_oracle(&world.hall_calls, &live_cars) {
            Some(assignments) => assignments,
            None => return,
        };

        match assigned.get(&self.id) {
            Some(hall_calls) => self.send_update(hall_calls.clone(), own_state),
            None => self.send_update(world.hall_calls.clone(), own_state),
        }
    }

    fn invoke_oracle(
        &self,
        hall_calls: &[[bool; 2]],
        cars: &HashMap<String, CarState>,
    ) -> Option<HashMap<String, Vec<Vec<bool>>>> {
        let input = OracleInput { hall_requests: hall_calls, states: cars };
        let input_json = match serde_json::to_string(&input) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize oracle input: {}", e);
                return None;
            }
        };

        let output = Command::new(&self.oracle_path).arg("--input").arg(&input_json).output();
        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!("failed to invoke assignment oracle at {:?}: {}", self.oracle_path, e);
                return None;
            }
        };

        if !output.status.success() {
            warn!(
                "assignment oracle exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
            return None;
        }

        match serde_json::from_slice::<HashMap<String, Vec<Vec<bool>>>>(&output.stdout) {
            Ok(assignments) => Some(assignments),
            Err(e) => {
                warn!("failed to parse assignment oracle output: {}", e);
                None
            }
        }
    }

    fn send_update(&self, hall_calls_rows: Vec<Vec<bool>>, state: CarState) {
        let hall_calls = hall_calls_rows
            .into_iter()
            .map(|row| [row.get(0).copied().unwrap_or(false), row.get(1).copied().unwrap_or(false)])
            .collect();
        let _ = self.order_update_tx.send(OrderUpdate { hall_calls, state });
    }
}

/***************************************/
/*             Wire format              */
/***************************************/
#[derive(serde::Serialize)]
struct OracleInput<'a> {
    #[serde(rename = "hallRequests")]
    hall_requests: &'a [[bool; 2]],
    states: &'a HashMap<String, CarState>,
}

/// Resolves the oracle path against the directory containing the running
/// executable when relative, so the same binary works regardless of the
/// process's working directory.
fn resolve_oracle_path(configured: &str) -> PathBuf {
    let path = Path::new(configured);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join(path))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

/***************************************/
/*              Unit tests             */
/***************************************/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::Direction;
    use crossbeam_channel::unbounded;

    fn world_with(cars: Vec<(&str, Behaviour)>, hall_calls: Vec<[bool; 2]>) -> WorldView {
        let mut world = WorldView::new(hall_calls.len() as u8);
        world.hall_calls = hall_calls;
        for (id, behaviour) in cars {
            let mut state = CarState::new(world.n_floors());
            state.behaviour = behaviour;
            world.cars.insert(id.to_string(), state);
        }
        world
    }

    #[test]
    fn degrades_to_serving_own_calls_when_alone() {
        let (_snapshot_tx, snapshot_rx) = unbounded::<WorldView>();
        let (order_update_tx, order_update_rx) = unbounded::<OrderUpdate>();
        let (_terminate_tx, terminate_rx) = unbounded::<()>();

        let config = DispatcherConfig { oracle_path: "no_such_oracle_binary".to_string(), snapshot_path: "world_view.json".to_string() };
        let dispatcher = Dispatcher::new("self".to_string(), &config, snapshot_rx, order_update_tx, terminate_rx);

        let mut hall_calls = vec![[false, false]; 4];
        hall_calls[2][0] = true;
        let world = world_with(vec![("self", Behaviour::Idle)], hall_calls.clone());

        dispatcher.handle_snapshot(world);

        let update = order_update_rx.try_recv().unwrap();
        assert_eq!(update.hall_calls, hall_calls);
    }

    #[test]
    fn excludes_motor_fault_cars_but_still_degrades_when_all_quarantined() {
        let (_snapshot_tx, snapshot_rx) = unbounded::<WorldView>();
        let (order_update_tx, order_update_rx) = unbounded::<OrderUpdate>();
        let (_terminate_tx, terminate_rx) = unbounded::<()>();

        let config = DispatcherConfig { oracle_path: "no_such_oracle_binary".to_string(), snapshot_path: "world_view.json".to_string() };
        let dispatcher = Dispatcher::new("self".to_string(), &config, snapshot_rx, order_update_tx, terminate_rx);

        let mut hall_calls = vec![[false, false]; 4];
        hall_calls[1][1] = true;
        let world = world_with(vec![("self", Behaviour::MotorFault)], hall_calls.clone());

        dispatcher.handle_snapshot(world);

        let update = order_update_rx.try_recv().unwrap();
        assert_eq!(update.hall_calls, hall_calls);
        assert_eq!(update.state.direction, Direction::Up);
    }

    #[test]
    fn missing_self_in_world_sends_nothing() {
        let (_snapshot_tx, snapshot_rx) = unbounded::<WorldView>();
        let (order_update_tx, order_update_rx) = unbounded::<OrderUpdate>();
        let (_terminate_tx, terminate_rx) = unbounded::<()>();

        let config = DispatcherConfig { oracle_path: "no_such_oracle_binary".to_string(), snapshot_path: "world_view.json".to_string() };
        let dispatcher = Dispatcher::new("self".to_string(), &config, snapshot_rx, order_update_tx, terminate_rx);

        let world = world_with(vec![("peer-b", Behaviour::Idle)], vec![[false, false]; 4]);
        dispatcher.handle_snapshot(world);

        assert!(order_update_rx.try_recv().is_err());
    }

    #[test]
    fn resolves_relative_oracle_path_against_exe_dir() {
        let resolved = resolve_oracle_path("hall_request_assigner");
        assert!(resolved.is_absolute());
        assert_eq!(resolved.file_name().unwrap(), "hall_request_assigner");
    }

    #[test]
    fn leaves_absolute_oracle_path_untouched() {
        let resolved = resolve_oracle_path("/opt/oracles/hall_request_assigner");
        assert_eq!(resolved, Path::new("/opt/oracles/hall_request_assigner"));
    }
}
