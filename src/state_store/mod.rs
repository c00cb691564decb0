/**
 * Owns the replicated `WorldView` and is its sole mutator.
 *
 * Every change to hall calls, cab calls, or the set of known cars flows
 * through one of this module's four input kinds: an `FsmEvent` from the
 * Motion FSM, a `NetworkMessage` from a peer, a `ButtonPress` from the
 * hardware driver, or a `PeerUpdate` from the Network module's liveness
 * beacon. Each mutation is followed by writing the snapshot to disk,
 * refreshing button lamps, and publishing a fresh `WorldView` to the
 * Dispatcher (and, for local events, a `NetworkMessage` to the Network
 * module). No other task ever holds a reference into the WorldView.
 *
 * # Fields
 * - `id`:                  This node's id, also the key into `world.cars` for self.
 * - `world`:               The replicated state this task exclusively owns.
 * - `snapshot_path`:       Where the WorldView is persisted on every mutation.
 * - `fsm_event_rx`:        Lifecycle events from the Motion FSM.
 * - `net_message_rx`:      Broadcast messages received from peers.
 * - `button_rx`:           Button-press events from the hardware driver.
 * - `peer_update_rx`:      Liveness membership changes from the Network module.
 * - `terminate_rx`:        Termination signal, used by the integration test harness.
 * - `dispatcher_tx`:       Publishes the post-mutation WorldView to the Dispatcher.
 * - `net_outbound_tx`:     Publishes this node's outgoing NetworkMessage to the Network module.
 * - `hw_button_light_tx`:  Commands hall/cab lamps on the hardware driver.
 */

/***************************************/
/*        3rd party libraries          */
/***************************************/
use crossbeam_channel as cbc;
use driver_rust::elevio::elev::{CAB, HALL_DOWN, HALL_UP};
use log::{debug, warn};
use network_rust::udpnet::peers::PeerUpdate;

/***************************************/
/*           Local modules             */
/***************************************/
use crate::shared::{
    ButtonPress, ButtonType, CarState, ClearOrderDirection, FsmEvent, MessageType, NetworkMessage,
    WorldView,
};
use crate::snapshot;

/***************************************/
/*             Public API              */
/***************************************/
pub struct StateStore {
    id: String,
    world: WorldView,
    snapshot_path: String,

    fsm_event_rx: cbc::Receiver<FsmEvent>,
    net_message_rx: cbc::Receiver<NetworkMessage>,
    button_rx: cbc::Receiver<ButtonPress>,
    peer_update_rx: cbc::Receiver<PeerUpdate>,
    terminate_rx: cbc::Receiver<()>,

    dispatcher_tx: cbc::Sender<WorldView>,
    net_outbound_tx: cbc::Sender<NetworkMessage>,
    hw_button_light_tx: cbc::Sender<(u8, u8, bool)>,
}

impl StateStore {
    pub fn new(
        id: String,
        n_floors: u8,
        snapshot_path: String,

        fsm_event_rx: cbc::Receiver<FsmEvent>,
        net_message_rx: cbc::Receiver<NetworkMessage>,
        button_rx: cbc::Receiver<ButtonPress>,
        peer_update_rx: cbc::Receiver<PeerUpdate>,
        terminate_rx: cbc::Receiver<()>,

        dispatcher_tx: cbc::Sender<WorldView>,
        net_outbound_tx: cbc::Sender<NetworkMessage>,
        hw_button_light_tx: cbc::Sender<(u8, u8, bool)>,
    ) -> StateStore {
        let world = match snapshot::load(&snapshot_path) {
            Some(mut loaded) => {
                let own = loaded
                    .cars
                    .entry(id.clone())
                    .or_insert_with(|| CarState::new(n_floors));
                own.behaviour = crate::shared::Behaviour::Idle;
                own.floor = 0;
                own.direction = crate::shared::Direction::Up;
                loaded
            }
            None => {
                let mut fresh = WorldView::new(n_floors);
                fresh.cars.insert(id.clone(), CarState::new(n_floors));
                snapshot::save(&snapshot_path, &fresh);
                fresh
            }
        };

        let mut store = StateStore {
            id,
            world,
            snapshot_path,
            fsm_event_rx,
            net_message_rx,
            button_rx,
            peer_update_rx,
            terminate_rx,
            dispatcher_tx,
            net_outbound_tx,
            hw_button_light_tx,
        };
        store.refresh_lamps();
        store
    }

    pub fn run(mut self) {
        loop {
            cbc::select! {
                recv(self.fsm_event_rx) -> event => {
                    match event {
                        Ok(event) => self.handle_fsm_event(event),
                        Err(_) => return,
                    }
                }
                recv(self.net_message_rx) -> msg => {
                    match msg {
                        Ok(msg) => self.handle_network_message(msg),
                        Err(_) => return,
                    }
                }
                recv(self.button_rx) -> press => {
                    match press {
                        Ok(press) => self.handle_button_press(press),
                        Err(_) => return,
                    }
                }
                recv(self.peer_update_rx) -> update => {
                    match update {
                        Ok(update) => self.handle_peer_update(update),
                        Err(_) => return,
                    }
                }
                recv(self.terminate_rx) -> _ => return,
            }
        }
    }

    fn handle_fsm_event(&mut self, event: FsmEvent) {
        if event.event_type == MessageType::ClearOrder {
            let floor = event.floor as usize;
            match event.clear_order_direction {
                ClearOrderDirection::Up => self.world.hall_calls[floor][0] = false,
                ClearOrderDirection::Down => self.world.hall_calls[floor][1] = false,
                ClearOrderDirection::NoHall => {}
            }
            self.self_car_mut().cab_calls[floor] = false;
        }

        let own = self.self_car_mut();
        own.behaviour = event.behaviour;
        own.floor = event.floor;
        own.direction = event.direction;

        let outbound = NetworkMessage {
            id: self.id.clone(),
            message_type: event.event_type,
            remote_state: self.world.cars[&self.id].clone(),
            hall_calls: self.world.hall_calls.clone(),
            clear_order_direction: event.clear_order_direction,
        };
        self.post_mutation(Some(outbound));
    }

    fn handle_network_message(&mut self, msg: NetworkMessage) {
        if msg.id == self.id {
            return;
        }
        if !self.world.cars.contains_key(&msg.id) {
            debug!("dropping message from unannounced peer {}", msg.id);
            return;
        }

        let n_floors = self.world.n_floors() as usize;
        let clear_floor = msg.remote_state.floor as usize;
        if msg.hall_calls.len() != n_floors || clear_floor >= n_floors {
            warn!(
                "dropping malformed message from {}: hallRequests length {} (expected {}), floor {}",
                msg.id,
                msg.hall_calls.len(),
                n_floors,
                msg.remote_state.floor
            );
            return;
        }

        self.world.cars.insert(msg.id.clone(), msg.remote_state);

        for floor in 0..n_floors {
            self.world.hall_calls[floor][0] |= msg.hall_calls[floor][0];
            self.world.hall_calls[floor][1] |= msg.hall_calls[floor][1];
        }

        if msg.message_type == MessageType::ClearOrder {
            match msg.clear_order_direction {
                ClearOrderDirection::Up => self.world.hall_calls[clear_floor][0] = false,
                ClearOrderDirection::Down => self.world.hall_calls[clear_floor][1] = false,
                ClearOrderDirection::NoHall => {}
            }
        }

        self.post_mutation(None);
    }

    fn handle_button_press(&mut self, press: ButtonPress) {
        let floor = press.floor as usize;
        match press.button {
            ButtonType::HallUp => self.world.hall_calls[floor][0] = true,
            ButtonType::HallDown => self.world.hall_calls[floor][1] = true,
            ButtonType::Cab => self.self_car_mut().cab_calls[floor] = true,
        }

        let outbound = NetworkMessage {
            id: self.id.clone(),
            message_type: MessageType::StateUpdate,
            remote_state: self.world.cars[&self.id].clone(),
            hall_calls: self.world.hall_calls.clone(),
            clear_order_direction: ClearOrderDirection::NoHall,
        };
        self.post_mutation(Some(outbound));
    }

    fn handle_peer_update(&mut self, update: PeerUpdate) {
        for lost in &update.lost {
            if lost != &self.id {
                self.world.cars.remove(lost);
            }
        }
        for new_id in &update.new {
            self.world.cars.entry(new_id.clone()).or_insert_with(|| {
                CarState::new(self.world.n_floors())
            });
        }

        let alone = self.world.cars.len() == 1;
        if alone || !update.new.is_empty() {
            let _ = self.dispatcher_tx.send(self.world.clone());
        }
    }

    fn post_mutation(&mut self, outbound: Option<NetworkMessage>) {
        snapshot::save(&self.snapshot_path, &self.world);
        self.refresh_lamps();
        if let Some(msg) = outbound {
            let _ = self.net_outbound_tx.send(msg);
        }
        let _ = self.dispatcher_tx.send(self.world.clone());
    }

    fn refresh_lamps(&self) {
        let own_cab_calls = &self.world.cars[&self.id].cab_calls;
        for floor in 0..self.world.n_floors() {
            let f = floor as usize;
            let _ = self.hw_button_light_tx.send((floor, HALL_UP, self.world.hall_calls[f][0]));
            let _ = self.hw_button_light_tx.send((floor, HALL_DOWN, self.world.hall_calls[f][1]));
            let _ = self.hw_button_light_tx.send((floor, CAB, own_cab_calls[f]));
        }
    }

    fn self_car_mut(&mut self) -> &mut CarState {
        self.world
            .cars
            .get_mut(&self.id)
            .expect("self is always present in cars")
    }
}

/***************************************/
/*              Test API               */
/***************************************/
#[cfg(test)]
pub mod testing {
    use super::StateStore;
    use crate::shared::WorldView;

    impl StateStore {
        pub fn test_get_world(&self) -> &WorldView {
            &self.world
        }

        pub fn test_set_world(&mut self, world: WorldView) {
            self.world = world;
        }
    }
}

/***************************************/
/*             Unit tests              */
/***************************************/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{Behaviour, Direction};
    use crossbeam_channel::unbounded;
    use network_rust::udpnet::peers::PeerUpdate;

    fn setup_store() -> (
        StateStore,
        cbc::Sender<FsmEvent>,
        cbc::Sender<NetworkMessage>,
        cbc::Sender<ButtonPress>,
        cbc::Sender<PeerUpdate>,
        cbc::Receiver<WorldView>,
        cbc::Receiver<NetworkMessage>,
        cbc::Receiver<(u8, u8, bool)>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let snapshot_path = dir.path().join("world_view.json").to_str().unwrap().to_string();

        let (fsm_event_tx, fsm_event_rx) = unbounded::<FsmEvent>();
        let (net_message_tx, net_message_rx) = unbounded::<NetworkMessage>();
        let (button_tx, button_rx) = unbounded::<ButtonPress>();
        let (peer_update_tx, peer_update_rx) = unbounded::<PeerUpdate>();
        let (_terminate_tx, terminate_rx) = unbounded::<()>();
        let (dispatcher_tx, dispatcher_rx) = unbounded::<WorldView>();
        let (net_outbound_tx, net_outbound_rx) = unbounded::<NetworkMessage>();
        let (hw_button_light_tx, hw_button_light_rx) = unbounded::<(u8, u8, bool)>();

        let store = StateStore::new(
            "self".to_string(),
            4,
            snapshot_path,
            fsm_event_rx,
            net_message_rx,
            button_rx,
            peer_update_rx,
            terminate_rx,
            dispatcher_tx,
            net_outbound_tx,
            hw_button_light_tx,
        );

        (
            store,
            fsm_event_tx,
            net_message_tx,
            button_tx,
            peer_update_tx,
            dispatcher_rx,
            net_outbound_rx,
            hw_button_light_rx,
        )
    }

    #[test]
    fn hall_button_press_sets_call_and_publishes() {
        let (mut store, _fsm_tx, _net_tx, _btn_tx, _peer_tx, dispatcher_rx, net_outbound_rx, _lamp_rx) =
            setup_store();

        store.handle_button_press(ButtonPress { floor: 2, button: ButtonType::HallUp });

        assert!(store.test_get_world().hall_calls[2][0]);
        let outbound = net_outbound_rx.try_recv().unwrap();
        assert_eq!(outbound.message_type, MessageType::StateUpdate);
        assert!(outbound.hall_calls[2][0]);
        assert!(dispatcher_rx.try_recv().is_ok());
    }

    #[test]
    fn cab_button_press_only_affects_own_car() {
        let (mut store, _fsm_tx, _net_tx, _btn_tx, _peer_tx, _dispatcher_rx, _net_outbound_rx, _lamp_rx) =
            setup_store();

        store.handle_button_press(ButtonPress { floor: 1, button: ButtonType::Cab });

        assert!(store.test_get_world().cars["self"].cab_calls[1]);
        assert!(!store.test_get_world().hall_calls[1][0]);
        assert!(!store.test_get_world().hall_calls[1][1]);
    }

    #[test]
    fn clear_order_from_fsm_clears_hall_and_cab_call() {
        let (mut store, _fsm_tx, _net_tx, _btn_tx, _peer_tx, _dispatcher_rx, _net_outbound_rx, _lamp_rx) =
            setup_store();

        store.handle_button_press(ButtonPress { floor: 0, button: ButtonType::HallUp });
        store.handle_button_press(ButtonPress { floor: 0, button: ButtonType::Cab });

        store.handle_fsm_event(FsmEvent {
            event_type: MessageType::ClearOrder,
            floor: 0,
            behaviour: Behaviour::DoorOpen,
            direction: Direction::Up,
            clear_order_direction: ClearOrderDirection::Up,
        });

        assert!(!store.test_get_world().hall_calls[0][0]);
        assert!(!store.test_get_world().cars["self"].cab_calls[0]);
    }

    #[test]
    fn network_message_from_unannounced_peer_is_dropped() {
        let (mut store, _fsm_tx, _net_tx, _btn_tx, _peer_tx, _dispatcher_rx, _net_outbound_rx, _lamp_rx) =
            setup_store();

        store.handle_network_message(NetworkMessage {
            id: "peer-b".to_string(),
            message_type: MessageType::StateUpdate,
            remote_state: crate::shared::CarState::new(4),
            hall_calls: vec![[true, false]; 4],
            clear_order_direction: ClearOrderDirection::NoHall,
        });

        assert!(!store.test_get_world().cars.contains_key("peer-b"));
        assert!(!store.test_get_world().hall_calls[0][0]);
    }

    #[test]
    fn network_message_unions_hall_calls_and_replaces_peer_state() {
        let (mut store, _fsm_tx, _net_tx, _btn_tx, _peer_tx, _dispatcher_rx, _net_outbound_rx, _lamp_rx) =
            setup_store();

        let mut world = store.test_get_world().clone();
        world.cars.insert("peer-b".to_string(), CarState::new(4));
        store.test_set_world(world);

        let mut remote_state = CarState::new(4);
        remote_state.floor = 2;
        remote_state.behaviour = Behaviour::Moving;

        store.handle_network_message(NetworkMessage {
            id: "peer-b".to_string(),
            message_type: MessageType::StateUpdate,
            remote_state: remote_state.clone(),
            hall_calls: vec![[false, true], [false, false], [false, false], [false, false]],
            clear_order_direction: ClearOrderDirection::NoHall,
        });

        assert_eq!(store.test_get_world().cars["peer-b"].floor, 2);
        assert!(store.test_get_world().hall_calls[0][1]);
    }

    #[test]
    fn malformed_network_message_is_dropped_without_panicking() {
        let (mut store, _fsm_tx, _net_tx, _btn_tx, _peer_tx, _dispatcher_rx, _net_outbound_rx, _lamp_rx) =
            setup_store();

        let mut world = store.test_get_world().clone();
        world.cars.insert("peer-b".to_string(), CarState::new(4));
        store.test_set_world(world);
        let before = store.test_get_world().clone();

        // Shorter hallRequests than this node's floor count.
        store.handle_network_message(NetworkMessage {
            id: "peer-b".to_string(),
            message_type: MessageType::StateUpdate,
            remote_state: CarState::new(4),
            hall_calls: vec![[true, false]],
            clear_order_direction: ClearOrderDirection::NoHall,
        });
        assert_eq!(store.test_get_world(), &before);

        // Reported floor out of range for this node's floor count.
        let mut remote_state = CarState::new(4);
        remote_state.floor = 9;
        store.handle_network_message(NetworkMessage {
            id: "peer-b".to_string(),
            message_type: MessageType::ClearOrder,
            remote_state,
            hall_calls: vec![[false, false]; 4],
            clear_order_direction: ClearOrderDirection::Up,
        });
        assert_eq!(store.test_get_world(), &before);
    }

    #[test]
    fn self_messages_are_dropped() {
        let (mut store, _fsm_tx, _net_tx, _btn_tx, _peer_tx, _dispatcher_rx, _net_outbound_rx, _lamp_rx) =
            setup_store();

        store.handle_network_message(NetworkMessage {
            id: "self".to_string(),
            message_type: MessageType::StateUpdate,
            remote_state: CarState::new(4),
            hall_calls: vec![[true, true]; 4],
            clear_order_direction: ClearOrderDirection::NoHall,
        });

        assert!(!store.test_get_world().hall_calls[0][0]);
    }

    #[test]
    fn losing_the_last_peer_forces_redispatch() {
        let (mut store, _fsm_tx, _net_tx, _btn_tx, _peer_tx, dispatcher_rx, _net_outbound_rx, _lamp_rx) =
            setup_store();

        let mut world = store.test_get_world().clone();
        world.cars.insert("peer-b".to_string(), CarState::new(4));
        store.test_set_world(world);

        store.handle_peer_update(PeerUpdate {
            peers: vec!["self".to_string()],
            new: vec![],
            lost: vec!["peer-b".to_string()],
        });

        assert!(!store.test_get_world().cars.contains_key("peer-b"));
        assert!(dispatcher_rx.try_recv().is_ok());
    }

    #[test]
    fn new_peer_gets_a_default_car_state() {
        let (mut store, _fsm_tx, _net_tx, _btn_tx, _peer_tx, dispatcher_rx, _net_outbound_rx, _lamp_rx) =
            setup_store();

        store.handle_peer_update(PeerUpdate {
            peers: vec!["self".to_string(), "peer-b".to_string()],
            new: vec!["peer-b".to_string()],
            lost: vec![],
        });

        assert_eq!(store.test_get_world().cars["peer-b"].behaviour, Behaviour::Idle);
        assert!(dispatcher_rx.try_recv().is_ok());
    }

    #[test]
    fn restart_resets_own_state_but_preserves_cab_calls_and_hall_calls() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot_path = dir.path().join("world_view.json").to_str().unwrap().to_string();

        let mut prior = WorldView::new(4);
        prior.hall_calls[0][0] = true;
        let mut own = CarState::new(4);
        own.behaviour = Behaviour::Moving;
        own.floor = 2;
        own.direction = Direction::Down;
        own.cab_calls[1] = true;
        prior.cars.insert("self".to_string(), own);
        snapshot::save(&snapshot_path, &prior);

        let (fsm_event_tx, fsm_event_rx) = unbounded::<FsmEvent>();
        let (net_message_tx, net_message_rx) = unbounded::<NetworkMessage>();
        let (button_tx, button_rx) = unbounded::<ButtonPress>();
        let (peer_update_tx, peer_update_rx) = unbounded::<PeerUpdate>();
        let (_terminate_tx, terminate_rx) = unbounded::<()>();
        let (dispatcher_tx, _dispatcher_rx) = unbounded::<WorldView>();
        let (net_outbound_tx, _net_outbound_rx) = unbounded::<NetworkMessage>();
        let (hw_button_light_tx, _hw_button_light_rx) = unbounded::<(u8, u8, bool)>();
        drop((fsm_event_tx, net_message_tx, button_tx, peer_update_tx));

        let store = StateStore::new(
            "self".to_string(),
            4,
            snapshot_path,
            fsm_event_rx,
            net_message_rx,
            button_rx,
            peer_update_rx,
            terminate_rx,
            dispatcher_tx,
            net_outbound_tx,
            hw_button_light_tx,
        );

        let restarted = &store.test_get_world().cars["self"];
        assert_eq!(restarted.behaviour, Behaviour::Idle);
        assert_eq!(restarted.floor, 0);
        assert_eq!(restarted.direction, Direction::Up);
        assert!(restarted.cab_calls[1]);
        assert!(store.test_get_world().hall_calls[0][0]);
    }

    #[test]
    fn delivering_the_same_peer_message_twice_is_idempotent() {
        let (mut store, _fsm_tx, _net_tx, _btn_tx, _peer_tx, _dispatcher_rx, _net_outbound_rx, _lamp_rx) =
            setup_store();

        let mut world = store.test_get_world().clone();
        world.cars.insert("peer-b".to_string(), CarState::new(4));
        store.test_set_world(world);

        let mut remote_state = CarState::new(4);
        remote_state.floor = 2;
        let msg = NetworkMessage {
            id: "peer-b".to_string(),
            message_type: MessageType::StateUpdate,
            remote_state: remote_state.clone(),
            hall_calls: vec![[false, true], [false, false], [false, false], [false, false]],
            clear_order_direction: ClearOrderDirection::NoHall,
        };

        store.handle_network_message(msg.clone());
        let once = store.test_get_world().clone();
        store.handle_network_message(msg);
        let twice = store.test_get_world().clone();

        assert_eq!(once, twice);
    }

    #[test]
    fn applying_two_peer_updates_in_either_order_converges() {
        let fresh_store_with_peer = || {
            let (mut store, ..) = setup_store();
            let mut world = store.test_get_world().clone();
            world.cars.insert("peer-b".to_string(), CarState::new(4));
            world.cars.insert("peer-c".to_string(), CarState::new(4));
            store.test_set_world(world);
            store
        };

        let msg_b = NetworkMessage {
            id: "peer-b".to_string(),
            message_type: MessageType::StateUpdate,
            remote_state: {
                let mut s = CarState::new(4);
                s.floor = 1;
                s
            },
            hall_calls: vec![[true, false], [false, false], [false, false], [false, false]],
            clear_order_direction: ClearOrderDirection::NoHall,
        };
        let msg_c = NetworkMessage {
            id: "peer-c".to_string(),
            message_type: MessageType::StateUpdate,
            remote_state: {
                let mut s = CarState::new(4);
                s.floor = 3;
                s
            },
            hall_calls: vec![[false, false], [false, false], [false, false], [false, true]],
            clear_order_direction: ClearOrderDirection::NoHall,
        };

        let mut forward = fresh_store_with_peer();
        forward.handle_network_message(msg_b.clone());
        forward.handle_network_message(msg_c.clone());

        let mut backward = fresh_store_with_peer();
        backward.handle_network_message(msg_c);
        backward.handle_network_message(msg_b);

        assert_eq!(forward.test_get_world(), backward.test_get_world());
    }
}
