/**
 * Wires up the five components of a single elevator control node: the
 * hardware driver, the Motion FSM, the State Store, the Dispatcher, and
 * the Network module. Each runs on its own thread and communicates only
 * through the channels built here.
 */

/***************************************/
/*        3rd party libraries          */
/***************************************/
use clap::Parser;
use crossbeam_channel as cbc;
use log::info;
use std::thread::Builder;

/***************************************/
/*             Modules                 */
/***************************************/
mod config;
mod dispatcher;
mod hardware;
mod motion;
mod network;
mod shared;
mod snapshot;
mod state_store;

use dispatcher::Dispatcher;
use hardware::ElevatorDriver;
use motion::MotionFsm;
use network::Network;
use state_store::StateStore;

/***************************************/
/*               CLI                   */
/***************************************/
#[derive(Parser, Debug)]
#[clap(name = "elevator-control")]
struct Cli {
    /// Path to the TOML configuration file.
    #[clap(long, default_value = "config.toml")]
    config: String,

    /// Overrides the node id otherwise derived from config or local-ip discovery.
    #[clap(long)]
    id: Option<String>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match config::load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    // Hardware <-> Motion FSM
    let (hw_motor_direction_tx, hw_motor_direction_rx) = cbc::unbounded::<u8>();
    let (hw_door_light_tx, hw_door_light_rx) = cbc::unbounded::<bool>();
    let (hw_floor_indicator_tx, hw_floor_indicator_rx) = cbc::unbounded::<u8>();
    let (hw_stop_lamp_tx, hw_stop_lamp_rx) = cbc::unbounded::<bool>();
    let (hw_floor_sensor_tx, hw_floor_sensor_rx) = cbc::unbounded::<u8>();
    let (hw_obstruction_tx, hw_obstruction_rx) = cbc::unbounded::<bool>();
    let (hw_stop_button_tx, hw_stop_button_rx) = cbc::unbounded::<bool>();

    // Hardware <-> State Store
    let (hw_button_light_tx, hw_button_light_rx) = cbc::unbounded::<(u8, u8, bool)>();
    let (hw_button_tx, hw_button_rx) = cbc::unbounded::<shared::ButtonPress>();

    // Motion FSM <-> State Store
    let (fsm_event_tx, fsm_event_rx) = cbc::bounded::<shared::FsmEvent>(10);

    // Dispatcher <-> Motion FSM
    let (order_update_tx, order_update_rx) = cbc::unbounded::<shared::OrderUpdate>();

    // State Store <-> Dispatcher
    let (dispatcher_tx, dispatcher_rx) = cbc::unbounded::<shared::WorldView>();

    // State Store <-> Network
    let (net_outbound_tx, net_outbound_rx) = cbc::unbounded::<shared::NetworkMessage>();
    let (net_message_tx, net_message_rx) = cbc::unbounded::<shared::NetworkMessage>();
    let (peer_update_tx, peer_update_rx) = cbc::unbounded::<network_rust::udpnet::peers::PeerUpdate>();

    // Test-harness terminate channels; production never sends on these.
    let (_hw_terminate_tx, hw_terminate_rx) = cbc::unbounded::<()>();
    let (_fsm_terminate_tx, fsm_terminate_rx) = cbc::unbounded::<()>();
    let (_store_terminate_tx, store_terminate_rx) = cbc::unbounded::<()>();
    let (_dispatcher_terminate_tx, dispatcher_terminate_rx) = cbc::unbounded::<()>();

    let network = Network::new(
        &config.network,
        net_outbound_rx,
        net_message_tx,
        peer_update_tx,
        // The network control thread also owns a terminate channel, but
        // production never needs to stop it independently of the process.
        cbc::never(),
    );
    let id = cli.id.unwrap_or_else(|| network.id.clone());
    info!("starting node {}", id);

    let hardware = ElevatorDriver::new(
        &config.hardware,
        hw_motor_direction_rx,
        hw_door_light_rx,
        hw_floor_indicator_rx,
        hw_stop_lamp_rx,
        hw_button_light_rx,
        hw_floor_sensor_tx,
        hw_obstruction_tx,
        hw_stop_button_tx,
        hw_button_tx,
        hw_terminate_rx,
    );
    Builder::new()
        .name("hardware".into())
        .spawn(move || hardware.run())
        .unwrap();

    let motion = MotionFsm::new(
        &config.elevator,
        hw_motor_direction_tx,
        hw_floor_sensor_rx,
        hw_door_light_tx,
        hw_floor_indicator_tx,
        hw_stop_lamp_tx,
        hw_obstruction_rx,
        hw_stop_button_rx,
        order_update_rx,
        fsm_event_tx,
        fsm_terminate_rx,
    );
    Builder::new()
        .name("motion".into())
        .spawn(move || motion.run())
        .unwrap();

    let store = StateStore::new(
        id.clone(),
        config.elevator.n_floors,
        config.dispatcher.snapshot_path.clone(),
        fsm_event_rx,
        net_message_rx,
        hw_button_rx,
        peer_update_rx,
        store_terminate_rx,
        dispatcher_tx,
        net_outbound_tx,
        hw_button_light_tx,
    );
    Builder::new()
        .name("state_store".into())
        .spawn(move || store.run())
        .unwrap();

    let dispatcher = Dispatcher::new(
        id,
        &config.dispatcher,
        dispatcher_rx,
        order_update_tx,
        dispatcher_terminate_rx,
    );
    Builder::new()
        .name("dispatcher".into())
        .spawn(move || dispatcher.run())
        .unwrap();

    // The component threads run for the lifetime of the process; the main
    // thread has nothing further to do but stay alive.
    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}
