/**
 * Broadcasts this node's latest outgoing message at a fixed cadence and
 * demultiplexes received peer messages and liveness updates.
 *
 * Owns four background threads: a peer-liveness beacon transmitter (whose
 * enable/disable state is driven by the control thread below), a
 * peer-liveness receiver, a broadcast transmitter, and a broadcast
 * receiver. The control thread holds `last_outbound`, the most recent
 * `NetworkMessage` handed down from the State Store, and retransmits it
 * every 100 ms rather than once per mutation: any transient packet loss
 * self-heals within one tick, and a late-joining peer converges without an
 * explicit handshake. A `MotorProblems` message disables the liveness
 * beacon so peers declare this node lost and redistribute its hall calls;
 * `MotorWorksAgain` re-enables it.
 *
 * # Fields
 * - `id`: This node's id, `peer-<local-ip>:<msg-port>` or a fixed offline id if discovery failed.
 */

/***************************************/
/*        3rd party libraries          */
/***************************************/
use crossbeam_channel as cbc;
use log::{error, info, warn};
use network_rust::udpnet;
use network_rust::udpnet::peers::PeerUpdate;
use std::net::TcpStream;
use std::process;
use std::thread::{sleep, Builder};
use std::time::Duration;

/***************************************/
/*           Local modules             */
/***************************************/
use crate::config::NetworkConfig;
use crate::shared::{MessageType, NetworkMessage};

/***************************************/
/*             Constants               */
/***************************************/
const RETRANSMIT_INTERVAL: Duration = Duration::from_millis(100);
const OFFLINE_ID: &str = "peer-offline";

/***************************************/
/*             Public API              */
/***************************************/
pub struct Network {
    pub id: String,
}

impl Network {
    pub fn new(
        config: &NetworkConfig,
        net_outbound_rx: cbc::Receiver<NetworkMessage>,
        net_message_tx: cbc::Sender<NetworkMessage>,
        peer_update_tx: cbc::Sender<PeerUpdate>,
        terminate_rx: cbc::Receiver<()>,
    ) -> Network {
        let msg_port = config.msg_port;
        let peer_port = config.peer_port;

        let id = match find_local_ip(
            &config.id_gen_address,
            config.max_attempts_id_generation,
            Duration::from_millis(config.delay_between_attempts_id_generation_ms),
        ) {
            Some(ip) => format!("peer-{}:{}", ip, msg_port),
            None => {
                warn!("failed to discover local ip, running as {} (single-node mode)", OFFLINE_ID);
                OFFLINE_ID.to_string()
            }
        };
        info!("node id: {}", id);

        let (peer_tx_enable_tx, peer_tx_enable_rx) = cbc::unbounded::<bool>();
        let (bcast_send_tx, bcast_send_rx) = cbc::unbounded::<NetworkMessage>();
        let (bcast_recv_tx, bcast_recv_rx) = cbc::unbounded::<NetworkMessage>();

        let beacon_id = id.clone();
        Builder::new()
            .name("peer_tx".into())
            .spawn(move || {
                if udpnet::peers::tx(peer_port, beacon_id, peer_tx_enable_rx).is_err() {
                    error!("peer beacon transmitter failed on port {}", peer_port);
                    process::exit(1);
                }
            })
            .unwrap();

        Builder::new()
            .name("peer_rx".into())
            .spawn(move || {
                if udpnet::peers::rx(peer_port, peer_update_tx).is_err() {
                    error!("peer liveness receiver failed on port {}", peer_port);
                    process::exit(1);
                }
            })
            .unwrap();

        Builder::new()
            .name("bcast_tx".into())
            .spawn(move || {
                if udpnet::bcast::tx(msg_port, bcast_send_rx).is_err() {
                    error!("broadcast transmitter failed on port {}", msg_port);
                    process::exit(1);
                }
            })
            .unwrap();

        Builder::new()
            .name("bcast_rx".into())
            .spawn(move || {
                if udpnet::bcast::rx(msg_port, bcast_recv_tx).is_err() {
                    error!("broadcast receiver failed on port {}", msg_port);
                    process::exit(1);
                }
            })
            .unwrap();

        Builder::new()
            .name("network_control".into())
            .spawn(move || {
                run_control_loop(net_outbound_rx, bcast_recv_rx, net_message_tx, bcast_send_tx, peer_tx_enable_tx, terminate_rx);
            })
            .unwrap();

        Network { id }
    }
}

/***************************************/
/*           Local functions           */
/***************************************/
fn run_control_loop(
    net_outbound_rx: cbc::Receiver<NetworkMessage>,
    bcast_recv_rx: cbc::Receiver<NetworkMessage>,
    net_message_tx: cbc::Sender<NetworkMessage>,
    bcast_send_tx: cbc::Sender<NetworkMessage>,
    peer_tx_enable_tx: cbc::Sender<bool>,
    terminate_rx: cbc::Receiver<()>,
) {
    let mut last_outbound = NetworkMessage::blank();
    let ticker = cbc::tick(RETRANSMIT_INTERVAL);

    loop {
        cbc::select! {
            recv(net_outbound_rx) -> msg => {
                match msg {
                    Ok(msg) => last_outbound = msg,
                    Err(_) => return,
                }
            }
            recv(bcast_recv_rx) -> msg => {
                match msg {
                    Ok(msg) => { let _ = net_message_tx.send(msg); }
                    Err(_) => return,
                }
            }
            recv(terminate_rx) -> _ => return,
            recv(ticker) -> _ => {
                match last_outbound.message_type {
                    MessageType::MotorProblems => {
                        let _ = peer_tx_enable_tx.send(false);
                    }
                    MessageType::MotorWorksAgain => {
                        let _ = peer_tx_enable_tx.send(true);
                    }
                    _ => {
                        if !last_outbound.id.is_empty() {
                            let _ = bcast_send_tx.send(last_outbound.clone());
                        }
                    }
                }
            }
        }
    }
}

/// Discovers this node's local IP by opening a throwaway TCP connection to a
/// well-known reachable address and reading back the local socket address —
/// never by parsing interface tables, matching the course tooling's
/// discovery strategy.
fn find_local_ip(
    address: &str,
    max_attempts: u32,
    delay_between_attempts: Duration,
) -> Option<std::net::IpAddr> {
    for attempt in 0..max_attempts {
        match TcpStream::connect(address) {
            Ok(stream) => match stream.local_addr() {
                Ok(addr) => return Some(addr.ip()),
                Err(e) => warn!("failed to read local address: {}", e),
            },
            Err(e) => {
                warn!("attempt {} to discover local ip failed: {}", attempt + 1, e);
                sleep(delay_between_attempts);
            }
        }
    }
    None
}

