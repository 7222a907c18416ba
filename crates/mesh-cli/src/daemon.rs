//! Controller event loop
//!
//! One tokio task owns the [`Controller`]. It alternates between broker
//! datagrams, the task scheduler tick and the periodic operations tick, so the
//! controller itself never needs locking.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mesh_controller::Controller;
use mesh_core::{ControllerConfig, MacAddress, SystemTimeSource};
use tokio::net::UdpSocket;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::link::{decode_frame, UdpLink, MAX_DATAGRAM};

pub struct Daemon {
    controller: Controller,
    socket: Arc<UdpSocket>,
}

impl Daemon {
    /// Bind the broker socket and build a started controller on it
    pub async fn bind(
        config: ControllerConfig,
        bridge_mac: MacAddress,
        listen: SocketAddr,
        broker: SocketAddr,
    ) -> Result<Self> {
        let socket = Arc::new(UdpSocket::bind(listen).await?);
        let link = UdpLink::new(socket.clone(), broker, bridge_mac);
        let mut controller = Controller::new(config, bridge_mac, Box::new(link), Arc::new(SystemTimeSource::new()))?;
        controller.start();
        info!(listen = %socket.local_addr()?, broker = %broker, bridge_mac = %bridge_mac, "broker link up");
        Ok(Self { controller, socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Serve until `shutdown` resolves
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut tasks_tick = interval(Duration::from_millis(self.controller.config().tasks_tick_ms));
        tasks_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut operations_tick = interval(Duration::from_millis(self.controller.config().operations_tick_ms));
        operations_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut buf = vec![0u8; MAX_DATAGRAM];
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => self.handle_datagram(&buf[..len], peer),
                    Err(e) => warn!(error = %e, "broker socket receive failed"),
                },
                _ = tasks_tick.tick() => {
                    self.controller.run_tasks();
                }
                _ = operations_tick.tick() => {
                    self.controller.run_operations();
                }
                _ = &mut shutdown => {
                    info!("shutting down");
                    return Ok(());
                }
            }
        }
    }

    fn handle_datagram(&mut self, bytes: &[u8], peer: SocketAddr) {
        let frame = match decode_frame(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(peer = %peer, error = %e, "dropping datagram");
                return;
            }
        };
        match self.controller.handle_broker_message(frame.dst, frame.src, frame.cmdu) {
            Ok(true) => {}
            Ok(false) => debug!(src = %frame.src, dst = %frame.dst, "frame filtered or handler failed"),
            Err(e) => warn!(src = %frame.src, error = %e, "undecodable CMDU"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use mesh_core::protocol::tlv::{
        role, service, AlMacAddressTlv, AutoconfigFreqBandTlv, SearchedRoleTlv, SearchedServiceTlv,
        SupportedServiceTlv,
    };
    use mesh_core::{Cmdu, FreqBand, MessageType};
    use tokio::sync::oneshot;

    use crate::link::encode_frame;

    const BRIDGE: MacAddress = MacAddress::new([0x02, 0, 0, 0, 0, 0x01]);
    const AGENT: MacAddress = MacAddress::new([0x02, 0xa0, 0, 0, 0, 0x01]);

    #[tokio::test]
    async fn test_search_is_answered_over_udp() {
        let broker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let daemon = Daemon::bind(
            ControllerConfig::testing(),
            BRIDGE,
            "127.0.0.1:0".parse().unwrap(),
            broker.local_addr().unwrap(),
        )
        .await
        .unwrap();
        let daemon_addr = daemon.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(daemon.run_until(async {
            let _ = stopped.await;
        }));

        let search = Cmdu::new(MessageType::ApAutoconfigurationSearch, 0x0102)
            .with(&AlMacAddressTlv { mac: AGENT })
            .with(&SearchedRoleTlv { role: role::REGISTRAR })
            .with(&AutoconfigFreqBandTlv {
                band: FreqBand::Band5G.to_ieee1905(),
            })
            .with(&SupportedServiceTlv {
                services: vec![service::AGENT],
            })
            .with(&SearchedServiceTlv {
                services: vec![service::CONTROLLER],
            });
        let frame = encode_frame(MacAddress::MULTICAST_1905, AGENT, &search.encode().unwrap());
        broker.send_to(&frame, daemon_addr).await.unwrap();

        // the daemon may emit its own start-up traffic first
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let response = loop {
            let (len, _) = tokio::time::timeout(Duration::from_secs(5), broker.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
            let frame = decode_frame(&buf[..len]).unwrap();
            let cmdu = Cmdu::decode(frame.cmdu).unwrap();
            if cmdu.message_type() == Some(MessageType::ApAutoconfigurationResponse) {
                assert_eq!(frame.dst, AGENT);
                assert_eq!(frame.src, BRIDGE);
                break cmdu;
            }
        };
        assert_eq!(response.message_id(), 0x0102);

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_garbage_datagram_is_ignored() {
        let broker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut daemon = Daemon::bind(
            ControllerConfig::testing(),
            BRIDGE,
            "127.0.0.1:0".parse().unwrap(),
            broker.local_addr().unwrap(),
        )
        .await
        .unwrap();
        let peer = broker.local_addr().unwrap();

        daemon.handle_datagram(&[0x01, 0x02], peer);
        let mut frame = encode_frame(BRIDGE, AGENT, &[]);
        frame.extend_from_slice(&[0xff; 5]);
        daemon.handle_datagram(&frame, peer);

        assert!(daemon.controller().db().agent(&AGENT).is_none());
    }
}
