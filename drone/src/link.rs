use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use message::{FramedMessage, MAX_PAYLOAD};
use mio::net::UdpSocket;
use mio::{Interest, Token};

use crate::polling::Poller;

const PILOT: Token = Token(0);

/// Framed connection with the ground station
pub trait Link {
    /// Block until a frame may be available or `timeout` elapses
    fn wait(&mut self, timeout: Duration) -> Result<()>;

    /// Next pending frame, `None` when nothing is left to read
    fn receive(&mut self) -> Result<Option<FramedMessage>>;

    fn send(&mut self, message: &FramedMessage) -> Result<()>;
}

/// One frame per datagram. Replies go to the last peer heard from.
pub struct UdpLink {
    socket: UdpSocket,
    poller: Poller,
    peer: Option<SocketAddr>,
    buffer: Vec<u8>,
}

impl UdpLink {
    pub fn bind(address: SocketAddr) -> Result<Self> {
        let mut socket = UdpSocket::bind(address).with_context(|| format!("Cannot bind pilot link on {}", address))?;
        let mut poller = Poller::new(8)?;
        poller.register(&mut socket, PILOT, Interest::READABLE)?;
        log::info!("Pilot link listening on {}", address);
        Ok(Self {
            socket,
            poller,
            peer: None,
            buffer: vec![0; 2 + MAX_PAYLOAD],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().context("Cannot read pilot link address")
    }
}

impl Link for UdpLink {
    fn wait(&mut self, timeout: Duration) -> Result<()> {
        self.poller.poll(Some(timeout))?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<FramedMessage>> {
        loop {
            match self.socket.recv_from(&mut self.buffer) {
                Ok((size, peer)) => {
                    if self.peer != Some(peer) {
                        log::info!("Pilot connected from {}", peer);
                        self.peer = Some(peer);
                    }
                    match FramedMessage::from_bytes(&self.buffer[..size]) {
                        Ok(message) => return Ok(Some(message)),
                        Err(e) => log::warn!("Dropping datagram from {}: {:#}", peer, e),
                    }
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e).context("Error reading pilot link"),
            }
        }
    }

    fn send(&mut self, message: &FramedMessage) -> Result<()> {
        let Some(peer) = self.peer else {
            return Ok(());
        };
        match self.socket.send_to(&message.to_bytes(), peer) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                log::debug!("Pilot link busy, dropping frame {:#04x}", message.command());
                Ok(())
            },
            Err(e) => Err(e).with_context(|| format!("Cannot send to {}", peer)),
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use message::MessageCode;
    use std::collections::VecDeque;
    use std::net::{Ipv4Addr, UdpSocket as StdSocket};

    /// Link fed from a queue, keeping what is sent
    #[derive(Default)]
    pub struct ScriptedLink {
        pub inbound: VecDeque<FramedMessage>,
        pub sent: Vec<FramedMessage>,
    }

    impl Link for ScriptedLink {
        fn wait(&mut self, _: Duration) -> Result<()> {
            Ok(())
        }

        fn receive(&mut self) -> Result<Option<FramedMessage>> {
            Ok(self.inbound.pop_front())
        }

        fn send(&mut self, message: &FramedMessage) -> Result<()> {
            self.sent.push(message.clone());
            Ok(())
        }
    }

    fn loopback() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
    }

    fn receive_one(link: &mut UdpLink) -> FramedMessage {
        for _ in 0..100 {
            link.wait(Duration::from_millis(10)).unwrap();
            if let Some(message) = link.receive().unwrap() {
                return message;
            }
        }
        panic!("No frame received");
    }

    #[test]
    fn nothing_pending_is_none() {
        let mut link = UdpLink::bind(loopback()).unwrap();
        assert!(link.receive().unwrap().is_none());
        // No peer yet, nothing to reply to
        link.send(&FramedMessage::empty(MessageCode::Telemetry)).unwrap();
    }

    #[test]
    fn frames_round_trip_with_peer() {
        let mut link = UdpLink::bind(loopback()).unwrap();
        let ground = StdSocket::bind(loopback()).unwrap();
        ground.set_read_timeout(Some(Duration::from_secs(1))).unwrap();

        // Garbage is dropped, the following frame still comes through
        ground.send_to(&[0x21, 5, 1], link.local_addr().unwrap()).unwrap();
        let request = FramedMessage::empty(MessageCode::RequestFusionBeta);
        ground.send_to(&request.to_bytes(), link.local_addr().unwrap()).unwrap();
        assert_eq!(receive_one(&mut link), request);

        let reply = FramedMessage::new(MessageCode::RequestFusionBeta as u8, vec![7; 8]).unwrap();
        link.send(&reply).unwrap();
        let mut buffer = [0; 64];
        let size = ground.recv(&mut buffer).unwrap();
        assert_eq!(FramedMessage::from_bytes(&buffer[..size]).unwrap(), reply);
    }
}
