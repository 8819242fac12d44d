//! ==============================================================================
//! command.rs - node control protocol
//! ==============================================================================
//!
//! purpose:
//!     encodes the text commands understood by the node firmware and broadcasts
//!     them on the control port:
//!
//!         ACK|<node>
//!         SET_MODE|<MODE_ADC|MODE_SD|MODE_UDP>|<node>
//!         SET_SEND|ON|<node>   /   SET_SEND|OFF|<node>
//!
//!     <node> is 1..=3 for a single node or -1 for every node.
//!
//!     after a SET_MODE goes out, the local mode LEDs switch to the new
//!     source immediately (CommandPanel).
//!
//! relationships:
//!     - used by: http.rs (POST /api/command)
//!     - drives: hal.rs (ModeDriver)
//!
//! ==============================================================================

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

use crate::hal::ModeDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    All,
    Node(u32),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::All => write!(f, "-1"),
            Target::Node(n) => write!(f, "{}", n),
        }
    }
}

/// measurement source selected on the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Adc,
    Sd,
    Udp,
}

impl OperatingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OperatingMode::Adc => "MODE_ADC",
            OperatingMode::Sd => "MODE_SD",
            OperatingMode::Udp => "MODE_UDP",
        }
    }

    /// accepts "adc", "MODE_ADC", ... (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.to_ascii_uppercase();
        match s.strip_prefix("MODE_").unwrap_or(&s) {
            "ADC" => Some(OperatingMode::Adc),
            "SD" => Some(OperatingMode::Sd),
            "UDP" => Some(OperatingMode::Udp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// acknowledge / reset a latched fault on the node
    Ack(Target),
    SetMode(OperatingMode, Target),
    SetSend(bool, Target),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Ack(t) => write!(f, "ACK|{}", t),
            Command::SetMode(mode, t) => write!(f, "SET_MODE|{}|{}", mode.as_str(), t),
            Command::SetSend(on, t) => {
                write!(f, "SET_SEND|{}|{}", if *on { "ON" } else { "OFF" }, t)
            }
        }
    }
}

/// broadcasts encoded commands to every node on the LAN
pub struct CommandSender {
    socket: UdpSocket,
    dest: SocketAddr,
}

impl CommandSender {
    pub async fn bind(broadcast_addr: &str, control_port: u16) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("failed to bind command socket")?;
        socket.set_broadcast(true).context("failed to enable SO_BROADCAST")?;
        let dest: SocketAddr = format!("{}:{}", broadcast_addr, control_port)
            .parse()
            .with_context(|| format!("invalid broadcast address {}", broadcast_addr))?;
        Ok(Self { socket, dest })
    }

    pub async fn send(&self, command: &Command) -> Result<()> {
        let msg = command.to_string();
        self.socket
            .send_to(msg.as_bytes(), self.dest)
            .await
            .with_context(|| format!("failed to send {}", msg))?;
        tracing::info!("[CMD] {}", msg);
        Ok(())
    }
}

/// broadcaster plus the locally displayed mode
pub struct CommandPanel {
    sender: CommandSender,
    mode_leds: Mutex<Box<dyn ModeDriver>>,
    current_mode: Mutex<OperatingMode>,
}

impl CommandPanel {
    /// nodes boot in ADC mode; the LEDs stay dark until the first SET_MODE
    pub fn new(sender: CommandSender, mode_leds: Box<dyn ModeDriver>) -> Self {
        Self {
            sender,
            mode_leds: Mutex::new(mode_leds),
            current_mode: Mutex::new(OperatingMode::Adc),
        }
    }

    pub fn current_mode(&self) -> OperatingMode {
        *self.current_mode.lock()
    }

    /// Broadcast `command`; a SET_MODE also updates the mode LEDs.
    ///
    /// Nothing local changes when the broadcast fails.
    pub async fn dispatch(&self, command: &Command) -> Result<()> {
        self.sender.send(command).await?;
        if let Command::SetMode(mode, _) = *command {
            *self.current_mode.lock() = mode;
            self.mode_leds.lock().set_mode(mode)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_encoding() {
        assert_eq!(Command::Ack(Target::All).to_string(), "ACK|-1");
        assert_eq!(
            Command::SetMode(OperatingMode::Udp, Target::Node(2)).to_string(),
            "SET_MODE|MODE_UDP|2"
        );
        assert_eq!(Command::SetSend(true, Target::Node(1)).to_string(), "SET_SEND|ON|1");
        assert_eq!(Command::SetSend(false, Target::All).to_string(), "SET_SEND|OFF|-1");
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(OperatingMode::parse("sd"), Some(OperatingMode::Sd));
        assert_eq!(OperatingMode::parse("MODE_ADC"), Some(OperatingMode::Adc));
        assert_eq!(OperatingMode::parse("serial"), None);
    }

    #[tokio::test]
    async fn test_sender_delivers_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        let sender = CommandSender::bind("127.0.0.1", port).await.unwrap();
        sender.send(&Command::Ack(Target::Node(3))).await.unwrap();

        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ACK|3");
    }

    #[derive(Clone, Default)]
    struct RecordingModeLeds {
        modes: std::sync::Arc<Mutex<Vec<OperatingMode>>>,
    }

    impl ModeDriver for RecordingModeLeds {
        fn set_mode(&mut self, mode: OperatingMode) -> Result<()> {
            self.modes.lock().push(mode);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_set_mode_updates_mode_leds() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();
        let leds = RecordingModeLeds::default();
        let panel = CommandPanel::new(
            CommandSender::bind("127.0.0.1", port).await.unwrap(),
            Box::new(leds.clone()),
        );
        assert_eq!(panel.current_mode(), OperatingMode::Adc);

        panel.dispatch(&Command::Ack(Target::All)).await.unwrap();
        panel.dispatch(&Command::SetMode(OperatingMode::Udp, Target::Node(2))).await.unwrap();
        panel.dispatch(&Command::SetSend(true, Target::All)).await.unwrap();

        assert_eq!(panel.current_mode(), OperatingMode::Udp);
        assert_eq!(*leds.modes.lock(), vec![OperatingMode::Udp]);

        let mut buf = [0u8; 64];
        let mut received = Vec::new();
        for _ in 0..3 {
            let n = receiver.recv(&mut buf).await.unwrap();
            received.push(String::from_utf8_lossy(&buf[..n]).into_owned());
        }
        assert_eq!(received, vec!["ACK|-1", "SET_MODE|MODE_UDP|2", "SET_SEND|ON|-1"]);
    }
}
