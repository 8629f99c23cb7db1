//! Byte links to a radio: USB serial or the firmware's TCP API port.
//!
//! Opening a link spawns a reader (a thread for serial, a task for TCP) that pushes raw
//! chunks into an unbounded channel. A read error or EOF is delivered as the last item.

use crate::config::{MeshtasticConfig, TransportKind};
use crate::transport::TransportError;
use log::{debug, trace};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[cfg(feature = "serial")]
use serialport::SerialPort;
#[cfg(feature = "serial")]
use std::time::Duration;

/// One read from the link; `Err` ends the stream.
pub type LinkChunk = io::Result<Vec<u8>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioAddress {
    Serial { path: String, baud: u32 },
    Tcp { host: String, port: u16 },
}

impl RadioAddress {
    pub fn from_config(cfg: &MeshtasticConfig) -> Result<Self, TransportError> {
        match cfg.transport {
            TransportKind::Serial => {
                let path = cfg.port.trim();
                if path.is_empty() || cfg.baud_rate == 0 {
                    return Err(TransportError::InvalidAddress(cfg.address_label()));
                }
                Ok(RadioAddress::Serial {
                    path: path.to_string(),
                    baud: cfg.baud_rate,
                })
            }
            TransportKind::Tcp => {
                let host = cfg.host.trim();
                if host.is_empty() || host.contains(char::is_whitespace) || cfg.tcp_port == 0 {
                    return Err(TransportError::InvalidAddress(cfg.address_label()));
                }
                Ok(RadioAddress::Tcp {
                    host: host.to_string(),
                    port: cfg.tcp_port,
                })
            }
        }
    }
}

impl fmt::Display for RadioAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioAddress::Serial { path, baud } => write!(f, "{}@{}", path, baud),
            RadioAddress::Tcp { host, port } => write!(f, "{}:{}", host, port),
        }
    }
}

enum LinkWriter {
    #[cfg(feature = "serial")]
    Serial(Box<dyn SerialPort>),
    Tcp(OwnedWriteHalf),
}

/// Write side of an open link plus the handle on its reader.
pub struct Link {
    writer: LinkWriter,
    stop: Arc<AtomicBool>,
    reader_task: Option<JoinHandle<()>>,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.writer {
            #[cfg(feature = "serial")]
            LinkWriter::Serial(_) => "serial",
            LinkWriter::Tcp(_) => "tcp",
        };
        f.debug_struct("Link").field("kind", &kind).finish()
    }
}

impl Link {
    pub async fn open(
        address: &RadioAddress,
    ) -> Result<(Link, mpsc::UnboundedReceiver<LinkChunk>), TransportError> {
        match address {
            RadioAddress::Serial { path, baud } => open_serial(path, *baud).await,
            RadioAddress::Tcp { host, port } => open_tcp(host, *port).await,
        }
    }

    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        match &mut self.writer {
            #[cfg(feature = "serial")]
            LinkWriter::Serial(port) => {
                use std::io::Write;
                port.write_all(frame)?;
                port.flush()?;
            }
            LinkWriter::Tcp(stream) => {
                stream.write_all(frame).await?;
                stream.flush().await?;
            }
        }
        trace!("wrote {} byte frame", frame.len());
        Ok(())
    }

    /// Stop the reader and release the connection. Errors are ignored.
    pub async fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let LinkWriter::Tcp(stream) = &mut self.writer {
            let _ = stream.shutdown().await;
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

async fn open_tcp(
    host: &str,
    port: u16,
) -> Result<(Link, mpsc::UnboundedReceiver<LinkChunk>), TransportError> {
    debug!("Opening TCP connection to {}:{}", host, port);
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| TransportError::Connect(format!("{}:{}: {}", host, port, e)))?;
    let _ = stream.set_nodelay(true);
    let (mut rd, wr) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();

    let reader_task = tokio::spawn(async move {
        let mut buf = vec![0u8; 1024];
        loop {
            match rd.read(&mut buf).await {
                Ok(0) => {
                    let _ = tx.send(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "radio closed the connection",
                    )));
                    break;
                }
                Ok(n) => {
                    if tx.send(Ok(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });

    Ok((
        Link {
            writer: LinkWriter::Tcp(wr),
            stop: Arc::new(AtomicBool::new(false)),
            reader_task: Some(reader_task),
        },
        rx,
    ))
}

#[cfg(feature = "serial")]
fn map_serial_error(path: &str, e: serialport::Error) -> TransportError {
    match e.kind() {
        serialport::ErrorKind::NoDevice | serialport::ErrorKind::Io(io::ErrorKind::NotFound) => {
            TransportError::DeviceNotFound(path.to_string())
        }
        serialport::ErrorKind::InvalidInput => {
            TransportError::InvalidAddress(format!("{}: {}", path, e))
        }
        _ => TransportError::Connect(format!("{}: {}", path, e)),
    }
}

#[cfg(feature = "serial")]
async fn open_serial(
    path: &str,
    baud: u32,
) -> Result<(Link, mpsc::UnboundedReceiver<LinkChunk>), TransportError> {
    use std::io::Read;

    debug!("Opening serial port {} at {} baud", path, baud);
    let mut port = serialport::new(path, baud)
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serialport::Parity::None)
        .timeout(Duration::from_millis(500))
        .open()
        .map_err(|e| map_serial_error(path, e))?;

    // wake the radio and drop any boot chatter
    let _ = port.write_data_terminal_ready(true);
    let _ = port.write_request_to_send(true);
    tokio::time::sleep(Duration::from_millis(150)).await;
    let _ = port.clear(serialport::ClearBuffer::Input);

    let mut reader = port.try_clone().map_err(|e| map_serial_error(path, e))?;
    let stop = Arc::new(AtomicBool::new(false));
    let stop_reader = Arc::clone(&stop);
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::Builder::new()
        .name("meshping-serial-rx".to_string())
        .spawn(move || {
            let mut buf = [0u8; 1024];
            while !stop_reader.load(Ordering::Relaxed) {
                match reader.read(&mut buf) {
                    Ok(0) => continue,
                    Ok(n) => {
                        if tx.send(Ok(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        })?;

    Ok((
        Link {
            writer: LinkWriter::Serial(port),
            stop,
            reader_task: None,
        },
        rx,
    ))
}

#[cfg(not(feature = "serial"))]
async fn open_serial(
    path: &str,
    _baud: u32,
) -> Result<(Link, mpsc::UnboundedReceiver<LinkChunk>), TransportError> {
    Err(TransportError::InvalidAddress(format!(
        "{} (built without serial support)",
        path
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn address_from_config() {
        let mut cfg = MeshtasticConfig::default();
        assert_eq!(
            RadioAddress::from_config(&cfg).unwrap(),
            RadioAddress::Serial {
                path: "/dev/ttyUSB0".into(),
                baud: 115200
            }
        );
        cfg.transport = TransportKind::Tcp;
        assert!(matches!(
            RadioAddress::from_config(&cfg),
            Err(TransportError::InvalidAddress(_))
        ));
        cfg.host = "192.168.15.10".into();
        let addr = RadioAddress::from_config(&cfg).unwrap();
        assert_eq!(addr.to_string(), "192.168.15.10:4403");
    }

    #[tokio::test]
    async fn tcp_link_round_trip_and_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut got = [0u8; 3];
            sock.read_exact(&mut got).await.unwrap();
            sock.write_all(b"pong").await.unwrap();
            got
        });

        let addr = RadioAddress::Tcp {
            host: "127.0.0.1".into(),
            port,
        };
        let (mut link, mut rx) = Link::open(&addr).await.unwrap();
        link.write_frame(b"abc").await.unwrap();
        assert_eq!(&server.await.unwrap(), b"abc");

        let mut data = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                Ok(chunk) => data.extend(chunk),
                Err(e) => {
                    assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof);
                    break;
                }
            }
        }
        assert_eq!(data, b"pong");
        link.shutdown().await;
    }
}
